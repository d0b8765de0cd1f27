// Copyright 2019 Matthieu Felix
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Allocator and tick — the two abstraction hooks that turn the same
//! step relation into either a concrete interpreter (one successor
//! per configuration) or a finite, sound abstract interpreter.
//!
//! A fixed set of compile-time address constants won't do here: the
//! same step relation has to run under two different address domains
//! (globally fresh addresses, or a bounded finite set), so the
//! allocation strategy is a trait object instead of a constant table.

use crate::machine::Configuration;
use crate::syntax::{Address, Kontinuation};

/// Opaque tick counter. Only used by allocator/tick hooks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Time(pub usize);

/// Pure, deterministic functions of the current configuration and the
/// continuation about to receive a freshly-allocated address.
pub trait AllocPolicy: std::fmt::Debug {
    fn alloc(&self, cfg: &Configuration, k: &Kontinuation) -> Address;
    fn tick(&self, cfg: &Configuration, k: &Kontinuation) -> Time;
}

/// Concrete instantiation: a globally fresh address derived from the
/// current time, incrementing time by one per call. Combined with
/// `Store::strong_update`, this gives a one-successor-per-step,
/// deterministic concrete machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcreteAlloc;

impl AllocPolicy for ConcreteAlloc {
    fn alloc(&self, cfg: &Configuration, _k: &Kontinuation) -> Address {
        Address(cfg.time.0)
    }

    fn tick(&self, cfg: &Configuration, _k: &Kontinuation) -> Time {
        Time(cfg.time.0 + 1)
    }
}

/// Finite-domain instantiation: a k-bounded timestamp scheme (Might &
/// Shivers' time-stamp-based k-CFA) used in place of syntactic
/// allocation-site labels, since this core's `Expression` nodes carry
/// no identity of their own beyond structural equality. The address
/// is derived from the *kind* of continuation being allocated for,
/// crossed with the low `k` ticks of time; at `k = 0` every
/// allocation collapses onto a single constant address (plain 0-CFA).
#[derive(Debug, Clone, Copy)]
pub struct KCFAAlloc {
    pub k: usize,
}

impl Default for KCFAAlloc {
    /// 0-CFA: the coarsest, smallest finite domain — a single address.
    fn default() -> Self {
        KCFAAlloc { k: 0 }
    }
}

impl KCFAAlloc {
    pub fn new(k: usize) -> Self {
        KCFAAlloc { k }
    }

    fn kont_tag(k: &Kontinuation) -> usize {
        match k {
            Kontinuation::Empty => 0,
            Kontinuation::KApp1(..) => 1,
            Kontinuation::KApp2(..) => 2,
            Kontinuation::KRef(_) => 3,
            Kontinuation::KDeref(_) => 4,
            Kontinuation::KSeq(..) => 5,
            Kontinuation::KPromisify(_) => 6,
            Kontinuation::KResolve1(..) => 7,
            Kontinuation::KResolve2(..) => 8,
            Kontinuation::KReject1(..) => 9,
            Kontinuation::KReject2(..) => 10,
            Kontinuation::KOnResolve1(..) => 11,
            Kontinuation::KOnResolve2(..) => 12,
            Kontinuation::KOnReject1(..) => 13,
            Kontinuation::KOnReject2(..) => 14,
            Kontinuation::KLink1(..) => 15,
            Kontinuation::KLink2(..) => 16,
        }
    }
}

impl AllocPolicy for KCFAAlloc {
    fn alloc(&self, cfg: &Configuration, k: &Kontinuation) -> Address {
        if self.k == 0 {
            return Address(0);
        }
        let tag = Self::kont_tag(k);
        let window = cfg.time.0 % self.k;
        Address(tag * self.k + window)
    }

    fn tick(&self, cfg: &Configuration, _k: &Kontinuation) -> Time {
        Time(cfg.time.0 + 1)
    }
}
