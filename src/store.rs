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

//! Store — the address-to-set-of-storables mapping with join-on-write
//! semantics that makes the abstract machine sound.
//!
//! `Store` is cheap to clone: it wraps its backing map in an `Rc` and
//! only actually duplicates the map on the first write after a share —
//! sharing until someone needs to diverge.
//!
//! The per-address set is represented as a `Vec` deduplicated by
//! structural equality rather than a `HashSet`: `Kontinuation` and
//! `Expression` close over `Environment`, which is a plain
//! `HashMap`-backed type with no `Hash` impl of its own, so the
//! set's membership test falls back to `PartialEq`. Addresses hold at
//! most a handful of storables in practice, so the linear scan costs
//! nothing that matters.

use std::rc::Rc;

use crate::syntax::{Address, Environment, Expression};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Storable {
    StoredKont(crate::syntax::Kontinuation),
    StoredValue(Expression, EnvKey),
}

/// `Environment` wrapped for use as (part of) a store key/value.
/// Equality is pointer identity first, falling back to structural
/// equality — two `Rc`s are either the same allocation or were built
/// via distinct `env_with` calls, in which case structural comparison
/// is still correct, just slower.
#[derive(Debug, Clone)]
pub struct EnvKey(pub Environment);

impl PartialEq for EnvKey {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}
impl Eq for EnvKey {}

#[derive(Debug, Clone, Default)]
pub struct Store {
    map: Rc<std::collections::HashMap<Address, Rc<Vec<Storable>>>>,
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}
impl Eq for Store {}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    /// Returns the full set of storables at `a`, or an empty set if
    /// `a` has never been written.
    pub fn lookup(&self, a: Address) -> Rc<Vec<Storable>> {
        self.map.get(&a).cloned().unwrap_or_default()
    }

    /// Join-write: the set at `a` becomes the union of its previous
    /// contents and `{s}`. Never overwrites, which is what makes
    /// abstract interpretation (where several concrete addresses can
    /// collapse onto one) sound rather than lossy.
    pub fn weak_update(&self, a: Address, s: Storable) -> Store {
        let mut set = (*self.lookup(a)).clone();
        if !set.contains(&s) {
            set.push(s);
        }
        let mut map = (*self.map).clone();
        map.insert(a, Rc::new(set));
        Store { map: Rc::new(map) }
    }

    /// Specialization of `weak_update` for the concrete machine,
    /// where `alloc` guarantees `a` is globally fresh: replaces
    /// rather than joins. Only sound when freshness is guaranteed by
    /// the allocator in use — callers pass that guarantee in
    /// explicitly rather than this type inferring it, since `Store`
    /// has no way to know which `AllocPolicy` produced `a`.
    pub fn strong_update(&self, a: Address, s: Storable) -> Store {
        let mut map = (*self.map).clone();
        map.insert(a, Rc::new(vec![s]));
        Store { map: Rc::new(map) }
    }

    /// `true` iff every address's set in `self` is a subset of the
    /// corresponding set in `other` — a store only ever grows under
    /// repeated joins.
    pub fn is_submap_of(&self, other: &Store) -> bool {
        self.map.iter().all(|(a, set)| {
            other
                .map
                .get(a)
                .map(|other_set| set.iter().all(|s| other_set.contains(s)))
                .unwrap_or(false)
        })
    }
}
