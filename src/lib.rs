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

//! A CESK* abstract machine for a small lambda calculus extended with
//! string constants, mutable heap references, sequencing, and an
//! ECMAScript-flavored promise model.
//!
//! The same `step` relation (in [`machine`]) runs two ways, chosen by
//! which [`alloc::AllocPolicy`] the caller supplies to [`driver::reachable`]:
//! a concrete interpreter that always allocates a fresh address
//! ([`alloc::ConcreteAlloc`]), or a finite, sound abstraction that
//! bounds the address domain ([`alloc::KCFAAlloc`]). Module layout
//! mirrors the machine's five components:
//!
//! - [`syntax`] — expressions, environments, continuations.
//! - [`store`] — the address-to-storable-set mapping.
//! - [`promise`] — promise state, reaction tables, links, the two drain queues.
//! - [`alloc`] — the allocator/tick hooks that switch concrete vs. abstract.
//! - [`machine`] — `Configuration`, `Outcome`, `inject`, `step`.
//! - [`driver`] — the worklist that drives `step` to a fixed point.

pub mod alloc;
pub mod driver;
pub mod machine;
pub mod promise;
pub mod store;
pub mod syntax;

pub use alloc::{AllocPolicy, ConcreteAlloc, KCFAAlloc};
pub use driver::reachable;
pub use machine::{inject, step, AbortReason, Configuration, Outcome};
pub use syntax::{Address, Environment, Expression, Kontinuation, Variable};
