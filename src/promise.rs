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

//! Promise tables — promise state, fulfill/reject reaction lists,
//! links, and the two drain queues.
//!
//! Every table here is keyed by the promise's store `Address`, and
//! every list is an *ordered sequence*, never a set: ECMAScript-style
//! promise ordering (which reaction runs first, which link propagates
//! first) is observable behavior, not an implementation detail a
//! `HashSet` could hide.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::store::EnvKey;
use crate::syntax::{Address, Expression};

/// A settled promise's payload: the value it settled to, plus the
/// environment that was in scope when it settled. Carrying the
/// environment is required: a reaction handler applied later must see
/// the value's free variables resolved in the scope where the value
/// was produced, not the scope of whatever drained the reaction
/// queue.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settled {
    pub value: Expression,
    pub env: EnvKey,
}

/// The two terminal states a promise can carry a value in. `Pending`
/// carries none.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PromiseValue {
    Fulfilled(Settled),
    Rejected(Settled),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PromiseCell {
    Pending,
    Settled(PromiseValue),
}

/// Address → promise cell. An address absent from this map has never
/// been promisified.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PromiseState(HashMap<Address, PromiseCell>);

impl PromiseState {
    pub fn new() -> Self {
        PromiseState::default()
    }

    pub fn is_promisified(&self, a: Address) -> bool {
        self.0.contains_key(&a)
    }

    /// Read-only accessor: the promise's current cell, if any. Not
    /// part of the step relation — used by callers (tests, the demo
    /// binary) that want to report outcomes without re-deriving state
    /// from the queues.
    pub fn peek(&self, a: Address) -> Option<&PromiseCell> {
        self.0.get(&a)
    }

    /// Sets `a` to `Pending` if it has no cell yet; a no-op otherwise
    /// — re-promisifying an already-promisified address changes
    /// nothing.
    pub fn promisify(&self, a: Address) -> PromiseState {
        if self.0.contains_key(&a) {
            self.clone()
        } else {
            let mut next = self.0.clone();
            next.insert(a, PromiseCell::Pending);
            PromiseState(next)
        }
    }

    /// Settles `a` to `value` if it is currently `Pending`; a no-op on
    /// an already-settled promise (Fulfilled/Rejected are terminal
    /// states) and an error on an unpromisified address, signaled by
    /// returning `None`.
    pub fn settle(&self, a: Address, value: PromiseValue) -> Option<PromiseState> {
        match self.0.get(&a) {
            None => None,
            Some(PromiseCell::Settled(_)) => Some(self.clone()),
            Some(PromiseCell::Pending) => {
                let mut next = self.0.clone();
                next.insert(a, PromiseCell::Settled(value));
                Some(PromiseState(next))
            }
        }
    }
}

/// One registered reaction: the handler expression (and its closing
/// environment) paired with the address of the child promise created
/// to carry the reaction's own result.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reaction {
    pub handler: Rc<Expression>,
    pub handler_env: EnvKey,
    pub child: Address,
}

/// Address → ordered list of reactions. Used for both fulfill and
/// reject reaction tables, kept as two parallel maps of identical
/// shape.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReactionTable(HashMap<Address, Vec<Reaction>>);

impl ReactionTable {
    pub fn new() -> Self {
        ReactionTable::default()
    }

    pub fn push(&self, a: Address, r: Reaction) -> ReactionTable {
        let mut next = self.0.clone();
        next.entry(a).or_default().push(r);
        ReactionTable(next)
    }

    /// Removes and returns all reactions registered at `a`, in
    /// registration order, along with the table with `a` cleared.
    /// Used when a promise settles: its reaction list is drained into
    /// the reaction queue and then discarded.
    pub fn take(&self, a: Address) -> (Vec<Reaction>, ReactionTable) {
        let mut next = self.0.clone();
        let taken = next.remove(&a).unwrap_or_default();
        (taken, ReactionTable(next))
    }
}

/// Address → ordered list of child promise addresses that this
/// promise's eventual resolution/rejection must propagate to.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PromiseLinks(HashMap<Address, Vec<Address>>);

impl PromiseLinks {
    pub fn new() -> Self {
        PromiseLinks::default()
    }

    pub fn push(&self, parent: Address, child: Address) -> PromiseLinks {
        let mut next = self.0.clone();
        next.entry(parent).or_default().push(child);
        PromiseLinks(next)
    }

    pub fn take(&self, a: Address) -> (Vec<Address>, PromiseLinks) {
        let mut next = self.0.clone();
        let taken = next.remove(&a).unwrap_or_default();
        (taken, PromiseLinks(next))
    }
}

/// FIFO of pending link propagations: `(settled value, target promise)`.
/// Drained one entry at a time by `machine::link_drain`.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LinkQueue(VecDeque<(PromiseValue, Address)>);

impl LinkQueue {
    pub fn new() -> Self {
        LinkQueue::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_back(&self, entry: (PromiseValue, Address)) -> LinkQueue {
        let mut next = self.0.clone();
        next.push_back(entry);
        LinkQueue(next)
    }

    pub fn pop_front(&self) -> Option<((PromiseValue, Address), LinkQueue)> {
        let mut next = self.0.clone();
        let head = next.pop_front()?;
        Some((head, LinkQueue(next)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// FIFO of pending reactions: `(settled value, handler, child promise)`.
/// Drained one entry at a time by `machine::reaction_drain`, but only
/// when the current expression is a value: the machine must finish
/// producing whatever it was doing before a reaction can run, matching
/// microtask ordering.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReactionQueue(VecDeque<(PromiseValue, Rc<Expression>, EnvKey, Address)>);

impl ReactionQueue {
    pub fn new() -> Self {
        ReactionQueue::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_back(&self, entry: (PromiseValue, Rc<Expression>, EnvKey, Address)) -> ReactionQueue {
        let mut next = self.0.clone();
        next.push_back(entry);
        ReactionQueue(next)
    }

    pub fn pop_front(&self) -> Option<((PromiseValue, Rc<Expression>, EnvKey, Address), ReactionQueue)> {
        let mut next = self.0.clone();
        let head = next.pop_front()?;
        Some((head, ReactionQueue(next)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
