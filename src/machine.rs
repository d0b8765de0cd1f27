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

//! The step relation — the heart of the machine.
//!
//! `step` pattern-matches on the pair (current expression, current
//! continuation): a flat dispatch over a closed tagged sum, no virtual
//! methods. Every arm produces zero or more `Outcome`s, since
//! under abstraction a single configuration can have several sound
//! successors (store nondeterminism); under the concrete allocator it
//! always produces at most one.
//!
//! Three places need more than one store allocation or a plain
//! textual splice to stay scope-correct when re-injecting an
//! already-evaluated value whose closing environment differs from
//! whatever is ambient at the splice site: both queue-drain rules
//! route the settled value through a freshly allocated address and a
//! `Deref`, exactly the mechanism `Ref`/`Deref` already provide for
//! heap use. See `reaction_drain` and `link_drain`.

use std::fmt;
use std::rc::Rc;

use log::{debug, trace};

use crate::alloc::AllocPolicy;
use crate::promise::{
    LinkQueue, PromiseCell, PromiseLinks, PromiseState, PromiseValue, Reaction, ReactionQueue,
    ReactionTable, Settled,
};
use crate::store::{EnvKey, Storable, Store};
use crate::syntax::{empty_env, env_with, Address, Environment, Expression, Kontinuation, Variable};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AbortReason {
    /// The environment lacks the referenced variable.
    UnboundVariable(Variable),
    /// A control-flow path treated a stored continuation as a value.
    NonValueStorable(Address),
    /// resolve/reject/onResolve/onReject on a never-promisified address.
    PromiseMisuse(Address),
    /// Structurally-impossible shapes: malformed input, or an unsound
    /// abstraction merging incompatible values.
    TypeError(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::UnboundVariable(v) => write!(f, "unbound variable {:?}", v),
            AbortReason::NonValueStorable(a) => write!(f, "non-value storable at {:?}", a),
            AbortReason::PromiseMisuse(a) => write!(f, "promise misuse at {:?}", a),
            AbortReason::TypeError(msg) => write!(f, "type error: {}", msg),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    Next(Configuration),
    Done(Configuration),
    Abort(AbortReason),
}

/// The full machine state. Never mutated in place — every step
/// produces a fresh `Configuration`; old ones survive in the
/// reachable set the driver accumulates.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub expr: Expression,
    pub env: Environment,
    pub store: Store,
    pub promises: PromiseState,
    pub fulfill_reactions: ReactionTable,
    pub reject_reactions: ReactionTable,
    pub links: PromiseLinks,
    pub link_queue: LinkQueue,
    pub reaction_queue: ReactionQueue,
    pub kont_addr: Address,
    pub time: crate::alloc::Time,
}

/// `time` is deliberately excluded: it advances on every step with no
/// upper bound, even under a finite address domain, so comparing it
/// would make every configuration distinct and defeat the driver's
/// visited-set deduplication, which is what makes reachability under a
/// finite address domain actually terminate. Every other field is
/// exactly the machine state that abstraction is supposed to make
/// finite.
impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
            && self.env == other.env
            && self.store == other.store
            && self.promises == other.promises
            && self.fulfill_reactions == other.fulfill_reactions
            && self.reject_reactions == other.reject_reactions
            && self.links == other.links
            && self.link_queue == other.link_queue
            && self.reaction_queue == other.reaction_queue
            && self.kont_addr == other.kont_addr
    }
}
impl Eq for Configuration {}

/// Builds the initial configuration: address 0 holds `Empty`, every
/// table is empty, the current continuation pointer is 0, time is 1.
pub fn inject(e0: Expression) -> Configuration {
    let store = Store::new().strong_update(Address(0), Storable::StoredKont(Kontinuation::Empty));
    Configuration {
        expr: e0,
        env: empty_env(),
        store,
        promises: PromiseState::new(),
        fulfill_reactions: ReactionTable::new(),
        reject_reactions: ReactionTable::new(),
        links: PromiseLinks::new(),
        link_queue: LinkQueue::new(),
        reaction_queue: ReactionQueue::new(),
        kont_addr: Address(0),
        time: crate::alloc::Time(1),
    }
}

/// `step(state, k) -> set<Outcome>`. `k` is the
/// continuation resolved from the store at `cfg.kont_addr` — the
/// driver supplies one call per stored continuation at that address,
/// since under abstraction several may coexist.
pub fn step(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy) -> Vec<Outcome> {
    trace!("step: expr={:?} k={:?}", cfg.expr, k);

    // Draining a pending reaction takes priority when the current
    // expression is already a value: whatever it was computing is
    // done, so the machine is free to run one queued reaction.
    if cfg.expr.is_value() && !cfg.reaction_queue.is_empty() {
        return vec![reaction_drain(cfg, k, policy)];
    }
    // Draining a pending link takes priority whenever the current
    // expression is NOT a value and a link is pending: the
    // propagation is spliced in ahead of whatever redex is in focus,
    // without touching the continuation.
    if !cfg.expr.is_value() && !cfg.link_queue.is_empty() {
        return vec![link_drain(cfg, k, policy)];
    }

    match cfg.expr.clone() {
        Expression::Var(v) => var_rule(cfg, v),
        Expression::App(e1, e2) => binary_eval(cfg, k, policy, &e1, &e2, Kontinuation::KApp1),
        Expression::Ref(e) => unary_eval(cfg, k, policy, &e, Kontinuation::KRef),
        Expression::Deref(e) => unary_eval(cfg, k, policy, &e, Kontinuation::KDeref),
        Expression::Seq(e1, e2) => seq_eval(cfg, k, policy, &e1, &e2),
        Expression::Promisify(e) => unary_eval(cfg, k, policy, &e, Kontinuation::KPromisify),
        Expression::Resolve(e1, e2) => binary_eval(cfg, k, policy, &e1, &e2, Kontinuation::KResolve1),
        Expression::Reject(e1, e2) => binary_eval(cfg, k, policy, &e1, &e2, Kontinuation::KReject1),
        Expression::OnResolve(e1, e2) => binary_eval(cfg, k, policy, &e1, &e2, Kontinuation::KOnResolve1),
        Expression::OnReject(e1, e2) => binary_eval(cfg, k, policy, &e1, &e2, Kontinuation::KOnReject1),
        Expression::Link(e1, e2) => binary_eval(cfg, k, policy, &e1, &e2, Kontinuation::KLink1),
        // Value shapes: the redex, if any, lives in the continuation.
        Expression::Abs(..) | Expression::Cst(_) | Expression::Ptr(_) => value_rule(cfg, k, policy),
    }
}

fn advance(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy, expr: Expression, env: Environment, store: Store, kont_addr: Address) -> Outcome {
    let time = policy.tick(cfg, k);
    Outcome::Next(Configuration { expr, env, store, kont_addr, time, ..cfg.clone() })
}

fn var_rule(cfg: &Configuration, v: Variable) -> Vec<Outcome> {
    let addr = match cfg.env.get(&v) {
        None => return vec![Outcome::Abort(AbortReason::UnboundVariable(v))],
        Some(a) => *a,
    };
    let storables = cfg.store.lookup(addr);
    if storables.is_empty() {
        return vec![Outcome::Abort(AbortReason::TypeError(format!(
            "address {:?} bound to variable {:?} was never written",
            addr, v
        )))];
    }
    storables
        .iter()
        .map(|s| match s {
            Storable::StoredValue(val, env) => {
                let time = crate::alloc::Time(cfg.time.0 + 1);
                Outcome::Next(Configuration {
                    expr: val.clone(),
                    env: env.0.clone(),
                    kont_addr: cfg.kont_addr,
                    time,
                    ..cfg.clone()
                })
            }
            Storable::StoredKont(_) => Outcome::Abort(AbortReason::NonValueStorable(addr)),
        })
        .collect()
}

/// Phase 1 of every binary construct (`App`, `Resolve`, `Reject`,
/// `OnResolve`, `OnReject`, `Link`): push a continuation remembering
/// the second operand and the ambient environment, then evaluate the
/// first operand under that same environment. `build_k1` is the
/// matching `K*1` constructor for whichever construct is stepping.
fn binary_eval(
    cfg: &Configuration,
    k: &Kontinuation,
    policy: &dyn AllocPolicy,
    e1: &Rc<Expression>,
    e2: &Rc<Expression>,
    build_k1: fn(Rc<Expression>, Environment, Address) -> Kontinuation,
) -> Vec<Outcome> {
    let new_kont = build_k1(e2.clone(), cfg.env.clone(), cfg.kont_addr);
    let a = policy.alloc(cfg, k);
    let store = cfg.store.weak_update(a, Storable::StoredKont(new_kont));
    vec![advance(cfg, k, policy, (**e1).clone(), cfg.env.clone(), store, a)]
}

/// Phase 1 of every unary construct (`Ref`, `Deref`, `Promisify`):
/// push a continuation remembering only the parent, then evaluate the
/// operand under the same environment.
fn unary_eval(
    cfg: &Configuration,
    k: &Kontinuation,
    policy: &dyn AllocPolicy,
    e: &Rc<Expression>,
    build_k: fn(Address) -> Kontinuation,
) -> Vec<Outcome> {
    let new_kont = build_k(cfg.kont_addr);
    let a = policy.alloc(cfg, k);
    let store = cfg.store.weak_update(a, Storable::StoredKont(new_kont));
    vec![advance(cfg, k, policy, (**e).clone(), cfg.env.clone(), store, a)]
}

fn seq_eval(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy, e1: &Rc<Expression>, e2: &Rc<Expression>) -> Vec<Outcome> {
    let new_kont = Kontinuation::KSeq(e2.clone(), cfg.env.clone(), cfg.kont_addr);
    let a = policy.alloc(cfg, k);
    let store = cfg.store.weak_update(a, Storable::StoredKont(new_kont));
    vec![advance(cfg, k, policy, (**e1).clone(), cfg.env.clone(), store, a)]
}

/// Dispatch for when the current expression is already a value: the
/// redex, if any, is determined entirely by `k`.
fn value_rule(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy) -> Vec<Outcome> {
    match k {
        Kontinuation::Empty => vec![Outcome::Done(cfg.clone())],

        Kontinuation::KApp1(e2, env2, parent) => {
            let new_kont = Kontinuation::KApp2(Rc::new(cfg.expr.clone()), cfg.env.clone(), *parent);
            let a = policy.alloc(cfg, k);
            let store = cfg.store.weak_update(a, Storable::StoredKont(new_kont));
            vec![advance(cfg, k, policy, (**e2).clone(), env2.clone(), store, a)]
        }
        Kontinuation::KApp2(v1, env1, parent) => kapp2_reduce(cfg, k, policy, v1, env1, *parent),

        Kontinuation::KRef(parent) => {
            let a = policy.alloc(cfg, k);
            let store = cfg.store.weak_update(a, Storable::StoredValue(cfg.expr.clone(), EnvKey(cfg.env.clone())));
            vec![advance(cfg, k, policy, Expression::Ptr(a), cfg.env.clone(), store, *parent)]
        }
        Kontinuation::KDeref(parent) => kderef_reduce(cfg, k, policy, *parent),

        Kontinuation::KSeq(e2, env, parent) => {
            vec![advance(cfg, k, policy, (**e2).clone(), env.clone(), cfg.store.clone(), *parent)]
        }

        Kontinuation::KPromisify(parent) => match &cfg.expr {
            Expression::Ptr(a) => {
                let promises = cfg.promises.promisify(*a);
                let time = policy.tick(cfg, k);
                vec![Outcome::Next(Configuration {
                    expr: Expression::cst("Undef"),
                    kont_addr: *parent,
                    promises,
                    time,
                    ..cfg.clone()
                })]
            }
            other => vec![Outcome::Abort(AbortReason::TypeError(format!(
                "promisify expects a Ptr, got {:?}",
                other
            )))],
        },

        Kontinuation::KResolve1(e2, env2, parent) => push_k2(cfg, k, policy, e2, env2, *parent, Kontinuation::KResolve2),
        Kontinuation::KResolve2(v1, env1, parent) => settle_reduce(cfg, k, policy, v1, env1, *parent, true),

        Kontinuation::KReject1(e2, env2, parent) => push_k2(cfg, k, policy, e2, env2, *parent, Kontinuation::KReject2),
        Kontinuation::KReject2(v1, env1, parent) => settle_reduce(cfg, k, policy, v1, env1, *parent, false),

        Kontinuation::KOnResolve1(e2, env2, parent) => push_k2(cfg, k, policy, e2, env2, *parent, Kontinuation::KOnResolve2),
        Kontinuation::KOnResolve2(v1, env1, parent) => on_reaction_reduce(cfg, k, policy, v1, env1, *parent, true),

        Kontinuation::KOnReject1(e2, env2, parent) => push_k2(cfg, k, policy, e2, env2, *parent, Kontinuation::KOnReject2),
        Kontinuation::KOnReject2(v1, env1, parent) => on_reaction_reduce(cfg, k, policy, v1, env1, *parent, false),

        Kontinuation::KLink1(e2, env2, parent) => push_k2(cfg, k, policy, e2, env2, *parent, Kontinuation::KLink2),
        Kontinuation::KLink2(v1, _env1, parent) => link_reduce(cfg, k, policy, v1, *parent),
    }
}

/// Shared phase-2 push for the five binary constructs besides `App`
/// (which inlines the equivalent logic in `value_rule` since its
/// final action, β-reduction, is structurally different from the
/// rest). Captures `v1`'s own closing environment before moving on to
/// `e2` under the restored, originally-ambient `env2`.
fn push_k2(
    cfg: &Configuration,
    k: &Kontinuation,
    policy: &dyn AllocPolicy,
    e2: &Rc<Expression>,
    env2: &Environment,
    parent: Address,
    build_k2: fn(Rc<Expression>, Environment, Address) -> Kontinuation,
) -> Vec<Outcome> {
    let new_kont = build_k2(Rc::new(cfg.expr.clone()), cfg.env.clone(), parent);
    let a = policy.alloc(cfg, k);
    let store = cfg.store.weak_update(a, Storable::StoredKont(new_kont));
    vec![advance(cfg, k, policy, (**e2).clone(), env2.clone(), store, a)]
}

fn kapp2_reduce(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy, v1: &Rc<Expression>, env1: &Environment, parent: Address) -> Vec<Outcome> {
    let (x, body) = match &**v1 {
        Expression::Abs(x, body) => (*x, body.clone()),
        other => {
            return vec![Outcome::Abort(AbortReason::TypeError(format!(
                "application operator is not an abstraction: {:?}",
                other
            )))]
        }
    };
    let a = policy.alloc(cfg, k);
    let store = cfg
        .store
        .weak_update(a, Storable::StoredValue(cfg.expr.clone(), EnvKey(cfg.env.clone())));
    let new_env = env_with(env1, x, a);
    vec![advance(cfg, k, policy, (*body).clone(), new_env, store, parent)]
}

fn kderef_reduce(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy, parent: Address) -> Vec<Outcome> {
    let a = match &cfg.expr {
        Expression::Ptr(a) => *a,
        other => {
            return vec![Outcome::Abort(AbortReason::TypeError(format!(
                "deref expects a Ptr, got {:?}",
                other
            )))]
        }
    };
    let storables = cfg.store.lookup(a);
    if storables.is_empty() {
        return vec![Outcome::Abort(AbortReason::TypeError(format!(
            "address {:?} dereferenced before being written",
            a
        )))];
    }
    storables
        .iter()
        .map(|s| match s {
            Storable::StoredValue(val, env) => advance(cfg, k, policy, val.clone(), env.0.clone(), cfg.store.clone(), parent),
            Storable::StoredKont(_) => Outcome::Abort(AbortReason::NonValueStorable(a)),
        })
        .collect()
}

/// Final action shared by `Resolve`/`Reject`: settle the target
/// promise, draining its reaction/link tables into the two queues in
/// their original registration order.
fn settle_reduce(
    cfg: &Configuration,
    k: &Kontinuation,
    policy: &dyn AllocPolicy,
    v1: &Rc<Expression>,
    _env1: &Environment,
    parent: Address,
    fulfilling: bool,
) -> Vec<Outcome> {
    let a = match &**v1 {
        Expression::Ptr(a) => *a,
        other => {
            return vec![Outcome::Abort(AbortReason::TypeError(format!(
                "resolve/reject target is not a Ptr: {:?}",
                other
            )))]
        }
    };
    if !cfg.promises.is_promisified(a) {
        return vec![Outcome::Abort(AbortReason::PromiseMisuse(a))];
    }
    let settled = Settled { value: cfg.expr.clone(), env: EnvKey(cfg.env.clone()) };
    let pv = if fulfilling {
        PromiseValue::Fulfilled(settled)
    } else {
        PromiseValue::Rejected(settled)
    };
    let was_pending = matches!(cfg.promises.peek(a), Some(PromiseCell::Pending));
    let promises = cfg.promises.settle(a, pv.clone()).expect("address checked promisified above");

    let (fulfill_reactions, reject_reactions, links, link_queue, reaction_queue) = if was_pending {
        let (fulfill_list, fulfill_reactions) = cfg.fulfill_reactions.take(a);
        let (reject_list, reject_reactions) = cfg.reject_reactions.take(a);
        let (link_list, links) = cfg.links.take(a);

        let mut link_queue = cfg.link_queue.clone();
        for child in &link_list {
            link_queue = link_queue.push_back((pv.clone(), *child));
        }

        let reacting = if fulfilling { fulfill_list } else { reject_list };
        let mut reaction_queue = cfg.reaction_queue.clone();
        for r in &reacting {
            reaction_queue = reaction_queue.push_back((pv.clone(), r.handler.clone(), r.handler_env.clone(), r.child));
        }

        (fulfill_reactions, reject_reactions, links, link_queue, reaction_queue)
    } else {
        (
            cfg.fulfill_reactions.clone(),
            cfg.reject_reactions.clone(),
            cfg.links.clone(),
            cfg.link_queue.clone(),
            cfg.reaction_queue.clone(),
        )
    };

    let time = policy.tick(cfg, k);
    vec![Outcome::Next(Configuration {
        expr: Expression::cst("Undef"),
        kont_addr: parent,
        promises,
        fulfill_reactions,
        reject_reactions,
        links,
        link_queue,
        reaction_queue,
        time,
        ..cfg.clone()
    })]
}

/// Final action shared by `OnResolve`/`OnReject`.
fn on_reaction_reduce(
    cfg: &Configuration,
    k: &Kontinuation,
    policy: &dyn AllocPolicy,
    v1: &Rc<Expression>,
    _env1: &Environment,
    parent: Address,
    for_fulfill: bool,
) -> Vec<Outcome> {
    let a = match &**v1 {
        Expression::Ptr(a) => *a,
        other => {
            return vec![Outcome::Abort(AbortReason::TypeError(format!(
                "onResolve/onReject target is not a Ptr: {:?}",
                other
            )))]
        }
    };
    let cell = match cfg.promises.peek(a) {
        None => return vec![Outcome::Abort(AbortReason::PromiseMisuse(a))],
        Some(c) => c.clone(),
    };
    let handler_env = EnvKey(cfg.env.clone());
    let handler = Rc::new(cfg.expr.clone());

    match cell {
        PromiseCell::Pending => {
            let child = policy.alloc(cfg, k);
            let promises = cfg.promises.promisify(child);
            let reaction = Reaction { handler, handler_env, child };
            let (fulfill_reactions, reject_reactions) = if for_fulfill {
                (cfg.fulfill_reactions.push(a, reaction), cfg.reject_reactions.clone())
            } else {
                (cfg.fulfill_reactions.clone(), cfg.reject_reactions.push(a, reaction))
            };
            let time = policy.tick(cfg, k);
            vec![Outcome::Next(Configuration {
                expr: Expression::Ptr(child),
                kont_addr: parent,
                promises,
                fulfill_reactions,
                reject_reactions,
                time,
                ..cfg.clone()
            })]
        }
        PromiseCell::Settled(PromiseValue::Fulfilled(settled)) if for_fulfill => {
            let child = policy.alloc(cfg, k);
            let promises = cfg.promises.promisify(child);
            let reaction_queue = cfg.reaction_queue.push_back((PromiseValue::Fulfilled(settled), handler, handler_env, child));
            let time = policy.tick(cfg, k);
            vec![Outcome::Next(Configuration {
                expr: Expression::Ptr(child),
                kont_addr: parent,
                promises,
                reaction_queue,
                time,
                ..cfg.clone()
            })]
        }
        PromiseCell::Settled(PromiseValue::Rejected(settled)) if !for_fulfill => {
            let child = policy.alloc(cfg, k);
            let promises = cfg.promises.promisify(child);
            let reaction_queue = cfg.reaction_queue.push_back((PromiseValue::Rejected(settled), handler, handler_env, child));
            let time = policy.tick(cfg, k);
            vec![Outcome::Next(Configuration {
                expr: Expression::Ptr(child),
                kont_addr: parent,
                promises,
                reaction_queue,
                time,
                ..cfg.clone()
            })]
        }
        // Settled to the channel this handler does not observe: no-op.
        PromiseCell::Settled(_) => vec![advance(cfg, k, policy, Expression::cst("Undef"), cfg.env.clone(), cfg.store.clone(), parent)],
    }
}

fn link_reduce(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy, v1: &Rc<Expression>, parent: Address) -> Vec<Outcome> {
    let parent_promise = match &**v1 {
        Expression::Ptr(a) => *a,
        other => {
            return vec![Outcome::Abort(AbortReason::TypeError(format!(
                "link source is not a Ptr: {:?}",
                other
            )))]
        }
    };
    let child_promise = match &cfg.expr {
        Expression::Ptr(a) => *a,
        other => {
            return vec![Outcome::Abort(AbortReason::TypeError(format!(
                "link target is not a Ptr: {:?}",
                other
            )))]
        }
    };
    let links = cfg.links.push(parent_promise, child_promise);
    let time = policy.tick(cfg, k);
    vec![Outcome::Next(Configuration {
        expr: Expression::cst("Undef"),
        kont_addr: parent,
        links,
        time,
        ..cfg.clone()
    })]
}

/// Drains one `(settled value, handler, child)` triple from the
/// reaction queue and splices in `Resolve(Ptr(child), App(λ, v))` (or
/// `Reject`, depending on whether the settlement was a fulfillment or
/// a rejection — the reaction's own table of origin is irrelevant,
/// only the popped value's channel matters).
///
/// `v`'s closing environment is restored through a fresh store cell
/// plus a `Deref`, rather than threaded as the ambient environment of
/// the synthesized `App`: the operator (`λ`) and the operand (`v`)
/// each need their OWN closing scope, and a literal `App(e1, e2)`
/// only has room for one ambient environment shared by both operands.
/// Re-opening `v`'s scope through `Deref` is the same mechanism `Ref`
/// already gives heap cells — promises just reuse it.
fn reaction_drain(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy) -> Outcome {
    let ((pv, handler, handler_env, child), reaction_queue) =
        cfg.reaction_queue.pop_front().expect("checked non-empty by caller");
    let settled = match &pv {
        PromiseValue::Fulfilled(s) | PromiseValue::Rejected(s) => s.clone(),
    };

    let val_addr = policy.alloc(cfg, k);
    let store = cfg
        .store
        .weak_update(val_addr, Storable::StoredValue(settled.value.clone(), settled.env.clone()));

    let applied = Expression::app((*handler).clone(), Expression::deref(Expression::Ptr(val_addr)));
    let wrapped = match pv {
        PromiseValue::Fulfilled(_) => Expression::resolve(Expression::Ptr(child), applied),
        PromiseValue::Rejected(_) => Expression::reject(Expression::Ptr(child), applied),
    };

    let time = policy.tick(cfg, k);
    Outcome::Next(Configuration {
        expr: wrapped,
        env: handler_env.0,
        store,
        reaction_queue,
        time,
        ..cfg.clone()
    })
}

/// Drains one `(settled value, target)` pair from the link queue and
/// prefixes the current expression with `Resolve(Ptr(target), v); e0`
/// (or `Reject(...); e0`). `e0` keeps running under its own original
/// environment and continuation, completely undisturbed — only the
/// expression in focus changes. `v` is re-scoped through a fresh cell
/// and a `Deref`, same as in `reaction_drain`.
fn link_drain(cfg: &Configuration, k: &Kontinuation, policy: &dyn AllocPolicy) -> Outcome {
    let ((pv, target), link_queue) = cfg.link_queue.pop_front().expect("checked non-empty by caller");
    let settled = match &pv {
        PromiseValue::Fulfilled(s) | PromiseValue::Rejected(s) => s.clone(),
    };

    let val_addr = policy.alloc(cfg, k);
    let store = cfg
        .store
        .weak_update(val_addr, Storable::StoredValue(settled.value.clone(), settled.env.clone()));

    let propagate = match pv {
        PromiseValue::Fulfilled(_) => Expression::resolve(Expression::Ptr(target), Expression::deref(Expression::Ptr(val_addr))),
        PromiseValue::Rejected(_) => Expression::reject(Expression::Ptr(target), Expression::deref(Expression::Ptr(val_addr))),
    };
    let spliced = Expression::seq(propagate, cfg.expr.clone());

    let time = policy.tick(cfg, k);
    debug!("link-loop draining into {:?}", target);
    Outcome::Next(Configuration { expr: spliced, store, link_queue, time, ..cfg.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::ConcreteAlloc;
    use crate::driver::reachable;
    use crate::syntax::Variable;

    fn run(e: Expression) -> Vec<Outcome> {
        reachable(inject(e), &ConcreteAlloc, None)
    }

    #[test]
    fn identity_application_terminates_with_the_constant() {
        let prog = Expression::app(Expression::abs(Variable(0), Expression::Var(Variable(0))), Expression::cst("hi"));
        let outcomes = run(prog);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Outcome::Done(cfg) => assert_eq!(cfg.expr, Expression::cst("hi")),
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn k_combinator_discards_second_argument() {
        let k_comb = Expression::abs(
            Variable(0),
            Expression::abs(Variable(1), Expression::Var(Variable(0))),
        );
        let prog = Expression::app(Expression::app(k_comb, Expression::cst("a")), Expression::cst("b"));
        let outcomes = run(prog);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Outcome::Done(cfg) => assert_eq!(cfg.expr, Expression::cst("a")),
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn deref_of_ref_round_trips_and_leaves_one_store_address() {
        let prog = Expression::deref(Expression::reff(Expression::cst("x")));
        let outcomes = run(prog);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Outcome::Done(cfg) => {
                assert_eq!(cfg.expr, Expression::cst("x"));
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn sequencing_discards_the_first_value() {
        let prog = Expression::seq(Expression::cst("a"), Expression::cst("b"));
        let outcomes = run(prog);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Outcome::Done(cfg) => assert_eq!(cfg.expr, Expression::cst("b")),
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn resolve_on_pending_grows_both_queues_by_the_registered_counts() {
        let promise_addr = Address(10);
        let parent_addr = Address(0);
        let mut cfg = inject(Expression::cst("unused"));
        cfg.promises = cfg.promises.promisify(promise_addr);
        let r1 = Reaction { handler: Rc::new(Expression::cst("h1")), handler_env: EnvKey(empty_env()), child: Address(20) };
        let r2 = Reaction { handler: Rc::new(Expression::cst("h2")), handler_env: EnvKey(empty_env()), child: Address(21) };
        cfg.fulfill_reactions = cfg.fulfill_reactions.push(promise_addr, r1.clone()).push(promise_addr, r2.clone());
        cfg.links = cfg.links.push(promise_addr, Address(30)).push(promise_addr, Address(31));
        cfg.expr = Expression::cst("settled-value");

        let k = Kontinuation::KResolve2(Rc::new(Expression::Ptr(promise_addr)), empty_env(), parent_addr);
        let outcomes = step(&cfg, &k, &ConcreteAlloc);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Outcome::Next(next) => {
                // Two registered fulfill reactions, two registered links.
                assert_eq!(next.reaction_queue.len(), 2);
                assert_eq!(next.link_queue.len(), 2);
                // Order preserved: first-registered reaction's child comes first.
                let (head, _) = next.reaction_queue.pop_front().unwrap();
                assert_eq!(head.3, r1.child);
                let (head_link, _) = next.link_queue.pop_front().unwrap();
                assert_eq!(head_link.1, Address(30));
            }
            other => panic!("expected Next, got {:?}", other),
        }
    }
}
