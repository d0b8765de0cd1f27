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

use cesk_promise::store::Storable;
use cesk_promise::{inject, reachable, AbortReason, ConcreteAlloc, Expression, KCFAAlloc, Outcome, Variable};

fn run(e: Expression) -> Vec<Outcome> {
    reachable(inject(e), &ConcreteAlloc, None)
}

fn only_done_expr(outcomes: &[Outcome]) -> &Expression {
    assert_eq!(outcomes.len(), 1, "expected exactly one outcome, got {:?}", outcomes);
    match &outcomes[0] {
        Outcome::Done(cfg) => &cfg.expr,
        other => panic!("expected Done, got {:?}", other),
    }
}

/// `true` if a constant equal to `needle` is reachable anywhere in a
/// configuration's store — used to check that a value produced deep
/// inside a promise chain actually made it onto the heap, without
/// needing to name every intermediate address.
fn store_contains_cst(outcomes: &[Outcome], needle: &str) -> bool {
    outcomes.iter().any(|o| {
        let cfg = match o {
            Outcome::Done(cfg) | Outcome::Next(cfg) => cfg,
            Outcome::Abort(_) => return false,
        };
        (0..256).any(|i| {
            cfg.store
                .lookup(cesk_promise::Address(i))
                .iter()
                .any(|s| matches!(s, Storable::StoredValue(Expression::Cst(c), _) if &**c == needle))
        })
    })
}

#[test]
fn identity_applied_to_a_constant_returns_the_constant() {
    let prog = Expression::app(
        Expression::abs(Variable(0), Expression::Var(Variable(0))),
        Expression::cst("payload"),
    );
    assert_eq!(only_done_expr(&run(prog)), &Expression::cst("payload"));
}

#[test]
fn an_abstraction_run_alone_is_already_done() {
    let prog = Expression::abs(Variable(0), Expression::Var(Variable(0)));
    let outcomes = run(prog);
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        Outcome::Done(cfg) => assert!(matches!(cfg.expr, Expression::Abs(_, _))),
        other => panic!("expected Done, got {:?}", other),
    }
}

#[test]
fn k_combinator_ignores_its_second_argument() {
    let k_comb = Expression::abs(Variable(0), Expression::abs(Variable(1), Expression::Var(Variable(0))));
    let prog = Expression::app(Expression::app(k_comb, Expression::cst("first")), Expression::cst("second"));
    assert_eq!(only_done_expr(&run(prog)), &Expression::cst("first"));
}

#[test]
fn deref_of_ref_recovers_the_original_value() {
    let prog = Expression::deref(Expression::reff(Expression::cst("boxed")));
    assert_eq!(only_done_expr(&run(prog)), &Expression::cst("boxed"));
}

#[test]
fn seq_runs_both_sides_and_keeps_the_second_value() {
    let prog = Expression::seq(Expression::reff(Expression::cst("discarded")), Expression::cst("kept"));
    assert_eq!(only_done_expr(&run(prog)), &Expression::cst("kept"));
}

#[test]
fn promisify_then_resolve_settles_without_a_pending_reaction() {
    // v = ref("initial"); promisify(v); resolve(v, "settled") — no
    // onResolve registered, so the reaction queue never gets anything
    // to drain and the whole program just runs its course.
    //
    // `Promisify` yields `Cst("Undef")`, not the promise's own `Ptr`
    // (spec §4.3), so `Var(0)` must be bound to the bare `Ref`, with
    // `Promisify(Var(0))` run (and its result discarded) before the
    // later `Resolve(Var(0), ...)` — otherwise `Var(0)` would still
    // hold `Cst("Undef")` by the time `resolve` looks for a `Ptr`.
    let prog = Expression::app(
        Expression::abs(
            Variable(0),
            Expression::seq(
                Expression::promisify(Expression::Var(Variable(0))),
                Expression::resolve(Expression::Var(Variable(0)), Expression::cst("settled")),
            ),
        ),
        Expression::reff(Expression::cst("initial")),
    );
    let outcomes = run(prog);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Outcome::Done(_)));
}

#[test]
fn on_resolve_registered_before_settling_runs_once_the_promise_resolves() {
    // v = ref("x"); p = promisify(v);
    // onResolve(p, λv. ref(v));   -- registered while p is still Pending
    // resolve(p, "from-resolve")
    // The reaction drains once resolve settles p, applying the handler
    // to "from-resolve" and boxing it in a fresh ref cell.
    let prog = Expression::app(
        Expression::abs(
            Variable(0),
            Expression::seq(
                Expression::promisify(Expression::Var(Variable(0))),
                Expression::seq(
                    Expression::on_resolve(
                        Expression::Var(Variable(0)),
                        Expression::abs(Variable(1), Expression::reff(Expression::Var(Variable(1)))),
                    ),
                    Expression::resolve(Expression::Var(Variable(0)), Expression::cst("from-resolve")),
                ),
            ),
        ),
        Expression::reff(Expression::cst("x")),
    );
    let outcomes = run(prog);
    assert!(store_contains_cst(&outcomes, "from-resolve"));
}

#[test]
fn on_resolve_against_an_already_settled_promise_runs_immediately_via_the_reaction_queue() {
    // v = ref("x"); p = promisify(v); resolve(p, "already-done"); onResolve(p, λv. ref(v))
    let prog = Expression::app(
        Expression::abs(
            Variable(0),
            Expression::seq(
                Expression::promisify(Expression::Var(Variable(0))),
                Expression::seq(
                    Expression::resolve(Expression::Var(Variable(0)), Expression::cst("already-done")),
                    Expression::on_resolve(
                        Expression::Var(Variable(0)),
                        Expression::abs(Variable(1), Expression::reff(Expression::Var(Variable(1)))),
                    ),
                ),
            ),
        ),
        Expression::reff(Expression::cst("x")),
    );
    let outcomes = run(prog);
    assert!(store_contains_cst(&outcomes, "already-done"));
}

#[test]
fn promise_chain_settles_via_the_reaction_queue_drain() {
    // Spec seed scenario 5: bind the raw `Ref` to `Var(0)`, `Promisify`
    // it in place (discarding its `Cst("Undef")` result), register an
    // `onResolve` handler that boxes its argument in a fresh cell, then
    // resolve to "hello". The child promise `onResolve` returns should
    // end up holding a ref cell to "hello" once the reaction queue
    // drains.
    let prog = Expression::app(
        Expression::abs(
            Variable(0),
            Expression::seq(
                Expression::promisify(Expression::Var(Variable(0))),
                Expression::seq(
                    Expression::on_resolve(
                        Expression::Var(Variable(0)),
                        Expression::abs(Variable(42), Expression::reff(Expression::Var(Variable(42)))),
                    ),
                    Expression::resolve(Expression::Var(Variable(0)), Expression::cst("hello")),
                ),
            ),
        ),
        Expression::reff(Expression::cst("Promise1")),
    );
    let outcomes = run(prog);
    assert!(store_contains_cst(&outcomes, "hello"));
}

#[test]
fn linking_two_promises_propagates_the_parents_settlement_to_the_child() {
    // parent = ref(_); child = ref(_); promisify both in place;
    // link(parent, child); onResolve(child, λv. ref(v));
    // resolve(parent, "propagated").
    //
    // As above, `Var(0)`/`Var(1)` must be bound to the raw `Ref`s and
    // promisified separately — `link`/`resolve` both require a `Ptr`,
    // which `Promisify`'s own `Cst("Undef")` result is not.
    //
    // The link-queue drain only fires while the current expression is
    // NOT already a value (spec §4.3's E-Link-Loop): if `resolve` were
    // the program's very last action, the machine would reach `Done`
    // with the propagation still sitting in the link queue, since a
    // value in tail position under an `Empty` continuation halts
    // before the drain gets a turn. A trailing non-value expression
    // after the resolve keeps the machine live long enough for the
    // queued propagation to run.
    let prog = Expression::app(
        Expression::abs(
            Variable(0), // parent
            Expression::app(
                Expression::abs(
                    Variable(1), // child
                    Expression::seq(
                        Expression::promisify(Expression::Var(Variable(0))),
                        Expression::seq(
                            Expression::promisify(Expression::Var(Variable(1))),
                            Expression::seq(
                                Expression::link(Expression::Var(Variable(0)), Expression::Var(Variable(1))),
                                Expression::seq(
                                    Expression::on_resolve(
                                        Expression::Var(Variable(1)),
                                        Expression::abs(Variable(2), Expression::reff(Expression::Var(Variable(2)))),
                                    ),
                                    Expression::seq(
                                        Expression::resolve(Expression::Var(Variable(0)), Expression::cst("propagated")),
                                        Expression::seq(Expression::cst("a"), Expression::cst("b")),
                                    ),
                                ),
                            ),
                        ),
                    ),
                ),
                Expression::reff(Expression::cst("child-init")),
            ),
        ),
        Expression::reff(Expression::cst("parent-init")),
    );
    let outcomes = run(prog);
    assert!(store_contains_cst(&outcomes, "propagated"));
}

#[test]
fn resolving_twice_is_idempotent() {
    // A second resolve on an already-settled promise must be a no-op,
    // not a second round of reaction/link draining.
    let prog = Expression::app(
        Expression::abs(
            Variable(0),
            Expression::seq(
                Expression::promisify(Expression::Var(Variable(0))),
                Expression::seq(
                    Expression::resolve(Expression::Var(Variable(0)), Expression::cst("first")),
                    Expression::resolve(Expression::Var(Variable(0)), Expression::cst("second")),
                ),
            ),
        ),
        Expression::reff(Expression::cst("init")),
    );
    let outcomes = run(prog);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Outcome::Done(_)));
}

#[test]
fn resolve_on_an_unpromisified_address_aborts_with_promise_misuse() {
    let prog = Expression::app(
        Expression::abs(
            Variable(0),
            Expression::resolve(Expression::Var(Variable(0)), Expression::cst("nope")),
        ),
        Expression::reff(Expression::cst("never-promisified")),
    );
    let outcomes = run(prog);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Outcome::Abort(AbortReason::PromiseMisuse(_))));
}

#[test]
fn unbound_variable_aborts_rather_than_panicking() {
    let prog = Expression::Var(Variable(42));
    let outcomes = run(prog);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Outcome::Abort(AbortReason::UnboundVariable(_))));
}

#[test]
fn concrete_evaluation_of_the_same_program_is_deterministic() {
    let prog = Expression::seq(
        Expression::promisify(Expression::reff(Expression::cst("a"))),
        Expression::cst("b"),
    );
    assert_eq!(run(prog.clone()), run(prog));
}

#[test]
fn zero_cfa_finitely_reaches_a_diverging_program() {
    let omega_body = Expression::app(Expression::Var(Variable(0)), Expression::Var(Variable(0)));
    let omega = Expression::abs(Variable(0), omega_body);
    let prog = Expression::app(omega.clone(), omega);
    let outcomes = reachable(inject(prog), &KCFAAlloc::default(), Some(5_000));
    // Soundness, not liveness: the point is that the search terminates
    // within the bound at all, regardless of what it finds.
    let _ = outcomes;
}
