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

//! Demonstration CLI: runs one of a handful of named seed programs
//! through the machine, concretely or under a k-bounded abstraction,
//! and prints the outcomes reached.
//!
//! There's no surface syntax for this language, so seed programs are
//! `Expression` trees built directly in Rust rather than parsed from
//! source text.

use clap::{App, Arg};

use cesk_promise::{reachable, AbortReason, ConcreteAlloc, Expression, KCFAAlloc, Outcome, Variable};

fn seed_identity() -> Expression {
    Expression::app(
        Expression::abs(Variable(0), Expression::Var(Variable(0))),
        Expression::cst("identity"),
    )
}

fn seed_k_combinator() -> Expression {
    let k_comb = Expression::abs(
        Variable(0),
        Expression::abs(Variable(1), Expression::Var(Variable(0))),
    );
    Expression::app(Expression::app(k_comb, Expression::cst("kept")), Expression::cst("dropped"))
}

fn seed_ref_cell() -> Expression {
    Expression::seq(
        Expression::app(
            Expression::abs(Variable(0), Expression::deref(Expression::Var(Variable(0)))),
            Expression::reff(Expression::cst("boxed")),
        ),
        Expression::cst("done"),
    )
}

/// v = ref("hello"); promisify(v); v.onResolve(λx. ref(x))
///
/// `promisify` yields `Cst("Undef")`, not the promise's `Ptr` (spec
/// §4.3), so the ref cell is bound to `Var(0)` directly and
/// `promisify` is run on the variable, its result discarded — the
/// `onResolve` afterwards still has the `Ptr` to work with.
fn seed_promise_chain() -> Expression {
    Expression::app(
        Expression::abs(
            Variable(0),
            Expression::seq(
                Expression::promisify(Expression::Var(Variable(0))),
                Expression::on_resolve(
                    Expression::Var(Variable(0)),
                    Expression::abs(Variable(1), Expression::reff(Expression::Var(Variable(1)))),
                ),
            ),
        ),
        Expression::reff(Expression::cst("hello")),
    )
}

/// Two promises, linked, then resolved: resolving the parent should
/// propagate through the link onto the child.
///
/// The trailing `Seq(Cst("a"), Cst("b"))` after `resolve` keeps the
/// machine on a non-value expression for one more step: the
/// link-queue drain (E-Link-Loop) only fires when the current
/// expression is not already a value, so if `resolve` were the last
/// action the machine would reach `Done` with the propagation still
/// queued, never having had a turn to run.
fn seed_linked_promises() -> Expression {
    let parent_ref = Expression::reff(Expression::cst("unset"));
    let child_ref = Expression::reff(Expression::cst("unset"));
    Expression::seq(
        Expression::app(
            Expression::abs(
                Variable(0),
                Expression::app(
                    Expression::abs(
                        Variable(1),
                        Expression::seq(
                            Expression::promisify(Expression::Var(Variable(0))),
                            Expression::seq(
                                Expression::promisify(Expression::Var(Variable(1))),
                                Expression::seq(
                                    Expression::link(Expression::Var(Variable(0)), Expression::Var(Variable(1))),
                                    Expression::seq(
                                        Expression::resolve(Expression::Var(Variable(0)), Expression::cst("settled")),
                                        Expression::seq(Expression::cst("a"), Expression::cst("b")),
                                    ),
                                ),
                            ),
                        ),
                    ),
                    child_ref,
                ),
            ),
            parent_ref,
        ),
        Expression::cst("linked"),
    )
}

fn seed(name: &str) -> Option<Expression> {
    match name {
        "identity" => Some(seed_identity()),
        "k-combinator" => Some(seed_k_combinator()),
        "ref-cell" => Some(seed_ref_cell()),
        "promise-chain" => Some(seed_promise_chain()),
        "linked-promises" => Some(seed_linked_promises()),
        _ => None,
    }
}

const SEED_NAMES: &[&str] = &["identity", "k-combinator", "ref-cell", "promise-chain", "linked-promises"];

fn main() {
    let matches = App::new("cesk-promise")
        .version("0.1.0")
        .about("Runs seed programs through the CESK* promise machine")
        .arg(
            Arg::with_name("program")
                .help("Name of the seed program to run")
                .possible_values(SEED_NAMES)
                .required(true),
        )
        .arg(
            Arg::with_name("abstract")
                .long("abstract")
                .takes_value(true)
                .value_name("K")
                .help("Run under k-CFA abstraction with the given k instead of the concrete machine"),
        )
        .arg(
            Arg::with_name("bound")
                .long("bound")
                .takes_value(true)
                .help("Cap on the number of configurations the driver will visit"),
        )
        .arg(Arg::with_name("verbose").short("v").multiple(true).help("Increase log verbosity"))
        .get_matches();

    stderrlog::new()
        .module(module_path!())
        .module("cesk_promise")
        .verbosity(matches.occurrences_of("verbose") as usize + 1)
        .init()
        .expect("failed to initialize logger");

    let name = matches.value_of("program").unwrap();
    let expr = seed(name).expect("clap validated possible_values already");

    let bound = matches
        .value_of("bound")
        .map(|s| s.parse::<usize>().expect("--bound must be a non-negative integer"));

    let outcomes = match matches.value_of("abstract") {
        None => reachable(cesk_promise::inject(expr), &ConcreteAlloc, bound),
        Some(k_str) => {
            let k = k_str.parse::<usize>().expect("--abstract expects a non-negative integer");
            reachable(cesk_promise::inject(expr), &KCFAAlloc::new(k), bound)
        }
    };

    println!("{} outcome(s) reached for '{}':", outcomes.len(), name);
    for outcome in &outcomes {
        match outcome {
            Outcome::Done(cfg) => println!("  done: {:?}", cfg.expr),
            Outcome::Next(_) => unreachable!("reachable() only returns terminal outcomes"),
            Outcome::Abort(reason) => print_abort(reason),
        }
    }
}

fn print_abort(reason: &AbortReason) {
    println!("  abort: {}", reason);
}
