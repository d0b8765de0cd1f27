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

//! Syntax — the expression language, environments, and evaluation
//! contexts (continuations) the step relation dispatches on.
//!
//! These are closed tagged sums; there are no virtual methods. The
//! step relation in `machine` pattern-matches on the pair (current
//! expression, current continuation) to decide what to do next.

use std::collections::HashMap;
use std::rc::Rc;

/// Opaque binder identity. Only equality and hashing matter.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Variable(pub usize);

/// Opaque store-cell identity. Only equality and hashing matter.
///
/// Kept as a distinct type from `Variable` even though both are
/// conceptually bare integers: an environment maps `Variable` to
/// `Address`, and mixing the two up is exactly the kind of bug a
/// newtype is supposed to catch at compile time.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Address(pub usize);

/// An expression in the core language.
///
/// `Abs`, `Cst`, and `Ptr` are the three value shapes; everything
/// else is a redex or a sub-expression awaiting evaluation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Expression {
    Var(Variable),
    Abs(Variable, Rc<Expression>),
    App(Rc<Expression>, Rc<Expression>),
    /// String constant.
    Cst(Rc<str>),
    /// A heap address reified as a first-class expression.
    Ptr(Address),
    Ref(Rc<Expression>),
    Deref(Rc<Expression>),
    Seq(Rc<Expression>, Rc<Expression>),
    Promisify(Rc<Expression>),
    Resolve(Rc<Expression>, Rc<Expression>),
    Reject(Rc<Expression>, Rc<Expression>),
    OnResolve(Rc<Expression>, Rc<Expression>),
    OnReject(Rc<Expression>, Rc<Expression>),
    Link(Rc<Expression>, Rc<Expression>),
}

impl Expression {
    /// Value shapes are `Abs`, `Cst`, and `Ptr` — every other
    /// constructor is a redex that still has evaluating to do.
    pub fn is_value(&self) -> bool {
        matches!(self, Expression::Abs(_, _) | Expression::Cst(_) | Expression::Ptr(_))
    }

    pub fn abs(v: Variable, body: Expression) -> Expression {
        Expression::Abs(v, Rc::new(body))
    }

    pub fn app(e1: Expression, e2: Expression) -> Expression {
        Expression::App(Rc::new(e1), Rc::new(e2))
    }

    pub fn cst(s: &str) -> Expression {
        Expression::Cst(Rc::from(s))
    }

    pub fn reff(e: Expression) -> Expression {
        Expression::Ref(Rc::new(e))
    }

    pub fn deref(e: Expression) -> Expression {
        Expression::Deref(Rc::new(e))
    }

    pub fn seq(e1: Expression, e2: Expression) -> Expression {
        Expression::Seq(Rc::new(e1), Rc::new(e2))
    }

    pub fn promisify(e: Expression) -> Expression {
        Expression::Promisify(Rc::new(e))
    }

    pub fn resolve(e1: Expression, e2: Expression) -> Expression {
        Expression::Resolve(Rc::new(e1), Rc::new(e2))
    }

    pub fn reject(e1: Expression, e2: Expression) -> Expression {
        Expression::Reject(Rc::new(e1), Rc::new(e2))
    }

    pub fn on_resolve(e1: Expression, e2: Expression) -> Expression {
        Expression::OnResolve(Rc::new(e1), Rc::new(e2))
    }

    pub fn on_reject(e1: Expression, e2: Expression) -> Expression {
        Expression::OnReject(Rc::new(e1), Rc::new(e2))
    }

    pub fn link(e1: Expression, e2: Expression) -> Expression {
        Expression::Link(Rc::new(e1), Rc::new(e2))
    }
}

/// Variable to Address mapping. Insertion order is irrelevant — keys
/// are unique, so a plain hash map is enough. Order-preserving
/// collections only show up where reaction/link ordering is actually
/// observable, which an environment binding is not.
pub type Environment = Rc<HashMap<Variable, Address>>;

pub fn empty_env() -> Environment {
    Rc::new(HashMap::new())
}

pub fn env_with(env: &Environment, v: Variable, a: Address) -> Environment {
    let mut next = (**env).clone();
    next.insert(v, a);
    Rc::new(next)
}

/// An evaluation context, stored in the heap and addressed like any
/// other value — the `*` of CESK*. Each non-`Empty` variant carries
/// the closing environment for its pending sub-expression plus the
/// address of its parent continuation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Kontinuation {
    Empty,
    KApp1(Rc<Expression>, Environment, Address),
    KApp2(Rc<Expression>, Environment, Address),
    KRef(Address),
    KDeref(Address),
    KSeq(Rc<Expression>, Environment, Address),
    KPromisify(Address),
    KResolve1(Rc<Expression>, Environment, Address),
    KResolve2(Rc<Expression>, Environment, Address),
    KReject1(Rc<Expression>, Environment, Address),
    KReject2(Rc<Expression>, Environment, Address),
    KOnResolve1(Rc<Expression>, Environment, Address),
    KOnResolve2(Rc<Expression>, Environment, Address),
    KOnReject1(Rc<Expression>, Environment, Address),
    KOnReject2(Rc<Expression>, Environment, Address),
    KLink1(Rc<Expression>, Environment, Address),
    KLink2(Rc<Expression>, Environment, Address),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_insertion_is_functional() {
        let base = empty_env();
        let with_x = env_with(&base, Variable(0), Address(1));
        assert!(base.get(&Variable(0)).is_none());
        assert_eq!(with_x.get(&Variable(0)), Some(&Address(1)));
    }

    #[test]
    fn value_predicate_matches_spec_shapes() {
        assert!(Expression::abs(Variable(0), Expression::Var(Variable(0))).is_value());
        assert!(Expression::cst("x").is_value());
        assert!(Expression::Ptr(Address(0)).is_value());
        assert!(!Expression::Var(Variable(0)).is_value());
        assert!(!Expression::seq(Expression::cst("a"), Expression::cst("b")).is_value());
    }
}
