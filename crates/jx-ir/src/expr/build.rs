//! Short constructors for building expression trees in code and tests

use serde_json::Value;

use super::{Binary, BinaryOp, Expr, InequalityOp, Multi, MultiOp, Variable, When};

/// A constant. `null`, `true` and `false` map to their dedicated leaves.
pub fn lit(value: impl Into<Value>) -> Expr {
    match value.into() {
        Value::Null => Expr::Null,
        Value::Bool(true) => Expr::True,
        Value::Bool(false) => Expr::False,
        other => Expr::Literal(other),
    }
}

pub fn var(path: &str) -> Expr {
    Expr::Variable(Variable::new(path))
}

pub fn and(terms: Vec<Expr>) -> Expr {
    Expr::And(terms)
}

pub fn or(terms: Vec<Expr>) -> Expr {
    Expr::Or(terms)
}

pub fn not(term: Expr) -> Expr {
    Expr::Not(Box::new(term))
}

pub fn eq(a: Expr, b: Expr) -> Expr {
    Expr::Eq(Box::new(a), Box::new(b))
}

pub fn ne(a: Expr, b: Expr) -> Expr {
    Expr::Ne(Box::new(a), Box::new(b))
}

pub fn ineq(op: InequalityOp, a: Expr, b: Expr) -> Expr {
    Expr::Inequality(op, Box::new(a), Box::new(b))
}

pub fn gt(a: Expr, b: Expr) -> Expr {
    ineq(InequalityOp::Gt, a, b)
}

pub fn lt(a: Expr, b: Expr) -> Expr {
    ineq(InequalityOp::Lt, a, b)
}

pub fn missing(term: Expr) -> Expr {
    Expr::Missing(Box::new(term))
}

pub fn exists(term: Expr) -> Expr {
    Expr::Exists(Box::new(term))
}

pub fn when(cond: Expr, then: Expr, els: Expr) -> Expr {
    Expr::When(Box::new(When { cond, then, els }))
}

pub fn basic_eq(a: Expr, b: Expr) -> Expr {
    Expr::BasicEq(Box::new(a), Box::new(b))
}

pub fn basic_index_of(value: Expr, find: Expr, start: Expr) -> Expr {
    Expr::BasicIndexOf(Box::new(value), Box::new(find), Box::new(start))
}

pub fn basic_substring(value: Expr, start: Expr, end: Expr) -> Expr {
    Expr::BasicSubstring(Box::new(value), Box::new(start), Box::new(end))
}

pub fn length(term: Expr) -> Expr {
    Expr::Length(Box::new(term))
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(Box::new(Binary {
        op,
        lhs,
        rhs,
        default: Expr::Null,
    }))
}

pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Sub, lhs, rhs)
}

pub fn add(terms: Vec<Expr>) -> Expr {
    Expr::Multi(Box::new(Multi {
        op: MultiOp::Add,
        terms,
        nulls: false,
        default: Expr::Null,
    }))
}

pub fn mul(terms: Vec<Expr>) -> Expr {
    Expr::Multi(Box::new(Multi {
        op: MultiOp::Mul,
        terms,
        nulls: false,
        default: Expr::Null,
    }))
}
