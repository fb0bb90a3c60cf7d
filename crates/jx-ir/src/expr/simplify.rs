//! Partial evaluation
//!
//! Rewrites an expression into the canonical shape the SQL emitter expects:
//! constants folded, boolean structure flattened with negations pushed to
//! the leaves, comparisons and string operators lowered onto the `Basic*`
//! primitives with explicit missing checks, and variables typed against the
//! schema in scope.
//!
//! A single pass works bottom-up. The public entry points repeat passes until
//! the tree stops changing, so `partial_eval` is idempotent by construction.
//! Every rewrite either shrinks the tree or moves an operator further down
//! the lowering order, so the loop reaches a fixed point.

use serde_json::Value;
use tracing::warn;

use super::build::*;
use super::{union_type, Case, Expr, MultiOp, SideOp, Variable, When};
use crate::schema::{Schema, Untyped};
use crate::types::{concat_field, JsonType};

/// Passes after which a still-changing tree is reported as a rewrite cycle.
const CYCLE_PASSES: usize = 1024;

/// Upper bound on terms produced by distributing `And` over `Or`.
const MAX_DISTRIBUTION: usize = 32;

impl Expr {
    /// Simplify without schema information.
    pub fn partial_eval(&self) -> Expr {
        self.partial_eval_with(&Untyped)
    }

    /// Simplify, binding variables to the types `schema` reports.
    pub fn partial_eval_with(&self, schema: &dyn Schema) -> Expr {
        let mut current = pe(self, schema);
        let mut passes = 1;
        loop {
            let next = pe(&current, schema);
            if next == current {
                return current;
            }
            current = next;
            passes += 1;
            if passes == CYCLE_PASSES {
                warn!(expr = ?self, "partial evaluation did not converge");
                return current;
            }
        }
    }
}

fn foldable(e: &Expr) -> bool {
    use Expr::*;
    !matches!(
        e,
        Null | True
            | False
            | Literal(_)
            | Date(_)
            | Variable(_)
            | Offset(_)
            | Script(_)
            | Leaves(_)
            | Rows(..)
            | Tuple(_)
            | Select(_)
    )
}

fn pe(e: &Expr, s: &dyn Schema) -> Expr {
    match e {
        Expr::Variable(v) => return type_variable(v, s),
        Expr::Rows(path, 0) => return type_variable(&Variable::new(path.clone()), s),
        _ => {}
    }
    let e = e.map_children(&mut |c| pe(c, s));
    if foldable(&e) && e.children().iter().all(|c| c.is_constant()) {
        return lit(e.evaluate(&Value::Null));
    }
    rewrite(e, s)
}

fn type_variable(v: &Variable, s: &dyn Schema) -> Expr {
    if v.path == "." {
        return Expr::Variable(v.clone());
    }
    match s.types_at(&v.path) {
        None => Expr::Variable(v.clone()),
        Some(types) if types.is_empty() => {
            if s.has_descendants(&v.path) {
                Expr::Variable(Variable::typed(v.path.clone(), JsonType::Object))
            } else {
                Expr::Null
            }
        }
        Some(types) => {
            if v.json_type.is_scalar() && types.contains(&v.json_type.storage()) {
                return Expr::Variable(v.clone());
            }
            let scalars: Vec<JsonType> = types.iter().copied().filter(|t| t.is_scalar()).collect();
            if scalars.len() > 1 && scalars.len() == types.len() {
                Expr::Coalesce(
                    scalars
                        .into_iter()
                        .map(|t| Expr::Variable(Variable::typed(v.path.clone(), t)))
                        .collect(),
                )
            } else {
                Expr::Variable(Variable::typed(v.path.clone(), union_type(types)))
            }
        }
    }
}

/// Per-type alternatives of a polymorphic field, or the expression itself.
fn branches(e: &Expr) -> Vec<Expr> {
    match e.alternatives() {
        Some(alts) => alts.to_vec(),
        None => vec![e.clone()],
    }
}

fn is_boolean(e: &Expr) -> bool {
    e.data_type() == JsonType::Boolean
}

/// Scalar types that can never compare equal.
fn incompatible(a: JsonType, b: JsonType) -> bool {
    a.is_scalar() && b.is_scalar() && a != b && !(a.is_numeric() && b.is_numeric())
}

fn push_unique(out: &mut Vec<Expr>, e: Expr) {
    if !out.contains(&e) {
        out.push(e);
    }
}

fn negated(e: &Expr) -> Expr {
    match e {
        Expr::Not(inner) => (**inner).clone(),
        other => not(other.clone()),
    }
}

fn rewrite(e: Expr, s: &dyn Schema) -> Expr {
    use Expr::*;
    match e {
        And(terms) => simplify_and(terms, s),
        Or(terms) => simplify_or(terms, s),
        Not(x) => simplify_not(*x, s),
        When(w) => simplify_when(*w, s),
        Case(c) => simplify_case(*c, s),

        Eq(a, b) => simplify_eq(*a, *b, s),
        Ne(a, b) => pe(&not(eq(*a, *b)), s),
        Inequality(op, a, b) => {
            if *a == Null || *b == Null {
                return False;
            }
            let mut terms = Vec::new();
            for x in branches(&a) {
                for y in branches(&b) {
                    if !incompatible(x.data_type(), y.data_type()) {
                        terms.push(and(vec![
                            x.exists(),
                            y.exists(),
                            BasicInequality(op, Box::new(x.clone()), Box::new(y)),
                        ]));
                    }
                }
            }
            pe(&or(terms), s)
        }
        In(x, set) => {
            if set.is_empty() {
                return False;
            }
            if set.iter().any(Value::is_null) {
                let rest: Vec<Value> = set.into_iter().filter(|v| !v.is_null()).collect();
                return pe(&or(vec![x.missing(), In(x, rest)]), s);
            }
            if set.len() == 1 {
                let only = set.into_iter().next().map(lit).unwrap_or(Null);
                return pe(&eq(*x, only), s);
            }
            if let Some(alts) = x.alternatives() {
                let terms = alts
                    .iter()
                    .map(|t| In(Box::new(t.clone()), set.clone()))
                    .collect();
                return pe(&or(terms), s);
            }
            In(x, set)
        }
        Range(x, bounds) => pe(
            &and(
                bounds
                    .into_iter()
                    .map(|(op, bound)| ineq(op, (*x).clone(), bound))
                    .collect(),
            ),
            s,
        ),

        Missing(x) => {
            let m = x.missing();
            if m == Missing(x.clone()) {
                Missing(x)
            } else {
                pe(&m, s)
            }
        }
        Exists(x) => pe(&not(missing(*x)), s),
        Coalesce(terms) => simplify_coalesce(terms, s),
        First(x) | Last(x) if !x.many() => *x,
        Convert(t, x) => simplify_convert(t, *x, s),
        IsType(t, x) => {
            if let Some(alts) = x.alternatives() {
                let terms = alts.iter().map(|a| IsType(t, Box::new(a.clone()))).collect();
                return pe(&or(terms), s);
            }
            let xt = x.data_type();
            if !xt.is_scalar() && xt != JsonType::Nested {
                return IsType(t, x);
            }
            let matches = xt == t || (t == JsonType::Number && xt == JsonType::Integer);
            if matches {
                pe(&x.exists(), s)
            } else if t == JsonType::Integer && xt == JsonType::Number {
                IsType(t, x)
            } else {
                False
            }
        }

        Binary(b) if b.default != Null => {
            let super::Binary { op, lhs, rhs, default } = *b;
            pe(&Coalesce(vec![binary(op, lhs, rhs), default]), s)
        }
        Multi(m) => {
            let mut m = *m;
            if m.default != Null {
                let default = std::mem::replace(&mut m.default, Null);
                return pe(&Coalesce(vec![Multi(Box::new(m)), default]), s);
            }
            let identity = m.op.identity();
            m.terms.retain(|t| {
                t.constant_value()
                    .and_then(|v| v.as_f64())
                    .map_or(true, |f| f != identity)
            });
            if m.terms.len() == 1 && m.terms[0].data_type().is_numeric() {
                return m.terms.remove(0);
            }
            if m.terms.is_empty() {
                return lit(super::eval::number(identity));
            }
            Multi(Box::new(m))
        }
        Min(terms) => simplify_extreme(terms, Min),
        Max(terms) => simplify_extreme(terms, Max),
        Count(terms) => Count(terms.into_iter().filter(|t| *t != Null).collect()),

        Concat(c) => {
            let mut c = *c;
            if c.default != Null {
                let default = std::mem::replace(&mut c.default, Null);
                return pe(&Coalesce(vec![Concat(Box::new(c)), default]), s);
            }
            c.terms.retain(|t| *t != Null);
            Concat(Box::new(c))
        }
        Side(op, v, n) => pe(&lower_side(op, *v, *n), s),
        Find(f) => {
            let index = basic_index_of(f.value.clone(), f.find.clone(), f.start.clone());
            pe(
                &when(
                    or(vec![
                        f.value.missing(),
                        f.find.missing(),
                        basic_eq(index.clone(), lit(-1)),
                    ]),
                    f.default,
                    index,
                ),
                s,
            )
        }
        Prefix(v, p) => {
            let head = basic_substring((*v).clone(), lit(0), length((*p).clone()));
            pe(
                &or(vec![
                    p.missing(),
                    and(vec![v.exists(), basic_eq(head, *p)]),
                ]),
                s,
            )
        }
        Suffix(v, p) => {
            let start = Max(vec![lit(0), sub(length((*v).clone()), length((*p).clone()))]);
            let tail = basic_substring((*v).clone(), start, length((*v).clone()));
            pe(
                &or(vec![
                    p.missing(),
                    and(vec![v.exists(), basic_eq(tail, *p)]),
                ]),
                s,
            )
        }
        Between(b) => pe(&lower_between(*b), s),

        Get(container, index) => match (*container, *index) {
            (Tuple(terms), Literal(Value::Number(n))) => n
                .as_u64()
                .and_then(|i| terms.into_iter().nth(i as usize))
                .unwrap_or(Null),
            (Variable(v), Literal(Value::String(key))) => {
                pe(&var(&concat_field(&v.path, &key)), s)
            }
            (container, index) => Get(Box::new(container), Box::new(index)),
        },

        other => other,
    }
}

fn simplify_and(terms: Vec<Expr>, s: &dyn Schema) -> Expr {
    let mut out = Vec::new();
    for term in terms {
        match term {
            Expr::True => {}
            Expr::False | Expr::Null => return Expr::False,
            Expr::And(inner) => {
                for t in inner {
                    push_unique(&mut out, t);
                }
            }
            other => push_unique(&mut out, other),
        }
    }
    if out.iter().any(|t| out.contains(&negated(t))) {
        return Expr::False;
    }
    match out.len() {
        0 => return Expr::True,
        1 => return out.remove(0),
        _ => {}
    }

    let ors: Vec<&Vec<Expr>> = out
        .iter()
        .filter_map(|t| match t {
            Expr::Or(alts) => Some(alts),
            _ => None,
        })
        .collect();
    let product: usize = ors.iter().map(|alts| alts.len()).product();
    if ors.is_empty() || product > MAX_DISTRIBUTION {
        return Expr::And(out);
    }

    let mut branches: Vec<Vec<Expr>> = vec![Vec::new()];
    for term in &out {
        match term {
            Expr::Or(alts) => {
                branches = branches
                    .iter()
                    .flat_map(|branch| {
                        alts.iter().map(move |alt| {
                            let mut next = branch.clone();
                            next.push(alt.clone());
                            next
                        })
                    })
                    .collect();
            }
            other => {
                for branch in &mut branches {
                    branch.push(other.clone());
                }
            }
        }
    }
    pe(&Expr::Or(branches.into_iter().map(Expr::And).collect()), s)
}

fn simplify_or(terms: Vec<Expr>, _s: &dyn Schema) -> Expr {
    let mut out = Vec::new();
    for term in terms {
        match term {
            Expr::False | Expr::Null => {}
            Expr::True => return Expr::True,
            Expr::Or(inner) => {
                for t in inner {
                    push_unique(&mut out, t);
                }
            }
            other => push_unique(&mut out, other),
        }
    }
    if out.iter().any(|t| out.contains(&negated(t))) {
        return Expr::True;
    }
    match out.len() {
        0 => Expr::False,
        1 => out.remove(0),
        _ => Expr::Or(out),
    }
}

fn simplify_not(x: Expr, s: &dyn Schema) -> Expr {
    use Expr::*;
    match x {
        True => False,
        False | Null => True,
        Not(inner) => *inner,
        And(terms) => pe(&Or(terms.into_iter().map(not).collect()), s),
        Or(terms) => pe(&And(terms.into_iter().map(not).collect()), s),
        BasicInequality(op, a, b) => BasicInequality(op.negate(), a, b),
        other => {
            let t = other.data_type();
            if (t.is_scalar() && t != JsonType::Boolean) || t == JsonType::Nested {
                pe(&other.missing(), s)
            } else {
                Not(Box::new(other))
            }
        }
    }
}

fn simplify_when(w: When, s: &dyn Schema) -> Expr {
    let When { cond, then, els } = w;
    match cond {
        Expr::True => return then,
        Expr::False | Expr::Null => return els,
        _ => {}
    }
    if then == els {
        return then;
    }
    if is_boolean(&then) && is_boolean(&els) {
        return pe(
            &or(vec![
                and(vec![cond.clone(), then]),
                and(vec![not(cond), els]),
            ]),
            s,
        );
    }
    Expr::When(Box::new(When { cond, then, els }))
}

fn simplify_case(c: Case, s: &dyn Schema) -> Expr {
    let mut whens = Vec::new();
    let mut default = c.default;
    for (cond, value) in c.whens {
        match cond {
            Expr::False | Expr::Null => continue,
            Expr::True => {
                default = value;
                break;
            }
            cond => whens.push((cond, value)),
        }
    }
    if whens.iter().all(|(_, v)| *v == default) {
        return default;
    }
    if whens.len() == 1 {
        let (cond, then) = whens.remove(0);
        return pe(&when(cond, then, default), s);
    }
    Expr::Case(Box::new(Case { whens, default }))
}

fn simplify_eq(a: Expr, b: Expr, s: &dyn Schema) -> Expr {
    if a == Expr::Null {
        return pe(&b.missing(), s);
    }
    if b == Expr::Null {
        return pe(&a.missing(), s);
    }
    if a == b {
        return Expr::True;
    }
    if a.alternatives().is_some() || b.alternatives().is_some() {
        // Both missing, or some pair of present same-typed columns is equal.
        let mut terms = vec![and(vec![a.missing(), b.missing()])];
        for x in branches(&a) {
            for y in branches(&b) {
                if !incompatible(x.data_type(), y.data_type()) {
                    terms.push(and(vec![x.exists(), y.exists(), basic_eq(x.clone(), y)]));
                }
            }
        }
        return pe(&or(terms), s);
    }
    if incompatible(a.data_type(), b.data_type()) {
        return pe(&and(vec![a.missing(), b.missing()]), s);
    }
    pe(
        &Expr::Case(Box::new(Case {
            whens: vec![(a.missing(), b.missing()), (b.missing(), Expr::False)],
            default: basic_eq(a, b),
        })),
        s,
    )
}

fn simplify_coalesce(terms: Vec<Expr>, _s: &dyn Schema) -> Expr {
    let mut out = Vec::new();
    let flat = terms.into_iter().flat_map(|t| match t {
        Expr::Coalesce(inner) => inner,
        other => vec![other],
    });
    for term in flat {
        if term == Expr::Null {
            continue;
        }
        let never_missing = term.missing() == Expr::False;
        push_unique(&mut out, term);
        if never_missing {
            break;
        }
    }
    match out.len() {
        0 => Expr::Null,
        1 => out.remove(0),
        _ => Expr::Coalesce(out),
    }
}

fn simplify_convert(t: JsonType, x: Expr, s: &dyn Schema) -> Expr {
    if t == JsonType::Boolean {
        return if is_boolean(&x) { x } else { pe(&x.exists(), s) };
    }
    match x {
        Expr::Convert(inner, _) if inner == t => x,
        Expr::Coalesce(terms) => pe(
            &Expr::Coalesce(
                terms
                    .into_iter()
                    .map(|term| Expr::Convert(t, Box::new(term)))
                    .collect(),
            ),
            s,
        ),
        x => {
            let xt = x.data_type();
            let same = xt == t || (t == JsonType::Number && xt == JsonType::Integer);
            if same {
                x
            } else {
                Expr::Convert(t, Box::new(x))
            }
        }
    }
}

fn simplify_extreme(terms: Vec<Expr>, rebuild: fn(Vec<Expr>) -> Expr) -> Expr {
    let mut out = Vec::new();
    for term in terms {
        if term != Expr::Null {
            push_unique(&mut out, term);
        }
    }
    if out.len() == 1 && out[0].data_type().is_numeric() {
        return out.remove(0);
    }
    rebuild(out)
}

/// `Left`/`Right`/`NotLeft`/`NotRight` as substrings clamped to the value's length.
fn lower_side(op: SideOp, v: Expr, n: Expr) -> Expr {
    let len = length(v.clone());
    let clamped = Expr::Max(vec![lit(0), Expr::Min(vec![n.clone(), len.clone()])]);
    let from_end = Expr::Max(vec![lit(0), sub(len.clone(), n.clone())]);
    let body = match op {
        SideOp::Left => basic_substring(v.clone(), lit(0), clamped),
        SideOp::Right => basic_substring(v.clone(), from_end, len),
        SideOp::NotLeft => basic_substring(v.clone(), clamped, len),
        SideOp::NotRight => basic_substring(v.clone(), lit(0), from_end),
    };
    when(or(vec![v.missing(), n.missing()]), Expr::Null, body)
}

fn lower_between(b: super::Between) -> Expr {
    let super::Between {
        value,
        prefix,
        suffix,
        start,
        default,
    } = b;
    let mut failures = vec![value.missing()];

    let begin = if prefix == Expr::Null {
        start
    } else {
        let found = basic_index_of(value.clone(), prefix.clone(), start);
        failures.push(basic_eq(found.clone(), lit(-1)));
        Expr::Multi(Box::new(super::Multi {
            op: MultiOp::Add,
            terms: vec![found, length(prefix)],
            nulls: false,
            default: Expr::Null,
        }))
    };
    let end = if suffix == Expr::Null {
        length(value.clone())
    } else {
        let found = basic_index_of(value.clone(), suffix, begin.clone());
        failures.push(basic_eq(found.clone(), lit(-1)));
        found
    };
    when(or(failures), default, basic_substring(value, begin, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Between, Find, InequalityOp};
    use serde_json::json;

    fn corpus() -> Vec<Expr> {
        vec![
            eq(var("a"), lit(1)),
            eq(var("a"), var("b")),
            ne(var("a"), lit("x")),
            gt(var("a"), lit(1)),
            and(vec![or(vec![eq(var("a"), lit(1)), eq(var("b"), lit(2))]), gt(var("c"), lit(0))]),
            not(and(vec![var("a"), missing(var("b"))])),
            Expr::In(Box::new(var("a")), vec![json!(1), json!(null), json!(3)]),
            Expr::Side(SideOp::Left, Box::new(var("s")), Box::new(lit(3))),
            Expr::Side(SideOp::NotRight, Box::new(var("s")), Box::new(var("n"))),
            Expr::Find(Box::new(Find {
                value: var("s"),
                find: lit("o"),
                start: lit(0),
                default: Expr::Null,
            })),
            Expr::Between(Box::new(Between {
                value: var("s"),
                prefix: lit("["),
                suffix: lit("]"),
                start: lit(0),
                default: Expr::Null,
            })),
            Expr::Prefix(Box::new(var("s")), Box::new(lit("he"))),
            Expr::Suffix(Box::new(var("s")), Box::new(lit("lo"))),
            Expr::Coalesce(vec![var("a"), Expr::Null, lit(0), var("b")]),
            Expr::Convert(
                JsonType::Number,
                Box::new(Expr::Coalesce(vec![var("a"), var("b")])),
            ),
            Expr::Range(
                Box::new(var("a")),
                vec![(InequalityOp::Gte, lit(1)), (InequalityOp::Lt, lit(5))],
            ),
            when(gt(var("a"), lit(0)), lit("pos"), lit("neg")),
            missing(add(vec![var("a"), var("b")])),
        ]
    }

    #[test]
    fn test_idempotence() {
        for e in corpus() {
            let once = e.partial_eval();
            assert_eq!(once.partial_eval(), once, "{e:?}");
        }
    }

    #[test]
    fn test_deep_trees_reach_a_fixed_point() {
        let mut e = add(vec![var("a"), lit(1)]);
        for i in 0..40 {
            e = if i % 2 == 0 { missing(e) } else { when(e, var("a"), lit(i)) };
        }
        let once = e.partial_eval();
        assert_eq!(once.partial_eval(), once);
    }

    #[test]
    fn test_missing_round_trip_is_boolean() {
        for e in corpus() {
            assert_eq!(
                e.missing().partial_eval().data_type(),
                JsonType::Boolean,
                "{e:?}"
            );
        }
    }

    #[test]
    fn test_null_decisive_equality() {
        assert_eq!(eq(Expr::Null, Expr::Null).partial_eval(), Expr::True);
        for x in [var("a"), lit(1), lit("x"), Expr::Null] {
            assert_eq!(eq(Expr::Null, x.clone()).partial_eval(), x.missing());
        }
    }

    #[test]
    fn test_boolean_tautologies() {
        assert_eq!(and(vec![]).partial_eval(), Expr::True);
        assert_eq!(or(vec![]).partial_eval(), Expr::False);
        for x in [missing(var("a")), eq(var("a"), lit(1)), var("flag")] {
            assert_eq!(not(not(x.clone())).partial_eval(), x.partial_eval());
        }
        assert_eq!(
            and(vec![missing(var("a")), not(missing(var("a")))]).partial_eval(),
            Expr::False
        );
    }

    #[test]
    fn test_eq_with_literal_lowers_to_guarded_basic_eq() {
        assert_eq!(
            eq(var("a"), lit(1)).partial_eval(),
            and(vec![not(missing(var("a"))), basic_eq(var("a"), lit(1))])
        );
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(add(vec![lit(1), lit(2)]).partial_eval(), lit(3));
        assert_eq!(eq(lit(1), lit(1.0)).partial_eval(), Expr::True);
        assert_eq!(gt(lit(1), Expr::Null).partial_eval(), Expr::False);
    }

    #[test]
    fn test_lowering_agrees_with_evaluation() {
        let rows = [
            json!({}),
            json!({"a": 1, "s": "hello"}),
            json!({"a": 2, "b": 2, "s": "a[bc]d", "n": 2}),
            json!({"a": 3, "s": "xyz", "n": 10}),
        ];
        for e in corpus() {
            let lowered = e.partial_eval();
            for row in &rows {
                assert_eq!(lowered.evaluate(row), e.evaluate(row), "{e:?} on {row}");
            }
        }
    }

    struct Typed;

    impl Schema for Typed {
        fn fact(&self) -> &str {
            "t"
        }
        fn types_at(&self, path: &str) -> Option<Vec<JsonType>> {
            Some(match path {
                "a" => vec![JsonType::Number],
                "b" => vec![JsonType::String],
                "p" => vec![JsonType::Number, JsonType::String],
                "c" => vec![JsonType::Nested, JsonType::Exists],
                _ => vec![],
            })
        }
        fn is_nested(&self, path: &str) -> bool {
            path == "c"
        }
        fn nested_path_of(&self, path: &str) -> String {
            if path.starts_with('c') { "c".into() } else { ".".into() }
        }
    }

    #[test]
    fn test_variable_typing() {
        assert_eq!(
            var("a").partial_eval_with(&Typed),
            Expr::Variable(Variable::typed("a", JsonType::Number))
        );
        assert_eq!(var("zz").partial_eval_with(&Typed), Expr::Null);
        assert_eq!(eq(var("zz"), lit(1)).partial_eval_with(&Typed), Expr::False);
        // A string column never equals a number.
        assert_eq!(eq(var("b"), lit(1)).partial_eval_with(&Typed), Expr::False);
        assert!(var("c").partial_eval_with(&Typed).many());
    }

    fn p(t: JsonType) -> Expr {
        Expr::Variable(Variable::typed("p", t))
    }

    #[test]
    fn test_polymorphic_field_keeps_each_type() {
        let bound = var("p").partial_eval_with(&Typed);
        assert_eq!(
            bound,
            Expr::Coalesce(vec![p(JsonType::Number), p(JsonType::String)])
        );
        assert_eq!(bound.alternatives().map(<[Expr]>::len), Some(2));
        assert_eq!(bound.partial_eval_with(&Typed), bound);

        let number = and(vec![not(missing(p(JsonType::Number))), basic_eq(p(JsonType::Number), lit(1))]);
        assert_eq!(eq(var("p"), lit(1)).partial_eval_with(&Typed), number);
        let string = and(vec![not(missing(p(JsonType::String))), basic_eq(p(JsonType::String), lit("1"))]);
        assert_eq!(eq(var("p"), lit("1")).partial_eval_with(&Typed), string);

        assert_eq!(
            gt(var("p"), lit(0)).partial_eval_with(&Typed),
            and(vec![
                not(missing(p(JsonType::Number))),
                Expr::BasicInequality(InequalityOp::Gt, Box::new(p(JsonType::Number)), Box::new(lit(0))),
            ])
        );
        // No stored type of `b` compares with a number.
        assert_eq!(gt(var("b"), lit(0)).partial_eval_with(&Typed), Expr::False);
    }

    #[test]
    fn test_polymorphic_equality_is_null_decisive() {
        let e = eq(var("p"), var("a")).partial_eval_with(&Typed);
        let rows = [
            json!({}),
            json!({"p": 1}),
            json!({"p": 1, "a": 1}),
            json!({"p": "1", "a": 1}),
        ];
        let expected = [true, false, true, false];
        for (row, want) in rows.iter().zip(expected) {
            assert_eq!(e.evaluate(row), Value::Bool(want), "{row}");
        }
    }
}
