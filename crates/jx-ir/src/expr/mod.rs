//! Expression algebra
//!
//! A closed set of operator nodes over the JSON type lattice. Expressions are
//! immutable values with structural equality; every rewrite returns a new
//! tree. Each node knows its result type and its free variables, and can
//! produce an expression that is true exactly when the node would yield a
//! missing value. SQL translation depends on `missing()` being exact.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::types::{concat_field, merge_types, JsonType};

pub mod build;
mod eval;
mod parse;
mod render;
mod simplify;

pub use eval::{is_missing_value, values_equal};
pub use parse::ParseOptions;

/// A reference to a document path, typed once bound to a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub path: String,
    pub json_type: JsonType,
}

impl Variable {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            json_type: JsonType::Object,
        }
    }

    pub fn typed(path: impl Into<String>, json_type: JsonType) -> Self {
        Self {
            path: path.into(),
            json_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InequalityOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl InequalityOp {
    pub fn name(self) -> &'static str {
        match self {
            InequalityOp::Gt => "gt",
            InequalityOp::Gte => "gte",
            InequalityOp::Lt => "lt",
            InequalityOp::Lte => "lte",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "gt" => InequalityOp::Gt,
            "gte" => InequalityOp::Gte,
            "lt" => InequalityOp::Lt,
            "lte" => InequalityOp::Lte,
            _ => return None,
        })
    }

    /// The operator that is true exactly when this one is false (for non-null operands).
    pub fn negate(self) -> Self {
        match self {
            InequalityOp::Gt => InequalityOp::Lte,
            InequalityOp::Gte => InequalityOp::Lt,
            InequalityOp::Lt => InequalityOp::Gte,
            InequalityOp::Lte => InequalityOp::Gt,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            InequalityOp::Gt => ">",
            InequalityOp::Gte => ">=",
            InequalityOp::Lt => "<",
            InequalityOp::Lte => "<=",
        }
    }
}

/// Binary arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Sub,
    Div,
    Mod,
    Exp,
    Floor,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Sub => "sub",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Exp => "exp",
            BinaryOp::Floor => "floor",
        }
    }
}

/// N-ary arithmetic with an identity element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultiOp {
    Add,
    Mul,
}

impl MultiOp {
    pub fn name(self) -> &'static str {
        match self {
            MultiOp::Add => "add",
            MultiOp::Mul => "mul",
        }
    }

    pub fn identity(self) -> f64 {
        match self {
            MultiOp::Add => 0.0,
            MultiOp::Mul => 1.0,
        }
    }
}

/// `left`, `right`, `not_left`, `not_right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideOp {
    Left,
    Right,
    NotLeft,
    NotRight,
}

impl SideOp {
    pub fn name(self) -> &'static str {
        match self {
            SideOp::Left => "left",
            SideOp::Right => "right",
            SideOp::NotLeft => "not_left",
            SideOp::NotRight => "not_right",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub cond: Expr,
    pub then: Expr,
    pub els: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub whens: Vec<(Expr, Expr)>,
    pub default: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    pub op: BinaryOp,
    pub lhs: Expr,
    pub rhs: Expr,
    pub default: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Multi {
    pub op: MultiOp,
    pub terms: Vec<Expr>,
    /// Missing terms act as the identity instead of poisoning the result.
    pub nulls: bool,
    pub default: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Concat {
    pub terms: Vec<Expr>,
    pub separator: String,
    pub default: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Find {
    pub value: Expr,
    pub find: Expr,
    pub start: Expr,
    pub default: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Between {
    pub value: Expr,
    pub prefix: Expr,
    pub suffix: Expr,
    pub start: Expr,
    pub default: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Leaves
    Null,
    True,
    False,
    /// A constant that is neither null nor boolean; see [`build::lit`].
    Literal(Value),
    /// Unix seconds.
    Date(f64),
    Variable(Variable),
    Offset(usize),
    /// Raw SQL, accepted only from trusted input.
    Script(String),

    // Logical
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    When(Box<When>),
    Case(Box<Case>),

    // Comparison
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Inequality(InequalityOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Value>),
    Range(Box<Expr>, Vec<(InequalityOp, Expr)>),

    // Existence and coercion
    Missing(Box<Expr>),
    Exists(Box<Expr>),
    Coalesce(Vec<Expr>),
    First(Box<Expr>),
    Last(Box<Expr>),
    /// `boolean`, `integer`, `number`, `string` conversions.
    Convert(JsonType, Box<Expr>),
    /// `is_boolean`, `is_integer`, `is_number`, `is_string`.
    IsType(JsonType, Box<Expr>),

    // Arithmetic
    Binary(Box<Binary>),
    Multi(Box<Multi>),
    Min(Vec<Expr>),
    Max(Vec<Expr>),
    Count(Vec<Expr>),

    // String
    Length(Box<Expr>),
    Concat(Box<Concat>),
    Side(SideOp, Box<Expr>, Box<Expr>),
    Find(Box<Find>),
    Split(Box<Expr>, Box<Expr>),
    Prefix(Box<Expr>, Box<Expr>),
    Suffix(Box<Expr>, Box<Expr>),
    RegExp(Box<Expr>, String),
    Between(Box<Between>),

    // Structural
    Tuple(Vec<Expr>),
    Leaves(String),
    Select(Vec<(String, Expr)>),
    Get(Box<Expr>, Box<Expr>),
    Rows(String, i64),

    // Primitives: operands are known not to be missing
    BasicEq(Box<Expr>, Box<Expr>),
    BasicInequality(InequalityOp, Box<Expr>, Box<Expr>),
    BasicIndexOf(Box<Expr>, Box<Expr>, Box<Expr>),
    BasicSubstring(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Least upper bound of a set of result types; `object` when incompatible.
pub(crate) fn union_type<I: IntoIterator<Item = JsonType>>(types: I) -> JsonType {
    let mut out = JsonType::Null;
    let mut seen = false;
    for t in types {
        if t == JsonType::Null {
            continue;
        }
        if !seen {
            out = t;
            seen = true;
            continue;
        }
        out = merge_types(out, t);
        if out == JsonType::Null {
            return JsonType::Object;
        }
    }
    out
}

impl Expr {
    /// `true` for nodes whose value is known without a row.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Expr::Null | Expr::True | Expr::False | Expr::Literal(_) | Expr::Date(_)
        )
    }

    /// The value of a constant node.
    pub fn constant_value(&self) -> Option<Value> {
        match self {
            Expr::Null => Some(Value::Null),
            Expr::True => Some(Value::Bool(true)),
            Expr::False => Some(Value::Bool(false)),
            Expr::Literal(v) => Some(v.clone()),
            Expr::Date(d) => Some(eval::number(*d)),
            _ => None,
        }
    }

    /// JSON type of the value this expression produces.
    pub fn data_type(&self) -> JsonType {
        use Expr::*;
        match self {
            Null => JsonType::Null,
            True | False => JsonType::Boolean,
            Literal(v) => crate::types::get_json_type(v),
            Date(_) => JsonType::Number,
            Variable(v) => v.json_type,
            Offset(_) | Script(_) => JsonType::Object,
            And(_) | Or(_) | Not(_) | Eq(..) | Ne(..) | Inequality(..) | In(..) | Range(..)
            | Missing(_) | Exists(_) | IsType(..) | Prefix(..) | Suffix(..) | RegExp(..)
            | BasicEq(..) | BasicInequality(..) => JsonType::Boolean,
            When(w) => union_type([w.then.data_type(), w.els.data_type()]),
            Case(c) => union_type(
                c.whens
                    .iter()
                    .map(|(_, v)| v.data_type())
                    .chain([c.default.data_type()]),
            ),
            Coalesce(terms) => union_type(terms.iter().map(Expr::data_type)),
            First(x) | Last(x) => x.data_type(),
            Convert(t, _) => *t,
            Binary(_) | Multi(_) => JsonType::Number,
            Min(terms) | Max(terms) => {
                if terms.iter().all(|t| t.data_type() == JsonType::Integer) {
                    JsonType::Integer
                } else {
                    JsonType::Number
                }
            }
            Count(_) | Length(_) | Find(_) | BasicIndexOf(..) => JsonType::Integer,
            Concat(_) | Side(..) | Split(..) | Between(_) | BasicSubstring(..) => JsonType::String,
            Tuple(_) | Leaves(_) | Select(_) | Get(..) => JsonType::Object,
            Rows(..) => JsonType::Object,
        }
    }

    /// The per-type variables of a field stored under several scalar types.
    ///
    /// Schema typing binds such a field to a `Coalesce` of one typed
    /// variable per stored type; each one reads only its own column.
    pub fn alternatives(&self) -> Option<&[Expr]> {
        let Expr::Coalesce(terms) = self else {
            return None;
        };
        let Some(Expr::Variable(first)) = terms.first() else {
            return None;
        };
        let polymorphic = terms.len() > 1
            && terms.iter().all(|t| {
                matches!(t, Expr::Variable(v) if v.path == first.path && v.json_type.is_scalar())
            });
        polymorphic.then_some(terms.as_slice())
    }

    /// `true` when the expression may yield more than one value.
    pub fn many(&self) -> bool {
        match self {
            Expr::Variable(v) => v.json_type == JsonType::Nested,
            Expr::Split(..) => true,
            Expr::Literal(Value::Array(_)) => true,
            Expr::When(w) => w.then.many() || w.els.many(),
            Expr::Case(c) => c.whens.iter().any(|(_, v)| v.many()) || c.default.many(),
            Expr::Coalesce(terms) => terms.iter().any(Expr::many),
            _ => false,
        }
    }

    /// Direct operands, in a fixed order.
    pub fn children(&self) -> Vec<&Expr> {
        use Expr::*;
        match self {
            Null | True | False | Literal(_) | Date(_) | Variable(_) | Offset(_) | Script(_)
            | Leaves(_) | Rows(..) => Vec::new(),
            And(terms) | Or(terms) | Coalesce(terms) | Min(terms) | Max(terms) | Count(terms)
            | Tuple(terms) => terms.iter().collect(),
            Not(x) | Missing(x) | Exists(x) | First(x) | Last(x) | Convert(_, x)
            | IsType(_, x) | Length(x) | In(x, _) | RegExp(x, _) => vec![&**x],
            When(w) => vec![&w.cond, &w.then, &w.els],
            Case(c) => {
                let mut out: Vec<&Expr> = Vec::new();
                for (cond, value) in &c.whens {
                    out.push(cond);
                    out.push(value);
                }
                out.push(&c.default);
                out
            }
            Eq(a, b) | Ne(a, b) | Inequality(_, a, b) | Side(_, a, b) | Split(a, b)
            | Prefix(a, b) | Suffix(a, b) | Get(a, b) | BasicEq(a, b)
            | BasicInequality(_, a, b) => vec![&**a, &**b],
            Range(x, bounds) => {
                let mut out: Vec<&Expr> = vec![&**x];
                out.extend(bounds.iter().map(|(_, b)| b));
                out
            }
            Binary(b) => vec![&b.lhs, &b.rhs, &b.default],
            Multi(m) => m.terms.iter().chain([&m.default]).collect(),
            Concat(c) => c.terms.iter().chain([&c.default]).collect(),
            Find(f) => vec![&f.value, &f.find, &f.start, &f.default],
            Between(b) => vec![&b.value, &b.prefix, &b.suffix, &b.start, &b.default],
            Select(fields) => fields.iter().map(|(_, v)| v).collect(),
            BasicIndexOf(a, b, c) | BasicSubstring(a, b, c) => vec![&**a, &**b, &**c],
        }
    }

    /// Rebuild this node with every operand replaced by `f(operand)`.
    pub fn map_children(&self, f: &mut dyn FnMut(&Expr) -> Expr) -> Expr {
        use Expr::*;
        let mut bx = |e: &Expr| Box::new(f(e));
        match self {
            Null | True | False | Literal(_) | Date(_) | Variable(_) | Offset(_) | Script(_)
            | Leaves(_) | Rows(..) => self.clone(),
            And(terms) => And(terms.iter().map(|t| *bx(t)).collect()),
            Or(terms) => Or(terms.iter().map(|t| *bx(t)).collect()),
            Coalesce(terms) => Coalesce(terms.iter().map(|t| *bx(t)).collect()),
            Min(terms) => Min(terms.iter().map(|t| *bx(t)).collect()),
            Max(terms) => Max(terms.iter().map(|t| *bx(t)).collect()),
            Count(terms) => Count(terms.iter().map(|t| *bx(t)).collect()),
            Tuple(terms) => Tuple(terms.iter().map(|t| *bx(t)).collect()),
            Not(x) => Not(bx(x)),
            Missing(x) => Missing(bx(x)),
            Exists(x) => Exists(bx(x)),
            First(x) => First(bx(x)),
            Last(x) => Last(bx(x)),
            Convert(t, x) => Convert(*t, bx(x)),
            IsType(t, x) => IsType(*t, bx(x)),
            Length(x) => Length(bx(x)),
            In(x, set) => In(bx(x), set.clone()),
            RegExp(x, pattern) => RegExp(bx(x), pattern.clone()),
            When(w) => When(Box::new(self::When {
                cond: *bx(&w.cond),
                then: *bx(&w.then),
                els: *bx(&w.els),
            })),
            Case(c) => Case(Box::new(self::Case {
                whens: c.whens.iter().map(|(w, v)| (*bx(w), *bx(v))).collect(),
                default: *bx(&c.default),
            })),
            Eq(a, b) => Eq(bx(a), bx(b)),
            Ne(a, b) => Ne(bx(a), bx(b)),
            Inequality(op, a, b) => Inequality(*op, bx(a), bx(b)),
            Side(op, a, b) => Side(*op, bx(a), bx(b)),
            Split(a, b) => Split(bx(a), bx(b)),
            Prefix(a, b) => Prefix(bx(a), bx(b)),
            Suffix(a, b) => Suffix(bx(a), bx(b)),
            Get(a, b) => Get(bx(a), bx(b)),
            BasicEq(a, b) => BasicEq(bx(a), bx(b)),
            BasicInequality(op, a, b) => BasicInequality(*op, bx(a), bx(b)),
            Range(x, bounds) => Range(
                bx(x),
                bounds.iter().map(|(op, b)| (*op, *bx(b))).collect(),
            ),
            Binary(b) => Binary(Box::new(self::Binary {
                op: b.op,
                lhs: *bx(&b.lhs),
                rhs: *bx(&b.rhs),
                default: *bx(&b.default),
            })),
            Multi(m) => Multi(Box::new(self::Multi {
                op: m.op,
                terms: m.terms.iter().map(|t| *bx(t)).collect(),
                nulls: m.nulls,
                default: *bx(&m.default),
            })),
            Concat(c) => Concat(Box::new(self::Concat {
                terms: c.terms.iter().map(|t| *bx(t)).collect(),
                separator: c.separator.clone(),
                default: *bx(&c.default),
            })),
            Find(x) => Find(Box::new(self::Find {
                value: *bx(&x.value),
                find: *bx(&x.find),
                start: *bx(&x.start),
                default: *bx(&x.default),
            })),
            Between(x) => Between(Box::new(self::Between {
                value: *bx(&x.value),
                prefix: *bx(&x.prefix),
                suffix: *bx(&x.suffix),
                start: *bx(&x.start),
                default: *bx(&x.default),
            })),
            Select(fields) => Select(fields.iter().map(|(n, v)| (n.clone(), *bx(v))).collect()),
            BasicIndexOf(a, b, c) => BasicIndexOf(bx(a), bx(b), bx(c)),
            BasicSubstring(a, b, c) => BasicSubstring(bx(a), bx(b), bx(c)),
        }
    }

    /// Transitive free variables.
    pub fn vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Variable(v) => {
                out.insert(v.path.clone());
            }
            Expr::Leaves(path) | Expr::Rows(path, _) => {
                out.insert(path.clone());
            }
            other => {
                for child in other.children() {
                    child.collect_vars(out);
                }
            }
        }
    }

    /// Rename variables according to `substitution`; unlisted paths are kept.
    pub fn map(&self, substitution: &HashMap<String, String>) -> Expr {
        match self {
            Expr::Variable(v) => match substitution.get(&v.path) {
                Some(path) => Expr::Variable(Variable::typed(path.clone(), v.json_type)),
                None => self.clone(),
            },
            Expr::Leaves(path) => Expr::Leaves(
                substitution.get(path).cloned().unwrap_or_else(|| path.clone()),
            ),
            Expr::Rows(path, offset) => Expr::Rows(
                substitution.get(path).cloned().unwrap_or_else(|| path.clone()),
                *offset,
            ),
            other => other.map_children(&mut |c| c.map(substitution)),
        }
    }

    /// An expression that is `true` exactly when this one is missing.
    pub fn missing(&self) -> Expr {
        use build::*;
        use Expr::*;
        match self {
            Null => True,
            True | False | Literal(_) | Date(_) => False,
            Variable(v) if v.path == "." => False,
            Variable(_) | Offset(_) | Script(_) | Get(..) | Rows(..) => missing(self.clone()),

            And(_) | Or(_) | Not(_) | Eq(..) | Ne(..) | Inequality(..) | In(..) | Range(..)
            | Missing(_) | Exists(_) | IsType(..) | Prefix(..) | Suffix(..) | RegExp(..)
            | BasicEq(..) | BasicInequality(..) | Count(_) | Tuple(_) | Leaves(_)
            | Select(_) => False,
            // An unbound conversion can still fail to parse; keep the check on the node.
            Convert(JsonType::Boolean, _) => False,
            Convert(_, x) | First(x) | Last(x) | Length(x) | Split(x, _) => x.missing(),

            When(w) => or(vec![
                and(vec![w.cond.clone(), w.then.missing()]),
                and(vec![not(w.cond.clone()), w.els.missing()]),
            ]),
            Case(c) => {
                let mut acc = c.default.missing();
                for (cond, value) in c.whens.iter().rev() {
                    acc = or(vec![
                        and(vec![cond.clone(), value.missing()]),
                        and(vec![not(cond.clone()), acc]),
                    ]);
                }
                acc
            }
            Coalesce(terms) => and(terms.iter().map(Expr::missing).collect()),
            Min(terms) | Max(terms) => and(terms.iter().map(Expr::missing).collect()),

            Binary(b) => {
                let mut raw = vec![b.lhs.missing(), b.rhs.missing()];
                if matches!(b.op, BinaryOp::Div | BinaryOp::Mod | BinaryOp::Floor) {
                    raw.push(eq(b.rhs.clone(), lit(0)));
                }
                and(vec![or(raw), b.default.missing()])
            }
            Multi(m) => {
                let terms = m.terms.iter().map(Expr::missing).collect();
                let raw = if m.nulls { and(terms) } else { or(terms) };
                and(vec![raw, m.default.missing()])
            }
            Concat(c) => and(vec![
                and(c.terms.iter().map(Expr::missing).collect()),
                c.default.missing(),
            ]),
            Side(_, v, n) => or(vec![v.missing(), n.missing()]),
            Find(f) => and(vec![
                or(vec![
                    f.value.missing(),
                    f.find.missing(),
                    BasicEq(
                        Box::new(BasicIndexOf(
                            Box::new(f.value.clone()),
                            Box::new(f.find.clone()),
                            Box::new(f.start.clone()),
                        )),
                        Box::new(lit(-1)),
                    ),
                ]),
                f.default.missing(),
            ]),
            // Between lowers to a When whose missing() is exact.
            Between(_) => self.partial_eval().missing(),
            BasicIndexOf(..) => False,
            BasicSubstring(v, _, _) => v.missing(),
        }
    }

    /// Shorthand for `Not(self.missing())`.
    pub fn exists(&self) -> Expr {
        build::not(self.missing())
    }

    /// Prefix every variable with `prefix`; used to re-root expressions.
    pub fn prefixed(&self, prefix: &str) -> Expr {
        match self {
            Expr::Variable(v) if v.path != "." => {
                Expr::Variable(Variable::typed(concat_field(prefix, &v.path), v.json_type))
            }
            Expr::Leaves(path) => Expr::Leaves(concat_field(prefix, path)),
            Expr::Rows(path, offset) => Expr::Rows(concat_field(prefix, path), *offset),
            other => other.map_children(&mut |c| c.prefixed(prefix)),
        }
    }
}
