//! JX expression parsing
//!
//! Operators are objects with one operator key: `{"op": args}`. `args` is an
//! operand array, a single operand, or the simple form `{"path": literal}`
//! where the key names a variable and the value is a constant. Option keys
//! (`default`, `separator`, `nulls`, `start`, `then`, `else`) sit beside the
//! operator key.

use serde_json::{Map, Value};

use super::build::*;
use super::{
    Between, Binary, BinaryOp, Case, Concat, Expr, Find, InequalityOp, Multi, MultiOp, SideOp,
};
use crate::date::parse_date;
use crate::types::JsonType;
use crate::{JxError, Result};

const OPTION_KEYS: &[&str] = &["default", "separator", "nulls", "start", "then", "else"];

const OPERATORS: &[&str] = &[
    "literal", "date", "script", "offset", "and", "or", "not", "when", "case", "eq", "ne", "gt",
    "gte", "lt", "lte", "in", "nin", "range", "missing", "exists", "coalesce", "first", "last",
    "boolean", "integer", "number", "string", "is_boolean", "is_integer", "is_number",
    "is_string", "add", "mul", "sub", "div", "mod", "exp", "floor", "min", "max", "count",
    "length", "concat", "left", "right", "not_left", "not_right", "find", "split", "prefix",
    "suffix", "regexp", "between", "tuple", "leaves", "select", "get", "rows", "basic.eq",
    "basic.gt", "basic.gte", "basic.lt", "basic.lte", "basic.index_of", "basic.substring",
];

/// Switches for input that is not fully trusted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Accept `{"script": "<sql>"}`.
    pub allow_script: bool,
}

impl Expr {
    /// Parse an untrusted JX expression.
    pub fn from_json(value: &Value) -> Result<Expr> {
        Self::parse_with(value, &ParseOptions::default())
    }

    pub fn parse_with(value: &Value, options: &ParseOptions) -> Result<Expr> {
        Parser { options }.expr(value)
    }
}

struct Parser<'a> {
    options: &'a ParseOptions,
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    let mut keys = map.keys().filter(|k| !OPTION_KEYS.contains(&k.as_str()));
    match (keys.next(), keys.next()) {
        (Some(k), None) => OPERATORS.contains(&k.as_str()),
        _ => false,
    }
}

impl Parser<'_> {
    fn expr(&self, value: &Value) -> Result<Expr> {
        match value {
            Value::String(path) => Ok(var(path)),
            Value::Array(items) => Ok(Expr::Tuple(
                items.iter().map(|v| self.expr(v)).collect::<Result<_>>()?,
            )),
            Value::Object(map) => self.object(map),
            other => Ok(lit(other.clone())),
        }
    }

    fn object(&self, map: &Map<String, Value>) -> Result<Expr> {
        let mut ops = map
            .iter()
            .filter(|(k, _)| !OPTION_KEYS.contains(&k.as_str()));
        let (op, args) = match (ops.next(), ops.next()) {
            (Some(first), None) => first,
            (None, _) => return Err(JxError::parse("Expression object has no operator")),
            (Some((a, _)), Some((b, _))) => {
                return Err(JxError::parse(format!(
                    "Expression object has more than one operator: {a}, {b}"
                )))
            }
        };
        self.operator(op, args, map)
    }

    /// The right-hand side of a simple-form pair: constants stay constants.
    fn constant_operand(&self, value: &Value) -> Result<Expr> {
        match value {
            Value::Object(_) => self.expr(value),
            other => Ok(lit(other.clone())),
        }
    }

    /// `{"path": value, ...}` pairs, or `None` when `args` is not in simple form.
    fn simple_pairs<'v>(&self, args: &'v Value) -> Option<Vec<(&'v String, &'v Value)>> {
        match args {
            Value::Object(map) if !is_operator_object(map) && !map.is_empty() => {
                Some(map.iter().collect())
            }
            _ => None,
        }
    }

    fn operands(&self, op: &str, args: &Value) -> Result<Vec<Expr>> {
        match args {
            Value::Array(items) => items.iter().map(|v| self.expr(v)).collect(),
            Value::Object(map) if !is_operator_object(map) => Err(JxError::parse(format!(
                "Operator {op} expects operands, not the simple form"
            ))),
            other => Ok(vec![self.expr(other)?]),
        }
    }

    fn unary(&self, op: &str, args: &Value) -> Result<Expr> {
        let mut terms = self.operands(op, args)?;
        if terms.len() != 1 {
            return Err(JxError::arity(op, "1", terms.len()));
        }
        Ok(terms.remove(0))
    }

    /// Two operands, either as an array or as a single simple-form pair.
    fn pair(&self, op: &str, args: &Value) -> Result<(Expr, Expr)> {
        if let Some(pairs) = self.simple_pairs(args) {
            if pairs.len() != 1 {
                return Err(JxError::arity(op, "2", pairs.len() * 2));
            }
            let (path, value) = pairs[0];
            return Ok((var(path), self.constant_operand(value)?));
        }
        let mut terms = self.operands(op, args)?;
        if terms.len() != 2 {
            return Err(JxError::arity(op, "2", terms.len()));
        }
        let rhs = terms.remove(1);
        Ok((terms.remove(0), rhs))
    }

    fn triple(&self, op: &str, args: &Value) -> Result<(Expr, Expr, Expr)> {
        let terms = self.operands(op, args)?;
        match <[Expr; 3]>::try_from(terms) {
            Ok([a, b, c]) => Ok((a, b, c)),
            Err(terms) => Err(JxError::arity(op, "3", terms.len())),
        }
    }

    fn option(&self, options: &Map<String, Value>, key: &str) -> Result<Option<Expr>> {
        options.get(key).map(|v| self.expr(v)).transpose()
    }

    fn default_option(&self, options: &Map<String, Value>) -> Result<Expr> {
        Ok(self.option(options, "default")?.unwrap_or(Expr::Null))
    }

    fn start_option(&self, options: &Map<String, Value>) -> Result<Expr> {
        Ok(self.option(options, "start")?.unwrap_or_else(|| lit(0)))
    }

    /// `eq`/`ne` and the inequalities: simple form with several keys means AND.
    fn comparison(
        &self,
        op: &str,
        args: &Value,
        build: &dyn Fn(Expr, Expr) -> Expr,
    ) -> Result<Expr> {
        if let Some(pairs) = self.simple_pairs(args) {
            let mut terms = Vec::with_capacity(pairs.len());
            for (path, value) in pairs {
                let term = match (op, value) {
                    ("eq", Value::Array(set)) => Expr::In(Box::new(var(path)), set.clone()),
                    ("ne", Value::Array(set)) => not(Expr::In(Box::new(var(path)), set.clone())),
                    _ => build(var(path), self.constant_operand(value)?),
                };
                terms.push(term);
            }
            return Ok(if terms.len() == 1 {
                terms.remove(0)
            } else {
                and(terms)
            });
        }
        let (a, b) = self.pair(op, args)?;
        Ok(build(a, b))
    }

    fn set_membership(&self, op: &str, args: &Value) -> Result<Expr> {
        let (value, set) = self.pair(op, args)?;
        let set = match set.constant_value() {
            Some(Value::Array(items)) => items,
            Some(single) => vec![single],
            None => return Err(JxError::parse(format!("Operator {op} expects a literal set"))),
        };
        Ok(Expr::In(Box::new(value), set))
    }

    fn range(&self, args: &Value) -> Result<Expr> {
        let pairs = self
            .simple_pairs(args)
            .ok_or_else(|| JxError::parse("range expects {path: {op: bound, ...}}"))?;
        let mut terms = Vec::new();
        for (path, bounds) in pairs {
            let Value::Object(bounds) = bounds else {
                return Err(JxError::parse(format!("range bounds for {path} must be an object")));
            };
            let mut list = Vec::with_capacity(bounds.len());
            for (name, bound) in bounds {
                let op = InequalityOp::from_name(name)
                    .ok_or_else(|| JxError::UnknownOperator(name.clone()))?;
                list.push((op, self.constant_operand(bound)?));
            }
            terms.push(Expr::Range(Box::new(var(path)), list));
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            and(terms)
        })
    }

    fn case(&self, args: &Value) -> Result<Expr> {
        let Value::Array(items) = args else {
            return Err(JxError::parse("case expects an array of when clauses"));
        };
        let mut whens = Vec::new();
        let mut default = Expr::Null;
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::Object(map) if map.contains_key("when") => {
                    let cond = self.expr(&map["when"])?;
                    let then = self.option(map, "then")?.unwrap_or(Expr::Null);
                    whens.push((cond, then));
                }
                other if i + 1 == items.len() => default = self.expr(other)?,
                _ => return Err(JxError::parse("Only the last case clause may be a default")),
            }
        }
        Ok(Expr::Case(Box::new(Case { whens, default })))
    }

    fn between(&self, args: &Value, options: &Map<String, Value>) -> Result<Expr> {
        let (value, prefix, suffix) = match self.simple_pairs(args) {
            Some(pairs) => {
                let [(path, Value::Array(bounds))] = pairs.as_slice() else {
                    return Err(JxError::parse("between expects {path: [prefix, suffix]}"));
                };
                if bounds.len() != 2 {
                    return Err(JxError::arity("between", "3", bounds.len() + 1));
                }
                (var(path), lit(bounds[0].clone()), lit(bounds[1].clone()))
            }
            None => self.triple("between", args)?,
        };
        Ok(Expr::Between(Box::new(Between {
            value,
            prefix,
            suffix,
            start: self.start_option(options)?,
            default: self.default_option(options)?,
        })))
    }

    fn select(&self, args: &Value) -> Result<Expr> {
        let items = match args {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        let mut fields = Vec::with_capacity(items.len());
        for item in &items {
            match item {
                Value::String(path) => fields.push((path.clone(), var(path))),
                Value::Object(map) => {
                    let name = map
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| JxError::parse("select field requires a name"))?;
                    let value = map
                        .get("value")
                        .map(|v| self.expr(v))
                        .transpose()?
                        .unwrap_or_else(|| var(name));
                    fields.push((name.to_string(), value));
                }
                other => return Err(JxError::parse(format!("Bad select field {other}"))),
            }
        }
        Ok(Expr::Select(fields))
    }

    fn operator(&self, op: &str, args: &Value, options: &Map<String, Value>) -> Result<Expr> {
        use Expr as E;
        let boxed = |e: Expr| Box::new(e);
        let expr = match op {
            "literal" => lit(args.clone()),
            "date" => E::Date(parse_date(args)?),
            "script" => match args {
                _ if !self.options.allow_script => {
                    return Err(JxError::parse("script is not allowed in this context"))
                }
                Value::String(sql) => E::Script(sql.clone()),
                _ => return Err(JxError::parse("script expects a string")),
            },
            "offset" => match args.as_u64() {
                Some(i) => E::Offset(i as usize),
                None => return Err(JxError::parse("offset expects a non-negative integer")),
            },

            "and" => and(self.operands(op, args)?),
            "or" => or(self.operands(op, args)?),
            "not" => not(self.unary(op, args)?),
            "when" => when(
                self.expr(args)?,
                self.option(options, "then")?.unwrap_or(E::Null),
                self.option(options, "else")?.unwrap_or(E::Null),
            ),
            "case" => self.case(args)?,

            "eq" => self.comparison(op, args, &eq)?,
            "ne" => self.comparison(op, args, &ne)?,
            "gt" | "gte" | "lt" | "lte" => {
                let ineq_op = InequalityOp::from_name(op)
                    .ok_or_else(|| JxError::UnknownOperator(op.to_string()))?;
                self.comparison(op, args, &|a: Expr, b: Expr| ineq(ineq_op, a, b))?
            }
            "in" => self.set_membership(op, args)?,
            "nin" => not(self.set_membership(op, args)?),
            "range" => self.range(args)?,

            "missing" => missing(self.unary(op, args)?),
            "exists" => exists(self.unary(op, args)?),
            "coalesce" => E::Coalesce(self.operands(op, args)?),
            "first" => E::First(boxed(self.unary(op, args)?)),
            "last" => E::Last(boxed(self.unary(op, args)?)),
            "boolean" | "integer" | "number" | "string" => {
                let t = JsonType::from_name(op)
                    .ok_or_else(|| JxError::UnknownOperator(op.to_string()))?;
                E::Convert(t, boxed(self.unary(op, args)?))
            }
            "is_boolean" | "is_integer" | "is_number" | "is_string" => {
                let t = JsonType::from_name(&op[3..])
                    .ok_or_else(|| JxError::UnknownOperator(op.to_string()))?;
                E::IsType(t, boxed(self.unary(op, args)?))
            }

            "add" | "mul" => E::Multi(Box::new(Multi {
                op: if op == "add" { MultiOp::Add } else { MultiOp::Mul },
                terms: self.operands(op, args)?,
                nulls: options.get("nulls").and_then(Value::as_bool).unwrap_or(false),
                default: self.default_option(options)?,
            })),
            "sub" | "div" | "mod" | "exp" | "floor" => {
                let (lhs, rhs) = self.pair(op, args)?;
                let bin_op = match op {
                    "sub" => BinaryOp::Sub,
                    "div" => BinaryOp::Div,
                    "mod" => BinaryOp::Mod,
                    "exp" => BinaryOp::Exp,
                    _ => BinaryOp::Floor,
                };
                E::Binary(Box::new(Binary {
                    op: bin_op,
                    lhs,
                    rhs,
                    default: self.default_option(options)?,
                }))
            }
            "min" => E::Min(self.operands(op, args)?),
            "max" => E::Max(self.operands(op, args)?),
            "count" => E::Count(self.operands(op, args)?),

            "length" => length(self.unary(op, args)?),
            "concat" => E::Concat(Box::new(Concat {
                terms: self.operands(op, args)?,
                separator: options
                    .get("separator")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                default: self.default_option(options)?,
            })),
            "left" | "right" | "not_left" | "not_right" => {
                let side = match op {
                    "left" => SideOp::Left,
                    "right" => SideOp::Right,
                    "not_left" => SideOp::NotLeft,
                    _ => SideOp::NotRight,
                };
                let (v, n) = self.pair(op, args)?;
                E::Side(side, boxed(v), boxed(n))
            }
            "find" => {
                let (value, find) = self.pair(op, args)?;
                E::Find(Box::new(Find {
                    value,
                    find,
                    start: self.start_option(options)?,
                    default: self.default_option(options)?,
                }))
            }
            "split" => {
                let (v, sep) = self.pair(op, args)?;
                E::Split(boxed(v), boxed(sep))
            }
            "prefix" => {
                let (v, p) = self.pair(op, args)?;
                E::Prefix(boxed(v), boxed(p))
            }
            "suffix" => {
                let (v, p) = self.pair(op, args)?;
                E::Suffix(boxed(v), boxed(p))
            }
            "regexp" => {
                let (v, pattern) = self.pair(op, args)?;
                match pattern.constant_value() {
                    Some(Value::String(p)) => E::RegExp(boxed(v), p),
                    _ => return Err(JxError::parse("regexp expects a literal pattern")),
                }
            }
            "between" => self.between(args, options)?,

            "tuple" => E::Tuple(self.operands(op, args)?),
            "leaves" => match args {
                Value::String(path) => E::Leaves(path.clone()),
                _ => return Err(JxError::parse("leaves expects a path")),
            },
            "select" => self.select(args)?,
            "get" => {
                let (container, index) = self.pair(op, args)?;
                E::Get(boxed(container), boxed(index))
            }
            "rows" => {
                let (target, offset) = self.pair(op, args)?;
                match (target, offset.constant_value().and_then(|v| v.as_i64())) {
                    (E::Variable(v), Some(offset)) => E::Rows(v.path, offset),
                    _ => return Err(JxError::parse("rows expects {path: integer offset}")),
                }
            }

            "basic.eq" => {
                let (a, b) = self.pair(op, args)?;
                basic_eq(a, b)
            }
            "basic.gt" | "basic.gte" | "basic.lt" | "basic.lte" => {
                let ineq_op = InequalityOp::from_name(&op[6..])
                    .ok_or_else(|| JxError::UnknownOperator(op.to_string()))?;
                let (a, b) = self.pair(op, args)?;
                E::BasicInequality(ineq_op, boxed(a), boxed(b))
            }
            "basic.index_of" => {
                let (v, find, start) = self.triple(op, args)?;
                basic_index_of(v, find, start)
            }
            "basic.substring" => {
                let (v, start, end) = self.triple(op, args)?;
                basic_substring(v, start, end)
            }

            unknown => return Err(JxError::UnknownOperator(unknown.to_string())),
        };
        Ok(expr)
    }
}
