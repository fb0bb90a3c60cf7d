//! Reference semantics: evaluate an expression against one JSON document
//!
//! Constant folding in the partial evaluator runs this with a `null` row, so
//! the SQL translation and the evaluator must agree operator by operator.

use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::{BinaryOp, Expr, InequalityOp, MultiOp, SideOp};
use crate::types::{concat_field, join_field, split_field, JsonType};

/// JSON number for `f`, as an integer when it has no fractional part.
pub(crate) fn number(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// `null` and `[]` are missing.
pub fn is_missing_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Array(items) => items.iter().any(truthy),
        _ => true,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    as_f64(v).map(|f| f as i64)
}

/// Equality with numbers compared by value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Array(xs), y) if !y.is_array() => xs.iter().any(|x| values_equal(x, y)),
        (x, Value::Array(ys)) if !x.is_array() => ys.iter().any(|y| values_equal(x, y)),
        (x, y) => x == y,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn inequality(op: InequalityOp, a: &Value, b: &Value) -> bool {
    match compare(a, b) {
        Some(ord) => match op {
            InequalityOp::Gt => ord == Ordering::Greater,
            InequalityOp::Gte => ord != Ordering::Less,
            InequalityOp::Lt => ord == Ordering::Less,
            InequalityOp::Lte => ord != Ordering::Greater,
        },
        None => false,
    }
}

/// Text form used by `string` and `concat`.
pub(crate) fn to_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        other => Some(other.to_string()),
    }
}

fn to_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

fn substring(s: &str, start: i64, end: i64) -> String {
    let cs = chars(s);
    let len = cs.len() as i64;
    let start = start.clamp(0, len) as usize;
    let end = end.clamp(0, len) as usize;
    if end <= start {
        return String::new();
    }
    cs[start..end].iter().collect()
}

fn index_of(s: &str, needle: &str, start: i64) -> i64 {
    let cs = chars(s);
    let ns = chars(needle);
    let start = start.max(0) as usize;
    if ns.is_empty() {
        return if start <= cs.len() { start as i64 } else { -1 };
    }
    if ns.len() > cs.len() {
        return -1;
    }
    (start..=cs.len() - ns.len())
        .find(|i| cs[*i..*i + ns.len()] == ns[..])
        .map(|i| i as i64)
        .unwrap_or(-1)
}

/// Values at `path`, fanning out through arrays.
fn lookup(row: &Value, path: &str) -> Value {
    if path == "." {
        return row.clone();
    }
    let mut current = vec![row.clone()];
    let mut fanned = false;
    for key in split_field(path) {
        let mut next = Vec::new();
        for v in current {
            match v {
                Value::Object(mut map) => {
                    if let Some(child) = map.remove(&key) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    fanned = true;
                    for item in items {
                        if let Value::Object(mut map) = item {
                            if let Some(child) = map.remove(&key) {
                                next.push(child);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    let mut flat = Vec::new();
    for v in current {
        match v {
            Value::Array(items) => {
                fanned = true;
                flat.extend(items.into_iter().filter(|v| !v.is_null()));
            }
            Value::Null => {}
            other => flat.push(other),
        }
    }
    if fanned {
        Value::Array(flat)
    } else {
        flat.into_iter().next().unwrap_or(Value::Null)
    }
}

fn collect_leaves(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let path = concat_field(prefix, &join_field(&[k.as_str()]));
                collect_leaves(&path, v, out);
            }
        }
        Value::Null => {}
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

fn regex_full_match(pattern: &str, text: &str) -> bool {
    Regex::new(&format!("^(?:{pattern})$"))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

impl Expr {
    /// Evaluate against `row`; missing results are `null`.
    pub fn evaluate(&self, row: &Value) -> Value {
        use Expr::*;
        match self {
            Null => Value::Null,
            True => Value::Bool(true),
            False => Value::Bool(false),
            Literal(v) => v.clone(),
            Date(d) => number(*d),
            Variable(v) => lookup(row, &v.path),
            Offset(i) => row.get(*i).cloned().unwrap_or(Value::Null),
            Script(_) => Value::Null,

            And(terms) => Value::Bool(terms.iter().all(|t| truthy(&t.evaluate(row)))),
            Or(terms) => Value::Bool(terms.iter().any(|t| truthy(&t.evaluate(row)))),
            Not(x) => Value::Bool(!truthy(&x.evaluate(row))),
            When(w) => {
                if truthy(&w.cond.evaluate(row)) {
                    w.then.evaluate(row)
                } else {
                    w.els.evaluate(row)
                }
            }
            Case(c) => c
                .whens
                .iter()
                .find(|(cond, _)| truthy(&cond.evaluate(row)))
                .map(|(_, v)| v.evaluate(row))
                .unwrap_or_else(|| c.default.evaluate(row)),

            Eq(a, b) => {
                let (a, b) = (a.evaluate(row), b.evaluate(row));
                Value::Bool(match (is_missing_value(&a), is_missing_value(&b)) {
                    (true, true) => true,
                    (true, false) | (false, true) => false,
                    (false, false) => values_equal(&a, &b),
                })
            }
            Ne(a, b) => {
                let equal = Eq(a.clone(), b.clone()).evaluate(row);
                Value::Bool(!truthy(&equal))
            }
            Inequality(op, a, b) => {
                let (a, b) = (a.evaluate(row), b.evaluate(row));
                if is_missing_value(&a) || is_missing_value(&b) {
                    Value::Bool(false)
                } else {
                    Value::Bool(inequality(*op, &a, &b))
                }
            }
            In(x, set) => {
                let v = x.evaluate(row);
                if is_missing_value(&v) {
                    Value::Bool(set.iter().any(Value::is_null))
                } else {
                    Value::Bool(set.iter().any(|s| values_equal(&v, s)))
                }
            }
            Range(x, bounds) => Value::Bool(bounds.iter().all(|(op, bound)| {
                truthy(
                    &Inequality(*op, x.clone(), Box::new(bound.clone())).evaluate(row),
                )
            })),

            Missing(x) => Value::Bool(is_missing_value(&x.evaluate(row))),
            Exists(x) => Value::Bool(!is_missing_value(&x.evaluate(row))),
            Coalesce(terms) => terms
                .iter()
                .map(|t| t.evaluate(row))
                .find(|v| !is_missing_value(v))
                .unwrap_or(Value::Null),
            First(x) => match x.evaluate(row) {
                Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
                other => other,
            },
            Last(x) => match x.evaluate(row) {
                Value::Array(items) => items.into_iter().last().unwrap_or(Value::Null),
                other => other,
            },
            Convert(t, x) => convert(*t, &x.evaluate(row)),
            IsType(t, x) => {
                let v = x.evaluate(row);
                Value::Bool(match (t, &v) {
                    (JsonType::Boolean, Value::Bool(_)) => true,
                    (JsonType::String, Value::String(_)) => true,
                    (JsonType::Number, Value::Number(_)) => true,
                    (JsonType::Integer, Value::Number(n)) => {
                        n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
                    }
                    _ => false,
                })
            }

            Binary(b) => {
                let (l, r) = (b.lhs.evaluate(row), b.rhs.evaluate(row));
                let result = match (to_number(&l), to_number(&r)) {
                    (Some(l), Some(r)) => match b.op {
                        BinaryOp::Sub => Some(l - r),
                        BinaryOp::Div if r != 0.0 => Some(l / r),
                        BinaryOp::Mod if r != 0.0 => Some(l % r),
                        BinaryOp::Floor if r != 0.0 => Some((l / r).floor() * r),
                        BinaryOp::Exp => Some(l.powf(r)),
                        _ => None,
                    },
                    _ => None,
                };
                match result.filter(|f| f.is_finite()) {
                    Some(f) => number(f),
                    None => b.default.evaluate(row),
                }
            }
            Multi(m) => {
                let values: Vec<Option<f64>> =
                    m.terms.iter().map(|t| to_number(&t.evaluate(row))).collect();
                let present: Vec<f64> = values.iter().flatten().copied().collect();
                let poisoned = !m.nulls && present.len() != values.len();
                if poisoned || (present.is_empty() && !values.is_empty()) {
                    return m.default.evaluate(row);
                }
                let result = match m.op {
                    MultiOp::Add => present.iter().sum::<f64>(),
                    MultiOp::Mul => present.iter().product::<f64>(),
                };
                number(result)
            }
            Min(terms) | Max(terms) => {
                let nums = terms.iter().filter_map(|t| to_number(&t.evaluate(row)));
                let picked = if matches!(self, Min(_)) {
                    nums.fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.min(x))))
                } else {
                    nums.fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))
                };
                picked.map(number).unwrap_or(Value::Null)
            }
            Count(terms) => Value::from(
                terms
                    .iter()
                    .filter(|t| !is_missing_value(&t.evaluate(row)))
                    .count(),
            ),

            Length(x) => match x.evaluate(row) {
                Value::String(s) => Value::from(s.chars().count()),
                _ => Value::Null,
            },
            Concat(c) => {
                let parts: Vec<String> = c
                    .terms
                    .iter()
                    .filter_map(|t| to_text(&t.evaluate(row)))
                    .collect();
                if parts.is_empty() {
                    c.default.evaluate(row)
                } else {
                    Value::String(parts.join(&c.separator))
                }
            }
            Side(op, v, n) => {
                let (v, n) = (v.evaluate(row), n.evaluate(row));
                let (Some(s), Some(n)) = (to_text(&v), as_i64(&n)) else {
                    return Value::Null;
                };
                let len = s.chars().count() as i64;
                let n = n.max(0);
                Value::String(match op {
                    SideOp::Left => substring(&s, 0, n),
                    SideOp::Right => substring(&s, (len - n).max(0), len),
                    SideOp::NotLeft => substring(&s, n.min(len), len),
                    SideOp::NotRight => substring(&s, 0, (len - n).max(0)),
                })
            }
            Find(f) => {
                let (v, needle) = (f.value.evaluate(row), f.find.evaluate(row));
                let start = as_i64(&f.start.evaluate(row)).unwrap_or(0);
                match (to_text(&v), to_text(&needle)) {
                    (Some(s), Some(n)) => match index_of(&s, &n, start) {
                        -1 => f.default.evaluate(row),
                        i => Value::from(i),
                    },
                    _ => f.default.evaluate(row),
                }
            }
            Split(v, sep) => match (to_text(&v.evaluate(row)), to_text(&sep.evaluate(row))) {
                (Some(s), Some(sep)) if !sep.is_empty() => Value::Array(
                    s.split(sep.as_str())
                        .map(|p| Value::String(p.to_string()))
                        .collect(),
                ),
                _ => Value::Null,
            },
            Prefix(v, p) => {
                let (v, p) = (v.evaluate(row), p.evaluate(row));
                match (to_text(&v), to_text(&p)) {
                    (_, None) => Value::Bool(true),
                    (None, Some(_)) => Value::Bool(false),
                    (Some(s), Some(p)) => Value::Bool(s.starts_with(&p)),
                }
            }
            Suffix(v, p) => {
                let (v, p) = (v.evaluate(row), p.evaluate(row));
                match (to_text(&v), to_text(&p)) {
                    (_, None) => Value::Bool(true),
                    (None, Some(_)) => Value::Bool(false),
                    (Some(s), Some(p)) => Value::Bool(s.ends_with(&p)),
                }
            }
            RegExp(v, pattern) => match v.evaluate(row) {
                Value::String(s) => Value::Bool(regex_full_match(pattern, &s)),
                _ => Value::Bool(false),
            },
            Between(b) => {
                let Some(s) = to_text(&b.value.evaluate(row)) else {
                    return b.default.evaluate(row);
                };
                let mut begin = as_i64(&b.start.evaluate(row)).unwrap_or(0);
                if let Some(prefix) = to_text(&b.prefix.evaluate(row)) {
                    match index_of(&s, &prefix, begin) {
                        -1 => return b.default.evaluate(row),
                        i => begin = i + prefix.chars().count() as i64,
                    }
                }
                let end = match to_text(&b.suffix.evaluate(row)) {
                    Some(suffix) => match index_of(&s, &suffix, begin) {
                        -1 => return b.default.evaluate(row),
                        i => i,
                    },
                    None => s.chars().count() as i64,
                };
                Value::String(substring(&s, begin, end))
            }

            Tuple(terms) => Value::Array(terms.iter().map(|t| t.evaluate(row)).collect()),
            Leaves(path) => {
                let mut out = Map::new();
                collect_leaves(".", &lookup(row, path), &mut out);
                Value::Object(out)
            }
            Select(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.evaluate(row)))
                    .filter(|(_, v)| !v.is_null())
                    .collect(),
            ),
            Get(container, index) => {
                let container = container.evaluate(row);
                match (container, index.evaluate(row)) {
                    (Value::Array(items), Value::Number(n)) => n
                        .as_i64()
                        .and_then(|i| usize::try_from(i).ok())
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(Value::Null),
                    (obj @ Value::Object(_), Value::String(key)) => lookup(&obj, &key),
                    _ => Value::Null,
                }
            }
            Rows(..) => Value::Null,

            BasicEq(a, b) => {
                let (a, b) = (a.evaluate(row), b.evaluate(row));
                if a.is_null() || b.is_null() {
                    Value::Null
                } else {
                    Value::Bool(values_equal(&a, &b))
                }
            }
            BasicInequality(op, a, b) => {
                let (a, b) = (a.evaluate(row), b.evaluate(row));
                if a.is_null() || b.is_null() {
                    Value::Null
                } else {
                    Value::Bool(inequality(*op, &a, &b))
                }
            }
            BasicIndexOf(v, needle, start) => {
                let start = as_i64(&start.evaluate(row)).unwrap_or(0);
                match (to_text(&v.evaluate(row)), to_text(&needle.evaluate(row))) {
                    (Some(s), Some(n)) => Value::from(index_of(&s, &n, start)),
                    _ => Value::Null,
                }
            }
            BasicSubstring(v, start, end) => {
                let s = to_text(&v.evaluate(row));
                let start = as_i64(&start.evaluate(row));
                let end = as_i64(&end.evaluate(row));
                match (s, start, end) {
                    (Some(s), Some(start), Some(end)) => Value::String(substring(&s, start, end)),
                    _ => Value::Null,
                }
            }
        }
    }
}

fn convert(t: JsonType, v: &Value) -> Value {
    match t {
        JsonType::Boolean => match v {
            Value::Bool(b) => Value::Bool(*b),
            other => Value::Bool(!is_missing_value(other)),
        },
        JsonType::Number => to_number(v).map(number).unwrap_or(Value::Null),
        JsonType::Integer => to_number(v)
            .map(|f| number(f.trunc()))
            .unwrap_or(Value::Null),
        JsonType::String => to_text(v).map(Value::String).unwrap_or(Value::Null),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::build::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_fans_out_through_arrays() {
        let doc = json!({"a": 1, "c": [{"d": 10}, {"d": 20}, {}]});
        assert_eq!(lookup(&doc, "a"), json!(1));
        assert_eq!(lookup(&doc, "c.d"), json!([10, 20]));
        assert_eq!(lookup(&doc, "missing"), Value::Null);
    }

    #[test]
    fn test_null_decisive_equality() {
        let doc = json!({"a": 1});
        assert_eq!(eq(var("x"), Expr::Null).evaluate(&doc), json!(true));
        assert_eq!(eq(var("a"), Expr::Null).evaluate(&doc), json!(false));
        assert_eq!(eq(var("a"), lit(1.0)).evaluate(&doc), json!(true));
        assert_eq!(gt(var("x"), lit(0)).evaluate(&doc), json!(false));
    }

    #[test]
    fn test_string_functions() {
        let doc = json!({"s": "hello world"});
        let left = Expr::Side(SideOp::Left, Box::new(var("s")), Box::new(lit(5)));
        assert_eq!(left.evaluate(&doc), json!("hello"));
        let not_right = Expr::Side(SideOp::NotRight, Box::new(var("s")), Box::new(lit(6)));
        assert_eq!(not_right.evaluate(&doc), json!("hello"));
        assert_eq!(
            basic_index_of(var("s"), lit("o"), lit(5)).evaluate(&doc),
            json!(7)
        );
        assert_eq!(
            basic_substring(var("s"), lit(6), lit(100)).evaluate(&doc),
            json!("world")
        );
    }

    #[test]
    fn test_arithmetic() {
        let doc = json!({"a": 7, "b": 2});
        assert_eq!(add(vec![var("a"), var("b")]).evaluate(&doc), json!(9));
        assert_eq!(add(vec![var("a"), var("zz")]).evaluate(&doc), json!(null));
        assert_eq!(sub(var("a"), var("b")).evaluate(&doc), json!(5));
        assert_eq!(
            binary(BinaryOp::Div, var("a"), lit(0)).evaluate(&doc),
            json!(null)
        );
        assert_eq!(
            binary(BinaryOp::Floor, var("a"), var("b")).evaluate(&doc),
            json!(6)
        );
    }

    #[test]
    fn test_number_normalization() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(2.5), json!(2.5));
        assert_eq!(to_text(&json!(3.0)).unwrap(), "3");
    }
}
