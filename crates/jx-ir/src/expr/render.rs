//! JX rendering: the inverse of parsing, used for logs and the HTTP API

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::Expr;

fn op(name: &str, args: Value) -> Value {
    let mut map = Map::new();
    map.insert(name.to_string(), args);
    Value::Object(map)
}

fn with_option(mut value: Value, key: &str, option: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert(key.to_string(), option);
    }
    value
}

fn list(terms: &[Expr]) -> Value {
    Value::Array(terms.iter().map(Expr::to_json).collect())
}

fn pair(a: &Expr, b: &Expr) -> Value {
    json!([a.to_json(), b.to_json()])
}

impl Expr {
    /// JX form of this expression; `Expr::from_json` reads it back.
    pub fn to_json(&self) -> Value {
        use Expr::*;
        match self {
            Null => Value::Null,
            True => Value::Bool(true),
            False => Value::Bool(false),
            Literal(v @ Value::Number(_)) => v.clone(),
            Literal(v) => op("literal", v.clone()),
            Date(d) => op("date", super::eval::number(*d)),
            Variable(v) => Value::String(v.path.clone()),
            Offset(i) => op("offset", json!(i)),
            Script(sql) => op("script", json!(sql)),

            And(terms) => op("and", list(terms)),
            Or(terms) => op("or", list(terms)),
            Not(x) => op("not", x.to_json()),
            When(w) => {
                let mut out = op("when", w.cond.to_json());
                out = with_option(out, "then", w.then.to_json());
                with_option(out, "else", w.els.to_json())
            }
            Case(c) => {
                let mut items: Vec<Value> = c
                    .whens
                    .iter()
                    .map(|(cond, then)| json!({"when": cond.to_json(), "then": then.to_json()}))
                    .collect();
                items.push(c.default.to_json());
                op("case", Value::Array(items))
            }

            Eq(a, b) => op("eq", pair(a, b)),
            Ne(a, b) => op("ne", pair(a, b)),
            Inequality(o, a, b) => op(o.name(), pair(a, b)),
            In(x, set) => op("in", json!([x.to_json(), {"literal": set}])),
            Range(x, bounds) => {
                let terms: Vec<Value> = bounds
                    .iter()
                    .map(|(o, bound)| op(o.name(), pair(x, bound)))
                    .collect();
                op("and", Value::Array(terms))
            }

            Missing(x) => op("missing", x.to_json()),
            Exists(x) => op("exists", x.to_json()),
            Coalesce(terms) => op("coalesce", list(terms)),
            First(x) => op("first", x.to_json()),
            Last(x) => op("last", x.to_json()),
            Convert(t, x) => op(t.name(), x.to_json()),
            IsType(t, x) => op(&format!("is_{}", t.name()), x.to_json()),

            Binary(b) => {
                let out = op(b.op.name(), pair(&b.lhs, &b.rhs));
                match b.default {
                    Null => out,
                    ref d => with_option(out, "default", d.to_json()),
                }
            }
            Multi(m) => {
                let mut out = op(m.op.name(), list(&m.terms));
                if m.nulls {
                    out = with_option(out, "nulls", Value::Bool(true));
                }
                match m.default {
                    Null => out,
                    ref d => with_option(out, "default", d.to_json()),
                }
            }
            Min(terms) => op("min", list(terms)),
            Max(terms) => op("max", list(terms)),
            Count(terms) => op("count", list(terms)),

            Length(x) => op("length", x.to_json()),
            Concat(c) => {
                let mut out = op("concat", list(&c.terms));
                if !c.separator.is_empty() {
                    out = with_option(out, "separator", json!(c.separator));
                }
                match c.default {
                    Null => out,
                    ref d => with_option(out, "default", d.to_json()),
                }
            }
            Side(o, v, n) => op(o.name(), pair(v, n)),
            Find(f) => {
                let mut out = op("find", pair(&f.value, &f.find));
                out = with_option(out, "start", f.start.to_json());
                match f.default {
                    Null => out,
                    ref d => with_option(out, "default", d.to_json()),
                }
            }
            Split(v, sep) => op("split", pair(v, sep)),
            Prefix(v, p) => op("prefix", pair(v, p)),
            Suffix(v, p) => op("suffix", pair(v, p)),
            RegExp(v, pattern) => op("regexp", json!([v.to_json(), {"literal": pattern}])),
            Between(b) => {
                let args = json!([b.value.to_json(), b.prefix.to_json(), b.suffix.to_json()]);
                let mut out = with_option(op("between", args), "start", b.start.to_json());
                if b.default != Null {
                    out = with_option(out, "default", b.default.to_json());
                }
                out
            }

            Tuple(terms) => op("tuple", list(terms)),
            Leaves(path) => op("leaves", json!(path)),
            Select(fields) => op(
                "select",
                Value::Array(
                    fields
                        .iter()
                        .map(|(name, value)| json!({"name": name, "value": value.to_json()}))
                        .collect(),
                ),
            ),
            Get(a, b) => op("get", pair(a, b)),
            Rows(path, offset) => op("rows", json!([path, offset])),

            BasicEq(a, b) => op("basic.eq", pair(a, b)),
            BasicInequality(o, a, b) => op(&format!("basic.{}", o.name()), pair(a, b)),
            BasicIndexOf(a, b, c) => {
                op("basic.index_of", json!([a.to_json(), b.to_json(), c.to_json()]))
            }
            BasicSubstring(a, b, c) => {
                op("basic.substring", json!([a.to_json(), b.to_json(), c.to_json()]))
            }
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::super::build::*;
    use super::*;

    #[test]
    fn test_parse_render_parse() {
        let inputs = [
            json!({"eq": {"b": "x"}}),
            json!({"and": [{"gt": ["a", 1]}, {"missing": "c.d"}]}),
            json!({"concat": ["a", "b"], "separator": ", "}),
            json!({"when": {"exists": "a"}, "then": "a", "else": {"literal": "none"}}),
            json!({"find": {"s": "o"}, "start": 2, "default": -1}),
            json!({"between": {"s": ["[", "]"]}}),
            json!({"in": {"a": [1, 2, 3]}}),
        ];
        for input in inputs {
            let e = Expr::from_json(&input).unwrap();
            assert_eq!(Expr::from_json(&e.to_json()).unwrap(), e, "{input}");
        }
    }

    #[test]
    fn test_serialize_matches_to_json() {
        let e = and(vec![eq(var("a"), lit(1)), missing(var("b"))]);
        assert_eq!(serde_json::to_value(&e).unwrap(), e.to_json());
        assert_eq!(
            e.to_json(),
            json!({"and": [{"eq": ["a", 1]}, {"missing": "b"}]})
        );
    }
}
