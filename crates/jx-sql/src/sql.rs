//! Opaque SQL fragments
//!
//! A [`Sql`] value can only be built from static text, quoted identifiers,
//! quoted values, or other fragments. Plain runtime strings never become SQL.

use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sql(String);

impl From<&'static str> for Sql {
    fn from(text: &'static str) -> Self {
        Sql(text.to_string())
    }
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build a fragment from a static template, substituting each `{}` in order.
///
/// ```
/// use jx_sql::{sql, Sql};
/// let a = Sql::quote_column("a.$n");
/// assert_eq!(sql!("{} IS NULL", a).as_str(), r#""a.$n" IS NULL"#);
/// ```
#[macro_export]
macro_rules! sql {
    ($template:literal) => {
        $crate::Sql::from($template)
    };
    ($template:literal, $($arg:expr),+ $(,)?) => {
        $crate::Sql::template(
            $template,
            &[$(::std::borrow::Borrow::<$crate::Sql>::borrow(&$arg)),+],
        )
    };
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl Sql {
    /// Double-quoted identifier.
    pub fn quote_column(name: &str) -> Sql {
        Sql(format!("\"{}\"", name.replace('"', "\"\"")))
    }

    /// `alias."column"`.
    pub fn qualified(alias: &Sql, column: &str) -> Sql {
        Sql(format!("{}.{}", alias.0, Sql::quote_column(column).0))
    }

    /// SQL literal for a JSON value. Arrays become list literals and objects
    /// become JSON text.
    pub fn quote_value(value: &Value) -> Sql {
        match value {
            Value::Null => Sql::from("NULL"),
            Value::Bool(true) => Sql::from("TRUE"),
            Value::Bool(false) => Sql::from("FALSE"),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Sql::int(i),
                (None, Some(f)) => Sql::float(f),
                _ => Sql::from("NULL"),
            },
            Value::String(s) => Sql(quote_string(s)),
            Value::Array(items) => Sql::template(
                "[{}]",
                &[&Sql::join(", ", items.iter().map(Sql::quote_value))],
            ),
            Value::Object(_) => Sql(quote_string(&value.to_string())),
        }
    }

    pub fn int(i: i64) -> Sql {
        Sql(i.to_string())
    }

    /// Doubles are cast so DuckDB never picks a narrow decimal type.
    pub fn float(f: f64) -> Sql {
        if f.is_finite() {
            Sql(format!("CAST({f:?} AS DOUBLE)"))
        } else {
            Sql::from("NULL")
        }
    }

    /// Caller-supplied SQL from a `script` expression.
    pub fn script(text: &str) -> Sql {
        Sql(format!("({text})"))
    }

    pub fn join<I>(separator: &'static str, parts: I) -> Sql
    where
        I: IntoIterator,
        I::Item: Borrow<Sql>,
    {
        let parts: Vec<String> = parts.into_iter().map(|p| p.borrow().0.clone()).collect();
        Sql(parts.join(separator))
    }

    /// See [`sql!`]. Extra arguments are ignored; missing ones leave `{}` empty.
    pub fn template(template: &'static str, args: &[&Sql]) -> Sql {
        let mut out = String::with_capacity(template.len());
        let mut args = args.iter();
        let mut pieces = template.split("{}");
        if let Some(first) = pieces.next() {
            out.push_str(first);
        }
        for piece in pieces {
            if let Some(arg) = args.next() {
                out.push_str(&arg.0);
            }
            out.push_str(piece);
        }
        Sql(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_column_escapes() {
        assert_eq!(Sql::quote_column("a.$n").as_str(), r#""a.$n""#);
        assert_eq!(Sql::quote_column(r#"x"y"#).as_str(), r#""x""y""#);
        assert_eq!(
            Sql::qualified(&Sql::quote_column("__t0"), "b.$s").as_str(),
            r#""__t0"."b.$s""#
        );
    }

    #[test]
    fn test_quote_value() {
        assert_eq!(Sql::quote_value(&json!("it's")).as_str(), "'it''s'");
        assert_eq!(Sql::quote_value(&json!(3)).as_str(), "3");
        assert_eq!(Sql::quote_value(&json!(1.5)).as_str(), "CAST(1.5 AS DOUBLE)");
        assert_eq!(Sql::quote_value(&json!(null)).as_str(), "NULL");
        assert_eq!(Sql::quote_value(&json!([1, "a"])).as_str(), "[1, 'a']");
        assert_eq!(Sql::quote_value(&json!({"k": 1})).as_str(), r#"'{"k":1}'"#);
    }

    #[test]
    fn test_template_and_join() {
        let a = Sql::quote_column("a");
        let b = Sql::from("1");
        assert_eq!(sql!("{} = {}", a, &b).as_str(), r#""a" = 1"#);
        assert_eq!(sql!("TRUE").as_str(), "TRUE");
        assert_eq!(Sql::join(", ", [a.clone(), b]).as_str(), r#""a", 1"#);
        assert_eq!(Sql::join(" AND ", Vec::<Sql>::new()).as_str(), "");
    }
}
