//! JSON type lattice, typed-column naming and dotted-path helpers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Nominal JSON types, plus the `exists` meta-type.
///
/// `Integer` is a refinement of `Number`; both are stored under the number tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Object,
    Nested,
    Exists,
}

impl JsonType {
    pub fn name(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Object => "object",
            JsonType::Nested => "nested",
            JsonType::Exists => "exists",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "null" => JsonType::Null,
            "boolean" => JsonType::Boolean,
            "integer" => JsonType::Integer,
            "number" => JsonType::Number,
            "string" => JsonType::String,
            "object" => JsonType::Object,
            "nested" => JsonType::Nested,
            "exists" => JsonType::Exists,
            _ => return None,
        })
    }

    /// Single-character tag used in physical column names.
    pub fn tag(self) -> char {
        match self {
            JsonType::Boolean => 'b',
            JsonType::Integer | JsonType::Number => 'n',
            JsonType::String => 's',
            JsonType::Null | JsonType::Object => 'j',
            JsonType::Nested => 'N',
            JsonType::Exists => 'e',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        Some(match tag {
            'b' => JsonType::Boolean,
            'n' => JsonType::Number,
            's' => JsonType::String,
            'j' => JsonType::Object,
            'N' => JsonType::Nested,
            'e' => JsonType::Exists,
            _ => return None,
        })
    }

    /// The type a value of this type is stored as.
    pub fn storage(self) -> JsonType {
        match self {
            JsonType::Integer => JsonType::Number,
            JsonType::Null => JsonType::Object,
            other => other,
        }
    }

    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            JsonType::Boolean | JsonType::Integer | JsonType::Number | JsonType::String
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, JsonType::Integer | JsonType::Number)
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Most specific JSON type of a value. The empty array is indistinguishable from missing.
pub fn get_json_type(value: &Value) -> JsonType {
    match value {
        Value::Null => JsonType::Null,
        Value::Bool(_) => JsonType::Boolean,
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                JsonType::Integer
            } else {
                JsonType::Number
            }
        }
        Value::String(_) => JsonType::String,
        Value::Array(items) if items.is_empty() => JsonType::Null,
        Value::Array(_) => JsonType::Nested,
        Value::Object(_) => JsonType::Object,
    }
}

/// Least upper bound of two types.
///
/// Scalars widen toward `string`, `object` and `nested` promote to `nested`,
/// and a scalar mixed with `object`/`nested` yields `null`: the shape changed
/// and the schema must be reshaped.
pub fn merge_types(a: JsonType, b: JsonType) -> JsonType {
    use JsonType::*;
    if a == b {
        return a;
    }
    match (a, b) {
        (Null, x) | (x, Null) => x,
        (Exists, x) | (x, Exists) => x,
        (Integer, Number) | (Number, Integer) => Number,
        (Object, Nested) | (Nested, Object) => Nested,
        (x, y) if x.is_scalar() && y.is_scalar() => String,
        _ => Null,
    }
}

/// Physical column name for `path` holding values of `json_type`.
pub fn typed_column(path: &str, json_type: JsonType) -> String {
    let tag = json_type.storage().tag();
    if path == "." || path.is_empty() {
        format!(".${tag}")
    } else {
        format!("{path}.${tag}")
    }
}

/// Inverse of [`typed_column`]; `None` when the name carries no type suffix.
pub fn untype(physical_name: &str) -> Option<(String, JsonType)> {
    let mut chars = physical_name.chars().rev();
    let tag = chars.next()?;
    let json_type = JsonType::from_tag(tag)?;
    let stem = physical_name.strip_suffix(tag)?.strip_suffix('$')?;
    let path = stem.strip_suffix('.')?;
    let trailing_slashes = path.chars().rev().take_while(|c| *c == '\\').count();
    if trailing_slashes % 2 == 1 {
        return None;
    }
    if path.is_empty() {
        Some((".".to_string(), json_type))
    } else {
        Some((path.to_string(), json_type))
    }
}

/// Escape a single object key so it can be used as a path segment.
///
/// Dots become `\.`; a leading `$` is doubled so no user segment can look
/// like a type suffix.
pub fn escape_key(key: &str) -> String {
    let escaped = key.replace('.', "\\.");
    if escaped.starts_with('$') {
        format!("${escaped}")
    } else {
        escaped
    }
}

pub fn unescape_key(segment: &str) -> String {
    let segment = match segment.strip_prefix("$$") {
        Some(rest) => format!("${rest}"),
        None => segment.to_string(),
    };
    segment.replace("\\.", ".")
}

/// Split a dotted path into unescaped keys. The root path `.` has no keys.
pub fn split_field(path: &str) -> Vec<String> {
    if path == "." || path.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                chars.next();
                current.push('.');
            }
            '.' => out.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    out.push(current);
    out.into_iter()
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix("$$") {
            Some(rest) => format!("${rest}"),
            None => s,
        })
        .collect()
}

/// Inverse of [`split_field`].
pub fn join_field<S: AsRef<str>>(keys: &[S]) -> String {
    if keys.is_empty() {
        return ".".to_string();
    }
    keys.iter()
        .map(|k| escape_key(k.as_ref()))
        .collect::<Vec<_>>()
        .join(".")
}

pub fn concat_field(prefix: &str, suffix: &str) -> String {
    match (prefix, suffix) {
        (".", s) | ("", s) => {
            if s.is_empty() {
                ".".to_string()
            } else {
                s.to_string()
            }
        }
        (p, ".") | (p, "") => p.to_string(),
        (p, s) => format!("{p}.{s}"),
    }
}

/// `true` when `field` is `prefix` or lies beneath it.
pub fn starts_with_field(field: &str, prefix: &str) -> bool {
    if prefix == "." {
        return true;
    }
    let field = split_field(field);
    let prefix = split_field(prefix);
    field.len() >= prefix.len() && field[..prefix.len()] == prefix[..]
}

/// `field` expressed relative to `parent`.
pub fn relative_field(field: &str, parent: &str) -> String {
    if !starts_with_field(field, parent) {
        return field.to_string();
    }
    let field = split_field(field);
    let depth = split_field(parent).len();
    join_field(&field[depth..])
}
