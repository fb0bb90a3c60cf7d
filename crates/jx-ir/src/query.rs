//! Normalized JX queries
//!
//! `Query::normalize` turns a user JX document into the record the SQL
//! emitter consumes: every shorthand expanded, variables resolved to full
//! paths from the fact root, expressions partially evaluated against the
//! schema, and every structural rule checked before any SQL is produced.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

use crate::date::{duration_value, parse_date};
use crate::expr::build::var;
use crate::expr::Expr;
use crate::schema::Schema;
use crate::types::{concat_field, join_field, split_field, starts_with_field, JsonType};
use crate::{JxError, Result};

pub const DEFAULT_LIMIT: usize = 10;

/// Output name of the whole-document select.
pub const ALL_COLUMNS: &str = "__all__";

const QUERY_KEYS: &[&str] = &[
    "from", "select", "where", "edges", "groupby", "sort", "window", "limit", "format",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    None,
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Median,
    First,
    Last,
    Cardinality,
    Union,
    Percentile,
    Stats,
}

impl Aggregate {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "none" => Aggregate::None,
            "count" => Aggregate::Count,
            "sum" | "add" => Aggregate::Sum,
            "min" | "minimum" => Aggregate::Min,
            "max" | "maximum" => Aggregate::Max,
            "avg" | "average" | "mean" => Aggregate::Avg,
            "median" => Aggregate::Median,
            "first" => Aggregate::First,
            "last" => Aggregate::Last,
            "cardinality" => Aggregate::Cardinality,
            "union" => Aggregate::Union,
            "percentile" => Aggregate::Percentile,
            "stats" => Aggregate::Stats,
            _ => return None,
        })
    }

    /// Aggregates that only reduce numbers.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Aggregate::Sum
                | Aggregate::Avg
                | Aggregate::Median
                | Aggregate::Percentile
                | Aggregate::Stats
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Aggregate::None => "none",
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Avg => "avg",
            Aggregate::Median => "median",
            Aggregate::First => "first",
            Aggregate::Last => "last",
            Aggregate::Cardinality => "cardinality",
            Aggregate::Union => "union",
            Aggregate::Percentile => "percentile",
            Aggregate::Stats => "stats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectColumn {
    pub name: String,
    pub value: Expr,
    pub aggregate: Aggregate,
    /// Replaces a missing aggregate result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Quantile for `percentile`, in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Domain {
    /// Partitions are the distinct observed values.
    Default,
    Set {
        partitions: Vec<Value>,
    },
    /// Half-open numeric intervals `[min + k*interval, min + (k+1)*interval)`.
    Range {
        min: f64,
        max: f64,
        interval: f64,
    },
    /// Like `Range`, over unix seconds.
    Time {
        min: f64,
        max: f64,
        interval: f64,
    },
    /// Like `Range`, over seconds of elapsed time.
    Duration {
        min: f64,
        max: f64,
        interval: f64,
    },
}

impl Domain {
    /// `(min, max, interval)` for the interval-typed domains.
    pub fn bounds(&self) -> Option<(f64, f64, f64)> {
        match self {
            Domain::Range { min, max, interval }
            | Domain::Time { min, max, interval }
            | Domain::Duration { min, max, interval } => Some((*min, *max, *interval)),
            _ => None,
        }
    }

    /// Number of intervals in an interval-typed domain.
    pub fn interval_count(&self) -> Option<usize> {
        self.bounds()
            .map(|(min, max, interval)| ((max - min) / interval).ceil() as usize)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Domain::Default => "default",
            Domain::Set { .. } => "set",
            Domain::Range { .. } => "range",
            Domain::Time { .. } => "time",
            Domain::Duration { .. } => "duration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub name: String,
    pub value: Expr,
    pub domain: Domain,
    #[serde(rename = "allowNulls")]
    pub allow_nulls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupBy {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub value: Expr,
    /// `+1` ascending, `-1` descending, `0` unordered.
    pub direction: i8,
    /// Set when the key names an output column rather than a document path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    pub name: String,
    /// `None` for `rownum`.
    pub value: Option<Expr>,
    pub aggregate: Aggregate,
    pub edges: Vec<Expr>,
    pub sort: Vec<SortKey>,
    /// Frame as rows relative to the current one; `None` is unbounded.
    pub range: Option<(Option<i64>, Option<i64>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    List,
    Table,
    Cube,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::List => "list",
            Format::Table => "table",
            Format::Cube => "cube",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub from: String,
    pub fact: String,
    /// Nested path of the perspective, relative to the fact table.
    pub query_path: String,
    pub select: Vec<SelectColumn>,
    /// `select` was given as a single column rather than a list.
    pub select_single: bool,
    #[serde(rename = "where")]
    pub where_: Expr,
    pub edges: Vec<Edge>,
    pub groupby: Vec<GroupBy>,
    pub sort: Vec<SortKey>,
    pub window: Vec<Window>,
    pub limit: usize,
    pub format: Format,
    pub fingerprint: String,
}

/// SHA-256 of the query document, used to correlate log lines.
pub fn fingerprint(jx: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(jx.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Query {
    /// Name of the fact table a JX query reads from.
    pub fn fact_name(jx: &Value) -> Result<String> {
        let from = jx
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| JxError::parse("Query requires a string `from`"))?;
        split_field(from)
            .into_iter()
            .next()
            .ok_or_else(|| JxError::parse(format!("Bad from {from:?}")))
    }

    pub fn normalize(jx: &Value, schema: &dyn Schema) -> Result<Query> {
        let map = jx
            .as_object()
            .ok_or_else(|| JxError::parse("Query must be an object"))?;
        if let Some(unknown) = map.keys().find(|k| !QUERY_KEYS.contains(&k.as_str())) {
            return Err(JxError::parse(format!("Unknown query property {unknown:?}")));
        }

        let from = map
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| JxError::parse("Query requires a string `from`"))?
            .to_string();
        let mut keys = split_field(&from);
        if keys.is_empty() {
            return Err(JxError::parse(format!("Bad from {from:?}")));
        }
        let fact = keys.remove(0);
        if !schema.fact().is_empty() && schema.fact() != fact {
            return Err(JxError::Schema(format!("Unknown table {fact:?}")));
        }
        let query_path = join_field(&keys);
        if query_path != "." && schema.types_at(&query_path).is_some() && !schema.is_nested(&query_path)
        {
            return Err(JxError::Schema(format!("{from:?} is not a nested table")));
        }

        let n = Normalizer {
            schema,
            query_path: query_path.clone(),
        };

        if map.contains_key("edges") && map.contains_key("groupby") {
            return Err(JxError::parse("Query can not have both edges and groupby"));
        }
        let edges = match map.get("edges") {
            Some(v) => n.edges(v)?,
            None => Vec::new(),
        };
        let groupby = match map.get("groupby") {
            Some(v) => n.groupby(v)?,
            None => Vec::new(),
        };
        let grouped = !edges.is_empty() || !groupby.is_empty();

        let (select, select_single) = match map.get("select") {
            Some(v) => n.select(v)?,
            None if grouped => (
                vec![SelectColumn {
                    name: "count".to_string(),
                    value: var("."),
                    aggregate: Aggregate::Count,
                    default: Some(Value::from(0)),
                    percentile: None,
                }],
                true,
            ),
            None => (
                vec![SelectColumn {
                    name: ALL_COLUMNS.to_string(),
                    value: var("."),
                    aggregate: Aggregate::None,
                    default: None,
                    percentile: None,
                }],
                true,
            ),
        };

        let where_ = match map.get("where") {
            Some(v) => n.boolean(v)?,
            None => Expr::True,
        };

        let sort = match map.get("sort") {
            Some(v) => n.sort(v, &select, &groupby, &edges)?,
            None => Vec::new(),
        };
        let window = match map.get("window") {
            Some(v) => n.windows(v)?,
            None => Vec::new(),
        };

        let limit = match map.get("limit") {
            None | Some(Value::Null) => DEFAULT_LIMIT,
            Some(v) => v
                .as_u64()
                .map(|l| l as usize)
                .ok_or_else(|| JxError::parse(format!("limit must be a non-negative integer, not {v}")))?,
        };

        let format = match map.get("format").and_then(Value::as_str) {
            None if !edges.is_empty() => Format::Cube,
            None => Format::List,
            Some("list") => Format::List,
            Some("table") => Format::Table,
            Some("cube") => Format::Cube,
            Some(other) => return Err(JxError::parse(format!("Unknown format {other:?}"))),
        };
        if format == Format::Cube && !groupby.is_empty() {
            return Err(JxError::parse("cube format requires edges, not groupby"));
        }

        let query = Query {
            from,
            fact,
            query_path,
            select,
            select_single,
            where_,
            edges,
            groupby,
            sort,
            window,
            limit,
            format,
            fingerprint: fingerprint(jx),
        };
        debug!(fingerprint = %query.fingerprint, format = query.format.name(), "normalized query");
        Ok(query)
    }

    /// `true` when any select column aggregates.
    pub fn is_aggregate(&self) -> bool {
        self.select.iter().any(|s| s.aggregate != Aggregate::None)
    }
}

struct Normalizer<'a> {
    schema: &'a dyn Schema,
    query_path: String,
}

/// Where a variable may live relative to the query path.
#[derive(Clone, Copy, PartialEq)]
enum Depth {
    /// The query path or one of its ancestors.
    Shallow,
    /// Also anywhere beneath the query path.
    Deep,
}

fn name_of(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn direction(value: &Value) -> Result<i8> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(d) if d > 0 => Ok(1),
            Some(d) if d < 0 => Ok(-1),
            Some(_) => Ok(0),
            None => Err(JxError::parse(format!("Bad sort direction {n}"))),
        },
        Value::String(s) => match s.as_str() {
            "asc" | "ascending" => Ok(1),
            "desc" | "descending" => Ok(-1),
            "none" => Ok(0),
            other => Err(JxError::parse(format!("Bad sort direction {other:?}"))),
        },
        Value::Null => Ok(1),
        other => Err(JxError::parse(format!("Bad sort direction {other}"))),
    }
}

/// Numeric aggregates over a polymorphic field read only its number column.
fn numeric_only(value: Expr) -> Expr {
    let Some(alts) = value.alternatives() else {
        return value;
    };
    let mut numbers: Vec<Expr> = alts
        .iter()
        .filter(|t| t.data_type().is_numeric())
        .cloned()
        .collect();
    match numbers.len() {
        0 => Expr::Null,
        1 => numbers.remove(0),
        _ => Expr::Coalesce(numbers),
    }
}

fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

impl Normalizer<'_> {
    fn has_columns(&self, path: &str) -> bool {
        match self.schema.types_at(path) {
            None => true,
            Some(types) => {
                !types.is_empty() || self.schema.is_nested(path) || self.schema.has_descendants(path)
            }
        }
    }

    /// Full path for a path written from the query perspective.
    fn resolve_path(&self, path: &str) -> Result<String> {
        if path == "." {
            return Ok(".".to_string());
        }
        let mut perspective = split_field(&self.query_path);
        loop {
            let candidate = concat_field(&join_field(&perspective), path);
            if self.has_columns(&candidate) {
                return Ok(candidate);
            }
            if perspective.pop().is_none() {
                break;
            }
        }
        Err(JxError::Schema(format!(
            "No column {path:?} reachable from {:?}",
            self.query_path
        )))
    }

    fn check_depth(&self, path: &str, depth: Depth) -> Result<()> {
        if path == "." {
            return Ok(());
        }
        let nested = self.schema.nested_path_of(path);
        let shallow = starts_with_field(&self.query_path, &nested);
        let deep = starts_with_field(&nested, &self.query_path);
        if shallow || (depth == Depth::Deep && deep) {
            Ok(())
        } else {
            Err(JxError::DepthMismatch {
                path: path.to_string(),
                query_path: self.query_path.clone(),
            })
        }
    }

    /// Parse, resolve and simplify one expression.
    fn expr(&self, value: &Value, depth: Depth) -> Result<Expr> {
        let parsed = Expr::from_json(value)?;
        let mut renames = HashMap::new();
        for path in parsed.vars() {
            let full = self.resolve_path(&path)?;
            self.check_depth(&full, depth)?;
            if full != path {
                renames.insert(path, full);
            }
        }
        let resolved = if renames.is_empty() {
            parsed
        } else {
            parsed.map(&renames)
        };
        Ok(resolved.partial_eval_with(self.schema))
    }

    fn boolean(&self, value: &Value) -> Result<Expr> {
        let e = self.expr(value, Depth::Deep)?;
        let e = Expr::Convert(JsonType::Boolean, Box::new(e)).partial_eval_with(self.schema);
        debug!(where_ = %e.to_json(), "normalized where");
        Ok(e)
    }

    fn select(&self, value: &Value) -> Result<(Vec<SelectColumn>, bool)> {
        let single = !value.is_array();
        let columns = as_list(value)
            .into_iter()
            .map(|v| self.select_column(v))
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(JxError::parse("select list is empty"));
        }
        Ok((columns, single))
    }

    fn select_column(&self, value: &Value) -> Result<SelectColumn> {
        let column = |name: String, value: Expr| SelectColumn {
            name,
            value,
            aggregate: Aggregate::None,
            default: None,
            percentile: None,
        };
        match value {
            Value::String(s) if s == "." => Ok(column(ALL_COLUMNS.to_string(), var("."))),
            Value::String(s) if s == "*" => Ok(column("*".to_string(), Expr::Leaves(".".into()))),
            Value::String(s) => Ok(column(s.clone(), self.expr(value, Depth::Deep)?)),
            Value::Object(map) => {
                let aggregate = match map.get("aggregate") {
                    None => Aggregate::None,
                    Some(Value::String(a)) => Aggregate::from_name(a)
                        .ok_or_else(|| JxError::parse(format!("Unknown aggregate {a:?}")))?,
                    Some(other) => return Err(JxError::parse(format!("Bad aggregate {other}"))),
                };
                let name = match map.get("name") {
                    Some(n) => name_of(n).ok_or_else(|| JxError::parse("select name must be a string"))?,
                    None => match map.get("value") {
                        Some(Value::String(v)) if v != "." => v.clone(),
                        _ if aggregate != Aggregate::None => aggregate.name().to_string(),
                        _ => return Err(JxError::parse("select column requires a name")),
                    },
                };
                let raw = match map.get("value") {
                    Some(v) => v.clone(),
                    None if aggregate == Aggregate::Count => Value::from("."),
                    None => Value::from(name.clone()),
                };
                let value = match raw.as_str() {
                    Some(".") => var("."),
                    Some("*") => Expr::Leaves(".".into()),
                    _ => self.expr(&raw, Depth::Deep)?,
                };
                let value = if aggregate.is_numeric() { numeric_only(value) } else { value };
                let default = match map.get("default") {
                    Some(d) => Some(d.clone()),
                    None if aggregate == Aggregate::Count => Some(Value::from(0)),
                    None => None,
                };
                let percentile = match aggregate {
                    Aggregate::Percentile => Some(
                        map.get("percentile").and_then(Value::as_f64).unwrap_or(0.5),
                    ),
                    _ => None,
                };
                if let Some(p) = percentile {
                    if !(0.0..=1.0).contains(&p) {
                        return Err(JxError::Domain(format!("percentile {p} outside [0, 1]")));
                    }
                }
                Ok(SelectColumn {
                    name,
                    value,
                    aggregate,
                    default,
                    percentile,
                })
            }
            other => Err(JxError::parse(format!("Bad select column {other}"))),
        }
    }

    /// Shared shape of `edges` and `groupby` entries.
    fn name_and_value<'v>(
        &self,
        value: &'v Value,
        what: &str,
    ) -> Result<(String, Expr, Option<&'v Map<String, Value>>)> {
        match value {
            Value::String(s) => Ok((s.clone(), self.expr(value, Depth::Shallow)?, None)),
            Value::Object(map) => {
                let raw = map.get("value");
                let name = match (map.get("name"), raw) {
                    (Some(n), _) => name_of(n),
                    (None, Some(Value::String(v))) => Some(v.clone()),
                    _ => None,
                }
                .ok_or_else(|| JxError::parse(format!("{what} requires a name")))?;
                let expr = match raw {
                    Some(v) => self.expr(v, Depth::Shallow)?,
                    None => self.expr(&Value::from(name.clone()), Depth::Shallow)?,
                };
                Ok((name, expr, Some(map)))
            }
            other => Err(JxError::parse(format!("Bad {what} {other}"))),
        }
    }

    fn groupby(&self, value: &Value) -> Result<Vec<GroupBy>> {
        as_list(value)
            .into_iter()
            .map(|v| {
                let (name, value, _) = self.name_and_value(v, "groupby")?;
                Ok(GroupBy { name, value })
            })
            .collect()
    }

    fn edges(&self, value: &Value) -> Result<Vec<Edge>> {
        as_list(value)
            .into_iter()
            .map(|v| {
                let (name, value, options) = self.name_and_value(v, "edge")?;
                let domain = match options.and_then(|m| m.get("domain")) {
                    Some(d) => domain(d)?,
                    None => Domain::Default,
                };
                let allow_nulls = options
                    .and_then(|m| m.get("allowNulls"))
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                Ok(Edge {
                    name,
                    value,
                    domain,
                    allow_nulls,
                })
            })
            .collect()
    }

    fn sort(
        &self,
        value: &Value,
        select: &[SelectColumn],
        groupby: &[GroupBy],
        edges: &[Edge],
    ) -> Result<Vec<SortKey>> {
        let output = |name: &str| -> Option<Expr> {
            select
                .iter()
                .find(|s| s.name == name && s.aggregate != Aggregate::None)
                .map(|s| s.value.clone())
                .or_else(|| groupby.iter().find(|g| g.name == name).map(|g| g.value.clone()))
                .or_else(|| edges.iter().find(|e| e.name == name).map(|e| e.value.clone()))
        };
        let key = |field: &Value, dir: i8| -> Result<SortKey> {
            if let Some(name) = field.as_str() {
                if let Some(value) = output(name) {
                    return Ok(SortKey {
                        value,
                        direction: dir,
                        column: Some(name.to_string()),
                    });
                }
            }
            Ok(SortKey {
                value: self.expr(field, Depth::Shallow)?,
                direction: dir,
                column: None,
            })
        };

        let mut out = Vec::new();
        for item in as_list(value) {
            match item {
                Value::String(_) => out.push(key(item, 1)?),
                Value::Object(map) if map.contains_key("value") => {
                    let dir = direction(map.get("sort").unwrap_or(&Value::Null))?;
                    out.push(key(&map["value"], dir)?);
                }
                Value::Object(map) if map.len() == 1 => {
                    for (field, dir) in map {
                        out.push(key(&Value::from(field.clone()), direction(dir)?)?);
                    }
                }
                other => return Err(JxError::parse(format!("Bad sort {other}"))),
            }
        }
        Ok(out)
    }

    fn windows(&self, value: &Value) -> Result<Vec<Window>> {
        let mut out = Vec::new();
        for item in as_list(value) {
            let map = item
                .as_object()
                .ok_or_else(|| JxError::parse("window must be an object"))?;
            let name = map
                .get("name")
                .and_then(name_of)
                .ok_or_else(|| JxError::parse("window requires a name"))?;
            let value = match map.get("value") {
                Some(Value::String(s)) if s == "rownum" => None,
                Some(v) => Some(self.expr(v, Depth::Shallow)?),
                None => return Err(JxError::parse("window requires a value")),
            };
            let aggregate = match map.get("aggregate").and_then(Value::as_str) {
                Some(a) => Aggregate::from_name(a)
                    .ok_or_else(|| JxError::parse(format!("Unknown aggregate {a:?}")))?,
                None => Aggregate::None,
            };
            let value = match value {
                Some(v) if aggregate.is_numeric() => Some(numeric_only(v)),
                other => other,
            };
            let edges = match map.get("edges") {
                Some(v) => as_list(v)
                    .into_iter()
                    .map(|e| self.expr(e, Depth::Shallow))
                    .collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };
            let sort = match map.get("sort") {
                Some(v) => self.sort(v, &[], &[], &[])?,
                None => Vec::new(),
            };
            let range = match map.get("range") {
                Some(Value::Object(r)) => Some((
                    r.get("min").and_then(Value::as_i64),
                    r.get("max").and_then(Value::as_i64),
                )),
                Some(other) => return Err(JxError::parse(format!("Bad window range {other}"))),
                None => None,
            };
            out.push(Window {
                name,
                value,
                aggregate,
                edges,
                sort,
                range,
            });
        }
        Ok(out)
    }
}

fn domain_field<'a>(map: &'a Map<String, Value>, kind: &str, key: &str) -> Result<&'a Value> {
    map.get(key)
        .ok_or_else(|| JxError::Domain(format!("{kind} domain requires {key}")))
}

fn domain(value: &Value) -> Result<Domain> {
    let map = value
        .as_object()
        .ok_or_else(|| JxError::Domain(format!("Bad domain {value}")))?;
    let kind = map.get("type").and_then(Value::as_str).unwrap_or("default");
    let number = |key: &str| -> Result<f64> {
        map.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| JxError::Domain(format!("{kind} domain requires numeric {key}")))
    };
    let checked = |min: f64, max: f64, interval: f64| -> Result<()> {
        if min >= max {
            return Err(JxError::Domain(format!("{kind} domain has min {min} >= max {max}")));
        }
        if interval <= 0.0 {
            return Err(JxError::Domain(format!("{kind} domain has interval {interval}")));
        }
        Ok(())
    };
    match kind {
        "default" => Ok(Domain::Default),
        "set" => {
            let partitions = match map.get("partitions") {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|p| match p {
                        Value::Object(o) if o.contains_key("value") => o["value"].clone(),
                        other => other.clone(),
                    })
                    .collect(),
                _ => return Err(JxError::Domain("set domain requires partitions".into())),
            };
            Ok(Domain::Set { partitions })
        }
        "range" => {
            let (min, max, interval) = (number("min")?, number("max")?, number("interval")?);
            checked(min, max, interval)?;
            Ok(Domain::Range { min, max, interval })
        }
        "time" => {
            let min = parse_date(domain_field(map, kind, "min")?)?;
            let max = parse_date(domain_field(map, kind, "max")?)?;
            let interval = duration_value(domain_field(map, kind, "interval")?)?;
            checked(min, max, interval)?;
            Ok(Domain::Time { min, max, interval })
        }
        "duration" => {
            let min = duration_value(domain_field(map, kind, "min")?)?;
            let max = duration_value(domain_field(map, kind, "max")?)?;
            let interval = duration_value(domain_field(map, kind, "interval")?)?;
            checked(min, max, interval)?;
            Ok(Domain::Duration { min, max, interval })
        }
        other => Err(JxError::Domain(format!("Unknown domain type {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Untyped;
    use crate::ErrorKind;
    use serde_json::json;

    /// `t` with `{a: number, b: string, c: [{d: number}]}`.
    struct T;

    impl Schema for T {
        fn fact(&self) -> &str {
            "t"
        }
        fn types_at(&self, path: &str) -> Option<Vec<JsonType>> {
            Some(match path {
                "a" | "c.d" => vec![JsonType::Number],
                "b" => vec![JsonType::String],
                "c" => vec![JsonType::Nested],
                _ => vec![],
            })
        }
        fn is_nested(&self, path: &str) -> bool {
            path == "c"
        }
        fn nested_path_of(&self, path: &str) -> String {
            if starts_with_field(path, "c") {
                "c".into()
            } else {
                ".".into()
            }
        }
    }

    fn normalize(jx: Value) -> Result<Query> {
        Query::normalize(&jx, &T)
    }

    #[test]
    fn test_defaults() {
        let q = normalize(json!({"from": "t"})).unwrap();
        assert_eq!(q.select[0].name, ALL_COLUMNS);
        assert_eq!(q.limit, DEFAULT_LIMIT);
        assert_eq!(q.format, Format::List);
        assert_eq!(q.where_, Expr::True);

        let q = normalize(json!({"from": "t", "groupby": "b"})).unwrap();
        assert_eq!(q.select[0].name, "count");
        assert_eq!(q.select[0].aggregate, Aggregate::Count);
        assert_eq!(q.select[0].default, Some(json!(0)));

        let q = normalize(json!({"from": "t", "edges": ["b"]})).unwrap();
        assert_eq!(q.format, Format::Cube);
        assert!(q.edges[0].allow_nulls);
        assert_eq!(q.edges[0].domain, Domain::Default);
    }

    #[test]
    fn test_nested_perspective_resolves_relative_paths() {
        let q = normalize(json!({"from": "t.c", "select": ["d", "a"]})).unwrap();
        assert_eq!(q.query_path, "c");
        let vars: Vec<_> = q.select.iter().flat_map(|s| s.value.vars()).collect();
        assert_eq!(vars, vec!["c.d".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_where_is_boolean() {
        let q = normalize(json!({"from": "t", "where": {"eq": {"b": "x"}}})).unwrap();
        assert_eq!(q.where_.data_type(), JsonType::Boolean);
        let q = normalize(json!({"from": "t", "where": "a"})).unwrap();
        assert_eq!(q.where_.data_type(), JsonType::Boolean);
    }

    #[test]
    fn test_sort_forms() {
        let q = normalize(json!({
            "from": "t",
            "sort": ["a", {"b": "desc"}, {"value": "a", "sort": 0}]
        }))
        .unwrap();
        let dirs: Vec<i8> = q.sort.iter().map(|s| s.direction).collect();
        assert_eq!(dirs, vec![1, -1, 0]);

        let q = normalize(json!({
            "from": "t",
            "groupby": "b",
            "select": {"name": "n", "value": ".", "aggregate": "count"},
            "sort": {"n": -1}
        }))
        .unwrap();
        assert_eq!(q.sort[0].column.as_deref(), Some("n"));
    }

    #[test]
    fn test_errors() {
        let kind = |jx: Value| normalize(jx).unwrap_err().kind();
        assert_eq!(kind(json!({"from": "t", "select": "zz"})), ErrorKind::SchemaError);
        assert_eq!(kind(json!({"from": "t", "groupby": "c.d"})), ErrorKind::DepthMismatch);
        assert_eq!(
            kind(json!({"from": "t", "edges": ["b"], "groupby": ["b"]})),
            ErrorKind::ParseError
        );
        assert_eq!(kind(json!({"from": "t", "limit": -1})), ErrorKind::ParseError);
        assert_eq!(kind(json!({"from": "t", "bogus": 1})), ErrorKind::ParseError);
        assert_eq!(
            kind(json!({"from": "t", "edges": [{"name": "a", "value": "a",
                "domain": {"type": "range", "min": 5, "max": 5, "interval": 1}}]})),
            ErrorKind::DomainError
        );
        assert_eq!(
            kind(json!({"from": "t", "select": {"value": "a", "aggregate": "mode"}})),
            ErrorKind::ParseError
        );
    }

    #[test]
    fn test_deep_references_allowed_in_select_and_where() {
        let q = normalize(json!({
            "from": "t",
            "select": {"name": "s", "value": "c.d", "aggregate": "sum"}
        }))
        .unwrap();
        assert!(q.is_aggregate());
        assert!(q.select_single);
        assert!(normalize(json!({"from": "t", "where": {"missing": "c.d"}})).is_ok());
    }

    #[test]
    fn test_domains() {
        let d = domain(&json!({"type": "range", "min": 0, "max": 10, "interval": 3})).unwrap();
        assert_eq!(d.interval_count(), Some(4));
        let d = domain(&json!({"type": "time", "min": "1970-01-01", "max": "1970-01-08", "interval": "day"}))
            .unwrap();
        assert_eq!(d.interval_count(), Some(7));
        let d = domain(&json!({"type": "set", "partitions": ["x", {"value": "y"}]})).unwrap();
        assert_eq!(d, Domain::Set { partitions: vec![json!("x"), json!("y")] });
    }

    #[test]
    fn test_untyped_schema_accepts_any_path() {
        let q = Query::normalize(&json!({"from": "anything", "select": "x.y"}), &Untyped).unwrap();
        assert_eq!(q.fact, "anything");
        assert_eq!(q.select[0].value.vars().into_iter().next().unwrap(), "x.y");
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let jx = json!({"from": "t", "select": "a"});
        assert_eq!(fingerprint(&jx), fingerprint(&jx.clone()));
        assert_eq!(fingerprint(&jx).len(), 64);
    }
}
