//! Expression translation
//!
//! A [`Scope`] translates simplified expressions as seen from one nested
//! path. Columns at that path or above are plain column references. Anything
//! deeper becomes a correlated subquery: predicates test `EXISTS`, values
//! collect into an ordered list.

use jx_ir::expr::{Binary, BinaryOp, Concat, Find, Multi, MultiOp, SideOp};
use jx_ir::types::{relative_field, starts_with_field, typed_column};
use jx_ir::{Expr, JsonType, Schema, Variable};
use jx_snowflake::{Column, Snowflake, ORDER, PARENT, UID};
use serde_json::Value;

use crate::sql::Sql;
use crate::{sql, CompileError, Result};

/// Table alias for a nested path; one per nesting depth.
pub fn alias(snowflake: &Snowflake, nested_path: &str) -> Sql {
    let depth = snowflake.nested_path_list(nested_path).len().saturating_sub(1);
    Sql::quote_column(&format!("__t{depth}"))
}

fn unsupported(what: impl Into<String>) -> CompileError {
    CompileError::Unsupported(what.into())
}

pub(crate) fn is_value_column(c: &Column) -> bool {
    c.is_physical() && c.json_type != JsonType::Exists
}

/// Integral doubles print without a fractional part, like JSON numbers.
pub(crate) fn number_text(n: &Sql) -> Sql {
    sql!(
        "CASE WHEN {} = TRUNC({}) AND ABS({}) < 1e15 THEN CAST(CAST({} AS BIGINT) AS VARCHAR) ELSE CAST({} AS VARCHAR) END",
        n,
        n,
        n,
        n,
        n
    )
}

fn cast(value: Sql, from: JsonType, to: JsonType) -> Sql {
    match (from, to) {
        (f, t) if f.storage() == t.storage() => value,
        (JsonType::Number | JsonType::Integer, JsonType::Number | JsonType::Integer) => value,
        (JsonType::Number | JsonType::Integer, _) => number_text(&value),
        (JsonType::Boolean, JsonType::Number | JsonType::Integer) => {
            sql!("CAST({} AS INTEGER)", value)
        }
        (_, JsonType::Number | JsonType::Integer) => sql!("TRY_CAST({} AS DOUBLE)", value),
        (JsonType::Boolean, _) => {
            sql!("CASE WHEN {} THEN 'true' WHEN NOT {} THEN 'false' END", value, value)
        }
        _ => sql!("CAST({} AS VARCHAR)", value),
    }
}

#[derive(Debug, Clone)]
pub struct Scope<'a> {
    snowflake: &'a Snowflake,
    path: String,
}

impl<'a> Scope<'a> {
    pub fn new(snowflake: &'a Snowflake, path: &str) -> Self {
        Scope {
            snowflake,
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn snowflake(&self) -> &'a Snowflake {
        self.snowflake
    }

    pub fn alias(&self) -> Sql {
        alias(self.snowflake, &self.path)
    }

    pub fn table(&self, nested_path: &str) -> Sql {
        Sql::quote_column(&self.snowflake.table_name(nested_path))
    }

    /// The scope's table joined to its ancestors, root first.
    pub fn from_clause(&self) -> Sql {
        let mut chain = self.snowflake.nested_path_list(&self.path);
        chain.reverse();
        let mut out = sql!("{} {}", self.table("."), alias(self.snowflake, "."));
        for pair in chain.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            let child_alias = alias(self.snowflake, child);
            out = sql!(
                "{} JOIN {} {} ON {} = {}",
                out,
                self.table(child),
                child_alias,
                Sql::qualified(&child_alias, PARENT),
                Sql::qualified(&alias(self.snowflake, parent), UID)
            );
        }
        out
    }

    /// Nested paths strictly below the scope on the way to `deep`, shallowest first.
    fn chain_to(&self, deep: &str) -> Vec<String> {
        let mut chain: Vec<String> = self
            .snowflake
            .nested_path_list(deep)
            .into_iter()
            .filter(|n| n != &self.path && starts_with_field(n, &self.path))
            .collect();
        chain.reverse();
        chain
    }

    /// `FROM`, correlation predicate and sibling order keys of a subquery
    /// reaching from the scope down to `deep`.
    fn correlated_from(&self, deep: &str) -> (Sql, Sql, Vec<Sql>) {
        let chain = self.chain_to(deep);
        let mut from = Sql::default();
        let mut orders = Vec::new();
        let mut previous = self.path.clone();
        for (i, nested) in chain.iter().enumerate() {
            let a = alias(self.snowflake, nested);
            if i == 0 {
                from = sql!("{} {}", self.table(nested), a);
            } else {
                from = sql!(
                    "{} JOIN {} {} ON {} = {}",
                    from,
                    self.table(nested),
                    a,
                    Sql::qualified(&a, PARENT),
                    Sql::qualified(&alias(self.snowflake, &previous), UID)
                );
            }
            orders.push(Sql::qualified(&a, ORDER));
            previous = nested.clone();
        }
        let correlation = match chain.first() {
            Some(first) => sql!(
                "{} = {}",
                Sql::qualified(&alias(self.snowflake, first), PARENT),
                Sql::qualified(&self.alias(), UID)
            ),
            None => sql!("TRUE"),
        };
        (from, correlation, orders)
    }

    fn homes(&self, e: &Expr, out: &mut Vec<String>) {
        match e {
            Expr::Missing(x) => match &**x {
                Expr::Variable(v) if v.json_type == JsonType::Nested => {
                    out.push(self.snowflake.parent_nested_path(&v.path))
                }
                other => self.homes(other, out),
            },
            Expr::Variable(v) if v.path == "." => {}
            Expr::Variable(v) => out.push(self.snowflake.nested_path_of(&v.path)),
            Expr::Leaves(p) | Expr::Rows(p, _) if p != "." => {
                out.push(self.snowflake.nested_path_of(p))
            }
            other => {
                for child in other.children() {
                    self.homes(child, out);
                }
            }
        }
    }

    /// Deepest nested path below the scope that `e` reads, if any.
    pub fn deep_path(&self, e: &Expr) -> Result<Option<String>> {
        let mut homes = Vec::new();
        self.homes(e, &mut homes);
        let mut deepest: Option<String> = None;
        for home in homes {
            if home == self.path || !starts_with_field(&home, &self.path) {
                if !starts_with_field(&self.path, &home) {
                    return Err(CompileError::CrossBranch(home, self.path.clone()));
                }
                continue;
            }
            deepest = match deepest {
                None => Some(home),
                Some(d) if starts_with_field(&home, &d) => Some(home),
                Some(d) if starts_with_field(&d, &home) => Some(d),
                Some(d) => return Err(CompileError::CrossBranch(d, home)),
            };
        }
        Ok(deepest)
    }

    /// `true` when `e` yields a list per row rather than a single value.
    pub fn is_list(&self, e: &Expr) -> Result<bool> {
        Ok(e.data_type() != JsonType::Boolean && self.deep_path(e)?.is_some())
    }

    pub fn expr(&self, e: &Expr) -> Result<Sql> {
        match e {
            Expr::And(terms) => self.connective(" AND ", "TRUE", terms),
            Expr::Or(terms) => self.connective(" OR ", "FALSE", terms),
            Expr::Not(x) => Ok(sql!("(NOT {})", self.expr(x)?)),
            Expr::First(x) if self.is_list(x)? => Ok(sql!("{}[1]", self.expr(x)?)),
            Expr::Last(x) if self.is_list(x)? => Ok(sql!("{}[-1]", self.expr(x)?)),
            _ => match self.deep_path(e)? {
                Some(deep) => self.correlated(e, &deep),
                None => self.shallow(e),
            },
        }
    }

    fn connective(&self, op: &'static str, empty: &'static str, terms: &[Expr]) -> Result<Sql> {
        if terms.is_empty() {
            return Ok(Sql::from(empty));
        }
        let parts = terms
            .iter()
            .map(|t| self.expr(t))
            .collect::<Result<Vec<_>>>()?;
        Ok(sql!("({})", Sql::join(op, parts)))
    }

    fn correlated(&self, e: &Expr, deep: &str) -> Result<Sql> {
        let inner = Scope::new(self.snowflake, deep);
        let (from, correlation, orders) = self.correlated_from(deep);
        if matches!(e, Expr::Missing(_)) {
            return Ok(sql!(
                "(NOT EXISTS (SELECT 1 FROM {} WHERE {} AND NOT {}))",
                from,
                correlation,
                inner.expr(e)?
            ));
        }
        if e.data_type() == JsonType::Boolean {
            return Ok(sql!(
                "EXISTS (SELECT 1 FROM {} WHERE {} AND {})",
                from,
                correlation,
                inner.expr(e)?
            ));
        }
        let value = inner.expr(e)?;
        Ok(sql!(
            "(SELECT list({} ORDER BY {}) FILTER (WHERE {} IS NOT NULL) FROM {} WHERE {})",
            value,
            Sql::join(", ", orders),
            value,
            from,
            correlation
        ))
    }

    fn shallow(&self, e: &Expr) -> Result<Sql> {
        use Expr::*;
        Ok(match e {
            Null => sql!("NULL"),
            True => sql!("TRUE"),
            False => sql!("FALSE"),
            Literal(v) => Sql::quote_value(v),
            Date(d) => Sql::float(*d),
            Variable(v) => self.variable(v)?,
            Script(text) => Sql::script(text),
            Offset(i) => return Err(unsupported(format!("offset {i} outside a tuple"))),
            Rows(path, offset) => self.rows(path, *offset)?,
            And(_) | Or(_) | Not(_) => self.expr(e)?,

            When(w) => sql!(
                "CASE WHEN {} THEN {} ELSE {} END",
                self.expr(&w.cond)?,
                self.expr(&w.then)?,
                self.expr(&w.els)?
            ),
            Case(c) => {
                let whens = c
                    .whens
                    .iter()
                    .map(|(cond, value)| {
                        Ok(sql!("WHEN {} THEN {}", self.expr(cond)?, self.expr(value)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                sql!(
                    "CASE {} ELSE {} END",
                    Sql::join(" ", whens),
                    self.expr(&c.default)?
                )
            }

            Eq(a, b) => sql!("({} IS NOT DISTINCT FROM {})", self.expr(a)?, self.expr(b)?),
            Ne(a, b) => sql!("({} IS DISTINCT FROM {})", self.expr(a)?, self.expr(b)?),
            Inequality(op, a, b) => sql!(
                "COALESCE({} {} {}, FALSE)",
                self.expr(a)?,
                Sql::from(op.sql()),
                self.expr(b)?
            ),
            In(x, set) => self.membership(x, set)?,
            Range(x, bounds) => {
                let x = self.expr(x)?;
                let terms = bounds
                    .iter()
                    .map(|(op, b)| {
                        Ok(sql!("COALESCE({} {} {}, FALSE)", x, Sql::from(op.sql()), self.expr(b)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                sql!("({})", Sql::join(" AND ", terms))
            }

            Missing(x) => self.missing(x)?,
            Exists(x) => sql!("(NOT {})", self.missing(x)?),
            Coalesce(terms) if terms.is_empty() => sql!("NULL"),
            Coalesce(terms) => {
                let target = e.data_type().storage();
                let parts = terms
                    .iter()
                    .map(|t| {
                        let value = self.expr(t)?;
                        let from = t.data_type();
                        Ok(if from.is_scalar() && target.is_scalar() {
                            cast(value, from, target)
                        } else {
                            value
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                sql!("COALESCE({})", Sql::join(", ", parts))
            }
            First(x) | Last(x) => self.expr(x)?,
            Convert(t, x) => self.convert(*t, x)?,
            IsType(t, x) => self.is_type(*t, x)?,

            Binary(b) => self.binary(b)?,
            Multi(m) => self.multi(m)?,
            Min(terms) => self.extreme(terms, false)?,
            Max(terms) => self.extreme(terms, true)?,
            Count(terms) if terms.is_empty() => sql!("0"),
            Count(terms) => {
                let parts = terms
                    .iter()
                    .map(|t| Ok(sql!("CASE WHEN {} IS NULL THEN 0 ELSE 1 END", self.expr(t)?)))
                    .collect::<Result<Vec<_>>>()?;
                sql!("({})", Sql::join(" + ", parts))
            }

            Length(x) => sql!("LENGTH({})", self.text(x)?),
            Concat(c) => self.concat(c)?,
            Side(op, v, n) => self.side(*op, v, n)?,
            Find(f) => self.find(f)?,
            Split(v, sep) => sql!("string_split({}, {})", self.text(v)?, self.text(sep)?),
            Prefix(v, p) => {
                let p = self.text(p)?;
                sql!("COALESCE(starts_with({}, {}), {} IS NULL)", self.text(v)?, p, p)
            }
            Suffix(v, s) => {
                let s = self.text(s)?;
                sql!("COALESCE(ends_with({}, {}), {} IS NULL)", self.text(v)?, s, s)
            }
            RegExp(v, pattern) => sql!(
                "COALESCE(regexp_full_match({}, {}), FALSE)",
                self.text(v)?,
                Sql::quote_value(&Value::String(pattern.clone()))
            ),
            Between(_) => {
                let lowered = e.partial_eval_with(self.snowflake);
                if &lowered == e {
                    return Err(unsupported("between"));
                }
                self.expr(&lowered)?
            }

            Tuple(terms) => sql!("[{}]", self.list(terms)?),
            Leaves(path) => {
                let path = if path == "." { self.path.clone() } else { path.clone() };
                self.document(&path)
            }
            Select(fields) => {
                let fields = fields
                    .iter()
                    .map(|(name, value)| Ok(sql!("{} := {}", Sql::quote_column(name), self.expr(value)?)))
                    .collect::<Result<Vec<_>>>()?;
                if fields.is_empty() {
                    sql!("NULL")
                } else {
                    sql!("struct_pack({})", Sql::join(", ", fields))
                }
            }
            Get(a, b) => sql!("{}[CAST({} AS BIGINT) + 1]", self.expr(a)?, self.expr(b)?),

            BasicEq(a, b) => sql!("({} = {})", self.expr(a)?, self.expr(b)?),
            BasicInequality(op, a, b) => {
                sql!("({} {} {})", self.expr(a)?, Sql::from(op.sql()), self.expr(b)?)
            }
            BasicIndexOf(v, needle, start) => self.index_of(v, needle, start)?,
            BasicSubstring(v, start, end) => {
                let start = sql!("GREATEST(CAST({} AS BIGINT), 0)", self.expr(start)?);
                let end = sql!("CAST({} AS BIGINT)", self.expr(end)?);
                sql!(
                    "substr({}, {} + 1, GREATEST({} - {}, 0))",
                    self.text(v)?,
                    start,
                    end,
                    start
                )
            }
        })
    }

    fn list(&self, terms: &[Expr]) -> Result<Sql> {
        let parts = terms
            .iter()
            .map(|t| self.expr(t))
            .collect::<Result<Vec<_>>>()?;
        Ok(Sql::join(", ", parts))
    }

    /// Stored value columns at `path`, in type order.
    fn value_columns(&self, path: &str) -> Vec<&'a Column> {
        let mut columns: Vec<&Column> = self
            .snowflake
            .columns_at(path)
            .into_iter()
            .filter(|c| is_value_column(c))
            .collect();
        columns.sort_by_key(|c| c.json_type);
        columns
    }

    fn column(&self, column: &Column) -> Sql {
        Sql::qualified(&alias(self.snowflake, column.home()), &column.es_column)
    }

    fn variable(&self, v: &Variable) -> Result<Sql> {
        if v.path == "." {
            return Ok(self.document(&self.path));
        }
        if matches!(v.json_type, JsonType::Nested | JsonType::Object) {
            return Ok(self.document(&v.path));
        }
        let columns = self.value_columns(&v.path);
        let target = v.json_type.storage();
        if let Some(exact) = columns.iter().find(|c| c.json_type == target) {
            return Ok(self.column(exact));
        }
        match columns.as_slice() {
            [] if self.snowflake.has_descendants(&v.path) => Ok(self.document(&v.path)),
            [] => Ok(sql!("NULL")),
            many => Ok(self.merged(many, target)),
        }
    }

    /// Every typed column of one field, cast to `target` and coalesced.
    fn merged(&self, columns: &[&Column], target: JsonType) -> Sql {
        let mut parts: Vec<Sql> = columns
            .iter()
            .map(|c| cast(self.column(c), c.json_type, target))
            .collect();
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            sql!("COALESCE({})", Sql::join(", ", parts))
        }
    }

    /// Every stored value at or under `path` as a struct keyed by typed
    /// relative names; child tables become lists of such structs.
    pub fn document(&self, path: &str) -> Sql {
        let home = self.snowflake.nested_path_of(path);
        let mut fields = Vec::new();
        for c in self.snowflake.columns() {
            if is_value_column(c) && c.home() == home && starts_with_field(&c.name, path) {
                let name = typed_column(&relative_field(&c.name, path), c.json_type);
                fields.push(sql!("{} := {}", Sql::quote_column(&name), self.column(c)));
            }
        }
        for nested in self.snowflake.nested_paths() {
            if nested != path
                && starts_with_field(&nested, path)
                && self.snowflake.parent_nested_path(&nested) == home
            {
                let name = typed_column(&relative_field(&nested, path), JsonType::Nested);
                fields.push(sql!("{} := {}", Sql::quote_column(&name), self.nested_list(&nested)));
            }
        }
        if fields.is_empty() {
            sql!("NULL")
        } else {
            sql!("struct_pack({})", Sql::join(", ", fields))
        }
    }

    /// Ordered list of documents in the child table at `nested`, for the
    /// current parent row.
    fn nested_list(&self, nested: &str) -> Sql {
        let parent = self.snowflake.parent_nested_path(nested);
        let a = alias(self.snowflake, nested);
        let inner = Scope::new(self.snowflake, nested);
        sql!(
            "(SELECT list({} ORDER BY {}) FROM {} {} WHERE {} = {})",
            inner.document(nested),
            Sql::qualified(&a, ORDER),
            self.table(nested),
            a,
            Sql::qualified(&a, PARENT),
            Sql::qualified(&alias(self.snowflake, &parent), UID)
        )
    }

    fn rows(&self, path: &str, offset: i64) -> Result<Sql> {
        let value = match self.value_columns(path).as_slice() {
            [] => self.variable(&Variable::typed(path, JsonType::String))?,
            [only] => self.column(only),
            many => self.merged(many, JsonType::String),
        };
        let order = Sql::qualified(&self.alias(), UID);
        Ok(match offset {
            0 => value,
            o if o > 0 => sql!("LEAD({}, {}) OVER (ORDER BY {})", value, Sql::int(o), order),
            o => sql!("LAG({}, {}) OVER (ORDER BY {})", value, Sql::int(-o), order),
        })
    }

    fn missing(&self, x: &Expr) -> Result<Sql> {
        let Expr::Variable(v) = x else {
            return Ok(sql!("({} IS NULL)", self.expr(x)?));
        };
        if v.path == "." {
            return Ok(sql!("FALSE"));
        }
        let columns: Vec<&Column> = match v.json_type {
            JsonType::Nested => self
                .snowflake
                .find(&v.path, JsonType::Exists)
                .into_iter()
                .collect(),
            t if t.is_scalar() && self.snowflake.find(&v.path, t.storage()).is_some() => self
                .snowflake
                .find(&v.path, t.storage())
                .into_iter()
                .collect(),
            _ => {
                let home = self.snowflake.nested_path_of(&v.path);
                self.snowflake
                    .columns()
                    .iter()
                    .filter(|c| {
                        c.is_physical()
                            && c.home() == home
                            && starts_with_field(&c.name, &v.path)
                            && (c.name == v.path || v.json_type == JsonType::Object)
                    })
                    .collect()
            }
        };
        if columns.is_empty() {
            return Ok(sql!("TRUE"));
        }
        let parts: Vec<Sql> = columns
            .iter()
            .map(|c| sql!("{} IS NULL", self.column(c)))
            .collect();
        Ok(sql!("({})", Sql::join(" AND ", parts)))
    }

    /// `x` as text, rendering numbers the way JSON does.
    fn text(&self, x: &Expr) -> Result<Sql> {
        let value = self.expr(x)?;
        Ok(match x.data_type() {
            JsonType::String | JsonType::Null => value,
            other => cast(value, other, JsonType::String),
        })
    }

    fn number(&self, x: &Expr) -> Result<Sql> {
        let value = self.expr(x)?;
        Ok(match x.data_type() {
            JsonType::Number | JsonType::Integer | JsonType::Null => value,
            other => cast(value, other, JsonType::Number),
        })
    }

    fn convert(&self, t: JsonType, x: &Expr) -> Result<Sql> {
        match t {
            JsonType::Boolean if x.data_type() == JsonType::Boolean => self.expr(x),
            JsonType::Boolean => Ok(sql!("(NOT {})", self.missing(x)?)),
            JsonType::Number => self.number(x),
            JsonType::Integer => Ok(sql!("TRUNC({})", self.number(x)?)),
            JsonType::String => self.text(x),
            _ => self.expr(x),
        }
    }

    fn is_type(&self, t: JsonType, x: &Expr) -> Result<Sql> {
        if let Expr::Variable(v) = x {
            let Some(column) = self
                .value_columns(&v.path)
                .into_iter()
                .find(|c| c.json_type == t.storage())
            else {
                return Ok(sql!("FALSE"));
            };
            let c = self.column(column);
            return Ok(match t {
                JsonType::Integer => sql!("({} IS NOT NULL AND {} = TRUNC({}))", c, c, c),
                _ => sql!("({} IS NOT NULL)", c),
            });
        }
        let matches = match (t, x.data_type()) {
            (JsonType::Number, JsonType::Integer) => true,
            (a, b) => a == b,
        };
        if matches {
            Ok(sql!("({} IS NOT NULL)", self.expr(x)?))
        } else {
            Ok(sql!("FALSE"))
        }
    }

    fn membership(&self, x: &Expr, set: &[Value]) -> Result<Sql> {
        let x_type = x.data_type();
        let compatible = |v: &Value| match v {
            Value::Null => false,
            Value::Number(_) => x_type.is_numeric() || !x_type.is_scalar(),
            Value::String(_) => x_type == JsonType::String || !x_type.is_scalar(),
            Value::Bool(_) => x_type == JsonType::Boolean || !x_type.is_scalar(),
            _ => !x_type.is_scalar(),
        };
        let values: Vec<Sql> = set
            .iter()
            .filter(|v| compatible(v))
            .map(Sql::quote_value)
            .collect();
        let has_null = set.iter().any(Value::is_null);
        let found = if values.is_empty() {
            sql!("FALSE")
        } else {
            sql!("COALESCE({} IN ({}), FALSE)", self.expr(x)?, Sql::join(", ", values))
        };
        if has_null {
            Ok(sql!("({} OR {})", self.missing(x)?, found))
        } else {
            Ok(found)
        }
    }

    fn binary(&self, b: &Binary) -> Result<Sql> {
        let (l, r) = (self.number(&b.lhs)?, self.number(&b.rhs)?);
        let raw = match b.op {
            BinaryOp::Sub => sql!("({} - {})", l, r),
            BinaryOp::Div => sql!("({} / NULLIF({}, 0))", l, r),
            BinaryOp::Mod => sql!("({} % NULLIF({}, 0))", l, r),
            BinaryOp::Exp => sql!("POWER({}, {})", l, r),
            BinaryOp::Floor => sql!("(FLOOR({} / NULLIF({}, 0)) * {})", l, r, r),
        };
        match b.default {
            Expr::Null => Ok(raw),
            ref d => Ok(sql!("COALESCE({}, {})", raw, self.expr(d)?)),
        }
    }

    fn multi(&self, m: &Multi) -> Result<Sql> {
        if m.terms.is_empty() {
            return self.expr(&m.default);
        }
        let op = match m.op {
            MultiOp::Add => " + ",
            MultiOp::Mul => " * ",
        };
        let terms = m
            .terms
            .iter()
            .map(|t| self.number(t))
            .collect::<Result<Vec<_>>>()?;
        let default = self.expr(&m.default)?;
        if m.nulls {
            let identity = Sql::float(m.op.identity());
            let all_missing: Vec<Sql> = terms.iter().map(|t| sql!("{} IS NULL", t)).collect();
            let padded: Vec<Sql> = terms
                .iter()
                .map(|t| sql!("COALESCE({}, {})", t, identity))
                .collect();
            return Ok(sql!(
                "CASE WHEN {} THEN {} ELSE ({}) END",
                Sql::join(" AND ", all_missing),
                default,
                Sql::join(op, padded)
            ));
        }
        let raw = sql!("({})", Sql::join(op, terms));
        match m.default {
            Expr::Null => Ok(raw),
            _ => Ok(sql!("COALESCE({}, {})", raw, default)),
        }
    }

    /// `LEAST`/`GREATEST` skipping missing terms: argument `i` is a
    /// `COALESCE` starting at term `i`, so it is null only when all are.
    fn extreme(&self, terms: &[Expr], greatest: bool) -> Result<Sql> {
        let terms = terms
            .iter()
            .map(|t| self.number(t))
            .collect::<Result<Vec<_>>>()?;
        match terms.len() {
            0 => return Ok(sql!("NULL")),
            1 => return Ok(terms[0].clone()),
            _ => {}
        }
        let rotated: Vec<Sql> = (0..terms.len())
            .map(|i| {
                let order = terms[i..].iter().chain(&terms[..i]);
                sql!("COALESCE({})", Sql::join(", ", order))
            })
            .collect();
        let args = Sql::join(", ", rotated);
        Ok(if greatest {
            sql!("GREATEST({})", args)
        } else {
            sql!("LEAST({})", args)
        })
    }

    fn concat(&self, c: &Concat) -> Result<Sql> {
        if c.terms.is_empty() {
            return self.expr(&c.default);
        }
        let terms = c
            .terms
            .iter()
            .map(|t| self.text(t))
            .collect::<Result<Vec<_>>>()?;
        let all_missing: Vec<Sql> = terms.iter().map(|t| sql!("{} IS NULL", t)).collect();
        Ok(sql!(
            "CASE WHEN {} THEN {} ELSE concat_ws({}, {}) END",
            Sql::join(" AND ", all_missing),
            self.expr(&c.default)?,
            Sql::quote_value(&Value::String(c.separator.clone())),
            Sql::join(", ", terms)
        ))
    }

    fn side(&self, op: SideOp, v: &Expr, n: &Expr) -> Result<Sql> {
        let v = self.text(v)?;
        let n = sql!("GREATEST(CAST({} AS BIGINT), 0)", self.expr(n)?);
        Ok(match op {
            SideOp::Left => sql!("left({}, {})", v, n),
            SideOp::Right => sql!("right({}, {})", v, n),
            SideOp::NotLeft => sql!("substr({}, {} + 1)", v, n),
            SideOp::NotRight => sql!("left({}, GREATEST(LENGTH({}) - {}, 0))", v, v, n),
        })
    }

    fn index_of(&self, v: &Expr, needle: &Expr, start: &Expr) -> Result<Sql> {
        let start = sql!("GREATEST(CAST({} AS BIGINT), 0)", self.expr(start)?);
        let position = sql!(
            "strpos(substr({}, {} + 1), {})",
            self.text(v)?,
            start,
            self.text(needle)?
        );
        Ok(sql!(
            "CASE WHEN {} = 0 THEN -1 ELSE {} + {} - 1 END",
            position,
            position,
            start
        ))
    }

    fn find(&self, f: &Find) -> Result<Sql> {
        let index = self.index_of(&f.value, &f.find, &f.start)?;
        Ok(sql!(
            "CASE WHEN {} IS NULL OR {} = -1 THEN {} ELSE {} END",
            index,
            index,
            self.expr(&f.default)?,
            index
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jx_ir::expr::build::*;

    fn snowflake() -> Snowflake {
        let mut s = Snowflake::new("t");
        s.add_column("a", JsonType::Number).unwrap();
        s.add_column("b", JsonType::String).unwrap();
        s.nest_column("c").unwrap();
        s.add_column("c.d", JsonType::Number).unwrap();
        s
    }

    fn typed(path: &str, t: JsonType) -> Expr {
        Expr::Variable(Variable::typed(path, t))
    }

    #[test]
    fn test_from_clause() {
        let s = snowflake();
        assert_eq!(Scope::new(&s, ".").from_clause().as_str(), r#""t" "__t0""#);
        assert_eq!(
            Scope::new(&s, "c").from_clause().as_str(),
            r#""t" "__t0" JOIN "t.c" "__t1" ON "__t1"."__parent__" = "__t0"."__id__""#
        );
    }

    #[test]
    fn test_shallow_predicates() {
        let s = snowflake();
        let scope = Scope::new(&s, ".");
        assert_eq!(
            scope.expr(&missing(typed("a", JsonType::Number))).unwrap().as_str(),
            r#"("__t0"."a.$n" IS NULL)"#
        );
        assert_eq!(
            scope
                .expr(&basic_eq(typed("b", JsonType::String), lit("x")))
                .unwrap()
                .as_str(),
            r#"("__t0"."b.$s" = 'x')"#
        );
        assert_eq!(scope.expr(&and(vec![])).unwrap().as_str(), "TRUE");
    }

    #[test]
    fn test_deep_missing_is_not_exists() {
        let s = snowflake();
        let sql = Scope::new(&s, ".")
            .expr(&missing(typed("c.d", JsonType::Number)))
            .unwrap();
        assert_eq!(
            sql.as_str(),
            r#"(NOT EXISTS (SELECT 1 FROM "t.c" "__t1" WHERE "__t1"."__parent__" = "__t0"."__id__" AND NOT ("__t1"."d.$n" IS NULL)))"#
        );
    }

    #[test]
    fn test_deep_value_is_ordered_list() {
        let s = snowflake();
        let sql = Scope::new(&s, ".")
            .expr(&typed("c.d", JsonType::Number))
            .unwrap();
        assert!(sql.as_str().starts_with(r#"(SELECT list("__t1"."d.$n" ORDER BY "__t1"."__order__")"#));
        assert!(Scope::new(&s, ".").is_list(&typed("c.d", JsonType::Number)).unwrap());
        assert!(!Scope::new(&s, "c").is_list(&typed("c.d", JsonType::Number)).unwrap());
    }

    #[test]
    fn test_parent_columns_from_child_scope() {
        let s = snowflake();
        let scope = Scope::new(&s, "c");
        assert_eq!(
            scope.expr(&typed("a", JsonType::Number)).unwrap().as_str(),
            r#""__t0"."a.$n""#
        );
        assert_eq!(
            scope.expr(&typed("c.d", JsonType::Number)).unwrap().as_str(),
            r#""__t1"."d.$n""#
        );
        assert_eq!(
            scope.expr(&missing(typed("c", JsonType::Nested))).unwrap().as_str(),
            r#"("__t0"."c.$e" IS NULL)"#
        );
    }

    #[test]
    fn test_cross_branch_is_rejected() {
        let mut s = snowflake();
        s.nest_column("e").unwrap();
        s.add_column("e.f", JsonType::Number).unwrap();
        let err = Scope::new(&s, "c")
            .expr(&typed("e.f", JsonType::Number))
            .unwrap_err();
        assert!(matches!(err, CompileError::CrossBranch(..)));
    }

    #[test]
    fn test_polymorphic_variable_reads_its_own_column() {
        let mut s = snowflake();
        s.add_column("a", JsonType::String).unwrap();
        let scope = Scope::new(&s, ".");
        assert_eq!(
            scope.expr(&typed("a", JsonType::String)).unwrap().as_str(),
            r#""__t0"."a.$s""#
        );
        assert_eq!(
            scope.expr(&missing(typed("a", JsonType::Number))).unwrap().as_str(),
            r#"("__t0"."a.$n" IS NULL)"#
        );
        let both = Expr::Coalesce(vec![typed("a", JsonType::Number), typed("a", JsonType::String)]);
        let sql = scope.expr(&both).unwrap();
        assert!(sql.as_str().starts_with("COALESCE(CASE WHEN"));
        assert!(sql.as_str().ends_with(r#", "__t0"."a.$s")"#));
    }

    #[test]
    fn test_document_struct() {
        let s = snowflake();
        let sql = Scope::new(&s, ".").document(".");
        assert!(sql.as_str().starts_with(r#"struct_pack("a.$n" := "__t0"."a.$n", "b.$s" := "__t0"."b.$s", "c.$N" := (SELECT list(struct_pack("d.$n" := "__t1"."d.$n") ORDER BY "__t1"."__order__")"#));
    }

    #[test]
    fn test_extreme_skips_missing() {
        let s = snowflake();
        let sql = Scope::new(&s, ".")
            .expr(&Expr::Min(vec![typed("a", JsonType::Number), lit(3)]))
            .unwrap();
        assert_eq!(
            sql.as_str(),
            r#"LEAST(COALESCE("__t0"."a.$n", 3), COALESCE(3, "__t0"."a.$n"))"#
        );
    }
}
