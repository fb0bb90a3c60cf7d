//! DDL and DML for schema changes, row batches and the column catalog

use jx_ir::JsonType;
use jx_snowflake::{Batch, Column, ColumnMove, SchemaChange, GUID, ORDER, PARENT, UID};
use jx_sql::{sql, Sql};
use serde_json::Value;

use crate::convert::to_param;
use crate::worker::Statement;

/// Rows per `INSERT` statement.
const INSERT_CHUNK: usize = 256;

pub(crate) const META_COLUMNS: &str = "meta.columns";

/// `meta.columns` fields, in record order.
pub(crate) const META_FIELDS: [&str; 10] = [
    "name",
    "es_column",
    "es_index",
    "json_type",
    "nested_path",
    "cardinality",
    "count",
    "multi",
    "partitions",
    "last_updated",
];

pub(crate) const CREATE_META: &str = "CREATE SCHEMA IF NOT EXISTS meta; \
     CREATE TABLE IF NOT EXISTS meta.columns (\
     name VARCHAR, es_column VARCHAR, es_index VARCHAR, json_type VARCHAR, \
     nested_path VARCHAR, cardinality BIGINT, count BIGINT, multi BIGINT, \
     partitions VARCHAR, last_updated DOUBLE)";

/// Storage type of a typed column.
pub(crate) fn sql_type(json_type: JsonType) -> &'static str {
    match json_type {
        JsonType::Boolean => "BOOLEAN",
        JsonType::Integer | JsonType::Number => "DOUBLE",
        JsonType::Exists => "INTEGER",
        _ => "VARCHAR",
    }
}

fn table(name: &str) -> Sql {
    Sql::quote_column(name)
}

fn add_column(table_name: &str, column: &str, json_type: JsonType) -> Statement {
    let text = sql!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table(table_name),
        Sql::quote_column(column),
        Sql::from(sql_type(json_type))
    );
    Statement::new(text.into_string())
}

/// Statements that change the schema. Data migrations come from
/// [`migrations`] and must run after every change of the same plan.
pub(crate) fn schema_change(change: &SchemaChange) -> Vec<Statement> {
    match change {
        SchemaChange::CreateTable { table: name, parent } => {
            let reserved = match parent {
                None => sql!(
                    "{} BIGINT, {} VARCHAR",
                    Sql::quote_column(UID),
                    Sql::quote_column(GUID)
                ),
                Some(_) => sql!(
                    "{} BIGINT, {} BIGINT, {} INTEGER",
                    Sql::quote_column(UID),
                    Sql::quote_column(PARENT),
                    Sql::quote_column(ORDER)
                ),
            };
            let text = sql!("CREATE TABLE IF NOT EXISTS {} ({})", table(name), reserved);
            vec![Statement::new(text.into_string())]
        }
        SchemaChange::AddColumn {
            table: name,
            column,
            json_type,
        } => vec![add_column(name, column, *json_type)],
        SchemaChange::NestColumn { child, moves, .. } => moves
            .iter()
            .map(|m| add_column(child, &m.to, m.json_type))
            .collect(),
    }
}

/// Row movement for a [`SchemaChange::NestColumn`]: every parent row with a
/// moved value, or with rows in a re-parented table, gets one child row
/// sharing its UID. Moved parent columns are cleared, not dropped.
pub(crate) fn migrations(change: &SchemaChange) -> Vec<Statement> {
    let SchemaChange::NestColumn {
        parent,
        child,
        exists,
        moves,
        reparent,
    } = change
    else {
        return Vec::new();
    };
    let mut conditions: Vec<Sql> = moves
        .iter()
        .map(|m| sql!("{} IS NOT NULL", Sql::quote_column(&m.from)))
        .collect();
    for grandchild in reparent {
        conditions.push(sql!(
            "{} IN (SELECT {} FROM {})",
            Sql::quote_column(UID),
            Sql::quote_column(PARENT),
            table(grandchild)
        ));
    }
    if conditions.is_empty() {
        return Vec::new();
    }
    let condition = Sql::join(" OR ", conditions);

    let targets = [UID, PARENT, ORDER]
        .into_iter()
        .map(Sql::quote_column)
        .chain(moves.iter().map(|m: &ColumnMove| Sql::quote_column(&m.to)));
    let sources = [
        Sql::quote_column(UID),
        Sql::quote_column(UID),
        Sql::from("0"),
    ]
    .into_iter()
    .chain(moves.iter().map(|m| Sql::quote_column(&m.from)));
    let copy = sql!(
        "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {}",
        table(child),
        Sql::join(", ", targets),
        Sql::join(", ", sources),
        table(parent),
        condition
    );

    let clear = std::iter::once(sql!("{} = 1", Sql::quote_column(exists)))
        .chain(moves.iter().map(|m| sql!("{} = NULL", Sql::quote_column(&m.from))));
    let update = sql!(
        "UPDATE {} SET {} WHERE {}",
        table(parent),
        Sql::join(", ", clear),
        condition
    );
    vec![
        Statement::new(copy.into_string()),
        Statement::new(update.into_string()),
    ]
}

/// Parameterized multi-row inserts for one batch.
pub(crate) fn insert(batch: &Batch) -> Vec<Statement> {
    if batch.rows.is_empty() || batch.columns.is_empty() {
        return Vec::new();
    }
    let columns = Sql::join(", ", batch.columns.iter().map(|c| Sql::quote_column(c)));
    let placeholder = format!("({})", vec!["?"; batch.columns.len()].join(", "));
    batch
        .rows
        .chunks(INSERT_CHUNK)
        .map(|rows| {
            let values = vec![placeholder.as_str(); rows.len()].join(", ");
            let text = format!(
                "INSERT INTO {} ({}) VALUES {}",
                table(&batch.table).as_str(),
                columns.as_str(),
                values
            );
            let params = rows.iter().flatten().map(to_param).collect();
            Statement::with_params(text, params)
        })
        .collect()
}

/// Upserts of catalog records, keyed by fact, logical path and type. The
/// delete spans the column's table chain so a nested move replaces the
/// parent's record.
pub(crate) fn catalog_records(columns: &[Column]) -> Vec<Statement> {
    let placeholders = vec!["?"; META_FIELDS.len()].join(", ");
    let mut out = Vec::with_capacity(columns.len() * 2);
    for column in columns {
        let record = column.to_record();
        let tables = column.tables();
        let mut params = vec![to_param(&record["name"]), to_param(&record["json_type"])];
        params.extend(tables.iter().map(|t| to_param(&Value::String(t.clone()))));
        out.push(Statement::with_params(
            format!(
                "DELETE FROM {META_COLUMNS} WHERE name = ? AND json_type = ? AND es_index IN ({})",
                vec!["?"; tables.len()].join(", ")
            ),
            params,
        ));
        out.push(Statement::with_params(
            format!(
                "INSERT INTO {META_COLUMNS} ({}) VALUES ({placeholders})",
                META_FIELDS.join(", ")
            ),
            META_FIELDS.iter().map(|f| to_param(&record[*f])).collect(),
        ));
    }
    out
}

pub(crate) fn select_catalog() -> String {
    format!("SELECT {} FROM {META_COLUMNS}", META_FIELDS.join(", "))
}
