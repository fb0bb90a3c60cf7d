//! Result assembly
//!
//! Turns the flat rows of a compiled statement back into the response
//! document of the requested format.

use jx_ir::query::{Domain, Edge, Format, Query};
use jx_ir::types::{concat_field, split_field};
use jx_ir::{untype, JsonType};
use serde_json::{json, Map, Value};

use crate::emit::{Compiled, DocumentLayout, Shape};
use crate::mapping::ColumnMapping;
use crate::{CompileError, Result};

/// Build the response for `rows`, the result of `compiled.sql`.
pub fn assemble(compiled: &Compiled, query: &Query, rows: Vec<Vec<Value>>) -> Result<Value> {
    let width = compiled.mapping.len();
    if let Some(bad) = rows.iter().find(|r| r.len() != width) {
        return Err(CompileError::Assembly(format!(
            "expected {width} columns, got {}",
            bad.len()
        )));
    }
    let meta = json!({"format": query.format.name()});

    if compiled.shape == Shape::Documents {
        let layout = compiled
            .documents
            .as_ref()
            .ok_or_else(|| CompileError::Assembly("document layout missing".into()))?;
        let docs = documents(layout, &rows)?;
        return Ok(match query.format {
            Format::Table => json!({
                "meta": meta,
                "header": ["."],
                "data": docs.into_iter().map(|d| json!([d])).collect::<Vec<_>>(),
            }),
            Format::List => json!({"meta": meta, "data": docs}),
            Format::Cube => {
                return Err(CompileError::Unsupported("cube format without edges".into()))
            }
        });
    }

    let columns = push_columns(&compiled.mapping);
    match query.format {
        Format::List => {
            let mut objects = rows.iter().map(|row| {
                let mut object = Value::Object(Map::new());
                for column in &columns {
                    let value = cell(column, row, query);
                    if !value.is_null() {
                        set_path(&mut object, &column[0].push_name, value);
                    }
                }
                object
            });
            let data = if compiled.shape == Shape::Aggregate {
                objects.next().unwrap_or_else(|| Value::Object(Map::new()))
            } else {
                Value::Array(objects.collect())
            };
            Ok(json!({"meta": meta, "data": data}))
        }
        Format::Table => {
            let header: Vec<&str> = columns
                .iter()
                .map(|c| c[0].push_column_name.as_str())
                .collect();
            let data: Vec<Value> = rows
                .iter()
                .map(|row| Value::Array(columns.iter().map(|c| cell(c, row, query)).collect()))
                .collect();
            Ok(json!({"meta": meta, "header": header, "data": data}))
        }
        Format::Cube => cube(compiled, query, &rows, meta),
    }
}

/// Mappings grouped by output column, in column order.
fn push_columns(mapping: &[ColumnMapping]) -> Vec<Vec<&ColumnMapping>> {
    let count = mapping.first().map_or(0, |m| m.num_push_columns);
    (0..count)
        .map(|c| mapping.iter().filter(|m| m.push_column == c).collect::<Vec<_>>())
        .filter(|c| !c.is_empty())
        .collect()
}

fn cell(column: &[&ColumnMapping], row: &[Value], query: &Query) -> Value {
    let first = column[0];
    if first.is_edge {
        return match query.edges.iter().find(|e| e.name == first.push_name) {
            Some(edge) => edge_value(edge, column, row),
            None => Value::Null,
        };
    }
    if column.len() == 1 && first.push_child == "." {
        return decode(row[first.pull].clone());
    }
    let mut out = Value::Null;
    for m in column {
        let value = decode(row[m.pull].clone());
        if !value.is_null() {
            set_path(&mut out, &m.push_child, value);
        }
    }
    out
}

fn edge_index(column: &[&ColumnMapping], row: &[Value]) -> Option<usize> {
    column
        .iter()
        .find(|m| m.push_child == "index")
        .and_then(|m| row[m.pull].as_u64())
        .map(|i| i as usize)
}

/// The partition value of an edge cell; `null` for the null partition.
fn edge_value(edge: &Edge, column: &[&ColumnMapping], row: &[Value]) -> Value {
    match &edge.domain {
        Domain::Set { partitions } => edge_index(column, row)
            .and_then(|i| partitions.get(i).cloned())
            .unwrap_or(Value::Null),
        _ => column
            .iter()
            .find(|m| m.push_child == ".")
            .map(|m| decode(row[m.pull].clone()))
            .unwrap_or(Value::Null),
    }
}

fn cube(compiled: &Compiled, query: &Query, rows: &[Vec<Value>], meta: Value) -> Result<Value> {
    let columns = push_columns(&compiled.mapping);
    let selects: Vec<&Vec<&ColumnMapping>> = columns.iter().filter(|c| !c[0].is_edge).collect();
    let select_block = if query.select_single {
        json!({"name": query.select.first().map(|s| s.name.clone())})
    } else {
        Value::Array(query.select.iter().map(|s| json!({"name": s.name})).collect())
    };

    if compiled.shape == Shape::Aggregate {
        let row = rows.first();
        let mut data = Map::new();
        for column in &selects {
            let value = row.map_or(Value::Null, |r| cell(column, r, query));
            data.insert(column[0].push_name.clone(), value);
        }
        return Ok(json!({"meta": meta, "edges": [], "select": select_block, "data": data}));
    }
    if compiled.shape != Shape::Edges {
        return Err(CompileError::Unsupported("cube format without edges".into()));
    }

    // Dimension sizes: distinct partition indexes per edge.
    let mut edges = Vec::new();
    let mut dims = Vec::new();
    for edge in &query.edges {
        let column = columns
            .iter()
            .find(|c| c[0].is_edge && c[0].push_name == edge.name)
            .ok_or_else(|| CompileError::Assembly(format!("no column for edge {:?}", edge.name)))?;
        let mut seen: Vec<(usize, Value)> = Vec::new();
        for row in rows {
            if let Some(i) = edge_index(column, row) {
                if !seen.iter().any(|(j, _)| *j == i) {
                    seen.push((i, edge_value(edge, column, row)));
                }
            }
        }
        seen.sort_by_key(|(i, _)| *i);
        dims.push(seen.len());
        edges.push(json!({
            "name": edge.name,
            "allowNulls": edge.allow_nulls,
            "domain": {
                "type": edge.domain.type_name(),
                "partitions": partitions(edge, &seen),
            },
        }));
    }
    let cells: usize = dims.iter().product();
    if cells != rows.len() {
        return Err(CompileError::Assembly(format!(
            "cube of {dims:?} needs {cells} rows, got {}",
            rows.len()
        )));
    }

    let mut data = Map::new();
    for column in selects {
        let values: Vec<Value> = rows.iter().map(|row| cell(column, row, query)).collect();
        data.insert(column[0].push_name.clone(), nest(&values, &dims, 0, 0, 1));
    }
    Ok(json!({"meta": meta, "edges": edges, "select": select_block, "data": data}))
}

/// Edge partitions as reported to the caller, without the null partition.
fn partitions(edge: &Edge, seen: &[(usize, Value)]) -> Value {
    match &edge.domain {
        Domain::Set { partitions } => Value::Array(partitions.clone()),
        Domain::Default => Value::Array(
            seen.iter()
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_null())
                .collect(),
        ),
        domain => {
            let (min, max, interval) = domain.bounds().unwrap_or((0.0, 0.0, 1.0));
            let count = domain.interval_count().unwrap_or(0);
            Value::Array(
                (0..count)
                    .map(|i| {
                        let lo = min + i as f64 * interval;
                        json!({
                            "min": number(lo),
                            "max": number((lo + interval).min(max)),
                        })
                    })
                    .collect(),
            )
        }
    }
}

/// Rows enumerate cells with the first edge varying fastest.
fn nest(values: &[Value], dims: &[usize], k: usize, offset: usize, stride: usize) -> Value {
    if k == dims.len() {
        return values.get(offset).cloned().unwrap_or(Value::Null);
    }
    Value::Array(
        (0..dims[k])
            .map(|i| nest(values, dims, k + 1, offset + i * stride, stride * dims[k]))
            .collect(),
    )
}

/// Rebuild documents from the pre-ordered rows of every table.
fn documents(layout: &DocumentLayout, rows: &[Vec<Value>]) -> Result<Vec<Value>> {
    struct Frame {
        table: usize,
        uid: Value,
        value: Value,
    }

    fn fold(stack: &mut Vec<Frame>, docs: &mut Vec<Value>, layout: &DocumentLayout) {
        let Some(frame) = stack.pop() else { return };
        match stack.last_mut() {
            Some(parent) => {
                let path = &layout.tables[frame.table].path;
                append_at(&mut parent.value, path, frame.value);
            }
            None => docs.push(frame.value),
        }
    }

    let mut docs = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    for row in rows {
        let table = row[layout.kind]
            .as_u64()
            .map(|k| k as usize)
            .filter(|k| *k < layout.tables.len())
            .ok_or_else(|| CompileError::Assembly(format!("bad table index {}", row[layout.kind])))?;
        let mut value = Value::Null;
        for (pull, es_column) in &layout.tables[table].columns {
            let Some((path, json_type)) = untype(es_column) else {
                continue;
            };
            let v = typed_value(row[*pull].clone(), json_type);
            if !v.is_null() {
                set_path(&mut value, &path, v);
            }
        }
        if value.is_null() {
            value = Value::Object(Map::new());
        }

        match layout.tables[table].parent {
            None => {
                while !stack.is_empty() {
                    fold(&mut stack, &mut docs, layout);
                }
            }
            Some(parent) => {
                let pid = &row[layout.pid];
                while stack
                    .last()
                    .is_some_and(|f| !(f.table == parent && &f.uid == pid))
                {
                    fold(&mut stack, &mut docs, layout);
                }
                if stack.is_empty() {
                    return Err(CompileError::Assembly(format!(
                        "row of {} has no parent {pid}",
                        layout.tables[table].nested_path
                    )));
                }
            }
        }
        stack.push(Frame {
            table,
            uid: row[layout.uid].clone(),
            value,
        });
    }
    while !stack.is_empty() {
        fold(&mut stack, &mut docs, layout);
    }
    Ok(docs)
}

fn append_at(target: &mut Value, path: &str, item: Value) {
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    let Some(slot) = slot(target, path) else { return };
    match slot {
        Value::Array(items) => items.push(item),
        other => *other = Value::Array(vec![item]),
    }
}

/// Mutable slot at `path` inside an object, creating objects on the way.
fn slot<'v>(target: &'v mut Value, path: &str) -> Option<&'v mut Value> {
    let mut current = target;
    for key in split_field(path) {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = current.as_object_mut()?.entry(key).or_insert(Value::Null);
    }
    Some(current)
}

/// Put `value` at `path`; `.` merges an object into `target` or replaces it.
pub fn set_path(target: &mut Value, path: &str, value: Value) {
    if split_field(path).is_empty() {
        match (target.as_object_mut(), value) {
            (Some(existing), Value::Object(fields)) => existing.extend(fields),
            (_, value) => *target = value,
        }
        return;
    }
    if let Some(slot) = slot(target, path) {
        *slot = value;
    }
}

fn typed_value(value: Value, json_type: JsonType) -> Value {
    match (json_type, value) {
        (_, Value::Null) => Value::Null,
        (JsonType::Exists, _) => Value::Null,
        (JsonType::Object, Value::String(text)) => {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
        (_, value) => decode(value),
    }
}

/// Integral doubles become integers, like the documents they came from.
fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

/// Convert an engine value to its document form: structs with typed keys
/// become documents, `$j` text is parsed, nulls inside objects are dropped.
pub fn decode(value: Value) -> Value {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::from(i),
            (None, Some(f)) => number(f),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| {
                    let document = item.is_object();
                    match decode(item) {
                        Value::Null if document => Value::Object(Map::new()),
                        other => other,
                    }
                })
                .collect(),
        ),
        Value::Object(fields) => {
            let typed = fields.keys().any(|k| untype(k).is_some());
            let mut out = Value::Null;
            for (key, v) in fields {
                let v = match untype(&key) {
                    Some((_, json_type)) if typed => typed_value(v, json_type),
                    _ => decode(v),
                };
                if v.is_null() {
                    continue;
                }
                let path = match untype(&key) {
                    Some((path, _)) => path,
                    None => concat_field(".", &jx_ir::types::escape_key(&key)),
                };
                set_path(&mut out, &path, v);
            }
            out
        }
        other => other,
    }
}
