//! Aggregate functions
//!
//! Shallow values aggregate with the ordinary SQL aggregates. Values read
//! from a deeper table arrive as one list per row, so the lists are
//! flattened first and reduced with the `list_*` functions.

use jx_ir::{Aggregate, JsonType};

use crate::sql::Sql;
use crate::{sql, CompileError, Result};

/// Column holding the query-path row id in the `__facts` CTE.
pub const EXISTS: &str = "__exists__";

fn exists() -> Sql {
    Sql::quote_column(EXISTS)
}

/// SQL for `aggregate` over the fact column `x`.
///
/// `rows` marks `count` of the whole row, which counts query-path rows
/// rather than values. `deep` marks list-valued columns.
pub(crate) fn aggregate(
    aggregate: Aggregate,
    x: &Sql,
    rows: bool,
    deep: bool,
    percentile: Option<f64>,
) -> Result<Sql> {
    if aggregate == Aggregate::Count && rows {
        return Ok(sql!("COUNT(DISTINCT {})", exists()));
    }
    if deep {
        return Ok(over_list(aggregate, &flattened(x), percentile));
    }
    Ok(match aggregate {
        Aggregate::None => {
            return Err(CompileError::Unsupported(
                "value without aggregate in an aggregate query".into(),
            ))
        }
        Aggregate::Count => sql!("COUNT({})", x),
        Aggregate::Sum => sql!("SUM({})", x),
        Aggregate::Min => sql!("MIN({})", x),
        Aggregate::Max => sql!("MAX({})", x),
        Aggregate::Avg => sql!("AVG({})", x),
        Aggregate::Median => sql!("MEDIAN({})", x),
        Aggregate::First => sql!("FIRST({} ORDER BY {}) FILTER (WHERE {} IS NOT NULL)", x, exists(), x),
        Aggregate::Last => sql!("LAST({} ORDER BY {}) FILTER (WHERE {} IS NOT NULL)", x, exists(), x),
        Aggregate::Cardinality => sql!("COUNT(DISTINCT {})", x),
        Aggregate::Union => sql!("list_sort(list(DISTINCT {}) FILTER (WHERE {} IS NOT NULL))", x, x),
        Aggregate::Percentile => sql!("quantile_cont({}, {})", x, Sql::float(percentile.unwrap_or(0.5))),
        Aggregate::Stats => sql!(
            "struct_pack(count := COUNT({}), std := stddev_pop({}), min := MIN({}), max := MAX({}), sum := SUM({}), median := MEDIAN({}), sos := SUM({} * {}), var := var_pop({}), avg := AVG({}))",
            x, x, x, x, x, x, x, x, x, x
        ),
    })
}

/// All elements of the list column `x` across the group, in row order.
fn flattened(x: &Sql) -> Sql {
    sql!(
        "flatten(list({} ORDER BY {}) FILTER (WHERE {} IS NOT NULL))",
        x,
        exists(),
        x
    )
}

fn over_list(aggregate: Aggregate, list: &Sql, percentile: Option<f64>) -> Sql {
    match aggregate {
        Aggregate::None => list.clone(),
        Aggregate::Count => sql!("COALESCE(len({}), 0)", list),
        Aggregate::Sum => sql!("list_sum({})", list),
        Aggregate::Min => sql!("list_min({})", list),
        Aggregate::Max => sql!("list_max({})", list),
        Aggregate::Avg => sql!("list_avg({})", list),
        Aggregate::Median => sql!("list_median({})", list),
        Aggregate::First => sql!("{}[1]", list),
        Aggregate::Last => sql!("{}[-1]", list),
        Aggregate::Cardinality => sql!("COALESCE(len(list_distinct({})), 0)", list),
        Aggregate::Union => sql!("list_sort(list_distinct({}))", list),
        Aggregate::Percentile => sql!(
            "list_aggregate({}, 'quantile_cont', {})",
            list,
            Sql::float(percentile.unwrap_or(0.5))
        ),
        Aggregate::Stats => sql!(
            "struct_pack(count := COALESCE(len({}), 0), std := list_aggregate({}, 'stddev_pop'), min := list_min({}), max := list_max({}), sum := list_sum({}), median := list_median({}), sos := list_inner_product({}, {}), var := list_aggregate({}, 'var_pop'), avg := list_avg({}))",
            list, list, list, list, list, list, list, list, list, list
        ),
    }
}

/// Result type of an aggregate over values of `input`.
pub(crate) fn result_type(aggregate: Aggregate, input: JsonType) -> JsonType {
    match aggregate {
        Aggregate::Count | Aggregate::Cardinality => JsonType::Integer,
        Aggregate::Sum | Aggregate::Avg | Aggregate::Median | Aggregate::Percentile => {
            JsonType::Number
        }
        Aggregate::Union | Aggregate::Stats => JsonType::Object,
        Aggregate::None | Aggregate::Min | Aggregate::Max | Aggregate::First | Aggregate::Last => {
            input
        }
    }
}

/// Window function for `aggregate`; the caller appends the `OVER` clause.
pub(crate) fn window_function(aggregate: Aggregate, x: &Sql, percentile: Option<f64>) -> Result<Sql> {
    Ok(match aggregate {
        Aggregate::None | Aggregate::Last => sql!("LAST_VALUE({})", x),
        Aggregate::First => sql!("FIRST_VALUE({})", x),
        Aggregate::Count => sql!("COUNT({})", x),
        Aggregate::Sum => sql!("SUM({})", x),
        Aggregate::Min => sql!("MIN({})", x),
        Aggregate::Max => sql!("MAX({})", x),
        Aggregate::Avg => sql!("AVG({})", x),
        Aggregate::Median => sql!("MEDIAN({})", x),
        Aggregate::Percentile => sql!("quantile_cont({}, {})", x, Sql::float(percentile.unwrap_or(0.5))),
        other => {
            return Err(CompileError::Unsupported(format!(
                "{} aggregate in a window",
                other.name()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_of_rows_uses_exists() {
        let x = Sql::quote_column("__v0");
        let sql = aggregate(Aggregate::Count, &x, true, false, None).unwrap();
        assert_eq!(sql.as_str(), r#"COUNT(DISTINCT "__exists__")"#);
        let sql = aggregate(Aggregate::Count, &x, false, false, None).unwrap();
        assert_eq!(sql.as_str(), r#"COUNT("__v0")"#);
    }

    #[test]
    fn test_deep_sum_flattens() {
        let x = Sql::quote_column("__v0");
        let sql = aggregate(Aggregate::Sum, &x, false, true, None).unwrap();
        assert_eq!(
            sql.as_str(),
            r#"list_sum(flatten(list("__v0" ORDER BY "__exists__") FILTER (WHERE "__v0" IS NOT NULL)))"#
        );
    }

    #[test]
    fn test_none_is_rejected() {
        let x = Sql::quote_column("__v0");
        assert!(aggregate(Aggregate::None, &x, false, false, None).is_err());
    }

    #[test]
    fn test_result_types() {
        assert_eq!(result_type(Aggregate::Count, JsonType::String), JsonType::Integer);
        assert_eq!(result_type(Aggregate::Max, JsonType::String), JsonType::String);
        assert_eq!(result_type(Aggregate::Avg, JsonType::Integer), JsonType::Number);
    }
}
