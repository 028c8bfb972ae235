// Check-to-SQL composition
//
// Translates one expanded leaf into a dialect-valid SELECT. Pure and
// deterministic: the same descriptor and dialect always produce the same
// SQL text. Descriptor invariants that make composition impossible (an
// aggregate with no measure, a completeness check with no target column)
// are compile failures surfaced before any execution.

use crate::models::{is_raw_sql, CheckDescriptor, CheckType};
use crate::sql::builder::SelectBuilder;
use crate::sql::dialect::Dialect;
use crate::utils::{WeiserError, WeiserResult};

/// Outer select expression measured by an aggregated numeric check.
fn measured_expression(dialect: Dialect, check: &CheckDescriptor) -> WeiserResult<String> {
    let need_measure = || {
        check.measure.as_deref().map(str::trim).filter(|m| !m.is_empty()).ok_or_else(|| {
            WeiserError::compile(
                &check.name,
                format!("check type '{}' requires a measure", check.check_type.as_str()),
            )
        })
    };

    match check.check_type {
        CheckType::RowCount => Ok("COUNT(*)".to_string()),
        CheckType::Sum => Ok(format!("SUM({})", need_measure()?)),
        CheckType::Min => Ok(format!("MIN({})", need_measure()?)),
        CheckType::Max => Ok(format!("MAX({})", need_measure()?)),
        CheckType::Numeric => Ok(need_measure()?.to_string()),
        CheckType::Measure => Ok(dialect.quote_ident(need_measure()?)),
        CheckType::NotEmpty | CheckType::NotEmptyPct | CheckType::Anomaly => Err(
            WeiserError::compile(
                &check.name,
                format!("'{}' has no aggregate expression", check.check_type.as_str()),
            ),
        ),
    }
}

fn base_from(builder: SelectBuilder, dataset_member: &str) -> SelectBuilder {
    if is_raw_sql(dataset_member) {
        builder.from_raw_sql(dataset_member)
    } else {
        builder.from_table(dataset_member)
    }
}

/// SQL for `row_count` / `sum` / `min` / `max` / `numeric` / `measure`
/// leaves, including dimensional GROUP BY and time bucketing.
///
/// Column layout contract with the runner: declared dimensions first (in
/// declaration order), then the time bucket when present, the measured
/// value last. Grouped output is ordered so fan-out over returned rows is
/// deterministic.
pub fn aggregate_sql(
    dialect: Dialect,
    check: &CheckDescriptor,
    dataset_member: &str,
) -> WeiserResult<String> {
    let value_expr = measured_expression(dialect, check)?;

    let mut builder = SelectBuilder::new(dialect);
    let mut group_exprs: Vec<String> = Vec::new();

    for dim in &check.dimensions {
        let rendered = dialect.quote_ident(dim);
        builder = builder.select(rendered.clone());
        group_exprs.push(rendered);
    }

    if let Some(td) = &check.time_dimension {
        let bucket = dialect.date_trunc(td.granularity, &dialect.quote_ident(&td.name));
        builder = builder.select(bucket.clone());
        group_exprs.push(bucket);
    }

    builder = builder.select(value_expr);
    builder = base_from(builder, dataset_member);

    if let Some(filter) = check.combined_filter() {
        builder = builder.and_where(filter);
    }

    for expr in &group_exprs {
        builder = builder.group_by(expr.clone());
    }
    for expr in &group_exprs {
        builder = builder.order_by(expr.clone());
    }

    Ok(builder.build())
}

/// SQL for one `not_empty` / `not_empty_pct` leaf targeting `dimension`.
pub fn completeness_sql(
    dialect: Dialect,
    check: &CheckDescriptor,
    dataset_member: &str,
    dimension: &str,
) -> WeiserResult<String> {
    let column = dialect.quote_ident(dimension);
    let null_count = format!("SUM(CASE WHEN {} IS NULL THEN 1 ELSE 0 END)", column);

    let value_expr = match check.check_type {
        CheckType::NotEmpty => null_count,
        CheckType::NotEmptyPct => format!(
            "{} / {}",
            dialect.cast_double(&null_count),
            dialect.cast_double("COUNT(*)")
        ),
        _ => {
            return Err(WeiserError::compile(
                &check.name,
                "completeness SQL requested for a non-completeness check",
            ));
        },
    };

    let mut builder = SelectBuilder::new(dialect).select(value_expr);
    builder = base_from(builder, dataset_member);
    if let Some(filter) = check.combined_filter() {
        builder = builder.and_where(filter);
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, Dataset, Filter, Granularity, Threshold, TimeDimension};

    fn descriptor(check_type: CheckType) -> CheckDescriptor {
        CheckDescriptor {
            name: "orders_check".into(),
            datasource: None,
            dataset: Dataset::One("orders".into()),
            check_type,
            condition: Condition::Gt,
            threshold: Threshold::Value(0.0),
            measure: None,
            dimensions: vec![],
            time_dimension: None,
            filter: None,
            check_id: None,
            description: None,
        }
    }

    #[test]
    fn test_row_count_sql() {
        let sql = aggregate_sql(Dialect::Postgres, &descriptor(CheckType::RowCount), "orders")
            .unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM orders");
    }

    #[test]
    fn test_sum_requires_measure() {
        let err = aggregate_sql(Dialect::Postgres, &descriptor(CheckType::Sum), "orders")
            .unwrap_err();
        assert!(err.to_string().contains("requires a measure"));
    }

    #[test]
    fn test_numeric_measure_verbatim() {
        let mut check = descriptor(CheckType::Numeric);
        check.measure = Some("sum(budgeted_amount)".into());
        let sql = aggregate_sql(Dialect::DuckDb, &check, "orders").unwrap();
        assert_eq!(sql, "SELECT sum(budgeted_amount) FROM orders");
    }

    #[test]
    fn test_dimensions_group_and_order() {
        let mut check = descriptor(CheckType::RowCount);
        check.dimensions = vec!["tenant_id".into()];
        let sql = aggregate_sql(Dialect::DuckDb, &check, "vendors").unwrap();
        assert_eq!(
            sql,
            "SELECT tenant_id, COUNT(*) FROM vendors GROUP BY tenant_id ORDER BY tenant_id"
        );
    }

    #[test]
    fn test_time_dimension_bucketing() {
        let mut check = descriptor(CheckType::RowCount);
        check.time_dimension = Some(TimeDimension {
            name: "created_at".into(),
            granularity: Granularity::Day,
        });
        let sql = aggregate_sql(Dialect::Postgres, &check, "orders").unwrap();
        assert_eq!(
            sql,
            "SELECT DATE_TRUNC('day', created_at), COUNT(*) FROM orders \
             GROUP BY DATE_TRUNC('day', created_at) ORDER BY DATE_TRUNC('day', created_at)"
        );
    }

    #[test]
    fn test_filters_are_and_combined() {
        let mut check = descriptor(CheckType::RowCount);
        check.filter = Some(Filter::Many(vec![
            "status = 'open'".into(),
            "amount > 0".into(),
        ]));
        let sql = aggregate_sql(Dialect::Postgres, &check, "orders").unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM orders WHERE status = 'open' AND amount > 0"
        );
    }

    #[test]
    fn test_raw_sql_dataset_is_wrapped() {
        let check = descriptor(CheckType::RowCount);
        let sql =
            aggregate_sql(Dialect::Postgres, &check, "select * from orders where x > 1").unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM (select * from orders where x > 1) AS d"
        );
    }

    #[test]
    fn test_not_empty_sql() {
        let mut check = descriptor(CheckType::NotEmpty);
        check.dimensions = vec!["email".into(), "phone".into()];
        let sql = completeness_sql(Dialect::DuckDb, &check, "customers", "email").unwrap();
        assert_eq!(
            sql,
            "SELECT SUM(CASE WHEN email IS NULL THEN 1 ELSE 0 END) FROM customers"
        );
    }

    #[test]
    fn test_not_empty_pct_ratio_cast() {
        let mut check = descriptor(CheckType::NotEmptyPct);
        check.dimensions = vec!["email".into()];
        let sql = completeness_sql(Dialect::Postgres, &check, "customers", "email").unwrap();
        assert_eq!(
            sql,
            "SELECT CAST(SUM(CASE WHEN email IS NULL THEN 1 ELSE 0 END) AS DOUBLE PRECISION) \
             / CAST(COUNT(*) AS DOUBLE PRECISION) FROM customers"
        );
    }

    #[test]
    fn test_composition_is_deterministic() {
        let mut check = descriptor(CheckType::RowCount);
        check.dimensions = vec!["a".into(), "b".into()];
        let first = aggregate_sql(Dialect::Snowflake, &check, "orders").unwrap();
        let second = aggregate_sql(Dialect::Snowflake, &check, "orders").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mysql_quoting_in_dimensions() {
        let mut check = descriptor(CheckType::RowCount);
        check.dimensions = vec!["Tenant Id".into()];
        let sql = aggregate_sql(Dialect::MySql, &check, "vendors").unwrap();
        assert!(sql.contains("`Tenant Id`"));
    }

    #[test]
    fn test_same_check_across_dialects() {
        let mut check = descriptor(CheckType::RowCount);
        check.time_dimension = Some(TimeDimension {
            name: "created_at".into(),
            granularity: Granularity::Month,
        });

        let snowflake = aggregate_sql(Dialect::Snowflake, &check, "orders").unwrap();
        assert!(snowflake.contains("DATE_TRUNC('month', created_at)"));

        let databricks = aggregate_sql(Dialect::Databricks, &check, "orders").unwrap();
        assert!(databricks.contains("DATE_TRUNC('month', created_at)"));

        let bigquery = aggregate_sql(Dialect::BigQuery, &check, "orders").unwrap();
        assert!(bigquery.contains("TIMESTAMP_TRUNC(created_at, MONTH)"));

        let mysql = aggregate_sql(Dialect::MySql, &check, "orders").unwrap();
        assert!(mysql.contains("DATE_FORMAT(created_at, '%Y-%m-01')"));

        // Every dialect still selects, groups, and orders by the bucket.
        for sql in [&snowflake, &databricks, &bigquery, &mysql] {
            assert!(sql.starts_with("SELECT "));
            assert!(sql.contains(" GROUP BY "));
            assert!(sql.contains(" ORDER BY "));
        }
    }

    #[test]
    fn test_schema_qualified_dataset() {
        let check = descriptor(CheckType::RowCount);
        let sql = aggregate_sql(Dialect::Postgres, &check, "analytics.orders").unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM analytics.orders");

        let sql = aggregate_sql(Dialect::BigQuery, &check, "my-project.sales.orders").unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM `my-project`.sales.orders");
    }

    #[test]
    fn test_min_max_measures() {
        let mut check = descriptor(CheckType::Min);
        check.measure = Some("amount".into());
        let sql = aggregate_sql(Dialect::Postgres, &check, "orders").unwrap();
        assert_eq!(sql, "SELECT MIN(amount) FROM orders");

        check.check_type = CheckType::Max;
        let sql = aggregate_sql(Dialect::Postgres, &check, "orders").unwrap();
        assert_eq!(sql, "SELECT MAX(amount) FROM orders");

        check.check_type = CheckType::Sum;
        let sql = aggregate_sql(Dialect::Postgres, &check, "orders").unwrap();
        assert_eq!(sql, "SELECT SUM(amount) FROM orders");
    }

    #[test]
    fn test_measure_passthrough_identifier() {
        let mut check = descriptor(CheckType::Measure);
        check.measure = Some("total_revenue".into());
        let sql = aggregate_sql(Dialect::Postgres, &check, "revenue_cube").unwrap();
        assert_eq!(sql, "SELECT total_revenue FROM revenue_cube");
    }
}
