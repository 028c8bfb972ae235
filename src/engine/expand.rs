// Check expansion
//
// One declared check becomes a deterministic sequence of leaves: dataset
// list members first, then (for completeness types) one leaf per declared
// dimension. Grouped numeric checks keep a single leaf whose result rows
// fan out into records at execution time.

use crate::engine::fingerprint;
use crate::models::{CheckDescriptor, CheckType, Condition, Threshold};
use crate::sql::{compose, Dialect};
use crate::utils::{WeiserError, WeiserResult};

/// History selector of an anomaly leaf.
#[derive(Debug, Clone)]
pub struct AnomalyTarget {
    /// Check whose history is analyzed.
    pub target_check_id: String,
    /// Optional predicate narrowing the retrieved history.
    pub filter: Option<String>,
}

/// How the runner interprets the rows a leaf's SQL returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// One row, one column: the measured value.
    Scalar,
    /// Dimension columns first, then an optional bucket column, value last;
    /// every returned row becomes its own record.
    Grouped { dimensions: usize, time_bucketed: bool },
}

/// One concrete sub-check; yields exactly one observation per result row.
#[derive(Debug, Clone)]
pub struct LeafCheck {
    pub check_id: String,
    pub name: String,
    pub datasource: String,
    /// Canonical dataset identifier: table name or raw SQL text.
    pub dataset_id: String,
    pub check_type: CheckType,
    pub condition: Condition,
    pub threshold: Threshold,
    /// Composed statement; None for anomaly leaves.
    pub sql: Option<String>,
    pub shape: ResultShape,
    pub anomaly: Option<AnomalyTarget>,
}

/// Expand a declared check into leaves for the given source dialect.
///
/// Fan-out order is stable: dataset members in declaration order, then
/// dimensions in declaration order for completeness types. Compile
/// failures abort this check's expansion but leave other checks alone.
pub fn expand(
    check: &CheckDescriptor,
    datasource: &str,
    dialect: Dialect,
) -> WeiserResult<Vec<LeafCheck>> {
    let mut leaves = Vec::new();

    for member in check.dataset.members() {
        let check_id = fingerprint::check_id(datasource, &check.name, member);

        match check.check_type {
            CheckType::Anomaly => {
                leaves.push(anomaly_leaf(check, datasource, member, check_id)?);
            },
            CheckType::NotEmpty | CheckType::NotEmptyPct => {
                if check.dimensions.is_empty() {
                    return Err(WeiserError::compile(
                        &check.name,
                        format!(
                            "'{}' requires at least one dimension",
                            check.check_type.as_str()
                        ),
                    ));
                }
                let suffix = match check.check_type {
                    CheckType::NotEmpty => "not_empty",
                    _ => "not_empty_pct",
                };
                for dim in &check.dimensions {
                    let sql = compose::completeness_sql(dialect, check, member, dim)?;
                    leaves.push(LeafCheck {
                        check_id: check_id.clone(),
                        name: format!("{}_{}_{}", check.name, dim, suffix),
                        datasource: datasource.to_string(),
                        dataset_id: member.to_string(),
                        check_type: check.check_type,
                        condition: check.condition,
                        threshold: check.threshold.clone(),
                        sql: Some(sql),
                        shape: ResultShape::Scalar,
                        anomaly: None,
                    });
                }
            },
            _ => {
                let sql = compose::aggregate_sql(dialect, check, member)?;
                let time_bucketed = check.time_dimension.is_some();
                let shape = if check.dimensions.is_empty() && !time_bucketed {
                    ResultShape::Scalar
                } else {
                    ResultShape::Grouped {
                        dimensions: check.dimensions.len(),
                        time_bucketed,
                    }
                };
                leaves.push(LeafCheck {
                    check_id,
                    name: check.name.clone(),
                    datasource: datasource.to_string(),
                    dataset_id: member.to_string(),
                    check_type: check.check_type,
                    condition: check.condition,
                    threshold: check.threshold.clone(),
                    sql: Some(sql),
                    shape,
                    anomaly: None,
                });
            },
        }
    }

    Ok(leaves)
}

fn anomaly_leaf(
    check: &CheckDescriptor,
    datasource: &str,
    member: &str,
    check_id: String,
) -> WeiserResult<LeafCheck> {
    let filter = check.combined_filter();
    let target_check_id = check.check_id.clone();

    if target_check_id.is_none() && filter.is_none() {
        return Err(WeiserError::compile(
            &check.name,
            "anomaly check requires a check_id or a filter",
        ));
    }

    Ok(LeafCheck {
        check_id,
        name: check.name.clone(),
        datasource: datasource.to_string(),
        dataset_id: member.to_string(),
        check_type: CheckType::Anomaly,
        condition: check.condition,
        threshold: check.threshold.clone(),
        sql: None,
        shape: ResultShape::Scalar,
        anomaly: Some(AnomalyTarget {
            // With both selectors present the filter narrows the history of
            // the referenced check.
            target_check_id: target_check_id.unwrap_or_default(),
            filter,
        }),
    })
}
