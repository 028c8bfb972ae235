// Declared check vocabulary: everything an operator writes under `checks:`.

use serde::{Deserialize, Serialize};

/// Assertion type of a declared check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    RowCount,
    Sum,
    Min,
    Max,
    Numeric,
    Measure,
    NotEmpty,
    NotEmptyPct,
    Anomaly,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::RowCount => "row_count",
            CheckType::Sum => "sum",
            CheckType::Min => "min",
            CheckType::Max => "max",
            CheckType::Numeric => "numeric",
            CheckType::Measure => "measure",
            CheckType::NotEmpty => "not_empty",
            CheckType::NotEmptyPct => "not_empty_pct",
            CheckType::Anomaly => "anomaly",
        }
    }

    /// Completeness types fan out one leaf per dimension instead of
    /// grouping by them.
    pub fn is_completeness(&self) -> bool {
        matches!(self, CheckType::NotEmpty | CheckType::NotEmptyPct)
    }
}

/// Predicate applied to the measured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Neq,
    Between,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Gt => "gt",
            Condition::Ge => "ge",
            Condition::Lt => "lt",
            Condition::Le => "le",
            Condition::Eq => "eq",
            Condition::Neq => "neq",
            Condition::Between => "between",
        }
    }
}

/// Scalar threshold for unary conditions, ordered pair for `between`.
///
/// Parsed untagged: `threshold: 10` or `threshold: [1000, 2000]`. Pair
/// length and ordering are enforced by config validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Value(f64),
    Range(Vec<f64>),
}

impl Threshold {
    pub fn value(&self) -> Option<f64> {
        match self {
            Threshold::Value(v) => Some(*v),
            Threshold::Range(_) => None,
        }
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        match self {
            Threshold::Range(pair) if pair.len() == 2 => Some((pair[0], pair[1])),
            _ => None,
        }
    }
}

/// The `dataset` field: one table, several tables, or a raw SQL SELECT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dataset {
    One(String),
    Many(Vec<String>),
}

impl Dataset {
    /// Expansion members, one per leaf. A raw SELECT is a single member.
    pub fn members(&self) -> Vec<&str> {
        match self {
            Dataset::One(name) => vec![name.as_str()],
            Dataset::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// A dataset member is raw SQL when it reads as a SELECT (or CTE) rather
/// than a table identifier.
pub fn is_raw_sql(dataset: &str) -> bool {
    let lowered = dataset.trim_start().to_ascii_lowercase();
    lowered.starts_with("select") || lowered.starts_with("with")
}

/// Bucketing granularity for time-aggregated checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Millennium,
    Century,
    Decade,
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Millennium => "millennium",
            Granularity::Century => "century",
            Granularity::Decade => "decade",
            Granularity::Year => "year",
            Granularity::Quarter => "quarter",
            Granularity::Month => "month",
            Granularity::Week => "week",
            Granularity::Day => "day",
            Granularity::Hour => "hour",
            Granularity::Minute => "minute",
            Granularity::Second => "second",
        }
    }
}

/// A `(column, granularity)` pair that introduces bucketed aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDimension {
    pub name: String,
    pub granularity: Granularity,
}

/// WHERE predicate source: a single string or a list AND-combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    One(String),
    Many(Vec<String>),
}

impl Filter {
    /// All predicates joined with ` AND `; None when the list is empty.
    pub fn combined(&self) -> Option<String> {
        match self {
            Filter::One(predicate) => {
                let trimmed = predicate.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            },
            Filter::Many(predicates) => {
                let parts: Vec<&str> = predicates
                    .iter()
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(" AND "))
                }
            },
        }
    }
}

/// One user-declared check, immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDescriptor {
    pub name: String,

    /// Reference into `datasources`; the first declared source when absent.
    #[serde(default)]
    pub datasource: Option<String>,

    pub dataset: Dataset,

    #[serde(rename = "type")]
    pub check_type: CheckType,

    pub condition: Condition,

    pub threshold: Threshold,

    /// SQL expression or bare column; interpretation depends on `type`.
    #[serde(default)]
    pub measure: Option<String>,

    /// GROUP BY columns for aggregated types, NULL-tested columns for
    /// completeness types.
    #[serde(default)]
    pub dimensions: Vec<String>,

    #[serde(default)]
    pub time_dimension: Option<TimeDimension>,

    #[serde(default)]
    pub filter: Option<Filter>,

    /// Target of analysis; `anomaly` checks only.
    #[serde(default)]
    pub check_id: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl CheckDescriptor {
    pub fn combined_filter(&self) -> Option<String> {
        self.filter.as_ref().and_then(Filter::combined)
    }
}
