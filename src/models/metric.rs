// Persisted evaluation records and per-invocation summaries.

use crate::models::check::{CheckType, Condition};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One recorded evaluation, appended to the metric store.
///
/// Exactly one of `success` / `fail` is true for every record. Dimension
/// values are positionally aligned with the declared dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Store-assigned surrogate key; None until written.
    pub id: Option<i64>,
    pub run_id: String,
    pub check_id: String,
    pub name: String,
    pub datasource: String,
    pub dataset: String,
    pub check_type: CheckType,
    pub condition: Condition,
    /// Scalar threshold; None for `between` conditions.
    pub threshold: Option<f64>,
    /// Ordered `[lo, hi]` pair for `between`; empty otherwise.
    pub threshold_list: Vec<f64>,
    /// Measured value; None when the leaf errored or measured NULL.
    pub actual_value: Option<f64>,
    pub success: bool,
    pub fail: bool,
    pub run_time: NaiveDateTime,
    pub dimensions: Vec<String>,
    /// Bucket timestamp when the check is time-aggregated.
    pub time_bucket: Option<NaiveDateTime>,
}

/// Outcome of one Runner invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: String,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub records: Vec<MetricRecord>,
}

impl RunSummary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }
}
