// Run orchestration
//
// Expands every declared check, schedules leaf executions onto tokio
// tasks bounded per source by the driver's pool size, evaluates results,
// and appends one record per observation to the metric store. Leaf
// failures are isolated; a store write failure aborts the run since
// nothing further can be persisted.

use crate::config::Config;
use crate::drivers::{dialect_for, DriverManager, Row, Scalar, SourceDriver};
use crate::engine::anomaly;
use crate::engine::evaluate::{evaluate, normalize_measurement};
use crate::engine::expand::{expand, AnomalyTarget, LeafCheck, ResultShape};
use crate::models::{MetricRecord, RunSummary};
use crate::store::MetricStore;
use crate::utils::{WeiserError, WeiserResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Handle used to cancel an in-flight run: no new leaves are dispatched
/// and pending leaves return without recording; completed results are
/// already flushed.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

enum LeafOutcome {
    /// Evaluated observations, each flagged errored when the leaf failed
    /// to execute rather than failing its condition.
    Records(Vec<(MetricRecord, bool)>),
    Cancelled,
}

pub struct Runner {
    config: Config,
    drivers: Arc<DriverManager>,
    store: Arc<dyn MetricStore>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Runner {
    pub fn new(config: Config, store: Arc<dyn MetricStore>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            config,
            drivers: Arc::new(DriverManager::new()),
            store,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { tx: Arc::clone(&self.cancel_tx) }
    }

    /// Execute every declared check and record every evaluation.
    pub async fn run(&self) -> WeiserResult<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        tracing::info!("starting run {}", run_id);

        let semaphores: HashMap<String, Arc<Semaphore>> = self
            .config
            .datasources
            .iter()
            .map(|ds| (ds.name.clone(), Arc::new(Semaphore::new(ds.pool_size.max(1)))))
            .collect();

        let mut summary = RunSummary { run_id: run_id.clone(), ..Default::default() };
        let mut tasks: JoinSet<WeiserResult<LeafOutcome>> = JoinSet::new();

        for check in &self.config.checks {
            if *self.cancel_rx.borrow() {
                tracing::warn!("run {} cancelled; skipping remaining checks", run_id);
                break;
            }

            let datasource = match self.config.datasource(check.datasource.as_deref()) {
                Ok(ds) => ds.clone(),
                Err(e) => {
                    tracing::error!("check '{}': {}", check.name, e);
                    summary.errored += 1;
                    continue;
                },
            };

            let leaves = match expand(check, &datasource.name, dialect_for(datasource.source_type))
            {
                Ok(leaves) => leaves,
                Err(e) => {
                    tracing::error!("check '{}' did not compile: {}", check.name, e);
                    summary.errored += 1;
                    continue;
                },
            };

            // Source connection failures are isolated to this check's
            // leaves; the leaves are still recorded as failures.
            let driver = if leaves.iter().any(|leaf| leaf.sql.is_some()) {
                match self.drivers.get(&datasource).await {
                    Ok(driver) => Some(driver),
                    Err(e) => {
                        tracing::error!("datasource '{}' unavailable: {}", datasource.name, e);
                        None
                    },
                }
            } else {
                None
            };

            let timeout = Duration::from_secs(datasource.timeout_secs);
            for leaf in leaves {
                if *self.cancel_rx.borrow() {
                    break;
                }

                let store = Arc::clone(&self.store);
                let semaphore = semaphores.get(&datasource.name).cloned();
                let driver = driver.clone();
                let run_id = run_id.clone();
                let cancel_rx = self.cancel_rx.clone();

                tasks.spawn(async move {
                    execute_leaf(leaf, driver, store, run_id, timeout, semaphore, cancel_rx).await
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| {
                WeiserError::connection("runner", format!("leaf task panicked: {}", e))
            })??;

            match outcome {
                LeafOutcome::Cancelled => {},
                LeafOutcome::Records(records) => {
                    for (record, errored) in records {
                        if errored {
                            summary.errored += 1;
                        } else if record.success {
                            summary.passed += 1;
                        } else {
                            summary.failed += 1;
                        }
                        summary.records.push(record);
                    }
                },
            }
        }

        tracing::info!(
            "run {} finished: {} passed, {} failed, {} errored",
            run_id,
            summary.passed,
            summary.failed,
            summary.errored
        );
        Ok(summary)
    }

    /// Execute just one named check and return its leaves with raw rows;
    /// nothing is recorded.
    pub async fn sample(&self, check_name: &str) -> WeiserResult<Vec<(LeafCheck, Vec<Row>)>> {
        let check = self
            .config
            .checks
            .iter()
            .find(|c| c.name == check_name)
            .ok_or_else(|| WeiserError::config(format!("unknown check '{}'", check_name)))?;

        let datasource = self.config.datasource(check.datasource.as_deref())?;
        let leaves = expand(check, &datasource.name, dialect_for(datasource.source_type))?;

        let mut out = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            let rows = match (&leaf.sql, &leaf.anomaly) {
                (Some(sql), _) => {
                    let driver = self.drivers.get(datasource).await?;
                    driver.execute(sql).await?
                },
                (None, Some(target)) => {
                    let history = self
                        .store
                        .history(
                            Some(target.target_check_id.as_str()).filter(|id| !id.is_empty()),
                            target.filter.as_deref(),
                        )
                        .await?;
                    match anomaly::modified_z_score(&history) {
                        Some(z) => vec![vec![Scalar::Float(z)]],
                        None => vec![vec![Scalar::Null]],
                    }
                },
                (None, None) => Vec::new(),
            };
            out.push((leaf, rows));
        }
        Ok(out)
    }
}

/// Expand and compose every check without executing anything. Returns the
/// printable leaves and the compile failures encountered.
pub fn compile_checks(config: &Config) -> (Vec<LeafCheck>, Vec<WeiserError>) {
    let mut leaves = Vec::new();
    let mut errors = Vec::new();

    for check in &config.checks {
        let datasource = match config.datasource(check.datasource.as_deref()) {
            Ok(ds) => ds,
            Err(e) => {
                errors.push(e);
                continue;
            },
        };
        match expand(check, &datasource.name, dialect_for(datasource.source_type)) {
            Ok(mut expanded) => leaves.append(&mut expanded),
            Err(e) => errors.push(e),
        }
    }

    (leaves, errors)
}

#[allow(clippy::too_many_arguments)]
async fn execute_leaf(
    leaf: LeafCheck,
    driver: Option<Arc<dyn SourceDriver>>,
    store: Arc<dyn MetricStore>,
    run_id: String,
    timeout: Duration,
    semaphore: Option<Arc<Semaphore>>,
    mut cancel_rx: watch::Receiver<bool>,
) -> WeiserResult<LeafOutcome> {
    if *cancel_rx.borrow() {
        return Ok(LeafOutcome::Cancelled);
    }

    let _permit = match &semaphore {
        Some(semaphore) => Some(
            Arc::clone(semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WeiserError::connection("runner", "scheduler shut down"))?,
        ),
        None => None,
    };

    let records = if let Some(target) = leaf.anomaly.clone() {
        analyze_anomaly_leaf(&leaf, &target, &store, &run_id).await
    } else {
        let Some(driver) = driver else {
            tracing::error!("leaf '{}' skipped: datasource unavailable", leaf.name);
            return flush(store, vec![(error_record(&leaf, &run_id), true)]).await;
        };
        let sql = leaf.sql.as_deref().unwrap_or_default();

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, driver.execute(sql)) => result,
            _ = cancel_rx.changed() => {
                tracing::warn!("leaf '{}' cancelled mid-query", leaf.name);
                return Ok(LeafOutcome::Cancelled);
            },
        };

        match result {
            Err(_) => {
                tracing::error!("leaf '{}' timed out after {:?}", leaf.name, timeout);
                vec![(error_record(&leaf, &run_id), true)]
            },
            Ok(Err(e)) => {
                tracing::error!("leaf '{}' failed: {}", leaf.name, e);
                vec![(error_record(&leaf, &run_id), true)]
            },
            Ok(Ok(rows)) => interpret_rows(&leaf, &run_id, rows),
        }
    };

    flush(store, records).await
}

async fn flush(
    store: Arc<dyn MetricStore>,
    records: Vec<(MetricRecord, bool)>,
) -> WeiserResult<LeafOutcome> {
    for (record, _) in &records {
        store.write(record).await?;
    }
    Ok(LeafOutcome::Records(records))
}

async fn analyze_anomaly_leaf(
    leaf: &LeafCheck,
    target: &AnomalyTarget,
    store: &Arc<dyn MetricStore>,
    run_id: &str,
) -> Vec<(MetricRecord, bool)> {
    let history = match store
        .history(
            Some(target.target_check_id.as_str()).filter(|id| !id.is_empty()),
            target.filter.as_deref(),
        )
        .await
    {
        Ok(history) => history,
        Err(e) => {
            tracing::error!("anomaly '{}' could not read history: {}", leaf.name, e);
            return vec![(error_record(leaf, run_id), true)];
        },
    };

    match anomaly::modified_z_score(&history) {
        None => {
            // Insufficient history is not an anomaly.
            tracing::warn!(
                "anomaly '{}': insufficient history ({} points, need {}); recording success",
                leaf.name,
                history.len(),
                anomaly::MIN_HISTORY
            );
            let mut record = base_record(leaf, run_id);
            record.actual_value = Some(0.0);
            record.success = true;
            record.fail = false;
            vec![(record, false)]
        },
        Some(z) => vec![evaluated_record(leaf, run_id, Some(z), vec![], None)],
    }
}

/// Turn result rows into records according to the leaf's shape.
fn interpret_rows(leaf: &LeafCheck, run_id: &str, rows: Vec<Row>) -> Vec<(MetricRecord, bool)> {
    match leaf.shape {
        ResultShape::Scalar => {
            let raw = rows
                .first()
                .and_then(|row| row.first())
                .and_then(Scalar::as_f64);
            vec![evaluated_record(leaf, run_id, raw, vec![], None)]
        },
        ResultShape::Grouped { dimensions, time_bucketed } => rows
            .iter()
            .map(|row| {
                let dims: Vec<String> =
                    row.iter().take(dimensions).map(Scalar::to_string).collect();
                let bucket = if time_bucketed {
                    row.get(dimensions).and_then(Scalar::as_timestamp)
                } else {
                    None
                };
                let raw = row.last().and_then(Scalar::as_f64);
                evaluated_record(leaf, run_id, raw, dims, bucket)
            })
            .collect(),
    }
}

fn evaluated_record(
    leaf: &LeafCheck,
    run_id: &str,
    raw: Option<f64>,
    dims: Vec<String>,
    bucket: Option<chrono::NaiveDateTime>,
) -> (MetricRecord, bool) {
    let mut record = base_record(leaf, run_id);
    record.dimensions = dims;
    record.time_bucket = bucket;

    match normalize_measurement(leaf.check_type, raw) {
        None => {
            // Observed-null policy: a NULL measurement fails the leaf.
            record.actual_value = None;
            record.success = false;
            record.fail = true;
            (record, false)
        },
        Some(value) => {
            record.actual_value = Some(value);
            match evaluate(leaf.condition, &leaf.threshold, value) {
                Ok(passed) => {
                    record.success = passed;
                    record.fail = !passed;
                    (record, false)
                },
                Err(e) => {
                    tracing::error!("leaf '{}' could not evaluate: {}", leaf.name, e);
                    record.actual_value = None;
                    record.success = false;
                    record.fail = true;
                    (record, true)
                },
            }
        },
    }
}

fn error_record(leaf: &LeafCheck, run_id: &str) -> MetricRecord {
    let mut record = base_record(leaf, run_id);
    record.actual_value = None;
    record.success = false;
    record.fail = true;
    record
}

fn base_record(leaf: &LeafCheck, run_id: &str) -> MetricRecord {
    let (threshold, threshold_list) = match leaf.threshold.range() {
        Some((lo, hi)) => (None, vec![lo, hi]),
        None => (leaf.threshold.value(), vec![]),
    };

    MetricRecord {
        id: None,
        run_id: run_id.to_string(),
        check_id: leaf.check_id.clone(),
        name: leaf.name.clone(),
        datasource: leaf.datasource.clone(),
        dataset: leaf.dataset_id.clone(),
        check_type: leaf.check_type,
        condition: leaf.condition,
        threshold,
        threshold_list,
        actual_value: None,
        success: false,
        fail: false,
        run_time: Utc::now().naive_utc(),
        dimensions: vec![],
        time_bucket: None,
    }
}
