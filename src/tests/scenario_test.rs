// Seeded end-to-end scenarios, executed fully in-process against a
// DuckDB source and an in-memory metric store.

use crate::engine::Runner;
use crate::store::MetricStore;
use crate::tests::common;

#[tokio::test]
async fn test_simple_row_count_pass() {
    let db = common::temp_db_path("rowcount");
    common::seed_source(&db);
    let config = common::config_with_checks(
        &db,
        r#"  - name: orders_count
    dataset: orders
    type: row_count
    condition: gt
    threshold: 0
"#,
    );

    let store = common::memory_store().await;
    let runner = Runner::new(config, store.clone());
    let summary = runner.run().await.unwrap();

    assert_eq!(summary.records.len(), 1);
    let record = &summary.records[0];
    assert_eq!(record.actual_value, Some(4.0));
    assert!(record.success);
    assert!(!record.fail);
    assert_eq!(summary.passed, 1);

    // The evaluation is also persisted.
    assert_eq!(
        store.history(Some(&record.check_id), None).await.unwrap(),
        vec![4.0]
    );

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_dataset_list_fan_out() {
    let db = common::temp_db_path("fanout");
    common::seed_source(&db);
    let config = common::config_with_checks(
        &db,
        r#"  - name: table_counts
    dataset: [orders, vendors]
    type: row_count
    condition: gt
    threshold: 0
"#,
    );

    let store = common::memory_store().await;
    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();

    assert_eq!(summary.records.len(), 2);
    assert!(summary.records.iter().all(|r| r.success));
    let mut actuals: Vec<f64> =
        summary.records.iter().filter_map(|r| r.actual_value).collect();
    actuals.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(actuals, vec![3.0, 4.0]);

    // Same declared name, different check ids because the dataset differs.
    assert_eq!(summary.records[0].name, summary.records[1].name);
    assert_ne!(summary.records[0].check_id, summary.records[1].check_id);

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_dimensional_row_count() {
    let db = common::temp_db_path("dims");
    common::seed_source(&db);
    let config = common::config_with_checks(
        &db,
        r#"  - name: vendors_by_tenant
    dataset: vendors
    type: row_count
    dimensions: [tenant_id]
    condition: gt
    threshold: 0
"#,
    );

    let store = common::memory_store().await;
    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();

    assert_eq!(summary.records.len(), 2);
    let by_dim: Vec<(Vec<String>, f64)> = summary
        .records
        .iter()
        .map(|r| (r.dimensions.clone(), r.actual_value.unwrap()))
        .collect();
    assert!(by_dim.contains(&(vec!["1".to_string()], 2.0)));
    assert!(by_dim.contains(&(vec!["2".to_string()], 1.0)));

    // Partitions of one declaration share a check id.
    assert_eq!(summary.records[0].check_id, summary.records[1].check_id);

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_between_sum_pass_and_fail() {
    let db = common::temp_db_path("between");
    common::seed_source(&db);
    let config = common::config_with_checks(
        &db,
        r#"  - name: budget_in_band
    dataset: orders
    type: numeric
    measure: "sum(budgeted_amount)"
    condition: between
    threshold: [1000, 2000]
  - name: q2_budget_in_band
    dataset: orders_q2
    type: numeric
    measure: "sum(budgeted_amount)"
    condition: between
    threshold: [1000, 2000]
"#,
    );

    let store = common::memory_store().await;
    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();

    let pass = summary
        .records
        .iter()
        .find(|r| r.name == "budget_in_band")
        .unwrap();
    assert_eq!(pass.actual_value, Some(1006.0));
    assert!(pass.success);
    assert_eq!(pass.threshold, None);
    assert_eq!(pass.threshold_list, vec![1000.0, 2000.0]);

    // The q2 sum of 2500.00 falls outside the band.
    let fail = summary
        .records
        .iter()
        .find(|r| r.name == "q2_budget_in_band")
        .unwrap();
    assert_eq!(fail.actual_value, Some(2500.0));
    assert!(fail.fail);
    assert_eq!(fail.threshold_list, vec![1000.0, 2000.0]);

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_not_empty_per_dimension() {
    let db = common::temp_db_path("notempty");
    common::seed_source(&db);
    let config = common::config_with_checks(
        &db,
        r#"  - name: customers_complete
    dataset: customers
    type: not_empty
    dimensions: [email, phone]
    condition: le
    threshold: 0
"#,
    );

    let store = common::memory_store().await;
    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();

    assert_eq!(summary.records.len(), 2);

    let email = summary
        .records
        .iter()
        .find(|r| r.name == "customers_complete_email_not_empty")
        .unwrap();
    assert_eq!(email.actual_value, Some(3.0));
    assert!(email.fail);

    let phone = summary
        .records
        .iter()
        .find(|r| r.name == "customers_complete_phone_not_empty")
        .unwrap();
    assert_eq!(phone.actual_value, Some(0.0));
    assert!(phone.success);

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_not_empty_pct_ratio() {
    let db = common::temp_db_path("notemptypct");
    common::seed_source(&db);
    let config = common::config_with_checks(
        &db,
        r#"  - name: customers_ratio
    dataset: customers
    type: not_empty_pct
    dimensions: [email]
    condition: le
    threshold: 0.5
"#,
    );

    let store = common::memory_store().await;
    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();

    let record = &summary.records[0];
    assert_eq!(record.name, "customers_ratio_email_not_empty_pct");
    // 3 of 5 emails are NULL.
    assert_eq!(record.actual_value, Some(0.6));
    assert!(record.fail);

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_anomaly_constant_history_then_outlier() {
    let db = common::temp_db_path("anomaly");
    common::seed_source(&db);
    let store = common::memory_store().await;

    let target_id = "0f3a".repeat(16);
    common::seed_history(&store, &target_id, &[100.0; 10]).await;

    let config = common::config_with_checks(
        &db,
        &format!(
            r#"  - name: orders_count_drift
    dataset: metrics
    type: anomaly
    check_id: "{}"
    condition: between
    threshold: [-3.5, 3.5]
"#,
            target_id
        ),
    );

    // Constant history: MAD = 0, z = 0, in band.
    let runner = Runner::new(config.clone(), store.clone());
    let summary = runner.run().await.unwrap();
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].actual_value, Some(0.0));
    assert!(summary.records[0].success);

    // Inject an extreme new point and rerun: far out of band.
    common::seed_history(&store, &target_id, &[10_000.0]).await;
    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();
    assert_eq!(summary.records.len(), 1);
    let z = summary.records[0].actual_value.unwrap();
    assert!(z.abs() > 3.5, "expected |z| >> 3.5, got {}", z);
    assert!(summary.records[0].fail);

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_anomaly_insufficient_history_is_success() {
    let db = common::temp_db_path("anomaly-short");
    common::seed_source(&db);
    let store = common::memory_store().await;

    let target_id = "ab".repeat(32);
    common::seed_history(&store, &target_id, &[5.0, 6.0, 7.0]).await;

    let config = common::config_with_checks(
        &db,
        &format!(
            r#"  - name: short_drift
    dataset: metrics
    type: anomaly
    check_id: "{}"
    condition: between
    threshold: [-3.5, 3.5]
"#,
            target_id
        ),
    );

    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();

    // Insufficient history is not an anomaly.
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].actual_value, Some(0.0));
    assert!(summary.records[0].success);
    assert_eq!(summary.errored, 0);

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_anomaly_filter_narrows_history() {
    let db = common::temp_db_path("anomaly-filter");
    common::seed_source(&db);
    let store = common::memory_store().await;

    // Ten steady points on 'orders', one wild point on 'vendors' under the
    // same check id; the filter keeps the analysis on orders only.
    let target_id = "cd".repeat(32);
    common::seed_history(&store, &target_id, &[100.0; 10]).await;
    let mut stray = common::history_record(
        &target_id,
        10_000.0,
        chrono::Utc::now().naive_utc() + chrono::Duration::seconds(60),
    );
    stray.dataset = "vendors".into();
    store.write(&stray).await.unwrap();

    let config = common::config_with_checks(
        &db,
        &format!(
            r#"  - name: filtered_drift
    dataset: metrics
    type: anomaly
    check_id: "{}"
    filter: "dataset = 'orders'"
    condition: between
    threshold: [-3.5, 3.5]
"#,
            target_id
        ),
    );

    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();
    assert_eq!(summary.records[0].actual_value, Some(0.0));
    assert!(summary.records[0].success);

    common::cleanup_db(&db);
}

#[tokio::test]
async fn test_time_bucketed_row_count() {
    let db = common::temp_db_path("buckets");
    common::seed_source(&db);
    let config = common::config_with_checks(
        &db,
        r#"  - name: orders_per_day
    dataset: orders
    type: row_count
    time_dimension:
      name: created_at
      granularity: day
    condition: gt
    threshold: 0
"#,
    );

    let store = common::memory_store().await;
    let runner = Runner::new(config, store);
    let summary = runner.run().await.unwrap();

    // Fixture orders span three distinct days, one bucket per day.
    assert_eq!(summary.records.len(), 3);
    assert!(summary.records.iter().all(|r| r.success));
    assert!(summary.records.iter().all(|r| r.time_bucket.is_some()));
    let mut counts: Vec<f64> =
        summary.records.iter().filter_map(|r| r.actual_value).collect();
    counts.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(counts, vec![1.0, 1.0, 2.0]);

    common::cleanup_db(&db);
}
