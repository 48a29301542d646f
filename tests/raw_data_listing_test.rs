mod common;

use common::{assert_close, init_test_logging, test_engine};
use customer_segmentation_service::catalog::{DataFormat, Environment, RawRelation};
use customer_segmentation_service::error::SegmentationError;
use customer_segmentation_service::features::{aggregate, collect_features, merge, ZeroValuePolicy};
use std::fs;
use std::path::Path;

fn write_csv(base: &Path, environment: &str, table: &str, header: &[&str], rows: &[Vec<&str>]) {
    let dir = base.join(environment).join(table);
    fs::create_dir_all(&dir).expect("create relation directory");

    let mut writer = csv::Writer::from_path(dir.join("part-0.csv")).expect("open csv");
    writer.write_record(header).expect("write header");
    for row in rows {
        writer.write_record(row).expect("write row");
    }
    writer.flush().expect("flush csv");
}

fn write_training_relations(base: &Path) {
    write_csv(
        base,
        "TRAINING",
        "CUSTOMER",
        &["C_CUSTOMER_SK"],
        &[vec!["100"], vec!["200"]],
    );
    write_csv(
        base,
        "TRAINING",
        "ORDERS",
        &["O_ORDER_ID", "O_CUSTOMER_SK", "ORDER_DATE", "WEEKDAY"],
        &[
            vec!["1", "100", "2023-03-01", "Wed"],
            vec!["2", "100", "2023-06-15", "Thu"],
            vec!["3", "200", "2023-04-02", "Sun"],
        ],
    );
    write_csv(
        base,
        "TRAINING",
        "LINEITEM",
        &["LI_ORDER_ID", "LI_PRODUCT_ID", "QUANTITY", "PRICE"],
        &[
            vec!["1", "10", "10", "10.00"],
            vec!["2", "11", "5", "10.00"],
            vec!["3", "12", "3", "0.00"],
        ],
    );
    write_csv(
        base,
        "TRAINING",
        "ORDER_RETURNS",
        &["OR_ORDER_ID", "OR_PRODUCT_ID", "OR_RETURN_QUANTITY"],
        &[vec!["1", "10", "1"]],
    );
}

#[tokio::test]
async fn test_csv_relations_with_upper_case_headers_feed_the_pipeline() {
    init_test_logging();

    // Given: CSV files laid out as <base>/<ENVIRONMENT>/<TABLE>/
    let dir = tempfile::tempdir().expect("temp dir");
    write_training_relations(dir.path());
    let engine = test_engine();
    let base = dir.path().to_str().expect("utf-8 path");

    // When
    engine
        .register_environment(Environment::Training, base, DataFormat::Csv)
        .await
        .expect("register training relations");
    let counts = engine
        .relation_row_counts(Environment::Training)
        .await
        .expect("row counts");

    // Then: every relation is registered and counted
    assert_eq!(
        counts,
        vec![
            (RawRelation::Customer, 2),
            (RawRelation::Orders, 3),
            (RawRelation::LineItem, 3),
            (RawRelation::OrderReturns, 1),
        ]
    );

    // And: the normalised relations compute the expected features
    let merged = merge(
        engine.relation(Environment::Training, RawRelation::Orders).await.unwrap(),
        engine.relation(Environment::Training, RawRelation::LineItem).await.unwrap(),
        engine
            .relation(Environment::Training, RawRelation::OrderReturns)
            .await
            .unwrap(),
    )
    .unwrap();
    let features = collect_features(aggregate(merged, ZeroValuePolicy::AsZero).unwrap())
        .await
        .unwrap();
    assert_eq!(features.len(), 2);
    assert_close(features[0].return_ratio.unwrap(), 0.05);
    assert_close(features[0].frequency, 2.0);
    assert_eq!(features[1].return_ratio, Some(0.0));
}

#[tokio::test]
async fn test_missing_required_column_is_a_schema_error() {
    init_test_logging();

    // Given: ORDERS without an order date
    let dir = tempfile::tempdir().expect("temp dir");
    write_training_relations(dir.path());
    write_csv(
        dir.path(),
        "SCORING",
        "ORDERS",
        &["O_ORDER_ID", "O_CUSTOMER_SK"],
        &[vec!["1", "100"]],
    );
    let engine = test_engine();
    let base_url = customer_segmentation_service::storage::resolve_base_url(
        dir.path().to_str().expect("utf-8 path"),
    )
    .unwrap();
    engine
        .register_listing(Environment::Scoring, RawRelation::Orders, &base_url, DataFormat::Csv)
        .await
        .expect("register ORDERS");

    // When
    let result = engine.relation(Environment::Scoring, RawRelation::Orders).await;

    // Then
    match result {
        Err(SegmentationError::MissingColumn { relation, column }) => {
            assert_eq!(relation, "ORDERS");
            assert_eq!(column, "order_date");
        }
        Err(other) => panic!("expected MissingColumn, got {}", other),
        Ok(_) => panic!("expected MissingColumn"),
    }
}
