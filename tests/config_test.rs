use customer_segmentation_service::catalog::DataFormat;
use customer_segmentation_service::config::{ServiceConfig, DEFAULT_MEMORY_LIMIT_BYTES};
use customer_segmentation_service::domain::{ClusterAssignment, ScoringSummary};
use customer_segmentation_service::error::SegmentationError;
use customer_segmentation_service::features::ZeroValuePolicy;
use std::collections::HashMap;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn test_defaults_apply_when_nothing_is_set() {
    // When
    let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();

    // Then
    assert_eq!(config.grpc_port, 50051);
    assert_eq!(config.raw_data_url, None);
    assert_eq!(config.raw_data_format, DataFormat::Parquet);
    assert_eq!(config.database_url, None);
    assert_eq!(config.memory_limit_bytes, DEFAULT_MEMORY_LIMIT_BYTES);
    assert_eq!(config.pipeline.num_clusters, 5);
    assert_eq!(config.pipeline.random_seed, 0);
    assert_eq!(config.pipeline.max_iter, 300);
    assert_eq!(config.pipeline.n_init, 10);
    assert_eq!(config.pipeline.model_name, "UC01_KMEANS_MODEL");
    assert_eq!(config.pipeline.feature_view_name, "FV_UC01_PREPROCESS");
    assert_eq!(config.pipeline.feature_view_version, "V_1");
    assert_eq!(config.pipeline.zero_value_policy, ZeroValuePolicy::AsZero);
}

#[test]
fn test_environment_values_override_defaults() {
    // Given
    let vars = [
        ("GRPC_PORT", "6000"),
        ("RAW_DATA_URL", "gs://bucket/raw"),
        ("RAW_DATA_FORMAT", "CSV"),
        ("DATABASE_URL", "postgres://user:secret@db:5432/registry"),
        ("NUM_CLUSTERS", "3"),
        ("RANDOM_SEED", "42"),
        ("ZERO_VALUE_POLICY", "exclude"),
        ("MODEL_NAME", ""),
    ];

    // When
    let config = ServiceConfig::from_lookup(lookup(&vars)).unwrap();

    // Then
    assert_eq!(config.grpc_port, 6000);
    assert_eq!(config.raw_data_url.as_deref(), Some("gs://bucket/raw"));
    assert_eq!(config.raw_data_format, DataFormat::Csv);
    assert_eq!(config.pipeline.num_clusters, 3);
    assert_eq!(config.pipeline.random_seed, 42);
    assert_eq!(config.pipeline.zero_value_policy, ZeroValuePolicy::Exclude);
    assert_eq!(config.pipeline.model_name, "UC01_KMEANS_MODEL");
    assert_eq!(
        config.redacted_database_url().as_deref(),
        Some("postgres://***@db:5432/registry")
    );
}

#[test]
fn test_invalid_values_are_configuration_errors() {
    for vars in [
        [("GRPC_PORT", "not-a-port")],
        [("NUM_CLUSTERS", "0")],
        [("ZERO_VALUE_POLICY", "propagate")],
        [("RAW_DATA_FORMAT", "xlsx")],
    ] {
        let result = ServiceConfig::from_lookup(lookup(&vars));
        assert!(
            matches!(result, Err(SegmentationError::ConfigError { .. })),
            "{:?} should be rejected",
            vars
        );
    }
}

#[test]
fn test_scoring_results_are_streamed_in_bounded_chunks() {
    // Given
    let summary = ScoringSummary {
        run_id: "run".to_string(),
        model_name: "UC01_KMEANS_MODEL".to_string(),
        version: "V_1".to_string(),
        assignments: (0..2_500)
            .map(|customer_id| ClusterAssignment {
                customer_id,
                return_ratio_scaled: 0.0,
                frequency_scaled: 1.0,
                cluster: (customer_id % 3) as u32,
            })
            .collect(),
    };

    // When
    let chunks = summary.into_chunks(1_000);

    // Then
    assert_eq!(
        chunks.iter().map(|c| c.assignments.len()).collect::<Vec<_>>(),
        vec![1_000, 1_000, 500]
    );
    assert_eq!(
        chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(chunks[2].assignments[0].customer_id, 2_000);
}
