mod common;

use chrono::Utc;
use common::{date, init_test_logging, SlowFeatureStore};
use customer_segmentation_service::domain::CustomerFeatureRecord;
use customer_segmentation_service::error::SegmentationError;
use customer_segmentation_service::registry::{
    ensure_entity, ensure_feature_view, next_version, Entity, FeatureStore, FeatureView,
    InMemoryRegistry, ModelRegistry, ModelVersion,
};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

fn customer_entity() -> Entity {
    Entity {
        name: "CUSTOMER".to_string(),
        join_keys: vec!["customer_id".to_string()],
        description: "Customer entity".to_string(),
    }
}

fn feature_view(description: &str) -> FeatureView {
    FeatureView {
        name: "FV_UC01_PREPROCESS".to_string(),
        version: "V_1".to_string(),
        entity: "CUSTOMER".to_string(),
        timestamp_column: "latest_order_date".to_string(),
        description: description.to_string(),
        feature_descriptions: BTreeMap::new(),
        columns: vec![],
        created_at: Utc::now(),
    }
}

fn model_version(version: &str) -> ModelVersion {
    ModelVersion {
        model_name: "UC01_KMEANS_MODEL".to_string(),
        version: version.to_string(),
        comment: String::new(),
        artifact: serde_json::json!({ "version": version }),
        created_at: Utc::now(),
    }
}

#[test]
fn test_next_version_starts_at_one_and_uses_numeric_order() {
    assert_eq!(next_version(&[]), "V_1");
    assert_eq!(next_version(&["V_1".to_string()]), "V_2");
    assert_eq!(
        next_version(&["V_9".to_string(), "V_10".to_string(), "V_2".to_string()]),
        "V_11"
    );
    assert_eq!(next_version(&["latest".to_string()]), "V_1");
}

#[tokio::test]
async fn test_logging_a_model_twice_yields_v1_then_v2() {
    init_test_logging();

    // Given
    let registry = InMemoryRegistry::new();
    assert!(!registry.model_exists("UC01_KMEANS_MODEL").await.unwrap());

    // When
    let first = next_version(&registry.list_versions("UC01_KMEANS_MODEL").await.unwrap());
    registry.log_model(&model_version(&first)).await.unwrap();
    registry
        .set_default_version("UC01_KMEANS_MODEL", &first)
        .await
        .unwrap();
    let second = next_version(&registry.list_versions("UC01_KMEANS_MODEL").await.unwrap());
    registry.log_model(&model_version(&second)).await.unwrap();
    registry
        .set_default_version("UC01_KMEANS_MODEL", &second)
        .await
        .unwrap();

    // Then
    assert_eq!(first, "V_1");
    assert_eq!(second, "V_2");
    assert!(registry.model_exists("UC01_KMEANS_MODEL").await.unwrap());
    assert_eq!(
        registry.list_versions("UC01_KMEANS_MODEL").await.unwrap(),
        vec!["V_1", "V_2"]
    );
    assert_eq!(
        registry.default_version("UC01_KMEANS_MODEL").await.unwrap(),
        Some("V_2".to_string())
    );
    let loaded = registry.load_model("UC01_KMEANS_MODEL", "V_1").await.unwrap();
    assert_eq!(loaded.artifact["version"], "V_1");
}

#[tokio::test]
async fn test_versions_are_listed_in_numeric_order() {
    init_test_logging();

    // Given
    let registry = InMemoryRegistry::new();
    for n in 1..=11 {
        registry
            .log_model(&model_version(&format!("V_{}", n)))
            .await
            .unwrap();
    }

    // When
    let versions = registry.list_versions("UC01_KMEANS_MODEL").await.unwrap();

    // Then
    assert_eq!(versions.first().map(String::as_str), Some("V_1"));
    assert_eq!(versions.last().map(String::as_str), Some("V_11"));
    assert_eq!(next_version(&versions), "V_12");
}

#[tokio::test]
async fn test_model_registry_rejects_unknown_and_duplicate_versions() {
    init_test_logging();

    // Given
    let registry = InMemoryRegistry::new();
    registry.log_model(&model_version("V_1")).await.unwrap();

    // When / Then
    assert!(matches!(
        registry.log_model(&model_version("V_1")).await,
        Err(SegmentationError::InvalidArgument { .. })
    ));
    assert!(matches!(
        registry.set_default_version("UC01_KMEANS_MODEL", "V_7").await,
        Err(SegmentationError::ModelNotFound { .. })
    ));
    assert!(matches!(
        registry.load_model("OTHER_MODEL", "V_1").await,
        Err(SegmentationError::ModelNotFound { .. })
    ));
    assert_eq!(registry.default_version("OTHER_MODEL").await.unwrap(), None);
    assert!(registry.list_versions("OTHER_MODEL").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_feature_definitions_are_created_only_once() {
    init_test_logging();

    // Given
    let store = InMemoryRegistry::new();

    // When: the same entity and view are ensured twice, the second with a new description
    ensure_entity(&store, &customer_entity()).await.unwrap();
    ensure_entity(&store, &customer_entity()).await.unwrap();
    let (first, first_created) = ensure_feature_view(&store, &feature_view("original"))
        .await
        .unwrap();
    let (second, second_created) = ensure_feature_view(&store, &feature_view("changed"))
        .await
        .unwrap();

    // Then: the existing definition is reused
    assert!(first_created);
    assert!(!second_created);
    assert_eq!(second.description, "original");
    assert_eq!(first, second);
    assert_eq!(store.list_feature_views().await.unwrap().len(), 1);
    assert_eq!(store.get_entity("CUSTOMER").await.unwrap(), customer_entity());
}

#[tokio::test]
async fn test_feature_view_requires_a_registered_entity() {
    init_test_logging();

    let store = InMemoryRegistry::new();
    assert!(matches!(
        store.register_feature_view(&feature_view("orphan")).await,
        Err(SegmentationError::EntityNotFound { .. })
    ));
}

#[tokio::test]
async fn test_publishing_replaces_previous_feature_rows() {
    init_test_logging();

    // Given
    let store = InMemoryRegistry::new();
    ensure_entity(&store, &customer_entity()).await.unwrap();
    ensure_feature_view(&store, &feature_view("features")).await.unwrap();
    let row = |customer_id: i64, frequency: f64| CustomerFeatureRecord {
        customer_id,
        return_ratio: Some(0.1),
        frequency,
        latest_order_date: date(2024, 2, 1),
    };

    // When
    store
        .publish_features("FV_UC01_PREPROCESS", "V_1", &[row(2, 1.0), row(1, 1.0)])
        .await
        .unwrap();
    store
        .publish_features("FV_UC01_PREPROCESS", "V_1", &[row(3, 4.0)])
        .await
        .unwrap();

    // Then
    let rows = store.read_features("FV_UC01_PREPROCESS", "V_1").await.unwrap();
    assert_eq!(rows, vec![row(3, 4.0)]);
    assert!(matches!(
        store.read_features("FV_UC01_PREPROCESS", "V_2").await,
        Err(SegmentationError::FeatureViewNotFound { .. })
    ));
}

#[tokio::test]
async fn test_registering_an_existing_definition_is_not_an_error() {
    init_test_logging();

    // Given
    let store = InMemoryRegistry::new();

    // When
    let first_entity = store.register_entity(&customer_entity()).await.unwrap();
    let second_entity = store.register_entity(&customer_entity()).await.unwrap();
    let first_view = store
        .register_feature_view(&feature_view("original"))
        .await
        .unwrap();
    let second_view = store
        .register_feature_view(&feature_view("changed"))
        .await
        .unwrap();

    // Then: only the first call inserts, the stored definition is untouched
    assert!(first_entity);
    assert!(!second_entity);
    assert!(first_view);
    assert!(!second_view);
    let stored = store
        .get_feature_view("FV_UC01_PREPROCESS", "V_1")
        .await
        .unwrap();
    assert_eq!(stored.description, "original");
}

#[tokio::test]
async fn test_overlapping_ensure_calls_both_succeed() {
    init_test_logging();

    // Given: a store that yields between the existence check and the insert
    let store = SlowFeatureStore::new(Duration::from_millis(20));

    // When
    let (entity_def_a, entity_def_b) = (customer_entity(), customer_entity());
    let (entity_a, entity_b) = tokio::join!(
        ensure_entity(&store, &entity_def_a),
        ensure_entity(&store, &entity_def_b)
    );
    let (view_def_a, view_def_b) = (feature_view("a"), feature_view("b"));
    let (view_a, view_b) = tokio::join!(
        ensure_feature_view(&store, &view_def_a),
        ensure_feature_view(&store, &view_def_b)
    );

    // Then: both callers see the same definitions and exactly one created the view
    assert_eq!(entity_a.unwrap(), customer_entity());
    assert_eq!(entity_b.unwrap(), customer_entity());
    let (view_a, created_a) = view_a.unwrap();
    let (view_b, created_b) = view_b.unwrap();
    assert!(created_a ^ created_b);
    assert_eq!(view_a, view_b);
    assert_eq!(store.list_feature_views().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_version_allocation_is_strictly_incrementing() {
    init_test_logging();

    // Given
    let registry = InMemoryRegistry::new();
    let artifact = serde_json::json!({ "k": 2 });

    // When
    let (a, b) = tokio::join!(
        registry.log_next_version("UC01_KMEANS_MODEL", "first", &artifact),
        registry.log_next_version("UC01_KMEANS_MODEL", "second", &artifact)
    );

    // Then
    let versions: HashSet<String> = [a.unwrap().version, b.unwrap().version].into();
    assert_eq!(versions, HashSet::from(["V_1".to_string(), "V_2".to_string()]));
    assert_eq!(
        registry.list_versions("UC01_KMEANS_MODEL").await.unwrap(),
        vec!["V_1", "V_2"]
    );
    assert_eq!(
        registry.default_version("UC01_KMEANS_MODEL").await.unwrap(),
        Some("V_2".to_string())
    );
}

#[tokio::test]
async fn test_next_version_follows_explicitly_logged_versions() {
    init_test_logging();

    // Given
    let registry = InMemoryRegistry::new();
    registry.log_model(&model_version("V_9")).await.unwrap();

    // When
    let logged = registry
        .log_next_version("UC01_KMEANS_MODEL", "", &serde_json::json!({}))
        .await
        .unwrap();

    // Then
    assert_eq!(logged.version, "V_10");
    assert_eq!(logged.model_name, "UC01_KMEANS_MODEL");
    assert_eq!(
        registry.default_version("UC01_KMEANS_MODEL").await.unwrap(),
        Some("V_10".to_string())
    );
}
