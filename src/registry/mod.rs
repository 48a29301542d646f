//! Feature and model registries.
//!
//! Both registries expose explicit existence checks; the `ensure_*` helpers
//! create a definition only when it is absent and otherwise reuse it.
//! Registration is insert-if-absent inside each store, so overlapping callers
//! never see an existing definition as an error.

mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::domain::CustomerFeatureRecord;
use crate::error::SegmentationError;

pub use memory::InMemoryRegistry;

pub const VERSION_PREFIX: &str = "V_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub join_keys: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureView {
    pub name: String,
    pub version: String,
    pub entity: String,
    pub timestamp_column: String,
    pub description: String,
    pub feature_descriptions: BTreeMap<String, String>,
    pub columns: Vec<FeatureColumn>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_name: String,
    pub version: String,
    pub comment: String,
    pub artifact: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[tonic::async_trait]
pub trait FeatureStore: Send + Sync {
    async fn entity_exists(&self, name: &str) -> Result<bool, SegmentationError>;

    /// Inserts the entity unless one with the same name exists. Returns whether it was inserted.
    async fn register_entity(&self, entity: &Entity) -> Result<bool, SegmentationError>;

    async fn get_entity(&self, name: &str) -> Result<Entity, SegmentationError>;

    async fn feature_view_exists(&self, name: &str, version: &str)
        -> Result<bool, SegmentationError>;

    /// Inserts the view unless `(name, version)` exists. Returns whether it was inserted.
    async fn register_feature_view(&self, view: &FeatureView) -> Result<bool, SegmentationError>;

    async fn get_feature_view(
        &self,
        name: &str,
        version: &str,
    ) -> Result<FeatureView, SegmentationError>;

    async fn list_feature_views(&self) -> Result<Vec<FeatureView>, SegmentationError>;

    /// Replaces every published row of the feature view.
    async fn publish_features(
        &self,
        name: &str,
        version: &str,
        records: &[CustomerFeatureRecord],
    ) -> Result<(), SegmentationError>;

    async fn read_features(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<CustomerFeatureRecord>, SegmentationError>;
}

#[tonic::async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn model_exists(&self, name: &str) -> Result<bool, SegmentationError>;

    /// Versions of a model in ascending numeric order; empty for an unknown model.
    async fn list_versions(&self, name: &str) -> Result<Vec<String>, SegmentationError>;

    /// Stores an explicitly numbered version; an existing version is rejected.
    async fn log_model(&self, version: &ModelVersion) -> Result<(), SegmentationError>;

    /// Allocates `next_version` and stores the artifact under it as one atomic step,
    /// then makes it the default version.
    async fn log_next_version(
        &self,
        name: &str,
        comment: &str,
        artifact: &serde_json::Value,
    ) -> Result<ModelVersion, SegmentationError>;

    async fn set_default_version(&self, name: &str, version: &str)
        -> Result<(), SegmentationError>;

    async fn default_version(&self, name: &str) -> Result<Option<String>, SegmentationError>;

    async fn load_model(&self, name: &str, version: &str)
        -> Result<ModelVersion, SegmentationError>;
}

pub fn parse_version(version: &str) -> Option<u64> {
    version.strip_prefix(VERSION_PREFIX)?.parse().ok()
}

pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by_key(|v| (parse_version(v).unwrap_or(0), v.clone()));
}

/// `V_1` when nothing exists yet, otherwise one past the highest numbered version.
pub fn next_version(existing: &[String]) -> String {
    let next = existing
        .iter()
        .filter_map(|v| parse_version(v))
        .max()
        .map_or(1, |n| n + 1);
    format!("{}{}", VERSION_PREFIX, next)
}

pub async fn ensure_entity(
    store: &dyn FeatureStore,
    entity: &Entity,
) -> Result<Entity, SegmentationError> {
    if !store.entity_exists(&entity.name).await? && store.register_entity(entity).await? {
        info!("Entity {} registered", entity.name);
        return Ok(entity.clone());
    }

    info!("Entity {} already registered", entity.name);
    store.get_entity(&entity.name).await
}

/// Returns the registered view and whether this call created it.
pub async fn ensure_feature_view(
    store: &dyn FeatureStore,
    view: &FeatureView,
) -> Result<(FeatureView, bool), SegmentationError> {
    if !store.feature_view_exists(&view.name, &view.version).await?
        && store.register_feature_view(view).await?
    {
        info!("Feature view {}/{} registered", view.name, view.version);
        return Ok((view.clone(), true));
    }

    info!("Feature view {}/{} already registered", view.name, view.version);
    let existing = store.get_feature_view(&view.name, &view.version).await?;
    Ok((existing, false))
}
