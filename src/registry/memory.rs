use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{
    next_version, sort_versions, Entity, FeatureStore, FeatureView, ModelRegistry, ModelVersion,
};
use crate::domain::CustomerFeatureRecord;
use crate::error::SegmentationError;

#[derive(Debug, Default)]
struct RegisteredModel {
    versions: BTreeMap<String, ModelVersion>,
    default_version: Option<String>,
}

/// Process-local registry used when no database is configured, and in tests.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entities: RwLock<HashMap<String, Entity>>,
    feature_views: RwLock<BTreeMap<(String, String), FeatureView>>,
    feature_rows: RwLock<HashMap<(String, String), Vec<CustomerFeatureRecord>>>,
    models: RwLock<HashMap<String, RegisteredModel>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn view_key(name: &str, version: &str) -> (String, String) {
    (name.to_string(), version.to_string())
}

#[tonic::async_trait]
impl FeatureStore for InMemoryRegistry {
    async fn entity_exists(&self, name: &str) -> Result<bool, SegmentationError> {
        Ok(self.entities.read().await.contains_key(name))
    }

    async fn register_entity(&self, entity: &Entity) -> Result<bool, SegmentationError> {
        let mut entities = self.entities.write().await;
        if entities.contains_key(&entity.name) {
            return Ok(false);
        }
        entities.insert(entity.name.clone(), entity.clone());
        Ok(true)
    }

    async fn get_entity(&self, name: &str) -> Result<Entity, SegmentationError> {
        self.entities
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SegmentationError::EntityNotFound {
                name: name.to_string(),
            })
    }

    async fn feature_view_exists(
        &self,
        name: &str,
        version: &str,
    ) -> Result<bool, SegmentationError> {
        Ok(self
            .feature_views
            .read()
            .await
            .contains_key(&view_key(name, version)))
    }

    async fn register_feature_view(&self, view: &FeatureView) -> Result<bool, SegmentationError> {
        if !self.entity_exists(&view.entity).await? {
            return Err(SegmentationError::EntityNotFound {
                name: view.entity.clone(),
            });
        }

        let mut views = self.feature_views.write().await;
        let key = view_key(&view.name, &view.version);
        if views.contains_key(&key) {
            return Ok(false);
        }
        views.insert(key, view.clone());
        Ok(true)
    }

    async fn get_feature_view(
        &self,
        name: &str,
        version: &str,
    ) -> Result<FeatureView, SegmentationError> {
        self.feature_views
            .read()
            .await
            .get(&view_key(name, version))
            .cloned()
            .ok_or_else(|| SegmentationError::FeatureViewNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    async fn list_feature_views(&self) -> Result<Vec<FeatureView>, SegmentationError> {
        Ok(self.feature_views.read().await.values().cloned().collect())
    }

    async fn publish_features(
        &self,
        name: &str,
        version: &str,
        records: &[CustomerFeatureRecord],
    ) -> Result<(), SegmentationError> {
        if !self.feature_view_exists(name, version).await? {
            return Err(SegmentationError::FeatureViewNotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        let mut sorted = records.to_vec();
        sorted.sort_by_key(|r| r.customer_id);
        self.feature_rows
            .write()
            .await
            .insert(view_key(name, version), sorted);
        Ok(())
    }

    async fn read_features(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<CustomerFeatureRecord>, SegmentationError> {
        if !self.feature_view_exists(name, version).await? {
            return Err(SegmentationError::FeatureViewNotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        Ok(self
            .feature_rows
            .read()
            .await
            .get(&view_key(name, version))
            .cloned()
            .unwrap_or_default())
    }
}

#[tonic::async_trait]
impl ModelRegistry for InMemoryRegistry {
    async fn model_exists(&self, name: &str) -> Result<bool, SegmentationError> {
        Ok(self.models.read().await.contains_key(name))
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<String>, SegmentationError> {
        let models = self.models.read().await;
        let mut versions: Vec<String> = models
            .get(name)
            .map(|m| m.versions.keys().cloned().collect())
            .unwrap_or_default();
        sort_versions(&mut versions);
        Ok(versions)
    }

    async fn log_model(&self, version: &ModelVersion) -> Result<(), SegmentationError> {
        let mut models = self.models.write().await;
        let model = models.entry(version.model_name.clone()).or_default();
        if model.versions.contains_key(&version.version) {
            return Err(SegmentationError::InvalidArgument {
                message: format!(
                    "Model {} already has a version {}",
                    version.model_name, version.version
                ),
            });
        }
        model
            .versions
            .insert(version.version.clone(), version.clone());
        Ok(())
    }

    async fn log_next_version(
        &self,
        name: &str,
        comment: &str,
        artifact: &serde_json::Value,
    ) -> Result<ModelVersion, SegmentationError> {
        let mut models = self.models.write().await;
        let model = models.entry(name.to_string()).or_default();
        let existing: Vec<String> = model.versions.keys().cloned().collect();

        let version = ModelVersion {
            model_name: name.to_string(),
            version: next_version(&existing),
            comment: comment.to_string(),
            artifact: artifact.clone(),
            created_at: Utc::now(),
        };
        model
            .versions
            .insert(version.version.clone(), version.clone());
        model.default_version = Some(version.version.clone());
        Ok(version)
    }

    async fn set_default_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<(), SegmentationError> {
        let mut models = self.models.write().await;
        match models.get_mut(name) {
            Some(model) if model.versions.contains_key(version) => {
                model.default_version = Some(version.to_string());
                Ok(())
            }
            _ => Err(SegmentationError::ModelNotFound {
                name: name.to_string(),
                version: version.to_string(),
            }),
        }
    }

    async fn default_version(&self, name: &str) -> Result<Option<String>, SegmentationError> {
        Ok(self
            .models
            .read()
            .await
            .get(name)
            .and_then(|m| m.default_version.clone()))
    }

    async fn load_model(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModelVersion, SegmentationError> {
        self.models
            .read()
            .await
            .get(name)
            .and_then(|m| m.versions.get(version))
            .cloned()
            .ok_or_else(|| SegmentationError::ModelNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}
