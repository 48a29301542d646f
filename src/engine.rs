use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{DataFormat, Environment, RawRelation, RelationRows};
use crate::config::{PipelineSettings, ServiceConfig, DEFAULT_MEMORY_FRACTION};
use crate::database::DatabaseManager;
use crate::datafusion_engine::{data_type_to_string, DataFusionEngine};
use crate::domain::{CustomerFeatureRecord, FeatureRunSummary, ScoringSummary, TrainingSummary};
use crate::error::SegmentationError;
use crate::features::{
    aggregate, build_training_set, collect_features, collect_training_set, features_frame, merge,
    CUSTOMER_ID, FREQUENCY, LATEST_ORDER_DATE, RETURN_RATIO,
};
use crate::model::{FeatureVector, KMeans, SegmentationModel};
use crate::registry::{
    ensure_entity, ensure_feature_view, Entity, FeatureColumn, FeatureStore,
    FeatureView, InMemoryRegistry, ModelRegistry,
};
use crate::scaling::{NoopScaler, PipelineStage, ResourceScaler};

pub const CUSTOMER_ENTITY: &str = "CUSTOMER";

const FREQUENCY_DESCRIPTION: &str = "Average yearly order frequency";
const RETURN_RATIO_DESCRIPTION: &str = "Average of, Per Order Returns Ratio. Per order returns ratio : total returns value / total order value";

/// A registered model version restored for scoring.
pub struct ScoringModel {
    pub model_name: String,
    pub version: String,
    pub model: SegmentationModel,
}

/// Ties the raw relations, the feature pipeline, the registries and the model together.
pub struct SegmentationEngine {
    datafusion: DataFusionEngine,
    feature_store: Arc<dyn FeatureStore>,
    model_registry: Arc<dyn ModelRegistry>,
    scaler: Arc<dyn ResourceScaler>,
    settings: PipelineSettings,
    raw_source: Option<(String, DataFormat)>,
}

impl SegmentationEngine {
    pub async fn new(config: &ServiceConfig) -> Result<Self, SegmentationError> {
        info!("Initializing Segmentation Engine");

        let datafusion = DataFusionEngine::new(config.memory_limit_bytes, DEFAULT_MEMORY_FRACTION)?;

        let (feature_store, model_registry): (Arc<dyn FeatureStore>, Arc<dyn ModelRegistry>) =
            match &config.database_url {
                Some(database_url) => {
                    let database = Arc::new(DatabaseManager::new(database_url).await?);
                    info!("Using Postgres feature store and model registry");
                    let feature_store: Arc<dyn FeatureStore> = database.clone();
                    let model_registry: Arc<dyn ModelRegistry> = database;
                    (feature_store, model_registry)
                }
                None => {
                    warn!("DATABASE_URL not set; registries are kept in memory");
                    let registry = Arc::new(InMemoryRegistry::new());
                    let feature_store: Arc<dyn FeatureStore> = registry.clone();
                    let model_registry: Arc<dyn ModelRegistry> = registry;
                    (feature_store, model_registry)
                }
            };

        let mut engine = Self::with_components(
            datafusion,
            feature_store,
            model_registry,
            Arc::new(NoopScaler),
            config.pipeline.clone(),
        );
        if let Some(raw_data_url) = &config.raw_data_url {
            engine.raw_source = Some((raw_data_url.clone(), config.raw_data_format));
        }

        info!("Segmentation Engine initialized successfully");
        Ok(engine)
    }

    pub fn with_components(
        datafusion: DataFusionEngine,
        feature_store: Arc<dyn FeatureStore>,
        model_registry: Arc<dyn ModelRegistry>,
        scaler: Arc<dyn ResourceScaler>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            datafusion,
            feature_store,
            model_registry,
            scaler,
            settings,
            raw_source: None,
        }
    }

    /// In-memory registries, no raw data source; relations are registered by the caller.
    pub fn in_memory(settings: PipelineSettings) -> Result<Self, SegmentationError> {
        let registry = Arc::new(InMemoryRegistry::new());
        Ok(Self::with_components(
            DataFusionEngine::new(crate::config::DEFAULT_MEMORY_LIMIT_BYTES, DEFAULT_MEMORY_FRACTION)?,
            registry.clone(),
            registry,
            Arc::new(NoopScaler),
            settings,
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn datafusion(&self) -> &DataFusionEngine {
        &self.datafusion
    }

    pub fn feature_store(&self) -> &Arc<dyn FeatureStore> {
        &self.feature_store
    }

    pub fn model_registry(&self) -> &Arc<dyn ModelRegistry> {
        &self.model_registry
    }

    pub fn register_rows<R: RelationRows>(
        &self,
        environment: Environment,
        rows: &[R],
    ) -> Result<(), SegmentationError> {
        self.datafusion.register_rows(environment, rows)
    }

    pub async fn register_environment(
        &self,
        environment: Environment,
        base: &str,
        format: DataFormat,
    ) -> Result<(), SegmentationError> {
        self.datafusion
            .register_environment(environment, base, format)
            .await
    }

    async fn ensure_environment(&self, environment: Environment) -> Result<(), SegmentationError> {
        if self
            .datafusion
            .is_relation_registered(environment, RawRelation::Orders)
        {
            return Ok(());
        }

        if let Some((base, format)) = &self.raw_source {
            self.datafusion
                .register_environment(environment, base, *format)
                .await?;
        }
        Ok(())
    }

    async fn run_stage<T, F>(&self, stage: PipelineStage, work: F) -> Result<T, SegmentationError>
    where
        F: Future<Output = Result<T, SegmentationError>>,
    {
        self.scaler.before_stage(stage).await?;
        let result = work.await;
        if let Err(e) = self.scaler.after_stage(stage, result.is_ok()).await {
            warn!("Resource scaling after {} failed: {}", stage, e);
        }
        result
    }

    /// Merges and aggregates the raw relations of one environment into per-customer features.
    pub async fn compute_features(
        &self,
        environment: Environment,
    ) -> Result<Vec<CustomerFeatureRecord>, SegmentationError> {
        self.ensure_environment(environment).await?;
        self.datafusion.relation_row_counts(environment).await?;

        let orders = self.datafusion.relation(environment, RawRelation::Orders).await?;
        let lineitems = self
            .datafusion
            .relation(environment, RawRelation::LineItem)
            .await?;
        let returns = self
            .datafusion
            .relation(environment, RawRelation::OrderReturns)
            .await?;

        let merged = merge(orders, lineitems, returns)?;
        let features = aggregate(merged, self.settings.zero_value_policy)?;
        let records = collect_features(features).await?;

        info!(
            "Computed features for {} customers in {}",
            records.len(),
            environment
        );
        Ok(records)
    }

    fn customer_entity() -> Entity {
        Entity {
            name: CUSTOMER_ENTITY.to_string(),
            join_keys: vec![CUSTOMER_ID.to_string()],
            description: "Customer entity".to_string(),
        }
    }

    fn feature_view_definition(&self) -> Result<FeatureView, SegmentationError> {
        let frame = features_frame(self.datafusion.context(), &[])?;

        let feature_descriptions: BTreeMap<String, String> = [
            (FREQUENCY.to_string(), FREQUENCY_DESCRIPTION.to_string()),
            (RETURN_RATIO.to_string(), RETURN_RATIO_DESCRIPTION.to_string()),
        ]
        .into_iter()
        .collect();

        let columns = frame
            .schema()
            .fields()
            .iter()
            .map(|field| FeatureColumn {
                name: field.name().clone(),
                data_type: data_type_to_string(field.data_type()),
                nullable: field.is_nullable(),
                description: feature_descriptions
                    .get(field.name())
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();

        Ok(FeatureView {
            name: self.settings.feature_view_name.clone(),
            version: self.settings.feature_view_version.clone(),
            entity: CUSTOMER_ENTITY.to_string(),
            timestamp_column: LATEST_ORDER_DATE.to_string(),
            description: "Customer purchase behaviour: return ratio and yearly order frequency"
                .to_string(),
            feature_descriptions,
            columns,
            created_at: chrono::Utc::now(),
        })
    }

    /// Computes training features and publishes them to the configured feature view.
    pub async fn run_feature_pipeline(
        &self,
        environment: Environment,
    ) -> Result<FeatureRunSummary, SegmentationError> {
        if environment != Environment::Training {
            return Err(SegmentationError::InvalidArgument {
                message: format!(
                    "Feature views are published from the training environment, not {}",
                    environment
                ),
            });
        }

        self.run_stage(PipelineStage::FeatureComputation, async {
            let run_id = Uuid::new_v4().to_string();
            info!("Feature pipeline run {} started", run_id);

            let records = self.compute_features(environment).await?;

            ensure_entity(self.feature_store.as_ref(), &Self::customer_entity()).await?;
            let definition = self.feature_view_definition()?;
            let (view, created) =
                ensure_feature_view(self.feature_store.as_ref(), &definition).await?;

            self.feature_store
                .publish_features(&view.name, &view.version, &records)
                .await?;

            info!(
                "Feature pipeline run {} published {} rows to {}/{}",
                run_id,
                records.len(),
                view.name,
                view.version
            );

            Ok(FeatureRunSummary {
                run_id,
                feature_view_name: view.name,
                feature_view_version: view.version,
                created,
                records,
            })
        })
        .await
    }

    /// Fits a new model version on the published features and makes it the default.
    pub async fn train_model(
        &self,
        num_clusters: Option<usize>,
    ) -> Result<TrainingSummary, SegmentationError> {
        self.run_stage(PipelineStage::Training, async {
            let run_id = Uuid::new_v4().to_string();
            let view_name = &self.settings.feature_view_name;
            let view_version = &self.settings.feature_view_version;

            let features = self
                .feature_store
                .read_features(view_name, view_version)
                .await?;
            let frame = features_frame(self.datafusion.context(), &features)?;
            let training_set = collect_training_set(build_training_set(frame)?).await?;
            let vectors = FeatureVector::from_training_set(&training_set);

            let kmeans = KMeans::new(num_clusters.unwrap_or(self.settings.num_clusters))
                .with_max_iter(self.settings.max_iter)
                .with_n_init(self.settings.n_init)
                .with_random_state(self.settings.random_seed);

            let fitted = tokio::task::spawn_blocking(move || SegmentationModel::fit(&vectors, kmeans))
                .await
                .map_err(|e| SegmentationError::InternalError {
                    message: format!("Training task failed: {}", e),
                })??;

            let model_name = &self.settings.model_name;
            let inertia = fitted.model.inertia().unwrap_or_default();
            let comment = format!(
                "k={} customers={} inertia={:.6} features={}/{}",
                fitted.model.kmeans.n_clusters,
                fitted.assignments.len(),
                inertia,
                view_name,
                view_version
            );
            let logged = self
                .model_registry
                .log_next_version(model_name, &comment, &fitted.model.to_artifact()?)
                .await?;
            let version = logged.version;

            info!(
                "Training run {} registered {} {} (inertia {})",
                run_id, model_name, version, inertia
            );

            Ok(TrainingSummary {
                run_id,
                model_name: model_name.clone(),
                version,
                inertia,
                assignments: fitted.assignments,
            })
        })
        .await
    }

    async fn resolve_version(&self, model_name: &str, version: Option<String>) -> Result<String, SegmentationError> {
        match version {
            Some(version) => Ok(version),
            None => self
                .model_registry
                .default_version(model_name)
                .await?
                .ok_or_else(|| SegmentationError::ModelNotFound {
                    name: model_name.to_string(),
                    version: "default".to_string(),
                }),
        }
    }

    /// Resolves the requested (or default) model version and restores its artifact.
    pub async fn load_scoring_model(
        &self,
        model_name: Option<String>,
        version: Option<String>,
    ) -> Result<ScoringModel, SegmentationError> {
        let model_name = model_name.unwrap_or_else(|| self.settings.model_name.clone());
        let version = self.resolve_version(&model_name, version).await?;

        let stored = self.model_registry.load_model(&model_name, &version).await?;
        let model = SegmentationModel::from_artifact(&stored.artifact)?;
        Ok(ScoringModel {
            model_name,
            version,
            model,
        })
    }

    /// Assigns every customer of `environment` to a cluster with a registered model.
    pub async fn score_customers(
        &self,
        environment: Environment,
        model_name: Option<String>,
        version: Option<String>,
    ) -> Result<ScoringSummary, SegmentationError> {
        let scoring_model = self.load_scoring_model(model_name, version).await?;
        self.score_with_model(environment, scoring_model).await
    }

    pub async fn score_with_model(
        &self,
        environment: Environment,
        scoring_model: ScoringModel,
    ) -> Result<ScoringSummary, SegmentationError> {
        let ScoringModel {
            model_name,
            version,
            model,
        } = scoring_model;

        self.run_stage(PipelineStage::Scoring, async {
            let run_id = Uuid::new_v4().to_string();
            let features = self.compute_features(environment).await?;
            let vectors = FeatureVector::from_features(&features);
            let assignments = model.predict(&vectors)?;

            info!(
                "Scoring run {} assigned {} customers of {} with {} {}",
                run_id,
                assignments.len(),
                environment,
                model_name,
                version
            );

            Ok(ScoringSummary {
                run_id,
                model_name: model_name.clone(),
                version: version.clone(),
                assignments,
            })
        })
        .await
    }

    /// Versions in ascending order plus the current default.
    pub async fn list_model_versions(
        &self,
        model_name: Option<String>,
    ) -> Result<(String, Vec<String>, Option<String>), SegmentationError> {
        let model_name = model_name.unwrap_or_else(|| self.settings.model_name.clone());
        let versions = self.model_registry.list_versions(&model_name).await?;
        let default_version = self.model_registry.default_version(&model_name).await?;
        Ok((model_name, versions, default_version))
    }

    pub async fn health_check(&self) -> Result<(), SegmentationError> {
        self.datafusion.health_check().await
    }
}
