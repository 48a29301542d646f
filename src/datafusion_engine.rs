use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::catalog::{CatalogProvider, MemoryCatalogProvider, MemorySchemaProvider, SchemaProvider};
use datafusion::common::TableReference;
use datafusion::datasource::listing::{
    ListingOptions, ListingTable, ListingTableConfig, ListingTableUrl,
};
use datafusion::datasource::MemTable;
use datafusion::execution::config::SessionConfig;
use datafusion::execution::context::SessionContext;
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use datafusion::prelude::{cast, ident, DataFrame};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::catalog::{DataFormat, Environment, RawRelation, RelationRows};
use crate::error::SegmentationError;
use crate::storage::{create_object_store, relation_url, resolve_base_url};

pub const CATALOG_NAME: &str = "segmentation";

pub struct DataFusionEngine {
    ctx: SessionContext,
    registered_buckets: Arc<RwLock<HashSet<String>>>,
}

impl DataFusionEngine {
    pub fn new(max_memory: usize, memory_fraction: f64) -> Result<Self, SegmentationError> {
        info!(
            "Initializing DataFusion engine with {} byte memory pool",
            max_memory
        );

        let runtime_config = RuntimeEnvBuilder::new()
            .with_memory_limit(max_memory, memory_fraction)
            .build()
            .map_err(|e| SegmentationError::ConfigError {
                message: format!("Failed to build DataFusion runtime environment: {}", e),
            })?;

        let session_config = SessionConfig::new().with_information_schema(true);
        let ctx = SessionContext::new_with_config_rt(session_config, runtime_config.into());

        let catalog = Arc::new(MemoryCatalogProvider::new());
        for environment in Environment::ALL {
            let schema = Arc::new(MemorySchemaProvider::new());
            let _ = catalog.register_schema(environment.as_str(), schema)?;
        }
        ctx.register_catalog(CATALOG_NAME, catalog);

        info!("DataFusion engine initialized successfully");

        Ok(Self {
            ctx,
            registered_buckets: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    fn schema_provider(
        &self,
        environment: Environment,
    ) -> Result<Arc<dyn SchemaProvider>, SegmentationError> {
        self.ctx
            .catalog(CATALOG_NAME)
            .ok_or_else(|| SegmentationError::ConfigError {
                message: format!("{} catalog not found", CATALOG_NAME),
            })?
            .schema(environment.as_str())
            .ok_or_else(|| SegmentationError::ConfigError {
                message: format!("{} schema not found in {} catalog", environment, CATALOG_NAME),
            })
    }

    fn replace_table(
        &self,
        environment: Environment,
        relation: RawRelation,
        table: Arc<dyn datafusion::catalog::TableProvider>,
    ) -> Result<(), SegmentationError> {
        let schema = self.schema_provider(environment)?;
        if schema.table_exist(relation.table_name()) {
            schema.deregister_table(relation.table_name())?;
        }
        schema.register_table(relation.table_name().to_string(), table)?;
        Ok(())
    }

    pub fn register_batches(
        &self,
        environment: Environment,
        relation: RawRelation,
        batches: Vec<RecordBatch>,
    ) -> Result<(), SegmentationError> {
        let schema = batches
            .first()
            .map(|batch| batch.schema())
            .unwrap_or_else(|| relation.schema());
        let table = MemTable::try_new(schema, vec![batches])?;
        self.replace_table(environment, relation, Arc::new(table))?;

        debug!("Registered in-memory relation {} in {}", relation, environment);
        Ok(())
    }

    pub fn register_rows<R: RelationRows>(
        &self,
        environment: Environment,
        rows: &[R],
    ) -> Result<(), SegmentationError> {
        let batch = R::to_record_batch(rows)?;
        self.register_batches(environment, R::RELATION, vec![batch])
    }

    pub async fn register_listing(
        &self,
        environment: Environment,
        relation: RawRelation,
        base_url: &Url,
        format: DataFormat,
    ) -> Result<(), SegmentationError> {
        self.register_object_store(base_url).await?;

        let location = relation_url(base_url, environment.directory_name(), relation.source_name());
        let table_url = ListingTableUrl::parse(&location)?;
        let listing_options = ListingOptions::new(format.file_format())
            .with_file_extension(format.file_extension());

        let config = ListingTableConfig::new(table_url)
            .with_listing_options(listing_options)
            .infer_schema(&self.ctx.state())
            .await?;

        let table = ListingTable::try_new(config)?;
        self.replace_table(environment, relation, Arc::new(table))?;

        info!("Registered relation {} in {} from {}", relation, environment, location);
        Ok(())
    }

    /// Registers all four raw relations of one environment from `<base>/<ENV>/<TABLE>/`.
    pub async fn register_environment(
        &self,
        environment: Environment,
        base: &str,
        format: DataFormat,
    ) -> Result<(), SegmentationError> {
        let base_url = resolve_base_url(base)?;
        try_join_all(
            RawRelation::ALL
                .iter()
                .map(|relation| self.register_listing(environment, *relation, &base_url, format)),
        )
        .await?;
        Ok(())
    }

    pub fn is_relation_registered(&self, environment: Environment, relation: RawRelation) -> bool {
        self.schema_provider(environment)
            .map(|schema| schema.table_exist(relation.table_name()))
            .unwrap_or(false)
    }

    async fn raw_table(
        &self,
        environment: Environment,
        relation: RawRelation,
    ) -> Result<DataFrame, SegmentationError> {
        if !self.is_relation_registered(environment, relation) {
            return Err(SegmentationError::RelationNotFound {
                environment: environment.to_string(),
                relation: relation.to_string(),
            });
        }

        let reference =
            TableReference::full(CATALOG_NAME, environment.as_str(), relation.table_name());
        Ok(self.ctx.table(reference).await?)
    }

    /// Reads a relation with its columns renamed to the canonical lower-case names
    /// and cast to the canonical types. Columns the pipeline does not need are dropped.
    pub async fn relation(
        &self,
        environment: Environment,
        relation: RawRelation,
    ) -> Result<DataFrame, SegmentationError> {
        let df = self.raw_table(environment, relation).await?;

        let available: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect();

        let mut projection = Vec::new();
        for (column, data_type) in relation.required_columns() {
            let source = available
                .iter()
                .find(|name| name.eq_ignore_ascii_case(column))
                .ok_or_else(|| SegmentationError::MissingColumn {
                    relation: relation.to_string(),
                    column: column.to_string(),
                })?;
            projection.push(cast(ident(source.as_str()), data_type).alias(column));
        }

        Ok(df.select(projection)?)
    }

    /// Row counts of the registered relations. Fails on an empty ORDERS or LINEITEM.
    pub async fn relation_row_counts(
        &self,
        environment: Environment,
    ) -> Result<Vec<(RawRelation, usize)>, SegmentationError> {
        let mut counts = Vec::new();
        for relation in RawRelation::ALL {
            if relation == RawRelation::Customer
                && !self.is_relation_registered(environment, relation)
            {
                warn!("{} is not registered in {}; skipping row count", relation, environment);
                continue;
            }

            let rows = self.raw_table(environment, relation).await?.count().await?;
            info!("{}.{} row count: {}", environment, relation, rows);

            if rows == 0 && relation.must_not_be_empty() {
                return Err(SegmentationError::EmptyRelation {
                    relation: relation.to_string(),
                });
            }
            counts.push((relation, rows));
        }
        Ok(counts)
    }

    pub async fn health_check(&self) -> Result<(), SegmentationError> {
        self.ctx.sql("SELECT 1 as health_check").await?.collect().await?;
        Ok(())
    }

    async fn register_object_store(&self, base_url: &Url) -> Result<(), SegmentationError> {
        let host = base_url.host_str().unwrap_or_default();
        let store_key = format!("{}://{}", base_url.scheme(), host);

        if self.registered_buckets.read().await.contains(&store_key) {
            return Ok(());
        }

        let Some(object_store) = create_object_store(base_url)? else {
            return Ok(());
        };

        let store_url = Url::parse(&store_key).map_err(|e| SegmentationError::ConfigError {
            message: format!("Invalid object store URL {}: {}", store_key, e),
        })?;
        self.ctx.register_object_store(&store_url, object_store);
        self.registered_buckets.write().await.insert(store_key);
        Ok(())
    }
}

pub fn data_type_to_string(data_type: &DataType) -> String {
    match data_type {
        DataType::Int32 => "Int32".to_string(),
        DataType::Int64 => "Int64".to_string(),
        DataType::Float32 => "Float32".to_string(),
        DataType::Float64 => "Float64".to_string(),
        DataType::Date32 => "Date32".to_string(),
        DataType::Date64 => "Date64".to_string(),
        DataType::Utf8 => "String".to_string(),
        DataType::Decimal128(precision, scale) => {
            format!("Decimal128({}, {})", precision, scale)
        }
        _ => format!("{:?}", data_type),
    }
}
