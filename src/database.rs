use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{
        deadpool::{Object, Pool},
        AsyncDieselConnectionManager,
    },
    AsyncConnection, AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::domain::CustomerFeatureRecord;
use crate::error::SegmentationError;
use crate::models::*;
use crate::registry::{
    next_version, parse_version, Entity, FeatureStore, FeatureView, ModelRegistry, ModelVersion,
};
use crate::schema::*;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Postgres allows 65535 bind parameters per statement.
const FEATURE_ROW_BATCH: usize = 5_000;

/// Postgres-backed feature store and model registry.
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<AsyncPgConnection>,
}

impl DatabaseManager {
    pub async fn new(database_url: &str) -> Result<Self, SegmentationError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(config)
            .build()
            .map_err(|e| SegmentationError::ConfigError {
                message: format!("Failed to create database pool: {}", e),
            })?;

        let manager = Self { pool };
        manager.run_migrations(database_url).await?;

        Ok(manager)
    }

    pub async fn run_migrations(&self, database_url: &str) -> Result<(), SegmentationError> {
        let database_url = database_url.to_string();

        // diesel_migrations only drives synchronous connections.
        tokio::task::spawn_blocking(move || {
            use diesel::Connection;
            use diesel::PgConnection;

            let mut connection = PgConnection::establish(&database_url).map_err(|e| {
                SegmentationError::ConfigError {
                    message: format!("Failed to establish connection for migrations: {}", e),
                }
            })?;

            connection
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| SegmentationError::ConfigError {
                    message: format!("Failed to run migrations: {}", e),
                })?;

            info!("Registry migrations applied");
            Ok(())
        })
        .await
        .map_err(|e| SegmentationError::InternalError {
            message: format!("Migration task failed: {}", e),
        })?
    }

    async fn connection(&self) -> Result<Object<AsyncPgConnection>, SegmentationError> {
        self.pool
            .get()
            .await
            .map_err(|e| SegmentationError::DatabaseError {
                message: format!("Failed to get database connection: {}", e),
            })
    }
}

#[tonic::async_trait]
impl FeatureStore for DatabaseManager {
    async fn entity_exists(&self, entity_name: &str) -> Result<bool, SegmentationError> {
        use crate::schema::feature_entities::dsl::*;

        let mut conn = self.connection().await?;
        let count: i64 = feature_entities
            .filter(name.eq(entity_name))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn register_entity(&self, entity: &Entity) -> Result<bool, SegmentationError> {
        let mut conn = self.connection().await?;

        let new_entity = NewFeatureEntity {
            name: &entity.name,
            join_keys: &entity.join_keys,
            description: &entity.description,
            created_at: chrono::Utc::now(),
        };

        let inserted = diesel::insert_into(feature_entities::table)
            .values(&new_entity)
            .on_conflict(feature_entities::name)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(|e| SegmentationError::DatabaseError {
                message: format!("Failed to insert entity {}: {}", entity.name, e),
            })?;

        if inserted > 0 {
            info!("Registered entity {}", entity.name);
        }
        Ok(inserted > 0)
    }

    async fn get_entity(&self, entity_name: &str) -> Result<Entity, SegmentationError> {
        use crate::schema::feature_entities::dsl::*;

        let mut conn = self.connection().await?;
        let entity = feature_entities
            .filter(name.eq(entity_name))
            .get_result::<FeatureEntityModel>(&mut conn)
            .await
            .optional()?;

        entity
            .map(Entity::from)
            .ok_or_else(|| SegmentationError::EntityNotFound {
                name: entity_name.to_string(),
            })
    }

    async fn feature_view_exists(
        &self,
        view_name: &str,
        view_version: &str,
    ) -> Result<bool, SegmentationError> {
        let mut conn = self.connection().await?;
        let count: i64 = feature_views::table
            .filter(feature_views::name.eq(view_name))
            .filter(feature_views::version.eq(view_version))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn register_feature_view(&self, view: &FeatureView) -> Result<bool, SegmentationError> {
        if !self.entity_exists(&view.entity).await? {
            return Err(SegmentationError::EntityNotFound {
                name: view.entity.clone(),
            });
        }

        let mut conn = self.connection().await?;
        let new_view = NewFeatureView {
            name: &view.name,
            version: &view.version,
            entity: &view.entity,
            timestamp_column: &view.timestamp_column,
            description: &view.description,
            feature_descriptions: serde_json::to_value(&view.feature_descriptions)?,
            column_list: serde_json::to_value(&view.columns)?,
            created_at: view.created_at,
        };

        let inserted = diesel::insert_into(feature_views::table)
            .values(&new_view)
            .on_conflict((feature_views::name, feature_views::version))
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(|e| SegmentationError::DatabaseError {
                message: format!("Failed to insert feature view {}: {}", view.name, e),
            })?;

        if inserted > 0 {
            info!("Registered feature view {}/{}", view.name, view.version);
        }
        Ok(inserted > 0)
    }

    async fn get_feature_view(
        &self,
        view_name: &str,
        view_version: &str,
    ) -> Result<FeatureView, SegmentationError> {
        let mut conn = self.connection().await?;
        let view = feature_views::table
            .filter(feature_views::name.eq(view_name))
            .filter(feature_views::version.eq(view_version))
            .get_result::<FeatureViewModel>(&mut conn)
            .await
            .optional()?;

        match view {
            Some(view) => FeatureView::try_from(view),
            None => Err(SegmentationError::FeatureViewNotFound {
                name: view_name.to_string(),
                version: view_version.to_string(),
            }),
        }
    }

    async fn list_feature_views(&self) -> Result<Vec<FeatureView>, SegmentationError> {
        let mut conn = self.connection().await?;
        let views = feature_views::table
            .order((feature_views::name.asc(), feature_views::version.asc()))
            .get_results::<FeatureViewModel>(&mut conn)
            .await?;

        views.into_iter().map(FeatureView::try_from).collect()
    }

    async fn publish_features(
        &self,
        view_name: &str,
        view_version: &str,
        records: &[CustomerFeatureRecord],
    ) -> Result<(), SegmentationError> {
        if !self.feature_view_exists(view_name, view_version).await? {
            return Err(SegmentationError::FeatureViewNotFound {
                name: view_name.to_string(),
                version: view_version.to_string(),
            });
        }

        info!(
            "Publishing {} feature rows to {}/{}",
            records.len(),
            view_name,
            view_version
        );
        let mut conn = self.connection().await?;

        conn.transaction::<_, SegmentationError, _>(|conn| {
            Box::pin(async move {
                diesel::delete(
                    feature_rows::table
                        .filter(feature_rows::view_name.eq(view_name))
                        .filter(feature_rows::view_version.eq(view_version)),
                )
                .execute(conn)
                .await?;

                for chunk in records.chunks(FEATURE_ROW_BATCH) {
                    let rows: Vec<NewFeatureRow> = chunk
                        .iter()
                        .map(|r| NewFeatureRow {
                            view_name,
                            view_version,
                            customer_id: r.customer_id,
                            return_ratio: r.return_ratio,
                            frequency: r.frequency,
                            latest_order_date: r.latest_order_date,
                        })
                        .collect();

                    diesel::insert_into(feature_rows::table)
                        .values(&rows)
                        .execute(conn)
                        .await
                        .map_err(|e| SegmentationError::DatabaseError {
                            message: format!("Failed to insert feature rows: {}", e),
                        })?;
                }

                Ok(())
            })
        })
        .await
    }

    async fn read_features(
        &self,
        view_name: &str,
        view_version: &str,
    ) -> Result<Vec<CustomerFeatureRecord>, SegmentationError> {
        if !self.feature_view_exists(view_name, view_version).await? {
            return Err(SegmentationError::FeatureViewNotFound {
                name: view_name.to_string(),
                version: view_version.to_string(),
            });
        }

        let mut conn = self.connection().await?;
        let rows = feature_rows::table
            .filter(feature_rows::view_name.eq(view_name))
            .filter(feature_rows::view_version.eq(view_version))
            .order(feature_rows::customer_id.asc())
            .get_results::<FeatureRowModel>(&mut conn)
            .await?;

        Ok(rows.into_iter().map(CustomerFeatureRecord::from).collect())
    }
}

#[tonic::async_trait]
impl ModelRegistry for DatabaseManager {
    async fn model_exists(&self, model_name: &str) -> Result<bool, SegmentationError> {
        let mut conn = self.connection().await?;
        let count: i64 = registered_models::table
            .filter(registered_models::name.eq(model_name))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<String>, SegmentationError> {
        let mut conn = self.connection().await?;
        let versions = model_versions::table
            .filter(model_versions::model_name.eq(model_name))
            .order((model_versions::version_number.asc(), model_versions::version.asc()))
            .select(model_versions::version)
            .get_results::<String>(&mut conn)
            .await?;
        Ok(versions)
    }

    async fn log_model(&self, version: &ModelVersion) -> Result<(), SegmentationError> {
        info!("Logging model {} {}", version.model_name, version.version);
        let version_number = parse_version(&version.version)
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| SegmentationError::InvalidArgument {
                message: format!("Malformed model version {}", version.version),
            })?;

        let mut conn = self.connection().await?;

        conn.transaction::<_, SegmentationError, _>(|conn| {
            Box::pin(async move {
                let model = NewRegisteredModel {
                    name: &version.model_name,
                    default_version: None,
                    created_at: version.created_at,
                };
                diesel::insert_into(registered_models::table)
                    .values(&model)
                    .on_conflict(registered_models::name)
                    .do_nothing()
                    .execute(conn)
                    .await?;

                let new_version = NewModelVersion {
                    model_name: &version.model_name,
                    version: &version.version,
                    version_number,
                    comment: &version.comment,
                    artifact: &version.artifact,
                    created_at: version.created_at,
                };
                diesel::insert_into(model_versions::table)
                    .values(&new_version)
                    .execute(conn)
                    .await
                    .map_err(|e| SegmentationError::DatabaseError {
                        message: format!(
                            "Failed to insert model version {} {}: {}",
                            version.model_name, version.version, e
                        ),
                    })?;

                Ok(())
            })
        })
        .await
    }

    async fn log_next_version(
        &self,
        model_name: &str,
        comment: &str,
        artifact: &serde_json::Value,
    ) -> Result<ModelVersion, SegmentationError> {
        let mut conn = self.connection().await?;

        let logged = conn
            .transaction::<_, SegmentationError, _>(|conn| {
                Box::pin(async move {
                    let created_at = chrono::Utc::now();
                    diesel::insert_into(registered_models::table)
                        .values(&NewRegisteredModel {
                            name: model_name,
                            default_version: None,
                            created_at,
                        })
                        .on_conflict(registered_models::name)
                        .do_nothing()
                        .execute(conn)
                        .await?;

                    // Row lock serialises version allocation per model.
                    registered_models::table
                        .filter(registered_models::name.eq(model_name))
                        .select(registered_models::name)
                        .for_update()
                        .get_result::<String>(conn)
                        .await?;

                    let existing = model_versions::table
                        .filter(model_versions::model_name.eq(model_name))
                        .select(model_versions::version)
                        .get_results::<String>(conn)
                        .await?;
                    let version = next_version(&existing);
                    let version_number = parse_version(&version)
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or_else(|| SegmentationError::InternalError {
                            message: format!("Version {} out of range", version),
                        })?;

                    diesel::insert_into(model_versions::table)
                        .values(&NewModelVersion {
                            model_name,
                            version: &version,
                            version_number,
                            comment,
                            artifact,
                            created_at,
                        })
                        .execute(conn)
                        .await?;

                    diesel::update(
                        registered_models::table.filter(registered_models::name.eq(model_name)),
                    )
                    .set(registered_models::default_version.eq(Some(version.as_str())))
                    .execute(conn)
                    .await?;

                    Ok(ModelVersion {
                        model_name: model_name.to_string(),
                        version,
                        comment: comment.to_string(),
                        artifact: artifact.clone(),
                        created_at,
                    })
                })
            })
            .await?;

        info!(
            "Logged model {} {} as the default version",
            logged.model_name, logged.version
        );
        Ok(logged)
    }

    async fn set_default_version(
        &self,
        model_name: &str,
        model_version: &str,
    ) -> Result<(), SegmentationError> {
        let mut conn = self.connection().await?;
        let count: i64 = model_versions::table
            .filter(model_versions::model_name.eq(model_name))
            .filter(model_versions::version.eq(model_version))
            .count()
            .get_result(&mut conn)
            .await?;
        if count == 0 {
            return Err(SegmentationError::ModelNotFound {
                name: model_name.to_string(),
                version: model_version.to_string(),
            });
        }

        diesel::update(registered_models::table.filter(registered_models::name.eq(model_name)))
            .set(registered_models::default_version.eq(Some(model_version)))
            .execute(&mut conn)
            .await?;

        info!("Default version of {} set to {}", model_name, model_version);
        Ok(())
    }

    async fn default_version(&self, model_name: &str) -> Result<Option<String>, SegmentationError> {
        let mut conn = self.connection().await?;
        let model = registered_models::table
            .filter(registered_models::name.eq(model_name))
            .get_result::<RegisteredModelRow>(&mut conn)
            .await
            .optional()?;
        Ok(model.and_then(|m| m.default_version))
    }

    async fn load_model(
        &self,
        model_name: &str,
        model_version: &str,
    ) -> Result<ModelVersion, SegmentationError> {
        let mut conn = self.connection().await?;
        let version = model_versions::table
            .filter(model_versions::model_name.eq(model_name))
            .filter(model_versions::version.eq(model_version))
            .get_result::<ModelVersionModel>(&mut conn)
            .await
            .optional()?;

        version
            .map(ModelVersion::from)
            .ok_or_else(|| SegmentationError::ModelNotFound {
                name: model_name.to_string(),
                version: model_version.to_string(),
            })
    }
}
