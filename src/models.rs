use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use std::collections::BTreeMap;

use crate::domain::CustomerFeatureRecord;
use crate::error::SegmentationError;
use crate::registry::{Entity, FeatureColumn, FeatureView, ModelVersion};
use crate::schema::{feature_entities, feature_rows, feature_views, model_versions, registered_models};

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = feature_entities)]
#[diesel(primary_key(name))]
pub struct FeatureEntityModel {
    pub name: String,
    pub join_keys: Vec<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = feature_entities)]
pub struct NewFeatureEntity<'a> {
    pub name: &'a str,
    pub join_keys: &'a Vec<String>,
    pub description: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = feature_views)]
#[diesel(primary_key(name, version))]
pub struct FeatureViewModel {
    pub name: String,
    pub version: String,
    pub entity: String,
    pub timestamp_column: String,
    pub description: String,
    pub feature_descriptions: serde_json::Value,
    pub column_list: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = feature_views)]
pub struct NewFeatureView<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub entity: &'a str,
    pub timestamp_column: &'a str,
    pub description: &'a str,
    pub feature_descriptions: serde_json::Value,
    pub column_list: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = feature_rows)]
pub struct FeatureRowModel {
    pub view_name: String,
    pub view_version: String,
    pub customer_id: i64,
    pub return_ratio: Option<f64>,
    pub frequency: f64,
    pub latest_order_date: NaiveDate,
}

#[derive(Insertable)]
#[diesel(table_name = feature_rows)]
pub struct NewFeatureRow<'a> {
    pub view_name: &'a str,
    pub view_version: &'a str,
    pub customer_id: i64,
    pub return_ratio: Option<f64>,
    pub frequency: f64,
    pub latest_order_date: NaiveDate,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = registered_models)]
#[diesel(primary_key(name))]
pub struct RegisteredModelRow {
    pub name: String,
    pub default_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = registered_models)]
pub struct NewRegisteredModel<'a> {
    pub name: &'a str,
    pub default_version: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = model_versions)]
#[diesel(belongs_to(RegisteredModelRow, foreign_key = model_name))]
#[diesel(primary_key(model_name, version))]
pub struct ModelVersionModel {
    pub model_name: String,
    pub version: String,
    pub version_number: i32,
    pub comment: String,
    pub artifact: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = model_versions)]
pub struct NewModelVersion<'a> {
    pub model_name: &'a str,
    pub version: &'a str,
    pub version_number: i32,
    pub comment: &'a str,
    pub artifact: &'a serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<FeatureEntityModel> for Entity {
    fn from(entity: FeatureEntityModel) -> Self {
        Entity {
            name: entity.name,
            join_keys: entity.join_keys,
            description: entity.description,
        }
    }
}

impl TryFrom<FeatureViewModel> for FeatureView {
    type Error = SegmentationError;

    fn try_from(view: FeatureViewModel) -> Result<Self, Self::Error> {
        let feature_descriptions: BTreeMap<String, String> =
            serde_json::from_value(view.feature_descriptions)?;
        let columns: Vec<FeatureColumn> = serde_json::from_value(view.column_list)?;

        Ok(FeatureView {
            name: view.name,
            version: view.version,
            entity: view.entity,
            timestamp_column: view.timestamp_column,
            description: view.description,
            feature_descriptions,
            columns,
            created_at: view.created_at,
        })
    }
}

impl From<FeatureRowModel> for CustomerFeatureRecord {
    fn from(row: FeatureRowModel) -> Self {
        CustomerFeatureRecord {
            customer_id: row.customer_id,
            return_ratio: row.return_ratio,
            frequency: row.frequency,
            latest_order_date: row.latest_order_date,
        }
    }
}

impl From<ModelVersionModel> for ModelVersion {
    fn from(version: ModelVersionModel) -> Self {
        ModelVersion {
            model_name: version.model_name,
            version: version.version,
            comment: version.comment,
            artifact: version.artifact,
            created_at: version.created_at,
        }
    }
}
