use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::proto::segmentation;

#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub order_id: i64,
    pub customer_id: i64,
    pub order_date: NaiveDate,
    pub product_id: Option<i64>,
    pub price_cents: i64,
    pub quantity: i64,
    pub returned_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFeatureRecord {
    pub customer_id: i64,
    /// `None` only when zero-value orders are excluded and the customer has no other order.
    pub return_ratio: Option<f64>,
    pub frequency: f64,
    pub latest_order_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub customer_id: i64,
    pub asof_date: NaiveDate,
    pub return_ratio: Option<f64>,
    pub frequency: f64,
    pub latest_order_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub customer_id: i64,
    pub return_ratio_scaled: f64,
    pub frequency_scaled: f64,
    pub cluster: u32,
}

impl From<ClusterAssignment> for segmentation::ClusterAssignment {
    fn from(domain: ClusterAssignment) -> Self {
        Self {
            customer_id: domain.customer_id,
            return_ratio_scaled: domain.return_ratio_scaled,
            frequency_scaled: domain.frequency_scaled,
            cluster: domain.cluster,
        }
    }
}

/// Result of one feature pipeline run.
#[derive(Debug, Clone)]
pub struct FeatureRunSummary {
    pub run_id: String,
    pub feature_view_name: String,
    pub feature_view_version: String,
    pub created: bool,
    pub records: Vec<CustomerFeatureRecord>,
}

/// Result of one training run.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub run_id: String,
    pub model_name: String,
    pub version: String,
    pub inertia: f64,
    pub assignments: Vec<ClusterAssignment>,
}

/// Cluster assignments produced by a registered model version.
#[derive(Debug, Clone)]
pub struct ScoringSummary {
    pub run_id: String,
    pub model_name: String,
    pub version: String,
    pub assignments: Vec<ClusterAssignment>,
}

impl TrainingSummary {
    pub fn cluster_sizes(&self) -> Vec<(u32, i64)> {
        let mut sizes: std::collections::BTreeMap<u32, i64> = std::collections::BTreeMap::new();
        for assignment in &self.assignments {
            *sizes.entry(assignment.cluster).or_default() += 1;
        }
        sizes.into_iter().collect()
    }

    pub fn into_proto(self) -> segmentation::TrainModelResponse {
        let cluster_sizes = self
            .cluster_sizes()
            .into_iter()
            .map(|(cluster, customers)| segmentation::ClusterSize { cluster, customers })
            .collect();
        segmentation::TrainModelResponse {
            model_name: self.model_name,
            version: self.version,
            inertia: self.inertia,
            cluster_sizes,
            run_id: self.run_id,
        }
    }
}

impl FeatureRunSummary {
    pub fn into_proto(self) -> segmentation::ComputeFeaturesResponse {
        segmentation::ComputeFeaturesResponse {
            feature_view_name: self.feature_view_name,
            feature_view_version: self.feature_view_version,
            row_count: self.records.len() as i64,
            created: self.created,
            run_id: self.run_id,
        }
    }
}

impl ScoringSummary {
    /// Splits the assignments into consecutive stream chunks of at most `chunk_size` rows.
    pub fn into_chunks(self, chunk_size: usize) -> Vec<segmentation::AssignmentChunk> {
        let chunk_size = chunk_size.max(1);
        self.assignments
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, chunk)| segmentation::AssignmentChunk {
                assignments: chunk.iter().cloned().map(Into::into).collect(),
                chunk_index: index as i32,
            })
            .collect()
    }
}
