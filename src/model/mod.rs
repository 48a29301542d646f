//! Purchase-behaviour clustering: min-max scaling followed by k-means.

mod kmeans;
mod scaler;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{ClusterAssignment, CustomerFeatureRecord, TrainingRecord};
use crate::error::SegmentationError;
use crate::features::{FREQUENCY, RETURN_RATIO};

pub use kmeans::KMeans;
pub use scaler::MinMaxScaler;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub customer_id: i64,
    pub return_ratio: f64,
    pub frequency: f64,
}

fn complete_vectors(
    rows: impl Iterator<Item = (i64, Option<f64>, f64)>,
) -> Vec<FeatureVector> {
    let mut skipped = 0usize;
    let vectors: Vec<FeatureVector> = rows
        .filter_map(|(customer_id, return_ratio, frequency)| match return_ratio {
            Some(return_ratio) => Some(FeatureVector {
                customer_id,
                return_ratio,
                frequency,
            }),
            None => {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        warn!("Skipped {} customers without a defined return ratio", skipped);
    }
    vectors
}

impl FeatureVector {
    pub fn from_training_set(records: &[TrainingRecord]) -> Vec<Self> {
        complete_vectors(
            records
                .iter()
                .map(|r| (r.customer_id, r.return_ratio, r.frequency)),
        )
    }

    pub fn from_features(records: &[CustomerFeatureRecord]) -> Vec<Self> {
        complete_vectors(
            records
                .iter()
                .map(|r| (r.customer_id, r.return_ratio, r.frequency)),
        )
    }
}

fn feature_matrix(vectors: &[FeatureVector]) -> Array2<f64> {
    Array2::from_shape_fn((vectors.len(), 2), |(i, j)| match j {
        0 => vectors[i].return_ratio,
        _ => vectors[i].frequency,
    })
}

fn to_assignments(
    vectors: &[FeatureVector],
    scaled: &Array2<f64>,
    labels: &[u32],
) -> Vec<ClusterAssignment> {
    vectors
        .iter()
        .zip(labels)
        .enumerate()
        .map(|(i, (vector, cluster))| ClusterAssignment {
            customer_id: vector.customer_id,
            return_ratio_scaled: scaled[[i, 0]],
            frequency_scaled: scaled[[i, 1]],
            cluster: *cluster,
        })
        .collect()
}

/// The trained artifact: a fitted scaler and the k-means model over its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationModel {
    pub feature_columns: Vec<String>,
    pub scaler: MinMaxScaler,
    pub kmeans: KMeans,
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub model: SegmentationModel,
    pub assignments: Vec<ClusterAssignment>,
}

impl SegmentationModel {
    pub fn fit(vectors: &[FeatureVector], kmeans: KMeans) -> Result<FitResult, SegmentationError> {
        info!(
            "Fitting {} clusters on {} customers",
            kmeans.n_clusters,
            vectors.len()
        );

        let x = feature_matrix(vectors);
        let mut scaler = MinMaxScaler::new(true);
        let scaled = scaler.fit_transform(&x)?;

        let mut kmeans = kmeans;
        let labels = kmeans.fit(&scaled)?;

        info!(
            "Clustering finished with inertia {}",
            kmeans.inertia.unwrap_or_default()
        );

        let assignments = to_assignments(vectors, &scaled, &labels);
        let model = SegmentationModel {
            feature_columns: vec![RETURN_RATIO.to_string(), FREQUENCY.to_string()],
            scaler,
            kmeans,
        };

        Ok(FitResult { model, assignments })
    }

    pub fn predict(
        &self,
        vectors: &[FeatureVector],
    ) -> Result<Vec<ClusterAssignment>, SegmentationError> {
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let x = feature_matrix(vectors);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SegmentationError::InvalidArgument {
                message: "scoring input contains non-finite values".to_string(),
            });
        }

        let scaled = self.scaler.transform(&x)?;
        let labels = self.kmeans.predict(&scaled)?;
        Ok(to_assignments(vectors, &scaled, &labels))
    }

    pub fn inertia(&self) -> Option<f64> {
        self.kmeans.inertia
    }

    pub fn to_artifact(&self) -> Result<serde_json::Value, SegmentationError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_artifact(artifact: &serde_json::Value) -> Result<Self, SegmentationError> {
        let model: SegmentationModel = serde_json::from_value(artifact.clone())?;
        if !model.scaler.is_fitted() || !model.kmeans.is_fitted() {
            return Err(SegmentationError::ModelNotFitted);
        }
        Ok(model)
    }
}
