//! Min-max feature scaling.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::SegmentationError;

/// Scales each column to `[0, 1]` using the range seen during `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    /// Clip transformed values to `[0, 1]` when input falls outside the fitted range.
    pub clip: bool,
    data_min: Option<Array1<f64>>,
    data_max: Option<Array1<f64>>,
}

impl Default for MinMaxScaler {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MinMaxScaler {
    pub fn new(clip: bool) -> Self {
        Self {
            clip,
            data_min: None,
            data_max: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.data_min.is_some() && self.data_max.is_some()
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self, SegmentationError> {
        if x.nrows() == 0 {
            return Err(SegmentationError::InsufficientData {
                message: "cannot fit a scaler on zero rows".to_string(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(SegmentationError::InvalidArgument {
                message: "scaler input contains non-finite values".to_string(),
            });
        }

        let data_min = x.fold_axis(Axis(0), f64::INFINITY, |acc, v| acc.min(*v));
        let data_max = x.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, v| acc.max(*v));

        self.data_min = Some(data_min);
        self.data_max = Some(data_max);
        Ok(self)
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>, SegmentationError> {
        let (data_min, data_max) = match (&self.data_min, &self.data_max) {
            (Some(min), Some(max)) => (min, max),
            _ => return Err(SegmentationError::ModelNotFitted),
        };
        if x.ncols() != data_min.len() {
            return Err(SegmentationError::InvalidArgument {
                message: format!(
                    "expected {} features, got {}",
                    data_min.len(),
                    x.ncols()
                ),
            });
        }

        let mut scaled = x.clone();
        for (j, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let range = data_max[j] - data_min[j];
            // A constant column maps to 0.0.
            let range = if range == 0.0 { 1.0 } else { range };
            column.mapv_inplace(|v| {
                let s = (v - data_min[j]) / range;
                if self.clip {
                    s.clamp(0.0, 1.0)
                } else {
                    s
                }
            });
        }
        Ok(scaled)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>, SegmentationError> {
        self.fit(x)?;
        self.transform(x)
    }
}
