//! Customer purchase-behaviour features.
//!
//! The pipeline runs as DataFusion logical plans:
//! `merge` reconciles the raw relations at line-item grain, `aggregate`
//! derives the per-customer RETURN_RATIO and FREQUENCY, and `spine` anchors
//! each customer on an as-of date to build the training set.

mod aggregate;
mod merge;
mod records;
mod spine;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::SegmentationError;

pub use aggregate::aggregate;
pub use merge::merge;
pub use records::{
    collect_features, collect_merged, collect_training_set, features_frame,
};
pub use spine::{build_spine, build_training_set};

pub const ORDER_ID: &str = "order_id";
pub const CUSTOMER_ID: &str = "customer_id";
pub const ORDER_DATE: &str = "order_date";
pub const PRODUCT_ID: &str = "product_id";
pub const PRICE: &str = "price";
pub const QUANTITY: &str = "quantity";
pub const RETURNED_QUANTITY: &str = "returned_quantity";

pub const RETURN_RATIO: &str = "return_ratio";
pub const FREQUENCY: &str = "frequency";
pub const LATEST_ORDER_DATE: &str = "latest_order_date";
pub const ASOF_DATE: &str = "asof_date";

/// How an order with a total value of zero enters the RETURN_RATIO average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZeroValuePolicy {
    /// The order contributes a ratio of 0.0.
    #[default]
    #[serde(rename = "as_zero")]
    AsZero,
    /// The order is left out of the average. A customer with no order of
    /// positive value has no RETURN_RATIO.
    #[serde(rename = "exclude")]
    Exclude,
}

impl ZeroValuePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZeroValuePolicy::AsZero => "as_zero",
            ZeroValuePolicy::Exclude => "exclude",
        }
    }
}

impl FromStr for ZeroValuePolicy {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "as_zero" | "zero" => Ok(ZeroValuePolicy::AsZero),
            "exclude" => Ok(ZeroValuePolicy::Exclude),
            other => Err(SegmentationError::ConfigError {
                message: format!("Unknown zero value policy: {}", other),
            }),
        }
    }
}
