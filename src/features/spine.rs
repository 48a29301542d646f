use datafusion::functions_aggregate::expr_fn::max;
use datafusion::prelude::{col, DataFrame, JoinType};

use super::{ASOF_DATE, CUSTOMER_ID, FREQUENCY, LATEST_ORDER_DATE, RETURN_RATIO};
use crate::error::SegmentationError;

const SPINE_CUSTOMER_ID: &str = "spine_customer_id";

/// One `(customer, as-of date)` pair per customer, anchored on the latest order.
pub fn build_spine(features: DataFrame) -> Result<DataFrame, SegmentationError> {
    let spine = features
        .aggregate(
            vec![col(CUSTOMER_ID)],
            vec![max(col(LATEST_ORDER_DATE)).alias(ASOF_DATE)],
        )?
        .with_column_renamed(CUSTOMER_ID, SPINE_CUSTOMER_ID)?;
    Ok(spine)
}

/// Joins the spine back to the feature rows, keeping the rows valid as of each
/// customer's as-of date. Customers without a feature row are not in the result.
pub fn build_training_set(features: DataFrame) -> Result<DataFrame, SegmentationError> {
    let spine = build_spine(features.clone())?;

    let training_set = spine
        .join(
            features,
            JoinType::Inner,
            &[SPINE_CUSTOMER_ID],
            &[CUSTOMER_ID],
            Some(col(LATEST_ORDER_DATE).lt_eq(col(ASOF_DATE))),
        )?
        .select(vec![
            col(CUSTOMER_ID),
            col(ASOF_DATE),
            col(RETURN_RATIO),
            col(FREQUENCY),
            col(LATEST_ORDER_DATE),
        ])?
        .sort(vec![col(CUSTOMER_ID).sort(true, false)])?;

    Ok(training_set)
}
