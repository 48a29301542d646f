use datafusion::functions::expr_fn::coalesce;
use datafusion::prelude::{col, lit, DataFrame, JoinType};
use datafusion::scalar::ScalarValue;
use tracing::debug;

use super::{CUSTOMER_ID, ORDER_DATE, ORDER_ID, PRICE, PRODUCT_ID, QUANTITY, RETURNED_QUANTITY};
use crate::catalog::{self, PRICE_PRECISION, PRICE_SCALE};
use crate::error::SegmentationError;

/// Joins line items to their returns and orders, one row per line item.
///
/// Line items without a return get a returned quantity of 0. Line items whose
/// order id is absent from ORDERS are dropped, and with them any return keyed
/// on them. Returns without a matching line item never appear. Nulls produced
/// by the joins are replaced by fixed defaults after both joins have run.
pub fn merge(
    orders: DataFrame,
    lineitems: DataFrame,
    returns: DataFrame,
) -> Result<DataFrame, SegmentationError> {
    debug!("Building merge plan for ORDERS, LINEITEM and ORDER_RETURNS");

    let merged = lineitems
        .join(
            returns,
            JoinType::Left,
            &[catalog::LI_ORDER_ID, catalog::LI_PRODUCT_ID],
            &[catalog::OR_ORDER_ID, catalog::OR_PRODUCT_ID],
            None,
        )?
        .join(
            orders,
            JoinType::Inner,
            &[catalog::LI_ORDER_ID],
            &[catalog::O_ORDER_ID],
            None,
        )?
        .select(vec![
            coalesce(vec![col(catalog::O_ORDER_ID), lit(0i64)]).alias(ORDER_ID),
            coalesce(vec![col(catalog::O_CUSTOMER_SK), lit(0i64)]).alias(CUSTOMER_ID),
            // 1970-01-01
            coalesce(vec![
                col(catalog::ORDER_DATE),
                lit(ScalarValue::Date32(Some(0))),
            ])
            .alias(ORDER_DATE),
            col(catalog::LI_PRODUCT_ID).alias(PRODUCT_ID),
            coalesce(vec![
                col(catalog::PRICE),
                lit(ScalarValue::Decimal128(Some(0), PRICE_PRECISION, PRICE_SCALE)),
            ])
            .alias(PRICE),
            coalesce(vec![col(catalog::QUANTITY), lit(0i64)]).alias(QUANTITY),
            coalesce(vec![col(catalog::OR_RETURN_QUANTITY), lit(0i64)]).alias(RETURNED_QUANTITY),
        ])?;

    Ok(merged)
}
