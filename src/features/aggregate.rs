use datafusion::arrow::datatypes::DataType;
use datafusion::functions_aggregate::expr_fn::{avg, count, max, min, sum};
use datafusion::functions::expr_fn::{coalesce, date_part, nullif};
use datafusion::prelude::{cast, col, lit, DataFrame, Expr, JoinType};
use tracing::debug;

use super::{
    ZeroValuePolicy, CUSTOMER_ID, FREQUENCY, LATEST_ORDER_DATE, ORDER_DATE, ORDER_ID, PRICE,
    QUANTITY, RETURNED_QUANTITY, RETURN_RATIO,
};
use crate::error::SegmentationError;

const INVOICE_YEAR: &str = "invoice_year";
const ROW_PRICE: &str = "row_price";
const RETURN_ROW_PRICE: &str = "return_row_price";
const ORDER_VALUE: &str = "order_value";
const RETURN_VALUE: &str = "return_value";
const RATIO: &str = "ratio";
const ORDERS_IN_YEAR: &str = "orders_in_year";
const FREQUENCY_CUSTOMER_ID: &str = "frequency_customer_id";

/// Per-order ratios are averaged as fixed-point decimals so the result does not
/// depend on how DataFusion partitions the aggregation.
const RATIO_DECIMAL: DataType = DataType::Decimal128(38, 15);

fn per_order_ratio(policy: ZeroValuePolicy) -> Expr {
    let ratio = cast(col(RETURN_VALUE), DataType::Float64)
        / nullif(cast(col(ORDER_VALUE), DataType::Float64), lit(0.0f64));

    let ratio = match policy {
        ZeroValuePolicy::AsZero => coalesce(vec![ratio, lit(0.0f64)]),
        ZeroValuePolicy::Exclude => ratio,
    };

    cast(ratio, RATIO_DECIMAL)
}

/// Derives one feature row per customer from merged line items.
///
/// Stage A groups line items by (customer, order) into order value, return
/// value, invoice year and latest order date. Stage B averages the per-order
/// return ratios per customer and averages the per-year order counts.
pub fn aggregate(merged: DataFrame, policy: ZeroValuePolicy) -> Result<DataFrame, SegmentationError> {
    debug!("Building aggregation plan with zero value policy {}", policy.as_str());

    let orders = merged
        .with_column(
            INVOICE_YEAR,
            cast(date_part(lit("year"), col(ORDER_DATE)), DataType::Int32),
        )?
        .with_column(ROW_PRICE, col(QUANTITY) * col(PRICE))?
        .with_column(RETURN_ROW_PRICE, col(RETURNED_QUANTITY) * col(PRICE))?
        .aggregate(
            vec![col(CUSTOMER_ID), col(ORDER_ID)],
            vec![
                sum(col(ROW_PRICE)).alias(ORDER_VALUE),
                sum(col(RETURN_ROW_PRICE)).alias(RETURN_VALUE),
                min(col(INVOICE_YEAR)).alias(INVOICE_YEAR),
                max(col(ORDER_DATE)).alias(LATEST_ORDER_DATE),
            ],
        )?;

    let return_ratio = orders
        .clone()
        .with_column(RATIO, per_order_ratio(policy))?
        .aggregate(
            vec![col(CUSTOMER_ID)],
            vec![
                avg(col(RATIO)).alias(RETURN_RATIO),
                max(col(LATEST_ORDER_DATE)).alias(LATEST_ORDER_DATE),
            ],
        )?;

    let frequency = orders
        .aggregate(
            vec![col(CUSTOMER_ID), col(INVOICE_YEAR)],
            vec![count(col(ORDER_ID)).alias(ORDERS_IN_YEAR)],
        )?
        .aggregate(
            vec![col(CUSTOMER_ID)],
            vec![avg(cast(col(ORDERS_IN_YEAR), DataType::Float64)).alias(FREQUENCY)],
        )?
        .with_column_renamed(CUSTOMER_ID, FREQUENCY_CUSTOMER_ID)?;

    let features = frequency
        .join(
            return_ratio,
            JoinType::Inner,
            &[FREQUENCY_CUSTOMER_ID],
            &[CUSTOMER_ID],
            None,
        )?
        .select(vec![
            cast(col(CUSTOMER_ID), DataType::Int64).alias(CUSTOMER_ID),
            cast(col(RETURN_RATIO), DataType::Float64).alias(RETURN_RATIO),
            cast(col(FREQUENCY), DataType::Float64).alias(FREQUENCY),
            cast(col(LATEST_ORDER_DATE), DataType::Date32).alias(LATEST_ORDER_DATE),
        ])?
        .sort(vec![col(CUSTOMER_ID).sort(true, false)])?;

    Ok(features)
}
