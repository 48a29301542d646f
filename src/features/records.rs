use datafusion::arrow::array::{Array, ArrayRef, Date32Array, Float64Array, Int64Array};
use datafusion::arrow::datatypes::{DataType, Date32Type, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::cast::{
    as_date32_array, as_decimal128_array, as_float64_array, as_int64_array,
};
use datafusion::prelude::{DataFrame, SessionContext};
use std::sync::Arc;

use super::{
    ASOF_DATE, CUSTOMER_ID, FREQUENCY, LATEST_ORDER_DATE, ORDER_DATE, ORDER_ID, PRICE, PRODUCT_ID,
    QUANTITY, RETURNED_QUANTITY, RETURN_RATIO,
};
use crate::domain::{CustomerFeatureRecord, MergedRecord, TrainingRecord};
use crate::error::SegmentationError;

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, SegmentationError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| SegmentationError::InternalError {
            message: format!("Result batch has no column {}", name),
        })
}

fn required<T>(value: Option<T>, name: &str, row: usize) -> Result<T, SegmentationError> {
    value.ok_or_else(|| SegmentationError::InternalError {
        message: format!("Unexpected null in column {} at row {}", name, row),
    })
}

fn int64_at(array: &Int64Array, row: usize) -> Option<i64> {
    (!array.is_null(row)).then(|| array.value(row))
}

fn float64_at(array: &Float64Array, row: usize) -> Option<f64> {
    (!array.is_null(row)).then(|| array.value(row))
}

fn date_at(array: &Date32Array, row: usize) -> Option<chrono::NaiveDate> {
    if array.is_null(row) {
        None
    } else {
        array.value_as_date(row)
    }
}

pub async fn collect_merged(df: DataFrame) -> Result<Vec<MergedRecord>, SegmentationError> {
    let batches = df.collect().await?;
    let mut records = Vec::new();

    for batch in &batches {
        let order_id = as_int64_array(column(batch, ORDER_ID)?)?;
        let customer_id = as_int64_array(column(batch, CUSTOMER_ID)?)?;
        let order_date = as_date32_array(column(batch, ORDER_DATE)?)?;
        let product_id = as_int64_array(column(batch, PRODUCT_ID)?)?;
        let price = as_decimal128_array(column(batch, PRICE)?)?;
        let quantity = as_int64_array(column(batch, QUANTITY)?)?;
        let returned_quantity = as_int64_array(column(batch, RETURNED_QUANTITY)?)?;

        for row in 0..batch.num_rows() {
            let price_cents = if price.is_null(row) {
                None
            } else {
                i64::try_from(price.value(row)).ok()
            };
            records.push(MergedRecord {
                order_id: required(int64_at(order_id, row), ORDER_ID, row)?,
                customer_id: required(int64_at(customer_id, row), CUSTOMER_ID, row)?,
                order_date: required(date_at(order_date, row), ORDER_DATE, row)?,
                product_id: int64_at(product_id, row),
                price_cents: required(price_cents, PRICE, row)?,
                quantity: required(int64_at(quantity, row), QUANTITY, row)?,
                returned_quantity: required(
                    int64_at(returned_quantity, row),
                    RETURNED_QUANTITY,
                    row,
                )?,
            });
        }
    }

    Ok(records)
}

pub async fn collect_features(
    df: DataFrame,
) -> Result<Vec<CustomerFeatureRecord>, SegmentationError> {
    let batches = df.collect().await?;
    let mut records = Vec::new();

    for batch in &batches {
        let customer_id = as_int64_array(column(batch, CUSTOMER_ID)?)?;
        let return_ratio = as_float64_array(column(batch, RETURN_RATIO)?)?;
        let frequency = as_float64_array(column(batch, FREQUENCY)?)?;
        let latest_order_date = as_date32_array(column(batch, LATEST_ORDER_DATE)?)?;

        for row in 0..batch.num_rows() {
            records.push(CustomerFeatureRecord {
                customer_id: required(int64_at(customer_id, row), CUSTOMER_ID, row)?,
                return_ratio: float64_at(return_ratio, row),
                frequency: required(float64_at(frequency, row), FREQUENCY, row)?,
                latest_order_date: required(
                    date_at(latest_order_date, row),
                    LATEST_ORDER_DATE,
                    row,
                )?,
            });
        }
    }

    Ok(records)
}

pub async fn collect_training_set(
    df: DataFrame,
) -> Result<Vec<TrainingRecord>, SegmentationError> {
    let batches = df.collect().await?;
    let mut records = Vec::new();

    for batch in &batches {
        let customer_id = as_int64_array(column(batch, CUSTOMER_ID)?)?;
        let asof_date = as_date32_array(column(batch, ASOF_DATE)?)?;
        let return_ratio = as_float64_array(column(batch, RETURN_RATIO)?)?;
        let frequency = as_float64_array(column(batch, FREQUENCY)?)?;
        let latest_order_date = as_date32_array(column(batch, LATEST_ORDER_DATE)?)?;

        for row in 0..batch.num_rows() {
            records.push(TrainingRecord {
                customer_id: required(int64_at(customer_id, row), CUSTOMER_ID, row)?,
                asof_date: required(date_at(asof_date, row), ASOF_DATE, row)?,
                return_ratio: float64_at(return_ratio, row),
                frequency: required(float64_at(frequency, row), FREQUENCY, row)?,
                latest_order_date: required(
                    date_at(latest_order_date, row),
                    LATEST_ORDER_DATE,
                    row,
                )?,
            });
        }
    }

    Ok(records)
}

/// Feature rows as a DataFrame, the shape `aggregate` produces.
pub fn features_frame(
    ctx: &SessionContext,
    records: &[CustomerFeatureRecord],
) -> Result<DataFrame, SegmentationError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new(CUSTOMER_ID, DataType::Int64, false),
        Field::new(RETURN_RATIO, DataType::Float64, true),
        Field::new(FREQUENCY, DataType::Float64, false),
        Field::new(LATEST_ORDER_DATE, DataType::Date32, false),
    ]));

    let customer_id: Int64Array = records.iter().map(|r| Some(r.customer_id)).collect();
    let return_ratio: Float64Array = records.iter().map(|r| r.return_ratio).collect();
    let frequency: Float64Array = records.iter().map(|r| Some(r.frequency)).collect();
    let latest_order_date: Date32Array = records
        .iter()
        .map(|r| Some(Date32Type::from_naive_date(r.latest_order_date)))
        .collect();

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(customer_id) as ArrayRef,
            Arc::new(return_ratio) as ArrayRef,
            Arc::new(frequency) as ArrayRef,
            Arc::new(latest_order_date) as ArrayRef,
        ],
    )?;

    Ok(ctx.read_batch(batch)?)
}
