//! Raw relations the feature pipeline reads, their canonical Arrow schemas and
//! typed row builders for registering in-memory data.

use chrono::NaiveDate;
use datafusion::arrow::array::{ArrayRef, Date32Array, Decimal128Array, Int64Array};
use datafusion::arrow::datatypes::{DataType, Date32Type, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::datasource::file_format::csv::CsvFormat;
use datafusion::datasource::file_format::json::JsonFormat;
use datafusion::datasource::file_format::parquet::ParquetFormat;
use datafusion::datasource::file_format::FileFormat;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::SegmentationError;

pub const PRICE_PRECISION: u8 = 8;
pub const PRICE_SCALE: i8 = 2;

pub const C_CUSTOMER_SK: &str = "c_customer_sk";
pub const O_ORDER_ID: &str = "o_order_id";
pub const O_CUSTOMER_SK: &str = "o_customer_sk";
pub const ORDER_DATE: &str = "order_date";
pub const LI_ORDER_ID: &str = "li_order_id";
pub const LI_PRODUCT_ID: &str = "li_product_id";
pub const QUANTITY: &str = "quantity";
pub const PRICE: &str = "price";
pub const OR_ORDER_ID: &str = "or_order_id";
pub const OR_PRODUCT_ID: &str = "or_product_id";
pub const OR_RETURN_QUANTITY: &str = "or_return_quantity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Environment {
    #[serde(rename = "training")]
    Training,
    #[serde(rename = "scoring")]
    Scoring,
    #[serde(rename = "serving")]
    Serving,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Training,
        Environment::Scoring,
        Environment::Serving,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Training => "training",
            Environment::Scoring => "scoring",
            Environment::Serving => "serving",
        }
    }

    /// Directory under the raw data root holding this environment's tables.
    pub fn directory_name(&self) -> &'static str {
        match self {
            Environment::Training => "TRAINING",
            Environment::Scoring => "SCORING",
            Environment::Serving => "SERVING",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "training" => Ok(Environment::Training),
            "scoring" => Ok(Environment::Scoring),
            "serving" => Ok(Environment::Serving),
            other => Err(SegmentationError::InvalidArgument {
                message: format!("Unknown environment: {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawRelation {
    Customer,
    Orders,
    LineItem,
    OrderReturns,
}

impl RawRelation {
    pub const ALL: [RawRelation; 4] = [
        RawRelation::Customer,
        RawRelation::Orders,
        RawRelation::LineItem,
        RawRelation::OrderReturns,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            RawRelation::Customer => "customer",
            RawRelation::Orders => "orders",
            RawRelation::LineItem => "lineitem",
            RawRelation::OrderReturns => "order_returns",
        }
    }

    pub fn source_name(&self) -> &'static str {
        match self {
            RawRelation::Customer => "CUSTOMER",
            RawRelation::Orders => "ORDERS",
            RawRelation::LineItem => "LINEITEM",
            RawRelation::OrderReturns => "ORDER_RETURNS",
        }
    }

    /// Columns the pipeline needs, with the type each is cast to on read.
    pub fn required_columns(&self) -> Vec<(&'static str, DataType)> {
        match self {
            RawRelation::Customer => vec![(C_CUSTOMER_SK, DataType::Int64)],
            RawRelation::Orders => vec![
                (O_ORDER_ID, DataType::Int64),
                (O_CUSTOMER_SK, DataType::Int64),
                (ORDER_DATE, DataType::Date32),
            ],
            RawRelation::LineItem => vec![
                (LI_ORDER_ID, DataType::Int64),
                (LI_PRODUCT_ID, DataType::Int64),
                (QUANTITY, DataType::Int64),
                (PRICE, DataType::Decimal128(PRICE_PRECISION, PRICE_SCALE)),
            ],
            RawRelation::OrderReturns => vec![
                (OR_ORDER_ID, DataType::Int64),
                (OR_PRODUCT_ID, DataType::Int64),
                (OR_RETURN_QUANTITY, DataType::Int64),
            ],
        }
    }

    /// Joins downstream presuppose matches in these relations.
    pub fn must_not_be_empty(&self) -> bool {
        matches!(self, RawRelation::Orders | RawRelation::LineItem)
    }

    pub fn schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .required_columns()
            .into_iter()
            .map(|(name, data_type)| Field::new(name, data_type, true))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

impl std::fmt::Display for RawRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source_name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataFormat {
    #[serde(rename = "csv")]
    Csv,
    #[serde(rename = "parquet")]
    Parquet,
    #[serde(rename = "json")]
    Json,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Parquet => "parquet",
            DataFormat::Json => "json",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            DataFormat::Csv => ".csv",
            DataFormat::Parquet => ".parquet",
            DataFormat::Json => ".json",
        }
    }

    pub fn file_format(&self) -> Arc<dyn FileFormat> {
        match self {
            DataFormat::Csv => Arc::new(
                CsvFormat::default()
                    .with_has_header(true)
                    .with_delimiter(b','),
            ),
            DataFormat::Parquet => Arc::new(ParquetFormat::default()),
            DataFormat::Json => Arc::new(JsonFormat::default()),
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "parquet" => Ok(DataFormat::Parquet),
            "json" => Ok(DataFormat::Json),
            other => Err(SegmentationError::ConfigError {
                message: format!("Unsupported file format: {}", other),
            }),
        }
    }
}

/// Typed rows for one raw relation. Nullable source columns are `Option`s.
pub trait RelationRows: Sized {
    const RELATION: RawRelation;

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, SegmentationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRow {
    pub customer_sk: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRow {
    pub order_id: Option<i64>,
    pub customer_sk: Option<i64>,
    pub order_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineItemRow {
    pub order_id: Option<i64>,
    pub product_id: Option<i64>,
    pub quantity: Option<i64>,
    /// Unit price in hundredths.
    pub price_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderReturnRow {
    pub order_id: Option<i64>,
    pub product_id: Option<i64>,
    pub return_quantity: Option<i64>,
}

impl CustomerRow {
    pub fn new(customer_sk: i64) -> Self {
        Self {
            customer_sk: Some(customer_sk),
        }
    }
}

impl OrderRow {
    pub fn new(order_id: i64, customer_sk: i64, order_date: NaiveDate) -> Self {
        Self {
            order_id: Some(order_id),
            customer_sk: Some(customer_sk),
            order_date: Some(order_date),
        }
    }
}

impl LineItemRow {
    pub fn new(order_id: i64, product_id: i64, quantity: i64, price_cents: i64) -> Self {
        Self {
            order_id: Some(order_id),
            product_id: Some(product_id),
            quantity: Some(quantity),
            price_cents: Some(price_cents),
        }
    }
}

impl OrderReturnRow {
    pub fn new(order_id: i64, product_id: i64, return_quantity: i64) -> Self {
        Self {
            order_id: Some(order_id),
            product_id: Some(product_id),
            return_quantity: Some(return_quantity),
        }
    }
}

fn int64_column(values: impl Iterator<Item = Option<i64>>) -> ArrayRef {
    Arc::new(Int64Array::from(values.collect::<Vec<_>>()))
}

impl RelationRows for CustomerRow {
    const RELATION: RawRelation = RawRelation::Customer;

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, SegmentationError> {
        let columns = vec![int64_column(rows.iter().map(|r| r.customer_sk))];
        Ok(RecordBatch::try_new(Self::RELATION.schema(), columns)?)
    }
}

impl RelationRows for OrderRow {
    const RELATION: RawRelation = RawRelation::Orders;

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, SegmentationError> {
        let dates: Date32Array = rows
            .iter()
            .map(|r| r.order_date.map(Date32Type::from_naive_date))
            .collect();
        let columns = vec![
            int64_column(rows.iter().map(|r| r.order_id)),
            int64_column(rows.iter().map(|r| r.customer_sk)),
            Arc::new(dates) as ArrayRef,
        ];
        Ok(RecordBatch::try_new(Self::RELATION.schema(), columns)?)
    }
}

impl RelationRows for LineItemRow {
    const RELATION: RawRelation = RawRelation::LineItem;

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, SegmentationError> {
        let prices = Decimal128Array::from(
            rows.iter()
                .map(|r| r.price_cents.map(i128::from))
                .collect::<Vec<_>>(),
        )
        .with_precision_and_scale(PRICE_PRECISION, PRICE_SCALE)?;
        let columns = vec![
            int64_column(rows.iter().map(|r| r.order_id)),
            int64_column(rows.iter().map(|r| r.product_id)),
            int64_column(rows.iter().map(|r| r.quantity)),
            Arc::new(prices) as ArrayRef,
        ];
        Ok(RecordBatch::try_new(Self::RELATION.schema(), columns)?)
    }
}

impl RelationRows for OrderReturnRow {
    const RELATION: RawRelation = RawRelation::OrderReturns;

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch, SegmentationError> {
        let columns = vec![
            int64_column(rows.iter().map(|r| r.order_id)),
            int64_column(rows.iter().map(|r| r.product_id)),
            int64_column(rows.iter().map(|r| r.return_quantity)),
        ];
        Ok(RecordBatch::try_new(Self::RELATION.schema(), columns)?)
    }
}
