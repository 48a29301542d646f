#![allow(dead_code)]

use chrono::NaiveDate;
use customer_segmentation_service::catalog::{
    CustomerRow, Environment, LineItemRow, OrderReturnRow, OrderRow,
};
use customer_segmentation_service::datafusion_engine::DataFusionEngine;
use customer_segmentation_service::domain::{CustomerFeatureRecord, MergedRecord};
use customer_segmentation_service::features::{
    aggregate, collect_features, collect_merged, merge, ZeroValuePolicy,
};
use customer_segmentation_service::catalog::RawRelation;
use customer_segmentation_service::error::SegmentationError;
use customer_segmentation_service::registry::{
    Entity, FeatureStore, FeatureView, InMemoryRegistry,
};
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

pub const TEST_MEMORY_LIMIT: usize = 1024 * 1024 * 1024;

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub fn test_engine() -> DataFusionEngine {
    DataFusionEngine::new(TEST_MEMORY_LIMIT, 0.8).expect("Failed to create DataFusion engine")
}

/// Raw relations of one environment, CUSTOMER derived from the orders.
pub struct RawData {
    pub orders: Vec<OrderRow>,
    pub lineitems: Vec<LineItemRow>,
    pub returns: Vec<OrderReturnRow>,
}

impl RawData {
    pub fn register(&self, engine: &DataFusionEngine, environment: Environment) {
        let mut customers: Vec<i64> = self.orders.iter().filter_map(|o| o.customer_sk).collect();
        customers.sort_unstable();
        customers.dedup();
        let customers: Vec<CustomerRow> = customers.into_iter().map(CustomerRow::new).collect();

        engine
            .register_rows(environment, &customers)
            .expect("Failed to register CUSTOMER");
        engine
            .register_rows(environment, &self.orders)
            .expect("Failed to register ORDERS");
        engine
            .register_rows(environment, &self.lineitems)
            .expect("Failed to register LINEITEM");
        engine
            .register_rows(environment, &self.returns)
            .expect("Failed to register ORDER_RETURNS");
    }
}

/// Customer A: orders worth 100.00 (10.00 returned) and 50.00 (nothing returned).
/// Customer B: one order worth 0.00.
pub fn two_customer_scenario() -> RawData {
    RawData {
        orders: vec![
            OrderRow::new(1, 100, date(2023, 3, 1)),
            OrderRow::new(2, 100, date(2023, 6, 15)),
            OrderRow::new(3, 200, date(2023, 4, 2)),
        ],
        lineitems: vec![
            LineItemRow::new(1, 10, 10, 1_000),
            LineItemRow::new(2, 11, 5, 1_000),
            LineItemRow::new(3, 12, 3, 0),
        ],
        returns: vec![OrderReturnRow::new(1, 10, 1)],
    }
}

/// Eight customers in two clearly separated behaviour groups.
pub fn segmentable_scenario() -> RawData {
    let mut orders = Vec::new();
    let mut lineitems = Vec::new();
    let mut returns = Vec::new();
    let mut order_id = 1;

    for customer in 1..=8i64 {
        let heavy_returner = customer <= 4;
        let orders_per_year = if heavy_returner { 1 } else { 6 };
        for year in [2022, 2023] {
            for n in 0..orders_per_year {
                orders.push(OrderRow::new(
                    order_id,
                    customer,
                    date(year, 1 + (n as u32 % 12), 1 + customer as u32),
                ));
                lineitems.push(LineItemRow::new(order_id, 1, 4, 2_500 + customer * 10));
                if heavy_returner {
                    returns.push(OrderReturnRow::new(order_id, 1, 3));
                }
                order_id += 1;
            }
        }
    }

    RawData {
        orders,
        lineitems,
        returns,
    }
}

pub async fn merged_records(
    engine: &DataFusionEngine,
    environment: Environment,
) -> Vec<MergedRecord> {
    let merged = merge_frame(engine, environment).await;
    let mut records = collect_merged(merged).await.expect("Failed to collect merged rows");
    records.sort_by_key(|r| (r.order_id, r.product_id));
    records
}

pub async fn feature_records(
    engine: &DataFusionEngine,
    environment: Environment,
    policy: ZeroValuePolicy,
) -> Vec<CustomerFeatureRecord> {
    let merged = merge_frame(engine, environment).await;
    let features = aggregate(merged, policy).expect("Failed to build aggregation plan");
    collect_features(features)
        .await
        .expect("Failed to collect features")
}

async fn merge_frame(
    engine: &DataFusionEngine,
    environment: Environment,
) -> datafusion::prelude::DataFrame {
    let orders = engine
        .relation(environment, RawRelation::Orders)
        .await
        .expect("ORDERS");
    let lineitems = engine
        .relation(environment, RawRelation::LineItem)
        .await
        .expect("LINEITEM");
    let returns = engine
        .relation(environment, RawRelation::OrderReturns)
        .await
        .expect("ORDER_RETURNS");
    merge(orders, lineitems, returns).expect("Failed to build merge plan")
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

/// Feature store that yields after every existence check, so overlapping
/// callers interleave between the check and the registration.
pub struct SlowFeatureStore {
    inner: InMemoryRegistry,
    delay: Duration,
}

impl SlowFeatureStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryRegistry::new(),
            delay,
        }
    }
}

#[tonic::async_trait]
impl FeatureStore for SlowFeatureStore {
    async fn entity_exists(&self, name: &str) -> Result<bool, SegmentationError> {
        let exists = self.inner.entity_exists(name).await?;
        tokio::time::sleep(self.delay).await;
        Ok(exists)
    }

    async fn register_entity(&self, entity: &Entity) -> Result<bool, SegmentationError> {
        self.inner.register_entity(entity).await
    }

    async fn get_entity(&self, name: &str) -> Result<Entity, SegmentationError> {
        self.inner.get_entity(name).await
    }

    async fn feature_view_exists(
        &self,
        name: &str,
        version: &str,
    ) -> Result<bool, SegmentationError> {
        let exists = self.inner.feature_view_exists(name, version).await?;
        tokio::time::sleep(self.delay).await;
        Ok(exists)
    }

    async fn register_feature_view(&self, view: &FeatureView) -> Result<bool, SegmentationError> {
        self.inner.register_feature_view(view).await
    }

    async fn get_feature_view(
        &self,
        name: &str,
        version: &str,
    ) -> Result<FeatureView, SegmentationError> {
        self.inner.get_feature_view(name, version).await
    }

    async fn list_feature_views(&self) -> Result<Vec<FeatureView>, SegmentationError> {
        self.inner.list_feature_views().await
    }

    async fn publish_features(
        &self,
        name: &str,
        version: &str,
        records: &[CustomerFeatureRecord],
    ) -> Result<(), SegmentationError> {
        self.inner.publish_features(name, version, records).await
    }

    async fn read_features(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<CustomerFeatureRecord>, SegmentationError> {
        self.inner.read_features(name, version).await
    }
}
