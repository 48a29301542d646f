pub mod proto {
    pub mod segmentation {
        tonic::include_proto!("segmentation");
    }
}

pub mod catalog;
pub mod config;
pub mod database;
pub mod datafusion_engine;
pub mod domain;
pub mod engine;
pub mod error;
pub mod features;
pub mod grpc_server;
pub mod model;
pub mod models;
pub mod registry;
pub mod scaling;
pub mod schema;
pub mod storage;

pub use config::{PipelineSettings, ServiceConfig};
pub use engine::SegmentationEngine;
pub use error::SegmentationError;
pub use grpc_server::GrpcServer;
