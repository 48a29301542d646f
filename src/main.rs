use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use customer_segmentation_service::{GrpcServer, SegmentationEngine, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "customer_segmentation_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting Customer Segmentation Service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = ServiceConfig::from_env()?;

    info!("Configuration loaded:");
    info!("  gRPC Port: {}", config.grpc_port);
    info!(
        "  Raw data: {} ({})",
        config.raw_data_url.as_deref().unwrap_or("<not configured>"),
        config.raw_data_format.as_str()
    );
    info!(
        "  Database URL: {}",
        config
            .redacted_database_url()
            .unwrap_or_else(|| "<in-memory registries>".to_string())
    );
    info!(
        "  Model: {} (k={}, seed={}, zero value policy={})",
        config.pipeline.model_name,
        config.pipeline.num_clusters,
        config.pipeline.random_seed,
        config.pipeline.zero_value_policy.as_str()
    );

    let engine = Arc::new(SegmentationEngine::new(&config).await?);
    info!("Segmentation engine initialized successfully");

    let grpc_server = GrpcServer::new(engine.clone());
    let grpc_addr: SocketAddr = ([0, 0, 0, 0], config.grpc_port).into();
    let grpc_handle = tokio::spawn(async move {
        if let Err(e) = grpc_server.start(grpc_addr).await {
            error!("gRPC server error: {}", e);
        }
    });

    info!("Customer Segmentation Service started successfully");
    info!("gRPC server listening on {}", grpc_addr);

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, gracefully shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    grpc_handle.abort();

    info!("Customer Segmentation Service shutdown complete");
    Ok(())
}
