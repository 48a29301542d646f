use std::net::SocketAddr;
use std::sync::Arc;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{error, info};

use crate::catalog::Environment;
use crate::engine::SegmentationEngine;
use crate::error::SegmentationError;
use crate::proto::segmentation::{
    score_customers_response::ResponseType,
    segmentation_service_server::{SegmentationService, SegmentationServiceServer},
    ComputeFeaturesRequest, ComputeFeaturesResponse, HealthCheckRequest, HealthCheckResponse,
    ListModelVersionsRequest, ListModelVersionsResponse, ScoreComplete, ScoreCustomersRequest,
    ScoreCustomersResponse, TrainModelRequest, TrainModelResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const SCORE_CHUNK_SIZE: usize = 1000;

pub struct GrpcServer {
    engine: Arc<SegmentationEngine>,
}

impl GrpcServer {
    pub fn new(engine: Arc<SegmentationEngine>) -> Self {
        Self { engine }
    }

    pub async fn start(&self, addr: SocketAddr) -> Result<(), SegmentationError> {
        info!("Starting gRPC server on {}", addr);

        let segmentation_service = SegmentationServiceImpl::new(self.engine.clone());

        Server::builder()
            .add_service(SegmentationServiceServer::new(segmentation_service))
            .serve(addr)
            .await?;

        Ok(())
    }
}

fn optional(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_environment(value: &str, default: Environment) -> Result<Environment, Status> {
    if value.trim().is_empty() {
        Ok(default)
    } else {
        value.parse::<Environment>().map_err(Status::from)
    }
}

pub struct SegmentationServiceImpl {
    engine: Arc<SegmentationEngine>,
}

impl SegmentationServiceImpl {
    pub fn new(engine: Arc<SegmentationEngine>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl SegmentationService for SegmentationServiceImpl {
    type ScoreCustomersStream = ReceiverStream<Result<ScoreCustomersResponse, Status>>;

    async fn compute_features(
        &self,
        request: Request<ComputeFeaturesRequest>,
    ) -> Result<Response<ComputeFeaturesResponse>, Status> {
        let req = request.into_inner();
        let environment = parse_environment(&req.environment, Environment::Training)?;
        info!("gRPC: Received compute_features request for {}", environment);

        match self.engine.run_feature_pipeline(environment).await {
            Ok(summary) => {
                info!(
                    "gRPC: Published {} feature rows to {}/{}",
                    summary.records.len(),
                    summary.feature_view_name,
                    summary.feature_view_version
                );
                Ok(Response::new(summary.into_proto()))
            }
            Err(e) => {
                error!("gRPC: Feature pipeline failed for {}: {}", environment, e);
                Err(Status::from(e))
            }
        }
    }

    async fn train_model(
        &self,
        request: Request<TrainModelRequest>,
    ) -> Result<Response<TrainModelResponse>, Status> {
        let req = request.into_inner();
        let num_clusters = (req.num_clusters > 0).then_some(req.num_clusters as usize);
        info!(
            "gRPC: Received train_model request (num_clusters: {:?})",
            num_clusters
        );

        match self.engine.train_model(num_clusters).await {
            Ok(summary) => {
                info!(
                    "gRPC: Trained {} {} on {} customers",
                    summary.model_name,
                    summary.version,
                    summary.assignments.len()
                );
                Ok(Response::new(summary.into_proto()))
            }
            Err(e) => {
                error!("gRPC: Training failed: {}", e);
                Err(Status::from(e))
            }
        }
    }

    async fn score_customers(
        &self,
        request: Request<ScoreCustomersRequest>,
    ) -> Result<Response<Self::ScoreCustomersStream>, Status> {
        let req = request.into_inner();
        let environment = parse_environment(&req.environment, Environment::Scoring)?;
        info!(
            "gRPC: Received score_customers request for {} (model: '{}', version: '{}')",
            environment, req.model_name, req.version
        );

        let start_time = std::time::Instant::now();
        let summary = self
            .engine
            .score_customers(environment, optional(req.model_name), optional(req.version))
            .await
            .map_err(|e| {
                error!("gRPC: Scoring failed: {}", e);
                Status::from(e)
            })?;

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let model_version = summary.version.clone();
            let total_rows = summary.assignments.len() as i64;
            let chunks = summary.into_chunks(SCORE_CHUNK_SIZE);
            let chunk_count = chunks.len();

            for chunk in chunks {
                let response = ScoreCustomersResponse {
                    response_type: Some(ResponseType::Chunk(chunk)),
                };
                if tx.send(Ok(response)).await.is_err() {
                    return; // Client disconnected
                }
            }

            let execution_time = start_time.elapsed();
            let complete = ScoreComplete {
                total_rows,
                model_version,
                execution_time_ms: execution_time.as_millis().to_string(),
                success: true,
                error_message: String::new(),
            };
            let response = ScoreCustomersResponse {
                response_type: Some(ResponseType::Complete(complete)),
            };
            let _ = tx.send(Ok(response)).await;

            info!(
                "gRPC: Scoring completed. Sent {} chunks with {} total rows in {}ms",
                chunk_count,
                total_rows,
                execution_time.as_millis()
            );
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn list_model_versions(
        &self,
        request: Request<ListModelVersionsRequest>,
    ) -> Result<Response<ListModelVersionsResponse>, Status> {
        let req = request.into_inner();
        info!(
            "gRPC: Received list_model_versions request for '{}'",
            req.model_name
        );

        let (model_name, versions, default_version) = self
            .engine
            .list_model_versions(optional(req.model_name))
            .await
            .map_err(|e| {
                error!("gRPC: Failed to list model versions: {}", e);
                Status::from(e)
            })?;

        info!("gRPC: Returning {} versions of {}", versions.len(), model_name);
        Ok(Response::new(ListModelVersionsResponse {
            model_name,
            versions,
            default_version: default_version.unwrap_or_default(),
        }))
    }

    async fn health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        info!("gRPC: Received health_check request");

        match self.engine.health_check().await {
            Ok(_) => {
                info!("gRPC: Health check passed");
                Ok(Response::new(HealthCheckResponse {
                    status: "healthy".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                }))
            }
            Err(e) => {
                error!("gRPC: Health check failed: {}", e);
                Err(Status::internal("Health check failed"))
            }
        }
    }
}
