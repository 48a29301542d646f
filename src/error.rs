use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("Relation {relation} is not registered in environment {environment}")]
    RelationNotFound {
        environment: String,
        relation: String,
    },

    #[error("Relation {relation} is missing required column {column}")]
    MissingColumn { relation: String, column: String },

    #[error("Relation {relation} is empty")]
    EmptyRelation { relation: String },

    #[error("Insufficient data for clustering: {message}")]
    InsufficientData { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Feature view not found: {name}/{version}")]
    FeatureViewNotFound { name: String, version: String },

    #[error("Entity not found: {name}")]
    EntityNotFound { name: String },

    #[error("Model not found: {name} {version}")]
    ModelNotFound { name: String, version: String },

    #[error("Model has not been fitted")]
    ModelNotFitted,

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("DataFusion error: {0}")]
    DataFusionError(#[from] datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] datafusion::arrow::error::ArrowError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("gRPC transport error: {0}")]
    GrpcError(#[from] tonic::transport::Error),

    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl From<std::io::Error> for SegmentationError {
    fn from(err: std::io::Error) -> Self {
        SegmentationError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<diesel::result::Error> for SegmentationError {
    fn from(err: diesel::result::Error) -> Self {
        SegmentationError::DatabaseError {
            message: err.to_string(),
        }
    }
}

impl From<SegmentationError> for tonic::Status {
    fn from(err: SegmentationError) -> Self {
        match err {
            SegmentationError::RelationNotFound { .. }
            | SegmentationError::FeatureViewNotFound { .. }
            | SegmentationError::EntityNotFound { .. }
            | SegmentationError::ModelNotFound { .. } => tonic::Status::not_found(err.to_string()),
            SegmentationError::MissingColumn { .. }
            | SegmentationError::EmptyRelation { .. }
            | SegmentationError::InsufficientData { .. }
            | SegmentationError::ModelNotFitted => {
                tonic::Status::failed_precondition(err.to_string())
            }
            SegmentationError::InvalidArgument { .. } | SegmentationError::ConfigError { .. } => {
                tonic::Status::invalid_argument(err.to_string())
            }
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}
