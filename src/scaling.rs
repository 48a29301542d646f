//! Hook for resizing external compute around the heavy pipeline stages.

use std::fmt;
use tracing::debug;

use crate::error::SegmentationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    FeatureComputation,
    Training,
    Scoring,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::FeatureComputation => "feature_computation",
            PipelineStage::Training => "training",
            PipelineStage::Scoring => "scoring",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called before a stage starts and after it ends.
///
/// `after_stage` is invoked whether or not the stage succeeded; a failing
/// `before_stage` aborts the stage.
#[tonic::async_trait]
pub trait ResourceScaler: Send + Sync {
    async fn before_stage(&self, stage: PipelineStage) -> Result<(), SegmentationError>;

    async fn after_stage(&self, stage: PipelineStage, succeeded: bool)
        -> Result<(), SegmentationError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScaler;

#[tonic::async_trait]
impl ResourceScaler for NoopScaler {
    async fn before_stage(&self, stage: PipelineStage) -> Result<(), SegmentationError> {
        debug!("No resource scaling before {}", stage);
        Ok(())
    }

    async fn after_stage(
        &self,
        stage: PipelineStage,
        succeeded: bool,
    ) -> Result<(), SegmentationError> {
        debug!("No resource scaling after {} (succeeded: {})", stage, succeeded);
        Ok(())
    }
}
