use object_store::{aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, ObjectStore};
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::error::SegmentationError;

/// Raw data root resolved to a URL. Plain filesystem paths become `file://` URLs.
pub fn resolve_base_url(base: &str) -> Result<Url, SegmentationError> {
    match Url::parse(base) {
        Ok(url) if url.scheme().len() > 1 => Ok(url),
        _ => {
            let path = std::path::absolute(base)?;
            Url::from_directory_path(&path).map_err(|_| SegmentationError::ConfigError {
                message: format!("Invalid raw data path: {}", base),
            })
        }
    }
}

/// Object store for a remote bucket, or `None` for schemes DataFusion serves itself.
pub fn create_object_store(url: &Url) -> Result<Option<Arc<dyn ObjectStore>>, SegmentationError> {
    match url.scheme() {
        "file" => Ok(None),
        "s3" => {
            let bucket = url.host_str().ok_or_else(|| SegmentationError::ConfigError {
                message: "Invalid S3 URL: missing bucket".to_string(),
            })?;

            info!("Creating S3 client for bucket: {}", bucket);
            let s3_store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| SegmentationError::ConfigError {
                    message: format!("Failed to create S3 client: {}", e),
                })?;

            Ok(Some(Arc::new(s3_store)))
        }
        "gs" => {
            let bucket = url.host_str().ok_or_else(|| SegmentationError::ConfigError {
                message: "Invalid GCS URL: missing bucket".to_string(),
            })?;

            info!("Creating GCS client for bucket: {}", bucket);
            let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket);
            if let Ok(service_account_path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
                builder = builder.with_service_account_path(service_account_path);
            }

            let gcs_store = builder.build().map_err(|e| SegmentationError::ConfigError {
                message: format!("Failed to create GCS client for bucket '{}': {}", bucket, e),
            })?;

            Ok(Some(Arc::new(gcs_store)))
        }
        scheme => Err(SegmentationError::ConfigError {
            message: format!("Unsupported storage scheme: {}", scheme),
        }),
    }
}

/// Directory URL of one relation: `<base>/<ENVIRONMENT>/<TABLE>/`.
pub fn relation_url(base: &Url, environment_dir: &str, table: &str) -> String {
    let base = base.as_str().trim_end_matches('/');
    format!("{}/{}/{}/", base, environment_dir, table)
}
