//! Service configuration, read from environment variables in one place.

use std::str::FromStr;

use crate::catalog::DataFormat;
use crate::error::SegmentationError;
use crate::features::ZeroValuePolicy;

pub const DEFAULT_GRPC_PORT: u16 = 50051;
pub const DEFAULT_MEMORY_LIMIT_BYTES: usize = 8 * 1024 * 1024 * 1024;
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.8;
pub const DEFAULT_MODEL_NAME: &str = "UC01_KMEANS_MODEL";
pub const DEFAULT_FEATURE_VIEW_NAME: &str = "FV_UC01_PREPROCESS";
pub const DEFAULT_FEATURE_VIEW_VERSION: &str = "V_1";

/// Knobs of the feature pipeline and the clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub feature_view_name: String,
    pub feature_view_version: String,
    pub model_name: String,
    pub num_clusters: usize,
    pub random_seed: u64,
    pub max_iter: usize,
    pub n_init: usize,
    pub zero_value_policy: ZeroValuePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            feature_view_name: DEFAULT_FEATURE_VIEW_NAME.to_string(),
            feature_view_version: DEFAULT_FEATURE_VIEW_VERSION.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            num_clusters: 5,
            random_seed: 0,
            max_iter: 300,
            n_init: 10,
            zero_value_policy: ZeroValuePolicy::AsZero,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub grpc_port: u16,
    /// Root of the raw relations, laid out as `<url>/<ENVIRONMENT>/<TABLE>/`.
    pub raw_data_url: Option<String>,
    pub raw_data_format: DataFormat,
    pub database_url: Option<String>,
    pub memory_limit_bytes: usize,
    pub pipeline: PipelineSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            grpc_port: DEFAULT_GRPC_PORT,
            raw_data_url: None,
            raw_data_format: DataFormat::Parquet,
            database_url: None,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            pipeline: PipelineSettings::default(),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, SegmentationError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| SegmentationError::ConfigError {
                message: format!("Invalid {}={:?}: {}", key, raw, e),
            }),
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, SegmentationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SegmentationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = PipelineSettings::default();

        let pipeline = PipelineSettings {
            feature_view_name: get("FEATURE_VIEW_NAME").unwrap_or(defaults.feature_view_name),
            feature_view_version: get("FEATURE_VIEW_VERSION")
                .unwrap_or(defaults.feature_view_version),
            model_name: get("MODEL_NAME").unwrap_or(defaults.model_name),
            num_clusters: parse_var("NUM_CLUSTERS", get("NUM_CLUSTERS"), defaults.num_clusters)?,
            random_seed: parse_var("RANDOM_SEED", get("RANDOM_SEED"), defaults.random_seed)?,
            max_iter: parse_var("KMEANS_MAX_ITER", get("KMEANS_MAX_ITER"), defaults.max_iter)?,
            n_init: parse_var("KMEANS_N_INIT", get("KMEANS_N_INIT"), defaults.n_init)?,
            zero_value_policy: parse_var(
                "ZERO_VALUE_POLICY",
                get("ZERO_VALUE_POLICY"),
                defaults.zero_value_policy,
            )?,
        };

        if pipeline.num_clusters == 0 {
            return Err(SegmentationError::ConfigError {
                message: "NUM_CLUSTERS must be at least 1".to_string(),
            });
        }

        Ok(Self {
            grpc_port: parse_var("GRPC_PORT", get("GRPC_PORT"), DEFAULT_GRPC_PORT)?,
            raw_data_url: get("RAW_DATA_URL"),
            raw_data_format: parse_var("RAW_DATA_FORMAT", get("RAW_DATA_FORMAT"), DataFormat::Parquet)?,
            database_url: get("DATABASE_URL"),
            memory_limit_bytes: parse_var(
                "DATAFUSION_MEMORY_LIMIT_BYTES",
                get("DATAFUSION_MEMORY_LIMIT_BYTES"),
                DEFAULT_MEMORY_LIMIT_BYTES,
            )?,
            pipeline,
        })
    }

    /// Database URL with the credentials masked, for logging.
    pub fn redacted_database_url(&self) -> Option<String> {
        self.database_url.as_ref().map(|url| {
            match (url.find("://"), url.rfind('@')) {
                (Some(start), Some(end)) if start + 3 < end => {
                    format!("{}***{}", &url[..start + 3], &url[end..])
                }
                _ => url.clone(),
            }
        })
    }
}
