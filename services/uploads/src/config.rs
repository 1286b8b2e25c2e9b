use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the uploads service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upload pipeline configuration
    #[serde(default)]
    pub uploads: UploadsConfig,
    /// Remote compression endpoints
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Read API rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Content bucket for uploaded images
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Upload pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    /// Largest accepted image in bytes
    #[serde(default = "default_max_image_size")]
    pub max_image_size_bytes: u64,
    /// Lossy quality factor for the client strategy, 0.0 - 1.0
    #[serde(default = "default_compression_quality")]
    pub compression_quality: f32,
    /// Upper bound on each network step (remote call, upload, insert, audit)
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Directory hint forwarded to the remote compression endpoints
    #[serde(default)]
    pub remote_directory: String,
}

/// Remote compression endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Multipart endpoint of the stateless compression function
    #[serde(default = "default_function_url")]
    pub function_url: String,
    /// Base URL of the edge function runtime
    #[serde(default = "default_edge_functions_url")]
    pub edge_functions_url: String,
    /// Name of the edge procedure to invoke
    #[serde(default = "default_edge_function_name")]
    pub edge_function_name: String,
    /// Bearer key for the edge runtime
    pub edge_api_key: Option<String>,
    /// HTTP client timeout in seconds
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

/// Rate limiting for read endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Maximum distinct tokens tracked per window
    #[serde(default = "default_max_unique_tokens")]
    pub max_unique_tokens: usize,
    /// Maximum requests per token per window
    #[serde(default = "default_max_requests_per_token")]
    pub max_requests_per_token: u32,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Request body limit in bytes; must leave room above the image limit
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "uploads-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

/// Smallest part S3 accepts for any multipart part but the last
pub const MIN_MULTIPART_PART_BYTES: usize = 5 * 1024 * 1024;

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_max_image_size() -> u64 {
    5 * 1024 * 1024 // 5MiB
}

fn default_compression_quality() -> f32 {
    0.6
}

fn default_step_timeout_secs() -> u64 {
    30
}

fn default_function_url() -> String {
    "http://localhost:3000/api/utils/uploads".to_string()
}

fn default_edge_functions_url() -> String {
    "http://localhost:54321/functions/v1".to_string()
}

fn default_edge_function_name() -> String {
    "uploads".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_unique_tokens() -> usize {
    500
}

fn default_max_requests_per_token() -> u32 {
    1000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    8 * 1024 * 1024
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "uploads-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/uploads").required(false))
            .add_source(config::File::with_name("/etc/uploads/uploads").required(false))
            // UPLOADS__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("UPLOADS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }

        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingField("database.url".to_string()));
        }

        for (field, value) in [
            ("s3.part_size_bytes", self.s3.part_size_bytes),
            ("s3.multipart_threshold_bytes", self.s3.multipart_threshold_bytes),
        ] {
            if value < MIN_MULTIPART_PART_BYTES {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be at least {MIN_MULTIPART_PART_BYTES} bytes"),
                });
            }
        }

        if self.uploads.max_image_size_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "uploads.max_image_size_bytes".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if !(self.uploads.compression_quality > 0.0 && self.uploads.compression_quality <= 1.0) {
            return Err(ConfigValidationError::InvalidValue {
                field: "uploads.compression_quality".to_string(),
                message: "must be in (0.0, 1.0]".to_string(),
            });
        }

        if self.rate_limit.window_ms == 0
            || self.rate_limit.max_unique_tokens == 0
            || self.rate_limit.max_requests_per_token == 0
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "rate_limit".to_string(),
                message: "window and caps must be greater than 0".to_string(),
            });
        }

        if (self.api.body_limit_bytes as u64) <= self.uploads.max_image_size_bytes {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.body_limit_bytes".to_string(),
                message: "must exceed uploads.max_image_size_bytes".to_string(),
            });
        }

        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }
}

impl UploadsConfig {
    /// Get the per-step timeout as Duration
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl RemoteConfig {
    /// Get the HTTP client timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RateLimitConfig {
    /// Get the window as Duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_image_size_bytes: default_max_image_size(),
            compression_quality: default_compression_quality(),
            step_timeout_secs: default_step_timeout_secs(),
            remote_directory: String::new(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            function_url: default_function_url(),
            edge_functions_url: default_edge_functions_url(),
            edge_function_name: default_edge_function_name(),
            edge_api_key: None,
            timeout_secs: default_remote_timeout_secs(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_unique_tokens: default_max_unique_tokens(),
            max_requests_per_token: default_max_requests_per_token(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
