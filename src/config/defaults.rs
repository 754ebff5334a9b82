//! Default values for configuration

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "".to_string()
}

/// Default cloud endpoint
pub fn default_cloud_url() -> String {
    std::env::var("TRISYNC_CLOUD_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string())
}

/// Default environment variable holding the cloud API key
pub fn default_cloud_api_key_env() -> String {
    "TRISYNC_CLOUD_API_KEY".to_string()
}

/// Header the cloud expects the API key in
pub fn default_cloud_api_key_header() -> String {
    "X-Api-Key".to_string()
}

/// Default cloud request timeout in seconds
pub fn default_cloud_timeout() -> u64 {
    120
}

/// Default number of concurrent uploads per sync run
pub fn default_upload_concurrency() -> usize {
    4
}

/// Report upload progress every N finished uploads
pub fn default_progress_interval() -> usize {
    10
}

/// Default retry attempts for relational store updates
pub fn default_retry_max_attempts() -> u32 {
    3
}

/// Default first backoff delay in seconds
pub fn default_retry_initial_delay() -> f64 {
    1.0
}

/// Default backoff multiplier
pub fn default_retry_factor() -> f64 {
    2.0
}

/// Default jitter fraction (10%)
pub fn default_retry_jitter() -> f64 {
    0.1
}

/// Default local storage root (relative locations resolve against it)
pub fn default_storage_root() -> Option<String> {
    None
}
