//! Sub-configuration structs with defaults matching the upstream API's expectations.

use serde::{Deserialize, Serialize};

/// Client-credential settings for the token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Application client id (supports ${ENV_VAR} syntax)
    pub client_id: String,

    /// Application client secret (supports ${ENV_VAR} syntax)
    pub client_secret: String,

    /// OAuth scope requested with every exchange
    pub scope: String,

    /// Seconds subtracted from `expires_in` before a token is considered stale
    pub expiry_buffer_secs: u64,

    /// Lifetime assumed when the token response omits `expires_in`
    pub default_expires_in_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            client_id: "${EBAY_CLIENT_ID}".to_string(),
            client_secret: "${EBAY_CLIENT_SECRET}".to_string(),
            scope: "https://api.ebay.com/oauth/api_scope".to_string(),
            expiry_buffer_secs: 120,
            default_expires_in_secs: 5400,
        }
    }
}

/// Marketplace endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// API root; token, search and item paths are appended to it
    pub base_url: String,

    /// Value of the `X-EBAY-C-MARKETPLACE-ID` header
    pub marketplace_id: String,

    /// Maximum hits requested and kept per image
    pub result_limit: usize,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ebay.com".to_string(),
            marketplace_id: "EBAY_US".to_string(),
            result_limit: 5,
        }
    }
}

/// Search dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum simultaneous search requests across all batches (1 or 2)
    pub max_in_flight: usize,

    /// Max retry attempts for transient failures (0 disables retry)
    pub retry_attempts: u32,

    /// Base delay between retries in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 2,
            retry_attempts: 0,
            retry_delay_ms: 1000,
        }
    }
}

/// Upload preprocessing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Images wider than this are scaled down to it
    pub max_width: u32,

    /// JPEG quality (0-100)
    pub quality: u8,

    /// Accepted input extensions
    pub supported_formats: Vec<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_width: 1200,
            quality: 85,
            supported_formats: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
        }
    }
}

/// Resource limits to protect against problematic inputs and slow upstreams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum file size in megabytes
    pub max_file_size_mb: u64,

    /// Decode timeout in milliseconds
    pub decode_timeout_ms: u64,

    /// Per-request HTTP timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            decode_timeout_ms: 5000,
            request_timeout_ms: 30_000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Resolve `${ENV_VAR}` references in config strings.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
