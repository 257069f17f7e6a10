//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

/// Upper bound on simultaneous search requests; the upstream throttles above it.
pub const MAX_IN_FLIGHT_SEARCHES: usize = 2;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.search.max_in_flight == 0 || self.search.max_in_flight > MAX_IN_FLIGHT_SEARCHES {
            return Err(ConfigError::ValidationError(format!(
                "search.max_in_flight must be between 1 and {MAX_IN_FLIGHT_SEARCHES}"
            )));
        }
        if self.marketplace.result_limit == 0 {
            return Err(ConfigError::ValidationError(
                "marketplace.result_limit must be > 0".into(),
            ));
        }
        if self.marketplace.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "marketplace.base_url must not be empty".into(),
            ));
        }
        if self.image.max_width == 0 {
            return Err(ConfigError::ValidationError(
                "image.max_width must be > 0".into(),
            ));
        }
        if self.image.quality > 100 {
            return Err(ConfigError::ValidationError(
                "image.quality must be between 0 and 100".into(),
            ));
        }
        if self.limits.max_file_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_file_size_mb must be > 0".into(),
            ));
        }
        if self.limits.decode_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.decode_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.request_timeout_ms must be > 0".into(),
            ));
        }
        if self.credentials.default_expires_in_secs <= self.credentials.expiry_buffer_secs {
            return Err(ConfigError::ValidationError(
                "credentials.default_expires_in_secs must exceed expiry_buffer_secs".into(),
            ));
        }
        Ok(())
    }
}
