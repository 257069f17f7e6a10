//! Error types for photo matching.
//!
//! Errors are organized by the stage that produced them. Only `AuthError` is
//! fatal to a whole batch; image and search errors stay scoped to one slot, and
//! description errors never reach the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for photomatch operations.
#[derive(Error, Debug)]
pub enum MatchError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Credential exchange failed; no search could be attempted
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Batch rejected before any slot was touched
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// The selected slot or item does not exist
    #[error("Selection error: {0}")]
    Selection(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A spawned batch task ended abnormally
    #[error("Batch task failed: {0}")]
    Task(String),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Client-credentials exchange failures.
///
/// `Clone` because every caller waiting on the same refresh receives the
/// same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Client id or secret not configured
    #[error("Client credentials not set. Set EBAY_CLIENT_ID and EBAY_CLIENT_SECRET.")]
    MissingCredentials,

    /// Token endpoint answered with a non-success status
    #[error("Token endpoint returned HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Request never produced a response
    #[error("Token request failed: {0}")]
    Transport(String),

    /// Response body could not be read as a token grant
    #[error("Malformed token response: {0}")]
    MalformedGrant(String),
}

/// Preprocessing failures for one source image.
#[derive(Error, Debug, Clone)]
pub enum ImageError {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// File exists but could not be read
    #[error("Cannot read {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// Extension is not in the accepted list
    #[error("Unsupported format for {path}: {format}")]
    UnsupportedFormat { path: PathBuf, format: String },

    /// File exceeds size limit
    #[error("File too large: {path} ({size_mb}MB > {max_mb}MB)")]
    FileTooLarge {
        path: PathBuf,
        size_mb: u64,
        max_mb: u64,
    },

    /// Image decoding failed
    #[error("Decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// JPEG re-encoding failed
    #[error("Encode error for {path}: {message}")]
    Encode { path: PathBuf, message: String },

    /// Decode did not finish in time
    #[error("Timeout decoding {path} after {timeout_ms}ms")]
    Timeout { path: PathBuf, timeout_ms: u64 },
}

/// Failures scoped to one slot's search.
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    /// The source image never made it to the wire
    #[error("{0}")]
    Image(#[from] ImageError),

    /// Search endpoint answered with a non-success status
    #[error("Search API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Request never produced a response
    #[error("Search request failed: {0}")]
    Transport(String),

    /// Response body was not a valid search result
    #[error("Malformed search response: {0}")]
    Malformed(String),

    /// Operation timed out
    #[error("Search timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The slot's task ended without reporting a result
    #[error("Search task failed: {0}")]
    Task(String),
}

/// Item-detail lookup failures. Logged, then swallowed by the description cache.
#[derive(Error, Debug, Clone)]
pub enum DescriptionError {
    #[error("Item detail returned HTTP {status}")]
    Http { status: u16 },

    #[error("Item detail request failed: {0}")]
    Transport(String),

    #[error("Malformed item detail: {0}")]
    Malformed(String),
}

/// Batch-level rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("A batch needs between 1 and {max} images, got {count}")]
    Size { count: usize, max: usize },
}

/// Convenience type alias for photomatch results.
pub type Result<T> = std::result::Result<T, MatchError>;
