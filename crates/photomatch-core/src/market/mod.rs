//! Marketplace integration for token exchange, visual search and item details.
//!
//! Provides the backend abstraction the orchestration core is written against,
//! the Browse API implementation of it, and retry classification for
//! transient search failures.

pub(crate) mod api;
pub(crate) mod browse;
pub(crate) mod retry;

pub use api::{ClientCredentials, ItemDetail, ItemSpecific, MarketplaceApi, TokenGrant};
pub use browse::BrowseClient;
