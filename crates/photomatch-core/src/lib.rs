//! Photomatch Core - Embeddable photo-to-listing matching library.
//!
//! Photomatch takes up to five photos, searches a marketplace for visually
//! similar listings and keeps the hits for each photo in its own slot. The
//! description of any hit can be fetched on demand.
//!
//! # Architecture
//!
//! ```text
//! Paths → Credential → Preprocess (scale + JPEG) → Search (≤2 in flight) → Slots
//!                                                                  └→ Select → Describe
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use photomatch_core::{Config, PhotoMatch};
//!
//! #[tokio::main]
//! async fn main() -> photomatch_core::Result<()> {
//!     let config = Config::load()?;
//!     let matcher = PhotoMatch::new(config)?;
//!
//!     matcher.run(vec!["./mug.jpg".into()]).await?;
//!     if let Some(slot) = matcher.slot_snapshot(0) {
//!         for hit in &slot.hits {
//!             println!("{hit}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod credential;
pub mod description;
pub mod error;
pub mod flight;
pub mod market;
pub mod orchestrator;
pub mod preprocess;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::Config;
pub use credential::{CredentialBroker, Token};
pub use description::DescriptionCache;
pub use error::{
    AuthError, BatchError, ConfigError, DescriptionError, ImageError, MatchError, Result,
    SearchError,
};
pub use market::{BrowseClient, MarketplaceApi};
pub use orchestrator::{PreparedBatch, SearchOptions, SearchOrchestrator};
pub use preprocess::{EncodedImage, ImagePreprocessor};
pub use types::{
    BatchEvent, BatchReport, Hit, ListingSummary, SlotSnapshot, SlotState, SLOT_COUNT,
};

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Photomatch - the shell-facing entry point.
///
/// Owns one credential broker shared by searches and description lookups, so
/// a batch and a selection running side by side never exchange credentials
/// twice.
pub struct PhotoMatch {
    config: Config,
    orchestrator: Arc<SearchOrchestrator>,
    descriptions: DescriptionCache,
}

impl PhotoMatch {
    /// Create a matcher backed by the eBay Browse API.
    pub fn new(config: Config) -> Result<Self> {
        let api = BrowseClient::new(&config.marketplace, &config.limits)?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    /// Create a matcher backed by any marketplace implementation.
    pub fn with_api(config: Config, api: Arc<dyn MarketplaceApi>) -> Self {
        tracing::debug!("Initializing Photomatch v{} ({})", VERSION, api.name());

        let credentials = Arc::new(CredentialBroker::new(
            api.clone(),
            config.credentials.clone(),
        ));
        let preprocessor = ImagePreprocessor::new(config.image.clone(), config.limits.clone());
        let orchestrator = Arc::new(SearchOrchestrator::new(
            api.clone(),
            credentials.clone(),
            preprocessor,
            SearchOptions::from_config(&config),
            config.search.max_in_flight,
        ));
        let descriptions = DescriptionCache::new(api, credentials);

        Self {
            config,
            orchestrator,
            descriptions,
        }
    }

    /// Get a reference to the current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a batch in the background and return immediately.
    ///
    /// Slots are cleared before this returns. Must be called from within a
    /// tokio runtime.
    pub fn submit(&self, paths: Vec<PathBuf>) -> Result<BatchHandle> {
        let batch = self.orchestrator.prepare(paths)?;
        let generation = batch.generation();
        let orchestrator = self.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.execute(batch).await });
        Ok(BatchHandle { generation, task })
    }

    /// Run a batch to completion.
    pub async fn run(&self, paths: Vec<PathBuf>) -> Result<BatchReport> {
        self.orchestrator.run_batch(paths).await
    }

    /// Current contents of one slot; `None` for an index outside `0..SLOT_COUNT`.
    pub fn slot_snapshot(&self, index: usize) -> Option<SlotSnapshot> {
        self.orchestrator.snapshot(index)
    }

    /// All slots in index order.
    pub fn snapshots(&self) -> Vec<SlotSnapshot> {
        (0..SLOT_COUNT)
            .filter_map(|i| self.orchestrator.snapshot(i))
            .collect()
    }

    /// Summarize one hit, fetching its description if not yet cached.
    pub async fn select(&self, index: usize, item_id: &str) -> Result<ListingSummary> {
        let slot = self
            .slot_snapshot(index)
            .ok_or_else(|| MatchError::Selection(format!("no slot {index}")))?;
        let hit = slot.hit(item_id).ok_or_else(|| {
            MatchError::Selection(format!("item {item_id} is not in slot {index}"))
        })?;

        let description = self.descriptions.describe(&hit.item_id).await;
        Ok(ListingSummary::from_hit(hit, description))
    }

    /// Description for any item id; empty if it could not be fetched.
    pub async fn describe(&self, item_id: &str) -> String {
        self.descriptions.describe(item_id).await
    }

    /// Subscribe to slot and batch events.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.orchestrator.subscribe()
    }
}

/// A batch running in the background.
#[derive(Debug)]
pub struct BatchHandle {
    generation: u64,
    task: JoinHandle<Result<BatchReport>>,
}

impl BatchHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for every slot of this batch to settle.
    pub async fn wait(self) -> Result<BatchReport> {
        self.task
            .await
            .map_err(|e| MatchError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialsConfig, SearchConfig};
    use crate::testing::{hit, item_detail, write_fixture, MockMarket};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> Config {
        Config {
            credentials: CredentialsConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                ..CredentialsConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_new_with_default_config() {
        let matcher = PhotoMatch::new(Config::default()).unwrap();
        assert_eq!(matcher.config().search.max_in_flight, 2);
        assert_eq!(matcher.snapshots().len(), SLOT_COUNT);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_end_to_end_batch_and_select() {
        let market = Arc::new(
            MockMarket::new()
                .with_search(|image| match image.width {
                    100 => Ok(vec![hit("a1"), hit("a2")]),
                    200 => Ok(vec![]),
                    _ => Err(SearchError::Http {
                        status: 500,
                        message: "internal error".to_string(),
                    }),
                })
                .with_detail(|_| Ok(item_detail("Mint condition"))),
        );
        let matcher = PhotoMatch::with_api(config(), market.clone());
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_fixture(dir.path(), 100),
            write_fixture(dir.path(), 200),
            write_fixture(dir.path(), 300),
        ];

        let report = matcher.run(paths).await.unwrap();
        assert_eq!((report.succeeded, report.empty, report.failed), (1, 1, 1));

        let first = matcher.slot_snapshot(0).unwrap();
        assert_eq!(first.hits.len(), 2);
        assert!(matcher.slot_snapshot(1).unwrap().is_empty_result());
        assert!(matcher.slot_snapshot(2).unwrap().error.is_some());

        let summary = matcher.select(0, "a1").await.unwrap();
        assert_eq!(summary.title, "Listing a1");
        assert_eq!(summary.price, "9.99");
        assert_eq!(summary.description, "Mint condition");
        assert_eq!(summary.url, "https://www.ebay.com/itm/a1");

        matcher.select(0, "a1").await.unwrap();
        assert_eq!(market.detail_calls.load(Ordering::SeqCst), 1);
        // Searches and the description lookup shared one credential
        assert_eq!(market.token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_select_unknown_slot_or_item() {
        let market = Arc::new(MockMarket::new().with_search(|_| Ok(vec![hit("a1")])));
        let matcher = PhotoMatch::with_api(config(), market.clone());
        let dir = tempfile::tempdir().unwrap();
        matcher
            .run(vec![write_fixture(dir.path(), 100)])
            .await
            .unwrap();

        let err = matcher.select(SLOT_COUNT, "a1").await.unwrap_err();
        assert!(matches!(err, MatchError::Selection(_)));
        let err = matcher.select(0, "zz").await.unwrap_err();
        assert!(matches!(err, MatchError::Selection(_)));
        let err = matcher.select(1, "a1").await.unwrap_err();
        assert!(matches!(err, MatchError::Selection(_)));
        assert_eq!(market.detail_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_submit_returns_before_batch_finishes() {
        let market = Arc::new(
            MockMarket::new()
                .with_search(|_| Ok(vec![hit("a1")]))
                .with_search_delay(Duration::from_millis(200)),
        );
        let matcher = PhotoMatch::with_api(config(), market);
        let mut events = matcher.subscribe();
        let dir = tempfile::tempdir().unwrap();

        let handle = matcher
            .submit(vec![write_fixture(dir.path(), 100)])
            .unwrap();
        assert_eq!(handle.generation(), 1);
        assert_ne!(matcher.slot_snapshot(0).unwrap().state, SlotState::Completed);

        let report = handle.wait().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(matcher.slot_snapshot(0).unwrap().state, SlotState::Completed);

        let mut saw_completion = false;
        while let Ok(event) = events.try_recv() {
            if let BatchEvent::BatchCompleted(report) = event {
                assert_eq!(report.generation, 1);
                saw_completion = true;
            }
        }
        assert!(saw_completion);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_configured_concurrency_above_cap_is_clamped() {
        let market = Arc::new(
            MockMarket::new()
                .with_search(|_| Ok(vec![hit("a1")]))
                .with_search_delay(Duration::from_millis(200)),
        );
        let config = Config {
            search: SearchConfig {
                max_in_flight: 5,
                ..SearchConfig::default()
            },
            ..config()
        };
        let matcher = PhotoMatch::with_api(config, market.clone());
        let dir = tempfile::tempdir().unwrap();
        let paths = (1..=5).map(|i| write_fixture(dir.path(), i * 20)).collect();

        let report = matcher.run(paths).await.unwrap();

        assert_eq!(report.succeeded, 5);
        let max = market.max_searches_in_flight.load(Ordering::SeqCst);
        assert!(max <= 2, "max concurrent searches was {max}");
    }

    #[tokio::test]
    async fn test_submit_rejects_oversized_batch() {
        let matcher = PhotoMatch::with_api(config(), Arc::new(MockMarket::new()));
        let paths = (0..6).map(|i| PathBuf::from(format!("{i}.jpg"))).collect();
        let err = matcher.submit(paths).unwrap_err();
        assert!(matches!(err, MatchError::Batch(_)));
    }
}
