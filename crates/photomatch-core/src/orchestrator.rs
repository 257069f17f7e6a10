//! Batch search orchestration.
//!
//! A batch takes one to five images. The orchestrator acquires a single
//! credential for the whole batch, then spawns one task per image. Each task
//! preprocesses its image and sends one search request through a global
//! limiter that admits at most two requests at a time across all batches.
//! Tasks report back over a channel; the batch driver is the single writer
//! of the slot board and finishes once every task has settled.
//!
//! Only a credential failure stops a batch. Image and search failures are
//! recorded against their own slot and never affect siblings.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Semaphore};

use crate::config::{Config, MAX_IN_FLIGHT_SEARCHES};
use crate::credential::{CredentialBroker, Token};
use crate::error::{BatchError, MatchError, SearchError};
use crate::market::retry;
use crate::market::MarketplaceApi;
use crate::preprocess::ImagePreprocessor;
use crate::store::{SlotBoard, SlotCompletion};
use crate::types::{BatchEvent, BatchReport, Hit, SlotSnapshot, SLOT_COUNT};

/// Per-request dispatch settings.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum hits kept per image
    pub result_limit: usize,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum retries per image for transient failures
    pub retry_attempts: u32,
    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,
}

impl SearchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            result_limit: config.marketplace.result_limit,
            request_timeout_ms: config.limits.request_timeout_ms,
            retry_attempts: config.search.retry_attempts,
            retry_delay_ms: config.search.retry_delay_ms,
        }
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A batch that has claimed the slot board but not yet dispatched.
#[derive(Debug)]
pub struct PreparedBatch {
    generation: u64,
    paths: Vec<PathBuf>,
    started: Instant,
}

impl PreparedBatch {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Everything one slot task needs, cloned out of the orchestrator.
struct SlotContext {
    api: Arc<dyn MarketplaceApi>,
    preprocessor: Arc<ImagePreprocessor>,
    limiter: Arc<Semaphore>,
    options: SearchOptions,
    token: Token,
}

#[derive(Default)]
struct Tally {
    settled: [bool; SLOT_COUNT],
    succeeded: usize,
    empty: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, slot: usize, result: &Result<Vec<Hit>, SearchError>) {
        if let Some(settled) = self.settled.get_mut(slot) {
            *settled = true;
        }
        match result {
            Ok(hits) if hits.is_empty() => self.empty += 1,
            Ok(_) => self.succeeded += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Coordinates credential, preprocessing and bounded-concurrency search.
pub struct SearchOrchestrator {
    api: Arc<dyn MarketplaceApi>,
    credentials: Arc<CredentialBroker>,
    preprocessor: Arc<ImagePreprocessor>,
    board: Arc<RwLock<SlotBoard>>,
    limiter: Arc<Semaphore>,
    options: SearchOptions,
    events: broadcast::Sender<BatchEvent>,
}

impl SearchOrchestrator {
    /// `max_in_flight` is clamped to `1..=MAX_IN_FLIGHT_SEARCHES` whatever the caller asks for.
    pub fn new(
        api: Arc<dyn MarketplaceApi>,
        credentials: Arc<CredentialBroker>,
        preprocessor: ImagePreprocessor,
        options: SearchOptions,
        max_in_flight: usize,
    ) -> Self {
        let permits = max_in_flight.clamp(1, MAX_IN_FLIGHT_SEARCHES);
        if permits != max_in_flight {
            tracing::warn!(
                "max_in_flight {max_in_flight} outside 1..={MAX_IN_FLIGHT_SEARCHES}, using {permits}"
            );
        }
        let (events, _) = broadcast::channel(64);
        Self {
            api,
            credentials,
            preprocessor: Arc::new(preprocessor),
            board: Arc::new(RwLock::new(SlotBoard::new())),
            limiter: Arc::new(Semaphore::new(permits)),
            options,
            events,
        }
    }

    /// Subscribe to slot and batch notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    /// Copy of one slot; `None` for an out-of-range index.
    pub fn snapshot(&self, index: usize) -> Option<SlotSnapshot> {
        self.read_board().snapshot(index)
    }

    /// Generation of the most recently started batch (0 before any batch).
    pub fn current_generation(&self) -> u64 {
        self.read_board().generation()
    }

    /// Validate the batch size, assign the next generation and clear every slot.
    ///
    /// Any batch still in flight is superseded from this point on.
    pub fn prepare(&self, paths: Vec<PathBuf>) -> Result<PreparedBatch, BatchError> {
        if paths.is_empty() || paths.len() > SLOT_COUNT {
            return Err(BatchError::Size {
                count: paths.len(),
                max: SLOT_COUNT,
            });
        }

        let mut board = self.write_board();
        let generation = board.generation() + 1;
        board.begin_batch(generation);
        Ok(PreparedBatch {
            generation,
            paths,
            started: Instant::now(),
        })
    }

    /// Prepare and run a batch to completion.
    pub async fn run_batch(&self, paths: Vec<PathBuf>) -> Result<BatchReport, MatchError> {
        let batch = self.prepare(paths)?;
        self.execute(batch).await
    }

    /// Run a prepared batch until every dispatched slot has settled.
    ///
    /// Fails only when no credential can be acquired, in which case no slot
    /// is dispatched.
    pub async fn execute(&self, batch: PreparedBatch) -> Result<BatchReport, MatchError> {
        let PreparedBatch {
            generation,
            paths,
            started,
        } = batch;
        tracing::info!("Batch {generation}: searching {} image(s)", paths.len());

        let token = match self.credentials.acquire().await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Batch {generation} aborted: {e}");
                let _ = self.events.send(BatchEvent::BatchFailed {
                    generation,
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if !self.write_board().mark_dispatched(generation, paths.len()) {
            tracing::debug!("Batch {generation} superseded before dispatch");
            return Ok(BatchReport {
                generation,
                dispatched: 0,
                succeeded: 0,
                empty: 0,
                failed: 0,
                elapsed: started.elapsed(),
            });
        }

        let dispatched = paths.len();
        let (tx, mut rx) = mpsc::channel::<SlotCompletion>(SLOT_COUNT);
        let mut handles = Vec::with_capacity(dispatched);

        for (slot, path) in paths.into_iter().enumerate() {
            let ctx = SlotContext {
                api: self.api.clone(),
                preprocessor: self.preprocessor.clone(),
                limiter: self.limiter.clone(),
                options: self.options.clone(),
                token: token.clone(),
            };
            let tx = tx.clone();

            let handle = tokio::spawn(async move {
                let result = search_slot(&ctx, slot, &path).await;
                // The driver holds the receiver until every sender is dropped
                let _ = tx
                    .send(SlotCompletion {
                        generation,
                        slot,
                        result,
                    })
                    .await;
            });
            handles.push((slot, handle));
        }
        drop(tx);

        let mut tally = Tally::default();
        while let Some(completion) = rx.recv().await {
            self.settle(completion, &mut tally);
        }

        // A task that panicked never sent its completion
        for (slot, handle) in handles {
            if let Err(e) = handle.await {
                if !tally.settled[slot] {
                    tracing::error!("Search task for slot {slot} panicked: {e}");
                    self.settle(
                        SlotCompletion {
                            generation,
                            slot,
                            result: Err(SearchError::Task(e.to_string())),
                        },
                        &mut tally,
                    );
                }
            }
        }

        let report = BatchReport {
            generation,
            dispatched,
            succeeded: tally.succeeded,
            empty: tally.empty,
            failed: tally.failed,
            elapsed: started.elapsed(),
        };

        if self.current_generation() == generation {
            tracing::info!(
                "Batch {generation} done in {:?}: {} with results, {} empty, {} failed",
                report.elapsed,
                report.succeeded,
                report.empty,
                report.failed
            );
            let _ = self.events.send(BatchEvent::BatchCompleted(report.clone()));
        } else {
            tracing::debug!("Batch {generation} finished after being superseded");
        }

        Ok(report)
    }

    fn settle(&self, completion: SlotCompletion, tally: &mut Tally) {
        let (generation, slot) = (completion.generation, completion.slot);
        tally.record(slot, &completion.result);
        match &completion.result {
            Ok(hits) => tracing::debug!("[Image {}] {} result(s)", slot + 1, hits.len()),
            Err(e) => tracing::warn!("[Image {}] {e}", slot + 1),
        }
        if self.write_board().apply(completion) {
            let _ = self.events.send(BatchEvent::SlotSettled { generation, slot });
        }
    }

    fn read_board(&self) -> RwLockReadGuard<'_, SlotBoard> {
        self.board.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_board(&self) -> RwLockWriteGuard<'_, SlotBoard> {
        self.board.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Preprocess one image and search for it, retrying transient failures.
async fn search_slot(ctx: &SlotContext, slot: usize, path: &Path) -> Result<Vec<Hit>, SearchError> {
    let image = ctx.preprocessor.prepare(path).await?;
    tracing::debug!(
        "[Image {}] prepared {}x{} ({} bytes)",
        slot + 1,
        image.width,
        image.height,
        image.bytes.len()
    );

    let timeout_ms = ctx.options.request_timeout_ms;
    let mut attempt = 0;
    loop {
        let outcome = {
            let _permit = ctx
                .limiter
                .acquire()
                .await
                .map_err(|_| SearchError::Task("search limiter closed".to_string()))?;
            match tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                ctx.api
                    .search_by_image(ctx.token.value(), &image, ctx.options.result_limit),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SearchError::Timeout { timeout_ms }),
            }
        };

        match outcome {
            Ok(mut hits) => {
                hits.truncate(ctx.options.result_limit);
                return Ok(hits);
            }
            Err(e) if attempt < ctx.options.retry_attempts && retry::is_retryable(&e) => {
                let delay = retry::backoff_duration(attempt, ctx.options.retry_delay_ms);
                attempt += 1;
                tracing::debug!(
                    "[Image {}] retry {attempt}/{} after {delay:?}: {e}",
                    slot + 1,
                    ctx.options.retry_attempts
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialsConfig, ImageConfig, LimitsConfig};
    use crate::error::AuthError;
    use crate::testing::{hit, write_fixture, MockMarket};
    use crate::types::SlotState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn orchestrator_with(market: &Arc<MockMarket>, options: SearchOptions) -> SearchOrchestrator {
        orchestrator_capped(market, options, 2)
    }

    fn orchestrator_capped(
        market: &Arc<MockMarket>,
        options: SearchOptions,
        max_in_flight: usize,
    ) -> SearchOrchestrator {
        let credentials = Arc::new(CredentialBroker::new(
            market.clone(),
            CredentialsConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                ..CredentialsConfig::default()
            },
        ));
        SearchOrchestrator::new(
            market.clone(),
            credentials,
            ImagePreprocessor::new(ImageConfig::default(), LimitsConfig::default()),
            options,
            max_in_flight,
        )
    }

    fn orchestrator(market: &Arc<MockMarket>) -> SearchOrchestrator {
        orchestrator_with(market, SearchOptions::default())
    }

    /// Width 100 -> two hits, width 200 -> HTTP 500, anything else -> one hit.
    fn mixed_results(image: &crate::preprocess::EncodedImage) -> Result<Vec<Hit>, SearchError> {
        match image.width {
            100 => Ok(vec![hit("a1"), hit("a2")]),
            200 => Err(SearchError::Http {
                status: 500,
                message: "internal error".to_string(),
            }),
            w => Ok(vec![hit(&format!("w{w}"))]),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispatches_exactly_one_search_per_image() {
        let market = Arc::new(MockMarket::new().with_search(|_| Ok(vec![hit("x")])));
        let orchestrator = orchestrator(&market);
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = [110, 120, 130]
            .iter()
            .map(|w| write_fixture(dir.path(), *w))
            .collect();

        let report = orchestrator.run_batch(paths).await.unwrap();

        assert_eq!(report.dispatched, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(market.search_calls.load(Ordering::SeqCst), 3);
        assert_eq!(market.token_calls.load(Ordering::SeqCst), 1);
        for i in 0..3 {
            assert_eq!(orchestrator.snapshot(i).unwrap().state, SlotState::Completed);
        }
        for i in 3..SLOT_COUNT {
            let snapshot = orchestrator.snapshot(i).unwrap();
            assert_eq!(snapshot.state, SlotState::Idle);
            assert!(snapshot.hits.is_empty());
            assert!(snapshot.error.is_none());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_two_searches_in_flight() {
        let market = Arc::new(
            MockMarket::new()
                .with_search(|_| Ok(vec![hit("x")]))
                .with_search_delay(Duration::from_millis(150)),
        );
        let orchestrator = orchestrator(&market);
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (1..=5).map(|i| write_fixture(dir.path(), i * 50)).collect();

        let report = orchestrator.run_batch(paths).await.unwrap();

        assert_eq!(report.succeeded, 5);
        let max = market.max_searches_in_flight.load(Ordering::SeqCst);
        assert!(max <= 2, "limiter violated: max concurrent was {max}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_oversized_limit_is_clamped() {
        let market = Arc::new(
            MockMarket::new()
                .with_search(|_| Ok(vec![hit("x")]))
                .with_search_delay(Duration::from_millis(150)),
        );
        let orchestrator = orchestrator_capped(&market, SearchOptions::default(), 5);
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (1..=5).map(|i| write_fixture(dir.path(), i * 50)).collect();

        let report = orchestrator.run_batch(paths).await.unwrap();

        assert_eq!(report.succeeded, 5);
        let max = market.max_searches_in_flight.load(Ordering::SeqCst);
        assert!(max as usize <= MAX_IN_FLIGHT_SEARCHES, "limiter violated: max concurrent was {max}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_zero_limit_still_dispatches() {
        let market = Arc::new(MockMarket::new().with_search(|_| Ok(vec![hit("x")])));
        let orchestrator = orchestrator_capped(&market, SearchOptions::default(), 0);
        let dir = tempfile::tempdir().unwrap();

        let report = orchestrator
            .run_batch(vec![write_fixture(dir.path(), 100)])
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_batches_share_the_limiter() {
        let market = Arc::new(
            MockMarket::new()
                .with_search(|_| Ok(vec![hit("x")]))
                .with_search_delay(Duration::from_millis(150)),
        );
        let orchestrator = Arc::new(orchestrator(&market));
        let dir = tempfile::tempdir().unwrap();
        let first_paths: Vec<_> = (1..=3).map(|i| write_fixture(dir.path(), i * 10)).collect();
        let second_paths: Vec<_> = (4..=6).map(|i| write_fixture(dir.path(), i * 10)).collect();

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_batch(first_paths).await })
        };
        while market.search_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let second = orchestrator.run_batch(second_paths).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first.dispatched + second.dispatched, 6);
        assert_eq!(market.search_calls.load(Ordering::SeqCst), 6);
        let max = market.max_searches_in_flight.load(Ordering::SeqCst);
        assert!(max <= 2, "limiter violated across batches: max concurrent was {max}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_slot_does_not_affect_siblings() {
        let market = Arc::new(MockMarket::new().with_search(mixed_results));
        let orchestrator = orchestrator(&market);
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_fixture(dir.path(), 100),
            write_fixture(dir.path(), 200),
            write_fixture(dir.path(), 300),
        ];

        let report = orchestrator.run_batch(paths).await.unwrap();
        assert_eq!((report.succeeded, report.empty, report.failed), (2, 0, 1));

        let first = orchestrator.snapshot(0).unwrap();
        assert_eq!(first.state, SlotState::Completed);
        assert_eq!(first.hits.len(), 2);

        let second = orchestrator.snapshot(1).unwrap();
        assert_eq!(second.state, SlotState::Failed);
        assert!(second.hits.is_empty());
        assert!(second.error.unwrap().contains("HTTP 500"));

        let third = orchestrator.snapshot(2).unwrap();
        assert_eq!(third.state, SlotState::Completed);
        assert_eq!(third.hits[0].item_id, "w300");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_credential_failure_aborts_batch() {
        let market = Arc::new(MockMarket::new().with_token(|_| {
            Err(AuthError::Rejected {
                status: 401,
                message: "invalid_client".to_string(),
            })
        }));
        let orchestrator = orchestrator(&market);
        let mut events = orchestrator.subscribe();
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_fixture(dir.path(), 100), write_fixture(dir.path(), 300)];

        let err = orchestrator.run_batch(paths).await.unwrap_err();

        assert!(matches!(err, MatchError::Auth(_)));
        assert_eq!(market.search_calls.load(Ordering::SeqCst), 0);
        for i in 0..SLOT_COUNT {
            assert_eq!(orchestrator.snapshot(i).unwrap().state, SlotState::Idle);
        }
        match events.try_recv().unwrap() {
            BatchEvent::BatchFailed { generation, error } => {
                assert_eq!(generation, 1);
                assert!(error.contains("401"));
            }
            other => panic!("expected BatchFailed, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreadable_image_fails_only_its_slot() {
        let market = Arc::new(MockMarket::new().with_search(|_| Ok(vec![hit("x")])));
        let orchestrator = orchestrator(&market);
        let dir = tempfile::tempdir().unwrap();
        let corrupt = dir.path().join("corrupt.jpg");
        std::fs::write(&corrupt, b"not an image").unwrap();
        let paths = vec![
            write_fixture(dir.path(), 100),
            corrupt,
            dir.path().join("missing.png"),
        ];

        let report = orchestrator.run_batch(paths).await.unwrap();

        assert_eq!((report.succeeded, report.failed), (1, 2));
        assert_eq!(market.search_calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.snapshot(1).unwrap().error.unwrap().contains("Decode error"));
        assert!(orchestrator.snapshot(2).unwrap().error.unwrap().contains("File not found"));
    }

    #[tokio::test]
    async fn test_batch_size_is_validated() {
        let market = Arc::new(MockMarket::new());
        let orchestrator = orchestrator(&market);

        let err = orchestrator.run_batch(vec![]).await.unwrap_err();
        assert!(matches!(err, MatchError::Batch(BatchError::Size { count: 0, .. })));

        let six = (0..6).map(|i| PathBuf::from(format!("{i}.jpg"))).collect();
        let err = orchestrator.run_batch(six).await.unwrap_err();
        assert!(matches!(err, MatchError::Batch(BatchError::Size { count: 6, .. })));

        assert_eq!(orchestrator.current_generation(), 0);
        assert_eq!(market.token_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_completion_reported_once_after_all_slots() {
        let market = Arc::new(MockMarket::new().with_search(|image| match image.width {
            100 => Ok(vec![hit("a1"), hit("a2")]),
            200 => Ok(vec![]),
            _ => Err(SearchError::Http {
                status: 500,
                message: "internal error".to_string(),
            }),
        }));
        let orchestrator = orchestrator(&market);
        let mut events = orchestrator.subscribe();
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_fixture(dir.path(), 100),
            write_fixture(dir.path(), 200),
            write_fixture(dir.path(), 300),
        ];

        orchestrator.run_batch(paths).await.unwrap();

        let mut settled = Vec::new();
        let mut completions = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                BatchEvent::SlotSettled { slot, .. } => {
                    assert_eq!(completions, 0, "slot settled after batch completion");
                    settled.push(slot);
                }
                BatchEvent::BatchCompleted(report) => {
                    completions += 1;
                    assert_eq!((report.succeeded, report.empty, report.failed), (1, 1, 1));
                }
                BatchEvent::BatchFailed { .. } => panic!("unexpected batch failure"),
            }
        }
        settled.sort_unstable();
        assert_eq!(settled, vec![0, 1, 2]);
        assert_eq!(completions, 1);

        assert_eq!(orchestrator.snapshot(0).unwrap().hits.len(), 2);
        assert!(orchestrator.snapshot(1).unwrap().is_empty_result());
        let third = orchestrator.snapshot(2).unwrap();
        assert_eq!(third.state, SlotState::Failed);
        assert!(third.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_superseded_batch_results_are_discarded() {
        let market = Arc::new(
            MockMarket::new()
                .with_search(|image| Ok(vec![hit(&format!("w{}", image.width))]))
                .with_search_delay(Duration::from_millis(200)),
        );
        let orchestrator = Arc::new(orchestrator(&market));
        let mut events = orchestrator.subscribe();
        let dir = tempfile::tempdir().unwrap();
        let old_path = write_fixture(dir.path(), 100);
        let new_path = write_fixture(dir.path(), 500);

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_batch(vec![old_path]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = orchestrator.run_batch(vec![new_path]).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        let slot = orchestrator.snapshot(0).unwrap();
        assert_eq!(slot.generation, 2);
        assert_eq!(slot.hits[0].item_id, "w500");

        let mut completed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let BatchEvent::BatchCompleted(report) = event {
                completed.push(report.generation);
            }
        }
        assert_eq!(completed, vec![2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transient_failure_retried_when_enabled() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let market = Arc::new(MockMarket::new().with_search(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SearchError::Http {
                    status: 503,
                    message: "busy".to_string(),
                })
            } else {
                Ok(vec![hit("recovered")])
            }
        }));
        let options = SearchOptions {
            retry_attempts: 2,
            retry_delay_ms: 10,
            ..SearchOptions::default()
        };
        let orchestrator = orchestrator_with(&market, options);
        let dir = tempfile::tempdir().unwrap();

        let report = orchestrator
            .run_batch(vec![write_fixture(dir.path(), 100)])
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(orchestrator.snapshot(0).unwrap().hits[0].item_id, "recovered");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_retry_by_default() {
        let market = Arc::new(MockMarket::new().with_search(|_| {
            Err(SearchError::Http {
                status: 503,
                message: "busy".to_string(),
            })
        }));
        let orchestrator = orchestrator(&market);
        let dir = tempfile::tempdir().unwrap();

        let report = orchestrator
            .run_batch(vec![write_fixture(dir.path(), 100)])
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(report.all_failed());
        assert_eq!(market.search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_slow_search_times_out() {
        let market = Arc::new(
            MockMarket::new()
                .with_search(|_| Ok(vec![hit("late")]))
                .with_search_delay(Duration::from_secs(5)),
        );
        let options = SearchOptions {
            request_timeout_ms: 50,
            ..SearchOptions::default()
        };
        let orchestrator = orchestrator_with(&market, options);
        let dir = tempfile::tempdir().unwrap();

        let report = orchestrator
            .run_batch(vec![write_fixture(dir.path(), 100)])
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(orchestrator
            .snapshot(0)
            .unwrap()
            .error
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hits_truncated_to_limit() {
        let market = Arc::new(
            MockMarket::new().with_search(|_| Ok((0..10).map(|i| hit(&format!("h{i}"))).collect())),
        );
        let options = SearchOptions {
            result_limit: 3,
            ..SearchOptions::default()
        };
        let orchestrator = orchestrator_with(&market, options);
        let dir = tempfile::tempdir().unwrap();

        orchestrator
            .run_batch(vec![write_fixture(dir.path(), 100)])
            .await
            .unwrap();

        assert_eq!(orchestrator.snapshot(0).unwrap().hits.len(), 3);
    }
}
