//! Lazily fetched, memoized listing descriptions.
//!
//! Entries are written once on the first successful non-empty fetch and live
//! for the rest of the process; there is no eviction. Failed or empty fetches
//! are not cached, so the next call for the same item tries again.
//! Concurrent misses for one item share a single fetch.

use futures_util::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::credential::CredentialBroker;
use crate::flight::SingleFlight;
use crate::market::MarketplaceApi;

type Entries = Arc<RwLock<HashMap<String, String>>>;

/// Memoizes item-detail lookups by item id.
pub struct DescriptionCache {
    api: Arc<dyn MarketplaceApi>,
    credentials: Arc<CredentialBroker>,
    entries: Entries,
    fetches: SingleFlight<String, String>,
}

impl DescriptionCache {
    pub fn new(api: Arc<dyn MarketplaceApi>, credentials: Arc<CredentialBroker>) -> Self {
        Self {
            api,
            credentials,
            entries: Arc::new(RwLock::new(HashMap::new())),
            fetches: SingleFlight::new(),
        }
    }

    /// Description for `item_id`, or an empty string if none could be fetched.
    ///
    /// Never fails: credential, HTTP and parse errors are logged and yield "".
    pub async fn describe(&self, item_id: &str) -> String {
        if item_id.is_empty() {
            return String::new();
        }
        if let Some(hit) = self.cached(item_id) {
            tracing::trace!("Description cache hit for {item_id}");
            return hit;
        }

        let api = self.api.clone();
        let credentials = self.credentials.clone();
        let entries = self.entries.clone();
        let key = item_id.to_string();
        self.fetches
            .run(key.clone(), move || {
                async move {
                    if let Some(hit) = read(&entries, &key) {
                        return hit;
                    }
                    let description = fetch(api.as_ref(), &credentials, &key).await;
                    if !description.is_empty() {
                        entries
                            .write()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(key, description.clone());
                    }
                    description
                }
                .boxed()
            })
            .await
    }

    /// Cached description, if one has been fetched.
    pub fn cached(&self, item_id: &str) -> Option<String> {
        read(&self.entries, item_id)
    }

    /// Number of cached descriptions.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn fetch(api: &dyn MarketplaceApi, credentials: &CredentialBroker, item_id: &str) -> String {
    let token = match credentials.acquire().await {
        Ok(token) => token,
        Err(e) => {
            tracing::debug!("No credential for item {item_id} description: {e}");
            return String::new();
        }
    };

    match api.item_detail(token.value(), item_id).await {
        Ok(detail) => detail.description_text(),
        Err(e) => {
            tracing::debug!("Description lookup for {item_id} failed: {e}");
            String::new()
        }
    }
}

fn read(entries: &Entries, item_id: &str) -> Option<String> {
    entries
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(item_id)
        .cloned()
}
