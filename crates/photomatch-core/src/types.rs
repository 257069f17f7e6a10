//! Core data types for photo matching.
//!
//! These types are what the shell reads back out of the core: hits for each
//! slot, per-slot snapshots, selected-listing summaries and batch reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Number of input-image slots in a batch.
pub const SLOT_COUNT: usize = 5;

/// One candidate listing returned by the image-search endpoint.
///
/// Identity is `item_id`. Optional upstream fields default to empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    /// Marketplace item identifier
    pub item_id: String,

    /// Listing title
    pub title: String,

    /// Price as reported upstream (no currency symbol)
    pub price: String,

    /// Public listing URL
    pub web_url: String,

    /// Primary listing image URL
    pub image_url: String,
}

impl fmt::Display for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.price.trim().is_empty() {
            write!(f, "{}", self.title)
        } else {
            write!(f, "{} - ${}", self.title, self.price)
        }
    }
}

/// Lifecycle of one slot within the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Not part of the current batch
    Idle,
    /// Cleared and waiting for its search to settle
    Dispatched,
    /// Search finished; hits (possibly none) are in place
    Completed,
    /// Preprocessing or search failed; error text is recorded
    Failed,
}

/// A point-in-time copy of one slot, handed to the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSnapshot {
    /// Slot index (0-based)
    pub index: usize,

    /// Batch generation that last wrote this slot
    pub generation: u64,

    pub state: SlotState,

    /// Ordered hits, best match first
    pub hits: Vec<Hit>,

    /// Failure text recorded for this slot, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SlotSnapshot {
    /// True when the search succeeded but returned nothing.
    pub fn is_empty_result(&self) -> bool {
        self.state == SlotState::Completed && self.hits.is_empty()
    }

    /// Find a hit in this slot by item id.
    pub fn hit(&self, item_id: &str) -> Option<&Hit> {
        self.hits.iter().find(|h| h.item_id == item_id)
    }
}

/// Formatted details for a selected listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub item_id: String,
    pub title: String,
    pub price: String,
    /// Lazily fetched description; empty when the lookup failed
    pub description: String,
    pub url: String,
}

impl ListingSummary {
    /// Combine a hit with its (possibly empty) description.
    pub fn from_hit(hit: &Hit, description: String) -> Self {
        Self {
            item_id: hit.item_id.clone(),
            title: hit.title.clone(),
            price: hit.price.clone(),
            description,
            url: hit.web_url.clone(),
        }
    }
}

impl fmt::Display for ListingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Title: {}", self.title)?;
        writeln!(f, "Price: {}", self.price)?;
        writeln!(f, "Description: {}", self.description)?;
        write!(f, "URL: {}", self.url)
    }
}

/// Outcome counts for one finished batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Generation assigned to the batch
    pub generation: u64,

    /// Number of slots dispatched (one per input image)
    pub dispatched: usize,

    /// Slots that completed with at least one hit
    pub succeeded: usize,

    /// Slots that completed with zero hits
    pub empty: usize,

    /// Slots that recorded an error
    pub failed: usize,

    /// Wall-clock time from submission to the last slot settling
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl BatchReport {
    /// True when every dispatched slot failed.
    pub fn all_failed(&self) -> bool {
        self.dispatched > 0 && self.failed == self.dispatched
    }
}

/// Notifications broadcast to shell subscribers.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// One slot reached `Completed` or `Failed`
    SlotSettled { generation: u64, slot: usize },
    /// Every dispatched slot of the batch has settled
    BatchCompleted(BatchReport),
    /// Credential acquisition failed; no slot was dispatched
    BatchFailed { generation: u64, error: String },
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
