//! Per-slot results and errors for the current batch.
//!
//! Slots are addressed directly by index. The batch driver is the only writer:
//! search tasks send a [`SlotCompletion`] over a channel and the driver applies
//! it here. Completions tagged with an older generation are discarded, so a
//! batch started while another is in flight never sees the old one's results.

use crate::error::SearchError;
use crate::types::{Hit, SlotSnapshot, SlotState, SLOT_COUNT};

/// Message emitted by one search task when its slot settles.
#[derive(Debug)]
pub struct SlotCompletion {
    pub generation: u64,
    pub slot: usize,
    pub result: Result<Vec<Hit>, SearchError>,
}

#[derive(Debug, Clone)]
struct ResultSlot {
    state: SlotState,
    generation: u64,
    hits: Vec<Hit>,
}

impl Default for ResultSlot {
    fn default() -> Self {
        Self {
            state: SlotState::Idle,
            generation: 0,
            hits: Vec::new(),
        }
    }
}

/// One ordered hit list per input-image slot.
#[derive(Debug, Default)]
pub struct ResultStore {
    slots: [ResultSlot; SLOT_COUNT],
}

impl ResultStore {
    /// Replace a slot's hits wholesale.
    fn replace(&mut self, slot: usize, generation: u64, state: SlotState, hits: Vec<Hit>) {
        self.slots[slot] = ResultSlot {
            state,
            generation,
            hits,
        };
    }

    pub fn hits(&self, slot: usize) -> Option<&[Hit]> {
        self.slots.get(slot).map(|s| s.hits.as_slice())
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }
}

/// Optional failure text per slot.
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: [Option<String>; SLOT_COUNT],
}

impl ErrorSink {
    fn record(&mut self, slot: usize, message: String) {
        self.errors[slot] = Some(message);
    }

    fn clear_slot(&mut self, slot: usize) {
        self.errors[slot] = None;
    }

    fn clear(&mut self) {
        self.errors = Default::default();
    }

    pub fn error(&self, slot: usize) -> Option<&str> {
        self.errors.get(slot).and_then(|e| e.as_deref())
    }

    /// Slots that currently have an error recorded.
    pub fn failed_slots(&self) -> Vec<usize> {
        (0..SLOT_COUNT).filter(|&i| self.errors[i].is_some()).collect()
    }
}

/// The results and errors of the current batch, gated by generation.
#[derive(Debug, Default)]
pub struct SlotBoard {
    generation: u64,
    results: ResultStore,
    errors: ErrorSink,
}

impl SlotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the batch that currently owns the board.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Claim the board for a new batch and clear every slot.
    ///
    /// Returns false if `generation` is older than the current owner.
    pub fn begin_batch(&mut self, generation: u64) -> bool {
        if generation < self.generation {
            return false;
        }
        self.generation = generation;
        for slot in 0..SLOT_COUNT {
            self.results.replace(slot, generation, SlotState::Idle, Vec::new());
        }
        self.errors.clear();
        true
    }

    /// Mark the first `count` slots as dispatched once a credential is in hand.
    pub fn mark_dispatched(&mut self, generation: u64, count: usize) -> bool {
        if generation != self.generation {
            return false;
        }
        for slot in 0..count.min(SLOT_COUNT) {
            self.results
                .replace(slot, generation, SlotState::Dispatched, Vec::new());
        }
        true
    }

    /// Apply one slot completion. Returns false if it was stale or out of range.
    pub fn apply(&mut self, completion: SlotCompletion) -> bool {
        if completion.generation != self.generation {
            tracing::debug!(
                "Discarding stale completion for slot {} (generation {} != {})",
                completion.slot,
                completion.generation,
                self.generation
            );
            return false;
        }
        if completion.slot >= SLOT_COUNT {
            tracing::warn!("Ignoring completion for out-of-range slot {}", completion.slot);
            return false;
        }

        match completion.result {
            Ok(hits) => {
                self.errors.clear_slot(completion.slot);
                self.results.replace(
                    completion.slot,
                    completion.generation,
                    SlotState::Completed,
                    hits,
                );
            }
            Err(e) => {
                self.results.replace(
                    completion.slot,
                    completion.generation,
                    SlotState::Failed,
                    Vec::new(),
                );
                self.errors.record(completion.slot, e.to_string());
            }
        }
        true
    }

    /// Copy of one slot for the shell; `None` for an out-of-range index.
    pub fn snapshot(&self, index: usize) -> Option<SlotSnapshot> {
        let slot = self.results.slots.get(index)?;
        Some(SlotSnapshot {
            index,
            generation: slot.generation,
            state: slot.state,
            hits: slot.hits.clone(),
            error: self.errors.error(index).map(str::to_string),
        })
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn errors(&self) -> &ErrorSink {
        &self.errors
    }
}
