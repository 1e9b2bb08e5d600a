//! Price Buffer
//!
//! Per-symbol, append-only sample lists accumulated between persistence
//! cycles, plus the one-shot "initial average" timers.
//!
//! # Invariants
//!
//! - A symbol key exists only while it holds at least one sample.
//! - At most one initial-average timer is pending per symbol.
//! - Once a symbol's initial average has fired it is never scheduled
//!   again, even after the symbol's samples are cleared.
//! - After [`PriceBuffer::clear_all_timers`] no new timer is scheduled.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::aggregation;
use super::trade::PriceSample;

#[derive(Debug, Default)]
struct InitialAverageState {
    emitted: HashSet<String>,
    pending: HashMap<String, JoinHandle<()>>,
    closed: bool,
}

/// In-memory price buffer shared between ingestion and persistence.
#[derive(Debug, Default)]
pub struct PriceBuffer {
    samples: Mutex<HashMap<String, Vec<PriceSample>>>,
    initial: Mutex<InitialAverageState>,
}

impl PriceBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample for `symbol`.
    ///
    /// Returns `true` when this is the first sample since the buffer for
    /// `symbol` was created or last cleared.
    pub fn add_sample(&self, symbol: &str, price: f64, timestamp_millis: i64) -> bool {
        let mut samples = self.samples.lock();
        let sample = PriceSample::new(price, timestamp_millis);

        if let Some(existing) = samples.get_mut(symbol) {
            existing.push(sample);
            false
        } else {
            samples.insert(symbol.to_string(), vec![sample]);
            true
        }
    }

    /// Copy of the samples buffered for `symbol`, in arrival order.
    #[must_use]
    pub fn samples(&self, symbol: &str) -> Option<Vec<PriceSample>> {
        self.samples.lock().get(symbol).cloned()
    }

    /// Whether `symbol` has buffered samples.
    #[must_use]
    pub fn has_samples(&self, symbol: &str) -> bool {
        self.samples.lock().contains_key(symbol)
    }

    /// Number of samples buffered for `symbol`.
    #[must_use]
    pub fn sample_count(&self, symbol: &str) -> usize {
        self.samples.lock().get(symbol).map_or(0, Vec::len)
    }

    /// Mean of the buffered samples, or `None` when there are none.
    #[must_use]
    pub fn average(&self, symbol: &str) -> Option<f64> {
        self.samples
            .lock()
            .get(symbol)
            .and_then(|samples| aggregation::average(samples))
    }

    /// Drop every sample for `symbol`. Returns whether anything was removed.
    ///
    /// The initial-average flag is left untouched.
    pub fn clear(&self, symbol: &str) -> bool {
        self.samples.lock().remove(symbol).is_some()
    }

    /// Remove the oldest `count` samples for `symbol`.
    ///
    /// Used after a successful save so that samples appended while the
    /// save was in flight stay buffered for the next cycle. The key is
    /// removed once nothing remains.
    pub fn drain_persisted(&self, symbol: &str, count: usize) {
        let mut samples = self.samples.lock();
        let Some(existing) = samples.get_mut(symbol) else {
            return;
        };

        if count >= existing.len() {
            samples.remove(symbol);
        } else {
            existing.drain(..count);
        }
    }

    /// Symbols with at least one buffered sample.
    #[must_use]
    pub fn symbols(&self) -> BTreeSet<String> {
        self.samples.lock().keys().cloned().collect()
    }

    /// Schedule `callback` to run once after `delay`.
    ///
    /// Nothing is scheduled if the initial average for `symbol` already
    /// fired, a timer is already pending, or the timers were shut down.
    /// Returns whether a timer was scheduled.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn schedule_initial_average<F>(self: &Arc<Self>, symbol: &str, delay: Duration, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut initial = self.initial.lock();
        if initial.closed
            || initial.emitted.contains(symbol)
            || initial.pending.contains_key(symbol)
        {
            return false;
        }

        let buffer: Weak<Self> = Arc::downgrade(self);
        let key = symbol.to_string();

        // The lock is held until the handle is stored, so the task cannot
        // observe the pending map without its own entry.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(buffer) = buffer.upgrade() else {
                return;
            };

            {
                let mut initial = buffer.initial.lock();
                initial.pending.remove(&key);
                if !initial.emitted.insert(key.clone()) {
                    return;
                }
            }

            tracing::debug!(symbol = %key, "Initial average timer fired");
            callback();
        });

        initial.pending.insert(symbol.to_string(), handle);
        true
    }

    /// Whether the initial average for `symbol` has fired.
    #[must_use]
    pub fn was_initial_average_sent(&self, symbol: &str) -> bool {
        self.initial.lock().emitted.contains(symbol)
    }

    /// Whether an initial-average timer is pending for `symbol`.
    #[must_use]
    pub fn has_pending_initial_average(&self, symbol: &str) -> bool {
        self.initial.lock().pending.contains_key(symbol)
    }

    /// Cancel every pending initial-average timer without firing it and
    /// refuse new ones from then on. Samples keep buffering.
    ///
    /// Returns the number of timers cancelled.
    pub fn clear_all_timers(&self) -> usize {
        let pending = {
            let mut initial = self.initial.lock();
            initial.closed = true;
            std::mem::take(&mut initial.pending)
        };
        let count = pending.len();
        for (_, handle) in pending {
            handle.abort();
        }
        count
    }
}
