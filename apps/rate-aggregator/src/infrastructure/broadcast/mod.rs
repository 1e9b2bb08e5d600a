//! Broadcast Hub
//!
//! Fans rate events out to attached subscribers using a tokio broadcast
//! channel, and implements the rate publisher port.
//!
//! # Delivery
//!
//! - `price:update`: shared channel, throttled per symbol. The first tick
//!   in a window is sent at once; the latest tick held back during the
//!   window is sent when it closes.
//! - `hourly-average`, `hourly:average`: shared channel
//! - `initial:data`: sent only to the subscriber it was built for
//!
//! Slow subscribers lag on the shared channel and miss events; they are
//! never allowed to block publishers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::BroadcastSettings;
use crate::application::ports::{RatePublisherPort, RateStorePort};
use crate::domain::{
    HourlyAverageRecord, InitialSnapshot, LiveTick, PreliminaryAverage, RateEvent, SubscriberId,
};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the broadcast hub.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of the shared event channel.
    pub capacity: usize,
    /// Minimum spacing of live ticks per symbol. Zero disables throttling.
    pub live_tick_interval: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            live_tick_interval: Duration::from_secs(1),
        }
    }
}

impl From<&BroadcastSettings> for BroadcastConfig {
    fn from(settings: &BroadcastSettings) -> Self {
        Self {
            capacity: settings.capacity,
            live_tick_interval: settings.live_tick_interval,
        }
    }
}

// =============================================================================
// Subscriber
// =============================================================================

/// An attached subscriber's receiving ends.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    /// Events shared by all subscribers.
    pub events: broadcast::Receiver<RateEvent>,
    /// Events addressed to this subscriber only.
    pub direct: mpsc::UnboundedReceiver<RateEvent>,
}

impl Subscriber {
    /// Subscriber identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Broadcast statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Attached subscribers.
    pub subscribers: usize,
    /// Live receivers on the shared channel.
    pub receivers: usize,
    /// Symbols with a live tick inside the current throttle window.
    pub throttled_symbols: usize,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Central fan-out point for rate events.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use rate_aggregator::application::ports::RatePublisherPort;
/// use rate_aggregator::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
/// use rate_aggregator::infrastructure::persistence::InMemoryRateStore;
///
/// let hub = BroadcastHub::new(BroadcastConfig::default(), Arc::new(InMemoryRateStore::new()));
/// let mut subscriber = hub.attach();
///
/// hub.publish_live_tick("BINANCE:ETHUSDT", 1850.5, 1_700_000_000_000);
/// let event = subscriber.events.try_recv().unwrap();
/// assert_eq!(event.name(), "price:update");
/// ```
pub struct BroadcastHub {
    events_tx: broadcast::Sender<RateEvent>,
    store: Arc<dyn RateStorePort>,
    live_tick_interval: Duration,
    windows: Arc<Mutex<HashMap<String, TickWindow>>>,
    subscribers: RwLock<HashMap<SubscriberId, mpsc::UnboundedSender<RateEvent>>>,
}

#[derive(Debug)]
struct TickWindow {
    opened: Instant,
    trailing: Option<LiveTick>,
    flush_armed: bool,
}

enum Admission {
    Send(LiveTick),
    Held,
    Flush(Instant),
}

/// Shared handle to the hub.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

impl BroadcastHub {
    /// Create a hub. `store` is read when publishing hourly averages.
    #[must_use]
    pub fn new(config: BroadcastConfig, store: Arc<dyn RateStorePort>) -> Self {
        Self {
            events_tx: broadcast::channel(config.capacity.max(1)).0,
            store,
            live_tick_interval: config.live_tick_interval,
            windows: Arc::new(Mutex::new(HashMap::new())),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a new subscriber.
    pub fn attach(&self) -> Subscriber {
        let id = SubscriberId::new();
        let (tx, direct) = mpsc::unbounded_channel();

        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        metrics::set_subscribers(count);
        tracing::info!(subscriber = %id, subscribers = count, "Subscriber attached");

        Subscriber {
            id,
            events: self.events_tx.subscribe(),
            direct,
        }
    }

    /// Detach a subscriber. Returns whether it was attached.
    pub fn detach(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };

        if removed {
            metrics::set_subscribers(count);
            tracing::info!(subscriber = %id, subscribers = count, "Subscriber detached");
        }
        removed
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        let now = Instant::now();
        let throttled_symbols = self
            .windows
            .lock()
            .values()
            .filter(|w| w.flush_armed || now.duration_since(w.opened) < self.live_tick_interval)
            .count();

        BroadcastStats {
            subscribers: self.subscriber_count(),
            receivers: self.events_tx.receiver_count(),
            throttled_symbols,
        }
    }

    /// Publish to the shared channel. Returns the number of receivers.
    fn send(&self, event: RateEvent) -> Option<usize> {
        let name = event.name();
        let delivered = self.events_tx.send(event).ok();
        tracing::trace!(event = name, receivers = delivered.unwrap_or(0), "Event broadcast");
        delivered
    }

    /// Leading and trailing throttle. The first tick of a window passes;
    /// later ones replace the held trailing tick, which is flushed when the
    /// window closes and opens the next window.
    fn admit_live_tick(&self, tick: LiveTick) -> Admission {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        match windows.get_mut(&tick.symbol) {
            Some(window)
                if window.flush_armed
                    || now.duration_since(window.opened) < self.live_tick_interval =>
            {
                window.trailing = Some(tick);
                if window.flush_armed {
                    Admission::Held
                } else {
                    window.flush_armed = true;
                    Admission::Flush(window.opened + self.live_tick_interval)
                }
            }
            _ => {
                windows.insert(
                    tick.symbol.clone(),
                    TickWindow {
                        opened: now,
                        trailing: None,
                        flush_armed: false,
                    },
                );
                Admission::Send(tick)
            }
        }
    }

    fn spawn_trailing_flush(&self, symbol: String, at: Instant) {
        let windows = Arc::clone(&self.windows);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(symbol = %symbol, "No runtime for trailing tick flush, dropping it");
            if let Some(window) = windows.lock().get_mut(&symbol) {
                window.flush_armed = false;
                window.trailing = None;
            }
            return;
        };

        let events_tx = self.events_tx.clone();
        runtime.spawn(async move {
            tokio::time::sleep_until(at).await;

            let trailing = windows.lock().get_mut(&symbol).and_then(|window| {
                window.flush_armed = false;
                let tick = window.trailing.take()?;
                window.opened = Instant::now();
                Some(tick)
            });

            if let Some(tick) = trailing {
                tracing::trace!(symbol = %symbol, "Trailing live tick flushed");
                let _ = events_tx.send(RateEvent::PriceUpdate(tick));
            }
        });
    }
}

#[async_trait]
impl RatePublisherPort for BroadcastHub {
    fn publish_live_tick(&self, symbol: &str, price: f64, timestamp_millis: i64) {
        let tick = LiveTick {
            symbol: symbol.to_string(),
            price,
            timestamp: timestamp_millis,
        };

        if self.live_tick_interval.is_zero() {
            self.send(RateEvent::PriceUpdate(tick));
            return;
        }

        match self.admit_live_tick(tick) {
            Admission::Send(tick) => {
                self.send(RateEvent::PriceUpdate(tick));
            }
            Admission::Held => metrics::record_live_tick_throttled(symbol),
            Admission::Flush(at) => {
                metrics::record_live_tick_throttled(symbol);
                self.spawn_trailing_flush(symbol.to_string(), at);
            }
        }
    }

    fn publish_preliminary_average(&self, symbol: &str, average: f64) {
        self.send(RateEvent::PreliminaryAverage(PreliminaryAverage {
            symbol: symbol.to_string(),
            average_price: average,
            hour: Utc::now(),
        }));
    }

    async fn publish_hourly_average(&self, symbol: &str) {
        match self.store.find_recent(symbol, 1).await {
            Ok(records) => {
                if let Some(record) = records.into_iter().next() {
                    self.send(RateEvent::HourlyAverage(record));
                } else {
                    tracing::warn!(symbol, "No stored hourly average to publish");
                }
            }
            Err(e) => {
                tracing::warn!(symbol, error = %e, "Failed to read hourly average for publishing");
            }
        }
    }

    fn publish_initial_snapshot(
        &self,
        subscriber: SubscriberId,
        symbol: &str,
        averages: Vec<HourlyAverageRecord>,
    ) {
        let event = RateEvent::InitialData(InitialSnapshot {
            symbol: symbol.to_string(),
            averages,
        });

        let sent = self
            .subscribers
            .read()
            .get(&subscriber)
            .is_some_and(|tx| tx.send(event).is_ok());

        if !sent {
            tracing::debug!(subscriber = %subscriber, symbol, "Snapshot target no longer attached");
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("live_tick_interval", &self.live_tick_interval)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
