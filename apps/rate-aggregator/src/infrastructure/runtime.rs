//! Aggregator Runtime
//!
//! Owns every long-lived component and drives their lifecycle:
//!
//! ```text
//! start: feed session connect ─► hourly trigger ─► retention trigger
//! stop:  cancel triggers ─► drop initial-average timers ─► unsubscribe + close
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{RatePublisherPort, RateStorePort, StoreError};
use crate::application::services::{
    CycleReport, IngestionCoordinator, InitialSnapshotService, PersistenceCycle,
};
use crate::domain::{HourlyAverageRecord, PriceBuffer};
use crate::infrastructure::broadcast::{SharedBroadcastHub, Subscriber};
use crate::infrastructure::config::RateAggregatorConfig;
use crate::infrastructure::feed::{
    FeedCodec, FeedSession, ReconnectConfig, StreamClient, StreamClientConfig,
};
use crate::infrastructure::scheduler::PeriodicTrigger;

/// Settings the runtime needs, resolved from the service configuration.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Full feed URL, including the token.
    pub stream_url: String,
    /// Symbols subscribed and snapshotted.
    pub symbols: Vec<String>,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Delay before a symbol's preliminary average.
    pub initial_average_delay: Duration,
    /// Persistence cadence.
    pub hourly_cycle: Duration,
    /// Retention cadence.
    pub retention_cycle: Duration,
    /// Retention window in days.
    pub retention_days: u32,
    /// Averages per symbol in an initial snapshot.
    pub snapshot_hours: usize,
    /// Align triggers to wall-clock boundaries.
    pub align_triggers: bool,
}

impl RuntimeSettings {
    /// Resolve runtime settings from configuration.
    #[must_use]
    pub fn from_config(config: &RateAggregatorConfig) -> Self {
        Self {
            stream_url: config.stream_url(),
            symbols: config.feed.symbols.clone(),
            reconnect: ReconnectConfig::from_feed_settings(&config.feed),
            initial_average_delay: config.aggregation.initial_average_delay,
            hourly_cycle: config.aggregation.hourly_cycle,
            retention_cycle: config.aggregation.retention_cycle,
            retention_days: config.aggregation.retention_days,
            snapshot_hours: config.aggregation.snapshot_hours,
            align_triggers: true,
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    stopped: bool,
    triggers: Vec<JoinHandle<u64>>,
}

/// The running aggregator.
pub struct RateAggregatorRuntime {
    settings: RuntimeSettings,
    buffer: Arc<PriceBuffer>,
    store: Arc<dyn RateStorePort>,
    hub: SharedBroadcastHub,
    session: FeedSession,
    persistence: Arc<PersistenceCycle>,
    snapshots: InitialSnapshotService,
    cancel: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
}

impl RateAggregatorRuntime {
    /// Wire the components. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        settings: RuntimeSettings,
        store: Arc<dyn RateStorePort>,
        hub: SharedBroadcastHub,
    ) -> Self {
        let buffer = Arc::new(PriceBuffer::new());
        let publisher: Arc<dyn RatePublisherPort> = hub.clone();

        let coordinator = Arc::new(IngestionCoordinator::new(
            Arc::clone(&buffer),
            Arc::clone(&publisher),
            Arc::new(FeedCodec::new()),
            settings.initial_average_delay,
        ));

        let client = StreamClient::new(StreamClientConfig::new(settings.reconnect.clone()));
        let session = FeedSession::new(client, settings.stream_url.clone(), settings.symbols.clone());
        session.attach(coordinator);

        let persistence = Arc::new(PersistenceCycle::new(
            Arc::clone(&buffer),
            Arc::clone(&store),
            Arc::clone(&publisher),
            settings.retention_days,
        ));

        let snapshots = InitialSnapshotService::new(
            Arc::clone(&store),
            publisher,
            settings.symbols.clone(),
            settings.snapshot_hours,
        );

        Self {
            settings,
            buffer,
            store,
            hub,
            session,
            persistence,
            snapshots,
            cancel: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Connect the feed and arm the periodic triggers.
    ///
    /// Must be called from within a tokio runtime. Calling it again, or
    /// after [`stop`](Self::stop), has no effect.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.started || lifecycle.stopped {
            return;
        }
        lifecycle.started = true;

        tracing::info!(
            symbols = ?self.settings.symbols,
            hourly_secs = self.settings.hourly_cycle.as_secs(),
            retention_secs = self.settings.retention_cycle.as_secs(),
            retention_days = self.settings.retention_days,
            "Starting rate aggregator"
        );

        self.session.start();

        let hourly = self.trigger("hourly-persistence", self.settings.hourly_cycle);
        let persistence = Arc::clone(&self.persistence);
        lifecycle.triggers.push(tokio::spawn(hourly.run(move || {
            let persistence = Arc::clone(&persistence);
            async move {
                persistence.run_hourly().await;
            }
        })));

        let retention = self.trigger("retention-cleanup", self.settings.retention_cycle);
        let persistence = Arc::clone(&self.persistence);
        lifecycle.triggers.push(tokio::spawn(retention.run(move || {
            let persistence = Arc::clone(&persistence);
            async move {
                persistence.run_retention().await;
            }
        })));
    }

    /// Stop the triggers, drop pending timers and close the feed.
    ///
    /// A persistence run already in progress finishes first. Idempotent.
    pub async fn stop(&self) {
        let triggers = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.stopped {
                return;
            }
            lifecycle.stopped = true;
            std::mem::take(&mut lifecycle.triggers)
        };

        self.cancel.cancel();
        for trigger in triggers {
            if let Err(e) = trigger.await {
                tracing::warn!(error = %e, "Periodic trigger ended abnormally");
            }
        }

        // Refuses new timers too, so frames pumped while the feed closes
        // cannot arm one.
        let timers = self.buffer.clear_all_timers();
        self.session.stop().await;

        tracing::info!(
            cancelled_timers = timers,
            unpersisted_symbols = self.buffer.symbols().len(),
            "Rate aggregator stopped"
        );
    }

    fn trigger(&self, name: &'static str, period: Duration) -> PeriodicTrigger {
        let trigger = PeriodicTrigger::new(name, period, self.cancel.child_token());
        if self.settings.align_triggers {
            trigger
        } else {
            trigger.unaligned()
        }
    }

    /// Attach a subscriber and send it the initial snapshot.
    pub async fn attach_subscriber(&self) -> Subscriber {
        let subscriber = self.hub.attach();
        self.snapshots.deliver(subscriber.id()).await;
        subscriber
    }

    /// Run one persistence cycle immediately.
    pub async fn persist_now(&self) -> CycleReport {
        self.persistence.run_hourly().await
    }

    /// Running average of the current hour's samples for `symbol`.
    #[must_use]
    pub fn current_average(&self, symbol: &str) -> Option<f64> {
        self.buffer.average(symbol)
    }

    /// Stored averages for `symbol`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn recent_averages(
        &self,
        symbol: &str,
        hours: usize,
    ) -> Result<Vec<HourlyAverageRecord>, StoreError> {
        self.store.find_recent(symbol, hours).await
    }

    /// The feed session.
    #[must_use]
    pub const fn session(&self) -> &FeedSession {
        &self.session
    }

    /// The price buffer.
    #[must_use]
    pub const fn buffer(&self) -> &Arc<PriceBuffer> {
        &self.buffer
    }

    /// The broadcast hub.
    #[must_use]
    pub const fn hub(&self) -> &SharedBroadcastHub {
        &self.hub
    }
}

impl std::fmt::Debug for RateAggregatorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("RateAggregatorRuntime")
            .field("symbols", &self.settings.symbols)
            .field("started", &lifecycle.started)
            .field("stopped", &lifecycle.stopped)
            .field("feed", &self.session.client().status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RateEvent;
    use crate::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
    use crate::infrastructure::persistence::InMemoryRateStore;

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            stream_url: "ws://127.0.0.1:9".to_string(),
            symbols: vec!["BINANCE:ETHUSDC".to_string()],
            reconnect: ReconnectConfig {
                max_attempts: 1,
                ..ReconnectConfig::default()
            },
            initial_average_delay: Duration::from_millis(2000),
            hourly_cycle: Duration::from_secs(3600),
            retention_cycle: Duration::from_secs(86_400),
            retention_days: 7,
            snapshot_hours: 24,
            align_triggers: false,
        }
    }

    fn runtime(store: Arc<InMemoryRateStore>) -> RateAggregatorRuntime {
        let hub = Arc::new(BroadcastHub::new(BroadcastConfig::default(), store.clone()));
        RateAggregatorRuntime::new(settings(), store, hub)
    }

    #[tokio::test]
    async fn stop_before_start_is_clean() {
        let runtime = runtime(Arc::new(InMemoryRateStore::new()));
        runtime.stop().await;
        runtime.start();
        assert!(!runtime.session().client().is_connected());
        assert!(!runtime.session().client().has_pending_reconnect());
    }

    #[tokio::test]
    async fn no_initial_average_timer_survives_stop() {
        let runtime = runtime(Arc::new(InMemoryRateStore::new()));
        runtime.stop().await;

        assert!(runtime.buffer().add_sample("BINANCE:ETHUSDC", 1.0, 1));
        assert!(!runtime.buffer().schedule_initial_average(
            "BINANCE:ETHUSDC",
            Duration::from_millis(1),
            || {}
        ));
        assert!(!runtime.buffer().has_pending_initial_average("BINANCE:ETHUSDC"));
    }

    #[tokio::test]
    async fn persist_now_and_query_recent() {
        let store = Arc::new(InMemoryRateStore::new());
        let runtime = runtime(Arc::clone(&store));

        runtime.buffer().add_sample("BINANCE:ETHUSDC", 1850.5, 1);
        runtime.buffer().add_sample("BINANCE:ETHUSDC", 1860.0, 2);
        assert_eq!(runtime.current_average("BINANCE:ETHUSDC"), Some(1855.25));

        let report = runtime.persist_now().await;
        assert_eq!(report.persisted, ["BINANCE:ETHUSDC"]);
        assert_eq!(runtime.current_average("BINANCE:ETHUSDC"), None);

        let recent = runtime.recent_averages("BINANCE:ETHUSDC", 24).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].average_price.to_string(), "1855.25");
        runtime.stop().await;
    }

    #[tokio::test]
    async fn attach_delivers_snapshot_directly() {
        let store = Arc::new(InMemoryRateStore::new());
        let runtime = runtime(Arc::clone(&store));
        runtime.buffer().add_sample("BINANCE:ETHUSDC", 10.0, 1);
        runtime.persist_now().await;

        let mut subscriber = runtime.attach_subscriber().await;
        match subscriber.direct.try_recv().unwrap() {
            RateEvent::InitialData(snapshot) => {
                assert_eq!(snapshot.symbol, "BINANCE:ETHUSDC");
                assert_eq!(snapshot.averages.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        runtime.stop().await;
    }
}
