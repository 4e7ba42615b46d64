use crate::config::FanoutConfig;
use crate::domain::event::{Channel, ChatEvent};
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::Instrument;

#[derive(Clone, Debug)]
struct Metrics {
    published_total: Counter<u64>,
    unrouted_total: Counter<u64>,
    active_channels: UpDownCounter<i64>,
    gc_duration_seconds: Histogram<f64>,
    gc_reclaimed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("confab-server");
        Self {
            published_total: meter
                .u64_counter("fanout_published_total")
                .with_description("Total events published to fan-out channels")
                .build(),
            unrouted_total: meter
                .u64_counter("fanout_unrouted_total")
                .with_description("Events published to channels with no live subscribers")
                .build(),
            active_channels: meter
                .i64_up_down_counter("fanout_active_channels")
                .with_description("Number of live fan-out channels")
                .build(),
            gc_duration_seconds: meter
                .f64_histogram("fanout_gc_duration_seconds")
                .with_description("Time taken to perform a single GC iteration")
                .build(),
            gc_reclaimed_total: meter
                .u64_counter("fanout_gc_reclaimed_total")
                .with_description("Total number of subscriber-less channels reclaimed by GC")
                .build(),
        }
    }
}

const fn channel_kind(channel: Channel) -> &'static str {
    match channel {
        Channel::Conversation(_) => "conversation",
        Channel::UserFeed(_) => "user_feed",
        Channel::Presence => "presence",
    }
}

/// A live interest in one channel. Dropping it releases the interest; the
/// periodic GC reclaims channels once their last subscription is gone.
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    rx: broadcast::Receiver<ChatEvent>,
}

impl Subscription {
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Receives the next event. `Lagged` means this subscriber fell behind
    /// and must backfill through the ledger rather than rely on the buffer.
    ///
    /// # Errors
    /// Returns `RecvError::Lagged` or `RecvError::Closed`.
    pub async fn recv(&mut self) -> std::result::Result<ChatEvent, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Self::recv`].
    ///
    /// # Errors
    /// Returns `TryRecvError::Empty` when no event is buffered.
    pub fn try_recv(&mut self) -> std::result::Result<ChatEvent, broadcast::error::TryRecvError> {
        self.rx.try_recv()
    }

    #[must_use]
    pub fn into_stream(self) -> BroadcastStream<ChatEvent> {
        BroadcastStream::new(self.rx)
    }
}

/// Multiplexes store mutations out to every interested client session.
///
/// One broadcast channel per [`Channel`] key; senders live in a sharded map
/// so concurrent subscribe/unsubscribe/publish never observe a half-updated
/// subscriber set, and a slow or failing subscriber can only lag its own
/// receiver, never stall delivery to the others.
#[derive(Clone, Debug)]
pub struct FanoutService {
    channels: Arc<DashMap<Channel, broadcast::Sender<ChatEvent>>>,
    capacity: usize,
    metrics: Metrics,
}

impl FanoutService {
    #[must_use]
    pub fn new(config: &FanoutConfig, shutdown: tokio::sync::watch::Receiver<bool>) -> Self {
        let service = Self {
            channels: Arc::new(DashMap::new()),
            capacity: config.channel_capacity,
            metrics: Metrics::new(),
        };

        let gc = service.clone();
        let interval_secs = config.gc_interval_secs;
        tokio::spawn(
            async move {
                gc.run_gc(interval_secs, shutdown).await;
            }
            .instrument(tracing::info_span!("fanout_gc")),
        );

        service
    }

    pub fn subscribe(&self, channel: Channel) -> Subscription {
        let rx = self
            .channels
            .entry(channel)
            .or_insert_with(|| {
                self.metrics.active_channels.add(1, &[]);
                let (tx, _rx) = broadcast::channel(self.capacity);
                tx
            })
            .value()
            .subscribe();

        Subscription { channel, rx }
    }

    /// Delivers the event to every currently-registered subscriber of the
    /// channel. Never blocks and never fails the writer: a channel with no
    /// subscribers is simply counted as unrouted.
    pub fn publish(&self, channel: Channel, event: ChatEvent) {
        let kind = KeyValue::new("channel", channel_kind(channel));

        match self.channels.get(&channel) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    self.metrics.unrouted_total.add(1, &[kind.clone()]);
                }
                self.metrics.published_total.add(1, &[kind]);
            }
            None => {
                self.metrics.unrouted_total.add(1, &[kind]);
            }
        }
    }

    fn sweep(&self) -> u64 {
        let mut reclaimed = 0;
        self.channels.retain(|_, sender| {
            let active = sender.receiver_count() > 0;
            if !active {
                self.metrics.active_channels.add(-1, &[]);
                reclaimed += 1;
            }
            active
        });
        reclaimed
    }

    async fn run_gc(&self, interval_secs: u64, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let start = std::time::Instant::now();
                    let reclaimed = self.sweep();

                    self.metrics.gc_duration_seconds.record(start.elapsed().as_secs_f64(), &[]);
                    if reclaimed > 0 {
                        self.metrics.gc_reclaimed_total.add(reclaimed, &[]);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
