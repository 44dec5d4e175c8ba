//! Topic subscription registry and refresh loop lifecycle.
//!
//! Each topic has at most one refresh loop. Membership changes and the
//! Idle -> Running transition happen under the topic's entry lock in the
//! concurrent map, so when many clients subscribe to a cold topic at
//! once, exactly one wins the transition and spawns the loop; everyone
//! else only joins the subscriber group. Unsubscribing never stops the
//! loop directly. When idle shutdown is configured, the loop itself
//! winds down after a topic has had no subscribers for the configured
//! time, re-checking membership under the entry lock so a late
//! subscriber either keeps it alive or finds the topic idle and starts
//! a fresh loop.
//!
//! Every tick the loop refreshes the topic's cached snapshot, reads it
//! back, and fans the frame out to all current subscribers. Delivery
//! failure means the subscriber is gone; it is pruned, never retried.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use codec::PushEvent;
use config::DispatchConfig;
use types::TopicKey;

use crate::cache_aside::TopicSource;
use crate::error::{OverviewError, Result};

pub type SubscriberId = Uuid;
pub type PushSender = mpsc::UnboundedSender<PushEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
}

struct TopicEntry {
    state: LoopState,
    subscribers: HashMap<SubscriberId, PushSender>,
    /// When the subscriber group last became empty.
    idle_since: Option<Instant>,
    stop: broadcast::Sender<()>,
}

impl TopicEntry {
    fn new() -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            state: LoopState::Idle,
            subscribers: HashMap::new(),
            idle_since: None,
            stop,
        }
    }
}

/// Counters exposed for the status endpoint and assertions in tests.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub loop_starts: AtomicU64,
    pub ticks: AtomicU64,
    pub deliveries: AtomicU64,
    pub delivery_failures: AtomicU64,
}

pub struct BroadcastDispatcher {
    sources: HashMap<TopicKey, Arc<dyn TopicSource>>,
    topics: DashMap<TopicKey, TopicEntry>,
    config: DispatchConfig,
    shutdown: broadcast::Sender<()>,
    stats: Arc<DispatchStats>,
}

impl BroadcastDispatcher {
    pub fn new(
        sources: HashMap<TopicKey, Arc<dyn TopicSource>>,
        config: DispatchConfig,
        shutdown: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sources,
            topics: DashMap::new(),
            config,
            shutdown,
            stats: Arc::new(DispatchStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    pub fn list_topics(&self) -> Vec<TopicKey> {
        self.sources.keys().cloned().collect()
    }

    pub fn subscriber_count(&self, topic: &TopicKey) -> usize {
        self.topics
            .get(topic)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.topics
            .iter()
            .map(|entry| entry.subscribers.len())
            .sum()
    }

    /// Read the topic's current cached snapshot without touching
    /// refresh state.
    pub async fn display(&self, topic: &TopicKey) -> Result<serde_json::Value> {
        let source = self.source(topic)?;
        Ok(source.snapshot().await)
    }

    /// Add a subscriber, deliver the current snapshot to it immediately,
    /// and start the topic's refresh loop if none is running.
    pub async fn subscribe(
        self: &Arc<Self>,
        topic: &TopicKey,
        subscriber: SubscriberId,
        sender: PushSender,
    ) -> Result<()> {
        let source = self.source(topic)?;

        let start_loop = {
            let mut entry = self
                .topics
                .entry(topic.clone())
                .or_insert_with(TopicEntry::new);
            entry.subscribers.insert(subscriber, sender.clone());
            entry.idle_since = None;
            if entry.state == LoopState::Idle {
                entry.state = LoopState::Running;
                true
            } else {
                false
            }
        };

        // The newcomer sees the current snapshot right away instead of
        // waiting out the first tick.
        let event = PushEvent::new(topic, source.snapshot().await);
        if sender.send(event).is_err() {
            debug!(topic = %topic, subscriber = %subscriber, "Subscriber disappeared before first delivery");
        }

        if start_loop {
            self.spawn_topic_loop(topic.clone(), source);
        }
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &TopicKey, subscriber: &SubscriberId) {
        if let Some(mut entry) = self.topics.get_mut(topic) {
            if entry.subscribers.remove(subscriber).is_some() {
                debug!(topic = %topic, subscriber = %subscriber, "Unsubscribed");
                if entry.subscribers.is_empty() {
                    entry.idle_since = Some(Instant::now());
                }
            }
        }
    }

    /// Drop a disconnected subscriber from every topic.
    pub fn unsubscribe_all(&self, subscriber: &SubscriberId) {
        for mut entry in self.topics.iter_mut() {
            if entry.subscribers.remove(subscriber).is_some() && entry.subscribers.is_empty() {
                entry.idle_since = Some(Instant::now());
            }
        }
    }

    /// Stop one topic's loop and mark it idle. The next subscriber
    /// starts a fresh loop.
    pub fn stop_topic(&self, topic: &TopicKey) {
        if let Some(mut entry) = self.topics.get_mut(topic) {
            entry.state = LoopState::Idle;
            entry.idle_since = None;
            let _ = entry.stop.send(());
        }
    }

    fn source(&self, topic: &TopicKey) -> Result<Arc<dyn TopicSource>> {
        self.sources
            .get(topic)
            .cloned()
            .ok_or_else(|| OverviewError::UnknownTopic(topic.to_string()))
    }

    fn spawn_topic_loop(self: &Arc<Self>, topic: TopicKey, source: Arc<dyn TopicSource>) {
        self.stats.loop_starts.fetch_add(1, Ordering::Relaxed);
        let tick = self.config.tick_for(topic.view);
        let Some(mut stop) = self.topics.get(&topic).map(|entry| entry.stop.subscribe()) else {
            return;
        };
        let mut shutdown = self.shutdown.subscribe();
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            info!(topic = %topic, tick_secs = tick.as_secs_f64(), "Starting topic refresh loop");
            // Warm the cache and deliver before the first tick.
            source.refresh().await;
            dispatcher.deliver(&topic, &source).await;

            let mut interval = tokio::time::interval(tick);
            interval.tick().await; // the immediate first tick
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        source.refresh().await;
                        dispatcher.deliver(&topic, &source).await;
                        if dispatcher.wind_down_if_idle(&topic) {
                            break;
                        }
                    }
                    _ = stop.recv() => {
                        debug!(topic = %topic, "Topic refresh loop stopped");
                        break;
                    }
                    _ = shutdown.recv() => {
                        debug!(topic = %topic, "Topic refresh loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    async fn deliver(&self, topic: &TopicKey, source: &Arc<dyn TopicSource>) {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let event = PushEvent::new(topic, source.snapshot().await);

        // Snapshot the membership, then send outside the entry lock.
        let targets: Vec<(SubscriberId, PushSender)> = match self.topics.get(topic) {
            Some(entry) => entry
                .subscribers
                .iter()
                .map(|(id, sender)| (*id, sender.clone()))
                .collect(),
            None => Vec::new(),
        };

        let mut failed = Vec::new();
        for (subscriber, sender) in targets {
            if sender.send(event.clone()).is_ok() {
                self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
            } else {
                failed.push(subscriber);
            }
        }

        if !failed.is_empty() {
            self.stats
                .delivery_failures
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
            if let Some(mut entry) = self.topics.get_mut(topic) {
                for subscriber in &failed {
                    entry.subscribers.remove(subscriber);
                }
                if entry.subscribers.is_empty() && entry.idle_since.is_none() {
                    entry.idle_since = Some(Instant::now());
                }
            }
            warn!(topic = %topic, dropped = failed.len(), "Removed unreachable subscribers");
        }
    }

    /// Decide under the entry lock whether an idle loop should wind
    /// down. A subscriber arriving at the same moment either keeps the
    /// loop alive or finds the topic idle and starts a new one.
    fn wind_down_if_idle(&self, topic: &TopicKey) -> bool {
        let Some(max_idle) = self.config.idle_shutdown() else {
            return false;
        };
        let Some(mut entry) = self.topics.get_mut(topic) else {
            return false;
        };

        if !entry.subscribers.is_empty() {
            entry.idle_since = None;
            return false;
        }
        match entry.idle_since {
            None => {
                entry.idle_since = Some(Instant::now());
                false
            }
            Some(since) if since.elapsed() >= max_idle => {
                entry.state = LoopState::Idle;
                entry.idle_since = None;
                info!(topic = %topic, "No subscribers; stopping topic refresh loop");
                true
            }
            Some(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use types::{ChainId, ViewKind};

    struct CountingSource {
        refreshes: AtomicU64,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                refreshes: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl TopicSource for CountingSource {
        async fn refresh(&self) {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
        }

        async fn snapshot(&self) -> Value {
            json!({ "refreshes": self.refreshes.load(Ordering::Relaxed) })
        }
    }

    fn blocks_topic() -> TopicKey {
        TopicKey::chain(ChainId::new("AELF"), ViewKind::Blocks)
    }

    fn dispatcher_with(
        topic: TopicKey,
        config: DispatchConfig,
    ) -> (Arc<BroadcastDispatcher>, Arc<CountingSource>) {
        let source = CountingSource::new();
        let mut sources: HashMap<TopicKey, Arc<dyn TopicSource>> = HashMap::new();
        sources.insert(topic, source.clone() as Arc<dyn TopicSource>);
        let (shutdown, _) = broadcast::channel(1);
        (BroadcastDispatcher::new(sources, config, shutdown), source)
    }

    fn channel() -> (PushSender, mpsc::UnboundedReceiver<PushEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_receives_current_snapshot_immediately() {
        let topic = blocks_topic();
        let (dispatcher, _) = dispatcher_with(topic.clone(), DispatchConfig::default());
        let (tx, mut rx) = channel();

        dispatcher
            .subscribe(&topic, SubscriberId::new_v4(), tx)
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "blocks");
        assert_eq!(frame.topic, "AELF:blocks");
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_deliver_refreshed_snapshots() {
        let topic = blocks_topic();
        let (dispatcher, source) = dispatcher_with(topic.clone(), DispatchConfig::default());
        let (tx, mut rx) = channel();

        dispatcher
            .subscribe(&topic, SubscriberId::new_v4(), tx)
            .await
            .unwrap();

        // Immediate frame, then the loop's warm frame, then tick frames.
        let mut seen = Vec::new();
        for _ in 0..4 {
            let frame = rx.recv().await.unwrap();
            seen.push(frame.data["refreshes"].as_u64().unwrap());
        }
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(*seen.last().unwrap() >= 2);
        assert!(source.refreshes.load(Ordering::Relaxed) >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribers_start_exactly_one_loop() {
        let topic = blocks_topic();
        let (dispatcher, _) = dispatcher_with(topic.clone(), DispatchConfig::default());

        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..16 {
            let (tx, rx) = channel();
            receivers.push(rx);
            let dispatcher = dispatcher.clone();
            let topic = topic.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .subscribe(&topic, SubscriberId::new_v4(), tx)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(dispatcher.stats().loop_starts.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.subscriber_count(&topic), 16);
        for rx in &mut receivers {
            assert!(rx.recv().await.is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_leaves_the_loop_running() {
        let topic = blocks_topic();
        let (dispatcher, _) = dispatcher_with(topic.clone(), DispatchConfig::default());
        let first = SubscriberId::new_v4();
        let second = SubscriberId::new_v4();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();

        dispatcher.subscribe(&topic, first, tx_a).await.unwrap();
        dispatcher.subscribe(&topic, second, tx_b).await.unwrap();
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        dispatcher.unsubscribe(&topic, &first);
        assert_eq!(dispatcher.subscriber_count(&topic), 1);

        // The remaining subscriber keeps receiving tick frames.
        rx_b.recv().await.unwrap();
        rx_b.recv().await.unwrap();
        assert_eq!(dispatcher.stats().loop_starts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_subscribers_are_pruned_on_delivery() {
        let topic = blocks_topic();
        let (dispatcher, _) = dispatcher_with(topic.clone(), DispatchConfig::default());
        let (tx, rx) = channel();

        dispatcher
            .subscribe(&topic, SubscriberId::new_v4(), tx)
            .await
            .unwrap();
        drop(rx);

        // Give the loop a few ticks to notice the dead channel.
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(dispatcher.subscriber_count(&topic), 0);
        assert!(dispatcher.stats().delivery_failures.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_topics_wind_down_and_restart_on_demand() {
        let topic = blocks_topic();
        let mut config = DispatchConfig::default();
        config.idle_shutdown_secs = Some(1);
        let (dispatcher, _) = dispatcher_with(topic.clone(), config);
        let subscriber = SubscriberId::new_v4();
        let (tx, mut rx) = channel();

        dispatcher.subscribe(&topic, subscriber, tx).await.unwrap();
        rx.recv().await.unwrap();
        dispatcher.unsubscribe(&topic, &subscriber);

        // Past the idle deadline the loop stops refreshing.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let ticks_after_wind_down = dispatcher.stats().ticks.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            dispatcher.stats().ticks.load(Ordering::Relaxed),
            ticks_after_wind_down
        );

        // A new subscriber finds the topic idle and starts a fresh loop.
        let (tx, mut rx) = channel();
        dispatcher
            .subscribe(&topic, SubscriberId::new_v4(), tx)
            .await
            .unwrap();
        rx.recv().await.unwrap();
        assert_eq!(dispatcher.stats().loop_starts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn without_idle_shutdown_the_loop_survives_an_empty_topic() {
        let topic = blocks_topic();
        let (dispatcher, _) = dispatcher_with(topic.clone(), DispatchConfig::default());
        let subscriber = SubscriberId::new_v4();
        let (tx, mut rx) = channel();

        dispatcher.subscribe(&topic, subscriber, tx).await.unwrap();
        rx.recv().await.unwrap();
        dispatcher.unsubscribe(&topic, &subscriber);

        tokio::time::sleep(Duration::from_secs(60)).await;

        // Resubscribing joins the still-running loop instead of
        // starting a second one.
        let (tx, mut rx) = channel();
        dispatcher
            .subscribe(&topic, SubscriberId::new_v4(), tx)
            .await
            .unwrap();
        rx.recv().await.unwrap();
        assert_eq!(dispatcher.stats().loop_starts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_topic_halts_the_loop_until_resubscribed() {
        let topic = blocks_topic();
        let (dispatcher, _) = dispatcher_with(topic.clone(), DispatchConfig::default());
        let (tx, mut rx) = channel();

        dispatcher
            .subscribe(&topic, SubscriberId::new_v4(), tx)
            .await
            .unwrap();
        rx.recv().await.unwrap();

        dispatcher.stop_topic(&topic);
        tokio::time::sleep(Duration::from_secs(10)).await;
        let ticks_after_stop = dispatcher.stats().ticks.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            dispatcher.stats().ticks.load(Ordering::Relaxed),
            ticks_after_stop
        );

        let (tx, mut rx) = channel();
        dispatcher
            .subscribe(&topic, SubscriberId::new_v4(), tx)
            .await
            .unwrap();
        rx.recv().await.unwrap();
        assert_eq!(dispatcher.stats().loop_starts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn unknown_topics_are_rejected() {
        let topic = blocks_topic();
        let (dispatcher, _) = dispatcher_with(topic, DispatchConfig::default());
        let unknown = TopicKey::chain(ChainId::new("nope"), ViewKind::Overview);
        let (tx, _rx) = channel();

        let err = dispatcher
            .subscribe(&unknown, SubscriberId::new_v4(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, OverviewError::UnknownTopic(_)));
        assert!(dispatcher.display(&unknown).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_all_clears_every_topic() {
        let blocks = blocks_topic();
        let overview = TopicKey::chain(ChainId::new("AELF"), ViewKind::Overview);
        let source = CountingSource::new();
        let mut sources: HashMap<TopicKey, Arc<dyn TopicSource>> = HashMap::new();
        sources.insert(blocks.clone(), source.clone() as Arc<dyn TopicSource>);
        sources.insert(overview.clone(), source as Arc<dyn TopicSource>);
        let (shutdown, _) = broadcast::channel(1);
        let dispatcher =
            BroadcastDispatcher::new(sources, DispatchConfig::default(), shutdown);

        let subscriber = SubscriberId::new_v4();
        let (tx, _rx) = channel();
        dispatcher
            .subscribe(&blocks, subscriber, tx.clone())
            .await
            .unwrap();
        dispatcher.subscribe(&overview, subscriber, tx).await.unwrap();
        assert_eq!(dispatcher.total_subscribers(), 2);

        dispatcher.unsubscribe_all(&subscriber);
        assert_eq!(dispatcher.total_subscribers(), 0);
    }
}
