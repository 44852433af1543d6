//! In-memory delayed broker
//!
//! This module contains an in-process broker responsible for:
//! - holding sessions and push subscriptions per consumer group
//! - keeping every accepted message invisible until its delay tier elapses
//! - pushing due messages to subscribers in batches and tracking their acks
//! - rescheduling failed batches with a growing backoff, then dead-lettering
//! - parking messages nobody subscribes to and replaying them on subscribe
//!
//! Concurrency and usage notes:
//! - All state sits behind one `std::sync::Mutex`; it is never held across an
//!   `.await`. Pushing to subscribers uses `try_send`, so a slow consumer
//!   cannot stall the scheduler: a full channel reschedules the batch instead.
//! - A single scheduler task owns the timer. It holds only a weak reference, so
//!   dropping the last `InMemoryBroker` clone stops it.
//! - `InMemoryBroker::new` spawns that task and therefore needs a Tokio runtime.
//! - Every pushed batch gets one ack watcher task. It lives until the consumer
//!   acks or drops the delivery, or the broker shuts down; a handler stuck on
//!   a batch keeps exactly one watcher alive.
//! - The backlog (per topic) and the dead-letter queue are bounded; when full
//!   the oldest entries are dropped and counted in `BrokerStats::discarded`.

use super::delay::DelayTier;
use super::error::BrokerError;
use super::message::{ConsumeResult, DelayedMessage, Delivery, MessageExt, SendReceipt};
use super::selector::MessageSelector;
use super::{BrokerTransport, SubscriptionRequest};
use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning knobs for [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Redeliveries allowed before a message is dead-lettered.
    pub max_reconsume_times: u32,
    /// Capacity of each subscription's delivery channel.
    pub delivery_buffer: usize,
    /// How long to wait before retrying a push to a full subscription.
    pub busy_retry: Duration,
    /// Messages parked per topic while nobody subscribes.
    pub max_backlog: usize,
    /// Dead letters kept until drained.
    pub max_dead_letters: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            max_reconsume_times: 16,
            delivery_buffer: 64,
            busy_retry: Duration::from_secs(1),
            max_backlog: 10_000,
            max_dead_letters: 1_000,
        }
    }
}

/// Counters exposed for observation and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub accepted: u64,
    pub delivered: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
    /// Parked or dead-lettered messages dropped because their queue was full.
    pub discarded: u64,
}

/// A message that exhausted its redeliveries for a group.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub group: String,
    pub message: MessageExt,
}

struct Scheduled {
    due: Instant,
    seq: u64,
    message: MessageExt,
    /// `None` fans out to every matching group; `Some` targets one redelivery.
    group: Option<String>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct Subscription {
    owner: String,
    group: String,
    selector: MessageSelector,
    max_batch_size: usize,
    sender: mpsc::Sender<Delivery>,
}

struct State {
    reachable: bool,
    sessions: HashSet<String>,
    timers: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
    next_offset: u64,
    subscriptions: HashMap<String, Vec<Subscription>>,
    backlog: HashMap<String, Vec<MessageExt>>,
    dead_letters: VecDeque<DeadLetter>,
    injected_failures: VecDeque<BrokerError>,
    stats: BrokerStats,
}

impl State {
    fn schedule(&mut self, due: Instant, message: MessageExt, group: Option<String>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Reverse(Scheduled {
            due,
            seq,
            message,
            group,
        }));
    }

    fn next_due(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(s)| s.due)
    }

    /// Parks messages for `topic`, dropping the oldest beyond `cap`.
    fn park(&mut self, topic: String, messages: impl IntoIterator<Item = MessageExt>, cap: usize) {
        let parked = self.backlog.entry(topic).or_default();
        parked.extend(messages);
        let excess = parked.len().saturating_sub(cap);
        if excess > 0 {
            parked.drain(..excess);
            self.stats.discarded += excess as u64;
            warn!(excess, cap, "Backlog full, dropped oldest messages");
        }
    }

    fn dead_letter(&mut self, letter: DeadLetter, cap: usize) {
        self.dead_letters.push_back(letter);
        while self.dead_letters.len() > cap {
            if let Some(dropped) = self.dead_letters.pop_front() {
                self.stats.discarded += 1;
                warn!(message_id = %dropped.message.message_id, cap, "Dead-letter queue full, dropped oldest");
            }
        }
    }
}

struct Inner {
    name_server: String,
    options: BrokerOptions,
    state: Mutex<State>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A delayed-message broker living inside the process.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("name_server", &self.inner.name_server)
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new(name_server: impl Into<String>) -> Self {
        Self::with_options(name_server, BrokerOptions::default())
    }

    pub fn with_options(name_server: impl Into<String>, options: BrokerOptions) -> Self {
        let wake = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let inner = Arc::new(Inner {
            name_server: name_server.into(),
            options,
            state: Mutex::new(State {
                reachable: true,
                sessions: HashSet::new(),
                timers: BinaryHeap::new(),
                next_seq: 0,
                next_offset: 0,
                subscriptions: HashMap::new(),
                backlog: HashMap::new(),
                dead_letters: VecDeque::new(),
                injected_failures: VecDeque::new(),
                stats: BrokerStats::default(),
            }),
            wake: wake.clone(),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_scheduler(Arc::downgrade(&inner), wake, shutdown));
        info!(name_server = %inner.name_server, "Broker started");
        Self { inner }
    }

    /// Simulates the name server going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// Makes the next `n` sends fail with a transient error.
    pub fn fail_next_sends(&self, n: usize) {
        let mut state = self.inner.lock();
        for i in 0..n {
            state
                .injected_failures
                .push_back(BrokerError::Transient(format!("injected failure {}", i + 1)));
        }
    }

    pub fn stats(&self) -> BrokerStats {
        self.inner.lock().stats
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().dead_letters.iter().cloned().collect()
    }

    /// Removes and returns every dead letter, oldest first.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().dead_letters.drain(..).collect()
    }

    /// Messages parked for `topic` because nobody was subscribed.
    pub fn backlog_len(&self, topic: &str) -> usize {
        self.inner.lock().backlog.get(topic).map_or(0, Vec::len)
    }

    pub fn has_session(&self, client_id: &str) -> bool {
        self.inner.lock().sessions.contains(client_id)
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.inner.lock().subscriptions.get(topic).map_or(0, Vec::len)
    }

    /// Stops the scheduler. Later calls fail with [`BrokerError::Closed`].
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.inner.lock();
        state.sessions.clear();
        state.subscriptions.clear();
        info!(name_server = %self.inner.name_server, "Broker closed");
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a panic happened mid-update elsewhere; the
        // maps themselves are still structurally valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self, state: &State, client_id: &str) -> Result<(), BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        if !state.reachable {
            return Err(BrokerError::Transient(format!(
                "name server {} unreachable",
                self.name_server
            )));
        }
        if !state.sessions.contains(client_id) {
            return Err(BrokerError::NoSession(client_id.to_string()));
        }
        Ok(())
    }

    /// Pushes every message whose delay has elapsed.
    fn dispatch_due(self: &Arc<Self>) {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;

        let mut due = Vec::new();
        while state.timers.peek().is_some_and(|Reverse(s)| s.due <= now) {
            if let Some(Reverse(scheduled)) = state.timers.pop() {
                due.push(scheduled);
            }
        }
        if due.is_empty() {
            return;
        }

        // (topic, group) -> messages, in due order
        let mut routed: Vec<(String, String, Vec<MessageExt>)> = Vec::new();
        let mut push_routed = |topic: &str, group: &str, message: MessageExt| {
            match routed
                .iter_mut()
                .find(|(t, g, _)| t == topic && g == group)
            {
                Some((_, _, messages)) => messages.push(message),
                None => routed.push((topic.to_string(), group.to_string(), vec![message])),
            }
        };

        for scheduled in due {
            let topic = scheduled.message.topic.clone();
            let subscriptions = state.subscriptions.get(&topic);

            match scheduled.group {
                Some(group) => {
                    let subscribed =
                        subscriptions.is_some_and(|subs| subs.iter().any(|s| s.group == group));
                    if subscribed {
                        push_routed(&topic, &group, scheduled.message);
                    } else {
                        state.park(topic, [scheduled.message], self.options.max_backlog);
                    }
                }
                None => match subscriptions {
                    Some(subs) if !subs.is_empty() => {
                        let groups: Vec<String> = subs
                            .iter()
                            .filter(|s| s.selector.matches(&scheduled.message.tag))
                            .map(|s| s.group.clone())
                            .collect();
                        if groups.is_empty() {
                            debug!(
                                message_id = %scheduled.message.message_id,
                                tag = %scheduled.message.tag,
                                "No selector matched, message filtered"
                            );
                        }
                        for group in groups {
                            push_routed(&topic, &group, scheduled.message.clone());
                        }
                    }
                    _ => {
                        debug!(%topic, message_id = %scheduled.message.message_id, "No subscriber, parked in backlog");
                        state.park(topic, [scheduled.message], self.options.max_backlog);
                    }
                },
            }
        }

        let mut closed: Vec<(String, String)> = Vec::new();
        for (topic, group, messages) in routed {
            let target = state
                .subscriptions
                .get(&topic)
                .and_then(|subs| subs.iter().find(|s| s.group == group))
                .map(|s| (s.sender.clone(), s.max_batch_size.max(1)));
            let Some((sender, batch_size)) = target else {
                state.park(topic, messages, self.options.max_backlog);
                continue;
            };

            for chunk in messages.chunks(batch_size) {
                let (delivery, response) = Delivery::new(chunk.to_vec());
                match sender.try_send(delivery) {
                    Ok(()) => {
                        state.stats.delivered += chunk.len() as u64;
                        debug!(%topic, %group, batch = chunk.len(), "Pushed batch");
                        watch_ack(
                            Arc::downgrade(self),
                            self.shutdown.clone(),
                            group.clone(),
                            chunk.to_vec(),
                            response,
                        );
                    }
                    Err(TrySendError::Full(delivery)) => {
                        warn!(%topic, %group, "Subscriber busy, rescheduling batch");
                        let due = now + self.options.busy_retry;
                        for message in delivery.messages {
                            state.schedule(due, message, Some(group.clone()));
                        }
                    }
                    Err(TrySendError::Closed(delivery)) => {
                        info!(%topic, %group, "Subscriber gone, parking batch");
                        state.park(topic.clone(), delivery.messages, self.options.max_backlog);
                        closed.push((topic.clone(), group.clone()));
                    }
                }
            }
        }

        for (topic, group) in closed {
            if let Some(subs) = state.subscriptions.get_mut(&topic) {
                subs.retain(|s| s.group != group || !s.sender.is_closed());
            }
        }
    }

    /// Reschedules a failed batch for one group, or dead-letters it.
    fn redeliver(&self, group: &str, messages: Vec<MessageExt>) {
        let mut state = self.lock();
        let now = Instant::now();
        for mut message in messages {
            message.reconsume_times += 1;
            if message.reconsume_times > self.options.max_reconsume_times {
                warn!(
                    message_id = %message.message_id,
                    group,
                    reconsume_times = message.reconsume_times,
                    "Redeliveries exhausted, dead-lettering"
                );
                state.stats.dead_lettered += 1;
                let letter = DeadLetter {
                    group: group.to_string(),
                    message,
                };
                state.dead_letter(letter, self.options.max_dead_letters);
                continue;
            }

            let backoff = DelayTier::for_redelivery(message.reconsume_times);
            debug!(
                message_id = %message.message_id,
                group,
                reconsume_times = message.reconsume_times,
                %backoff,
                "Scheduling redelivery"
            );
            state.stats.redelivered += 1;
            state.schedule(now + backoff.duration(), message, Some(group.to_string()));
        }
        drop(state);
        self.wake.notify_one();
    }
}

fn watch_ack(
    broker: Weak<Inner>,
    shutdown: CancellationToken,
    group: String,
    messages: Vec<MessageExt>,
    response: oneshot::Receiver<ConsumeResult>,
) {
    tokio::spawn(async move {
        let result = tokio::select! {
            // A consumer that drops the delivery never acknowledged it.
            result = response => result.unwrap_or(ConsumeResult::RetryLater),
            _ = shutdown.cancelled() => return,
        };
        if result == ConsumeResult::Success {
            return;
        }
        if let Some(inner) = broker.upgrade() {
            inner.redeliver(&group, messages);
        }
    });
}

async fn run_scheduler(broker: Weak<Inner>, wake: Arc<Notify>, shutdown: CancellationToken) {
    loop {
        let next_due = match broker.upgrade() {
            Some(inner) => inner.lock().next_due(),
            None => break,
        };
        let sleep = async {
            match next_due {
                Some(due) => tokio::time::sleep_until(due).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wake.notified() => {}
            _ = sleep => {
                match broker.upgrade() {
                    Some(inner) => inner.dispatch_due(),
                    None => break,
                }
            }
        }
    }
    debug!("Broker scheduler stopped");
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    fn name_server(&self) -> &str {
        &self.inner.name_server
    }

    async fn connect(&self, client_id: &str) -> Result<(), BrokerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        let mut state = self.inner.lock();
        if !state.reachable {
            return Err(BrokerError::Unreachable(self.inner.name_server.clone()));
        }
        state.sessions.insert(client_id.to_string());
        info!(client_id, "Session opened");
        Ok(())
    }

    async fn disconnect(&self, client_id: &str) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();
        if !state.reachable {
            return Err(BrokerError::Unreachable(self.inner.name_server.clone()));
        }
        state.sessions.remove(client_id);
        for subs in state.subscriptions.values_mut() {
            subs.retain(|s| s.owner != client_id);
        }
        info!(client_id, "Session closed");
        Ok(())
    }

    async fn send(
        &self,
        client_id: &str,
        message: DelayedMessage,
    ) -> Result<SendReceipt, BrokerError> {
        let mut state = self.inner.lock();
        self.inner.ensure_open(&state, client_id)?;
        if let Some(failure) = state.injected_failures.pop_front() {
            return Err(failure);
        }

        let stored = message.into_stored(Utc::now());
        let receipt = SendReceipt {
            message_id: stored.message_id.clone(),
            topic: stored.topic.clone(),
            delay: stored.delay,
            queue_offset: state.next_offset,
            eligible_at: stored.eligible_at,
        };
        state.next_offset += 1;
        state.stats.accepted += 1;

        let due = Instant::now() + stored.delay.duration();
        state.schedule(due, stored, None);
        drop(state);
        self.inner.wake.notify_one();

        debug!(message_id = %receipt.message_id, topic = %receipt.topic, delay = %receipt.delay, "Accepted");
        Ok(receipt)
    }

    async fn subscribe(
        &self,
        client_id: &str,
        request: SubscriptionRequest,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let mut state = self.inner.lock();
        self.inner.ensure_open(&state, client_id)?;

        let (sender, receiver) = mpsc::channel(self.inner.options.delivery_buffer);
        let SubscriptionRequest {
            group,
            topic,
            selector,
            max_batch_size,
        } = request;

        let subs = state.subscriptions.entry(topic.clone()).or_default();
        subs.retain(|s| s.group != group);
        subs.push(Subscription {
            owner: client_id.to_string(),
            group: group.clone(),
            selector: selector.clone(),
            max_batch_size,
            sender,
        });

        if let Some(parked) = state.backlog.remove(&topic) {
            let (replay, keep): (Vec<_>, Vec<_>) =
                parked.into_iter().partition(|m| selector.matches(&m.tag));
            if !keep.is_empty() {
                state.backlog.insert(topic.clone(), keep);
            }
            if !replay.is_empty() {
                info!(%topic, %group, count = replay.len(), "Replaying backlog");
            }
            let now = Instant::now();
            for message in replay {
                state.schedule(now, message, Some(group.clone()));
            }
        }
        drop(state);
        self.inner.wake.notify_one();

        info!(client_id, %topic, %group, %selector, "Subscribed");
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(group: &str, topic: &str, selector: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            group: group.to_string(),
            topic: topic.to_string(),
            selector: MessageSelector::parse(selector),
            max_batch_size: 8,
        }
    }

    fn message(topic: &str, tag: &str, tier: DelayTier) -> DelayedMessage {
        DelayedMessage::new(topic, b"{}".to_vec(), tier)
            .unwrap()
            .with_tag(tag)
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_invisible_until_delay_elapses() {
        let broker = InMemoryBroker::new("127.0.0.1:9876");
        broker.connect("c1").await.unwrap();
        let mut rx = broker.subscribe("c1", request("g", "t", "")).await.unwrap();

        broker
            .send("c1", message("t", "create", DelayTier::FIVE_SECONDS))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(rx.try_recv().is_err());

        let delivery = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.messages.len(), 1);
        delivery.ack(ConsumeResult::Success);
        assert_eq!(broker.stats().delivered, 1);
    }

    /// Each tier holds its message for exactly its delay, then delivers once.
    #[tokio::test(start_paused = true)]
    async fn test_every_tier_delivers_once_after_its_delay() {
        let broker = InMemoryBroker::new("ns");
        broker.connect("c1").await.unwrap();
        let mut rx = broker.subscribe("c1", request("g", "t", "")).await.unwrap();

        for (delivered, tier) in DelayTier::all().enumerate() {
            broker.send("c1", message("t", "", tier)).await.unwrap();

            tokio::time::sleep(tier.duration() - Duration::from_millis(1)).await;
            assert!(rx.try_recv().is_err(), "{tier} delivered early");

            let delivery = tokio::time::timeout(Duration::from_millis(5), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("{tier} not delivered on time"))
                .unwrap();
            assert_eq!(delivery.messages.len(), 1);
            assert_eq!(delivery.messages[0].delay, tier);
            delivery.ack(ConsumeResult::Success);

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(rx.try_recv().is_err(), "{tier} delivered twice");
            assert_eq!(broker.stats().delivered, delivered as u64 + 1);
        }
        assert_eq!(broker.stats().redelivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_messages_are_batched() {
        let broker = InMemoryBroker::new("ns");
        broker.connect("c1").await.unwrap();
        let mut rx = broker.subscribe("c1", request("g", "t", "*")).await.unwrap();

        for _ in 0..3 {
            broker
                .send("c1", message("t", "create", DelayTier::ONE_SECOND))
                .await
                .unwrap();
        }

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.messages.len(), 3);
        delivery.ack(ConsumeResult::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_later_redelivers_to_same_group() {
        let broker = InMemoryBroker::new("ns");
        broker.connect("c1").await.unwrap();
        let mut rx = broker.subscribe("c1", request("g", "t", "")).await.unwrap();

        broker
            .send("c1", message("t", "", DelayTier::ONE_SECOND))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let id = first.messages[0].message_id.clone();
        first.ack(ConsumeResult::RetryLater);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.messages[0].message_id, id);
        assert_eq!(second.messages[0].reconsume_times, 1);
        second.ack(ConsumeResult::Success);
        assert_eq!(broker.stats().redelivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_redeliveries_are_dead_lettered() {
        let options = BrokerOptions {
            max_reconsume_times: 1,
            ..BrokerOptions::default()
        };
        let broker = InMemoryBroker::with_options("ns", options);
        broker.connect("c1").await.unwrap();
        let mut rx = broker.subscribe("c1", request("g", "t", "")).await.unwrap();

        broker
            .send("c1", message("t", "", DelayTier::ONE_SECOND))
            .await
            .unwrap();

        rx.recv().await.unwrap().ack(ConsumeResult::RetryLater);
        rx.recv().await.unwrap().ack(ConsumeResult::RetryLater);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(broker.dead_letters().len(), 1);
        assert_eq!(broker.dead_letters()[0].group, "g");
        assert_eq!(broker.stats().dead_lettered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selector_filters_by_tag() {
        let broker = InMemoryBroker::new("ns");
        broker.connect("c1").await.unwrap();
        let mut rx = broker
            .subscribe("c1", request("g", "t", "pay"))
            .await
            .unwrap();

        broker
            .send("c1", message("t", "create", DelayTier::ONE_SECOND))
            .await
            .unwrap();
        broker
            .send("c1", message("t", "pay", DelayTier::FIVE_SECONDS))
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.messages.len(), 1);
        assert_eq!(delivery.messages[0].tag, "pay");
        delivery.ack(ConsumeResult::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_replayed_to_late_subscriber() {
        let broker = InMemoryBroker::new("ns");
        broker.connect("c1").await.unwrap();
        broker
            .send("c1", message("t", "", DelayTier::ONE_SECOND))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(broker.backlog_len("t"), 1);

        let mut rx = broker.subscribe("c1", request("g", "t", "")).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.messages.len(), 1);
        assert_eq!(broker.backlog_len("t"), 0);
        delivery.ack(ConsumeResult::Success);
    }

    #[tokio::test]
    async fn test_send_requires_session() {
        let broker = InMemoryBroker::new("ns");
        let result = broker
            .send("nobody", message("t", "", DelayTier::ONE_SECOND))
            .await;
        assert_eq!(result, Err(BrokerError::NoSession("nobody".to_string())));
    }

    #[tokio::test]
    async fn test_unreachable_name_server() {
        let broker = InMemoryBroker::new("10.0.0.1:9876");
        broker.set_reachable(false);
        assert_eq!(
            broker.connect("c1").await,
            Err(BrokerError::Unreachable("10.0.0.1:9876".to_string()))
        );
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let broker = InMemoryBroker::new("ns");
        broker.connect("c1").await.unwrap();
        broker.fail_next_sends(1);

        let err = broker
            .send("c1", message("t", "", DelayTier::ONE_SECOND))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(broker
            .send("c1", message("t", "", DelayTier::ONE_SECOND))
            .await
            .is_ok());
        assert_eq!(broker.stats().accepted, 1);
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscriptions() {
        let broker = InMemoryBroker::new("ns");
        broker.connect("c1").await.unwrap();
        let mut rx = broker.subscribe("c1", request("g", "t", "")).await.unwrap();
        assert_eq!(broker.subscription_count("t"), 1);

        broker.disconnect("c1").await.unwrap();
        assert_eq!(broker.subscription_count("t"), 0);
        assert!(!broker.has_session("c1"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_drops_oldest_beyond_cap() {
        let options = BrokerOptions {
            max_backlog: 2,
            ..BrokerOptions::default()
        };
        let broker = InMemoryBroker::with_options("ns", options);
        broker.connect("c1").await.unwrap();
        for tag in ["a", "b", "c"] {
            broker
                .send("c1", message("t", tag, DelayTier::ONE_SECOND))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(broker.backlog_len("t"), 2);
        assert_eq!(broker.stats().discarded, 1);

        let mut rx = broker.subscribe("c1", request("g", "t", "")).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        let tags: Vec<&str> = delivery.messages.iter().map(|m| m.tag.as_str()).collect();
        assert_eq!(tags, ["b", "c"]);
        delivery.ack(ConsumeResult::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letters_are_capped_and_drained() {
        let options = BrokerOptions {
            max_reconsume_times: 0,
            max_dead_letters: 1,
            ..BrokerOptions::default()
        };
        let broker = InMemoryBroker::with_options("ns", options);
        broker.connect("c1").await.unwrap();
        let mut rx = broker.subscribe("c1", request("g", "t", "")).await.unwrap();
        for tag in ["first", "second"] {
            broker
                .send("c1", message("t", tag, DelayTier::ONE_SECOND))
                .await
                .unwrap();
        }

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.messages.len(), 2);
        delivery.ack(ConsumeResult::RetryLater);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = broker.stats();
        assert_eq!(stats.dead_lettered, 2);
        assert_eq!(stats.discarded, 1);

        let drained = broker.drain_dead_letters();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message.tag, "second");
        assert!(broker.dead_letters().is_empty());
    }
}
