use chrono::Utc;
use council_core::{ProgressKind, ProgressMessage, RequestId};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tuning knobs for the progress bus.
#[derive(Debug, Clone)]
pub struct ProgressBusConfig {
    /// Heartbeat cadence on requests with live subscribers.
    pub heartbeat_interval: Duration,
    /// A subscriber that received no outbound traffic for this long is
    /// closed.
    pub idle_timeout: Duration,
    /// Unacknowledged messages older than this are dropped.
    pub message_ttl: Duration,
    /// Channel capacity granted to each subscriber on top of the replay
    /// backlog.
    pub subscriber_buffer: usize,
}

impl Default for ProgressBusConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            message_ttl: Duration::from_secs(24 * 3600),
            subscriber_buffer: 64,
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<ProgressMessage>,
    last_sent: Instant,
}

struct Mailbox {
    /// Next sequence number to assign; the first message gets 1.
    next_seq: u64,
    /// Messages not yet pruned by acknowledgement, oldest first.
    buffer: VecDeque<ProgressMessage>,
    acked_seq: u64,
    subscribers: Vec<Subscriber>,
    /// Set once a terminal kind was published; the stream is complete.
    closed: bool,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            next_seq: 1,
            buffer: VecDeque::new(),
            acked_seq: 0,
            subscribers: Vec::new(),
            closed: false,
        }
    }

    fn append(&mut self, kind: ProgressKind, payload: Value, idle_timeout: Duration) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let message = ProgressMessage::new(seq, kind, payload);
        self.buffer.push_back(message.clone());
        if kind.is_terminal() {
            self.closed = true;
        }
        self.fan_out(&message, idle_timeout);
        seq
    }

    fn fan_out(&mut self, message: &ProgressMessage, idle_timeout: Duration) {
        let now = Instant::now();
        self.subscribers.retain_mut(|sub| {
            match sub.tx.try_send(message.clone()) {
                Ok(()) => {
                    sub.last_sent = now;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Keep the subscriber; it can recover the gap via
                    // reconnect-with-since_seq. Close it once it has been
                    // unable to take traffic for the idle timeout.
                    now.duration_since(sub.last_sent) < idle_timeout
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        if self.closed {
            self.subscribers.clear();
        }
    }

    fn prune_acked(&mut self) {
        while let Some(front) = self.buffer.front() {
            if front.seq <= self.acked_seq {
                self.buffer.pop_front();
            } else {
                break;
            }
        }
    }

    fn prune_expired(&mut self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = Utc::now() - ttl;
        let before = self.buffer.len();
        while let Some(front) = self.buffer.front() {
            if front.created_at < cutoff {
                self.buffer.pop_front();
            } else {
                break;
            }
        }
        before - self.buffer.len()
    }
}

/// Per-request ordered, resumable message stream.
///
/// Each request owns a mailbox with dense sequence numbers starting at 1.
/// Subscribers receive the retained backlog past their `since_seq`, then
/// live messages; acknowledged messages are pruned and never redelivered.
#[derive(Clone)]
pub struct ProgressBus {
    mailboxes: Arc<RwLock<HashMap<RequestId, Mailbox>>>,
    config: ProgressBusConfig,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(ProgressBusConfig::default())
    }
}

impl ProgressBus {
    pub fn new(config: ProgressBusConfig) -> Self {
        Self {
            mailboxes: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Append a message to the request's stream and push it to live
    /// subscribers. Returns the assigned sequence number.
    pub async fn publish(&self, request_id: RequestId, kind: ProgressKind, payload: Value) -> u64 {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(request_id).or_insert_with(Mailbox::new);
        let seq = mailbox.append(kind, payload, self.config.idle_timeout);
        debug!(request_id = %request_id, seq, kind = %kind, "progress published");
        seq
    }

    /// Subscribe to a request's stream, replaying retained messages with
    /// seq > `since_seq` before any live traffic. A synthetic
    /// `connection_established` message with seq 0 is delivered first.
    ///
    /// Resubscribing with the last acknowledged seq after a transient drop
    /// yields exactly the missed messages, in order.
    pub async fn subscribe(
        &self,
        request_id: RequestId,
        since_seq: u64,
    ) -> mpsc::Receiver<ProgressMessage> {
        let mut mailboxes = self.mailboxes.write().await;
        let mailbox = mailboxes.entry(request_id).or_insert_with(Mailbox::new);

        let backlog: Vec<ProgressMessage> = mailbox
            .buffer
            .iter()
            .filter(|m| m.seq > since_seq)
            .cloned()
            .collect();

        let capacity = backlog.len() + self.config.subscriber_buffer + 1;
        let (tx, rx) = mpsc::channel(capacity);

        let hello = ProgressMessage::new(
            0,
            ProgressKind::ConnectionEstablished,
            serde_json::json!({ "request_id": request_id, "since_seq": since_seq }),
        );
        let _ = tx.try_send(hello);
        for message in backlog {
            let _ = tx.try_send(message);
        }

        if mailbox.closed {
            // Stream is complete; the receiver ends after the replay.
            debug!(request_id = %request_id, since_seq, "subscribe to closed stream, replay only");
        } else {
            mailbox.subscribers.push(Subscriber {
                tx,
                last_sent: Instant::now(),
            });
            debug!(
                request_id = %request_id,
                since_seq,
                subscribers = mailbox.subscribers.len(),
                "subscriber attached"
            );
        }

        rx
    }

    /// Confirm receipt up to `seq`; messages at or below it may be pruned
    /// and are never redelivered.
    pub async fn acknowledge(&self, request_id: RequestId, seq: u64) {
        let mut mailboxes = self.mailboxes.write().await;
        if let Some(mailbox) = mailboxes.get_mut(&request_id) {
            if seq > mailbox.acked_seq {
                mailbox.acked_seq = seq;
                mailbox.prune_acked();
            }
        }
    }

    /// Refresh subscriber liveness for a request (heartbeat response).
    pub async fn touch(&self, request_id: RequestId) {
        let mut mailboxes = self.mailboxes.write().await;
        if let Some(mailbox) = mailboxes.get_mut(&request_id) {
            let now = Instant::now();
            for sub in &mut mailbox.subscribers {
                sub.last_sent = now;
            }
        }
    }

    /// Highest sequence number assigned so far (0 when none).
    pub async fn last_seq(&self, request_id: RequestId) -> u64 {
        let mailboxes = self.mailboxes.read().await;
        mailboxes
            .get(&request_id)
            .map(|m| m.next_seq - 1)
            .unwrap_or(0)
    }

    /// Drop a request's mailbox entirely (cascade delete).
    pub async fn retire(&self, request_id: RequestId) {
        let mut mailboxes = self.mailboxes.write().await;
        if mailboxes.remove(&request_id).is_some() {
            info!(request_id = %request_id, "progress mailbox retired");
        }
    }

    /// Spawn the background housekeeper: heartbeats on streams with live
    /// subscribers, idle-subscriber closing, and TTL pruning.
    pub fn start_housekeeper(&self) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(bus.config.heartbeat_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                bus.housekeeping_pass().await;
            }
        })
    }

    async fn housekeeping_pass(&self) {
        let mut mailboxes = self.mailboxes.write().await;
        let now = Instant::now();
        for (request_id, mailbox) in mailboxes.iter_mut() {
            let expired = mailbox.prune_expired(self.config.message_ttl);
            if expired > 0 {
                warn!(request_id = %request_id, expired, "dropped unacked messages past TTL");
            }

            mailbox
                .subscribers
                .retain(|sub| now.duration_since(sub.last_sent) < self.config.idle_timeout);

            if !mailbox.closed && !mailbox.subscribers.is_empty() {
                mailbox.append(
                    ProgressKind::Heartbeat,
                    serde_json::json!({ "ts": Utc::now().to_rfc3339() }),
                    self.config.idle_timeout,
                );
            }
        }
        mailboxes.retain(|_, mailbox| {
            !(mailbox.closed && mailbox.subscribers.is_empty() && mailbox.buffer.is_empty())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bus() -> ProgressBus {
        ProgressBus::new(ProgressBusConfig {
            heartbeat_interval: Duration::from_millis(20),
            idle_timeout: Duration::from_millis(200),
            message_ttl: Duration::from_secs(3600),
            subscriber_buffer: 16,
        })
    }

    #[tokio::test]
    async fn sequence_numbers_are_dense_from_one() {
        let bus = test_bus();
        let id = RequestId::new();
        for expected in 1..=5u64 {
            let seq = bus
                .publish(id, ProgressKind::ExecutionProgress, serde_json::json!({}))
                .await;
            assert_eq!(seq, expected);
        }
        assert_eq!(bus.last_seq(id).await, 5);
    }

    #[tokio::test]
    async fn live_subscriber_receives_in_order() {
        let bus = test_bus();
        let id = RequestId::new();
        let mut rx = bus.subscribe(id, 0).await;

        let hello = rx.recv().await.unwrap();
        assert_eq!(hello.seq, 0);
        assert_eq!(hello.kind, ProgressKind::ConnectionEstablished);

        bus.publish(id, ProgressKind::AnalysisStarted, serde_json::json!({}))
            .await;
        bus.publish(id, ProgressKind::AnalysisComplete, serde_json::json!({}))
            .await;

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn replay_resumes_from_last_acked() {
        let bus = test_bus();
        let id = RequestId::new();
        for _ in 0..5 {
            bus.publish(id, ProgressKind::ExecutionProgress, serde_json::json!({}))
                .await;
        }

        // Consumer saw 1..=2, then dropped. Resume from 2.
        let mut rx = bus.subscribe(id, 2).await;
        assert_eq!(rx.recv().await.unwrap().seq, 0); // connection_established
        let replayed: Vec<u64> = vec![
            rx.recv().await.unwrap().seq,
            rx.recv().await.unwrap().seq,
            rx.recv().await.unwrap().seq,
        ];
        assert_eq!(replayed, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn acked_messages_are_pruned_and_never_redelivered() {
        let bus = test_bus();
        let id = RequestId::new();
        for _ in 0..4 {
            bus.publish(id, ProgressKind::ExecutionProgress, serde_json::json!({}))
                .await;
        }
        bus.acknowledge(id, 3).await;

        let mut rx = bus.subscribe(id, 0).await;
        assert_eq!(rx.recv().await.unwrap().seq, 0);
        // Only seq 4 survives the prune even though we asked from 0.
        assert_eq!(rx.recv().await.unwrap().seq, 4);
    }

    #[tokio::test]
    async fn terminal_kind_ends_the_stream() {
        let bus = test_bus();
        let id = RequestId::new();
        bus.publish(id, ProgressKind::SynthesisStarted, serde_json::json!({}))
            .await;
        bus.publish(id, ProgressKind::FinalResponse, serde_json::json!({}))
            .await;

        let mut rx = bus.subscribe(id, 0).await;
        assert_eq!(rx.recv().await.unwrap().seq, 0);
        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 2);
        // Closed stream: replay only, channel ends.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn heartbeats_flow_to_live_subscribers() {
        let bus = test_bus();
        let id = RequestId::new();
        let mut rx = bus.subscribe(id, 0).await;
        assert_eq!(rx.recv().await.unwrap().seq, 0);

        let _housekeeper = bus.start_housekeeper();
        let beat = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("heartbeat within deadline")
            .expect("channel open");
        assert_eq!(beat.kind, ProgressKind::Heartbeat);
        assert_eq!(beat.seq, 1);
    }

    #[tokio::test]
    async fn retire_drops_the_mailbox() {
        let bus = test_bus();
        let id = RequestId::new();
        bus.publish(id, ProgressKind::AnalysisStarted, serde_json::json!({}))
            .await;
        bus.retire(id).await;
        assert_eq!(bus.last_seq(id).await, 0);
    }
}
