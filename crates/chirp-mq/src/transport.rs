//! In-process topic broker with at-least-once delivery semantics.

use crate::error::{HandlerError, TransportError};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Transport tunables.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Maximum serialized payload size accepted by `publish`.
    pub max_payload_bytes: usize,
    /// Delivery attempts before a message is dead-lettered (first delivery
    /// counts as attempt 1).
    pub max_delivery_attempts: u32,
    /// Delay before a nacked message is redelivered.
    pub redelivery_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 4 * 1024 * 1024,
            max_delivery_attempts: 5,
            redelivery_delay: Duration::from_secs(2),
        }
    }
}

/// One message as handed to a consumer handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The topic the message was consumed from.
    pub topic: String,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
    /// Optional partition/ordering key set by the producer.
    pub key: Option<String>,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
}

/// A message that exhausted its delivery attempts.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The topic the message was consumed from.
    pub topic: String,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
    /// Number of attempts made before giving up.
    pub attempts: u32,
}

struct QueuedMessage {
    payload: Vec<u8>,
    key: Option<String>,
    attempt: u32,
}

struct TopicQueue {
    tx: mpsc::UnboundedSender<QueuedMessage>,
    /// Held until a consumer group claims the topic.
    rx: Option<mpsc::UnboundedReceiver<QueuedMessage>>,
    subscribed: bool,
}

impl TopicQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            subscribed: false,
        }
    }
}

/// The topic-based message transport.
///
/// Cheap to clone; one instance is shared by the pipeline and the report
/// scheduler. Topics are auto-created on first publish or subscribe. At
/// most one consumer group may be registered per topic.
#[derive(Clone)]
pub struct Transport {
    config: TransportConfig,
    topics: Arc<Mutex<HashMap<String, TopicQueue>>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    consumers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Transport {
    /// Creates a transport with the given tunables.
    pub fn new(config: TransportConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            topics: Arc::new(Mutex::new(HashMap::new())),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            consumers: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Whether `shutdown` has begun.
    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Serializes `payload` and enqueues it on `topic`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` once shutdown has begun,
    /// `PayloadTooLarge` when the serialized form exceeds the configured
    /// limit, or `Serialize` when the payload cannot be encoded.
    pub async fn publish<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
    ) -> Result<(), TransportError> {
        self.publish_keyed(topic, None, payload).await
    }

    /// Like [`Transport::publish`], with a partition/ordering key attached.
    ///
    /// The key is delivered alongside the payload; consumers that need
    /// per-key ordering affinity (e.g. one user's report events) read it
    /// from the [`Delivery`].
    pub async fn publish_keyed<T: Serialize>(
        &self,
        topic: &str,
        key: Option<String>,
        payload: &T,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let bytes = serde_json::to_vec(payload)?;
        if bytes.len() > self.config.max_payload_bytes {
            return Err(TransportError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.config.max_payload_bytes,
            });
        }

        self.enqueue(
            topic,
            QueuedMessage {
                payload: bytes,
                key,
                attempt: 1,
            },
        );
        Ok(())
    }

    fn enqueue(&self, topic: &str, msg: QueuedMessage) {
        let mut topics = self.topics.lock().expect("topics lock poisoned");
        let queue = topics
            .entry(topic.to_string())
            .or_insert_with(TopicQueue::new);
        // The receiver half only drops after shutdown; a failed send at that
        // point is a message the process was never going to handle anyway.
        if queue.tx.send(msg).is_err() {
            tracing::debug!(topic, "dropping message enqueued after consumer stopped");
        }
    }

    /// Registers the consumer group for `topic`.
    ///
    /// Delivered messages are dispatched to `handler`, at most
    /// `worker_count` concurrently. The pool caps in-flight handler
    /// executions only, not queue depth; unprocessed messages accumulate in
    /// the broker's buffer. A handler `Ok` acks the message; an `Err` nacks
    /// it and the broker schedules a delayed redelivery, dead-lettering
    /// after the configured maximum attempt count.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` after shutdown has begun, or
    /// `AlreadySubscribed` if the topic already has a consumer group.
    pub fn subscribe<F, Fut>(
        &self,
        topic: &str,
        worker_count: usize,
        handler: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let rx = {
            let mut topics = self.topics.lock().expect("topics lock poisoned");
            let queue = topics
                .entry(topic.to_string())
                .or_insert_with(TopicQueue::new);
            if queue.subscribed {
                return Err(TransportError::AlreadySubscribed(topic.to_string()));
            }
            queue.subscribed = true;
            queue.rx.take().expect("unsubscribed topic retains receiver")
        };

        let task = tokio::spawn(Self::consume_loop(
            self.clone(),
            topic.to_string(),
            rx,
            worker_count,
            Arc::new(handler),
        ));
        self.consumers
            .lock()
            .expect("consumers lock poisoned")
            .push(task);
        Ok(())
    }

    async fn consume_loop<F, Fut>(
        transport: Transport,
        topic: String,
        mut rx: mpsc::UnboundedReceiver<QueuedMessage>,
        worker_count: usize,
        handler: Arc<F>,
    ) where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(worker_count));
        let mut shutdown_rx = transport.shutdown_tx.subscribe();
        let mut in_flight = JoinSet::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Reap finished handlers opportunistically so the JoinSet does
            // not grow without bound on a long-lived subscription.
            while in_flight.try_join_next().is_some() {}

            let msg = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => continue,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            // Admission control: wait for a worker slot before dispatching.
            // A message pulled but not yet dispatched when shutdown arrives
            // is abandoned here, equivalent to never having been consumed.
            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.expect("stage semaphore is never closed")
                }
            };

            let transport = transport.clone();
            let handler = Arc::clone(&handler);
            let topic = topic.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                let delivery = Delivery {
                    topic: topic.clone(),
                    payload: msg.payload.clone(),
                    key: msg.key.clone(),
                    attempt: msg.attempt,
                };
                if let Err(e) = handler(delivery).await {
                    transport.handle_nack(&topic, msg, &e);
                }
            });
        }

        // Drain: every in-flight handler finishes its current message
        // before the consumer loop ends.
        while in_flight.join_next().await.is_some() {}
    }

    fn handle_nack(&self, topic: &str, msg: QueuedMessage, cause: &HandlerError) {
        if msg.attempt >= self.config.max_delivery_attempts {
            tracing::error!(
                topic,
                attempts = msg.attempt,
                %cause,
                "message exhausted delivery attempts, dead-lettering"
            );
            self.dead_letters
                .lock()
                .expect("dead letter lock poisoned")
                .push(DeadLetter {
                    topic: topic.to_string(),
                    payload: msg.payload,
                    attempts: msg.attempt,
                });
            return;
        }

        tracing::warn!(
            topic,
            attempt = msg.attempt,
            %cause,
            "handler failed, scheduling redelivery"
        );

        let transport = self.clone();
        let topic = topic.to_string();
        let delay = self.config.redelivery_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            transport.enqueue(
                &topic,
                QueuedMessage {
                    payload: msg.payload,
                    key: msg.key,
                    attempt: msg.attempt + 1,
                },
            );
        });
    }

    /// Messages that exhausted their delivery attempts since startup.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .expect("dead letter lock poisoned")
            .clone()
    }

    /// Shuts the transport down in order: new publishes are rejected first,
    /// then every consumer group stops pulling, then the call blocks until
    /// all in-flight handler invocations have drained.
    ///
    /// Idempotent; concurrent calls all return once the drain completes.
    pub async fn shutdown(&self) {
        // Flipping the flag both rejects new publishes and signals every
        // consumer loop through the watch channel.
        self.shutdown_tx.send_replace(true);

        let consumers: Vec<JoinHandle<()>> = {
            let mut guard = self.consumers.lock().expect("consumers lock poisoned");
            guard.drain(..).collect()
        };
        for task in consumers {
            if let Err(e) = task.await {
                tracing::error!("consumer loop join error during shutdown: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn test_config() -> TransportConfig {
        TransportConfig {
            max_payload_bytes: 1024,
            max_delivery_attempts: 3,
            redelivery_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn publish_before_subscribe_is_buffered() {
        let transport = Transport::new(test_config());
        transport
            .publish("t", &"early".to_string())
            .await
            .expect("publish should succeed");

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport
            .subscribe("t", 1, move |d: Delivery| {
                let tx = tx.clone();
                async move {
                    let text: String =
                        serde_json::from_slice(&d.payload).map_err(HandlerError::new)?;
                    tx.send(text).expect("test channel open");
                    Ok(())
                }
            })
            .expect("subscribe should succeed");

        let got = rx.recv().await.expect("message should be delivered");
        assert_eq!(got, "early");
        transport.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn nacked_message_is_redelivered_with_incremented_attempt() {
        let transport = Transport::new(test_config());
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let seen = Arc::clone(&attempts);
        transport
            .subscribe("t", 1, move |d: Delivery| {
                let seen = Arc::clone(&seen);
                let done_tx = done_tx.clone();
                async move {
                    seen.lock().expect("test lock").push(d.attempt);
                    if d.attempt < 2 {
                        Err(HandlerError::new("transient"))
                    } else {
                        done_tx.send(()).expect("test channel open");
                        Ok(())
                    }
                }
            })
            .expect("subscribe should succeed");

        transport
            .publish("t", &1u32)
            .await
            .expect("publish should succeed");

        done_rx.recv().await.expect("second attempt should succeed");
        assert_eq!(*attempts.lock().expect("test lock"), vec![1, 2]);
        transport.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn message_dead_letters_after_max_attempts() {
        let transport = Transport::new(test_config());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        transport
            .subscribe("t", 1, move |_d: Delivery| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::new("permanent"))
                }
            })
            .expect("subscribe should succeed");

        transport
            .publish("t", &1u32)
            .await
            .expect("publish should succeed");

        // Three attempts at 50ms redelivery spacing; paused time advances
        // automatically while every task is idle.
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3, "exactly max attempts");
        let dead = transport.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].topic, "t");
        assert_eq!(dead[0].attempts, 3);
        transport.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn worker_count_caps_concurrent_handlers() {
        let transport = Transport::new(test_config());
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let current_c = Arc::clone(&current);
        let peak_c = Arc::clone(&peak);
        transport
            .subscribe("t", 2, move |_d: Delivery| {
                let current = Arc::clone(&current_c);
                let peak = Arc::clone(&peak_c);
                let done_tx = done_tx.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    done_tx.send(()).expect("test channel open");
                    Ok(())
                }
            })
            .expect("subscribe should succeed");

        for i in 0..8u32 {
            transport
                .publish("t", &i)
                .await
                .expect("publish should succeed");
        }
        for _ in 0..8 {
            done_rx.recv().await.expect("handler should complete");
        }

        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "no more than worker_count handlers may run at once"
        );
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let transport = Transport::new(test_config());
        let big = vec![0u8; 2048];
        let err = transport
            .publish("t", &big)
            .await
            .expect_err("oversized payload should fail");
        assert!(matches!(err, TransportError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn second_subscribe_on_same_topic_fails() {
        let transport = Transport::new(test_config());
        transport
            .subscribe("t", 1, |_d: Delivery| async { Ok(()) })
            .expect("first subscribe should succeed");
        let err = transport
            .subscribe("t", 1, |_d: Delivery| async { Ok(()) })
            .expect_err("second subscribe should fail");
        assert!(matches!(err, TransportError::AlreadySubscribed(t) if t == "t"));
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_rejected() {
        let transport = Transport::new(test_config());
        transport.shutdown().await;
        let err = transport
            .publish("t", &1u32)
            .await
            .expect_err("publish after shutdown should fail");
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_handler() {
        let transport = Transport::new(test_config());
        let finished = Arc::new(AtomicU32::new(0));
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        let finished_c = Arc::clone(&finished);
        transport
            .subscribe("t", 1, move |_d: Delivery| {
                let finished = Arc::clone(&finished_c);
                let started_tx = started_tx.clone();
                async move {
                    started_tx.send(()).expect("test channel open");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .expect("subscribe should succeed");

        transport
            .publish("t", &1u32)
            .await
            .expect("publish should succeed");
        started_rx.recv().await.expect("handler should start");

        transport.shutdown().await;
        assert_eq!(
            finished.load(Ordering::SeqCst),
            1,
            "shutdown must not return before the in-flight handler finishes"
        );
    }
}
