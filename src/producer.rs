//! The publishing facade.
//!
//! A [`Producer`] buffers messages handed to [`publish`](Producer::publish)
//! and sends them to its [`Broker`] in batches, once enough messages or
//! bytes have accumulated or the oldest buffered message has waited long
//! enough. Batches always reach the broker in publish order, even when
//! encoding runs on a worker pool.
//!
//! The producer has no timer of its own. When messages arrive slowly, call
//! [`wake`](Producer::wake) at least every ~250ms so the time threshold can
//! be enforced:
//!
//! ```rust,no_run
//! use futures::FutureExt;
//! use pipeline_producer::broker::MemoryBroker;
//! use pipeline_producer::config::ProducerConfig;
//! use pipeline_producer::{Message, Producer};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example(mut upstream: tokio::sync::mpsc::Receiver<serde_json::Value>) -> pipeline_producer::Result<()> {
//! let producer = Producer::new(ProducerConfig::default(), MemoryBroker::new());
//!
//! producer
//!     .scoped(|producer| {
//!         async move {
//!             loop {
//!                 match tokio::time::timeout(Duration::from_millis(100), upstream.recv()).await {
//!                     Ok(Some(value)) => producer.publish(Message::json("events", value)).await?,
//!                     Ok(None) => break,
//!                     Err(_) => producer.wake().await?,
//!                 }
//!             }
//!             Ok::<_, pipeline_producer::Error>(())
//!         }
//!         .boxed()
//!     })
//!     .await
//! # }
//! ```

use crate::broker::Broker;
use crate::buffer::{FlushReason, FlushThresholds, MessageBuffer};
use crate::config::ProducerConfig;
use crate::encoding::{JsonSerializer, MessageEncoder};
use crate::message::Message;
use crate::position::{PositionData, PositionTracker, TopicOffsets};
use crate::strategy::Strategy;
use crate::{Error, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Counters describing what a producer has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub messages_published: u64,
    pub batches_sent: u64,
    pub send_failures: u64,
    pub serialization_failures: u64,
}

pub struct Producer<B: Broker> {
    config: ProducerConfig,
    broker: B,
    encoder: Arc<dyn MessageEncoder>,
    thresholds: FlushThresholds,
    strategy: Option<Strategy>,
    buffer: MessageBuffer,
    tracker: PositionTracker,
    next_sequence: u64,
    /// Serialization failure found by a flush whose send then failed; it is
    /// reported by the next `wake`/`flush` instead.
    deferred_failure: Option<Error>,
    stats: PublishStats,
    closed: bool,
}

impl<B: Broker> Producer<B> {
    /// Creates a producer encoding payloads with a [`JsonSerializer`] built
    /// from the configured format and key strategy.
    pub fn new(config: ProducerConfig, broker: B) -> Self {
        let encoder =
            JsonSerializer::new(config.format).with_key_strategy(config.key_strategy.clone());
        Self::with_encoder(config, broker, encoder)
    }

    pub fn with_encoder(config: ProducerConfig, broker: B, encoder: impl MessageEncoder) -> Self {
        Self {
            thresholds: FlushThresholds::from_config(&config),
            config,
            broker,
            encoder: Arc::new(encoder),
            strategy: None,
            buffer: MessageBuffer::new(),
            tracker: PositionTracker::default(),
            next_sequence: 1,
            deferred_failure: None,
            stats: PublishStats::default(),
            closed: false,
        }
    }

    /// Seeds the checkpoint position data, typically from a checkpoint saved
    /// by a previous run.
    pub fn with_position_data(mut self, position_data: PositionData) -> Self {
        self.tracker = PositionTracker::new(position_data);
        self
    }

    /// Starts the serialization strategy and runs one [`wake`](Self::wake).
    ///
    /// Starting is otherwise deferred to the first `publish`; opening
    /// explicitly surfaces pool start-up failures before any message is
    /// accepted.
    #[instrument(skip(self), fields(producer = %self.config.name))]
    pub async fn open(&mut self) -> Result<()> {
        self.ensure_started()?;
        self.wake().await
    }

    /// Buffers `message` for publishing.
    ///
    /// Returning `Ok` does not mean the message reached the broker; only a
    /// successful [`flush`](Self::flush) or [`close`](Self::close) does.
    /// With the worker pool enabled this waits while the dispatch queue is
    /// full, and may return the [`Error::Serialization`] of an earlier
    /// message once every message before that one has been merged. In that
    /// case `message` itself was still accepted, and the error's `sequence`
    /// names the message that was dropped.
    pub async fn publish(&mut self, mut message: Message) -> Result<()> {
        if message.topic.is_empty() {
            return Err(Error::InvalidMessage {
                message: "topic must not be empty".to_string(),
            });
        }
        self.ensure_started()?;

        let sequence = self.next_sequence;
        message.sequence = Some(sequence);

        let strategy = self.strategy.as_mut().ok_or(Error::Closed)?;
        let submitted = strategy.submit(sequence, message, &mut self.buffer).await;

        // A rejected dispatch never reached the strategy and must not leave
        // a gap in the sequence
        if !matches!(submitted, Err(Error::Closed)) {
            self.next_sequence += 1;
        }
        if let Err(e) = submitted {
            self.note_failure(&e);
            return Err(e);
        }

        self.maybe_flush().await
    }

    /// Gives the producer a chance to flush when no messages are being
    /// published.
    ///
    /// Reports a pending serialization failure if the next message in
    /// publish order failed to encode.
    pub async fn wake(&mut self) -> Result<()> {
        self.ensure_started()?;

        if let Some(failure) = self.deferred_failure.take() {
            return Err(failure);
        }

        let strategy = self.strategy.as_mut().ok_or(Error::Closed)?;
        if let Err(e) = strategy.collect_ready(&mut self.buffer) {
            self.note_failure(&e);
            return Err(e);
        }

        self.maybe_flush().await
    }

    /// Sends every published message to the broker and waits for the
    /// acknowledgment.
    ///
    /// Messages published before a failed one are sent first; the
    /// serialization failure is returned afterwards, and messages published
    /// after it stay queued for the next call. If the broker fails, buffered
    /// messages and position data are left as they were so the flush can be
    /// retried.
    #[instrument(skip(self), fields(producer = %self.config.name))]
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_started()?;

        let collected = match self.deferred_failure.take() {
            Some(failure) => Err(failure),
            None => {
                let strategy = self.strategy.as_mut().ok_or(Error::Closed)?;
                let drained = strategy.drain(&mut self.buffer).await;
                if let Err(e) = &drained {
                    self.note_failure(e);
                }
                drained
            }
        };

        if let Err(e) = self.send_buffered(FlushReason::Requested).await {
            if let Err(failure) = collected {
                self.deferred_failure = Some(failure);
            }
            return Err(e);
        }

        collected
    }

    /// Flushes, then stops the worker pool.
    ///
    /// If the flush fails the error is returned and the producer stays open
    /// with its buffer intact, so `close` can be called again. Closing an
    /// already closed producer does nothing.
    #[instrument(skip(self), fields(producer = %self.config.name))]
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        info!("Closing producer...");

        if self.strategy.is_some() {
            if let Err(e) = self.flush().await {
                error!("Failed to close the producer: {}", e);
                return Err(e);
            }
        }

        if let Some(mut strategy) = self.strategy.take() {
            strategy.shutdown();
        }
        self.closed = true;

        info!(
            messages_published = self.stats.messages_published,
            batches_sent = self.stats.batches_sent,
            "Producer closed"
        );
        Ok(())
    }

    /// Opens the producer, runs `body`, and closes the producer on every
    /// exit path.
    ///
    /// An error from `body` is always the one returned; a close failure is
    /// only returned when `body` succeeded.
    ///
    /// Dropping the returned future before it completes skips `close`:
    /// buffered and in-flight messages are discarded with a warning and the
    /// checkpoint position data stays at the last acknowledged batch. Callers
    /// that may cancel (e.g. inside `tokio::select!`) should check for
    /// shutdown inside `body` instead, as the binary does with ctrl-c.
    pub async fn scoped<T, F>(mut self, body: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Producer<B>) -> BoxFuture<'a, Result<T>>,
    {
        let outcome = match self.open().await {
            Ok(()) => body(&mut self).await,
            Err(e) => Err(e),
        };
        let closed = self.close().await;

        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_error)) => Err(close_error),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_error)) => {
                // Already logged by close(); keep the original error
                debug!("Ignoring close failure in favour of the original error: {}", close_error);
                Err(e)
            }
        }
    }

    /// Makes sure `messages` are in the broker after an unclean shutdown.
    ///
    /// `messages` must be every message published since the checkpoint that
    /// produced `topic_offsets`, in their original publish order. Messages
    /// the broker already stored are skipped, the rest are republished, and
    /// the call returns once they are acknowledged.
    #[instrument(skip_all, fields(producer = %self.config.name, count = messages.len()))]
    pub async fn ensure_messages_published(
        &mut self,
        messages: Vec<Message>,
        topic_offsets: &TopicOffsets,
    ) -> Result<()> {
        if messages.iter().any(|m| m.topic.is_empty()) {
            return Err(Error::InvalidMessage {
                message: "topic must not be empty".to_string(),
            });
        }
        self.flush().await?;

        let mut totals: BTreeMap<String, i64> = BTreeMap::new();
        for message in &messages {
            *totals.entry(message.topic.clone()).or_default() += 1;
        }
        if totals.is_empty() {
            return Ok(());
        }

        let topics: Vec<String> = totals.keys().cloned().collect();
        let latest = self
            .broker
            .latest_offsets(&topics)
            .await
            .map_err(Error::into_publish)?;

        let mut to_skip = BTreeMap::new();
        let mut fully_skipped = TopicOffsets::new();
        for (topic, &total) in &totals {
            let recorded = topic_offsets.get(topic).copied().unwrap_or(0);
            let stored = latest.get(topic).copied().unwrap_or(0);
            let already_published = stored - recorded;
            if already_published < 0 || already_published > total {
                return Err(Error::Recovery {
                    message: format!(
                        "topic '{topic}' holds {already_published} messages past the checkpoint \
                         but {total} were replayed"
                    ),
                });
            }
            if already_published == total {
                fully_skipped.insert(topic.clone(), stored);
            }
            to_skip.insert(topic.clone(), already_published);
        }

        let mut skipped_position_info: BTreeMap<String, Value> = BTreeMap::new();
        let mut last_skipped_info = None;
        let mut replay = Vec::new();
        for message in messages {
            match to_skip.get_mut(&message.topic) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    if let Some(info) = &message.upstream_position_info {
                        skipped_position_info.insert(message.topic.clone(), info.clone());
                    }
                    last_skipped_info = message.upstream_position_info;
                }
                _ => replay.push(message),
            }
        }

        let skipped = totals.values().sum::<i64>() as usize - replay.len();
        info!(
            skipped,
            republishing = replay.len(),
            "Reconciling replayed messages with the broker"
        );

        let nothing_republished = replay.is_empty();
        for message in replay {
            self.publish(message).await?;
        }
        self.flush().await?;

        // Topics whose replayed messages were all already stored got no
        // acknowledgment, so fold their positions in from the broker
        if !fully_skipped.is_empty() {
            let mut snapshot = (*self.tracker.current()).clone();
            snapshot.merge_offsets(&fully_skipped);
            for topic in fully_skipped.keys() {
                if let Some(info) = skipped_position_info.remove(topic) {
                    snapshot.topic_to_last_position_info_map.insert(topic.clone(), info);
                }
            }
            if nothing_republished {
                snapshot.last_published_message_position_info = last_skipped_info;
            }
            self.tracker.advance(snapshot);
        }

        Ok(())
    }

    /// Latest checkpoint position data. Before the first acknowledged batch
    /// this is the initial (empty or seeded) snapshot.
    pub fn checkpoint_position_data(&self) -> Arc<PositionData> {
        self.tracker.current()
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    /// Encoded messages waiting in the buffer.
    pub fn buffered_messages(&self) -> usize {
        self.buffer.len()
    }

    /// Published messages that have not been acknowledged yet, including
    /// those still being encoded.
    pub fn pending_messages(&self) -> usize {
        self.buffer.len() + self.strategy.as_ref().map_or(0, Strategy::pending)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.strategy.is_some() {
            return Ok(());
        }

        self.config.validate()?;
        let strategy = Strategy::start(&self.config, Arc::clone(&self.encoder), self.next_sequence)
            .inspect_err(|e| error!("Failed to start serialization strategy: {}", e))?;

        info!(
            producer = %self.config.name,
            worker_pool = self.config.use_worker_pool,
            count_threshold = self.thresholds.count,
            byte_threshold = self.thresholds.bytes,
            time_threshold_ms = self.thresholds.max_age.as_millis() as u64,
            "Producer started"
        );
        self.strategy = Some(strategy);
        Ok(())
    }

    async fn maybe_flush(&mut self) -> Result<()> {
        match self.thresholds.due(&self.buffer, Instant::now()) {
            Some(reason) => self.send_buffered(reason).await,
            None => Ok(()),
        }
    }

    /// Sends the buffer as one batch and advances position data once the
    /// broker acknowledges it.
    async fn send_buffered(&mut self, reason: FlushReason) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let count = self.buffer.len();
        let bytes = self.buffer.byte_size();
        debug!(count, bytes, %reason, "Flushing buffered messages");

        let batch = self.buffer.messages();
        let ack = match self.broker.send(batch).await {
            Ok(ack) => ack,
            Err(e) => {
                self.stats.send_failures += 1;
                let e = e.into_publish();
                error!(count, %reason, "Failed to publish batch: {}", e);
                return Err(e);
            }
        };

        let snapshot = self.tracker.current().acknowledge(batch, &ack);
        self.tracker.advance(snapshot);
        self.buffer.clear();

        self.stats.messages_published += count as u64;
        self.stats.batches_sent += 1;
        info!(count, bytes, %reason, "Published batch");
        Ok(())
    }

    fn note_failure(&mut self, error: &Error) {
        if let Error::Serialization { sequence, message } = error {
            self.stats.serialization_failures += 1;
            warn!(sequence, "Failed to serialize message: {}", message);
        }
    }
}

impl<B: Broker> Drop for Producer<B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let unpublished = self.pending_messages();
        if unpublished > 0 {
            warn!(
                producer = %self.config.name,
                unpublished,
                "Producer dropped without being closed, buffered messages were not published"
            );
        }
        if let Some(mut strategy) = self.strategy.take() {
            strategy.abort();
        }
    }
}
