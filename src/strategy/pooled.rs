use super::{encode_one, reorder::ReorderBuffer};
use crate::buffer::MessageBuffer;
use crate::encoding::MessageEncoder;
use crate::message::{EncodedMessage, Message};
use crate::{Error, Result};
use flume::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, error, warn};

struct EncodeJob {
    sequence: u64,
    message: Message,
}

struct EncodeResult {
    sequence: u64,
    result: Result<EncodedMessage>,
}

/// Encodes messages on a fixed pool of worker threads.
///
/// Jobs go out over a bounded queue, so `submit` waits when every worker is
/// busy and the queue is full. Results come back in completion order and
/// are merged into the buffer through a [`ReorderBuffer`], which is only
/// touched by the owner of the strategy.
pub struct PooledStrategy {
    dispatch: Option<Sender<EncodeJob>>,
    /// Receiving side of the dispatch queue, kept to discard queued jobs
    /// when the pool is abandoned.
    queued: Receiver<EncodeJob>,
    completed: Receiver<EncodeResult>,
    workers: Vec<JoinHandle<()>>,
    reorder: ReorderBuffer,
    outstanding: usize,
}

impl PooledStrategy {
    pub fn start(
        encoder: Arc<dyn MessageEncoder>,
        num_workers: usize,
        queue_capacity: usize,
        first_sequence: u64,
    ) -> Result<Self> {
        let (dispatch, inbox) = flume::bounded(queue_capacity);
        let (outbox, completed) = flume::unbounded();

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let encoder = Arc::clone(&encoder);
            let inbox = inbox.clone();
            let outbox = outbox.clone();

            let spawned = thread::Builder::new()
                .name(format!("pipeline-encoder-{id}"))
                .spawn(move || run_worker(encoder.as_ref(), inbox, outbox));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!(worker = id, "Failed to spawn encoder worker: {}", e);
                    // Workers already running exit once the dispatch side is gone
                    drop(dispatch);
                    join_all(workers);
                    return Err(Error::Initialization {
                        message: format!("failed to spawn encoder worker {id}: {e}"),
                    });
                }
            }
        }

        debug!(workers = num_workers, queue_capacity, "Encoder pool started");

        Ok(Self {
            dispatch: Some(dispatch),
            queued: inbox,
            completed,
            workers,
            reorder: ReorderBuffer::new(first_sequence),
            outstanding: 0,
        })
    }

    /// Queues `message` for encoding, waiting while the dispatch queue is
    /// full, then merges whatever results are already back.
    ///
    /// The message is accepted even when this returns an error: the error
    /// is a serialization failure of an earlier message that has reached
    /// the head of the publish order.
    pub async fn submit(
        &mut self,
        sequence: u64,
        message: Message,
        buffer: &mut MessageBuffer,
    ) -> Result<()> {
        let dispatch = self.dispatch.as_ref().ok_or(Error::Closed)?;
        dispatch
            .send_async(EncodeJob { sequence, message })
            .await
            .map_err(|_| Error::Closed)?;
        self.outstanding += 1;

        self.collect_ready(buffer)
    }

    /// Merges results that have already arrived, without waiting, up to
    /// the first failure. A failure is reported once and its sequence is
    /// released, so the next call carries on with the messages after it.
    pub fn collect_ready(&mut self, buffer: &mut MessageBuffer) -> Result<()> {
        while let Ok(done) = self.completed.try_recv() {
            self.receive(done);
        }
        self.merge(buffer)
    }

    /// Waits for every dispatched job, then merges in order up to the first
    /// failure.
    pub async fn drain(&mut self, buffer: &mut MessageBuffer) -> Result<()> {
        while self.outstanding > 0 {
            let done = self
                .completed
                .recv_async()
                .await
                .map_err(|_| Error::Initialization {
                    message: format!(
                        "encoder workers exited with {} messages in flight",
                        self.outstanding
                    ),
                })?;
            self.receive(done);
        }
        self.merge(buffer)
    }

    /// Messages dispatched but not yet merged into the buffer.
    pub fn pending(&self) -> usize {
        self.outstanding + self.reorder.len()
    }

    /// Stops accepting work and joins the worker threads once they have
    /// finished what was already queued.
    pub fn shutdown(&mut self) {
        if self.dispatch.take().is_none() {
            return;
        }
        let workers = std::mem::take(&mut self.workers);
        let count = workers.len();
        join_all(workers);
        debug!(workers = count, "Encoder pool stopped");
    }

    /// Discards queued jobs, then shuts down. Workers only finish the job
    /// they are running.
    pub fn abort(&mut self) {
        let discarded = self.queued.drain().count();
        if discarded > 0 {
            warn!(discarded, "Discarding queued encode jobs");
        }
        self.outstanding = self.outstanding.saturating_sub(discarded);
        self.shutdown();
    }

    fn receive(&mut self, done: EncodeResult) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.reorder.insert(done.sequence, done.result);
    }

    fn merge(&mut self, buffer: &mut MessageBuffer) -> Result<()> {
        loop {
            match self.reorder.next_ready() {
                Some(Ok(encoded)) => buffer.push(encoded),
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }
}

impl Drop for PooledStrategy {
    fn drop(&mut self) {
        self.abort();
    }
}

fn run_worker(encoder: &dyn MessageEncoder, inbox: Receiver<EncodeJob>, outbox: Sender<EncodeResult>) {
    while let Ok(job) = inbox.recv() {
        let sequence = job.sequence;
        let result = catch_unwind(AssertUnwindSafe(|| encode_one(encoder, &job.message, sequence)))
            .unwrap_or_else(|_| {
                Err(Error::Serialization {
                    sequence,
                    message: "encoder panicked".to_string(),
                })
            });

        if outbox.send(EncodeResult { sequence, result }).is_err() {
            // Strategy dropped; nobody is waiting for results anymore
            break;
        }
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    let join = move || {
        for handle in workers {
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                warn!(worker = ?name, "Encoder worker panicked");
            }
        }
    };

    // Joining blocks; let a multi-threaded runtime move its other tasks away
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(join)
        }
        _ => join(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{JsonSerializer, SerializationFormat};
    use serde_json::json;

    fn sequenced(buffer: &MessageBuffer) -> Vec<u64> {
        buffer.messages().iter().map(|m| m.sequence).collect()
    }

    #[tokio::test]
    async fn test_pool_preserves_order() {
        let encoder: Arc<dyn MessageEncoder> =
            Arc::new(JsonSerializer::new(SerializationFormat::JsonCompact));
        let mut pool = PooledStrategy::start(encoder, 4, 8, 1).unwrap();
        let mut buffer = MessageBuffer::new();

        for sequence in 1..=100 {
            let message = Message::json("events", json!({ "n": sequence }));
            pool.submit(sequence, message, &mut buffer).await.unwrap();
        }
        pool.drain(&mut buffer).await.unwrap();

        assert_eq!(sequenced(&buffer), (1..=100).collect::<Vec<_>>());
        assert_eq!(pool.pending(), 0);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_closed() {
        let encoder: Arc<dyn MessageEncoder> = Arc::new(JsonSerializer::default());
        let mut pool = PooledStrategy::start(encoder, 1, 1, 1).unwrap();
        let mut buffer = MessageBuffer::new();

        pool.shutdown();
        let result = pool
            .submit(1, Message::json("events", json!({})), &mut buffer)
            .await;
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_panicking_encoder_reports_sequence() {
        struct Panics;
        impl MessageEncoder for Panics {
            fn encode(&self, _message: &Message) -> Result<EncodedMessage> {
                panic!("encoder bug");
            }
        }

        let mut pool = PooledStrategy::start(Arc::new(Panics), 2, 4, 1).unwrap();
        let mut buffer = MessageBuffer::new();
        pool.submit(1, Message::json("events", json!({})), &mut buffer)
            .await
            .unwrap();

        match pool.drain(&mut buffer).await {
            Err(Error::Serialization { sequence, .. }) => assert_eq!(sequence, 1),
            other => panic!("expected serialization error, got {other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_abort_discards_queued_jobs() {
        struct Slow;
        impl MessageEncoder for Slow {
            fn encode(&self, message: &Message) -> Result<EncodedMessage> {
                std::thread::sleep(std::time::Duration::from_millis(50));
                JsonSerializer::default().encode(message)
            }
        }

        let mut pool = PooledStrategy::start(Arc::new(Slow), 1, 16, 1).unwrap();
        let mut buffer = MessageBuffer::new();
        for sequence in 1..=10 {
            let message = Message::json("events", json!({ "n": sequence }));
            pool.submit(sequence, message, &mut buffer).await.unwrap();
        }

        let started = std::time::Instant::now();
        pool.abort();
        // Only the job already running is finished, not all ten
        assert!(started.elapsed() < std::time::Duration::from_millis(250));

        let result = pool
            .submit(11, Message::json("events", json!({})), &mut buffer)
            .await;
        assert!(matches!(result, Err(Error::Closed)));
    }
}
