use super::TopicManager;
use crate::broker::Broker;
use crate::config::KafkaConfig;
use crate::message::EncodedMessage;
use crate::position::TopicOffsets;
use crate::{Error, Result};
use futures::future::join_all;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::ClientConfig;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};

/// Sends batches to a single partition of each topic.
///
/// Idempotence is enabled so librdkafka retries cannot reorder or duplicate
/// records inside a partition; offsets reported back are therefore dense and
/// follow publish order.
pub struct KafkaBroker {
    producer: FutureProducer,
    partition: i32,
    timeout: Duration,
    topic_manager: Option<Mutex<TopicManager>>,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("compression.type", &config.compression)
            .set("acks", &config.acks)
            .set("linger.ms", config.linger_ms.to_string())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .create()
            .map_err(Error::Kafka)?;

        let topic_manager = if config.auto_create_topics {
            Some(Mutex::new(TopicManager::new(
                &config.brokers,
                config.topic_partitions,
                config.replication_factor,
            )?))
        } else {
            None
        };

        Ok(Self {
            producer,
            partition: config.partition,
            timeout: Duration::from_millis(config.message_timeout_ms),
            topic_manager,
        })
    }

    async fn ensure_topics(&self, batch: &[EncodedMessage]) -> Result<()> {
        let Some(manager) = &self.topic_manager else {
            return Ok(());
        };

        let topics: BTreeSet<&str> = batch.iter().map(|m| m.topic.as_str()).collect();
        let mut manager = manager.lock().await;
        for topic in topics {
            manager.ensure_topic_exists(topic).await?;
        }
        Ok(())
    }
}

impl Broker for KafkaBroker {
    #[instrument(skip_all, fields(count = batch.len()))]
    async fn send(&self, batch: &[EncodedMessage]) -> Result<TopicOffsets> {
        self.ensure_topics(batch).await?;

        // Enqueue everything first so records reach librdkafka in batch order
        let mut deliveries = Vec::with_capacity(batch.len());
        for message in batch {
            let mut record = FutureRecord::<str, [u8]>::to(&message.topic)
                .partition(self.partition)
                .payload(message.payload.as_ref())
                .timestamp(message.timestamp.timestamp_millis());
            if let Some(key) = &message.key {
                record = record.key(key.as_str());
            }

            let delivery = self.producer.send_result(record).map_err(|(e, _)| {
                error!(topic = %message.topic, sequence = message.sequence, "Failed to enqueue message: {}", e);
                Error::Publish {
                    message: format!("failed to enqueue message {}: {}", message.sequence, e),
                }
            })?;
            deliveries.push((message, delivery));
        }

        let (messages, futures): (Vec<_>, Vec<_>) = deliveries.into_iter().unzip();
        let reports = join_all(futures).await;

        let mut ack = TopicOffsets::new();
        for (message, report) in messages.into_iter().zip(reports) {
            match report {
                Ok(Ok((_partition, offset))) => {
                    let next = ack.entry(message.topic.clone()).or_insert(offset + 1);
                    *next = (*next).max(offset + 1);
                }
                Ok(Err((e, _))) => {
                    return Err(Error::Publish {
                        message: format!("delivery of message {} failed: {}", message.sequence, e),
                    });
                }
                Err(_) => {
                    return Err(Error::Publish {
                        message: format!("delivery of message {} was cancelled", message.sequence),
                    });
                }
            }
        }

        debug!(topics = ack.len(), "Batch acknowledged by Kafka");
        Ok(ack)
    }

    async fn latest_offsets(&self, topics: &[String]) -> Result<TopicOffsets> {
        let producer = self.producer.clone();
        let partition = self.partition;
        let timeout = self.timeout;
        let topics = topics.to_vec();

        // fetch_watermarks blocks on a metadata round trip
        tokio::task::spawn_blocking(move || {
            topics
                .into_iter()
                .map(|topic| {
                    let (_low, high) = producer
                        .client()
                        .fetch_watermarks(&topic, partition, timeout)
                        .map_err(Error::Kafka)?;
                    Ok((topic, high))
                })
                .collect::<Result<TopicOffsets>>()
        })
        .await
        .map_err(|e| Error::Publish {
            message: format!("watermark lookup task failed: {e}"),
        })?
    }
}
