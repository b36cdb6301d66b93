use crate::encoding::{KeyStrategy, SerializationFormat};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub producer: ProducerConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Buffering and serialization settings for a [`Producer`](crate::Producer).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Selects the pooled strategy instead of encoding inline.
    #[serde(default)]
    pub use_worker_pool: bool,
    /// Max buffered messages before a flush is forced.
    #[serde(default = "default_count_threshold")]
    pub count_threshold: usize,
    /// Max buffered encoded bytes before a flush is forced.
    #[serde(default = "default_byte_threshold")]
    pub byte_threshold: usize,
    /// Max time a message may sit in the buffer, enforced on `publish`/`wake`.
    #[serde(default = "default_time_threshold_ms")]
    pub time_threshold_ms: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    #[serde(default)]
    pub format: SerializationFormat,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    #[serde(default)]
    pub partition: i32,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default)]
    pub auto_create_topics: bool,
    #[serde(default = "default_topic_partitions")]
    pub topic_partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub interval_secs: u64,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("PIPELINE_PRODUCER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }
}

impl ProducerConfig {
    pub fn time_threshold(&self) -> Duration {
        Duration::from_millis(self.time_threshold_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.count_threshold == 0 {
            return Err(Error::Config("count_threshold must be at least 1".to_string()));
        }
        if self.byte_threshold == 0 {
            return Err(Error::Config("byte_threshold must be at least 1".to_string()));
        }
        if self.time_threshold_ms == 0 {
            return Err(Error::Config("time_threshold_ms must be at least 1".to_string()));
        }
        if self.use_worker_pool {
            if self.worker_pool_size == 0 {
                return Err(Error::Config("worker_pool_size must be at least 1".to_string()));
            }
            if self.dispatch_queue_capacity == 0 {
                return Err(Error::Config(
                    "dispatch_queue_capacity must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            use_worker_pool: false,
            count_threshold: default_count_threshold(),
            byte_threshold: default_byte_threshold(),
            time_threshold_ms: default_time_threshold_ms(),
            worker_pool_size: default_worker_pool_size(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            format: SerializationFormat::default(),
            key_strategy: KeyStrategy::default(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            file: None,
            interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

fn default_name() -> String {
    "pipeline-producer".to_string()
}

fn default_count_threshold() -> usize {
    5000
}

fn default_byte_threshold() -> usize {
    1_048_576 // 1MB
}

fn default_time_threshold_ms() -> u64 {
    100
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_dispatch_queue_capacity() -> usize {
    1024
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    5
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_topic_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i32 {
    1
}

fn default_checkpoint_interval_secs() -> u64 {
    10
}
