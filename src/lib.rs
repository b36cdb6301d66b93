pub mod broker;
pub mod buffer;
pub mod checkpoint;
pub mod config;
pub mod encoding;
pub mod error;
pub mod message;
pub mod position;
pub mod producer;
pub mod strategy;

pub mod kafka;

pub use config::{Config, ProducerConfig};
pub use error::{Error, Result};
pub use message::{EncodedMessage, Message, Payload};
pub use position::{PositionData, TopicOffsets};
pub use producer::{Producer, PublishStats};
