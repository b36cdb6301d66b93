pub mod key_strategy;
pub mod serializer;

pub use key_strategy::KeyStrategy;
pub use serializer::{JsonSerializer, MessageEncoder, SerializationFormat};
