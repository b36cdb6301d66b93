use super::encode_one;
use crate::buffer::MessageBuffer;
use crate::encoding::MessageEncoder;
use crate::message::Message;
use crate::Result;
use std::sync::Arc;

/// Encodes each message on the caller's task as it is published.
pub struct InlineStrategy {
    encoder: Arc<dyn MessageEncoder>,
}

impl InlineStrategy {
    pub fn new(encoder: Arc<dyn MessageEncoder>) -> Self {
        Self { encoder }
    }

    /// A failed encode is returned straight away and nothing is buffered.
    pub fn submit(&self, sequence: u64, message: Message, buffer: &mut MessageBuffer) -> Result<()> {
        let encoded = encode_one(self.encoder.as_ref(), &message, sequence)?;
        buffer.push(encoded);
        Ok(())
    }
}
