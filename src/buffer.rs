use crate::config::ProducerConfig;
use crate::message::EncodedMessage;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Encoded messages waiting to be sent, in publish order.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    messages: Vec<EncodedMessage>,
    bytes: usize,
    /// When the first message entered the buffer since it was last emptied.
    first_buffered_at: Option<Instant>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: EncodedMessage) {
        if self.first_buffered_at.is_none() {
            self.first_buffered_at = Some(Instant::now());
        }
        self.bytes += message.size();
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    /// How long the oldest buffered message has been waiting.
    pub fn age(&self, now: Instant) -> Duration {
        self.first_buffered_at
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    pub fn messages(&self) -> &[EncodedMessage] {
        &self.messages
    }

    /// Empties the buffer. Only called once the broker has acknowledged its
    /// content.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.bytes = 0;
        self.first_buffered_at = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Count,
    Bytes,
    Age,
    Requested,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FlushReason::Count => "count",
            FlushReason::Bytes => "bytes",
            FlushReason::Age => "age",
            FlushReason::Requested => "requested",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlushThresholds {
    pub count: usize,
    pub bytes: usize,
    pub max_age: Duration,
}

impl FlushThresholds {
    pub fn from_config(config: &ProducerConfig) -> Self {
        Self {
            count: config.count_threshold,
            bytes: config.byte_threshold,
            max_age: config.time_threshold(),
        }
    }

    /// Returns why `buffer` should be flushed now, if it should. An empty
    /// buffer is never due.
    pub fn due(&self, buffer: &MessageBuffer, now: Instant) -> Option<FlushReason> {
        if buffer.is_empty() {
            None
        } else if buffer.len() >= self.count {
            Some(FlushReason::Count)
        } else if buffer.byte_size() >= self.bytes {
            Some(FlushReason::Bytes)
        } else if buffer.age(now) >= self.max_age {
            Some(FlushReason::Age)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    fn encoded(sequence: u64, payload: &'static [u8]) -> EncodedMessage {
        EncodedMessage {
            sequence,
            topic: "events".to_string(),
            key: None,
            payload: Bytes::from_static(payload),
            upstream_position_info: None,
            timestamp: Utc::now(),
        }
    }

    fn thresholds(count: usize, bytes: usize, max_age_ms: u64) -> FlushThresholds {
        FlushThresholds {
            count,
            bytes,
            max_age: Duration::from_millis(max_age_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_buffer_is_never_due() {
        let buffer = MessageBuffer::new();
        let thresholds = thresholds(1, 1, 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(thresholds.due(&buffer, Instant::now()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_threshold() {
        let mut buffer = MessageBuffer::new();
        let thresholds = thresholds(3, usize::MAX, 60_000);

        buffer.push(encoded(1, b"a"));
        buffer.push(encoded(2, b"b"));
        assert_eq!(thresholds.due(&buffer, Instant::now()), None);

        buffer.push(encoded(3, b"c"));
        assert_eq!(thresholds.due(&buffer, Instant::now()), Some(FlushReason::Count));
    }

    #[tokio::test(start_paused = true)]
    async fn test_byte_threshold() {
        let mut buffer = MessageBuffer::new();
        let thresholds = thresholds(100, 10, 60_000);

        buffer.push(encoded(1, b"12345"));
        assert_eq!(buffer.byte_size(), 5);
        assert_eq!(thresholds.due(&buffer, Instant::now()), None);

        buffer.push(encoded(2, b"67890"));
        assert_eq!(thresholds.due(&buffer, Instant::now()), Some(FlushReason::Bytes));
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_measured_from_first_buffered_message() {
        let mut buffer = MessageBuffer::new();
        let thresholds = thresholds(100, usize::MAX, 250);

        // Idle time before the first message does not count
        tokio::time::advance(Duration::from_secs(5)).await;
        buffer.push(encoded(1, b"a"));
        assert_eq!(thresholds.due(&buffer, Instant::now()), None);

        tokio::time::advance(Duration::from_millis(249)).await;
        assert_eq!(thresholds.due(&buffer, Instant::now()), None);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(thresholds.due(&buffer, Instant::now()), Some(FlushReason::Age));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets_counters() {
        let mut buffer = MessageBuffer::new();
        buffer.push(encoded(1, b"abc"));
        tokio::time::advance(Duration::from_secs(1)).await;

        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.byte_size(), 0);
        assert_eq!(buffer.age(Instant::now()), Duration::ZERO);
    }
}
