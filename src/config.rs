use std::sync::Arc;
use std::time::Duration;

use crate::sequence::SequenceAllocator;

/// Connection settings for a [Client](crate::client::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for the TCP handshake.
    pub connect_timeout: Duration,
    /// Upper bound on a single socket read in the receiver loop. Lets the
    /// loop notice a close between reads.
    pub read_timeout: Duration,
    /// Events buffered for a callback before the receiver stops reading.
    pub event_capacity: usize,
    /// Sequence source for outgoing requests.
    pub sequences: Arc<SequenceAllocator>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(500),
            event_capacity: 64,
            sequences: Arc::new(SequenceAllocator::new()),
        }
    }
}

impl ClientConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Clamped to at least one slot.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Continue an existing counter instead of starting at 0.
    pub fn with_sequences(mut self, sequences: Arc<SequenceAllocator>) -> Self {
        self.sequences = sequences;
        self
    }
}
