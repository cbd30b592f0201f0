use serde::Serialize;

/// Counters kept per connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Transport-level connect calls, including retried ones.
    pub connect_attempts: u64,
    /// Read/write operations that reached the transport.
    pub requests: u64,
    /// Extra attempts issued after a data error.
    pub retries: u64,
    pub drains: u64,
    pub drained_bytes: u64,
    /// Operations that ended in an error, connect and not-connected included.
    pub failures: u64,
}

impl LinkStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
