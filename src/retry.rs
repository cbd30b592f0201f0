//! Retry executor shared by every read/write operation.
//!
//! One request is attempted up to [`RetryPolicy::io_attempts`] times. A failure
//! on a non-final attempt is retried only when its code is a data error
//! ([`is_retryable`](crate::error_codes::is_retryable)); the socket is drained
//! first so the retry does not read the rest of the broken response. Any other
//! failure, and any failure on the final attempt, is terminal.

use std::time::Duration;

use crate::config::LinkConfig;
use crate::drain::{drain_socket, DEFAULT_DRAIN_BUFFER_LEN};
use crate::error::{LinkError, TransportError};
use crate::error_codes::code_name;
use crate::stats::LinkStats;
use crate::transport::Transport;

/// Attempt limits and backoff for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transport connect calls before giving up (including the first).
    pub connect_attempts: u32,
    /// Sleep between connect calls that failed with would-block.
    pub connect_backoff: Duration,
    /// Attempts per read/write request (including the first).
    pub io_attempts: u32,
    /// Scratch buffer length used by the drainer.
    pub drain_buffer_len: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(100),
            io_attempts: 2,
            drain_buffer_len: DEFAULT_DRAIN_BUFFER_LEN,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }
    #[must_use]
    pub const fn with_connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = backoff;
        self
    }
    #[must_use]
    pub const fn with_io_attempts(mut self, attempts: u32) -> Self {
        self.io_attempts = attempts;
        self
    }
    #[must_use]
    pub const fn with_drain_buffer_len(mut self, len: usize) -> Self {
        self.drain_buffer_len = len;
        self
    }
}

impl From<&LinkConfig> for RetryPolicy {
    fn from(cfg: &LinkConfig) -> Self {
        Self {
            connect_attempts: cfg.connect_attempts.max(1),
            connect_backoff: Duration::from_millis(cfg.connect_backoff_ms),
            io_attempts: cfg.io_attempts.max(1),
            drain_buffer_len: cfg.drain_buffer_len.max(1),
        }
    }
}

/// Run `op` against `transport` under `policy`.
///
/// On a terminal failure the returned error renders as `prefix` followed by
/// the transport's error text.
pub fn execute<T, R, F>(
    transport: &mut T,
    policy: &RetryPolicy,
    stats: &mut LinkStats,
    prefix: &'static str,
    mut op: F,
) -> Result<R, LinkError>
where
    T: Transport,
    F: FnMut(&mut T) -> Result<R, TransportError>,
{
    let max_attempts = policy.io_attempts.max(1);
    let mut attempt = 1u32;
    stats.requests += 1;
    loop {
        match op(&mut *transport) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let drained = drain_socket(transport.socket(), policy.drain_buffer_len);
                log::warn!(
                    "{prefix}{e} [{}] (attempt {attempt}/{max_attempts}); drained {drained} stale bytes, retrying",
                    code_name(e.code()).unwrap_or("?")
                );
                stats.drains += 1;
                stats.drained_bytes += drained as u64;
                stats.retries += 1;
                attempt += 1;
            }
            Err(e) => {
                log::debug!("{prefix}{e} (attempt {attempt}/{max_attempts}, giving up)");
                return Err(LinkError::Operation { prefix, source: e });
            }
        }
    }
}
