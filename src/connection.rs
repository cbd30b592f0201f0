//! Owned Modbus TCP connection.
//!
//! [`Connection`] owns exactly one transport context, tracks whether the link
//! is up and keeps the text of the last failure. Every read/write goes through
//! [`retry::execute`], so a corrupted response is answered with one drain and
//! one retry while any other failure surfaces immediately.
//!
//! ```no_run
//! # use modbus_link::{Connection, TransportFactory};
//! # fn demo<F: TransportFactory>(factory: &F) -> modbus_link::Result<()> {
//! let mut conn = Connection::new(factory, "192.168.1.50", 502);
//! conn.set_slave_id(1)?;
//! conn.set_response_timeout(0, 500_000);
//! conn.connect()?;
//! let mut temps = [0u16; 4];
//! conn.read_registers(0x0010, &mut temps)?;
//! conn.write_coil(3, true)?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use crate::config::LinkConfig;
use crate::error::{LinkError, Result, TransportError};
use crate::error_codes::ErrorCode;
use crate::retry::{self, RetryPolicy};
use crate::stats::LinkStats;
use crate::transport::{Transport, TransportFactory};

const READ_FAILED: &str = "Read failed: ";
const WRITE_FAILED: &str = "Write failed: ";
const READ_COIL_FAILED: &str = "Read coil failed: ";
const READ_COILS_FAILED: &str = "Read coils failed: ";
const WRITE_COIL_FAILED: &str = "Write coil failed: ";
const WRITE_COILS_FAILED: &str = "Write coils failed: ";

/// A single Modbus TCP link with exclusive ownership of its transport.
///
/// Operations take `&mut self`: one request is in flight at a time and the
/// type is not meant to be shared between threads without an outer lock.
///
/// Each operation returns `Err` on failure and also records the error text,
/// readable through [`Connection::last_error`] until the next failure.
///
/// Writes are not read back; a successful write means the device acknowledged
/// the request.
pub struct Connection<T: Transport> {
    transport: Option<T>,
    connected: bool,
    last_error: String,
    policy: RetryPolicy,
    stats: LinkStats,
}

impl<T: Transport> Connection<T> {
    /// Create a context for `address:port`. No network I/O happens here.
    ///
    /// If the factory refuses, the connection is still returned: it has no
    /// transport, [`last_error`](Self::last_error) says why, and every further
    /// operation fails immediately.
    pub fn new<F>(factory: &F, address: &str, port: u16) -> Self
    where
        F: TransportFactory<Transport = T>,
    {
        match factory.create(address, port) {
            Ok(transport) => Self::with_transport(transport),
            Err(e) => {
                let err = LinkError::Create(e);
                log::error!("{address}:{port}: {err}");
                let mut conn = Self::default();
                conn.last_error = err.to_string();
                conn
            }
        }
    }

    /// Adopt an already created transport.
    #[must_use]
    pub fn with_transport(transport: T) -> Self {
        let mut conn = Self::default();
        conn.transport = Some(transport);
        conn
    }

    /// Create from `cfg`, applying its retry policy, response timeout and slave id.
    ///
    /// A slave id the transport rejects is recorded in `last_error`; the
    /// connection is returned either way.
    pub fn from_config<F>(factory: &F, cfg: &LinkConfig) -> Self
    where
        F: TransportFactory<Transport = T>,
    {
        let mut conn = Self::new(factory, &cfg.host, cfg.port).with_policy(RetryPolicy::from(cfg));
        if let Some(timeout) = cfg.response_timeout() {
            conn.apply_response_timeout(timeout);
        }
        if let Some(id) = cfg.slave_id {
            if conn.transport.is_some() {
                if let Err(e) = conn.set_slave_id(id) {
                    log::warn!("{}: slave id {id} from config not applied: {e}", cfg.addr());
                }
            }
        }
        conn
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Connect the transport. Succeeds at once when already connected.
    ///
    /// A would-block result is retried after [`RetryPolicy::connect_backoff`]
    /// (a plain thread sleep) until [`RetryPolicy::connect_attempts`] calls were
    /// made; any other error fails right away.
    pub fn connect(&mut self) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.fail(LinkError::InvalidContext));
        };
        if self.connected {
            return Ok(());
        }

        let max_attempts = self.policy.connect_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            self.stats.connect_attempts += 1;
            match transport.connect() {
                Ok(()) => {
                    self.connected = true;
                    log::info!("connected (attempt {attempt}/{max_attempts})");
                    return Ok(());
                }
                Err(e) if e.code() == ErrorCode::WouldBlock && attempt < max_attempts => {
                    log::debug!(
                        "connect attempt {attempt}/{max_attempts} would block, retrying in {:?}",
                        self.policy.connect_backoff
                    );
                    std::thread::sleep(self.policy.connect_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    log::warn!("connect attempt {attempt}/{max_attempts} failed: {e}");
                    return Err(self.fail(LinkError::Connect(e)));
                }
            }
        }
    }

    /// Close the link if it is up. Calling it again is a no-op.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
            log::info!("disconnected");
        }
        self.connected = false;
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// False when the context could not be created (or was moved out).
    #[must_use]
    pub const fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Move the transport, state and last error out, leaving `self` as an
    /// empty, disconnected connection that performs no I/O when dropped.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Replace this connection with `other`. The current link is closed and
    /// its transport released before `other` is adopted.
    pub fn replace(&mut self, other: Self) {
        self.disconnect();
        self.transport = None;
        *self = other;
    }

    /// Select the unit id for subsequent requests. Needs a transport, not a
    /// live connection.
    pub fn set_slave_id(&mut self, id: u8) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.fail(LinkError::InvalidContext));
        };
        match transport.set_slave(id) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(LinkError::SetSlave(e))),
        }
    }

    /// Set how long each request waits for its response. Silently ignored
    /// without a transport.
    pub fn set_response_timeout(&mut self, seconds: u32, microseconds: u32) {
        let timeout =
            Duration::from_secs(u64::from(seconds)) + Duration::from_micros(u64::from(microseconds));
        self.apply_response_timeout(timeout);
    }

    fn apply_response_timeout(&mut self, timeout: Duration) {
        if let Some(transport) = self.transport.as_mut() {
            transport.set_response_timeout(timeout);
        }
    }

    /// Text of the most recent failure. Reading it does not clear it.
    #[must_use]
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    #[must_use]
    pub const fn stats(&self) -> &LinkStats {
        &self.stats
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Raw transport, for calls outside the retry wrapper.
    #[must_use]
    pub const fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    pub fn read_register(&mut self, address: u16) -> Result<u16> {
        let mut value = [0u16; 1];
        self.run(READ_FAILED, |t| t.read_registers(address, &mut value))?;
        Ok(value[0])
    }

    /// Fill `values` from `values.len()` registers starting at `address`.
    pub fn read_registers(&mut self, address: u16, values: &mut [u16]) -> Result<()> {
        self.run(READ_FAILED, |t| t.read_registers(address, values))
            .map(|_| ())
    }

    pub fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.run(WRITE_FAILED, |t| t.write_register(address, value))
    }

    pub fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        self.run(WRITE_FAILED, |t| t.write_registers(address, values))
            .map(|_| ())
    }

    pub fn read_coil(&mut self, address: u16) -> Result<bool> {
        let mut state = [false; 1];
        self.run(READ_COIL_FAILED, |t| t.read_bits(address, &mut state))?;
        Ok(state[0])
    }

    pub fn read_coils(&mut self, address: u16, states: &mut [bool]) -> Result<()> {
        self.run(READ_COILS_FAILED, |t| t.read_bits(address, states))
            .map(|_| ())
    }

    pub fn write_coil(&mut self, address: u16, state: bool) -> Result<()> {
        self.run(WRITE_COIL_FAILED, |t| t.write_bit(address, state))
    }

    pub fn write_coils(&mut self, address: u16, states: &[bool]) -> Result<()> {
        self.run(WRITE_COILS_FAILED, |t| t.write_bits(address, states))
            .map(|_| ())
    }

    // connected check, then the retry executor; every failure is recorded
    fn run<R, F>(&mut self, prefix: &'static str, op: F) -> Result<R>
    where
        F: FnMut(&mut T) -> std::result::Result<R, TransportError>,
    {
        if !self.connected {
            return Err(self.fail(LinkError::NotConnected));
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.fail(LinkError::InvalidContext));
        };
        match retry::execute(transport, &self.policy, &mut self.stats, prefix, op) {
            Ok(v) => Ok(v),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, err: LinkError) -> LinkError {
        self.last_error = err.to_string();
        self.stats.failures += 1;
        err
    }
}

impl<T: Transport> Default for Connection<T> {
    fn default() -> Self {
        Self {
            transport: None,
            connected: false,
            last_error: String::new(),
            policy: RetryPolicy::default(),
            stats: LinkStats::default(),
        }
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("has_transport", &self.transport.is_some())
            .field("connected", &self.connected)
            .field("last_error", &self.last_error)
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish()
    }
}
