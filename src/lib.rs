#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::too_long_first_doc_paragraph
)]

//! modbus_link
//!
//! modbus_link owns a Modbus TCP connection to a controller (relay boards,
//! I/O modules, small PLCs) and wraps every request in a fixed retry policy.
//!
//! Main pieces:
//! - [`Connection`]: connect with bounded retry, typed register/coil reads and
//!   writes, last-error tracking, exclusive ownership of the transport
//! - [`error_codes`]: error codes, their text and the data-error classifier
//! - [`drain`]: non-blocking flush of stale bytes after a corrupted response
//! - [`retry`]: the two-attempt executor used by every read/write
//! - [`Transport`]: the codec the connection drives (frames, MBAP header and
//!   PDUs are the codec's job, not this crate's)
//!
//! A mock device implementing [`Transport`] lives in the `modbus_link_mock` crate.
//!
//! ```no_run
//! use modbus_link::{Connection, LinkConfig, TransportFactory};
//!
//! fn poll<F: TransportFactory>(factory: &F) -> modbus_link::Result<u16> {
//!     let cfg = LinkConfig::from_env();
//!     let mut conn = Connection::from_config(factory, &cfg);
//!     conn.connect()?;
//!     conn.read_register(0x0000)
//! }
//! ```

pub mod config;
pub mod connection;
pub mod drain;
pub mod error;
pub mod error_codes;
pub mod logging;
pub mod retry;
pub mod stats;
pub mod transport;

pub use config::LinkConfig;
pub use connection::Connection;
pub use error::{LinkError, Result, TransportError};
pub use error_codes::{is_retryable, strerror, ErrorCode};
pub use retry::RetryPolicy;
pub use stats::LinkStats;
pub use transport::{Transport, TransportFactory};
