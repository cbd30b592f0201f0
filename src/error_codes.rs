//! Error codes reported by the transport and their classification.
//!
//! Every failure coming out of a [`Transport`](crate::transport::Transport) call
//! carries an [`ErrorCode`]. The human readable text (the `strerror` lookup) is
//! loaded from the embedded `error_codes.toml` on first use; a code missing
//! from the table falls back to a built-in text so the lookup never fails.
//!
//! Applications can localize or extend the texts once per process with
//! [`ErrorTable::install`]. An installed entry wins over the embedded one, and
//! the embedded one still answers for codes the installed table leaves out.
//!
//! [`is_retryable`] is the classifier used by the retry executor: only the
//! data-integrity codes are worth a drain-and-retry cycle.

use once_cell::sync::{Lazy, OnceCell};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use crate::error::LinkError;

/// Coarse grouping of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ErrorCategory {
    /// Exception response sent by the device.
    Exception,
    /// Corrupted, truncated or otherwise malformed response frame.
    Data,
    /// Socket level condition (timeouts, resets, bad descriptors).
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    NegativeAcknowledge,
    MemoryParity,
    GatewayPath,
    GatewayTarget,
    BadCrc,
    BadData,
    BadException,
    UnknownException,
    TooManyData,
    BadSlave,
    WouldBlock,
    TimedOut,
    ConnectionReset,
    ConnectionRefused,
    InvalidHandle,
    ResourceExhausted,
    Other,
}

impl ErrorCode {
    pub const ALL: [Self; 23] = [
        Self::IllegalFunction,
        Self::IllegalDataAddress,
        Self::IllegalDataValue,
        Self::ServerDeviceFailure,
        Self::Acknowledge,
        Self::ServerDeviceBusy,
        Self::NegativeAcknowledge,
        Self::MemoryParity,
        Self::GatewayPath,
        Self::GatewayTarget,
        Self::BadCrc,
        Self::BadData,
        Self::BadException,
        Self::UnknownException,
        Self::TooManyData,
        Self::BadSlave,
        Self::WouldBlock,
        Self::TimedOut,
        Self::ConnectionReset,
        Self::ConnectionRefused,
        Self::InvalidHandle,
        Self::ResourceExhausted,
        Self::Other,
    ];

    /// Numeric code used as the key of the text table.
    ///
    /// Exceptions use their on-wire exception code (0x01..=0x0B), data errors
    /// follow directly after them, link errors live at 0x0100 and above.
    #[must_use]
    pub const fn raw(self) -> u16 {
        match self {
            Self::IllegalFunction => 0x0001,
            Self::IllegalDataAddress => 0x0002,
            Self::IllegalDataValue => 0x0003,
            Self::ServerDeviceFailure => 0x0004,
            Self::Acknowledge => 0x0005,
            Self::ServerDeviceBusy => 0x0006,
            Self::NegativeAcknowledge => 0x0007,
            Self::MemoryParity => 0x0008,
            Self::GatewayPath => 0x000A,
            Self::GatewayTarget => 0x000B,
            Self::BadCrc => 0x000C,
            Self::BadData => 0x000D,
            Self::BadException => 0x000E,
            Self::UnknownException => 0x000F,
            Self::TooManyData => 0x0010,
            Self::BadSlave => 0x0011,
            Self::WouldBlock => 0x0100,
            Self::TimedOut => 0x0101,
            Self::ConnectionReset => 0x0102,
            Self::ConnectionRefused => 0x0103,
            Self::InvalidHandle => 0x0104,
            Self::ResourceExhausted => 0x0105,
            Self::Other => 0x01FF,
        }
    }

    #[must_use]
    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.raw() == raw)
    }

    /// Map an exception code received on the wire. Codes outside the defined
    /// set are reported as [`ErrorCode::UnknownException`].
    #[must_use]
    pub const fn from_exception(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x07 => Self::NegativeAcknowledge,
            0x08 => Self::MemoryParity,
            0x0A => Self::GatewayPath,
            0x0B => Self::GatewayTarget,
            _ => Self::UnknownException,
        }
    }

    /// Classify a socket error by its kind.
    #[must_use]
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::ConnectionReset,
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::OutOfMemory => Self::ResourceExhausted,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self.raw() {
            0x0001..=0x000B => ErrorCategory::Exception,
            0x000C..=0x00FF => ErrorCategory::Data,
            _ => ErrorCategory::Link,
        }
    }

    #[must_use]
    pub fn is_retryable(self) -> bool {
        is_retryable(self)
    }

    /// Same as [`strerror`].
    #[must_use]
    pub fn description(self) -> &'static str {
        strerror(self)
    }

    const fn fallback_text(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::ServerDeviceFailure => "Slave device or server failure",
            Self::Acknowledge => "Acknowledge",
            Self::ServerDeviceBusy => "Slave device or server is busy",
            Self::NegativeAcknowledge => "Negative acknowledge",
            Self::MemoryParity => "Memory parity error",
            Self::GatewayPath => "Gateway path unavailable",
            Self::GatewayTarget => "Target device failed to respond",
            Self::BadCrc => "Invalid CRC",
            Self::BadData => "Invalid data",
            Self::BadException => "Invalid exception code",
            Self::UnknownException => "Unknown exception code",
            Self::TooManyData => "Too many data",
            Self::BadSlave => "Response not from requested slave",
            Self::WouldBlock => "Resource temporarily unavailable",
            Self::TimedOut => "Connection timed out",
            Self::ConnectionReset => "Connection reset by peer",
            Self::ConnectionRefused => "Connection refused",
            Self::InvalidHandle => "Bad file descriptor",
            Self::ResourceExhausted => "Cannot allocate memory",
            Self::Other => "Input/output error",
        }
    }
}

/// True for the data-integrity codes that leave stale bytes behind and are
/// worth one drain-and-retry cycle. Everything else surfaces immediately.
#[must_use]
pub const fn is_retryable(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::BadData
            | ErrorCode::TooManyData
            | ErrorCode::BadCrc
            | ErrorCode::BadException
            | ErrorCode::UnknownException
    )
}

/// Text for `code`: the installed table, then the embedded one, then the
/// built-in fallback.
#[must_use]
pub fn strerror(code: ErrorCode) -> &'static str {
    INSTALLED_TABLE
        .get()
        .and_then(|t| t.description(code))
        .or_else(|| DEFAULT_TABLE.description(code))
        .unwrap_or_else(|| code.fallback_text())
}

/// Symbolic name such as `BAD_CRC`, looked up like [`strerror`].
#[must_use]
pub fn code_name(code: ErrorCode) -> Option<&'static str> {
    INSTALLED_TABLE
        .get()
        .and_then(|t| t.name(code))
        .or_else(|| DEFAULT_TABLE.name(code))
}

#[derive(Debug, Deserialize)]
struct ErrorCodesToml {
    codes: Vec<ErrorCodeEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorCodeEntry {
    code: RawCode,
    name: Option<String>,
    description: Option<String>,
    category: Option<ErrorCategory>,
}

// `code = 12` or `code = "0x000C"`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCode {
    Number(i64),
    Text(String),
}

impl RawCode {
    fn to_u16(&self) -> Result<u16, String> {
        match self {
            Self::Number(n) => u16::try_from(*n).map_err(|_| format!("code {n} out of range")),
            Self::Text(t) => {
                let t = t.trim();
                let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                    Some(hex) => u16::from_str_radix(hex, 16),
                    None => t.parse(),
                };
                parsed.map_err(|e| format!("code {t:?}: {e}"))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct ErrorEntry {
    pub code: ErrorCode,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<ErrorCategory>,
}

/// Parsed error-code table. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct ErrorTable {
    entries: HashMap<ErrorCode, ErrorEntry>,
}

impl ErrorTable {
    pub fn from_path(path: &Path) -> Result<Self, LinkError> {
        let s = fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("read {}: {e}", path.display())))?;
        s.parse()
    }

    #[must_use]
    pub fn get(&self, code: ErrorCode) -> Option<&ErrorEntry> {
        self.entries.get(&code)
    }

    #[must_use]
    pub fn description(&self, code: ErrorCode) -> Option<&str> {
        self.get(code).and_then(|e| e.description.as_deref())
    }

    #[must_use]
    pub fn name(&self, code: ErrorCode) -> Option<&str> {
        self.get(code).and_then(|e| e.name.as_deref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make this table the first source of [`strerror`] and [`code_name`] for
    /// the rest of the process. Only one table can be installed.
    pub fn install(self) -> Result<(), LinkError> {
        let count = self.len();
        INSTALLED_TABLE
            .set(self)
            .map_err(|_| LinkError::Config("an error code table is already installed".into()))?;
        log::info!("installed error code table with {count} entries");
        Ok(())
    }

    /// [`ErrorTable::from_path`] followed by [`ErrorTable::install`].
    pub fn install_from_path(path: &Path) -> Result<(), LinkError> {
        Self::from_path(path)?.install()
    }
}

impl FromStr for ErrorTable {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed: ErrorCodesToml = toml::from_str(s)
            .map_err(|e| LinkError::Config(format!("error_codes.toml parse error: {e}")))?;
        let mut entries = HashMap::new();
        for e in parsed.codes {
            let raw = e
                .code
                .to_u16()
                .map_err(|msg| LinkError::Config(format!("error_codes.toml: {msg}")))?;
            let Some(code) = ErrorCode::from_raw(raw) else {
                log::warn!("error_codes.toml: ignoring unknown code 0x{raw:04X}");
                continue;
            };
            entries.insert(
                code,
                ErrorEntry {
                    code,
                    name: e.name,
                    description: e.description,
                    category: e.category,
                },
            );
        }
        Ok(Self { entries })
    }
}

static INSTALLED_TABLE: OnceCell<ErrorTable> = OnceCell::new();

static DEFAULT_TABLE: Lazy<ErrorTable> = Lazy::new(|| {
    include_str!("error_codes.toml").parse().unwrap_or_else(|e| {
        log::error!("embedded error code table is invalid: {e}");
        ErrorTable::default()
    })
});
