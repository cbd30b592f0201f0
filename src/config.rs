use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::LinkError;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 502;

/// Connection settings, loaded from TOML and/or `MODBUS_LINK_*` environment variables.
///
/// ```toml
/// host = "192.168.1.50"
/// port = 502
/// slave_id = 1
/// response_timeout_ms = 500
/// connect_attempts = 3
/// connect_backoff_ms = 100
/// io_attempts = 2
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub slave_id: Option<u8>,
    pub response_timeout_ms: Option<u64>,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub io_attempts: u32,
    pub drain_buffer_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            slave_id: None,
            response_timeout_ms: None,
            connect_attempts: 3,
            connect_backoff_ms: 100,
            io_attempts: 2,
            drain_buffer_len: crate::drain::DEFAULT_DRAIN_BUFFER_LEN,
        }
    }
}

impl LinkConfig {
    pub fn from_path(path: &Path) -> Result<Self, LinkError> {
        let s = fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("read {}: {e}", path.display())))?;
        s.parse()
    }

    /// Defaults overlaid with the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Overlay values returned by `lookup` for the `MODBUS_LINK_*` names.
    /// Values that do not parse are ignored.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<T> {
            let raw = lookup(name)?;
            let v = raw.trim().parse().ok();
            if v.is_none() {
                log::warn!("ignoring {name}={raw:?}: not a valid value");
            }
            v
        }
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;

        if let Some(host) = lookup("MODBUS_LINK_HOST").filter(|h| !h.trim().is_empty()) {
            self.host = host.trim().to_string();
        }
        if let Some(v) = parsed(lookup, "MODBUS_LINK_PORT") {
            self.port = v;
        }
        if let Some(v) = parsed(lookup, "MODBUS_LINK_SLAVE_ID") {
            self.slave_id = Some(v);
        }
        if let Some(v) = parsed(lookup, "MODBUS_LINK_RESPONSE_TIMEOUT_MS") {
            self.response_timeout_ms = Some(v);
        }
        if let Some(v) = parsed(lookup, "MODBUS_LINK_CONNECT_ATTEMPTS") {
            self.connect_attempts = v;
        }
        if let Some(v) = parsed(lookup, "MODBUS_LINK_CONNECT_BACKOFF_MS") {
            self.connect_backoff_ms = v;
        }
        if let Some(v) = parsed(lookup, "MODBUS_LINK_IO_ATTEMPTS") {
            self.io_attempts = v;
        }
        if let Some(v) = parsed(lookup, "MODBUS_LINK_DRAIN_BUFFER_LEN") {
            self.drain_buffer_len = v;
        }
        self
    }

    #[must_use]
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    /// `host:port`
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for LinkConfig {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| LinkError::Config(format!("link config parse error: {e}")))
    }
}
