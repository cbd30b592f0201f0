use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context};
use modbus_link::{ErrorCode, TransportError, TransportFactory};
use serde::Deserialize;

use crate::transport::MockTransport;

pub(crate) const ADDRESS_SPACE: usize = 0x1_0000;

/// One transport call as seen by the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Create { address: String, port: u16 },
    Connect,
    Close,
    ReadRegisters { address: u16, count: usize },
    WriteRegister { address: u16, value: u16 },
    WriteRegisters { address: u16, count: usize },
    ReadBits { address: u16, count: usize },
    WriteBit { address: u16, value: bool },
    WriteBits { address: u16, count: usize },
    SetSlave(u8),
    SetResponseTimeout(Duration),
    Socket,
    Free,
}

impl Call {
    /// True for calls that put a request on the wire.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(
            self,
            Self::ReadRegisters { .. }
                | Self::WriteRegister { .. }
                | Self::WriteRegisters { .. }
                | Self::ReadBits { .. }
                | Self::WriteBit { .. }
                | Self::WriteBits { .. }
        )
    }
}

/// A logged call and the transport handle that made it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    pub handle: u32,
    pub call: Call,
}

#[derive(Clone, Debug)]
pub(crate) enum Fault {
    Error(ErrorCode),
    /// answer with an exception response carrying this raw code
    Exception(u8),
    /// fail with `code` and leave `bytes` unread in the client's receive buffer
    Stale { code: ErrorCode, bytes: Vec<u8> },
}

pub(crate) struct DeviceState {
    pub(crate) registers: Vec<u16>,
    pub(crate) coils: Vec<bool>,
    pub(crate) unit_id: Option<u8>,
    pub(crate) refuse_open: Option<ErrorCode>,
    pub(crate) connect_faults: VecDeque<ErrorCode>,
    pub(crate) faults: VecDeque<Fault>,
    pub(crate) calls: Vec<CallRecord>,
    next_handle: u32,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            registers: vec![0; ADDRESS_SPACE],
            coils: vec![false; ADDRESS_SPACE],
            unit_id: None,
            refuse_open: None,
            connect_faults: VecDeque::new(),
            faults: VecDeque::new(),
            calls: Vec::new(),
            next_handle: 1,
        }
    }

    pub(crate) fn log(&mut self, handle: u32, call: Call) {
        tracing::debug!(handle, ?call, "mock call");
        self.calls.push(CallRecord { handle, call });
    }
}

/// In-memory Modbus device: 65536 holding registers and 65536 coils.
///
/// Cloning shares the same device. As a [`TransportFactory`] it hands out
/// [`MockTransport`] handles bound to this device.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::new())),
        }
    }

    /// Build a device preloaded from `image`.
    pub fn from_image(image: &DeviceImage) -> anyhow::Result<Self> {
        let device = Self::new();
        {
            let mut st = device.lock();
            st.unit_id = image.unit_id;
            for block in &image.registers {
                let start = usize::from(block.address);
                let Some(dst) = st.registers.get_mut(start..start + block.values.len()) else {
                    bail!(
                        "register block at {} with {} values runs past the address space",
                        block.address,
                        block.values.len()
                    );
                };
                dst.copy_from_slice(&block.values);
            }
            for block in &image.coils {
                let start = usize::from(block.address);
                let Some(dst) = st.coils.get_mut(start..start + block.values.len()) else {
                    bail!(
                        "coil block at {} with {} values runs past the address space",
                        block.address,
                        block.values.len()
                    );
                };
                dst.copy_from_slice(&block.values);
            }
        }
        Ok(device)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn register(&self, address: u16) -> u16 {
        self.lock().registers[usize::from(address)]
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.lock().registers[usize::from(address)] = value;
    }

    /// `count` registers from `address`, clipped at the end of the address space.
    #[must_use]
    pub fn registers(&self, address: u16, count: usize) -> Vec<u16> {
        let start = usize::from(address);
        let end = (start + count).min(ADDRESS_SPACE);
        self.lock().registers[start..end].to_vec()
    }

    #[must_use]
    pub fn coil(&self, address: u16) -> bool {
        self.lock().coils[usize::from(address)]
    }

    pub fn set_coil(&self, address: u16, value: bool) {
        self.lock().coils[usize::from(address)] = value;
    }

    #[must_use]
    pub fn coils(&self, address: u16, count: usize) -> Vec<bool> {
        let start = usize::from(address);
        let end = (start + count).min(ADDRESS_SPACE);
        self.lock().coils[start..end].to_vec()
    }

    /// Only answer requests addressed to `unit_id`; others time out.
    pub fn set_unit_id(&self, unit_id: Option<u8>) {
        self.lock().unit_id = unit_id;
    }

    /// Make the factory refuse to create transports with `code`.
    pub fn refuse_open(&self, code: ErrorCode) {
        self.lock().refuse_open = Some(code);
    }

    pub fn allow_open(&self) {
        self.lock().refuse_open = None;
    }

    /// Fail the next transport connect with `code`. Queued faults apply in order.
    pub fn fail_connect(&self, code: ErrorCode) {
        self.lock().connect_faults.push_back(code);
    }

    /// Fail the next request with `code`.
    pub fn fail_next(&self, code: ErrorCode) {
        self.lock().faults.push_back(Fault::Error(code));
    }

    /// Answer the next request with an exception response carrying `code`
    /// as sent on the wire. Codes outside 0x01..=0x0B decode as an unknown
    /// exception.
    pub fn reply_exception(&self, code: u8) {
        self.lock().faults.push_back(Fault::Exception(code));
    }

    /// Fail the next request with `code` and leave `stale` unread in the
    /// client socket, like the tail of a broken response. Until the bytes are
    /// drained every request fails with [`ErrorCode::BadData`].
    pub fn fail_next_with_stale(&self, code: ErrorCode, stale: &[u8]) {
        self.lock().faults.push_back(Fault::Stale {
            code,
            bytes: stale.to_vec(),
        });
    }

    /// Faults still queued (connect faults not included).
    #[must_use]
    pub fn pending_faults(&self) -> usize {
        self.lock().faults.len()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// Calls made by one transport handle.
    #[must_use]
    pub fn calls_for(&self, handle: u32) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|r| r.handle == handle)
            .map(|r| r.call.clone())
            .collect()
    }

    pub fn count_calls<P>(&self, pred: P) -> usize
    where
        P: Fn(&Call) -> bool,
    {
        self.lock().calls.iter().filter(|r| pred(&r.call)).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MockDevice {
    type Transport = MockTransport;

    fn create(&self, address: &str, port: u16) -> Result<MockTransport, TransportError> {
        let handle = {
            let mut st = self.lock();
            if let Some(code) = st.refuse_open {
                tracing::warn!(address, port, ?code, "mock refuses to create a transport");
                return Err(code.into());
            }
            let handle = st.next_handle;
            st.next_handle += 1;
            st.log(
                handle,
                Call::Create {
                    address: address.to_string(),
                    port,
                },
            );
            handle
        };
        Ok(MockTransport::new(handle, self.clone()))
    }
}

/// Initial device contents.
///
/// ```toml
/// unit_id = 1
///
/// [[registers]]
/// address = 0
/// values = [100, 200, 300]
///
/// [[coils]]
/// address = 8
/// values = [true, false, true]
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceImage {
    pub unit_id: Option<u8>,
    pub registers: Vec<Block<u16>>,
    pub coils: Vec<Block<bool>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block<V> {
    pub address: u16,
    pub values: Vec<V>,
}

impl DeviceImage {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("parse device image")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("read device image {}", path.display()))?;
        Self::from_toml_str(&s)
    }
}
