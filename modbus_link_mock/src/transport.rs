use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use modbus_link::{ErrorCode, Transport, TransportError};
use socket2::SockRef;

use crate::device::{Call, DeviceState, Fault, MockDevice, ADDRESS_SPACE};

// request size limits a real device enforces (illegal data value above them)
const MAX_READ_REGISTERS: usize = 125;
const MAX_WRITE_REGISTERS: usize = 123;
const MAX_READ_BITS: usize = 2000;
const MAX_WRITE_BITS: usize = 1968;

// exception codes as they appear in an exception response
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

// a connected loopback pair; `client` is what the connection drains
struct Link {
    client: TcpStream,
    server: TcpStream,
}

impl Link {
    fn open() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let client = TcpStream::connect(listener.local_addr()?)?;
        let (server, _) = listener.accept()?;
        Ok(Self { client, server })
    }

    // true when unread bytes sit in the client's receive buffer
    fn has_stale_bytes(&self) -> bool {
        let mut probe = [0u8; 1];
        if self.client.set_nonblocking(true).is_err() {
            return false;
        }
        let pending = matches!(self.client.peek(&mut probe), Ok(n) if n > 0);
        let _ = self.client.set_nonblocking(false);
        pending
    }

    // push `bytes` from the device side and wait until the client can see them
    fn inject(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.server.write_all(bytes)?;
        self.server.flush()?;
        let mut buf = vec![0u8; bytes.len()];
        let deadline = Instant::now() + Duration::from_secs(2);
        self.client.set_read_timeout(Some(Duration::from_millis(100)))?;
        let result = loop {
            match self.client.peek(&mut buf) {
                Ok(n) if n >= bytes.len() => break Ok(()),
                Ok(_) | Err(_) if Instant::now() < deadline => continue,
                Ok(_) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.client.set_read_timeout(None)?;
        result
    }
}

/// Transport handle bound to a [`MockDevice`].
///
/// `connect` opens a real loopback TCP pair so [`Transport::socket`] exposes a
/// real descriptor. Requests fail with [`ErrorCode::InvalidHandle`] while not
/// connected and with [`ErrorCode::BadData`] while stale bytes are unread.
pub struct MockTransport {
    handle: u32,
    device: MockDevice,
    slave: Option<u8>,
    response_timeout: Option<Duration>,
    link: Option<Link>,
}

impl MockTransport {
    pub(crate) const fn new(handle: u32, device: MockDevice) -> Self {
        Self {
            handle,
            device,
            slave: None,
            response_timeout: None,
            link: None,
        }
    }

    /// Handle id used in the device's call log.
    #[must_use]
    pub const fn handle(&self) -> u32 {
        self.handle
    }

    #[must_use]
    pub const fn slave(&self) -> Option<u8> {
        self.slave
    }

    #[must_use]
    pub const fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    #[must_use]
    pub const fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    // common request path: log, link and stale checks, unit filter, queued fault, then `apply`
    fn request<R, F>(&mut self, call: Call, apply: F) -> Result<R, TransportError>
    where
        F: FnOnce(&mut DeviceState) -> Result<R, u8>,
    {
        let mut st = self.device.lock();
        st.log(self.handle, call);

        let Some(link) = self.link.as_mut() else {
            return Err(ErrorCode::InvalidHandle.into());
        };
        if link.has_stale_bytes() {
            tracing::debug!(handle = self.handle, "stale bytes read as response");
            return Err(ErrorCode::BadData.into());
        }
        if let (Some(unit), Some(slave)) = (st.unit_id, self.slave) {
            if unit != slave {
                return Err(ErrorCode::TimedOut.into());
            }
        }
        match st.faults.pop_front() {
            Some(Fault::Error(code)) => return Err(code.into()),
            Some(Fault::Exception(raw)) => return Err(ErrorCode::from_exception(raw).into()),
            Some(Fault::Stale { code, bytes }) => {
                link.inject(&bytes)?;
                return Err(code.into());
            }
            None => {}
        }
        apply(&mut *st).map_err(|raw| ErrorCode::from_exception(raw).into())
    }
}

fn span(address: u16, count: usize, max: usize) -> Result<std::ops::Range<usize>, u8> {
    if count == 0 || count > max {
        return Err(ILLEGAL_DATA_VALUE);
    }
    let start = usize::from(address);
    if start + count > ADDRESS_SPACE {
        return Err(ILLEGAL_DATA_ADDRESS);
    }
    Ok(start..start + count)
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut st = self.device.lock();
        st.log(self.handle, Call::Connect);
        if let Some(code) = st.connect_faults.pop_front() {
            return Err(code.into());
        }
        drop(st);
        self.link = Some(Link::open()?);
        tracing::info!(handle = self.handle, "mock link up");
        Ok(())
    }

    fn close(&mut self) {
        self.device.lock().log(self.handle, Call::Close);
        if self.link.take().is_some() {
            tracing::info!(handle = self.handle, "mock link down");
        }
    }

    fn read_registers(&mut self, address: u16, out: &mut [u16]) -> Result<usize, TransportError> {
        let count = out.len();
        self.request(Call::ReadRegisters { address, count }, |st| {
            let range = span(address, count, MAX_READ_REGISTERS)?;
            out.copy_from_slice(&st.registers[range]);
            Ok(count)
        })
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.request(Call::WriteRegister { address, value }, |st| {
            st.registers[usize::from(address)] = value;
            Ok(())
        })
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<usize, TransportError> {
        let count = values.len();
        self.request(Call::WriteRegisters { address, count }, |st| {
            let range = span(address, count, MAX_WRITE_REGISTERS)?;
            st.registers[range].copy_from_slice(values);
            Ok(count)
        })
    }

    fn read_bits(&mut self, address: u16, out: &mut [bool]) -> Result<usize, TransportError> {
        let count = out.len();
        self.request(Call::ReadBits { address, count }, |st| {
            let range = span(address, count, MAX_READ_BITS)?;
            out.copy_from_slice(&st.coils[range]);
            Ok(count)
        })
    }

    fn write_bit(&mut self, address: u16, value: bool) -> Result<(), TransportError> {
        self.request(Call::WriteBit { address, value }, |st| {
            st.coils[usize::from(address)] = value;
            Ok(())
        })
    }

    fn write_bits(&mut self, address: u16, values: &[bool]) -> Result<usize, TransportError> {
        let count = values.len();
        self.request(Call::WriteBits { address, count }, |st| {
            let range = span(address, count, MAX_WRITE_BITS)?;
            st.coils[range].copy_from_slice(values);
            Ok(count)
        })
    }

    fn set_slave(&mut self, id: u8) -> Result<(), TransportError> {
        self.device.lock().log(self.handle, Call::SetSlave(id));
        // 248..=254 are reserved unit ids
        if (248..=254).contains(&id) {
            return Err(ErrorCode::from_exception(ILLEGAL_DATA_VALUE).into());
        }
        self.slave = Some(id);
        Ok(())
    }

    fn set_response_timeout(&mut self, timeout: Duration) {
        self.device
            .lock()
            .log(self.handle, Call::SetResponseTimeout(timeout));
        self.response_timeout = Some(timeout);
    }

    fn socket(&self) -> Option<SockRef<'_>> {
        self.device.lock().log(self.handle, Call::Socket);
        self.link.as_ref().map(|l| SockRef::from(&l.client))
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.device.lock().log(self.handle, Call::Free);
    }
}
