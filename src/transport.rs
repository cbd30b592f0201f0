//! The collaborator boundary: a Modbus TCP codec driven one request at a time.
//!
//! The connection layer never builds frames itself. It calls into a
//! [`Transport`] through this fixed set of operations and trusts the codec to
//! encode requests, check responses and report failures as [`TransportError`]
//! values carrying an [`ErrorCode`](crate::error_codes::ErrorCode).

use std::time::Duration;

use socket2::SockRef;

use crate::error::TransportError;

/// One Modbus TCP context bound to a single remote address.
///
/// All calls block until the response arrives or the response timeout fires.
/// Dropping the value releases the context; the connection layer makes sure
/// [`Transport::close`] ran before that when the link was up.
pub trait Transport {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn close(&mut self);

    /// Read `out.len()` holding registers starting at `address` (function 0x03).
    /// Returns the number of registers read.
    fn read_registers(&mut self, address: u16, out: &mut [u16]) -> Result<usize, TransportError>;

    /// Write one holding register (function 0x06).
    fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError>;

    /// Write `values.len()` holding registers (function 0x10).
    fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<usize, TransportError>;

    /// Read `out.len()` coils (function 0x01), one flag per entry.
    fn read_bits(&mut self, address: u16, out: &mut [bool]) -> Result<usize, TransportError>;

    /// Write one coil (function 0x05).
    fn write_bit(&mut self, address: u16, value: bool) -> Result<(), TransportError>;

    /// Write `values.len()` coils (function 0x0F).
    fn write_bits(&mut self, address: u16, values: &[bool]) -> Result<usize, TransportError>;

    /// Select the unit id the following requests are addressed to.
    fn set_slave(&mut self, id: u8) -> Result<(), TransportError>;

    fn set_response_timeout(&mut self, timeout: Duration);

    /// Borrow the underlying socket, `None` while there is none.
    fn socket(&self) -> Option<SockRef<'_>> {
        None
    }
}

/// Creates transport contexts. This never performs network I/O.
pub trait TransportFactory {
    type Transport: Transport;

    fn create(&self, address: &str, port: u16) -> Result<Self::Transport, TransportError>;
}

impl<F, T> TransportFactory for F
where
    F: Fn(&str, u16) -> Result<T, TransportError>,
    T: Transport,
{
    type Transport = T;

    fn create(&self, address: &str, port: u16) -> Result<T, TransportError> {
        self(address, port)
    }
}
