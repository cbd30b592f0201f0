//! modbus_link_mock
//!
//! An in-memory Modbus device for testing code built on `modbus_link` without
//! hardware. [`MockDevice`] is a [`TransportFactory`](modbus_link::TransportFactory);
//! the [`MockTransport`] handles it creates share its register/coil image,
//! fault queue and call log.
//!
//! ```
//! use modbus_link::{Connection, ErrorCode};
//! use modbus_link_mock::MockDevice;
//!
//! let device = MockDevice::new();
//! device.set_register(4, 0x1234);
//! device.fail_next_with_stale(ErrorCode::BadCrc, &[0xDE, 0xAD]);
//!
//! let mut conn = Connection::new(&device, "127.0.0.1", 502);
//! conn.connect().unwrap();
//! // the CRC error is drained and retried transparently
//! assert_eq!(conn.read_register(4).unwrap(), 0x1234);
//! ```

mod device;
mod transport;

pub use device::{Block, Call, CallRecord, DeviceImage, MockDevice};
pub use transport::MockTransport;

/// Route the mock's `tracing` output to the test harness. Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Mark the start of a test scenario in the mock's trace output, so the
/// device-side events that follow can be attributed to it.
pub fn announce(name: &str, description: &str) {
    tracing::info!(test = name, scenario = description, "scenario start");
}
