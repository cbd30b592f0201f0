use modbus_link::{Connection, ErrorCode, LinkError, RetryPolicy};
use modbus_link_mock::{Call, MockDevice, MockTransport};

fn connected(device: &MockDevice) -> Connection<MockTransport> {
    let mut conn = Connection::new(device, "127.0.0.1", 502);
    conn.connect().expect("connect");
    device.clear_calls();
    conn
}

fn requests(device: &MockDevice) -> usize {
    device.count_calls(Call::is_request)
}

fn socket_lookups(device: &MockDevice) -> usize {
    device.count_calls(|c| *c == Call::Socket)
}

#[test]
fn operations_while_disconnected_never_reach_the_transport() {
    let device = MockDevice::new();
    let mut conn = Connection::new(&device, "127.0.0.1", 502);
    device.clear_calls();

    let mut regs = [0u16; 4];
    let mut bits = [false; 4];
    let results = [
        conn.read_register(0).map(drop),
        conn.read_registers(0, &mut regs),
        conn.write_register(0, 1),
        conn.write_registers(0, &[1, 2]),
        conn.read_coil(0).map(drop),
        conn.read_coils(0, &mut bits),
        conn.write_coil(0, true),
        conn.write_coils(0, &[true, false]),
    ];
    for result in results {
        assert!(matches!(result, Err(LinkError::NotConnected)));
    }
    assert_eq!(conn.last_error(), "Not connected");
    assert!(device.calls().is_empty());
    assert_eq!(conn.stats().requests, 0);
    assert_eq!(conn.stats().failures, 8);
}

#[test]
fn operations_after_disconnect_fail_with_not_connected() {
    let device = MockDevice::new();
    let mut conn = connected(&device);
    conn.disconnect();
    device.clear_calls();
    assert!(conn.write_coil(1, true).is_err());
    assert_eq!(conn.last_error(), "Not connected");
    assert_eq!(requests(&device), 0);
}

#[test]
fn non_data_error_fails_without_drain_or_retry() {
    let device = MockDevice::new();
    let mut conn = connected(&device);
    device.fail_next(ErrorCode::TimedOut);

    let err = conn.write_register(10, 7).expect_err("timeout");
    assert_eq!(err.code(), Some(ErrorCode::TimedOut));
    assert_eq!(conn.last_error(), "Write failed: Connection timed out");
    assert_eq!(requests(&device), 1);
    assert_eq!(socket_lookups(&device), 0);
    assert_eq!(device.register(10), 0);
}

#[test]
fn exception_responses_are_not_retried() {
    let device = MockDevice::new();
    let mut conn = connected(&device);

    let mut regs = [0u16; 2];
    conn.read_registers(0xFFFF, &mut regs).expect_err("past the end");
    assert_eq!(conn.last_error(), "Read failed: Illegal data address");

    let mut too_many = vec![0u16; 126];
    conn.read_registers(0, &mut too_many).expect_err("over the limit");
    assert_eq!(conn.last_error(), "Read failed: Illegal data value");

    assert_eq!(requests(&device), 2);
    assert_eq!(socket_lookups(&device), 0);
}

#[test]
fn defined_exception_replies_are_terminal() {
    let device = MockDevice::new();
    let mut conn = connected(&device);
    device.reply_exception(0x02);

    let err = conn.read_register(0).expect_err("exception");
    assert_eq!(err.code(), Some(ErrorCode::IllegalDataAddress));
    assert_eq!(conn.last_error(), "Read failed: Illegal data address");
    assert_eq!(requests(&device), 1);
    assert_eq!(socket_lookups(&device), 0);
}

#[test]
fn undefined_exception_replies_are_retried_as_data_errors() {
    let device = MockDevice::new();
    device.set_register(8, 300);
    let mut conn = connected(&device);
    device.reply_exception(0x09);

    assert_eq!(conn.read_register(8).expect("retried"), 300);
    assert_eq!(requests(&device), 2);
    assert_eq!(socket_lookups(&device), 1);
}

#[test]
fn every_data_error_gets_one_drain_and_one_retry() {
    for code in [
        ErrorCode::BadData,
        ErrorCode::TooManyData,
        ErrorCode::BadCrc,
        ErrorCode::BadException,
        ErrorCode::UnknownException,
    ] {
        let device = MockDevice::new();
        device.set_register(3, 99);
        let mut conn = connected(&device);
        device.fail_next(code);

        assert_eq!(conn.read_register(3).expect("retried"), 99, "{code:?}");
        assert_eq!(requests(&device), 2, "{code:?}");
        assert_eq!(socket_lookups(&device), 1, "{code:?}");
        assert_eq!(conn.stats().retries, 1);
        assert_eq!(conn.last_error(), "", "success leaves last_error untouched");
    }
}

#[test]
fn drain_happens_between_the_two_attempts() {
    let device = MockDevice::new();
    let mut conn = connected(&device);
    device.fail_next(ErrorCode::BadCrc);
    conn.write_coil(5, true).expect("retried");

    let handle = conn.transport().map(MockTransport::handle).expect("handle");
    let write = Call::WriteBit {
        address: 5,
        value: true,
    };
    assert_eq!(
        device.calls_for(handle),
        vec![write.clone(), Call::Socket, write]
    );
    assert!(device.coil(5));
}

#[test]
fn stale_bytes_are_drained_before_the_retry() {
    modbus_link::logging::init_with_default_filter("debug");
    let device = MockDevice::new();
    device.set_register(0, 42);
    let mut conn = connected(&device);
    device.fail_next_with_stale(ErrorCode::BadCrc, &[0xAB; 40]);

    assert_eq!(conn.read_register(0).expect("resynchronized"), 42);
    assert_eq!(conn.stats().drained_bytes, 40);
    assert_eq!(conn.stats().drains, 1);

    // nothing is left behind for the next request
    assert_eq!(conn.read_register(0).expect("clean"), 42);
    assert_eq!(conn.stats().retries, 1);
}

#[test]
fn stale_bytes_larger_than_the_scratch_buffer_are_fully_drained() {
    let device = MockDevice::new();
    let mut conn = Connection::new(&device, "127.0.0.1", 502)
        .with_policy(RetryPolicy::default().with_drain_buffer_len(8));
    conn.connect().expect("connect");
    device.fail_next_with_stale(ErrorCode::BadData, &[0x55; 100]);

    conn.write_registers(20, &[1, 2, 3]).expect("retried");
    assert_eq!(conn.stats().drained_bytes, 100);
    assert_eq!(device.registers(20, 3), vec![1, 2, 3]);
}

#[test]
fn without_a_drain_stale_bytes_poison_later_requests() {
    let device = MockDevice::new();
    let mut conn = Connection::new(&device, "127.0.0.1", 502)
        .with_policy(RetryPolicy::default().with_io_attempts(1));
    conn.connect().expect("connect");
    device.fail_next_with_stale(ErrorCode::BadCrc, &[1, 2, 3]);

    conn.read_register(0).expect_err("crc");
    assert_eq!(conn.last_error(), "Read failed: Invalid CRC");
    conn.read_register(0).expect_err("stale");
    assert_eq!(conn.last_error(), "Read failed: Invalid data");
    conn.read_register(0).expect_err("still stale");
    assert_eq!(socket_lookups(&device), 0);
}

#[test]
fn stale_bytes_left_by_a_terminal_error_are_recovered_on_the_next_call() {
    let device = MockDevice::new();
    device.set_register(1, 5);
    let mut conn = connected(&device);
    device.fail_next_with_stale(ErrorCode::TimedOut, &[9; 12]);

    conn.read_register(1).expect_err("timeout");
    assert_eq!(socket_lookups(&device), 0);

    // the stale tail surfaces as bad data, which is drained and retried
    assert_eq!(conn.read_register(1).expect("recovered"), 5);
    assert_eq!(socket_lookups(&device), 1);
    assert_eq!(conn.stats().drained_bytes, 12);
}

#[test]
fn a_failed_retry_reports_the_second_error() {
    let device = MockDevice::new();
    let mut conn = connected(&device);
    device.fail_next(ErrorCode::BadData);
    device.fail_next(ErrorCode::TimedOut);

    conn.read_coil(0).expect_err("retry fails");
    assert_eq!(conn.last_error(), "Read coil failed: Connection timed out");
    assert_eq!(requests(&device), 2);
    assert_eq!(socket_lookups(&device), 1);
}

#[test]
fn two_data_errors_in_a_row_are_terminal() {
    let device = MockDevice::new();
    let mut conn = connected(&device);
    device.fail_next(ErrorCode::BadCrc);
    device.fail_next(ErrorCode::BadCrc);
    device.fail_next(ErrorCode::BadCrc);

    conn.write_coils(0, &[true; 3]).expect_err("two attempts only");
    assert_eq!(conn.last_error(), "Write coils failed: Invalid CRC");
    assert_eq!(requests(&device), 2);
    assert_eq!(device.pending_faults(), 1);
    assert_eq!(device.coils(0, 3), vec![false; 3]);
}

#[test]
fn last_error_survives_later_successes_and_is_overwritten_by_failures() {
    let device = MockDevice::new();
    let mut conn = connected(&device);

    device.fail_next(ErrorCode::ServerDeviceBusy);
    conn.read_coils(0, &mut [false; 2]).expect_err("busy");
    assert_eq!(
        conn.last_error(),
        "Read coils failed: Slave device or server is busy"
    );

    conn.read_coils(0, &mut [false; 2]).expect("ok");
    assert_eq!(
        conn.last_error(),
        "Read coils failed: Slave device or server is busy"
    );

    device.fail_next(ErrorCode::ConnectionReset);
    conn.write_coil(0, false).expect_err("reset");
    assert_eq!(
        conn.last_error(),
        "Write coil failed: Connection reset by peer"
    );
}

#[test]
fn a_drain_with_nothing_buffered_is_harmless() {
    let device = MockDevice::new();
    let mut conn = connected(&device);
    device.fail_next(ErrorCode::UnknownException);
    device.fail_next(ErrorCode::BadException);

    conn.read_register(0).expect_err("both attempts fail");
    assert_eq!(conn.stats().drained_bytes, 0);
    assert_eq!(conn.last_error(), "Read failed: Invalid exception code");
}

#[test]
fn stats_snapshot_serializes() {
    let device = MockDevice::new();
    let mut conn = connected(&device);
    device.fail_next(ErrorCode::BadCrc);
    conn.read_register(0).expect("retried");
    conn.disconnect();
    conn.read_register(0).expect_err("not connected");

    let json = serde_json::to_value(conn.stats()).expect("serialize stats");
    assert_eq!(json["connect_attempts"], 1);
    assert_eq!(json["requests"], 1);
    assert_eq!(json["retries"], 1);
    assert_eq!(json["drains"], 1);
    assert_eq!(json["failures"], 1);
}
