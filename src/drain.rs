//! Best-effort flush of stale response bytes.
//!
//! After a corrupted or truncated frame the remainder of that response can
//! still sit in the socket's receive buffer; the next request would then read
//! it as its own answer. Draining the buffer before retrying resynchronizes
//! the request/response stream.

use std::io;
use std::mem::MaybeUninit;

use socket2::SockRef;

/// Scratch size used when the caller does not configure one.
pub const DEFAULT_DRAIN_BUFFER_LEN: usize = 256;

/// Read and discard whatever is buffered on `socket` without blocking.
///
/// The socket's blocking mode is left as the caller set it. Stops on end of
/// stream, on would-block and on any other error. Errors are never reported;
/// the return value is the number of bytes discarded.
pub fn drain_socket(socket: Option<SockRef<'_>>, scratch_len: usize) -> usize {
    let Some(sock) = socket else {
        return 0;
    };

    let mut scratch = vec![MaybeUninit::<u8>::uninit(); scratch_len.max(1)];
    let mut discarded = 0usize;
    loop {
        match recv_now(&sock, &mut scratch) {
            Ok(0) => break, // peer closed
            Ok(n) => discarded += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                log::debug!("drain: stopped on socket error: {e}");
                break;
            }
        }
    }
    discarded
}

// per-call non-blocking read; the descriptor's O_NONBLOCK flag is untouched
#[cfg(unix)]
fn recv_now(sock: &SockRef<'_>, scratch: &mut [MaybeUninit<u8>]) -> io::Result<usize> {
    sock.recv_with_flags(scratch, libc::MSG_DONTWAIT)
}

// no per-call flag and no way to query FIONBIO here, so the socket is
// switched for this one read and put back to blocking mode
#[cfg(not(unix))]
fn recv_now(sock: &SockRef<'_>, scratch: &mut [MaybeUninit<u8>]) -> io::Result<usize> {
    sock.set_nonblocking(true)?;
    let result = sock.recv(scratch);
    if let Err(e) = sock.set_nonblocking(false) {
        log::warn!("drain: cannot restore blocking mode: {e}");
    }
    result
}
