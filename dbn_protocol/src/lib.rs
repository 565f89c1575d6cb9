// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

pub mod control;
pub mod group;
pub mod record;
pub mod ring;
pub mod session;

use std::fmt;
use std::io;

/// Receive-buffer size requested from the kernel for every live session. The
/// effective (possibly larger) value reported back by the kernel governs how
/// big the session's receive and carry-over buffers are.
pub const TARGET_RCVBUF: usize = 64 * 1024 * 1024;

/// TCP port every live subscription gateway listens on.
pub const GATEWAY_PORT: u16 = 13_000;

/// Domain under which the per-dataset gateways are published.
pub const GATEWAY_DOMAIN: &str = "lsg.databento.com";

/// Number of trailing API-key characters sent alongside the CRAM digest so
/// the gateway can pick the right key bucket.
pub const BUCKET_ID_LEN: usize = 5;

/// The possible errors that can arise while connecting to a gateway or
/// streaming records from it.
#[derive(Debug)]
pub enum Error {
    /// Errors returned by I/O failures on the socket or the completion ring.
    Io(io::Error),

    /// The dataset's gateway name did not resolve to a usable IPv4 address.
    Resolution(String),

    /// Protocol errors are raised when the gateway's control channel or
    /// record stream violates the wire format.
    Protocol(ProtocolError),

    /// The gateway rejected the CRAM response. Holds the server's error text
    /// when it sent one.
    Auth(String),

    /// The kernel would not grant a receive buffer large enough for the
    /// session, or a session buffer could not be allocated.
    Allocation(String),

    /// The gateway closed the connection (a receive completed with 0 bytes).
    PeerClosed,

    /// An operation was called in the wrong lifecycle state.
    Usage(&'static str),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Resolution(e) => write!(f, "Resolution error: {e}"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Auth(e) => write!(f, "Authentication rejected: {e}"),
            Self::Allocation(e) => write!(f, "Allocation error: {e}"),
            Self::PeerClosed => write!(f, "Gateway closed the connection"),
            Self::Usage(e) => write!(f, "Usage error: {e}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Self::Io(io::Error::from_raw_os_error(e as i32))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// A control line arrived without a key the handshake requires.
    MissingField(&'static str),

    /// The stream ended in the middle of a control line.
    Truncated,

    /// The stream preamble did not start with the DBN magic.
    BadPreamble,

    /// The stream preamble announced a version this client does not speak.
    BadStreamVersion(u8),

    /// A record's length prefix was below the 16-byte record floor.
    RecordLength(u8),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(key) => write!(f, "control line is missing field '{key}'"),
            Self::Truncated => write!(f, "stream ended inside a control line"),
            Self::BadPreamble => write!(f, "stream preamble is not DBN"),
            Self::BadStreamVersion(v) => write!(f, "unsupported DBN stream version {v}"),
            Self::RecordLength(l) => write!(f, "record length prefix {l} is below the record floor"),
        }
    }
}

/// An in-process stand-in for the gateway connection: a connected socket
/// pair whose two ends read and write like the TCP stream they replace.
/// Tests script the gateway's side of the wire on one end and run the
/// client against the other.
pub mod pipe {
    use std::io::{self, Read, Write};
    use std::os::fd::{AsRawFd, RawFd};
    use std::os::unix::net::UnixStream;

    use crate::Error;

    /// One end of the pair. Besides the stream traits it exposes its fd, so
    /// the record reader can be aimed at it the same way it is aimed at a
    /// live socket. Dropping an endpoint closes it, which the other end
    /// observes as peer-close.
    pub struct Endpoint {
        stream: UnixStream,
    }

    /// Builds a connected pair of endpoints.
    pub fn pipe() -> Result<(Endpoint, Endpoint), Error> {
        let (a, b) = UnixStream::pair()?;
        Ok((Endpoint { stream: a }, Endpoint { stream: b }))
    }

    impl Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.stream.read(buf)
        }
    }

    impl Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.stream.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.stream.flush()
        }
    }

    impl AsRawFd for Endpoint {
        fn as_raw_fd(&self) -> RawFd {
            self.stream.as_raw_fd()
        }
    }
}
