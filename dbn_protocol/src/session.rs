// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A single live-data session: one authenticated TCP connection to a
//! dataset's gateway, the framed record reader on top of it, and the
//! caller's two handlers.

use log::*;

use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use nix::sys::socket::{getsockopt, setsockopt, sockopt};

use crate::control::{self, SubscribeRequest};
use crate::record::RecordRef;
use crate::ring::RecordStream;
use crate::{Error, TARGET_RCVBUF};

/// Called once per dispatched record. The record view borrows the receive
/// buffer and is only valid until the handler returns; copy anything that
/// must be retained.
pub type RecordHandler<T> = fn(&mut T, &RecordRef);

/// Called exactly once, with the failing error, before any session
/// operation returns a fatal `Err`.
pub type ErrorHandler<T> = fn(&mut T, &Error);

/// A session moves `fresh -> connected -> started -> closed`; operations
/// called out of order fail with [`Error::Usage`] without touching the
/// handlers. `close()` is idempotent and safe after a failed `connect`.
pub struct Session<T> {
    state: T,
    on_record: RecordHandler<T>,
    on_error: ErrorHandler<T>,
    conn: Option<Conn>,
    reader: Option<RecordStream>,
}

struct Conn {
    stream: Arc<TcpStream>,
    capacity: usize,
    dataset: String,
}

impl<T> Session<T> {
    pub fn new(state: T, on_record: RecordHandler<T>, on_error: ErrorHandler<T>) -> Self {
        Self {
            state,
            on_record,
            on_error,
            conn: None,
            reader: None,
        }
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut T {
        &mut self.state
    }

    /// Resolves the dataset's gateway, connects, claims the kernel receive
    /// buffer the reader needs, and authenticates.
    pub fn connect(&mut self, key: &str, dataset: &str, send_ts_out: bool) -> Result<(), Error> {
        if self.conn.is_some() {
            return Err(Error::Usage("connect on a session that is already connected"));
        }

        match try_connect(key, dataset, send_ts_out) {
            Ok(conn) => {
                self.conn = Some(conn);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Subscribes and tells the gateway to start streaming. After this
    /// returns the record reader owns the socket's receive side.
    pub fn start(
        &mut self,
        schema: &str,
        stype_in: &str,
        symbols: &[String],
        suffix: &str,
        replay: bool,
    ) -> Result<(), Error> {
        if self.reader.is_some() {
            return Err(Error::Usage("start on a session that is already started"));
        }
        let Some(conn) = self.conn.as_ref() else {
            return Err(Error::Usage("start on a session that is not connected"));
        };

        let request = SubscribeRequest {
            schema,
            stype_in,
            symbols,
            suffix,
            replay,
        };

        match try_start(conn, &request) {
            Ok(reader) => {
                info!("[{}] session started", conn.dataset);
                self.reader = Some(reader);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Waits for one receive completion and dispatches its records to the
    /// record handler, in arrival order.
    ///
    /// Returns the number of records dispatched; zero means the wait was
    /// interrupted by a signal (the chance for a driving loop to observe its
    /// stop flag). Peer close and transport failures are fatal.
    pub fn get(&mut self) -> Result<usize, Error> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(Error::Usage("get on a session that is not started"));
        };

        let state = &mut self.state;
        let on_record = self.on_record;

        match reader.poll(|rec| on_record(state, rec)) {
            Ok(count) => Ok(count),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Tears the session down. Idempotent; safe in any lifecycle state.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Shut the socket down before dropping the reader so any receive
            // still posted to the kernel completes instead of landing in a
            // freed buffer.
            let _ = conn.stream.shutdown(Shutdown::Both);
            debug!("[{}] session closed", conn.dataset);
        }
        self.reader = None;
    }

    /// A handle another thread can use to shut the socket down and force a
    /// blocked [`get`](Self::get) to observe peer-close.
    pub fn shutdown_handle(&self) -> Option<Arc<TcpStream>> {
        self.conn.as_ref().map(|conn| conn.stream.clone())
    }

    /// Reports a fatal error through the error handler, then hands it back
    /// for propagation.
    fn fail(&mut self, e: Error) -> Error {
        (self.on_error)(&mut self.state, &e);
        e
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn try_connect(key: &str, dataset: &str, send_ts_out: bool) -> Result<Conn, Error> {
    let addr = control::resolve_gateway(dataset)?;
    let stream = TcpStream::connect(addr)?;

    let capacity = claim_rcvbuf(&stream)?;
    debug!("[{dataset}] kernel granted a {capacity}-byte receive buffer");

    let mut control_stream = &stream;
    control::authenticate(&mut control_stream, key, dataset, send_ts_out)?;
    info!("[{dataset}] authenticated with gateway at {addr}");

    Ok(Conn {
        stream: Arc::new(stream),
        capacity,
        dataset: dataset.to_string(),
    })
}

fn try_start(conn: &Conn, request: &SubscribeRequest) -> Result<RecordStream, Error> {
    let mut stream = conn.stream.as_ref();

    control::subscribe(&mut stream, request)?;
    control::start_session(&mut stream)?;

    RecordStream::new(conn.stream.as_raw_fd(), conn.capacity)
}

/// Asks the kernel for the target receive buffer and reads back the
/// effective grant; that size governs the session's buffer allocation. An
/// effective value below the target fails the connect before any handshake
/// traffic is exchanged.
fn claim_rcvbuf(stream: &TcpStream) -> Result<usize, Error> {
    setsockopt(stream, sockopt::RcvBuf, &TARGET_RCVBUF)?;
    let effective = getsockopt(stream, sockopt::RcvBuf)?;

    if effective < TARGET_RCVBUF {
        return Err(Error::Allocation(format!(
            "kernel clamped SO_RCVBUF to {effective} bytes ({TARGET_RCVBUF} required); \
             raise net.core.rmem_max"
        )));
    }

    Ok(effective)
}
