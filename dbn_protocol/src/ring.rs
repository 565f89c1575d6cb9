// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The framed record reader: a double-buffered io_uring receive path that
//! splits the socket's byte stream into records and hands each one to a
//! sink, in arrival order, without copying record bodies.
//!
//! Two receive buffers are flown against the socket. While user space drains
//! one completion, the other buffer stays posted so the kernel keeps
//! receiving. A record that TCP segmentation cut at a completion boundary is
//! carried over and re-assembled in front of the next completion's payload;
//! gateway packets are normally record-aligned, so that path is rare.

use std::io;
use std::os::fd::RawFd;

use io_uring::{opcode, types, IoUring};
use log::*;

use crate::record::{self, RecordRef, MAX_RECORD_BYTES};
use crate::Error;

/// One buffer is being drained in user space while the other is posted.
const NUM_BUFFERS: usize = 2;

/// Submission-queue depth. Only [`NUM_BUFFERS`] receives are ever in flight.
const RING_DEPTH: u32 = 8;

pub struct RecordStream {
    ring: IoUring,
    fd: RawFd,
    buffers: [Box<[u8]>; NUM_BUFFERS],
    carry: Box<[u8]>,
    leftover: usize,
    capacity: usize,
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("fd", &self.fd)
            .field("leftover", &self.leftover)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl RecordStream {
    /// Sets up the completion ring against an already-streaming socket and
    /// posts receives for both buffers.
    ///
    /// The caller keeps ownership of the socket and must keep it open for
    /// the life of this reader.
    pub fn new(fd: RawFd, capacity: usize) -> Result<Self, Error> {
        // The carry-over prepend needs headroom for one maximum-size record
        // below capacity; see poll().
        if capacity <= 2 * MAX_RECORD_BYTES {
            return Err(Error::Allocation(format!(
                "receive buffer capacity {capacity} cannot hold a carried-over record"
            )));
        }

        let ring = IoUring::new(RING_DEPTH)?;

        let mut stream = Self {
            ring,
            fd,
            buffers: [
                vec![0; capacity].into_boxed_slice(),
                vec![0; capacity].into_boxed_slice(),
            ],
            carry: vec![0; capacity].into_boxed_slice(),
            leftover: 0,
            capacity,
        };

        for index in 0..NUM_BUFFERS {
            stream.post_recv(index);
        }
        stream.ring.submit()?;

        Ok(stream)
    }

    /// Bytes held over from the last completion, waiting for the rest of a
    /// record.
    pub fn leftover(&self) -> usize {
        self.leftover
    }

    /// Waits for one receive completion and dispatches every complete record
    /// in it through `emit`, in arrival order.
    ///
    /// Returns the number of records dispatched. Zero means the wait was
    /// interrupted by a signal before a completion arrived; the caller can
    /// use that to observe a stop flag. A completion of zero bytes means the
    /// gateway closed the connection.
    pub fn poll<F>(&mut self, mut emit: F) -> Result<usize, Error>
    where
        F: FnMut(&RecordRef),
    {
        if let Err(e) = self.ring.submit_and_wait(1) {
            return match nix::errno::Errno::from_raw(e.raw_os_error().unwrap_or(0)) {
                // A signal landed before any completion; not an error:
                nix::Error::EINTR => Ok(0),
                _ => Err(Error::Io(e)),
            };
        }

        let cqe = self
            .ring
            .completion()
            .next()
            .expect("woken with an empty completion queue");

        let index = cqe.user_data() as usize;
        let result = cqe.result();
        trace!("completion for buffer {index}: {result}");

        if result == 0 {
            return Err(Error::PeerClosed);
        }
        if result < 0 {
            return match nix::errno::Errno::from_raw(-result) {
                // The receive itself was interrupted; re-arm it and let the
                // caller observe its stop flag:
                nix::Error::EINTR => {
                    self.post_recv(index);
                    Ok(0)
                }
                _ => Err(Error::Io(io::Error::from_raw_os_error(-result))),
            };
        }

        let mut filled = result as usize;

        // Re-assemble a record the previous completion cut short: shift the
        // new payload right and lay the carried bytes in front of it. The
        // receive was posted with enough headroom that this cannot overflow.
        if self.leftover > 0 {
            let buf = &mut self.buffers[index];
            buf.copy_within(0..filled, self.leftover);
            buf[..self.leftover].copy_from_slice(&self.carry[..self.leftover]);
            filled += self.leftover;
            self.leftover = 0;
        }

        let buf = &self.buffers[index];
        let (count, consumed) =
            record::split_records(&buf[..filled], &mut emit).map_err(Error::Protocol)?;

        let tail = filled - consumed;
        if tail > 0 {
            trace!("carrying {tail} bytes into the next completion");
            self.carry[..tail].copy_from_slice(&self.buffers[index][consumed..filled]);
        }
        self.leftover = tail;

        self.post_recv(index);

        Ok(count)
    }

    /// Posts a receive for the buffer identified by `index`, tagged with
    /// that identity so the completion can be attributed back to it.
    ///
    /// The posted length leaves one maximum-size record of headroom so the
    /// carry-over prepend in poll() always fits.
    ///
    /// TODO: register the two buffers with the kernel (RecvFixed) so the
    /// completion path skips the per-receive buffer lookup.
    fn post_recv(&mut self, index: usize) {
        let len = (self.capacity - MAX_RECORD_BYTES) as u32;
        let ptr = self.buffers[index].as_mut_ptr();

        let entry = opcode::Recv::new(types::Fd(self.fd), ptr, len)
            .build()
            .user_data(index as u64);

        // SAFETY: the buffer is owned by self and is not read or re-posted
        // until the completion carrying this tag has been consumed.
        unsafe {
            self.ring
                .submission()
                .push(&entry)
                .expect("submission queue is full");
        }
    }
}
