// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Exercises the double-buffered record reader against a socketpair,
//! including carry-over of records that a read boundary cuts in half.

use std::io::Write;
use std::os::fd::AsRawFd;

use dbn_protocol::pipe::pipe;
use dbn_protocol::record::{rtype, LENGTH_UNIT};
use dbn_protocol::ring::RecordStream;
use dbn_protocol::{Error, ProtocolError};

const CAPACITY: usize = 8192;

fn record(units: u8, rt: u8, instrument_id: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; units as usize * LENGTH_UNIT];
    bytes[0] = units;
    bytes[1] = rt;
    bytes[4..8].copy_from_slice(&instrument_id.to_le_bytes());
    bytes
}

#[test]
fn a_batch_dispatches_in_order_without_leftover() {
    let (reader_end, mut writer) = pipe().unwrap();
    let mut stream = RecordStream::new(reader_end.as_raw_fd(), CAPACITY).unwrap();

    let mut batch = Vec::new();
    for id in 1..=4 {
        batch.extend(record(4 + id as u8, rtype::CMBP_1, id));
    }
    writer.write_all(&batch).unwrap();

    let mut seen = Vec::new();
    let count = stream.poll(|rec| seen.push(rec.instrument_id())).unwrap();

    assert_eq!(count, 4);
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert_eq!(stream.leftover(), 0);
}

#[test]
fn a_record_cut_by_the_read_boundary_is_carried_over() {
    let (reader_end, mut writer) = pipe().unwrap();
    let mut stream = RecordStream::new(reader_end.as_raw_fd(), CAPACITY).unwrap();

    let a = record(4, rtype::CMBP_1, 1);
    let b = record(4, rtype::CMBP_1, 2);
    let c = record(6, rtype::CMBP_1, 3);

    // First read: all of A plus the first half of B.
    let mut first = a.clone();
    first.extend(&b[..8]);
    writer.write_all(&first).unwrap();

    let mut seen = Vec::new();
    let count = stream.poll(|rec| seen.push(rec.instrument_id())).unwrap();
    assert_eq!(count, 1);
    assert_eq!(seen, vec![1]);
    assert_eq!(stream.leftover(), 8);

    // Second read: the rest of B, then C.
    let mut second = b[8..].to_vec();
    second.extend(&c);
    writer.write_all(&second).unwrap();

    let count = stream.poll(|rec| seen.push(rec.instrument_id())).unwrap();
    assert_eq!(count, 2);
    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(stream.leftover(), 0);
}

#[test]
fn odd_chunk_boundaries_never_reorder_or_duplicate() {
    let (reader_end, mut writer) = pipe().unwrap();
    let mut stream = RecordStream::new(reader_end.as_raw_fd(), CAPACITY).unwrap();

    let mut bytes = Vec::new();
    for id in 1..=10 {
        bytes.extend(record(5, rtype::BBO_1S, id));
    }

    // Deliver in chunks that cut headers and bodies alike.
    let splits = [7usize, 33, 100, bytes.len()];
    let mut seen = Vec::new();
    let mut from = 0;

    for to in splits {
        writer.write_all(&bytes[from..to]).unwrap();
        from = to;
        stream.poll(|rec| seen.push(rec.instrument_id())).unwrap();
    }

    assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    assert_eq!(stream.leftover(), 0);
}

#[test]
fn a_short_length_prefix_fails_without_dispatching() {
    let (reader_end, mut writer) = pipe().unwrap();
    let mut stream = RecordStream::new(reader_end.as_raw_fd(), CAPACITY).unwrap();

    let mut bad = vec![0u8; 16];
    bad[0] = 3; // 12 bytes, below the record floor
    bad[1] = rtype::CMBP_1;
    writer.write_all(&bad).unwrap();

    let mut dispatched = 0;
    let err = stream.poll(|_| dispatched += 1).unwrap_err();

    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::RecordLength(3))
    ));
    assert_eq!(dispatched, 0);
}

#[test]
fn peer_close_surfaces_as_such() {
    let (reader_end, writer) = pipe().unwrap();
    let mut stream = RecordStream::new(reader_end.as_raw_fd(), CAPACITY).unwrap();

    drop(writer);

    let err = stream.poll(|_| ()).unwrap_err();
    assert!(matches!(err, Error::PeerClosed));
}

#[test]
fn a_tiny_capacity_is_refused() {
    let (reader_end, _writer) = pipe().unwrap();
    let err = RecordStream::new(reader_end.as_raw_fd(), 1024).unwrap_err();
    assert!(matches!(err, Error::Allocation(_)));
}
