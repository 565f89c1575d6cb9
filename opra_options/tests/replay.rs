// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Feeds canned definition-replay record streams through the option book
//! and checks the state machine and the resulting chain.

use dbn_protocol::record::{rtype, RecordRef};

use opra_options::discovery::{DiscoveryState, OptionBook};

fn header(bytes: &mut [u8], rt: u8, instrument_id: u32) {
    bytes[0] = (bytes.len() / 4) as u8;
    bytes[1] = rt;
    bytes[4..8].copy_from_slice(&instrument_id.to_le_bytes());
}

/// A symbol-mapping record whose output symbol is `symbol`.
fn mapping(instrument_id: u32, symbol: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; 76];
    header(&mut bytes, rtype::SYMBOL_MAPPING, instrument_id);
    bytes[38..38 + symbol.len()].copy_from_slice(symbol.as_bytes());
    bytes
}

fn definition(instrument_id: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; 40];
    header(&mut bytes, rtype::INSTRUMENT_DEF, instrument_id);
    bytes
}

fn system(text: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; 80];
    header(&mut bytes, rtype::SYSTEM, 0);
    bytes[16..16 + text.len()].copy_from_slice(text.as_bytes());
    bytes
}

fn gateway_error(text: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; 80];
    header(&mut bytes, rtype::ERROR, 0);
    bytes[16..16 + text.len()].copy_from_slice(text.as_bytes());
    bytes
}

fn apply(book: &mut OptionBook, bytes: &[u8]) {
    book.apply(&RecordRef::new(bytes).unwrap());
}

#[test]
fn a_replay_builds_a_sorted_cross_referenced_chain() {
    let mut book = OptionBook::new();
    book.begin_replay();
    assert_eq!(book.state(), DiscoveryState::Subscribed);

    apply(&mut book, &mapping(1, "SPY   250117C00480000"));
    apply(&mut book, &mapping(2, "AAPL  250117C00200000"));
    apply(&mut book, &mapping(3, "SPY   250117P00480000"));
    apply(&mut book, &definition(1));
    apply(&mut book, &definition(3));
    apply(&mut book, &system("Finished definition replay"));

    assert_eq!(book.state(), DiscoveryState::Xref);

    let linked = book.finish();
    assert_eq!(book.state(), DiscoveryState::Done);
    assert_eq!(linked, 2);

    let roots: Vec<&str> = book
        .catalog()
        .roots()
        .iter()
        .map(|root| root.root.as_str())
        .collect();
    assert_eq!(roots, vec!["AAPL", "SPY"]);

    let spy = book.catalog().find("SPY").unwrap();
    assert_eq!(spy.options.len(), 2);
    assert_eq!(
        spy.options[0]
            .definition(book.buckets())
            .unwrap()
            .instrument_id,
        1
    );
    assert_eq!(
        spy.options[1]
            .definition(book.buckets())
            .unwrap()
            .instrument_id,
        3
    );

    // AAPL's definition never arrived, so its option stays unlinked:
    let aapl = book.catalog().find("AAPL").unwrap();
    assert_eq!(aapl.options.len(), 1);
    assert!(aapl.options[0].definition(book.buckets()).is_none());
}

#[test]
fn non_osi_mappings_are_ignored() {
    let mut book = OptionBook::new();
    book.begin_replay();

    apply(&mut book, &mapping(1, "SPY"));
    apply(&mut book, &mapping(2, "not an option symbol"));
    apply(&mut book, &mapping(3, "SPY   250117C00480000"));

    assert_eq!(book.catalog().len(), 1);
    assert_eq!(book.catalog().find("SPY").unwrap().options.len(), 1);
}

#[test]
fn the_replay_done_notice_only_counts_once_subscribed() {
    let mut book = OptionBook::new();

    apply(&mut book, &system("Finished definition replay"));
    assert_eq!(book.state(), DiscoveryState::NotStarted);

    book.begin_replay();
    apply(&mut book, &system("heartbeat"));
    assert_eq!(book.state(), DiscoveryState::Subscribed);

    apply(&mut book, &system("Finished definition replay"));
    assert_eq!(book.state(), DiscoveryState::Xref);
}

#[test]
fn a_gateway_error_record_poisons_the_replay() {
    let mut book = OptionBook::new();
    book.begin_replay();

    apply(&mut book, &mapping(1, "SPY   250117C00480000"));
    apply(&mut book, &gateway_error("subscription rejected"));

    assert_eq!(book.state(), DiscoveryState::Error);
    assert_eq!(book.error(), Some("subscription rejected"));
}

#[test]
fn interleavings_always_yield_byte_sorted_unique_roots() {
    let symbols = [
        "QQQ   250117C00400000",
        "AAPL  250117C00200000",
        "SPY   250117C00480000",
        "AAPL  250117P00200000",
        "MSFT  250117C00420000",
        "QQQ   250117P00400000",
    ];

    // Same multiset of roots, two different arrival orders:
    let mut forward = OptionBook::new();
    forward.begin_replay();
    for (id, symbol) in symbols.iter().enumerate() {
        apply(&mut forward, &mapping(id as u32, symbol));
    }

    let mut reverse = OptionBook::new();
    reverse.begin_replay();
    for (id, symbol) in symbols.iter().enumerate().rev() {
        apply(&mut reverse, &mapping(id as u32, symbol));
    }

    let expected = vec!["AAPL", "MSFT", "QQQ", "SPY"];
    for book in [&forward, &reverse] {
        let roots: Vec<&str> = book
            .catalog()
            .roots()
            .iter()
            .map(|root| root.root.as_str())
            .collect();
        assert_eq!(roots, expected);
    }
}
