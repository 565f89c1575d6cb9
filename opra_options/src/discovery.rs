// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Option discovery: replays the OPRA definition stream once, indexes every
//! option symbol under its root, retains the security definitions, and
//! cross-references the two when the replay ends.

use log::*;

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use dbn_protocol::record::{RecordRef, RecordView, SecurityDef};
use dbn_protocol::session::Session;
use dbn_protocol::Error;

use crate::catalog::{InstrumentBuckets, RootCatalog};
use crate::osi::OsiSymbol;

/// The dataset that carries the OPRA definition replay.
pub const DISCOVERY_DATASET: &str = "OPRA.PILLAR";

const DEFINITION_SCHEMA: &str = "definition";
const PARENT_SYMBOLOGY: &str = "parent";

/// System-channel text marking the end of the bounded definition replay.
const REPLAY_DONE: &str = "Finished definition replay";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryState {
    NotStarted,
    Connected,
    Subscribed,
    Xref,
    Done,
    Error,
}

/// The replay bookkeeping and its state machine. Driven one record at a
/// time by [`apply`](Self::apply); separated from the session plumbing so a
/// replay can be fed from a canned record stream in tests.
pub struct OptionBook {
    state: DiscoveryState,
    catalog: RootCatalog,
    buckets: InstrumentBuckets,
    error: Option<String>,
    stopping: bool,
}

impl OptionBook {
    pub fn new() -> Self {
        Self {
            state: DiscoveryState::NotStarted,
            catalog: RootCatalog::new(),
            buckets: InstrumentBuckets::new(),
            error: None,
            stopping: false,
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn catalog(&self) -> &RootCatalog {
        &self.catalog
    }

    pub fn buckets(&self) -> &InstrumentBuckets {
        &self.buckets
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Applies one replay record.
    ///
    /// Mapping records whose output symbol parses as OSI are indexed under
    /// their root; everything else in the mapping stream is ignored.
    /// Definition records are copied out of the receive buffer by value. The
    /// replay-done system notice moves the book to the cross-reference
    /// phase, and a gateway error record poisons it.
    pub fn apply(&mut self, rec: &RecordRef) {
        match rec.view() {
            RecordView::SymbolMapping(mapping) => {
                if let Some(osi) = OsiSymbol::parse(mapping.stype_out_symbol()) {
                    self.catalog.add_option(rec.instrument_id(), osi);
                }
            }
            RecordView::InstrumentDef(def) => {
                self.buckets.insert(SecurityDef::copy_of(&def));
            }
            RecordView::System(system) => {
                if system.text() == REPLAY_DONE && self.state == DiscoveryState::Subscribed {
                    debug!(
                        "definition replay finished: {} roots, {} definitions",
                        self.catalog.len(),
                        self.buckets.len()
                    );
                    self.state = DiscoveryState::Xref;
                }
            }
            RecordView::Error(error) => {
                warn!("gateway reported: {}", error.text());
                self.fail(error.text().to_string());
            }
            RecordView::Other { .. } => {}
        }
    }

    /// Called by the driver once the subscribe phase is over and replay
    /// records are about to flow.
    pub fn begin_replay(&mut self) {
        if matches!(
            self.state,
            DiscoveryState::NotStarted | DiscoveryState::Connected
        ) {
            self.state = DiscoveryState::Subscribed;
        }
    }

    /// Runs the cross-reference and completes the book. Returns the number
    /// of options that found their definition.
    pub fn finish(&mut self) -> usize {
        let linked = self.catalog.cross_reference(&self.buckets);
        self.state = DiscoveryState::Done;
        linked
    }

    fn fail(&mut self, message: String) {
        if self.state != DiscoveryState::Done {
            self.error = Some(message);
            self.state = DiscoveryState::Error;
        }
    }
}

impl Default for OptionBook {
    fn default() -> Self {
        Self::new()
    }
}

type SharedBook = Arc<Mutex<OptionBook>>;

/// Owns a live session against [`DISCOVERY_DATASET`] and a worker thread
/// that drives the replay into an [`OptionBook`].
pub struct OptionDiscovery {
    book: SharedBook,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    conn: Option<Arc<TcpStream>>,
}

impl OptionDiscovery {
    pub fn new() -> Self {
        Self {
            book: Arc::new(Mutex::new(OptionBook::new())),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            conn: None,
        }
    }

    /// Connects to the OPRA gateway on the calling thread, then launches the
    /// replay worker. Authentication failures surface here; everything later
    /// lands in the book's error state.
    pub fn start(&mut self, key: &str) -> Result<(), Error> {
        if self.worker.is_some() {
            return Err(Error::Usage("discovery is already started"));
        }

        let mut session = Session::new(self.book.clone(), on_record, on_error);
        session.connect(key, DISCOVERY_DATASET, false)?;
        self.book.lock().unwrap().state = DiscoveryState::Connected;

        self.conn = session.shutdown_handle();
        let stop = self.stop.clone();
        let book = self.book.clone();
        self.worker = Some(std::thread::spawn(move || run_replay(session, book, stop)));

        Ok(())
    }

    pub fn state(&self) -> DiscoveryState {
        self.book.lock().unwrap().state()
    }

    pub fn error(&self) -> Option<String> {
        self.book.lock().unwrap().error().map(str::to_string)
    }

    /// Blocks until the replay worker finishes, then reports the final
    /// state (`Done`, or `Error` if the replay died).
    pub fn wait(&mut self) -> DiscoveryState {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.state()
    }

    /// Locks the book for inspection. Hold the guard briefly; the replay
    /// worker blocks on it between records.
    pub fn book(&self) -> MutexGuard<'_, OptionBook> {
        self.book.lock().unwrap()
    }

    /// Stops the worker, closes the session, keeps whatever the book holds.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.book.lock().unwrap().stopping = true;

        if let Some(conn) = self.conn.take() {
            let _ = conn.shutdown(Shutdown::Both);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Default for OptionDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OptionDiscovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn on_record(book: &mut SharedBook, rec: &RecordRef) {
    book.lock().unwrap().apply(rec);
}

fn on_error(book: &mut SharedBook, e: &Error) {
    let mut book = book.lock().unwrap();
    // A peer-close forced by shutdown() is not a replay failure:
    if book.stopping {
        return;
    }
    match book.state() {
        DiscoveryState::Xref | DiscoveryState::Done => {}
        _ => book.fail(e.to_string()),
    }
}

fn run_replay(mut session: Session<SharedBook>, book: SharedBook, stop: Arc<AtomicBool>) {
    if session
        .start(DEFINITION_SCHEMA, PARENT_SYMBOLOGY, &[], "", true)
        .is_err()
    {
        // on_error already moved the book to its error state.
        return;
    }
    book.lock().unwrap().begin_replay();

    while !stop.load(Ordering::Acquire) {
        if book.lock().unwrap().state() != DiscoveryState::Subscribed {
            break;
        }
        if session.get().is_err() {
            break;
        }
    }

    {
        let mut book = book.lock().unwrap();
        if book.state() == DiscoveryState::Xref {
            let linked = book.finish();
            info!("cross-reference complete: {linked} options linked");
        }
    }

    session.close();
}
