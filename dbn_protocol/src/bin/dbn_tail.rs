// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Subscribes to a live dataset across one or more parallel sessions and
//! counts the records each schema delivers until interrupted.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;

use dbn_protocol::group::{SessionConfig, SessionGroup};
use dbn_protocol::record::{rtype, RecordRef};
use dbn_protocol::Error;

#[derive(Parser)]
struct Cli {
    /// Dataset to subscribe to, e.g. OPRA.PILLAR.
    #[arg(long)]
    dataset: String,

    #[arg(long, default_value = "cmbp-1")]
    schema: String,

    #[arg(long, default_value = "raw_symbol")]
    stype_in: String,

    /// File with one symbol per line; omit to subscribe to ALL_SYMBOLS.
    #[arg(long)]
    symbol_file: Option<PathBuf>,

    /// Suffix appended to every symbol, e.g. an exchange qualifier.
    #[arg(long, default_value = "")]
    suffix: String,

    /// Number of parallel sessions; symbols are dealt round-robin.
    #[arg(long, default_value_t = 1)]
    sessions: usize,

    /// File holding the API key; falls back to $DATABENTO_API_KEY.
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Replay the gateway's intraday buffer from the start.
    #[arg(long)]
    replay: bool,

    /// Ask the gateway to append its send timestamp to every record.
    #[arg(long)]
    ts_out: bool,
}

#[derive(Default)]
struct Stats {
    total: AtomicU64,
    cmbp1: AtomicU64,
    bbo: AtomicU64,
    symbol_mappings: AtomicU64,
    definitions: AtomicU64,
    system: AtomicU64,
    errors: AtomicU64,
    other: AtomicU64,
}

impl Stats {
    fn count(&self, rec: &RecordRef) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match rec.rtype() {
            rtype::CMBP_1 => &self.cmbp1,
            rtype::BBO_1S | rtype::BBO_1M | rtype::TCBBO | rtype::CBBO_1S | rtype::CBBO_1M => {
                &self.bbo
            }
            rtype::SYMBOL_MAPPING => &self.symbol_mappings,
            rtype::INSTRUMENT_DEF => &self.definitions,
            rtype::SYSTEM => &self.system,
            rtype::ERROR => &self.errors,
            _ => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn on_record(stats: &mut Arc<Stats>, rec: &RecordRef) {
    stats.count(rec);
}

fn on_error(_stats: &mut Arc<Stats>, e: &Error) {
    match e {
        // Expected when the group shuts the socket down under us:
        Error::PeerClosed => log::debug!("session receive path closed: {e}"),
        _ => log::error!("session error: {e}"),
    }
}

fn main() {
    env_logger::init();

    let args = Cli::parse();
    if let Err(e) = run(&args) {
        eprintln!("dbn_tail: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let key = read_api_key(args.key_file.as_deref())?;
    let symbols = match args.symbol_file.as_deref() {
        Some(path) => read_symbol_file(path)?,
        None => Vec::new(),
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))?;
    }

    let stats = Arc::new(Stats::default());
    let mut group = SessionGroup::new();

    for chunk in deal_symbols(&symbols, args.sessions) {
        group.connect_and_start(
            SessionConfig {
                key: key.clone(),
                dataset: args.dataset.clone(),
                send_ts_out: args.ts_out,
                schema: args.schema.clone(),
                stype_in: args.stype_in.clone(),
                symbols: chunk,
                suffix: args.suffix.clone(),
                replay: args.replay,
            },
            stats.clone(),
            on_record,
            on_error,
        )?;
    }

    while !group.is_fully_subscribed() && !stop.load(Ordering::Acquire) {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    log::info!("all {} sessions subscribed", group.num_sessions());

    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    group.close_all();
    print_stats(&stats);

    Ok(())
}

/// Deals the symbol list round-robin into `sessions` lists. With no symbols
/// every session subscribes to the whole dataset.
fn deal_symbols(symbols: &[String], sessions: usize) -> Vec<Vec<String>> {
    let sessions = sessions.max(1);
    let mut dealt = vec![Vec::new(); sessions];

    for (i, symbol) in symbols.iter().enumerate() {
        dealt[i % sessions].push(symbol.clone());
    }

    dealt
}

fn read_api_key(path: Option<&Path>) -> io::Result<String> {
    let raw = match path {
        Some(path) => {
            let mut contents = String::new();
            std::fs::File::open(path)?.read_to_string(&mut contents)?;
            contents
        }
        None => std::env::var("DATABENTO_API_KEY").map_err(|_| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "no --key-file and DATABENTO_API_KEY is unset",
            )
        })?,
    };

    Ok(raw.trim().to_string())
}

/// Reads a symbol list: one symbol per line, empty lines skipped, lines
/// longer than 63 bytes truncated.
fn read_symbol_file(path: &Path) -> io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;

    Ok(contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| String::from_utf8_lossy(&line.as_bytes()[..line.len().min(63)]).into_owned())
        .collect())
}

fn print_stats(stats: &Stats) {
    let rows = [
        ("cmbp-1", stats.cmbp1.load(Ordering::Relaxed)),
        ("bbo/cbbo", stats.bbo.load(Ordering::Relaxed)),
        ("symbol mappings", stats.symbol_mappings.load(Ordering::Relaxed)),
        ("definitions", stats.definitions.load(Ordering::Relaxed)),
        ("system", stats.system.load(Ordering::Relaxed)),
        ("errors", stats.errors.load(Ordering::Relaxed)),
        ("other", stats.other.load(Ordering::Relaxed)),
    ];

    println!("records received: {}", stats.total.load(Ordering::Relaxed));
    for (name, count) in rows {
        if count > 0 {
            println!("  {name:<16} {count}");
        }
    }
}
