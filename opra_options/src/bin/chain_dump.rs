// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Runs an option-discovery replay to completion and prints the resulting
//! chain: every root, how many options it carries, and how many of those
//! were matched to a security definition.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::Parser;

use opra_options::discovery::{DiscoveryState, OptionDiscovery};

#[derive(Parser)]
struct Cli {
    /// File holding the API key; falls back to $DATABENTO_API_KEY.
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Only print the N roots with the most options (0 prints all).
    #[arg(long, default_value_t = 0)]
    top: usize,
}

fn main() {
    env_logger::init();

    let args = Cli::parse();
    if let Err(e) = run(&args) {
        eprintln!("chain_dump: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let key = read_api_key(args.key_file.as_deref())?;

    let mut discovery = OptionDiscovery::new();
    discovery.start(&key)?;

    match discovery.wait() {
        DiscoveryState::Done => {}
        DiscoveryState::Error => {
            let detail = discovery
                .error()
                .unwrap_or_else(|| "replay failed".to_string());
            return Err(detail.into());
        }
        other => return Err(format!("replay stopped in state {other:?}").into()),
    }

    print_chain(&discovery, args.top);
    Ok(())
}

fn print_chain(discovery: &OptionDiscovery, top: usize) {
    let book = discovery.book();
    let catalog = book.catalog();
    let buckets = book.buckets();

    let mut rows: Vec<(&str, usize, usize)> = catalog
        .roots()
        .iter()
        .map(|root| {
            let linked = root
                .options
                .iter()
                .filter(|option| option.sdef_slot.is_some())
                .count();
            (root.root.as_str(), root.options.len(), linked)
        })
        .collect();

    if top > 0 {
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(top);
    }

    println!(
        "{} roots, {} definitions retained",
        catalog.len(),
        buckets.len()
    );
    for (root, options, linked) in rows {
        println!("  {root:<6} {options:>7} options, {linked:>7} with definitions");
    }
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
