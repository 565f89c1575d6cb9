// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Parser for the OCC 21-character option symbol: a six-character
//! space-padded root, the expiration date as YYMMDD, a put/call flag, and an
//! eight-digit strike in thousandths of a dollar.

/// Exact length of an encoded OSI symbol.
pub const OSI_LEN: usize = 21;

/// Strike digits encode thousandths of a dollar; scale to nano-dollars.
const STRIKE_SCALE: u64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutCall {
    Call,
    Put,
}

/// A decoded OSI symbol. The root is stored trimmed of its space padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OsiSymbol {
    pub root: String,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub put_call: PutCall,
    /// Strike price in nano-dollars.
    pub strike: u64,
}

impl OsiSymbol {
    /// Parses an OSI symbol. Returns None for anything that is not exactly
    /// the fixed 21-character layout; mapping streams carry plenty of
    /// non-option symbols and those are simply not options.
    pub fn parse(symbol: &str) -> Option<Self> {
        let bytes = symbol.as_bytes();
        if bytes.len() != OSI_LEN || !symbol.is_ascii() {
            return None;
        }

        let root = symbol[..6].trim_end_matches(' ');
        if root.is_empty() || !root.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }

        let year = 2000 + two_digits(&bytes[6..8])? as u16;
        let month = two_digits(&bytes[8..10])?;
        if !(1..=12).contains(&month) {
            return None;
        }
        let day = two_digits(&bytes[10..12])?;
        if !(1..=31).contains(&day) {
            return None;
        }

        let put_call = match bytes[12] {
            b'C' => PutCall::Call,
            b'P' => PutCall::Put,
            _ => return None,
        };

        let mut strike: u64 = 0;
        for &digit in &bytes[13..21] {
            if !digit.is_ascii_digit() {
                return None;
            }
            strike = strike * 10 + u64::from(digit - b'0');
        }

        Some(Self {
            root: root.to_string(),
            year,
            month,
            day,
            put_call,
            strike: strike * STRIKE_SCALE,
        })
    }
}

fn two_digits(bytes: &[u8]) -> Option<u8> {
    if !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
        return None;
    }
    Some((bytes[0] - b'0') * 10 + (bytes[1] - b'0'))
}
