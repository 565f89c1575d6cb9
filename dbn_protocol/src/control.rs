// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The gateway control channel: a line-oriented, pipe-delimited key-value
//! protocol used only while a session is being set up. Every function here is
//! generic over `Read + Write` so the handshake can be driven over a
//! socketpair in tests.

use log::*;

use std::io::{Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};

use hex::ToHex;
use sha2::{Digest, Sha256};

use crate::{Error, ProtocolError, BUCKET_ID_LEN, GATEWAY_DOMAIN, GATEWAY_PORT};

/// Sentinel symbol that subscribes to the dataset's entire universe.
pub const ALL_SYMBOLS: &str = "ALL_SYMBOLS";

/// The gateway caps how many symbols one subscribe line may carry.
const SYMBOL_CHUNK: usize = 1000;

/// Stream version this client speaks. Byte 3 of the preamble must match.
const DBN_STREAM_VERSION: u8 = 1;

/// One subscription request: which schema to receive, the symbology the
/// symbols are expressed in, and the symbols themselves. An empty symbol
/// list subscribes to [`ALL_SYMBOLS`]. `suffix` is appended verbatim to each
/// explicit symbol; `replay` asks the gateway to start from the beginning of
/// its intraday buffer.
pub struct SubscribeRequest<'a> {
    pub schema: &'a str,
    pub stype_in: &'a str,
    pub symbols: &'a [String],
    pub suffix: &'a str,
    pub replay: bool,
}

/// Builds the gateway FQDN for a dataset: dots become hyphens under the
/// gateway domain, e.g. `OPRA.PILLAR` -> `OPRA-PILLAR.lsg.databento.com`.
pub fn gateway_fqdn(dataset: &str) -> String {
    format!("{}.{GATEWAY_DOMAIN}", dataset.replace('.', "-"))
}

/// Resolves a dataset's gateway to an IPv4 socket address.
pub fn resolve_gateway(dataset: &str) -> Result<SocketAddr, Error> {
    let fqdn = gateway_fqdn(dataset);

    let mut addrs = (fqdn.as_str(), GATEWAY_PORT)
        .to_socket_addrs()
        .map_err(|e| Error::Resolution(format!("{fqdn}: {e}")))?;

    addrs
        .find(|addr| addr.is_ipv4())
        .ok_or_else(|| Error::Resolution(format!("{fqdn}: no IPv4 address")))
}

/// Runs the CRAM handshake on a freshly connected gateway stream.
///
/// The gateway sends a version line and a challenge line; the client answers
/// with a digest of the challenge and its API key, and the gateway reports
/// success or failure. Anything other than `success=1` is an authentication
/// error.
pub fn authenticate<S: Read + Write>(
    stream: &mut S,
    key: &str,
    dataset: &str,
    send_ts_out: bool,
) -> Result<(), Error> {
    let greeting = read_line(stream)?;
    require_field(&greeting, "lsg_version")?;
    debug!("[{dataset}] greeting: {greeting}");

    let challenge = read_line(stream)?;
    let cram = require_field(&challenge, "cram")?;
    trace!("[{dataset}] challenge: {cram}");

    let reply = auth_line(cram, key, dataset, send_ts_out);
    stream.write_all(reply.as_bytes())?;

    let result = read_line(stream)?;
    let success = require_field(&result, "success")?;
    if success != "1" {
        let detail = field(&result, "error").unwrap_or(&result);
        return Err(Error::Auth(detail.to_string()));
    }

    debug!("[{dataset}] authenticated");
    Ok(())
}

/// Sends the subscribe line (or lines) for one request.
///
/// Explicit symbols are chunked in caller order; `is_last=1` marks the final
/// chunk so the gateway knows when the subscription is complete. The
/// all-symbols form is a single line and carries no `is_last` field.
pub fn subscribe<S: Write>(stream: &mut S, req: &SubscribeRequest) -> Result<(), Error> {
    let start = if req.replay { "|start=0" } else { "" };

    if req.symbols.is_empty() {
        let line = format!(
            "schema={}|stype_in={}{start}|symbols={ALL_SYMBOLS}\n",
            req.schema, req.stype_in
        );
        stream.write_all(line.as_bytes())?;
        return Ok(());
    }

    let chunks = req.symbols.chunks(SYMBOL_CHUNK);
    let last_chunk = chunks.len() - 1;

    for (index, chunk) in chunks.enumerate() {
        let mut line = format!(
            "schema={}|stype_in={}{start}|is_last={}|symbols=",
            req.schema,
            req.stype_in,
            (index == last_chunk) as u8,
        );

        for (i, symbol) in chunk.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(symbol);
            line.push_str(req.suffix);
        }
        line.push('\n');

        debug!("subscribing {} symbols (chunk {index})", chunk.len());
        stream.write_all(line.as_bytes())?;
    }

    Ok(())
}

/// Tells the gateway to start streaming, then consumes the stream preamble
/// so the next byte on the socket is the first record's length prefix.
pub fn start_session<S: Read + Write>(stream: &mut S) -> Result<(), Error> {
    stream.write_all(b"start_session=0\n")?;
    read_preamble(stream)
}

/// Reads the 8-byte preamble ("DBN", version, little-endian header length)
/// and discards the metadata header it announces. The header content only
/// matters to consumers that persist the stream.
fn read_preamble<S: Read>(stream: &mut S) -> Result<(), Error> {
    let mut preamble = [0u8; 8];
    read_exact_or_closed(stream, &mut preamble)?;

    if &preamble[..3] != b"DBN" {
        return Err(Error::Protocol(ProtocolError::BadPreamble));
    }
    if preamble[3] != DBN_STREAM_VERSION {
        return Err(Error::Protocol(ProtocolError::BadStreamVersion(preamble[3])));
    }

    let header_len = u32::from_le_bytes(preamble[4..8].try_into().unwrap()) as usize;
    trace!("skipping {header_len} bytes of stream metadata");

    let mut remaining = header_len;
    let mut skip = [0u8; 512];
    while remaining > 0 {
        let take = remaining.min(skip.len());
        read_exact_or_closed(stream, &mut skip[..take])?;
        remaining -= take;
    }

    Ok(())
}

/// Formats the CRAM reply line: the lowercase hex SHA-256 of
/// `challenge|key`, a bucket id made of the key's last characters, and the
/// session parameters.
fn auth_line(cram: &str, key: &str, dataset: &str, send_ts_out: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cram.as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    let digest: String = hasher.finalize().encode_hex();

    let bucket = &key[key.len().saturating_sub(BUCKET_ID_LEN)..];

    format!(
        "auth={digest}-{bucket}|dataset={dataset}|encoding=dbn|ts_out={}\n",
        send_ts_out as u8
    )
}

/// Reads one `\n`-terminated control line, one byte at a time so nothing
/// past the newline is consumed away from the record stream that follows.
fn read_line<S: Read>(stream: &mut S) -> Result<String, Error> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        if stream.read(&mut byte)? == 0 {
            return Err(Error::Protocol(ProtocolError::Truncated));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Looks up `key` in a pipe-delimited `key=value` control line.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split('|')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn require_field<'a>(line: &'a str, key: &'static str) -> Result<&'a str, Error> {
    field(line, key).ok_or(Error::Protocol(ProtocolError::MissingField(key)))
}

fn read_exact_or_closed<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<(), Error> {
    stream.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::PeerClosed
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_fqdn_replaces_dots() {
        assert_eq!(
            gateway_fqdn("OPRA.PILLAR"),
            "OPRA-PILLAR.lsg.databento.com"
        );
        assert_eq!(gateway_fqdn("GLBX.MDP3"), "GLBX-MDP3.lsg.databento.com");
    }

    #[test]
    fn field_lookup_splits_on_pipes() {
        let line = "lsg_version=0.19.0|cram=abc=def|x=";
        assert_eq!(field(line, "lsg_version"), Some("0.19.0"));
        // Only the first '=' separates key from value:
        assert_eq!(field(line, "cram"), Some("abc=def"));
        assert_eq!(field(line, "x"), Some(""));
        assert_eq!(field(line, "missing"), None);
    }

    #[test]
    fn auth_line_matches_the_wire_format() {
        let line = auth_line("XYZ", "my_api_key12345", "OPRA.PILLAR", false);
        // SHA-256("XYZ|my_api_key12345"), lowercase hex:
        let mut hasher = Sha256::new();
        hasher.update(b"XYZ|my_api_key12345");
        let digest: String = hasher.finalize().encode_hex();

        assert_eq!(
            line,
            format!("auth={digest}-12345|dataset=OPRA.PILLAR|encoding=dbn|ts_out=0\n")
        );
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn auth_line_sets_ts_out() {
        let line = auth_line("c", "key_ending_ABCDE", "GLBX.MDP3", true);
        assert!(line.ends_with("|encoding=dbn|ts_out=1\n"));
        assert!(line.contains("-ABCDE|dataset=GLBX.MDP3|"));
    }
}
