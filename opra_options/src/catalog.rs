// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Bookkeeping for a definition replay: option entries grouped under a
//! sorted vector of roots, and security definitions in a dense bucket map
//! keyed by instrument id.

use dbn_protocol::record::SecurityDef;

use crate::osi::OsiSymbol;

/// Fixed bucket count for the instrument-id map. OPRA definition replays
/// run to a few million instruments, so buckets stay short.
pub const BUCKET_COUNT: usize = 50_000;

/// First allocation for a root's option list.
const ROOT_OPTIONS_RESERVE: usize = 64;

/// First allocation for a bucket.
const BUCKET_RESERVE: usize = 4;

/// One option under a root: the stream's instrument id, the decoded OSI
/// symbol, and (after cross-referencing) the slot of the matching security
/// definition within this instrument's bucket.
#[derive(Debug)]
pub struct OptionEntry {
    pub instrument_id: u32,
    pub osi: OsiSymbol,
    pub sdef_slot: Option<u32>,
}

impl OptionEntry {
    /// Resolves the linked definition, if cross-referencing found one.
    pub fn definition<'a>(&self, buckets: &'a InstrumentBuckets) -> Option<&'a SecurityDef> {
        buckets.get(self.instrument_id, self.sdef_slot?)
    }
}

#[derive(Debug)]
pub struct RootEntry {
    pub root: String,
    pub options: Vec<OptionEntry>,
}

/// Roots in strictly ascending byte order, no duplicates. The universe of
/// roots is small (several thousand) and insertions taper off as a replay
/// progresses, so positional inserts into a vector hold up fine.
#[derive(Default)]
pub struct RootCatalog {
    roots: Vec<RootEntry>,
}

impl RootCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an option under its root, creating the root in sorted
    /// position first if this is its first option.
    pub fn add_option(&mut self, instrument_id: u32, osi: OsiSymbol) {
        let index = match self
            .roots
            .binary_search_by(|entry| entry.root.as_str().cmp(osi.root.as_str()))
        {
            Ok(index) => index,
            Err(index) => {
                self.roots.insert(
                    index,
                    RootEntry {
                        root: osi.root.clone(),
                        options: Vec::with_capacity(ROOT_OPTIONS_RESERVE),
                    },
                );
                index
            }
        };

        self.roots[index].options.push(OptionEntry {
            instrument_id,
            osi,
            sdef_slot: None,
        });
    }

    pub fn find(&self, root: &str) -> Option<&RootEntry> {
        self.roots
            .binary_search_by(|entry| entry.root.as_str().cmp(root))
            .ok()
            .map(|index| &self.roots[index])
    }

    pub fn roots(&self) -> &[RootEntry] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Links every option to the definition matching its instrument id.
    /// Returns how many options found one; the rest keep `sdef_slot: None`
    /// (their definition never showed up in the replay).
    pub fn cross_reference(&mut self, buckets: &InstrumentBuckets) -> usize {
        let mut linked = 0;

        for root in &mut self.roots {
            for option in &mut root.options {
                if let Some(slot) = buckets.find_slot(option.instrument_id) {
                    option.sdef_slot = Some(slot);
                    linked += 1;
                }
            }
        }

        linked
    }
}

/// Dense fixed-size bucket map from instrument id to retained definitions.
/// Collisions land in the same bucket and are told apart by the id stored in
/// each definition.
pub struct InstrumentBuckets {
    buckets: Vec<Vec<SecurityDef>>,
    len: usize,
}

impl InstrumentBuckets {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); BUCKET_COUNT],
            len: 0,
        }
    }

    pub fn insert(&mut self, def: SecurityDef) {
        let bucket = &mut self.buckets[def.instrument_id as usize % BUCKET_COUNT];
        if bucket.capacity() == 0 {
            bucket.reserve(BUCKET_RESERVE);
        }
        bucket.push(def);
        self.len += 1;
    }

    /// Finds the bucket slot of the definition for `instrument_id`.
    pub fn find_slot(&self, instrument_id: u32) -> Option<u32> {
        self.buckets[instrument_id as usize % BUCKET_COUNT]
            .iter()
            .position(|def| def.instrument_id == instrument_id)
            .map(|slot| slot as u32)
    }

    pub fn get(&self, instrument_id: u32, slot: u32) -> Option<&SecurityDef> {
        self.buckets[instrument_id as usize % BUCKET_COUNT].get(slot as usize)
    }

    /// Total definitions retained across all buckets.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for InstrumentBuckets {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn osi(root: &str) -> OsiSymbol {
        let padded = format!("{root:<6}250117C00480000");
        OsiSymbol::parse(&padded).unwrap()
    }

    fn def(instrument_id: u32) -> SecurityDef {
        SecurityDef {
            publisher_id: 1,
            instrument_id,
            ts_event: 0,
            raw: Box::from([0u8; 16]),
        }
    }

    #[test]
    fn roots_stay_sorted_and_unique() {
        let mut catalog = RootCatalog::new();
        for (id, root) in [(1, "SPY"), (2, "AAPL"), (3, "SPY"), (4, "MSFT")] {
            catalog.add_option(id, osi(root));
        }

        let roots: Vec<&str> = catalog.roots().iter().map(|r| r.root.as_str()).collect();
        assert_eq!(roots, vec!["AAPL", "MSFT", "SPY"]);
        assert_eq!(catalog.find("SPY").unwrap().options.len(), 2);
        assert_eq!(catalog.find("AAPL").unwrap().options.len(), 1);
        assert!(catalog.find("TSLA").is_none());
    }

    #[test]
    fn buckets_tell_colliding_ids_apart() {
        let mut buckets = InstrumentBuckets::new();
        let a = 7;
        let b = 7 + BUCKET_COUNT as u32; // same bucket, different id
        buckets.insert(def(a));
        buckets.insert(def(b));

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets.find_slot(a), Some(0));
        assert_eq!(buckets.find_slot(b), Some(1));
        assert_eq!(buckets.get(b, 1).unwrap().instrument_id, b);
        assert_eq!(buckets.find_slot(8), None);
    }

    #[test]
    fn cross_reference_links_only_matched_options() {
        let mut catalog = RootCatalog::new();
        catalog.add_option(10, osi("SPY"));
        catalog.add_option(11, osi("SPY"));
        catalog.add_option(20, osi("AAPL"));

        let mut buckets = InstrumentBuckets::new();
        buckets.insert(def(10));
        buckets.insert(def(20));

        let linked = catalog.cross_reference(&buckets);
        assert_eq!(linked, 2);

        let spy = catalog.find("SPY").unwrap();
        assert_eq!(spy.options[0].definition(&buckets).unwrap().instrument_id, 10);
        assert!(spy.options[1].definition(&buckets).is_none());
    }
}
