//! Atom lookup: codepoint → seeded atom record
//!
//! Text ingestion resolves every atom position through this component.
//! Computing positions from hashes is forbidden — it would replace the
//! seeded semantic locality with hash noise — so the lookup is the single
//! gate between the ingestion path and the atom table.
//!
//! Two modes:
//! - **On-demand**: misses are fetched from the store in batches of up to
//!   [`BATCH_LIMIT`] codepoints and cached.
//! - **Preloaded**: one scan of the atom table pins the full mapping
//!   (~1.1M entries) in memory; after that the lookup never touches the
//!   store and can be shared read-only across threads behind an `Arc`.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::copy::SharedStore;
use crate::store::StoreError;

/// An atom joined with its physicality, as the ingester consumes it.
pub use crate::store::AtomRow as AtomInfo;

/// Maximum codepoints per store round trip.
pub const BATCH_LIMIT: usize = 1024;

/// Lookup failures (store-side only; a missing atom is `None`, not an error).
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Query-time cache over the seeded atom table.
pub struct AtomLookup {
    store: SharedStore,
    cache: HashMap<u32, AtomInfo>,
    preloaded: bool,
}

impl AtomLookup {
    pub fn new(store: SharedStore) -> Self {
        AtomLookup { store, cache: HashMap::new(), preloaded: false }
    }

    /// One pass over the atom table; afterwards the cache is complete and
    /// read-only. Returns the number of entries pinned.
    pub fn preload_all(&mut self) -> Result<usize, LookupError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| StoreError::Protocol("store connection poisoned".into()))?;
        let cache = &mut self.cache;
        store.scan_atoms(&mut |row| {
            cache.insert(row.codepoint, row);
        })?;
        self.preloaded = true;
        info!(entries = self.cache.len(), "atom cache preloaded");
        Ok(self.cache.len())
    }

    pub fn is_preloaded(&self) -> bool {
        self.preloaded
    }

    /// Resolve one codepoint, fetching on a miss unless preloaded.
    pub fn lookup(&mut self, codepoint: u32) -> Result<Option<AtomInfo>, LookupError> {
        if self.cache.contains_key(&codepoint) || self.preloaded {
            return Ok(self.cache.get(&codepoint).copied());
        }
        let fetched = self.lookup_batch(&[codepoint])?;
        Ok(fetched.get(&codepoint).copied())
    }

    /// Resolve a set of codepoints, batching store round trips.
    ///
    /// The returned map covers every requested codepoint that exists in the
    /// atom table; requests absent from the table are silently missing from
    /// the map.
    pub fn lookup_batch(
        &mut self,
        codepoints: &[u32],
    ) -> Result<HashMap<u32, AtomInfo>, LookupError> {
        let mut missing: Vec<u32> = Vec::new();
        if !self.preloaded {
            let mut seen = HashSet::new();
            for &cp in codepoints {
                if !self.cache.contains_key(&cp) && seen.insert(cp) {
                    missing.push(cp);
                }
            }
        }
        if !missing.is_empty() {
            let mut store = self
                .store
                .lock()
                .map_err(|_| StoreError::Protocol("store connection poisoned".into()))?;
            for chunk in missing.chunks(BATCH_LIMIT) {
                for row in store.query_atoms(chunk)? {
                    self.cache.insert(row.codepoint, row);
                }
            }
        }
        Ok(codepoints
            .iter()
            .filter_map(|cp| self.cache.get(cp).map(|info| (*cp, *info)))
            .collect())
    }

    /// Cache-only read; the shared-`Arc` path after a preload.
    pub fn cached(&self, codepoint: u32) -> Option<&AtomInfo> {
        self.cache.get(&codepoint)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::{encode_row, frame_binary, Framing};
    use crate::geometry::point_on_s3;
    use crate::hash::Digest;
    use crate::records::{Physicality, Record};
    use crate::store::{MemStore, Store};
    use std::sync::{Arc, Mutex};

    /// Stores a handful of atoms without running the whole seeder.
    fn store_with_atoms(codepoints: &[u32]) -> SharedStore {
        let mut mem = MemStore::new();
        let mut phys_buf = Vec::new();
        let mut atom_buf = Vec::new();
        for (i, &cp) in codepoints.iter().enumerate() {
            let phys = Physicality::for_centroid(point_on_s3(i as u64, 64));
            encode_row(Framing::Binary, &phys.fields(), &mut phys_buf);
            let atom = crate::records::Atom {
                id: Digest::hash_codepoint(cp).unwrap(),
                codepoint: cp,
                physicality_id: phys.id,
            };
            encode_row(Framing::Binary, &atom.fields(), &mut atom_buf);
        }
        mem.copy_in("physicality", Framing::Binary, &frame_binary(&phys_buf)).unwrap();
        mem.copy_in("atom", Framing::Binary, &frame_binary(&atom_buf)).unwrap();
        Arc::new(Mutex::new(mem))
    }

    #[test]
    fn on_demand_lookup_fetches_and_caches() {
        let store = store_with_atoms(&[0x41, 0x42]);
        let mut lookup = AtomLookup::new(store);
        assert!(!lookup.is_preloaded());
        let a = lookup.lookup(0x41).unwrap().unwrap();
        assert_eq!(a.codepoint, 0x41);
        assert_eq!(a.atom_id, Digest::hash_codepoint(0x41).unwrap());
        // Second hit is served from cache.
        assert!(lookup.cached(0x41).is_some());
        assert!(lookup.cached(0x42).is_none());
    }

    #[test]
    fn missing_atom_is_none_not_error() {
        let store = store_with_atoms(&[0x41]);
        let mut lookup = AtomLookup::new(store);
        assert!(lookup.lookup(0x7F).unwrap().is_none());
    }

    #[test]
    fn batch_lookup_returns_only_seeded_entries() {
        let store = store_with_atoms(&[0x41, 0x42, 0x43]);
        let mut lookup = AtomLookup::new(store);
        let got = lookup.lookup_batch(&[0x41, 0x42, 0x999]).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.contains_key(&0x41));
        assert!(!got.contains_key(&0x999));
    }

    #[test]
    fn preload_pins_everything_and_stops_fetching() {
        let store = store_with_atoms(&[0x41, 0x42]);
        let mut lookup = AtomLookup::new(Arc::clone(&store));
        assert_eq!(lookup.preload_all().unwrap(), 2);
        assert!(lookup.is_preloaded());
        // Preloaded mode never refetches: a codepoint seeded *after* the
        // preload stays invisible.
        {
            let mut guard = store.lock().unwrap();
            let phys = Physicality::for_centroid(point_on_s3(9, 64));
            let mut buf = Vec::new();
            encode_row(Framing::Binary, &phys.fields(), &mut buf);
            guard.copy_in("physicality", Framing::Binary, &frame_binary(&buf)).unwrap();
            let atom = crate::records::Atom {
                id: Digest::hash_codepoint(0x5A).unwrap(),
                codepoint: 0x5A,
                physicality_id: phys.id,
            };
            let mut buf = Vec::new();
            encode_row(Framing::Binary, &atom.fields(), &mut buf);
            guard.copy_in("atom", Framing::Binary, &frame_binary(&buf)).unwrap();
        }
        assert!(lookup.lookup(0x5A).unwrap().is_none());
        // Shared read-only access pattern.
        let shared = Arc::new(lookup);
        assert!(shared.cached(0x41).is_some());
    }
}
