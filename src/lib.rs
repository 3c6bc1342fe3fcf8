//! Crate root: public surface, shared primitives, and the error taxonomy
//!
//! `noograph` is a content-addressed knowledge substrate: arbitrary text
//! becomes a three-layer geometric graph persisted in a relational store.
//!
//! - **Atoms** — the 1,114,112 Unicode codepoints, each seeded once onto a
//!   deterministic point of the unit 3-sphere S³ by semantic ordering.
//! - **Compositions** — content-addressed atom sequences (words, n-grams)
//!   with a spherical-centroid position and a 128-bit Hilbert spatial key.
//! - **Relations** — co-occurrence aggregates over compositions carrying an
//!   ELO-style rating updated from observation evidence.
//!
//! ## Invariants
//!
//! - **Content addressing.** Every persisted id is a 128-bit BLAKE3 digest
//!   of canonical bytes; identical content collapses to one row, across
//!   every ingestion path.
//! - **Geometry.** Every stored position is unit-norm within 1e-9; Hilbert
//!   keys derive from centroids, never the reverse; atom positions come
//!   from the seeded table only, never from hashes.
//! - **Ordering.** Within one ingestion transaction, Physicality rows land
//!   before the entities that reference them; parents before satellites.
//! - **Determinism.** Seeding, extraction, and projection are pure
//!   functions of their inputs; re-running any of them inserts nothing.
//!
//! The relational store itself is an external collaborator, reached through
//! [`store::Store`]; [`store::MemStore`] is the in-memory reference
//! implementation used by tests and local runs.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Query-time atom lookup (preloaded or on-demand).
pub mod atoms;
/// Whole-system configuration (serde, JSON).
pub mod config;
/// Bulk loader: COPY framings, buffering, staging dedup.
pub mod copy;
/// S³ kernel: Super-Fibonacci lattice, Hopf map, SLERP, centroid.
pub mod geometry;
/// Spherical-cap boundary operators behind the store's GiST entry-point.
pub mod gist;
/// BLAKE3-based 128-bit content identifiers.
pub mod hash;
/// 4D Hilbert curve, 128-bit keys.
pub mod hilbert;
/// Text ingester: decode, extract, assemble, load.
pub mod ingest;
/// Suffix-array n-gram extraction.
pub mod ngram;
/// Rating engine: per-batch observation aggregation.
pub mod rating;
/// Store records, builders, column bindings.
pub mod records;
/// Unicode seeder: one-shot projection of the codespace.
pub mod seeder;
/// Semantic sequencer: weighted adjacency and linearization.
pub mod sequencer;
/// Store contract and the in-memory reference store.
pub mod store;
/// UCD data file parsing.
pub mod ucd;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// Canonical re-exports
// ============================================================================

pub use crate::atoms::{AtomInfo, AtomLookup};
pub use crate::config::Config;
pub use crate::geometry::S3Point;
pub use crate::hash::Digest;
pub use crate::ingest::{IngestStats, IngesterOptions, TextIngester};
pub use crate::seeder::{seed, SeedReport};

// ============================================================================
// Cooperative cancellation
// ============================================================================

/// Shared cancellation flag checked at stage checkpoints.
///
/// Cancellation is cooperative: the extractor checks between LCP
/// intervals, the bulk loader between flush boundaries, the seeder between
/// phases. Nothing retries internally; retries belong to the caller.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation; observed at the next checkpoint.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// The user-facing error kinds; every concrete error maps onto one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: bad hex, out-of-range codepoint, unnormalized
    /// point, malformed record.
    InvalidInput,
    /// Something required is absent: a UCD file, an unseeded atom.
    MissingResource,
    /// A duplicate collided under strict-dedup semantics.
    Conflict,
    /// The store failed; the raw message is attached to the source error.
    Store,
    /// Cooperative cancellation observed at a checkpoint.
    Cancelled,
    /// A geometry invariant broke — a bug, not an input problem.
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::MissingResource => "missing-resource",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Store => "store-error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fatal => "fatal",
        })
    }
}

/// Crate-level error: any subsystem failure, classifiable by kind.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error(transparent)]
    Hash(#[from] hash::HashError),
    #[error(transparent)]
    Geometry(#[from] geometry::GeomError),
    #[error(transparent)]
    Record(#[from] records::RecordError),
    #[error(transparent)]
    Ucd(#[from] ucd::UcdError),
    #[error(transparent)]
    Seed(#[from] seeder::SeedError),
    #[error(transparent)]
    Extract(#[from] ngram::ExtractError),
    #[error(transparent)]
    Lookup(#[from] atoms::LookupError),
    #[error(transparent)]
    Ingest(#[from] ingest::IngestError),
    #[error(transparent)]
    BulkLoad(#[from] copy::CopyError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

fn store_kind(e: &store::StoreError) -> ErrorKind {
    match e {
        store::StoreError::UniqueViolation { .. } => ErrorKind::Conflict,
        _ => ErrorKind::Store,
    }
}

fn copy_kind(e: &copy::CopyError) -> ErrorKind {
    match e {
        copy::CopyError::Framing(_) => ErrorKind::InvalidInput,
        copy::CopyError::Store(s) => store_kind(s),
        copy::CopyError::Cancelled => ErrorKind::Cancelled,
    }
}

fn ucd_kind(e: &ucd::UcdError) -> ErrorKind {
    match e {
        ucd::UcdError::MissingFile(_) | ucd::UcdError::Io { .. } => ErrorKind::MissingResource,
        ucd::UcdError::Malformed { .. } => ErrorKind::InvalidInput,
    }
}

impl Error {
    /// Classify this error for user-facing reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Hash(_) | Error::Record(_) | Error::Config(_) => ErrorKind::InvalidInput,
            Error::Geometry(e) => match e {
                geometry::GeomError::NonFinite(_) => ErrorKind::Fatal,
                _ => ErrorKind::InvalidInput,
            },
            Error::Ucd(e) => ucd_kind(e),
            Error::Seed(e) => match e {
                seeder::SeedError::Ucd(u) => ucd_kind(u),
                seeder::SeedError::BulkLoad(c) => copy_kind(c),
                seeder::SeedError::Cancelled => ErrorKind::Cancelled,
            },
            Error::Extract(ngram::ExtractError::Cancelled) => ErrorKind::Cancelled,
            Error::Lookup(atoms::LookupError::Store(s)) => store_kind(s),
            Error::Ingest(e) => match e {
                ingest::IngestError::AtomMissing(_) => ErrorKind::MissingResource,
                ingest::IngestError::Extract(ngram::ExtractError::Cancelled) => {
                    ErrorKind::Cancelled
                }
                ingest::IngestError::Record(_) => ErrorKind::InvalidInput,
                ingest::IngestError::Lookup(atoms::LookupError::Store(s)) => store_kind(s),
                ingest::IngestError::BulkLoad(c) => copy_kind(c),
                ingest::IngestError::Store(s) => store_kind(s),
                ingest::IngestError::Cancelled => ErrorKind::Cancelled,
            },
            Error::BulkLoad(e) => copy_kind(e),
            Error::Store(e) => store_kind(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_classify_the_taxonomy() {
        let e: Error = hash::HashError::InvalidHex("zz".into()).into();
        assert_eq!(e.kind(), ErrorKind::InvalidInput);

        let e: Error = geometry::GeomError::NonFinite("slerp result").into();
        assert_eq!(e.kind(), ErrorKind::Fatal);

        let e: Error = ucd::UcdError::MissingFile("UnicodeData.txt".into()).into();
        assert_eq!(e.kind(), ErrorKind::MissingResource);

        let e: Error = store::StoreError::UniqueViolation {
            table: "atom".into(),
            key: "00".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::Conflict);

        let e: Error = ngram::ExtractError::Cancelled.into();
        assert_eq!(e.kind(), ErrorKind::Cancelled);

        let e: Error = store::StoreError::Protocol("boom".into()).into();
        assert_eq!(e.kind(), ErrorKind::Store);
    }

    #[test]
    fn cancel_token_is_shared() {
        let t = CancelToken::new();
        let clone = t.clone();
        assert!(!clone.is_cancelled());
        t.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn error_kind_display_is_one_word() {
        for kind in [
            ErrorKind::InvalidInput,
            ErrorKind::MissingResource,
            ErrorKind::Conflict,
            ErrorKind::Store,
            ErrorKind::Cancelled,
            ErrorKind::Fatal,
        ] {
            assert!(!kind.to_string().contains(' '));
        }
    }
}
