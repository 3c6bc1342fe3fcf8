//! Unicode seeder: one-shot projection of the codespace onto S³
//!
//! Runs once against a fresh store and produces exactly 1,114,112
//! Atom/Physicality pairs, deterministically:
//!
//! 1. Parse the UCD directory into the assigned-codepoint pool.
//! 2. Linearize the pool through the semantic sequencer.
//! 3. Project `s(c) → SuperFibonacci(s(c), M)` — the only parallel pass:
//!    the sorted order is chunked across hardware threads, each chunk
//!    produces its own contiguous output slice, and slices concatenate in
//!    index order. No shared mutable state.
//! 4. Stream Physicality rows, then Atom rows, through staging-table bulk
//!    loads with `ON CONFLICT (id) DO NOTHING`.
//! 5. Stream the unassigned remainder of the 21-bit codespace with the
//!    reserved axis point `(0, 0, 0, 1)` so the atom table is dense.
//!
//! Seeding is idempotent: a re-run merges zero new rows. Unassigned
//! physicality ids are bound to their codepoint so every atom keeps
//! exclusive ownership of its physicality row.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::path::Path;

use rayon::prelude::*;
use tracing::info;

use crate::copy::{BulkLoader, CopyError, LoaderConfig, LoaderFactory, SharedStore};
use crate::geometry::{point_on_s3, S3Point};
use crate::hash::Digest;
use crate::records::{Atom, Physicality};
use crate::sequencer::{self, Sequencing};
use crate::store::ConflictClause;
use crate::ucd::{UcdData, UcdError, CODESPACE};
use crate::CancelToken;

/// Seeder failures.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Ucd(#[from] UcdError),
    #[error("bulk load failed: {0}")]
    BulkLoad(#[from] CopyError),
    #[error("seeding cancelled")]
    Cancelled,
}

/// Row totals from one seeding run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Atom rows shipped (always the full codespace).
    pub atoms_sent: u64,
    /// Atom rows actually inserted (zero on a re-seed).
    pub atoms_inserted: u64,
    /// Physicality rows actually inserted.
    pub physicalities_inserted: u64,
    /// Assigned codepoints found in the UCD pool.
    pub assigned: u64,
}

/// Seed the atom table from a UCD directory.
pub fn seed(
    store: SharedStore,
    ucd_dir: &Path,
    cancel: CancelToken,
) -> Result<SeedReport, SeedError> {
    let data = UcdData::load_dir(ucd_dir)?;
    if cancel.is_cancelled() {
        return Err(SeedError::Cancelled);
    }

    let seq = sequencer::sequence(&data);
    info!(assigned = seq.len(), "linearized codepoint pool");
    if cancel.is_cancelled() {
        return Err(SeedError::Cancelled);
    }

    let positions = project(&seq);
    if cancel.is_cancelled() {
        return Err(SeedError::Cancelled);
    }

    // Seeder loaders skip the in-memory dedup set: ids are unique by
    // construction and the set would hold the whole codespace.
    let factory = LoaderFactory::new(
        LoaderConfig {
            use_dedup: false,
            conflict: ConflictClause::DoNothing,
            ..LoaderConfig::default()
        },
        cancel.clone(),
    );

    // Physicality stream first: assigned, then the unassigned remainder.
    let mut phys_loader: BulkLoader<Physicality> = factory.loader(store.clone());
    for (_, point) in &positions {
        phys_loader.push(&Physicality::for_centroid(*point))?;
    }
    for cp in unassigned(&data) {
        phys_loader.push(&Physicality::for_centroid_with_context(
            S3Point::AXIS_W,
            &cp.to_le_bytes(),
        ))?;
    }
    let phys_report = phys_loader.finish()?;
    info!(inserted = phys_report.rows_inserted, "physicality stream complete");

    // Atom stream second, so every physicality is persisted before the
    // atom that references it.
    let mut atom_loader: BulkLoader<Atom> = factory.loader(store.clone());
    for (cp, point) in &positions {
        atom_loader.push(&Atom {
            id: codepoint_id(*cp),
            codepoint: *cp,
            physicality_id: Physicality::for_centroid(*point).id,
        })?;
    }
    for cp in unassigned(&data) {
        let phys = Physicality::for_centroid_with_context(S3Point::AXIS_W, &cp.to_le_bytes());
        atom_loader.push(&Atom { id: codepoint_id(cp), codepoint: cp, physicality_id: phys.id })?;
    }
    let atom_report = atom_loader.finish()?;
    info!(
        sent = atom_report.rows_sent,
        inserted = atom_report.rows_inserted,
        "atom stream complete"
    );

    Ok(SeedReport {
        atoms_sent: atom_report.rows_sent,
        atoms_inserted: atom_report.rows_inserted,
        physicalities_inserted: phys_report.rows_inserted,
        assigned: seq.len() as u64,
    })
}

fn codepoint_id(cp: u32) -> Digest {
    Digest::hash_codepoint(cp).expect("codespace iteration stays in range")
}

/// Parallel projection pass: chunked across threads, concatenated in
/// index order.
fn project(seq: &Sequencing) -> Vec<(u32, S3Point)> {
    let order = seq.order();
    let m = order.len() as u64;
    if m == 0 {
        return Vec::new();
    }
    let chunk = (order.len() / (rayon::current_num_threads() * 4)).max(1);
    order
        .par_chunks(chunk)
        .enumerate()
        .flat_map_iter(|(ci, cps)| {
            let base = (ci * chunk) as u64;
            cps.iter()
                .enumerate()
                .map(move |(i, &cp)| (cp, point_on_s3(base + i as u64, m)))
        })
        .collect()
}

fn unassigned(data: &UcdData) -> impl Iterator<Item = u32> + '_ {
    (0..CODESPACE).filter(move |cp| !data.records.contains_key(cp))
}

// ============================================================================
// Tests
// ============================================================================
