//! Text ingester: one blob in, one transaction out
//!
//! End-to-end ingestion of a text blob against a seeded store:
//!
//! 1. Decode UTF-8 leniently — an invalid byte is skipped (forward one
//!    byte) and counted, never fatal.
//! 2. Resolve every distinct codepoint through the atom lookup. Positions
//!    come from the seeded table only; an unseeded atom is a hard
//!    missing-resource error.
//! 3. Extract repeated n-grams (suffix array, caller's τ).
//! 4. Assemble compositions: one per significant n-gram **and** one per
//!    distinct word token — relations form over the word-token stream, so
//!    words must exist as compositions even when they never repeat.
//! 5. Slide the co-occurrence window over the token stream; every ordered
//!    pair within the window is one observation of a pairwise relation,
//!    with proximity signal `(window − distance) / window`.
//! 6. Route all rows through per-table bulk loaders inside a single store
//!    transaction; Physicality flushes before the entities that reference
//!    it, ratings merge through the rating clause, and any failure rolls
//!    the whole blob back.
//!
//! The returned statistics expose what the blob actually added: new
//! composition/relation rows, byte counts, and the dedup ratio.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::atoms::{AtomInfo, AtomLookup, LookupError};
use crate::copy::{CopyError, LoaderConfig, LoaderFactory, SharedStore};
use crate::geometry::S3Point;
use crate::hash::Digest;
use crate::ngram::{composition_id, ExtractError, NgramExtractor};
use crate::rating::RatingEngine;
use crate::records::{
    build_composition, build_relation, Composition, CompositionSequence, Content, Physicality,
    RecordError, Relation, RelationEvidence, RelationRating, RelationSequence,
};
use crate::store::{ConflictClause, StoreError};
use crate::CancelToken;

/// Ingestion failures (everything except lenient decode).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A codepoint of the input has no seeded atom.
    #[error("atom not seeded for U+{0:04X}")]
    AtomMissing(u32),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    BulkLoad(#[from] CopyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("ingestion cancelled")]
    Cancelled,
}

/// What one blob added to the store.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct IngestStats {
    /// Atom rows inserted. Atoms are immutable after seeding, so this is
    /// zero on a healthy store; it exists to surface seed drift.
    pub atoms_new: u64,
    /// Composition rows actually inserted (dedup makes re-ingest zero).
    pub compositions_new: u64,
    /// Relation rows actually inserted.
    pub relations_new: u64,
    /// Bytes of raw input.
    pub original_bytes: u64,
    /// Framed bytes shipped to the store.
    pub stored_bytes: u64,
    /// `original / stored` (1.0 when nothing was stored).
    pub compression_ratio: f64,
    /// Invalid UTF-8 bytes skipped during decode.
    pub invalid_bytes_skipped: u64,
    /// Codepoints decoded.
    pub codepoints: u64,
}

/// Ingester options distilled from the system configuration.
#[derive(Clone, Debug)]
pub struct IngesterOptions {
    pub loader: LoaderConfig,
    pub min_frequency: u32,
    pub track_positions: bool,
    pub cooccurrence_window: usize,
    pub rating_initial: f64,
    pub rating_k_factor: f64,
}

impl Default for IngesterOptions {
    fn default() -> Self {
        IngesterOptions {
            loader: LoaderConfig::default(),
            min_frequency: 2,
            track_positions: true,
            cooccurrence_window: 16,
            rating_initial: crate::rating::DEFAULT_INITIAL_RATING,
            rating_k_factor: crate::rating::DEFAULT_K_FACTOR,
        }
    }
}

impl IngesterOptions {
    /// Distill from the whole-system configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        IngesterOptions {
            loader: config.loader_config(),
            min_frequency: config.ngram.min_frequency,
            track_positions: config.ngram.track_positions,
            cooccurrence_window: config.ingest.cooccurrence_window.max(2),
            rating_initial: config.rating.initial,
            rating_k_factor: config.rating.k_factor,
        }
    }
}

/// Single-owner ingester for one store connection.
///
/// One ingester handles one blob at a time; run several ingesters against
/// independent blobs for parallel ingestion.
pub struct TextIngester {
    store: SharedStore,
    lookup: AtomLookup,
    options: IngesterOptions,
    batch_seq: u64,
}

impl TextIngester {
    pub fn new(store: SharedStore, options: IngesterOptions) -> Self {
        let lookup = AtomLookup::new(store.clone());
        TextIngester { store, lookup, options, batch_seq: 0 }
    }

    /// Preload the atom cache before the first blob (optional).
    pub fn preload_atoms(&mut self) -> Result<usize, IngestError> {
        Ok(self.lookup.preload_all()?)
    }

    /// Ingest one blob atomically.
    pub fn ingest(&mut self, bytes: &[u8], cancel: &CancelToken) -> Result<IngestStats, IngestError> {
        let mut stats = IngestStats {
            original_bytes: bytes.len() as u64,
            compression_ratio: 1.0,
            ..IngestStats::default()
        };

        // 1. Lenient decode.
        let (codepoints, skipped) = decode_utf8_lossy(bytes);
        stats.invalid_bytes_skipped = skipped;
        stats.codepoints = codepoints.len() as u64;
        if codepoints.is_empty() {
            return Ok(stats);
        }

        // 2. Resolve atoms.
        let mut unique: Vec<u32> = codepoints.clone();
        unique.sort_unstable();
        unique.dedup();
        let atoms = self.lookup.lookup_batch(&unique)?;
        for &cp in &unique {
            if !atoms.contains_key(&cp) {
                return Err(IngestError::AtomMissing(cp));
            }
        }

        // 3. Repeated n-grams.
        let extractor = NgramExtractor::new(crate::ngram::ExtractorConfig {
            min_frequency: self.options.min_frequency,
            track_positions: self.options.track_positions,
        });
        let extraction = extractor.extract(&codepoints, cancel)?;

        // 4. Compositions: extractor output plus word tokens, deduped by id.
        let tokens = tokenize(&codepoints);
        let mut compositions: BTreeMap<Digest, Vec<u32>> = BTreeMap::new();
        for gram in extraction.significant_ngrams() {
            compositions.insert(gram.hash, gram.codepoints.clone());
        }
        for token in &tokens {
            compositions.insert(composition_id(token), token.clone());
        }
        debug!(
            ngrams = extraction.ngrams.len(),
            tokens = tokens.len(),
            compositions = compositions.len(),
            "assembled composition set"
        );

        // 5. Pairwise relations over the token stream.
        let token_ids: Vec<Digest> = tokens.iter().map(|t| composition_id(t)).collect();
        let window = self.options.cooccurrence_window;
        let mut pairs: BTreeMap<(Digest, Digest), PairAcc> = BTreeMap::new();
        for (i, &a) in token_ids.iter().enumerate() {
            for (j, &b) in token_ids.iter().enumerate().skip(i + 1) {
                let distance = j - i;
                if distance >= window {
                    break;
                }
                if a == b {
                    continue;
                }
                pairs.entry((a, b)).or_default().distances.push(distance);
            }
        }

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        // 6. Build rows and load them in one transaction.
        let content = Content::for_bytes(bytes, "text", "text/plain");
        self.batch_seq += 1;
        let reports = self.load(&compositions, &atoms, &pairs, &content, cancel)?;

        stats.compositions_new = reports.compositions_new;
        stats.relations_new = reports.relations_new;
        stats.stored_bytes = reports.stored_bytes;
        stats.compression_ratio = if reports.stored_bytes == 0 {
            1.0
        } else {
            stats.original_bytes as f64 / reports.stored_bytes as f64
        };
        info!(
            compositions_new = stats.compositions_new,
            relations_new = stats.relations_new,
            skipped = stats.invalid_bytes_skipped,
            "ingested blob"
        );
        Ok(stats)
    }
}

#[derive(Clone, Debug, Default)]
struct PairAcc {
    distances: Vec<usize>,
}

struct LoadTotals {
    compositions_new: u64,
    relations_new: u64,
    stored_bytes: u64,
}

impl TextIngester {
    fn load(
        &mut self,
        compositions: &BTreeMap<Digest, Vec<u32>>,
        atoms: &HashMap<u32, AtomInfo>,
        pairs: &BTreeMap<(Digest, Digest), PairAcc>,
        content: &Content,
        cancel: &CancelToken,
    ) -> Result<LoadTotals, IngestError> {
        {
            let mut guard = self
                .store
                .lock()
                .map_err(|_| StoreError::Protocol("store connection poisoned".into()))?;
            guard.begin()?;
        }
        match self.load_inner(compositions, atoms, pairs, content, cancel) {
            Ok(totals) => {
                let mut guard = self
                    .store
                    .lock()
                    .map_err(|_| StoreError::Protocol("store connection poisoned".into()))?;
                guard.commit()?;
                Ok(totals)
            }
            Err(e) => {
                if let Ok(mut guard) = self.store.lock() {
                    // Roll back so no partial blob is visible; the original
                    // error stays the one reported.
                    let _ = guard.rollback();
                }
                Err(e)
            }
        }
    }

    fn load_inner(
        &mut self,
        compositions: &BTreeMap<Digest, Vec<u32>>,
        atoms: &HashMap<u32, AtomInfo>,
        pairs: &BTreeMap<(Digest, Digest), PairAcc>,
        content: &Content,
        cancel: &CancelToken,
    ) -> Result<LoadTotals, IngestError> {
        let factory = LoaderFactory::new(self.options.loader.clone(), cancel.clone());
        let mut phys_loader = factory.loader::<Physicality>(self.store.clone());
        let mut comp_loader = factory.loader::<Composition>(self.store.clone());
        let mut comp_seq_loader = factory.loader::<CompositionSequence>(self.store.clone());
        let mut rel_loader = factory.loader::<Relation>(self.store.clone());
        let mut rel_seq_loader = factory.loader::<RelationSequence>(self.store.clone());
        let mut rating_loader = factory
            .loader_with_conflict::<RelationRating>(self.store.clone(), ConflictClause::RatingMerge);
        let mut evidence_loader = factory.loader::<RelationEvidence>(self.store.clone());
        let mut content_loader = factory.loader::<Content>(self.store.clone());

        // Compositions (physicality first), tracking centroids for relations.
        let mut centroids: HashMap<Digest, S3Point> = HashMap::new();
        for (id, codepoints) in compositions {
            let members: Vec<(Digest, S3Point)> = codepoints
                .iter()
                .map(|cp| {
                    atoms
                        .get(cp)
                        .map(|info| (info.atom_id, info.centroid))
                        .ok_or(IngestError::AtomMissing(*cp))
                })
                .collect::<Result<_, _>>()?;
            let bundle = build_composition(&members)?;
            debug_assert_eq!(bundle.composition.id, *id);
            centroids.insert(bundle.composition.id, bundle.physicality.centroid);
            phys_loader.push(&bundle.physicality)?;
            comp_loader.push(&bundle.composition)?;
            for row in &bundle.sequence {
                comp_seq_loader.push(row)?;
            }
        }

        // Relations with ratings and evidence.
        let window = self.options.cooccurrence_window as f64;
        let mut engine = RatingEngine::new(self.options.rating_initial, self.options.rating_k_factor);
        for ((a, b), acc) in pairs {
            let pa = centroids.get(a).copied().unwrap_or(S3Point::AXIS_X);
            let pb = centroids.get(b).copied().unwrap_or(S3Point::AXIS_X);
            let bundle = build_relation(&[(*a, pa), (*b, pb)])?;
            phys_loader.push(&bundle.physicality)?;
            rel_loader.push(&bundle.relation)?;
            for row in &bundle.sequence {
                rel_seq_loader.push(row)?;
            }
            for &d in &acc.distances {
                let signal = ((window - d as f64) / window).clamp(0.0, 1.0);
                engine.observe(bundle.relation.id, signal);
            }
        }
        let (ratings, evidence) = engine.flush(content.id, self.batch_seq);
        for row in &ratings {
            rating_loader.push(row)?;
        }
        for row in &evidence {
            evidence_loader.push(row)?;
        }
        content_loader.push(content)?;

        // Finish in reference order: physicality before its dependents,
        // compositions before sequences, relations before their satellites.
        let phys = phys_loader.finish()?;
        let comp = comp_loader.finish()?;
        let comp_seq = comp_seq_loader.finish()?;
        let rel = rel_loader.finish()?;
        let rel_seq = rel_seq_loader.finish()?;
        let rating = rating_loader.finish()?;
        let ev = evidence_loader.finish()?;
        let cont = content_loader.finish()?;

        let stored_bytes = [phys, comp, comp_seq, rel, rel_seq, rating, ev, cont]
            .iter()
            .map(|r| r.bytes_sent)
            .sum();
        Ok(LoadTotals {
            compositions_new: comp.rows_inserted,
            relations_new: rel.rows_inserted,
            stored_bytes,
        })
    }
}

// ============================================================================
// Decode and tokenization
// ============================================================================

/// Lenient UTF-8 decode: invalid bytes are skipped one at a time and
/// counted. Returns `(codepoints, skipped_bytes)`.
pub fn decode_utf8_lossy(bytes: &[u8]) -> (Vec<u32>, u64) {
    let mut codepoints = Vec::with_capacity(bytes.len());
    let mut skipped = 0u64;
    let mut pos = 0usize;
    while pos < bytes.len() {
        match std::str::from_utf8(&bytes[pos..]) {
            Ok(tail) => {
                codepoints.extend(tail.chars().map(|c| c as u32));
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if valid > 0 {
                    // Everything up to the error is sound by construction.
                    if let Ok(head) = std::str::from_utf8(&bytes[pos..pos + valid]) {
                        codepoints.extend(head.chars().map(|c| c as u32));
                    }
                }
                pos += valid + 1;
                skipped += 1;
            }
        }
    }
    (codepoints, skipped)
}

/// Word tokens: maximal runs of alphanumeric codepoints, in text order.
pub fn tokenize(codepoints: &[u32]) -> Vec<Vec<u32>> {
    let mut tokens = Vec::new();
    let mut current = Vec::new();
    for &cp in codepoints {
        let is_word = char::from_u32(cp).is_some_and(|c| c.is_alphanumeric());
        if is_word {
            current.push(cp);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Composition id of a word, for read paths and tests.
pub fn find_composition_id(word: &str) -> Digest {
    let cps: Vec<u32> = word.chars().map(|c| c as u32).collect();
    composition_id(&cps)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use std::sync::{Arc, Mutex};

    #[test]
    fn decode_accepts_clean_utf8() {
        let (cps, skipped) = decode_utf8_lossy("Hello 你好".as_bytes());
        assert_eq!(skipped, 0);
        assert_eq!(cps.len(), 8);
        assert_eq!(cps[6], '你' as u32);
        assert_eq!(cps[7], '好' as u32);
    }

    #[test]
    fn decode_skips_invalid_bytes_one_at_a_time() {
        let bytes = [b'a', 0xFF, 0xFE, b'b'];
        let (cps, skipped) = decode_utf8_lossy(&bytes);
        assert_eq!(cps, vec!['a' as u32, 'b' as u32]);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn decode_skips_truncated_multibyte_tail() {
        // "é" is 0xC3 0xA9; drop the continuation byte.
        let bytes = [b'x', 0xC3];
        let (cps, skipped) = decode_utf8_lossy(&bytes);
        assert_eq!(cps, vec!['x' as u32]);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn tokenizer_splits_on_non_alphanumerics() {
        let cps: Vec<u32> = "Call me Ishmael. Some years ago".chars().map(|c| c as u32).collect();
        let tokens = tokenize(&cps);
        let words: Vec<String> = tokens
            .iter()
            .map(|t| t.iter().map(|&cp| char::from_u32(cp).unwrap()).collect())
            .collect();
        assert_eq!(words, vec!["Call", "me", "Ishmael", "Some", "years", "ago"]);
    }

    #[test]
    fn tokenizer_handles_cjk_runs() {
        let cps: Vec<u32> = "Hello 你好".chars().map(|c| c as u32).collect();
        let tokens = tokenize(&cps);
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1], vec!['你' as u32, '好' as u32]);
    }

    #[test]
    fn word_composition_ids_are_stable() {
        assert_eq!(find_composition_id("Ishmael"), find_composition_id("Ishmael"));
        assert_ne!(find_composition_id("Ishmael"), find_composition_id("ishmael"));
    }

    #[test]
    fn ingest_against_unseeded_store_is_missing_resource() {
        let store = Arc::new(Mutex::new(MemStore::new()));
        let mut ingester = TextIngester::new(store, IngesterOptions::default());
        let err = ingester.ingest(b"abc", &CancelToken::new()).unwrap_err();
        assert!(matches!(err, IngestError::AtomMissing(_)));
    }

    /// Latin letters with case mappings, digits, and a 1,025-ideograph CJK
    /// range — enough assigned codepoints that spiral steps stay well below
    /// polar band gaps.
    fn fixture_unicode_data() -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for cp in 0x41..=0x5A_u32 {
            writeln!(
                out,
                "{cp:04X};LATIN CAPITAL LETTER {l};Lu;0;L;;;;;N;;;;{lower:04X};",
                l = char::from_u32(cp).unwrap(),
                lower = cp + 0x20
            )
            .unwrap();
        }
        for cp in 0x61..=0x7A_u32 {
            writeln!(
                out,
                "{cp:04X};LATIN SMALL LETTER {l};Ll;0;L;;;;;N;;;{upper:04X};;{upper:04X}",
                l = char::from_u32(cp).unwrap().to_uppercase(),
                upper = cp - 0x20
            )
            .unwrap();
        }
        for cp in 0x30..=0x39_u32 {
            let digit = cp - 0x30;
            writeln!(out, "{cp:04X};DIGIT {digit};Nd;0;EN;;{digit};{digit};{digit};N;;;;;")
                .unwrap();
        }
        out.push_str("4E00;<CJK Ideograph, First>;Lo;0;L;;;;;N;;;;;\n");
        out.push_str("5200;<CJK Ideograph, Last>;Lo;0;L;;;;;N;;;;;\n");
        out
    }

    /// The end-to-end journey against one seeded store: locality spot
    /// check, the Moby Dick phrase, re-ingestion, mixed UTF-8, and
    /// invalid-byte accounting.
    #[test]
    fn seed_ingest_and_reingest_round_trip() {
        use crate::geometry::{distance_s3, spherical_centroid};
        use crate::records::Value;
        use crate::store::Store;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("UnicodeData.txt"), fixture_unicode_data()).unwrap();
        let store = Arc::new(Mutex::new(MemStore::new()));
        let report = crate::seeder::seed(store.clone(), dir.path(), CancelToken::new()).unwrap();
        assert_eq!(report.atoms_inserted, crate::ucd::CODESPACE as u64);

        // Spot check: 'A' and 'B' are geodesically closer than 'A' and '中'.
        {
            let mut guard = store.lock().unwrap();
            let rows = guard.query_atoms(&[0x41, 0x42, 0x4E2D]).unwrap();
            let find = |cp: u32| rows.iter().find(|r| r.codepoint == cp).unwrap().centroid;
            let (a, b, han) = (find(0x41), find(0x42), find(0x4E2D));
            assert!(
                distance_s3(&a, &b) < distance_s3(&a, &han),
                "AB={} A-han={}",
                distance_s3(&a, &b),
                distance_s3(&a, &han)
            );
        }

        // The Moby Dick phrase.
        let phrase = b"Call me Ishmael. Some years ago";
        let mut ingester = TextIngester::new(store.clone(), IngesterOptions::default());
        let stats = ingester.ingest(phrase, &CancelToken::new()).unwrap();
        assert_eq!(stats.original_bytes, phrase.len() as u64);
        assert_eq!(stats.invalid_bytes_skipped, 0);
        assert!(stats.compositions_new > 0);
        assert!(stats.relations_new > 0);
        assert_eq!(stats.atoms_new, 0);

        let words = ["Call", "me", "Ishmael", "Some", "years", "ago"];
        {
            let guard = store.lock().unwrap();
            for word in words {
                assert!(
                    guard.get("composition", &find_composition_id(word)).is_some(),
                    "missing composition for {word}"
                );
            }
        }

        // find_composition("Ishmael"): its centroid equals the spherical
        // centroid of its letters' seeded positions, bit for bit.
        {
            let ishmael_cps: Vec<u32> = "Ishmael".chars().map(|c| c as u32).collect();
            let mut lookup = AtomLookup::new(store.clone());
            let atoms = lookup.lookup_batch(&ishmael_cps).unwrap();
            let positions: Vec<_> = ishmael_cps.iter().map(|cp| atoms[cp].centroid).collect();
            let expected = spherical_centroid(&positions).point;

            let guard = store.lock().unwrap();
            let comp_row = guard
                .get("composition", &find_composition_id("Ishmael"))
                .expect("Ishmael composition");
            let Value::Id(phys_id) = comp_row[1] else {
                panic!("composition row shape");
            };
            let phys_row = guard.get("physicality", &phys_id).expect("Ishmael physicality");
            let Value::Point(stored) = phys_row[1] else {
                panic!("physicality row shape");
            };
            assert_eq!(stored, expected.coords());
        }

        // Relation rating for an observed co-occurrence, before and after
        // re-ingestion.
        let pair_id =
            Digest::hash_sequence(&[find_composition_id("Call"), find_composition_id("me")]);
        let observations = |store: &Arc<Mutex<MemStore>>| {
            let guard = store.lock().unwrap();
            let row = guard.get("relation_rating", &pair_id).expect("pair rating");
            match row[1] {
                Value::Int8(n) => n,
                _ => panic!("rating row shape"),
            }
        };
        let obs_before = observations(&store);
        assert!(obs_before >= 1);
        let comp_count_before = store.lock().unwrap().row_count("composition").unwrap();

        // Ingesting the same phrase again adds nothing new; only the
        // rating observations grow, and evidence stays append-only.
        let stats2 = ingester.ingest(phrase, &CancelToken::new()).unwrap();
        assert_eq!(stats2.compositions_new, 0);
        assert_eq!(stats2.relations_new, 0);
        assert_eq!(
            store.lock().unwrap().row_count("composition").unwrap(),
            comp_count_before
        );
        assert_eq!(observations(&store), obs_before * 2);
        assert!(store.lock().unwrap().row_count("relation_evidence").unwrap() > 0);

        // Mixed UTF-8.
        let stats3 = ingester.ingest("Hello 你好".as_bytes(), &CancelToken::new()).unwrap();
        assert_eq!(stats3.codepoints, 8);
        assert_eq!(stats3.invalid_bytes_skipped, 0);
        {
            let guard = store.lock().unwrap();
            for ch in ['H', 'e', 'l', 'o', '你', '好'] {
                let id = find_composition_id(&ch.to_string());
                assert!(guard.get("composition", &id).is_some(), "missing unigram {ch}");
            }
            assert!(guard.get("composition", &find_composition_id("你好")).is_some());
        }
        {
            let mut lookup = AtomLookup::new(store.clone());
            assert!(lookup.lookup('你' as u32).unwrap().is_some());
            assert!(lookup.lookup('好' as u32).unwrap().is_some());
        }

        // Invalid bytes are counted, never fatal.
        let mut bytes = b"ab ".to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(b" ab");
        let stats4 = ingester.ingest(&bytes, &CancelToken::new()).unwrap();
        assert_eq!(stats4.invalid_bytes_skipped, 1);
        assert_eq!(stats4.codepoints, 6);
    }
}
