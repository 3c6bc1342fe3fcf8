//! N-gram extraction: suffix array + LCP intervals
//!
//! Given a codepoint sequence, find every repeated substring with its
//! exact frequency and positions — the candidate compositions of the
//! ingestion pipeline. The pass is linear-ish and output-driven:
//!
//! 1. Suffix array by prefix doubling (`O(n log² n)`, no recursion).
//! 2. LCP array by Kasai's algorithm.
//! 3. A stack walk over the LCP array enumerates every LCP interval
//!    together with its parent depth; for each interval of width ≥ τ the
//!    walk emits one n-gram per depth in `(parent, ℓ]` — exactly the
//!    distinct repeated substrings whose minimal covering interval this
//!    is, so frequencies are exact and nothing is emitted twice.
//!
//! There is no maximum n-gram length. Each n-gram carries the composition
//! id it will feed into (the hash of its atom-id sequence), an RLE flag,
//! and a canonicalized pattern signature (`"ssi" → "XXY"`,
//! `"abba" → "XYYX"`). [`Extraction::significant_ngrams`] additionally
//! surfaces every unigram that appeared at all, below threshold or not, so
//! the downstream composition table always contains the active alphabet.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::HashMap;

use crate::hash::Digest;
use crate::CancelToken;

/// Extractor options.
#[derive(Clone, Debug)]
pub struct ExtractorConfig {
    /// Frequency threshold τ; repeats need at least two occurrences
    /// regardless, so values below 2 behave like 2 for multi-codepoint
    /// n-grams.
    pub min_frequency: u32,
    /// Record sorted occurrence positions on each n-gram.
    pub track_positions: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig { min_frequency: 2, track_positions: true }
    }
}

/// Extraction failures. An empty input is not one (it yields no n-grams).
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ExtractError {
    #[error("extraction cancelled")]
    Cancelled,
}

/// One extracted n-gram.
#[derive(Clone, Debug, PartialEq)]
pub struct Ngram {
    /// The substring itself.
    pub codepoints: Vec<u32>,
    /// Composition id: hash of the atom-id sequence.
    pub hash: Digest,
    /// Length in codepoints.
    pub n: usize,
    /// Exact occurrence count in the input.
    pub frequency: u32,
    /// Sorted start offsets (when position tracking is on).
    pub positions: Option<Vec<usize>>,
    /// True iff all codepoints are identical.
    pub is_rle: bool,
    /// First-appearance relabeling of the codepoints.
    pub pattern_signature: String,
}

/// Result of one extraction pass.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Repeated substrings with frequency ≥ τ, sorted by `(n, codepoints)`.
    pub ngrams: Vec<Ngram>,
    /// Every distinct codepoint with its frequency (the active alphabet).
    pub unigrams: Vec<Ngram>,
}

impl Extraction {
    /// All n-grams at or above threshold, plus every unigram that appeared
    /// at all (below-threshold unigrams included).
    pub fn significant_ngrams(&self) -> Vec<&Ngram> {
        let mut out: Vec<&Ngram> = self.ngrams.iter().collect();
        for uni in &self.unigrams {
            if !self.ngrams.iter().any(|g| g.n == 1 && g.codepoints == uni.codepoints) {
                out.push(uni);
            }
        }
        out
    }
}

/// Composition id for a codepoint sequence: the hash of its atom ids.
///
/// Shared with the ingester so extractor n-grams and word tokens address
/// the same composition rows.
pub fn composition_id(codepoints: &[u32]) -> Digest {
    let ids: Vec<Digest> = codepoints
        .iter()
        .map(|&cp| Digest::hash_codepoint(cp).unwrap_or_else(|_| Digest::hash(&cp.to_le_bytes())))
        .collect();
    Digest::hash_sequence(&ids)
}

/// Suffix-array n-gram extractor.
#[derive(Clone, Debug, Default)]
pub struct NgramExtractor {
    config: ExtractorConfig,
}

impl NgramExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        NgramExtractor { config }
    }

    /// Run one extraction pass. Pure and restartable; cancellation is
    /// observed between LCP intervals.
    pub fn extract(&self, seq: &[u32], cancel: &CancelToken) -> Result<Extraction, ExtractError> {
        let mut out = Extraction::default();

        // The active alphabet, threshold or not.
        let mut counts: HashMap<u32, u32> = HashMap::new();
        for &cp in seq {
            *counts.entry(cp).or_insert(0) += 1;
        }
        let mut unigrams: Vec<(u32, u32)> = counts.into_iter().collect();
        unigrams.sort_unstable();
        out.unigrams = unigrams
            .into_iter()
            .map(|(cp, freq)| make_ngram(vec![cp], freq, None))
            .collect();

        if seq.is_empty() {
            return Ok(out);
        }

        let sa = suffix_array(seq);
        let lcp = kasai_lcp(seq, &sa);
        let tau = self.config.min_frequency.max(2);

        // Stack walk over LCP intervals; each pop knows its parent depth.
        let n = seq.len();
        let mut stack: Vec<(usize, usize)> = vec![(0, 0)]; // (lcp, left bound)
        for i in 1..=n {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            let l = if i < n { lcp[i] } else { 0 };
            let mut lb = i - 1;
            while stack.last().map_or(false, |&(top_lcp, _)| top_lcp > l) {
                let (top_lcp, top_lb) = stack.pop().expect("stack top checked");
                let width = (i - top_lb) as u32;
                let parent_lcp = stack.last().map_or(0, |&(p, _)| p).max(l);
                if width >= tau {
                    self.emit_interval(
                        seq,
                        &sa,
                        top_lb,
                        i - 1,
                        parent_lcp,
                        top_lcp,
                        width,
                        &mut out.ngrams,
                    );
                }
                lb = top_lb;
            }
            if stack.last().map_or(true, |&(top_lcp, _)| top_lcp < l) {
                stack.push((l, lb));
            }
        }

        out.ngrams.sort_unstable_by(|a, b| (a.n, &a.codepoints).cmp(&(b.n, &b.codepoints)));
        Ok(out)
    }

    /// Emit one n-gram per depth this interval minimally covers.
    #[allow(clippy::too_many_arguments)]
    fn emit_interval(
        &self,
        seq: &[u32],
        sa: &[usize],
        lb: usize,
        rb: usize,
        parent_lcp: usize,
        lcp: usize,
        width: u32,
        out: &mut Vec<Ngram>,
    ) {
        let start = sa[lb];
        for depth in (parent_lcp + 1).max(1)..=lcp {
            let codepoints = seq[start..start + depth].to_vec();
            let positions = if self.config.track_positions {
                let mut p: Vec<usize> = sa[lb..=rb].to_vec();
                p.sort_unstable();
                Some(p)
            } else {
                None
            };
            out.push(make_ngram(codepoints, width, positions));
        }
    }
}

fn make_ngram(codepoints: Vec<u32>, frequency: u32, positions: Option<Vec<usize>>) -> Ngram {
    let is_rle = codepoints.windows(2).all(|w| w[0] == w[1]);
    Ngram {
        hash: composition_id(&codepoints),
        n: codepoints.len(),
        frequency,
        positions,
        is_rle,
        pattern_signature: pattern_signature(&codepoints),
        codepoints,
    }
}

/// Relabel distinct codepoints in first-appearance order: `X, Y, Z`, then
/// `A..W`, then `{n}` for pathological alphabets.
pub fn pattern_signature(codepoints: &[u32]) -> String {
    let mut labels: HashMap<u32, usize> = HashMap::new();
    let mut out = String::with_capacity(codepoints.len());
    for &cp in codepoints {
        let next = labels.len();
        let idx = *labels.entry(cp).or_insert(next);
        match idx {
            0..=2 => out.push((b'X' + idx as u8) as char),
            3..=25 => out.push((b'A' + (idx as u8 - 3)) as char),
            _ => {
                out.push('{');
                out.push_str(&idx.to_string());
                out.push('}');
            }
        }
    }
    out
}

// ============================================================================
// Suffix array (prefix doubling) and LCP (Kasai)
// ============================================================================

fn suffix_array(seq: &[u32]) -> Vec<usize> {
    let n = seq.len();
    let mut sa: Vec<usize> = (0..n).collect();

    // Coordinate-compressed initial ranks.
    let mut sorted: Vec<u32> = seq.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut rank: Vec<usize> = seq
        .iter()
        .map(|cp| sorted.binary_search(cp).expect("compressed alphabet"))
        .collect();

    let mut next_rank = vec![0usize; n];
    let mut k = 1;
    while k < n {
        let key = |i: usize| -> (usize, usize) {
            let second = if i + k < n { rank[i + k] + 1 } else { 0 };
            (rank[i], second)
        };
        sa.sort_unstable_by_key(|&i| key(i));

        next_rank[sa[0]] = 0;
        for w in 1..n {
            let bump = usize::from(key(sa[w - 1]) != key(sa[w]));
            next_rank[sa[w]] = next_rank[sa[w - 1]] + bump;
        }
        rank.copy_from_slice(&next_rank);
        if rank[sa[n - 1]] == n - 1 {
            break;
        }
        k <<= 1;
    }
    sa
}

/// `lcp[i]` = longest common prefix of suffixes `sa[i-1]` and `sa[i]`
/// (`lcp[0]` unused, zero).
fn kasai_lcp(seq: &[u32], sa: &[usize]) -> Vec<usize> {
    let n = seq.len();
    let mut rank = vec![0usize; n];
    for (i, &s) in sa.iter().enumerate() {
        rank[s] = i;
    }
    let mut lcp = vec![0usize; n];
    let mut h = 0usize;
    for i in 0..n {
        if rank[i] > 0 {
            let j = sa[rank[i] - 1];
            while i + h < n && j + h < n && seq[i + h] == seq[j + h] {
                h += 1;
            }
            lcp[rank[i]] = h;
            h = h.saturating_sub(1);
        } else {
            h = 0;
        }
    }
    lcp
}

// ============================================================================
// Tests
// ============================================================================
