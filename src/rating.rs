//! Rating engine: per-batch aggregation of relation observations
//!
//! Every co-occurrence observation of a relation is a vote. Within one
//! batch the engine folds votes per relation into `(observations_delta,
//! weighted_rating_delta)` so that one upsert row per relation reaches the
//! store regardless of how often the relation was seen. Reconciliation with
//! the persisted row happens entirely in the merge clause
//! (`ConflictClause::RatingMerge`); the engine never reads store state.
//!
//! A vote's value is `initial + k·(2s − 1)` for signal strength `s ∈ [0,1]`,
//! so a neutral signal of 0.5 votes exactly the initial rating and the
//! k-factor bounds how far any single vote can pull. Each flushed relation
//! also yields one append-only [`RelationEvidence`] row pinning the vote to
//! the content that produced it.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::HashMap;

use crate::hash::Digest;
use crate::records::{RelationEvidence, RelationRating};

/// Default initial rating for a never-seen relation.
pub const DEFAULT_INITIAL_RATING: f64 = 1000.0;

/// Default k-factor.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

#[derive(Clone, Debug, Default)]
struct VoteAcc {
    observations: i64,
    weighted_sum: f64,
    strength_sum: f64,
}

/// Accumulates votes for the duration of one batch.
pub struct RatingEngine {
    initial: f64,
    k_factor: f64,
    votes: HashMap<Digest, VoteAcc>,
}

impl RatingEngine {
    pub fn new(initial: f64, k_factor: f64) -> Self {
        RatingEngine { initial, k_factor, votes: HashMap::new() }
    }

    /// Record one observation of `relation` with the given signal strength.
    pub fn observe(&mut self, relation: Digest, signal_strength: f64) {
        let s = signal_strength.clamp(0.0, 1.0);
        let vote = self.initial + self.k_factor * (2.0 * s - 1.0);
        let acc = self.votes.entry(relation).or_default();
        acc.observations += 1;
        acc.weighted_sum += vote;
        acc.strength_sum += s;
    }

    /// Relations with at least one vote in the current batch.
    pub fn pending(&self) -> usize {
        self.votes.len()
    }

    /// Drain the batch into delta rows and evidence.
    ///
    /// Rows come out sorted by relation id so batches are byte-stable.
    /// `batch_seq` discriminates evidence ids across batches of the same
    /// content.
    pub fn flush(
        &mut self,
        content_id: Digest,
        batch_seq: u64,
    ) -> (Vec<RelationRating>, Vec<RelationEvidence>) {
        let mut entries: Vec<(Digest, VoteAcc)> = self.votes.drain().collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut ratings = Vec::with_capacity(entries.len());
        let mut evidence = Vec::with_capacity(entries.len());
        for (relation, acc) in entries {
            let mean_strength = acc.strength_sum / acc.observations as f64;
            let mean_vote = acc.weighted_sum / acc.observations as f64;
            ratings.push(RelationRating {
                relation_id: relation,
                observations: acc.observations,
                rating_value: acc.weighted_sum,
                k_factor: self.k_factor,
            });
            let mut seed = Vec::with_capacity(32);
            seed.extend_from_slice(content_id.as_bytes());
            seed.extend_from_slice(relation.as_bytes());
            evidence.push(RelationEvidence {
                id: Digest::hash_with_context(&seed, &batch_seq.to_le_bytes()),
                content_id,
                relation_id: relation,
                is_valid: true,
                source_rating: mean_vote,
                signal_strength: mean_strength,
            });
        }
        (ratings, evidence)
    }
}

impl Default for RatingEngine {
    fn default() -> Self {
        RatingEngine::new(DEFAULT_INITIAL_RATING, DEFAULT_K_FACTOR)
    }
}
