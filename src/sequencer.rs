//! Semantic sequencer: weighted adjacency over codepoints and linearization
//!
//! The seeder's locality guarantee comes from here. Codepoints are related
//! by tiered, weighted, directed edges mined from the UCD pool; a stable
//! multi-level sort plus a strongest-edge traversal turns the pool into a
//! total order `s(c)` whose neighborhoods are semantically meaningful —
//! case pairs, decompositions, collation neighbors, confusables — rather
//! than codepoint-table accidents.
//!
//! ## Edge tiers (higher weight = stronger)
//!
//! | tier | weight | source |
//! |---|---|---|
//! | CasePair | 100 | simple case mappings |
//! | CanonicalDecomp | 95 | canonical decomposition members |
//! | UcaPrimary | 90 | adjacency in DUCET primary order |
//! | UcaSecondary | 85 | same primary, adjacent secondary |
//! | Confusable | 80 | confusables table |
//! | ScriptAdjacency | 70 | consecutive codepoints of one script |
//! | RadicalStroke | 65 | same radical, adjacent stroke count |
//! | EmojiZwj | 60 | adjacent members of ZWJ sequences |
//! | NumericAdjacency | 50 | adjacent numeric values |
//! | BlockAdjacency | 40 | consecutive codepoints of one block |
//! | CompatibilityDecomp | 30 | compatibility decomposition members |
//! | Default | 1 | consecutive assigned codepoints |
//!
//! ## Traversal order
//!
//! The sort key is `(category group, script group, UCA primary,
//! radical/strokes, codepoint)`. The first two levels are load-bearing and
//! the traversal never crosses them; within each maximal run of equal
//! `(category group, script group)` the walk starts at the earliest
//! unplaced codepoint in sort order, repeatedly follows the strongest
//! surviving edge (weight descending, then target codepoint ascending)
//! whose target is unplaced and inside the run, and falls back to the next
//! unplaced codepoint when the chain dies. The resulting order is locked
//! by golden tests.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::HashMap;

use tracing::debug;

use crate::hash::Digest;
use crate::ucd::{DecompositionKind, UcdData};

/// Edge tiers in the semantic adjacency graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    CasePair,
    CanonicalDecomp,
    UcaPrimary,
    UcaSecondary,
    Confusable,
    ScriptAdjacency,
    RadicalStroke,
    EmojiZwj,
    NumericAdjacency,
    BlockAdjacency,
    CompatibilityDecomp,
    Default,
}

impl EdgeKind {
    /// Tier weight; higher binds tighter.
    pub fn weight(self) -> u8 {
        match self {
            EdgeKind::CasePair => 100,
            EdgeKind::CanonicalDecomp => 95,
            EdgeKind::UcaPrimary => 90,
            EdgeKind::UcaSecondary => 85,
            EdgeKind::Confusable => 80,
            EdgeKind::ScriptAdjacency => 70,
            EdgeKind::RadicalStroke => 65,
            EdgeKind::EmojiZwj => 60,
            EdgeKind::NumericAdjacency => 50,
            EdgeKind::BlockAdjacency => 40,
            EdgeKind::CompatibilityDecomp => 30,
            EdgeKind::Default => 1,
        }
    }
}

/// Ranks for general-category groups; ties inside a rank are broken by the
/// later sort levels. Unknown categories sort last.
fn category_group(gc: &str) -> u8 {
    const ORDER: &[&str] = &[
        "Lu", "Ll", "Lt", "Lm", "Lo", // letters
        "Mn", "Mc", "Me", // marks
        "Nd", "Nl", "No", // numbers
        "Pc", "Pd", "Ps", "Pe", "Pi", "Pf", "Po", // punctuation
        "Sm", "Sc", "Sk", "So", // symbols
        "Zs", "Zl", "Zp", // separators
        "Cc", "Cf", "Co", "Cs", "Cn", // other
    ];
    ORDER.iter().position(|g| *g == gc).unwrap_or(ORDER.len()) as u8
}

/// The weighted out-edges of every assigned codepoint.
pub struct AdjacencyGraph {
    edges: HashMap<u32, Vec<(u32, u8)>>,
}

impl AdjacencyGraph {
    /// Mine the tiered edges from the pool.
    pub fn build(data: &UcdData) -> Self {
        let mut edges: HashMap<u32, Vec<(u32, u8)>> = HashMap::new();
        let mut add = |from: u32, to: u32, kind: EdgeKind| {
            if from != to && data.records.contains_key(&to) {
                edges.entry(from).or_default().push((to, kind.weight()));
            }
        };

        for (&cp, record) in &data.records {
            for target in [record.uppercase, record.lowercase, record.titlecase]
                .into_iter()
                .flatten()
            {
                add(cp, target, EdgeKind::CasePair);
            }
            if let Some(decomp) = &record.decomposition {
                let kind = match decomp.kind {
                    DecompositionKind::Canonical => EdgeKind::CanonicalDecomp,
                    DecompositionKind::Compatibility(_) => EdgeKind::CompatibilityDecomp,
                };
                for &member in &decomp.mapping {
                    add(cp, member, kind);
                }
            }
            for &target in &record.confusable_with {
                add(cp, target, EdgeKind::Confusable);
            }
        }

        // Adjacency tiers over sorted views of the pool.
        let mut by_uca: Vec<(u16, u16, u32)> = data
            .records
            .values()
            .filter_map(|r| Some((r.uca_primary?, r.uca_secondary.unwrap_or(0), r.codepoint)))
            .collect();
        by_uca.sort_unstable();
        for pair in by_uca.windows(2) {
            let ((p0, _, c0), (p1, _, c1)) = (pair[0], pair[1]);
            let kind = if p0 == p1 { EdgeKind::UcaSecondary } else { EdgeKind::UcaPrimary };
            add(c0, c1, kind);
            add(c1, c0, kind);
        }

        let mut by_script: Vec<(&str, u32)> = data
            .records
            .values()
            .filter_map(|r| Some((r.script.as_deref()?, r.codepoint)))
            .collect();
        by_script.sort_unstable();
        for pair in by_script.windows(2) {
            if pair[0].0 == pair[1].0 {
                add(pair[0].1, pair[1].1, EdgeKind::ScriptAdjacency);
                add(pair[1].1, pair[0].1, EdgeKind::ScriptAdjacency);
            }
        }

        let mut by_radical: Vec<(u16, i16, u32)> = data
            .records
            .values()
            .filter_map(|r| Some((r.radical?, r.strokes.unwrap_or(0), r.codepoint)))
            .collect();
        by_radical.sort_unstable();
        for pair in by_radical.windows(2) {
            if pair[0].0 == pair[1].0 {
                add(pair[0].2, pair[1].2, EdgeKind::RadicalStroke);
                add(pair[1].2, pair[0].2, EdgeKind::RadicalStroke);
            }
        }

        for &(a, b) in &data.zwj_pairs {
            add(a, b, EdgeKind::EmojiZwj);
            add(b, a, EdgeKind::EmojiZwj);
        }

        let mut by_numeric: Vec<(f64, u32)> = data
            .records
            .values()
            .filter_map(|r| Some((r.numeric_value?, r.codepoint)))
            .collect();
        by_numeric.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for pair in by_numeric.windows(2) {
            add(pair[0].1, pair[1].1, EdgeKind::NumericAdjacency);
            add(pair[1].1, pair[0].1, EdgeKind::NumericAdjacency);
        }

        let mut by_block: Vec<(&str, u32)> = data
            .records
            .values()
            .filter_map(|r| Some((r.block.as_deref()?, r.codepoint)))
            .collect();
        by_block.sort_unstable();
        for pair in by_block.windows(2) {
            if pair[0].0 == pair[1].0 {
                add(pair[0].1, pair[1].1, EdgeKind::BlockAdjacency);
                add(pair[1].1, pair[0].1, EdgeKind::BlockAdjacency);
            }
        }

        let assigned: Vec<u32> = data.records.keys().copied().collect();
        for pair in assigned.windows(2) {
            add(pair[0], pair[1], EdgeKind::Default);
        }

        // Keep only the strongest edge per (from, to), strongest first.
        for targets in edges.values_mut() {
            targets.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            let mut seen = std::collections::HashSet::new();
            targets.retain(|(to, _)| seen.insert(*to));
        }

        debug!(
            nodes = edges.len(),
            edges = edges.values().map(Vec::len).sum::<usize>(),
            "built semantic adjacency graph"
        );
        AdjacencyGraph { edges }
    }

    /// Out-edges of `cp`, strongest first.
    pub fn neighbors(&self, cp: u32) -> &[(u32, u8)] {
        self.edges.get(&cp).map_or(&[], Vec::as_slice)
    }
}

/// A total order over the assigned codepoints.
pub struct Sequencing {
    order: Vec<u32>,
    index: HashMap<u32, u64>,
}

impl Sequencing {
    /// Codepoints in sequence order.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    /// `s(c)`: the sequence index of an assigned codepoint.
    pub fn index_of(&self, cp: u32) -> Option<u64> {
        self.index.get(&cp).copied()
    }

    /// Assigned-codepoint count `M`.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Digest of the first `n` emitted indices (golden-seed lock).
    pub fn prefix_digest(&self, n: usize) -> Digest {
        let mut bytes = Vec::with_capacity(n.min(self.order.len()) * 4);
        for cp in self.order.iter().take(n) {
            bytes.extend_from_slice(&cp.to_le_bytes());
        }
        Digest::hash(&bytes)
    }
}

/// Linearize the pool: stable multi-level sort refined by the
/// strongest-edge traversal documented at module level.
pub fn sequence(data: &UcdData) -> Sequencing {
    let graph = AdjacencyGraph::build(data);

    #[derive(Clone)]
    struct Key<'a> {
        group: u8,
        script: (bool, &'a str),
        uca: (bool, u16),
        radical: (bool, u16, i16),
        cp: u32,
    }

    let mut keyed: Vec<Key<'_>> = data
        .records
        .values()
        .map(|r| Key {
            group: category_group(&r.general_category),
            script: match r.script.as_deref() {
                Some(s) => (false, s),
                None => (true, ""),
            },
            uca: match r.uca_primary {
                Some(p) => (false, p),
                None => (true, 0),
            },
            radical: match r.radical {
                Some(rad) => (false, rad, r.strokes.unwrap_or(0)),
                None => (true, 0, 0),
            },
            cp: r.codepoint,
        })
        .collect();
    keyed.sort_by(|a, b| {
        (a.group, a.script, a.uca, a.radical, a.cp).cmp(&(
            b.group, b.script, b.uca, b.radical, b.cp,
        ))
    });

    // Refine each (group, script) run with the strongest-edge chain walk.
    let mut order = Vec::with_capacity(keyed.len());
    let mut run_start = 0usize;
    while run_start < keyed.len() {
        let run_key = (keyed[run_start].group, keyed[run_start].script);
        let mut run_end = run_start;
        while run_end < keyed.len() && (keyed[run_end].group, keyed[run_end].script) == run_key {
            run_end += 1;
        }
        let run: Vec<u32> = keyed[run_start..run_end].iter().map(|k| k.cp).collect();
        let in_run: std::collections::HashSet<u32> = run.iter().copied().collect();
        let mut placed: std::collections::HashSet<u32> = std::collections::HashSet::new();

        let mut cursor = 0usize;
        while placed.len() < run.len() {
            while placed.contains(&run[cursor]) {
                cursor += 1;
            }
            let mut current = run[cursor];
            placed.insert(current);
            order.push(current);
            // Follow the strongest surviving edge while it stays in the run.
            'chain: loop {
                for &(target, _w) in graph.neighbors(current) {
                    if in_run.contains(&target) && !placed.contains(&target) {
                        placed.insert(target);
                        order.push(target);
                        current = target;
                        continue 'chain;
                    }
                }
                break;
            }
        }
        run_start = run_end;
    }

    let index = order
        .iter()
        .enumerate()
        .map(|(i, &cp)| (cp, i as u64))
        .collect();
    Sequencing { order, index }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = "\
0031;DIGIT ONE;Nd;0;EN;;1;1;1;N;;;;;
0041;LATIN CAPITAL LETTER A;Lu;0;L;;;;;N;;;;0061;
0042;LATIN CAPITAL LETTER B;Lu;0;L;;;;;N;;;;0062;
0061;LATIN SMALL LETTER A;Ll;0;L;;;;;N;;;0041;;0041
0062;LATIN SMALL LETTER B;Ll;0;L;;;;;N;;;0042;;0042
00C0;LATIN CAPITAL LETTER A WITH GRAVE;Lu;0;L;0041 0300;;;;N;;;;00E0;
0391;GREEK CAPITAL LETTER ALPHA;Lu;0;L;;;;;N;;;;03B1;
4E2D;CJK UNIFIED IDEOGRAPH-4E2D;Lo;0;L;;;;;N;;;;;
";

    fn pool() -> UcdData {
        UcdData::from_unicode_data(POOL, "UnicodeData.txt").unwrap()
    }

    #[test]
    fn edge_weights_follow_the_tier_table() {
        assert_eq!(EdgeKind::CasePair.weight(), 100);
        assert_eq!(EdgeKind::CanonicalDecomp.weight(), 95);
        assert_eq!(EdgeKind::UcaPrimary.weight(), 90);
        assert_eq!(EdgeKind::UcaSecondary.weight(), 85);
        assert_eq!(EdgeKind::Confusable.weight(), 80);
        assert_eq!(EdgeKind::ScriptAdjacency.weight(), 70);
        assert_eq!(EdgeKind::RadicalStroke.weight(), 65);
        assert_eq!(EdgeKind::EmojiZwj.weight(), 60);
        assert_eq!(EdgeKind::NumericAdjacency.weight(), 50);
        assert_eq!(EdgeKind::BlockAdjacency.weight(), 40);
        assert_eq!(EdgeKind::CompatibilityDecomp.weight(), 30);
        assert_eq!(EdgeKind::Default.weight(), 1);
    }

    #[test]
    fn case_pair_edges_bind_tightest() {
        let data = pool();
        let graph = AdjacencyGraph::build(&data);
        let a_edges = graph.neighbors(0x41);
        assert_eq!(a_edges.first(), Some(&(0x61, 100)));
    }

    #[test]
    fn decomposition_edges_point_at_members() {
        let data = pool();
        let graph = AdjacencyGraph::build(&data);
        // 0x300 is not in the pool, so only the base letter edge survives.
        assert!(graph.neighbors(0xC0).contains(&(0x41, 95)));
    }

    #[test]
    fn sequence_groups_categories_before_codepoints() {
        let data = pool();
        let seq = sequence(&data);
        let pos = |cp: u32| seq.index_of(cp).unwrap();
        // All uppercase letters precede all lowercase, which precede Lo,
        // which precede digits.
        for upper in [0x41u32, 0x42, 0xC0, 0x391] {
            for lower in [0x61u32, 0x62] {
                assert!(pos(upper) < pos(lower));
            }
        }
        assert!(pos(0x62) < pos(0x4E2D));
        assert!(pos(0x4E2D) < pos(0x31));
    }

    #[test]
    fn adjacent_letters_sequence_adjacently() {
        let data = pool();
        let seq = sequence(&data);
        let pos = |cp: u32| seq.index_of(cp).unwrap();
        // A and B are neighbors in their run; the CJK ideograph lives in
        // another run entirely.
        let gap_ab = pos(0x41).abs_diff(pos(0x42));
        let gap_a_han = pos(0x41).abs_diff(pos(0x4E2D));
        assert!(gap_ab < gap_a_han);
    }

    #[test]
    fn confusable_edge_reorders_within_run() {
        // Give ALPHA a confusable edge from A; the chain walk places it
        // directly after A, ahead of B.
        let mut data = pool();
        data.records.get_mut(&0x41).unwrap().confusable_with.push(0x391);
        let seq = sequence(&data);
        let pos = |cp: u32| seq.index_of(cp).unwrap();
        assert_eq!(pos(0x391), pos(0x41) + 1);
        assert!(pos(0x42) > pos(0x391));
    }

    #[test]
    fn golden_order_for_fixture_pool() {
        let data = pool();
        let seq = sequence(&data);
        // Locked traversal output: Lu run in codepoint order (no surviving
        // intra-run edges), then Ll, Lo, Nd.
        assert_eq!(seq.order(), &[0x41, 0x42, 0xC0, 0x391, 0x61, 0x62, 0x4E2D, 0x31]);
    }

    #[test]
    fn sequencing_is_deterministic() {
        let a = sequence(&pool()).prefix_digest(1024);
        let b = sequence(&pool()).prefix_digest(1024);
        assert_eq!(a, b);
    }

    #[test]
    fn indices_are_dense_and_total() {
        let data = pool();
        let seq = sequence(&data);
        assert_eq!(seq.len(), data.assigned_count());
        let mut seen: Vec<u64> = data
            .records
            .keys()
            .map(|&cp| seq.index_of(cp).unwrap())
            .collect();
        seen.sort_unstable();
        let expect: Vec<u64> = (0..seq.len() as u64).collect();
        assert_eq!(seen, expect);
    }
}
