//! Store contract and the in-memory reference store
//!
//! The relational store is an external collaborator; the core talks to it
//! through the [`Store`] trait, which captures exactly the capabilities the
//! core requires: bulk copy-in with the standard framings, ephemeral
//! staging tables merged under a conflict clause, primary-key counts,
//! atom read-back for the lookup cache, and transaction demarcation.
//!
//! [`MemStore`] is the reference implementation backing tests and local
//! runs: it decodes both COPY framings into typed rows and applies the
//! same conflict semantics a relational backend would (`DO NOTHING`,
//! unique-violation errors, and the rating merge clause).

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeMap;

use crate::copy::{decode_rows, Framing};
use crate::geometry::S3Point;
use crate::hash::Digest;
use crate::hilbert;
use crate::records::{table_schema, Value};

/// Failures surfaced by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Protocol-level failure; the raw message is carried verbatim.
    #[error("store protocol error: {0}")]
    Protocol(String),
    #[error("unique violation on {table} key {key}")]
    UniqueViolation { table: String, key: String },
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("store deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("transaction state error: {0}")]
    Transaction(String),
}

/// Conflict handling applied when a staging table merges into its target.
///
/// Modeled as a closed sum (the loader is polymorphic over behavior, not
/// over SQL strings); [`ConflictClause::as_sql`] renders the clause a
/// relational backend would execute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictClause {
    /// `ON CONFLICT (id) DO NOTHING` — the content-addressed default.
    DoNothing,
    /// No conflict clause; a duplicate key is an error.
    Error,
    /// The rating merge: fold the delta row into the persisted running
    /// weighted mean and add the observation counts.
    RatingMerge,
}

impl ConflictClause {
    /// Parse the configured clause text.
    pub fn parse(text: &str) -> Self {
        let t = text.to_ascii_lowercase();
        if t.contains("do nothing") || t.is_empty() {
            ConflictClause::DoNothing
        } else if t.contains("rating") {
            ConflictClause::RatingMerge
        } else {
            ConflictClause::Error
        }
    }

    /// The SQL rendering a relational backend would attach to the merge.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ConflictClause::DoNothing => "ON CONFLICT (id) DO NOTHING",
            ConflictClause::Error => "",
            ConflictClause::RatingMerge => {
                "ON CONFLICT (relation_id) DO UPDATE SET \
                 rating_value = (relation_rating.rating_value * relation_rating.observations \
                 + EXCLUDED.rating_value * EXCLUDED.observations) \
                 / (relation_rating.observations + EXCLUDED.observations), \
                 observations = relation_rating.observations + EXCLUDED.observations"
            }
        }
    }
}

/// One atom joined with its physicality, as read back for lookup.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AtomRow {
    pub codepoint: u32,
    pub atom_id: Digest,
    pub physicality_id: Digest,
    pub centroid: S3Point,
    pub hilbert: u128,
}

/// Minimum store capabilities the core requires.
pub trait Store: Send {
    /// Bulk copy a framed buffer into `table` (real or staging).
    /// Returns the number of rows written.
    fn copy_in(&mut self, table: &str, framing: Framing, data: &[u8]) -> Result<u64, StoreError>;

    /// Create an ephemeral staging table shaped like `like`.
    fn create_staging(&mut self, staging: &str, like: &str) -> Result<(), StoreError>;

    /// Merge a staging table into its target under `conflict`.
    /// Returns the number of rows actually inserted.
    fn merge_staging(
        &mut self,
        staging: &str,
        into: &str,
        conflict: &ConflictClause,
    ) -> Result<u64, StoreError>;

    /// Drop a staging table.
    fn drop_staging(&mut self, staging: &str) -> Result<(), StoreError>;

    /// Rows currently persisted in `table`.
    fn row_count(&self, table: &str) -> Result<u64, StoreError>;

    /// Fetch atoms (joined with physicality) for up to a batch of codepoints.
    fn query_atoms(&mut self, codepoints: &[u32]) -> Result<Vec<AtomRow>, StoreError>;

    /// Stream every atom row (preload path).
    fn scan_atoms(&mut self, visit: &mut dyn FnMut(AtomRow)) -> Result<(), StoreError>;

    /// Begin / commit / roll back a transaction.
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory reference store
// ============================================================================

type Row = Vec<Value>;
type Table = BTreeMap<Vec<u8>, Row>;

#[derive(Clone, Debug)]
struct Staging {
    like: String,
    rows: Vec<Row>,
}

/// In-memory store with the contract's conflict and transaction semantics.
#[derive(Default)]
pub struct MemStore {
    tables: BTreeMap<String, Table>,
    staging: BTreeMap<String, Staging>,
    snapshot: Option<(BTreeMap<String, Table>, BTreeMap<String, Staging>)>,
}

fn row_key(row: &Row) -> Vec<u8> {
    match row.first() {
        Some(Value::Id(d)) => d.as_bytes().to_vec(),
        Some(other) => format!("{other:?}").into_bytes(),
        None => Vec::new(),
    }
}

fn as_i64(v: &Value) -> Result<i64, StoreError> {
    match v {
        Value::Int4(x) => Ok(*x as i64),
        Value::Int8(x) => Ok(*x),
        _ => Err(StoreError::Protocol(format!("expected integer, got {v:?}"))),
    }
}

fn as_f64(v: &Value) -> Result<f64, StoreError> {
    match v {
        Value::Float8(x) => Ok(*x),
        _ => Err(StoreError::Protocol(format!("expected float, got {v:?}"))),
    }
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    /// Persisted row for `id`, for assertions and read paths.
    pub fn get(&self, table: &str, id: &Digest) -> Option<&Row> {
        self.tables.get(table)?.get(id.as_bytes().as_slice())
    }

    /// All persisted rows of a table, keyed by primary key bytes.
    pub fn table_rows(&self, table: &str) -> Option<&Table> {
        self.tables.get(table)
    }

    /// Number of live staging tables (zero after a well-behaved batch).
    pub fn staging_count(&self) -> usize {
        self.staging.len()
    }

    fn schema_for(&self, table: &str) -> Result<&'static [crate::records::ColType], StoreError> {
        table_schema(table).ok_or_else(|| StoreError::UnknownTable(table.to_owned()))
    }

    fn atom_row(&self, row: &Row) -> Result<AtomRow, StoreError> {
        let bad = |what: &str| StoreError::Protocol(format!("malformed atom join: {what}"));
        let (atom_id, codepoint, physicality_id) = match (&row[0], &row[1], &row[2]) {
            (Value::Id(a), Value::Int4(cp), Value::Id(p)) => (*a, *cp as u32, *p),
            _ => return Err(bad("atom row shape")),
        };
        let phys = self
            .tables
            .get("physicality")
            .and_then(|t| t.get(physicality_id.as_bytes().as_slice()))
            .ok_or_else(|| bad("dangling physicality_id"))?;
        let centroid = match &phys[1] {
            Value::Point(p) => {
                S3Point::new(*p).map_err(|e| bad(&format!("stored centroid: {e}")))?
            }
            _ => return Err(bad("physicality centroid shape")),
        };
        let (hi, lo) = (as_i64(&phys[2])? as u64, as_i64(&phys[3])? as u64);
        Ok(AtomRow {
            codepoint,
            atom_id,
            physicality_id,
            centroid,
            hilbert: hilbert::from_words(hi, lo),
        })
    }
}

impl Store for MemStore {
    fn copy_in(&mut self, table: &str, framing: Framing, data: &[u8]) -> Result<u64, StoreError> {
        if let Some(staging) = self.staging.get(table) {
            let schema = self.schema_for(&staging.like.clone())?;
            let rows = decode_rows(framing, schema, data)
                .map_err(|e| StoreError::Protocol(e.to_string()))?;
            let n = rows.len() as u64;
            self.staging
                .get_mut(table)
                .expect("staging checked above")
                .rows
                .extend(rows);
            return Ok(n);
        }
        let schema = self.schema_for(table)?;
        let rows = decode_rows(framing, schema, data)
            .map_err(|e| StoreError::Protocol(e.to_string()))?;
        let target = self.tables.entry(table.to_owned()).or_default();
        let mut written = 0u64;
        for row in rows {
            let key = row_key(&row);
            if target.contains_key(&key) {
                return Err(StoreError::UniqueViolation {
                    table: table.to_owned(),
                    key: hex::encode(&key),
                });
            }
            target.insert(key, row);
            written += 1;
        }
        Ok(written)
    }

    fn create_staging(&mut self, staging: &str, like: &str) -> Result<(), StoreError> {
        self.schema_for(like)?;
        if self.staging.contains_key(staging) {
            return Err(StoreError::Protocol(format!("staging table {staging} already exists")));
        }
        self.staging
            .insert(staging.to_owned(), Staging { like: like.to_owned(), rows: Vec::new() });
        Ok(())
    }

    fn merge_staging(
        &mut self,
        staging: &str,
        into: &str,
        conflict: &ConflictClause,
    ) -> Result<u64, StoreError> {
        let staged = self
            .staging
            .get(staging)
            .ok_or_else(|| StoreError::UnknownTable(staging.to_owned()))?
            .rows
            .clone();
        self.schema_for(into)?;
        let target = self.tables.entry(into.to_owned()).or_default();
        let mut inserted = 0u64;
        for row in staged {
            let key = row_key(&row);
            match target.get_mut(&key) {
                None => {
                    let row = match conflict {
                        // Insert resolution for a delta row: the weighted sum
                        // becomes the mean over its own observations.
                        ConflictClause::RatingMerge => {
                            let obs = as_i64(&row[1])? as f64;
                            let weighted = as_f64(&row[2])?;
                            let mut r = row;
                            if obs > 0.0 {
                                r[2] = Value::Float8(weighted / obs);
                            }
                            r
                        }
                        _ => row,
                    };
                    target.insert(key, row);
                    inserted += 1;
                }
                Some(existing) => match conflict {
                    ConflictClause::DoNothing => {}
                    ConflictClause::Error => {
                        return Err(StoreError::UniqueViolation {
                            table: into.to_owned(),
                            key: hex::encode(&key),
                        });
                    }
                    ConflictClause::RatingMerge => {
                        let old_obs = as_i64(&existing[1])? as f64;
                        let old_rating = as_f64(&existing[2])?;
                        let obs_delta = as_i64(&row[1])? as f64;
                        let weighted_delta = as_f64(&row[2])?;
                        let new_obs = old_obs + obs_delta;
                        if new_obs > 0.0 {
                            existing[2] = Value::Float8(
                                (old_rating * old_obs + weighted_delta) / new_obs,
                            );
                        }
                        existing[1] = Value::Int8(new_obs as i64);
                    }
                },
            }
        }
        Ok(inserted)
    }

    fn drop_staging(&mut self, staging: &str) -> Result<(), StoreError> {
        self.staging
            .remove(staging)
            .map(|_| ())
            .ok_or_else(|| StoreError::UnknownTable(staging.to_owned()))
    }

    fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        self.schema_for(table)?;
        Ok(self.tables.get(table).map_or(0, |t| t.len() as u64))
    }

    fn query_atoms(&mut self, codepoints: &[u32]) -> Result<Vec<AtomRow>, StoreError> {
        let wanted: std::collections::HashSet<u32> = codepoints.iter().copied().collect();
        let mut out = Vec::with_capacity(wanted.len());
        if let Some(atoms) = self.tables.get("atom") {
            for row in atoms.values() {
                if let Value::Int4(cp) = row[1] {
                    if wanted.contains(&(cp as u32)) {
                        out.push(self.atom_row(row)?);
                    }
                }
            }
        }
        Ok(out)
    }

    fn scan_atoms(&mut self, visit: &mut dyn FnMut(AtomRow)) -> Result<(), StoreError> {
        if let Some(atoms) = self.tables.get("atom") {
            for row in atoms.values() {
                visit(self.atom_row(row)?);
            }
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::Transaction("transaction already in progress".into()));
        }
        self.snapshot = Some((self.tables.clone(), self.staging.clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Transaction("no transaction in progress".into()))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let (tables, staging) = self
            .snapshot
            .take()
            .ok_or_else(|| StoreError::Transaction("no transaction in progress".into()))?;
        self.tables = tables;
        self.staging = staging;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::{encode_row, frame_binary};
    use crate::records::{Record, RelationRating};

    fn framed_rating(relation: Digest, obs: i64, weighted: f64, k: f64) -> Vec<u8> {
        let row = RelationRating { relation_id: relation, observations: obs, rating_value: weighted, k_factor: k };
        let mut buf = Vec::new();
        encode_row(Framing::Binary, &row.fields(), &mut buf);
        frame_binary(&buf)
    }

    #[test]
    fn conflict_clause_parses_config_text() {
        assert_eq!(ConflictClause::parse("ON CONFLICT (id) DO NOTHING"), ConflictClause::DoNothing);
        assert_eq!(ConflictClause::parse(""), ConflictClause::DoNothing);
        assert_eq!(ConflictClause::parse("rating-merge"), ConflictClause::RatingMerge);
        assert_eq!(ConflictClause::parse("strict"), ConflictClause::Error);
    }

    #[test]
    fn copy_in_rejects_unknown_table() {
        let mut s = MemStore::new();
        assert!(matches!(
            s.copy_in("nope", Framing::Binary, &frame_binary(&[])),
            Err(StoreError::UnknownTable(_))
        ));
    }

    #[test]
    fn rating_merge_insert_then_fold() {
        let mut s = MemStore::new();
        let rel = Digest::hash(b"rel");

        // First batch: 2 observations with weighted sum 2000 -> mean 1000.
        s.create_staging("tmp_relation_rating_0", "relation_rating").unwrap();
        s.copy_in("tmp_relation_rating_0", Framing::Binary, &framed_rating(rel, 2, 2000.0, 32.0))
            .unwrap();
        let inserted = s
            .merge_staging("tmp_relation_rating_0", "relation_rating", &ConflictClause::RatingMerge)
            .unwrap();
        s.drop_staging("tmp_relation_rating_0").unwrap();
        assert_eq!(inserted, 1);
        let row = s.get("relation_rating", &rel).unwrap();
        assert_eq!(row[1], Value::Int8(2));
        assert_eq!(row[2], Value::Float8(1000.0));

        // Second batch: 2 more observations at 1100 each.
        s.create_staging("tmp_relation_rating_1", "relation_rating").unwrap();
        s.copy_in("tmp_relation_rating_1", Framing::Binary, &framed_rating(rel, 2, 2200.0, 32.0))
            .unwrap();
        let inserted = s
            .merge_staging("tmp_relation_rating_1", "relation_rating", &ConflictClause::RatingMerge)
            .unwrap();
        s.drop_staging("tmp_relation_rating_1").unwrap();
        assert_eq!(inserted, 0);
        let row = s.get("relation_rating", &rel).unwrap();
        assert_eq!(row[1], Value::Int8(4));
        // (1000*2 + 2200) / 4 = 1050.
        assert_eq!(row[2], Value::Float8(1050.0));
    }

    #[test]
    fn transactions_roll_back_copies() {
        let mut s = MemStore::new();
        let atom = crate::records::Atom {
            id: Digest::hash_codepoint(0x41).unwrap(),
            codepoint: 0x41,
            physicality_id: Digest::hash(b"p"),
        };
        let mut buf = Vec::new();
        encode_row(Framing::Binary, &atom.fields(), &mut buf);

        s.begin().unwrap();
        s.copy_in("atom", Framing::Binary, &frame_binary(&buf)).unwrap();
        assert_eq!(s.row_count("atom").unwrap(), 1);
        s.rollback().unwrap();
        assert_eq!(s.row_count("atom").unwrap(), 0);

        s.begin().unwrap();
        s.copy_in("atom", Framing::Binary, &frame_binary(&buf)).unwrap();
        s.commit().unwrap();
        assert_eq!(s.row_count("atom").unwrap(), 1);
    }

    #[test]
    fn nested_transactions_are_rejected() {
        let mut s = MemStore::new();
        s.begin().unwrap();
        assert!(matches!(s.begin(), Err(StoreError::Transaction(_))));
        s.commit().unwrap();
        assert!(matches!(s.commit(), Err(StoreError::Transaction(_))));
    }

    #[test]
    fn binary_framing_is_bit_exact_through_the_store() {
        // Encode on the loader side, decode on the store side, and get the
        // identical typed row back.
        let mut s = MemStore::new();
        let comp = crate::records::Composition {
            id: Digest::hash(b"bit-exact"),
            physicality_id: Digest::hash(b"phys"),
        };
        let mut buf = Vec::new();
        encode_row(Framing::Binary, &comp.fields(), &mut buf);
        s.copy_in("composition", Framing::Binary, &frame_binary(&buf)).unwrap();
        let row = s.get("composition", &comp.id).unwrap();
        assert_eq!(row[0], Value::Id(comp.id));
        assert_eq!(row[1], Value::Id(comp.physicality_id));
    }
}
