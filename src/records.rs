//! Store records: value types, builders, and column bindings
//!
//! The nine persisted entities are plain value structs keyed by [`Digest`].
//! Construction goes through builders that enforce the two invariants every
//! content-addressed row must hold before it is allowed near the loader:
//!
//! - **Normalization**: every centroid is a validated [`S3Point`]; the
//!   Hilbert key is derived from the centroid, never supplied.
//! - **Hash-id consistency**: a composition id is the hash of its atom-id
//!   sequence, a relation id the hash of its participant sequence, a
//!   physicality id the hash of its canonical centroid bytes.
//!
//! Each record implements [`Record`], binding it to its table name, column
//! list, primary key, and typed field values. The bulk loader is generic
//! over that trait and never inspects entity semantics.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::geometry::{spherical_centroid, S3Point};
use crate::hash::Digest;
use crate::hilbert;

/// Errors from record builders.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RecordError {
    /// A composition or relation needs at least one participant.
    #[error("cannot build {0} from an empty sequence")]
    EmptySequence(&'static str),
}

// ============================================================================
// Typed field values
// ============================================================================

/// Column types understood by the COPY framings and the in-memory store.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColType {
    Id,
    Int4,
    Int8,
    Float8,
    Bool,
    Text,
    Point,
}

/// One field value of a row, typed for framing-specific encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Id(Digest),
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Bool(bool),
    Text(String),
    /// Spatial point: four IEEE-754 doubles in `(x, y, z, w)` order, the
    /// fourth interpreted as the store's "m" ordinate.
    Point([f64; 4]),
    Null,
}

/// A record that can be streamed through the bulk loader.
pub trait Record {
    /// Destination table.
    const TABLE: &'static str;
    /// Column names, in emit order; the first column is the primary key.
    const COLUMNS: &'static [&'static str];
    /// Primary key (used for in-batch dedup).
    fn key(&self) -> Digest;
    /// Field values, aligned with [`Record::COLUMNS`].
    fn fields(&self) -> Vec<Value>;
}

/// Column types for a table, aligned with the record's column list.
///
/// The in-memory store uses this to decode framed rows; a relational store
/// would carry the same schema in DDL.
pub fn table_schema(table: &str) -> Option<&'static [ColType]> {
    use ColType::*;
    let schema: &'static [ColType] = match table {
        "physicality" => &[Id, Point, Int8, Int8, Text],
        "atom" => &[Id, Int4, Id],
        "composition" => &[Id, Id],
        "composition_sequence" => &[Id, Id, Id, Int4, Int4],
        "relation" => &[Id, Id],
        "relation_sequence" => &[Id, Id, Id, Int4, Int4],
        "relation_rating" => &[Id, Int8, Float8, Float8],
        "relation_evidence" => &[Id, Id, Id, Bool, Float8, Float8],
        "content" => &[Id, Id, Text, Text, Int8, Text],
        _ => return None,
    };
    Some(schema)
}

// ============================================================================
// Physicality
// ============================================================================

/// Geometric facet of an entity: centroid, Hilbert key, optional trajectory.
#[derive(Clone, Debug, PartialEq)]
pub struct Physicality {
    pub id: Digest,
    pub centroid: S3Point,
    pub hilbert: u128,
    /// Ordered S³ points; absent by default, nothing in the core writes it.
    pub trajectory: Option<Vec<S3Point>>,
}

impl Physicality {
    /// Build the physicality owned by an entity at `centroid`.
    ///
    /// The id hashes the canonical centroid bytes; the Hilbert key is
    /// derived from the centroid mapped into the unit hypercube.
    pub fn for_centroid(centroid: S3Point) -> Self {
        let id = Digest::hash(&centroid.canonical_bytes());
        Self::with_id(id, centroid)
    }

    /// Build a physicality whose id is additionally bound to a context.
    ///
    /// Used where several entities share one degenerate centroid (the
    /// unassigned-codepoint axis point) but each must own its row.
    pub fn for_centroid_with_context(centroid: S3Point, context: &[u8]) -> Self {
        let id = Digest::hash_with_context(&centroid.canonical_bytes(), context);
        Self::with_id(id, centroid)
    }

    fn with_id(id: Digest, centroid: S3Point) -> Self {
        Physicality {
            id,
            centroid,
            hilbert: hilbert::encode(centroid.to_unit_cube()),
            trajectory: None,
        }
    }
}

impl Record for Physicality {
    const TABLE: &'static str = "physicality";
    const COLUMNS: &'static [&'static str] =
        &["id", "centroid", "hilbert_hi", "hilbert_lo", "trajectory"];

    fn key(&self) -> Digest {
        self.id
    }

    fn fields(&self) -> Vec<Value> {
        let (hi, lo) = hilbert::to_words(self.hilbert);
        let trajectory = match &self.trajectory {
            None => Value::Null,
            Some(points) => Value::Text(
                points
                    .iter()
                    .map(|p| {
                        let [x, y, z, w] = p.coords();
                        format!("({x},{y},{z},{w})")
                    })
                    .collect::<Vec<_>>()
                    .join(";"),
            ),
        };
        vec![
            Value::Id(self.id),
            Value::Point(self.centroid.coords()),
            Value::Int8(hi as i64),
            Value::Int8(lo as i64),
            trajectory,
        ]
    }
}

// ============================================================================
// Atom
// ============================================================================

/// Canonical record for one Unicode codepoint.
#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    pub id: Digest,
    pub codepoint: u32,
    pub physicality_id: Digest,
}

impl Record for Atom {
    const TABLE: &'static str = "atom";
    const COLUMNS: &'static [&'static str] = &["id", "codepoint", "physicality_id"];

    fn key(&self) -> Digest {
        self.id
    }

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Id(self.id),
            Value::Int4(self.codepoint as i32),
            Value::Id(self.physicality_id),
        ]
    }
}

// ============================================================================
// Composition
// ============================================================================

/// Content-addressed sequence of atoms.
#[derive(Clone, Debug, PartialEq)]
pub struct Composition {
    pub id: Digest,
    pub physicality_id: Digest,
}

impl Record for Composition {
    const TABLE: &'static str = "composition";
    const COLUMNS: &'static [&'static str] = &["id", "physicality_id"];

    fn key(&self) -> Digest {
        self.id
    }

    fn fields(&self) -> Vec<Value> {
        vec![Value::Id(self.id), Value::Id(self.physicality_id)]
    }
}

/// Membership row: one per distinct atom of a composition.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionSequence {
    pub id: Digest,
    pub composition_id: Digest,
    pub atom_id: Digest,
    pub ordinal: i32,
    pub occurrences: i32,
}

impl Record for CompositionSequence {
    const TABLE: &'static str = "composition_sequence";
    const COLUMNS: &'static [&'static str] =
        &["id", "composition_id", "atom_id", "ordinal", "occurrences"];

    fn key(&self) -> Digest {
        self.id
    }

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Id(self.id),
            Value::Id(self.composition_id),
            Value::Id(self.atom_id),
            Value::Int4(self.ordinal),
            Value::Int4(self.occurrences),
        ]
    }
}

/// A composition with its owned physicality and membership rows.
#[derive(Clone, Debug)]
pub struct CompositionBundle {
    pub physicality: Physicality,
    pub composition: Composition,
    pub sequence: Vec<CompositionSequence>,
}

/// Assemble a composition from its atom sequence.
///
/// `atoms` is the full ordered sequence (multiplicities included); the id
/// hashes the atom-id sequence, the centroid averages one position per
/// sequence element, and membership rows collapse to one per distinct atom
/// in first-appearance order with `occurrences` counting multiplicity.
pub fn build_composition(atoms: &[(Digest, S3Point)]) -> Result<CompositionBundle, RecordError> {
    if atoms.is_empty() {
        return Err(RecordError::EmptySequence("composition"));
    }
    let ids: Vec<Digest> = atoms.iter().map(|(id, _)| *id).collect();
    let positions: Vec<S3Point> = atoms.iter().map(|(_, p)| *p).collect();
    let id = Digest::hash_sequence(&ids);
    let physicality = Physicality::for_centroid(spherical_centroid(&positions).point);

    let mut sequence: Vec<CompositionSequence> = Vec::new();
    for atom_id in &ids {
        if let Some(row) = sequence.iter_mut().find(|r| r.atom_id == *atom_id) {
            row.occurrences += 1;
        } else {
            let ordinal = sequence.len() as i32;
            sequence.push(CompositionSequence {
                id: Digest::hash_with_context(id.as_bytes(), &ordinal.to_le_bytes()),
                composition_id: id,
                atom_id: *atom_id,
                ordinal,
                occurrences: 1,
            });
        }
    }

    Ok(CompositionBundle {
        composition: Composition { id, physicality_id: physicality.id },
        physicality,
        sequence,
    })
}

// ============================================================================
// Relation
// ============================================================================

/// Content-addressed co-occurrence of compositions.
#[derive(Clone, Debug, PartialEq)]
pub struct Relation {
    pub id: Digest,
    pub physicality_id: Digest,
}

impl Record for Relation {
    const TABLE: &'static str = "relation";
    const COLUMNS: &'static [&'static str] = &["id", "physicality_id"];

    fn key(&self) -> Digest {
        self.id
    }

    fn fields(&self) -> Vec<Value> {
        vec![Value::Id(self.id), Value::Id(self.physicality_id)]
    }
}

/// Membership row: one per distinct participant composition.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationSequence {
    pub id: Digest,
    pub relation_id: Digest,
    pub composition_id: Digest,
    pub ordinal: i32,
    pub occurrences: i32,
}

impl Record for RelationSequence {
    const TABLE: &'static str = "relation_sequence";
    const COLUMNS: &'static [&'static str] =
        &["id", "relation_id", "composition_id", "ordinal", "occurrences"];

    fn key(&self) -> Digest {
        self.id
    }

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Id(self.id),
            Value::Id(self.relation_id),
            Value::Id(self.composition_id),
            Value::Int4(self.ordinal),
            Value::Int4(self.occurrences),
        ]
    }
}

/// A relation with its owned physicality and membership rows.
#[derive(Clone, Debug)]
pub struct RelationBundle {
    pub physicality: Physicality,
    pub relation: Relation,
    pub sequence: Vec<RelationSequence>,
}

/// Assemble a relation over participant compositions.
///
/// `participants` are `(composition_id, composition centroid)` in canonical
/// order; the relation id hashes the id sequence and the centroid averages
/// the participant centroids.
pub fn build_relation(participants: &[(Digest, S3Point)]) -> Result<RelationBundle, RecordError> {
    if participants.is_empty() {
        return Err(RecordError::EmptySequence("relation"));
    }
    let ids: Vec<Digest> = participants.iter().map(|(id, _)| *id).collect();
    let positions: Vec<S3Point> = participants.iter().map(|(_, p)| *p).collect();
    let id = Digest::hash_sequence(&ids);
    let physicality = Physicality::for_centroid(spherical_centroid(&positions).point);

    let mut sequence: Vec<RelationSequence> = Vec::new();
    for comp_id in &ids {
        if let Some(row) = sequence.iter_mut().find(|r| r.composition_id == *comp_id) {
            row.occurrences += 1;
        } else {
            let ordinal = sequence.len() as i32;
            sequence.push(RelationSequence {
                id: Digest::hash_with_context(id.as_bytes(), &ordinal.to_le_bytes()),
                relation_id: id,
                composition_id: *comp_id,
                ordinal,
                occurrences: 1,
            });
        }
    }

    Ok(RelationBundle {
        relation: Relation { id, physicality_id: physicality.id },
        physicality,
        sequence,
    })
}

// ============================================================================
// Rating, evidence, content
// ============================================================================

/// Rating delta row for one relation within one batch.
///
/// `observations` and `rating_value` carry the *delta* semantics of the
/// merge clause: on first insert the store resolves the row to
/// `rating = rating_value / observations`; on conflict it folds the delta
/// into the running weighted mean and adds the observation count.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationRating {
    pub relation_id: Digest,
    pub observations: i64,
    pub rating_value: f64,
    pub k_factor: f64,
}

impl Record for RelationRating {
    const TABLE: &'static str = "relation_rating";
    const COLUMNS: &'static [&'static str] =
        &["relation_id", "observations", "rating_value", "k_factor"];

    fn key(&self) -> Digest {
        self.relation_id
    }

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Id(self.relation_id),
            Value::Int8(self.observations),
            Value::Float8(self.rating_value),
            Value::Float8(self.k_factor),
        ]
    }
}

/// Append-only provenance row pinning a rating vote to its source content.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationEvidence {
    pub id: Digest,
    pub content_id: Digest,
    pub relation_id: Digest,
    pub is_valid: bool,
    pub source_rating: f64,
    pub signal_strength: f64,
}

impl Record for RelationEvidence {
    const TABLE: &'static str = "relation_evidence";
    const COLUMNS: &'static [&'static str] =
        &["id", "content_id", "relation_id", "is_valid", "source_rating", "signal_strength"];

    fn key(&self) -> Digest {
        self.id
    }

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Id(self.id),
            Value::Id(self.content_id),
            Value::Id(self.relation_id),
            Value::Bool(self.is_valid),
            Value::Float8(self.source_rating),
            Value::Float8(self.signal_strength),
        ]
    }
}

/// One ingestion event's source blob, deduplicated on its hash.
#[derive(Clone, Debug, PartialEq)]
pub struct Content {
    pub id: Digest,
    pub content_hash: Digest,
    pub content_type: String,
    pub mime_type: String,
    pub size: i64,
    pub language: Option<String>,
}

impl Content {
    /// Build the content record for a raw blob; the id is the content hash.
    pub fn for_bytes(bytes: &[u8], content_type: &str, mime_type: &str) -> Self {
        let hash = Digest::hash(bytes);
        Content {
            id: hash,
            content_hash: hash,
            content_type: content_type.to_owned(),
            mime_type: mime_type.to_owned(),
            size: bytes.len() as i64,
            language: None,
        }
    }
}

impl Record for Content {
    const TABLE: &'static str = "content";
    const COLUMNS: &'static [&'static str] =
        &["id", "content_hash", "content_type", "mime_type", "size", "language"];

    fn key(&self) -> Digest {
        self.id
    }

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Id(self.id),
            Value::Id(self.content_hash),
            Value::Text(self.content_type.clone()),
            Value::Text(self.mime_type.clone()),
            Value::Int8(self.size),
            match &self.language {
                Some(l) => Value::Text(l.clone()),
                None => Value::Null,
            },
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================
