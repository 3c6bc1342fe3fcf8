//! Bulk loader: COPY framings, buffering, staging-table dedup
//!
//! Millions of rows move into the store through per-table loaders. Each
//! loader buffers encoded rows and ships them in bulk-copy frames:
//!
//! - **Binary**: the standard copy header (`PGCOPY\n\377\r\n\0` plus two
//!   32-bit flag/extension words), then per row a 16-bit field count and
//!   per field a 32-bit big-endian length (−1 for NULL) and the payload,
//!   then a 16-bit −1 trailer.
//! - **Text**: tab-separated fields with the standard backslash escapes,
//!   one row per newline, `\N` as the null marker.
//!
//! The framing is chosen at construction and cannot change mid-stream
//! ([`Framing`] is a closed sum type, not a trait hierarchy). Buffers flush
//! every [`LoaderConfig::flush_rows`] rows; staging mode copies each flush
//! into an ephemeral `tmp_<table>_<counter>` table and merges it with the
//! configured conflict clause, which is how the load path deduplicates
//! against persisted rows. An in-memory seen-id set additionally suppresses
//! duplicates within one batch when `use_dedup` is on.
//!
//! State machine: `Idle → CopyInProgress → (Flush → Idle)*`. A store error
//! terminates the copy and the loader surfaces the error verbatim; the
//! destructor force-flushes any remainder unless an error already closed
//! the stream.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::hash::Digest;
use crate::records::{ColType, Record, Value};
use crate::store::{ConflictClause, Store, StoreError};
use crate::CancelToken;

/// Shared handle to the store connection a loader writes through.
pub type SharedStore = Arc<Mutex<dyn Store + Send>>;

/// Rows per flush (the remainder goes out on explicit finish).
pub const DEFAULT_FLUSH_ROWS: usize = 65_536;

/// Wire framing for bulk copies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Length-prefixed big-endian binary fields.
    Binary,
    /// Escaped text with tab-separated fields.
    Text,
}

/// The fixed binary-copy signature.
const BINARY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Framing-level failures (malformed frames, not store failures).
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FramingError {
    #[error("invalid framing: {0}")]
    Invalid(String),
}

/// Loader-level failures.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// The store rejected the copy; the raw message is attached verbatim.
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("copy cancelled at flush boundary")]
    Cancelled,
}

// ============================================================================
// Field and row encoding
// ============================================================================

fn binary_field(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(&(-1i32).to_be_bytes()),
        Value::Id(d) => {
            out.extend_from_slice(&16i32.to_be_bytes());
            out.extend_from_slice(d.as_bytes());
        }
        Value::Int4(v) => {
            out.extend_from_slice(&4i32.to_be_bytes());
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Int8(v) => {
            out.extend_from_slice(&8i32.to_be_bytes());
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Float8(v) => {
            out.extend_from_slice(&8i32.to_be_bytes());
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Value::Bool(v) => {
            out.extend_from_slice(&1i32.to_be_bytes());
            out.push(u8::from(*v));
        }
        Value::Text(s) => {
            out.extend_from_slice(&(s.len() as i32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Point(p) => {
            out.extend_from_slice(&32i32.to_be_bytes());
            for c in p {
                out.extend_from_slice(&c.to_bits().to_be_bytes());
            }
        }
    }
}

/// Render a value as its raw text cell (pre-escaping).
fn text_cell(value: &Value) -> Option<String> {
    Some(match value {
        Value::Null => return None,
        Value::Id(d) => format!("\\x{}", d.to_hex()),
        Value::Int4(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::Float8(v) => v.to_string(),
        Value::Bool(v) => if *v { "t" } else { "f" }.to_string(),
        Value::Text(s) => s.clone(),
        Value::Point(p) => format!("({},{},{},{})", p[0], p[1], p[2], p[3]),
    })
}

fn text_escape(cell: &str, out: &mut Vec<u8>) {
    for b in cell.bytes() {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(b),
        }
    }
}

/// Append one encoded row to a framing buffer.
pub fn encode_row(framing: Framing, fields: &[Value], out: &mut Vec<u8>) {
    match framing {
        Framing::Binary => {
            out.extend_from_slice(&(fields.len() as u16).to_be_bytes());
            for f in fields {
                binary_field(f, out);
            }
        }
        Framing::Text => {
            for (i, f) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(b'\t');
                }
                match text_cell(f) {
                    None => out.extend_from_slice(b"\\N"),
                    Some(cell) => text_escape(&cell, out),
                }
            }
            out.push(b'\n');
        }
    }
}

/// Wrap buffered binary rows with the copy header and trailer.
pub fn frame_binary(rows: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows.len() + 21);
    out.extend_from_slice(BINARY_SIGNATURE);
    out.extend_from_slice(&0u32.to_be_bytes()); // flags
    out.extend_from_slice(&0u32.to_be_bytes()); // header extension length
    out.extend_from_slice(rows);
    out.extend_from_slice(&(-1i16).to_be_bytes());
    out
}

// ============================================================================
// Decoding (used by the in-memory store and by framing tests)
// ============================================================================

fn take<'a>(data: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8], FramingError> {
    if data.len() < n {
        return Err(FramingError::Invalid(format!("truncated {what}")));
    }
    let (head, rest) = data.split_at(n);
    *data = rest;
    Ok(head)
}

fn decode_binary_field(data: &mut &[u8], ty: ColType) -> Result<Value, FramingError> {
    let len_bytes = take(data, 4, "field length")?;
    let len = i32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);
    if len < 0 {
        return Ok(Value::Null);
    }
    let payload = take(data, len as usize, "field payload")?;
    let fixed = |want: usize| -> Result<(), FramingError> {
        if payload.len() != want {
            return Err(FramingError::Invalid(format!(
                "field length {} does not match type width {want}",
                payload.len()
            )));
        }
        Ok(())
    };
    Ok(match ty {
        ColType::Id => {
            fixed(16)?;
            let mut b = [0u8; 16];
            b.copy_from_slice(payload);
            Value::Id(Digest(b))
        }
        ColType::Int4 => {
            fixed(4)?;
            Value::Int4(i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]))
        }
        ColType::Int8 => {
            fixed(8)?;
            let mut b = [0u8; 8];
            b.copy_from_slice(payload);
            Value::Int8(i64::from_be_bytes(b))
        }
        ColType::Float8 => {
            fixed(8)?;
            let mut b = [0u8; 8];
            b.copy_from_slice(payload);
            Value::Float8(f64::from_bits(u64::from_be_bytes(b)))
        }
        ColType::Bool => {
            fixed(1)?;
            Value::Bool(payload[0] != 0)
        }
        ColType::Text => Value::Text(
            String::from_utf8(payload.to_vec())
                .map_err(|e| FramingError::Invalid(format!("text field not utf-8: {e}")))?,
        ),
        ColType::Point => {
            fixed(32)?;
            let mut p = [0.0f64; 4];
            for (i, chunk) in payload.chunks_exact(8).enumerate() {
                let mut b = [0u8; 8];
                b.copy_from_slice(chunk);
                p[i] = f64::from_bits(u64::from_be_bytes(b));
            }
            Value::Point(p)
        }
    })
}

fn text_unescape(cell: &str) -> Result<String, FramingError> {
    let mut out = String::with_capacity(cell.len());
    let mut chars = cell.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                // Unknown escapes pass the escaped character through.
                out.push(other);
            }
            None => return Err(FramingError::Invalid("dangling backslash".into())),
        }
    }
    Ok(out)
}

fn parse_text_cell(raw: &str, ty: ColType) -> Result<Value, FramingError> {
    let bad = |what: &str| FramingError::Invalid(format!("bad {what} cell: {raw:?}"));
    Ok(match ty {
        ColType::Id => {
            let hex = raw.strip_prefix("\\x").ok_or_else(|| bad("id"))?;
            Value::Id(Digest::from_hex(hex).map_err(|_| bad("id"))?)
        }
        ColType::Int4 => Value::Int4(raw.parse().map_err(|_| bad("int4"))?),
        ColType::Int8 => Value::Int8(raw.parse().map_err(|_| bad("int8"))?),
        ColType::Float8 => Value::Float8(raw.parse().map_err(|_| bad("float8"))?),
        ColType::Bool => match raw {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            _ => return Err(bad("bool")),
        },
        ColType::Text => Value::Text(raw.to_owned()),
        ColType::Point => {
            let inner = raw
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| bad("point"))?;
            let parts: Vec<&str> = inner.split(',').collect();
            if parts.len() != 4 {
                return Err(bad("point"));
            }
            let mut p = [0.0f64; 4];
            for (i, part) in parts.iter().enumerate() {
                p[i] = part.trim().parse().map_err(|_| bad("point"))?;
            }
            Value::Point(p)
        }
    })
}

/// Decode a complete framed buffer back into typed rows.
pub fn decode_rows(
    framing: Framing,
    schema: &[ColType],
    data: &[u8],
) -> Result<Vec<Vec<Value>>, FramingError> {
    match framing {
        Framing::Binary => {
            let mut rest = data;
            let header = take(&mut rest, 11, "copy signature")?;
            if header != BINARY_SIGNATURE {
                return Err(FramingError::Invalid("bad copy signature".into()));
            }
            let flags = take(&mut rest, 4, "copy flags")?;
            if flags != [0, 0, 0, 0] {
                return Err(FramingError::Invalid("unsupported copy flags".into()));
            }
            let ext = take(&mut rest, 4, "header extension")?;
            let ext_len = u32::from_be_bytes([ext[0], ext[1], ext[2], ext[3]]) as usize;
            take(&mut rest, ext_len, "header extension body")?;

            let mut rows = Vec::new();
            loop {
                let count_bytes = take(&mut rest, 2, "field count")?;
                let count = i16::from_be_bytes([count_bytes[0], count_bytes[1]]);
                if count == -1 {
                    if !rest.is_empty() {
                        return Err(FramingError::Invalid("bytes after trailer".into()));
                    }
                    return Ok(rows);
                }
                if count as usize != schema.len() {
                    return Err(FramingError::Invalid(format!(
                        "row has {count} fields, schema has {}",
                        schema.len()
                    )));
                }
                let mut row = Vec::with_capacity(schema.len());
                for ty in schema {
                    row.push(decode_binary_field(&mut rest, *ty)?);
                }
                rows.push(row);
            }
        }
        Framing::Text => {
            let text = std::str::from_utf8(data)
                .map_err(|e| FramingError::Invalid(format!("text frame not utf-8: {e}")))?;
            let mut rows = Vec::new();
            for line in text.split('\n') {
                if line.is_empty() || line == "\\." {
                    continue;
                }
                let cells: Vec<&str> = line.split('\t').collect();
                if cells.len() != schema.len() {
                    return Err(FramingError::Invalid(format!(
                        "row has {} cells, schema has {}",
                        cells.len(),
                        schema.len()
                    )));
                }
                let mut row = Vec::with_capacity(schema.len());
                for (cell, ty) in cells.iter().zip(schema) {
                    if *cell == "\\N" {
                        row.push(Value::Null);
                    } else {
                        row.push(parse_text_cell(&text_unescape(cell)?, *ty)?);
                    }
                }
                rows.push(row);
            }
            Ok(rows)
        }
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Construction-time options for loaders cut by a factory.
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    pub framing: Framing,
    pub use_staging: bool,
    pub use_dedup: bool,
    pub flush_rows: usize,
    pub conflict: ConflictClause,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            framing: Framing::Binary,
            use_staging: true,
            use_dedup: true,
            flush_rows: DEFAULT_FLUSH_ROWS,
            conflict: ConflictClause::DoNothing,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LoaderState {
    Idle,
    CopyInProgress,
    Failed,
}

/// Totals reported by [`BulkLoader::finish`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows shipped to the store (after in-batch dedup).
    pub rows_sent: u64,
    /// Rows the store actually inserted (after conflict resolution).
    pub rows_inserted: u64,
    /// Framed bytes shipped to the store.
    pub bytes_sent: u64,
}

/// Streams records of one type into one table.
pub struct BulkLoader<R: Record> {
    store: SharedStore,
    config: LoaderConfig,
    staging_seq: Arc<AtomicU64>,
    cancel: CancelToken,
    seen: HashSet<Digest>,
    buf: Vec<u8>,
    rows_buffered: usize,
    state: LoaderState,
    report: LoadReport,
    _marker: PhantomData<fn(R)>,
}

impl<R: Record> BulkLoader<R> {
    fn new(
        store: SharedStore,
        config: LoaderConfig,
        staging_seq: Arc<AtomicU64>,
        cancel: CancelToken,
    ) -> Self {
        BulkLoader {
            store,
            config,
            staging_seq,
            cancel,
            seen: HashSet::new(),
            buf: Vec::new(),
            rows_buffered: 0,
            state: LoaderState::Idle,
            report: LoadReport::default(),
            _marker: PhantomData,
        }
    }

    /// Buffer one record, flushing if the threshold is reached.
    pub fn push(&mut self, record: &R) -> Result<(), CopyError> {
        if self.state == LoaderState::Failed {
            return Err(StoreError::Protocol("loader closed by prior error".into()).into());
        }
        if self.config.use_dedup && !self.seen.insert(record.key()) {
            return Ok(());
        }
        self.state = LoaderState::CopyInProgress;
        encode_row(self.config.framing, &record.fields(), &mut self.buf);
        self.rows_buffered += 1;
        if self.rows_buffered >= self.config.flush_rows {
            self.flush()?;
        }
        Ok(())
    }

    /// Ship the buffered rows (if any) and return to `Idle`.
    pub fn flush(&mut self) -> Result<(), CopyError> {
        if self.rows_buffered == 0 {
            self.state = LoaderState::Idle;
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            self.state = LoaderState::Failed;
            return Err(CopyError::Cancelled);
        }
        let frame = match self.config.framing {
            Framing::Binary => frame_binary(&self.buf),
            Framing::Text => std::mem::take(&mut self.buf),
        };
        let rows = self.rows_buffered as u64;
        let frame_len = frame.len() as u64;
        let result = self.send_frame(&frame, rows);
        self.buf.clear();
        self.rows_buffered = 0;
        match result {
            Ok(inserted) => {
                self.report.rows_sent += rows;
                self.report.rows_inserted += inserted;
                self.report.bytes_sent += frame_len;
                self.state = LoaderState::Idle;
                debug!(table = R::TABLE, rows, inserted, "flushed copy segment");
                Ok(())
            }
            Err(e) => {
                self.state = LoaderState::Failed;
                Err(e)
            }
        }
    }

    fn send_frame(&mut self, frame: &[u8], rows: u64) -> Result<u64, CopyError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| StoreError::Protocol("store connection poisoned".into()))?;
        if self.config.use_staging {
            let staging = format!(
                "tmp_{}_{}",
                R::TABLE,
                self.staging_seq.fetch_add(1, Ordering::Relaxed)
            );
            store.create_staging(&staging, R::TABLE)?;
            store.copy_in(&staging, self.config.framing, frame)?;
            let merged = store.merge_staging(&staging, R::TABLE, &self.config.conflict);
            store.drop_staging(&staging)?;
            Ok(merged?)
        } else {
            let inserted = store.copy_in(R::TABLE, self.config.framing, frame)?;
            debug_assert!(inserted <= rows);
            Ok(inserted)
        }
    }

    /// Final flush; returns the totals for this loader.
    pub fn finish(&mut self) -> Result<LoadReport, CopyError> {
        self.flush()?;
        Ok(self.report)
    }

    /// Rows inserted so far (updated at flush boundaries).
    pub fn rows_inserted(&self) -> u64 {
        self.report.rows_inserted
    }
}

impl<R: Record> Drop for BulkLoader<R> {
    fn drop(&mut self) {
        if self.state != LoaderState::Failed && self.rows_buffered > 0 {
            if let Err(e) = self.flush() {
                warn!(table = R::TABLE, error = %e, "force-flush on drop failed");
            }
        }
    }
}

/// Cuts per-table loaders sharing one staging counter and cancel token.
pub struct LoaderFactory {
    config: LoaderConfig,
    staging_seq: Arc<AtomicU64>,
    cancel: CancelToken,
}

impl LoaderFactory {
    pub fn new(config: LoaderConfig, cancel: CancelToken) -> Self {
        LoaderFactory { config, staging_seq: Arc::new(AtomicU64::new(0)), cancel }
    }

    /// A loader for records of type `R`, writing through `store`.
    pub fn loader<R: Record>(&self, store: SharedStore) -> BulkLoader<R> {
        BulkLoader::new(
            store,
            self.config.clone(),
            Arc::clone(&self.staging_seq),
            self.cancel.clone(),
        )
    }

    /// Override the conflict clause for one table's loader.
    pub fn loader_with_conflict<R: Record>(
        &self,
        store: SharedStore,
        conflict: ConflictClause,
    ) -> BulkLoader<R> {
        let mut config = self.config.clone();
        config.conflict = conflict;
        BulkLoader::new(store, config, Arc::clone(&self.staging_seq), self.cancel.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
