//! Whole-system configuration
//!
//! One serde struct mirrors the recognized options; every field has a
//! default so an empty JSON object (or no file at all) yields the stock
//! configuration. Unknown keys are rejected — a typo'd option should fail
//! loudly, not silently fall back.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::copy::{Framing, LoaderConfig, DEFAULT_FLUSH_ROWS};
use crate::ngram::ExtractorConfig;
use crate::rating::{DEFAULT_INITIAL_RATING, DEFAULT_K_FACTOR};
use crate::store::ConflictClause;

/// Configuration load failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// UCD directory for the seeder.
    pub ucd_data_dir: Option<PathBuf>,
    pub atom_lookup: AtomLookupSection,
    pub ngram: NgramSection,
    pub ingest: IngestSection,
    pub bulk_loader: BulkLoaderSection,
    pub rating: RatingSection,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AtomLookupSection {
    /// Preload the full atom table before ingesting.
    pub preload: bool,
}

impl Default for AtomLookupSection {
    fn default() -> Self {
        AtomLookupSection { preload: false }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NgramSection {
    pub min_frequency: u32,
    pub track_positions: bool,
}

impl Default for NgramSection {
    fn default() -> Self {
        NgramSection { min_frequency: 2, track_positions: true }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestSection {
    /// Co-occurrence window, in composition tokens.
    pub cooccurrence_window: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        IngestSection { cooccurrence_window: 16 }
    }
}

/// Loader framing, as configured.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    Binary,
    Text,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkLoaderSection {
    pub mode: FramingMode,
    pub use_staging: bool,
    pub flush_rows: usize,
    pub conflict_clause: String,
}

impl Default for BulkLoaderSection {
    fn default() -> Self {
        BulkLoaderSection {
            mode: FramingMode::Binary,
            use_staging: true,
            flush_rows: DEFAULT_FLUSH_ROWS,
            conflict_clause: "ON CONFLICT (id) DO NOTHING".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RatingSection {
    pub initial: f64,
    pub k_factor: f64,
}

impl Default for RatingSection {
    fn default() -> Self {
        RatingSection { initial: DEFAULT_INITIAL_RATING, k_factor: DEFAULT_K_FACTOR }
    }
}

impl Config {
    /// Load from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_owned(), source })?;
        serde_json::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_owned(), source })
    }

    /// The loader options this configuration selects.
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            framing: match self.bulk_loader.mode {
                FramingMode::Binary => Framing::Binary,
                FramingMode::Text => Framing::Text,
            },
            use_staging: self.bulk_loader.use_staging,
            use_dedup: true,
            flush_rows: self.bulk_loader.flush_rows.max(1),
            conflict: ConflictClause::parse(&self.bulk_loader.conflict_clause),
        }
    }

    /// The extractor options this configuration selects.
    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            min_frequency: self.ngram.min_frequency,
            track_positions: self.ngram.track_positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_recognized_options() {
        let c = Config::default();
        assert!(c.ucd_data_dir.is_none());
        assert!(!c.atom_lookup.preload);
        assert_eq!(c.ngram.min_frequency, 2);
        assert!(c.ngram.track_positions);
        assert_eq!(c.ingest.cooccurrence_window, 16);
        assert_eq!(c.bulk_loader.mode, FramingMode::Binary);
        assert!(c.bulk_loader.use_staging);
        assert_eq!(c.bulk_loader.flush_rows, 65_536);
        assert_eq!(c.rating.initial, 1000.0);
        assert_eq!(c.rating.k_factor, 32.0);
        assert_eq!(c.loader_config().conflict, ConflictClause::DoNothing);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let c: Config = serde_json::from_str(
            r#"{"ngram": {"min_frequency": 3}, "bulk_loader": {"mode": "text"}}"#,
        )
        .unwrap();
        assert_eq!(c.ngram.min_frequency, 3);
        assert!(c.ngram.track_positions);
        assert_eq!(c.bulk_loader.mode, FramingMode::Text);
        assert_eq!(c.loader_config().framing, Framing::Text);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{"ngarm": {}}"#).is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"ingest": {"cooccurrence_window": 8}}"#).unwrap();
        let c = Config::from_json_file(&path).unwrap();
        assert_eq!(c.ingest.cooccurrence_window, 8);
        assert!(matches!(
            Config::from_json_file(&dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
