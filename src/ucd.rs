//! Unicode Character Database parsing
//!
//! The seeder's input is a directory of UCD data files. `UnicodeData.txt`
//! is required and defines the assigned-codepoint pool (ranged
//! `First`/`Last` pairs are expanded); every other file is optional and
//! layers properties onto the pool:
//!
//! - `Scripts.txt`, `ScriptExtensions.txt`, `Blocks.txt`, `DerivedAge.txt`
//! - `EastAsianWidth.txt`, `LineBreak.txt`, `HangulSyllableType.txt`
//! - `IndicSyllabicCategory.txt`, `IndicPositionalCategory.txt`
//! - `WordBreakProperty.txt`, `SentenceBreakProperty.txt`,
//!   `GraphemeBreakProperty.txt` (found at the directory root or under
//!   `auxiliary/`, where the UCD ships them)
//! - `ArabicShaping.txt` (joining type and joining group)
//! - `DerivedNormalizationProps.txt` (NFC/NFD/NFKC/NFKD quick checks)
//! - `NameAliases.txt`
//! - `emoji-data.txt`, `emoji-zwj-sequences.txt`
//! - `confusables.txt` (single-codepoint pairs)
//! - `allkeys.txt` (DUCET; first collation element's primary/secondary)
//! - `Unihan_IrgSources.txt` (`kRSUnicode` radical/stroke)
//!
//! Parsing is strict where the data is load-bearing: one malformed record
//! aborts the whole phase with its file and line number. Optional files
//! referencing codepoints outside the pool are tolerated (the pool is
//! authoritative).

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

/// Count of codepoints in the 21-bit Unicode codespace.
pub const CODESPACE: u32 = 0x110000;

/// Errors from UCD loading.
#[derive(Debug, thiserror::Error)]
pub enum UcdError {
    #[error("missing UCD file: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("{file}:{line}: malformed UCD record: {detail}")]
    Malformed { file: String, line: usize, detail: String },
    #[error("reading {}: {source}", file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decomposition kind from `UnicodeData.txt` field 5.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecompositionKind {
    Canonical,
    /// Compatibility decomposition with its formatting tag (`compat`,
    /// `font`, `super`, …).
    Compatibility(String),
}

/// Decomposition mapping of one codepoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decomposition {
    pub kind: DecompositionKind,
    pub mapping: Vec<u32>,
}

/// Normalization quick-check value. Codepoints not listed in
/// `DerivedNormalizationProps.txt` check as `Yes`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum QuickCheck {
    #[default]
    Yes,
    Maybe,
    No,
}

/// Everything the sequencer wants to know about one assigned codepoint.
#[derive(Clone, Debug, Default)]
pub struct CodepointRecord {
    pub codepoint: u32,
    pub name: String,
    pub general_category: String,
    pub combining_class: u8,
    pub bidi_class: String,
    pub decomposition: Option<Decomposition>,
    pub numeric_value: Option<f64>,
    pub uppercase: Option<u32>,
    pub lowercase: Option<u32>,
    pub titlecase: Option<u32>,
    pub script: Option<String>,
    pub script_extensions: Vec<String>,
    pub block: Option<String>,
    pub age: Option<String>,
    pub east_asian_width: Option<String>,
    pub line_break: Option<String>,
    pub hangul_syllable_type: Option<String>,
    pub indic_syllabic: Option<String>,
    pub indic_positional: Option<String>,
    pub word_break: Option<String>,
    pub sentence_break: Option<String>,
    pub grapheme_break: Option<String>,
    pub joining_type: Option<String>,
    pub joining_group: Option<String>,
    pub nfc_qc: QuickCheck,
    pub nfd_qc: QuickCheck,
    pub nfkc_qc: QuickCheck,
    pub nfkd_qc: QuickCheck,
    pub name_aliases: Vec<String>,
    pub is_emoji: bool,
    pub is_emoji_component: bool,
    pub radical: Option<u16>,
    pub strokes: Option<i16>,
    pub uca_primary: Option<u16>,
    pub uca_secondary: Option<u16>,
    pub confusable_with: Vec<u32>,
}

/// The parsed pool plus cross-codepoint structures.
#[derive(Debug, Default)]
pub struct UcdData {
    /// Assigned codepoints, keyed by scalar value.
    pub records: BTreeMap<u32, CodepointRecord>,
    /// Adjacent members of emoji ZWJ sequences.
    pub zwj_pairs: Vec<(u32, u32)>,
}

impl UcdData {
    /// Number of assigned codepoints in the pool.
    pub fn assigned_count(&self) -> usize {
        self.records.len()
    }

    /// Load a UCD directory. Only `UnicodeData.txt` is mandatory.
    pub fn load_dir(dir: &Path) -> Result<UcdData, UcdError> {
        let unicode_data = dir.join("UnicodeData.txt");
        if !unicode_data.is_file() {
            return Err(UcdError::MissingFile(unicode_data));
        }
        let mut data = UcdData::from_unicode_data(&read(&unicode_data)?, "UnicodeData.txt")?;
        info!(assigned = data.assigned_count(), "parsed UnicodeData.txt");

        if let Some(text) = read_optional(&dir.join("Scripts.txt"))? {
            for (range, value) in parse_property_file(&text, "Scripts.txt")? {
                data.apply(range, |r| r.script = Some(value.clone()));
            }
        }
        if let Some(text) = read_optional(&dir.join("ScriptExtensions.txt"))? {
            for (range, value) in parse_property_file(&text, "ScriptExtensions.txt")? {
                let exts: Vec<String> = value.split_whitespace().map(str::to_owned).collect();
                data.apply(range, |r| r.script_extensions = exts.clone());
            }
        }
        if let Some(text) = read_optional(&dir.join("Blocks.txt"))? {
            for (range, value) in parse_property_file(&text, "Blocks.txt")? {
                data.apply(range, |r| r.block = Some(value.clone()));
            }
        }
        if let Some(text) = read_optional(&dir.join("DerivedAge.txt"))? {
            for (range, value) in parse_property_file(&text, "DerivedAge.txt")? {
                data.apply(range, |r| r.age = Some(value.clone()));
            }
        }
        if let Some(text) = read_optional(&dir.join("EastAsianWidth.txt"))? {
            for (range, value) in parse_property_file(&text, "EastAsianWidth.txt")? {
                data.apply(range, |r| r.east_asian_width = Some(value.clone()));
            }
        }
        if let Some(text) = read_optional(&dir.join("LineBreak.txt"))? {
            for (range, value) in parse_property_file(&text, "LineBreak.txt")? {
                data.apply(range, |r| r.line_break = Some(value.clone()));
            }
        }
        if let Some(text) = read_optional(&dir.join("HangulSyllableType.txt"))? {
            for (range, value) in parse_property_file(&text, "HangulSyllableType.txt")? {
                data.apply(range, |r| r.hangul_syllable_type = Some(value.clone()));
            }
        }
        if let Some(text) = read_optional(&dir.join("IndicSyllabicCategory.txt"))? {
            for (range, value) in parse_property_file(&text, "IndicSyllabicCategory.txt")? {
                data.apply(range, |r| r.indic_syllabic = Some(value.clone()));
            }
        }
        if let Some(text) = read_optional(&dir.join("IndicPositionalCategory.txt"))? {
            for (range, value) in parse_property_file(&text, "IndicPositionalCategory.txt")? {
                data.apply(range, |r| r.indic_positional = Some(value.clone()));
            }
        }
        if let Some(text) = read_aux(dir, "WordBreakProperty.txt")? {
            for (range, value) in parse_property_file(&text, "WordBreakProperty.txt")? {
                data.apply(range, |r| r.word_break = Some(value.clone()));
            }
        }
        if let Some(text) = read_aux(dir, "SentenceBreakProperty.txt")? {
            for (range, value) in parse_property_file(&text, "SentenceBreakProperty.txt")? {
                data.apply(range, |r| r.sentence_break = Some(value.clone()));
            }
        }
        if let Some(text) = read_aux(dir, "GraphemeBreakProperty.txt")? {
            for (range, value) in parse_property_file(&text, "GraphemeBreakProperty.txt")? {
                data.apply(range, |r| r.grapheme_break = Some(value.clone()));
            }
        }
        if let Some(text) = read_optional(&dir.join("ArabicShaping.txt"))? {
            for (cp, jt, jg) in parse_arabic_shaping(&text, "ArabicShaping.txt")? {
                if let Some(r) = data.records.get_mut(&cp) {
                    r.joining_type = Some(jt);
                    r.joining_group = Some(jg);
                }
            }
        }
        if let Some(text) = read_optional(&dir.join("DerivedNormalizationProps.txt"))? {
            for (range, form, value) in
                parse_normalization_props(&text, "DerivedNormalizationProps.txt")?
            {
                data.apply(range, |r| match form {
                    QcForm::Nfc => r.nfc_qc = value,
                    QcForm::Nfd => r.nfd_qc = value,
                    QcForm::Nfkc => r.nfkc_qc = value,
                    QcForm::Nfkd => r.nfkd_qc = value,
                });
            }
        }
        if let Some(text) = read_optional(&dir.join("NameAliases.txt"))? {
            for (cp, alias) in parse_name_aliases(&text, "NameAliases.txt")? {
                if let Some(r) = data.records.get_mut(&cp) {
                    r.name_aliases.push(alias);
                }
            }
        }
        if let Some(text) = read_optional(&dir.join("emoji-data.txt"))? {
            for (range, value) in parse_property_file(&text, "emoji-data.txt")? {
                match value.as_str() {
                    "Emoji" => data.apply(range, |r| r.is_emoji = true),
                    "Emoji_Component" => data.apply(range, |r| r.is_emoji_component = true),
                    _ => {}
                }
            }
        }
        if let Some(text) = read_optional(&dir.join("emoji-zwj-sequences.txt"))? {
            data.zwj_pairs = parse_zwj_sequences(&text, "emoji-zwj-sequences.txt")?;
        }
        if let Some(text) = read_optional(&dir.join("confusables.txt"))? {
            for (source, target) in parse_confusables(&text, "confusables.txt")? {
                if let Some(r) = data.records.get_mut(&source) {
                    r.confusable_with.push(target);
                }
            }
        }
        if let Some(text) = read_optional(&dir.join("allkeys.txt"))? {
            for (cp, primary, secondary) in parse_allkeys(&text, "allkeys.txt")? {
                if let Some(r) = data.records.get_mut(&cp) {
                    r.uca_primary = Some(primary);
                    r.uca_secondary = Some(secondary);
                }
            }
        }
        if let Some(text) = read_optional(&dir.join("Unihan_IrgSources.txt"))? {
            for (cp, radical, strokes) in parse_unihan_rs(&text, "Unihan_IrgSources.txt")? {
                if let Some(r) = data.records.get_mut(&cp) {
                    r.radical = Some(radical);
                    r.strokes = Some(strokes);
                }
            }
        }

        Ok(data)
    }

    /// Parse the mandatory file alone (fixtures and tests enter here).
    pub fn from_unicode_data(text: &str, file: &str) -> Result<UcdData, UcdError> {
        let mut records = BTreeMap::new();
        let mut range_start: Option<(u32, CodepointRecord)> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(';').collect();
            if fields.len() != 15 {
                return Err(UcdError::Malformed {
                    file: file.to_owned(),
                    line: line_no,
                    detail: format!("expected 15 fields, found {}", fields.len()),
                });
            }
            let cp = parse_hex_cp(fields[0], file, line_no)?;
            let record = parse_unicode_data_fields(cp, &fields, file, line_no)?;
            let name = fields[1];

            if name.ends_with(", First>") {
                if range_start.is_some() {
                    return Err(UcdError::Malformed {
                        file: file.to_owned(),
                        line: line_no,
                        detail: "nested range start".into(),
                    });
                }
                range_start = Some((cp, record));
                continue;
            }
            if name.ends_with(", Last>") {
                let (start, template) = range_start.take().ok_or_else(|| UcdError::Malformed {
                    file: file.to_owned(),
                    line: line_no,
                    detail: "range end without start".into(),
                })?;
                let stem = name
                    .trim_start_matches('<')
                    .trim_end_matches(", Last>")
                    .to_uppercase();
                for c in start..=cp {
                    let mut r = template.clone();
                    r.codepoint = c;
                    r.name = format!("{stem}-{c:04X}");
                    records.insert(c, r);
                }
                continue;
            }
            records.insert(cp, record);
        }

        if range_start.is_some() {
            return Err(UcdError::Malformed {
                file: file.to_owned(),
                line: text.lines().count(),
                detail: "unterminated codepoint range".into(),
            });
        }
        Ok(UcdData { records, zwj_pairs: Vec::new() })
    }

    fn apply<F: FnMut(&mut CodepointRecord)>(
        &mut self,
        range: std::ops::RangeInclusive<u32>,
        mut f: F,
    ) {
        for (_, record) in self.records.range_mut(range) {
            f(record);
        }
    }
}

// ============================================================================
// Field-level parsers
// ============================================================================

fn read(path: &Path) -> Result<String, UcdError> {
    fs::read_to_string(path).map_err(|source| UcdError::Io { file: path.to_owned(), source })
}

fn read_optional(path: &Path) -> Result<Option<String>, UcdError> {
    if !path.is_file() {
        debug!(file = %path.display(), "optional UCD file absent");
        return Ok(None);
    }
    read(path).map(Some)
}

/// The segmentation property files ship under `auxiliary/`; accept them at
/// the directory root as well.
fn read_aux(dir: &Path, name: &str) -> Result<Option<String>, UcdError> {
    if let Some(text) = read_optional(&dir.join(name))? {
        return Ok(Some(text));
    }
    read_optional(&dir.join("auxiliary").join(name))
}

fn parse_hex_cp(s: &str, file: &str, line: usize) -> Result<u32, UcdError> {
    let cp = u32::from_str_radix(s.trim().trim_start_matches("U+"), 16).map_err(|_| {
        UcdError::Malformed {
            file: file.to_owned(),
            line,
            detail: format!("bad codepoint {s:?}"),
        }
    })?;
    if cp >= CODESPACE {
        return Err(UcdError::Malformed {
            file: file.to_owned(),
            line,
            detail: format!("codepoint {cp:#X} outside the codespace"),
        });
    }
    Ok(cp)
}

fn parse_unicode_data_fields(
    cp: u32,
    fields: &[&str],
    file: &str,
    line: usize,
) -> Result<CodepointRecord, UcdError> {
    let malformed = |detail: String| UcdError::Malformed { file: file.to_owned(), line, detail };

    let combining_class = fields[3]
        .parse::<u8>()
        .map_err(|_| malformed(format!("bad combining class {:?}", fields[3])))?;

    let decomposition = if fields[5].is_empty() {
        None
    } else {
        let mut kind = DecompositionKind::Canonical;
        let mut mapping = Vec::new();
        for token in fields[5].split_whitespace() {
            if let Some(tag) = token.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
                kind = DecompositionKind::Compatibility(tag.to_owned());
            } else {
                mapping.push(parse_hex_cp(token, file, line)?);
            }
        }
        if mapping.is_empty() {
            return Err(malformed("decomposition with no mapping".into()));
        }
        Some(Decomposition { kind, mapping })
    };

    // Field 8 is the numeric value for all three numeric types; rationals
    // appear as "n/m".
    let numeric_value = if fields[8].is_empty() {
        None
    } else if let Some((num, den)) = fields[8].split_once('/') {
        let n: f64 = num.parse().map_err(|_| malformed(format!("bad numeric {:?}", fields[8])))?;
        let d: f64 = den.parse().map_err(|_| malformed(format!("bad numeric {:?}", fields[8])))?;
        Some(n / d)
    } else {
        Some(
            fields[8]
                .parse::<f64>()
                .map_err(|_| malformed(format!("bad numeric {:?}", fields[8])))?,
        )
    };

    let case = |s: &str| -> Result<Option<u32>, UcdError> {
        if s.is_empty() {
            Ok(None)
        } else {
            parse_hex_cp(s, file, line).map(Some)
        }
    };

    Ok(CodepointRecord {
        codepoint: cp,
        name: fields[1].to_owned(),
        general_category: fields[2].to_owned(),
        combining_class,
        bidi_class: fields[4].to_owned(),
        decomposition,
        numeric_value,
        uppercase: case(fields[12])?,
        lowercase: case(fields[13])?,
        titlecase: case(fields[14])?,
        ..CodepointRecord::default()
    })
}

/// Parse the common `start..end ; Value # comment` property format.
/// Single-codepoint lines (`XXXX ; Value`) are one-element ranges.
pub fn parse_property_file(
    text: &str,
    file: &str,
) -> Result<Vec<(std::ops::RangeInclusive<u32>, String)>, UcdError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let (spec, value) = line.split_once(';').ok_or_else(|| UcdError::Malformed {
            file: file.to_owned(),
            line: line_no,
            detail: "missing ';'".into(),
        })?;
        let value = value.trim().to_owned();
        // emoji-data.txt may list sequences; only single scalars and
        // ranges carry per-codepoint properties.
        let Some(range) = parse_cp_range(spec.trim(), file, line_no)? else {
            continue;
        };
        out.push((range, value));
    }
    Ok(out)
}

/// Parse a `XXXX` or `XXXX..YYYY` codepoint span; `None` for sequences.
fn parse_cp_range(
    spec: &str,
    file: &str,
    line_no: usize,
) -> Result<Option<std::ops::RangeInclusive<u32>>, UcdError> {
    match spec.split_once("..") {
        Some((a, b)) => {
            let start = parse_hex_cp(a, file, line_no)?;
            let end = parse_hex_cp(b, file, line_no)?;
            if start > end {
                return Err(UcdError::Malformed {
                    file: file.to_owned(),
                    line: line_no,
                    detail: format!("inverted range {spec:?}"),
                });
            }
            Ok(Some(start..=end))
        }
        None => {
            if spec.contains(' ') {
                return Ok(None);
            }
            let cp = parse_hex_cp(spec, file, line_no)?;
            Ok(Some(cp..=cp))
        }
    }
}

/// Joining type and joining group from `ArabicShaping.txt`
/// (`code; short name; joining_type; joining_group`).
fn parse_arabic_shaping(text: &str, file: &str) -> Result<Vec<(u32, String, String)>, UcdError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(UcdError::Malformed {
                file: file.to_owned(),
                line: line_no,
                detail: format!("expected 4 fields, found {}", fields.len()),
            });
        }
        let cp = parse_hex_cp(fields[0], file, line_no)?;
        out.push((cp, fields[2].to_owned(), fields[3].to_owned()));
    }
    Ok(out)
}

/// Which normalization form a quick-check entry refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum QcForm {
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
}

/// Quick-check entries from `DerivedNormalizationProps.txt`
/// (`range ; NFx_QC; N|M`). Other derived properties in the file are
/// skipped; absent codepoints default to `Yes`.
fn parse_normalization_props(
    text: &str,
    file: &str,
) -> Result<Vec<(std::ops::RangeInclusive<u32>, QcForm, QuickCheck)>, UcdError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        if fields.len() < 2 {
            continue;
        }
        let form = match fields[1] {
            "NFC_QC" => QcForm::Nfc,
            "NFD_QC" => QcForm::Nfd,
            "NFKC_QC" => QcForm::Nfkc,
            "NFKD_QC" => QcForm::Nfkd,
            _ => continue,
        };
        let malformed = |detail: String| UcdError::Malformed {
            file: file.to_owned(),
            line: line_no,
            detail,
        };
        let value = match fields.get(2).copied() {
            Some("N") => QuickCheck::No,
            Some("M") => QuickCheck::Maybe,
            Some(other) => return Err(malformed(format!("bad quick-check value {other:?}"))),
            None => return Err(malformed("quick-check entry without a value".into())),
        };
        let Some(range) = parse_cp_range(fields[0], file, line_no)? else {
            continue;
        };
        out.push((range, form, value));
    }
    Ok(out)
}

/// Aliases from `NameAliases.txt` (`code;alias;type`).
fn parse_name_aliases(text: &str, file: &str) -> Result<Vec<(u32, String)>, UcdError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split(';').map(str::trim);
        let (Some(cp), Some(alias)) = (parts.next(), parts.next()) else {
            continue;
        };
        if alias.is_empty() {
            return Err(UcdError::Malformed {
                file: file.to_owned(),
                line: line_no,
                detail: "empty name alias".into(),
            });
        }
        out.push((parse_hex_cp(cp, file, line_no)?, alias.to_owned()));
    }
    Ok(out)
}

/// Confusable pairs where both sides are single codepoints.
fn parse_confusables(text: &str, file: &str) -> Result<Vec<(u32, u32)>, UcdError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        // The file is UTF-8 with a BOM and arrow comments; data lines have
        // at least source ; target ; type.
        if line.is_empty() || line.starts_with('\u{FEFF}') {
            continue;
        }
        let mut parts = line.split(';');
        let (Some(src), Some(dst)) = (parts.next(), parts.next()) else {
            continue;
        };
        let src = src.trim();
        let dst = dst.trim();
        if src.contains(' ') || dst.contains(' ') || src.is_empty() || dst.is_empty() {
            continue;
        }
        out.push((parse_hex_cp(src, file, line_no)?, parse_hex_cp(dst, file, line_no)?));
    }
    Ok(out)
}

/// DUCET entries for single codepoints: the first collation element's
/// primary and secondary weights.
fn parse_allkeys(text: &str, file: &str) -> Result<Vec<(u32, u16, u16)>, UcdError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() || line.starts_with('@') {
            continue;
        }
        let Some((cps, weights)) = line.split_once(';') else {
            continue;
        };
        let cps = cps.trim();
        if cps.contains(' ') {
            continue;
        }
        let cp = parse_hex_cp(cps, file, line_no)?;
        // First element looks like [.1CAD.0020.0008] or [*0209.0020.0002].
        let weights = weights.trim();
        let Some(start) = weights.find('[') else {
            continue;
        };
        let body: String = weights[start + 1..]
            .chars()
            .take_while(|c| *c != ']')
            .collect();
        let parts: Vec<&str> = body
            .trim_start_matches(['.', '*'])
            .split('.')
            .collect();
        if parts.len() < 2 {
            return Err(UcdError::Malformed {
                file: file.to_owned(),
                line: line_no,
                detail: format!("bad collation element {weights:?}"),
            });
        }
        let primary = u16::from_str_radix(parts[0], 16).map_err(|_| UcdError::Malformed {
            file: file.to_owned(),
            line: line_no,
            detail: format!("bad primary weight {:?}", parts[0]),
        })?;
        let secondary = u16::from_str_radix(parts[1], 16).map_err(|_| UcdError::Malformed {
            file: file.to_owned(),
            line: line_no,
            detail: format!("bad secondary weight {:?}", parts[1]),
        })?;
        out.push((cp, primary, secondary));
    }
    Ok(out)
}

/// `kRSUnicode` radical/stroke entries from the Unihan IRG sources file.
fn parse_unihan_rs(text: &str, file: &str) -> Result<Vec<(u32, u16, i16)>, UcdError> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split('\t');
        let (Some(cp), Some(key), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        if key != "kRSUnicode" {
            continue;
        }
        let cp = parse_hex_cp(cp, file, line_no)?;
        // Value like "90.11" or "120'.3"; first entry wins.
        let first = value.split_whitespace().next().unwrap_or(value);
        let (radical, strokes) = first.split_once('.').ok_or_else(|| UcdError::Malformed {
            file: file.to_owned(),
            line: line_no,
            detail: format!("bad kRSUnicode value {value:?}"),
        })?;
        let radical: u16 =
            radical.trim_end_matches('\'').parse().map_err(|_| UcdError::Malformed {
                file: file.to_owned(),
                line: line_no,
                detail: format!("bad radical in {value:?}"),
            })?;
        let strokes: i16 = strokes.parse().map_err(|_| UcdError::Malformed {
            file: file.to_owned(),
            line: line_no,
            detail: format!("bad stroke count in {value:?}"),
        })?;
        out.push((cp, radical, strokes));
    }
    Ok(out)
}

/// Adjacent non-component members of each ZWJ sequence.
fn parse_zwj_sequences(text: &str, file: &str) -> Result<Vec<(u32, u32)>, UcdError> {
    const ZWJ: u32 = 0x200D;
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((cps, _rest)) = line.split_once(';') else {
            continue;
        };
        let mut members = Vec::new();
        for token in cps.split_whitespace() {
            let cp = parse_hex_cp(token, file, line_no)?;
            if cp != ZWJ && cp != 0xFE0F {
                members.push(cp);
            }
        }
        for pair in members.windows(2) {
            out.push((pair[0], pair[1]));
        }
    }
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MINI_UNICODE_DATA: &str = "\
0041;LATIN CAPITAL LETTER A;Lu;0;L;;;;;N;;;;0061;
0061;LATIN SMALL LETTER A;Ll;0;L;;;;;N;;;0041;;0041
00C0;LATIN CAPITAL LETTER A WITH GRAVE;Lu;0;L;0041 0300;;;;N;;;;00E0;
0031;DIGIT ONE;Nd;0;EN;;1;1;1;N;;;;;
00BD;VULGAR FRACTION ONE HALF;No;0;ON;<fraction> 0031 2044 0032;;;1/2;N;;;;;
4E00;<CJK Ideograph, First>;Lo;0;L;;;;;N;;;;;
4E03;<CJK Ideograph, Last>;Lo;0;L;;;;;N;;;;;
";

    #[test]
    fn parses_basic_records() {
        let data = UcdData::from_unicode_data(MINI_UNICODE_DATA, "UnicodeData.txt").unwrap();
        // 5 singles + 4 from the range.
        assert_eq!(data.assigned_count(), 9);
        let a = &data.records[&0x41];
        assert_eq!(a.general_category, "Lu");
        assert_eq!(a.lowercase, Some(0x61));
        assert_eq!(data.records[&0x61].uppercase, Some(0x41));
    }

    #[test]
    fn parses_decompositions() {
        let data = UcdData::from_unicode_data(MINI_UNICODE_DATA, "UnicodeData.txt").unwrap();
        let grave = data.records[&0xC0].decomposition.as_ref().unwrap();
        assert_eq!(grave.kind, DecompositionKind::Canonical);
        assert_eq!(grave.mapping, vec![0x41, 0x300]);
        let half = data.records[&0xBD].decomposition.as_ref().unwrap();
        assert_eq!(half.kind, DecompositionKind::Compatibility("fraction".into()));
    }

    #[test]
    fn parses_numeric_values_including_fractions() {
        let data = UcdData::from_unicode_data(MINI_UNICODE_DATA, "UnicodeData.txt").unwrap();
        assert_eq!(data.records[&0x31].numeric_value, Some(1.0));
        assert_eq!(data.records[&0xBD].numeric_value, Some(0.5));
    }

    #[test]
    fn expands_first_last_ranges() {
        let data = UcdData::from_unicode_data(MINI_UNICODE_DATA, "UnicodeData.txt").unwrap();
        for cp in 0x4E00..=0x4E03 {
            let r = &data.records[&cp];
            assert_eq!(r.general_category, "Lo");
            assert_eq!(r.codepoint, cp);
        }
        assert_eq!(data.records[&0x4E01].name, "CJK IDEOGRAPH-4E01");
    }

    #[test]
    fn malformed_record_reports_line() {
        let err = UcdData::from_unicode_data("0041;TOO;FEW\n", "UnicodeData.txt").unwrap_err();
        match err {
            UcdError::Malformed { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unterminated_range_is_rejected() {
        let text = "4E00;<CJK Ideograph, First>;Lo;0;L;;;;;N;;;;;\n";
        assert!(matches!(
            UcdData::from_unicode_data(text, "UnicodeData.txt"),
            Err(UcdError::Malformed { .. })
        ));
    }

    #[test]
    fn property_file_ranges_and_singles() {
        let text = "\
# comment
0041..005A    ; Latin # letters
4E00          ; Han
";
        let props = parse_property_file(text, "Scripts.txt").unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].0, 0x41..=0x5A);
        assert_eq!(props[0].1, "Latin");
        assert_eq!(props[1].0, 0x4E00..=0x4E00);
    }

    #[test]
    fn allkeys_takes_first_element_weights() {
        let text = "\
@version 16.0.0
0041  ; [.1CAD.0020.0008] # LATIN CAPITAL LETTER A
0062  ; [.1CDD.0020.0002] [.0000.0000.0000] # two elements
0041 0300 ; [.1CAD.0020.0008][.0000.0025.0002] # skipped (sequence)
";
        let keys = parse_allkeys(text, "allkeys.txt").unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], (0x41, 0x1CAD, 0x20));
        assert_eq!(keys[1], (0x62, 0x1CDD, 0x20));
    }

    #[test]
    fn unihan_radical_stroke() {
        let text = "U+4E2D\tkRSUnicode\t2.3\nU+4E2D\tkTotalStrokes\t4\n";
        let rs = parse_unihan_rs(text, "Unihan_IrgSources.txt").unwrap();
        assert_eq!(rs, vec![(0x4E2D, 2, 3)]);
    }

    #[test]
    fn zwj_sequences_yield_member_pairs() {
        let text = "1F468 200D 1F469 200D 1F466 ; RGI_Emoji_ZWJ_Sequence ; family\n";
        let pairs = parse_zwj_sequences(text, "emoji-zwj-sequences.txt").unwrap();
        assert_eq!(pairs, vec![(0x1F468, 0x1F469), (0x1F469, 0x1F466)]);
    }

    #[test]
    fn arabic_shaping_yields_joining_properties() {
        let text = "\
# Joining types
0041; LATIN A; U; No_Joining_Group
0626 ; YEH WITH HAMZA ABOVE ; D ; YEH
";
        let rows = parse_arabic_shaping(text, "ArabicShaping.txt").unwrap();
        assert_eq!(rows[0], (0x41, "U".into(), "No_Joining_Group".into()));
        assert_eq!(rows[1], (0x626, "D".into(), "YEH".into()));
        // A truncated record aborts the phase.
        assert!(matches!(
            parse_arabic_shaping("0626; YEH; D\n", "ArabicShaping.txt"),
            Err(UcdError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn normalization_props_keep_only_quick_checks() {
        let text = "\
0340..0341    ; NFC_QC; N # composition exclusions
0300..0304    ; NFC_QC; M # combining marks
00C0          ; NFD_QC; N
0132          ; NFKC_QC; N
0041..005A    ; Full_Composition_Exclusion # skipped, not a quick check
";
        let props =
            parse_normalization_props(text, "DerivedNormalizationProps.txt").unwrap();
        assert_eq!(props.len(), 4);
        assert_eq!(props[0], (0x340..=0x341, QcForm::Nfc, QuickCheck::No));
        assert_eq!(props[1], (0x300..=0x304, QcForm::Nfc, QuickCheck::Maybe));
        assert_eq!(props[2], (0xC0..=0xC0, QcForm::Nfd, QuickCheck::No));
        assert_eq!(props[3], (0x132..=0x132, QcForm::Nfkc, QuickCheck::No));
        // A quick-check entry without a value is malformed.
        assert!(matches!(
            parse_normalization_props("0041 ; NFC_QC\n", "DerivedNormalizationProps.txt"),
            Err(UcdError::Malformed { .. })
        ));
    }

    #[test]
    fn name_aliases_accumulate_per_codepoint() {
        let text = "\
# aliases
0041;LATIN LETTER CAPITAL A;correction
0041;FIRST LETTER;figment
4E00;CJK ONE;correction
";
        let aliases = parse_name_aliases(text, "NameAliases.txt").unwrap();
        assert_eq!(aliases.len(), 3);
        assert_eq!(aliases[0], (0x41, "LATIN LETTER CAPITAL A".into()));
        assert_eq!(aliases[1], (0x41, "FIRST LETTER".into()));
    }

    #[test]
    fn load_dir_requires_unicode_data() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            UcdData::load_dir(dir.path()),
            Err(UcdError::MissingFile(_))
        ));
    }

    #[test]
    fn load_dir_layers_optional_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("UnicodeData.txt"), MINI_UNICODE_DATA).unwrap();
        fs::write(dir.path().join("Scripts.txt"), "0041..0061 ; Latin\n4E00..4E03 ; Han\n")
            .unwrap();
        fs::write(dir.path().join("Blocks.txt"), "0000..007F; Basic Latin\n").unwrap();
        fs::write(dir.path().join("ArabicShaping.txt"), "0041; LATIN A; U; No_Joining_Group\n")
            .unwrap();
        fs::write(
            dir.path().join("DerivedNormalizationProps.txt"),
            "00C0 ; NFD_QC; N\n00C0 ; NFKD_QC; N\n",
        )
        .unwrap();
        fs::write(dir.path().join("NameAliases.txt"), "0041;FIRST LETTER;figment\n").unwrap();
        let data = UcdData::load_dir(dir.path()).unwrap();
        assert_eq!(data.records[&0x41].script.as_deref(), Some("Latin"));
        assert_eq!(data.records[&0x4E00].script.as_deref(), Some("Han"));
        assert_eq!(data.records[&0x41].block.as_deref(), Some("Basic Latin"));
        assert_eq!(data.records[&0x41].joining_type.as_deref(), Some("U"));
        assert_eq!(data.records[&0x41].joining_group.as_deref(), Some("No_Joining_Group"));
        assert_eq!(data.records[&0xC0].nfd_qc, QuickCheck::No);
        assert_eq!(data.records[&0xC0].nfkd_qc, QuickCheck::No);
        // Unlisted codepoints quick-check as Yes.
        assert_eq!(data.records[&0xC0].nfc_qc, QuickCheck::Yes);
        assert_eq!(data.records[&0x41].nfd_qc, QuickCheck::Yes);
        assert_eq!(data.records[&0x41].name_aliases, vec!["FIRST LETTER".to_owned()]);
        // Optional data never widens the pool.
        assert_eq!(data.assigned_count(), 9);
    }

    #[test]
    fn break_properties_load_from_the_auxiliary_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("UnicodeData.txt"), MINI_UNICODE_DATA).unwrap();
        let aux = dir.path().join("auxiliary");
        fs::create_dir(&aux).unwrap();
        fs::write(aux.join("WordBreakProperty.txt"), "0041..005A ; ALetter\n").unwrap();
        fs::write(aux.join("SentenceBreakProperty.txt"), "0041..005A ; Upper\n").unwrap();
        // Root placement wins when both exist.
        fs::write(dir.path().join("GraphemeBreakProperty.txt"), "0041 ; Other\n").unwrap();
        fs::write(aux.join("GraphemeBreakProperty.txt"), "0041 ; Control\n").unwrap();
        let data = UcdData::load_dir(dir.path()).unwrap();
        assert_eq!(data.records[&0x41].word_break.as_deref(), Some("ALetter"));
        assert_eq!(data.records[&0x41].sentence_break.as_deref(), Some("Upper"));
        assert_eq!(data.records[&0x41].grapheme_break.as_deref(), Some("Other"));
        assert!(data.records[&0x31].word_break.is_none());
    }
}
