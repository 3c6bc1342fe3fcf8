//! `ingest-text` — atomic ingestion of one text blob
//!
//! Reads a file (or stdin with `-`), decodes it leniently, resolves atoms,
//! extracts repeated n-grams, and commits compositions, relations, ratings
//! and evidence in one transaction. Statistics print only on commit; any
//! abort exits non-zero with a one-line `<kind>: <message>`.
//!
//! Flags:
//!   --config <path>     JSON configuration
//!   --ucd-dir <path>    seed the in-memory reference store first
//!   --min-frequency <n> n-gram threshold τ (overrides config)
//!   --window <n>        co-occurrence window in tokens (overrides config)
//!   --preload           preload the atom cache before ingesting

#![forbid(unsafe_code)]

use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use noograph::copy::SharedStore;
use noograph::store::MemStore;
use noograph::{seed, CancelToken, Config, Error, IngesterOptions, TextIngester};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    // First operand that is neither a flag nor a flag's value.
    let mut input = None;
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == "--preload" {
            continue;
        }
        if a.starts_with("--") {
            it.next();
            continue;
        }
        input = Some(a.clone());
        break;
    }
    let Some(input) = input else {
        eprintln!(
            "usage: ingest-text <file|-> [--config <path>] [--ucd-dir <path>] \
             [--min-frequency <n>] [--window <n>] [--preload]"
        );
        std::process::exit(2);
    };

    let bytes = match read_input(&input) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("missing-resource: reading {input}: {e}");
            std::process::exit(1);
        }
    };

    match run(&args, &bytes) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            std::process::exit(1);
        }
    }
}

fn read_input(input: &str) -> std::io::Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(input)
    }
}

fn run(args: &[String], bytes: &[u8]) -> Result<(), Error> {
    let config = match parse_flag(args, "--config") {
        Some(path) => Config::from_json_file(&PathBuf::from(path))?,
        None => Config::default(),
    };
    let mut options = IngesterOptions::from_config(&config);
    if let Some(tau) = parse_flag(args, "--min-frequency").and_then(|v| v.parse().ok()) {
        options.min_frequency = tau;
    }
    if let Some(w) = parse_flag(args, "--window").and_then(|v| v.parse().ok()) {
        options.cooccurrence_window = w;
    }

    let store: SharedStore = Arc::new(Mutex::new(MemStore::new()));

    // The reference store starts empty; seed it when a UCD directory is
    // configured so atoms resolve.
    if let Some(ucd_dir) = parse_flag(args, "--ucd-dir")
        .map(PathBuf::from)
        .or_else(|| config.ucd_data_dir.clone())
    {
        seed(store.clone(), &ucd_dir, CancelToken::new())?;
    }

    let mut ingester = TextIngester::new(store, options);
    if config.atom_lookup.preload || args.iter().any(|a| a == "--preload") {
        ingester.preload_atoms()?;
    }

    let stats = ingester.ingest(bytes, &CancelToken::new())?;
    println!("codepoints          : {}", stats.codepoints);
    println!("invalid bytes       : {}", stats.invalid_bytes_skipped);
    println!("atoms new           : {}", stats.atoms_new);
    println!("compositions new    : {}", stats.compositions_new);
    println!("relations new       : {}", stats.relations_new);
    println!("original bytes      : {}", stats.original_bytes);
    println!("stored bytes        : {}", stats.stored_bytes);
    println!("compression ratio   : {:.4}", stats.compression_ratio);
    Ok(())
}
