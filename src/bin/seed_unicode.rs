//! `seed-unicode` — one-shot atom seeding against a configured store
//!
//! Parses a UCD directory, linearizes the assigned codepoints through the
//! semantic sequencer, projects them onto S³, and bulk-loads the full
//! 21-bit codespace as Atom/Physicality pairs. Idempotent: a re-run merges
//! zero rows.
//!
//! Flags:
//!   --ucd-dir <path>    UCD data directory (overrides the config file)
//!   --config <path>     JSON configuration
//!
//! Exit status is zero only when the seed committed; failures print one
//! line: `<kind>: <message>`.

#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use noograph::copy::SharedStore;
use noograph::store::MemStore;
use noograph::{seed, CancelToken, Config, Error};

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
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("usage: seed-unicode [--ucd-dir <path>] [--config <path>]");
        return;
    }

    match run(&args) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            std::process::exit(1);
        }
    }
}

fn run(args: &[String]) -> Result<(), Error> {
    let config = match parse_flag(args, "--config") {
        Some(path) => Config::from_json_file(&PathBuf::from(path))?,
        None => Config::default(),
    };
    let ucd_dir = parse_flag(args, "--ucd-dir")
        .map(PathBuf::from)
        .or_else(|| config.ucd_data_dir.clone())
        .ok_or_else(|| {
            noograph::ucd::UcdError::MissingFile(PathBuf::from("--ucd-dir not configured"))
        })?;

    let store: SharedStore = Arc::new(Mutex::new(MemStore::new()));
    let report = seed(store, &ucd_dir, CancelToken::new())?;

    println!("assigned codepoints : {}", report.assigned);
    println!("atom rows sent      : {}", report.atoms_sent);
    println!("atom rows inserted  : {}", report.atoms_inserted);
    println!("physicality inserted: {}", report.physicalities_inserted);
    Ok(())
}
