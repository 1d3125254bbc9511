//! CLI entry point for the Raito ingestion pipeline.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use raito_ingest::extract::Ruleset;
use raito_ingest::pipeline::{Coordinator, IngestOutcome};
use raito_ingest::store::Store;
use raito_ingest::{Database, IngestConfig};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Layer configuration: file (if given) under CLI flags
    let mut config = match &args.config {
        Some(path) => IngestConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => IngestConfig::default(),
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = usize::from(concurrency);
    }

    // Compile the ruleset up front; a broken ruleset should fail before any fetch
    let ruleset_text = std::fs::read_to_string(&args.ruleset)
        .with_context(|| format!("reading ruleset {}", args.ruleset.display()))?;
    let ruleset: Ruleset = serde_json::from_str(&ruleset_text)
        .with_context(|| format!("parsing ruleset {}", args.ruleset.display()))?;
    let compiled = Arc::new(ruleset.compile().context("compiling ruleset")?);

    // Read URIs: from positional args or stdin
    let uris: Vec<String> = if args.uris.is_empty() {
        if io::stdin().is_terminal() {
            info!("No input provided. Pipe URIs via stdin or pass as arguments.");
            info!("Example: echo 'http://example.test/page' | raito-ingest -r rules.json");
            return Ok(());
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToString::to_string)
            .collect()
    } else {
        args.uris.clone()
    };

    if uris.is_empty() {
        info!("No URIs found in input");
        return Ok(());
    }

    info!(uris = uris.len(), db = %args.db.display(), "starting ingestion");

    let db = Database::new(&args.db).await?;
    let store = Store::new(db);
    let coordinator = Arc::new(Coordinator::new(store, config.coordinator_config())?);

    let outcomes = coordinator.submit_many(uris.clone(), compiled).await;

    let mut failed = 0usize;
    for (uri, outcome) in uris.iter().zip(&outcomes) {
        match outcome {
            IngestOutcome::Stored { record_id } => {
                println!("stored    {record_id}\t{uri}");
            }
            IngestOutcome::Duplicate { record_id } => {
                println!("duplicate {record_id}\t{uri}");
            }
            IngestOutcome::Failed { kind } => {
                failed += 1;
                warn!(uri, %kind, "ingestion failed");
                println!("failed    {kind}\t{uri}");
            }
        }
    }

    let stats = coordinator.stats();
    info!(
        stored = stats.stored(),
        duplicate = stats.duplicate(),
        failed = stats.failed(),
        total = stats.total(),
        "ingestion complete"
    );

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
