//! `flightline` - CLI for the flight segmentation and analytics engine
//!
//! This binary ingests telemetry batches, lists detected flight sessions,
//! and recomputes session metrics against the local database.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use flightline::cli::{
    Cli, Command, ConfigCommand, IngestCommand, OutputFormat, RecomputeCommand, SessionsCommand,
    ShowCommand,
};
use flightline::pipeline::IngestPipeline;
use flightline::segmenter::FlightSegmenter;
use flightline::session::Session;
use flightline::telemetry::TelemetrySample;
use flightline::{init_logging, metrics, Config, Storage};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Ingest(cmd) => handle_ingest(&config, &cmd),
        Command::Sessions(cmd) => handle_sessions(&config, &cmd),
        Command::Show(cmd) => handle_show(&config, &cmd),
        Command::Recompute(cmd) => handle_recompute(&config, &cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_storage(config: &Config) -> anyhow::Result<Arc<Storage>> {
    let path = config.database_path();
    let storage = Storage::open(&path)
        .with_context(|| format!("could not open database at {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn handle_ingest(config: &Config, cmd: &IngestCommand) -> anyhow::Result<()> {
    let file = std::fs::File::open(&cmd.file)
        .with_context(|| format!("could not open batch file {}", cmd.file.display()))?;
    let batch: Vec<TelemetrySample> = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("could not parse batch file {}", cmd.file.display()))?;

    let storage = open_storage(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    let receipt = runtime.block_on(async {
        let pipeline = IngestPipeline::new(
            FlightSegmenter::from_config(&config.segmenter),
            storage.clone(),
            storage.clone(),
            storage.clone(),
            config.ingest.max_batch_size,
        );
        let receipt = pipeline.ingest(cmd.device, batch).await?;
        pipeline.shutdown().await;
        Ok::<_, flightline::Error>(receipt)
    })?;

    let state = storage.device_state(cmd.device)?.unwrap_or_default();
    if cmd.json {
        let output = serde_json::json!({
            "device_id": receipt.device_id,
            "accepted": receipt.accepted,
            "phase": state.phase(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Ingested {} samples for device {}",
            receipt.accepted, receipt.device_id
        );
        println!("Flight phase: {}", state.phase());
    }
    Ok(())
}

fn handle_sessions(config: &Config, cmd: &SessionsCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let sessions = storage.sessions_for_device(cmd.device, cmd.limit)?;

    if sessions.is_empty() {
        println!("No sessions recorded for device {}", cmd.device);
        return Ok(());
    }

    match cmd.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        OutputFormat::Table => {
            println!(
                "{:<36}  {:<25}  {:<25}  {:>10}",
                "SESSION", "START", "END", "DURATION"
            );
            for session in &sessions {
                println!(
                    "{:<36}  {:<25}  {:<25}  {:>10}",
                    session.id,
                    session.start_ts.to_rfc3339(),
                    session
                        .end_ts
                        .map_or_else(|| "open".to_string(), |ts| ts.to_rfc3339()),
                    session
                        .duration()
                        .map_or_else(String::new, |d| format!("{}s", d.num_seconds())),
                );
            }
        }
        OutputFormat::Plain => {
            for session in &sessions {
                print_session(session);
                println!();
            }
        }
    }
    Ok(())
}

fn handle_show(config: &Config, cmd: &ShowCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let session = storage
        .session(cmd.session)?
        .ok_or(flightline::Error::SessionNotFound(cmd.session))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print_session(&session);
    }
    Ok(())
}

fn handle_recompute(config: &Config, cmd: &RecomputeCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let session = storage
        .session(cmd.session)?
        .ok_or(flightline::Error::SessionNotFound(cmd.session))?;

    let samples = storage.samples_for_session(session.device_id, session.id)?;
    let metrics = metrics::compute(&samples);

    if cmd.dry_run {
        println!("Recomputed (dry run, not written):");
    } else {
        storage.set_session_metrics(session.id, &metrics)?;
        println!("Recomputed over {} samples:", samples.len());
    }
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "total_samples": stats.total_samples,
            "total_sessions": stats.total_sessions,
            "open_sessions": stats.open_sessions,
            "oldest_sample": stats.oldest_sample,
            "newest_sample": stats.newest_sample,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("flightline status");
        println!("-----------------");
        println!("Database:       {}", config.database_path().display());
        println!("Samples:        {}", stats.total_samples);
        println!("Sessions:       {}", stats.total_sessions);
        println!("Open sessions:  {}", stats.open_sessions);
        if let Some(oldest) = stats.oldest_sample {
            println!("Oldest sample:  {}", oldest.to_rfc3339());
        }
        if let Some(newest) = stats.newest_sample {
            println!("Newest sample:  {}", newest.to_rfc3339());
        }
        println!("Database size:  {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Ingest]");
                println!("  Max batch size:     {}", config.ingest.max_batch_size);
                println!();
                println!("[Segmenter]");
                println!(
                    "  Activity threshold: {}",
                    config.segmenter.activity_threshold
                );
                println!(
                    "  Idle timeout:       {}s",
                    config.segmenter.idle_timeout_secs
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_session(session: &Session) {
    println!("Session:   {}", session.id);
    println!("Device:    {}", session.device_id);
    println!("Start:     {}", session.start_ts.to_rfc3339());
    match session.end_ts {
        Some(end) => println!("End:       {}", end.to_rfc3339()),
        None => println!("End:       open"),
    }
    if session.metrics.is_empty() {
        println!("Metrics:   (not computed)");
    } else if let Ok(json) = serde_json::to_string_pretty(&session.metrics) {
        println!("Metrics:   {json}");
    }
}
