//! Thermobus command-line driver
//!
//! Polls the appliance and prints every reading set to stdout, one reading
//! per line (or one JSON document per cycle with `--json`). Write requests are
//! read from stdin as `<register id> <value>` lines, e.g. `primary-1-70 21`.
//!
//! Usage: thermobus --port /dev/ttyUSB0 --profile primary=assets/primary.json

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use thermobus::constants::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_ATTEMPTS, DEFAULT_SERIAL_PATH,
    DEFAULT_TRANSACTION_TIMEOUT_MS, DEFAULT_WRITE_ATTEMPTS, MIN_RETRY_DELAY_MS,
};
use thermobus::{
    EngineConfig, ReadingSet, RegisterCatalog, RegisterEngine, RegisterId, ResolverRegistry,
    RetryPolicy, RtuConnector, SerialSettings, WriteRequest,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about = "Modbus RTU register bridge for heating appliances")]
struct Args {
    /// Serial device of the RTU adapter
    #[clap(short, long, default_value = DEFAULT_SERIAL_PATH, env = "THERMOBUS_PORT")]
    port: String,

    /// Device profile as NAME=PATH to a JSON register file (repeatable)
    #[clap(long = "profile", value_name = "NAME=PATH", required = true, value_parser = parse_profile)]
    profiles: Vec<(String, PathBuf)>,

    /// Delay between the end of one poll and the start of the next
    #[clap(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    #[clap(long, default_value_t = DEFAULT_READ_ATTEMPTS)]
    read_attempts: u32,

    #[clap(long, default_value_t = MIN_RETRY_DELAY_MS)]
    read_delay_ms: u64,

    #[clap(long, default_value_t = DEFAULT_WRITE_ATTEMPTS)]
    write_attempts: u32,

    #[clap(long, default_value_t = MIN_RETRY_DELAY_MS)]
    write_delay_ms: u64,

    /// Per-transaction timeout of the serial link
    #[clap(long, default_value_t = DEFAULT_TRANSACTION_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Print each reading set as JSON
    #[clap(long)]
    json: bool,

    /// Poll once and exit
    #[clap(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn parse_profile(raw: &str) -> Result<(String, PathBuf)> {
    let Some((name, path)) = raw.split_once('=') else {
        bail!("expected NAME=PATH, got {raw}");
    };
    if name.is_empty() || path.is_empty() {
        bail!("expected NAME=PATH, got {raw}");
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_readings(readings: &ReadingSet, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(readings)?);
        return Ok(());
    }
    for reading in readings {
        println!(
            "{}\t{}\t{} {}",
            reading.id(),
            reading.description,
            reading.value,
            reading.unit
        );
    }
    Ok(())
}

fn parse_write(line: &str) -> Result<(RegisterId, f64)> {
    let mut parts = line.split_whitespace();
    let (Some(id), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
        bail!("expected `<register id> <value>`");
    };
    let id = id.parse::<RegisterId>()?;
    let value = value.parse::<f64>().with_context(|| format!("invalid value {value}"))?;
    Ok((id, value))
}

/// Forward stdin write lines to the engine.
async fn read_writes(requests: mpsc::Sender<WriteRequest>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (id, value) = match parse_write(line) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%line, error = %err, "ignoring malformed write line");
                continue;
            }
        };
        let (request, reply) = WriteRequest::with_reply(id.clone(), value);
        if requests.send(request).await.is_err() {
            break;
        }
        tokio::spawn(async move {
            match reply.await {
                Ok(Ok(())) => info!(register = %id, value, "write accepted"),
                Ok(Err(err)) => error!(register = %id, value, error = %err, "write failed"),
                Err(_) => warn!(register = %id, "write dropped"),
            }
        });
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let sources = args.profiles.iter().map(|(name, path)| (name.clone(), path));
    let catalog = RegisterCatalog::load(sources).context("failed to load register files")?;
    info!(
        profiles = catalog.profiles().len(),
        registers = catalog.len(),
        port = %args.port,
        "starting {}",
        thermobus::info()
    );

    let read_retry = RetryPolicy::read_default()
        .with_max_attempts(args.read_attempts)
        .with_delay_ms(args.read_delay_ms);
    let write_retry = RetryPolicy::write_default()
        .with_max_attempts(args.write_attempts)
        .with_delay_ms(args.write_delay_ms);
    let config = EngineConfig::new()
        .with_poll_interval_ms(args.poll_interval_ms)
        .with_read_retry(read_retry)
        .with_write_retry(write_retry);
    let settings =
        SerialSettings::new(args.port.clone()).with_transaction_timeout_ms(args.timeout_ms);
    let engine = RegisterEngine::new(
        RtuConnector::new(settings),
        catalog,
        &ResolverRegistry::with_builtin(),
        config,
    )
    .context("invalid register configuration")?;

    if args.once {
        let readings = engine.poll_once().await.context("poll failed")?;
        return print_readings(&readings, args.json);
    }

    let (reading_tx, mut reading_rx) = mpsc::channel::<Arc<ReadingSet>>(4);
    let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(32);

    let poller = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_polling(reading_tx).await })
    };
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.serve_writes(write_rx).await })
    };
    tokio::spawn(async move {
        if let Err(err) = read_writes(write_tx).await {
            error!(error = %err, "stdin reader stopped");
        }
    });

    loop {
        tokio::select! {
            readings = reading_rx.recv() => match readings {
                Some(readings) => print_readings(&readings, args.json)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    drop(reading_rx);
    poller.abort();
    writer.abort();
    Ok(())
}
