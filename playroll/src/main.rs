//! Playroll - command-line entry point
//!
//! Manages the persistent playout queue and runs it through the scheduler
//! against an in-process simulated sink.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use playroll::config::ConfigOverrides;
use playroll::playback::sim::SimulatedPlayout;
use playroll::playback::{FeedbackEvent, OrderingSourceEntry};
use playroll::{AttachOptions, Metadata, OrderedStore, Roll, RollConfig, StreamSink};
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for playroll
#[derive(Parser, Debug)]
#[command(name = "playroll")]
#[command(about = "Queue-driven gapless playout scheduler")]
#[command(version)]
struct Args {
    /// Queue database path
    #[arg(long, global = true, env = "PLAYROLL_DB")]
    db: Option<PathBuf>,

    /// Buffered seconds remaining before the next segment is pushed
    #[arg(long, global = true, env = "PLAYROLL_THRESHOLD")]
    threshold: Option<f64>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a file's contents to the queue
    Add {
        file: PathBuf,

        /// Insert at this queue index instead of appending
        #[arg(long)]
        index: Option<i64>,

        /// Extra metadata, repeatable
        #[arg(long = "meta", value_parser = parse_key_value)]
        meta: Vec<(String, String)>,
    },

    /// Remove an entry by id
    Remove { id: i64 },

    /// List entries in queue order
    List,

    /// Swap the entries at two queue positions
    Reorder { from: usize, to: usize },

    /// Reassign queue indices from an ordering file
    Order { ordering: PathBuf },

    /// Show how the queue differs from an ordering file
    Compare { ordering: PathBuf },

    /// Play the queue through a simulated sink
    Simulate {
        /// Stop after this many full passes (runs until Ctrl-C otherwise)
        #[arg(long)]
        cycles: Option<u64>,

        /// Seconds of media each segment represents
        #[arg(long, default_value = "2.0")]
        segment_seconds: f64,

        /// Simulated seconds played per wall-clock second
        #[arg(long, default_value = "1.0")]
        speed: f64,
    },
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// JSON literals keep their type; anything else is stored as a string
fn metadata_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playroll=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = RollConfig::load(ConfigOverrides {
        db_path: args.db,
        threshold_seconds: args.threshold,
        config_file: args.config,
    })
    .context("Failed to load configuration")?;
    info!("Queue database: {}", config.db_path.display());

    let mut roll = Roll::init(&config)
        .await
        .context("Failed to open queue database")?;

    let outcome = match args.command {
        Command::Add { file, index, meta } => add(roll.store(), &file, index, meta).await,
        Command::Remove { id } => {
            roll.store()
                .remove(id)
                .await
                .with_context(|| format!("Failed to remove entry {}", id))?;
            println!("Removed entry {}", id);
            Ok(())
        }
        Command::List => list(roll.store()).await,
        Command::Reorder { from, to } => {
            roll.store()
                .reorder(from, to)
                .await
                .with_context(|| format!("Failed to swap positions {} and {}", from, to))?;
            println!("Swapped positions {} and {}", from, to);
            Ok(())
        }
        Command::Order { ordering } => {
            let source = read_ordering(&ordering).await?;
            let matched = roll
                .update_ordering(&source)
                .await
                .context("Failed to apply ordering")?;
            println!("Matched {} of {} entries", matched, roll.store().length().await?);
            Ok(())
        }
        Command::Compare { ordering } => {
            let source = read_ordering(&ordering).await?;
            let comparison = roll
                .compare_ordering(&source)
                .await
                .context("Failed to compare ordering")?;
            println!("{}", serde_json::to_string_pretty(&comparison)?);
            Ok(())
        }
        Command::Simulate {
            cycles,
            segment_seconds,
            speed,
        } => simulate(&mut roll, &config, cycles, segment_seconds, speed).await,
    };

    roll.close().await;
    outcome
}

async fn add(
    store: &OrderedStore,
    file: &Path,
    index: Option<i64>,
    meta: Vec<(String, String)>,
) -> Result<()> {
    let blob = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut metadata: Metadata = meta
        .iter()
        .map(|(key, value)| (key.clone(), metadata_value(value)))
        .collect();
    if metadata.filename().is_none() {
        if let Some(name) = file.file_name() {
            metadata.set_filename(name.to_string_lossy());
        }
    }

    let id = store
        .add(Some(blob.as_slice()), &metadata, index)
        .await
        .context("Failed to add entry")?;
    println!("Added entry {} ({} bytes)", id, blob.len());
    Ok(())
}

async fn list(store: &OrderedStore) -> Result<()> {
    let entries = store.get_all().await.context("Failed to read queue")?;
    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    println!("{:>6} {:>6} {:>10}  {}", "index", "id", "bytes", "filename");
    for entry in entries {
        println!(
            "{:>6} {:>6} {:>10}  {}",
            entry.queue_index,
            entry.id,
            entry.blob.as_ref().map_or(0, Vec::len),
            entry.metadata.filename().unwrap_or("-")
        );
    }
    Ok(())
}

async fn read_ordering(path: &Path) -> Result<Vec<OrderingSourceEntry>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON list of {{file, order}} rows", path.display()))
}

async fn simulate(
    roll: &mut Roll,
    config: &RollConfig,
    cycles: Option<u64>,
    segment_seconds: f64,
    speed: f64,
) -> Result<()> {
    if !(segment_seconds.is_finite() && segment_seconds > 0.0) {
        bail!("--segment-seconds must be positive");
    }
    if !(speed.is_finite() && speed > 0.0) {
        bail!("--speed must be positive");
    }
    if roll.store().is_empty().await? {
        warn!("Queue is empty; nothing to simulate");
        return Ok(());
    }

    let completed = Arc::new(AtomicU64::new(0));
    let caught_up = Arc::new(AtomicBool::new(false));
    {
        let completed = Arc::clone(&completed);
        roll.set_on_cycle_end(move || {
            let pass = completed.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Pass {} delivered", pass);
        });
        let caught_up = Arc::clone(&caught_up);
        roll.set_on_stream_end(move || caught_up.store(true, Ordering::SeqCst));
    }

    let playout = SimulatedPlayout::new(segment_seconds);
    let sink = StreamSink::new(Box::new(playout.sink()));
    roll.attach_buffer(sink, playout.clock(), AttachOptions::from_config(config))
        .await
        .context("Failed to attach simulated sink")?;

    let tick = Duration::from_millis(config.tick_interval_ms);
    let step = tick.as_secs_f64() * speed;
    let mut interval = tokio::time::interval(tick);

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, stopping simulation");
                break;
            }
            _ = interval.tick() => {
                if playout.complete_pending() {
                    roll.handle_event(FeedbackEvent::SinkReady).await;
                }
                playout.advance(step);
                roll.handle_event(FeedbackEvent::Tick).await;

                if caught_up.swap(false, Ordering::SeqCst) {
                    let done = completed.load(Ordering::SeqCst);
                    if cycles.is_some_and(|limit| done >= limit) {
                        roll.handle_event(FeedbackEvent::Ended).await;
                        break;
                    }
                    roll.reset_cursor();
                }
            }
        }
    }

    println!(
        "Delivered {} segments, {} trims, {} passes, played {:.1}s",
        playout.media_payloads().len(),
        playout.removals().len(),
        completed.load(Ordering::SeqCst),
        playout.position()
    );
    Ok(())
}
