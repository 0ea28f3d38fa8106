use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use mdagg_rs::config::AggConfig;
use mdagg_rs::market_data::normaliser::TickScale;
use mdagg_rs::telemetry;
use mdagg_rs::transport::LadderFrame;

#[derive(Parser)]
#[command(name = "mdagg")]
#[command(about = "Tools for the multi-venue market data aggregator")]
struct Cli {
    /// Config file (TOML/YAML/JSON); MDAGG__SECTION__KEY env vars override it
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to a ring as its consumer and print every ladder frame
    Tail {
        /// Ring name (defaults to ring.name)
        #[arg(long)]
        ring: Option<String>,

        /// Directory holding the ring file (defaults to ring.dir)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Ticks per price unit, for display
        #[arg(long, default_value_t = 100)]
        scale: i64,

        /// One JSON object per frame instead of a ladder line
        #[arg(long)]
        json: bool,

        /// Stop after this many frames
        #[arg(long)]
        count: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

fn print_ladder(out: &mut impl Write, frame: &LadderFrame, scale: TickScale) -> io::Result<()> {
    write!(out, "{} ts={} |", frame.symbol, frame.publish_ts)?;
    for level in &frame.bids {
        write!(out, " {}@{}", level.size, scale.format(level.price))?;
    }
    write!(out, " ||")?;
    for level in &frame.asks {
        write!(out, " {}@{}", level.size, scale.format(level.price))?;
    }
    if frame.crossed_or_locked {
        write!(out, " | CROSSED")?;
    }
    writeln!(out)
}

#[cfg(unix)]
fn tail_loop(
    dir: PathBuf,
    name: String,
    scale: TickScale,
    json: bool,
    limit: Option<u64>,
    cancel: CancellationToken,
) -> anyhow::Result<u64> {
    use mdagg_rs::transport::{decode_agg_book, ShmRingReader};
    use std::time::Duration;

    let mut reader = ShmRingReader::open(&dir, &name)?;
    let mut buf = Vec::with_capacity(reader.geometry().slot_size);
    let stdout = io::stdout();
    let mut frames = 0u64;

    while !cancel.is_cancelled() && limit.map_or(true, |l| frames < l) {
        // short waits so Ctrl-C is noticed promptly
        if !reader.read_next(&mut buf, Some(Duration::from_millis(200)))? || buf.is_empty() {
            continue;
        }
        let frame = match decode_agg_book(&buf) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable frame");
                continue;
            }
        };
        frames += 1;
        let mut out = stdout.lock();
        if json {
            serde_json::to_writer(&mut out, &frame)?;
            writeln!(out)?;
        } else {
            print_ladder(&mut out, &frame, scale)?;
        }
    }
    Ok(frames)
}

#[cfg(unix)]
async fn tail(cfg: &AggConfig, ring: Option<String>, dir: Option<PathBuf>, scale: i64, json: bool, count: Option<u64>) -> anyhow::Result<()> {
    let name = ring.unwrap_or_else(|| cfg.ring.name.clone());
    let dir = dir.unwrap_or_else(|| cfg.ring.dir.clone());
    info!(ring = %name, dir = %dir.display(), "tailing ring");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let frames = tokio::task::spawn_blocking(move || tail_loop(dir, name, TickScale::new(scale), json, count, cancel)).await??;
    info!(frames, "tail finished");
    Ok(())
}

#[cfg(not(unix))]
async fn tail(_: &AggConfig, _: Option<String>, _: Option<PathBuf>, _: i64, _: bool, _: Option<u64>) -> anyhow::Result<()> {
    anyhow::bail!("the shared-memory ring needs a unix target")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let cfg = AggConfig::load(cli.config.as_deref())?;
    telemetry::init_tracing(&cfg.telemetry.log_filter);

    match cli.command {
        Commands::Tail { ring, dir, scale, json, count } => tail(&cfg, ring, dir, scale, json, count).await?,
        Commands::Config => {
            let mut out = io::stdout().lock();
            serde_json::to_writer_pretty(&mut out, &cfg)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
