mod error;
mod export;
mod gateway;
mod live;
mod trace;
mod wire;

use std::path::PathBuf;
use std::time::Duration;

use canvas::config::CanvasConfig;
use canvas::overlay::GuidanceOverlay;
use canvas::palette::ColorIndex;
use clap::{Parser, Subcommand};
use frames::{Frame, PaintPayload, syscall};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::error::CliError;
use crate::export::OutputFormat;
use crate::live::{LiveBoard, PUMP_INTERVAL};

const SNAPSHOT_WAIT: Duration = Duration::from_secs(30);
const TRACE_DRAIN: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "pixelboard-cli", about = "Pixel board API and websocket CLI")]
struct Cli {
    #[arg(long, env = "PIXELBOARD_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    /// Create a blank board and print its id.
    Create,
    /// Download a board snapshot as `.png` or raw `.bin`.
    Snapshot {
        board_id: Uuid,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print one page of the board's paint log.
    Events {
        board_id: Uuid,
        #[arg(long, default_value_t = 0)]
        after: i64,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Paint a single cell.
    Paint { board_id: Uuid, x: i64, y: i64, color: ColorIndex },
    /// Follow a board live and print sync counters on exit.
    Watch {
        board_id: Uuid,
        #[arg(long, help = "Stop after this many seconds; runs until ctrl-c otherwise")]
        duration: Option<u64>,
    },
    /// Paint a guidance image onto the board.
    Trace {
        board_id: Uuid,
        #[arg(long)]
        image: PathBuf,
        #[arg(long, help = "Board column of the image's left edge; centered when omitted")]
        x: Option<f64>,
        #[arg(long, help = "Board row of the image's top edge; centered when omitted")]
        y: Option<f64>,
        #[arg(long, default_value_t = 1)]
        pixelation: u32,
        #[arg(long, default_value_t = 20, help = "Paints per second")]
        rate: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_url = cli.base_url.as_str();

    match cli.command {
        Command::Ping => run_ping(base_url).await,
        Command::Create => run_create(base_url).await,
        Command::Snapshot { board_id, out } => run_snapshot(base_url, board_id, out).await,
        Command::Events { board_id, after, limit } => run_events(base_url, board_id, after, limit).await,
        Command::Paint { board_id, x, y, color } => run_paint(base_url, board_id, x, y, color).await,
        Command::Watch { board_id, duration } => run_watch(base_url, board_id, duration.map(Duration::from_secs)).await,
        Command::Trace { board_id, image, x, y, pixelation, rate } => {
            run_trace(base_url, board_id, TraceArgs { image, x, y, pixelation, rate }).await
        }
    }
}

// =============================================================================
// HTTP COMMANDS
// =============================================================================

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let response = reqwest::get(wire::api_url(base_url, "/healthz")).await?;
    ensure_success(response.status(), "health check failed")?;
    println!("ok");
    Ok(())
}

async fn run_create(base_url: &str) -> Result<(), CliError> {
    let response = reqwest::Client::new()
        .post(wire::api_url(base_url, "/api/boards"))
        .send()
        .await?;
    ensure_success(response.status(), "board create failed")?;
    let body = response.json::<Value>().await?;
    let id = body.get("id").and_then(Value::as_str).ok_or(CliError::MissingField("id"))?;
    println!("{id}");
    Ok(())
}

async fn run_snapshot(base_url: &str, board_id: Uuid, out: PathBuf) -> Result<(), CliError> {
    let format = OutputFormat::from_path(&out)?;
    let response = reqwest::get(wire::api_url(base_url, &format!("/api/boards/{board_id}/snapshot"))).await?;
    ensure_success(response.status(), "snapshot fetch failed")?;
    let bytes = response.bytes().await?;

    match format {
        OutputFormat::Raw => tokio::fs::write(&out, &bytes).await?,
        OutputFormat::Png => export::render_snapshot(&bytes)?.save(&out)?,
    }
    eprintln!("snapshot saved: board_id={board_id} bytes={} out={}", bytes.len(), out.display());
    Ok(())
}

async fn run_events(base_url: &str, board_id: Uuid, after: i64, limit: Option<u32>) -> Result<(), CliError> {
    let mut url = wire::api_url(base_url, &format!("/api/boards/{board_id}/events?after={after}"));
    if let Some(limit) = limit {
        url.push_str(&format!("&limit={limit}"));
    }
    let response = reqwest::get(url).await?;
    ensure_success(response.status(), "event fetch failed")?;
    print_json(&response.json::<Value>().await?)
}

fn ensure_success(status: reqwest::StatusCode, message: &str) -> Result<(), CliError> {
    if status.is_success() {
        return Ok(());
    }
    Err(CliError::ServerError { syscall: format!("HTTP {}", status.as_u16()), message: message.to_owned() })
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

// =============================================================================
// WEBSOCKET COMMANDS
// =============================================================================

async fn run_paint(base_url: &str, board_id: Uuid, x: i64, y: i64, color: ColorIndex) -> Result<(), CliError> {
    let (mut stream, _) = wire::connect_and_join(base_url, board_id).await?;
    let req = Frame::request(syscall::PAINT_PUT, PaintPayload { x, y, color }.to_data()).with_board_id(board_id);
    wire::send_frame(&mut stream, &req).await?;
    let reply = wire::wait_for_terminal_response(&mut stream, &req.id, syscall::PAINT_PUT).await?;

    match reply.field("seq").and_then(Value::as_f64) {
        Some(seq) => println!("painted ({x}, {y}) = {color} seq={seq}"),
        None => println!("unchanged ({x}, {y}) already {color}"),
    }
    Ok(())
}

async fn run_watch(base_url: &str, board_id: Uuid, duration: Option<Duration>) -> Result<(), CliError> {
    let mut board = LiveBoard::connect(base_url, board_id);
    board.wait_live(SNAPSHOT_WAIT).await?;
    eprintln!("watching board {board_id}; ctrl-c to stop");

    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    let mut last_remote = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                board.pump();
                let remote = board.stats().remote_paints;
                if remote != last_remote {
                    info!(%board_id, remote_paints = remote, online = board.online_peers(), "board updated");
                    last_remote = remote;
                }
                if deadline.is_some_and(|at| tokio::time::Instant::now() >= at) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let stats = board.stats();
    let online = board.online_peers();
    board.close();
    println!(
        "watch complete: board_id={board_id} online={online} remote_paints={} reconnects={} snapshots={}",
        stats.remote_paints,
        stats.reconnects,
        stats.snapshots_loaded
    );
    Ok(())
}

#[derive(Debug)]
struct TraceArgs {
    image: PathBuf,
    x: Option<f64>,
    y: Option<f64>,
    pixelation: u32,
    rate: u32,
}

async fn run_trace(base_url: &str, board_id: Uuid, args: TraceArgs) -> Result<(), CliError> {
    let config = CanvasConfig::default();
    let mut overlay = GuidanceOverlay::new(config.board_width, config.board_height);
    overlay.set_image(&tokio::fs::read(&args.image).await?)?;
    overlay.set_pixelation(args.pixelation);
    let centered = overlay.position();
    overlay.set_position(args.x.unwrap_or(centered.x), args.y.unwrap_or(centered.y));

    let mut board = LiveBoard::connect(base_url, board_id);
    board.wait_live(SNAPSHOT_WAIT).await?;

    let plan = trace::plan_trace(&mut overlay, board.replica().store(), board.replica().palette());
    eprintln!("tracing {} cells onto board {board_id}", plan.len());

    let mut ticker = tokio::time::interval(Duration::from_secs(1) / args.rate.max(1));
    let mut painted = 0_usize;
    let mut skipped = 0_usize;
    for (done, step) in plan.iter().enumerate() {
        ticker.tick().await;
        board.pump();
        match board.paint(step.x, step.y, step.color) {
            Ok(Some(_)) => painted += 1,
            // A peer got there first.
            Ok(None) => skipped += 1,
            Err(e) => {
                warn!(x = step.x, y = step.y, error = %e, "trace paint rejected");
                skipped += 1;
            }
        }
        if (done + 1) % 500 == 0 {
            eprintln!("traced {}/{} cells...", done + 1, plan.len());
        }
    }

    // Let replies to the last paints arrive before counting failures.
    let drain_until = tokio::time::Instant::now() + TRACE_DRAIN;
    while tokio::time::Instant::now() < drain_until {
        tokio::time::sleep(PUMP_INTERVAL).await;
        board.pump();
    }

    let stats = board.stats();
    board.close();
    eprintln!(
        "trace complete: board_id={board_id} painted={painted} skipped={skipped} publish_failures={}",
        stats.publish_failures
    );
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
