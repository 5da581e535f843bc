use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use route_radio_core::{
    timeline::wrap_position, HeadlessBackend, Radio, RadioConfig, RadioEvent,
    RouteConfig, RouteMap, SystemTime, TimeSource,
};
use tracing_subscriber::EnvFilter;

/// How often a one-line status is logged while running.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

fn main() -> route_radio_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Inspect { route, at } => inspect(&route, at),
        Commands::Validate { route } => validate(&route),
    }
}

fn run(args: RunArgs) -> route_radio_core::Result<()> {
    let route = load_route(&args.route)?;
    let config = match &args.tuning {
        Some(path) => RadioConfig::from_path(path)?,
        None => RadioConfig::default(),
    };
    tracing::info!(
        route = ?args.route,
        segments = route.segments().len(),
        cycle = %format_clock(route.total_duration()),
        "starting radio"
    );

    let backend = HeadlessBackend::for_route(SystemTime, &route)
        .with_load_latency(Duration::from_millis(args.load_latency_ms));
    let mut radio = Radio::with_os_rng(route, &config, SystemTime, backend)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(drive(&mut radio, &config, &args))
}

async fn drive<B>(
    radio: &mut Radio<SystemTime, B>,
    config: &RadioConfig,
    args: &RunArgs,
) -> route_radio_core::Result<()>
where
    B: route_radio_core::AudioBackend,
{
    // Running the command is the listener's interaction that unlocks audio.
    for event in radio.begin_session()? {
        log_event(&event);
    }
    if let Some(volume) = args.volume {
        radio.set_volume(volume)?;
    }
    apply_debug_seek(radio, args)?;

    let mut ticker = tokio::time::interval(config.broadcast_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let deadline = args
        .for_secs
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    let mut last_status = Instant::now();

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                tracing::info!("interrupted");
                break;
            }
            _ = ticker.tick() => {
                for event in radio.tick()? {
                    log_event(&event);
                }
                if last_status.elapsed() >= STATUS_INTERVAL {
                    last_status = Instant::now();
                    log_status(radio);
                }
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    break;
                }
            }
        }
    }

    radio.shutdown();
    Ok(())
}

#[cfg(feature = "debug-tools")]
fn apply_debug_seek<B>(
    radio: &mut Radio<SystemTime, B>,
    args: &RunArgs,
) -> route_radio_core::Result<()>
where
    B: route_radio_core::AudioBackend,
{
    if let Some(position) = args.seek {
        tracing::warn!(position, "debug seek");
        radio.seek(position)?;
    }
    Ok(())
}

#[cfg(not(feature = "debug-tools"))]
fn apply_debug_seek<B>(
    _radio: &mut Radio<SystemTime, B>,
    _args: &RunArgs,
) -> route_radio_core::Result<()>
where
    B: route_radio_core::AudioBackend,
{
    Ok(())
}

fn log_event(event: &RadioEvent) {
    match event {
        RadioEvent::Position(update) => {
            tracing::trace!(position = update.position, progress = update.progress, "position");
        }
        RadioEvent::Context(context) => {
            tracing::trace!(
                segment = %context.segment_id,
                lat = context.coordinate.lat,
                lon = context.coordinate.lon,
                "context"
            );
        }
        RadioEvent::Boundary(crossed) => {
            tracing::info!(
                from = %crossed.previous_segment_id,
                to = %crossed.new_segment_id,
                "entering new segment"
            );
        }
        RadioEvent::Media(change) => {
            tracing::info!(url = %change.url, kind = ?change.kind, "now showing");
        }
        RadioEvent::Audio(audio) => tracing::info!(?audio, "audio"),
        RadioEvent::ClockResynced { drift } => tracing::debug!(drift, "clock resynced"),
    }
}

fn log_status<B: route_radio_core::AudioBackend>(radio: &Radio<SystemTime, B>) {
    match radio.context() {
        Ok(context) => tracing::info!(
            at = %format_clock(context.position),
            segment = %context.segment_name,
            audio = %context.audio_url,
            offset = %format!("{:.1}", context.offset_in_file),
            lat = %format!("{:.5}", context.coordinate.lat),
            lon = %format!("{:.5}", context.coordinate.lon),
            km = %format!("{:.1}", context.distance_km),
            "status"
        ),
        Err(err) => tracing::warn!(error = %err, "status unavailable"),
    }
}

fn inspect(path: &Path, at: Option<f64>) -> route_radio_core::Result<()> {
    let route = load_route(path)?;
    print_summary(&route);

    let position = match at {
        Some(position) => position,
        None => wrap_position(SystemTime.seconds_since_midnight(), route.total_duration()),
    };
    let context = route.context_at_wrapped(position)?;
    println!();
    println!(
        "position   {} ({:.1}%)",
        format_clock(context.position),
        context.overall_progress * 100.0
    );
    println!(
        "segment    {} [{}] {:.1}%",
        context.segment_name,
        context.segment_id,
        context.segment_progress * 100.0
    );
    println!("audio      {} @ {:.2}s", context.audio_url, context.offset_in_file);
    println!("coordinate {:.5}, {:.5}", context.coordinate.lat, context.coordinate.lon);
    println!("travelled  {:.1} km of {:.1} km", context.distance_km, route.total_distance());
    println!(
        "visuals    {} videos, {} images",
        context.pool.videos.len(),
        context.pool.images.len()
    );
    Ok(())
}

fn validate(path: &Path) -> route_radio_core::Result<()> {
    let route = load_route(path)?;
    println!(
        "ok: {} segments, cycle {}, {:.1} km",
        route.segments().len(),
        format_clock(route.total_duration()),
        route.total_distance()
    );
    Ok(())
}

fn print_summary(route: &RouteMap) {
    println!(
        "{:<16} {:<24} {:>9} {:>9} {:>9} {:>6} {:>6}",
        "id", "name", "start", "end", "km", "audio", "pool"
    );
    for row in route.summary() {
        println!(
            "{:<16} {:<24} {:>9} {:>9} {:>9.1} {:>6} {:>6}",
            row.id,
            row.name,
            format_clock(row.start_time),
            format_clock(row.end_time),
            row.distance_km,
            row.resources,
            row.pool_size
        );
    }
}

fn load_route(path: &Path) -> route_radio_core::Result<RouteMap> {
    let config = RouteConfig::from_path(path)?;
    RouteMap::process(&config)
}

/// Renders a number of seconds as `HH:MM:SS`.
fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Always-on radio for a looping journey", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tune in and play the route headlessly, logging what happens.
    Run(RunArgs),
    /// Print the route layout and what plays at a given position.
    Inspect {
        /// Path to the route JSON file.
        route: PathBuf,
        /// Cycle position in seconds. Defaults to the current time of day.
        #[arg(long)]
        at: Option<f64>,
    },
    /// Check a route file without playing it.
    Validate {
        /// Path to the route JSON file.
        route: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Path to the route JSON file.
    route: PathBuf,
    /// Optional JSON file overriding timer and tolerance settings.
    #[arg(long)]
    tuning: Option<PathBuf>,
    /// Playback volume between 0 and 1.
    #[arg(long)]
    volume: Option<f32>,
    /// Stop after this many seconds instead of running until Ctrl-C.
    #[arg(long)]
    for_secs: Option<f64>,
    /// Simulated load latency of the headless audio backend.
    #[arg(long, default_value_t = 150)]
    load_latency_ms: u64,
    /// Start at this cycle position instead of the time-of-day position.
    #[cfg(feature = "debug-tools")]
    #[arg(long)]
    seek: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_clock_time() {
        assert_eq!(format_clock(0.0), "00:00:00");
        assert_eq!(format_clock(3725.9), "01:02:05");
        assert_eq!(format_clock(-4.0), "00:00:00");
    }

    #[test]
    fn cli_parses_inspect_position() {
        let cli = Cli::try_parse_from(["route-radio", "inspect", "route.json", "--at", "90"])
            .unwrap();
        match cli.command {
            Commands::Inspect { route, at } => {
                assert_eq!(route, PathBuf::from("route.json"));
                assert_eq!(at, Some(90.0));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
