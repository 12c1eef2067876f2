//! Replay command - drive the engine along a recorded route.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use geotrigger::config::{EngineConfig, ServiceConfig};
use geotrigger::http::{HttpFetcher, HttpFlusher};
use geotrigger::location::{ReplayConfig, ReplayLocationSource, Route};
use geotrigger::refresh::Fetcher;
use geotrigger::trigger::Flusher;
use geotrigger::Engine;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::common::{ConsoleListener, FileFetcher, SimulatedCamera, StdoutFlusher};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Stats are printed this often while replaying.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Arguments for the replay command.
#[derive(Debug, Clone)]
pub struct ReplayArgs {
    pub route: PathBuf,
    pub conditions: Option<PathBuf>,
    pub interval_secs: Option<f64>,
    pub min_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub looping: bool,
    pub identity: Option<String>,
    pub max_range: Option<f64>,
    pub actuators: Vec<String>,
    pub capture_delay_ms: u64,
    pub post_results: bool,
}

/// Run the replay command.
pub fn run(runner: &CliRunner, args: ReplayArgs) -> Result<(), CliError> {
    runner.log_startup("replay");
    let config = runner.config();

    let engine_config = engine_config(config.engine.clone(), &args);
    let route = Route::from_file(&args.route)?;
    let replay_config = replay_config(&args);

    let fetcher: Arc<dyn Fetcher> = match &args.conditions {
        Some(path) => Arc::new(FileFetcher::new(path)),
        None => Arc::new(HttpFetcher::new(&require_service(&config.service)?)?),
    };
    let flusher: Arc<dyn Flusher> = if args.post_results {
        Arc::new(HttpFlusher::new(&require_service(&config.service)?)?)
    } else {
        Arc::new(StdoutFlusher)
    };

    println!("geotrigger route replay v{}", geotrigger::VERSION);
    println!("==========================");
    println!();
    println!("Route:      {} ({} points)", args.route.display(), route.len());
    match &args.conditions {
        Some(path) => println!("Conditions: {}", path.display()),
        None => println!(
            "Conditions: {}",
            config.service.url.as_deref().unwrap_or_default()
        ),
    }
    println!("Interval:   {:?}", replay_config.interval);
    println!(
        "Speed:      {:.1}-{:.1} m/s",
        replay_config.min_speed, replay_config.max_speed
    );
    if !args.actuators.is_empty() {
        println!("Actuators:  {}", args.actuators.join(", "));
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let expected_duration = replay_config.interval * (route.len() as u32 + 1);
    let source = Arc::new(ReplayLocationSource::new(route, replay_config));

    let mut builder = Engine::builder(engine_config, fetcher, source)
        .with_listener(Arc::new(ConsoleListener))
        .with_flusher(flusher);
    for category in &args.actuators {
        builder = builder.with_actuator(
            category.as_str(),
            Arc::new(SimulatedCamera::new(Duration::from_millis(args.capture_delay_ms))),
        );
    }
    let engine = builder.build()?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, stopping...");
        signal.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let runtime = runner.runtime()?;
    runtime.block_on(async {
        engine.start()?;

        let finished = tokio::time::sleep(expected_duration);
        tokio::pin!(finished);
        let mut stats_ticker = tokio::time::interval(STATS_INTERVAL);
        stats_ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = &mut finished, if !args.looping => {
                    info!("Route finished");
                    break;
                }
                _ = stats_ticker.tick() => println!("[stats] {}", engine.stats()),
            }
        }

        engine.stop();
        Ok::<(), CliError>(())
    })?;

    let stats = engine.stats();
    println!();
    println!("Session Summary");
    println!("───────────────");
    println!("  Samples evaluated:  {} ({} dropped)", stats.samples_evaluated, stats.samples_dropped);
    println!("  Conditions fired:   {}", stats.conditions_fired);
    println!("  Conditions evicted: {}", stats.conditions_evicted);
    println!(
        "  Fetches:            {} ok, {} failed, {} skipped",
        stats.fetches_succeeded, stats.fetches_failed, stats.fetches_skipped
    );
    println!("  Triggers flushed:   {}", stats.entries_flushed);
    Ok(())
}

fn engine_config(mut config: EngineConfig, args: &ReplayArgs) -> EngineConfig {
    if let Some(identity) = &args.identity {
        config = config
            .with_local_identity(identity.clone())
            .with_self_origin_suppression(true);
    }
    if let Some(range) = args.max_range {
        config = config.with_max_retrieval_range(range);
    }
    if config.self_origin_suppression && config.suppressed_identity().is_none() {
        warn!("No local identity configured, self-origin suppression disabled");
        config = config.with_self_origin_suppression(false);
    }
    config
}

fn replay_config(args: &ReplayArgs) -> ReplayConfig {
    let mut config = ReplayConfig::default().with_looping(args.looping);
    if let Some(secs) = args.interval_secs.filter(|s| s.is_finite() && *s > 0.0) {
        config = config.with_interval(Duration::from_secs_f64(secs));
    }
    if args.min_speed.is_some() || args.max_speed.is_some() {
        let min = args.min_speed.unwrap_or(config.min_speed);
        let max = args.max_speed.unwrap_or(config.max_speed);
        config = config.with_speed_range(min, max);
    }
    config
}

fn require_service(service: &ServiceConfig) -> Result<ServiceConfig, CliError> {
    if service.url.as_deref().map_or(true, |url| url.trim().is_empty()) {
        return Err(CliError::Config(
            "No conditions file given and no [service] url configured. \
             Use --conditions or set url in config.ini"
                .to_string(),
        ));
    }
    Ok(service.clone())
}
