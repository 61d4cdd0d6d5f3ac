//! nbhd-preflight - deployment check for the resilience layer
//!
//! Runs the same validation the client performs at start against a live
//! deployment: worker script pre-flight, manifest validation, and sound
//! asset decoding. Also renders synthetic notification tones to WAV.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nbhd_common::config::ResilienceConfig;
use nbhd_common::events::{ErrorCategory, Severity};
use nbhd_resilience::audio::{render_tone, AudioNotifier, ToneParams, DEFAULT_TONE_SAMPLE_RATE};
use nbhd_resilience::context;
use nbhd_resilience::error_bus::{self, ErrorBus, ReportedError, SwFailureKind};
use nbhd_resilience::host::headless::{HeadlessDocument, NullSink, WavSink};
use nbhd_resilience::host::native::{NativeAudioPlatform, ReqwestFetcher};
use nbhd_resilience::host::{HttpFetcher, PcmSink};
use nbhd_resilience::manifest::ManifestGuard;
use nbhd_resilience::service_worker::preflight;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};
use url::Url;

/// Command-line arguments for nbhd-preflight
#[derive(Parser, Debug)]
#[command(name = "nbhd-preflight")]
#[command(about = "Validate a deployment against the client resilience checks")]
#[command(version)]
struct Args {
    /// Configuration file (overrides NBHD_CONFIG and the user config file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deployment origin that relative asset paths resolve against
    #[arg(short, long, env = "NBHD_BASE_URL")]
    base_url: Option<Url>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the worker script, manifest, and configured sounds
    Check,
    /// Render the synthetic tone for a sound name to a WAV file
    Tone {
        /// Logical sound name (message, alert, ...)
        #[arg(short, long)]
        name: String,
        /// Output WAV path
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Logging comes up before config resolution; RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env().ok();
    let env_override = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new(default_filter("info"))));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ResilienceConfig::resolve(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    if !env_override {
        filter_handle
            .reload(EnvFilter::new(default_filter(&config.logging.level)))
            .context("Failed to apply configured log level")?;
    }

    info!("Starting nbhd-preflight v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Check => check(config, args.base_url).await,
        Command::Tone { name, out } => tone(&config, &name, out),
    }
}

/// Filter directives enabling `level` for this workspace's crates
fn default_filter(level: &str) -> String {
    format!("nbhd_resilience={0},nbhd_common={0}", level)
}

async fn check(config: ResilienceConfig, base_url: Option<Url>) -> Result<ExitCode> {
    if let Some(base) = &base_url {
        info!("Checking deployment at {}", base);
    }

    let fetcher: Arc<dyn HttpFetcher> =
        Arc::new(ReqwestFetcher::new(base_url).context("Failed to create HTTP client")?);
    let bus = Arc::new(ErrorBus::new(config.error_bus.clone()));
    error_bus::install(Arc::clone(&bus));
    error_bus::install_global_handlers();

    // No worker container here, so run the script check directly
    let script = config.service_worker.script_path.clone();
    let service_worker = match preflight(fetcher.as_ref(), &script).await {
        Ok(()) => {
            info!(script = %script, "Worker script passed pre-flight");
            json!({ "success": true, "script": script })
        }
        Err(failure) => {
            let can_retry = failure.kind == SwFailureKind::Network;
            bus.report(
                ErrorCategory::ServiceWorker,
                Some(ReportedError::service_worker(failure.kind, failure.details.clone())),
                Some(context! {
                    "phase" => "preflight",
                    "details" => failure.details.clone(),
                    "canRetry" => can_retry,
                }),
            );
            json!({
                "success": false,
                "script": script,
                "error": failure.kind,
                "details": failure.details,
                "canRetry": can_retry,
            })
        }
    };

    let guard = ManifestGuard::new(
        Arc::clone(&fetcher),
        Arc::new(HeadlessDocument::new()),
        Arc::clone(&bus),
        config.manifest.clone(),
    );
    let manifest = guard.validate().await;

    let platform = Arc::new(NativeAudioPlatform::new(Arc::new(NullSink)));
    let notifier = AudioNotifier::new(
        platform,
        Arc::clone(&fetcher),
        Arc::clone(&bus),
        config.audio.clone(),
    );
    notifier.initialize();
    let sounds: serde_json::Map<String, serde_json::Value> = notifier
        .load_configured()
        .await
        .into_iter()
        .map(|(name, outcome)| (name, json!(outcome)))
        .collect();

    let summary = bus.summary();
    let report = json!({
        "serviceWorker": service_worker,
        "manifest": manifest,
        "sounds": sounds,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize report")?);

    let visible = summary
        .by_severity
        .iter()
        .filter(|(severity, _)| **severity >= Severity::Medium)
        .map(|(_, count)| count)
        .sum::<usize>();
    if visible > 0 {
        warn!(problems = visible, "Deployment has user-visible problems");
        return Ok(ExitCode::FAILURE);
    }

    info!("Deployment passed all checks");
    Ok(ExitCode::SUCCESS)
}

fn tone(config: &ResilienceConfig, name: &str, out: PathBuf) -> Result<ExitCode> {
    let params = ToneParams::for_name(name);
    let buffer = render_tone(&params, DEFAULT_TONE_SAMPLE_RATE);

    WavSink::new(&out)
        .play(&buffer, config.audio.default_volume)
        .with_context(|| format!("Failed to write tone to {}", out.display()))?;

    info!(
        sound = name,
        waveform = ?params.waveform,
        frequency_hz = params.frequency_hz,
        duration_ms = params.duration_ms,
        "Rendered synthetic tone to {}",
        out.display()
    );
    Ok(ExitCode::SUCCESS)
}
