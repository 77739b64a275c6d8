//! Forge CLI: real-time mastering from the terminal

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use forge_core::domain::analysis::{spawn_analysis, AnalysisError, AnalysisRequest, SuggestionService};
use forge_core::domain::config::{ConfigManager, ForgeConfig};
use forge_core::domain::engine::MasteringEngine;
use forge_core::domain::params::EqBands;
use forge_core::domain::presets::PresetId;
use forge_core::domain::session::MasteringSession;
use forge_core::domain::wav::encode_wav;
use forge_infra::audio::{decode_file, output_device_names, OutputStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Polls to wait for the engine to hand over a capture
const CAPTURE_WAIT_POLLS: u32 = 40;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Real-time audio mastering console", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.config/forge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a file through the mastering chain
    Play(PlayArgs),
    /// Print level statistics and the suggestion request for a file
    Analyze {
        file: PathBuf,
        /// Suggestion response to parse and merge (JSON)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Play a file and record the processed output to a WAV file
    Export {
        #[command(flatten)]
        play: PlayArgs,
        /// Destination WAV file
        #[arg(short, long)]
        out: PathBuf,
    },
    /// List the preset bank
    Presets,
    /// List output devices
    Devices,
}

#[derive(Args)]
struct PlayArgs {
    file: PathBuf,

    /// Preset to apply before playback
    #[arg(short, long)]
    preset: Option<PresetId>,

    /// Start with processing bypassed
    #[arg(long)]
    bypass: bool,

    /// Master gain in dB (-60 to +12)
    #[arg(long, allow_hyphen_values = true)]
    master_gain: Option<f32>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<f64>,

    /// Apply the AI settings from a suggestion response (JSON)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Output device name
    #[arg(long)]
    device: Option<String>,
}

/// Suggestion service answering from a saved JSON response
struct ReportFile(PathBuf);

#[async_trait]
impl SuggestionService for ReportFile {
    async fn suggest(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        debug!(prompt = %request.prompt(), "Answering suggestion request from file");
        tokio::fs::read_to_string(&self.0)
            .await
            .map_err(|e| AnalysisError::Unavailable(format!("{}: {}", self.0.display(), e)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Command::Play(args) => {
            run_playback(&config, &args, None).await?;
        }
        Command::Export { play, out } => {
            run_playback(&config, &play, Some(&out)).await?;
        }
        Command::Analyze { file, report } => analyze(&config, &file, report).await?,
        Command::Presets => {
            for id in PresetId::ALL {
                println!("{:<10} {}", id.name(), id.description());
            }
        }
        Command::Devices => {
            for name in output_device_names()? {
                println!("{name}");
            }
        }
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<ForgeConfig> {
    match path {
        Some(path) => ForgeConfig::load_from_file(path)
            .await
            .with_context(|| format!("loading config {}", path.display())),
        None => {
            let manager = ConfigManager::new(ConfigManager::default_config_dir()?);
            Ok(manager.load().await)
        }
    }
}

/// Build a session with `file` loaded and the requested settings applied
async fn prepare_session(
    config: &ForgeConfig,
    file: &Path,
    args: Option<&PlayArgs>,
) -> anyhow::Result<(MasteringEngine, MasteringSession)> {
    let (engine, handle) = MasteringEngine::new(&config.engine, &EqBands::default())?;
    let mut session = MasteringSession::new(handle, &config.engine)?;

    let rate = config.engine.sample_rate;
    let path = file.to_path_buf();
    let buffer = tokio::task::spawn_blocking(move || decode_file(path, rate))
        .await?
        .with_context(|| format!("decoding {}", file.display()))?;
    info!(
        frames = buffer.len(),
        channels = buffer.num_channels(),
        seconds = buffer.duration_secs(),
        "Source ready"
    );
    session.load_source(buffer)?;

    if let Some(args) = args {
        if let Some(preset) = args.preset {
            session.apply_preset(preset)?;
        }
        if let Some(gain) = args.master_gain {
            session.set_master_gain(gain)?;
        }
        if let Some(report) = &args.report {
            request_and_apply(&mut session, report).await?;
        }
        if args.bypass {
            session.set_bypass(true)?;
        }
    }

    Ok((engine, session))
}

async fn request_and_apply(session: &mut MasteringSession, report: &Path) -> anyhow::Result<()> {
    let (ticket, request) = session.begin_analysis()?;
    let service: Arc<dyn SuggestionService> = Arc::new(ReportFile(report.to_path_buf()));
    let (ticket, outcome) = spawn_analysis(service, ticket, request).await?;

    let report = session.finish_analysis(ticket, outcome)?;
    println!("Suggestion: {}", report.suggestion);
    session.apply_neural_remaster()?;
    Ok(())
}

async fn run_playback(config: &ForgeConfig, args: &PlayArgs, export: Option<&Path>) -> anyhow::Result<()> {
    let (engine, mut session) = prepare_session(config, &args.file, Some(args)).await?;

    let device = args
        .device
        .as_deref()
        .or(Some(config.audio.output_device.as_str()));
    let stream = OutputStream::open(device, engine)?;
    info!(device = stream.device_name(), "Output stream running");

    if export.is_some() {
        session.start_capture()?;
    }
    session.play()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                session.pause()?;
                break;
            }
            _ = ticker.tick() => {
                session.poll()?;
                if let Some(reading) = session.meter().filter(|r| !r.is_silent()) {
                    debug!(rms_db = reading.rms_db, peak = reading.peak, "Meter");
                }
                if !session.is_playing() {
                    break;
                }
                if args.seconds.is_some_and(|limit| session.position() >= limit) {
                    session.pause()?;
                    break;
                }
            }
        }
    }

    if let Some(out) = export {
        session.stop_capture()?;
        let mut captured = None;
        for _ in 0..CAPTURE_WAIT_POLLS {
            ticker.tick().await;
            session.poll()?;
            captured = session.take_capture();
            if captured.is_some() {
                break;
            }
        }
        let Some(buffer) = captured else {
            bail!("audio engine did not return the recording");
        };
        tokio::fs::write(out, encode_wav(&buffer))
            .await
            .with_context(|| format!("writing {}", out.display()))?;
        info!(path = %out.display(), seconds = buffer.duration_secs(), "Export written");
    }

    drop(stream);
    Ok(())
}

async fn analyze(config: &ForgeConfig, file: &Path, report: Option<PathBuf>) -> anyhow::Result<()> {
    let (_engine, mut session) = prepare_session(config, file, None).await?;
    let (ticket, request) = session.begin_analysis()?;
    println!("RMS:  {} dB", request.rms);
    println!("Peak: {} dB", request.peak);

    let Some(report) = report else {
        println!("\n{}", request.prompt());
        return Ok(());
    };

    let service: Arc<dyn SuggestionService> = Arc::new(ReportFile(report));
    let (ticket, outcome) = spawn_analysis(service, ticket, request).await?;
    let report = session.finish_analysis(ticket, outcome)?;
    println!("Suggestion: {}", report.suggestion);
    if let Some(centroid) = &report.spectral_centroid {
        println!("Spectral centroid: {centroid}");
    }

    match session.apply_neural_remaster() {
        Ok(()) => println!("{}", serde_json::to_string_pretty(session.params())?),
        Err(e) => warn!(error = %e, "Report has no usable settings"),
    }
    Ok(())
}
