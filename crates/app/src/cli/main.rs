//! InterFX CLI Application

use anyhow::Context;
use clap::{Parser, Subcommand};
use interfx_core::{
    apply_file_changes, AudioProcessingObject, BufferState, ChannelSignal, ConfigManager,
    InitParams, InputConnection, InterFxConfig, OutputConnection, PropertyWatcher,
    SharedPropertyStore, SystemEffectsApo,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "interfx")]
#[command(about = "Real-time gain and three-band EQ system effects stage", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a factory-default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run a test tone through a locked pipeline and report the result
    Process {
        /// Tone frequency in Hz
        #[arg(long, default_value_t = 440.0)]
        frequency: f32,
        /// Seconds of audio to process
        #[arg(long, default_value_t = 1.0)]
        seconds: f32,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow the settings file and log effects-changed signals
    Watch,
}

#[derive(Debug, Serialize)]
struct ProcessReport {
    processing_mode: String,
    sample_rate: u32,
    channels: u16,
    blocks: usize,
    latency_ms: f64,
    output_state: String,
    effects: Vec<String>,
    peak_in: Vec<f32>,
    peak_out: Vec<f32>,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn settings_path(cli_path: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match cli_path {
        Some(path) => Ok(path),
        None => {
            let dir = ConfigManager::default_config_dir().context("locating config directory")?;
            Ok(ConfigManager::new(dir).config_path().to_path_buf())
        }
    }
}

async fn load_settings(path: &Path) -> anyhow::Result<InterFxConfig> {
    match path.parent() {
        Some(dir) if path.file_name().is_some_and(|name| name == "interfx.toml") => {
            Ok(ConfigManager::new(dir.to_path_buf()).load().await)
        }
        _ => InterFxConfig::load_from_file(path)
            .await
            .with_context(|| format!("loading {}", path.display())),
    }
}

async fn run_init(path: PathBuf, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    InterFxConfig::factory_default()
        .save_to_file(&path)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Factory default settings written");
    Ok(())
}

async fn run_process(
    path: PathBuf,
    frequency: f32,
    seconds: f32,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_settings(&path).await?;
    let stream = config.stream;
    let format = stream.format();
    let channels = usize::from(stream.channels);
    let block_frames = stream.block_frames as usize;

    let properties = Arc::new(SharedPropertyStore::new(config.effects));
    let (mut pipeline, notifier) = SystemEffectsApo::default()
        .initialize(InitParams::new(stream.processing_mode).with_properties(properties))
        .context("initializing pipeline")?;
    pipeline.lock(&format, &format).context("locking pipeline")?;

    let total_frames = (seconds.max(0.0) * stream.sample_rate as f32) as usize;
    let blocks = total_frames.div_ceil(block_frames);
    let mut input = vec![0.0_f32; block_frames * channels];
    let mut output = vec![0.0_f32; block_frames * channels];
    let mut peak_in = vec![0.0_f32; channels];
    let mut peak_out = vec![0.0_f32; channels];
    let mut output_state = BufferState::Invalid;

    for block in 0..blocks {
        let frames = block_frames.min(total_frames - block * block_frames);
        for frame in 0..frames {
            let t = (block * block_frames + frame) as f32 / stream.sample_rate as f32;
            let sample = 0.5 * (2.0 * std::f32::consts::PI * frequency * t).sin();
            input[frame * channels..(frame + 1) * channels].fill(sample);
        }
        for (i, sample) in input[..frames * channels].iter().enumerate() {
            peak_in[i % channels] = peak_in[i % channels].max(sample.abs());
        }

        let mut connection = InputConnection::new(&mut input, BufferState::Valid, frames as u32);
        let mut outputs = [OutputConnection::new(&mut output)];
        pipeline.process(&mut connection, &mut outputs);
        output_state = outputs[0].state;

        for (i, sample) in output[..frames * channels].iter().enumerate() {
            peak_out[i % channels] = peak_out[i % channels].max(sample.abs());
        }
    }

    let report = ProcessReport {
        processing_mode: stream.processing_mode.to_string(),
        sample_rate: stream.sample_rate,
        channels: stream.channels,
        blocks,
        latency_ms: pipeline.latency().as_secs_f64() * 1000.0,
        output_state: format!("{output_state:?}"),
        effects: notifier.effects_list(None).iter().map(ToString::to_string).collect(),
        peak_in,
        peak_out,
    };
    pipeline.unlock();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("mode:     {}", report.processing_mode);
        println!("format:   {} Hz, {} ch", report.sample_rate, report.channels);
        println!("blocks:   {}", report.blocks);
        println!("latency:  {:.1} ms", report.latency_ms);
        println!("state:    {}", report.output_state);
        println!("effects:  {:?}", report.effects);
        for (channel, (pin, pout)) in report.peak_in.iter().zip(&report.peak_out).enumerate() {
            println!("ch{channel}:      peak in {pin:.3}, peak out {pout:.3}");
        }
    }
    Ok(())
}

async fn run_watch(path: PathBuf) -> anyhow::Result<()> {
    let config = load_settings(&path).await?;
    let properties = Arc::new(SharedPropertyStore::new(config.effects));
    let params = InitParams::new(config.stream.processing_mode).with_properties(properties.clone());
    let (_pipeline, notifier) = SystemEffectsApo::default()
        .initialize(params)
        .context("initializing pipeline")?;

    let (signal, mut listener) = ChannelSignal::pair();
    let effects = notifier.effects_list(Some(Box::new(signal)));
    info!(?effects, "Active effects");

    let watcher = PropertyWatcher::new(path.clone())
        .await
        .context("starting settings watcher")?;
    let mut changes = watcher.subscribe();

    loop {
        tokio::select! {
            changed = changes.recv() => {
                match changed {
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Settings events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Settings watcher closed");
                        break;
                    }
                }
                if let Err(e) = apply_file_changes(watcher.path(), &properties, &notifier).await {
                    warn!(error = %e, "Settings reload failed");
                    continue;
                }
                if listener.try_recv() {
                    let (signal, next) = ChannelSignal::pair();
                    listener = next;
                    let effects = notifier.effects_list(Some(Box::new(signal)));
                    info!(
                        ?effects,
                        values = ?notifier.store().snapshot().values(),
                        "Effects changed"
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let path = settings_path(cli.config)?;
    match cli.command {
        Command::Init { force } => run_init(path, force).await,
        Command::Process {
            frequency,
            seconds,
            json,
        } => run_process(path, frequency, seconds, json).await,
        Command::Watch => run_watch(path).await,
    }
}
