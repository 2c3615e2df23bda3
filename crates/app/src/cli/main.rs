//! Minstrel CLI Application

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use minstrel_core::domain::audio::AudioEnumerator;
use minstrel_core::domain::dsp::{CompressorParams, ReverbParams};
use minstrel_core::domain::{
    AppConfig, BufferSource, ConfigManager, Engine, LoopRegion, Metronome, OfflineSink,
    StreamFormat,
};
use minstrel_infra::audio::{CpalEnumerator, CpalSink, LiveCapture, ResampleStream};
use minstrel_infra::VisualizationService;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "minstrel")]
#[command(about = "A real-time audio mixing engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List output devices with their indices
    Devices {
        /// List input devices instead
        #[arg(long)]
        inputs: bool,
    },

    /// Play a metronome and a test tone on an output device
    Play {
        /// Playback length in seconds
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,

        /// Metronome tempo
        #[arg(long, default_value_t = 120)]
        bpm: u32,

        /// Test tone frequency in Hz
        #[arg(long, default_value_t = 440.0)]
        tone: f32,

        /// Output device index (see `devices`)
        #[arg(short, long)]
        device: Option<usize>,

        /// Also mix this input device (see `devices --inputs`)
        #[arg(short, long)]
        input: Option<usize>,
    },

    /// Mix test tones offline and print statistics
    Render {
        /// Length in seconds
        #[arg(short, long, default_value_t = 1.0)]
        seconds: f32,

        /// Number of tone channels
        #[arg(short, long, default_value_t = 2)]
        channels: usize,

        /// Master volume
        #[arg(long, default_value_t = 0.8)]
        master: f32,

        /// Print the engine snapshot as JSON
        #[arg(long)]
        snapshot: bool,
    },

    /// Print the effective configuration
    Config,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = if verbose {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn load_config(config_dir: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let dir = match config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir()?,
    };
    Ok(ConfigManager::new(dir).load().await.sanitized())
}

/// One second of a looping sine in `format`
fn looping_tone(format: StreamFormat, freq: f32, amplitude: f32) -> anyhow::Result<BufferSource> {
    let stride = format.stride();
    let frames = format.hz() as usize;
    let samples: Vec<f32> = (0..frames)
        .flat_map(|i| {
            let t = i as f32 / format.hz() as f32;
            let s = (2.0 * std::f32::consts::PI * freq * t).sin() * amplitude;
            std::iter::repeat(s).take(stride)
        })
        .collect();

    let region = LoopRegion::new(0, frames as u64).context("empty tone loop")?;
    Ok(BufferSource::new(samples, format).with_loop(region))
}

fn list_devices(inputs: bool) -> anyhow::Result<()> {
    let enumerator = CpalEnumerator::new();
    let (kind, devices) = if inputs {
        ("input", enumerator.input_devices()?)
    } else {
        ("output", enumerator.output_devices()?)
    };
    if devices.is_empty() {
        println!("No {} devices found", kind);
        return Ok(());
    }

    for (index, device) in devices.iter().enumerate() {
        let rate = device
            .default_sample_rate
            .map(|r| format!("{} Hz", r.hz()))
            .unwrap_or_else(|| "unknown rate".to_string());
        println!("{:>3}  {} ({})", index, device.name, rate);
    }
    Ok(())
}

async fn play(
    mut config: AppConfig,
    seconds: u64,
    bpm: u32,
    tone: f32,
    device: Option<usize>,
    input: Option<usize>,
) -> anyhow::Result<()> {
    if device.is_some() {
        config.output_device = device;
    }

    let sink = CpalSink::new(config.stream_config());
    let mut engine =
        Engine::new(&config, Box::new(sink)).context("failed to open the output device")?;
    let format = engine.format();

    let metronome = Metronome::new(format);
    let control = metronome.control();
    control.set_bpm(bpm);
    control.set_enabled(true);

    let click = engine.create_channel("Metronome")?;
    engine.set_source(click, Box::new(metronome))?;

    let tone_id = engine.create_channel("Tone")?;
    engine.set_source(tone_id, Box::new(looping_tone(format, tone, 0.5)?))?;
    if let Some(channel) = engine.channel_mut(tone_id) {
        channel.set_volume(0.4);
        channel.add_effect(ReverbParams::default())?;
    }
    engine.set_ducking_trigger(click, [tone_id])?;
    engine.set_trigger_active(click, true)?;

    // The stream handle must outlive playback
    let capture = match input {
        Some(index) => {
            let (capture, source) =
                LiveCapture::open(&CpalEnumerator::new(), Some(index), format.channels.count())
                    .context("failed to open the input device")?;
            let input_id = engine.create_channel(format!("Input: {}", capture.device()))?;
            let resampled = ResampleStream::new(source, format.hz())?;
            engine.set_source(input_id, Box::new(resampled))?;
            Some(capture)
        }
        None => None,
    };

    let (visual, mut frames) =
        VisualizationService::new(engine.monitor(), config.fft_size, config.analysis_rate_hz);
    let visual = visual.spawn();

    engine.start()?;
    tracing::info!("Playing for {} s at {} BPM", seconds, control.bpm());

    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.tick().await;
    for _ in 0..seconds {
        report.tick().await;
        if frames.has_changed().unwrap_or(false) {
            let frame = frames.borrow_and_update().clone();
            let peak = frame
                .spectrum
                .peak()
                .map(|(freq, db)| format!("{:.0} Hz at {:.1} dB", freq, db))
                .unwrap_or_default();
            let input_db = capture
                .as_ref()
                .map(|c| format!(" | input {:>6.1} dB", c.level().current_db))
                .unwrap_or_default();
            println!(
                "master {:>6.1} dB | spectrum peak {}{}",
                frame.master.current_db, peak, input_db
            );
        }
        engine.drain_faults();
    }

    engine.stop()?;
    drop(frames);
    visual.await?;
    Ok(())
}

fn render(
    config: &AppConfig,
    seconds: f32,
    channels: usize,
    master: f32,
    snapshot: bool,
) -> anyhow::Result<()> {
    if channels == 0 {
        bail!("at least one channel is required");
    }

    let sink = OfflineSink::new();
    let mut engine = Engine::new(config, Box::new(sink.clone()))?;
    let format = engine.format();

    for i in 0..channels {
        let id = engine.create_channel(format!("Tone {}", i + 1))?;
        let freq = 220.0 * (i + 1) as f32;
        engine.set_source(id, Box::new(looping_tone(format, freq, 0.9)?))?;
        if i == 0 {
            if let Some(channel) = engine.channel_mut(id) {
                channel.add_effect(CompressorParams::default())?;
            }
        }
    }
    engine.set_master_volume(master);
    engine.start()?;

    let samples = (seconds.max(0.0) * format.hz() as f32) as usize * format.stride();
    let output = sink.render(samples)?;
    let faults = engine.drain_faults();

    let peak = output.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
    let rms = if output.is_empty() {
        0.0
    } else {
        (output.iter().map(|s| s * s).sum::<f32>() / output.len() as f32).sqrt()
    };

    println!("Rendered {} samples at {}", output.len(), format);
    println!("  peak: {:.4}", peak);
    println!("  rms:  {:.4}", rms);
    println!("  faults: {}", faults.len());
    for channel in engine.channels() {
        println!(
            "  {:<10} {:>6.1} dB",
            channel.name(),
            channel.level().current_db
        );
    }

    if snapshot {
        println!("{}", serde_json::to_string_pretty(&engine.snapshot())?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::info!("Minstrel starting...");

    match cli.command {
        Command::Devices { inputs } => list_devices(inputs),
        Command::Play {
            seconds,
            bpm,
            tone,
            device,
            input,
        } => {
            let config = load_config(cli.config_dir).await?;
            play(config, seconds, bpm, tone, device, input).await
        }
        Command::Render {
            seconds,
            channels,
            master,
            snapshot,
        } => {
            let config = load_config(cli.config_dir).await?;
            render(&config, seconds, channels, master, snapshot)
        }
        Command::Config => {
            let config = load_config(cli.config_dir).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
