//! CLI Command Implementations

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::config::{CaptureConfig, EngineSettings};
use crate::engine::{calculate_peak, calculate_rms, AudioBuffer};
use crate::graph::NodeKind;
use crate::session::{
    CaptureSessionManager, CapturedStream, SessionRenderer, SourceId, ToneStream,
};

const SOURCE: SourceId = SourceId(1);

/// Load engine settings, falling back to defaults
pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    match path {
        Some(path) => EngineSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(EngineSettings::default()),
    }
}

fn load_config(path: &Path) -> Result<CaptureConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = CaptureConfig::from_json(&json)
        .with_context(|| format!("Invalid capture config in {}", path.display()))?;
    Ok(config)
}

/// Capture `stream`; the renderer is driven inline, between control ticks
fn start_session(
    settings: &EngineSettings,
    stream: ToneStream,
) -> Result<(CaptureSessionManager, SessionRenderer)> {
    let (mut manager, renderer) = CaptureSessionManager::new(settings.clone());
    manager.capture(SOURCE, || Ok(Box::new(stream) as Box<dyn CapturedStream>))?;
    Ok((manager, renderer))
}

/// Print the graph a capture config produces
pub fn describe(settings: &EngineSettings, config_path: &Path, channels: usize) -> Result<()> {
    info!("Describing topology for: {}", config_path.display());

    let config = load_config(config_path)?;
    let stream = ToneStream::new(channels, settings.sample_rate, 440.0, 0.0);
    let (mut manager, _renderer) = start_session(settings, stream)?;
    manager.apply_config(SOURCE, config);

    let description = manager
        .describe(SOURCE)
        .context("Session disappeared while describing")?;
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

/// Push a tone through a session and print input/output levels
pub fn render(
    settings: &EngineSettings,
    config_path: Option<&Path>,
    frequency: f32,
    duration: f32,
    channels: usize,
) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => CaptureConfig::default(),
    };

    let stream = ToneStream::new(channels, settings.sample_rate, frequency, 0.5);
    let (mut manager, mut renderer) = start_session(settings, stream)?;
    manager.apply_config(SOURCE, config);

    let blocks = (duration * settings.sample_rate as f32 / settings.block_size as f32).ceil() as usize;
    info!("Rendering {} blocks of {} frames", blocks, settings.block_size);

    let mut output = AudioBuffer::with_channels(
        settings.destination_channels,
        settings.block_size,
        settings.sample_rate,
    );
    let mut peak = f32::NEG_INFINITY;
    let mut rms_sum = 0.0_f64;
    let mut finite = true;
    for _ in 0..blocks {
        renderer.process_block(&mut output);
        peak = peak.max(calculate_peak(&output));
        let rms = calculate_rms(&output);
        if rms.is_finite() {
            rms_sum += f64::from(rms);
        }
        finite &= output.is_finite();
        manager.poll();
    }

    if let Some(graph) = manager.graph(SOURCE) {
        println!("Live nodes: {}", graph.live_nodes().len());
        for kind in [
            NodeKind::PitchShifter,
            NodeKind::AccuratePitch,
            NodeKind::Filter,
            NodeKind::Compressor,
            NodeKind::Delay,
            NodeKind::Panner,
        ] {
            let count = graph.count_live(kind);
            if count > 0 {
                println!("  {kind}: {count}");
            }
        }
    }
    println!("Blocks rendered: {blocks}");
    println!("Peak: {peak:.2} dBFS");
    println!("Mean RMS: {:.2} dBFS", rms_sum / blocks.max(1) as f64);
    if !finite {
        println!("Warning: output contained NaN or Inf");
    }
    Ok(())
}

/// Record a tone burst, play it reversed and print the control messages
pub fn reverse(
    settings: &EngineSettings,
    tone_seconds: f32,
    play_after: Option<usize>,
    limit_seconds: f32,
) -> Result<()> {
    let tone_frames = (tone_seconds * settings.sample_rate as f32) as usize;
    let stream =
        ToneStream::new(2, settings.sample_rate, 440.0, 0.5).with_tone_frames(tone_frames);
    let (mut manager, mut renderer) = start_session(settings, stream)?;

    let (port, messages) = crossbeam_channel::unbounded();
    manager.begin_reverse(SOURCE, port, None)?;

    let block_seconds = settings.block_size as f32 / settings.sample_rate as f32;
    let max_blocks = (limit_seconds / block_seconds).ceil() as usize;
    let mut output = AudioBuffer::with_channels(
        settings.destination_channels,
        settings.block_size,
        settings.sample_rate,
    );
    let mut audible_blocks = 0;

    for block in 0..max_blocks {
        if play_after == Some(block) {
            manager.notify_play_requested(SOURCE)?;
            println!("{:>8.3}s  PLAY", block as f32 * block_seconds);
        }

        renderer.process_block(&mut output);
        if !output.is_silent(settings.reverse.silence_threshold) {
            audible_blocks += 1;
        }

        let summary = manager.poll();
        for message in messages.try_iter() {
            println!("{:>8.3}s  {:?}", block as f32 * block_seconds, message);
        }
        if !summary.reverse_finished.is_empty() {
            break;
        }
    }

    match manager.reverse_state(SOURCE) {
        Some(state) => println!("Stopped at limit in state {state}"),
        None => println!(
            "Reversed clip played for {:.3}s",
            audible_blocks as f32 * block_seconds
        ),
    }
    manager.release(SOURCE);
    Ok(())
}
