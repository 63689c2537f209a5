//! Command line backing-track player.
//!
//! Plays every audio file in a folder as one song, optionally after a
//! count-in. Set `RUST_LOG=debug` for scheduling detail.

mod config;
mod stems;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backtrack_core::{
    AudioEngine, ClickGenerator, ClickSound, CpalOutput, EngineState, FileSourceProvider,
};
use clap::Parser;
use tokio::sync::oneshot;

use config::Config;

/// UI frame interval for `update()` and the meters.
const FRAME: Duration = Duration::from_millis(16);
/// How often the status line is redrawn.
const STATUS_EVERY: u32 = 15;

#[derive(Parser)]
#[command(author, version, about = "Play a folder of stems in sync")]
struct Cli {
    /// Folder with one audio file per track.
    folder: PathBuf,
    /// Config file to use instead of the one in the user config dir.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Tempo of the count-in.
    #[arg(long)]
    bpm: Option<f64>,
    /// Measures of count-in, 1 to 4.
    #[arg(long)]
    count_in: Option<u8>,
    /// Start right away without a count-in.
    #[arg(long)]
    no_count_in: bool,
    /// Click sound for the count-in.
    #[arg(long)]
    sound: Option<ClickSound>,
    /// Pitch shift in semitones.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pitch: f32,
    /// Start position in seconds.
    #[arg(long, default_value_t = 0.0)]
    start: f64,
    /// Solo these tracks, by file name without extension.
    #[arg(long)]
    solo: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    let provider = Arc::new(FileSourceProvider::new());
    let mut song = stems::song_from_folder(&cli.folder, &provider)
        .with_context(|| format!("failed to read {}", cli.folder.display()))?;
    if song.tracks.is_empty() {
        anyhow::bail!("no audio files in {}", cli.folder.display());
    }

    let mut engine = AudioEngine::new(config.engine.clone(), provider, Box::new(CpalOutput::new()));
    engine.initialize().context("failed to start audio output")?;
    engine.set_on_duration_updated(|id, seconds| log::info!("{id}: {seconds:.1}s"));
    engine.set_pitch_semitones(cli.pitch)?;

    let report = engine.load_song(&mut song).await?;
    for (id, e) in &report.failed {
        let name = song.tracks.iter().find(|t| t.id == *id).map_or("?", |t| t.name.as_str());
        eprintln!("skipping {name}: {e}");
    }
    if !report.is_playable() {
        anyhow::bail!("none of the tracks could be loaded");
    }

    for name in &cli.solo {
        match song.tracks.iter().find(|t| t.name.eq_ignore_ascii_case(name)) {
            Some(track) => {
                engine.toggle_track_solo(track.id)?;
            }
            None => log::warn!("no track named {name}"),
        }
    }
    if cli.start > 0.0 {
        engine.seek(cli.start)?;
    }

    let mut click = config.click.to_click_config();
    if let Some(bpm) = cli.bpm {
        click.bpm = bpm;
    }
    if let Some(measures) = cli.count_in {
        click.count_in_measures = measures;
    }
    if let Some(sound) = cli.sound {
        click.sound = sound;
    }

    println!("{} - {:.1}s, {} tracks", song.title, song.duration, report.loaded.len());

    let mut clicks = engine.take_click_sink().map(ClickGenerator::new);
    if let Some(clicks) = clicks.as_mut().filter(|_| !cli.no_count_in) {
        let (done_tx, done_rx) = oneshot::channel();
        clicks.start_count_in(&click, move || {
            let _ = done_tx.send(());
        })?;
        tokio::select! {
            _ = done_rx => {}
            _ = tokio::signal::ctrl_c() => {
                clicks.stop();
                engine.dispose();
                return Ok(());
            }
        }
    }

    engine.play()?;
    run(&mut engine).await;

    println!();
    if let Some(clicks) = clicks.as_mut() {
        clicks.stop();
    }
    engine.dispose();
    Ok(())
}

/// Poll the engine once per frame until the song ends or ctrl-c.
async fn run(engine: &mut AudioEngine) {
    let mut interval = tokio::time::interval(FRAME);
    let mut frame: u32 = 0;
    let stop = tokio::signal::ctrl_c();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut stop => {
                log::info!("interrupted");
                let _ = engine.stop();
                return;
            }
        }

        engine.update();
        if engine.state() == EngineState::Stopped {
            return;
        }

        let levels = engine.get_audio_levels();
        let master = engine.get_master_stereo_levels();
        frame = frame.wrapping_add(1);
        if frame % STATUS_EVERY != 0 {
            continue;
        }

        let mut line = format!(
            "\r{:>6.1}/{:.1}s  L {} R {}",
            engine.current_time(),
            engine.duration(),
            bar(master.left),
            bar(master.right)
        );
        for chain in engine.chains() {
            let level = levels.get(&chain.id()).copied().unwrap_or(0.0);
            line.push_str(&format!("  {} {:>3.0}", chain.track().name, level));
        }
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

fn bar(level: f32) -> String {
    let filled = (level / 10.0).round().clamp(0.0, 10.0) as usize;
    format!("{:<10}", "#".repeat(filled))
}
