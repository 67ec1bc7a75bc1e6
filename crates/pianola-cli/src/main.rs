//! pianola - Command-line front end for the Pianola piano engine
//!
//! Plays notes, chords, arpeggios and melody files through the engine and
//! prints the events it emits.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pianola_core::{Config, MelodyFile, MusicalTime, PianoEngine, PianoEvent, Pitch};

#[derive(Parser)]
#[command(name = "pianola")]
#[command(author, version, about = "Virtual piano engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.config/pianola/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tempo in beats per minute, overrides the config file
    #[arg(long, global = true)]
    bpm: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init,
    /// Show the configuration file path
    ConfigPath,
    /// Play a single note
    Note {
        /// Note name, e.g. C4
        pitch: Pitch,
        /// Musical duration (e.g. 8n, 4n., 0.5)
        #[arg(short, long)]
        duration: Option<MusicalTime>,
        /// Velocity (0.0-1.0)
        #[arg(short, long)]
        velocity: Option<f32>,
    },
    /// Play notes together
    Chord {
        #[arg(required = true)]
        pitches: Vec<Pitch>,
        #[arg(short, long)]
        duration: Option<MusicalTime>,
        #[arg(short, long)]
        velocity: Option<f32>,
    },
    /// Play notes one after another
    Arpeggio {
        #[arg(required = true)]
        pitches: Vec<Pitch>,
        #[arg(short, long)]
        duration: Option<MusicalTime>,
        /// Time between notes (e.g. 16n)
        #[arg(short, long)]
        interval: Option<MusicalTime>,
        #[arg(short, long)]
        velocity: Option<f32>,
    },
    /// Play a melody file (TOML)
    Melody {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    // Load config
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(),
    };

    match cli.command {
        Commands::Init => {
            let path = Config::create_default_config_file()?;
            println!("Created default config at: {}", path.display());
            return Ok(());
        }
        Commands::ConfigPath => {
            let path = Config::config_path()?;
            println!("{}", path.display());
            return Ok(());
        }
        Commands::Note { pitch, duration, velocity } => {
            let engine = start_engine(&config, cli.bpm).await?;
            engine
                .observer()
                .notify(&PianoEvent::NotePlayed { note: pitch.clone() });
            engine.play_note(pitch, duration, None, velocity).await;
            engine.dispose();
        }
        Commands::Chord { pitches, duration, velocity } => {
            let engine = start_engine(&config, cli.bpm).await?;
            engine
                .observer()
                .notify(&PianoEvent::ChordPlayed { chord: pitches.clone() });
            engine.play_chord(pitches, duration, None, velocity).await;
            engine.dispose();
        }
        Commands::Arpeggio { pitches, duration, interval, velocity } => {
            let engine = start_engine(&config, cli.bpm).await?;
            engine.play_arpeggio(pitches, duration, interval, velocity).await;
            engine.dispose();
        }
        Commands::Melody { file } => {
            let melody = MelodyFile::load(&file)
                .with_context(|| format!("Failed to load melody from {}", file.display()))?;
            if let Some(bpm) = melody.bpm {
                config.engine.bpm = bpm;
            }
            let engine = start_engine(&config, cli.bpm).await?;
            play_melody(&engine, melody).await?;
            engine.dispose();
        }
    }

    Ok(())
}

async fn start_engine(config: &Config, bpm: Option<f64>) -> Result<PianoEngine> {
    let mut options = config.to_engine_options();
    if let Some(bpm) = bpm {
        options.bpm = bpm;
    }

    let engine = PianoEngine::new(options);
    engine.subscribe(|event| match event {
        PianoEvent::NotePlayed { note } => println!("note    {}", note),
        PianoEvent::ChordPlayed { chord } => {
            let names: Vec<_> = chord.iter().map(Pitch::as_str).collect();
            println!("chord   {}", names.join(" "));
        }
        PianoEvent::SequenceEnded => println!("end"),
    });

    engine.start().await.context("Audio did not start")?;
    log::info!("Engine ready at {} bpm", engine.bpm());
    Ok(engine)
}

async fn play_melody(engine: &PianoEngine, melody: MelodyFile) -> Result<()> {
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let handler = engine.clone();
    let events = melody.events.len();

    let scheduled = engine.schedule_melody(
        melody.events,
        move |event| {
            handler.handle_melody_event(&event);
            let lit: Vec<_> = (0..handler.group_count())
                .map(|group| handler.group_notes(group))
                .collect();
            log::debug!(
                "Event at {:.3}s, lit: {:?}",
                event.scheduled_play_time.unwrap_or_default(),
                lit
            );
        },
        Some(Box::new(move || {
            let _ = done_tx.send(());
        })),
    );

    if scheduled.is_none() {
        bail!("Melody has no events");
    }

    log::info!("Playing {} events", events);
    engine.play();
    done_rx.await.context("Melody was cancelled")?;
    Ok(())
}
