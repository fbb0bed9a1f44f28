use clap::{Args as ClapArgs, Parser, Subcommand};
use crossbeam::channel::{bounded, RecvTimeoutError};
use entrain_session::assets::{AssetSource, Assets, FsAssetSource, NarrationManifest};
use entrain_session::audio_io::CpalBackend;
use entrain_session::clock::SystemTimeSource;
use entrain_session::config::{EngineConfig, CONFIG};
use entrain_session::models::VoiceOptions;
use entrain_session::{
    Command, Orchestrator, SessionConfig, SessionHandle, SessionPhase, StartOptions, TickCadence,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// CLI for playing an entrainment session
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a session JSON file
    Run(RunArgs),
    /// Generate a default config file and exit
    GenerateConfig(ConfigArgs),
}

#[derive(ClapArgs)]
struct RunArgs {
    /// Path to the session JSON file
    #[arg(long)]
    path: String,
    /// Directory holding ambient sound files
    #[arg(long)]
    ambient_dir: Option<PathBuf>,
    /// Directory holding pre-rendered narration clips
    #[arg(long)]
    narration_dir: Option<PathBuf>,
    /// Narration manifest JSON mapping track ids to clip files
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Override the session's ambient sound
    #[arg(long)]
    ambient: Option<String>,
    #[arg(long, default_value_t = 1.0)]
    volume: f32,
    /// Add the isochronic pulse layer
    #[arg(long, default_value_t = false)]
    isochronic: bool,
    /// Start this many seconds into the session
    #[arg(long)]
    seek: Option<f64>,
}

#[derive(ClapArgs)]
struct ConfigArgs {
    /// Output path for the generated configuration
    #[arg(long, default_value = "config.toml")]
    out: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_command(args)?,
        Commands::GenerateConfig(cfg) => {
            EngineConfig::generate_default(&cfg.out)?;
            println!("Generated default config at {}", cfg.out);
        }
    }
    Ok(())
}

fn load_assets(args: &RunArgs) -> Result<Assets, Box<dyn std::error::Error>> {
    let manifest = match &args.manifest {
        Some(path) => Some(NarrationManifest::from_json(&std::fs::read_to_string(path)?)?),
        None => None,
    };
    Ok(Assets {
        ambient: args
            .ambient_dir
            .as_ref()
            .map(|d| Arc::new(FsAssetSource::new(d)) as Arc<dyn AssetSource>),
        narration: args
            .narration_dir
            .as_ref()
            .map(|d| Arc::new(FsAssetSource::new(d)) as Arc<dyn AssetSource>),
        manifest,
        speech: None,
    })
}

fn run_command(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let session = SessionConfig::from_json(&std::fs::read_to_string(&args.path)?)?;
    let assets = load_assets(&args)?;
    let options = StartOptions {
        volume: args.volume,
        isochronic: args.isochronic,
        ambient_override: args.ambient.clone(),
        voice: VoiceOptions::default(),
    };

    let handle = SessionHandle::spawn(
        move || {
            let backend = CpalBackend::new()?;
            Ok(Orchestrator::new(Box::new(backend), Arc::new(SystemTimeSource::new())).with_assets(assets))
        },
        TickCadence::from_millis(CONFIG.visible_tick_ms, CONFIG.hidden_tick_ms),
    )?;
    let duration = session.duration;
    handle.start(session, options)?;
    if let Some(t) = args.seek {
        handle.send(Command::Seek(t))?;
    }

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;
    println!("Playing {} ({duration:.0}s)... press Ctrl+C to stop", args.path);

    let mut phase = SessionPhase::Starting;
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        match handle.ticks().recv_timeout(Duration::from_millis(250)) {
            Ok(state) => {
                if state.phase != phase {
                    phase = state.phase;
                    log::info!(
                        target: "session_player",
                        "{phase:?} at {:.1}s, beat {:.2} Hz",
                        state.elapsed_seconds,
                        state.beat_freq_hz
                    );
                }
                if phase == SessionPhase::Complete {
                    std::thread::sleep(Duration::from_secs_f64(CONFIG.complete_fade));
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    handle.shutdown();
    Ok(())
}
