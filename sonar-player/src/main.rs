//! Sonar Player - command line front end
//!
//! Loads a session file, fetches and decodes its tracks for real and plays
//! the ensemble on the virtual backend driven by wall time. Events are
//! printed as JSON lines; progress is printed once per second.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sonar_common::config::{resolve_config_file, CONFIG_ENV_VAR, DEFAULT_FILE_NAME};
use sonar_player::audio::VirtualBackend;
use sonar_player::{DecodeCache, PlaybackState, SessionFile, Sound, SoundEvent};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for sonar-player
#[derive(Parser, Debug)]
#[command(name = "sonar-player")]
#[command(about = "Play a multi-track Sonar session")]
#[command(version)]
struct Args {
    /// Session file (falls back to $SONAR_CONFIG, then the user config dir)
    session: Option<PathBuf>,

    /// Start position in seconds
    #[arg(long)]
    seek: Option<f64>,

    /// Playback rate (0.5-2.0)
    #[arg(long)]
    rate: Option<f64>,

    /// Master volume (0.0-1.0)
    #[arg(long)]
    volume: Option<f32>,

    /// Virtual clock tick in milliseconds
    #[arg(long, default_value = "20")]
    realtime_tick_ms: u64,

    /// Stop after this many wall-clock seconds
    #[arg(long)]
    max_seconds: Option<f64>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("sonar_player=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let path = resolve_config_file(args.session.as_deref(), CONFIG_ENV_VAR, DEFAULT_FILE_NAME)
        .context("No session file")?;
    let session = SessionFile::load(&path)
        .with_context(|| format!("Failed to load session {}", path.display()))?;

    init_tracing(&session.logging.level);
    info!(
        "Loaded session {} ({} track(s))",
        path.display(),
        session.tracks.len()
    );

    let backend = VirtualBackend::new();
    let driver = backend.spawn_realtime(Duration::from_millis(args.realtime_tick_ms.max(1)));

    let sound = Sound::builder(session.tracks.clone())
        .config(session.sound.clone())
        .backend(Arc::new(backend.clone()))
        .cache(Arc::new(DecodeCache::from_config(&session.cache)))
        .build()
        .context("Failed to build sound")?;

    let mut events = sound.subscribe();

    if let Some(volume) = args.volume {
        sound.set_volume(volume);
    }
    if let Some(rate) = args.rate {
        sound.set_rate(rate);
    }
    if let Some(seek) = args.seek {
        sound.seek(seek);
    }

    let duration = sound.duration();
    info!("Session duration {:.2}s", duration);
    sound.play();

    let deadline = async {
        match args.max_seconds {
            Some(secs) if secs > 0.0 => tokio::time::sleep(Duration::from_secs_f64(secs)).await,
            _ => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut progress = tokio::time::interval(Duration::from_secs(1));
    let mut ended = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    match event {
                        SoundEvent::End => ended = true,
                        SoundEvent::State(PlaybackState::Stop) if ended => break,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = progress.tick() => {
                println!(
                    "[{}] {:>8.2}s / {:.2}s",
                    sound.state(),
                    sound.current_time(),
                    duration
                );
            }
            _ = &mut deadline => {
                info!("Time limit reached");
                break;
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    let stats = sound.cache().stats();
    info!(
        "Cache: {} hit(s), {} miss(es), {} eviction(s)",
        stats.hits, stats.misses, stats.evictions
    );

    sound.destroy();
    driver
        .await
        .context("Realtime driver task failed")?;

    info!("Shutdown complete");
    Ok(())
}
