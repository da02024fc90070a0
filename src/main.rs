//! Driftwell - Sleep Sounds Player
//!
//! Plays the selected ambient sound until the sleep timer runs out, printing
//! each state change as a JSON line.
//!
//! Usage: `driftwell [SOUND_ID_OR_PATH] [MINUTES]`

use anyhow::Context;
use driftwell::audio::{AudioSessionController, RodioBackend, SessionRequest, SoundLibrary};
use driftwell::storage::config;
use driftwell::storage::settings::{SettingsPatch, SettingsStore, SleepSettings, TomlSettingsStore};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Driftwell v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config().context("Failed to load configuration")?;
    let store = TomlSettingsStore::new(config.settings_path());
    let mut settings = store.read().context("Failed to read settings")?;

    // Command line choices apply to this run only
    let mut args = std::env::args().skip(1);
    let patch = SettingsPatch {
        selected_sound_id: args.next(),
        duration_minutes: args
            .next()
            .map(|minutes| minutes.parse::<u32>())
            .transpose()
            .context("MINUTES must be a whole number")?,
        ..Default::default()
    };
    settings.apply(patch)?;

    let library = SoundLibrary::from_config(&config.sounds, &config.data_dir);
    let request = match SessionRequest::from_settings(&settings, &library) {
        Ok(request) => request,
        Err(e) => {
            let available: Vec<&str> = library.catalog().iter().map(|sound| sound.id).collect();
            tracing::warn!(
                ?available,
                "{}, falling back to {}",
                e,
                config.sounds.default_sound
            );
            let fallback = SleepSettings {
                selected_sound_id: config.sounds.default_sound.clone(),
                ..settings
            };
            SessionRequest::from_settings(&fallback, &library)?
        }
    };

    let backend = RodioBackend::new()?;
    let controller = AudioSessionController::new(backend, config.session.clone());
    let mut events = controller.subscribe();

    controller.start_request(request).await?;

    let mut stopping = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(snapshot) => {
                    println!("{}", serde_json::to_string(&snapshot)?);
                    if !snapshot.is_active() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::debug!("Skipped {} updates", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                // First interrupt fades out, a second one cuts the sound
                controller.stop(!stopping).await;
                stopping = true;
            }
        }
    }

    controller.dispose().await;
    tracing::info!("Session ended");

    Ok(())
}
