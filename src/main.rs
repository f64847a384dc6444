//! Application entry point: Sentio wake-word listener.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build the engine catalog, stream client factory and microphone factory.
//! 5. Spawn the stdin console reader thread.
//! 6. Run the detector until `quit` or EOF, tear the session down and flush
//!    pending settings writes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;

use sentio_wakeword::{
    asr::AsrStreamClientFactory,
    audio::MicrophoneCaptureFactory,
    catalog::HttpEngineCatalog,
    config::{AppConfig, AppPaths},
    console::{ConsoleReader, HELP},
    wakeword::{ConsoleNotifier, DetectorCommand, SettingsStore, WakewordDetector},
};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Sentio wake-word listener starting up");

    // 2. Configuration
    let paths = AppPaths::new();
    let config = AppConfig::load_from(&paths.settings_file).unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    log::info!("settings: {}", paths.settings_file.display());

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Collaborators
    let store = Arc::new(
        SettingsStore::new(config.clone(), paths.settings_file.clone())
            .context("failed to start settings writer")?,
    );
    let ws_url = config.server.ws_url();
    let ping = config.server.ping_interval_secs.map(Duration::from_secs);
    log::info!("ASR stream endpoint: {ws_url}");

    let detector = WakewordDetector::new(
        Arc::new(HttpEngineCatalog::from_config(&config.server)),
        Arc::new(AsrStreamClientFactory::new(ws_url, ping)),
        Arc::new(MicrophoneCaptureFactory),
        store.clone(),
        Arc::new(ConsoleNotifier),
    )
    .with_config(&config);

    // 5. Console
    let (command_tx, command_rx) = mpsc::channel::<DetectorCommand>(16);
    if config.wakeword.enabled {
        command_tx
            .try_send(DetectorCommand::RefreshEngines)
            .context("failed to queue engine refresh")?;
    }
    println!("{HELP}");
    let _console =
        ConsoleReader::start(store.clone(), command_tx).context("failed to start console")?;

    // 6. Detector loop (returns once the console drops its sender)
    rt.block_on(detector.run(command_rx));
    store.flush();

    log::info!("Sentio wake-word listener stopped");
    Ok(())
}
