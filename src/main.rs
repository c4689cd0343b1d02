mod audio_decoder;
mod audio_player;
mod config;
mod console_manager;
mod equalizer;
mod equalizer_manager;
mod filter;
mod history_manager;
mod kv_store;
mod media_controls_manager;
mod metadata;
mod metadata_manager;
mod persistence;
mod playback;
mod playlist;
mod playlist_manager;
mod protocol;
mod reorder;
mod visualizer;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use audio_decoder::AudioDecoder;
use audio_player::AudioPlayer;
use console_manager::ConsoleManager;
use equalizer_manager::EqualizerManager;
use history_manager::HistoryManager;
use kv_store::KvStore;
use log::{error, info};
use media_controls_manager::MediaControlsManager;
use metadata_manager::MetadataManager;
use playlist_manager::PlaylistManager;
use tokio::sync::broadcast;
use visualizer::{SharedAnalyzer, SpectrumAnalyzer};

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}

/// Opens the on-disk store, degrading to a volatile in-memory one so a
/// broken data directory never prevents playback.
fn open_store() -> Result<KvStore, rusqlite::Error> {
    match KvStore::open_default() {
        Ok(store) => Ok(store),
        Err(db_error) => {
            error!(
                "Could not open the state database, state will not persist: {}",
                db_error
            );
            KvStore::new_in_memory()
        }
    }
}

fn spawn_named<F>(name: &str, body: F) -> std::io::Result<thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(body)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!(
            "panic in thread '{}': {}",
            thread_name,
            panic_payload_to_string(panic_info.payload())
        );
    }));

    let config_file = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadenza")
        .join("config.toml");
    let config = config::load_config(&config_file);

    let analyzer: SharedAnalyzer = Arc::new(SpectrumAnalyzer::new());
    let console_state = console_manager::new_shared_state();

    // Bus for communication between components.
    let (bus_sender, _) = broadcast::channel(1024);

    // Subscribe everything before any component starts emitting.
    let playlist_receiver = bus_sender.subscribe();
    let history_receiver = bus_sender.subscribe();
    let equalizer_receiver = bus_sender.subscribe();
    let metadata_receiver = bus_sender.subscribe();
    let decoder_receiver = bus_sender.subscribe();
    let player_receiver = bus_sender.subscribe();
    let controls_receiver = bus_sender.subscribe();
    let console_receiver = bus_sender.subscribe();

    {
        let sender = bus_sender.clone();
        spawn_named("playlist-manager", move || match open_store() {
            Ok(store) => PlaylistManager::new(playlist_receiver, sender, store).run(),
            Err(db_error) => error!("playlist-manager could not start: {}", db_error),
        })?;
    }
    {
        let sender = bus_sender.clone();
        spawn_named("history-manager", move || match open_store() {
            Ok(store) => HistoryManager::new(history_receiver, sender, store).run(),
            Err(db_error) => error!("history-manager could not start: {}", db_error),
        })?;
    }
    {
        let sender = bus_sender.clone();
        spawn_named("equalizer-manager", move || match open_store() {
            Ok(store) => EqualizerManager::new(equalizer_receiver, sender, store).run(),
            Err(db_error) => error!("equalizer-manager could not start: {}", db_error),
        })?;
    }
    {
        let sender = bus_sender.clone();
        spawn_named("metadata-manager", move || {
            MetadataManager::new(metadata_receiver, sender).run();
        })?;
    }
    {
        let sender = bus_sender.clone();
        spawn_named("audio-decoder", move || {
            AudioDecoder::new(decoder_receiver, sender).run();
        })?;
    }
    {
        let sender = bus_sender.clone();
        let player_config = config.clone();
        let player_analyzer = Arc::clone(&analyzer);
        // The cpal stream must be created on the thread that owns it.
        spawn_named("audio-player", move || {
            AudioPlayer::new(player_receiver, sender, &player_config, player_analyzer).run();
        })?;
    }
    {
        let sender = bus_sender.clone();
        spawn_named("media-controls", move || {
            MediaControlsManager::new(controls_receiver, sender).run();
        })?;
    }
    {
        let state = Arc::clone(&console_state);
        spawn_named("console-events", move || {
            ConsoleManager::new(console_receiver, state).run();
        })?;
    }

    info!("cadenza started");
    console_manager::run_input_loop(bus_sender, console_state, analyzer);

    info!("cadenza shutting down");
    std::process::exit(0);
}
