//! Line-oriented front-end.
//!
//! Stands in for the rendering layer: commands typed on stdin become bus
//! messages, notable bus events become stdout lines, and the cached display
//! state is a pure function of what the core broadcasts. The input loop and
//! the event loop share a state cell so index-based commands can resolve to
//! track ids.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::equalizer::{EqSettings, EQ_FREQUENCIES, EQ_PRESETS};
use crate::playlist::AUDIO_EXTENSIONS;
use crate::protocol::{
    DropPosition, EqualizerMessage, HistoryMessage, Message, NowPlaying, PlaybackMessage,
    PlaylistMessage, RepeatMode, TrackSummary,
};
use crate::visualizer::{SharedAnalyzer, SPECTRUM_BINS};

/// Display state mirrored from bus broadcasts.
#[derive(Default)]
pub struct ConsoleState {
    pub display: Vec<TrackSummary>,
    pub playlist_names: Vec<String>,
    pub active_playlist: String,
    pub genres: Vec<String>,
    pub years: Vec<String>,
    pub queue: Vec<PathBuf>,
    pub now_playing: Option<NowPlaying>,
    pub is_playing: bool,
    pub shuffled: bool,
    pub repeat_mode: Option<RepeatMode>,
    pub recently_played: Vec<PathBuf>,
    pub most_played: Vec<(PathBuf, u64)>,
    pub eq: EqSettings,
    pub volume: f32,
}

pub type SharedConsoleState = Arc<Mutex<ConsoleState>>;

pub fn new_shared_state() -> SharedConsoleState {
    Arc::new(Mutex::new(ConsoleState {
        volume: 1.0,
        ..ConsoleState::default()
    }))
}

fn lock_state(state: &SharedConsoleState) -> std::sync::MutexGuard<'_, ConsoleState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn display_name(path: &PathBuf) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Event half: consumes the bus and keeps the shared state fresh.
pub struct ConsoleManager {
    bus_consumer: Receiver<Message>,
    state: SharedConsoleState,
}

impl ConsoleManager {
    pub fn new(bus_consumer: Receiver<Message>, state: SharedConsoleState) -> Self {
        Self {
            bus_consumer,
            state,
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Playlist(PlaylistMessage::DisplayListChanged {
                tracks,
                genres,
                years,
                ..
            }) => {
                let mut state = lock_state(&self.state);
                state.display = tracks;
                state.genres = genres;
                state.years = years;
            }
            Message::Playlist(PlaylistMessage::PlaylistsChanged { names, active }) => {
                let mut state = lock_state(&self.state);
                state.playlist_names = names;
                state.active_playlist = active.clone();
                drop(state);
                println!("Active playlist: {active}");
            }
            Message::Playlist(PlaylistMessage::TracksAdded(added)) => {
                println!("Added {} track(s)", added.len());
            }
            Message::Playlist(PlaylistMessage::FilesRejected { attempted }) => {
                println!("No valid audio files among {attempted} item(s)");
            }
            Message::Playlist(PlaylistMessage::PlaylistRejected { reason }) => {
                println!("Rejected: {reason}");
            }
            Message::Playlist(PlaylistMessage::ShuffleChanged(shuffled)) => {
                lock_state(&self.state).shuffled = shuffled;
                println!("Shuffle: {}", if shuffled { "on" } else { "off" });
            }
            Message::Playlist(PlaylistMessage::RepeatChanged(repeat_mode)) => {
                lock_state(&self.state).repeat_mode = Some(repeat_mode);
                println!("Repeat: {repeat_mode:?}");
            }
            Message::Playlist(PlaylistMessage::QueueChanged(queue)) => {
                lock_state(&self.state).queue = queue;
            }
            Message::Playback(PlaybackMessage::NowPlayingChanged { track, is_playing }) => {
                let mut state = lock_state(&self.state);
                state.is_playing = is_playing;
                let line = track.as_ref().map(|now| {
                    format!(
                        "{} {} — {}",
                        if is_playing { "▶" } else { "⏸" },
                        now.title,
                        now.artist
                    )
                });
                state.now_playing = track;
                drop(state);
                if let Some(line) = line {
                    println!("{line}");
                }
            }
            Message::Playback(PlaybackMessage::TrackUnavailable { reason, .. }) => {
                println!("Needs re-selection: {reason}");
            }
            Message::Playback(PlaybackMessage::PlaybackFailed { reason, .. }) => {
                println!("Playback error: {reason}");
            }
            Message::Playback(PlaybackMessage::VolumeChanged { level, muted }) => {
                lock_state(&self.state).volume = level;
                if muted {
                    println!("Muted");
                } else {
                    println!("Volume: {:.0}%", level * 100.0);
                }
            }
            Message::History(HistoryMessage::RecentlyPlayedChanged(recent)) => {
                lock_state(&self.state).recently_played = recent;
            }
            Message::History(HistoryMessage::MostPlayedChanged(most)) => {
                lock_state(&self.state).most_played = most;
            }
            Message::Equalizer(EqualizerMessage::StateChanged(settings)) => {
                lock_state(&self.state).eq = settings;
            }
            _ => {}
        }
    }

    /// Starts the blocking event loop.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_message(message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("ConsoleManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// One parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Quit,
    Add(Vec<PathBuf>),
    AddDialog,
    List,
    Playlists,
    NewPlaylist(String),
    DeletePlaylist(String),
    UsePlaylist(String),
    Play(Option<usize>),
    Pause,
    Toggle,
    Stop,
    Next,
    Previous,
    Shuffle,
    Repeat,
    Search(String),
    Genre(String),
    Year(String),
    ClearFilters,
    QueueShow,
    QueueAdd(usize),
    QueueRemove(usize),
    QueueClear,
    History,
    Top,
    EqShow,
    EqPreset(String),
    EqBand(usize, f32),
    EqPreamp(f32),
    EqToggle,
    Volume(f32),
    Mute,
    Seek(f32),
    Move {
        from: usize,
        position: DropPosition,
        to: usize,
    },
    Lyrics,
    Viz,
}

/// Parses one input line. Indices are 1-based as displayed.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut tokens = line.split_whitespace();
    let head = tokens.next()?;
    let rest: Vec<&str> = tokens.collect();
    let rest_joined = rest.join(" ");

    let command = match head {
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "add" => {
            if rest.is_empty() {
                Command::AddDialog
            } else {
                Command::Add(rest.iter().map(PathBuf::from).collect())
            }
        }
        "ls" | "list" => Command::List,
        "playlists" => Command::Playlists,
        "new" => Command::NewPlaylist(rest_joined),
        "delete" => Command::DeletePlaylist(rest_joined),
        "use" => Command::UsePlaylist(rest_joined),
        "play" => Command::Play(rest.first().and_then(|token| token.parse().ok())),
        "pause" => Command::Pause,
        "toggle" | "p" => Command::Toggle,
        "stop" => Command::Stop,
        "next" | "n" => Command::Next,
        "prev" | "previous" => Command::Previous,
        "shuffle" => Command::Shuffle,
        "repeat" => Command::Repeat,
        "search" => Command::Search(rest_joined),
        "genre" => Command::Genre(rest_joined),
        "year" => Command::Year(rest_joined),
        "clear-filters" => Command::ClearFilters,
        "queue" => match rest.first() {
            None => Command::QueueShow,
            Some(token) => Command::QueueAdd(token.parse().ok()?),
        },
        "unqueue" => Command::QueueRemove(rest.first()?.parse().ok()?),
        "clear-queue" => Command::QueueClear,
        "history" => Command::History,
        "top" => Command::Top,
        "eq" => match rest.first() {
            None => Command::EqShow,
            Some(&"toggle") => Command::EqToggle,
            Some(&"preamp") => Command::EqPreamp(rest.get(1)?.parse().ok()?),
            Some(&"band") => {
                Command::EqBand(rest.get(1)?.parse().ok()?, rest.get(2)?.parse().ok()?)
            }
            Some(preset) => Command::EqPreset((*preset).to_string()),
        },
        "vol" | "volume" => Command::Volume(rest.first()?.parse().ok()?),
        "mute" | "m" => Command::Mute,
        "seek" => Command::Seek(rest.first()?.parse().ok()?),
        "move" => {
            let from: usize = rest.first()?.parse().ok()?;
            let position = match *rest.get(1)? {
                "before" => DropPosition::Before,
                "after" => DropPosition::After,
                _ => return None,
            };
            let to: usize = rest.get(2)?.parse().ok()?;
            Command::Move { from, position, to }
        }
        "lyrics" => Command::Lyrics,
        "viz" => Command::Viz,
        _ => return None,
    };
    Some(command)
}

fn print_help() {
    println!("Commands:");
    println!("  add [paths...]          add files (no args opens a picker)");
    println!("  ls | playlists          show tracks / playlists");
    println!("  new|delete|use <name>   manage playlists");
    println!("  play [n] | pause | toggle | stop | next | prev");
    println!("  shuffle | repeat | seek <0..1>");
    println!("  search|genre|year <v> | clear-filters");
    println!("  queue [n] | unqueue <n> | clear-queue");
    println!("  history | top | lyrics | viz");
    println!("  eq [preset|toggle|preamp <db>|band <i> <db>]");
    println!("  vol <0..1> | mute | quit");
}

fn render_spectrum(analyzer: &SharedAnalyzer) {
    let spectrum = analyzer.byte_spectrum();
    const GLYPHS: [char; 8] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇'];
    let mut line = String::with_capacity(SPECTRUM_BINS / 2);
    for pair in spectrum.chunks(2) {
        let level = pair.iter().map(|&value| value as usize).max().unwrap_or(0);
        line.push(GLYPHS[(level * (GLYPHS.len() - 1)) / 255]);
    }
    println!("|{line}|");
}

/// Command half: blocks on stdin until quit. Runs on the main thread.
pub fn run_input_loop(
    bus_producer: Sender<Message>,
    state: SharedConsoleState,
    analyzer: SharedAnalyzer,
) {
    let send = |message: Message| {
        let _ = bus_producer.send(message);
    };
    let stdin = std::io::stdin();
    println!("cadenza ready. Type 'help' for commands.");

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = parse_command(&line) else {
            println!("Unknown command. Type 'help'.");
            continue;
        };
        match command {
            Command::Help => print_help(),
            Command::Quit => break,
            Command::Add(paths) => {
                send(Message::Playlist(PlaylistMessage::AddFiles(paths)));
            }
            Command::AddDialog => {
                let picked = rfd::FileDialog::new()
                    .add_filter("Audio", &AUDIO_EXTENSIONS)
                    .pick_files();
                match picked {
                    Some(paths) if !paths.is_empty() => {
                        send(Message::Playlist(PlaylistMessage::AddFiles(paths)));
                    }
                    _ => println!("Nothing selected"),
                }
            }
            Command::List => {
                let state = lock_state(&state);
                if state.display.is_empty() {
                    println!("Playlist empty. Add music.");
                }
                for (index, track) in state.display.iter().enumerate() {
                    println!(
                        "{:>3}. {} — {} [{} / {}]",
                        index + 1,
                        track.title,
                        track.artist,
                        track.genre,
                        track.year
                    );
                }
            }
            Command::Playlists => {
                let state = lock_state(&state);
                for name in &state.playlist_names {
                    let marker = if name == &state.active_playlist { "*" } else { " " };
                    println!("{marker} {name}");
                }
            }
            Command::NewPlaylist(name) => {
                send(Message::Playlist(PlaylistMessage::CreatePlaylist { name }));
            }
            Command::DeletePlaylist(name) => {
                send(Message::Playlist(PlaylistMessage::DeletePlaylist { name }));
            }
            Command::UsePlaylist(name) => {
                send(Message::Playlist(PlaylistMessage::SwitchPlaylist { name }));
            }
            Command::Play(None) => send(Message::Playback(PlaybackMessage::Play)),
            Command::Play(Some(display_index)) => {
                let id = lock_state(&state)
                    .display
                    .get(display_index.wrapping_sub(1))
                    .map(|track| track.id.clone());
                match id {
                    Some(id) => send(Message::Playback(PlaybackMessage::PlayTrack { id })),
                    None => println!("No track at position {display_index}"),
                }
            }
            Command::Pause => send(Message::Playback(PlaybackMessage::Pause)),
            Command::Toggle => send(Message::Playback(PlaybackMessage::TogglePlayPause)),
            Command::Stop => send(Message::Playback(PlaybackMessage::Stop)),
            Command::Next => send(Message::Playback(PlaybackMessage::Next)),
            Command::Previous => send(Message::Playback(PlaybackMessage::Previous)),
            Command::Shuffle => send(Message::Playlist(PlaylistMessage::ToggleShuffle)),
            Command::Repeat => send(Message::Playlist(PlaylistMessage::CycleRepeat)),
            Command::Search(term) => {
                send(Message::Playlist(PlaylistMessage::SetSearchTerm(term)));
            }
            Command::Genre(genre) => {
                send(Message::Playlist(PlaylistMessage::SetGenreFilter(genre)));
            }
            Command::Year(year) => {
                send(Message::Playlist(PlaylistMessage::SetYearFilter(year)));
            }
            Command::ClearFilters => send(Message::Playlist(PlaylistMessage::ClearFilters)),
            Command::QueueShow => {
                let state = lock_state(&state);
                if state.queue.is_empty() {
                    println!("Queue is empty.");
                }
                for (index, path) in state.queue.iter().enumerate() {
                    println!("{:>3}. {}", index + 1, display_name(path));
                }
            }
            Command::QueueAdd(display_index) => {
                let id = lock_state(&state)
                    .display
                    .get(display_index.wrapping_sub(1))
                    .map(|track| track.id.clone());
                match id {
                    Some(id) => send(Message::Playlist(PlaylistMessage::QueueAdd { id })),
                    None => println!("No track at position {display_index}"),
                }
            }
            Command::QueueRemove(queue_index) => {
                let path = lock_state(&state)
                    .queue
                    .get(queue_index.wrapping_sub(1))
                    .cloned();
                match path {
                    Some(path) => {
                        send(Message::Playlist(PlaylistMessage::QueueRemove { path }));
                    }
                    None => println!("No queue entry {queue_index}"),
                }
            }
            Command::QueueClear => send(Message::Playlist(PlaylistMessage::QueueClear)),
            Command::History => {
                let state = lock_state(&state);
                if state.recently_played.is_empty() {
                    println!("No tracks played recently.");
                }
                for path in &state.recently_played {
                    println!("  {}", display_name(path));
                }
            }
            Command::Top => {
                let state = lock_state(&state);
                if state.most_played.is_empty() {
                    println!("Play some tracks to see your most played.");
                }
                for (path, count) in &state.most_played {
                    println!("  {} (played {} times)", display_name(path), count);
                }
            }
            Command::EqShow => {
                let state = lock_state(&state);
                println!(
                    "EQ [{}] preset={} preamp={:+.0} dB",
                    if state.eq.enabled { "on" } else { "off" },
                    state.eq.preset_name,
                    state.eq.preamp_db
                );
                for (frequency, gain) in EQ_FREQUENCIES.iter().zip(state.eq.band_gains_db.iter()) {
                    println!("  {:>5} Hz: {:+.0} dB", frequency, gain);
                }
                let names: Vec<&str> = EQ_PRESETS.iter().map(|preset| preset.name).collect();
                println!("Presets: {}", names.join(", "));
            }
            Command::EqPreset(name) => {
                send(Message::Equalizer(EqualizerMessage::ApplyPreset(name)));
            }
            Command::EqBand(index, gain_db) => {
                send(Message::Equalizer(EqualizerMessage::SetBand {
                    index,
                    gain_db,
                }));
            }
            Command::EqPreamp(db) => {
                send(Message::Equalizer(EqualizerMessage::SetPreamp(db)));
            }
            Command::EqToggle => send(Message::Equalizer(EqualizerMessage::ToggleEnabled)),
            Command::Volume(level) => {
                send(Message::Playback(PlaybackMessage::SetVolume(level)));
            }
            Command::Mute => send(Message::Playback(PlaybackMessage::ToggleMute)),
            Command::Seek(fraction) => send(Message::Playback(PlaybackMessage::Seek(fraction))),
            Command::Move { from, position, to } => {
                let state_guard = lock_state(&state);
                let dragged = state_guard.display.get(from.wrapping_sub(1)).cloned();
                let target = state_guard.display.get(to.wrapping_sub(1)).cloned();
                drop(state_guard);
                match (dragged, target) {
                    (Some(dragged), Some(target)) => {
                        send(Message::Playlist(PlaylistMessage::BeginDrag {
                            id: dragged.id,
                        }));
                        send(Message::Playlist(PlaylistMessage::DragOver {
                            target_id: target.id,
                            position,
                        }));
                        send(Message::Playlist(PlaylistMessage::Drop));
                    }
                    _ => println!("Positions out of range"),
                }
            }
            Command::Lyrics => {
                let state = lock_state(&state);
                match state
                    .now_playing
                    .as_ref()
                    .and_then(|now| now.lyrics.as_ref())
                {
                    Some(lyrics) if !lyrics.trim().is_empty() => println!("{lyrics}"),
                    _ => println!("No lyrics available for this track."),
                }
            }
            Command::Viz => render_spectrum(&analyzer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport_commands() {
        assert_eq!(parse_command("play"), Some(Command::Play(None)));
        assert_eq!(parse_command("play 3"), Some(Command::Play(Some(3))));
        assert_eq!(parse_command("n"), Some(Command::Next));
        assert_eq!(parse_command("pause"), Some(Command::Pause));
        assert_eq!(parse_command("stop"), Some(Command::Stop));
    }

    #[test]
    fn test_parse_add_with_and_without_paths() {
        assert_eq!(parse_command("add"), Some(Command::AddDialog));
        assert_eq!(
            parse_command("add /music/a.mp3 /music/b.flac"),
            Some(Command::Add(vec![
                PathBuf::from("/music/a.mp3"),
                PathBuf::from("/music/b.flac"),
            ]))
        );
    }

    #[test]
    fn test_parse_move_gesture() {
        assert_eq!(
            parse_command("move 1 after 4"),
            Some(Command::Move {
                from: 1,
                position: DropPosition::After,
                to: 4
            })
        );
        assert_eq!(
            parse_command("move 5 before 2"),
            Some(Command::Move {
                from: 5,
                position: DropPosition::Before,
                to: 2
            })
        );
        assert_eq!(parse_command("move 5 sideways 2"), None);
    }

    #[test]
    fn test_parse_eq_subcommands() {
        assert_eq!(parse_command("eq"), Some(Command::EqShow));
        assert_eq!(parse_command("eq rock"), Some(Command::EqPreset("rock".to_string())));
        assert_eq!(parse_command("eq toggle"), Some(Command::EqToggle));
        assert_eq!(parse_command("eq preamp 3"), Some(Command::EqPreamp(3.0)));
        assert_eq!(parse_command("eq band 2 -4.5"), Some(Command::EqBand(2, -4.5)));
        assert_eq!(parse_command("eq band two"), None);
    }

    #[test]
    fn test_parse_multiword_playlist_names() {
        assert_eq!(
            parse_command("new Road Trip Mix"),
            Some(Command::NewPlaylist("Road Trip Mix".to_string()))
        );
        assert_eq!(
            parse_command("use Road Trip Mix"),
            Some(Command::UsePlaylist("Road Trip Mix".to_string()))
        );
    }

    #[test]
    fn test_unknown_input_is_rejected() {
        assert_eq!(parse_command("frobnicate"), None);
        assert_eq!(parse_command(""), None);
    }
}
