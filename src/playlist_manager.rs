//! Playlist-domain orchestrator.
//!
//! Owns the named playlist map, the playback session and state machine, the
//! manual play queue, and the filter criteria. Every structural mutation
//! persists through the key-value store and rebroadcasts the display list.
//! Engine and metadata completions are identity-checked before they are
//! allowed to touch state: user input can always race an async step.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use log::{debug, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::filter;
use crate::kv_store::KvStore;
use crate::persistence;
use crate::playback::PlaybackState;
use crate::playlist::{is_audio_file, reindex, NamedPlaylist, PlaybackSession, Track};
use crate::protocol::{
    AudioMessage, HistoryMessage, Message, MetadataMessage, NowPlaying, PlaybackMessage,
    PlaylistMessage, RepeatMode, TrackIdentifier,
};
use crate::reorder::{apply_plan, DragSession};

/// Coordinates catalog editing, playback sequencing, and queue interception.
pub struct PlaylistManager {
    playlists: Vec<NamedPlaylist>,
    active_index: usize,
    session: PlaybackSession,
    state: PlaybackState,
    repeat_mode: RepeatMode,
    queue: VecDeque<PathBuf>,
    search_term: String,
    genre_filter: String,
    year_filter: String,
    drag: Option<DragSession>,
    /// Track ids whose tags were fetched this session; metadata is lazy and
    /// fetched at most once per run.
    fetched_metadata: HashSet<String>,
    now_playing_art: Option<PathBuf>,
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    store: KvStore,
}

impl PlaylistManager {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        store: KvStore,
    ) -> Self {
        Self {
            playlists: vec![NamedPlaylist::new(persistence::DEFAULT_PLAYLIST_NAME)],
            active_index: 0,
            session: PlaybackSession::new(),
            state: PlaybackState::Idle,
            repeat_mode: RepeatMode::None,
            queue: VecDeque::new(),
            search_term: String::new(),
            genre_filter: String::new(),
            year_filter: String::new(),
            drag: None,
            fetched_metadata: HashSet::new(),
            now_playing_art: None,
            bus_consumer,
            bus_producer,
            store,
        }
    }

    fn active(&self) -> &NamedPlaylist {
        &self.playlists[self.active_index]
    }

    fn send(&self, message: Message) {
        let _ = self.bus_producer.send(message);
    }

    // ---- broadcasts -----------------------------------------------------

    fn broadcast_playlists(&self) {
        self.send(Message::Playlist(PlaylistMessage::PlaylistsChanged {
            names: self
                .playlists
                .iter()
                .map(|playlist| playlist.name.clone())
                .collect(),
            active: self.active().name.clone(),
        }));
    }

    /// Display order follows the playback order: the original order, or the
    /// shuffled permutation while shuffle is on.
    fn broadcast_display(&self) {
        let active = self.active();
        let ordered: Vec<Track> = self
            .session
            .order()
            .iter()
            .filter_map(|id| active.track_by_id(id))
            .cloned()
            .collect();
        let visible = filter::display(
            &ordered,
            &self.search_term,
            &self.genre_filter,
            &self.year_filter,
        );
        self.send(Message::Playlist(PlaylistMessage::DisplayListChanged {
            tracks: visible.iter().map(|track| track.summary()).collect(),
            playing_id: self.session.playing_track_id().map(str::to_string),
            genres: filter::unique_genres(&active.tracks),
            years: filter::unique_years(&active.tracks),
        }));
    }

    fn broadcast_queue(&self) {
        self.send(Message::Playlist(PlaylistMessage::QueueChanged(
            self.queue.iter().cloned().collect(),
        )));
    }

    fn reject(&self, reason: &str) {
        self.send(Message::Playlist(PlaylistMessage::PlaylistRejected {
            reason: reason.to_string(),
        }));
    }

    fn now_playing_for(&self, track: &Track) -> NowPlaying {
        let art_path = if self.state.bound_track_id() == Some(track.id.as_str())
            || self.session.playing_track_id() == Some(track.id.as_str())
        {
            self.now_playing_art.clone()
        } else {
            None
        };
        NowPlaying {
            id: track.id.clone(),
            path: track.path.clone(),
            title: track.metadata.title.clone(),
            artist: track.metadata.artist.clone(),
            album: track.metadata.album.clone(),
            lyrics: track.metadata.lyrics.clone(),
            art_path,
        }
    }

    fn emit_now_playing(&self, track: Option<&Track>, is_playing: bool) {
        self.send(Message::Playback(PlaybackMessage::NowPlayingChanged {
            track: track.map(|track| self.now_playing_for(track)),
            is_playing,
        }));
    }

    // ---- persistence ----------------------------------------------------

    fn persist_playlists(&self) {
        persistence::save_playlists(&self.store, &self.playlists, &self.active().name);
    }

    // ---- lookup ---------------------------------------------------------

    fn find_track_anywhere(&self, id: &str) -> Option<(usize, usize)> {
        for (playlist_index, playlist) in self.playlists.iter().enumerate() {
            if let Some(track_index) = playlist.index_of(id) {
                return Some((playlist_index, track_index));
            }
        }
        None
    }

    fn find_path_anywhere(&self, path: &PathBuf) -> Option<(usize, String)> {
        // The active playlist wins when the same file appears in several.
        let order: Vec<usize> = std::iter::once(self.active_index)
            .chain((0..self.playlists.len()).filter(|index| *index != self.active_index))
            .collect();
        for playlist_index in order {
            if let Some(track) = self.playlists[playlist_index]
                .tracks
                .iter()
                .find(|track| &track.path == path)
            {
                return Some((playlist_index, track.id.clone()));
            }
        }
        None
    }

    // ---- playback -------------------------------------------------------

    fn transition_to_idle(&mut self) {
        self.state.to_idle();
        self.session.clear_binding();
        self.now_playing_art = None;
        self.send(Message::Audio(AudioMessage::StopPlayback));
        self.emit_now_playing(None, false);
        self.broadcast_display();
    }

    /// Starts playback of the track at a playback-order position. Clamps the
    /// index, binds by identity, downgrades to a recoverable
    /// "needs re-selection" state when the file is gone.
    fn play_at_position(&mut self, position: usize) {
        if self.session.is_empty() {
            self.transition_to_idle();
            return;
        }
        let position = position.min(self.session.len() - 1);
        let Some(track_id) = self.session.track_id_at(position).map(str::to_string) else {
            return;
        };
        self.session.bind(&track_id);
        self.now_playing_art = None;

        let Some(track) = self.active().track_by_id(&track_id).cloned() else {
            warn!("PlaylistManager: playback order holds unknown id {}", track_id);
            return;
        };

        if !track.is_file_present() {
            info!(
                "PlaylistManager: track {} needs re-selection, file missing: {}",
                track_id,
                track.path.display()
            );
            self.state.to_idle();
            self.send(Message::Playback(PlaybackMessage::TrackUnavailable {
                id: track_id,
                reason: format!("file missing: {}", track.path.display()),
            }));
            self.emit_now_playing(Some(&track), false);
            self.broadcast_display();
            return;
        }

        self.state.begin_loading(&track_id);
        if !self.fetched_metadata.contains(&track_id) {
            self.send(Message::Metadata(MetadataMessage::Fetch(TrackIdentifier {
                id: track_id.clone(),
                path: track.path.clone(),
            })));
        }
        self.send(Message::Audio(AudioMessage::DecodeTrack(TrackIdentifier {
            id: track_id,
            path: track.path.clone(),
        })));
        self.emit_now_playing(Some(&track), false);
        self.broadcast_display();
    }

    fn play_track_id(&mut self, id: &str) {
        let Some(position) = self.session.order().iter().position(|entry| entry == id) else {
            debug!("PlaylistManager: ignoring play for unknown id {}", id);
            return;
        };
        self.play_at_position(position);
    }

    /// Entry point for history and queue items, which are known by path.
    /// Switches the active playlist when the path lives elsewhere.
    fn play_by_path(&mut self, path: PathBuf) {
        let Some((playlist_index, track_id)) = self.find_path_anywhere(&path) else {
            self.send(Message::Playback(PlaybackMessage::PlaybackFailed {
                id: String::new(),
                reason: format!("track not found in any playlist: {}", path.display()),
            }));
            return;
        };
        if playlist_index != self.active_index {
            self.activate_playlist(playlist_index);
        }
        self.play_track_id(&track_id);
    }

    fn handle_play_command(&mut self) {
        match self.state.clone() {
            PlaybackState::Paused { .. } => {
                self.send(Message::Audio(AudioMessage::ResumePlayback));
            }
            PlaybackState::Idle => {
                if !self.session.is_empty() {
                    let position = self.session.position().unwrap_or(0);
                    self.play_at_position(position);
                }
            }
            PlaybackState::Loading { .. } | PlaybackState::Playing { .. } => {}
        }
    }

    fn handle_next_command(&mut self) {
        if self.session.is_empty() {
            return;
        }
        match self.session.next_position(self.repeat_mode) {
            Some(next) => self.play_at_position(next),
            None => self.transition_to_idle(),
        }
    }

    fn handle_previous_command(&mut self) {
        if self.session.is_empty() {
            return;
        }
        match self.session.previous_position(self.repeat_mode) {
            Some(previous) => self.play_at_position(previous),
            // Boundary no-op: restart the current track instead of wrapping.
            None => {
                if !self.state.is_idle() {
                    self.send(Message::Audio(AudioMessage::SeekTo(0.0)));
                }
            }
        }
    }

    /// End-of-track policy: the queue always wins, then repeat-one, then the
    /// ordinary advance with repeat-all wraparound.
    fn handle_track_end(&mut self, finished_id: String) {
        if let Some(queued_path) = self.queue.pop_front() {
            self.broadcast_queue();
            self.play_by_path(queued_path);
            return;
        }
        if self.repeat_mode == RepeatMode::One {
            self.state.begin_loading(&finished_id);
            self.send(Message::Audio(AudioMessage::ReplayCurrent { id: finished_id }));
            return;
        }
        match self.session.next_position(self.repeat_mode) {
            Some(next) => self.play_at_position(next),
            None => self.transition_to_idle(),
        }
    }

    // ---- catalog mutations ----------------------------------------------

    fn add_files(&mut self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        let accepted: Vec<PathBuf> = paths
            .iter()
            .filter(|path| is_audio_file(path))
            .cloned()
            .collect();
        if accepted.is_empty() {
            self.send(Message::Playlist(PlaylistMessage::FilesRejected {
                attempted: paths.len(),
            }));
            return;
        }

        let was_empty = self.active().tracks.is_empty();
        let mut added = Vec::with_capacity(accepted.len());
        {
            let active = &mut self.playlists[self.active_index];
            for path in accepted {
                // Path collisions are not deduplicated; ids keep records apart.
                let track = Track::from_path(path);
                added.push(track.summary());
                active.tracks.push(track);
            }
            reindex(&mut active.tracks);
        }
        self.session.rebuild(&self.playlists[self.active_index].tracks);
        self.persist_playlists();
        info!("PlaylistManager: added {} tracks", added.len());
        self.send(Message::Playlist(PlaylistMessage::TracksAdded(added)));
        self.broadcast_display();

        if was_empty && self.state.is_idle() && !self.session.is_empty() {
            self.play_at_position(0);
        }
    }

    fn remove_track(&mut self, id: &str) {
        let Some(track_index) = self.active().index_of(id) else {
            return;
        };
        let was_bound = self.session.playing_track_id() == Some(id);
        let old_position = self.session.position();
        {
            let active = &mut self.playlists[self.active_index];
            let removed = active.tracks.remove(track_index);
            debug!("PlaylistManager: removed track {}", removed.name);
            reindex(&mut active.tracks);
        }
        self.session.remove(id);
        self.persist_playlists();
        self.broadcast_display();

        if was_bound {
            self.send(Message::Audio(AudioMessage::StopPlayback));
            if self.session.is_empty() {
                self.state.to_idle();
                self.session.clear_binding();
                self.emit_now_playing(None, false);
            } else {
                let target = old_position.unwrap_or(0).min(self.session.len() - 1);
                self.play_at_position(target);
            }
        }
    }

    // ---- playlist management --------------------------------------------

    fn create_playlist(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            self.reject("Playlist name cannot be empty");
            return;
        }
        if self.playlists.iter().any(|playlist| playlist.name == name) {
            self.reject(&format!("Playlist \"{name}\" already exists"));
            return;
        }
        self.playlists.push(NamedPlaylist::new(name));
        let new_index = self.playlists.len() - 1;
        self.activate_playlist(new_index);
        self.persist_playlists();
    }

    fn delete_playlist(&mut self, name: &str) {
        if self.playlists.len() <= 1 {
            self.reject("Cannot delete the last playlist");
            return;
        }
        let Some(index) = self
            .playlists
            .iter()
            .position(|playlist| playlist.name == name)
        else {
            self.reject(&format!("No playlist named \"{name}\""));
            return;
        };
        self.playlists.remove(index);
        if index == self.active_index {
            self.active_index = 0;
            self.activate_playlist(0);
        } else {
            if index < self.active_index {
                self.active_index -= 1;
            }
            self.broadcast_playlists();
        }
        self.persist_playlists();
    }

    fn switch_playlist(&mut self, name: &str) {
        let Some(index) = self
            .playlists
            .iter()
            .position(|playlist| playlist.name == name)
        else {
            self.reject(&format!("No playlist named \"{name}\""));
            return;
        };
        if index != self.active_index {
            self.activate_playlist(index);
            self.persist_playlists();
        }
    }

    /// Makes a playlist active: the playback session resets and the engine
    /// stops, the genre/year facets clear, the search term survives.
    fn activate_playlist(&mut self, index: usize) {
        self.active_index = index;
        self.state.to_idle();
        self.now_playing_art = None;
        self.send(Message::Audio(AudioMessage::StopPlayback));
        self.session.clear_binding();
        self.session.rebuild(&self.playlists[index].tracks);
        self.genre_filter.clear();
        self.year_filter.clear();
        self.broadcast_playlists();
        self.emit_now_playing(None, false);
        self.broadcast_display();
    }

    // ---- reordering -----------------------------------------------------

    fn handle_drop(&mut self) {
        let Some(drag) = self.drag.take() else {
            return;
        };
        let Some(plan) = drag.resolve(&self.active().tracks) else {
            return;
        };
        apply_plan(&mut self.playlists[self.active_index].tracks, plan);

        // Reordering only makes sense against a deterministic order.
        if self.session.is_shuffled() {
            self.session
                .set_shuffled(false, &self.playlists[self.active_index].tracks);
            persistence::save_shuffle_state(&self.store, false);
            self.send(Message::Playlist(PlaylistMessage::ShuffleChanged(false)));
        } else {
            self.session.rebuild(&self.playlists[self.active_index].tracks);
        }
        self.persist_playlists();
        self.broadcast_display();
    }

    // ---- queue ----------------------------------------------------------

    fn queue_add(&mut self, id: &str) {
        let Some((playlist_index, track_index)) = self.find_track_anywhere(id) else {
            return;
        };
        let path = self.playlists[playlist_index].tracks[track_index].path.clone();
        // Set-like uniqueness over a FIFO.
        if self.queue.contains(&path) {
            return;
        }
        self.queue.push_back(path);
        self.broadcast_queue();
    }

    // ---- message loop ---------------------------------------------------

    fn handle_playlist_message(&mut self, message: PlaylistMessage) {
        match message {
            PlaylistMessage::AddFiles(paths) => self.add_files(paths),
            PlaylistMessage::RemoveTrack { id } => self.remove_track(&id),
            PlaylistMessage::CreatePlaylist { name } => self.create_playlist(&name),
            PlaylistMessage::DeletePlaylist { name } => self.delete_playlist(&name),
            PlaylistMessage::SwitchPlaylist { name } => self.switch_playlist(&name),
            PlaylistMessage::BeginDrag { id } => {
                if self.active().track_by_id(&id).is_some() {
                    self.drag = Some(DragSession::begin(&id));
                }
            }
            PlaylistMessage::DragOver {
                target_id,
                position,
            } => {
                if let Some(drag) = self.drag.as_mut() {
                    drag.update_target(&target_id, position);
                }
            }
            PlaylistMessage::Drop => self.handle_drop(),
            PlaylistMessage::SetSearchTerm(term) => {
                self.search_term = term;
                self.broadcast_display();
            }
            PlaylistMessage::SetGenreFilter(genre) => {
                self.genre_filter = genre;
                self.broadcast_display();
            }
            PlaylistMessage::SetYearFilter(year) => {
                self.year_filter = year;
                self.broadcast_display();
            }
            PlaylistMessage::ClearFilters => {
                self.genre_filter.clear();
                self.year_filter.clear();
                self.broadcast_display();
            }
            PlaylistMessage::ToggleShuffle => {
                let shuffled = !self.session.is_shuffled();
                self.session
                    .set_shuffled(shuffled, &self.playlists[self.active_index].tracks);
                persistence::save_shuffle_state(&self.store, shuffled);
                self.send(Message::Playlist(PlaylistMessage::ShuffleChanged(shuffled)));
                self.broadcast_display();
            }
            PlaylistMessage::CycleRepeat => {
                self.repeat_mode = self.repeat_mode.cycled();
                persistence::save_repeat_mode(&self.store, self.repeat_mode);
                self.send(Message::Playlist(PlaylistMessage::RepeatChanged(
                    self.repeat_mode,
                )));
            }
            PlaylistMessage::QueueAdd { id } => self.queue_add(&id),
            PlaylistMessage::QueueRemove { path } => {
                self.queue.retain(|entry| entry != &path);
                self.broadcast_queue();
            }
            PlaylistMessage::QueueClear => {
                self.queue.clear();
                self.broadcast_queue();
            }
            _ => {}
        }
    }

    fn handle_playback_message(&mut self, message: PlaybackMessage) {
        match message {
            PlaybackMessage::Play => self.handle_play_command(),
            PlaybackMessage::Pause => {
                if self.state.is_playing() {
                    self.send(Message::Audio(AudioMessage::PausePlayback));
                }
            }
            PlaybackMessage::TogglePlayPause => {
                if self.state.is_playing() {
                    self.send(Message::Audio(AudioMessage::PausePlayback));
                } else {
                    self.handle_play_command();
                }
            }
            PlaybackMessage::Stop => self.transition_to_idle(),
            PlaybackMessage::Next => self.handle_next_command(),
            PlaybackMessage::Previous => self.handle_previous_command(),
            PlaybackMessage::PlayTrack { id } => self.play_track_id(&id),
            PlaybackMessage::PlayPath { path } => self.play_by_path(path),
            PlaybackMessage::Seek(fraction) => {
                self.send(Message::Audio(AudioMessage::SeekTo(fraction)));
            }

            PlaybackMessage::TrackStarted { id } => {
                if self.state.on_track_started(&id) {
                    if let Some(track) = self.active().track_by_id(&id).cloned() {
                        self.emit_now_playing(Some(&track), true);
                        self.send(Message::History(HistoryMessage::LogPlay {
                            path: track.path.clone(),
                        }));
                    }
                    self.broadcast_display();
                } else {
                    debug!("PlaylistManager: ignoring stale start for {}", id);
                }
            }
            PlaybackMessage::TrackPaused => {
                if self.state.on_paused() {
                    let bound = self
                        .state
                        .bound_track_id()
                        .and_then(|id| self.active().track_by_id(id))
                        .cloned();
                    self.emit_now_playing(bound.as_ref(), false);
                }
            }
            PlaybackMessage::TrackResumed => {
                if self.state.on_resumed() {
                    let bound = self
                        .state
                        .bound_track_id()
                        .and_then(|id| self.active().track_by_id(id))
                        .cloned();
                    self.emit_now_playing(bound.as_ref(), true);
                }
            }
            PlaybackMessage::TrackFinished { id } => {
                if self.state.accepts_finished(&id) {
                    self.handle_track_end(id);
                } else {
                    debug!("PlaylistManager: ignoring stale finish for {}", id);
                }
            }
            PlaybackMessage::PlaybackFailed { id, .. } => {
                // Inline error surfaced by the front-end; release resources
                // and settle in a clearly idle state so a retry can follow.
                if !id.is_empty() && self.state.bound_track_id() == Some(id.as_str()) {
                    self.state.to_idle();
                    self.send(Message::Audio(AudioMessage::StopPlayback));
                }
            }
            _ => {}
        }
    }

    fn handle_metadata_loaded(
        &mut self,
        id: String,
        metadata: crate::playlist::TrackMetadata,
        art_path: Option<PathBuf>,
    ) {
        // Async completion: the record may be gone or playback re-targeted
        // since the fetch was scheduled.
        let Some((playlist_index, track_index)) = self.find_track_anywhere(&id) else {
            debug!("PlaylistManager: metadata arrived for removed track {}", id);
            return;
        };
        self.playlists[playlist_index].tracks[track_index]
            .metadata
            .merge_from(&metadata);
        self.fetched_metadata.insert(id.clone());
        self.persist_playlists();

        if playlist_index == self.active_index {
            self.broadcast_display();
        }
        if self.state.bound_track_id() == Some(id.as_str()) {
            self.now_playing_art = art_path;
            let track = self.playlists[playlist_index].tracks[track_index].clone();
            self.emit_now_playing(Some(&track), self.state.is_playing());
        }
    }

    fn handle_audio_message(&mut self, message: AudioMessage) {
        if let AudioMessage::DecodeFailed { id, error } = message {
            if self.state.bound_track_id() == Some(id.as_str()) {
                self.state.to_idle();
                self.send(Message::Audio(AudioMessage::StopPlayback));
                self.send(Message::Playback(PlaybackMessage::PlaybackFailed {
                    id,
                    reason: error,
                }));
            }
        }
    }

    /// Starts the blocking manager loop. Restores persisted state first.
    pub fn run(&mut self) {
        let (playlists, active_name) = persistence::load_playlists(&self.store);
        self.playlists = playlists;
        self.active_index = self
            .playlists
            .iter()
            .position(|playlist| playlist.name == active_name)
            .unwrap_or(0);
        self.repeat_mode = persistence::load_repeat_mode(&self.store);
        let shuffled = persistence::load_shuffle_state(&self.store);
        self.session
            .set_shuffled(shuffled, &self.playlists[self.active_index].tracks);
        info!(
            "PlaylistManager: restored {} playlists, active \"{}\" with {} tracks",
            self.playlists.len(),
            self.active().name,
            self.active().tracks.len()
        );

        self.broadcast_playlists();
        self.send(Message::Playlist(PlaylistMessage::ShuffleChanged(shuffled)));
        self.send(Message::Playlist(PlaylistMessage::RepeatChanged(
            self.repeat_mode,
        )));
        self.broadcast_display();
        self.broadcast_queue();

        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Playlist(message)) => self.handle_playlist_message(message),
                Ok(Message::Playback(message)) => self.handle_playback_message(message),
                Ok(Message::Audio(message)) => self.handle_audio_message(message),
                Ok(Message::Metadata(MetadataMessage::Loaded {
                    id,
                    metadata,
                    art_path,
                })) => self.handle_metadata_loaded(id, metadata, art_path),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("PlaylistManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, DropPosition};
    use std::fs;
    use std::thread;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
    use tokio::sync::broadcast::{self, error::TryRecvError, Receiver, Sender};

    struct PlaylistManagerHarness {
        bus_sender: Sender<protocol::Message>,
        receiver: Receiver<protocol::Message>,
        temp_files: Vec<PathBuf>,
    }

    impl PlaylistManagerHarness {
        fn new() -> Self {
            let (bus_sender, _) = broadcast::channel(4096);
            let manager_bus_sender = bus_sender.clone();
            let manager_receiver = bus_sender.subscribe();
            let receiver = bus_sender.subscribe();

            thread::spawn(move || {
                let store = KvStore::new_in_memory().expect("failed to create in-memory store");
                let mut manager =
                    PlaylistManager::new(manager_receiver, manager_bus_sender, store);
                manager.run();
            });

            let mut harness = Self {
                bus_sender,
                receiver,
                temp_files: Vec::new(),
            };
            wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
                matches!(
                    message,
                    Message::Playlist(PlaylistMessage::PlaylistsChanged { .. })
                )
            });
            harness.drain_messages();
            harness
        }

        fn send(&self, message: Message) {
            self.bus_sender
                .send(message)
                .expect("failed to send message to bus");
        }

        /// Creates real (empty) files so the availability check passes, and
        /// adds them in one batch. Returns (id, path) pairs in track order.
        fn add_tracks(&mut self, names: &[&str]) -> Vec<(String, PathBuf)> {
            let nonce = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system time should be valid")
                .as_nanos();
            let paths: Vec<PathBuf> = names
                .iter()
                .map(|name| std::env::temp_dir().join(format!("cadenza_pm_{nonce}_{name}.mp3")))
                .collect();
            for path in &paths {
                fs::write(path, b"").expect("fixture write");
                self.temp_files.push(path.clone());
            }
            self.send(Message::Playlist(PlaylistMessage::AddFiles(paths.clone())));

            let message = wait_for_message(
                &mut self.receiver,
                Duration::from_secs(2),
                |message| match message {
                    Message::Playlist(PlaylistMessage::TracksAdded(added)) => {
                        added.len() == names.len()
                    }
                    _ => false,
                },
            );
            let Message::Playlist(PlaylistMessage::TracksAdded(added)) = message else {
                panic!("expected TracksAdded message");
            };
            added
                .into_iter()
                .map(|summary| (summary.id, summary.path))
                .collect()
        }

        fn drain_messages(&mut self) {
            loop {
                match self.receiver.try_recv() {
                    Ok(_) => {}
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Closed) => break,
                }
            }
        }
    }

    impl Drop for PlaylistManagerHarness {
        fn drop(&mut self) {
            for path in &self.temp_files {
                let _ = fs::remove_file(path);
            }
        }
    }

    fn wait_for_message<F>(
        receiver: &mut Receiver<protocol::Message>,
        timeout: Duration,
        mut predicate: F,
    ) -> protocol::Message
    where
        F: FnMut(&protocol::Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected message");
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return message;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("bus closed while waiting for message"),
            }
        }
    }

    fn wait_for_decode_of(
        receiver: &mut Receiver<protocol::Message>,
        expected_id: &str,
    ) -> protocol::Message {
        wait_for_message(receiver, Duration::from_secs(2), |message| match message {
            Message::Audio(AudioMessage::DecodeTrack(track)) => track.id == expected_id,
            _ => false,
        })
    }

    #[test]
    fn test_first_add_auto_plays_and_logs_on_start() {
        let mut harness = PlaylistManagerHarness::new();
        let tracks = harness.add_tracks(&["auto_a", "auto_b"]);
        let (id0, path0) = tracks[0].clone();

        wait_for_decode_of(&mut harness.receiver, &id0);

        harness.send(Message::Playback(PlaybackMessage::TrackStarted {
            id: id0.clone(),
        }));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::NowPlayingChanged {
                    is_playing: true,
                    track: Some(_),
                })
            )
        });
        wait_for_message(
            &mut harness.receiver,
            Duration::from_secs(2),
            |message| match message {
                Message::History(HistoryMessage::LogPlay { path }) => path == &path0,
                _ => false,
            },
        );
    }

    #[test]
    fn test_queue_wins_over_repeat_one_at_track_end() {
        let mut harness = PlaylistManagerHarness::new();
        let tracks = harness.add_tracks(&["queue_a", "queue_b"]);
        let (id0, _) = tracks[0].clone();
        let (id1, _) = tracks[1].clone();

        wait_for_decode_of(&mut harness.receiver, &id0);
        harness.send(Message::Playback(PlaybackMessage::TrackStarted {
            id: id0.clone(),
        }));

        // none -> one
        harness.send(Message::Playlist(PlaylistMessage::CycleRepeat));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::RepeatChanged(RepeatMode::One))
            )
        });

        harness.send(Message::Playlist(PlaylistMessage::QueueAdd {
            id: id1.clone(),
        }));
        wait_for_message(
            &mut harness.receiver,
            Duration::from_secs(2),
            |message| match message {
                Message::Playlist(PlaylistMessage::QueueChanged(queue)) => queue.len() == 1,
                _ => false,
            },
        );
        harness.drain_messages();

        harness.send(Message::Playback(PlaybackMessage::TrackFinished {
            id: id0.clone(),
        }));
        // The queued track is decoded; no replay of the finished one.
        wait_for_decode_of(&mut harness.receiver, &id1);
    }

    #[test]
    fn test_repeat_all_wraps_from_last_to_first() {
        let mut harness = PlaylistManagerHarness::new();
        let tracks = harness.add_tracks(&["wrap_a", "wrap_b", "wrap_c"]);
        let (id0, _) = tracks[0].clone();
        let (id2, _) = tracks[2].clone();

        wait_for_decode_of(&mut harness.receiver, &id0);
        harness.send(Message::Playback(PlaybackMessage::PlayTrack {
            id: id2.clone(),
        }));
        wait_for_decode_of(&mut harness.receiver, &id2);
        harness.send(Message::Playback(PlaybackMessage::TrackStarted {
            id: id2.clone(),
        }));

        // none -> one -> all
        harness.send(Message::Playlist(PlaylistMessage::CycleRepeat));
        harness.send(Message::Playlist(PlaylistMessage::CycleRepeat));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::RepeatChanged(RepeatMode::All))
            )
        });
        harness.drain_messages();

        harness.send(Message::Playback(PlaybackMessage::TrackFinished {
            id: id2.clone(),
        }));
        wait_for_decode_of(&mut harness.receiver, &id0);
    }

    #[test]
    fn test_deleting_the_only_playlist_is_rejected() {
        let mut harness = PlaylistManagerHarness::new();
        harness.send(Message::Playlist(PlaylistMessage::DeletePlaylist {
            name: persistence::DEFAULT_PLAYLIST_NAME.to_string(),
        }));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::PlaylistRejected { reason })
                    if reason.contains("last playlist")
            )
        });
    }

    #[test]
    fn test_duplicate_and_empty_playlist_names_are_rejected() {
        let mut harness = PlaylistManagerHarness::new();
        harness.send(Message::Playlist(PlaylistMessage::CreatePlaylist {
            name: "  ".to_string(),
        }));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::PlaylistRejected { reason })
                    if reason.contains("empty")
            )
        });

        harness.send(Message::Playlist(PlaylistMessage::CreatePlaylist {
            name: persistence::DEFAULT_PLAYLIST_NAME.to_string(),
        }));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::PlaylistRejected { reason })
                    if reason.contains("already exists")
            )
        });
    }

    #[test]
    fn test_drop_reorders_and_forces_shuffle_off() {
        let mut harness = PlaylistManagerHarness::new();
        let tracks = harness.add_tracks(&["drag_a", "drag_b", "drag_c"]);
        let (id0, _) = tracks[0].clone();
        let (id2, _) = tracks[2].clone();
        wait_for_decode_of(&mut harness.receiver, &id0);

        harness.send(Message::Playlist(PlaylistMessage::ToggleShuffle));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::ShuffleChanged(true))
            )
        });

        harness.send(Message::Playlist(PlaylistMessage::BeginDrag {
            id: id0.clone(),
        }));
        harness.send(Message::Playlist(PlaylistMessage::DragOver {
            target_id: id2.clone(),
            position: DropPosition::After,
        }));
        harness.send(Message::Playlist(PlaylistMessage::Drop));

        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playlist(PlaylistMessage::ShuffleChanged(false))
            )
        });
        let expected: Vec<String> =
            vec![tracks[1].0.clone(), tracks[2].0.clone(), tracks[0].0.clone()];
        wait_for_message(
            &mut harness.receiver,
            Duration::from_secs(2),
            |message| match message {
                Message::Playlist(PlaylistMessage::DisplayListChanged { tracks, .. }) => {
                    let ids: Vec<&str> =
                        tracks.iter().map(|summary| summary.id.as_str()).collect();
                    ids == expected.iter().map(String::as_str).collect::<Vec<_>>()
                }
                _ => false,
            },
        );
    }

    #[test]
    fn test_removing_the_playing_track_advances_to_successor() {
        let mut harness = PlaylistManagerHarness::new();
        let tracks = harness.add_tracks(&["rm_a", "rm_b", "rm_c"]);
        let (id0, _) = tracks[0].clone();
        let (id1, _) = tracks[1].clone();

        wait_for_decode_of(&mut harness.receiver, &id0);
        harness.send(Message::Playback(PlaybackMessage::TrackStarted {
            id: id0.clone(),
        }));
        harness.drain_messages();

        harness.send(Message::Playlist(PlaylistMessage::RemoveTrack {
            id: id0.clone(),
        }));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(message, Message::Audio(AudioMessage::StopPlayback))
        });
        wait_for_decode_of(&mut harness.receiver, &id1);
    }

    #[test]
    fn test_missing_file_downgrades_to_needs_reselection() {
        let mut harness = PlaylistManagerHarness::new();
        let tracks = harness.add_tracks(&["gone_a", "gone_b"]);
        let (id0, _) = tracks[0].clone();
        let (id1, path1) = tracks[1].clone();

        wait_for_decode_of(&mut harness.receiver, &id0);
        fs::remove_file(&path1).expect("fixture should be removable");

        harness.send(Message::Playback(PlaybackMessage::PlayTrack {
            id: id1.clone(),
        }));
        wait_for_message(&mut harness.receiver, Duration::from_secs(2), |message| {
            matches!(
                message,
                Message::Playback(PlaybackMessage::TrackUnavailable { id, .. }) if id == &id1
            )
        });
    }

    #[test]
    fn test_stale_metadata_for_removed_track_is_ignored() {
        let mut harness = PlaylistManagerHarness::new();
        let tracks = harness.add_tracks(&["meta_a", "meta_b"]);
        let (id0, _) = tracks[0].clone();
        let (id1, _) = tracks[1].clone();
        wait_for_decode_of(&mut harness.receiver, &id0);
        harness.drain_messages();

        harness.send(Message::Playlist(PlaylistMessage::RemoveTrack {
            id: id1.clone(),
        }));
        // A late metadata completion for the removed record must not panic
        // or resurrect it.
        harness.send(Message::Metadata(MetadataMessage::Loaded {
            id: id1.clone(),
            metadata: crate::playlist::TrackMetadata::default(),
            art_path: None,
        }));
        harness.send(Message::Playlist(PlaylistMessage::SetSearchTerm(
            String::new(),
        )));
        wait_for_message(
            &mut harness.receiver,
            Duration::from_secs(2),
            |message| match message {
                Message::Playlist(PlaylistMessage::DisplayListChanged { tracks, .. }) => {
                    tracks.len() == 1 && tracks[0].id == id0
                }
                _ => false,
            },
        );
    }
}
