//! Play-history runtime component.
//!
//! Maintains the recently-played ring (bounded, most recent first,
//! deduplicated by move-to-front) and the unbounded play-count tallies.
//! Both documents persist on every mutation. Entries are keyed by path so
//! identical files aggregate across playlists.

use std::collections::HashMap;
use std::path::PathBuf;

use log::{info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::kv_store::KvStore;
use crate::persistence;
use crate::protocol::{HistoryMessage, Message};

pub const MAX_RECENTLY_PLAYED: usize = 25;
pub const MOST_PLAYED_DISPLAY_CAP: usize = 15;

pub struct HistoryManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    store: KvStore,
    recently_played: Vec<PathBuf>,
    most_played: HashMap<String, u64>,
}

impl HistoryManager {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        store: KvStore,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            store,
            recently_played: Vec::new(),
            most_played: HashMap::new(),
        }
    }

    fn broadcast_lists(&self) {
        let _ = self.bus_producer.send(Message::History(
            HistoryMessage::RecentlyPlayedChanged(self.recently_played.clone()),
        ));
        let _ = self.bus_producer.send(Message::History(
            HistoryMessage::MostPlayedChanged(self.top_played()),
        ));
    }

    /// Most-played entries sorted by count, truncated for display.
    fn top_played(&self) -> Vec<(PathBuf, u64)> {
        let mut entries: Vec<(PathBuf, u64)> = self
            .most_played
            .iter()
            .map(|(path, count)| (PathBuf::from(path), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(MOST_PLAYED_DISPLAY_CAP);
        entries
    }

    fn log_play(&mut self, path: PathBuf) {
        self.recently_played.retain(|entry| entry != &path);
        self.recently_played.insert(0, path.clone());
        self.recently_played.truncate(MAX_RECENTLY_PLAYED);

        let key = path.display().to_string();
        *self.most_played.entry(key).or_insert(0) += 1;

        persistence::save_recently_played(&self.store, &self.recently_played);
        persistence::save_most_played(&self.store, &self.most_played);
        self.broadcast_lists();
    }

    /// Starts the blocking manager loop.
    pub fn run(&mut self) {
        self.recently_played = persistence::load_recently_played(&self.store);
        self.most_played = persistence::load_most_played(&self.store);
        info!(
            "HistoryManager: restored {} recent entries, {} tallies",
            self.recently_played.len(),
            self.most_played.len()
        );
        self.broadcast_lists();

        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::History(HistoryMessage::LogPlay { path })) => {
                    self.log_play(path);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("HistoryManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    fn manager() -> HistoryManager {
        let (bus_sender, bus_consumer) = broadcast::channel(1024);
        let store = KvStore::new_in_memory().expect("in-memory store should open");
        HistoryManager::new(bus_consumer, bus_sender, store)
    }

    #[test]
    fn test_thirty_distinct_plays_keep_exactly_twenty_five() {
        let mut history = manager();
        for index in 0..30 {
            history.log_play(PathBuf::from(format!("/music/{index}.mp3")));
        }
        assert_eq!(history.recently_played.len(), MAX_RECENTLY_PLAYED);
        // Most recent first, no duplicates.
        assert_eq!(history.recently_played[0], PathBuf::from("/music/29.mp3"));
        assert_eq!(
            history.recently_played[MAX_RECENTLY_PLAYED - 1],
            PathBuf::from("/music/5.mp3")
        );
        let unique: std::collections::HashSet<&PathBuf> =
            history.recently_played.iter().collect();
        assert_eq!(unique.len(), MAX_RECENTLY_PLAYED);
    }

    #[test]
    fn test_replay_moves_to_front_without_duplicating() {
        let mut history = manager();
        history.log_play(PathBuf::from("/music/a.mp3"));
        history.log_play(PathBuf::from("/music/b.mp3"));
        history.log_play(PathBuf::from("/music/a.mp3"));
        assert_eq!(
            history.recently_played,
            vec![PathBuf::from("/music/a.mp3"), PathBuf::from("/music/b.mp3")]
        );
    }

    #[test]
    fn test_play_counts_accumulate_and_truncate_for_display() {
        let mut history = manager();
        for _ in 0..3 {
            history.log_play(PathBuf::from("/music/favorite.mp3"));
        }
        for index in 0..20 {
            history.log_play(PathBuf::from(format!("/music/{index}.mp3")));
        }
        let top = history.top_played();
        assert_eq!(top.len(), MOST_PLAYED_DISPLAY_CAP);
        assert_eq!(top[0].0, PathBuf::from("/music/favorite.mp3"));
        assert_eq!(top[0].1, 3);
    }

    #[test]
    fn test_history_persists_across_restore() {
        let (bus_sender, bus_consumer) = broadcast::channel(1024);
        let store = KvStore::new_in_memory().expect("in-memory store should open");
        let mut history = HistoryManager::new(bus_consumer, bus_sender.clone(), store);
        history.log_play(PathBuf::from("/music/a.mp3"));
        history.log_play(PathBuf::from("/music/a.mp3"));

        let restored_recent = persistence::load_recently_played(&history.store);
        let restored_counts = persistence::load_most_played(&history.store);
        assert_eq!(restored_recent, vec![PathBuf::from("/music/a.mp3")]);
        assert_eq!(restored_counts.get("/music/a.mp3"), Some(&2));
    }
}
