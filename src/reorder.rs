//! Drag-and-drop reordering, decoupled from any rendering technology.
//!
//! The front-end reports gestures (begin, over-with-side, drop); this module
//! resolves them into a single splice move against the original order. The
//! before/after side comes from the pointer's position relative to the
//! vertical midpoint of the target row.

use crate::playlist::{reindex, Track};
use crate::protocol::DropPosition;

/// An in-progress drag of one playlist row.
#[derive(Debug, Clone)]
pub struct DragSession {
    dragged_id: String,
    target: Option<(String, DropPosition)>,
}

/// A resolved move: splice out of `from`, insert at `to` (post-removal index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderPlan {
    pub from: usize,
    pub to: usize,
}

impl DragSession {
    pub fn begin(dragged_id: &str) -> Self {
        Self {
            dragged_id: dragged_id.to_string(),
            target: None,
        }
    }

    pub fn dragged_id(&self) -> &str {
        &self.dragged_id
    }

    /// Updates the drop target as the pointer moves. Hovering the dragged
    /// row itself clears the target.
    pub fn update_target(&mut self, target_id: &str, position: DropPosition) {
        if target_id == self.dragged_id {
            self.target = None;
        } else {
            self.target = Some((target_id.to_string(), position));
        }
    }

    /// Resolves the gesture against the current original order. Returns
    /// `None` when the drag has no usable target or would be a no-op.
    pub fn resolve(&self, tracks: &[Track]) -> Option<ReorderPlan> {
        let (target_id, position) = self.target.as_ref()?;
        let from = tracks.iter().position(|track| track.id == self.dragged_id)?;
        let target = tracks.iter().position(|track| &track.id == target_id)?;
        if from == target {
            return None;
        }
        let to = insert_index(from, target, *position);
        if to == from {
            return None;
        }
        Some(ReorderPlan { from, to })
    }
}

/// Index the dragged row is reinserted at after being spliced out, adjusted
/// for the removal shift when the source sat above the target.
pub fn insert_index(source: usize, target: usize, position: DropPosition) -> usize {
    match position {
        DropPosition::Before => {
            if source < target {
                target - 1
            } else {
                target
            }
        }
        DropPosition::After => {
            if source < target {
                target
            } else {
                target + 1
            }
        }
    }
}

/// Applies a resolved plan to the original order and reassigns every
/// `original_index`.
pub fn apply_plan(tracks: &mut Vec<Track>, plan: ReorderPlan) {
    let track = tracks.remove(plan.from);
    tracks.insert(plan.to, track);
    reindex(tracks);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_tracks(count: usize) -> Vec<Track> {
        let mut tracks: Vec<Track> = (0..count)
            .map(|index| Track::from_path(PathBuf::from(format!("/tmp/{index}.mp3"))))
            .collect();
        reindex(&mut tracks);
        tracks
    }

    fn names(tracks: &[Track]) -> Vec<String> {
        tracks.iter().map(|track| track.name.clone()).collect()
    }

    #[test]
    fn test_move_first_after_fourth_in_five() {
        let mut tracks = make_tracks(5);
        let plan = ReorderPlan {
            from: 0,
            to: insert_index(0, 3, DropPosition::After),
        };
        apply_plan(&mut tracks, plan);
        assert_eq!(
            names(&tracks),
            vec!["1.mp3", "2.mp3", "3.mp3", "0.mp3", "4.mp3"]
        );
        let indices: Vec<usize> = tracks.iter().map(|track| track.original_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_insert_before_adjusts_for_removal_shift() {
        assert_eq!(insert_index(0, 3, DropPosition::Before), 2);
        assert_eq!(insert_index(4, 1, DropPosition::Before), 1);
        assert_eq!(insert_index(4, 1, DropPosition::After), 2);
    }

    #[test]
    fn test_move_last_before_first() {
        let mut tracks = make_tracks(4);
        let plan = ReorderPlan {
            from: 3,
            to: insert_index(3, 0, DropPosition::Before),
        };
        apply_plan(&mut tracks, plan);
        assert_eq!(names(&tracks), vec!["3.mp3", "0.mp3", "1.mp3", "2.mp3"]);
    }

    #[test]
    fn test_session_resolves_by_identity() {
        let tracks = make_tracks(5);
        let mut session = DragSession::begin(&tracks[0].id);
        session.update_target(&tracks[3].id, DropPosition::After);
        let plan = session.resolve(&tracks).expect("plan should resolve");
        assert_eq!(plan, ReorderPlan { from: 0, to: 3 });
    }

    #[test]
    fn test_dropping_on_itself_is_a_noop() {
        let tracks = make_tracks(3);
        let mut session = DragSession::begin(&tracks[1].id);
        session.update_target(&tracks[1].id, DropPosition::After);
        assert!(session.resolve(&tracks).is_none());
    }

    #[test]
    fn test_adjacent_before_drop_is_a_noop() {
        let tracks = make_tracks(3);
        let mut session = DragSession::begin(&tracks[0].id);
        session.update_target(&tracks[1].id, DropPosition::Before);
        assert!(session.resolve(&tracks).is_none());
    }

    #[test]
    fn test_drop_without_target_is_ignored() {
        let tracks = make_tracks(3);
        let session = DragSession::begin(&tracks[2].id);
        assert!(session.resolve(&tracks).is_none());
    }
}
