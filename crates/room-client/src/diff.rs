//! Set difference between what the room publishes and what we receive.
//!
//! Tracks are identified by name: the server guarantees local-track names
//! are unique within a room, so a name is a stable identity across
//! renegotiations even though mids differ per session.

use signaling_protocol::PublishedTrack;

/// Outcome of diffing the server listing against the synced set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackDiff {
    /// Published tracks we are not yet receiving.
    pub to_add: Vec<PublishedTrack>,
    /// Names we receive that are no longer published.
    pub to_remove: Vec<String>,
}

impl TrackDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff `remote` (the server's current listing) against `synced` (the names
/// we already receive).
#[must_use]
pub fn find_diff(synced: &[String], remote: &[PublishedTrack]) -> TrackDiff {
    let to_add = remote
        .iter()
        .filter(|t| !synced.contains(&t.name))
        .cloned()
        .collect();

    let to_remove = synced
        .iter()
        .filter(|name| !remote.iter().any(|t| t.name == **name))
        .cloned()
        .collect();

    TrackDiff { to_add, to_remove }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn published(name: &str, session_id: &str) -> PublishedTrack {
        PublishedTrack {
            mid: "0".to_string(),
            session_id: session_id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_overlapping_sets() {
        // Receiving [a, b]; room publishes [b, c]: add c, remove a.
        let synced = vec!["a".to_string(), "b".to_string()];
        let remote = vec![published("b", "s-2"), published("c", "s-3")];

        let diff = find_diff(&synced, &remote);
        assert_eq!(diff.to_add, vec![published("c", "s-3")]);
        assert_eq!(diff.to_remove, vec!["a".to_string()]);
    }

    #[test]
    fn test_identical_sets_are_empty_diff() {
        let synced = vec!["a".to_string()];
        let remote = vec![published("a", "s-1")];
        assert!(find_diff(&synced, &remote).is_empty());
    }

    #[test]
    fn test_empty_synced_adds_everything() {
        let remote = vec![published("a", "s-1"), published("b", "s-2")];
        let diff = find_diff(&[], &remote);
        assert_eq!(diff.to_add.len(), 2);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_empty_remote_removes_everything() {
        let synced = vec!["a".to_string(), "b".to_string()];
        let diff = find_diff(&synced, &[]);
        assert!(diff.to_add.is_empty());
        assert_eq!(diff.to_remove, synced);
    }
}
