use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;

use crate::{database::db_structs::PlayerRatingSnapshot, model::glicko::Glicko2Rating};

/// In-memory pointer to each player's chronologically-latest persisted
/// snapshot. Prior resolution goes through this explicit pointer rather than a
/// max-timestamp query, so ties in match timestamps cannot mis-resolve a
/// prior; matches are serialized by the backlog ordering instead.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    latest: IndexMap<i64, PlayerRatingSnapshot>
}

impl SnapshotTracker {
    pub fn new() -> SnapshotTracker {
        SnapshotTracker {
            latest: IndexMap::new()
        }
    }

    /// Seeds the tracker from the store's latest-snapshot-per-player query.
    /// Called once at the start of a run.
    pub fn seed(&mut self, snapshots: impl IntoIterator<Item = PlayerRatingSnapshot>) {
        for snapshot in snapshots {
            self.latest.insert(snapshot.player_id, snapshot);
        }
    }

    /// The state a player carries into their next match: the posterior of
    /// their latest snapshot, or the documented default (1500 / 350 / 0.06)
    /// for a player with no history.
    pub fn prior(&self, player_id: i64) -> Glicko2Rating {
        self.latest
            .get(&player_id)
            .map(|snapshot| snapshot.post())
            .unwrap_or_default()
    }

    /// Timestamp of the player's latest persisted snapshot, if any. Used to
    /// reject matches that arrive out of chronological order.
    pub fn last_seen(&self, player_id: i64) -> Option<DateTime<FixedOffset>> {
        self.latest.get(&player_id).map(|snapshot| snapshot.begin_at)
    }

    /// Advances the pointers after a match's snapshots have been accepted by
    /// the store. Must only be called post-persist; the barrier between
    /// matches depends on it.
    pub fn record(&mut self, snapshots: &[PlayerRatingSnapshot]) {
        for snapshot in snapshots {
            self.latest.insert(snapshot.player_id, snapshot.clone());
        }
    }

    pub fn tracked_players(&self) -> usize {
        self.latest.len()
    }
}
