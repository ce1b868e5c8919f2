use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::database::{
    db::{RatingStore, StoreError},
    db_structs::{Game, PlayerRatingSnapshot, RosterEntry, RoundStat}
};

pub type MatchFixture = (Game, Vec<RosterEntry>, Vec<RoundStat>);

pub fn generate_game(
    id: i64,
    begin_at: &str,
    winner_team_id: i64,
    loser_team_id: i64,
    winner_score: Option<i32>,
    loser_score: Option<i32>
) -> Game {
    let rounds_count = match (winner_score, loser_score) {
        (Some(winner), Some(loser)) => winner + loser,
        _ => 24
    };

    Game {
        id,
        begin_at: begin_at.parse().unwrap(),
        winner_team_id,
        loser_team_id,
        winner_score,
        loser_score,
        rounds_count
    }
}

pub fn generate_rosters(game_id: i64, teams: &[(i64, &[i64])]) -> Vec<RosterEntry> {
    let mut rosters = Vec::new();
    for (team_id, player_ids) in teams {
        for player_id in player_ids.iter() {
            rosters.push(RosterEntry {
                game_id,
                player_id: *player_id,
                team_id: *team_id
            });
        }
    }

    rosters
}

/// Generates `n_rounds` rounds of telemetry. Each team is given as
/// `(team_id, [(player_id, damage_per_round)])`; team damage per round is the
/// sum of its players' damage, so damage shares come out exact. Kill/death
/// counts are filled from a seeded RNG for reproducible results.
pub fn generate_rounds(game_id: i64, n_rounds: i32, teams: &[(i64, &[(i64, i64)])]) -> Vec<RoundStat> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut rounds = Vec::new();

    for round_number in 1..=n_rounds {
        for (_, players) in teams {
            let team_damage: i64 = players.iter().map(|(_, damage)| damage).sum();

            for (player_id, damage) in players.iter() {
                rounds.push(RoundStat {
                    game_id,
                    player_id: *player_id,
                    round_number,
                    kills: Some(rng.random_range(0..=2)),
                    deaths: Some(rng.random_range(0..=1)),
                    assists: Some(rng.random_range(0..=1)),
                    damage: Some(*damage),
                    team_damage: Some(team_damage)
                });
            }
        }
    }

    rounds
}

/// A complete, well-formed 5v5 match: team 100 (players 1-5) beats team 200
/// (players 6-10) by 16 rounds to 9, with full telemetry.
pub fn generate_standard_match(game_id: i64, begin_at: &str) -> MatchFixture {
    let game = generate_game(game_id, begin_at, 100, 200, Some(16), Some(9));
    let rosters = generate_rosters(game_id, &[(100, &[1, 2, 3, 4, 5]), (200, &[6, 7, 8, 9, 10])]);
    let rounds = generate_rounds(
        game_id,
        25,
        &[
            (100, &[(1, 110), (2, 95), (3, 80), (4, 70), (5, 55)]),
            (200, &[(6, 100), (7, 90), (8, 85), (9, 60), (10, 50)]),
        ]
    );

    (game, rosters, rounds)
}

/// In-memory [`RatingStore`] with the same contract as the database-backed
/// client: an append-only snapshot ledger with one row per (player, match),
/// and a backlog query that re-surfaces partially-persisted matches.
#[derive(Default)]
pub struct MemoryStore {
    games: Mutex<Vec<Game>>,
    rosters: Mutex<Vec<RosterEntry>>,
    rounds: Mutex<Vec<RoundStat>>,
    snapshots: Mutex<Vec<PlayerRatingSnapshot>>
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn add_match(&self, (game, rosters, rounds): MatchFixture) {
        self.games.lock().unwrap().push(game);
        self.rosters.lock().unwrap().extend(rosters);
        self.rounds.lock().unwrap().extend(rounds);
    }

    /// Inserts ledger rows directly, bypassing the scheduler. For arranging
    /// partially-persisted fixtures.
    pub fn insert(&self, snapshots: &[PlayerRatingSnapshot]) {
        self.snapshots.lock().unwrap().extend(snapshots.iter().cloned());
    }

    pub fn snapshots(&self) -> Vec<PlayerRatingSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn latest_snapshots(&self) -> Result<Vec<PlayerRatingSnapshot>, StoreError> {
        let snapshots = self.snapshots.lock().unwrap();
        let mut latest: HashMap<i64, PlayerRatingSnapshot> = HashMap::new();

        for snapshot in snapshots.iter() {
            let newer = match latest.get(&snapshot.player_id) {
                Some(current) => (snapshot.begin_at, snapshot.game_id) > (current.begin_at, current.game_id),
                None => true
            };
            if newer {
                latest.insert(snapshot.player_id, snapshot.clone());
            }
        }

        Ok(latest.into_values().collect())
    }

    async fn matches_needing_rating(&self) -> Result<Vec<Game>, StoreError> {
        let games = self.games.lock().unwrap();
        let rosters = self.rosters.lock().unwrap();
        let snapshots = self.snapshots.lock().unwrap();

        let mut pending: Vec<Game> = games
            .iter()
            .filter(|game| {
                let has_any_snapshot = snapshots.iter().any(|s| s.game_id == game.id);
                let has_unrated_player = rosters.iter().any(|r| {
                    r.game_id == game.id
                        && !snapshots
                            .iter()
                            .any(|s| s.game_id == game.id && s.player_id == r.player_id)
                });

                !has_any_snapshot || has_unrated_player
            })
            .cloned()
            .collect();

        pending.sort_by_key(|game| (game.begin_at, game.id));
        Ok(pending)
    }

    async fn rosters(&self, game_id: i64) -> Result<Vec<RosterEntry>, StoreError> {
        Ok(self
            .rosters
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.game_id == game_id)
            .copied()
            .collect())
    }

    async fn round_stats(&self, game_id: i64) -> Result<Vec<RoundStat>, StoreError> {
        Ok(self
            .rounds
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.game_id == game_id)
            .copied()
            .collect())
    }

    async fn snapshots_for_match(&self, game_id: i64) -> Result<Vec<PlayerRatingSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.game_id == game_id)
            .cloned()
            .collect())
    }

    async fn insert_snapshots(&self, snapshots: &[PlayerRatingSnapshot]) -> Result<(), StoreError> {
        let mut ledger = self.snapshots.lock().unwrap();

        for snapshot in snapshots {
            if ledger
                .iter()
                .any(|s| s.game_id == snapshot.game_id && s.player_id == snapshot.player_id)
            {
                return Err(StoreError::DuplicateSnapshot {
                    game_id: snapshot.game_id,
                    player_id: snapshot.player_id
                });
            }
        }

        ledger.extend(snapshots.iter().cloned());
        Ok(())
    }
}
