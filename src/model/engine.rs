use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::{debug, error, warn};

use crate::{
    database::db_structs::{Game, PlayerRatingSnapshot, RosterEntry, RoundStat},
    model::{
        aggregator::{aggregate_match, PlayerMatchStats},
        constants::{DEFAULT_GAMMA, MIN_ROUNDS_FOR_TDP},
        gamma::{gamma_multipliers, GammaResult, PlayerContribution},
        glicko::{self, Glicko2Rating, OpponentGame, SolverError},
        snapshot_tracker::SnapshotTracker,
        structures::match_state::MatchState
    }
};

/// Result of computing one match: the snapshots to persist, the terminal (or
/// ready-to-persist) state, and the anomalies encountered along the way.
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub game_id: i64,
    pub state: MatchState,
    /// `None` when weighting never ran (pass-through matches)
    pub gamma: Option<GammaResult>,
    pub snapshots: Vec<PlayerRatingSnapshot>,
    /// Players persisted with posterior == prior
    pub pass_through_players: Vec<i64>,
    /// Players whose volatility root-find failed; no snapshot is written for
    /// them this run, leaving the row as a retry candidate
    pub unconverged_players: Vec<i64>
}

struct SolveTask {
    player_id: i64,
    prior: Glicko2Rating,
    multiplier: f64,
    games: Vec<OpponentGame>
}

/// The rating engine: holds the latest-prior pointers and computes one match
/// at a time. All methods are synchronous and store-agnostic; the scheduler
/// owns fetching inputs and persisting the resulting snapshots.
pub struct GlickoEngine {
    tracker: SnapshotTracker,
    gamma: f64
}

impl Default for GlickoEngine {
    fn default() -> Self {
        Self::new(DEFAULT_GAMMA)
    }
}

impl GlickoEngine {
    pub fn new(gamma: f64) -> GlickoEngine {
        GlickoEngine {
            tracker: SnapshotTracker::new(),
            gamma
        }
    }

    pub fn tracker(&self) -> &SnapshotTracker {
        &self.tracker
    }

    pub fn seed(&mut self, snapshots: impl IntoIterator<Item = PlayerRatingSnapshot>) {
        self.tracker.seed(snapshots);
    }

    /// Computes posterior ratings for every player in one match.
    ///
    /// `existing` carries snapshots already persisted for this match by an
    /// earlier, partially-completed run: those players are not re-rated, and
    /// their opponents read the pre-match state recorded in the existing row
    /// rather than the (already advanced) tracker pointer.
    ///
    /// Nothing is committed here; the caller persists `report.snapshots` and
    /// then calls [`GlickoEngine::commit`], which is what advances the
    /// tracker. That ordering is the barrier between matches.
    pub fn process_match(
        &self,
        game: &Game,
        rosters: &[RosterEntry],
        rounds: &[RoundStat],
        existing: &[PlayerRatingSnapshot]
    ) -> MatchReport {
        let state = MatchState::Pending;

        let already_persisted: HashSet<i64> = existing.iter().map(|s| s.player_id).collect();
        let priors: HashMap<i64, Glicko2Rating> = rosters
            .iter()
            .map(|entry| {
                let prior = existing
                    .iter()
                    .find(|s| s.player_id == entry.player_id)
                    .map(|s| s.pre())
                    .unwrap_or_else(|| self.tracker.prior(entry.player_id));

                (entry.player_id, prior)
            })
            .collect();

        let winners: Vec<i64> = team_players(rosters, game.winner_team_id);
        let losers: Vec<i64> = team_players(rosters, game.loser_team_id);
        let unassigned: Vec<i64> = rosters
            .iter()
            .filter(|e| e.team_id != game.winner_team_id && e.team_id != game.loser_team_id)
            .map(|e| e.player_id)
            .collect();

        // Corrupted team assignment (observed in the wild: all ten players
        // stored under one team id). The whole match becomes a pass-through
        // so that chronology stays unbroken for every participant.
        if winners.is_empty() || losers.is_empty() {
            warn!(
                game_id = game.id,
                winners = winners.len(),
                losers = losers.len(),
                "corrupt roster, persisting match as pass-through"
            );

            let snapshots = rosters
                .iter()
                .filter(|e| !already_persisted.contains(&e.player_id))
                .map(|e| {
                    PlayerRatingSnapshot::pass_through(
                        game.id,
                        e.player_id,
                        game.begin_at,
                        priors[&e.player_id]
                    )
                })
                .collect::<Vec<_>>();
            let pass_through_players = snapshots.iter().map(|s| s.player_id).collect();

            return MatchReport {
                game_id: game.id,
                state: advance(game.id, state, MatchState::PassThrough),
                gamma: None,
                snapshots,
                pass_through_players,
                unconverged_players: Vec::new()
            };
        }

        let state = advance(game.id, state, MatchState::Aggregating);
        let stats = aggregate_match(rounds);

        let state = advance(game.id, state, MatchState::Weighting);
        let gamma_result = gamma_multipliers(
            &contributions(&winners, &stats),
            &contributions(&losers, &stats),
            self.gamma
        );
        if let GammaResult::Uniform(reason) = &gamma_result {
            warn!(
                game_id = game.id,
                ?reason,
                "degenerate damage shares, falling back to uniform multipliers"
            );
        }

        let state = advance(game.id, state, MatchState::Solving);
        let winner_score = game.normalized_winner_score();
        let mut tasks = Vec::new();
        for (team, opponents, score) in [
            (&winners, &losers, winner_score),
            (&losers, &winners, 1.0 - winner_score),
        ] {
            let opponent_games: Vec<OpponentGame> = opponents
                .iter()
                .map(|player_id| {
                    let prior = priors[player_id];
                    OpponentGame {
                        rating: prior.rating,
                        deviation: prior.deviation,
                        score
                    }
                })
                .collect();

            for player_id in team {
                if already_persisted.contains(player_id) {
                    continue;
                }

                tasks.push(SolveTask {
                    player_id: *player_id,
                    prior: priors[player_id],
                    multiplier: gamma_result.multiplier(*player_id),
                    games: opponent_games.clone()
                });
            }
        }

        // Every solve reads only committed prior state and produces a
        // disjoint snapshot row, so the fan-out is race-free. The join here
        // is the completion barrier required before persisting.
        let results: Vec<(i64, Glicko2Rating, Result<Glicko2Rating, SolverError>)> = tasks
            .par_iter()
            .map(|task| {
                (
                    task.player_id,
                    task.prior,
                    glicko::rate(task.prior, &task.games, task.multiplier)
                )
            })
            .collect();

        let mut snapshots = Vec::new();
        let mut pass_through_players = Vec::new();
        let mut unconverged_players = Vec::new();

        for (player_id, prior, result) in results {
            match result {
                Ok(posterior) => snapshots.push(PlayerRatingSnapshot::new(
                    game.id,
                    player_id,
                    game.begin_at,
                    prior,
                    posterior
                )),
                Err(SolverError::NoOpponents) => {
                    warn!(game_id = game.id, player_id, "no opponents resolved, passing through");
                    snapshots.push(PlayerRatingSnapshot::pass_through(
                        game.id,
                        player_id,
                        game.begin_at,
                        prior
                    ));
                    pass_through_players.push(player_id);
                }
                Err(err @ SolverError::Nonconvergence(_)) => {
                    error!(game_id = game.id, player_id, %err, "skipping player update");
                    unconverged_players.push(player_id);
                }
            }
        }

        // Players assigned to neither roster side keep their prior, persisted
        // so their own chronology is not broken either.
        for player_id in unassigned {
            if already_persisted.contains(&player_id) {
                continue;
            }

            warn!(
                game_id = game.id,
                player_id, "player assigned to neither team, passing through"
            );
            snapshots.push(PlayerRatingSnapshot::pass_through(
                game.id,
                player_id,
                game.begin_at,
                priors[&player_id]
            ));
            pass_through_players.push(player_id);
        }

        debug!(game_id = game.id, snapshots = snapshots.len(), "match computed");

        MatchReport {
            game_id: game.id,
            state,
            gamma: Some(gamma_result),
            snapshots,
            pass_through_players,
            unconverged_players
        }
    }

    /// Advances the prior pointers once the report's snapshots have been
    /// accepted by the store, and marks the match terminal. Later matches
    /// observe these postings as their priors.
    pub fn commit(&mut self, report: &mut MatchReport) {
        self.tracker.record(&report.snapshots);

        if report.state != MatchState::PassThrough {
            report.state = MatchState::Persisted;
        }
    }
}

fn advance(game_id: i64, from: MatchState, to: MatchState) -> MatchState {
    debug!(game_id, from = ?from, to = ?to, "match state transition");
    to
}

fn team_players(rosters: &[RosterEntry], team_id: i64) -> Vec<i64> {
    rosters
        .iter()
        .filter(|e| e.team_id == team_id)
        .map(|e| e.player_id)
        .collect()
}

/// Maps one team's stat rows into gamma inputs, applying the data-quality
/// floor: a damage share backed by fewer than `MIN_ROUNDS_FOR_TDP` recorded
/// rounds is untrusted and degrades to missing.
fn contributions(team: &[i64], stats: &HashMap<i64, PlayerMatchStats>) -> Vec<PlayerContribution> {
    team.iter()
        .map(|player_id| PlayerContribution {
            player_id: *player_id,
            tdp: stats
                .get(player_id)
                .filter(|s| s.rounds_played >= MIN_ROUNDS_FOR_TDP)
                .and_then(|s| s.tdp())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::gamma::DegenerateReason,
        utils::test_utils::{generate_game, generate_rosters, generate_rounds}
    };
    use approx::assert_abs_diff_eq;

    fn full_match(game_id: i64, begin_at: &str) -> (Game, Vec<RosterEntry>, Vec<RoundStat>) {
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

    #[test]
    fn test_full_match_rates_all_ten_players() {
        let engine = GlickoEngine::default();
        let (game, rosters, rounds) = full_match(1, "2023-04-01T12:00:00-00:00");

        let report = engine.process_match(&game, &rosters, &rounds, &[]);

        assert_eq!(report.state, MatchState::Solving);
        assert_eq!(report.snapshots.len(), 10);
        assert!(report.pass_through_players.is_empty());
        assert!(report.unconverged_players.is_empty());
        assert!(!report.gamma.as_ref().unwrap().is_uniform());

        for snapshot in &report.snapshots {
            let won = snapshot.player_id <= 5;
            if won {
                assert!(snapshot.rating_post > snapshot.rating_pre);
            } else {
                assert!(snapshot.rating_post < snapshot.rating_pre);
            }
            assert!(snapshot.deviation_post > 0.0);
            assert!(snapshot.volatility_post > 0.0);
        }
    }

    #[test]
    fn test_commit_chains_priors_chronologically() {
        let mut engine = GlickoEngine::default();

        let (game_1, rosters_1, rounds_1) = full_match(1, "2023-04-01T12:00:00-00:00");
        let mut report_1 = engine.process_match(&game_1, &rosters_1, &rounds_1, &[]);
        engine.commit(&mut report_1);

        assert_eq!(report_1.state, MatchState::Persisted);

        let (game_2, rosters_2, rounds_2) = full_match(2, "2023-04-02T12:00:00-00:00");
        let report_2 = engine.process_match(&game_2, &rosters_2, &rounds_2, &[]);

        for snapshot in &report_2.snapshots {
            let previous = report_1
                .snapshots
                .iter()
                .find(|s| s.player_id == snapshot.player_id)
                .unwrap();

            assert_abs_diff_eq!(snapshot.rating_pre, previous.rating_post, epsilon = 1e-12);
            assert_abs_diff_eq!(snapshot.deviation_pre, previous.deviation_post, epsilon = 1e-12);
            assert_abs_diff_eq!(snapshot.volatility_pre, previous.volatility_post, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_corrupt_roster_passes_whole_match_through() {
        let engine = GlickoEngine::default();
        let game = generate_game(1, "2023-04-01T12:00:00-00:00", 100, 200, Some(16), Some(9));
        // All ten players stored under the winning team id
        let rosters = generate_rosters(1, &[(100, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10])]);

        let report = engine.process_match(&game, &rosters, &[], &[]);

        assert_eq!(report.state, MatchState::PassThrough);
        assert_eq!(report.snapshots.len(), 10);
        assert_eq!(report.pass_through_players.len(), 10);
        assert!(report.gamma.is_none());

        for snapshot in &report.snapshots {
            assert!(snapshot.is_pass_through());
        }
    }

    #[test]
    fn test_unassigned_player_passes_through_individually() {
        let engine = GlickoEngine::default();
        let game = generate_game(1, "2023-04-01T12:00:00-00:00", 100, 200, Some(16), Some(9));
        let mut rosters = generate_rosters(1, &[(100, &[1, 2, 3, 4, 5]), (200, &[6, 7, 8, 9])]);
        // Player 10 carries a team id matching neither side
        rosters.push(RosterEntry {
            game_id: 1,
            player_id: 10,
            team_id: 999
        });

        let report = engine.process_match(&game, &rosters, &[], &[]);

        assert_eq!(report.state, MatchState::Solving);
        assert_eq!(report.snapshots.len(), 10);
        assert_eq!(report.pass_through_players, vec![10]);

        let passed = report.snapshots.iter().find(|s| s.player_id == 10).unwrap();
        assert!(passed.is_pass_through());
    }

    #[test]
    fn test_low_round_count_degrades_to_uniform_weighting() {
        let engine = GlickoEngine::default();
        let game = generate_game(1, "2023-04-01T12:00:00-00:00", 100, 200, Some(13), Some(3));
        let rosters = generate_rosters(1, &[(100, &[1, 2, 3, 4, 5]), (200, &[6, 7, 8, 9, 10])]);
        // Only 8 rounds of telemetry: below the trust floor
        let rounds = generate_rounds(
            1,
            8,
            &[
                (100, &[(1, 110), (2, 95), (3, 80), (4, 70), (5, 55)]),
                (200, &[(6, 100), (7, 90), (8, 85), (9, 60), (10, 50)]),
            ]
        );

        let report = engine.process_match(&game, &rosters, &rounds, &[]);

        assert_eq!(
            report.gamma,
            Some(GammaResult::Uniform(DegenerateReason::MissingContribution))
        );
        assert_eq!(report.snapshots.len(), 10);
    }

    #[test]
    fn test_higher_damage_share_earns_larger_gain() {
        let engine = GlickoEngine::default();
        let (game, rosters, rounds) = full_match(1, "2023-04-01T12:00:00-00:00");

        let report = engine.process_match(&game, &rosters, &rounds, &[]);
        let gain = |player_id: i64| {
            let s = report
                .snapshots
                .iter()
                .find(|s| s.player_id == player_id)
                .unwrap();
            s.rating_post - s.rating_pre
        };

        // Player 1 out-damaged player 5 on the winning team
        assert!(gain(1) > gain(5));
        // Player 6 out-damaged player 10 on the losing team, so loses less
        assert!(gain(6) > gain(10));
    }

    #[test]
    fn test_existing_snapshots_are_not_recomputed() {
        let mut engine = GlickoEngine::default();
        let (game, rosters, rounds) = full_match(1, "2023-04-01T12:00:00-00:00");

        // First run persisted player 1 only, then died before the rest
        let mut first = engine.process_match(&game, &rosters, &rounds, &[]);
        first.snapshots.retain(|s| s.player_id == 1);
        engine.commit(&mut first);

        let retry = engine.process_match(&game, &rosters, &rounds, &first.snapshots);

        // Player 1 is skipped; the other nine are computed as if the first
        // run had completed, reading player 1's pre-match state
        assert_eq!(retry.snapshots.len(), 9);
        assert!(!retry.snapshots.iter().any(|s| s.player_id == 1));

        let full = GlickoEngine::default().process_match(&game, &rosters, &rounds, &[]);
        for snapshot in &retry.snapshots {
            let expected = full
                .snapshots
                .iter()
                .find(|s| s.player_id == snapshot.player_id)
                .unwrap();
            assert_abs_diff_eq!(snapshot.rating_post, expected.rating_post, epsilon = 1e-12);
        }
    }
}
