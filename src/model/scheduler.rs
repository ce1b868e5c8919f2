use thiserror::Error;
use tracing::{error, info};

use crate::{
    database::{
        db::{RatingStore, StoreError},
        db_structs::Game
    },
    model::{
        constants::DEFAULT_GAMMA,
        engine::{GlickoEngine, MatchReport},
        structures::match_state::MatchState
    },
    utils::progress_utils::progress_bar
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("match {game_id} has no roster")]
    EmptyRoster { game_id: i64 },

    #[error("match {game_id} predates the latest snapshot for player {player_id}")]
    OrderingViolation { game_id: i64, player_id: i64 }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Exponent applied to damage shares in contribution weighting
    pub gamma: f64
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { gamma: DEFAULT_GAMMA }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub matches_persisted: usize,
    pub matches_passed_through: usize,
    pub matches_skipped: usize,
    pub players_rated: usize,
    pub players_passed_through: usize,
    pub players_unconverged: usize
}

/// Walks the match backlog in chronological order, one match fully before the
/// next. The engine computes; the injected store is the only durable state.
/// Any single match's failure is logged and skipped: later matches depend
/// only on persisted snapshots, so skipped work is retried by a later run
/// re-querying the backlog.
pub struct Scheduler<S: RatingStore> {
    store: S,
    engine: GlickoEngine
}

impl<S: RatingStore> Scheduler<S> {
    pub fn new(store: S, config: SchedulerConfig) -> Scheduler<S> {
        Scheduler {
            store,
            engine: GlickoEngine::new(config.gamma)
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&mut self) -> Result<RunSummary, SchedulerError> {
        let seed = self.store.latest_snapshots().await?;
        self.engine.seed(seed);
        info!(players = self.engine.tracker().tracked_players(), "prior pointers seeded");

        let matches = self.store.matches_needing_rating().await?;
        info!(matches = matches.len(), "matches awaiting rating");

        let bar = progress_bar(matches.len() as u64, "Processing matches".to_string());
        let mut summary = RunSummary::default();

        for game in &matches {
            match self.process_match(game).await {
                Ok(report) => {
                    if report.state == MatchState::PassThrough {
                        summary.matches_passed_through += 1;
                    } else {
                        summary.matches_persisted += 1;
                    }
                    summary.players_rated +=
                        report.snapshots.len() - report.pass_through_players.len();
                    summary.players_passed_through += report.pass_through_players.len();
                    summary.players_unconverged += report.unconverged_players.len();
                }
                Err(err) => {
                    error!(game_id = game.id, %err, "match processing failed, skipping");
                    summary.matches_skipped += 1;
                }
            }

            bar.inc(1);
        }

        bar.finish_with_message("Rating run complete");
        info!(
            persisted = summary.matches_persisted,
            passed_through = summary.matches_passed_through,
            skipped = summary.matches_skipped,
            players_rated = summary.players_rated,
            "run complete"
        );

        Ok(summary)
    }

    /// Processes one match end to end: resolve inputs, compute, persist, and
    /// only then advance the prior pointers. The insert is the barrier; no
    /// part of the next match starts before this match's snapshots are
    /// durable.
    async fn process_match(&mut self, game: &Game) -> Result<MatchReport, SchedulerError> {
        let rosters = self.store.rosters(game.id).await?;
        if rosters.is_empty() {
            return Err(SchedulerError::EmptyRoster { game_id: game.id });
        }

        // The backlog is ordered ascending, so a match older than a
        // participant's newest snapshot means the source data is out of
        // order. Rating it would corrupt the prior chain.
        for entry in &rosters {
            if let Some(last_seen) = self.engine.tracker().last_seen(entry.player_id) {
                if game.begin_at < last_seen {
                    return Err(SchedulerError::OrderingViolation {
                        game_id: game.id,
                        player_id: entry.player_id
                    });
                }
            }
        }

        let rounds = self.store.round_stats(game.id).await?;
        let existing = self.store.snapshots_for_match(game.id).await?;

        let mut report = self.engine.process_match(game, &rosters, &rounds, &existing);

        self.store.insert_snapshots(&report.snapshots).await?;
        self.engine.commit(&mut report);

        Ok(report)
    }
}
