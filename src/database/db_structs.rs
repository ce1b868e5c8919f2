use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::model::glicko::Glicko2Rating;

/// One scraped map ("game") with a decided winner, awaiting rating.
#[derive(Debug, Clone, Serialize)]
pub struct Game {
    pub id: i64,
    pub begin_at: DateTime<FixedOffset>,
    pub winner_team_id: i64,
    pub loser_team_id: i64,
    pub winner_score: Option<i32>,
    pub loser_score: Option<i32>,
    pub rounds_count: i32
}

impl Game {
    /// Margin-of-victory score in [0, 1] from the winner's perspective,
    /// defaulting to a full win when round scores are unavailable.
    pub fn normalized_winner_score(&self) -> f64 {
        match (self.winner_score, self.loser_score) {
            (Some(winner), Some(loser)) if winner + loser > 0 => {
                winner as f64 / (winner + loser) as f64
            }
            _ => 1.0
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RosterEntry {
    pub game_id: i64,
    pub player_id: i64,
    pub team_id: i64
}

/// One player's telemetry for one round, joined with their team's aggregate
/// damage for the same round. Scraped fields are nullable.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RoundStat {
    pub game_id: i64,
    pub player_id: i64,
    pub round_number: i32,
    pub kills: Option<i32>,
    pub deaths: Option<i32>,
    pub assists: Option<i32>,
    pub damage: Option<i64>,
    pub team_damage: Option<i64>
}

/// One row of the append-only rating ledger: a player's state entering and
/// leaving one match. Never updated in place.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerRatingSnapshot {
    pub game_id: i64,
    pub player_id: i64,
    pub begin_at: DateTime<FixedOffset>,
    pub rating_pre: f64,
    pub deviation_pre: f64,
    pub volatility_pre: f64,
    pub rating_post: f64,
    pub deviation_post: f64,
    pub volatility_post: f64
}

impl PlayerRatingSnapshot {
    pub fn new(
        game_id: i64,
        player_id: i64,
        begin_at: DateTime<FixedOffset>,
        pre: Glicko2Rating,
        post: Glicko2Rating
    ) -> Self {
        PlayerRatingSnapshot {
            game_id,
            player_id,
            begin_at,
            rating_pre: pre.rating,
            deviation_pre: pre.deviation,
            volatility_pre: pre.volatility,
            rating_post: post.rating,
            deviation_post: post.deviation,
            volatility_post: post.volatility
        }
    }

    /// A no-op update: posterior equals prior exactly. Used for corrupted
    /// match data so downstream chronology is not broken.
    pub fn pass_through(
        game_id: i64,
        player_id: i64,
        begin_at: DateTime<FixedOffset>,
        prior: Glicko2Rating
    ) -> Self {
        Self::new(game_id, player_id, begin_at, prior, prior)
    }

    pub fn pre(&self) -> Glicko2Rating {
        Glicko2Rating {
            rating: self.rating_pre,
            deviation: self.deviation_pre,
            volatility: self.volatility_pre
        }
    }

    pub fn post(&self) -> Glicko2Rating {
        Glicko2Rating {
            rating: self.rating_post,
            deviation: self.deviation_post,
            volatility: self.volatility_post
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.rating_pre == self.rating_post
            && self.deviation_pre == self.deviation_post
            && self.volatility_pre == self.volatility_post
    }
}
