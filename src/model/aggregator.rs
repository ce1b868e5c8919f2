use std::collections::HashMap;

use crate::database::db_structs::RoundStat;

/// Per-player summary of one match, reduced from round-level telemetry.
/// Scraped values are null-tolerant: an absent field counts as zero, while a
/// player with no usable rounds at all produces no derived statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerMatchStats {
    pub player_id: i64,
    pub rounds_played: i32,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub damage: i64,
    pub team_damage: i64
}

impl PlayerMatchStats {
    /// Share of team damage dealt by this player, the contribution proxy fed
    /// into gamma weighting. `None` when team damage is unrecorded or zero;
    /// missing must stay distinct from zero downstream.
    pub fn tdp(&self) -> Option<f64> {
        if self.team_damage > 0 {
            Some(self.damage as f64 / self.team_damage as f64)
        } else {
            None
        }
    }

    /// Average damage per round.
    pub fn adr(&self) -> Option<f64> {
        self.per_round(self.damage as f64)
    }

    /// Kills per round.
    pub fn kpr(&self) -> Option<f64> {
        self.per_round(self.kills as f64)
    }

    fn per_round(&self, total: f64) -> Option<f64> {
        if self.rounds_played > 0 {
            Some(total / self.rounds_played as f64)
        } else {
            None
        }
    }
}

/// Reduces one match's round records into one stat row per player. Pure; the
/// caller decides what to do with players that end up with no rounds.
pub fn aggregate_match(rounds: &[RoundStat]) -> HashMap<i64, PlayerMatchStats> {
    let mut stats: HashMap<i64, PlayerMatchStats> = HashMap::new();

    for round in rounds {
        let entry = stats.entry(round.player_id).or_insert(PlayerMatchStats {
            player_id: round.player_id,
            ..Default::default()
        });

        entry.rounds_played += 1;
        entry.kills += round.kills.unwrap_or(0) as i64;
        entry.deaths += round.deaths.unwrap_or(0) as i64;
        entry.assists += round.assists.unwrap_or(0) as i64;
        entry.damage += round.damage.unwrap_or(0);
        entry.team_damage += round.team_damage.unwrap_or(0);
    }

    stats
}
