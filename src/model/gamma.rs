use std::collections::HashMap;

use crate::model::constants::TEAM_SIZE;

/// A player's share of their team's damage for one match. `None` means the
/// telemetry was missing or untrusted, which is distinct from a genuine zero.
#[derive(Debug, Clone, Copy)]
pub struct PlayerContribution {
    pub player_id: i64,
    pub tdp: Option<f64>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegenerateReason {
    /// At least one player has no damage-share data
    MissingContribution,
    /// At least one player has a zero or negative damage share
    ZeroContribution
}

/// Outcome of contribution weighting for one match. The degraded mode applies
/// to the whole match: one bad damage share anywhere puts every player in the
/// match on a uniform multiplier of 1.
#[derive(Debug, Clone, PartialEq)]
pub enum GammaResult {
    Weighted(HashMap<i64, f64>),
    Uniform(DegenerateReason)
}

impl GammaResult {
    pub fn multiplier(&self, player_id: i64) -> f64 {
        match self {
            GammaResult::Weighted(multipliers) => multipliers.get(&player_id).copied().unwrap_or(1.0),
            GammaResult::Uniform(_) => 1.0
        }
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self, GammaResult::Uniform(_))
    }
}

/// Converts both teams' damage shares into per-player rating-change
/// multipliers.
///
/// Winners are weighted proportionally to `tdp^gamma`: carrying the team earns
/// a larger share of the gain. Losers are weighted by the reciprocal: the best
/// performers on a losing team absorb the smallest share of the loss. Each
/// team's multipliers sum to the team size by construction.
pub fn gamma_multipliers(
    winners: &[PlayerContribution],
    losers: &[PlayerContribution],
    gamma: f64
) -> GammaResult {
    let winner_weights = match checked_weights(winners, gamma, false) {
        Ok(weights) => weights,
        Err(reason) => return GammaResult::Uniform(reason)
    };
    let loser_weights = match checked_weights(losers, gamma, true) {
        Ok(weights) => weights,
        Err(reason) => return GammaResult::Uniform(reason)
    };

    let winner_denom: f64 = winner_weights.iter().map(|(_, w)| w).sum();
    let loser_denom: f64 = loser_weights.iter().map(|(_, w)| w).sum();

    let mut multipliers = HashMap::new();
    for (player_id, weight) in winner_weights {
        multipliers.insert(player_id, TEAM_SIZE * weight / winner_denom);
    }
    for (player_id, weight) in loser_weights {
        multipliers.insert(player_id, TEAM_SIZE * weight / loser_denom);
    }

    GammaResult::Weighted(multipliers)
}

/// Validates one team's damage shares and maps them to unnormalized weights.
/// Any missing or non-positive share degrades the whole match.
fn checked_weights(
    players: &[PlayerContribution],
    gamma: f64,
    invert: bool
) -> Result<Vec<(i64, f64)>, DegenerateReason> {
    players
        .iter()
        .map(|player| match player.tdp {
            Some(tdp) if tdp > 0.0 => {
                let weight = tdp.powf(gamma);
                Ok((player.player_id, if invert { weight.recip() } else { weight }))
            }
            Some(_) => Err(DegenerateReason::ZeroContribution),
            None => Err(DegenerateReason::MissingContribution)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn team(shares: &[(i64, f64)]) -> Vec<PlayerContribution> {
        shares
            .iter()
            .map(|(player_id, tdp)| PlayerContribution {
                player_id: *player_id,
                tdp: Some(*tdp)
            })
            .collect()
    }

    fn balanced_team(ids: [i64; 5]) -> Vec<PlayerContribution> {
        team(&ids.map(|id| (id, 0.2)))
    }

    #[test]
    fn test_multipliers_sum_to_team_size() {
        let winners = team(&[(1, 0.31), (2, 0.24), (3, 0.19), (4, 0.15), (5, 0.11)]);
        let losers = team(&[(6, 0.28), (7, 0.22), (8, 0.20), (9, 0.18), (10, 0.12)]);

        let result = gamma_multipliers(&winners, &losers, 1.0);
        let GammaResult::Weighted(multipliers) = &result else {
            panic!("Expected weighted multipliers");
        };

        let winner_sum: f64 = (1..=5).map(|id| multipliers[&id]).sum();
        let loser_sum: f64 = (6..=10).map(|id| multipliers[&id]).sum();

        assert_abs_diff_eq!(winner_sum, TEAM_SIZE, epsilon = 1e-9);
        assert_abs_diff_eq!(loser_sum, TEAM_SIZE, epsilon = 1e-9);
    }

    #[test]
    fn test_winner_weighting_favors_high_damage_share() {
        let winners = team(&[(1, 0.30), (2, 0.25), (3, 0.20), (4, 0.15), (5, 0.10)]);
        let losers = balanced_team([6, 7, 8, 9, 10]);

        let result = gamma_multipliers(&winners, &losers, 1.0);

        assert!(result.multiplier(1) > result.multiplier(2));
        assert!(result.multiplier(2) > result.multiplier(5));
        // With everyone at exactly 1/5 damage share, multipliers are uniform
        assert_abs_diff_eq!(result.multiplier(6), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_loser_weighting_favors_low_damage_share() {
        let winners = balanced_team([1, 2, 3, 4, 5]);
        let losers = team(&[(6, 0.30), (7, 0.25), (8, 0.20), (9, 0.15), (10, 0.10)]);

        let result = gamma_multipliers(&winners, &losers, 1.0);

        // The team's best performer takes the smallest share of the loss
        assert!(result.multiplier(6) < result.multiplier(7));
        assert!(result.multiplier(7) < result.multiplier(10));
    }

    #[test]
    fn test_zero_share_falls_back_to_uniform() {
        let winners = team(&[(1, 0.35), (2, 0.30), (3, 0.20), (4, 0.15), (5, 0.0)]);
        let losers = balanced_team([6, 7, 8, 9, 10]);

        let result = gamma_multipliers(&winners, &losers, 1.0);

        assert_eq!(result, GammaResult::Uniform(DegenerateReason::ZeroContribution));
        for player_id in 1..=10 {
            assert_abs_diff_eq!(result.multiplier(player_id), 1.0);
        }
    }

    #[test]
    fn test_missing_share_falls_back_to_uniform() {
        let winners = balanced_team([1, 2, 3, 4, 5]);
        let mut losers = balanced_team([6, 7, 8, 9, 10]);
        losers[2].tdp = None;

        let result = gamma_multipliers(&winners, &losers, 1.0);

        assert_eq!(result, GammaResult::Uniform(DegenerateReason::MissingContribution));
        assert!(result.is_uniform());
    }

    #[test]
    fn test_higher_gamma_sharpens_weighting() {
        let winners = team(&[(1, 0.30), (2, 0.25), (3, 0.20), (4, 0.15), (5, 0.10)]);
        let losers = balanced_team([6, 7, 8, 9, 10]);

        let linear = gamma_multipliers(&winners, &losers, 1.0);
        let sharpened = gamma_multipliers(&winners, &losers, 2.0);

        assert!(sharpened.multiplier(1) > linear.multiplier(1));
        assert!(sharpened.multiplier(5) < linear.multiplier(5));
    }
}
