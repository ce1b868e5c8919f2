use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::constants::{
    CONVERGENCE_TOLERANCE, DEFAULT_DEVIATION, DEFAULT_RATING, DEFAULT_VOLATILITY, GLICKO_SCALE,
    MAX_VOLATILITY_ITERATIONS, TAU
};

/// A player's Glicko-2 state triple on the public scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Glicko2Rating {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64
}

impl Default for Glicko2Rating {
    fn default() -> Self {
        Glicko2Rating {
            rating: DEFAULT_RATING,
            deviation: DEFAULT_DEVIATION,
            volatility: DEFAULT_VOLATILITY
        }
    }
}

/// One rated game from the perspective of the player being updated:
/// a single opponent and the score achieved against them.
///
/// A team match is expressed as one `OpponentGame` per opposing player,
/// each carrying the team-level score.
#[derive(Debug, Clone, Copy)]
pub struct OpponentGame {
    pub rating: f64,
    pub deviation: f64,
    pub score: f64
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("no opponents resolved for this update")]
    NoOpponents,
    #[error("volatility root-find failed to converge within {0} iterations")]
    Nonconvergence(u32)
}

/// Computes a player's posterior rating state from their prior and a set of
/// opponent games, following steps 2-8 of the published Glicko-2 algorithm.
///
/// `multiplier` scales only this player's own rating movement (step 8); it has
/// no effect on the variance or volatility computations.
///
/// An empty opponent list is malformed source data and is refused rather than
/// fabricating an update.
pub fn rate(
    prior: Glicko2Rating,
    games: &[OpponentGame],
    multiplier: f64
) -> Result<Glicko2Rating, SolverError> {
    if games.is_empty() {
        return Err(SolverError::NoOpponents);
    }

    // Step 2: convert to the internal scale
    let mu = to_mu(prior.rating);
    let phi = to_phi(prior.deviation);

    // Steps 3 and 4: estimated variance and improvement sum
    let mut v_inv = 0.0;
    let mut improvement_sum = 0.0;
    for game in games {
        let mu_j = to_mu(game.rating);
        let phi_j = to_phi(game.deviation);
        let g_j = g(phi_j);
        let e_j = expected_score(mu, mu_j, phi_j);

        v_inv += g_j * g_j * e_j * (1.0 - e_j);
        improvement_sum += g_j * (game.score - e_j);
    }

    let v = 1.0 / v_inv;
    let delta = v * improvement_sum;

    // Step 5: new volatility via root-finding
    let sigma_prime = solve_volatility(prior.volatility, delta, phi, v)?;

    // Steps 6 and 7: new deviation
    let phi_star = (phi * phi + sigma_prime * sigma_prime).sqrt();
    let phi_prime = 1.0 / (1.0 / (phi_star * phi_star) + 1.0 / v).sqrt();

    // Step 8: new rating, with the contribution multiplier applied to
    // this player's movement only
    let mu_prime = mu + phi_prime * phi_prime * multiplier * improvement_sum;

    Ok(Glicko2Rating {
        rating: from_mu(mu_prime),
        deviation: GLICKO_SCALE * phi_prime,
        volatility: sigma_prime
    })
}

/// Win probability for player A against player B under combined uncertainty:
/// `1 / (1 + exp(-g(sqrt(RD_a^2 + RD_b^2) / scale) * (mu_a - mu_b)))`
pub fn win_probability(rating_a: f64, deviation_a: f64, rating_b: f64, deviation_b: f64) -> f64 {
    let combined_phi = (deviation_a * deviation_a + deviation_b * deviation_b).sqrt() / GLICKO_SCALE;

    1.0 / (1.0 + (-g(combined_phi) * (to_mu(rating_a) - to_mu(rating_b))).exp())
}

fn to_mu(rating: f64) -> f64 {
    (rating - DEFAULT_RATING) / GLICKO_SCALE
}

fn to_phi(deviation: f64) -> f64 {
    deviation / GLICKO_SCALE
}

fn from_mu(mu: f64) -> f64 {
    GLICKO_SCALE * mu + DEFAULT_RATING
}

fn g(phi: f64) -> f64 {
    1.0 / (1.0 + 3.0 * phi * phi / (PI * PI)).sqrt()
}

fn expected_score(mu: f64, mu_j: f64, phi_j: f64) -> f64 {
    1.0 / (1.0 + (-g(phi_j) * (mu - mu_j)).exp())
}

/// The step 5 objective. Its single root in `x = ln(sigma'^2)` is the new
/// volatility.
fn volatility_objective(x: f64, delta: f64, phi: f64, v: f64, a: f64) -> f64 {
    let ex = x.exp();
    let num = ex * (delta * delta - phi * phi - v - ex);
    let denom = 2.0 * (phi * phi + v + ex) * (phi * phi + v + ex);

    num / denom - (x - a) / (TAU * TAU)
}

/// Solves for the new volatility with the Illinois-style secant iteration from
/// the published algorithm. The bracket is chosen per the algorithm: the upper
/// bound is `a = ln(sigma^2)`; the lower bound is `ln(delta^2 - phi^2 - v)`
/// when that quantity is positive, otherwise the first `a - k*tau` with a
/// negative objective value.
///
/// Iteration is capped so pathological inputs surface as an error instead of
/// looping unboundedly.
fn solve_volatility(sigma: f64, delta: f64, phi: f64, v: f64) -> Result<f64, SolverError> {
    let a = (sigma * sigma).ln();

    let mut upper = a;
    let mut lower = if delta * delta > phi * phi + v {
        (delta * delta - phi * phi - v).ln()
    } else {
        let mut k = 1.0;
        while volatility_objective(a - k * TAU, delta, phi, v, a) < 0.0 {
            k += 1.0;

            if k as u32 > MAX_VOLATILITY_ITERATIONS {
                return Err(SolverError::Nonconvergence(MAX_VOLATILITY_ITERATIONS));
            }
        }
        a - k * TAU
    };

    let mut f_upper = volatility_objective(upper, delta, phi, v, a);
    let mut f_lower = volatility_objective(lower, delta, phi, v, a);

    let mut iterations = 0;
    while (lower - upper).abs() > CONVERGENCE_TOLERANCE {
        if iterations >= MAX_VOLATILITY_ITERATIONS {
            return Err(SolverError::Nonconvergence(iterations));
        }

        let candidate = upper + (upper - lower) * f_upper / (f_lower - f_upper);
        let f_candidate = volatility_objective(candidate, delta, phi, v, a);

        if f_candidate * f_lower <= 0.0 {
            upper = lower;
            f_upper = f_lower;
        } else {
            f_upper /= 2.0;
        }

        lower = candidate;
        f_lower = f_candidate;

        iterations += 1;
    }

    Ok((upper / 2.0).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn glickman_example_games() -> Vec<OpponentGame> {
        vec![
            OpponentGame {
                rating: 1400.0,
                deviation: 30.0,
                score: 1.0
            },
            OpponentGame {
                rating: 1550.0,
                deviation: 100.0,
                score: 0.0
            },
            OpponentGame {
                rating: 1700.0,
                deviation: 300.0,
                score: 0.0
            },
        ]
    }

    #[test]
    fn test_glickman_published_example() {
        let prior = Glicko2Rating {
            rating: 1500.0,
            deviation: 200.0,
            volatility: 0.06
        };

        let posterior = rate(prior, &glickman_example_games(), 1.0).unwrap();

        assert_abs_diff_eq!(posterior.rating, 1464.06, epsilon = 0.01);
        assert_abs_diff_eq!(posterior.deviation, 151.52, epsilon = 0.01);
        assert_abs_diff_eq!(posterior.volatility, 0.05999, epsilon = 0.0001);
    }

    #[test]
    fn test_empty_opponents_refused() {
        let result = rate(Glicko2Rating::default(), &[], 1.0);

        assert_eq!(result, Err(SolverError::NoOpponents));
    }

    #[test]
    fn test_multiplier_scales_own_movement_only() {
        let prior = Glicko2Rating {
            rating: 1500.0,
            deviation: 200.0,
            volatility: 0.06
        };
        let games = glickman_example_games();

        let baseline = rate(prior, &games, 1.0).unwrap();
        let doubled = rate(prior, &games, 2.0).unwrap();

        // Rating movement doubles with the multiplier
        let baseline_delta = baseline.rating - prior.rating;
        let doubled_delta = doubled.rating - prior.rating;
        assert_abs_diff_eq!(doubled_delta, 2.0 * baseline_delta, epsilon = 1e-9);

        // Deviation and volatility are untouched by the multiplier
        assert_abs_diff_eq!(doubled.deviation, baseline.deviation, epsilon = 1e-12);
        assert_abs_diff_eq!(doubled.volatility, baseline.volatility, epsilon = 1e-12);
    }

    #[test]
    fn test_posterior_deviation_and_volatility_positive() {
        let prior = Glicko2Rating {
            rating: 2100.0,
            deviation: 45.0,
            volatility: 0.06
        };
        let games = vec![
            OpponentGame {
                rating: 1400.0,
                deviation: 350.0,
                score: 0.0
            };
            5
        ];

        // A heavy upset loss still produces a well-formed posterior
        let posterior = rate(prior, &games, 1.0).unwrap();

        assert!(posterior.deviation > 0.0);
        assert!(posterior.volatility > 0.0);
        assert!(posterior.rating < prior.rating);
    }

    #[test]
    fn test_win_reduces_deviation() {
        let prior = Glicko2Rating::default();
        let games = vec![OpponentGame {
            rating: 1500.0,
            deviation: 350.0,
            score: 1.0
        }];

        let posterior = rate(prior, &games, 1.0).unwrap();

        assert!(posterior.rating > prior.rating);
        assert!(posterior.deviation < prior.deviation);
    }

    #[test]
    fn test_fractional_team_score() {
        let prior = Glicko2Rating::default();
        let opponent = |score: f64| {
            vec![
                OpponentGame {
                    rating: 1500.0,
                    deviation: 350.0,
                    score
                };
                5
            ]
        };

        // A narrow win (16 rounds to 14) moves the rating less than a sweep
        let narrow = rate(prior, &opponent(16.0 / 30.0), 1.0).unwrap();
        let sweep = rate(prior, &opponent(1.0), 1.0).unwrap();

        assert!(narrow.rating > prior.rating);
        assert!(sweep.rating > narrow.rating);
    }

    #[test]
    fn test_win_probability_symmetry() {
        let p = win_probability(1650.0, 120.0, 1432.0, 87.0);
        let q = win_probability(1432.0, 87.0, 1650.0, 120.0);

        assert_abs_diff_eq!(p + q, 1.0, epsilon = 1e-12);
        assert!(p > 0.5);
    }

    #[test]
    fn test_win_probability_even_match() {
        let p = win_probability(1500.0, 350.0, 1500.0, 350.0);

        assert_abs_diff_eq!(p, 0.5, epsilon = 1e-12);
    }
}
