// Glicko-2 constants (Glickman's published defaults)
pub const GLICKO_SCALE: f64 = 173.7178;
pub const DEFAULT_RATING: f64 = 1500.0;
pub const DEFAULT_DEVIATION: f64 = 350.0;
pub const DEFAULT_VOLATILITY: f64 = 0.06;
pub const TAU: f64 = 0.5;
pub const CONVERGENCE_TOLERANCE: f64 = 0.0001;
pub const MAX_VOLATILITY_ITERATIONS: u32 = 100;
// Team adaptation constants
pub const TEAM_SIZE: f64 = 5.0;
pub const DEFAULT_GAMMA: f64 = 1.0;
// Rounds of telemetry required before a damage share is trusted
pub const MIN_ROUNDS_FOR_TDP: i32 = 12;
