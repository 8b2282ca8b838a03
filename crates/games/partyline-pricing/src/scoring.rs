/// Points for a perfect guess, before bonuses.
pub const MAX_PROXIMITY_POINTS: i64 = 1000;

/// Bonus for the closest guess of a round.
pub const CLOSEST_BONUS: i64 = 200;

/// Proximity score: full points for an exact guess, falling linearly to 0
/// at 100% relative error.
pub fn proximity_points(guess: f64, price: f64) -> i64 {
    if !guess.is_finite() || price <= 0.0 {
        return 0;
    }
    let error = ((guess - price).abs() / price).min(1.0);
    ((1.0 - error) * MAX_PROXIMITY_POINTS as f64).round() as i64
}
