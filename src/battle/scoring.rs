//! Elo-style rating deltas applied alongside rewards (K-factor 32).

/// Returns (delta_p1, delta_p2) given current ratings and the winner.
/// `winner` = 0 → draw, 1 → p1, 2 → p2.
pub fn rating_delta(r1: i32, r2: i32, winner: u8, k: f32) -> (i32, i32) {
    let expected1 = 1.0 / (1.0 + 10f32.powf((r2 - r1) as f32 / 400.0));
    let expected2 = 1.0 - expected1;
    let (score1, score2) = match winner {
        0 => (0.5, 0.5),
        1 => (1.0, 0.0),
        2 => (0.0, 1.0),
        _ => unreachable!(),
    };
    let d1 = (k * (score1 - expected1)).round() as i32;
    let d2 = (k * (score2 - expected2)).round() as i32;
    (d1, d2)
}
