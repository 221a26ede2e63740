/// Value given to every element of a constant score vector by [`min_max`].
pub const CONSTANT_SCORE: f32 = 0.5;

/// Rescales `scores` to `[0, 1]` so the minimum maps to 0 and the maximum to 1.
///
/// A vector whose values are all equal has no range to divide by; every
/// element then becomes [`CONSTANT_SCORE`].
pub fn min_max(scores: &[f32]) -> Vec<f32> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![CONSTANT_SCORE; scores.len()];
    }
    scores.iter().map(|&s| (s - min) / range).collect()
}

/// `old * (1 - alpha) + new * alpha`, elementwise, after min-max normalizing both sides.
pub fn interpolate(old: &[f32], new: &[f32], alpha: f32) -> Vec<f32> {
    debug_assert_eq!(old.len(), new.len());
    let old = min_max(old);
    let new = min_max(new);
    old.iter()
        .zip(&new)
        .map(|(o, n)| o * (1.0 - alpha) + n * alpha)
        .collect()
}
