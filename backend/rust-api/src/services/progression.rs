use crate::models::Attempt;
use crate::services::analyzer;

pub const MAX_LEVEL: i32 = 3;

/// Previous score ratio at or above this resets the level to 1.
const MASTERY_RATIO: f64 = 0.999;

/// Decides the next hint specificity level from the previous attempt in the
/// same context. Monotone escalation capped at 3; mastery resets to 1.
pub fn decide_level(previous: Option<&Attempt>) -> i32 {
    let Some(prev) = previous else {
        return 1;
    };
    if analyzer::safe_ratio(prev.score, prev.max_score) >= MASTERY_RATIO {
        return 1;
    }
    let prev_level = prev.hint_level.unwrap_or(1);
    (prev_level + 1).clamp(1, MAX_LEVEL)
}
