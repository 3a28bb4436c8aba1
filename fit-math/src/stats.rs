//! Statistical helpers for counting experiments

/// Binomial efficiency estimate with its standard error.
///
/// # Arguments
///
/// * `passed` - Number of successful trials
/// * `total` - Number of trials
///
/// # Returns
///
/// `Some((efficiency, error))` with `error = sqrt(e (1 - e) / total)`, or
/// `None` when there were no trials.
pub fn binomial_efficiency(passed: u64, total: u64) -> Option<(f64, f64)> {
    if total == 0 {
        return None;
    }
    let n = total as f64;
    let efficiency = passed as f64 / n;
    let error = (efficiency * (1.0 - efficiency) / n).max(0.0).sqrt();
    Some((efficiency, error))
}
