//! Quorum and validity-window arithmetic shared by the lock and the ID
//! generator. Kept as pure functions so the formulas are unit-testable
//! without any I/O.

use std::time::Duration;

/// Fixed allowance for the minimum clock step between masters.
const DRIFT_EPSILON: Duration = Duration::from_millis(2);

/// The strict majority for `n` masters.
#[must_use]
pub fn quorum(n: usize) -> usize {
    n / 2 + 1
}

/// Whether `granted` responses out of `n` masters constitute a majority.
#[must_use]
pub fn has_quorum(granted: usize, n: usize) -> bool {
    granted >= quorum(n)
}

/// Clock-drift allowance for a lease of the given length:
/// `auto_release_time * factor + 2ms`.
#[must_use]
pub fn drift(auto_release_time: Duration, clock_drift_factor: f64) -> Duration {
    auto_release_time.mul_f64(clock_drift_factor) + DRIFT_EPSILON
}

/// The portion of a lease still safely usable after accounting for the time
/// already spent and for clock drift. Saturates at zero.
#[must_use]
pub fn validity_window(
    auto_release_time: Duration,
    elapsed: Duration,
    clock_drift_factor: f64,
) -> Duration {
    auto_release_time
        .saturating_sub(elapsed)
        .saturating_sub(drift(auto_release_time, clock_drift_factor))
}
