//! Tick Timing Estimation
//!
//! Predicts when the next server tick will arrive.
//!
//! - `TickEstimator`: online least-squares fit of local monotonic offset
//!   (microseconds) against server elapsed time (milliseconds)
//! - `estimate_tick_time_diff`: percentile bounds on the gap between ticks
//! - `estimate_next_tick`: a lower/upper window for the next tick
//!
//! A fresh estimator is built at every round start.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::growth::growth;
use crate::game::state::TickSample;

/// Lower percentile used once enough gaps are known.
const LOWER_PERCENTILE: f64 = 0.05;

/// Upper percentile used once enough gaps are known.
const UPPER_PERCENTILE: f64 = 0.95;

/// Estimator errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EstimatorError {
    /// Fewer than two distinct elapsed samples.
    #[error("insufficient data: {samples} sample(s), need two distinct elapsed values")]
    InsufficientData {
        /// Samples added so far.
        samples: u64,
    },
}

/// Incremental least-squares line `y = alpha + beta * x`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickEstimator {
    n: u64,
    sum_xy: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    fit: Option<(f64, f64)>,
}

impl TickEstimator {
    /// Empty estimator with every sum at zero.
    pub fn new() -> Self {
        Self {
            n: 0,
            sum_xy: 0.0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            fit: None,
        }
    }

    /// Estimator seeded with the round origin `(0, 0)`.
    pub fn seeded() -> Self {
        let mut estimator = Self::new();
        estimator.add(0.0, 0.0);
        estimator
    }

    /// Add an `(elapsed_ms, monotonic_offset_us)` sample and refit.
    pub fn add(&mut self, x: f64, y: f64) {
        self.n += 1;
        self.sum_xy += x * y;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.fit = self.solve();
    }

    fn solve(&self) -> Option<(f64, f64)> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        let denominator = self.sum_xx - self.sum_x * self.sum_x / n;
        // All x identical: the slope is undefined.
        if denominator.abs() <= f64::EPSILON * self.sum_xx.abs().max(1.0) {
            return None;
        }
        let beta = (self.sum_xy - self.sum_x * self.sum_y / n) / denominator;
        let alpha = (self.sum_y - beta * self.sum_x) / n;
        if alpha.is_finite() && beta.is_finite() {
            Some((alpha, beta))
        } else {
            None
        }
    }

    /// Samples added.
    pub fn samples(&self) -> u64 {
        self.n
    }

    /// Intercept, once the fit is defined.
    pub fn alpha(&self) -> Option<f64> {
        self.fit.map(|(alpha, _)| alpha)
    }

    /// Slope, once the fit is defined.
    pub fn beta(&self) -> Option<f64> {
        self.fit.map(|(_, beta)| beta)
    }

    /// Projected monotonic offset for elapsed `x`.
    pub fn evaluate(&self, x: f64) -> Result<f64, EstimatorError> {
        self.fit
            .map(|(alpha, beta)| alpha + beta * x)
            .ok_or(EstimatorError::InsufficientData { samples: self.n })
    }
}

/// Bounds on the gap between consecutive ticks, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickInterval {
    /// Short end of the expected gap.
    pub lower: u64,
    /// Long end of the expected gap.
    pub upper: u64,
}

/// Window in which the next tick should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextTickEstimate {
    /// Earliest expected tick.
    pub lower: TickSample,
    /// Latest expected tick.
    pub upper: TickSample,
}

/// Estimate the inter-tick gap from a round's tick history.
pub fn estimate_tick_time_diff(ticks: &[TickSample]) -> TickInterval {
    let mut deltas: Vec<u64> = ticks
        .windows(2)
        .map(|pair| pair[1].elapsed_ms.saturating_sub(pair[0].elapsed_ms))
        .collect();

    match deltas.len() {
        0 => TickInterval::default(),
        1 => TickInterval {
            lower: deltas[0],
            upper: deltas[0],
        },
        2 => TickInterval {
            lower: deltas[0].min(deltas[1]),
            upper: deltas[0].max(deltas[1]),
        },
        count => {
            deltas.sort_unstable();
            let lower = (LOWER_PERCENTILE * count as f64).floor() as usize;
            let upper = (UPPER_PERCENTILE * count as f64).floor() as usize;
            TickInterval {
                lower: deltas[lower.min(count - 1)],
                upper: deltas[upper.min(count - 1)],
            }
        }
    }
}

/// Project the next tick from the last one.
pub fn estimate_next_tick(
    last: &TickSample,
    interval: TickInterval,
    estimator: &TickEstimator,
) -> Result<NextTickEstimate, EstimatorError> {
    let project = |gap: u64| -> Result<TickSample, EstimatorError> {
        let elapsed_ms = last.elapsed_ms.saturating_add(gap);
        let offset = estimator.evaluate(elapsed_ms as f64)?;
        Ok(TickSample {
            elapsed_ms,
            growth: growth(elapsed_ms),
            monotonic_offset_us: offset.round() as i64,
        })
    };

    Ok(NextTickEstimate {
        lower: project(interval.lower)?,
        upper: project(interval.upper)?,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks_from_deltas(deltas: &[u64]) -> Vec<TickSample> {
        let mut elapsed = 0;
        let mut ticks = vec![TickSample {
            elapsed_ms: 0,
            growth: 100,
            monotonic_offset_us: 0,
        }];
        for delta in deltas {
            elapsed += delta;
            ticks.push(TickSample {
                elapsed_ms: elapsed,
                growth: growth(elapsed),
                monotonic_offset_us: elapsed as i64 * 1000,
            });
        }
        ticks
    }

    #[test]
    fn test_sums_start_at_zero() {
        let estimator = TickEstimator::new();
        assert_eq!(estimator.samples(), 0);
        assert_eq!(estimator, TickEstimator::default());
    }

    #[test]
    fn test_single_point_no_nan() {
        let mut estimator = TickEstimator::new();
        estimator.add(1200.0, 1_250_000.0);

        assert_eq!(estimator.alpha(), None);
        assert_eq!(estimator.beta(), None);
        assert_eq!(
            estimator.evaluate(1000.0),
            Err(EstimatorError::InsufficientData { samples: 1 })
        );
    }

    #[test]
    fn test_seed_point_alone_is_insufficient() {
        let estimator = TickEstimator::seeded();
        assert!(estimator.evaluate(0.0).is_err());
    }

    #[test]
    fn test_identical_x_is_insufficient() {
        let mut estimator = TickEstimator::new();
        estimator.add(5000.0, 10.0);
        estimator.add(5000.0, 20.0);
        estimator.add(5000.0, 30.0);
        assert!(matches!(
            estimator.evaluate(1.0),
            Err(EstimatorError::InsufficientData { samples: 3 })
        ));
    }

    #[test]
    fn test_two_point_interpolation() {
        let mut estimator = TickEstimator::seeded();
        estimator.add(5000.0, 5100.0);

        let y = estimator.evaluate(2500.0).unwrap();
        assert!((y - 2550.0).abs() < 1e-9);
        assert!((estimator.beta().unwrap() - 1.02).abs() < 1e-12);
        assert!(estimator.alpha().unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_fit_recovers_line_through_noise() {
        let mut estimator = TickEstimator::new();
        for (i, jitter) in [30.0, -25.0, 10.0, -40.0, 20.0, 5.0].iter().enumerate() {
            let x = (i as f64 + 1.0) * 150.0;
            estimator.add(x, 1000.0 * x + 8_000.0 + jitter);
        }
        let beta = estimator.beta().unwrap();
        let alpha = estimator.alpha().unwrap();
        assert!((beta - 1000.0).abs() < 1.0, "beta {}", beta);
        assert!((alpha - 8_000.0).abs() < 100.0, "alpha {}", alpha);
    }

    #[test]
    fn test_interval_no_ticks() {
        assert_eq!(estimate_tick_time_diff(&[]), TickInterval::default());
        assert_eq!(estimate_tick_time_diff(&ticks_from_deltas(&[])), TickInterval::default());
    }

    #[test]
    fn test_interval_two_ticks() {
        let interval = estimate_tick_time_diff(&ticks_from_deltas(&[150]));
        assert_eq!(interval, TickInterval { lower: 150, upper: 150 });
    }

    #[test]
    fn test_interval_three_ticks() {
        let interval = estimate_tick_time_diff(&ticks_from_deltas(&[180, 140]));
        assert_eq!(interval, TickInterval { lower: 140, upper: 180 });
    }

    #[test]
    fn test_interval_percentiles() {
        let interval = estimate_tick_time_diff(&ticks_from_deltas(&[250, 250, 260, 240, 255]));
        assert_eq!(interval, TickInterval { lower: 240, upper: 260 });
    }

    #[test]
    fn test_interval_percentiles_trim_outliers() {
        let mut deltas = vec![150; 40];
        deltas[3] = 20;
        deltas[17] = 900;
        let interval = estimate_tick_time_diff(&ticks_from_deltas(&deltas));
        // count 40: indices 2 and 38 skip one outlier at each end
        assert_eq!(interval, TickInterval { lower: 150, upper: 150 });
    }

    #[test]
    fn test_next_tick_window() {
        let ticks = ticks_from_deltas(&[150, 160, 150, 140, 150]);
        let mut estimator = TickEstimator::seeded();
        for tick in &ticks[1..] {
            estimator.add(tick.elapsed_ms as f64, tick.monotonic_offset_us as f64);
        }
        let last = ticks.last().unwrap();
        let interval = estimate_tick_time_diff(&ticks);
        let next = estimate_next_tick(last, interval, &estimator).unwrap();

        assert_eq!(next.lower.elapsed_ms, last.elapsed_ms + 140);
        assert_eq!(next.upper.elapsed_ms, last.elapsed_ms + 160);
        assert_eq!(next.lower.growth, growth(next.lower.elapsed_ms));
        assert_eq!(next.upper.monotonic_offset_us, (last.elapsed_ms as i64 + 160) * 1000);
    }

    #[test]
    fn test_next_tick_saturates_elapsed() {
        let last = TickSample {
            elapsed_ms: u64::MAX - 10,
            growth: growth(u64::MAX - 10),
            monotonic_offset_us: i64::MAX,
        };
        let mut estimator = TickEstimator::seeded();
        estimator.add(1000.0, 1_000_000.0);
        let interval = TickInterval { lower: 5, upper: 150 };

        let next = estimate_next_tick(&last, interval, &estimator).unwrap();
        assert_eq!(next.lower.elapsed_ms, u64::MAX - 5);
        assert_eq!(next.upper.elapsed_ms, u64::MAX);
        assert_eq!(next.upper.growth, u64::MAX);
    }

    #[test]
    fn test_next_tick_needs_fit() {
        let tick = TickSample {
            elapsed_ms: 0,
            growth: 100,
            monotonic_offset_us: 0,
        };
        let result = estimate_next_tick(&tick, TickInterval::default(), &TickEstimator::seeded());
        assert!(result.is_err());
    }
}
