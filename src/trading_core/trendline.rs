//! Constrained Trendline Fitting
//!
//! Fits a support line (below every point) and a resistance line (above every
//! point) to a short window of CVD values.
//!
//! 1. Start from the ordinary least-squares slope of the window.
//! 2. Anchor each line on a pivot: the point with the largest residual for
//!    resistance, the smallest residual for support.
//! 3. Refine the slope with a 1-D descent on the sum of squared distances,
//!    rejecting any candidate that crosses a point (`LineFit::Infeasible`).
//!
//! The objective is discontinuous at the feasibility boundary, so the search
//! is local: deterministic for identical inputs, not guaranteed global.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How far a line may cross a point before the candidate is rejected
pub const FEASIBILITY_TOLERANCE: f64 = 1e-5;
/// Search stops once the step (in slope units) falls to this size
pub const MIN_STEP: f64 = 1e-4;
const INITIAL_STEP: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Support,
    Resistance,
}

/// Score of a candidate line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineFit {
    /// Sum of squared vertical distances (lower is better)
    Feasible(f64),
    /// The line crosses at least one point
    Infeasible,
}

impl LineFit {
    pub fn score(self) -> Option<f64> {
        match self {
            LineFit::Feasible(err) => Some(err),
            LineFit::Infeasible => None,
        }
    }

    pub fn is_feasible(self) -> bool {
        matches!(self, LineFit::Feasible(_))
    }

    /// Strictly better than `other`; infeasible never improves anything
    fn improves_on(self, other: LineFit) -> bool {
        match (self, other) {
            (LineFit::Feasible(a), LineFit::Feasible(b)) => a < b,
            (LineFit::Feasible(_), LineFit::Infeasible) => true,
            (LineFit::Infeasible, _) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendLine {
    pub slope: f64,
    pub intercept: f64,
    pub kind: LineKind,
}

impl TrendLine {
    /// Line with the given slope passing through `values[pivot]`
    pub fn through_pivot(kind: LineKind, slope: f64, pivot: usize, values: &[f64]) -> Self {
        Self {
            slope,
            intercept: -slope * pivot as f64 + values[pivot],
            kind,
        }
    }

    pub fn value_at(&self, x: usize) -> f64 {
        self.slope * x as f64 + self.intercept
    }

    /// The line evaluated at indices `0..n`
    pub fn points(&self, n: usize) -> Vec<f64> {
        (0..n).map(|x| self.value_at(x)).collect()
    }

    /// Feasibility and squared error of this line against `values`
    pub fn fit(&self, values: &[f64]) -> LineFit {
        let mut err = 0.0;
        for (x, &y) in values.iter().enumerate() {
            let diff = self.value_at(x) - y;
            let crosses = match self.kind {
                LineKind::Support => diff > FEASIBILITY_TOLERANCE,
                LineKind::Resistance => diff < -FEASIBILITY_TOLERANCE,
            };
            if crosses {
                return LineFit::Infeasible;
            }
            err += diff * diff;
        }
        LineFit::Feasible(err)
    }
}

/// Score a candidate slope anchored at `pivot`
pub fn check_trend_line(kind: LineKind, pivot: usize, slope: f64, values: &[f64]) -> LineFit {
    TrendLine::through_pivot(kind, slope, pivot, values).fit(values)
}

/// Least-squares slope of `values` against their index
pub fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denom = n * sum_xx - sum_x * sum_x;
    if denom == 0.0 {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}

/// Index of the first maximum (`want_max`) or first minimum
fn arg_extreme(values: impl Iterator<Item = f64>, want_max: bool) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        let better = match best {
            None => true,
            Some((_, b)) if want_max => v > b,
            Some((_, b)) => v < b,
        };
        if better {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i).unwrap_or(0)
}

/// Refine the slope of a line anchored at `pivot`, starting from `init_slope`
pub fn optimize_slope(kind: LineKind, pivot: usize, init_slope: f64, values: &[f64]) -> TrendLine {
    let n = values.len() as f64;
    let y_max = values.iter().copied().fold(f64::MIN, f64::max);
    let y_min = values.iter().copied().fold(f64::MAX, f64::min);
    let mut slope_unit = (y_max - y_min) / n;
    if !slope_unit.is_finite() {
        slope_unit = 0.0;
    }

    let mut step = INITIAL_STEP;
    let mut best_slope = init_slope;
    let mut best_fit = check_trend_line(kind, pivot, best_slope, values);
    let mut derivative = 0.0;
    let mut recompute_derivative = true;

    while step > MIN_STEP {
        if recompute_derivative {
            derivative = probe_derivative(kind, pivot, best_slope, best_fit, slope_unit, values);
            recompute_derivative = false;
        }

        let trial_slope = if derivative > 0.0 {
            best_slope - slope_unit * step
        } else {
            best_slope + slope_unit * step
        };
        let trial_fit = check_trend_line(kind, pivot, trial_slope, values);

        if trial_fit.improves_on(best_fit) {
            best_slope = trial_slope;
            best_fit = trial_fit;
            recompute_derivative = true;
        } else {
            step *= 0.5;
        }
    }

    let line = TrendLine::through_pivot(kind, best_slope, pivot, values);
    if best_fit.is_feasible() {
        line
    } else {
        // Rounding left the pivot line crossing a point: keep the slope and
        // slide the intercept onto the extreme point instead.
        envelope_at_slope(kind, best_slope, values)
    }
}

/// Change in score for a tiny positive slope move. Probes the negative side
/// when the positive probe is infeasible; zero when neither side is.
fn probe_derivative(
    kind: LineKind,
    pivot: usize,
    slope: f64,
    current: LineFit,
    slope_unit: f64,
    values: &[f64],
) -> f64 {
    let current = current.score().unwrap_or(f64::INFINITY);
    let probe = slope_unit * MIN_STEP;

    if let Some(up) = check_trend_line(kind, pivot, slope + probe, values).score() {
        return up - current;
    }
    match check_trend_line(kind, pivot, slope - probe, values).score() {
        Some(down) => current - down,
        None => 0.0,
    }
}

fn envelope_at_slope(kind: LineKind, slope: f64, values: &[f64]) -> TrendLine {
    let offsets = values.iter().enumerate().map(|(x, &y)| y - slope * x as f64);
    let intercept = match kind {
        LineKind::Support => offsets.fold(f64::MAX, f64::min),
        LineKind::Resistance => offsets.fold(f64::MIN, f64::max),
    };
    TrendLine { slope, intercept, kind }
}

/// Direction of a trendline breakout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breakout {
    Bullish,
    Bearish,
}

impl fmt::Display for Breakout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breakout::Bullish => write!(f, "bullish"),
            Breakout::Bearish => write!(f, "bearish"),
        }
    }
}

/// Support and resistance fitted to one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trendlines {
    pub support: TrendLine,
    pub resistance: TrendLine,
}

impl Trendlines {
    /// Fit both lines; `None` for an empty window
    pub fn fit(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let slope = ols_slope(values);
        let residuals = || values.iter().enumerate().map(move |(x, &y)| y - slope * x as f64);
        let upper_pivot = arg_extreme(residuals(), true);
        let lower_pivot = arg_extreme(residuals(), false);

        Some(Self {
            support: optimize_slope(LineKind::Support, lower_pivot, slope, values),
            resistance: optimize_slope(LineKind::Resistance, upper_pivot, slope, values),
        })
    }

    /// Classify the newest value against both lines. The tolerance is a
    /// fraction of the resistance level; bullish wins ties.
    pub fn classify(&self, values: &[f64], tolerance: f64) -> Option<Breakout> {
        let last = values.len().checked_sub(1)?;
        let newest = values[last];
        let resistance = self.resistance.value_at(last);
        let support = self.support.value_at(last);
        let tol = resistance.abs() * tolerance;

        if newest >= resistance - tol {
            Some(Breakout::Bullish)
        } else if newest <= support + tol {
            Some(Breakout::Bearish)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_envelope(lines: &Trendlines, values: &[f64]) {
        assert!(lines.support.fit(values).is_feasible(), "support crosses {:?}", values);
        assert!(lines.resistance.fit(values).is_feasible(), "resistance crosses {:?}", values);
        for (x, &y) in values.iter().enumerate() {
            assert!(y - lines.support.value_at(x) >= -FEASIBILITY_TOLERANCE);
            assert!(y - lines.resistance.value_at(x) <= FEASIBILITY_TOLERANCE);
        }
    }

    #[test]
    fn test_ols_slope() {
        assert!((ols_slope(&[1.0, 2.0, 3.0, 4.0, 5.0]) - 1.0).abs() < 1e-12);
        assert!((ols_slope(&[0.0, 10.0, 20.0, 30.0, 60.0]) - 14.0).abs() < 1e-12);
        assert_eq!(ols_slope(&[42.0]), 0.0);
    }

    #[test]
    fn test_check_trend_line_rejects_crossing() {
        let values = [0.0, 10.0, 20.0, 30.0, 60.0];
        // Flat support through 60 sits above every other point
        assert_eq!(check_trend_line(LineKind::Support, 4, 0.0, &values), LineFit::Infeasible);
        // Flat resistance through 0 sits below every other point
        assert_eq!(check_trend_line(LineKind::Resistance, 0, 0.0, &values), LineFit::Infeasible);
        // Support through the origin with slope 5 touches nothing above
        let fit = check_trend_line(LineKind::Support, 0, 5.0, &values);
        assert_eq!(fit, LineFit::Feasible(25.0 + 100.0 + 225.0 + 1600.0));
    }

    #[test]
    fn test_rising_window_is_bullish() {
        let values = [0.0, 10.0, 20.0, 30.0, 60.0];
        let lines = Trendlines::fit(&values).unwrap();
        assert_envelope(&lines, &values);

        // Constrained optimum for resistance through (4, 60) is slope 15
        assert!((lines.resistance.slope - 15.0).abs() < 0.01);
        assert!(lines.resistance.slope > 0.0);
        assert_eq!(lines.classify(&values, 0.001), Some(Breakout::Bullish));
    }

    #[test]
    fn test_collapse_is_bearish() {
        let values = [0.0, 10.0, 20.0, 30.0, -20.0];
        let lines = Trendlines::fit(&values).unwrap();
        assert_envelope(&lines, &values);

        // Support through (4, -20) must keep slope >= -5 to stay under (0, 0)
        assert!((lines.support.slope + 5.0).abs() < 0.01);
        assert!(lines.support.slope < 0.0);
        assert_eq!(lines.classify(&values, 0.001), Some(Breakout::Bearish));
    }

    #[test]
    fn test_inside_channel_is_none() {
        let values = [0.0, 40.0, 0.0, 40.0, 20.0];
        let lines = Trendlines::fit(&values).unwrap();
        assert_envelope(&lines, &values);
        assert_eq!(lines.classify(&values, 0.001), None);
    }

    #[test]
    fn test_flat_window_terminates() {
        let values = [250.0; 5];
        let lines = Trendlines::fit(&values).unwrap();
        assert_envelope(&lines, &values);
        assert_eq!(lines.support.slope, 0.0);
        assert_eq!(lines.resistance.slope, 0.0);
        assert_eq!(lines.support.points(5), vec![250.0; 5]);
        // Newest sits on resistance, bullish wins the tie
        assert_eq!(lines.classify(&values, 0.001), Some(Breakout::Bullish));
    }

    #[test]
    fn test_optimizer_improves_on_ols() {
        let values = [0.0, 10.0, 20.0, 30.0, -20.0];
        let init = ols_slope(&values);
        let line = optimize_slope(LineKind::Support, 4, init, &values);
        let start = check_trend_line(LineKind::Support, 4, init, &values).score().unwrap();
        let end = line.fit(&values).score().unwrap();
        assert!(end < start);
    }

    #[test]
    fn test_random_windows_stay_feasible() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let mut cvd = rng.gen_range(-50_000i64..50_000);
            let values: Vec<f64> = (0..5)
                .map(|_| {
                    cvd += rng.gen_range(-800i64..800);
                    cvd as f64
                })
                .collect();

            let lines = Trendlines::fit(&values).unwrap();
            assert_envelope(&lines, &values);
        }
    }

    #[test]
    fn test_empty_window() {
        assert!(Trendlines::fit(&[]).is_none());
    }
}
