//! Breakout confirmation filters
//!
//! A raw breakout must survive every filter, evaluated in a fixed order:
//! reversal, trendline slope, price confirmation, volume confirmation.
//! The first filter that fires vetoes the signal for this bar.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::trendline::{Breakout, Trendlines};
use super::window::RollingWindow;

/// Why a raw breakout was downgraded to no signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Veto {
    /// Same direction as the last taken entry
    AwaitingReversal,
    ResistanceSlopeNotPositive,
    SupportSlopeNotNegative,
    PriceBelowRecentHigh,
    PriceAboveRecentLow,
    VolumeBelowAverage,
}

impl Veto {
    /// Stable reason code for reports
    pub fn code(self) -> &'static str {
        match self {
            Veto::AwaitingReversal => "awaiting_reversal",
            Veto::ResistanceSlopeNotPositive => "resistance_slope_not_positive",
            Veto::SupportSlopeNotNegative => "support_slope_not_negative",
            Veto::PriceBelowRecentHigh => "price_below_recent_high",
            Veto::PriceAboveRecentLow => "price_above_recent_low",
            Veto::VolumeBelowAverage => "volume_below_average",
        }
    }
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Veto::AwaitingReversal => "waiting for reversal from last entry",
            Veto::ResistanceSlopeNotPositive => "resistance slope not positive",
            Veto::SupportSlopeNotNegative => "support slope not negative",
            Veto::PriceBelowRecentHigh => "price did not exceed recent highs",
            Veto::PriceAboveRecentLow => "price did not drop below recent lows",
            Veto::VolumeBelowAverage => "volume below recent average",
        };
        write!(f, "{}", text)
    }
}

/// Everything the filters look at for one bar
pub struct FilterContext<'a> {
    pub lines: &'a Trendlines,
    pub window: &'a RollingWindow,
    pub last_signal: Option<Breakout>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Reversal,
    Slope,
    PriceConfirmation,
    VolumeConfirmation,
}

/// Evaluation order of the chain
pub const FILTER_CHAIN: [Filter; 4] = [
    Filter::Reversal,
    Filter::Slope,
    Filter::PriceConfirmation,
    Filter::VolumeConfirmation,
];

impl Filter {
    /// `Some(veto)` when this filter rejects `breakout`
    pub fn check(self, breakout: Breakout, ctx: &FilterContext<'_>) -> Option<Veto> {
        match self {
            Filter::Reversal => {
                (ctx.last_signal == Some(breakout)).then_some(Veto::AwaitingReversal)
            }
            Filter::Slope => match breakout {
                Breakout::Bullish if ctx.lines.resistance.slope <= 0.0 => {
                    Some(Veto::ResistanceSlopeNotPositive)
                }
                Breakout::Bearish if ctx.lines.support.slope >= 0.0 => {
                    Some(Veto::SupportSlopeNotNegative)
                }
                _ => None,
            },
            Filter::PriceConfirmation => {
                let close = ctx.window.latest_close()?;
                match breakout {
                    Breakout::Bullish => {
                        let recent_high = ctx.window.prior_closes().reduce(f64::max)?;
                        (close <= recent_high).then_some(Veto::PriceBelowRecentHigh)
                    }
                    Breakout::Bearish => {
                        let recent_low = ctx.window.prior_closes().reduce(f64::min)?;
                        (close >= recent_low).then_some(Veto::PriceAboveRecentLow)
                    }
                }
            }
            Filter::VolumeConfirmation => {
                let volume = ctx.window.latest_volume()?;
                let prior: Vec<u64> = ctx.window.prior_volumes().collect();
                if prior.is_empty() {
                    return None;
                }
                let avg = prior.iter().sum::<u64>() as f64 / prior.len() as f64;
                (volume as f64 <= avg).then_some(Veto::VolumeBelowAverage)
            }
        }
    }
}

/// Run the chain; `Ok` carries the confirmed breakout, `Err` the first veto
pub fn apply_filters(breakout: Breakout, ctx: &FilterContext<'_>) -> Result<Breakout, Veto> {
    for filter in FILTER_CHAIN {
        if let Some(veto) = filter.check(breakout, ctx) {
            return Err(veto);
        }
    }
    Ok(breakout)
}
