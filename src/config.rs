//! Configuration for the signal engine

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::trading_core::ColorMode;

/// Strategy parameters for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Number of sealed bars in each trendline window
    pub window_size: usize,

    /// Breakout tolerance as a fraction of the resistance level (0.001 = 0.1%)
    pub breakout_tolerance: f64,

    /// Reward:risk multiple for the target
    pub r_multiple: f64,

    /// Bar width in seconds
    pub bar_interval_secs: u64,

    /// CVD color rule for sealed bars
    pub color_mode: ColorMode,

    /// Forget the last entry direction once a position closes, allowing an
    /// immediate same-direction re-entry
    pub reset_reversal_on_exit: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            breakout_tolerance: 0.001,
            r_multiple: 2.0,
            bar_interval_secs: 60,
            color_mode: ColorMode::Strong,
            reset_reversal_on_exit: false,
        }
    }
}

impl StrategyConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            bail!("window_size must be at least 2, got {}", self.window_size);
        }
        if self.bar_interval_secs == 0 {
            bail!("bar_interval_secs must be positive");
        }
        if !(self.r_multiple.is_finite() && self.r_multiple > 0.0) {
            bail!("r_multiple must be a positive number, got {}", self.r_multiple);
        }
        if !(self.breakout_tolerance.is_finite() && self.breakout_tolerance >= 0.0) {
            bail!(
                "breakout_tolerance must be a non-negative number, got {}",
                self.breakout_tolerance
            );
        }
        Ok(())
    }
}
