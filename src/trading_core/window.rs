//! Rolling window of the last N sealed bars
//!
//! Three synchronized FIFO buffers (CVD, close, volume). Pushing onto a full
//! window evicts the oldest entry of every buffer.

use std::collections::VecDeque;

use super::bars::Bar;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    cvd: VecDeque<i64>,
    closes: VecDeque<f64>,
    volumes: VecDeque<u64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            cvd: VecDeque::with_capacity(capacity),
            closes: VecDeque::with_capacity(capacity),
            volumes: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, bar: &Bar) {
        if self.cvd.len() == self.capacity {
            self.cvd.pop_front();
            self.closes.pop_front();
            self.volumes.pop_front();
        }
        self.cvd.push_back(bar.cvd);
        self.closes.push_back(bar.close);
        self.volumes.push_back(bar.volume);
    }

    pub fn len(&self) -> usize {
        self.cvd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cvd.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.cvd.len() == self.capacity
    }

    /// CVD values oldest to newest, as reals for the trendline fitter
    pub fn cvd_series(&self) -> Vec<f64> {
        self.cvd.iter().map(|&v| v as f64).collect()
    }

    pub fn closes(&self) -> &VecDeque<f64> {
        &self.closes
    }

    pub fn volumes(&self) -> &VecDeque<u64> {
        &self.volumes
    }

    pub fn latest_close(&self) -> Option<f64> {
        self.closes.back().copied()
    }

    pub fn latest_volume(&self) -> Option<u64> {
        self.volumes.back().copied()
    }

    /// Closes of every bar except the newest
    pub fn prior_closes(&self) -> impl Iterator<Item = f64> + '_ {
        let n = self.closes.len().saturating_sub(1);
        self.closes.iter().take(n).copied()
    }

    /// Volumes of every bar except the newest
    pub fn prior_volumes(&self) -> impl Iterator<Item = u64> + '_ {
        let n = self.volumes.len().saturating_sub(1);
        self.volumes.iter().take(n).copied()
    }

    pub fn min_close(&self) -> Option<f64> {
        self.closes.iter().copied().reduce(f64::min)
    }

    pub fn max_close(&self) -> Option<f64> {
        self.closes.iter().copied().reduce(f64::max)
    }
}
