use crate::error::{Error, Result};

/// Streaming weighted mean with the last observed value.
///
/// Reset at the start of every train or validation phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStatistic {
    sum: f64,
    count: usize,
    last: Option<f64>,
}

impl RunningStatistic {
    pub fn new() -> RunningStatistic {
        RunningStatistic::default()
    }

    /// Adds `value` with multiplicity `weight`.
    pub fn update(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
        self.last = Some(value);
    }

    pub fn push(&mut self, value: f64) {
        self.update(value, 1);
    }

    pub fn average(&self) -> Result<f64> {
        if self.count == 0 {
            return Err(Error::EmptyStatistic);
        }
        Ok(self.sum / self.count as f64)
    }

    /// The most recent value, `0.0` before the first update.
    pub fn last(&self) -> f64 {
        self.last.unwrap_or(0.0)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        *self = RunningStatistic::default();
    }
}
