//! # Accrual Failure Detector
//!
//! Every remote endpoint owns one [`AccrualFailureDetector`]. Arrivals of fresh heartbeat state
//! are recorded as inter-arrival samples in a bounded window. Instead of a binary alive/dead
//! answer, the detector yields a suspicion level `phi`: the negative decimal logarithm of the
//! probability that a heartbeat is still on its way after the observed silence, assuming the
//! intervals are normally distributed around the estimated center of the window.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use snafu::location;

use crate::error::{Error, Result};

/// A validated phi value above which an endpoint is convicted.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct ConvictThreshold(f64);

impl ConvictThreshold {
    pub const MIN: f64 = 5.0;
    pub const MAX: f64 = 16.0;
    pub const DEFAULT: f64 = 8.0;

    /// Creates a threshold, failing with [`Error::Config`] outside of `[5, 16]`.
    pub fn new(value: f64) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(Error::Config {
                message: format!(
                    "convict threshold {value} must lie in [{}, {}]",
                    Self::MIN,
                    Self::MAX
                ),
                location: location!(),
            });
        }

        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for ConvictThreshold {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// How the center of the inter-arrival distribution is estimated.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EstimationStrategy {
    /// Plain accrual detection, the center is the sample mean of the window.
    Mean,
    /// Adaptive detection, the center is an online estimate of the given quantile,
    /// moved by `step` milliseconds per sample.
    Quantile { quantile: f64, step: f64 },
}

#[derive(Clone, Debug)]
pub struct AccrualFailureDetector {
    window: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    sum_of_squares: f64,
    last_arrival: Option<Instant>,
    min_std_deviation: f64,
    bootstrap_interval: f64,
    estimation: EstimationStrategy,
    quantile_estimate: f64,
}

impl AccrualFailureDetector {
    pub fn new(
        capacity: usize,
        min_std_deviation: Duration,
        bootstrap_interval: Duration,
        estimation: EstimationStrategy,
    ) -> Self {
        let bootstrap_interval = bootstrap_interval.as_secs_f64() * 1000.0;

        Self {
            window: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            sum: 0.0,
            sum_of_squares: 0.0,
            last_arrival: None,
            min_std_deviation: min_std_deviation.as_secs_f64() * 1000.0,
            bootstrap_interval,
            estimation,
            quantile_estimate: bootstrap_interval,
        }
    }

    /// Records the arrival of a heartbeat at `now`.
    ///
    /// The first arrival only sets the baseline and seeds the window with the bootstrap interval.
    pub fn record(&mut self, now: Instant) {
        let interval = match self.last_arrival {
            Some(last) => now.saturating_duration_since(last).as_secs_f64() * 1000.0,
            None => self.bootstrap_interval,
        };
        self.last_arrival = Some(now);
        self.push(interval);
    }

    /// Returns the suspicion level at `now`, `0.0` if nothing was recorded yet.
    pub fn phi(&self, now: Instant) -> f64 {
        let Some(last) = self.last_arrival else {
            return 0.0;
        };
        if self.window.is_empty() {
            return 0.0;
        }

        let elapsed = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
        let std_deviation = self.std_deviation().max(self.min_std_deviation);
        let y = (elapsed - self.center()) / std_deviation;
        let e = (-y * (1.5976 + 0.070566 * y * y)).exp();

        let phi = if elapsed > self.center() {
            -(e / (1.0 + e)).log10()
        } else {
            -(1.0 - 1.0 / (1.0 + e)).log10()
        };

        phi.max(0.0)
    }

    /// Returns `true` if the suspicion level at `now` exceeds `threshold`.
    pub fn should_convict(&self, now: Instant, threshold: ConvictThreshold) -> bool {
        self.phi(now) > threshold.value()
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.sum / self.window.len() as f64
    }

    fn center(&self) -> f64 {
        match self.estimation {
            EstimationStrategy::Mean => self.mean(),
            EstimationStrategy::Quantile { .. } => self.quantile_estimate,
        }
    }

    fn std_deviation(&self) -> f64 {
        let n = self.window.len() as f64;
        if n < 2.0 {
            return 0.0;
        }
        let mean = self.sum / n;
        let variance = (self.sum_of_squares / n - mean * mean).max(0.0);
        variance.sqrt()
    }

    fn push(&mut self, interval: f64) {
        if self.window.len() == self.capacity {
            if let Some(evicted) = self.window.pop_front() {
                self.sum -= evicted;
                self.sum_of_squares -= evicted * evicted;
            }
        }
        self.window.push_back(interval);
        self.sum += interval;
        self.sum_of_squares += interval * interval;

        if let EstimationStrategy::Quantile { quantile, step } = self.estimation {
            let below = if interval <= self.quantile_estimate { 1.0 } else { 0.0 };
            self.quantile_estimate = (self.quantile_estimate + step * (quantile - below)).max(0.0);
        }
    }
}
