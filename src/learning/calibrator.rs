//! Per-dimension confidence calibration.
//!
//! Tracks EMAs of predicted confidence and realized outcome per
//! dimension; the ratio becomes a multiplicative correction applied to
//! future raw confidences.

use serde::{Deserialize, Serialize};

use crate::utils::numerics::{safe_divide, safe_finite};

const FACTOR_MIN: f64 = 0.1;
const FACTOR_MAX: f64 = 3.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfidenceCalibrator {
    predicted: Vec<f64>,
    actual: Vec<f64>,
    counts: Vec<u64>,
    rate: f64,
}

impl ConfidenceCalibrator {
    pub fn new(n: usize) -> Self {
        ConfidenceCalibrator {
            predicted: vec![0.0; n],
            actual: vec![0.0; n],
            counts: vec![0; n],
            rate: 0.1,
        }
    }

    pub fn dims(&self) -> usize {
        self.predicted.len()
    }

    /// Feed one (predicted confidence, realized outcome) pair, both
    /// mapped into [0,1] by the caller.
    pub fn update(&mut self, dim: usize, predicted: f64, actual: f64) {
        if dim >= self.dims() {
            return;
        }
        let p = safe_finite(predicted, 0.0).clamp(0.0, 1.0);
        let a = safe_finite(actual, 0.0).clamp(0.0, 1.0);
        if self.counts[dim] == 0 {
            self.predicted[dim] = p;
            self.actual[dim] = a;
        } else {
            self.predicted[dim] = (1.0 - self.rate) * self.predicted[dim] + self.rate * p;
            self.actual[dim] = (1.0 - self.rate) * self.actual[dim] + self.rate * a;
        }
        self.counts[dim] += 1;
    }

    /// Multiplicative correction for a dimension, clamped so one bad
    /// stretch cannot zero out or explode future confidence.
    pub fn factor(&self, dim: usize) -> f64 {
        if dim >= self.dims() || self.counts[dim] == 0 {
            return 1.0;
        }
        safe_divide(self.actual[dim], self.predicted[dim], 1.0).clamp(FACTOR_MIN, FACTOR_MAX)
    }

    pub fn adjust_confidence(&self, dim: usize, raw: f64) -> f64 {
        (safe_finite(raw, 0.0) * self.factor(dim)).clamp(0.0, 1.0)
    }
}
