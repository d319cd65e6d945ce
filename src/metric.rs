//! Pass-scoped classification accuracy.

use burn::prelude::*;

/// Running accuracy of one pass.
///
/// A tracker only exists between [`AccuracyTracker::reset`] and
/// [`AccuracyTracker::finalize`], so a value from a previous pass cannot be read.
#[derive(Debug)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    /// Starts tracking a new pass.
    pub fn reset() -> Self {
        Self {
            correct: 0,
            total: 0,
        }
    }

    /// Adds a batch, returning the running accuracy of the pass.
    pub fn update(&mut self, correct: usize, total: usize) -> f64 {
        debug_assert!(correct <= total);
        self.correct += correct;
        self.total += total;
        self.value()
    }

    /// Fraction of correct predictions so far, 0 before any sample.
    pub fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    /// Ends the pass and returns its accuracy.
    pub fn finalize(self) -> f64 {
        self.value()
    }
}

/// Number of rows whose most probable class is the label.
///
/// # Shape
/// - predictions: [batch_size, num_classes]
/// - labels: [batch_size, 1]
pub fn count_correct<B: Backend>(predictions: Tensor<B, 2>, labels: Tensor<B, 2, Int>) -> usize {
    predictions
        .argmax(1)
        .equal(labels)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}
