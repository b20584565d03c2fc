//! Online logistic predictor for optimization success
//!
//! Three normalized inputs (CPU fraction, memory fraction, latency in
//! seconds) feed a single sigmoid unit. It only ranks and sizes
//! optimization decisions.

use crate::config::{ConfigError, OptimizerConfig};
use crate::models::ResourceSnapshot;
use serde::Serialize;

/// Training needs at least this many history entries
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Accuracy is measured over this many recent entries
pub const ACCURACY_WINDOW: usize = 100;

pub type Features = [f64; 3];

/// Labelled observation: inputs before the attempt and its outcome
pub type TrainingSample = (Features, bool);

pub fn features(snapshot: &ResourceSnapshot) -> Features {
    [
        snapshot.cpu.usage / 100.0,
        snapshot.memory.percentage / 100.0,
        snapshot.network.latency_ms / 1000.0,
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnlinePredictor {
    weights: Features,
    bias: f64,
    learning_rate: f64,
}

impl OnlinePredictor {
    pub fn new(weights: Features, learning_rate: f64) -> Self {
        Self {
            weights,
            bias: 0.0,
            learning_rate,
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Result<Self, ConfigError> {
        let weights: Features = config
            .initial_weights
            .as_slice()
            .try_into()
            .map_err(|_| ConfigError::InvalidWeights(config.initial_weights.len()))?;
        Ok(Self::new(weights, config.learning_rate))
    }

    pub fn weights(&self) -> Features {
        self.weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// Probability that the next optimization succeeds
    pub fn predict(&self, input: &Features) -> f64 {
        let sum = self
            .weights
            .iter()
            .zip(input)
            .fold(self.bias, |acc, (w, x)| acc + w * x);
        1.0 / (1.0 + (-sum).exp())
    }

    /// One gradient pass over `samples`; skipped below the minimum size
    pub fn train(&mut self, samples: &[TrainingSample]) -> bool {
        if samples.len() < MIN_TRAINING_SAMPLES {
            return false;
        }

        for (input, success) in samples {
            let target = if *success { 1.0 } else { 0.0 };
            let error = target - self.predict(input);
            for (weight, x) in self.weights.iter_mut().zip(input) {
                *weight += self.learning_rate * error * x;
            }
            self.bias += self.learning_rate * error;
        }
        true
    }

    /// Share of the most recent samples classified correctly at 0.5
    pub fn accuracy(&self, samples: &[TrainingSample]) -> f64 {
        let recent = &samples[samples.len().saturating_sub(ACCURACY_WINDOW)..];
        if recent.is_empty() {
            return 1.0;
        }
        let correct = recent
            .iter()
            .filter(|(input, success)| (self.predict(input) >= 0.5) == *success)
            .count();
        correct as f64 / recent.len() as f64
    }

    /// Capacity multiplier in [1.0, 1.5]
    pub fn scaling_factor(&self, snapshot: &ResourceSnapshot) -> f64 {
        1.0 + 0.5 * self.predict(&features(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrained_prediction() {
        let predictor = OnlinePredictor::new([0.3, 0.3, 0.4], 0.01);
        assert_eq!(predictor.predict(&[0.0, 0.0, 0.0]), 0.5);
        assert!(predictor.predict(&[1.0, 1.0, 1.0]) > 0.5);
    }

    #[test]
    fn test_training_requires_minimum_history() {
        let mut predictor = OnlinePredictor::new([0.3, 0.3, 0.4], 0.01);
        let samples = vec![([0.5, 0.5, 0.1], true); MIN_TRAINING_SAMPLES - 1];
        assert!(!predictor.train(&samples));
        assert_eq!(predictor.bias(), 0.0);
    }

    #[test]
    fn test_training_moves_towards_labels() {
        let mut predictor = OnlinePredictor::new([0.0, 0.0, 0.0], 0.5);
        let samples: Vec<TrainingSample> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    ([0.9, 0.9, 0.1], false)
                } else {
                    ([0.1, 0.1, 0.0], true)
                }
            })
            .collect();

        for _ in 0..50 {
            assert!(predictor.train(&samples));
        }

        assert!(predictor.predict(&[0.9, 0.9, 0.1]) < 0.5);
        assert!(predictor.predict(&[0.1, 0.1, 0.0]) > 0.5);
        assert_eq!(predictor.accuracy(&samples), 1.0);
    }

    #[test]
    fn test_accuracy_defaults_and_window() {
        let predictor = OnlinePredictor::new([0.3, 0.3, 0.4], 0.01);
        assert_eq!(predictor.accuracy(&[]), 1.0);

        // Older wrong labels fall outside the window
        let mut samples = vec![([0.0, 0.0, 0.0], false); 50];
        samples.extend(vec![([1.0, 1.0, 1.0], true); ACCURACY_WINDOW]);
        assert_eq!(predictor.accuracy(&samples), 1.0);
    }

    #[test]
    fn test_from_config_and_scaling_factor() {
        let predictor = OnlinePredictor::from_config(&OptimizerConfig::default()).unwrap();
        assert_eq!(predictor.weights(), [0.3, 0.3, 0.4]);

        let factor = predictor.scaling_factor(&ResourceSnapshot::default());
        assert!((factor - 1.25).abs() < 1e-9);

        let bad = OptimizerConfig {
            initial_weights: vec![1.0],
            ..Default::default()
        };
        assert!(OnlinePredictor::from_config(&bad).is_err());
    }
}
