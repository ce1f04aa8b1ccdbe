//! Epsilon-greedy value learner over the prompt templates.

use rand::Rng;
use tracing::warn;

/// Exploration probability.
pub const EPSILON: f64 = 0.1;
/// Step size for value updates.
pub const LEARNING_RATE: f64 = 0.1;
/// Weight on the best follow-up estimate.
pub const DISCOUNT: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct PromptBandit {
    values: Vec<f64>,
}

impl PromptBandit {
    /// Fresh learner with every estimate at zero.
    pub fn new(arms: usize) -> Self {
        Self {
            values: vec![0.0; arms],
        }
    }

    /// Learner resumed from saved estimates.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Picks an arm: a uniformly random one with probability `epsilon`,
    /// otherwise the current best. Ties go to the lowest index, so a
    /// fresh learner always opens with arm 0.
    pub fn select_arm<R: Rng + ?Sized>(&self, rng: &mut R, epsilon: f64) -> usize {
        if rng.gen::<f64>() < epsilon {
            rng.gen_range(0..self.values.len())
        } else {
            self.best_arm()
        }
    }

    fn best_arm(&self) -> usize {
        let mut best = 0;
        for (arm, value) in self.values.iter().enumerate() {
            if *value > self.values[best] {
                best = arm;
            }
        }
        best
    }

    fn best_value(&self) -> f64 {
        self.values.iter().fold(f64::MIN, |acc, v| acc.max(*v))
    }

    /// Moves the chosen arm's estimate toward the observed reward plus
    /// the discounted best estimate. The best estimate is read before
    /// the write, so an arm can bootstrap from its own previous value.
    pub fn update(&mut self, arm: usize, reward: f64) {
        let current = match self.values.get(arm) {
            Some(v) => *v,
            None => {
                warn!("Ignoring feedback for unknown arm {}", arm);
                return;
            }
        };
        let best_next = self.best_value();
        self.values[arm] = current + LEARNING_RATE * (reward + DISCOUNT * best_next - current);
    }
}
