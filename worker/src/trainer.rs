//! The local work unit behind the RPC contract.
//!
//! What a trainer actually computes is opaque to the orchestration
//! layer; the only contract is tensors in, tensors plus an example
//! count out.

use comms::msg::{Metrics, Tensors};
use rand::{Rng, SeedableRng, rngs::SmallRng};

#[derive(Debug, Clone, Copy)]
pub struct FitParams {
    pub round: u32,
    pub batch_size: usize,
    pub epochs: usize,
}

#[derive(Debug)]
pub struct FitOutput {
    pub tensors: Tensors,
    pub num_examples: u64,
    pub metrics: Metrics,
}

pub trait Trainer: Send {
    fn fit(&mut self, weights: &[Vec<f32>], params: &FitParams) -> FitOutput;

    fn evaluate(&mut self, weights: &[Vec<f32>]) -> (f64, Metrics);
}

/// A stand-in work unit: nudges every weight towards zero with a
/// little seeded noise and reports a fixed example count. Useful for
/// wiring up and load-testing the orchestration layer without a real
/// model.
pub struct NoiseTrainer {
    num_examples: u64,
    rng: SmallRng,
}

impl NoiseTrainer {
    pub fn new(num_examples: u64, seed: u64) -> Self {
        Self {
            num_examples,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Trainer for NoiseTrainer {
    fn fit(&mut self, weights: &[Vec<f32>], params: &FitParams) -> FitOutput {
        let step = 0.1 * params.epochs as f32;
        let tensors = weights
            .iter()
            .map(|tensor| {
                tensor
                    .iter()
                    .map(|&w| w - step * w + self.rng.random_range(-0.01..0.01))
                    .collect()
            })
            .collect();

        let mut metrics = Metrics::new();
        metrics.insert("num_batches".to_string(), {
            let batches = self.num_examples.div_ceil(params.batch_size as u64);
            batches as f64 * params.epochs as f64
        });

        FitOutput {
            tensors,
            num_examples: self.num_examples,
            metrics,
        }
    }

    fn evaluate(&mut self, weights: &[Vec<f32>]) -> (f64, Metrics) {
        let (sum, count) = weights
            .iter()
            .flatten()
            .fold((0.0f64, 0usize), |(sum, count), &w| {
                (sum + f64::from(w) * f64::from(w), count + 1)
            });
        let loss = if count == 0 { 0.0 } else { sum / count as f64 };

        let mut metrics = Metrics::new();
        metrics.insert("accuracy".to_string(), (1.0 - loss).clamp(0.0, 1.0));
        (loss, metrics)
    }
}
