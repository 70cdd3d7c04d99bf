//! Example-count-weighted aggregation of work results.

use comms::msg::Tensors;

use crate::{error::AggregateError, state::WorkResult};

/// Weighted elementwise mean of the successes' tensors:
/// `sum(weight_i * value_i) / sum(weight_i)` per position,
/// accumulated in f64.
///
/// # Errors
/// `NoData` if `successes` is empty or carries zero total weight;
/// `ShapeMismatch` if any result's tensor shapes disagree.
pub fn aggregate(successes: &[WorkResult]) -> Result<Tensors, AggregateError> {
    let Some(first) = successes.first() else {
        return Err(AggregateError::NoData);
    };

    let total_weight: f64 = successes.iter().map(|r| r.num_examples as f64).sum();
    if total_weight == 0.0 {
        return Err(AggregateError::NoData);
    }

    let shape: Vec<usize> = first.tensors.iter().map(Vec::len).collect();
    let mut acc: Vec<Vec<f64>> = shape.iter().map(|&n| vec![0.0; n]).collect();

    for result in successes {
        let matches = result.tensors.len() == shape.len()
            && result.tensors.iter().zip(&shape).all(|(t, &n)| t.len() == n);
        if !matches {
            return Err(AggregateError::ShapeMismatch {
                worker_id: result.worker_id.clone(),
            });
        }

        let weight = result.num_examples as f64;
        for (acc_tensor, tensor) in acc.iter_mut().zip(&result.tensors) {
            for (a, &v) in acc_tensor.iter_mut().zip(tensor) {
                *a += weight * f64::from(v);
            }
        }
    }

    Ok(acc
        .into_iter()
        .map(|t| t.into_iter().map(|a| (a / total_weight) as f32).collect())
        .collect())
}

/// The same weighting applied to one scalar metric. Results missing
/// the key are skipped.
///
/// # Errors
/// `NoData` if no result carries the key (or zero total weight).
pub fn weighted_metric_average(
    successes: &[WorkResult],
    key: &str,
) -> Result<f64, AggregateError> {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for result in successes {
        if let Some(&value) = result.metrics.get(key) {
            let weight = result.num_examples as f64;
            weighted_sum += weight * value;
            total_weight += weight;
        }
    }

    if total_weight == 0.0 {
        return Err(AggregateError::NoData);
    }
    Ok(weighted_sum / total_weight)
}
