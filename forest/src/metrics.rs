//! Scores used to compare predictions against labels.

use ndarray::ArrayView1;

use crate::{ForestErr, Result};

fn check_len(truth: ArrayView1<f32>, predicted: ArrayView1<f32>) -> Result<()> {
    if truth.len() != predicted.len() {
        return Err(ForestErr::SizeMismatch {
            a: "labels",
            b: "predictions",
            got: predicted.len(),
            expected: truth.len(),
        });
    }

    if truth.is_empty() {
        return Err(ForestErr::EmptyDataset);
    }

    Ok(())
}

/// The mean of the absolute differences.
pub fn mean_absolute_error(truth: ArrayView1<f32>, predicted: ArrayView1<f32>) -> Result<f64> {
    check_len(truth, predicted)?;

    let sum: f64 = truth
        .iter()
        .zip(predicted)
        .map(|(&t, &p)| (t as f64 - p as f64).abs())
        .sum();

    Ok(sum / truth.len() as f64)
}

/// The mean of the squared differences.
pub fn mean_squared_error(truth: ArrayView1<f32>, predicted: ArrayView1<f32>) -> Result<f64> {
    check_len(truth, predicted)?;

    let sum: f64 = truth
        .iter()
        .zip(predicted)
        .map(|(&t, &p)| (t as f64 - p as f64).powi(2))
        .sum();

    Ok(sum / truth.len() as f64)
}

/// Pearson's correlation coefficient.
///
/// Returns NaN when either side is constant, the coefficient is undefined there.
pub fn pearson(truth: ArrayView1<f32>, predicted: ArrayView1<f32>) -> Result<f64> {
    check_len(truth, predicted)?;

    let n = truth.len() as f64;
    let mean_t = truth.iter().map(|&t| t as f64).sum::<f64>() / n;
    let mean_p = predicted.iter().map(|&p| p as f64).sum::<f64>() / n;

    let (mut cov, mut var_t, mut var_p) = (0.0, 0.0, 0.0);
    for (&t, &p) in truth.iter().zip(predicted) {
        let dt = t as f64 - mean_t;
        let dp = p as f64 - mean_p;
        cov += dt * dp;
        var_t += dt * dt;
        var_p += dp * dp;
    }

    if var_t == 0.0 || var_p == 0.0 {
        return Ok(f64::NAN);
    }

    Ok((cov / (var_t.sqrt() * var_p.sqrt())).clamp(-1.0, 1.0))
}
