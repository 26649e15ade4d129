//! Autocorrelation of bucketed histories.
//!
//! Buckets with zero count are missing values: the direct computation skips
//! any pair involving one, the FFT computation interpolates across them.

use num_complex::Complex;
use rustfft::FftPlanner;

use crate::types::{FloatMeanAccumulator, MeanAccumulator, MeanVarAccumulator};

fn populated_moments(values: &[FloatMeanAccumulator]) -> MeanVarAccumulator {
    let mut moments = MeanVarAccumulator::new();
    for value in values.iter().filter(|value| value.count() > 0.0) {
        moments.add(f64::from(value.mean()));
    }
    moments
}

/// The cyclic autocorrelation of the bucket means at lag `offset`.
///
/// Returns zero when the populated bucket means have no variance.
///
/// # Arguments
/// * `offset` - The lag in buckets, taken modulo `values.len()`
/// * `values` - The bucket history
pub fn autocorrelation(offset: usize, values: &[FloatMeanAccumulator]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }

    let moments = populated_moments(values);
    let mean = moments.mean();
    let variance = moments.variance();
    if variance <= 0.0 {
        return 0.0;
    }

    let mut result = MeanAccumulator::new();
    for (i, value) in values.iter().enumerate() {
        let lagged = &values[(i + offset) % n];
        if value.count() > 0.0 && lagged.count() > 0.0 {
            result.add((f64::from(value.mean()) - mean) * (f64::from(lagged.mean()) - mean));
        }
    }

    result.mean() / variance
}

/// The cyclic autocorrelations of the bucket means at every lag in
/// `1..values.len()`, computed with an FFT.
///
/// Interior gaps are filled by linear interpolation between their
/// neighbours, leading and trailing gaps with the mean.
pub fn autocorrelations(values: &[FloatMeanAccumulator]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }

    let moments = populated_moments(values);
    let mean = moments.mean();
    let variance = moments.variance();
    if variance <= 0.0 {
        return vec![0.0; n - 1];
    }

    let mut f: Vec<Complex<f64>> = Vec::with_capacity(n);
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j < n && values[j].count() == 0.0 {
            j += 1;
        }
        if j == n {
            f.resize(n, Complex::new(0.0, 0.0));
            break;
        }
        if i != j {
            let next = f64::from(values[j].mean()) - mean;
            if i == 0 {
                f.resize(j, Complex::new(0.0, 0.0));
            } else {
                let previous = f[i - 1];
                for k in i..j {
                    let alpha = (k - i + 1) as f64 / (j - i + 1) as f64;
                    f.push(previous * (1.0 - alpha) + Complex::new(alpha * next, 0.0));
                }
            }
            i = j;
        }
        f.push(Complex::new(f64::from(values[i].mean()) - mean, 0.0));
        i += 1;
    }

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n).process(&mut f);
    for x in f.iter_mut() {
        *x = Complex::new(x.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(n).process(&mut f);

    let scale = (n as f64) * (n as f64) * variance;
    f[1..].iter().map(|x| x.re / scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn history(values: &[f64]) -> Vec<FloatMeanAccumulator> {
        values
            .iter()
            .map(|&x| FloatMeanAccumulator::accumulator(1.0, x as f32))
            .collect()
    }

    fn sine(n: usize, period: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * i as f64 / period as f64).sin()).collect()
    }

    #[test]
    fn test_periodic_signal_correlates_at_period() {
        let values = history(&sine(96, 24));
        let at_period = autocorrelation(24, &values);
        let at_half = autocorrelation(12, &values);
        assert!(at_period > 0.95, "Expected strong correlation, got {}", at_period);
        assert!(at_half < -0.95, "Expected strong anticorrelation, got {}", at_half);
    }

    #[test]
    fn test_missing_buckets_are_skipped() {
        let mut values = history(&sine(96, 24));
        for i in (0..96).step_by(5) {
            values[i] = FloatMeanAccumulator::new();
        }
        let at_period = autocorrelation(24, &values);
        assert!(at_period > 0.9, "Expected strong correlation, got {}", at_period);
    }

    #[test]
    fn test_constant_signal_has_no_correlation() {
        let values = history(&[3.0; 10]);
        assert_eq!(autocorrelation(2, &values), 0.0);
        assert_eq!(autocorrelations(&values), vec![0.0; 9]);
        assert!(autocorrelations(&[]).is_empty());
    }

    #[test]
    fn test_fft_matches_direct() {
        let raw: Vec<f64> = (0..64)
            .map(|i| (2.0 * PI * i as f64 / 16.0).sin() + 0.3 * ((i * 7 % 11) as f64 - 5.0) / 5.0)
            .collect();
        let values = history(&raw);
        let fast = autocorrelations(&values);
        assert_eq!(fast.len(), 63);

        // The direct computation averages over n pairs and divides by the
        // unbiased variance, the FFT divides by n and the same variance.
        for (lag, &r) in fast.iter().enumerate().map(|(i, r)| (i + 1, r)) {
            let direct = autocorrelation(lag, &values);
            assert!((r - direct).abs() < 1e-4, "lag {}: expected {}, got {}", lag, direct, r);
        }
    }

    #[test]
    fn test_fft_interpolates_gaps() {
        let mut values = history(&sine(48, 12));
        values[0] = FloatMeanAccumulator::new();
        values[1] = FloatMeanAccumulator::new();
        values[20] = FloatMeanAccumulator::new();
        values[47] = FloatMeanAccumulator::new();
        let result = autocorrelations(&values);
        assert_eq!(result.len(), 47);
        assert!(result[11] > 0.8, "Expected strong correlation at lag 12, got {}", result[11]);
        assert!(result[5] < -0.8, "Expected anticorrelation at lag 6, got {}", result[5]);
    }
}
