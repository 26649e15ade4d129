//! Streaming mean vector and covariance matrix.
//!
//! The same recurrences as [`CentralMoments`](super::CentralMoments) with
//! squares replaced by outer products. The count is tracked per dimension so
//! that individual components can carry different weights.

use num_traits::{One, Zero};

use crate::codec::{hash_str, Checksum, Delimited};
use crate::constants::MOMENTS_DELIMITER;
use crate::error::ParseError;
use crate::linalg::{DenseVector, Storage, SymmetricMatrix};
use crate::scalar::Scalar;

/// Count, mean and maximum likelihood covariance matrix of vector samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Covariances<S: Storage> {
    /// Weight of the values added, per dimension.
    count: DenseVector<S>,
    mean: DenseVector<S>,
    /// Maximum likelihood covariance matrix.
    covariances: SymmetricMatrix<S>,
}

/// Covariances of vectors whose dimension is a compile time constant.
pub type CovariancesN<T, const N: usize> = Covariances<[T; N]>;

/// Covariances of vectors whose dimension is chosen at run time.
pub type CovariancesX<T> = Covariances<Vec<T>>;

impl<S: Storage> Default for Covariances<S> {
    fn default() -> Self {
        Self::with_dimension(0)
    }
}

impl<S: Storage> Covariances<S> {
    /// An empty accumulator for vectors of `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            count: DenseVector::with_dimension(dimension),
            mean: DenseVector::with_dimension(dimension),
            covariances: SymmetricMatrix::with_dimension(dimension),
        }
    }

    /// An accumulator with the same count in every dimension.
    pub fn accumulator(count: S::Elem, mean: DenseVector<S>, covariances: SymmetricMatrix<S>) -> Self {
        Self {
            count: DenseVector::filled_with(mean.dimension(), count),
            mean,
            covariances,
        }
    }

    /// An accumulator with per dimension counts.
    pub fn from_parts(count: DenseVector<S>, mean: DenseVector<S>, covariances: SymmetricMatrix<S>) -> Self {
        Self {
            count,
            mean,
            covariances,
        }
    }

    pub fn dimension(&self) -> usize {
        self.mean.dimension()
    }

    /// The count averaged over the dimensions.
    pub fn count(&self) -> S::Elem {
        let d = self.dimension();
        if d == 0 {
            return S::Elem::zero();
        }
        self.count.l1() / S::Elem::cast_f64(d as f64)
    }

    pub fn counts(&self) -> &DenseVector<S> {
        &self.count
    }

    pub fn mean(&self) -> &DenseVector<S> {
        &self.mean
    }

    pub fn maximum_likelihood_covariances(&self) -> &SymmetricMatrix<S> {
        &self.covariances
    }

    /// The unbiased covariance matrix.
    ///
    /// Rows and columns whose count is at most one are zero.
    pub fn covariances(&self) -> SymmetricMatrix<S> {
        let one = S::Elem::one();
        let bias = self.count.map(|n| if n <= one { S::Elem::zero() } else { n / (n - one) });
        let mut result = self.covariances.clone();
        result.scale_rows_and_columns(&bias);
        result
    }

    /// Add `x` once to every dimension.
    pub fn add(&mut self, x: &DenseVector<S>) {
        let n = DenseVector::filled_with(x.dimension(), S::Elem::one());
        self.add_weighted(x, &n);
    }

    /// Add `x` with per dimension weights `n`. All zero weights are ignored.
    pub fn add_weighted(&mut self, x: &DenseVector<S>, n: &DenseVector<S>) {
        if n.is_zero() {
            return;
        }

        self.count += n;

        let alpha = n / &self.count;
        let beta = self.ones() - &alpha;

        let mean = self.mean.clone();
        self.mean = &beta * &mean + &alpha * x;

        let mut r2 = (x - &self.mean).outer();
        let d_mean2 = (&mean - &self.mean).outer();

        self.covariances += d_mean2;
        self.covariances.scale_rows_and_columns(&beta);
        r2.scale_rows_and_columns(&alpha);
        self.covariances += r2;
    }

    /// Add every point in `points` once.
    pub fn add_all<'a, I>(&mut self, points: I)
    where
        I: IntoIterator<Item = &'a DenseVector<S>>,
    {
        for x in points {
            self.add(x);
        }
    }

    /// Decay the counts by `factor`, which should be in `[0, 1]`.
    pub fn age(&mut self, factor: f64) {
        self.count.scale(S::Elem::cast_f64(factor));
    }

    fn ones(&self) -> DenseVector<S> {
        DenseVector::filled_with(self.dimension(), S::Elem::one())
    }

    fn merge(&mut self, rhs: &Self) {
        self.count += &rhs.count;
        if self.count.is_zero() {
            return;
        }

        let alpha = &rhs.count / &self.count;
        let beta = self.ones() - &alpha;

        let mean_lhs = self.mean.clone();
        self.mean = &beta * &mean_lhs + &alpha * &rhs.mean;

        let d_mean2_lhs = (&mean_lhs - &self.mean).outer();
        let mut d_mean2_rhs = (&rhs.mean - &self.mean).outer();

        self.covariances += d_mean2_lhs;
        self.covariances.scale_rows_and_columns(&beta);
        d_mean2_rhs += &rhs.covariances;
        d_mean2_rhs.scale_rows_and_columns(&alpha);
        self.covariances += d_mean2_rhs;
    }

    /// Remove the sample summarised by `rhs`.
    ///
    /// Counts are clamped at zero, resetting the accumulator if they all
    /// reach it. A diagonal element that becomes negative zeroes its row and
    /// column.
    fn split(&mut self, rhs: &Self) {
        let zeros = self.count.zeros_like();
        self.count = (&self.count - &rhs.count).max(&zeros);
        if self.count.is_zero() {
            self.mean = zeros;
            self.covariances = self.covariances.zeros_like();
            return;
        }

        let alpha = &rhs.count / &self.count;
        let beta = self.ones() + &alpha;

        let mean_lhs = self.mean.clone();
        self.mean = &beta * &mean_lhs - &alpha * &rhs.mean;

        let d_mean2_lhs = (&self.mean - &mean_lhs).outer();
        let mut d_mean2_rhs = (&rhs.mean - &mean_lhs).outer();

        self.covariances -= &d_mean2_lhs;
        self.covariances.scale_rows_and_columns(&beta);
        d_mean2_rhs += &(&rhs.covariances - &d_mean2_lhs);
        d_mean2_rhs.scale_rows_and_columns(&alpha);
        self.covariances -= d_mean2_rhs;

        for i in 0..self.dimension() {
            if self.covariances.get(i, i) < S::Elem::zero() {
                self.covariances.zero_row_and_column(i);
            }
        }
    }

    // ========================================================================
    // Ledoit-Wolf shrinkage
    // ========================================================================

    /// The covariances of `points` shrunk towards a scaled identity.
    ///
    /// See Ledoit and Wolf, "A well-conditioned estimator for
    /// large-dimensional covariance matrices", 2004.
    pub fn ledoit_wolf(points: &[DenseVector<S>]) -> Self {
        let dimension = points.first().map_or(0, DenseVector::dimension);
        let mut result = Self::with_dimension(dimension);
        result.add_all(points);
        result.shrink_ledoit_wolf(points);
        result
    }

    /// Shrink the maximum likelihood covariances towards `m I`, where `m` is
    /// their mean eigenvalue, using `points` to estimate the intensity.
    ///
    /// The points should be the sample these covariances summarise. Returns
    /// the shrinkage intensity `b / d` in `[0, 1]`.
    pub fn shrink_ledoit_wolf(&mut self, points: &[DenseVector<S>]) -> f64 {
        let dimension = self.dimension();
        if dimension == 0 {
            return 0.0;
        }
        let d = dimension as f64;
        let n = self.count().as_f64();
        let z = n * n;
        let s = &self.covariances;

        let mn = s.trace().as_f64() / d;
        let identity = DenseVector::<S>::filled_with(dimension, S::Elem::cast_f64(mn)).diagonal();
        let dn = (s - &identity).frobenius().as_f64().powi(2) / d;
        let mut bn = 0.0;
        for x in points {
            bn += ((x - &self.mean).outer() - s).frobenius().as_f64().powi(2) / d / z;
        }
        let bn = bn.min(dn);
        tracing::trace!(m = mn, d = dn, b = bn, "Ledoit-Wolf shrinkage");

        // A zero dispersion means the covariances already equal the target.
        let intensity = if dn > 0.0 { bn / dn } else { 0.0 };
        let mut shrunk = identity.scaled(S::Elem::cast_f64(intensity));
        shrunk += self.covariances.scaled(S::Elem::cast_f64(1.0 - intensity));
        self.covariances = shrunk;
        intensity
    }
}

// ============================================================================
// Operators
// ============================================================================

impl<S: Storage> std::ops::AddAssign<&Covariances<S>> for Covariances<S> {
    fn add_assign(&mut self, rhs: &Covariances<S>) {
        self.merge(rhs);
    }
}

impl<S: Storage> std::ops::Add<&Covariances<S>> for Covariances<S> {
    type Output = Covariances<S>;

    fn add(mut self, rhs: &Covariances<S>) -> Covariances<S> {
        self.merge(rhs);
        self
    }
}

impl<S: Storage> std::ops::SubAssign<&Covariances<S>> for Covariances<S> {
    fn sub_assign(&mut self, rhs: &Covariances<S>) {
        self.split(rhs);
    }
}

impl<S: Storage> std::ops::Sub<&Covariances<S>> for Covariances<S> {
    type Output = Covariances<S>;

    fn sub(mut self, rhs: &Covariances<S>) -> Covariances<S> {
        self.split(rhs);
        self
    }
}

// ============================================================================
// Persistence
// ============================================================================

impl<S: Storage> Delimited for Covariances<S> {
    /// `counts:mean:packed covariances`
    fn to_delimited(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.count.to_delimited(),
            MOMENTS_DELIMITER,
            self.mean.to_delimited(),
            MOMENTS_DELIMITER,
            self.covariances.to_delimited()
        )
    }

    fn from_delimited(value: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = value.split(MOMENTS_DELIMITER).collect();
        if parts.len() != 3 {
            tracing::error!(value, "Expected counts, mean and covariances");
            return Err(ParseError::WrongLength {
                expected: 3,
                found: parts.len(),
            });
        }
        let count = DenseVector::from_delimited(parts[0])?;
        let mean = DenseVector::from_delimited(parts[1])?;
        let covariances = SymmetricMatrix::from_delimited(parts[2])?;
        if count.dimension() != mean.dimension() || covariances.dimension() != mean.dimension() {
            tracing::error!(value, "Inconsistent covariances dimensions");
            return Err(ParseError::WrongLength {
                expected: mean.dimension(),
                found: covariances.dimension(),
            });
        }
        Ok(Self::from_parts(count, mean, covariances))
    }
}

impl<S: Storage> Checksum for Covariances<S> {
    fn checksum(&self, seed: u64) -> u64 {
        hash_str(seed, &self.to_delimited())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::tools::sample_gaussian;
    use crate::linalg::{SymmetricMatrixN, VectorN, VectorX};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn points() -> Vec<VectorN<f64, 2>> {
        (0..50)
            .map(|i| {
                let t = i as f64;
                VectorN::from_array([(0.3 * t).sin() * 5.0 + t * 0.1, (0.7 * t).cos() + 0.5 * t])
            })
            .collect()
    }

    fn batch(points: &[VectorN<f64, 2>]) -> (VectorN<f64, 2>, SymmetricMatrixN<f64, 2>) {
        let n = points.len() as f64;
        let mut mean = VectorN::zeros();
        for x in points {
            mean += x;
        }
        mean /= n;
        let mut covariances = SymmetricMatrixN::zeros();
        for x in points {
            covariances += (x - &mean).outer();
        }
        covariances /= n;
        (mean, covariances)
    }

    #[test]
    fn test_matches_batch() {
        let points = points();
        let mut accumulator = CovariancesN::<f64, 2>::with_dimension(2);
        accumulator.add_all(&points);
        let (mean, covariances) = batch(&points);
        assert_eq!(accumulator.count(), 50.0);
        for i in 0..2 {
            assert!((accumulator.mean()[i] - mean[i]).abs() < 1e-10);
            for j in 0..2 {
                let actual = accumulator.maximum_likelihood_covariances().get(i, j);
                let expected = covariances.get(i, j);
                assert!((actual - expected).abs() < 1e-9, "({}, {}): expected {}, got {}", i, j, expected, actual);
                let unbiased = accumulator.covariances().get(i, j);
                assert!((unbiased - expected * 50.0 / 49.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_merge_and_split() {
        let points = points();
        let mut all = CovariancesN::<f64, 2>::with_dimension(2);
        all.add_all(&points);
        let mut lhs = CovariancesN::<f64, 2>::with_dimension(2);
        lhs.add_all(&points[..20]);
        let mut rhs = CovariancesN::<f64, 2>::with_dimension(2);
        rhs.add_all(&points[20..]);

        let merged = lhs.clone() + &rhs;
        let restored = merged.clone() - &rhs;
        for i in 0..2 {
            for j in 0..2 {
                let a = merged.maximum_likelihood_covariances().get(i, j);
                let b = all.maximum_likelihood_covariances().get(i, j);
                assert!((a - b).abs() < 1e-9, "merge ({}, {}): {} vs {}", i, j, a, b);
                let a = restored.maximum_likelihood_covariances().get(i, j);
                let b = lhs.maximum_likelihood_covariances().get(i, j);
                assert!((a - b).abs() < 1e-8, "split ({}, {}): {} vs {}", i, j, a, b);
            }
        }
    }

    #[test]
    fn test_split_clamps_negative_diagonal() {
        let a = CovariancesN::<f64, 2>::accumulator(
            2.0,
            VectorN::zeros(),
            VectorN::from_array([1.0, 1.0]).diagonal(),
        );
        let b = CovariancesN::<f64, 2>::accumulator(
            1.0,
            VectorN::zeros(),
            VectorN::from_array([5.0, 0.1]).diagonal(),
        );
        let result = a - &b;
        let c = result.maximum_likelihood_covariances();
        assert_eq!(c.get(0, 0), 0.0);
        assert_eq!(c.get(1, 0), 0.0);
        assert!((c.get(1, 1) - 1.9).abs() < 1e-12, "got {}", c.get(1, 1));

        let empty = result.clone() - &result;
        assert!(empty.counts().is_zero());
        assert!(empty.maximum_likelihood_covariances().is_zero());
    }

    #[test]
    fn test_unbiased_needs_two_points() {
        let mut accumulator = CovariancesX::<f64>::with_dimension(3);
        accumulator.add(&VectorX::from_vec(vec![1.0, 2.0, 3.0]));
        assert!(accumulator.covariances().is_zero());
    }

    #[test]
    fn test_single_precision_matches_double() {
        let points = points();
        let mut wide = CovariancesX::<f64>::with_dimension(2);
        let mut narrow = CovariancesX::<f32>::with_dimension(2);
        for x in &points {
            wide.add(&VectorX::from_vec(x.as_slice().to_vec()));
            narrow.add(&VectorX::from_vec(x.as_slice().iter().map(|&v| v as f32).collect()));
        }
        assert_eq!(narrow.count(), 50.0);
        let wide = wide.covariances();
        let narrow = narrow.covariances();
        assert!((narrow.frobenius() as f64 - wide.frobenius()).abs() < 1e-3 * wide.frobenius());
        for i in 0..2 {
            for j in 0..2 {
                let (a, b) = (narrow.get(i, j) as f64, wide.get(i, j));
                assert!((a - b).abs() < 1e-3 * b.abs().max(1.0), "({}, {}): {} vs {}", i, j, a, b);
            }
        }
        let norm = VectorX::from_vec(vec![3.0f32, -4.0]);
        assert_eq!(norm.euclidean(), 5.0);
        assert_eq!(norm.abs().as_slice(), &[3.0, 4.0]);
    }

    #[test]
    fn test_delimited_round_trip() {
        let mut accumulator = CovariancesX::<f32>::with_dimension(3);
        accumulator.add(&VectorX::from_vec(vec![0.1, 2.0, -3.0]));
        accumulator.add(&VectorX::from_vec(vec![1.1, 0.5, 3.0]));
        let text = accumulator.to_delimited();
        let restored = CovariancesX::<f32>::from_delimited(&text).unwrap();
        assert_eq!(accumulator, restored);
        assert_eq!(accumulator.checksum(5), restored.checksum(5));
        assert!(CovariancesX::<f32>::from_delimited("1,1:0,0").is_err());
        assert!(CovariancesX::<f32>::from_delimited("1,1:0,0:1").is_err());
    }

    #[test]
    fn test_ledoit_wolf_shrinks_small_isotropic_samples() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mean = VectorN::<f64, 4>::zeros();
        let identity = SymmetricMatrixN::<f64, 4>::identity();
        let points = sample_gaussian(&mut rng, 6, &mean, &identity);
        let mut accumulator = CovariancesN::<f64, 4>::with_dimension(4);
        accumulator.add_all(&points);
        let intensity = accumulator.shrink_ledoit_wolf(&points);
        assert!(intensity > 0.5, "Expected strong shrinkage, got {}", intensity);
        assert!(intensity <= 1.0);
    }

    #[test]
    fn test_ledoit_wolf_vanishes_for_large_samples() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let mean = VectorN::<f64, 4>::zeros();
        let covariance = VectorN::from_array([1.0, 2.0, 4.0, 8.0]).diagonal();
        let points = sample_gaussian(&mut rng, 10_000, &mean, &covariance);
        let mut accumulator = CovariancesN::<f64, 4>::with_dimension(4);
        accumulator.add_all(&points);
        let before = accumulator.maximum_likelihood_covariances().clone();
        let intensity = accumulator.shrink_ledoit_wolf(&points);
        assert!(intensity < 0.05, "Expected little shrinkage, got {}", intensity);

        // The trace is preserved by shrinking towards the mean eigenvalue.
        let after = accumulator.maximum_likelihood_covariances();
        assert!((after.trace() - before.trace()).abs() < 1e-8);

        let shrunk = CovariancesN::<f64, 4>::ledoit_wolf(&points);
        assert_eq!(shrunk.maximum_likelihood_covariances(), after);
    }
}
