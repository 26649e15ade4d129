//! Streaming central moments.
//!
//! [`CentralMoments`] tracks a count and the first `ORDER` central moments of
//! a weighted sample: the mean, the maximum likelihood variance and the
//! biased third central moment. Every update folds the new information in
//! through the recurrence
//!
//! ```text
//! m' = (1 - a) m + a x,   a = n / count'
//! ```
//!
//! applied mean first, then variance corrected by the shift in the mean,
//! then the third moment corrected by both. Raw power sums are never formed,
//! so large counts and large offsets do not cancel catastrophically.

use std::fmt::{self, Debug, Display};
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};

use crate::codec::{hash_str, parse_token, Checksum, Delimited};
use crate::constants::MOMENTS_DELIMITER;
use crate::error::ParseError;
use crate::linalg::{DenseVector, VectorN};
use crate::scalar::Scalar;

/// A value whose central moments can be accumulated.
///
/// Vectors are accumulated component-wise.
pub trait MomentValue:
    Copy
    + Debug
    + PartialEq
    + PartialOrd
    + Delimited
    + Checksum
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    /// The additive identity.
    fn zero() -> Self;

    /// Multiply by a count or weight.
    fn scale_by(self, factor: f64) -> Self;

    /// Clamp negative components to zero.
    fn positive_part(self) -> Self;

    /// Square root of each component.
    fn square_root(self) -> Self;

    /// True if every component is exactly zero.
    fn is_zero(&self) -> bool;
}

macro_rules! scalar_moment_value {
    ($($t:ty),*) => {
        $(
            impl MomentValue for $t {
                #[inline]
                fn zero() -> Self {
                    0.0
                }

                #[inline]
                fn scale_by(self, factor: f64) -> Self {
                    (self.as_f64() * factor) as $t
                }

                #[inline]
                fn positive_part(self) -> Self {
                    self.max(0.0)
                }

                #[inline]
                fn square_root(self) -> Self {
                    self.sqrt()
                }

                #[inline]
                fn is_zero(&self) -> bool {
                    *self == 0.0
                }
            }
        )*
    };
}

scalar_moment_value!(f32, f64);

impl<T: Scalar, const N: usize> MomentValue for VectorN<T, N> {
    fn zero() -> Self {
        Self::zeros()
    }

    fn scale_by(self, factor: f64) -> Self {
        DenseVector::scaled(&self, T::cast_f64(factor))
    }

    fn positive_part(self) -> Self {
        self.map(|x| x.max(T::zero()))
    }

    fn square_root(self) -> Self {
        DenseVector::sqrt(&self)
    }

    fn is_zero(&self) -> bool {
        DenseVector::is_zero(self)
    }
}

/// Count and the first `ORDER` central moments of a sample.
///
/// `ORDER` 1 tracks the mean, 2 adds the maximum likelihood variance and 3
/// adds the biased third central moment.
///
/// # Example
///
/// ```
/// use seasonal_core::statistics::CentralMoments;
///
/// let mut moments = CentralMoments::<f64, 2>::new();
/// for x in [1.0, 2.0, 3.0, 4.0] {
///     moments.add(x);
/// }
/// assert_eq!(moments.count(), 4.0);
/// assert!((moments.mean() - 2.5).abs() < 1e-12);
/// assert!((moments.variance() - 5.0 / 3.0).abs() < 1e-12);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct CentralMoments<T, const ORDER: usize> {
    /// Total weight of the values added.
    count: f64,
    /// Mean, then maximum likelihood variance, then third central moment.
    moments: [T; ORDER],
}

impl<T: MomentValue, const ORDER: usize> Default for CentralMoments<T, ORDER> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MomentValue, const ORDER: usize> CentralMoments<T, ORDER> {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self {
            count: 0.0,
            moments: [T::zero(); ORDER],
        }
    }

    /// An accumulator with the given count and raw moments.
    pub fn from_parts(count: f64, moments: [T; ORDER]) -> Self {
        Self { count, moments }
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    /// Overwrite the count, leaving the moments untouched.
    pub fn set_count(&mut self, count: f64) {
        self.count = count;
    }

    pub fn mean(&self) -> T {
        self.moments[0]
    }

    pub fn mean_mut(&mut self) -> &mut T {
        &mut self.moments[0]
    }

    /// The raw moment `i`, where 0 is the mean.
    pub fn moment(&self, i: usize) -> T {
        self.moments[i]
    }

    pub fn moment_mut(&mut self, i: usize) -> &mut T {
        &mut self.moments[i]
    }

    pub fn moments(&self) -> &[T; ORDER] {
        &self.moments
    }

    /// Add `x` once.
    pub fn add(&mut self, x: T) {
        self.add_weighted(x, 1.0);
    }

    /// Add `x` with weight `n`. A zero weight is ignored.
    pub fn add_weighted(&mut self, x: T, n: f64) {
        if n == 0.0 {
            return;
        }

        self.count += n;

        let alpha = n / self.count;
        let beta = 1.0 - alpha;

        let m: &mut [T] = &mut self.moments;
        let mean = m[0];
        m[0] = mean.scale_by(beta) + x.scale_by(alpha);

        if ORDER > 1 {
            let r = x - m[0];
            let r2 = r * r;
            let d_mean = mean - m[0];
            let d_mean2 = d_mean * d_mean;
            let variance = m[1];

            m[1] = (variance + d_mean2).scale_by(beta) + r2.scale_by(alpha);

            if ORDER > 2 {
                let skew = m[2];
                let d_skew = (variance.scale_by(3.0) + d_mean2) * d_mean;
                m[2] = (skew + d_skew).scale_by(beta) + (r2 * r).scale_by(alpha);
            }
        }
    }

    /// Add every value in `values` once.
    pub fn add_all<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        for &x in values {
            self.add(x);
        }
    }

    /// Decay the count by `factor`, which should be in `[0, 1]`.
    ///
    /// The point estimates are unchanged.
    pub fn age(&mut self, factor: f64) {
        self.count *= factor;
    }

    fn merge(&mut self, rhs: &Self) {
        if rhs.count == 0.0 {
            return;
        }

        self.count += rhs.count;

        let alpha = rhs.count / self.count;
        let beta = 1.0 - alpha;

        let m: &mut [T] = &mut self.moments;
        let r: &[T] = &rhs.moments;
        let mean_lhs = m[0];
        let mean_rhs = r[0];
        m[0] = mean_lhs.scale_by(beta) + mean_rhs.scale_by(alpha);

        if ORDER > 1 {
            let d_mean_lhs = mean_lhs - m[0];
            let d_mean2_lhs = d_mean_lhs * d_mean_lhs;
            let variance_lhs = m[1];

            let d_mean_rhs = mean_rhs - m[0];
            let d_mean2_rhs = d_mean_rhs * d_mean_rhs;
            let variance_rhs = r[1];

            m[1] = (variance_lhs + d_mean2_lhs).scale_by(beta)
                + (variance_rhs + d_mean2_rhs).scale_by(alpha);

            if ORDER > 2 {
                let d_skew_lhs = (variance_lhs.scale_by(3.0) + d_mean2_lhs) * d_mean_lhs;
                let d_skew_rhs = (variance_rhs.scale_by(3.0) + d_mean2_rhs) * d_mean_rhs;
                m[2] = (m[2] + d_skew_lhs).scale_by(beta) + (r[2] + d_skew_rhs).scale_by(alpha);
            }
        }
    }

    /// Remove the sample summarised by `rhs`.
    ///
    /// This is only well defined if `rhs` was merged into these moments. If
    /// the count would go negative it is clamped to zero and the moments are
    /// reset, and a negative variance is clamped to zero.
    fn split(&mut self, rhs: &Self) {
        if rhs.count == 0.0 {
            return;
        }

        self.count = (self.count - rhs.count).max(0.0);

        if self.count == 0.0 {
            self.moments = [T::zero(); ORDER];
            return;
        }

        let alpha = rhs.count / self.count;
        let beta = 1.0 + alpha;

        let m: &mut [T] = &mut self.moments;
        let r: &[T] = &rhs.moments;
        let mean_lhs = m[0];
        let mean_rhs = r[0];
        m[0] = mean_lhs.scale_by(beta) - mean_rhs.scale_by(alpha);

        if ORDER > 1 {
            let d_mean_lhs = m[0] - mean_lhs;
            let d_mean2_lhs = d_mean_lhs * d_mean_lhs;

            let d_mean_rhs = mean_rhs - mean_lhs;
            let d_mean2_rhs = d_mean_rhs * d_mean_rhs;
            let variance_rhs = r[1];

            m[1] = ((m[1] - d_mean2_lhs).scale_by(beta)
                - (variance_rhs + d_mean2_rhs - d_mean2_lhs).scale_by(alpha))
            .positive_part();

            if ORDER > 2 {
                let d_skew_lhs = (m[1].scale_by(3.0) + d_mean2_lhs) * d_mean_lhs;
                let d_skew_rhs = (variance_rhs.scale_by(3.0) + d_mean2_rhs) * d_mean_rhs;
                m[2] = (m[2] - d_skew_lhs).scale_by(beta)
                    - (r[2] + d_skew_rhs - d_skew_lhs).scale_by(alpha);
            }
        }
    }
}

// ============================================================================
// Order specific accessors
// ============================================================================

impl<T: MomentValue> CentralMoments<T, 1> {
    /// A mean accumulator with the given count and mean.
    pub fn accumulator(count: f64, mean: T) -> Self {
        Self::from_parts(count, [mean])
    }
}

impl<T: MomentValue> CentralMoments<T, 2> {
    /// A mean and variance accumulator with the given count, mean and
    /// maximum likelihood variance.
    pub fn accumulator(count: f64, mean: T, variance: T) -> Self {
        Self::from_parts(count, [mean, variance])
    }

    /// The unbiased variance, zero for a count of at most one.
    pub fn variance(&self) -> T {
        unbiased_variance(self.count, self.moments[1])
    }

    pub fn maximum_likelihood_variance(&self) -> T {
        self.moments[1]
    }
}

impl<T: MomentValue> CentralMoments<T, 3> {
    /// A mean, variance and skew accumulator with the given count, mean,
    /// maximum likelihood variance and third central moment.
    pub fn accumulator(count: f64, mean: T, variance: T, skew: T) -> Self {
        Self::from_parts(count, [mean, variance, skew])
    }

    /// The unbiased variance, zero for a count of at most one.
    pub fn variance(&self) -> T {
        unbiased_variance(self.count, self.moments[1])
    }

    pub fn maximum_likelihood_variance(&self) -> T {
        self.moments[1]
    }

    /// The biased skewness, zero for a count of at most two.
    pub fn skewness(&self) -> T {
        if self.count <= 2.0 || self.moments[2].is_zero() {
            return T::zero();
        }
        let variance = self.variance();
        self.moments[2] / (variance * variance.square_root())
    }
}

fn unbiased_variance<T: MomentValue>(count: f64, variance: T) -> T {
    if count <= 1.0 {
        return T::zero();
    }
    variance.scale_by(count / (count - 1.0))
}

// ============================================================================
// Precision conversion
// ============================================================================

impl<const ORDER: usize> CentralMoments<f32, ORDER> {
    /// Widen to double precision.
    pub fn to_f64(&self) -> CentralMoments<f64, ORDER> {
        CentralMoments::from_parts(self.count, self.moments.map(f64::from))
    }
}

impl<const ORDER: usize> CentralMoments<f64, ORDER> {
    /// Narrow to single precision.
    pub fn to_f32(&self) -> CentralMoments<f32, ORDER> {
        CentralMoments::from_parts(self.count, self.moments.map(|x| x as f32))
    }
}

impl<const ORDER: usize> From<CentralMoments<f32, ORDER>> for CentralMoments<f64, ORDER> {
    fn from(moments: CentralMoments<f32, ORDER>) -> Self {
        moments.to_f64()
    }
}

// ============================================================================
// Operators
// ============================================================================

impl<T: MomentValue, const ORDER: usize> AddAssign<&CentralMoments<T, ORDER>> for CentralMoments<T, ORDER> {
    fn add_assign(&mut self, rhs: &CentralMoments<T, ORDER>) {
        self.merge(rhs);
    }
}

impl<T: MomentValue, const ORDER: usize> AddAssign for CentralMoments<T, ORDER> {
    fn add_assign(&mut self, rhs: CentralMoments<T, ORDER>) {
        self.merge(&rhs);
    }
}

impl<T: MomentValue, const ORDER: usize> Add for CentralMoments<T, ORDER> {
    type Output = CentralMoments<T, ORDER>;

    fn add(mut self, rhs: CentralMoments<T, ORDER>) -> CentralMoments<T, ORDER> {
        self.merge(&rhs);
        self
    }
}

impl<T: MomentValue, const ORDER: usize> SubAssign<&CentralMoments<T, ORDER>> for CentralMoments<T, ORDER> {
    fn sub_assign(&mut self, rhs: &CentralMoments<T, ORDER>) {
        self.split(rhs);
    }
}

impl<T: MomentValue, const ORDER: usize> SubAssign for CentralMoments<T, ORDER> {
    fn sub_assign(&mut self, rhs: CentralMoments<T, ORDER>) {
        self.split(&rhs);
    }
}

impl<T: MomentValue, const ORDER: usize> Sub for CentralMoments<T, ORDER> {
    type Output = CentralMoments<T, ORDER>;

    fn sub(mut self, rhs: CentralMoments<T, ORDER>) -> CentralMoments<T, ORDER> {
        self.split(&rhs);
        self
    }
}

impl<T: MomentValue, const ORDER: usize> std::iter::Sum for CentralMoments<T, ORDER> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::new(), |sum, x| sum + x)
    }
}

// ============================================================================
// Persistence
// ============================================================================

impl<T: MomentValue, const ORDER: usize> Delimited for CentralMoments<T, ORDER> {
    /// `count:mean[:variance[:skew]]`
    fn to_delimited(&self) -> String {
        let mut result = self.count.to_delimited();
        for moment in &self.moments {
            result.push(MOMENTS_DELIMITER);
            result.push_str(&moment.to_delimited());
        }
        result
    }

    fn from_delimited(value: &str) -> Result<Self, ParseError> {
        if value.is_empty() {
            tracing::error!("Empty accumulator representation");
            return Err(ParseError::Empty);
        }
        let tokens: Vec<&str> = value.split(MOMENTS_DELIMITER).collect();
        if tokens.len() != ORDER + 1 {
            tracing::error!(value, expected = ORDER + 1, "Wrong number of accumulator tokens");
            return Err(ParseError::WrongLength {
                expected: ORDER + 1,
                found: tokens.len(),
            });
        }
        let count = parse_token(tokens[0])?;
        let mut moments = [T::zero(); ORDER];
        for (moment, token) in moments.iter_mut().zip(&tokens[1..]) {
            *moment = T::from_delimited(token)?;
        }
        Ok(Self { count, moments })
    }
}

impl<T: MomentValue, const ORDER: usize> Checksum for CentralMoments<T, ORDER> {
    fn checksum(&self, seed: u64) -> u64 {
        hash_str(seed, &self.to_delimited())
    }
}

impl<T: MomentValue, const ORDER: usize> Display for CentralMoments<T, ORDER> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}", self.count, self.moments[0].to_delimited())?;
        let m: &[T] = &self.moments;
        if ORDER > 1 {
            let variance = unbiased_variance(self.count, m[1]);
            write!(f, ", {}", variance.to_delimited())?;
            if ORDER > 2 {
                let skewness = if self.count <= 2.0 || m[2].is_zero() {
                    T::zero()
                } else {
                    m[2] / (variance * variance.square_root())
                };
                write!(f, ", {}", skewness.to_delimited())?;
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{join_delimited, split_delimited};
    use crate::constants::LIST_DELIMITER;

    type MeanVarSkew = CentralMoments<f64, 3>;

    fn batch_moments(data: &[f64]) -> (f64, f64, f64) {
        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let m2 = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let m3 = data.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / n;
        (mean, m2, m3)
    }

    #[test]
    fn test_moments_match_batch() {
        let data: Vec<f64> = (0..500).map(|i| (i as f64 * 0.37).sin() * 10.0 + (i % 7) as f64).collect();
        let mut moments = MeanVarSkew::new();
        moments.add_all(&data);
        let (mean, m2, m3) = batch_moments(&data);
        assert!((moments.mean() - mean).abs() < 1e-10, "Expected mean {}, got {}", mean, moments.mean());
        assert!(
            (moments.maximum_likelihood_variance() - m2).abs() < 1e-9,
            "Expected variance {}, got {}",
            m2,
            moments.maximum_likelihood_variance()
        );
        assert!((moments.moment(2) - m3).abs() < 1e-8, "Expected m3 {}, got {}", m3, moments.moment(2));
    }

    #[test]
    fn test_large_offset_is_stable() {
        let mut moments = CentralMoments::<f64, 2>::new();
        for i in 0..10_000 {
            CentralMoments::add(&mut moments, 1e9 + (i % 2) as f64);
        }
        assert!(
            (moments.maximum_likelihood_variance() - 0.25).abs() < 1e-4,
            "Expected 0.25, got {}",
            moments.maximum_likelihood_variance()
        );
    }

    #[test]
    fn test_variance_is_unbiased() {
        let mut moments = CentralMoments::<f64, 2>::new();
        assert_eq!(moments.variance(), 0.0);
        CentralMoments::add(&mut moments, 3.0);
        assert_eq!(moments.variance(), 0.0);
        for x in [1.0, 4.0, 1.0, 5.0, 9.0] {
            CentralMoments::add(&mut moments, x);
            let n = moments.count();
            assert_eq!(moments.variance(), moments.maximum_likelihood_variance() * (n / (n - 1.0)));
        }
    }

    #[test]
    fn test_skewness_sign() {
        let mut right = MeanVarSkew::new();
        right.add_all(&[1.0, 1.0, 1.0, 1.0, 10.0]);
        assert!(right.skewness() > 0.0, "Expected positive skew, got {}", right.skewness());
        let mut symmetric = MeanVarSkew::new();
        symmetric.add_all(&[1.0, 2.0]);
        assert_eq!(symmetric.skewness(), 0.0);
    }

    #[test]
    fn test_weighted_add_matches_repeats() {
        let mut weighted = MeanVarSkew::new();
        weighted.add_weighted(2.0, 3.0);
        weighted.add_weighted(5.0, 2.0);
        let mut repeated = MeanVarSkew::new();
        repeated.add_all(&[2.0, 2.0, 2.0, 5.0, 5.0]);
        assert!((weighted.mean() - repeated.mean()).abs() < 1e-12);
        assert!((weighted.variance() - repeated.variance()).abs() < 1e-12);
        assert!((weighted.skewness() - repeated.skewness()).abs() < 1e-12);
        weighted.add_weighted(100.0, 0.0);
        assert_eq!(weighted.count(), 5.0);
    }

    #[test]
    fn test_subtract_clamps_to_zero_state() {
        let mut a = CentralMoments::<f64, 2>::accumulator(2.0, 1.0, 0.5);
        let b = CentralMoments::<f64, 2>::accumulator(3.0, 2.0, 0.1);
        a -= b;
        assert_eq!(a, CentralMoments::new());
    }

    #[test]
    fn test_age_keeps_point_estimates() {
        let mut moments = CentralMoments::<f64, 2>::new();
        moments.add_all(&[1.0, 2.0, 6.0]);
        let before = moments;
        moments.age(0.5);
        assert_eq!(moments.count(), 1.5);
        assert_eq!(moments.mean(), before.mean());
        assert_eq!(moments.maximum_likelihood_variance(), before.maximum_likelihood_variance());
    }

    #[test]
    fn test_vector_moments_componentwise() {
        let mut moments = CentralMoments::<VectorN<f64, 2>, 2>::new();
        CentralMoments::add(&mut moments, VectorN::from_array([1.0, 10.0]));
        CentralMoments::add(&mut moments, VectorN::from_array([3.0, 30.0]));
        assert_eq!(moments.mean().as_slice(), &[2.0, 20.0]);
        assert_eq!(moments.variance().as_slice(), &[2.0, 200.0]);
    }

    #[test]
    fn test_precision_conversion() {
        let mut moments = CentralMoments::<f64, 1>::new();
        CentralMoments::add(&mut moments, 0.5);
        CentralMoments::add(&mut moments, 1.5);
        let narrow = moments.to_f32();
        assert_eq!(narrow.mean(), 1.0f32);
        assert_eq!(CentralMoments::<f64, 1>::from(narrow), moments);
    }

    #[test]
    fn test_delimited_round_trip() {
        let mut moments = MeanVarSkew::new();
        moments.add_all(&[0.1, 0.7, -3.3, 1e-7]);
        let text = moments.to_delimited();
        assert_eq!(text.matches(MOMENTS_DELIMITER).count(), 3);
        let restored = MeanVarSkew::from_delimited(&text).unwrap();
        assert_eq!(moments, restored);
        assert_eq!(moments.checksum(0), restored.checksum(0));

        let mut vector = CentralMoments::<VectorN<f32, 3>, 2>::new();
        CentralMoments::add(&mut vector, VectorN::from_array([0.1, 0.2, 0.3]));
        CentralMoments::add(&mut vector, VectorN::from_array([1.1, -0.2, 7.3]));
        let restored = CentralMoments::<VectorN<f32, 3>, 2>::from_delimited(&vector.to_delimited()).unwrap();
        assert_eq!(vector, restored);
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(CentralMoments::<f64, 2>::from_delimited(""), Err(ParseError::Empty));
        assert!(CentralMoments::<f64, 2>::from_delimited("1:2").is_err());
        assert!(CentralMoments::<f64, 1>::from_delimited("1:x").is_err());
    }

    #[test]
    fn test_list_round_trip() {
        let moments: Vec<CentralMoments<f64, 2>> = (0..5)
            .map(|i| CentralMoments::<f64, 2>::accumulator(i as f64, 0.5 * i as f64, 0.1))
            .collect();
        let text = join_delimited(&moments, LIST_DELIMITER);
        let restored: Vec<CentralMoments<f64, 2>> = split_delimited(&text, LIST_DELIMITER).unwrap();
        assert_eq!(moments, restored);
        assert!(split_delimited::<CentralMoments<f64, 2>>("", LIST_DELIMITER).unwrap().is_empty());
    }

    #[test]
    fn test_ordering_by_count_then_moments() {
        let a = CentralMoments::<f64, 1>::accumulator(1.0, 5.0);
        let b = CentralMoments::<f64, 1>::accumulator(2.0, 0.0);
        let c = CentralMoments::<f64, 1>::accumulator(2.0, 1.0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_display() {
        let moments = CentralMoments::<f64, 2>::accumulator(2.0, 1.0, 0.5);
        assert_eq!(moments.to_string(), "(2, 1, 1)");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    type MeanVarSkew = CentralMoments<f64, 3>;

    fn data_strategy(min_size: usize, max_size: usize) -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(-1000.0f64..1000.0, min_size..=max_size)
    }

    fn close(a: f64, b: f64, scale: f64) -> bool {
        (a - b).abs() <= 1e-8 * scale.max(1.0)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Merging the moments of two halves equals accumulating in order.
        #[test]
        fn prop_merge_matches_sequential(data in data_strategy(2, 200), split in 0usize..200) {
            let split = split % data.len();
            let mut all = MeanVarSkew::new();
            all.add_all(&data);
            let mut lhs = MeanVarSkew::new();
            lhs.add_all(&data[..split]);
            let mut rhs = MeanVarSkew::new();
            rhs.add_all(&data[split..]);
            let merged = lhs + rhs;

            let scale = all.maximum_likelihood_variance();
            prop_assert_eq!(merged.count(), all.count());
            prop_assert!(close(merged.mean(), all.mean(), 1e3), "mean {} vs {}", merged.mean(), all.mean());
            prop_assert!(
                close(merged.maximum_likelihood_variance(), all.maximum_likelihood_variance(), scale),
                "variance {} vs {}",
                merged.maximum_likelihood_variance(),
                all.maximum_likelihood_variance()
            );
            prop_assert!(
                close(merged.moment(2), all.moment(2), scale * scale.sqrt()),
                "skew {} vs {}",
                merged.moment(2),
                all.moment(2)
            );
        }

        /// Splitting off a merged accumulator restores the original.
        #[test]
        fn prop_merge_then_split_is_identity(a in data_strategy(2, 100), b in data_strategy(1, 20)) {
            let mut lhs = CentralMoments::<f64, 2>::new();
            lhs.add_all(&a);
            let mut rhs = CentralMoments::<f64, 2>::new();
            rhs.add_all(&b);
            let restored = (lhs + rhs) - rhs;

            let scale = lhs.maximum_likelihood_variance() + rhs.maximum_likelihood_variance();
            prop_assert!((restored.count() - lhs.count()).abs() < 1e-9);
            prop_assert!(close(restored.mean(), lhs.mean(), 1e3), "mean {} vs {}", restored.mean(), lhs.mean());
            prop_assert!(
                (restored.maximum_likelihood_variance() - lhs.maximum_likelihood_variance()).abs()
                    <= 1e-6 * scale.max(1.0),
                "variance {} vs {}",
                restored.maximum_likelihood_variance(),
                lhs.maximum_likelihood_variance()
            );
        }

        /// Repeated aging composes multiplicatively.
        #[test]
        fn prop_age_composes(data in data_strategy(1, 50), factor in 0.01f64..0.99, k in 1usize..10) {
            let mut repeated = CentralMoments::<f64, 2>::new();
            repeated.add_all(&data);
            let mut once = repeated;
            let count = repeated.count();
            for _ in 0..k {
                repeated.age(factor);
            }
            once.age(factor.powi(k as i32));
            prop_assert!(repeated.count() < count);
            prop_assert!((repeated.count() - once.count()).abs() <= 1e-12 * count);
            prop_assert_eq!(repeated.mean(), once.mean());
        }

        /// Persistence reproduces the accumulator bit for bit.
        #[test]
        fn prop_delimited_round_trip(data in data_strategy(0, 50)) {
            let mut moments = MeanVarSkew::new();
            moments.add_all(&data);
            let restored = MeanVarSkew::from_delimited(&moments.to_delimited()).unwrap();
            prop_assert_eq!(moments, restored);
            prop_assert_eq!(moments.checksum(17), restored.checksum(17));
        }
    }
}
