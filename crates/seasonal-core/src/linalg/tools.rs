//! Decomposition based operations through nalgebra.
//!
//! The packed types only implement arithmetic. Anything needing a matrix
//! decomposition converts to a dense nalgebra matrix in double precision,
//! does the work there, and converts back.

use nalgebra::{DMatrix, DVector, SMatrix, SVector, SymmetricEigen};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::constants::{LOG_2PI, SINGULAR_EIGENVALUE_TOLERANCE};
use crate::error::LinalgError;
use crate::linalg::storage::Storage;
use crate::linalg::symmetric::SymmetricMatrix;
use crate::linalg::vector::{DenseVector, VectorN};
use crate::linalg::SymmetricMatrixN;
use crate::scalar::Scalar;

// ============================================================================
// Conversions
// ============================================================================

/// Copy a vector into a dense nalgebra vector.
pub fn to_dvector<S: Storage>(x: &DenseVector<S>) -> DVector<f64> {
    DVector::from_iterator(x.dimension(), x.iter().map(|x| x.as_f64()))
}

/// Copy a dense nalgebra vector, truncating or zero padding for fixed storage.
pub fn from_dvector<S: Storage>(x: &DVector<f64>) -> DenseVector<S> {
    let mut result = DenseVector::<S>::with_dimension(x.len());
    for (y, &x) in result.as_mut_slice().iter_mut().zip(x.iter()) {
        *y = S::Elem::cast_f64(x);
    }
    result
}

/// Expand a packed symmetric matrix into a dense nalgebra matrix.
pub fn to_dmatrix<S: Storage>(m: &SymmetricMatrix<S>) -> DMatrix<f64> {
    let d = m.dimension();
    DMatrix::from_fn(d, d, |i, j| m.get(i, j).as_f64())
}

/// Pack the lower triangle of a dense nalgebra matrix.
pub fn from_dmatrix<S: Storage>(m: &DMatrix<f64>) -> SymmetricMatrix<S> {
    let mut result = SymmetricMatrix::<S>::with_dimension(m.nrows());
    let d = result.dimension().min(m.nrows());
    for i in 0..d {
        for j in 0..=i {
            result.set(i, j, S::Elem::cast_f64(m[(i, j)]));
        }
    }
    result
}

/// Copy a fixed vector into a static nalgebra vector.
pub fn to_svector<T: Scalar, const N: usize>(x: &VectorN<T, N>) -> SVector<f64, N> {
    SVector::<f64, N>::from_fn(|i, _| x[i].as_f64())
}

/// Copy a static nalgebra vector into a fixed vector.
pub fn from_svector<T: Scalar, const N: usize>(x: &SVector<f64, N>) -> VectorN<T, N> {
    let mut result = VectorN::<T, N>::zeros();
    for i in 0..N {
        result[i] = T::cast_f64(x[i]);
    }
    result
}

/// Expand a fixed symmetric matrix into a static nalgebra matrix.
pub fn to_smatrix<T: Scalar, const N: usize>(m: &SymmetricMatrixN<T, N>) -> SMatrix<f64, N, N> {
    SMatrix::<f64, N, N>::from_fn(|i, j| m.get(i, j).as_f64())
}

/// Pack the lower triangle of a static nalgebra matrix.
pub fn from_smatrix<T: Scalar, const N: usize>(m: &SMatrix<f64, N, N>) -> SymmetricMatrixN<T, N> {
    let mut result = SymmetricMatrixN::<T, N>::zeros();
    for i in 0..N {
        for j in 0..=i {
            result.set(i, j, T::cast_f64(m[(i, j)]));
        }
    }
    result
}

// ============================================================================
// Decompositions
// ============================================================================

/// The symmetric eigen-decomposition with its retained subspace.
struct Spectrum {
    eigen: SymmetricEigen<f64, nalgebra::Dyn>,
    threshold: f64,
}

impl Spectrum {
    fn of<S: Storage>(m: &SymmetricMatrix<S>) -> Result<Self, LinalgError> {
        let eigen = SymmetricEigen::new(to_dmatrix(m));
        if eigen.eigenvalues.iter().any(|x| !x.is_finite()) {
            return Err(LinalgError::NonFinite);
        }
        let max = eigen.eigenvalues.iter().fold(0.0f64, |max, &x| max.max(x));
        Ok(Self {
            eigen,
            threshold: SINGULAR_EIGENVALUE_TOLERANCE * max,
        })
    }

    fn is_singular(&self, eigenvalue: f64) -> bool {
        eigenvalue <= self.threshold
    }

    /// Retained eigenvalues, failing on a singular direction unless ignored.
    fn retained(&self, ignore_singular_subspace: bool) -> Result<Vec<usize>, LinalgError> {
        let mut result = Vec::with_capacity(self.eigen.eigenvalues.len());
        for (i, &lambda) in self.eigen.eigenvalues.iter().enumerate() {
            if !self.is_singular(lambda) {
                result.push(i);
            } else if !ignore_singular_subspace {
                return Err(LinalgError::Singular);
            }
        }
        Ok(result)
    }
}

/// The inverse of a non-singular symmetric matrix.
pub fn inverse<S: Storage>(m: &SymmetricMatrix<S>) -> Result<SymmetricMatrix<S>, LinalgError> {
    let inverse = to_dmatrix(m).try_inverse().ok_or(LinalgError::Singular)?;
    if inverse.iter().any(|x| !x.is_finite()) {
        return Err(LinalgError::NonFinite);
    }
    Ok(from_dmatrix(&((&inverse + inverse.transpose()) * 0.5)))
}

/// The determinant.
pub fn determinant<S: Storage>(m: &SymmetricMatrix<S>) -> f64 {
    to_dmatrix(m).determinant()
}

/// Eigenvalues in ascending order.
pub fn eigenvalues<S: Storage>(m: &SymmetricMatrix<S>) -> Vec<f64> {
    let mut result: Vec<f64> = to_dmatrix(m).symmetric_eigenvalues().iter().copied().collect();
    result.sort_by(|a, b| a.total_cmp(b));
    result
}

/// The log determinant.
///
/// With `ignore_singular_subspace` the eigenvalues below the singular
/// tolerance are skipped, giving the log pseudo-determinant. Otherwise a
/// singular matrix is an error.
pub fn log_determinant<S: Storage>(
    m: &SymmetricMatrix<S>,
    ignore_singular_subspace: bool,
) -> Result<f64, LinalgError> {
    let spectrum = Spectrum::of(m)?;
    let retained = spectrum.retained(ignore_singular_subspace)?;
    if retained.is_empty() && m.dimension() > 0 {
        return Err(LinalgError::Singular);
    }
    Ok(retained
        .iter()
        .map(|&i| spectrum.eigen.eigenvalues[i].ln())
        .sum())
}

/// The quadratic form `x^T C^-1 x`.
///
/// # Arguments
///
/// * `covariance` - The matrix `C`
/// * `residual` - The vector `x`
/// * `ignore_singular_subspace` - Drop the component of `x` on the singular
///   subspace of `C` rather than failing
pub fn inverse_quadratic_form<S: Storage>(
    covariance: &SymmetricMatrix<S>,
    residual: &DenseVector<S>,
    ignore_singular_subspace: bool,
) -> Result<f64, LinalgError> {
    let spectrum = Spectrum::of(covariance)?;
    inverse_quadratic_form_with(&spectrum, &to_dvector(residual), ignore_singular_subspace)
        .map(|(result, _)| result)
}

fn inverse_quadratic_form_with(
    spectrum: &Spectrum,
    x: &DVector<f64>,
    ignore_singular_subspace: bool,
) -> Result<(f64, usize), LinalgError> {
    let retained = spectrum.retained(ignore_singular_subspace)?;
    let mut result = 0.0;
    for &i in &retained {
        let projection = spectrum.eigen.eigenvectors.column(i).dot(x);
        result += projection * projection / spectrum.eigen.eigenvalues[i];
    }
    if !result.is_finite() {
        return Err(LinalgError::NonFinite);
    }
    Ok((result, retained.len()))
}

/// Log likelihood of `residual` under a zero mean Gaussian with `covariance`.
///
/// Computes `-0.5 (x^T C^-1 x + rank ln(2 pi) + ln|C|)` where the rank and
/// determinant are those of the retained subspace.
pub fn gaussian_log_likelihood<S: Storage>(
    covariance: &SymmetricMatrix<S>,
    residual: &DenseVector<S>,
    ignore_singular_subspace: bool,
) -> Result<f64, LinalgError> {
    let spectrum = Spectrum::of(covariance)?;
    let (quadratic, rank) =
        inverse_quadratic_form_with(&spectrum, &to_dvector(residual), ignore_singular_subspace)?;
    if rank == 0 {
        return Err(LinalgError::Singular);
    }
    let log_determinant: f64 = spectrum
        .retained(ignore_singular_subspace)?
        .iter()
        .map(|&i| spectrum.eigen.eigenvalues[i].ln())
        .sum();
    Ok(-0.5 * (quadratic + rank as f64 * LOG_2PI + log_determinant))
}

/// Draw `n` points from the Gaussian with `mean` and `covariance`.
///
/// Negative eigenvalues from rounding are treated as zero.
pub fn sample_gaussian<S: Storage, R: Rng + ?Sized>(
    rng: &mut R,
    n: usize,
    mean: &DenseVector<S>,
    covariance: &SymmetricMatrix<S>,
) -> Vec<DenseVector<S>> {
    let eigen = SymmetricEigen::new(to_dmatrix(covariance));
    let scales: Vec<f64> = eigen.eigenvalues.iter().map(|&x| x.max(0.0).sqrt()).collect();
    let mean = to_dvector(mean);

    let mut result = Vec::with_capacity(n);
    for _ in 0..n {
        let mut x = mean.clone();
        for (i, &scale) in scales.iter().enumerate() {
            let z: f64 = rng.sample(StandardNormal);
            x += eigen.eigenvectors.column(i) * (scale * z);
        }
        result.push(from_dvector(&x));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{SymmetricMatrixX, VectorX};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn example() -> SymmetricMatrixN<f64, 2> {
        SymmetricMatrix::from_rows(&[vec![4.0], vec![1.0, 3.0]]).unwrap()
    }

    #[test]
    fn test_inverse_and_determinant() {
        let m = example();
        let inv = inverse(&m).unwrap();
        assert!((inv.get(0, 0) - 3.0 / 11.0).abs() < 1e-12, "got {}", inv.get(0, 0));
        assert!((inv.get(1, 0) + 1.0 / 11.0).abs() < 1e-12, "got {}", inv.get(1, 0));
        assert!((inv.get(1, 1) - 4.0 / 11.0).abs() < 1e-12, "got {}", inv.get(1, 1));
        assert!((determinant(&m) - 11.0).abs() < 1e-10);
        let ld = log_determinant(&m, false).unwrap();
        assert!((ld - 11f64.ln()).abs() < 1e-10, "Expected ln 11, got {}", ld);
    }

    #[test]
    fn test_eigenvalues_sorted() {
        let m = SymmetricMatrixX::<f64>::from_rows(&[vec![2.0], vec![0.0, 1.0], vec![0.0, 0.0, 3.0]])
            .unwrap();
        let values = eigenvalues(&m);
        for (x, expected) in values.iter().zip([1.0, 2.0, 3.0]) {
            assert!((x - expected).abs() < 1e-12, "Expected {}, got {}", expected, x);
        }
    }

    #[test]
    fn test_quadratic_form_matches_inverse() {
        let m = example();
        let x = VectorN::from_array([1.0, -2.0]);
        let q = inverse_quadratic_form(&m, &x, false).unwrap();
        let expected = inverse(&m).unwrap().mul_vector(&x).inner(&x);
        assert!((q - expected).abs() < 1e-12, "Expected {}, got {}", expected, q);

        let ll = gaussian_log_likelihood(&m, &x, false).unwrap();
        let expected = -0.5 * (q + 2.0 * LOG_2PI + 11f64.ln());
        assert!((ll - expected).abs() < 1e-10, "Expected {}, got {}", expected, ll);
    }

    #[test]
    fn test_singular_subspace_handling() {
        let m = VectorX::from_vec(vec![1.0, 1.0]).outer();
        let x = VectorX::from_vec(vec![1.0, 1.0]);
        assert_eq!(inverse_quadratic_form(&m, &x, false), Err(LinalgError::Singular));
        let q = inverse_quadratic_form(&m, &x, true).unwrap();
        // x lies on the eigenvector (1, 1)/sqrt(2) with eigenvalue 2.
        assert!((q - 1.0).abs() < 1e-10, "Expected 1, got {}", q);
        let ld = log_determinant(&m, true).unwrap();
        assert!((ld - 2f64.ln()).abs() < 1e-10, "Expected ln 2, got {}", ld);
        assert!(log_determinant(&m, false).is_err());
    }

    #[test]
    fn test_static_conversions_round_trip() {
        let m = example();
        assert_eq!(from_smatrix::<f64, 2>(&to_smatrix(&m)), m);
        let x = VectorN::from_array([0.5f32, 2.0]);
        assert_eq!(from_svector::<f32, 2>(&to_svector(&x)), x);
        let y = VectorX::from_vec(vec![1.0, 2.0, 3.0]);
        assert_eq!(from_dvector::<Vec<f64>>(&to_dvector(&y)), y);
    }

    #[test]
    fn test_sample_gaussian_moments() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let mean = VectorN::from_array([1.0, -1.0]);
        let covariance = example();
        let samples = sample_gaussian(&mut rng, 20_000, &mean, &covariance);
        assert_eq!(samples.len(), 20_000);

        let n = samples.len() as f64;
        let mut m = VectorN::<f64, 2>::zeros();
        for x in &samples {
            m += x;
        }
        m /= n;
        let mut c = SymmetricMatrixN::<f64, 2>::zeros();
        for x in &samples {
            c += (x - &m).outer();
        }
        c /= n;
        assert!((m[0] - 1.0).abs() < 0.05, "mean[0] = {}", m[0]);
        assert!((m[1] + 1.0).abs() < 0.05, "mean[1] = {}", m[1]);
        assert!((c.get(0, 0) - 4.0).abs() < 0.2, "c00 = {}", c.get(0, 0));
        assert!((c.get(1, 0) - 1.0).abs() < 0.1, "c10 = {}", c.get(1, 0));
        assert!((c.get(1, 1) - 3.0).abs() < 0.15, "c11 = {}", c.get(1, 1));
    }
}
