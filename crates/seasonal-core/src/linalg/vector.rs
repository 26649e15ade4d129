//! Dense vectors over a [`Storage`] strategy.

use std::ops::{Add, AddAssign, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, Sub, SubAssign};

use num_traits::{Float, Zero};

use crate::codec::{hash_str, parse_tokens, Checksum, Delimited};
use crate::constants::LINALG_DELIMITER;
use crate::error::ParseError;
use crate::linalg::storage::Storage;
use crate::linalg::symmetric::SymmetricMatrix;
use crate::scalar::Scalar;

/// A dense vector whose dimension is fixed by its storage.
///
/// `*` and `/` between two vectors act component-wise. Ordering compares
/// components lexicographically.
///
/// # Example
///
/// ```
/// use seasonal_core::linalg::VectorN;
///
/// let x = VectorN::from_array([3.0, 4.0]);
/// assert_eq!(x.euclidean(), 5.0);
/// assert_eq!((x * x).as_slice(), &[9.0, 16.0]);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct DenseVector<S> {
    components: S,
}

/// A vector whose dimension is a compile time constant.
pub type VectorN<T, const N: usize> = DenseVector<[T; N]>;

/// A vector whose dimension is chosen at run time.
pub type VectorX<T> = DenseVector<Vec<T>>;

impl<S: Storage> Default for DenseVector<S> {
    fn default() -> Self {
        Self::with_dimension(0)
    }
}

impl<S: Storage> DenseVector<S> {
    /// Wrap existing storage.
    pub fn from_storage(components: S) -> Self {
        Self { components }
    }

    /// The zero vector of `dimension`, ignored for fixed storage.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            components: S::zeros(dimension),
        }
    }

    /// A vector of `dimension` with every component equal to `value`.
    pub fn filled_with(dimension: usize, value: S::Elem) -> Self {
        let mut result = Self::with_dimension(dimension);
        result.as_mut_slice().fill(value);
        result
    }

    /// Copy the components of `values`.
    pub fn from_slice(values: &[S::Elem]) -> Result<Self, ParseError> {
        S::from_vec(values.to_vec()).map(Self::from_storage)
    }

    /// The zero vector with the same dimension as this one.
    pub fn zeros_like(&self) -> Self {
        Self::with_dimension(self.dimension())
    }

    pub fn dimension(&self) -> usize {
        self.components.as_slice().len()
    }

    pub fn as_slice(&self) -> &[S::Elem] {
        self.components.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [S::Elem] {
        self.components.as_mut_slice()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, S::Elem> {
        self.as_slice().iter()
    }

    pub fn into_storage(self) -> S {
        self.components
    }

    /// Inner product with `other`.
    pub fn inner(&self, other: &Self) -> S::Elem {
        self.iter()
            .zip(other.iter())
            .fold(S::Elem::zero(), |sum, (&x, &y)| sum + x * y)
    }

    /// Sum of absolute components.
    pub fn l1(&self) -> S::Elem {
        self.iter().fold(S::Elem::zero(), |sum, &x| sum + x.abs())
    }

    /// Euclidean norm.
    pub fn euclidean(&self) -> S::Elem {
        self.inner(self).sqrt()
    }

    /// The outer product of this vector with itself.
    pub fn outer(&self) -> SymmetricMatrix<S> {
        let d = self.dimension();
        let x = self.as_slice();
        let mut packed = Vec::with_capacity(d * (d + 1) / 2);
        for i in 0..d {
            for j in 0..=i {
                packed.push(x[i] * x[j]);
            }
        }
        SymmetricMatrix::from_packed_parts(d, packed)
    }

    /// The diagonal matrix with this vector on its diagonal.
    pub fn diagonal(&self) -> SymmetricMatrix<S> {
        let mut result = SymmetricMatrix::with_dimension(self.dimension());
        for (i, &x) in self.iter().enumerate() {
            result.set(i, i, x);
        }
        result
    }

    /// True if every component is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.iter().all(|&x| x == S::Elem::zero())
    }

    /// Apply `f` to every component.
    pub fn map(&self, f: impl Fn(S::Elem) -> S::Elem) -> Self {
        let mut result = self.clone();
        for x in result.as_mut_slice() {
            *x = f(*x);
        }
        result
    }

    /// Combine corresponding components of `self` and `other` with `f`.
    pub fn zip_map(&self, other: &Self, f: impl Fn(S::Elem, S::Elem) -> S::Elem) -> Self {
        let mut result = self.clone();
        for (x, &y) in result.as_mut_slice().iter_mut().zip(other.iter()) {
            *x = f(*x, y);
        }
        result
    }

    /// Multiply every component by `factor` in place.
    pub fn scale(&mut self, factor: S::Elem) {
        for x in self.as_mut_slice() {
            *x *= factor;
        }
    }

    /// A copy with every component multiplied by `factor`.
    pub fn scaled(&self, factor: S::Elem) -> Self {
        self.map(|x| x * factor)
    }

    /// Component-wise minimum.
    pub fn min(&self, other: &Self) -> Self {
        self.zip_map(other, |x, y| x.min(y))
    }

    /// Component-wise maximum.
    pub fn max(&self, other: &Self) -> Self {
        self.zip_map(other, |x, y| x.max(y))
    }

    /// Component-wise absolute value.
    pub fn abs(&self) -> Self {
        self.map(|x| x.abs())
    }

    /// Component-wise square root.
    pub fn sqrt(&self) -> Self {
        self.map(|x| x.sqrt())
    }

    /// Convert the components to another precision.
    pub fn cast<U: Scalar>(&self) -> DenseVector<S::Rebind<U>> {
        let mut result = DenseVector::<S::Rebind<U>>::with_dimension(self.dimension());
        for (y, &x) in result.as_mut_slice().iter_mut().zip(self.iter()) {
            *y = U::cast_f64(x.as_f64());
        }
        result
    }
}

impl<T: Scalar, const N: usize> DenseVector<[T; N]> {
    /// The zero vector.
    pub fn zeros() -> Self {
        Self::with_dimension(N)
    }

    pub fn from_array(components: [T; N]) -> Self {
        Self { components }
    }

    /// Every component equal to `value`.
    pub fn filled(value: T) -> Self {
        Self {
            components: [value; N],
        }
    }
}

impl<T: Scalar> DenseVector<Vec<T>> {
    /// The zero vector of `dimension`.
    pub fn zeros(dimension: usize) -> Self {
        Self::with_dimension(dimension)
    }

    pub fn from_vec(components: Vec<T>) -> Self {
        Self { components }
    }

    /// `dimension` components equal to `value`.
    pub fn filled(dimension: usize, value: T) -> Self {
        Self {
            components: vec![value; dimension],
        }
    }

    /// Append a component.
    pub fn push(&mut self, value: T) {
        self.components.push(value);
    }

    /// Append components.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, values: I) {
        self.components.extend(values);
    }
}

impl<T: Scalar, const N: usize> From<[T; N]> for DenseVector<[T; N]> {
    fn from(components: [T; N]) -> Self {
        Self { components }
    }
}

impl<T: Scalar> From<Vec<T>> for DenseVector<Vec<T>> {
    fn from(components: Vec<T>) -> Self {
        Self { components }
    }
}

impl<T: Scalar> FromIterator<T> for DenseVector<Vec<T>> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            components: iter.into_iter().collect(),
        }
    }
}

impl<S: Storage> Index<usize> for DenseVector<S> {
    type Output = S::Elem;

    fn index(&self, i: usize) -> &S::Elem {
        &self.as_slice()[i]
    }
}

impl<S: Storage> IndexMut<usize> for DenseVector<S> {
    fn index_mut(&mut self, i: usize) -> &mut S::Elem {
        &mut self.as_mut_slice()[i]
    }
}

macro_rules! componentwise_op {
    ($op:ident, $method:ident, $assign_op:ident, $assign_method:ident, $sym:tt) => {
        impl<S: Storage> $assign_op<&DenseVector<S>> for DenseVector<S> {
            fn $assign_method(&mut self, rhs: &DenseVector<S>) {
                for (x, &y) in self.as_mut_slice().iter_mut().zip(rhs.iter()) {
                    *x = *x $sym y;
                }
            }
        }

        impl<S: Storage> $assign_op for DenseVector<S> {
            fn $assign_method(&mut self, rhs: DenseVector<S>) {
                $assign_op::$assign_method(self, &rhs);
            }
        }

        impl<S: Storage> $op for DenseVector<S> {
            type Output = DenseVector<S>;

            fn $method(mut self, rhs: DenseVector<S>) -> DenseVector<S> {
                $assign_op::$assign_method(&mut self, &rhs);
                self
            }
        }

        impl<S: Storage> $op<&DenseVector<S>> for DenseVector<S> {
            type Output = DenseVector<S>;

            fn $method(mut self, rhs: &DenseVector<S>) -> DenseVector<S> {
                $assign_op::$assign_method(&mut self, rhs);
                self
            }
        }

        impl<S: Storage> $op<&DenseVector<S>> for &DenseVector<S> {
            type Output = DenseVector<S>;

            fn $method(self, rhs: &DenseVector<S>) -> DenseVector<S> {
                let mut result = self.clone();
                $assign_op::$assign_method(&mut result, rhs);
                result
            }
        }
    };
}

componentwise_op!(Add, add, AddAssign, add_assign, +);
componentwise_op!(Sub, sub, SubAssign, sub_assign, -);
componentwise_op!(Mul, mul, MulAssign, mul_assign, *);
componentwise_op!(Div, div, DivAssign, div_assign, /);

macro_rules! scalar_op {
    ($($t:ty),*) => {
        $(
            impl<S: Storage<Elem = $t>> Mul<$t> for DenseVector<S> {
                type Output = DenseVector<S>;

                fn mul(mut self, rhs: $t) -> DenseVector<S> {
                    self.scale(rhs);
                    self
                }
            }

            impl<S: Storage<Elem = $t>> MulAssign<$t> for DenseVector<S> {
                fn mul_assign(&mut self, rhs: $t) {
                    self.scale(rhs);
                }
            }

            impl<S: Storage<Elem = $t>> Div<$t> for DenseVector<S> {
                type Output = DenseVector<S>;

                fn div(mut self, rhs: $t) -> DenseVector<S> {
                    for x in self.as_mut_slice() {
                        *x /= rhs;
                    }
                    self
                }
            }

            impl<S: Storage<Elem = $t>> DivAssign<$t> for DenseVector<S> {
                fn div_assign(&mut self, rhs: $t) {
                    for x in self.as_mut_slice() {
                        *x /= rhs;
                    }
                }
            }
        )*
    };
}

scalar_op!(f32, f64);

impl<S: Storage> Neg for DenseVector<S> {
    type Output = DenseVector<S>;

    fn neg(self) -> DenseVector<S> {
        self.map(|x| -x)
    }
}

impl<S: Storage> Delimited for DenseVector<S> {
    fn to_delimited(&self) -> String {
        let mut result = String::new();
        for (i, x) in self.iter().enumerate() {
            if i > 0 {
                result.push(LINALG_DELIMITER);
            }
            result.push_str(&x.to_string());
        }
        result
    }

    fn from_delimited(value: &str) -> Result<Self, ParseError> {
        let components = parse_tokens(value, LINALG_DELIMITER)?;
        S::from_vec(components).map(Self::from_storage).map_err(|err| {
            tracing::error!(value, %err, "Failed to parse vector");
            err
        })
    }
}

impl<S: Storage> Checksum for DenseVector<S> {
    fn checksum(&self, seed: u64) -> u64 {
        hash_str(seed, &self.to_delimited())
    }
}
