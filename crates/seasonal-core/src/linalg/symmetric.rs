//! Packed symmetric matrices.
//!
//! Only the lower triangle is stored: element `(i, j)` with `i >= j` lives at
//! index `i (i + 1) / 2 + j`, so `(i, j)` and `(j, i)` can never disagree.

use std::marker::PhantomData;
use std::ops::{Add, AddAssign, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, Sub, SubAssign};

use num_traits::{Float, Zero};

use crate::codec::{hash_str, parse_tokens, Checksum, Delimited};
use crate::constants::LINALG_DELIMITER;
use crate::error::ParseError;
use crate::linalg::storage::Storage;
use crate::linalg::vector::DenseVector;
use crate::scalar::Scalar;

/// A symmetric matrix sharing its dimension strategy with [`DenseVector<S>`].
#[derive(Clone, Debug, PartialEq)]
pub struct SymmetricMatrix<S: Storage> {
    dimension: usize,
    packed: Vec<S::Elem>,
    _storage: PhantomData<S>,
}

/// A symmetric matrix whose dimension is a compile time constant.
pub type SymmetricMatrixN<T, const N: usize> = SymmetricMatrix<[T; N]>;

/// A symmetric matrix whose dimension is chosen at run time.
pub type SymmetricMatrixX<T> = SymmetricMatrix<Vec<T>>;

#[inline]
fn packed_index(i: usize, j: usize) -> usize {
    let (i, j) = if i >= j { (i, j) } else { (j, i) };
    i * (i + 1) / 2 + j
}

/// Number of packed elements of a `dimension` square symmetric matrix.
#[inline]
pub fn packed_len(dimension: usize) -> usize {
    dimension * (dimension + 1) / 2
}

/// The dimension whose packed lower triangle has `len` elements.
pub fn triangular_dimension(len: usize) -> Option<usize> {
    let mut d = 0;
    while packed_len(d) < len {
        d += 1;
    }
    (packed_len(d) == len).then_some(d)
}

impl<S: Storage> Default for SymmetricMatrix<S> {
    fn default() -> Self {
        Self::with_dimension(0)
    }
}

impl<S: Storage> SymmetricMatrix<S> {
    pub(crate) fn from_packed_parts(dimension: usize, packed: Vec<S::Elem>) -> Self {
        Self {
            dimension,
            packed,
            _storage: PhantomData,
        }
    }

    /// The zero matrix of `dimension`, ignored for fixed storage.
    pub fn with_dimension(dimension: usize) -> Self {
        let dimension = S::fixed_dimension().unwrap_or(dimension);
        Self::from_packed_parts(dimension, vec![S::Elem::zero(); packed_len(dimension)])
    }

    /// Build from the packed lower triangle, row by row.
    pub fn from_packed(packed: Vec<S::Elem>) -> Result<Self, ParseError> {
        let dimension = match S::fixed_dimension() {
            Some(n) if packed_len(n) == packed.len() => n,
            Some(n) => {
                return Err(ParseError::WrongLength {
                    expected: packed_len(n),
                    found: packed.len(),
                })
            }
            None => triangular_dimension(packed.len()).ok_or(ParseError::NotTriangular(packed.len()))?,
        };
        Ok(Self::from_packed_parts(dimension, packed))
    }

    /// Build from the lower triangles of `rows`.
    pub fn from_rows(rows: &[Vec<S::Elem>]) -> Result<Self, ParseError> {
        let mut packed = Vec::with_capacity(packed_len(rows.len()));
        for (i, row) in rows.iter().enumerate() {
            if row.len() <= i {
                return Err(ParseError::WrongLength {
                    expected: i + 1,
                    found: row.len(),
                });
            }
            packed.extend_from_slice(&row[..=i]);
        }
        Self::from_packed(packed)
    }

    /// The zero matrix with the same dimension as this one.
    pub fn zeros_like(&self) -> Self {
        Self::from_packed_parts(self.dimension, vec![S::Elem::zero(); self.packed.len()])
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The packed lower triangle.
    pub fn packed(&self) -> &[S::Elem] {
        &self.packed
    }

    pub fn get(&self, i: usize, j: usize) -> S::Elem {
        self.packed[packed_index(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, value: S::Elem) {
        self.packed[packed_index(i, j)] = value;
    }

    /// Sum of the diagonal.
    pub fn trace(&self) -> S::Elem {
        (0..self.dimension).fold(S::Elem::zero(), |sum, i| sum + self.get(i, i))
    }

    /// Frobenius norm of the full square matrix.
    pub fn frobenius(&self) -> S::Elem {
        let two = S::Elem::cast_f64(2.0);
        let mut result = S::Elem::zero();
        for i in 0..self.dimension {
            for j in 0..i {
                let x = self.get(i, j);
                result += two * x * x;
            }
            let x = self.get(i, i);
            result += x * x;
        }
        result.sqrt()
    }

    /// The diagonal as a vector.
    pub fn diagonal(&self) -> DenseVector<S> {
        let mut result = DenseVector::with_dimension(self.dimension);
        for i in 0..self.dimension {
            result[i] = self.get(i, i);
        }
        result
    }

    /// Matrix vector product.
    pub fn mul_vector(&self, x: &DenseVector<S>) -> DenseVector<S> {
        let mut result = DenseVector::with_dimension(self.dimension);
        for i in 0..self.dimension {
            let mut sum = S::Elem::zero();
            for j in 0..self.dimension {
                sum += self.get(i, j) * x[j];
            }
            result[i] = sum;
        }
        result
    }

    /// Multiply element `(i, j)` by `sqrt(scale[i] * scale[j])`.
    ///
    /// This is `D M D` for the diagonal matrix `D = diag(sqrt(scale))`.
    pub fn scale_rows_and_columns(&mut self, scale: &DenseVector<S>) {
        let roots = scale.sqrt();
        for i in 0..self.dimension {
            for j in 0..=i {
                self.packed[packed_index(i, j)] *= roots[i] * roots[j];
            }
        }
    }

    /// Zero row and column `i`.
    pub fn zero_row_and_column(&mut self, i: usize) {
        for j in 0..self.dimension {
            self.set(i, j, S::Elem::zero());
        }
    }

    /// True if every element is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.packed.iter().all(|&x| x == S::Elem::zero())
    }

    /// Apply `f` to every element.
    pub fn map(&self, f: impl Fn(S::Elem) -> S::Elem) -> Self {
        Self::from_packed_parts(self.dimension, self.packed.iter().map(|&x| f(x)).collect())
    }

    /// Multiply every element by `factor` in place.
    pub fn scale(&mut self, factor: S::Elem) {
        for x in &mut self.packed {
            *x *= factor;
        }
    }

    /// A copy with every element multiplied by `factor`.
    pub fn scaled(&self, factor: S::Elem) -> Self {
        self.map(|x| x * factor)
    }

    /// The full square matrix, row by row.
    pub fn to_rows(&self) -> Vec<Vec<S::Elem>> {
        (0..self.dimension)
            .map(|i| (0..self.dimension).map(|j| self.get(i, j)).collect())
            .collect()
    }

    /// Convert the elements to another precision.
    pub fn cast<U: Scalar>(&self) -> SymmetricMatrix<S::Rebind<U>> {
        SymmetricMatrix::from_packed_parts(
            self.dimension,
            self.packed.iter().map(|&x| U::cast_f64(x.as_f64())).collect(),
        )
    }
}

impl<T: Scalar, const N: usize> SymmetricMatrix<[T; N]> {
    /// The zero matrix.
    pub fn zeros() -> Self {
        Self::with_dimension(N)
    }

    /// The identity matrix.
    pub fn identity() -> Self {
        DenseVector::<[T; N]>::filled(T::one()).diagonal()
    }
}

impl<T: Scalar> SymmetricMatrix<Vec<T>> {
    /// The zero matrix of `dimension`.
    pub fn zeros(dimension: usize) -> Self {
        Self::with_dimension(dimension)
    }

    /// The identity matrix of `dimension`.
    pub fn identity(dimension: usize) -> Self {
        DenseVector::<Vec<T>>::filled(dimension, T::one()).diagonal()
    }
}

impl<S: Storage> Index<(usize, usize)> for SymmetricMatrix<S> {
    type Output = S::Elem;

    fn index(&self, (i, j): (usize, usize)) -> &S::Elem {
        &self.packed[packed_index(i, j)]
    }
}

impl<S: Storage> IndexMut<(usize, usize)> for SymmetricMatrix<S> {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut S::Elem {
        &mut self.packed[packed_index(i, j)]
    }
}

macro_rules! elementwise_op {
    ($op:ident, $method:ident, $assign_op:ident, $assign_method:ident, $sym:tt) => {
        impl<S: Storage> $assign_op<&SymmetricMatrix<S>> for SymmetricMatrix<S> {
            fn $assign_method(&mut self, rhs: &SymmetricMatrix<S>) {
                for (x, &y) in self.packed.iter_mut().zip(rhs.packed.iter()) {
                    *x = *x $sym y;
                }
            }
        }

        impl<S: Storage> $assign_op for SymmetricMatrix<S> {
            fn $assign_method(&mut self, rhs: SymmetricMatrix<S>) {
                $assign_op::$assign_method(self, &rhs);
            }
        }

        impl<S: Storage> $op for SymmetricMatrix<S> {
            type Output = SymmetricMatrix<S>;

            fn $method(mut self, rhs: SymmetricMatrix<S>) -> SymmetricMatrix<S> {
                $assign_op::$assign_method(&mut self, &rhs);
                self
            }
        }

        impl<S: Storage> $op<&SymmetricMatrix<S>> for SymmetricMatrix<S> {
            type Output = SymmetricMatrix<S>;

            fn $method(mut self, rhs: &SymmetricMatrix<S>) -> SymmetricMatrix<S> {
                $assign_op::$assign_method(&mut self, rhs);
                self
            }
        }

        impl<S: Storage> $op<&SymmetricMatrix<S>> for &SymmetricMatrix<S> {
            type Output = SymmetricMatrix<S>;

            fn $method(self, rhs: &SymmetricMatrix<S>) -> SymmetricMatrix<S> {
                let mut result = self.clone();
                $assign_op::$assign_method(&mut result, rhs);
                result
            }
        }
    };
}

elementwise_op!(Add, add, AddAssign, add_assign, +);
elementwise_op!(Sub, sub, SubAssign, sub_assign, -);
elementwise_op!(Mul, mul, MulAssign, mul_assign, *);
elementwise_op!(Div, div, DivAssign, div_assign, /);

macro_rules! scalar_op {
    ($($t:ty),*) => {
        $(
            impl<S: Storage<Elem = $t>> Mul<$t> for SymmetricMatrix<S> {
                type Output = SymmetricMatrix<S>;

                fn mul(mut self, rhs: $t) -> SymmetricMatrix<S> {
                    self.scale(rhs);
                    self
                }
            }

            impl<S: Storage<Elem = $t>> MulAssign<$t> for SymmetricMatrix<S> {
                fn mul_assign(&mut self, rhs: $t) {
                    self.scale(rhs);
                }
            }

            impl<S: Storage<Elem = $t>> Div<$t> for SymmetricMatrix<S> {
                type Output = SymmetricMatrix<S>;

                fn div(mut self, rhs: $t) -> SymmetricMatrix<S> {
                    self /= rhs;
                    self
                }
            }

            impl<S: Storage<Elem = $t>> DivAssign<$t> for SymmetricMatrix<S> {
                fn div_assign(&mut self, rhs: $t) {
                    for x in &mut self.packed {
                        *x /= rhs;
                    }
                }
            }
        )*
    };
}

scalar_op!(f32, f64);

impl<S: Storage> Neg for SymmetricMatrix<S> {
    type Output = SymmetricMatrix<S>;

    fn neg(self) -> SymmetricMatrix<S> {
        self.map(|x| -x)
    }
}

impl<S: Storage> Delimited for SymmetricMatrix<S> {
    fn to_delimited(&self) -> String {
        let mut result = String::new();
        for (i, x) in self.packed.iter().enumerate() {
            if i > 0 {
                result.push(LINALG_DELIMITER);
            }
            result.push_str(&x.to_string());
        }
        result
    }

    fn from_delimited(value: &str) -> Result<Self, ParseError> {
        let packed = parse_tokens(value, LINALG_DELIMITER)?;
        Self::from_packed(packed).map_err(|err| {
            tracing::error!(value, %err, "Failed to parse symmetric matrix");
            err
        })
    }
}

impl<S: Storage> Checksum for SymmetricMatrix<S> {
    fn checksum(&self, seed: u64) -> u64 {
        hash_str(seed, &self.to_delimited())
    }
}
