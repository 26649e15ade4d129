//! Storage strategies for dense vectors and packed matrices.
//!
//! A fixed-size array gives a dimension known at compile time, a `Vec` gives
//! a dimension chosen at run time. Everything above this module is written
//! once against [`Storage`].

use std::fmt::Debug;

use crate::error::ParseError;
use crate::scalar::Scalar;

/// Backing store for the components of a dense vector.
pub trait Storage: Clone + Debug + PartialEq + PartialOrd + Send + Sync + 'static {
    /// Component type.
    type Elem: Scalar;

    /// The same strategy holding a different component type.
    type Rebind<U: Scalar>: Storage<Elem = U>;

    /// All-zero storage.
    ///
    /// Fixed-size storage ignores `dimension`.
    fn zeros(dimension: usize) -> Self;

    /// Take ownership of `values`, which must have the right length for
    /// fixed-size storage.
    fn from_vec(values: Vec<Self::Elem>) -> Result<Self, ParseError>;

    /// The dimension if it is fixed at compile time.
    fn fixed_dimension() -> Option<usize>;

    /// Borrow the components.
    fn as_slice(&self) -> &[Self::Elem];

    /// Mutably borrow the components.
    fn as_mut_slice(&mut self) -> &mut [Self::Elem];
}

impl<T: Scalar, const N: usize> Storage for [T; N] {
    type Elem = T;
    type Rebind<U: Scalar> = [U; N];

    fn zeros(_dimension: usize) -> Self {
        [T::zero(); N]
    }

    fn from_vec(values: Vec<T>) -> Result<Self, ParseError> {
        values
            .try_into()
            .map_err(|values: Vec<T>| ParseError::WrongLength {
                expected: N,
                found: values.len(),
            })
    }

    fn fixed_dimension() -> Option<usize> {
        Some(N)
    }

    fn as_slice(&self) -> &[T] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        self
    }
}

impl<T: Scalar> Storage for Vec<T> {
    type Elem = T;
    type Rebind<U: Scalar> = Vec<U>;

    fn zeros(dimension: usize) -> Self {
        vec![T::zero(); dimension]
    }

    fn from_vec(values: Vec<T>) -> Result<Self, ParseError> {
        Ok(values)
    }

    fn fixed_dimension() -> Option<usize> {
        None
    }

    fn as_slice(&self) -> &[T] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_storage_rejects_wrong_length() {
        let err = <[f64; 3]>::from_vec(vec![1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            ParseError::WrongLength {
                expected: 3,
                found: 2
            }
        );
        assert_eq!(<[f64; 3]>::from_vec(vec![1.0, 2.0, 3.0]).unwrap(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(<[f32; 4]>::fixed_dimension(), Some(4));
        assert_eq!(<Vec<f32>>::fixed_dimension(), None);
        assert_eq!(<Vec<f64>>::zeros(5).len(), 5);
        assert_eq!(<[f64; 2]>::zeros(17), [0.0, 0.0]);
    }
}
