//! Dense vectors and packed symmetric matrices.
//!
//! Fixed and runtime dimensions share one implementation, parameterised by a
//! [`Storage`] strategy. Decompositions go through nalgebra in [`tools`].

mod storage;
mod symmetric;
pub mod tools;
mod vector;

pub use storage::Storage;
pub use symmetric::{packed_len, triangular_dimension, SymmetricMatrix, SymmetricMatrixN, SymmetricMatrixX};
pub use vector::{DenseVector, VectorN, VectorX};
