//! Delimited string encoding and checksums.
//!
//! Every persisted type renders itself to a canonical string; the checksum of
//! a value is the FNV-1a hash of that same string, so a restored value always
//! reproduces the checksum of the original.

use std::hash::Hasher;
use std::str::FromStr;

use fnv::FnvHasher;

use crate::error::ParseError;

/// Lossless conversion to and from a delimited string.
pub trait Delimited: Sized {
    /// Render the canonical delimited representation.
    fn to_delimited(&self) -> String;

    /// Parse a value previously produced by [`Delimited::to_delimited`].
    fn from_delimited(value: &str) -> Result<Self, ParseError>;
}

/// A 64-bit checksum chained through a seed.
pub trait Checksum {
    /// Combine `seed` with the checksum of this value.
    fn checksum(&self, seed: u64) -> u64;
}

/// Hash `raw` with FNV-1a keyed by `seed`.
pub fn hash_str(seed: u64, raw: &str) -> u64 {
    let mut hasher = FnvHasher::with_key(seed);
    hasher.write(raw.as_bytes());
    hasher.finish()
}

/// Parse a single numeric token, logging on failure.
pub fn parse_token<T: FromStr>(token: &str) -> Result<T, ParseError> {
    token.trim().parse::<T>().map_err(|_| {
        tracing::error!(token, "Invalid numeric token");
        ParseError::BadNumber {
            token: token.to_string(),
        }
    })
}

/// Split `value` on `delimiter` and parse every token.
///
/// An empty string yields no tokens.
pub fn parse_tokens<T: FromStr>(value: &str, delimiter: char) -> Result<Vec<T>, ParseError> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value.split(delimiter).map(parse_token).collect()
}

/// Join the delimited renderings of `values` with `delimiter`.
pub fn join_delimited<T: Delimited>(values: &[T], delimiter: char) -> String {
    let mut result = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            result.push(delimiter);
        }
        result.push_str(&value.to_delimited());
    }
    result
}

/// Split `value` on `delimiter` and parse every part.
///
/// The inverse of [`join_delimited`]; an empty string yields no values.
pub fn split_delimited<T: Delimited>(value: &str, delimiter: char) -> Result<Vec<T>, ParseError> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value.split(delimiter).map(T::from_delimited).collect()
}

macro_rules! float_codec {
    ($($t:ty),*) => {
        $(
            impl Delimited for $t {
                fn to_delimited(&self) -> String {
                    self.to_string()
                }

                fn from_delimited(value: &str) -> Result<Self, ParseError> {
                    parse_token(value)
                }
            }

            impl Checksum for $t {
                fn checksum(&self, seed: u64) -> u64 {
                    hash_str(seed, &self.to_string())
                }
            }
        )*
    };
}

float_codec!(f32, f64);

macro_rules! integer_checksum {
    ($($t:ty),*) => {
        $(
            impl Checksum for $t {
                fn checksum(&self, seed: u64) -> u64 {
                    hash_str(seed, &self.to_string())
                }
            }
        )*
    };
}

integer_checksum!(i32, i64, u32, u64, usize);

impl Checksum for bool {
    fn checksum(&self, seed: u64) -> u64 {
        u64::from(*self).checksum(seed)
    }
}

impl<T: Checksum> Checksum for [T] {
    fn checksum(&self, seed: u64) -> u64 {
        self.iter().fold(seed, |seed, value| value.checksum(seed))
    }
}

impl<T: Checksum> Checksum for Vec<T> {
    fn checksum(&self, seed: u64) -> u64 {
        self.as_slice().checksum(seed)
    }
}

impl<A: Checksum, B: Checksum> Checksum for (A, B) {
    fn checksum(&self, seed: u64) -> u64 {
        self.1.checksum(self.0.checksum(seed))
    }
}
