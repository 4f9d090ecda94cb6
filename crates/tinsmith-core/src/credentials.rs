// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Random credential generation.
//!
//! Database names, role names and passwords are drawn from a fixed
//! lowercase-alphanumeric alphabet. Nothing in that alphabet needs quoting,
//! so generated values can be embedded in DDL after validation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

/// Symbols every generated credential is drawn from.
pub const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Prefix of generated database names.
pub const DATABASE_PREFIX: &str = "db";
/// Number of random characters after [`DATABASE_PREFIX`].
pub const DATABASE_RANDOM_LEN: usize = 40;
/// Prefix of generated role names.
pub const USER_PREFIX: &str = "u";
/// Number of random characters after [`USER_PREFIX`].
pub const USER_RANDOM_LEN: usize = 16;
/// Length of generated passwords.
pub const PASSWORD_LEN: usize = 64;

// Largest multiple of 36 that fits in a byte. Bytes at or above it are
// discarded so every symbol is equally likely.
const REJECTION_BOUND: u8 = 252;

/// Errors from credential generation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// The secure random source failed.
    #[error("secure random source failed: {0}")]
    RandomSource(String),

    /// The source returned a value of the wrong length.
    #[error("random source returned {actual} characters, expected {expected}")]
    Length {
        /// Requested length.
        expected: usize,
        /// Length actually returned.
        actual: usize,
    },

    /// The source returned a symbol outside [`ALPHABET`].
    #[error("random source returned a character outside the credential alphabet")]
    Alphabet,
}

/// A source of random identifier text.
///
/// Implementations return exactly `n` characters from [`ALPHABET`].
pub trait RandomNameSource: Send + Sync {
    /// Draw `n` random characters.
    fn random(&self, n: usize) -> Result<String, CredentialError>;
}

/// Operating-system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomNameSource for OsRandom {
    fn random(&self, n: usize) -> Result<String, CredentialError> {
        let mut out = String::with_capacity(n);
        let mut buf = [0u8; 64];

        while out.len() < n {
            OsRng
                .try_fill_bytes(&mut buf)
                .map_err(|e| CredentialError::RandomSource(e.to_string()))?;

            for &byte in buf.iter().filter(|b| **b < REJECTION_BOUND) {
                if out.len() == n {
                    break;
                }
                out.push(ALPHABET[(byte % 36) as usize] as char);
            }
        }

        Ok(out)
    }
}

/// Deterministic name source for tests.
///
/// Each draw returns a zero-padded counter, so successive names are unique
/// and predictable. A source built with [`CountingNames::failing`] errors on
/// every draw.
#[derive(Debug, Default)]
pub struct CountingNames {
    next: AtomicU64,
    fail: AtomicBool,
}

impl CountingNames {
    /// Create a counting source starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            fail: AtomicBool::new(false),
        }
    }

    /// Create a source whose every draw fails.
    pub fn failing() -> Self {
        let names = Self::new();
        names.set_failing(true);
        names
    }

    /// Toggle failure of subsequent draws.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl RandomNameSource for CountingNames {
    fn random(&self, n: usize) -> Result<String, CredentialError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CredentialError::RandomSource(
                "counting source set to fail".to_string(),
            ));
        }
        let value = self.next.fetch_add(1, Ordering::SeqCst);
        let digits = value.to_string();
        if digits.len() >= n {
            return Ok(digits[digits.len() - n..].to_string());
        }
        Ok(format!("{}{}", "0".repeat(n - digits.len()), digits))
    }
}

/// Draw `n` characters and check the source kept its contract.
///
/// An empty or short draw is an error, never a usable credential.
pub fn draw(source: &dyn RandomNameSource, n: usize) -> Result<String, CredentialError> {
    let value = source.random(n)?;
    if value.len() != n {
        return Err(CredentialError::Length {
            expected: n,
            actual: value.len(),
        });
    }
    if !value.bytes().all(|b| ALPHABET.contains(&b)) {
        return Err(CredentialError::Alphabet);
    }
    Ok(value)
}

/// Generate a backing database name (`db` + 40 characters).
pub fn database_name(source: &dyn RandomNameSource) -> Result<String, CredentialError> {
    Ok(format!(
        "{DATABASE_PREFIX}{}",
        draw(source, DATABASE_RANDOM_LEN)?
    ))
}

/// Generate a role name (`u` + 16 characters).
pub fn user_name(source: &dyn RandomNameSource) -> Result<String, CredentialError> {
    Ok(format!("{USER_PREFIX}{}", draw(source, USER_RANDOM_LEN)?))
}

/// Generate a role password (64 characters).
pub fn password(source: &dyn RandomNameSource) -> Result<String, CredentialError> {
    draw(source, PASSWORD_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(&'static str);

    impl RandomNameSource for FixedSource {
        fn random(&self, _n: usize) -> Result<String, CredentialError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_os_random_length_and_alphabet() {
        for n in [0, 1, 16, 40, 64, 200] {
            let value = OsRandom.random(n).unwrap();
            assert_eq!(value.len(), n);
            assert!(value.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_os_random_values_differ() {
        let a = OsRandom.random(64).unwrap();
        let b = OsRandom.random(64).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_generated_shapes_fit_columns() {
        let db = database_name(&OsRandom).unwrap();
        assert_eq!(db.len(), 42);
        assert!(db.starts_with("db"));

        let user = user_name(&OsRandom).unwrap();
        assert_eq!(user.len(), 17);
        assert!(user.starts_with('u'));

        let pass = password(&OsRandom).unwrap();
        assert_eq!(pass.len(), 64);
    }

    #[test]
    fn test_empty_draw_is_an_error() {
        let err = user_name(&FixedSource("")).unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Length {
                expected: 16,
                actual: 0
            }
        ));
    }

    #[test]
    fn test_foreign_symbols_are_rejected() {
        let err = draw(&FixedSource("abc;"), 4).unwrap_err();
        assert!(matches!(err, CredentialError::Alphabet));

        let err = draw(&FixedSource("ABCD"), 4).unwrap_err();
        assert!(matches!(err, CredentialError::Alphabet));
    }

    #[test]
    fn test_counting_names() {
        let names = CountingNames::new();
        assert_eq!(names.random(4).unwrap(), "0001");
        assert_eq!(names.random(4).unwrap(), "0002");
        assert_eq!(
            user_name(&names).unwrap(),
            format!("u{}3", "0".repeat(15))
        );
    }

    #[test]
    fn test_counting_names_failing() {
        let names = CountingNames::failing();
        assert!(matches!(
            password(&names),
            Err(CredentialError::RandomSource(_))
        ));

        names.set_failing(false);
        assert!(password(&names).is_ok());
    }
}
