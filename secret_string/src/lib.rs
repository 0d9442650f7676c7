//! A wrapper around strings that hides their contents when printed or
//! formatted for debugging, and compares them in constant time.
//!
//! It WILL serialize the value when the `serde` feature is enabled, so it can
//! live in a server-side session alongside the rest of the user's state.
//!
//! # Examples
//! ```
//! use secret_string::SecretString;
//! let secret = SecretString::new("ya29.access-token");
//! assert_eq!(format!("{}", secret), "*****************");
//! assert_eq!(format!("{:?}", secret), "SecretString(*****************)");
//! assert!(secret.ct_eq("ya29.access-token"));
//! ```

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

use std::convert::Infallible;
use std::fmt::Debug;
use std::str::FromStr;

use subtle::ConstantTimeEq;

/// An owned string that is redacted in `Display` and `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        SecretString(s.into())
    }

    /// Returns the underlying value.
    pub fn value(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a string of asterisks (*) with the same length as the secret.
    pub fn as_stars(&self) -> String {
        "*".repeat(self.len())
    }

    /// Compares against `other` without short-circuiting on the first
    /// differing byte. Differing lengths still return early.
    pub fn ct_eq(&self, other: &str) -> bool {
        self.0.as_bytes().ct_eq(other.as_bytes()).into()
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        SecretString(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        SecretString(s.to_string())
    }
}

/// Lets `clap` and friends parse secrets straight from arguments or the environment.
impl FromStr for SecretString {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SecretString::new(s))
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_stars())
    }
}

impl Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString({})", self.as_stars())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.value())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self::new(String::deserialize(deserializer)?))
    }
}
