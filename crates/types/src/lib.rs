//! Validated primitive types shared across the orderly workspace.
//!
//! Each type here guarantees its invariant once constructed, so downstream code can accept
//! the type instead of re-validating raw strings:
//! - [`NonEmptyText`]: trimmed, non-blank text
//! - [`Sha256Hash`]: 64 lowercase hexadecimal characters
//! - [`Icd10Code`]: surface-valid ICD-10 diagnosis code, normalised to uppercase

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when constructing validated types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypeError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input was not a 64 character lowercase hex digest
    #[error("invalid SHA-256 digest: '{0}'")]
    InvalidHash(String),

    /// The input did not match `Letter Digit Digit [. 1-4 digits]`
    #[error("invalid ICD-10 code format: '{0}'")]
    InvalidIcd10(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText`, trimming the input.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::Empty`] if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TypeError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TypeError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Hex-encoded SHA-256 digest.
///
/// Always 64 lowercase hexadecimal characters. Use [`Sha256Hash::digest`] to hash raw bytes
/// and [`Sha256Hash::parse`] for digests coming back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    /// Hashes `bytes` and returns the hex digest.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps an existing 32-byte digest.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Validates a hex digest string.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::InvalidHash`] unless `input` is exactly 64 lowercase hex chars.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let ok = input.len() == Self::HEX_LEN
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !ok {
            return Err(TypeError::InvalidHash(input.to_owned()));
        }
        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first `len` hex characters, used as a short human-facing identifier.
    pub fn prefix(&self, len: usize) -> &str {
        &self.0[..len.min(Self::HEX_LEN)]
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Sha256Hash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sha256Hash::parse(s)
    }
}

impl serde::Serialize for Sha256Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Sha256Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Sha256Hash::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An ICD-10 diagnosis code validated by surface format only.
///
/// Accepted shape: one letter, two digits, then optionally a dot followed by one to four
/// digits (`E11`, `E11.9`, `Z00.0001`). The letter is normalised to uppercase. No code
/// registry lookup is performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Icd10Code(String);

impl Icd10Code {
    /// Validates and normalises an ICD-10 code.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::InvalidIcd10`] if the trimmed input does not match the format.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        let candidate = input.trim().to_ascii_uppercase();
        if Self::is_well_formed(&candidate) {
            return Ok(Self(candidate));
        }
        Err(TypeError::InvalidIcd10(input.to_owned()))
    }

    fn is_well_formed(code: &str) -> bool {
        let bytes = code.as_bytes();
        if bytes.len() < 3 {
            return false;
        }
        if !bytes[0].is_ascii_uppercase()
            || !bytes[1].is_ascii_digit()
            || !bytes[2].is_ascii_digit()
        {
            return false;
        }
        match &bytes[3..] {
            [] => true,
            [b'.', rest @ ..] => (1..=4).contains(&rest.len()) && rest.iter().all(u8::is_ascii_digit),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Icd10Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Icd10Code {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Icd10Code::parse(s)
    }
}

impl serde::Serialize for Icd10Code {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Icd10Code {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Icd10Code::parse(&s).map_err(serde::de::Error::custom)
    }
}
