//! Validated architecture and release tokens.
//!
//! Both tokens end up inside shell commands and package repository URLs, so
//! they are restricted to a conservative character set before any network or
//! guest activity happens.

use std::fmt;

use thiserror::Error;

/// Prefix of the host-side working directory that holds a guest's disk state.
pub const WORKDIR_PREFIX: &str = "work-NetBSD-";

/// Errors raised when a token fails validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TokenError {
    /// Raised when the token is empty after trimming.
    #[error("{kind} must not be empty")]
    Empty {
        /// Token kind (for example `architecture`).
        kind: &'static str,
    },
    /// Raised when the token contains a character outside the allowed set.
    #[error(
        "{kind} '{value}' contains unsupported character {character:?} \
         (allowed: ASCII letters, digits, '.', '_', '-')"
    )]
    InvalidCharacter {
        /// Token kind (for example `release`).
        kind: &'static str,
        /// Offending token value.
        value: String,
        /// First unsupported character.
        character: char,
    },
}

fn validate_token(kind: &'static str, raw: &str) -> Result<String, TokenError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(TokenError::Empty { kind });
    }
    if let Some(character) = value
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')))
    {
        return Err(TokenError::InvalidCharacter {
            kind,
            value: value.to_owned(),
            character,
        });
    }
    Ok(value.to_owned())
}

/// CPU/ABI identifier as published by the NetBSD mirrors (for example
/// `amd64` or `evbarm-earmv7hf`).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Architecture(String);

impl Architecture {
    /// Validates and wraps an architecture token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the token is empty or contains characters
    /// outside the allowed set.
    pub fn new(value: impl AsRef<str>) -> Result<Self, TokenError> {
        validate_token("architecture", value.as_ref()).map(Self)
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the deterministic working-directory name for this
    /// architecture, so repeated runs reuse the same persisted disk.
    #[must_use]
    pub fn workdir_name(&self) -> String {
        format!("{WORKDIR_PREFIX}{}", self.0)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Release or version token used to select a binary package repository
/// (for example `HEAD` or `9.3`).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ReleaseToken(String);

impl ReleaseToken {
    /// Validates and wraps a release token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when the token is empty or contains characters
    /// outside the allowed set.
    pub fn new(value: impl AsRef<str>) -> Result<Self, TokenError> {
        validate_token("release", value.as_ref()).map(Self)
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
