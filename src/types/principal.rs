// ABOUTME: Validated certificate principal name.
// ABOUTME: Principals are sent as a comma-separated list, so commas are rejected.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("principal cannot be empty")]
    Empty,

    #[error("invalid character in principal: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn new(value: &str) -> Result<Self, PrincipalError> {
        if value.is_empty() {
            return Err(PrincipalError::Empty);
        }

        for c in value.chars() {
            if c == ',' || c.is_whitespace() || c.is_control() {
                return Err(PrincipalError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
