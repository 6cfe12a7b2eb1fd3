// ABOUTME: Typed parsing of environment variable values
// ABOUTME: Empty or unset values yield None, malformed values are reported with their name

use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

/// Parse a raw value that was looked up under `name`.
///
/// Unset and blank values yield `Ok(None)`; surrounding whitespace is ignored.
pub fn parse_value<T>(name: &str, raw: Option<String>) -> Result<Option<T>, EnvError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|e| EnvError::InvalidValue {
            name: name.to_string(),
            value: trimmed.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a boolean flag. Accepts true/false, 1/0, yes/no and on/off in any case.
pub fn parse_flag(name: &str, raw: Option<String>) -> Result<Option<bool>, EnvError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    match raw.trim().to_lowercase().as_str() {
        "" => Ok(None),
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        other => Err(EnvError::InvalidValue {
            name: name.to_string(),
            value: other.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
