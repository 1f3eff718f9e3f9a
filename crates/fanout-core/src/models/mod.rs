// ABOUTME: Channel and notification data models shared across the workspace
// ABOUTME: Channel names are validated against PostgreSQL identifier rules
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Data Models
//!
//! A [`Channel`] is the name of one logical subscription topic. Names are
//! restricted to what PostgreSQL accepts as an unquoted identifier so that the
//! same name works for `LISTEN`, `NOTIFY` and URL path segments.

use crate::constants::postgres::MAX_IDENTIFIER_BYTES;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::fmt;
use std::sync::Arc;

/// Validated channel name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(Arc<str>);

impl Channel {
    /// Validate and wrap a channel name
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the name is empty, longer than 63 bytes,
    /// starts with a digit or contains anything but ASCII letters, digits and `_`
    pub fn new(name: impl AsRef<str>) -> AppResult<Self> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(AppError::invalid_input("Channel name must not be empty"));
        }
        if name.len() > MAX_IDENTIFIER_BYTES {
            return Err(AppError::invalid_input(format!(
                "Channel name '{name}' exceeds {MAX_IDENTIFIER_BYTES} bytes"
            )));
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(AppError::invalid_input(format!(
                "Channel name '{name}' must not start with a digit"
            )));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(AppError::invalid_input(format!(
                "Channel name '{name}' contains invalid character '{bad}'"
            )));
        }
        Ok(Self(Arc::from(name)))
    }

    /// Derive a channel name from a type's declared name
    ///
    /// `ChatRoomHandler` becomes `chat_room_handler`. Module paths and generic
    /// arguments are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the derived name is not a valid channel
    pub fn from_type_name<T: ?Sized>() -> AppResult<Self> {
        Self::new(snake_case(short_type_name(type_name::<T>())))
    }

    /// Borrow the channel name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Channel {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0.to_string()
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).and_then(|p| chars.get(p));
            let prev_lower = prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit());
            let prev_upper = prev.is_some_and(char::is_ascii_uppercase);
            let next_lower = chars.get(i + 1).is_some_and(char::is_ascii_lowercase);
            if (prev_lower || (prev_upper && next_lower)) && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// A notification drained from the subscription source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Channel the notification was published on
    pub channel: Channel,
    /// Opaque string payload
    pub payload: String,
}

impl Notification {
    /// Create a notification
    pub fn new(channel: Channel, payload: impl Into<String>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[allow(dead_code)]
    struct ChatRoomHandler;
    #[allow(dead_code)]
    struct HTTPRelay;
    #[allow(dead_code)]
    struct Wrapper<T>(T);

    #[test]
    fn test_channel_accepts_identifiers() {
        for name in ["alpha", "_private", "room_42", "A"] {
            assert_eq!(Channel::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_channel_rejects_invalid_names() {
        let too_long = "x".repeat(64);
        for name in ["", "1st", "has space", "semi;colon", "quo\"te", too_long.as_str()] {
            let err = Channel::new(name).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidInput, "{name}");
        }
        assert!(Channel::new("x".repeat(63)).is_ok());
    }

    #[test]
    fn test_channel_from_type_name() {
        assert_eq!(
            Channel::from_type_name::<ChatRoomHandler>().unwrap().as_str(),
            "chat_room_handler"
        );
        assert_eq!(
            Channel::from_type_name::<HTTPRelay>().unwrap().as_str(),
            "http_relay"
        );
        assert_eq!(
            Channel::from_type_name::<Wrapper<ChatRoomHandler>>()
                .unwrap()
                .as_str(),
            "wrapper"
        );
    }

    #[test]
    fn test_channel_serde_validates() {
        let channel: Channel = serde_json::from_str("\"alpha\"").unwrap();
        assert_eq!(channel.as_str(), "alpha");
        assert!(serde_json::from_str::<Channel>("\"bad name\"").is_err());
    }
}
