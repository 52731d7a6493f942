// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use crate::queue::Rejected;

/// Server messages that mean the refresh token can never be used again.
const TERMINAL_MESSAGES: &[&str] =
    &["refresh token is expired or does not exist", "malformed parameter"];

/// Failure of one refresh call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Transport failure or a non-2xx response without an error body.
    Network(String),
    /// The server invalidated the refresh token; the session is over.
    Terminal(String),
    /// Any other server-reported error. The session is left untouched.
    Unknown(String),
}

impl RefreshError {
    /// Classify a server-reported error message.
    pub fn from_server_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if TERMINAL_MESSAGES.iter().any(|m| lower.contains(m)) {
            Self::Terminal(message)
        } else {
            Self::Unknown(message)
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Network(m) | Self::Terminal(m) | Self::Unknown(m) => m,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network(_) => "NETWORK",
            Self::Terminal(_) => "TERMINAL_AUTH",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(m) => write!(f, "network error: {m}"),
            Self::Terminal(m) => write!(f, "session invalidated: {m}"),
            Self::Unknown(m) => write!(f, "refresh failed: {m}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Errors surfaced by the coordinator to its callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No usable access token after refresh and storage re-read.
    MissingAccessToken,
    /// The refresh this caller initiated failed.
    Refresh(RefreshError),
    /// The refresh this caller waited on failed (locally or in another context).
    Rejected(Rejected),
    /// The waiter was not settled within the configured timeout.
    WaitTimedOut,
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingAccessToken => "MISSING_ACCESS_TOKEN",
            Self::Refresh(e) => e.as_str(),
            Self::Rejected(_) => "REJECTED",
            Self::WaitTimedOut => "WAIT_TIMED_OUT",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAccessToken => f.write_str("missing access token"),
            Self::Refresh(e) => e.fmt(f),
            Self::Rejected(r) => r.fmt(f),
            Self::WaitTimedOut => f.write_str("timed out waiting for token refresh"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Refresh(e) => Some(e),
            Self::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl From<RefreshError> for SessionError {
    fn from(e: RefreshError) -> Self {
        Self::Refresh(e)
    }
}

impl From<Rejected> for SessionError {
    fn from(r: Rejected) -> Self {
        Self::Rejected(r)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
