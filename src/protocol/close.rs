//! Close codes and the retry policy attached to them
//!
//! Which numeric codes fall in which class is protocol-version data, so the
//! table is loaded from configuration; only the three-way split is fixed.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Close codes the client acts on by number
pub mod codes {
    /// Normal closure; used for manager shutdown
    pub const NORMAL: u16 = 1000;
    /// Abnormal closure, socket dropped without a close frame
    pub const ABNORMAL: u16 = 1006;
    /// Server-requested reconnect, or a send with no open socket
    pub const RECONNECT: u16 = 4000;
    /// Zombie connection or HELLO never arrived
    pub const SESSION_TIMEOUT: u16 = 4009;
    /// Sent by the server when the token is rejected
    pub const AUTHENTICATION_FAILED: u16 = 4004;
}

/// A socket close as observed by a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{} ({})", self.code, describe(self.code))
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Retry policy for a close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Never retried; surfaced as a disconnect
    Fatal,
    /// Retried with a brand-new session
    NonResumable,
    /// Retried by resuming the saved session
    Resumable,
}

/// Partition of close codes into [`CloseClass`]es
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CloseCodeTable {
    pub unrecoverable: BTreeSet<u16>,
    pub unresumable: BTreeSet<u16>,
}

impl Default for CloseCodeTable {
    fn default() -> Self {
        Self {
            unrecoverable: [4004, 4010, 4011, 4013, 4014].into_iter().collect(),
            unresumable: [1000, 4006, 4007].into_iter().collect(),
        }
    }
}

impl CloseCodeTable {
    /// Load the table from an optional file, with `GATEWAY_CLOSE_*` env overrides.
    ///
    /// Missing keys fall back to [`CloseCodeTable::default`]. Lists in the
    /// environment are comma-separated, e.g. `GATEWAY_CLOSE_UNRESUMABLE=1000,4007`.
    pub fn load(path: Option<&Path>) -> Result<Self, GatewayError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("GATEWAY_CLOSE")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("unrecoverable")
                    .with_list_parse_key("unresumable"),
            )
            .build()
            .and_then(|settings| settings.try_deserialize::<Self>())
            .map_err(|e| GatewayError::Config(format!("close code table: {e}")))
    }

    /// Classify a close. Everything is fatal once the manager is shutting down.
    pub fn classify(&self, code: u16, shutting_down: bool) -> CloseClass {
        if shutting_down || self.unrecoverable.contains(&code) {
            CloseClass::Fatal
        } else if self.unresumable.contains(&code) {
            CloseClass::NonResumable
        } else {
            CloseClass::Resumable
        }
    }

    pub fn is_unrecoverable(&self, code: u16) -> bool {
        self.unrecoverable.contains(&code)
    }
}

/// Human-readable description for log lines
pub fn describe(code: u16) -> &'static str {
    match code {
        1000 => "normal closure, session will not be resumed",
        1006 => "connection dropped",
        4000 => "unknown error",
        4001 => "unknown opcode",
        4002 => "decode error",
        4003 => "not authenticated",
        4004 => "authentication failed",
        4005 => "already authenticated",
        4006 => "invalid session",
        4007 => "invalid sequence",
        4008 => "rate limited",
        4009 => "session timed out",
        4010 => "invalid shard",
        4011 => "sharding required",
        4012 => "invalid api version",
        4013 => "invalid intents",
        4014 => "disallowed intents",
        _ => "unknown close code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_table_has_three_classes() {
        let table = CloseCodeTable::default();
        assert_eq!(table.classify(4004, false), CloseClass::Fatal);
        assert_eq!(table.classify(4014, false), CloseClass::Fatal);
        assert_eq!(table.classify(1000, false), CloseClass::NonResumable);
        assert_eq!(table.classify(4007, false), CloseClass::NonResumable);
        assert_eq!(table.classify(4000, false), CloseClass::Resumable);
        assert_eq!(table.classify(1006, false), CloseClass::Resumable);
    }

    #[test]
    fn shutdown_makes_every_close_fatal() {
        let table = CloseCodeTable::default();
        assert_eq!(table.classify(codes::NORMAL, true), CloseClass::Fatal);
        assert_eq!(table.classify(4000, true), CloseClass::Fatal);
    }

    #[test]
    fn loads_partial_table_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "unrecoverable = [4004]").unwrap();

        let table = CloseCodeTable::load(Some(file.path())).unwrap();
        assert_eq!(table.unrecoverable, BTreeSet::from([4004]));
        assert_eq!(table.unresumable, CloseCodeTable::default().unresumable);
        assert_eq!(table.classify(4010, false), CloseClass::Resumable);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = CloseCodeTable::load(Some(Path::new("/nonexistent/close-codes.toml")))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn display_falls_back_to_description() {
        assert_eq!(
            CloseInfo::new(4004, "").to_string(),
            "4004 (authentication failed)"
        );
        assert_eq!(CloseInfo::new(4000, "bye").to_string(), "4000 (bye)");
    }
}
