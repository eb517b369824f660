//! Per-height audit failures
//!
//! These are not fatal to a run: a failed height is recorded in the record
//! stream and the worker moves on. Fatal conditions (unwritable output,
//! unknown chain height) are plain `anyhow` errors.

use thiserror::Error;

/// Why a single height could not be audited
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// Source unreachable, or it returned no usable data for the height
    #[error("fetch failed for block {height}: {reason}")]
    FetchFailed { height: u64, reason: String },

    /// Data was returned but is structurally unusable
    #[error("parse failed for block {height}: {reason}")]
    ParseFailed { height: u64, reason: String },
}

impl AuditError {
    pub fn fetch(height: u64, reason: impl Into<String>) -> Self {
        AuditError::FetchFailed {
            height,
            reason: reason.into(),
        }
    }

    pub fn parse(height: u64, reason: impl Into<String>) -> Self {
        AuditError::ParseFailed {
            height,
            reason: reason.into(),
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            AuditError::FetchFailed { height, .. } | AuditError::ParseFailed { height, .. } => {
                *height
            }
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            AuditError::FetchFailed { reason, .. } | AuditError::ParseFailed { reason, .. } => {
                reason
            }
        }
    }

    /// Status column value used in the record stream
    pub fn tag(&self) -> &'static str {
        match self {
            AuditError::FetchFailed { .. } => "fetch-failed",
            AuditError::ParseFailed { .. } => "parse-failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_distinguish_fetch_and_parse() {
        let fetch = AuditError::fetch(7, "connection refused");
        let parse = AuditError::parse(7, "missing miner_tx");

        assert_eq!(fetch.tag(), "fetch-failed");
        assert_eq!(parse.tag(), "parse-failed");
        assert_eq!(fetch.height(), 7);
        assert_eq!(parse.reason(), "missing miner_tx");
    }

    #[test]
    fn test_display_includes_height() {
        let err = AuditError::fetch(42, "timeout");
        assert_eq!(err.to_string(), "fetch failed for block 42: timeout");
    }
}
