//! Audit records and ranges

use crate::error::AuditError;
use anyhow::Result;
use std::fmt;

/// A finding raised by one of the block checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditIssue {
    /// Claimed reward and coinbase output sum differ by more than the tolerance
    RewardMismatch,
    /// Claimed reward and total mined differ by more than the tolerance
    TotalMismatch,
    /// Coinbase does not have exactly one input declaring this height
    InvalidCoinbase,
}

impl AuditIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditIssue::RewardMismatch => "reward-mismatch",
            AuditIssue::TotalMismatch => "total-mismatch",
            AuditIssue::InvalidCoinbase => "invalid-coinbase",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "reward-mismatch" => Some(AuditIssue::RewardMismatch),
            "total-mismatch" => Some(AuditIssue::TotalMismatch),
            "invalid-coinbase" => Some(AuditIssue::InvalidCoinbase),
            _ => None,
        }
    }
}

impl fmt::Display for AuditIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Ok,
    Discrepancy,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Ok => "OK",
            AuditStatus::Discrepancy => "discrepancy",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of auditing one block. Fields are private so a record cannot be
/// changed after classification; `status` is always derived from `issues`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAuditRecord {
    height: u64,
    hash: String,
    claimed_reward: u64,
    computed_issuance: u64,
    total_mined: u64,
    issues: Vec<AuditIssue>,
}

impl BlockAuditRecord {
    pub fn new(
        height: u64,
        hash: String,
        claimed_reward: u64,
        computed_issuance: u64,
        total_mined: u64,
        issues: Vec<AuditIssue>,
    ) -> Self {
        Self {
            height,
            hash,
            claimed_reward,
            computed_issuance,
            total_mined,
            issues,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn claimed_reward(&self) -> u64 {
        self.claimed_reward
    }

    pub fn computed_issuance(&self) -> u64 {
        self.computed_issuance
    }

    pub fn total_mined(&self) -> u64 {
        self.total_mined
    }

    pub fn issues(&self) -> &[AuditIssue] {
        &self.issues
    }

    pub fn has_issue(&self, issue: AuditIssue) -> bool {
        self.issues.contains(&issue)
    }

    pub fn status(&self) -> AuditStatus {
        if self.issues.is_empty() {
            AuditStatus::Ok
        } else {
            AuditStatus::Discrepancy
        }
    }

    /// Issues joined the way the record stream stores them
    pub fn issues_string(&self) -> String {
        if self.issues.is_empty() {
            return "none".to_string();
        }
        self.issues
            .iter()
            .map(AuditIssue::as_str)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// What the sink receives for one height: either a record or the reason
/// it could not be produced. Failures are emitted too so the stream has no
/// silent holes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Audited(BlockAuditRecord),
    Failed(AuditError),
}

impl AuditOutcome {
    pub fn height(&self) -> u64 {
        match self {
            AuditOutcome::Audited(record) => record.height(),
            AuditOutcome::Failed(err) => err.height(),
        }
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            AuditOutcome::Audited(record) => record.status().as_str(),
            AuditOutcome::Failed(err) => err.tag(),
        }
    }
}

impl From<Result<BlockAuditRecord, AuditError>> for AuditOutcome {
    fn from(result: Result<BlockAuditRecord, AuditError>) -> Self {
        match result {
            Ok(record) => AuditOutcome::Audited(record),
            Err(err) => AuditOutcome::Failed(err),
        }
    }
}

/// Inclusive height range plus the number of workers to spread it over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditRange {
    start: u64,
    end: u64,
    worker_count: usize,
}

impl AuditRange {
    pub fn new(start: u64, end: u64, worker_count: usize) -> Result<Self> {
        if start > end {
            anyhow::bail!("Invalid range: start {} is after end {}", start, end);
        }
        if worker_count == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }
        Ok(Self {
            start,
            end,
            worker_count,
        })
    }

    pub fn single(height: u64) -> Self {
        Self {
            start: height,
            end: height,
            worker_count: 1,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Number of heights in the range (never zero)
    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }
}
