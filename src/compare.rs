//! Re-audit an existing record stream
//!
//! Every row of a previously written stream is audited again against the
//! current source, and the recorded fields are compared with the fresh
//! ones.

use crate::auditor::BlockAuditor;
use crate::error::AuditError;
use crate::record::AuditOutcome;
use crate::record_stream::RecordRow;
use crate::rpc_client::BlockSource;
use std::fmt;
use tracing::debug;

/// One field that differs between the stream and a fresh audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub field: &'static str,
    pub recorded: String,
    pub fresh: String,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (recorded: {}, fresh: {})",
            self.field, self.recorded, self.fresh
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Match,
    Differs(Vec<FieldDiff>),
    /// The fresh audit could not be completed
    AuditFailed(AuditError),
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub entries: Vec<(u64, CheckResult)>,
}

impl CheckReport {
    pub fn matched(&self) -> usize {
        self.count(|r| matches!(r, CheckResult::Match))
    }

    pub fn differing(&self) -> usize {
        self.count(|r| matches!(r, CheckResult::Differs(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, CheckResult::AuditFailed(_)))
    }

    fn count(&self, pred: impl Fn(&CheckResult) -> bool) -> usize {
        self.entries.iter().filter(|(_, r)| pred(r)).count()
    }
}

fn amount(v: Option<u64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Fields of `recorded` that differ from `fresh`
pub fn diff_rows(recorded: &RecordRow, fresh: &RecordRow) -> Vec<FieldDiff> {
    let pairs = [
        (
            "claimed_reward",
            amount(recorded.claimed_reward),
            amount(fresh.claimed_reward),
        ),
        (
            "computed_issuance",
            amount(recorded.computed_issuance),
            amount(fresh.computed_issuance),
        ),
        (
            "total_mined",
            amount(recorded.total_mined),
            amount(fresh.total_mined),
        ),
        ("issues", recorded.issues.clone(), fresh.issues.clone()),
        ("status", recorded.status.clone(), fresh.status.clone()),
    ];

    pairs
        .into_iter()
        .filter(|(_, a, b)| a != b)
        .map(|(field, recorded, fresh)| FieldDiff {
            field,
            recorded,
            fresh,
        })
        .collect()
}

/// Re-audit each row in order and compare
pub async fn check_rows<S>(auditor: &BlockAuditor<S>, rows: &[RecordRow]) -> CheckReport
where
    S: BlockSource + ?Sized,
{
    let mut report = CheckReport::default();
    for row in rows {
        let result = match auditor.audit(row.height).await {
            Ok(record) => {
                let fresh = RecordRow::from(&AuditOutcome::Audited(record));
                let diffs = diff_rows(row, &fresh);
                if diffs.is_empty() {
                    CheckResult::Match
                } else {
                    CheckResult::Differs(diffs)
                }
            }
            Err(e) => CheckResult::AuditFailed(e),
        };
        debug!("Checked block {}: {:?}", row.height, result);
        report.entries.push((row.height, result));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(reward: Option<u64>, issues: &str, status: &str) -> RecordRow {
        RecordRow {
            height: 1,
            hash: "aa".to_string(),
            claimed_reward: reward,
            computed_issuance: reward,
            total_mined: reward,
            issues: issues.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_identical_rows_have_no_diff() {
        let a = row(Some(10), "none", "OK");
        assert!(diff_rows(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_diff_lists_each_field() {
        let recorded = row(Some(10), "none", "OK");
        let mut fresh = row(Some(10), "reward-mismatch", "discrepancy");
        fresh.claimed_reward = Some(99);

        let diffs = diff_rows(&recorded, &fresh);
        let fields: Vec<&str> = diffs.iter().map(|d| d.field).collect();
        assert_eq!(fields, vec!["claimed_reward", "issues", "status"]);
        assert_eq!(
            diffs[0].to_string(),
            "claimed_reward (recorded: 10, fresh: 99)"
        );
    }

    #[test]
    fn test_failed_row_against_success_differs() {
        let recorded = row(None, "timeout", "fetch-failed");
        let fresh = row(Some(10), "none", "OK");
        assert_eq!(diff_rows(&recorded, &fresh).len(), 5);
    }
}
