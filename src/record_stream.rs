//! Record stream (CSV)
//!
//! One header row, then one row per height in ascending order:
//! `height,hash,claimed_reward,computed_issuance,total_mined,issues,status`.
//! Failed heights keep the row shape with empty numeric columns, the
//! failure reason in `issues` and `fetch-failed`/`parse-failed` as status.

use crate::record::AuditOutcome;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::warn;

pub const HEADER: &str = "height,hash,claimed_reward,computed_issuance,total_mined,issues,status";

const FIELD_COUNT: usize = 7;

/// One row of the record stream, as text fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub height: u64,
    pub hash: String,
    pub claimed_reward: Option<u64>,
    pub computed_issuance: Option<u64>,
    pub total_mined: Option<u64>,
    pub issues: String,
    pub status: String,
}

impl RecordRow {
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
        if fields.len() != FIELD_COUNT {
            anyhow::bail!(
                "Expected {} fields, found {}: {}",
                FIELD_COUNT,
                fields.len(),
                line
            );
        }

        let height = fields[0]
            .parse()
            .with_context(|| format!("Invalid height: {}", fields[0]))?;

        Ok(Self {
            height,
            hash: fields[1].to_string(),
            claimed_reward: parse_amount(fields[2])?,
            computed_issuance: parse_amount(fields[3])?,
            total_mined: parse_amount(fields[4])?,
            issues: fields[5].to_string(),
            status: fields[6].to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        let amount = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_default();
        format!(
            "{},{},{},{},{},{},{}",
            self.height,
            self.hash,
            amount(self.claimed_reward),
            amount(self.computed_issuance),
            amount(self.total_mined),
            self.issues,
            self.status
        )
    }
}

impl From<&AuditOutcome> for RecordRow {
    fn from(outcome: &AuditOutcome) -> Self {
        match outcome {
            AuditOutcome::Audited(record) => RecordRow {
                height: record.height(),
                hash: sanitize_field(record.hash()),
                claimed_reward: Some(record.claimed_reward()),
                computed_issuance: Some(record.computed_issuance()),
                total_mined: Some(record.total_mined()),
                issues: record.issues_string(),
                status: record.status().to_string(),
            },
            AuditOutcome::Failed(err) => RecordRow {
                height: err.height(),
                hash: String::new(),
                claimed_reward: None,
                computed_issuance: None,
                total_mined: None,
                issues: sanitize_field(err.reason()),
                status: err.tag().to_string(),
            },
        }
    }
}

fn parse_amount(field: &str) -> Result<Option<u64>> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse()
        .map(Some)
        .with_context(|| format!("Invalid amount: {}", field))
}

/// Keep free text inside a single CSV field
fn sanitize_field(text: &str) -> String {
    text.replace(',', ";").replace(['\r', '\n'], " ")
}

/// Appends outcomes to the record stream
#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    inner: W,
    rows_written: u64,
}

impl<W: Write> RecordWriter<W> {
    /// Wrap a writer, optionally emitting the header row first
    pub fn new(mut inner: W, write_header: bool) -> Result<Self> {
        if write_header {
            writeln!(inner, "{}", HEADER).context("Failed to write record stream header")?;
            inner.flush().context("Failed to flush record stream header")?;
        }
        Ok(Self {
            inner,
            rows_written: 0,
        })
    }

    /// Write one row and flush it, so an interrupted run keeps every
    /// emitted record.
    pub fn write_outcome(&mut self, outcome: &AuditOutcome) -> Result<()> {
        let row = RecordRow::from(outcome);
        writeln!(self.inner, "{}", row.to_line())
            .with_context(|| format!("Failed to write record for block {}", row.height))?;
        self.inner.flush().context("Failed to flush record stream")?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl RecordWriter<BufWriter<File>> {
    /// Start a fresh stream at `path`, truncating anything already there
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create record stream: {}", path.display()))?;
        Self::new(BufWriter::new(file), true)
    }

    /// Continue an existing stream (resume). A last line left without its
    /// newline by a crash is cut off first. The header is written only if
    /// the file is new or empty.
    pub fn append(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open record stream: {}", path.display()))?;
        let len = trim_partial_line(&mut file)
            .with_context(|| format!("Failed to repair record stream: {}", path.display()))?;
        file.seek(SeekFrom::End(0))
            .with_context(|| format!("Failed to seek record stream: {}", path.display()))?;
        Self::new(BufWriter::new(file), len == 0)
    }
}

/// Truncate `file` back to just after its last newline. Returns the new
/// length.
fn trim_partial_line(file: &mut File) -> io::Result<u64> {
    const CHUNK: u64 = 4096;

    let len = file.metadata()?.len();
    let mut end = len;
    let mut keep = 0;
    let mut buf = [0u8; CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(CHUNK);
        let window = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(window)?;
        if let Some(pos) = window.iter().rposition(|&b| b == b'\n') {
            keep = start + pos as u64 + 1;
            break;
        }
        end = start;
    }

    if keep < len {
        warn!(
            "Dropping {} bytes of an unfinished last row from the record stream",
            len - keep
        );
        file.set_len(keep)?;
    }
    Ok(keep)
}

/// Read every data row from a record stream. Malformed rows (e.g. a line
/// cut short by a crash) are skipped with a warning.
pub fn read_rows(path: &Path) -> Result<Vec<RecordRow>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open record stream: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() || line.starts_with("height,") {
            continue;
        }
        match RecordRow::parse(&line) {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Skipping line {} of {}: {:#}", idx + 1, path.display(), e),
        }
    }
    Ok(rows)
}

/// First height a resumed run should audit, or `None` if the stream has no
/// rows yet
pub fn resume_point(path: &Path) -> Result<Option<u64>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(read_rows(path)?.last().map(|row| row.height + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;
    use crate::record::{AuditIssue, BlockAuditRecord};

    fn audited(height: u64, issues: Vec<AuditIssue>) -> AuditOutcome {
        AuditOutcome::Audited(BlockAuditRecord::new(
            height,
            "ab".repeat(32),
            1_000_000_000_000,
            1,
            1,
            issues,
        ))
    }

    #[test]
    fn test_writes_header_and_rows() {
        let mut writer = RecordWriter::new(Vec::new(), true).unwrap();
        writer.write_outcome(&audited(100, vec![])).unwrap();
        writer
            .write_outcome(&audited(
                101,
                vec![AuditIssue::RewardMismatch, AuditIssue::TotalMismatch],
            ))
            .unwrap();
        writer
            .write_outcome(&AuditOutcome::Failed(AuditError::fetch(
                102,
                "error sending request, connection refused",
            )))
            .unwrap();
        assert_eq!(writer.rows_written(), 3);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let hash = "ab".repeat(32);
        assert_eq!(lines[0], HEADER);
        assert_eq!(
            lines[1],
            format!("100,{},1000000000000,1,1,none,OK", hash)
        );
        assert_eq!(
            lines[2],
            format!(
                "101,{},1000000000000,1,1,reward-mismatch; total-mismatch,discrepancy",
                hash
            )
        );
        assert_eq!(
            lines[3],
            "102,,,,,error sending request; connection refused,fetch-failed"
        );
    }

    #[test]
    fn test_rows_parse_back() {
        let outcome = audited(5, vec![AuditIssue::InvalidCoinbase]);
        let row = RecordRow::from(&outcome);
        assert_eq!(RecordRow::parse(&row.to_line()).unwrap(), row);

        let failed = RecordRow::from(&AuditOutcome::Failed(AuditError::parse(6, "bad\nbody")));
        let parsed = RecordRow::parse(&failed.to_line()).unwrap();
        assert_eq!(parsed.claimed_reward, None);
        assert_eq!(parsed.status, "parse-failed");
        assert_eq!(parsed.issues, "bad body");
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(RecordRow::parse("1,2,3").is_err());
        assert!(RecordRow::parse("x,h,1,1,1,none,OK").is_err());
        assert!(RecordRow::parse("1,h,abc,1,1,none,OK").is_err());
    }

    #[test]
    fn test_resume_point_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");
        assert_eq!(resume_point(&path).unwrap(), None);

        let mut writer = RecordWriter::create(&path).unwrap();
        for h in 100..=102 {
            writer.write_outcome(&audited(h, vec![])).unwrap();
        }
        drop(writer);
        assert_eq!(resume_point(&path).unwrap(), Some(103));

        let mut writer = RecordWriter::append(&path).unwrap();
        writer.write_outcome(&audited(103, vec![])).unwrap();
        drop(writer);

        let rows = read_rows(&path).unwrap();
        let heights: Vec<u64> = rows.iter().map(|r| r.height).collect();
        assert_eq!(heights, vec![100, 101, 102, 103]);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches(HEADER).count(), 1);
    }

    #[test]
    fn test_read_rows_skips_truncated_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");
        let hash = "cd".repeat(32);
        std::fs::write(
            &path,
            format!("{}\n7,{},10,10,10,none,OK\n8,{},10,1", HEADER, hash, hash),
        )
        .unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(resume_point(&path).unwrap(), Some(8));
    }

    #[test]
    fn test_append_cuts_unfinished_last_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");
        let hash = "cd".repeat(32);
        std::fs::write(
            &path,
            format!("{}\n7,{},10,10,10,none,OK\n8,{},10,1", HEADER, hash, hash),
        )
        .unwrap();
        assert_eq!(resume_point(&path).unwrap(), Some(8));

        let mut writer = RecordWriter::append(&path).unwrap();
        writer.write_outcome(&audited(8, vec![])).unwrap();
        drop(writer);

        let heights: Vec<u64> = read_rows(&path).unwrap().iter().map(|r| r.height).collect();
        assert_eq!(heights, vec![7, 8]);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_append_rewrites_cut_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");
        std::fs::write(&path, "height,ha").unwrap();

        let mut writer = RecordWriter::append(&path).unwrap();
        writer.write_outcome(&audited(0, vec![])).unwrap();
        drop(writer);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().next(), Some(HEADER));
        assert_eq!(read_rows(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_hash_stays_in_one_field() {
        let record = BlockAuditRecord::new(3, "a,b\nc".to_string(), 1, 1, 1, vec![]);
        let row = RecordRow::from(&AuditOutcome::Audited(record));
        let parsed = RecordRow::parse(&row.to_line()).unwrap();
        assert_eq!(parsed.hash, "a;b c");
        assert_eq!(parsed.status, "OK");
    }
}
