//! Scheduler and worker pool
//!
//! Splits a height range into one contiguous interval per worker. Each
//! worker audits its interval in ascending order and submits every outcome
//! (including failures) to the [`OrderedSink`]. Workers never wait on each
//! other; cancellation is checked between heights.

use crate::auditor::BlockAuditor;
use crate::record::{AuditOutcome, AuditRange};
use crate::record_stream::RecordWriter;
use crate::rpc_client::BlockSource;
use crate::sink::{DrainStats, OrderedSink};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::Write;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Split `[start, end]` into `worker_count` contiguous, disjoint intervals
/// whose sizes differ by at most one; the first `total % worker_count`
/// intervals get the extra height. Workers that would get nothing are left
/// out.
pub fn partition(range: &AuditRange) -> Vec<RangeInclusive<u64>> {
    let total = range.block_count();
    let workers = range.worker_count() as u64;
    let base = total / workers;
    let remainder = total % workers;

    let mut intervals = Vec::with_capacity(range.worker_count());
    let mut current = range.start();
    for i in 0..workers {
        let size = base + u64::from(i < remainder);
        if size == 0 {
            break;
        }
        let end = current + size - 1;
        intervals.push(current..=end);
        current = end + 1;
    }
    intervals
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every worker exhausted its interval
    Completed,
    /// At least one worker stopped early
    Interrupted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Debug)]
struct WorkerReport {
    attempted: u64,
    finished: bool,
}

async fn run_worker<S>(
    id: usize,
    heights: RangeInclusive<u64>,
    auditor: Arc<BlockAuditor<S>>,
    sink: Arc<OrderedSink>,
    cancel: CancellationToken,
) -> WorkerReport
where
    S: BlockSource + ?Sized,
{
    let (from, to) = (*heights.start(), *heights.end());
    debug!("Worker {} started on blocks {}-{}", id, from, to);

    let mut attempted = 0;
    for height in heights {
        if cancel.is_cancelled() {
            info!("Worker {} stopping before block {} (cancelled)", id, height);
            return WorkerReport {
                attempted,
                finished: false,
            };
        }

        debug!("Worker {} auditing block {}", id, height);
        let outcome = AuditOutcome::from(auditor.audit(height).await);
        if let AuditOutcome::Failed(e) = &outcome {
            warn!("Worker {}: {}", id, e);
        }
        if let Err(e) = sink.submit(outcome) {
            error!("Worker {}: sink rejected block {}: {}", id, height, e);
        }
        attempted += 1;
    }

    debug!("Worker {} finished blocks {}-{}", id, from, to);
    WorkerReport {
        attempted,
        finished: true,
    }
}

/// Runs a fixed pool of workers over a range
pub struct Scheduler<S: ?Sized> {
    auditor: Arc<BlockAuditor<S>>,
    cancel: CancellationToken,
}

impl<S> Scheduler<S>
where
    S: BlockSource + ?Sized + 'static,
{
    pub fn new(auditor: Arc<BlockAuditor<S>>, cancel: CancellationToken) -> Self {
        Self { auditor, cancel }
    }

    /// Audit every height in `range`, submitting to `sink`. Closes the sink
    /// once all workers have returned, whether they finished or were
    /// cancelled.
    pub async fn run(&self, range: AuditRange, sink: Arc<OrderedSink>) -> RunOutcome {
        let intervals = partition(&range);
        info!(
            "Auditing blocks {} to {} with {} workers",
            range.start(),
            range.end(),
            intervals.len()
        );

        let handles: Vec<_> = intervals
            .into_iter()
            .enumerate()
            .map(|(id, interval)| {
                tokio::spawn(run_worker(
                    id,
                    interval,
                    self.auditor.clone(),
                    sink.clone(),
                    self.cancel.clone(),
                ))
            })
            .collect();

        let mut outcome = RunOutcome::Completed;
        for (id, joined) in futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
        {
            match joined {
                Ok(report) => {
                    debug!("Worker {} attempted {} blocks", id, report.attempted);
                    if !report.finished {
                        outcome = RunOutcome::Interrupted;
                    }
                }
                Err(e) => {
                    error!("Worker {} panicked: {}", id, e);
                    outcome = RunOutcome::Interrupted;
                }
            }
        }

        sink.close();
        outcome
    }
}

/// End-of-run report
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub range: AuditRange,
    pub outcome: RunOutcome,
    pub stats: DrainStats,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// First height not present in the output, if the run stopped short
    pub fn resume_from(&self) -> Option<u64> {
        let next = self
            .stats
            .last_emitted()
            .map(|h| h + 1)
            .unwrap_or(self.range.start());
        (next <= self.range.end()).then_some(next)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Audit {} (blocks {}-{}, started {})",
            self.outcome,
            self.range.start(),
            self.range.end(),
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(f, "   Written:       {}", self.stats.emitted.len())?;
        writeln!(f, "   OK:            {}", self.stats.ok)?;
        writeln!(f, "   Discrepancies: {}", self.stats.discrepancies)?;
        writeln!(f, "   Fetch failed:  {}", self.stats.fetch_failed)?;
        writeln!(f, "   Parse failed:  {}", self.stats.parse_failed)?;
        if !self.stats.stranded.is_empty() {
            writeln!(f, "   Discarded:     {}", self.stats.stranded.len())?;
        }
        write!(f, "   Duration:      {:.1}s", self.elapsed.as_secs_f64())?;
        if let Some(next) = self.resume_from() {
            write!(f, "\n   Resume from:   {}", next)?;
        }
        Ok(())
    }
}

/// Run a full audit: start the drain task, run the scheduler, then wait for
/// the drain to flush everything contiguous. Returns the writer so callers
/// can inspect or reuse it.
pub async fn audit_range<S, W>(
    auditor: Arc<BlockAuditor<S>>,
    range: AuditRange,
    writer: RecordWriter<W>,
    cancel: CancellationToken,
) -> Result<(RunSummary, RecordWriter<W>)>
where
    S: BlockSource + ?Sized + 'static,
    W: Write + Send + 'static,
{
    let started_at = Utc::now();
    let timer = Instant::now();
    let sink = Arc::new(OrderedSink::new(range.start()));

    let drain = {
        let sink = sink.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let drained = sink.drain(writer).await;
            if let Err(e) = &drained {
                error!("Record stream failed, stopping workers: {:#}", e);
                cancel.cancel();
            }
            drained
        })
    };

    let outcome = Scheduler::new(auditor, cancel).run(range, sink).await;

    let (stats, writer) = drain.await.context("Record stream task panicked")??;

    let summary = RunSummary {
        range,
        outcome,
        stats,
        started_at,
        elapsed: timer.elapsed(),
    };
    info!(
        "Audit {}: {} written, {} OK, {} discrepancies, {} fetch failed, {} parse failed",
        summary.outcome,
        summary.stats.emitted.len(),
        summary.stats.ok,
        summary.stats.discrepancies,
        summary.stats.fetch_failed,
        summary.stats.parse_failed
    );
    Ok((summary, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_example() {
        let range = AuditRange::new(100, 104, 2).unwrap();
        assert_eq!(partition(&range), vec![100..=102, 103..=104]);
    }

    #[test]
    fn test_partition_more_workers_than_blocks() {
        let range = AuditRange::new(0, 2, 8).unwrap();
        assert_eq!(partition(&range), vec![0..=0, 1..=1, 2..=2]);
    }

    #[test]
    fn test_partition_single_worker() {
        let range = AuditRange::new(5, 9, 1).unwrap();
        assert_eq!(partition(&range), vec![5..=9]);
    }

    #[test]
    fn test_resume_from() {
        let range = AuditRange::new(100, 104, 2).unwrap();
        let mut summary = RunSummary {
            range,
            outcome: RunOutcome::Interrupted,
            stats: DrainStats {
                emitted: vec![100, 101, 102],
                ..Default::default()
            },
            started_at: Utc::now(),
            elapsed: Duration::from_secs(1),
        };
        assert_eq!(summary.resume_from(), Some(103));
        assert!(summary.to_string().contains("Resume from:   103"));

        summary.stats.emitted = vec![];
        assert_eq!(summary.resume_from(), Some(100));

        summary.stats.emitted = (100..=104).collect();
        summary.outcome = RunOutcome::Completed;
        assert_eq!(summary.resume_from(), None);
        assert!(summary.to_string().starts_with("Audit completed"));
    }

    proptest! {
        #[test]
        fn prop_partition_covers_range_exactly(
            start in 0u64..10_000,
            len in 1u64..500,
            workers in 1usize..40,
        ) {
            let range = AuditRange::new(start, start + len - 1, workers).unwrap();
            let intervals = partition(&range);

            prop_assert!(intervals.len() <= workers);
            let heights: Vec<u64> = intervals.iter().flat_map(|r| r.clone()).collect();
            prop_assert_eq!(heights, (start..start + len).collect::<Vec<_>>());

            let sizes: Vec<u64> = intervals.iter().map(|r| r.end() - r.start() + 1).collect();
            let max = *sizes.iter().max().unwrap();
            let min = *sizes.iter().min().unwrap();
            prop_assert!(max - min <= 1);
            prop_assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
        }
    }
}
