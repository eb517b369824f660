//! Ordered result sink
//!
//! Workers call [`OrderedSink::submit`] in any order; a single drain task
//! ([`OrderedSink::drain`]) writes outcomes to the record stream strictly in
//! ascending height order. The lock only guards in-memory bookkeeping; the
//! drain task releases it before touching the record stream.

use crate::error::AuditError;
use crate::record::AuditOutcome;
use crate::record_stream::RecordWriter;
use crate::reorder::{ReorderBuffer, ReorderError};
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

struct SinkState {
    buffer: ReorderBuffer<AuditOutcome>,
    /// No more submissions will arrive
    closed: bool,
}

/// Tallies of everything the drain task wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub ok: u64,
    pub discrepancies: u64,
    pub fetch_failed: u64,
    pub parse_failed: u64,
    /// Heights in emission order
    pub emitted: Vec<u64>,
    /// Heights held above a gap at shutdown and dropped
    pub stranded: Vec<u64>,
}

impl DrainStats {
    fn record(&mut self, outcome: &AuditOutcome) {
        match outcome {
            AuditOutcome::Audited(record) if record.issues().is_empty() => self.ok += 1,
            AuditOutcome::Audited(_) => self.discrepancies += 1,
            AuditOutcome::Failed(AuditError::FetchFailed { .. }) => {
                self.fetch_failed += 1
            }
            AuditOutcome::Failed(AuditError::ParseFailed { .. }) => {
                self.parse_failed += 1
            }
        }
        self.emitted.push(outcome.height());
    }

    /// Highest height written, if any
    pub fn last_emitted(&self) -> Option<u64> {
        self.emitted.last().copied()
    }
}

pub struct OrderedSink {
    state: Mutex<SinkState>,
    notify: Notify,
}

impl OrderedSink {
    pub fn new(first_height: u64) -> Self {
        Self {
            state: Mutex::new(SinkState {
                buffer: ReorderBuffer::new(first_height),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        // The state is only touched through short, non-panicking sections
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand a finished outcome to the sink. Never blocks on I/O.
    pub fn submit(&self, outcome: AuditOutcome) -> Result<(), ReorderError> {
        let height = outcome.height();
        {
            let mut state = self.lock();
            if state.closed {
                warn!("Dropping block {} submitted after the sink was closed", height);
                return Ok(());
            }
            state.buffer.insert(height, outcome)?;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Signal that no further submissions will arrive
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    /// Next height the sink is waiting for
    pub fn next_height(&self) -> u64 {
        self.lock().buffer.next_height()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().buffer.pending_len()
    }

    /// Write outcomes in order until the sink is closed and nothing
    /// contiguous is left. Anything still held above a gap at that point is
    /// discarded so the written prefix stays gap-free. File writes run on
    /// the blocking pool, one batch of ready outcomes at a time; the writer
    /// is handed back with the tallies.
    pub async fn drain<W>(
        &self,
        mut writer: RecordWriter<W>,
    ) -> Result<(DrainStats, RecordWriter<W>)>
    where
        W: Write + Send + 'static,
    {
        let mut stats = DrainStats::default();
        loop {
            let (ready, stranded, closed) = {
                let mut state = self.lock();
                let ready = state.buffer.drain_ready();
                // `closed` is read under the same lock as the drain, and
                // submissions are refused once it is set, so nothing
                // contiguous can still arrive.
                let stranded = if state.closed {
                    state.buffer.discard_pending()
                } else {
                    Vec::new()
                };
                (ready, stranded, state.closed)
            };

            let wrote_any = !ready.is_empty();
            if wrote_any {
                let (returned, batch, written) = tokio::task::spawn_blocking(move || {
                    let written = ready
                        .iter()
                        .try_for_each(|(_, outcome)| writer.write_outcome(outcome));
                    (writer, ready, written)
                })
                .await
                .context("Record stream writer panicked")?;
                writer = returned;
                written?;

                for (height, outcome) in &batch {
                    stats.record(outcome);
                    debug!("Block {} written: status={}", height, outcome.status_str());
                    println!("Block {}: {}", height, outcome.status_str());
                }
            }

            if closed {
                if !stranded.is_empty() {
                    info!(
                        "Discarded {} out-of-order results above block {}",
                        stranded.len(),
                        self.next_height()
                    );
                }
                stats.stranded = stranded;
                return Ok((stats, writer));
            }

            if !wrote_any {
                self.notify.notified().await;
            }
        }
    }
}
