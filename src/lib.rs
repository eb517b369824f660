//! xmr-audit - Parallel block issuance auditor for Monero
//!
//! Cross-checks each block's reported reward against the sum of its
//! coinbase outputs, fetching and auditing many blocks concurrently while
//! writing results in strict height order.

/// Per-height failure types
pub mod error;
/// Records, outcomes and ranges
pub mod record;

/// Data source client (monerod JSON-RPC)
pub mod rpc_client;

/// Block audit algorithm
pub mod auditor;

/// Ordered reassembly buffer, sink, and record stream
pub mod record_stream;
pub mod reorder;
pub mod sink;

/// Worker pool and cancellation
pub mod interrupt;
pub mod scheduler;

pub mod compare;
pub mod config;
pub mod logging;

pub use auditor::{BlockAuditor, DEFAULT_TOLERANCE};
pub use error::AuditError;
pub use record::{AuditIssue, AuditOutcome, AuditRange, AuditStatus, BlockAuditRecord};
pub use rpc_client::{BlockSource, MoneroRpcClient, RawBlock, RpcConfig};
pub use scheduler::{audit_range, RunOutcome, RunSummary, Scheduler};
