//! Block auditor
//!
//! Cross-checks the reward a source reports for a block against the sum of
//! the block's coinbase (miner transaction) outputs.

use crate::error::AuditError;
use crate::record::{AuditIssue, BlockAuditRecord};
use crate::rpc_client::{BlockSource, RawBlock};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Allowed |reward - issuance| in atomic units (0.001 XMR)
pub const DEFAULT_TOLERANCE: u64 = 1_000_000_000;

/// The part of a block body the audit needs
#[derive(Debug, Deserialize)]
struct BlockBody {
    miner_tx: MinerTx,
}

#[derive(Debug, Deserialize)]
struct MinerTx {
    vin: Vec<CoinbaseInput>,
    vout: Vec<CoinbaseOutput>,
}

#[derive(Debug, Deserialize)]
struct CoinbaseInput {
    #[serde(default)]
    gen: Option<GenInput>,
}

#[derive(Debug, Deserialize)]
struct GenInput {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct CoinbaseOutput {
    amount: u64,
}

/// Coinbase data extracted from a block body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinbaseSummary {
    pub output_sum: u64,
    pub input_count: usize,
    /// Height declared by the first input, if it is a generation input
    pub declared_height: Option<u64>,
}

/// Parse the miner transaction out of a block body
pub fn parse_coinbase(height: u64, body_json: &str) -> Result<CoinbaseSummary, AuditError> {
    let body: BlockBody = serde_json::from_str(body_json)
        .map_err(|e| AuditError::parse(height, format!("malformed block body: {}", e)))?;

    let output_sum = body
        .miner_tx
        .vout
        .iter()
        .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
        .ok_or_else(|| AuditError::parse(height, "coinbase output sum overflows u64"))?;

    let declared_height = body
        .miner_tx
        .vin
        .first()
        .and_then(|input| input.gen.as_ref())
        .map(|gen| gen.height);

    Ok(CoinbaseSummary {
        output_sum,
        input_count: body.miner_tx.vin.len(),
        declared_height,
    })
}

/// Run the three independent checks. Order of the returned tags is fixed.
pub fn classify(
    height: u64,
    claimed_reward: u64,
    computed_issuance: u64,
    total_mined: u64,
    coinbase: &CoinbaseSummary,
    tolerance: u64,
) -> Vec<AuditIssue> {
    let mut issues = Vec::new();

    if claimed_reward.abs_diff(computed_issuance) > tolerance {
        issues.push(AuditIssue::RewardMismatch);
    }
    // Redundant while total_mined == computed_issuance, kept as its own check
    if claimed_reward.abs_diff(total_mined) > tolerance {
        issues.push(AuditIssue::TotalMismatch);
    }
    if coinbase.input_count != 1 || coinbase.declared_height != Some(height) {
        issues.push(AuditIssue::InvalidCoinbase);
    }

    issues
}

/// Build the record for an already fetched block
pub fn audit_raw_block(block: &RawBlock, tolerance: u64) -> Result<BlockAuditRecord, AuditError> {
    let height = block.height;
    if block.hash.is_empty() {
        return Err(AuditError::parse(height, "empty block hash"));
    }

    let coinbase = parse_coinbase(height, &block.body_json)?;
    let computed_issuance = coinbase.output_sum;
    // Only coinbase outputs count towards issuance
    let total_mined = computed_issuance;

    let issues = classify(
        height,
        block.reward,
        computed_issuance,
        total_mined,
        &coinbase,
        tolerance,
    );

    Ok(BlockAuditRecord::new(
        height,
        block.hash.clone(),
        block.reward,
        computed_issuance,
        total_mined,
        issues,
    ))
}

/// Fetches blocks from a [`BlockSource`] and audits them
pub struct BlockAuditor<S: ?Sized> {
    source: Arc<S>,
    tolerance: u64,
}

impl<S: BlockSource + ?Sized> BlockAuditor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: u64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> u64 {
        self.tolerance
    }

    /// Audit one height
    pub async fn audit(&self, height: u64) -> Result<BlockAuditRecord, AuditError> {
        debug!("Audit started for block {}", height);

        let block = self
            .source
            .fetch_block(height)
            .await
            .map_err(|e| AuditError::fetch(height, format!("{:#}", e)))?;

        if block.height != height {
            return Err(AuditError::parse(
                height,
                format!("source returned block {} instead", block.height),
            ));
        }

        let record = audit_raw_block(&block, self.tolerance)?;
        debug!(
            "Audit finished for block {}: status={}, issues={}",
            height,
            record.status(),
            record.issues_string()
        );
        Ok(record)
    }
}
