//! Scripted in-memory block source

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use xmr_audit::{BlockSource, RawBlock};

/// Reward used for every generated block
pub const REWARD: u64 = 600_000_000_000;

pub fn block_hash(height: u64) -> String {
    format!("{:064x}", height + 1)
}

/// Block body with one generation input and the given output amounts
pub fn coinbase_body(declared_height: u64, amounts: &[u64]) -> String {
    let vout: Vec<_> = amounts
        .iter()
        .map(|a| json!({ "amount": a, "target": { "key": "00" } }))
        .collect();
    json!({
        "major_version": 16,
        "miner_tx": {
            "vin": [{ "gen": { "height": declared_height } }],
            "vout": vout,
        },
    })
    .to_string()
}

/// A consistent block: outputs add up to the reward
pub fn good_block(height: u64) -> RawBlock {
    RawBlock {
        height,
        hash: block_hash(height),
        reward: REWARD,
        body_json: coinbase_body(height, &[REWARD - 1_000, 1_000]),
    }
}

#[derive(Default)]
pub struct MockSource {
    tip: u64,
    overrides: HashMap<u64, RawBlock>,
    delays: HashMap<u64, Duration>,
    unavailable: HashSet<u64>,
    cancel_after: Option<(u64, CancellationToken)>,
    fetched: Mutex<Vec<u64>>,
}

impl MockSource {
    /// Chain of consistent blocks 0..=tip
    pub fn chain(tip: u64) -> Self {
        Self {
            tip,
            ..Default::default()
        }
    }

    pub fn with_block(mut self, block: RawBlock) -> Self {
        self.overrides.insert(block.height, block);
        self
    }

    pub fn with_delay(mut self, height: u64, delay: Duration) -> Self {
        self.delays.insert(height, delay);
        self
    }

    pub fn with_delays(mut self, heights: impl IntoIterator<Item = u64>, delay: Duration) -> Self {
        for height in heights {
            self.delays.insert(height, delay);
        }
        self
    }

    /// Every fetch of `height` fails
    pub fn unavailable_at(mut self, height: u64) -> Self {
        self.unavailable.insert(height);
        self
    }

    /// Cancel `token` once the fetch of `height` has waited out its delay
    pub fn cancel_after_fetch(mut self, height: u64, token: CancellationToken) -> Self {
        self.cancel_after = Some((height, token));
        self
    }

    /// Heights requested so far, in request order
    pub fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockSource for MockSource {
    async fn chain_height(&self) -> Result<u64> {
        Ok(self.tip)
    }

    async fn fetch_block(&self, height: u64) -> Result<RawBlock> {
        self.fetched.lock().unwrap().push(height);

        if let Some(delay) = self.delays.get(&height) {
            tokio::time::sleep(*delay).await;
        }
        if let Some((at, token)) = &self.cancel_after {
            if *at == height {
                token.cancel();
            }
        }

        if self.unavailable.contains(&height) {
            bail!("connection refused");
        }
        if let Some(block) = self.overrides.get(&height) {
            return Ok(block.clone());
        }
        if height > self.tip {
            bail!("block {} is above the chain tip {}", height, self.tip);
        }
        Ok(good_block(height))
    }
}
