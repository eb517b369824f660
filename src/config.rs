//! Audit configuration
//!
//! Layered lowest to highest: defaults, config file, command line (clap
//! also folds environment variables into the command-line layer). The
//! config file is `KEY=VALUE` lines with `#` comments:
//!
//! ```text
//! # audit-xmr.cfg
//! server=node.example.org:18089
//! threads=max
//! output_dir=out
//! ```

use crate::auditor::DEFAULT_TOLERANCE;
use crate::rpc_client::{RpcConfig, DEFAULT_RPC_URL};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "audit-xmr.cfg";
pub const DEFAULT_OUTPUT_DIR: &str = "out";
pub const DEFAULT_RPC_PORT: u16 = 18081;
pub const RECORD_STREAM_FILE: &str = "audit_xmr.csv";
pub const LOG_FILE: &str = "audit_log.txt";

/// Which heights to audit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSelection {
    Span { start: u64, end: u64 },
    Single(u64),
}

/// Worker count as written by the user: a number or `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSetting {
    Count(usize),
    Max,
}

impl FromStr for ThreadSetting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("max") {
            return Ok(ThreadSetting::Max);
        }
        s.parse()
            .map(ThreadSetting::Count)
            .with_context(|| format!("Invalid thread count '{}' (expected a number or 'max')", s))
    }
}

impl ThreadSetting {
    /// Resolve to a worker count, at least 1. Counts above the machine's
    /// parallelism are kept; see [`AuditConfig::oversubscribed`].
    pub fn resolve(self) -> usize {
        match self {
            ThreadSetting::Max => num_cpus::get().max(1),
            ThreadSetting::Count(n) => n.max(1),
        }
    }
}

/// `host` → `http://host:18081/json_rpc`, `host:port` → `http://host:port/json_rpc`
pub fn endpoint_from_server(server: &str) -> String {
    let server = server.trim();
    if server.contains(':') {
        format!("http://{}/json_rpc", server)
    } else {
        format!("http://{}:{}/json_rpc", server, DEFAULT_RPC_PORT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    pub rpc_endpoint: String,
    pub worker_count: usize,
    pub output_dir: PathBuf,
    /// `None` means the whole chain, genesis to tip
    pub range: Option<RangeSelection>,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    pub tolerance: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: DEFAULT_RPC_URL.to_string(),
            worker_count: 1,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            range: None,
            max_retries: 0,
            timeout_seconds: 10,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Values set on the command line (or via environment). `None` keeps the
/// lower layer's value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server: Option<String>,
    pub rpc_url: Option<String>,
    pub threads: Option<ThreadSetting>,
    pub output_dir: Option<PathBuf>,
    pub range: Option<RangeSelection>,
    pub max_retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub tolerance: Option<u64>,
}

impl AuditConfig {
    /// Defaults overlaid with `path`. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        if !path.exists() {
            warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            return Ok(config);
        }
        config.apply_file(path)?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let entries = dotenvy::from_path_iter(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;

        let mut server = None;
        let mut rpc_url = None;
        for entry in entries {
            let (key, value) =
                entry.with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            let value = value.trim().to_string();
            match key.as_str() {
                "server" => server = Some(value),
                "rpc_url" => rpc_url = Some(value),
                "threads" => self.worker_count = value.parse::<ThreadSetting>()?.resolve(),
                "output_dir" => self.output_dir = PathBuf::from(value),
                "max_retries" => {
                    self.max_retries = value
                        .parse()
                        .with_context(|| format!("Invalid max_retries: {}", value))?
                }
                "timeout" => {
                    self.timeout_seconds = value
                        .parse()
                        .with_context(|| format!("Invalid timeout: {}", value))?
                }
                "tolerance" => {
                    self.tolerance = value
                        .parse()
                        .with_context(|| format!("Invalid tolerance: {}", value))?
                }
                other => warn!("Ignoring unknown config key '{}' in {}", other, path.display()),
            }
        }

        // `server` wins over `rpc_url` when both are present
        if let Some(server) = server {
            self.rpc_endpoint = endpoint_from_server(&server);
        } else if let Some(url) = rpc_url {
            self.rpc_endpoint = url;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(server) = overrides.server {
            self.rpc_endpoint = endpoint_from_server(&server);
        } else if let Some(url) = overrides.rpc_url {
            self.rpc_endpoint = url;
        }
        if let Some(threads) = overrides.threads {
            self.worker_count = threads.resolve();
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = dir;
        }
        if overrides.range.is_some() {
            self.range = overrides.range;
        }
        if let Some(retries) = overrides.max_retries {
            self.max_retries = retries;
        }
        if let Some(timeout) = overrides.timeout_seconds {
            self.timeout_seconds = timeout;
        }
        if let Some(tolerance) = overrides.tolerance {
            self.tolerance = tolerance;
        }
    }

    /// Whether the worker count exceeds `available` hardware threads
    pub fn oversubscribed(&self, available: usize) -> bool {
        self.worker_count > available
    }

    pub fn record_stream_path(&self) -> PathBuf {
        self.output_dir.join(RECORD_STREAM_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(LOG_FILE)
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            url: self.rpc_endpoint.clone(),
            timeout: Duration::from_secs(self.timeout_seconds.max(1)),
            max_retries: self.max_retries,
        }
    }
}
