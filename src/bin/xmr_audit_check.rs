//! xmr-audit-check CLI
//!
//! Re-audits every block listed in an existing record stream and reports
//! any field that no longer matches.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use xmr_audit::compare::{check_rows, CheckResult};
use xmr_audit::config::{AuditConfig, ConfigOverrides, DEFAULT_CONFIG_FILE};
use xmr_audit::logging::init_logging;
use xmr_audit::record_stream::read_rows;
use xmr_audit::{BlockAuditor, MoneroRpcClient};

#[derive(Parser)]
#[command(name = "xmr-audit-check", version)]
#[command(about = "Compare a record stream against freshly fetched block data")]
struct Cli {
    /// Record stream (CSV) written by xmr-audit
    csv: PathBuf,

    /// Daemon as host or host:port (port defaults to 18081); wins over --rpc-url
    #[arg(long, env = "XMR_AUDIT_SERVER")]
    server: Option<String>,

    /// Full JSON-RPC URL
    #[arg(long, env = "XMR_AUDIT_RPC_URL")]
    rpc_url: Option<String>,

    /// Config file (KEY=VALUE lines)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Extra attempts per RPC call
    #[arg(long)]
    max_retries: Option<u32>,

    /// Per-attempt RPC timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Allowed reward/issuance difference in atomic units
    #[arg(long)]
    tolerance: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every row matched
async fn run() -> Result<bool> {
    let cli = Cli::parse();
    init_logging(None)?;

    let mut config = AuditConfig::load(&cli.config)?;
    config.apply_overrides(ConfigOverrides {
        server: cli.server,
        rpc_url: cli.rpc_url,
        max_retries: cli.max_retries,
        timeout_seconds: cli.timeout,
        tolerance: cli.tolerance,
        ..Default::default()
    });

    let rows = read_rows(&cli.csv)?;
    println!("🔍 Checking {} records from {}", rows.len(), cli.csv.display());
    println!("   Endpoint: {}", config.rpc_endpoint);

    let client = Arc::new(MoneroRpcClient::new(config.rpc_config())?);
    let auditor = BlockAuditor::new(client).with_tolerance(config.tolerance);

    let report = check_rows(&auditor, &rows).await;
    for (height, result) in &report.entries {
        match result {
            CheckResult::Match => println!("Block {}: OK", height),
            CheckResult::Differs(diffs) => {
                let details: Vec<String> = diffs.iter().map(|d| d.to_string()).collect();
                println!("Block {}: ERROR ({})", height, details.join(", "));
            }
            CheckResult::AuditFailed(e) => println!("Block {}: audit failed ({})", height, e),
        }
    }

    println!(
        "\nSummary: {} blocks OK, {} with differences, {} could not be audited",
        report.matched(),
        report.differing(),
        report.failed()
    );

    Ok(report.differing() == 0 && report.failed() == 0)
}
