//! xmr-audit CLI
//!
//! Audits a range of blocks (default: the whole chain) and writes one
//! record per height, in height order, to `<output-dir>/audit_xmr.csv`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use xmr_audit::config::{
    AuditConfig, ConfigOverrides, RangeSelection, ThreadSetting, DEFAULT_CONFIG_FILE,
};
use xmr_audit::interrupt::install_ctrl_c_handler;
use xmr_audit::logging::init_logging;
use xmr_audit::record_stream::{resume_point, RecordWriter};
use xmr_audit::{
    audit_range, AuditOutcome, AuditRange, BlockAuditor, BlockSource, MoneroRpcClient, RunOutcome,
};

/// Exit status for a run stopped by Ctrl-C
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "xmr-audit", version)]
#[command(about = "Audit Monero block rewards against coinbase outputs")]
struct Cli {
    /// Audit blocks START through END (inclusive)
    #[arg(long, num_args = 2, value_names = ["START", "END"], conflicts_with = "block")]
    range: Option<Vec<u64>>,

    /// Audit a single block and print its full record
    #[arg(long)]
    block: Option<u64>,

    /// Number of workers, or `max` for all available parallelism
    #[arg(long, env = "XMR_AUDIT_THREADS")]
    threads: Option<ThreadSetting>,

    /// Daemon as host or host:port (port defaults to 18081); wins over --rpc-url
    #[arg(long, env = "XMR_AUDIT_SERVER")]
    server: Option<String>,

    /// Full JSON-RPC URL
    #[arg(long, env = "XMR_AUDIT_RPC_URL")]
    rpc_url: Option<String>,

    /// Directory for the record stream and log
    #[arg(long, env = "XMR_AUDIT_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

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

    /// Continue after the last block already in the record stream
    #[arg(long, conflicts_with = "block")]
    resume: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let range = match (&self.range, self.block) {
            (Some(bounds), _) => Some(RangeSelection::Span {
                start: bounds[0],
                end: bounds[1],
            }),
            (None, Some(height)) => Some(RangeSelection::Single(height)),
            (None, None) => None,
        };
        ConfigOverrides {
            server: self.server.clone(),
            rpc_url: self.rpc_url.clone(),
            threads: self.threads,
            output_dir: self.output_dir.clone(),
            range,
            max_retries: self.max_retries,
            timeout_seconds: self.timeout,
            tolerance: self.tolerance,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(RunOutcome::Completed) => ExitCode::SUCCESS,
        Ok(RunOutcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<RunOutcome> {
    let cli = Cli::parse();

    let mut config = AuditConfig::load(&cli.config)?;
    config.apply_overrides(cli.overrides());

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;
    init_logging(Some(&config.log_path()))?;

    info!("Audit started");
    if cli.config.exists() {
        info!("Loaded config from {}", cli.config.display());
    } else {
        warn!("Config file {} not found, using defaults", cli.config.display());
    }
    info!("RPC endpoint: {}", config.rpc_endpoint);

    let available = num_cpus::get();
    if config.oversubscribed(available) {
        warn!(
            "Requested {} workers exceeds available parallelism ({}); continuing anyway",
            config.worker_count, available
        );
        eprintln!(
            "⚠️  Requested {} workers exceeds available parallelism ({}); continuing anyway",
            config.worker_count, available
        );
    }

    let client = Arc::new(MoneroRpcClient::new(config.rpc_config())?);
    let auditor = Arc::new(BlockAuditor::new(client.clone()).with_tolerance(config.tolerance));
    let stream_path = config.record_stream_path();

    let (start, end) = match config.range {
        Some(RangeSelection::Single(height)) => {
            return audit_single(&auditor, height, &stream_path).await;
        }
        Some(RangeSelection::Span { start, end }) => (start, end),
        None => {
            let tip = client
                .chain_height()
                .await
                .context("Failed to determine chain height")?;
            info!("No range given, auditing blocks 0 to {}", tip);
            (0, tip)
        }
    };

    let (start, writer) = if cli.resume {
        let start = match resume_point(&stream_path)? {
            Some(next) if next > end => {
                println!(
                    "✅ {} already covers blocks up to {}",
                    stream_path.display(),
                    end
                );
                return Ok(RunOutcome::Completed);
            }
            Some(next) => start.max(next),
            None => start,
        };
        (start, RecordWriter::append(&stream_path)?)
    } else {
        (start, RecordWriter::create(&stream_path)?)
    };

    let range = AuditRange::new(start, end, config.worker_count)?;

    println!("🚀 Starting audit");
    println!("   Range: {} to {}", range.start(), range.end());
    println!("   Workers: {}", range.worker_count());
    println!("   Endpoint: {}", config.rpc_endpoint);
    println!("   Tolerance: {}", auditor.tolerance());
    println!("   Output: {}", stream_path.display());

    let cancel = CancellationToken::new();
    let _signal = install_ctrl_c_handler(cancel.clone());

    let (summary, _) = audit_range(auditor, range, writer, cancel.clone()).await?;
    cancel.cancel();

    println!("\n📊 {}", summary);
    println!("Results saved to {}", stream_path.display());
    info!("Audit finished. Results saved to {}", stream_path.display());

    Ok(summary.outcome)
}

async fn audit_single(
    auditor: &BlockAuditor<MoneroRpcClient>,
    height: u64,
    stream_path: &std::path::Path,
) -> Result<RunOutcome> {
    info!("Auditing single block {}", height);
    let outcome = AuditOutcome::from(auditor.audit(height).await);

    let mut writer = RecordWriter::append(stream_path)?;
    writer.write_outcome(&outcome)?;

    match outcome {
        AuditOutcome::Audited(record) => {
            println!("Block {}:", record.height());
            println!("  Hash: {}", record.hash());
            println!("  Claimed reward: {}", record.claimed_reward());
            println!("  Coinbase outputs: {}", record.computed_issuance());
            println!("  Total mined: {}", record.total_mined());
            println!("  Issues: {}", record.issues_string());
            println!("  Status: {}", record.status());
            Ok(RunOutcome::Completed)
        }
        AuditOutcome::Failed(e) => Err(e).context(format!("Audit failed for block {}", height)),
    }
}
