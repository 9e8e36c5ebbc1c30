//! Command-line interface for the reorg injector.
//!
//! # Commands
//!
//! - `reorg`: Inject a reorg of the given depth, wait for reconvergence, verify
//! - `verify`: Re-run verification against a saved report
//! - `watch`: Print per-block agreement across nodes as headers arrive
//!
//! # Example
//!
//! ```bash
//! # Partition the tx nodes for 3 blocks and verify the result
//! eth-reorg-chaos reorg --depth 3
//!
//! # Verify a previous run again
//! eth-reorg-chaos verify --report ./reorg-report.json
//!
//! # Watch the network
//! eth-reorg-chaos watch
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures_util::StreamExt;
use tracing::{error, info, warn};

use crate::chaos::CommandPartitionController;
use crate::config::{NetworkConfig, ReorgConfig};
use crate::error::{ReorgError, ReorgResult};
use crate::reorg::{
    CanonicalChain, ConsensusTracker, ReorgReport, ReorgSession, ReorgVerifier,
    VerificationSummary,
};
use crate::rpc::{create_provider, HeaderSource, MultiNodeHeaderSource};

/// Default location of the session report.
pub const DEFAULT_REPORT_FILE: &str = "./reorg-report.json";

/// EVM chain reorg injector
#[derive(Parser, Debug)]
#[command(name = "eth-reorg-chaos")]
#[command(about = "Inject and verify chain reorgs on a multi-node EVM network", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Partition the network, wait for reconvergence and verify the reorg
    Reorg {
        /// Number of alternative blocks to mine while partitioned
        #[arg(short, long)]
        depth: usize,

        /// Session deadline in seconds (default: REORG_TIMEOUT_SECS)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Report output path (default: REPORT_FILE or ./reorg-report.json)
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Skip canonical chain verification
        #[arg(long)]
        no_verify: bool,
    },

    /// Verify a saved report against the canonical chain
    Verify {
        /// Report to verify (default: REPORT_FILE or ./reorg-report.json)
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Print per-block agreement across nodes
    Watch {
        /// Nodes that must agree on a block (default: BLOCK_CONSENSUS_THRESHOLD)
        #[arg(long)]
        threshold: Option<usize>,
    },
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns the first error of the executed command.
pub async fn run() -> ReorgResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Reorg {
            depth,
            timeout,
            report,
            no_verify,
        } => run_reorg_command(depth, timeout, report_path(report), !no_verify).await,
        Commands::Verify { report } => run_verify_command(report_path(report)).await,
        Commands::Watch { threshold } => run_watch_command(threshold).await,
    }
}

fn report_path(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| std::env::var("REPORT_FILE").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_FILE))
}

/// Execute the reorg command.
async fn run_reorg_command(
    depth: usize,
    timeout: Option<u64>,
    report_file: PathBuf,
    verify: bool,
) -> ReorgResult<()> {
    let network = NetworkConfig::from_env()?;
    let mut config = ReorgConfig::from_env()?;
    if let Some(secs) = timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    config.validate(network.node_count())?;

    let partitions = Arc::new(CommandPartitionController::from_env()?);
    let source = Arc::new(MultiNodeHeaderSource::connect(network.ws_urls().to_vec()).await?);

    println!(
        "{} Injecting a {}-block reorg on node {} ({} nodes)",
        "🔀".cyan(),
        depth.to_string().yellow().bold(),
        config.reorg_node(),
        network.node_count()
    );

    let session = ReorgSession::start(
        config.clone(),
        Arc::clone(&source) as Arc<dyn HeaderSource>,
        partitions,
    )
    .await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tokio::select! {
        _ = &mut shutdown => {
            warn!("Shutdown signal received, cancelling session");
            println!("{}", "🛑 Cancelling, healing partition...".yellow().bold());
            session.cancel();
        }
        result = drive(&session, depth) => {
            if let Err(e) = result {
                error!(error = %e, "Reorg did not progress");
            }
        }
    }

    let report = match session.wait().await {
        Ok(report) => report,
        Err(e) => {
            println!("{} {}", "❌ Reorg failed:".red().bold(), e);
            return Err(e);
        }
    };

    print_report(&report);
    if let Err(e) = report.save(&report_file) {
        warn!(error = %e, "Failed to save report");
    } else {
        println!("{} Report saved to {}", "✅".green(), report_file.display());
    }

    if verify {
        let chain = canonical_chain(&network, &source, &config).await?;
        let summary = ReorgVerifier::new(chain, report)
            .with_slack(config.replaced_blocks_slack())
            .with_exclude_last(config.exclude_last())
            .verify_all_replaced()
            .await?;
        print_summary(&summary);
    }

    Ok(())
}

/// Walk the session through its signals, printing progress.
async fn drive(session: &ReorgSession, depth: usize) -> ReorgResult<()> {
    println!("{}", "⏳ Waiting for initial consensus...".dimmed());
    session.wait_ready().await?;
    println!("{} Network ready", "✅".green());

    session.reorg(depth).await?;
    session.wait_reorg_started().await?;
    let snapshot = session.snapshot().await;
    println!(
        "{} Reorg started, fork at block {}",
        "⛓️".cyan(),
        snapshot
            .fork_block
            .map_or_else(|| "?".to_string(), |b| b.to_string())
            .yellow()
    );

    session.wait_depth_reached().await?;
    println!(
        "{} Depth {} reached, partition healed",
        "🩹".cyan(),
        depth.to_string().yellow()
    );
    println!("{}", "⏳ Waiting for final consensus...".dimmed());
    Ok(())
}

/// Execute the verify command.
async fn run_verify_command(report_file: PathBuf) -> ReorgResult<()> {
    let report = ReorgReport::load(&report_file)?;
    let config = ReorgConfig::from_env()?;
    let network = NetworkConfig::from_env()?;

    print_report(&report);

    let chain: Arc<dyn CanonicalChain> = match network.http_url() {
        Some(url) => Arc::new(create_provider(url).await?),
        None => {
            let source = MultiNodeHeaderSource::connect(network.ws_urls().to_vec()).await?;
            canonical_chain(&network, &source, &config).await?
        }
    };

    let summary = ReorgVerifier::new(chain, report)
        .with_slack(config.replaced_blocks_slack())
        .with_exclude_last(config.exclude_last())
        .verify_all_replaced()
        .await?;
    print_summary(&summary);
    Ok(())
}

/// Pick where canonical hashes are read from: the HTTP endpoint if
/// configured, otherwise the first node outside the partition.
async fn canonical_chain(
    network: &NetworkConfig,
    source: &MultiNodeHeaderSource,
    config: &ReorgConfig,
) -> ReorgResult<Arc<dyn CanonicalChain>> {
    if let Some(url) = network.http_url() {
        let provider: Arc<dyn CanonicalChain> = Arc::new(create_provider(url).await?);
        return Ok(provider);
    }

    (0..source.node_count())
        .find(|node| *node != config.reorg_node())
        .and_then(|node| source.node(node))
        .map(|provider| provider as Arc<dyn CanonicalChain>)
        .ok_or_else(|| ReorgError::config("no node available for verification", None))
}

/// Execute the watch command.
async fn run_watch_command(threshold: Option<usize>) -> ReorgResult<()> {
    let network = NetworkConfig::from_env()?;
    let threshold = match threshold {
        Some(threshold) => threshold,
        None => ReorgConfig::from_env()?.block_consensus_threshold(),
    };

    println!("{}", "🔍 Watching block agreement across nodes...".cyan().bold());
    println!();

    let source = MultiNodeHeaderSource::connect(network.ws_urls().to_vec()).await?;
    let mut headers = source.subscribe("watch").await?;
    let mut tracker = ConsensusTracker::new();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                println!();
                println!("{}", "👋 Shutdown complete".green().bold());
                break Ok(());
            }
            item = headers.next() => match item {
                Some(Ok(header)) => {
                    let (node, number) = (header.node_id, header.number);
                    tracker.ingest(header);
                    println!(
                        "{} Block: {} | node {} | {}",
                        "📦".cyan(),
                        number.to_string().yellow(),
                        node,
                        format_agreement(tracker.hashes_at(number), threshold)
                    );
                }
                Some(Err(e)) => break Err(e),
                None => break Err(ReorgError::subscription("header stream ended", None)),
            },
        }
    };

    source.unsubscribe("watch").await?;
    result
}

/// Describe agreement among the hashes reported for one block.
fn format_agreement(hashes: &[B256], threshold: usize) -> String {
    let Some(first) = hashes.first() else {
        return "no reports".dimmed().to_string();
    };

    if hashes.iter().all(|hash| hash == first) {
        let text = format!("{}/{threshold} agree", hashes.len());
        if hashes.len() >= threshold {
            text.green().bold().to_string()
        } else {
            text.white().to_string()
        }
    } else {
        let distinct = hashes
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();
        format!("FORK ({distinct} hashes from {} nodes)", hashes.len())
            .red()
            .bold()
            .to_string()
    }
}

fn print_report(report: &ReorgReport) {
    println!(
        "{} Phase: {} | Depth: {} | Fork block: {} | Alternative blocks: {:?}",
        "📊".cyan(),
        report.phase.to_string().bold(),
        report.depth_requested.to_string().yellow(),
        report
            .fork_block
            .map_or_else(|| "-".to_string(), |b| b.to_string()),
        report.alt_blocks
    );
}

fn print_summary(summary: &VerificationSummary) {
    println!(
        "{} Verified: {}/{} checked blocks replaced (required {})",
        "✅".green(),
        summary.replaced.len().to_string().green().bold(),
        summary.checked.len(),
        summary.required
    );
    if !summary.unchanged.is_empty() {
        println!(
            "{} Still canonical: {:?}",
            "⚠️".yellow(),
            summary.unchanged
        );
    }
}
