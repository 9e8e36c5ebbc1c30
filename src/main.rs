//! CLI entry point for the reorg injector.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! CLI Layer (src/cli.rs)
//!     ↓
//! 1. Config (src/config.rs)            → node endpoints, session tunables
//! 2. RPC (src/rpc/)                    → one WebSocket per node, fan-in
//! 3. Chaos (src/chaos/)                → partition create/remove commands
//! 4. Reorg session (src/reorg/)        → consensus, fork, heal, reconverge
//! 5. Verification (src/reorg/verifier) → canonical chain check
//! ```
//!
//! All errors bubble up via `ReorgResult<T>` and end the process with exit code 1.

use eth_reorg_chaos::{cli, observability};
use tracing::error;

#[tokio::main]
async fn main() {
    // RUST_LOG, LOG_JSON and LOG_FILE control logging; see observability
    let log_level = std::env::var("RUST_LOG").ok();
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .ok()
        .and_then(|value| value.parse::<bool>().ok())
        .unwrap_or(false);

    let guard = match observability::init_tracing(log_level, log_file, json_output) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, "Reorg run failed");
        eprintln!("Error: {e}");
        // exit skips destructors; flush file logs first
        drop(guard);
        std::process::exit(1);
    }
}
