//! Reorg injection against a running network.
//!
//! Requires:
//! - `NODE_WS_URLS`: at least three comma-separated WebSocket endpoints
//! - `PARTITION_CREATE_CMD` / `PARTITION_REMOVE_CMD`: commands isolating the
//!   reorg node (see `chaos::command`)
//! - `RPC_HTTP_URL` (optional): canonical chain endpoint for verification
//!
//! Run with `cargo test --test live_network -- --ignored --nocapture`.

use std::sync::Arc;

use eth_reorg_chaos::{
    chaos::CommandPartitionController,
    config::{NetworkConfig, ReorgConfig},
    observability,
    reorg::{Phase, ReorgSession, ReorgVerifier},
    rpc::{create_provider, MultiNodeHeaderSource},
};

#[tokio::test]
#[ignore = "Requires a running multi-node network and partition commands"]
async fn test_live_reorg_depth_three() {
    observability::init_test_tracing();

    let network = NetworkConfig::from_env().unwrap();
    let config = ReorgConfig::from_env().unwrap();
    let source = Arc::new(
        MultiNodeHeaderSource::connect(network.ws_urls().to_vec())
            .await
            .unwrap(),
    );
    let partitions = Arc::new(CommandPartitionController::from_env().unwrap());

    let session = ReorgSession::start(config.clone(), source.clone(), partitions)
        .await
        .unwrap();
    session.wait_ready().await.unwrap();
    session.reorg(3).await.unwrap();
    session.wait_reorg_started().await.unwrap();
    session.wait_depth_reached().await.unwrap();

    let report = session.wait().await.unwrap();
    assert_eq!(report.phase, Phase::Complete);
    assert_eq!(report.alt_blocks.len(), 3);

    let summary = match network.http_url() {
        Some(url) => {
            let provider = create_provider(url).await.unwrap();
            ReorgVerifier::new(provider, report)
                .with_slack(config.replaced_blocks_slack())
                .verify_all_replaced()
                .await
        }
        None => {
            let node = (config.reorg_node() + 1) % network.node_count();
            ReorgVerifier::new(source.node(node).unwrap(), report)
                .with_slack(config.replaced_blocks_slack())
                .verify_all_replaced()
                .await
        }
    };
    assert!(summary.unwrap().replaced.len() >= 2);
}
