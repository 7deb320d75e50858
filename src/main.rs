use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ckb_sync::models::parse_hex_u64;
use ckb_sync::{BlockImporter, Config, NodeRpc, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ckb_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("connecting to node at {}", config.node_url);
    tracing::info!("network: {:?}, lane: {}", config.network, config.lane.as_str());

    let store = Store::open(&config.db_path)?;
    let node = NodeRpc::new(&config.node_url);
    let importer = BlockImporter::new(store.clone(), config.network);

    loop {
        if let Err(err) = sync_once(&node, &store, &importer, &config).await {
            tracing::error!("sync attempt failed, will retry: {err}");
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

/// Catch the lane's tip up to the node's tip, one block at a time. Any
/// failure aborts the attempt; the importer's commit is atomic, so the next
/// attempt simply retries the same block.
async fn sync_once(
    node: &NodeRpc,
    store: &Store,
    importer: &BlockImporter,
    config: &Config,
) -> ckb_sync::Result<()> {
    let tip = node.get_tip_block_number().await?;
    let next = store.next_block_number(config.lane)?;

    for number in next..=tip {
        let block_hash = node.get_block_hash(number).await?;
        let raw = node.get_block(&block_hash).await?;

        // The epoch field packs the epoch number into its low 24 bits.
        let epoch_number = parse_hex_u64(&raw.header.epoch)? & 0xff_ffff;
        let epoch = node.get_epoch_by_number(epoch_number).await?;
        tracing::debug!(
            number,
            epoch = %epoch.number,
            epoch_length = %epoch.length,
            "fetched block"
        );

        store.mark_syncing(config.lane, number)?;
        importer.import(&raw, config.lane)?;
    }
    Ok(())
}
