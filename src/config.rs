use std::time::Duration;

use crate::address::Network;
use crate::entities::SyncLane;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub node_url: String,
    pub db_path: String,
    pub network: Network,
    pub lane: SyncLane,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let node_url = std::env::var("CKB_NODE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8114".to_string());
        let db_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "ckb_sync.db".to_string());
        let network =
            Network::parse(&std::env::var("NETWORK").unwrap_or_else(|_| "testnet".to_string()))?;
        let lane =
            SyncLane::parse(&std::env::var("SYNC_LANE").unwrap_or_else(|_| "main".to_string()))?;
        let poll_interval_ms = std::env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<u64>()
            .map_err(|err| Error::Config(format!("invalid POLL_INTERVAL_MS: {err}")))?;

        Ok(Self {
            node_url,
            db_path,
            network,
            lane,
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }
}
