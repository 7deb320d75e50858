//! Persisted entities and the denormalized display projections.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::CellDep;
use crate::script::HashType;

/// Capacity credited to a cellbase display input, in shannons (50,000 CKB).
/// Epoch-based reward arithmetic stays on the node side; the display
/// projection uses the fixed issuance amount.
pub const INITIAL_BLOCK_REWARD: u64 = 5_000_000_000_000;

/// Independent sync lanes; each lane tracks its own tip in `sync_infos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLane {
    Main,
    Fork,
}

impl SyncLane {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "main" => Ok(SyncLane::Main),
            "fork" => Ok(SyncLane::Fork),
            other => Err(Error::Config(format!("unknown sync lane {other:?}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncLane::Main => "main",
            SyncLane::Fork => "fork",
        }
    }

    /// Name of the lane's sync-info row.
    pub fn tip_key(self) -> String {
        format!("{}_tip_block_number", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Syncing,
    Synced,
}

impl SyncStatus {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "syncing" => Ok(SyncStatus::Syncing),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(Error::Malformed(format!("unknown sync status {other:?}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncInfo {
    pub name: String,
    pub value: u64,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    Live,
    Dead,
}

impl CellStatus {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "live" => Ok(CellStatus::Live),
            "dead" => Ok(CellStatus::Dead),
            other => Err(Error::Malformed(format!("unknown cell status {other:?}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CellStatus::Live => "live",
            CellStatus::Dead => "dead",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub block_hash: String,
    pub number: u64,
    pub parent_hash: String,
    pub timestamp: u64,
    pub difficulty: String,
    pub version: u64,
    pub uncles_count: u32,
    pub uncle_block_hashes: Vec<String>,
    pub total_cell_capacity: u64,
    pub cell_consumed: u64,
    pub miner_hash: Option<String>,
    pub reward: u64,
    pub total_transaction_fee: u64,
    pub transactions_count: u32,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct UncleBlock {
    pub block_hash: String,
    pub number: u64,
    pub parent_hash: String,
    pub timestamp: u64,
    pub difficulty: String,
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub tx_hash: String,
    pub version: u64,
    pub deps: Vec<CellDep>,
    pub witnesses: Vec<String>,
    pub transaction_fee: u64,
    /// Denormalized from the owning block at build time; refreshed only by a
    /// separate maintenance pass after a reorg.
    pub block_number: u64,
    pub block_timestamp: u64,
    pub cell_inputs: Vec<CellInput>,
    pub cell_outputs: Vec<CellOutput>,
    pub display_inputs: Vec<DisplayInput>,
    pub display_outputs: Vec<DisplayOutput>,
}

#[derive(Debug, Clone)]
pub struct CellInput {
    pub input_index: u32,
    pub previous_tx_hash: String,
    pub previous_index: u32,
    pub since: String,
}

#[derive(Debug, Clone)]
pub struct CellOutput {
    pub output_index: u32,
    pub capacity: u64,
    pub data: String,
    pub status: CellStatus,
    pub address_id: i64,
    pub address_hash: String,
    pub lock_script: LockScript,
    pub type_script: Option<TypeScript>,
}

#[derive(Debug, Clone)]
pub struct LockScript {
    pub code_hash: String,
    pub hash_type: HashType,
    pub args: String,
    pub script_hash: String,
    pub address_id: i64,
}

#[derive(Debug, Clone)]
pub struct TypeScript {
    pub code_hash: String,
    pub hash_type: HashType,
    pub args: String,
    pub script_hash: String,
}

#[derive(Debug, Clone)]
pub struct Address {
    pub id: i64,
    pub address_hash: String,
    pub lock_code_hash: String,
    pub lock_hash_type: HashType,
    pub lock_args: String,
    pub balance: u64,
    pub occupied_balance: u64,
}

/// Fully built in-memory state for one block, ready for the atomic commit.
/// Discarding a batch before commit requires no cleanup.
#[derive(Debug, Clone)]
pub struct BlockBatch {
    pub block: Block,
    pub uncles: Vec<UncleBlock>,
    pub transactions: Vec<Transaction>,
}

/// Stable identity of a cell output: the outpoint that created it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellIdentity {
    pub tx_hash: String,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayInput {
    pub previous_output: Option<CellIdentity>,
    pub from_cellbase: bool,
    pub capacity: u64,
    pub address_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayOutput {
    pub identity: CellIdentity,
    pub capacity: u64,
    pub address_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_key_embeds_lane() {
        assert_eq!(SyncLane::Main.tip_key(), "main_tip_block_number");
        assert_eq!(SyncLane::Fork.tip_key(), "fork_tip_block_number");
    }

    #[test]
    fn status_round_trips() {
        assert_eq!(SyncStatus::parse("syncing").unwrap(), SyncStatus::Syncing);
        assert_eq!(SyncStatus::Synced.as_str(), "synced");
        assert!(SyncStatus::parse("done").is_err());
        assert_eq!(CellStatus::parse("dead").unwrap(), CellStatus::Dead);
    }
}
