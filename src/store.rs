//! Relational store over sqlite.
//!
//! One connection behind a mutex; the commit unit for a block runs as a
//! single IMMEDIATE transaction so racing importers serialize on the write
//! lock and the sync-info precondition check is atomic with the update.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::entities::{
    Address, Block, BlockBatch, CellStatus, SyncInfo, SyncLane, SyncStatus, Transaction,
};
use crate::error::{Error, Result};
use crate::models::{RawScript, ISSUANCE_TX_HASH};
use crate::script::HashType;

/// Previous output fields needed by display projection and fee calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCell {
    pub capacity: u64,
    pub address_hash: String,
}

/// Row shape served back out of `ckb_transactions`.
#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub tx_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_fee: u64,
    pub display_inputs: String,
    pub display_outputs: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY,
    block_hash TEXT NOT NULL UNIQUE,
    number INTEGER NOT NULL,
    parent_hash TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    difficulty TEXT NOT NULL,
    version INTEGER NOT NULL,
    uncles_count INTEGER NOT NULL,
    uncle_block_hashes TEXT NOT NULL,
    total_cell_capacity INTEGER NOT NULL,
    cell_consumed INTEGER NOT NULL,
    miner_hash TEXT,
    reward INTEGER NOT NULL,
    total_transaction_fee INTEGER NOT NULL,
    transactions_count INTEGER NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_blocks_number ON blocks (number);

CREATE TABLE IF NOT EXISTS uncle_blocks (
    id INTEGER PRIMARY KEY,
    block_id INTEGER NOT NULL REFERENCES blocks (id) ON DELETE CASCADE,
    block_hash TEXT NOT NULL,
    number INTEGER NOT NULL,
    parent_hash TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    difficulty TEXT NOT NULL,
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ckb_transactions (
    id INTEGER PRIMARY KEY,
    block_id INTEGER NOT NULL REFERENCES blocks (id) ON DELETE CASCADE,
    tx_hash TEXT NOT NULL UNIQUE,
    version INTEGER NOT NULL,
    deps TEXT NOT NULL,
    witnesses TEXT NOT NULL,
    transaction_fee INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    block_timestamp INTEGER NOT NULL,
    display_inputs TEXT NOT NULL,
    display_outputs TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_block_number ON ckb_transactions (block_number);

CREATE TABLE IF NOT EXISTS addresses (
    id INTEGER PRIMARY KEY,
    address_hash TEXT NOT NULL UNIQUE,
    lock_code_hash TEXT NOT NULL,
    lock_hash_type TEXT NOT NULL,
    lock_args TEXT NOT NULL,
    balance INTEGER NOT NULL DEFAULT 0,
    occupied_balance INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS cell_outputs (
    id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL REFERENCES ckb_transactions (id) ON DELETE CASCADE,
    tx_hash TEXT NOT NULL,
    output_index INTEGER NOT NULL,
    capacity INTEGER NOT NULL,
    data TEXT NOT NULL,
    status TEXT NOT NULL,
    address_id INTEGER NOT NULL REFERENCES addresses (id),
    UNIQUE (tx_hash, output_index)
);

CREATE TABLE IF NOT EXISTS cell_inputs (
    id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL REFERENCES ckb_transactions (id) ON DELETE CASCADE,
    input_index INTEGER NOT NULL,
    previous_tx_hash TEXT NOT NULL,
    previous_index INTEGER NOT NULL,
    since TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lock_scripts (
    id INTEGER PRIMARY KEY,
    cell_output_id INTEGER NOT NULL REFERENCES cell_outputs (id) ON DELETE CASCADE,
    code_hash TEXT NOT NULL,
    hash_type TEXT NOT NULL,
    args TEXT NOT NULL,
    script_hash TEXT NOT NULL,
    address_id INTEGER NOT NULL REFERENCES addresses (id)
);
CREATE INDEX IF NOT EXISTS idx_lock_scripts_code_hash ON lock_scripts (code_hash, hash_type);

CREATE TABLE IF NOT EXISTS type_scripts (
    id INTEGER PRIMARY KEY,
    cell_output_id INTEGER NOT NULL REFERENCES cell_outputs (id) ON DELETE CASCADE,
    code_hash TEXT NOT NULL,
    hash_type TEXT NOT NULL,
    args TEXT NOT NULL,
    script_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_type_scripts_code_hash ON type_scripts (code_hash, hash_type);

CREATE TABLE IF NOT EXISTS sync_infos (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    value INTEGER NOT NULL,
    status TEXT NOT NULL
);
";

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Find the address derived from `lock`, creating the row on first sight.
    /// Runs outside the block commit unit: an address row left behind by an
    /// aborted import is benign, since addresses are created lazily and their
    /// aggregates are recomputed by the read path.
    pub fn find_or_create_address(&self, address_hash: &str, lock: &RawScript) -> Result<Address> {
        let conn = self.conn.lock().expect("poisoned");
        conn.execute(
            "INSERT INTO addresses (address_hash, lock_code_hash, lock_hash_type, lock_args)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (address_hash) DO NOTHING",
            params![address_hash, lock.code_hash, lock.hash_type, lock.args],
        )?;
        let (id, lock_code_hash, lock_hash_type, lock_args, balance, occupied_balance) = conn
            .query_row(
                "SELECT id, lock_code_hash, lock_hash_type, lock_args, balance, occupied_balance
                 FROM addresses WHERE address_hash = ?1",
                params![address_hash],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u64>(4)?,
                        row.get::<_, u64>(5)?,
                    ))
                },
            )?;
        Ok(Address {
            id,
            address_hash: address_hash.to_string(),
            lock_code_hash,
            lock_hash_type: HashType::parse(&lock_hash_type)?,
            lock_args,
            balance,
            occupied_balance,
        })
    }

    /// Look up a persisted cell output by the outpoint that created it.
    pub fn get_cell_output(&self, tx_hash: &str, index: u32) -> Result<Option<ResolvedCell>> {
        let conn = self.conn.lock().expect("poisoned");
        let row = conn
            .query_row(
                "SELECT co.capacity, a.address_hash
                 FROM cell_outputs co JOIN addresses a ON a.id = co.address_id
                 WHERE co.tx_hash = ?1 AND co.output_index = ?2",
                params![tx_hash, index],
                |row| {
                    Ok(ResolvedCell {
                        capacity: row.get(0)?,
                        address_hash: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn cell_status(&self, tx_hash: &str, index: u32) -> Result<Option<CellStatus>> {
        let conn = self.conn.lock().expect("poisoned");
        let status = conn
            .query_row(
                "SELECT status FROM cell_outputs WHERE tx_hash = ?1 AND output_index = ?2",
                params![tx_hash, index],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        status.as_deref().map(CellStatus::parse).transpose()
    }

    /// Upsert the lane's sync-info row into the `syncing` state at `number`.
    /// Called by the scheduling layer before each import attempt.
    pub fn mark_syncing(&self, lane: SyncLane, number: u64) -> Result<()> {
        let conn = self.conn.lock().expect("poisoned");
        conn.execute(
            "INSERT INTO sync_infos (name, value, status) VALUES (?1, ?2, 'syncing')
             ON CONFLICT (name) DO UPDATE SET value = excluded.value, status = 'syncing'",
            params![lane.tip_key(), number],
        )?;
        Ok(())
    }

    pub fn sync_tip(&self, lane: SyncLane) -> Result<Option<SyncInfo>> {
        let conn = self.conn.lock().expect("poisoned");
        let row = conn
            .query_row(
                "SELECT name, value, status FROM sync_infos WHERE name = ?1",
                params![lane.tip_key()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(name, value, status)| {
            Ok(SyncInfo {
                name,
                value,
                status: SyncStatus::parse(&status)?,
            })
        })
        .transpose()
    }

    /// Height the lane should import next. A row still in `syncing` state
    /// marks an attempt that never committed, so that height is retried;
    /// a `synced` row advances past itself; no row starts from genesis.
    pub fn next_block_number(&self, lane: SyncLane) -> Result<u64> {
        Ok(match self.sync_tip(lane)? {
            Some(info) => match info.status {
                SyncStatus::Syncing => info.value,
                SyncStatus::Synced => info.value + 1,
            },
            None => 0,
        })
    }

    /// Persist a fully built batch as one atomic unit: the block cascade, the
    /// sync-info precondition check and flip, the display upsert on duplicate
    /// transaction hashes, and the liveness flip of spent previous outputs.
    /// Any failure rolls back everything.
    pub fn commit_block(&self, batch: &BlockBatch, lane: SyncLane) -> Result<()> {
        let mut conn = self.conn.lock().expect("poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let block = &batch.block;
        tx.execute(
            "INSERT INTO blocks (block_hash, number, parent_hash, timestamp, difficulty, version,
                                 uncles_count, uncle_block_hashes, total_cell_capacity,
                                 cell_consumed, miner_hash, reward, total_transaction_fee,
                                 transactions_count, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                block.block_hash,
                block.number,
                block.parent_hash,
                block.timestamp,
                block.difficulty,
                block.version,
                block.uncles_count,
                serde_json::to_string(&block.uncle_block_hashes)?,
                block.total_cell_capacity,
                block.cell_consumed,
                block.miner_hash,
                block.reward,
                block.total_transaction_fee,
                block.transactions_count,
                block.status,
            ],
        )?;
        let block_id = tx.last_insert_rowid();

        for uncle in &batch.uncles {
            tx.execute(
                "INSERT INTO uncle_blocks (block_id, block_hash, number, parent_hash, timestamp,
                                           difficulty, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    block_id,
                    uncle.block_hash,
                    uncle.number,
                    uncle.parent_hash,
                    uncle.timestamp,
                    uncle.difficulty,
                    uncle.version,
                ],
            )?;
        }

        for transaction in &batch.transactions {
            Self::insert_transaction(&tx, block_id, transaction)?;
        }

        for transaction in &batch.transactions {
            for input in &transaction.cell_inputs {
                if input.previous_tx_hash != ISSUANCE_TX_HASH {
                    tx.execute(
                        "UPDATE cell_outputs SET status = 'dead'
                         WHERE tx_hash = ?1 AND output_index = ?2",
                        params![input.previous_tx_hash, input.previous_index],
                    )?;
                }
            }
        }

        let tip_key = lane.tip_key();
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM sync_infos WHERE name = ?1",
                params![tip_key],
                |row| row.get(0),
            )
            .optional()?;
        if status.as_deref() != Some(SyncStatus::Syncing.as_str()) {
            return Err(Error::SyncConflict(tip_key));
        }
        tx.execute(
            "UPDATE sync_infos SET status = 'synced', value = ?2 WHERE name = ?1",
            params![tip_key, block.number],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn insert_transaction(
        tx: &rusqlite::Transaction<'_>,
        block_id: i64,
        transaction: &Transaction,
    ) -> Result<()> {
        let display_inputs = serde_json::to_string(&transaction.display_inputs)?;
        let display_outputs = serde_json::to_string(&transaction.display_outputs)?;

        // A duplicate transaction hash is tolerated: overwrite only the
        // display fields of the existing row, never its cells.
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM ckb_transactions WHERE tx_hash = ?1",
                params![transaction.tx_hash],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            tx.execute(
                "UPDATE ckb_transactions SET display_inputs = ?2, display_outputs = ?3
                 WHERE id = ?1",
                params![id, display_inputs, display_outputs],
            )?;
            return Ok(());
        }

        tx.execute(
            "INSERT INTO ckb_transactions (block_id, tx_hash, version, deps, witnesses,
                                           transaction_fee, block_number, block_timestamp,
                                           display_inputs, display_outputs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                block_id,
                transaction.tx_hash,
                transaction.version,
                serde_json::to_string(&transaction.deps)?,
                serde_json::to_string(&transaction.witnesses)?,
                transaction.transaction_fee,
                transaction.block_number,
                transaction.block_timestamp,
                display_inputs,
                display_outputs,
            ],
        )?;
        let transaction_id = tx.last_insert_rowid();

        for input in &transaction.cell_inputs {
            tx.execute(
                "INSERT INTO cell_inputs (transaction_id, input_index, previous_tx_hash,
                                          previous_index, since)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    transaction_id,
                    input.input_index,
                    input.previous_tx_hash,
                    input.previous_index,
                    input.since,
                ],
            )?;
        }

        for output in &transaction.cell_outputs {
            tx.execute(
                "INSERT INTO cell_outputs (transaction_id, tx_hash, output_index, capacity, data,
                                           status, address_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    transaction_id,
                    transaction.tx_hash,
                    output.output_index,
                    output.capacity,
                    output.data,
                    output.status.as_str(),
                    output.address_id,
                ],
            )?;
            let cell_output_id = tx.last_insert_rowid();

            let lock = &output.lock_script;
            tx.execute(
                "INSERT INTO lock_scripts (cell_output_id, code_hash, hash_type, args,
                                           script_hash, address_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    cell_output_id,
                    lock.code_hash,
                    lock.hash_type.as_str(),
                    lock.args,
                    lock.script_hash,
                    lock.address_id,
                ],
            )?;

            if let Some(type_script) = &output.type_script {
                tx.execute(
                    "INSERT INTO type_scripts (cell_output_id, code_hash, hash_type, args,
                                               script_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        cell_output_id,
                        type_script.code_hash,
                        type_script.hash_type.as_str(),
                        type_script.args,
                        type_script.script_hash,
                    ],
                )?;
            }
        }

        Ok(())
    }

    pub fn get_block(&self, block_hash: &str) -> Result<Option<Block>> {
        let conn = self.conn.lock().expect("poisoned");
        let row = conn
            .query_row(
                "SELECT block_hash, number, parent_hash, timestamp, difficulty, version,
                        uncles_count, uncle_block_hashes, total_cell_capacity, cell_consumed,
                        miner_hash, reward, total_transaction_fee, transactions_count, status
                 FROM blocks WHERE block_hash = ?1",
                params![block_hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, u64>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, u64>(8)?,
                        row.get::<_, u64>(9)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, u64>(11)?,
                        row.get::<_, u64>(12)?,
                        row.get::<_, u32>(13)?,
                        row.get::<_, String>(14)?,
                    ))
                },
            )
            .optional()?;
        row.map(
            |(
                block_hash,
                number,
                parent_hash,
                timestamp,
                difficulty,
                version,
                uncles_count,
                uncle_block_hashes,
                total_cell_capacity,
                cell_consumed,
                miner_hash,
                reward,
                total_transaction_fee,
                transactions_count,
                status,
            )| {
                Ok(Block {
                    block_hash,
                    number,
                    parent_hash,
                    timestamp,
                    difficulty,
                    version,
                    uncles_count,
                    uncle_block_hashes: serde_json::from_str(&uncle_block_hashes)?,
                    total_cell_capacity,
                    cell_consumed,
                    miner_hash,
                    reward,
                    total_transaction_fee,
                    transactions_count,
                    status,
                })
            },
        )
        .transpose()
    }

    pub fn get_transaction(&self, tx_hash: &str) -> Result<Option<TransactionRow>> {
        let conn = self.conn.lock().expect("poisoned");
        let row = conn
            .query_row(
                "SELECT tx_hash, block_number, block_timestamp, transaction_fee,
                        display_inputs, display_outputs
                 FROM ckb_transactions WHERE tx_hash = ?1",
                params![tx_hash],
                |row| {
                    Ok(TransactionRow {
                        tx_hash: row.get(0)?,
                        block_number: row.get(1)?,
                        block_timestamp: row.get(2)?,
                        transaction_fee: row.get(3)?,
                        display_inputs: row.get(4)?,
                        display_outputs: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn block_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM blocks")
    }

    pub fn uncle_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM uncle_blocks")
    }

    pub fn transaction_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM ckb_transactions")
    }

    pub fn address_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM addresses")
    }

    fn count(&self, sql: &str) -> Result<u64> {
        let conn = self.conn.lock().expect("poisoned");
        Ok(conn.query_row(sql, [], |row| row.get(0))?)
    }
}
