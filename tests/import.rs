//! End-to-end import tests against a real sqlite store.

use ckb_sync::entities::{CellStatus, DisplayInput, SyncLane, SyncStatus, INITIAL_BLOCK_REWARD};
use ckb_sync::models::{
    OutPoint, RawBlock, RawHeader, RawInput, RawOutput, RawScript, RawTransaction, RawUncle,
    ISSUANCE_TX_HASH,
};
use ckb_sync::{address, BlockImporter, Error, Network, Store};

const SECP256K1_CODE_HASH: &str =
    "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8";

fn h256(seed: u64) -> String {
    format!("0x{seed:064x}")
}

fn lock(args_seed: u8) -> RawScript {
    RawScript {
        code_hash: SECP256K1_CODE_HASH.to_string(),
        hash_type: "type".to_string(),
        args: format!("0x{args_seed:040x}"),
    }
}

fn header(number: u64, hash_seed: u64) -> RawHeader {
    RawHeader {
        hash: h256(hash_seed),
        number: format!("0x{number:x}"),
        timestamp: "0x16e80172b39".to_string(),
        parent_hash: h256(hash_seed + 1_000_000),
        compact_target: "0x1000".to_string(),
        version: "0x0".to_string(),
        epoch: "0x0".to_string(),
        dao: "0x".to_string(),
        nonce: "0x0".to_string(),
        transactions_root: h256(1),
        proposals_hash: h256(2),
        extra_hash: h256(3),
    }
}

fn uncle(number: u64, hash_seed: u64) -> RawUncle {
    RawUncle {
        header: header(number, hash_seed),
        proposals: Vec::new(),
    }
}

fn issuance_input() -> RawInput {
    RawInput {
        since: "0x0".to_string(),
        previous_output: OutPoint {
            tx_hash: ISSUANCE_TX_HASH.to_string(),
            index: "0xffffffff".to_string(),
        },
    }
}

fn input(tx_hash: &str, index: u32) -> RawInput {
    RawInput {
        since: "0x0".to_string(),
        previous_output: OutPoint {
            tx_hash: tx_hash.to_string(),
            index: format!("0x{index:x}"),
        },
    }
}

fn output(capacity: u64, args_seed: u8) -> RawOutput {
    RawOutput {
        capacity: format!("0x{capacity:x}"),
        lock: lock(args_seed),
        type_script: None,
    }
}

fn tx(hash_seed: u64, inputs: Vec<RawInput>, outputs: Vec<RawOutput>) -> RawTransaction {
    let outputs_data = vec!["0x".to_string(); outputs.len()];
    RawTransaction {
        hash: h256(hash_seed),
        version: "0x0".to_string(),
        cell_deps: Vec::new(),
        header_deps: Vec::new(),
        inputs,
        outputs,
        outputs_data,
        witnesses: Vec::new(),
    }
}

fn cellbase(hash_seed: u64, miner_args: u8, reward: u64) -> RawTransaction {
    tx(hash_seed, vec![issuance_input()], vec![output(reward, miner_args)])
}

fn block(
    number: u64,
    hash_seed: u64,
    uncles: Vec<RawUncle>,
    transactions: Vec<RawTransaction>,
) -> RawBlock {
    RawBlock {
        header: header(number, hash_seed),
        uncles,
        transactions,
        proposals: Vec::new(),
    }
}

fn setup() -> (Store, BlockImporter) {
    let store = Store::open_in_memory().expect("open store");
    let importer = BlockImporter::new(store.clone(), Network::Testnet);
    (store, importer)
}

fn display_inputs_of(store: &Store, tx_hash: &str) -> Vec<DisplayInput> {
    let row = store
        .get_transaction(tx_hash)
        .unwrap()
        .expect("transaction row");
    serde_json::from_str(&row.display_inputs).unwrap()
}

const REWARD: u64 = 5_000_000_000_000;

#[test]
fn import_persists_block_and_transactions() {
    let (store, importer) = setup();
    let raw = block(
        0,
        10,
        Vec::new(),
        vec![
            cellbase(100, 1, REWARD),
            tx(
                101,
                vec![input(&h256(100), 0)],
                vec![output(REWARD - 10_000, 2)],
            ),
        ],
    );

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    let imported = importer.import(&raw, SyncLane::Main).unwrap();

    assert_eq!(store.block_count().unwrap(), 1);
    assert_eq!(store.transaction_count().unwrap(), 2);
    assert_eq!(imported.transactions_count, 2);

    let persisted = store.get_block(&h256(10)).unwrap().expect("block row");
    assert_eq!(persisted.number, 0);
    assert_eq!(persisted.transactions_count, 2);
    assert_eq!(persisted.status, "main");
    assert_eq!(persisted.reward, REWARD);
    assert_eq!(persisted.total_transaction_fee, 10_000);

    let info = store.sync_tip(SyncLane::Main).unwrap().expect("sync info");
    assert_eq!(info.value, 0);
    assert_eq!(info.status, SyncStatus::Synced);
}

#[test]
fn cellbase_display_input_marks_issuance() {
    let (store, importer) = setup();
    let raw = block(0, 20, Vec::new(), vec![cellbase(200, 1, REWARD)]);

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer.import(&raw, SyncLane::Main).unwrap();

    let inputs = display_inputs_of(&store, &h256(200));
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].from_cellbase);
    assert_eq!(inputs[0].capacity, INITIAL_BLOCK_REWARD);
    assert_eq!(inputs[0].previous_output, None);
    assert_eq!(inputs[0].address_hash, None);
}

#[test]
fn same_block_spend_resolves_to_batch_output() {
    let (store, importer) = setup();
    let spend = tx(
        301,
        vec![input(&h256(300), 0)],
        vec![output(REWARD - 20_000, 2)],
    );
    let raw = block(
        0,
        30,
        vec![uncle(0, 31)],
        vec![cellbase(300, 1, REWARD), spend],
    );

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer.import(&raw, SyncLane::Main).unwrap();

    assert_eq!(store.block_count().unwrap(), 1);
    assert_eq!(store.uncle_count().unwrap(), 1);
    assert_eq!(store.transaction_count().unwrap(), 2);

    let miner_address = address::encode_address(&lock(1), Network::Testnet).unwrap();
    let inputs = display_inputs_of(&store, &h256(301));
    assert_eq!(inputs.len(), 1);
    assert!(!inputs[0].from_cellbase);
    assert_eq!(inputs[0].capacity, REWARD);
    assert_eq!(inputs[0].address_hash.as_deref(), Some(miner_address.as_str()));
    let previous = inputs[0].previous_output.as_ref().expect("outpoint");
    assert_eq!(previous.tx_hash, h256(300));
    assert_eq!(previous.index, 0);

    let spender = store.get_transaction(&h256(301)).unwrap().unwrap();
    assert_eq!(spender.transaction_fee, 20_000);
}

#[test]
fn spending_earlier_block_output_resolves_via_store() {
    let (store, importer) = setup();

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer
        .import(
            &block(0, 40, Vec::new(), vec![cellbase(400, 1, REWARD)]),
            SyncLane::Main,
        )
        .unwrap();

    let spend = tx(
        411,
        vec![input(&h256(400), 0)],
        vec![output(REWARD - 5_000, 3)],
    );
    store.mark_syncing(SyncLane::Main, 1).unwrap();
    importer
        .import(
            &block(1, 41, Vec::new(), vec![cellbase(410, 1, REWARD), spend]),
            SyncLane::Main,
        )
        .unwrap();

    let miner_address = address::encode_address(&lock(1), Network::Testnet).unwrap();
    let inputs = display_inputs_of(&store, &h256(411));
    assert_eq!(inputs[0].capacity, REWARD);
    assert_eq!(inputs[0].address_hash.as_deref(), Some(miner_address.as_str()));

    // The spent output flips to dead; untouched outputs stay live.
    assert_eq!(
        store.cell_status(&h256(400), 0).unwrap(),
        Some(CellStatus::Dead)
    );
    assert_eq!(
        store.cell_status(&h256(410), 0).unwrap(),
        Some(CellStatus::Live)
    );
}

#[test]
fn identical_lock_descriptors_share_an_address() {
    let (store, importer) = setup();
    // Cellbase output and the spender's output use the same lock descriptor.
    let spend = tx(
        501,
        vec![input(&h256(500), 0)],
        vec![output(REWARD - 1_000, 7)],
    );
    let raw = block(0, 50, Vec::new(), vec![cellbase(500, 7, REWARD), spend]);

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer.import(&raw, SyncLane::Main).unwrap();

    assert_eq!(store.address_count().unwrap(), 1);
}

#[test]
fn unknown_previous_output_aborts_without_partial_state() {
    let (store, importer) = setup();
    let bad_spend = tx(601, vec![input(&h256(999), 0)], vec![output(1_000, 2)]);
    let raw = block(0, 60, Vec::new(), vec![cellbase(600, 1, REWARD), bad_spend]);

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    let err = importer.import(&raw, SyncLane::Main).unwrap_err();
    assert!(matches!(err, Error::UnknownPreviousOutput { .. }));

    assert_eq!(store.block_count().unwrap(), 0);
    assert_eq!(store.transaction_count().unwrap(), 0);
    assert_eq!(store.uncle_count().unwrap(), 0);
}

#[test]
fn out_of_range_previous_index_is_fatal() {
    let (store, importer) = setup();
    // References the cellbase transaction but an output position it lacks.
    let bad_spend = tx(701, vec![input(&h256(700), 5)], vec![output(1_000, 2)]);
    let raw = block(0, 70, Vec::new(), vec![cellbase(700, 1, REWARD), bad_spend]);

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    let err = importer.import(&raw, SyncLane::Main).unwrap_err();
    assert!(matches!(
        err,
        Error::UnknownPreviousOutput { index: 5, .. }
    ));
    assert_eq!(store.block_count().unwrap(), 0);
}

#[test]
fn commit_requires_syncing_precondition() {
    let (store, importer) = setup();
    let raw = block(0, 80, Vec::new(), vec![cellbase(800, 1, REWARD)]);

    // No mark_syncing call: the lane's sync info row does not exist.
    let err = importer.import(&raw, SyncLane::Main).unwrap_err();
    assert!(matches!(err, Error::SyncConflict(_)));
    assert_eq!(store.block_count().unwrap(), 0);
    assert_eq!(store.transaction_count().unwrap(), 0);

    // A lane marked syncing does not satisfy another lane's precondition.
    store.mark_syncing(SyncLane::Main, 0).unwrap();
    let err = importer.import(&raw, SyncLane::Fork).unwrap_err();
    assert!(matches!(err, Error::SyncConflict(name) if name == "fork_tip_block_number"));
    assert_eq!(store.block_count().unwrap(), 0);
}

#[test]
fn reimport_of_committed_block_is_rejected_whole() {
    let (store, importer) = setup();
    let raw = block(0, 90, Vec::new(), vec![cellbase(900, 1, REWARD)]);

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer.import(&raw, SyncLane::Main).unwrap();

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    let err = importer.import(&raw, SyncLane::Main).unwrap_err();
    assert!(matches!(err, Error::Db(_)));

    assert_eq!(store.block_count().unwrap(), 1);
    assert_eq!(store.transaction_count().unwrap(), 1);
}

#[test]
fn duplicate_transaction_hash_updates_display_fields_only() {
    let (store, importer) = setup();
    // The same cellbase transaction appears in a main-lane block and in a
    // competing fork-lane block with a different block hash.
    let shared = cellbase(1000, 1, REWARD);

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer
        .import(
            &block(0, 100, Vec::new(), vec![shared.clone()]),
            SyncLane::Main,
        )
        .unwrap();

    store.mark_syncing(SyncLane::Fork, 0).unwrap();
    importer
        .import(&block(0, 101, Vec::new(), vec![shared]), SyncLane::Fork)
        .unwrap();

    assert_eq!(store.block_count().unwrap(), 2);
    // One transaction row: the duplicate hash only refreshed display fields.
    assert_eq!(store.transaction_count().unwrap(), 1);
    let inputs = display_inputs_of(&store, &h256(1000));
    assert!(inputs[0].from_cellbase);
}

#[test]
fn block_without_cellbase_has_no_miner_or_reward() {
    let (store, importer) = setup();
    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer
        .import(
            &block(0, 130, Vec::new(), vec![cellbase(1300, 1, REWARD)]),
            SyncLane::Main,
        )
        .unwrap();

    // First transaction spends a real cell, so it is not a cellbase.
    let spend = tx(
        1311,
        vec![input(&h256(1300), 0)],
        vec![output(REWARD - 100, 2)],
    );
    store.mark_syncing(SyncLane::Main, 1).unwrap();
    importer
        .import(&block(1, 131, Vec::new(), vec![spend]), SyncLane::Main)
        .unwrap();

    let persisted = store.get_block(&h256(131)).unwrap().unwrap();
    assert_eq!(persisted.miner_hash, None);
    assert_eq!(persisted.reward, 0);

    let with_cellbase = store.get_block(&h256(130)).unwrap().unwrap();
    assert_eq!(with_cellbase.reward, REWARD);
    assert!(with_cellbase.miner_hash.is_some());
}

#[test]
fn failed_import_height_is_retried_not_skipped() {
    let (store, importer) = setup();
    assert_eq!(store.next_block_number(SyncLane::Main).unwrap(), 0);

    // An import that aborts leaves the lane in `syncing` at the attempted
    // height, so the daemon must come back to the same block.
    let bad_spend = tx(1201, vec![input(&h256(999), 0)], vec![output(1_000, 2)]);
    let raw = block(0, 120, Vec::new(), vec![cellbase(1200, 1, REWARD), bad_spend]);
    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer.import(&raw, SyncLane::Main).unwrap_err();

    assert_eq!(store.block_count().unwrap(), 0);
    assert_eq!(store.next_block_number(SyncLane::Main).unwrap(), 0);

    store.mark_syncing(SyncLane::Main, 0).unwrap();
    importer
        .import(
            &block(0, 121, Vec::new(), vec![cellbase(1210, 1, REWARD)]),
            SyncLane::Main,
        )
        .unwrap();
    assert_eq!(store.next_block_number(SyncLane::Main).unwrap(), 1);
}

#[test]
fn store_survives_reopen_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ckb_sync.db");

    {
        let store = Store::open(&path).unwrap();
        let importer = BlockImporter::new(store.clone(), Network::Testnet);
        store.mark_syncing(SyncLane::Main, 0).unwrap();
        importer
            .import(
                &block(0, 110, Vec::new(), vec![cellbase(1100, 1, REWARD)]),
                SyncLane::Main,
            )
            .unwrap();
    }

    let reopened = Store::open(&path).unwrap();
    assert_eq!(reopened.block_count().unwrap(), 1);
    let info = reopened.sync_tip(SyncLane::Main).unwrap().unwrap();
    assert_eq!(info.status, SyncStatus::Synced);
}
