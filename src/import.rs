//! Block import pipeline: builds the normalized entities for a raw block in
//! memory, resolves display projections, and hands the finished batch to the
//! store for its atomic commit.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::address::{encode_address, Network};
use crate::entities::{
    Address, Block, BlockBatch, CellIdentity, CellInput, CellOutput, CellStatus, DisplayInput,
    DisplayOutput, LockScript, SyncLane, Transaction, TypeScript, UncleBlock,
    INITIAL_BLOCK_REWARD,
};
use crate::error::{Error, Result};
use crate::fees::{CapacityFeeCalculator, FeeCalculator};
use crate::models::{
    parse_hex_bytes, parse_hex_u32, parse_hex_u64, RawBlock, RawInput, RawOutput, RawScript,
    RawTransaction, RawUncle, ISSUANCE_TX_HASH,
};
use crate::script::{script_hash, HashType, ScriptKind};
use crate::store::{ResolvedCell, Store};

/// Shannons per byte of occupied cell space.
const SHANNONS_PER_BYTE: u64 = 100_000_000;

pub struct BlockImporter<F = CapacityFeeCalculator> {
    store: Store,
    network: Network,
    fees: F,
}

impl BlockImporter<CapacityFeeCalculator> {
    pub fn new(store: Store, network: Network) -> Self {
        Self {
            store,
            network,
            fees: CapacityFeeCalculator,
        }
    }
}

impl<F: FeeCalculator> BlockImporter<F> {
    pub fn with_fee_calculator(store: Store, network: Network, fees: F) -> Self {
        Self {
            store,
            network,
            fees,
        }
    }

    /// Import one raw block: pure in-memory construction first, then a single
    /// atomic commit. An error before the commit leaves no trace; an error
    /// inside it rolls everything back, so the whole import is safe to retry.
    pub fn import(&self, raw: &RawBlock, lane: SyncLane) -> Result<Block> {
        debug!(
            number = %raw.header.number,
            hash = %raw.header.hash,
            lane = lane.as_str(),
            "building block entities"
        );

        let mut block = self.build_block(raw, lane)?;
        let uncles = raw
            .uncles
            .iter()
            .map(build_uncle_block)
            .collect::<Result<Vec<_>>>()?;

        let mut resolver = AddressResolver::new(&self.store, self.network);
        let mut transactions = Vec::with_capacity(raw.transactions.len());
        for raw_tx in &raw.transactions {
            transactions.push(build_transaction(raw_tx, &block, &mut resolver)?);
        }
        block.transactions_count = transactions.len() as u32;

        project_displays(&self.store, &self.fees, &mut transactions)?;
        block.total_transaction_fee = transactions.iter().map(|t| t.transaction_fee).sum();

        let batch = BlockBatch {
            block,
            uncles,
            transactions,
        };
        self.store.commit_block(&batch, lane)?;

        info!(
            number = batch.block.number,
            hash = %batch.block.block_hash,
            transactions = batch.block.transactions_count,
            "imported block"
        );
        Ok(batch.block)
    }

    fn build_block(&self, raw: &RawBlock, lane: SyncLane) -> Result<Block> {
        let header = &raw.header;
        // Miner and reward come from the cellbase only; a block whose first
        // transaction spends real cells yields neither.
        let cellbase = raw.transactions.first().filter(|tx| tx.is_cellbase());
        let miner_hash = match cellbase.and_then(|tx| tx.outputs.first()) {
            Some(output) => Some(encode_address(&output.lock, self.network)?),
            None => None,
        };
        let reward = match cellbase.and_then(|tx| tx.outputs.first()) {
            Some(output) => parse_hex_u64(&output.capacity)?,
            None => 0,
        };

        let mut total_cell_capacity = 0u64;
        let mut cell_consumed = 0u64;
        for tx in &raw.transactions {
            for (index, output) in tx.outputs.iter().enumerate() {
                total_cell_capacity += parse_hex_u64(&output.capacity)?;
                cell_consumed += occupied_capacity(output, tx.output_data(index))?;
            }
        }

        Ok(Block {
            block_hash: header.hash.clone(),
            number: parse_hex_u64(&header.number)?,
            parent_hash: header.parent_hash.clone(),
            timestamp: parse_hex_u64(&header.timestamp)?,
            difficulty: header.compact_target.clone(),
            version: parse_hex_u64(&header.version)?,
            uncles_count: raw.uncles.len() as u32,
            uncle_block_hashes: raw.uncles.iter().map(|u| u.header.hash.clone()).collect(),
            total_cell_capacity,
            cell_consumed,
            miner_hash,
            reward,
            total_transaction_fee: 0,
            transactions_count: 0,
            status: lane.as_str().to_string(),
        })
    }
}

/// Resolves a lock-script descriptor to its address row, creating one on
/// first sight. The per-import cache guarantees the same descriptor observed
/// twice in one block touches the store once and never duplicates a row.
struct AddressResolver<'a> {
    store: &'a Store,
    network: Network,
    cache: HashMap<String, Address>,
}

impl<'a> AddressResolver<'a> {
    fn new(store: &'a Store, network: Network) -> Self {
        Self {
            store,
            network,
            cache: HashMap::new(),
        }
    }

    fn resolve(&mut self, lock: &RawScript) -> Result<Address> {
        let address_hash = encode_address(lock, self.network)?;
        if let Some(address) = self.cache.get(&address_hash) {
            return Ok(address.clone());
        }
        let address = self.store.find_or_create_address(&address_hash, lock)?;
        self.cache.insert(address_hash, address.clone());
        Ok(address)
    }
}

fn build_uncle_block(uncle: &RawUncle) -> Result<UncleBlock> {
    let header = &uncle.header;
    Ok(UncleBlock {
        block_hash: header.hash.clone(),
        number: parse_hex_u64(&header.number)?,
        parent_hash: header.parent_hash.clone(),
        timestamp: parse_hex_u64(&header.timestamp)?,
        difficulty: header.compact_target.clone(),
        version: parse_hex_u64(&header.version)?,
    })
}

fn build_transaction(
    raw: &RawTransaction,
    block: &Block,
    resolver: &mut AddressResolver<'_>,
) -> Result<Transaction> {
    let mut cell_inputs = Vec::with_capacity(raw.inputs.len());
    for (index, input) in raw.inputs.iter().enumerate() {
        cell_inputs.push(build_cell_input(input, index as u32)?);
    }

    let mut cell_outputs = Vec::with_capacity(raw.outputs.len());
    for (index, output) in raw.outputs.iter().enumerate() {
        cell_outputs.push(build_cell_output(
            output,
            raw.output_data(index),
            index as u32,
            resolver,
        )?);
    }

    Ok(Transaction {
        tx_hash: raw.hash.clone(),
        version: parse_hex_u64(&raw.version)?,
        deps: raw.cell_deps.clone(),
        witnesses: raw.witnesses.clone(),
        transaction_fee: 0,
        block_number: block.number,
        block_timestamp: block.timestamp,
        cell_inputs,
        cell_outputs,
        display_inputs: Vec::new(),
        display_outputs: Vec::new(),
    })
}

fn build_cell_input(input: &RawInput, index: u32) -> Result<CellInput> {
    Ok(CellInput {
        input_index: index,
        previous_tx_hash: input.previous_output.tx_hash.clone(),
        previous_index: parse_hex_u32(&input.previous_output.index)?,
        since: input.since.clone(),
    })
}

fn build_cell_output(
    output: &RawOutput,
    data: &str,
    index: u32,
    resolver: &mut AddressResolver<'_>,
) -> Result<CellOutput> {
    let address = resolver.resolve(&output.lock)?;
    let lock_script = build_lock_script(&output.lock, &address)?;
    let type_script = output.type_script.as_ref().map(build_type_script).transpose()?;
    Ok(CellOutput {
        output_index: index,
        capacity: parse_hex_u64(&output.capacity)?,
        data: data.to_string(),
        status: CellStatus::Live,
        address_id: address.id,
        address_hash: address.address_hash,
        lock_script,
        type_script,
    })
}

fn build_lock_script(lock: &RawScript, address: &Address) -> Result<LockScript> {
    let hash_type = HashType::parse(&lock.hash_type)?;
    Ok(LockScript {
        code_hash: lock.code_hash.clone(),
        hash_type,
        args: lock.args.clone(),
        script_hash: script_hash(&lock.code_hash, hash_type, &lock.args)?,
        address_id: address.id,
    })
}

fn build_type_script(raw: &RawScript) -> Result<TypeScript> {
    let hash_type = HashType::parse(&raw.hash_type)?;
    let script_hash = script_hash(&raw.code_hash, hash_type, &raw.args)?;
    if ScriptKind::classify(&raw.code_hash) == ScriptKind::TypeId {
        // The content hash of a type-id script is the deployed contract's
        // identity, distinct from the shared code hash.
        debug!(type_id = %script_hash, "type-id script attached");
    }
    Ok(TypeScript {
        code_hash: raw.code_hash.clone(),
        hash_type,
        args: raw.args.clone(),
        script_hash,
    })
}

/// Occupied capacity of an output in shannons: the serialized byte footprint
/// of capacity, data, and scripts, at one CKB per byte.
fn occupied_capacity(output: &RawOutput, data: &str) -> Result<u64> {
    let script_bytes = |script: &RawScript| -> Result<u64> {
        Ok(33 + parse_hex_bytes(&script.args)?.len() as u64)
    };
    let mut bytes = 8 + parse_hex_bytes(data)?.len() as u64;
    bytes += script_bytes(&output.lock)?;
    if let Some(type_script) = &output.type_script {
        bytes += script_bytes(type_script)?;
    }
    Ok(bytes * SHANNONS_PER_BYTE)
}

/// Compute display projections and fees for the whole batch. Runs only after
/// every transaction in the block is built: resolution consults the persisted
/// store first, then the in-memory batch, so a later transaction may spend an
/// output created earlier in the same block.
fn project_displays<F: FeeCalculator>(
    store: &Store,
    fees: &F,
    transactions: &mut [Transaction],
) -> Result<()> {
    let batch: &[Transaction] = transactions;
    let index: HashMap<String, usize> = batch
        .iter()
        .enumerate()
        .map(|(i, tx)| (tx.tx_hash.clone(), i))
        .collect();

    let mut projected = Vec::with_capacity(batch.len());
    for transaction in batch {
        let mut display_inputs = Vec::with_capacity(transaction.cell_inputs.len());
        let mut input_capacities = Vec::new();
        let mut cellbase = false;
        for input in &transaction.cell_inputs {
            if input.previous_tx_hash == ISSUANCE_TX_HASH {
                cellbase = true;
                display_inputs.push(DisplayInput {
                    previous_output: None,
                    from_cellbase: true,
                    capacity: INITIAL_BLOCK_REWARD,
                    address_hash: None,
                });
            } else {
                let resolved = resolve_previous_output(store, batch, &index, input)?;
                input_capacities.push(resolved.capacity);
                display_inputs.push(DisplayInput {
                    previous_output: Some(CellIdentity {
                        tx_hash: input.previous_tx_hash.clone(),
                        index: input.previous_index,
                    }),
                    from_cellbase: false,
                    capacity: resolved.capacity,
                    address_hash: Some(resolved.address_hash),
                });
            }
        }

        let display_outputs: Vec<DisplayOutput> = transaction
            .cell_outputs
            .iter()
            .map(|output| DisplayOutput {
                identity: CellIdentity {
                    tx_hash: transaction.tx_hash.clone(),
                    index: output.output_index,
                },
                capacity: output.capacity,
                address_hash: output.address_hash.clone(),
            })
            .collect();

        let output_capacities: Vec<u64> =
            transaction.cell_outputs.iter().map(|o| o.capacity).collect();
        let fee = if cellbase {
            0
        } else {
            fees.transaction_fee(&input_capacities, &output_capacities)
        };
        projected.push((display_inputs, display_outputs, fee));
    }

    for (transaction, (display_inputs, display_outputs, fee)) in
        transactions.iter_mut().zip(projected)
    {
        transaction.display_inputs = display_inputs;
        transaction.display_outputs = display_outputs;
        transaction.transaction_fee = fee;
    }
    Ok(())
}

fn resolve_previous_output(
    store: &Store,
    batch: &[Transaction],
    index: &HashMap<String, usize>,
    input: &CellInput,
) -> Result<ResolvedCell> {
    if let Some(resolved) = store.get_cell_output(&input.previous_tx_hash, input.previous_index)? {
        return Ok(resolved);
    }
    if let Some(&position) = index.get(&input.previous_tx_hash) {
        if let Some(output) = batch[position]
            .cell_outputs
            .get(input.previous_index as usize)
        {
            return Ok(ResolvedCell {
                capacity: output.capacity,
                address_hash: output.address_hash.clone(),
            });
        }
    }
    Err(Error::UnknownPreviousOutput {
        tx_hash: input.previous_tx_hash.clone(),
        index: input.previous_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secp_lock(args: &str) -> RawScript {
        RawScript {
            code_hash: "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8"
                .to_string(),
            hash_type: "type".to_string(),
            args: args.to_string(),
        }
    }

    #[test]
    fn occupied_capacity_counts_serialized_bytes() {
        let output = RawOutput {
            capacity: "0x2540be400".to_string(),
            lock: secp_lock("0x0fae74b7377476606e196ec17498d315ec12abf9"),
            type_script: None,
        };
        // 8 (capacity) + 33 (lock code hash + hash type) + 20 (args), no data
        assert_eq!(occupied_capacity(&output, "0x").unwrap(), 61 * SHANNONS_PER_BYTE);
    }

    #[test]
    fn occupied_capacity_includes_type_script_and_data() {
        let output = RawOutput {
            capacity: "0x2540be400".to_string(),
            lock: secp_lock("0x"),
            type_script: Some(secp_lock("0xab")),
        };
        // 8 + 33 lock + 34 type + 2 data bytes
        assert_eq!(
            occupied_capacity(&output, "0xbeef").unwrap(),
            77 * SHANNONS_PER_BYTE
        );
    }

    #[test]
    fn uncle_header_fields_carry_over() {
        let uncle: RawUncle = serde_json::from_value(serde_json::json!({
            "header": {
                "hash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
                "number": "0x9",
                "timestamp": "0x16e80172b39",
                "parent_hash": "0x00000000000000000000000000000000000000000000000000000000000000ab",
                "compact_target": "0x1000",
                "version": "0x0",
                "epoch": "0x0",
                "dao": "0x",
                "nonce": "0x0",
                "transactions_root": "0x00000000000000000000000000000000000000000000000000000000000000ac",
                "proposals_hash": "0x00000000000000000000000000000000000000000000000000000000000000ad",
                "extra_hash": "0x00000000000000000000000000000000000000000000000000000000000000ae"
            },
            "proposals": []
        }))
        .unwrap();
        let built = build_uncle_block(&uncle).unwrap();
        assert_eq!(built.number, 9);
        assert_eq!(built.difficulty, "0x1000");
        assert_eq!(
            built.block_hash,
            "0x00000000000000000000000000000000000000000000000000000000000000aa"
        );
    }
}
