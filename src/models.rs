//! Raw block structures as returned by the node RPC. All numeric fields are
//! `0x`-prefixed hex strings, matching the CKB JSON-RPC wire format.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Previous-output hash of a cellbase input. A transaction whose single input
/// points at this hash creates capacity out of the block reward instead of
/// spending an existing cell.
pub const ISSUANCE_TX_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawScript {
    pub code_hash: String,
    pub hash_type: String,
    pub args: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutPoint {
    pub tx_hash: String,
    pub index: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInput {
    pub since: String,
    pub previous_output: OutPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOutput {
    pub capacity: String,
    pub lock: RawScript,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_script: Option<RawScript>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    pub version: String,
    pub cell_deps: Vec<CellDep>,
    pub header_deps: Vec<String>,
    pub inputs: Vec<RawInput>,
    pub outputs: Vec<RawOutput>,
    pub outputs_data: Vec<String>,
    pub witnesses: Vec<String>,
}

impl RawTransaction {
    /// Cellbase transactions have exactly one input whose previous output is
    /// the issuance sentinel.
    pub fn is_cellbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.tx_hash == ISSUANCE_TX_HASH
    }

    /// Payload data of the output at `index`; empty when the node omits it.
    pub fn output_data(&self, index: usize) -> &str {
        self.outputs_data.get(index).map(String::as_str).unwrap_or("0x")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHeader {
    pub hash: String,
    pub number: String,
    pub timestamp: String,
    pub parent_hash: String,
    pub compact_target: String,
    pub version: String,
    pub epoch: String,
    pub dao: String,
    pub nonce: String,
    pub transactions_root: String,
    pub proposals_hash: String,
    pub extra_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUncle {
    pub header: RawHeader,
    #[serde(default)]
    pub proposals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    pub header: RawHeader,
    pub uncles: Vec<RawUncle>,
    pub transactions: Vec<RawTransaction>,
    #[serde(default)]
    pub proposals: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEpoch {
    pub number: String,
    pub start_number: String,
    pub length: String,
    pub compact_target: String,
}

pub fn parse_hex_u64(value: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::Malformed(format!("expected 0x-prefixed hex number, got {value:?}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|err| Error::Malformed(format!("invalid hex number {value:?}: {err}")))
}

pub fn parse_hex_u32(value: &str) -> Result<u32> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::Malformed(format!("expected 0x-prefixed hex number, got {value:?}")))?;
    u32::from_str_radix(digits, 16)
        .map_err(|err| Error::Malformed(format!("invalid hex number {value:?}: {err}")))
}

pub fn parse_hex_bytes(value: &str) -> Result<Vec<u8>> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::Malformed(format!("expected 0x-prefixed hex bytes, got {value:?}")))?;
    hex::decode(digits).map_err(|err| Error::Malformed(format!("invalid hex bytes {value:?}: {err}")))
}
