//! Script hashing and classification.
//!
//! A script is content-addressed: two cells carrying the same
//! (code_hash, hash_type, args) triple reference the same script, and the
//! blake2b-256 hash over those fields is the script's own identity. For
//! type-id scripts that identity doubles as the deployed contract's "type id".

use blake2b_rs::Blake2bBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::parse_hex_bytes;

pub const CKB_HASH_PERSONALIZATION: &[u8] = b"ckb-default-hash";

/// Code hash of the type-id system script ("TYPE_ID" right-aligned in 32 bytes).
pub const TYPE_ID_CODE_HASH: &str =
    "0x00000000000000000000000000000000000000000000000000545950455f4944";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashType {
    Data,
    Type,
    Data1,
    Data2,
}

impl HashType {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "data" => Ok(HashType::Data),
            "type" => Ok(HashType::Type),
            "data1" => Ok(HashType::Data1),
            "data2" => Ok(HashType::Data2),
            other => Err(Error::Malformed(format!("invalid hash type {other:?}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashType::Data => "data",
            HashType::Type => "type",
            HashType::Data1 => "data1",
            HashType::Data2 => "data2",
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            HashType::Data => 0x00,
            HashType::Type => 0x01,
            HashType::Data1 => 0x02,
            HashType::Data2 => 0x04,
        }
    }
}

/// blake2b-256 content hash over the script fields, using the CKB
/// personalization.
pub fn script_hash(code_hash: &str, hash_type: HashType, args: &str) -> Result<String> {
    let mut hasher = Blake2bBuilder::new(32)
        .personal(CKB_HASH_PERSONALIZATION)
        .build();
    hasher.update(&parse_hex_bytes(code_hash)?);
    hasher.update(&[hash_type.as_byte()]);
    hasher.update(&parse_hex_bytes(args)?);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    Ok(format!("0x{}", hex::encode(out)))
}

/// Closed set of script kinds the importer distinguishes. Classification is a
/// pure function of the code hash; everything that is not the type-id system
/// script is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    TypeId,
    Other,
}

impl ScriptKind {
    pub fn classify(code_hash: &str) -> Self {
        if code_hash == TYPE_ID_CODE_HASH {
            ScriptKind::TypeId
        } else {
            ScriptKind::Other
        }
    }
}
