//! JSON-RPC client for the CKB node. The importer treats every structure
//! returned here as already-validated input.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{parse_hex_u64, RawBlock, RawEpoch};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: String,
    id: u64,
    method: String,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

pub struct NodeRpc {
    client: Client,
    url: String,
    request_id: AtomicU64,
}

impl NodeRpc {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
            request_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call<T, R>(&self, method: &str, params: T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id(),
            method: method.to_string(),
            params,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;
        let rpc_response: JsonRpcResponse<R> = response.json().await?;

        if let Some(error) = rpc_response.error {
            return Err(Error::Rpc(format!("{}: {}", error.code, error.message)));
        }
        rpc_response
            .result
            .ok_or_else(|| Error::Rpc(format!("{method} returned an empty response")))
    }

    pub async fn get_tip_block_number(&self) -> Result<u64> {
        let tip: String = self.call("get_tip_block_number", Vec::<()>::new()).await?;
        parse_hex_u64(&tip)
    }

    pub async fn get_block_hash(&self, number: u64) -> Result<String> {
        self.call("get_block_hash", vec![format!("0x{number:x}")])
            .await
    }

    pub async fn get_block(&self, block_hash: &str) -> Result<RawBlock> {
        self.call("get_block", vec![block_hash]).await
    }

    pub async fn get_epoch_by_number(&self, number: u64) -> Result<RawEpoch> {
        self.call("get_epoch_by_number", vec![format!("0x{number:x}")])
            .await
    }
}
