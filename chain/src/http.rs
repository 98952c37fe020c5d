//! JSON-RPC chain client.
//!
//! Talks to a chain daemon (and its companion wallet for entry
//! composition) over HTTP JSON-RPC v2. Operators pointing the pool at a
//! different node stack swap this for their own [`ChainClient`].

use async_trait::async_trait;
use log::trace;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    ChainClient, ChainError, CurrentMinute, DBlock, EBlock, Entry, EntryReceipt, Heights,
};

pub struct HttpChainClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpChainClient {
    pub fn new(endpoint: &str) -> Self {
        HttpChainClient {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        trace!("chain rpc: {} {}", method, params);
        let body = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("{}: {}", method, e)))?;

        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("{}: {}", method, e)))?;

        if let Some(err) = envelope.get("error") {
            if !err.is_null() {
                return Err(ChainError::Rpc(format!("{}: {}", method, err)));
            }
        }
        let result = envelope
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Rpc(format!("{}: missing result", method)))?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn heights(&self) -> Result<Heights, ChainError> {
        self.call("heights", json!({})).await
    }

    async fn dblock(&self, height: u32) -> Result<DBlock, ChainError> {
        self.call("dblock-by-height", json!({"height": height})).await
    }

    async fn eblock(&self, key_mr: &str) -> Result<EBlock, ChainError> {
        self.call("entry-block", json!({"keymr": key_mr})).await
    }

    async fn entry(&self, hash: &str) -> Result<Entry, ChainError> {
        self.call("entry", json!({"hash": hash})).await
    }

    async fn compose_entry(
        &self,
        chain_id: &str,
        ext_ids: Vec<Vec<u8>>,
        content: Vec<u8>,
        payer: &str,
    ) -> Result<EntryReceipt, ChainError> {
        let ext_ids_hex: Vec<String> = ext_ids.iter().map(hex::encode).collect();
        self.call(
            "compose-entry",
            json!({
                "chainid": chain_id,
                "extids": ext_ids_hex,
                "content": hex::encode(content),
                "ecaddress": payer,
            }),
        )
        .await
    }

    async fn current_minute(&self) -> Result<CurrentMinute, ChainError> {
        self.call("current-minute", json!({})).await
    }
}
