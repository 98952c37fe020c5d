//! The chain client method surface and wire structs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ChainError;

/// Current chain heights.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Heights {
    /// Height of the latest saved directory block
    #[serde(rename = "directoryblockheight")]
    pub directory_block: u32,
    /// Height the leaders are currently building
    #[serde(rename = "leaderheight")]
    pub leader_height: u32,
}

/// A directory block: the per-height index of entry blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DBlock {
    pub height: u32,
    #[serde(rename = "dbentries")]
    pub entry_blocks: Vec<EBlockRef>,
}

impl DBlock {
    /// The entry block reference for a chain, if that chain wrote entries
    /// at this height.
    pub fn eblock(&self, chain_id: &str) -> Option<&EBlockRef> {
        self.entry_blocks.iter().find(|e| e.chain_id == chain_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EBlockRef {
    #[serde(rename = "chainid")]
    pub chain_id: String,
    #[serde(rename = "keymr")]
    pub key_mr: String,
}

/// An entry block: the ordered entry hashes one chain wrote at one height.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EBlock {
    #[serde(rename = "chainid")]
    pub chain_id: String,
    #[serde(rename = "keymr")]
    pub key_mr: String,
    #[serde(rename = "prevkeymr")]
    pub prev_key_mr: String,
    pub sequence: u32,
    /// Hex entry hashes, in block order
    pub entries: Vec<String>,
}

/// A single chain entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    pub hash: String,
    #[serde(rename = "extids")]
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
}

/// Receipt for a composed entry: reveal hash plus commit transaction id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryReceipt {
    pub entry_hash: String,
    pub commit_txid: String,
}

/// The chain's intra-block minute clock.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CurrentMinute {
    #[serde(rename = "leaderheight")]
    pub leader_height: i32,
    #[serde(rename = "directoryblockheight")]
    pub directory_block_height: i32,
    pub minute: i32,
}

/// The chain RPC surface the pool consumes.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn heights(&self) -> Result<Heights, ChainError>;

    async fn dblock(&self, height: u32) -> Result<DBlock, ChainError>;

    async fn eblock(&self, key_mr: &str) -> Result<EBlock, ChainError>;

    async fn entry(&self, hash: &str) -> Result<Entry, ChainError>;

    /// Composes, commits, and reveals an entry on `chain_id`, paying with
    /// the given entry credit address.
    async fn compose_entry(
        &self,
        chain_id: &str,
        ext_ids: Vec<Vec<u8>>,
        content: Vec<u8>,
        payer: &str,
    ) -> Result<EntryReceipt, ChainError>;

    async fn current_minute(&self) -> Result<CurrentMinute, ChainError>;
}
