//! Scriptable in-memory chain for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    ChainClient, ChainError, CurrentMinute, DBlock, EBlock, EBlockRef, Entry, EntryReceipt,
    Heights,
};

/// A record of one `compose_entry` call.
#[derive(Debug, Clone)]
pub struct ComposedEntry {
    pub chain_id: String,
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
    pub payer: String,
    pub receipt: EntryReceipt,
}

#[derive(Default)]
struct FakeChainState {
    heights: Heights,
    dblocks: HashMap<u32, DBlock>,
    eblocks: HashMap<String, EBlock>,
    entries: HashMap<String, Entry>,
    minutes: VecDeque<CurrentMinute>,
    composed: Vec<ComposedEntry>,
    compose_seq: u64,
    /// Each scheduled failure consumes one call of the named method
    fail_heights: u32,
    fail_dblock: u32,
    fail_entry: u32,
    fail_compose: u32,
}

/// In-memory [`ChainClient`] with scriptable rounds and failure injection.
pub struct FakeChain {
    state: Mutex<FakeChainState>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    pub fn new() -> Self {
        FakeChain {
            state: Mutex::new(FakeChainState::default()),
        }
    }

    pub fn set_heights(&self, directory_block: u32, leader_height: u32) {
        let mut s = self.state.lock().unwrap();
        s.heights = Heights {
            directory_block,
            leader_height,
        };
    }

    /// Installs a round at `height` on `chain_id` with the given entries.
    /// Builds the directory block, entry block, and entry records.
    pub fn add_round(&self, chain_id: &str, height: u32, entries: Vec<Entry>) {
        let mut s = self.state.lock().unwrap();
        let key_mr = format!("eb-{}-{}", chain_id, height);
        let eblock = EBlock {
            chain_id: chain_id.to_string(),
            key_mr: key_mr.clone(),
            prev_key_mr: format!("eb-{}-{}", chain_id, height.saturating_sub(1)),
            sequence: height,
            entries: entries.iter().map(|e| e.hash.clone()).collect(),
        };
        for e in entries {
            s.entries.insert(e.hash.clone(), e);
        }
        s.eblocks.insert(key_mr.clone(), eblock);
        s.dblocks.insert(
            height,
            DBlock {
                height,
                entry_blocks: vec![EBlockRef {
                    chain_id: chain_id.to_string(),
                    key_mr,
                }],
            },
        );
        if s.heights.directory_block < height {
            s.heights.directory_block = height;
            s.heights.leader_height = height + 1;
        }
    }

    /// Installs an empty directory block with no entry blocks at `height`.
    pub fn add_empty_block(&self, height: u32) {
        let mut s = self.state.lock().unwrap();
        s.dblocks.insert(
            height,
            DBlock {
                height,
                entry_blocks: Vec::new(),
            },
        );
        if s.heights.directory_block < height {
            s.heights.directory_block = height;
            s.heights.leader_height = height + 1;
        }
    }

    pub fn push_minute(&self, cr: CurrentMinute) {
        self.state.lock().unwrap().minutes.push_back(cr);
    }

    pub fn composed(&self) -> Vec<ComposedEntry> {
        self.state.lock().unwrap().composed.clone()
    }

    pub fn fail_next_heights(&self, n: u32) {
        self.state.lock().unwrap().fail_heights = n;
    }

    pub fn fail_next_dblock(&self, n: u32) {
        self.state.lock().unwrap().fail_dblock = n;
    }

    pub fn fail_next_entry(&self, n: u32) {
        self.state.lock().unwrap().fail_entry = n;
    }

    pub fn fail_next_compose(&self, n: u32) {
        self.state.lock().unwrap().fail_compose = n;
    }
}

fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn heights(&self) -> Result<Heights, ChainError> {
        let mut s = self.state.lock().unwrap();
        if take_failure(&mut s.fail_heights) {
            return Err(ChainError::Rpc("injected heights failure".to_string()));
        }
        Ok(s.heights)
    }

    async fn dblock(&self, height: u32) -> Result<DBlock, ChainError> {
        let mut s = self.state.lock().unwrap();
        if take_failure(&mut s.fail_dblock) {
            return Err(ChainError::Rpc("injected dblock failure".to_string()));
        }
        s.dblocks
            .get(&height)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("dblock {}", height)))
    }

    async fn eblock(&self, key_mr: &str) -> Result<EBlock, ChainError> {
        let s = self.state.lock().unwrap();
        s.eblocks
            .get(key_mr)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("eblock {}", key_mr)))
    }

    async fn entry(&self, hash: &str) -> Result<Entry, ChainError> {
        let mut s = self.state.lock().unwrap();
        if take_failure(&mut s.fail_entry) {
            return Err(ChainError::Rpc("injected entry failure".to_string()));
        }
        s.entries
            .get(hash)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("entry {}", hash)))
    }

    async fn compose_entry(
        &self,
        chain_id: &str,
        ext_ids: Vec<Vec<u8>>,
        content: Vec<u8>,
        payer: &str,
    ) -> Result<EntryReceipt, ChainError> {
        let mut s = self.state.lock().unwrap();
        if take_failure(&mut s.fail_compose) {
            return Err(ChainError::Rpc("injected compose failure".to_string()));
        }
        s.compose_seq += 1;
        let receipt = EntryReceipt {
            entry_hash: format!("{:064x}", s.compose_seq),
            commit_txid: format!("{:064x}", u64::MAX - s.compose_seq),
        };
        s.composed.push(ComposedEntry {
            chain_id: chain_id.to_string(),
            ext_ids,
            content,
            payer: payer.to_string(),
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }

    async fn current_minute(&self) -> Result<CurrentMinute, ChainError> {
        let mut s = self.state.lock().unwrap();
        match s.minutes.pop_front() {
            Some(cr) => Ok(cr),
            None => Err(ChainError::Rpc("no scripted minute".to_string())),
        }
    }
}
