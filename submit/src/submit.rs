//! The submitter task.

use std::sync::{Arc, Mutex};

use log::{debug, error, trace, warn};
use tokio::sync::mpsc;

use oprpool_chain::ChainClient;
use oprpool_core::constants::{version_for_height, OPR_CHAIN};
use oprpool_core::{Job, ShareCheck, ShareSubmission};
use oprpool_pegnet::{GradedEntry, PegnetHook};
use oprpool_storage::{EmaRow, EntrySubmissionRow, Store, BLOCKED_SOFT_MAX};

use crate::list::insert_target;

const BLOCK_QUEUE: usize = 10;
const SHARE_QUEUE: usize = 1000;

/// Placeholder hash for submissions that never reached the chain.
const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Everything the submitter needs for a round: the graded block that ended
/// the previous one, and the job now being mined.
#[derive(Debug, Clone)]
pub struct SubmissionJob {
    pub hook: PegnetHook,
    pub job: Job,
}

/// Mutable state for the round in flight.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub current_job: Option<Job>,
    pub ema: EmaRow,
    /// Descending soft-max ring, zero slots empty
    pub ring: Vec<u64>,
}

/// EMA = (latest - previous) * 2 / (N + 1) + previous.
///
/// A zero previous value seeds the average with the latest observation.
/// Division floors, matching arbitrary-precision integer math.
pub fn compute_ema(latest: u64, previous: u64, n_points: i32) -> u64 {
    if previous == 0 {
        return latest;
    }
    let l = latest as i128;
    let p = previous as i128;
    let s = ((l - p) * 2).div_euclid(n_points as i128 + 1) + p;
    s as u64
}

/// The round's minimum accepted difficulty: the `cutoff`-th best graded
/// entry, or the last one when the round graded fewer.
pub fn minimum_target(set: &[GradedEntry], cutoff: usize) -> u64 {
    if set.is_empty() || cutoff == 0 {
        return 0;
    }
    let idx = cutoff.min(set.len()) - 1;
    set[idx].self_reported_difficulty
}

pub struct Submitter {
    store: Arc<Store>,
    chain: Arc<dyn ChainClient>,
    gate: Arc<dyn ShareCheck>,
    /// Entry credit address that pays for commits
    es_address: String,

    cutoff: i32,
    ema_n: i32,
    soft_max: usize,

    share_tx: mpsc::Sender<ShareSubmission>,
    block_tx: mpsc::Sender<SubmissionJob>,
    share_rx: Mutex<Option<mpsc::Receiver<ShareSubmission>>>,
    block_rx: Mutex<Option<mpsc::Receiver<SubmissionJob>>>,
}

impl Submitter {
    pub fn new(
        store: Arc<Store>,
        chain: Arc<dyn ChainClient>,
        gate: Arc<dyn ShareCheck>,
        es_address: String,
        cutoff: i32,
        ema_n: i32,
        soft_max: usize,
    ) -> Self {
        let (share_tx, share_rx) = mpsc::channel(SHARE_QUEUE);
        let (block_tx, block_rx) = mpsc::channel(BLOCK_QUEUE);
        Submitter {
            store,
            chain,
            gate,
            es_address,
            cutoff,
            ema_n,
            soft_max,
            share_tx,
            block_tx,
            share_rx: Mutex::new(Some(share_rx)),
            block_rx: Mutex::new(Some(block_rx)),
        }
    }

    pub fn share_channel(&self) -> mpsc::Sender<ShareSubmission> {
        self.share_tx.clone()
    }

    pub fn blocks_channel(&self) -> mpsc::Sender<SubmissionJob> {
        self.block_tx.clone()
    }

    /// State for a fresh run, resuming the EMA from the store.
    pub fn initial_state(&self) -> RoundState {
        let ema = match self.store.latest_ema() {
            Ok(Some(ema)) => ema,
            Ok(None) => EmaRow::default(),
            Err(e) => {
                warn!("submit: failed to load ema, starting cold: {}", e);
                EmaRow::default()
            }
        };
        RoundState {
            current_job: None,
            ema,
            ring: vec![0; self.soft_max],
        }
    }

    /// Services the block and share channels until the future is dropped.
    pub async fn run(&self) {
        let mut block_rx = self.block_rx.lock().unwrap().take().expect("run called twice");
        let mut share_rx = self.share_rx.lock().unwrap().take().expect("run called twice");
        let mut state = self.initial_state();

        loop {
            tokio::select! {
                Some(block) = block_rx.recv() => self.handle_block(&mut state, block),
                Some(share) = share_rx.recv() => self.handle_share(&mut state, share).await,
                else => return,
            }
        }
    }

    /// A block event closes the previous round: fold its minimum accepted
    /// difficulty into the EMA and persist the snapshot. A top event also
    /// rotates in the new job and resets the soft-max ring.
    pub fn handle_block(&self, state: &mut RoundState, sj: SubmissionJob) {
        let set = &sj.hook.graded.graded;
        let (last, last_index) = match set.len() {
            0 | 1 => (0, 0),
            n => (set[n - 1].self_reported_difficulty, n - 1),
        };
        let min_target = minimum_target(set, self.cutoff as usize);

        let ema = EmaRow {
            block_height: sj.hook.height,
            job_id: sj.hook.height,
            cutoff: self.cutoff,
            minimum_target: min_target,
            ema_value: compute_ema(min_target, state.ema.ema_value, self.ema_n),
            last_graded: last,
            last_graded_index: last_index as i32,
            n: self.ema_n,
        };
        if let Err(e) = self.store.save_ema(&ema) {
            error!("submit: failed to write ema height={}: {}", sj.hook.height, e);
        }
        state.ema = ema;

        if sj.hook.top {
            state.ring = vec![0; self.soft_max];
            trace!(
                "submit: new round job={} ema={:#x}",
                sj.job.id,
                state.ema.ema_value
            );
        }
        state.current_job = Some(sj.job);
    }

    pub async fn handle_share(&self, state: &mut RoundState, share: ShareSubmission) {
        let job = match &state.current_job {
            Some(job) if job.id == share.job_id => job.clone(),
            _ => return, // stale share
        };

        if share.target <= state.ema.ema_value {
            debug!(
                "submit: share below ema job={} target={:#x}",
                share.job_id, share.target
            );
            return;
        }

        if insert_target(share.target, &mut state.ring).is_none() {
            // Worse than the soft-max set: record the refusal so operators
            // can audit what was withheld
            let row = EntrySubmissionRow {
                id: 0,
                job_id: share.job_id,
                opr_hash: hex::encode(share.opr_hash),
                nonce: hex::encode(&share.nonce),
                target: share.target,
                entry_hash: ZERO_HASH.to_string(),
                commit_txid: ZERO_HASH.to_string(),
                blocked: BLOCKED_SOFT_MAX,
            };
            if let Err(e) = self.store.save_entry_submission(&row) {
                error!("submit: failed to record blocked share: {}", e);
            }
            return;
        }

        if !self.gate.can_submit_height(share.job_id) {
            return; // minute window closed
        }

        let version = version_for_height(share.job_id as u32);
        let content = job.payload.clone();
        let ext_ids = vec![
            share.nonce.clone(),
            share.target.to_be_bytes().to_vec(),
            vec![version],
        ];

        match self
            .chain
            .compose_entry(OPR_CHAIN, ext_ids, content, &self.es_address)
            .await
        {
            Ok(receipt) => {
                let row = EntrySubmissionRow {
                    id: 0,
                    job_id: share.job_id,
                    opr_hash: hex::encode(share.opr_hash),
                    nonce: hex::encode(&share.nonce),
                    target: share.target,
                    entry_hash: receipt.entry_hash,
                    commit_txid: receipt.commit_txid,
                    blocked: 0,
                };
                if let Err(e) = self.store.save_entry_submission(&row) {
                    error!("submit: failed to record submission: {}", e);
                }
            }
            Err(e) => {
                error!(
                    "submit: failed to compose entry job={} target={:#x}: {}",
                    share.job_id, share.target, e
                );
            }
        }
    }
}
