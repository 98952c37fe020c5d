//! The chain follower node.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;

use oprpool_chain::ChainClient;
use oprpool_core::constants::ACTIVATION_HEIGHT;
use oprpool_storage::Store;

use crate::grade::{GradedRound, Grader};
use crate::PegnetError;

const HOOK_QUEUE: usize = 10;

/// Event emitted after a height commits: the graded round plus whether it
/// was the chain tip at the time.
#[derive(Debug, Clone)]
pub struct PegnetHook {
    pub height: i32,
    /// The block is the latest block
    pub top: bool,
    pub graded: Arc<GradedRound>,
}

pub struct Node {
    pub(crate) client: Arc<dyn ChainClient>,
    pub(crate) store: Arc<Store>,
    pub(crate) grader: Arc<dyn Grader>,

    pub(crate) hooks: Vec<mpsc::Sender<PegnetHook>>,
    pub(crate) synced: AtomicI32,
    pub(crate) just_booted: AtomicBool,

    pub(crate) polling_period: Duration,
    pub(crate) retry_period: Duration,
}

impl Node {
    /// Loads the sync cursor; a fresh database starts one height below the
    /// protocol activation.
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<Store>,
        grader: Arc<dyn Grader>,
        polling_period: Duration,
        retry_period: Duration,
    ) -> Result<Self, PegnetError> {
        let synced = match store.last_synced()? {
            Some(h) => h,
            None => {
                debug!("pegd: connected to a fresh database");
                ACTIVATION_HEIGHT as i32 - 1
            }
        };

        Ok(Node {
            client,
            store,
            grader,
            hooks: Vec::new(),
            synced: AtomicI32::new(synced),
            just_booted: AtomicBool::new(true),
            polling_period,
            retry_period,
        })
    }

    /// Registers a listener. Called while wiring the engine, before the
    /// node runs.
    pub fn get_hook(&mut self) -> mpsc::Receiver<PegnetHook> {
        let (tx, rx) = mpsc::channel(HOOK_QUEUE);
        self.hooks.push(tx);
        rx
    }

    pub fn synced_height(&self) -> i32 {
        self.synced.load(Ordering::SeqCst)
    }
}
