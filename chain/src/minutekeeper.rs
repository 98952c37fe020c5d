//! Minute keeper.
//!
//! Watches the chain's `current-minute` clock and decides whether it is a
//! good time to submit. Between minute 0 and minute 1 the pool must hold
//! back: a freshly created entry would still land in the previous round.
//! Detecting that window is subtle when the follower syncs whole blocks at
//! a time and only ever observes minute 0.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, trace};
use serde::Serialize;

use oprpool_core::ShareCheck;

use crate::{ChainClient, CurrentMinute};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct MinuteKeeper {
    client: Arc<dyn ChainClient>,

    submit: AtomicBool,
    submit_height: AtomicI32,

    syncing: AtomicBool,
    last_nonzero_height: AtomicI32,
}

/// Snapshot for the admin surface.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MinuteKeeperStatus {
    #[serde(rename = "submitting")]
    pub submit: bool,
    #[serde(rename = "submitheight")]
    pub submit_height: i32,
    pub syncing: bool,
    #[serde(rename = "lastnonzero")]
    pub last_nonzero_height: i32,
}

impl MinuteKeeper {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        MinuteKeeper {
            client,
            // Until the first poll lands, err on the side of submitting
            submit: AtomicBool::new(true),
            submit_height: AtomicI32::new(0),
            syncing: AtomicBool::new(false),
            last_nonzero_height: AtomicI32::new(0),
        }
    }

    pub fn status(&self) -> MinuteKeeperStatus {
        MinuteKeeperStatus {
            submit: self.submit.load(Ordering::SeqCst),
            submit_height: self.submit_height.load(Ordering::SeqCst),
            syncing: self.syncing.load(Ordering::SeqCst),
            last_nonzero_height: self.last_nonzero_height.load(Ordering::SeqCst),
        }
    }

    /// Polls the minute clock every two seconds until the future is
    /// dropped. Any RPC error falls back to rolling submissions.
    pub async fn run(&self) {
        loop {
            match self.client.current_minute().await {
                Ok(cr) => self.observe(&cr),
                Err(e) => {
                    self.submit.store(true, Ordering::SeqCst);
                    error!("minutekeeper: failed to get minute: {}", e);
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Applies one minute observation.
    ///
    /// The goal is detecting the minute 0 -> minute 1 transition:
    ///   1. Non-zero minute: we are following minutes live, submit freely.
    ///   2. Minute 0 on a block whose minutes we never saw: the follower is
    ///      block-syncing, submit freely.
    ///   3. Minute 0 on the block we just watched finish: we are inside the
    ///      [0, 1) window, hold back.
    fn observe(&self, cr: &CurrentMinute) {
        let dbh = cr.directory_block_height;
        if cr.minute != 0 {
            self.submit.store(true, Ordering::SeqCst);
            self.submit_height.store(dbh + 1, Ordering::SeqCst);
            self.syncing.store(true, Ordering::SeqCst);
            self.last_nonzero_height.store(dbh, Ordering::SeqCst);
        } else if dbh != self.last_nonzero_height.load(Ordering::SeqCst) {
            self.syncing.store(false, Ordering::SeqCst);
            self.submit.store(true, Ordering::SeqCst);
            self.submit_height.store(dbh + 1, Ordering::SeqCst);
        } else if self.syncing.load(Ordering::SeqCst) && dbh == cr.leader_height - 1 {
            self.submit.store(false, Ordering::SeqCst);
        }

        trace!(
            "minutekeeper: sub={} min={} sync={} dht={} lht={} lnz={}",
            self.submit.load(Ordering::SeqCst),
            cr.minute,
            self.syncing.load(Ordering::SeqCst),
            dbh,
            cr.leader_height,
            self.last_nonzero_height.load(Ordering::SeqCst),
        );
    }
}

impl ShareCheck for MinuteKeeper {
    /// Whether submission is open at all. Says nothing about which height
    /// the submission would land in.
    fn can_submit(&self) -> bool {
        self.submit.load(Ordering::SeqCst)
    }

    fn can_submit_height(&self, h: i32) -> bool {
        if h != self.submit_height.load(Ordering::SeqCst) {
            return false;
        }
        self.can_submit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChain;

    fn keeper() -> MinuteKeeper {
        MinuteKeeper::new(Arc::new(FakeChain::new()))
    }

    fn minute(leader: i32, dbh: i32, minute: i32) -> CurrentMinute {
        CurrentMinute {
            leader_height: leader,
            directory_block_height: dbh,
            minute,
        }
    }

    #[test]
    fn test_nonzero_minute_opens_submission() {
        let k = keeper();
        k.observe(&minute(101, 100, 5));
        assert!(k.can_submit());
        assert!(k.can_submit_height(101));
        assert!(!k.can_submit_height(100));
    }

    #[test]
    fn test_zero_minute_after_watching_minutes_closes_window() {
        let k = keeper();
        // Watch block 101 tick through its minutes
        k.observe(&minute(101, 100, 9));
        assert!(k.can_submit());
        assert!(k.can_submit_height(101));

        // Minute 0: block 101 is being saved, we are inside [0, 1)
        k.observe(&minute(101, 100, 0));
        assert!(!k.can_submit());
        assert!(!k.can_submit_height(101));

        // Minute 1 of block 102, submission reopens
        k.observe(&minute(102, 101, 1));
        assert!(k.can_submit());
        assert!(k.can_submit_height(102));
    }

    #[test]
    fn test_block_sync_never_closes() {
        let k = keeper();
        // Minute 0 on heights we never watched: dbstate syncing
        k.observe(&minute(102, 100, 0));
        assert!(k.can_submit());
        assert_eq!(k.status().submit_height, 101);
        assert!(!k.status().syncing);

        k.observe(&minute(103, 101, 0));
        assert!(k.can_submit());
    }

    #[test]
    fn test_error_defaults_open() {
        let k = keeper();
        k.observe(&minute(101, 100, 9));
        k.observe(&minute(101, 100, 0));
        assert!(!k.can_submit());
        // An RPC failure path stores submit = true; emulate its effect
        k.submit.store(true, Ordering::SeqCst);
        assert!(k.can_submit());
    }
}
