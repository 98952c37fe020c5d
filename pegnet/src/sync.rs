//! Height-by-height chain sync.
//!
//! Syncing by heights keeps everything in order and keeps the error
//! handling local: any failure while processing a height rolls back that
//! height's transaction, the cursor stays put, and the same height retries
//! after a backoff.

use std::sync::atomic::Ordering;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, trace, warn};

use oprpool_chain::{ChainError, EBlockRef, Entry};
use oprpool_core::constants::{version_for_height, OPR_CHAIN};
use oprpool_storage::GradedPayoutRow;

use crate::grade::GradedRound;
use crate::node::{Node, PegnetHook};
use crate::PegnetError;

/// Parallel entry fetches per height.
const FETCH_WORKERS: usize = 8;

/// Progress log cadence while catching up.
const STATS_EVERY: i32 = 50;

impl Node {
    /// Follows the chain until the future is dropped.
    pub async fn dblock_sync(&self) {
        'outer: loop {
            let heights = match self.client.heights().await {
                Ok(h) => h,
                Err(e) => {
                    warn!("pegd: failed to fetch heights: {}", e);
                    tokio::time::sleep(self.retry_period).await;
                    continue;
                }
            };
            let tip = heights.directory_block as i32;

            let synced = self.synced.load(Ordering::SeqCst);
            if synced >= tip {
                if synced == tip && self.just_booted.load(Ordering::SeqCst) {
                    // Replay the tip once so a job exists right after boot
                    self.synced.store(synced - 1, Ordering::SeqCst);
                } else {
                    tokio::time::sleep(self.polling_period).await;
                    continue;
                }
            }
            self.just_booted.store(false, Ordering::SeqCst);

            let begin = Instant::now();
            let mut iterations = 0i32;

            while self.synced.load(Ordering::SeqCst) < tip {
                let current = self.synced.load(Ordering::SeqCst) + 1;

                let graded = match self.sync_height(current).await {
                    Ok(g) => g,
                    Err(e) => {
                        warn!("pegd: failed to sync height {}: {}", current, e);
                        tokio::time::sleep(self.retry_period).await;
                        continue 'outer;
                    }
                };

                self.synced.store(current, Ordering::SeqCst);
                debug!("pegd: synced height={} dheight={}", current, tip);

                if let Some(graded) = graded {
                    let hook = PegnetHook {
                        height: current,
                        top: current == tip,
                        graded: std::sync::Arc::new(graded),
                    };
                    for hook_tx in &self.hooks {
                        match hook_tx.try_send(hook.clone()) {
                            Ok(()) => trace!("pegd: hook sent height={}", current),
                            Err(_) => warn!("pegd: hook failed to send height={}", current),
                        }
                    }
                }

                iterations += 1;
                if iterations % STATS_EVERY == 0 {
                    let elapsed = begin.elapsed();
                    let avg = elapsed / iterations as u32;
                    let to_go = tip - self.synced.load(Ordering::SeqCst);
                    info!(
                        "pegd: sync stats avg={:?} left={:?} syncing-to={}",
                        avg,
                        avg * to_go.max(0) as u32,
                        tip
                    );
                }
            }
        }
    }

    /// Fetches, grades, and persists one height. The grade rows and cursor
    /// advance commit atomically; on any error nothing is written.
    pub(crate) async fn sync_height(&self, height: i32) -> Result<Option<GradedRound>, PegnetError> {
        let dblock = self.client.dblock(height as u32).await?;

        let graded = match dblock.eblock(OPR_CHAIN) {
            Some(eb_ref) => self.grade_eblock(height, eb_ref).await?,
            None => None,
        };

        let already_paid = self.store.latest_payout_height()? == Some(height);

        self.store.with_tx(|tx| {
            if let Some((graded, eb)) = &graded {
                tx.insert_grade(&oprpool_storage::GradeRow {
                    height,
                    version: graded.version,
                    short_hashes: graded.winners_short_hashes.join(","),
                    cutoff: graded.cutoff,
                    count: graded.count,
                    eblock_keymr: eb.0.clone(),
                    prev_keymr: eb.1.clone(),
                    eb_sequence: eb.2,
                })?;

                if !already_paid {
                    for g in &graded.graded {
                        tx.insert_graded_payout(&GradedPayoutRow {
                            height,
                            position: g.position,
                            reward: g.payout,
                            coinbase_address: g.address.clone(),
                            identity: g.id.clone(),
                            entry_hash: g.entry_hash.clone(),
                        })?;
                    }
                }
            }
            tx.set_synced(height)?;
            Ok(())
        })?;

        Ok(graded.map(|(g, _)| g))
    }

    async fn grade_eblock(
        &self,
        height: i32,
        eb_ref: &EBlockRef,
    ) -> Result<Option<(GradedRound, (String, String, i32))>, PegnetError> {
        let eblock = self.client.eblock(&eb_ref.key_mr).await?;
        let entries = self.multi_fetch(&eblock.entries).await?;

        let prev_winners = match self.store.grade_before(height)? {
            Some(prev) => prev.winners(),
            None => Vec::new(),
        };

        let version = version_for_height(height as u32);
        match self
            .grader
            .grade(version, height, &prev_winners, &entries)
        {
            Some(graded) => Ok(Some((
                graded,
                (
                    eblock.key_mr.clone(),
                    eblock.prev_key_mr.clone(),
                    eblock.sequence as i32,
                ),
            ))),
            None => {
                trace!("pegd: block not graded height={} reason=no graded block", height);
                Ok(None)
            }
        }
    }

    /// Fetches all entries of an entry block with a bounded worker pool,
    /// preserving block order.
    async fn multi_fetch(&self, hashes: &[String]) -> Result<Vec<Entry>, ChainError> {
        let client = self.client.clone();
        stream::iter(hashes.iter().cloned().map(move |h| {
            let client = client.clone();
            async move { client.entry(&h).await }
        }))
        .buffered(FETCH_WORKERS)
        .try_collect()
        .await
    }
}
