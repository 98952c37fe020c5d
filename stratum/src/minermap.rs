//! The session registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use rand::Rng;
use tokio::sync::mpsc;

use crate::miner::{MinerConn, MinerSnapshot, Notification, NOTIFY_QUEUE, RESPONSE_QUEUE};

/// Registry of live sessions. Writers only register and deregister;
/// broadcasts iterate under the read lock.
pub struct MinerMap {
    miners: RwLock<HashMap<String, Arc<MinerConn>>>,
    /// The nonce prefix to hand the next session, setting its search space
    next_nonce: AtomicU32,
}

impl Default for MinerMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MinerMap {
    pub fn new() -> Self {
        let mut seed: u32 = rand::thread_rng().gen();
        if seed == 0 {
            seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(1);
        }
        MinerMap {
            miners: RwLock::new(HashMap::new()),
            next_nonce: AtomicU32::new(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.miners.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a session and returns its handle plus the queues the
    /// connection's writer task must drain.
    pub fn add_miner(
        &self,
        remote_addr: SocketAddr,
        starting_target: u64,
    ) -> (
        Arc<MinerConn>,
        mpsc::Receiver<String>,
        mpsc::Receiver<Notification>,
    ) {
        let session_id = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
        let nonce_prefix = self.next_nonce.fetch_add(1, Ordering::SeqCst);
        if nonce_prefix == u32::MAX {
            warn!("stratum: nonce prefix space wrapped");
        }

        let (response_tx, response_rx) = mpsc::channel(RESPONSE_QUEUE);
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE);
        let conn = Arc::new(MinerConn::new(
            session_id.clone(),
            remote_addr,
            nonce_prefix,
            starting_target,
            response_tx,
            notify_tx,
        ));

        self.miners
            .write()
            .unwrap()
            .insert(session_id, conn.clone());
        (conn, response_rx, notify_rx)
    }

    pub fn disconnect(&self, session_id: &str) {
        self.miners.write().unwrap().remove(session_id);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<MinerConn>> {
        self.miners.read().unwrap().get(session_id).cloned()
    }

    /// Enqueues a notification on every session, clearing each session's
    /// nonce history first when the message is a job. Sessions whose queue
    /// is full just miss this message.
    pub fn notify(&self, msg: &Notification) -> usize {
        let miners = self.miners.read().unwrap();
        let mut delivered = 0;
        for conn in miners.values() {
            if matches!(msg, Notification::Job { .. }) {
                conn.reset_nonce_history();
            }
            if conn.broadcast(msg.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn snapshot(&self) -> Vec<MinerSnapshot> {
        let miners = self.miners.read().unwrap();
        miners.values().map(|m| m.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    #[test]
    fn test_nonce_prefixes_are_disjoint() {
        let map = MinerMap::new();
        let (a, _, _) = map.add_miner(addr(), 0);
        let (b, _, _) = map.add_miner(addr(), 0);
        let (c, _, _) = map.add_miner(addr(), 0);
        assert_ne!(a.nonce_prefix, b.nonce_prefix);
        assert_ne!(b.nonce_prefix, c.nonce_prefix);
        assert_eq!(b.nonce_prefix, a.nonce_prefix.wrapping_add(1));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_disconnect_removes_session() {
        let map = MinerMap::new();
        let (a, _, _) = map.add_miner(addr(), 0);
        assert!(map.get(&a.session_id).is_some());
        map.disconnect(&a.session_id);
        assert!(map.get(&a.session_id).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_job_broadcast_clears_nonce_history() {
        let map = MinerMap::new();
        let (a, _resp, mut notify) = map.add_miner(addr(), 0);
        assert!(a.record_nonce(&[1]));

        let n = map.notify(&Notification::Job {
            job_id: 1,
            opr_hash: "00".repeat(32),
            clean_jobs: true,
        });
        assert_eq!(n, 1);
        // History cleared: the nonce is fresh again
        assert!(a.record_nonce(&[1]));
        assert!(matches!(
            notify.try_recv().unwrap(),
            Notification::Job { job_id: 1, .. }
        ));
    }
}
