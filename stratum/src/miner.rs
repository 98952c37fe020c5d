//! One miner session.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::SystemTime;

use log::warn;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::rpc::Response;

/// Responses queued ahead of a slow socket before the session gives up.
pub const RESPONSE_QUEUE: usize = 64;

/// Broadcast slots per session. Two is enough: a newer job supersedes an
/// older one, so dropping under pressure is safe.
pub const NOTIFY_QUEUE: usize = 2;

/// Server-to-client notifications. Kept as data until the session's writer
/// task encodes them, so a slow client never stalls the broadcaster.
#[derive(Debug, Clone)]
pub enum Notification {
    Job {
        job_id: i32,
        opr_hash: String,
        clean_jobs: bool,
    },
    SetTarget(u64),
    SetNonce(u32),
    StopMining,
    ShowMessage(String),
    Reconnect {
        host: String,
        port: u16,
        wait_secs: u32,
    },
    GetVersion,
}

impl Notification {
    pub fn encode(&self) -> String {
        let (method, params) = match self {
            Notification::Job {
                job_id,
                opr_hash,
                clean_jobs,
            } => (
                "mining.notify",
                json!([job_id.to_string(), opr_hash, clean_jobs]),
            ),
            Notification::SetTarget(t) => ("mining.set_target", json!([format!("{:016x}", t)])),
            Notification::SetNonce(n) => ("mining.set_nonce", json!([n.to_string()])),
            Notification::StopMining => ("mining.stop_mining", json!([])),
            Notification::ShowMessage(msg) => ("client.show_message", json!([msg])),
            Notification::Reconnect {
                host,
                port,
                wait_secs,
            } => ("client.reconnect", json!([host, port, wait_secs])),
            Notification::GetVersion => ("client.get_version", json!([])),
        };
        json!({"id": null, "method": method, "params": params}).to_string()
    }
}

#[derive(Debug, Default)]
pub(crate) struct MinerState {
    pub agent: String,
    pub username: String,
    pub miner_id: String,
    pub subscribed: bool,
    pub authorized: bool,
    pub preferred_target: u64,
    /// Nonces seen for the current job, cleared on every broadcast
    pub seen_nonces: HashSet<Vec<u8>>,
}

/// The server-side handle for one connection. The writer task owns the
/// socket; everyone else reaches it through the two queues.
pub struct MinerConn {
    pub session_id: String,
    pub remote_addr: SocketAddr,
    pub nonce_prefix: u32,
    pub joined: SystemTime,

    pub(crate) state: Mutex<MinerState>,
    response_tx: mpsc::Sender<String>,
    notify_tx: mpsc::Sender<Notification>,
}

/// Point-in-time view of a session for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct MinerSnapshot {
    pub ip: String,
    pub session_id: String,
    pub preferred_target: u64,
    pub subscribed: bool,
    pub nonce_prefix: u32,
    pub agent: String,
    pub username: String,
    pub miner_id: String,
    pub authorized: bool,
}

impl MinerConn {
    pub(crate) fn new(
        session_id: String,
        remote_addr: SocketAddr,
        nonce_prefix: u32,
        starting_target: u64,
        response_tx: mpsc::Sender<String>,
        notify_tx: mpsc::Sender<Notification>,
    ) -> Self {
        MinerConn {
            session_id,
            remote_addr,
            nonce_prefix,
            joined: SystemTime::now(),
            state: Mutex::new(MinerState {
                preferred_target: starting_target,
                ..Default::default()
            }),
            response_tx,
            notify_tx,
        }
    }

    /// Queues a response line for this session. Writes within a session
    /// stay ordered; a wedged socket eventually errors out here.
    pub(crate) fn send_response(&self, response: &Response) {
        match serde_json::to_string(response) {
            Ok(line) => {
                if self.response_tx.try_send(line).is_err() {
                    warn!(
                        "stratum: response queue full, dropping session={}",
                        self.session_id
                    );
                }
            }
            Err(e) => warn!("stratum: response encode failed: {}", e),
        }
    }

    /// Queues a broadcast. Non-blocking: a full queue drops the message
    /// for this session with a warning.
    pub fn broadcast(&self, msg: Notification) -> bool {
        if self.notify_tx.try_send(msg).is_err() {
            warn!(
                "stratum: notify queue full, dropping session={}",
                self.session_id
            );
            return false;
        }
        true
    }

    /// Forget the nonces of the previous job.
    pub fn reset_nonce_history(&self) {
        self.state.lock().unwrap().seen_nonces.clear();
    }

    /// Records a nonce for the current job; false when already seen.
    pub(crate) fn record_nonce(&self, nonce: &[u8]) -> bool {
        self.state.lock().unwrap().seen_nonces.insert(nonce.to_vec())
    }

    pub fn preferred_target(&self) -> u64 {
        self.state.lock().unwrap().preferred_target
    }

    pub fn authorized(&self) -> bool {
        self.state.lock().unwrap().authorized
    }

    pub fn username(&self) -> String {
        self.state.lock().unwrap().username.clone()
    }

    pub fn miner_id(&self) -> String {
        self.state.lock().unwrap().miner_id.clone()
    }

    pub fn snapshot(&self) -> MinerSnapshot {
        let state = self.state.lock().unwrap();
        MinerSnapshot {
            ip: self.remote_addr.to_string(),
            session_id: self.session_id.clone(),
            preferred_target: state.preferred_target,
            subscribed: state.subscribed,
            nonce_prefix: self.nonce_prefix,
            agent: state.agent.clone(),
            username: state.username.clone(),
            miner_id: state.miner_id.clone(),
            authorized: state.authorized,
        }
    }

    /// The subscription result: notify and set_target subscriptions keyed
    /// by session, plus the session's nonce prefix in decimal.
    pub(crate) fn subscribe_result(&self) -> Value {
        json!([
            {"type": "mining.notify", "id": self.session_id},
            {"type": "mining.set_target", "id": self.session_id},
            {"type": "mining.set_nonce", "id": self.nonce_prefix.to_string()},
        ])
    }
}
