//! The stratum server: connection lifecycle and request dispatch.

use std::sync::{Arc, RwLock};

use futures::StreamExt;
use log::{debug, info, trace, warn};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};

use oprpool_core::difficulty::PDIFF;
use oprpool_core::hasher::validate;
use oprpool_core::{Job, PowHasher, ShareCheck, ShareSubmission};

use crate::auth::Authority;
use crate::miner::{MinerConn, Notification};
use crate::minermap::MinerMap;
use crate::rpc::{
    Request, Response, UnknownRpc, ERROR_INVALID_PARAMS, ERROR_INTERNAL, ERROR_METHOD_NOT_FOUND,
    ERROR_PARSE,
};

/// 64KB max line length
const MAX_LINE: usize = 65536;

#[derive(Debug, Clone)]
pub struct StratumConfig {
    pub port: u16,
    /// Unknown users must register with an invite to authorize
    pub require_auth: bool,
    /// Recompute every reported target instead of spot trusting
    pub validate_all_shares: bool,
    /// Sent via client.show_message after a successful authorize
    pub welcome_message: String,
    /// Initial per-session preferred target
    pub starting_target: u64,
}

impl Default for StratumConfig {
    fn default() -> Self {
        StratumConfig {
            port: 1234,
            require_auth: true,
            validate_all_shares: false,
            welcome_message: String::new(),
            starting_target: PDIFF,
        }
    }
}

pub struct Server {
    config: StratumConfig,
    pub miners: Arc<MinerMap>,
    hasher: Arc<dyn PowHasher>,
    authority: Arc<dyn Authority>,
    gate: Arc<dyn ShareCheck>,

    current_job: RwLock<Option<Job>>,
    share_exports: RwLock<Vec<mpsc::Sender<ShareSubmission>>>,
}

impl Server {
    pub fn new(
        config: StratumConfig,
        hasher: Arc<dyn PowHasher>,
        authority: Arc<dyn Authority>,
        gate: Arc<dyn ShareCheck>,
    ) -> Self {
        Server {
            config,
            miners: Arc::new(MinerMap::new()),
            hasher,
            authority,
            gate,
            current_job: RwLock::new(None),
            share_exports: RwLock::new(Vec::new()),
        }
    }

    /// Registers a consumer of accepted shares. Called while wiring the
    /// engine, before the listener starts.
    pub fn add_share_export(&self, tx: mpsc::Sender<ShareSubmission>) {
        self.share_exports.write().unwrap().push(tx);
    }

    /// Publishes a job: replaces the current one and broadcasts it to
    /// every session. Degenerate jobs are tracked but never broadcast.
    pub fn notify(&self, job: Job) {
        let broadcast = !job.is_degenerate();
        let msg = Notification::Job {
            job_id: job.id,
            opr_hash: job.opr_hash_hex(),
            clean_jobs: true,
        };
        *self.current_job.write().unwrap() = Some(job);
        if broadcast {
            let n = self.miners.notify(&msg);
            debug!("stratum: job broadcast to {} sessions", n);
        }
    }

    pub fn current_job(&self) -> Option<Job> {
        self.current_job.read().unwrap().clone()
    }

    /// Tells every session to stop mining, e.g. ahead of a shutdown.
    pub fn stop_mining(&self) {
        self.miners.notify(&Notification::StopMining);
    }

    /// Points every session at another host.
    pub fn reconnect_all(&self, host: &str, port: u16, wait_secs: u32) {
        self.miners.notify(&Notification::Reconnect {
            host: host.to_string(),
            port,
            wait_secs,
        });
    }

    /// Binds the configured port and serves until the future is dropped.
    pub async fn listen(self: Arc<Self>) -> Result<(), crate::StratumError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        info!("stratum: server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), crate::StratumError> {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("stratum: accept failed: {}", e);
                    continue;
                }
            };
            let stream = match set_keepalive(stream) {
                Ok(s) => s,
                Err(e) => {
                    warn!("stratum: keepalive setup failed for {}: {}", addr, e);
                    continue;
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                server.handle_conn(stream, addr).await;
            });
        }
    }

    async fn handle_conn(self: Arc<Self>, stream: TcpStream, addr: std::net::SocketAddr) {
        let (conn, response_rx, notify_rx) =
            self.miners.add_miner(addr, self.config.starting_target);
        info!("stratum: new connection ip={} session={}", addr, conn.session_id);

        let (read_half, write_half) = stream.into_split();

        let writer = tokio::spawn(writer_loop(write_half, response_rx, notify_rx));

        let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE));
        while let Some(next) = lines.next().await {
            match next {
                Ok(line) => self.handle_message(&conn, &line),
                Err(e) => {
                    warn!("stratum: client read failed ip={}: {}", addr, e);
                    break;
                }
            }
        }

        info!("stratum: client disconnected ip={} session={}", addr, conn.session_id);
        self.miners.disconnect(&conn.session_id);
        writer.abort();
    }

    /// Parses and dispatches one inbound line. Wire errors answer with an
    /// RPC error and leave the session open.
    pub fn handle_message(&self, conn: &Arc<MinerConn>, line: &str) {
        let unknown: UnknownRpc = match serde_json::from_str(line) {
            Ok(u) => u,
            Err(e) => {
                debug!("stratum: bad json session={}: {}", conn.session_id, e);
                conn.send_response(&Response::fail(0, ERROR_PARSE, "parse error"));
                return;
            }
        };

        if !unknown.is_request() {
            // A response to a server-initiated call, e.g. client.get_version
            trace!("stratum: client response session={}: {}", conn.session_id, line);
            return;
        }

        let req = unknown.into_request();
        match req.method.as_str() {
            "mining.subscribe" => self.handle_subscribe(conn, req),
            "mining.authorize" => self.handle_authorize(conn, req),
            "mining.get_oprhash" => self.handle_get_oprhash(conn, req),
            "mining.submit" => self.handle_submit(conn, req),
            "mining.suggest_target" => {
                // Advisory; the pool decides targets
                conn.send_response(&Response::ok(req.id, json!(true)));
            }
            _ => {
                conn.send_response(&Response::fail(
                    req.id,
                    ERROR_METHOD_NOT_FOUND,
                    &format!("method not found: {}", req.method),
                ));
            }
        }
    }

    fn handle_subscribe(&self, conn: &Arc<MinerConn>, req: Request) {
        {
            let mut state = conn.state.lock().unwrap();
            state.agent = req
                .params
                .first()
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            state.subscribed = true;
        }

        conn.send_response(&Response::ok(req.id, conn.subscribe_result()));
        conn.broadcast(Notification::SetTarget(self.config.starting_target));

        if let Some(job) = self.current_job() {
            if !job.is_degenerate() {
                conn.broadcast(Notification::Job {
                    job_id: job.id,
                    opr_hash: job.opr_hash_hex(),
                    clean_jobs: true,
                });
            }
        }
    }

    fn handle_authorize(&self, conn: &Arc<MinerConn>, req: Request) {
        let full_username = match req.params.first().and_then(Value::as_str) {
            Some(u) if !u.is_empty() => u.to_string(),
            _ => {
                conn.send_response(&Response::fail(req.id, ERROR_INVALID_PARAMS, "missing username"));
                return;
            }
        };
        let password = req.params.get(1).and_then(Value::as_str).unwrap_or("");
        let invite = req.params.get(2).and_then(Value::as_str).unwrap_or("");
        let payout_address = req.params.get(3).and_then(Value::as_str).unwrap_or("");

        let (user, miner_id) = match full_username.split_once(',') {
            Some((u, m)) if !m.is_empty() => (u.to_string(), m.to_string()),
            _ => (full_username.clone(), "default".to_string()),
        };

        let authorized = if !self.config.require_auth || self.authority.exists(&user) {
            true
        } else {
            self.authority.register(&user, password, invite, payout_address)
        };

        {
            let mut state = conn.state.lock().unwrap();
            state.username = user.clone();
            state.miner_id = miner_id;
            state.authorized = authorized;
        }

        conn.send_response(&Response::ok(req.id, json!(authorized)));

        if authorized {
            info!("stratum: authorized user={} session={}", user, conn.session_id);
            if !self.config.welcome_message.is_empty() {
                conn.broadcast(Notification::ShowMessage(self.config.welcome_message.clone()));
            }
        } else {
            debug!("stratum: authorization failed user={} session={}", user, conn.session_id);
        }
    }

    fn handle_get_oprhash(&self, conn: &Arc<MinerConn>, req: Request) {
        // The job id parameter is advisory; answer with the current round
        match self.current_job() {
            Some(job) => conn.send_response(&Response::ok(req.id, json!(job.opr_hash_hex()))),
            None => conn.send_response(&Response::fail(req.id, ERROR_INTERNAL, "no job yet")),
        }
    }

    fn handle_submit(&self, conn: &Arc<MinerConn>, req: Request) {
        // [username, job_id, nonce_hex, opr_hash_hex, target_hex]
        if req.params.len() < 5 {
            conn.send_response(&Response::fail(req.id, ERROR_INVALID_PARAMS, "expected 5 params"));
            return;
        }
        let job_id = match param_job_id(&req.params[1]) {
            Some(id) => id,
            None => {
                conn.send_response(&Response::fail(req.id, ERROR_INVALID_PARAMS, "bad job id"));
                return;
            }
        };
        let nonce = match req.params[2].as_str().and_then(|s| hex::decode(s).ok()) {
            Some(n) if !n.is_empty() => n,
            _ => {
                conn.send_response(&Response::fail(req.id, ERROR_INVALID_PARAMS, "bad nonce"));
                return;
            }
        };
        let opr_hash = match req.params[3]
            .as_str()
            .and_then(|s| hex::decode(s).ok())
            .and_then(|b| <[u8; 32]>::try_from(b).ok())
        {
            Some(h) => h,
            None => {
                conn.send_response(&Response::fail(req.id, ERROR_INVALID_PARAMS, "bad opr hash"));
                return;
            }
        };
        let target = match req.params[4]
            .as_str()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
        {
            Some(t) => t,
            None => {
                conn.send_response(&Response::fail(req.id, ERROR_INVALID_PARAMS, "bad target"));
                return;
            }
        };

        let accepted = self.check_share(conn, job_id, &nonce, &opr_hash, target);
        conn.send_response(&Response::ok(req.id, json!(accepted)));

        if accepted {
            let submission = ShareSubmission {
                job_id,
                username: conn.username(),
                miner_id: conn.miner_id(),
                opr_hash,
                nonce,
                target,
            };
            let exports = self.share_exports.read().unwrap();
            for tx in exports.iter() {
                if tx.try_send(submission.clone()).is_err() {
                    warn!("stratum: share export full, dropping job={}", job_id);
                }
            }
        }
    }

    /// The acceptance pipeline. Order matters: cheap checks first, the
    /// hash recomputation last.
    fn check_share(
        &self,
        conn: &Arc<MinerConn>,
        job_id: i32,
        nonce: &[u8],
        opr_hash: &[u8; 32],
        target: u64,
    ) -> bool {
        // Admission pre-check: a session that never authorized carries no
        // user to credit the work to, so when admission is required its
        // shares are refused before anything else runs
        if self.config.require_auth && !conn.authorized() {
            return false;
        }

        let job = match self.current_job() {
            Some(job) if job.id == job_id => job,
            _ => {
                trace!("stratum: stale share job={} session={}", job_id, conn.session_id);
                return false;
            }
        };
        if job.opr_hash != *opr_hash {
            return false;
        }
        if target < conn.preferred_target() {
            return false;
        }
        if !conn.record_nonce(nonce) {
            trace!("stratum: duplicate nonce session={}", conn.session_id);
            return false;
        }
        if self.config.validate_all_shares
            && !validate(self.hasher.as_ref(), opr_hash, nonce, target)
        {
            debug!("stratum: reported target failed validation session={}", conn.session_id);
            return false;
        }
        if !self.gate.can_submit() {
            return false;
        }
        true
    }
}

fn param_job_id(v: &Value) -> Option<i32> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64().map(|x| x as i32),
        _ => None,
    }
}

/// Applies TCP keep-alive so dead peers eventually error out of the read
/// loop; stratum reads carry no timeout of their own.
fn set_keepalive(stream: TcpStream) -> Result<TcpStream, std::io::Error> {
    let std_stream = stream.into_std()?;
    socket2::SockRef::from(&std_stream).set_keepalive(true)?;
    TcpStream::from_std(std_stream)
}

/// Owns the socket's write half. Responses drain ahead of broadcasts;
/// everything is encoded here, on the session's own task.
async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    mut response_rx: mpsc::Receiver<String>,
    mut notify_rx: mpsc::Receiver<Notification>,
) {
    loop {
        let line = tokio::select! {
            biased;
            Some(line) = response_rx.recv() => line,
            Some(msg) = notify_rx.recv() => msg.encode(),
            else => return,
        };
        if write_half.write_all(line.as_bytes()).await.is_err() {
            return;
        }
        if write_half.write_all(b"\n").await.is_err() {
            return;
        }
        if write_half.flush().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OpenAuthority;
    use oprpool_core::hasher::compute_target;
    use oprpool_core::{AlwaysYesShareCheck, Sha256Hasher};

    struct ClosedAuthority;
    impl Authority for ClosedAuthority {
        fn exists(&self, uid: &str) -> bool {
            uid == "known"
        }
        fn register(&self, _u: &str, _p: &str, invite: &str, _a: &str) -> bool {
            invite == "golden"
        }
    }

    fn server(config: StratumConfig) -> Arc<Server> {
        Arc::new(Server::new(
            config,
            Arc::new(Sha256Hasher),
            Arc::new(OpenAuthority),
            Arc::new(AlwaysYesShareCheck),
        ))
    }

    fn test_job(id: i32) -> Job {
        let payload = vec![1u8, 2, 3, 4];
        Job {
            id,
            opr_hash: oprpool_core::hasher::opr_hash(&payload),
            payload,
            payload_v4: vec![],
        }
    }

    /// A session registered with the server's own map.
    fn session(
        s: &Arc<Server>,
    ) -> (
        Arc<MinerConn>,
        mpsc::Receiver<String>,
        mpsc::Receiver<Notification>,
    ) {
        s.miners
            .add_miner("127.0.0.1:5555".parse().unwrap(), s.config.starting_target)
    }

    fn recv_json(rx: &mut mpsc::Receiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("expected a response")).unwrap()
    }

    fn submit_line(job_id: i32, nonce: &[u8], opr_hash: &[u8; 32], target: u64) -> String {
        json!({
            "id": 9,
            "method": "mining.submit",
            "params": [
                "alice,rig1",
                job_id.to_string(),
                hex::encode(nonce),
                hex::encode(opr_hash),
                format!("{:016x}", target),
            ],
        })
        .to_string()
    }

    #[test]
    fn test_subscribe_handshake() {
        let s = server(StratumConfig {
            starting_target: 0x1000,
            ..Default::default()
        });
        s.notify(test_job(100));
        let (conn, mut resp, mut notify) = session(&s);

        s.handle_message(
            &conn,
            r#"{"id": 1, "method": "mining.subscribe", "params": ["miner/1.0"]}"#,
        );

        let v = recv_json(&mut resp);
        assert!(v["error"].is_null());
        let result = v["result"].as_array().unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[2]["type"], "mining.set_nonce");
        let prefix: u32 = result[2]["id"].as_str().unwrap().parse().unwrap();
        assert_eq!(prefix, conn.nonce_prefix);

        // set_target then the live job
        assert!(matches!(notify.try_recv().unwrap(), Notification::SetTarget(0x1000)));
        match notify.try_recv().unwrap() {
            Notification::Job { job_id, opr_hash, .. } => {
                assert_eq!(job_id, 100);
                assert_eq!(opr_hash, test_job(100).opr_hash_hex());
            }
            other => panic!("expected job, got {:?}", other),
        }
        assert!(conn.snapshot().subscribed);
    }

    #[test]
    fn test_authorize_splits_username() {
        let s = server(StratumConfig {
            welcome_message: "welcome to the pool".to_string(),
            ..Default::default()
        });
        let (conn, mut resp, mut notify) = session(&s);

        s.handle_message(
            &conn,
            r#"{"id": 2, "method": "mining.authorize", "params": ["alice,rig7", "pw"]}"#,
        );
        let v = recv_json(&mut resp);
        assert_eq!(v["result"], json!(true));

        let snap = conn.snapshot();
        assert_eq!(snap.username, "alice");
        assert_eq!(snap.miner_id, "rig7");
        assert!(snap.authorized);

        match notify.try_recv().unwrap() {
            Notification::ShowMessage(m) => assert_eq!(m, "welcome to the pool"),
            other => panic!("expected welcome, got {:?}", other),
        }
    }

    #[test]
    fn test_authorize_unknown_user_needs_valid_invite() {
        let s = Arc::new(Server::new(
            StratumConfig::default(),
            Arc::new(Sha256Hasher),
            Arc::new(ClosedAuthority),
            Arc::new(AlwaysYesShareCheck),
        ));
        let (conn, mut resp, _notify) = session(&s);

        s.handle_message(
            &conn,
            r#"{"id": 3, "method": "mining.authorize", "params": ["eve,rig", "pw", "wrong", "FAxx"]}"#,
        );
        assert_eq!(recv_json(&mut resp)["result"], json!(false));
        assert!(!conn.authorized());

        s.handle_message(
            &conn,
            r#"{"id": 4, "method": "mining.authorize", "params": ["eve,rig", "pw", "golden", "FAxx"]}"#,
        );
        assert_eq!(recv_json(&mut resp)["result"], json!(true));
        assert!(conn.authorized());
    }

    #[test]
    fn test_submit_acceptance_pipeline() {
        let s = server(StratumConfig {
            require_auth: false,
            validate_all_shares: true,
            starting_target: 0,
            ..Default::default()
        });
        let job = test_job(200);
        s.notify(job.clone());

        let (share_tx, mut share_rx) = mpsc::channel(16);
        s.add_share_export(share_tx);

        let (conn, mut resp, _notify) = session(&s);
        s.handle_message(
            &conn,
            r#"{"id": 1, "method": "mining.authorize", "params": ["alice,rig1"]}"#,
        );
        let _ = recv_json(&mut resp);

        let nonce = vec![0xde, 0xad, 0x01];
        let target = compute_target(&Sha256Hasher, &job.opr_hash, &nonce);

        // Valid share
        s.handle_message(&conn, &submit_line(200, &nonce, &job.opr_hash, target));
        assert_eq!(recv_json(&mut resp)["result"], json!(true));
        let exported = share_rx.try_recv().unwrap();
        assert_eq!(exported.job_id, 200);
        assert_eq!(exported.username, "alice");
        assert_eq!(exported.miner_id, "rig1");
        assert_eq!(exported.target, target);

        // Duplicate nonce
        s.handle_message(&conn, &submit_line(200, &nonce, &job.opr_hash, target));
        assert_eq!(recv_json(&mut resp)["result"], json!(false));
        assert!(share_rx.try_recv().is_err());

        // Stale job id
        s.handle_message(&conn, &submit_line(199, &[1], &job.opr_hash, target));
        assert_eq!(recv_json(&mut resp)["result"], json!(false));

        // Misreported target fails strict validation
        s.handle_message(&conn, &submit_line(200, &[2], &job.opr_hash, target.wrapping_add(1)));
        assert_eq!(recv_json(&mut resp)["result"], json!(false));

        // Wrong opr hash
        s.handle_message(&conn, &submit_line(200, &[3], &[9u8; 32], target));
        assert_eq!(recv_json(&mut resp)["result"], json!(false));
    }

    #[test]
    fn test_submit_respects_preferred_target() {
        let s = server(StratumConfig {
            require_auth: false,
            validate_all_shares: false,
            starting_target: 0x8000_0000_0000_0000,
            ..Default::default()
        });
        let job = test_job(300);
        s.notify(job.clone());
        let (conn, mut resp, _notify) = session(&s);

        s.handle_message(&conn, &submit_line(300, &[1], &job.opr_hash, 0x7fff_ffff_ffff_ffff));
        assert_eq!(recv_json(&mut resp)["result"], json!(false));

        s.handle_message(&conn, &submit_line(300, &[1], &job.opr_hash, 0x8000_0000_0000_0001));
        assert_eq!(recv_json(&mut resp)["result"], json!(true));
    }

    #[test]
    fn test_wire_errors_keep_session_open() {
        let s = server(StratumConfig::default());
        let (conn, mut resp, _notify) = session(&s);

        s.handle_message(&conn, "this is not json");
        let v = recv_json(&mut resp);
        assert_eq!(v["error"]["code"], json!(ERROR_PARSE));

        s.handle_message(&conn, r#"{"id": 5, "method": "mining.unknown", "params": []}"#);
        let v = recv_json(&mut resp);
        assert_eq!(v["error"]["code"], json!(ERROR_METHOD_NOT_FOUND));

        s.handle_message(&conn, r#"{"id": 6, "method": "mining.submit", "params": []}"#);
        let v = recv_json(&mut resp);
        assert_eq!(v["error"]["code"], json!(ERROR_INVALID_PARAMS));

        // Still alive and able to subscribe
        s.handle_message(&conn, r#"{"id": 7, "method": "mining.subscribe", "params": []}"#);
        let v = recv_json(&mut resp);
        assert!(v["error"].is_null());
    }

    #[test]
    fn test_get_oprhash() {
        let s = server(StratumConfig::default());
        let (conn, mut resp, _notify) = session(&s);

        s.handle_message(&conn, r#"{"id": 8, "method": "mining.get_oprhash", "params": ["1"]}"#);
        assert_eq!(recv_json(&mut resp)["error"]["code"], json!(ERROR_INTERNAL));

        let job = test_job(400);
        s.notify(job.clone());
        s.handle_message(&conn, r#"{"id": 9, "method": "mining.get_oprhash", "params": ["400"]}"#);
        assert_eq!(recv_json(&mut resp)["result"], json!(job.opr_hash_hex()));
    }

    #[test]
    fn test_degenerate_job_not_broadcast() {
        let s = server(StratumConfig::default());
        let (conn, _resp, mut notify) = session(&s);

        s.notify(Job::degenerate(500));
        assert!(notify.try_recv().is_err());
        // But it is tracked as current
        assert_eq!(s.current_job().unwrap().id, 500);
        drop(conn);
    }
}
