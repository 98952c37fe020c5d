//! SQLite store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::tables::*;
use crate::StorageError;

/// u64 columns lose their low bit so the value fits a signed 64-bit
/// integer column. Callers always see the full-width u64.
fn shift_store(v: u64) -> i64 {
    (v >> 1) as i64
}

fn shift_load(v: i64) -> u64 {
    (v as u64) << 1
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS block_sync (
    synced      INTEGER PRIMARY KEY,
    synced_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pegnet_grades (
    height       INTEGER PRIMARY KEY,
    version      INTEGER NOT NULL,
    short_hashes TEXT NOT NULL,
    cutoff       INTEGER NOT NULL,
    count        INTEGER NOT NULL,
    eblock_keymr TEXT NOT NULL,
    prev_keymr   TEXT NOT NULL,
    eb_sequence  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pegnet_payouts (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    height           INTEGER NOT NULL,
    position         INTEGER NOT NULL,
    reward           INTEGER NOT NULL,
    coinbase_address TEXT NOT NULL,
    identity         TEXT NOT NULL,
    entry_hash       TEXT NOT NULL,
    UNIQUE (height, position)
);
CREATE INDEX IF NOT EXISTS idx_pegnet_payouts_addr ON pegnet_payouts (coinbase_address);

CREATE TABLE IF NOT EXISTS owed_payouts (
    job_id          INTEGER PRIMARY KEY,
    pool_reward     INTEGER NOT NULL,
    winning_count   INTEGER NOT NULL,
    graded_count    INTEGER NOT NULL,
    pool_fee_rate   TEXT NOT NULL,
    pool_fee        INTEGER NOT NULL,
    dust            INTEGER NOT NULL,
    pool_difficulty REAL NOT NULL,
    pdiff           REAL NOT NULL,
    total_hashrate  REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS user_owed_payouts (
    job_id            INTEGER NOT NULL,
    user_id           TEXT NOT NULL,
    user_difficulty   REAL NOT NULL,
    total_submissions INTEGER NOT NULL,
    proportion        TEXT NOT NULL,
    payout            INTEGER NOT NULL,
    hashrate          REAL NOT NULL,
    PRIMARY KEY (job_id, user_id)
);

CREATE TABLE IF NOT EXISTS paids (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_hash     TEXT NOT NULL UNIQUE,
    user_id        TEXT NOT NULL,
    payout_address TEXT NOT NULL,
    payment_amount INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_paids_user ON paids (user_id);

CREATE TABLE IF NOT EXISTS emas (
    block_height      INTEGER PRIMARY KEY,
    job_id            INTEGER NOT NULL,
    cutoff            INTEGER NOT NULL,
    minimum_target    INTEGER NOT NULL,
    ema_value         INTEGER NOT NULL,
    last_graded       INTEGER NOT NULL,
    last_graded_index INTEGER NOT NULL,
    n                 INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entry_submissions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      INTEGER NOT NULL,
    opr_hash    TEXT NOT NULL,
    nonce       TEXT NOT NULL,
    target      INTEGER NOT NULL,
    entry_hash  TEXT NOT NULL,
    commit_txid TEXT NOT NULL,
    blocked     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entry_submissions_job ON entry_submissions (job_id);

CREATE TABLE IF NOT EXISTS users (
    uid            TEXT PRIMARY KEY,
    payout_address TEXT NOT NULL DEFAULT '',
    joined         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invite_codes (
    code         TEXT PRIMARY KEY,
    claimed      INTEGER NOT NULL DEFAULT 0,
    claimed_by   TEXT NOT NULL DEFAULT '',
    claimed_time TEXT
);
";

/// The pool's relational store.
pub struct Store {
    conn: Mutex<Connection>,
}

/// Handle over an open transaction. Dropping without commit rolls back.
pub struct StoreTx<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!("store opened");
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside a transaction. Commit happens only if `f` succeeds;
    /// an error rolls back every write made through the handle.
    pub fn with_tx<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, StorageError>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let out = f(&StoreTx { tx: &tx });
        match out {
            Ok(v) => {
                tx.commit()?;
                Ok(v)
            }
            Err(e) => Err(e),
        }
    }

    // ---- sync cursor ----

    /// The highest fully synced height, if any.
    pub fn last_synced(&self) -> Result<Option<i32>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i32> = conn.query_row("SELECT MAX(synced) FROM block_sync", [], |r| {
            r.get(0)
        })?;
        Ok(max)
    }

    // ---- grading history ----

    pub fn grade(&self, height: i32) -> Result<Option<GradeRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT height, version, short_hashes, cutoff, count, eblock_keymr, prev_keymr, eb_sequence
                 FROM pegnet_grades WHERE height = ?1",
                params![height],
                map_grade,
            )
            .optional()?;
        Ok(row)
    }

    /// The most recent grade strictly below `height`; supplies the previous
    /// round's winners to the grader.
    pub fn grade_before(&self, height: i32) -> Result<Option<GradeRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT height, version, short_hashes, cutoff, count, eblock_keymr, prev_keymr, eb_sequence
                 FROM pegnet_grades WHERE height < ?1 ORDER BY height DESC LIMIT 1",
                params![height],
                map_grade,
            )
            .optional()?;
        Ok(row)
    }

    pub fn latest_payout_height(&self) -> Result<Option<i32>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i32> =
            conn.query_row("SELECT MAX(height) FROM pegnet_payouts", [], |r| r.get(0))?;
        Ok(max)
    }

    /// Graded reward lines for one round, best position first.
    pub fn graded_payouts(&self, height: i32) -> Result<Vec<GradedPayoutRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT height, position, reward, coinbase_address, identity, entry_hash
             FROM pegnet_payouts WHERE height = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![height], |r| {
                Ok(GradedPayoutRow {
                    height: r.get(0)?,
                    position: r.get(1)?,
                    reward: r.get(2)?,
                    coinbase_address: r.get(3)?,
                    identity: r.get(4)?,
                    entry_hash: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- payout ledgers ----

    /// Persists a sealed round: summary plus per-user rows, first-or-create
    /// on the (job, user) key.
    pub fn save_owed_payouts(
        &self,
        summary: &OwedPayoutsRow,
        users: &[UserOwedPayoutRow],
    ) -> Result<(), StorageError> {
        self.with_tx(|tx| {
            tx.tx.execute(
                "INSERT OR IGNORE INTO owed_payouts
                 (job_id, pool_reward, winning_count, graded_count, pool_fee_rate, pool_fee,
                  dust, pool_difficulty, pdiff, total_hashrate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    summary.job_id,
                    summary.pool_reward,
                    summary.winning_count,
                    summary.graded_count,
                    summary.pool_fee_rate,
                    summary.pool_fee,
                    summary.dust,
                    summary.pool_difficulty,
                    summary.pdiff,
                    summary.total_hashrate,
                ],
            )?;
            for u in users {
                tx.tx.execute(
                    "INSERT OR IGNORE INTO user_owed_payouts
                     (job_id, user_id, user_difficulty, total_submissions, proportion, payout, hashrate)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        u.job_id,
                        u.user_id,
                        u.user_difficulty,
                        u.total_submissions,
                        u.proportion,
                        u.payout,
                        u.hashrate,
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn owed_payouts(&self, job_id: i32) -> Result<Option<OwedPayoutsRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT job_id, pool_reward, winning_count, graded_count, pool_fee_rate,
                        pool_fee, dust, pool_difficulty, pdiff, total_hashrate
                 FROM owed_payouts WHERE job_id = ?1",
                params![job_id],
                |r| {
                    Ok(OwedPayoutsRow {
                        job_id: r.get(0)?,
                        pool_reward: r.get(1)?,
                        winning_count: r.get(2)?,
                        graded_count: r.get(3)?,
                        pool_fee_rate: r.get(4)?,
                        pool_fee: r.get(5)?,
                        dust: r.get(6)?,
                        pool_difficulty: r.get(7)?,
                        pdiff: r.get(8)?,
                        total_hashrate: r.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn user_owed_payouts(&self, job_id: i32) -> Result<Vec<UserOwedPayoutRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_id, user_id, user_difficulty, total_submissions, proportion, payout, hashrate
             FROM user_owed_payouts WHERE job_id = ?1 ORDER BY user_id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                Ok(UserOwedPayoutRow {
                    job_id: r.get(0)?,
                    user_id: r.get(1)?,
                    user_difficulty: r.get(2)?,
                    total_submissions: r.get(3)?,
                    proportion: r.get(4)?,
                    payout: r.get(5)?,
                    hashrate: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Lifetime owed for a user across every sealed round.
    pub fn total_owed(&self, uid: &str) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        let sum: i64 = conn.query_row(
            "SELECT COALESCE(SUM(payout), 0) FROM user_owed_payouts WHERE user_id = ?1",
            params![uid],
            |r| r.get(0),
        )?;
        Ok(sum)
    }

    /// Lifetime paid for a user across every recorded receipt.
    pub fn total_paid(&self, uid: &str) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        let sum: i64 = conn.query_row(
            "SELECT COALESCE(SUM(payment_amount), 0) FROM paids WHERE user_id = ?1",
            params![uid],
            |r| r.get(0),
        )?;
        Ok(sum)
    }

    /// Writes a payment batch in one transaction. Every receipt needs a
    /// non-empty entry hash that has not been recorded before.
    pub fn write_payments(&self, payments: &[PaidRow]) -> Result<(), StorageError> {
        for p in payments {
            if p.entry_hash.is_empty() {
                return Err(StorageError::InvalidData(format!(
                    "payment for {} has no entry hash",
                    p.user_id
                )));
            }
        }
        self.with_tx(|tx| {
            for p in payments {
                let exists: Option<i64> = tx
                    .tx
                    .query_row(
                        "SELECT id FROM paids WHERE entry_hash = ?1",
                        params![p.entry_hash],
                        |r| r.get(0),
                    )
                    .optional()?;
                if exists.is_some() {
                    return Err(StorageError::AlreadyExists(format!(
                        "payment entry hash {}",
                        p.entry_hash
                    )));
                }
                tx.tx.execute(
                    "INSERT INTO paids (entry_hash, user_id, payout_address, payment_amount)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![p.entry_hash, p.user_id, p.payout_address, p.payment_amount],
                )?;
            }
            Ok(())
        })
    }

    // ---- EMA and entry submissions ----

    pub fn latest_ema(&self) -> Result<Option<EmaRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT block_height, job_id, cutoff, minimum_target, ema_value,
                        last_graded, last_graded_index, n
                 FROM emas ORDER BY block_height DESC LIMIT 1",
                [],
                |r| {
                    Ok(EmaRow {
                        block_height: r.get(0)?,
                        job_id: r.get(1)?,
                        cutoff: r.get(2)?,
                        minimum_target: shift_load(r.get(3)?),
                        ema_value: shift_load(r.get(4)?),
                        last_graded: shift_load(r.get(5)?),
                        last_graded_index: r.get(6)?,
                        n: r.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn save_ema(&self, ema: &EmaRow) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO emas
             (block_height, job_id, cutoff, minimum_target, ema_value, last_graded,
              last_graded_index, n)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ema.block_height,
                ema.job_id,
                ema.cutoff,
                shift_store(ema.minimum_target),
                shift_store(ema.ema_value),
                shift_store(ema.last_graded),
                ema.last_graded_index,
                ema.n,
            ],
        )?;
        Ok(())
    }

    pub fn save_entry_submission(&self, sub: &EntrySubmissionRow) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entry_submissions
             (job_id, opr_hash, nonce, target, entry_hash, commit_txid, blocked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sub.job_id,
                sub.opr_hash,
                sub.nonce,
                shift_store(sub.target),
                sub.entry_hash,
                sub.commit_txid,
                sub.blocked,
            ],
        )?;
        Ok(())
    }

    pub fn entry_submissions(&self, job_id: i32) -> Result<Vec<EntrySubmissionRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, opr_hash, nonce, target, entry_hash, commit_txid, blocked
             FROM entry_submissions WHERE job_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                Ok(EntrySubmissionRow {
                    id: r.get(0)?,
                    job_id: r.get(1)?,
                    opr_hash: r.get(2)?,
                    nonce: r.get(3)?,
                    target: shift_load(r.get(4)?),
                    entry_hash: r.get(5)?,
                    commit_txid: r.get(6)?,
                    blocked: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- users and invites ----

    pub fn users(&self) -> Result<Vec<UserRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT uid, payout_address, joined FROM users ORDER BY uid ASC")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(UserRow {
                    uid: r.get(0)?,
                    payout_address: r.get(1)?,
                    joined: parse_ts(r.get::<_, String>(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn user(&self, uid: &str) -> Result<Option<UserRow>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT uid, payout_address, joined FROM users WHERE uid = ?1",
                params![uid],
                |r| {
                    Ok(UserRow {
                        uid: r.get(0)?,
                        payout_address: r.get(1)?,
                        joined: parse_ts(r.get::<_, String>(2)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn user_exists(&self, uid: &str) -> Result<bool, StorageError> {
        Ok(self.user(uid)?.is_some())
    }

    pub fn create_user(&self, uid: &str, payout_address: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO users (uid, payout_address, joined) VALUES (?1, ?2, ?3)",
            params![uid, payout_address, Utc::now().to_rfc3339()],
        )?;
        if n == 0 {
            return Err(StorageError::AlreadyExists(format!("user {}", uid)));
        }
        Ok(())
    }

    pub fn new_invite_code(&self, code: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO invite_codes (code) VALUES (?1)",
            params![code],
        )?;
        if n == 0 {
            return Err(StorageError::AlreadyExists(format!("invite {}", code)));
        }
        Ok(())
    }

    pub fn code_unclaimed(&self, code: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().unwrap();
        let claimed: Option<bool> = conn
            .query_row(
                "SELECT claimed FROM invite_codes WHERE code = ?1",
                params![code],
                |r| r.get(0),
            )
            .optional()?;
        Ok(claimed == Some(false))
    }

    /// Marks a code claimed by `user`. Returns false if the code does not
    /// exist or was already claimed.
    pub fn claim_code(&self, code: &str, user: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE invite_codes SET claimed = 1, claimed_by = ?2, claimed_time = ?3
             WHERE code = ?1 AND claimed = 0",
            params![code, user, Utc::now().to_rfc3339()],
        )?;
        Ok(n == 1)
    }
}

impl StoreTx<'_> {
    /// Advances the sync cursor. Runs inside the same transaction as the
    /// height's grading writes so a failure never moves the cursor.
    pub fn set_synced(&self, height: i32) -> Result<(), StorageError> {
        self.tx.execute(
            "INSERT OR IGNORE INTO block_sync (synced, synced_date) VALUES (?1, ?2)",
            params![height, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Replace-on-conflict keeps the boot-time tip replay idempotent.
    pub fn insert_grade(&self, row: &GradeRow) -> Result<(), StorageError> {
        self.tx.execute(
            "INSERT OR REPLACE INTO pegnet_grades
             (height, version, short_hashes, cutoff, count, eblock_keymr, prev_keymr, eb_sequence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.height,
                row.version,
                row.short_hashes,
                row.cutoff,
                row.count,
                row.eblock_keymr,
                row.prev_keymr,
                row.eb_sequence,
            ],
        )?;
        Ok(())
    }

    pub fn insert_graded_payout(&self, row: &GradedPayoutRow) -> Result<(), StorageError> {
        self.tx.execute(
            "INSERT INTO pegnet_payouts
             (height, position, reward, coinbase_address, identity, entry_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.height,
                row.position,
                row.reward,
                row.coinbase_address,
                row.identity,
                row.entry_hash,
            ],
        )?;
        Ok(())
    }
}

fn map_grade(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeRow> {
    Ok(GradeRow {
        height: r.get(0)?,
        version: r.get(1)?,
        short_hashes: r.get(2)?,
        cutoff: r.get(3)?,
        count: r.get(4)?,
        eblock_keymr: r.get(5)?,
        prev_keymr: r.get(6)?,
        eb_sequence: r.get(7)?,
    })
}

fn parse_ts(s: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn test_cursor_advances_only_on_commit() {
        let s = store();
        assert_eq!(s.last_synced().unwrap(), None);

        s.with_tx(|tx| tx.set_synced(100)).unwrap();
        assert_eq!(s.last_synced().unwrap(), Some(100));

        // A failed transaction must not move the cursor
        let res: Result<(), StorageError> = s.with_tx(|tx| {
            tx.set_synced(101)?;
            Err(StorageError::InvalidData("boom".to_string()))
        });
        assert!(res.is_err());
        assert_eq!(s.last_synced().unwrap(), Some(100));
    }

    #[test]
    fn test_grade_before_returns_previous_round() {
        let s = store();
        for h in [100, 101, 102] {
            s.with_tx(|tx| {
                tx.insert_grade(&GradeRow {
                    height: h,
                    version: 2,
                    short_hashes: format!("aa{:02}", h % 100),
                    cutoff: 50,
                    count: 10,
                    ..Default::default()
                })
            })
            .unwrap();
        }
        assert_eq!(s.grade_before(102).unwrap().unwrap().height, 101);
        assert_eq!(s.grade_before(100).unwrap(), None);
    }

    #[test]
    fn test_u64_shift_round_trip() {
        let s = store();
        let ema = EmaRow {
            block_height: 5,
            job_id: 6,
            cutoff: 200,
            minimum_target: 0xffff_1234_5678_9abc,
            ema_value: 0xfffe_0000_0000_0002,
            last_graded: 0xff00_0000_0000_0000,
            last_graded_index: 199,
            n: 36,
        };
        s.save_ema(&ema).unwrap();
        let loaded = s.latest_ema().unwrap().unwrap();
        // The low bit is sacrificed to the signed column
        assert_eq!(loaded.minimum_target, ema.minimum_target & !1);
        assert_eq!(loaded.ema_value, ema.ema_value & !1);
        assert_eq!(loaded.last_graded, ema.last_graded & !1);
        assert_eq!(loaded.n, 36);
    }

    #[test]
    fn test_write_payments_rejects_duplicates_atomically() {
        let s = store();
        let batch = vec![
            PaidRow {
                entry_hash: "aa".to_string(),
                user_id: "alice".to_string(),
                payout_address: "FA..".to_string(),
                payment_amount: 100,
                ..Default::default()
            },
            PaidRow {
                entry_hash: "bb".to_string(),
                user_id: "bob".to_string(),
                payout_address: "FA..".to_string(),
                payment_amount: 50,
                ..Default::default()
            },
        ];
        s.write_payments(&batch).unwrap();
        assert_eq!(s.total_paid("alice").unwrap(), 100);

        // A batch with a repeated entry hash writes nothing at all
        let dup = vec![
            PaidRow {
                entry_hash: "cc".to_string(),
                user_id: "carol".to_string(),
                payment_amount: 10,
                ..Default::default()
            },
            PaidRow {
                entry_hash: "aa".to_string(),
                user_id: "alice".to_string(),
                payment_amount: 10,
                ..Default::default()
            },
        ];
        assert!(matches!(
            s.write_payments(&dup),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(s.total_paid("carol").unwrap(), 0);
    }

    #[test]
    fn test_write_payments_requires_entry_hash() {
        let s = store();
        let batch = vec![PaidRow {
            entry_hash: String::new(),
            user_id: "alice".to_string(),
            payment_amount: 1,
            ..Default::default()
        }];
        assert!(matches!(
            s.write_payments(&batch),
            Err(StorageError::InvalidData(_))
        ));
    }

    #[test]
    fn test_owed_and_paid_sums() {
        let s = store();
        s.save_owed_payouts(
            &OwedPayoutsRow {
                job_id: 10,
                pool_reward: 1000,
                pool_fee_rate: "0.05".to_string(),
                ..Default::default()
            },
            &[
                UserOwedPayoutRow {
                    job_id: 10,
                    user_id: "alice".to_string(),
                    payout: 700,
                    ..Default::default()
                },
                UserOwedPayoutRow {
                    job_id: 10,
                    user_id: "bob".to_string(),
                    payout: 250,
                    ..Default::default()
                },
            ],
        )
        .unwrap();

        // first-or-create: a replay does not double the ledger
        s.save_owed_payouts(
            &OwedPayoutsRow {
                job_id: 10,
                pool_reward: 1000,
                ..Default::default()
            },
            &[UserOwedPayoutRow {
                job_id: 10,
                user_id: "alice".to_string(),
                payout: 9999,
                ..Default::default()
            }],
        )
        .unwrap();

        assert_eq!(s.total_owed("alice").unwrap(), 700);
        assert_eq!(s.total_owed("bob").unwrap(), 250);
        assert_eq!(s.total_owed("nobody").unwrap(), 0);
    }

    #[test]
    fn test_invite_codes() {
        let s = store();
        s.new_invite_code("golden-ticket").unwrap();
        assert!(s.code_unclaimed("golden-ticket").unwrap());
        assert!(!s.code_unclaimed("missing").unwrap());

        assert!(s.claim_code("golden-ticket", "alice").unwrap());
        assert!(!s.code_unclaimed("golden-ticket").unwrap());
        // Second claim fails
        assert!(!s.claim_code("golden-ticket", "bob").unwrap());
        // Unknown code fails
        assert!(!s.claim_code("missing", "bob").unwrap());
    }

    #[test]
    fn test_users() {
        let s = store();
        s.create_user("alice", "FAsomething").unwrap();
        assert!(s.user_exists("alice").unwrap());
        assert!(matches!(
            s.create_user("alice", "FAother"),
            Err(StorageError::AlreadyExists(_))
        ));
        assert_eq!(s.users().unwrap().len(), 1);
    }

    #[test]
    fn test_entry_submission_target_round_trip() {
        let s = store();
        s.save_entry_submission(&EntrySubmissionRow {
            job_id: 7,
            opr_hash: "ab".repeat(32),
            nonce: "0102".to_string(),
            target: 0xffff_ffff_ffff_fffe,
            entry_hash: "00".repeat(32),
            commit_txid: "11".repeat(32),
            blocked: 0,
            ..Default::default()
        })
        .unwrap();
        let subs = s.entry_submissions(7).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].target, 0xffff_ffff_ffff_fffe);
    }
}
