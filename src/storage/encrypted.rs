//! SQLite-backed store. Metric history stays in plain columns for querying;
//! prediction and optimization payloads (explanations, process lists) are
//! AES-GCM encrypted with a key derived from a device-bound secret.

use super::{HistorySource, PredictionSink};
use crate::error::{AgentError, Result};
use crate::features::{keys, FeatureVector, HistoryRecord};
use crate::optimizer::{ActionReport, OptimizationKind, OptimizationResult};
use crate::risk::RiskPrediction;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

fn derive_key(seed: &[u8]) -> [u8; KEY_LEN] {
    use ring::digest;
    let mut out = [0u8; KEY_LEN];
    let h = digest::digest(&digest::SHA256, seed);
    out[..h.as_ref().len().min(KEY_LEN)].copy_from_slice(h.as_ref());
    out
}

fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AgentError::Crypto)?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt((&nonce).into(), plaintext)
        .map_err(|_| AgentError::Crypto)?;
    let mut out = nonce.to_vec();
    out.extend(ciphertext);
    Ok(BASE64.encode(&out))
}

fn decrypt(key: &[u8; KEY_LEN], encoded: &str) -> Result<Vec<u8>> {
    let raw = BASE64.decode(encoded).map_err(|_| AgentError::Crypto)?;
    if raw.len() < NONCE_LEN {
        return Err(AgentError::Crypto);
    }
    let (nonce, ct) = raw.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AgentError::Crypto)?;
    cipher.decrypt(nonce.into(), ct).map_err(|_| AgentError::Crypto)
}

fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// One stored optimizer action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    pub ts: DateTime<Utc>,
    pub kind: OptimizationKind,
    pub before_value: f64,
    pub after_value: f64,
    pub success: bool,
    pub details: ActionReport,
}

fn before_after(report: &ActionReport) -> (f64, f64) {
    match report {
        ActionReport::RamBoost(m) => (m.memory_before, m.memory_after),
        ActionReport::ProcessCleanup(p) => (p.current_processes as f64, p.current_processes as f64),
        _ => (0.0, 0.0),
    }
}

fn kind_from_str(s: &str) -> Option<OptimizationKind> {
    OptimizationKind::ALL.into_iter().find(|k| k.as_str() == s)
}

pub struct SecureStore {
    conn: Mutex<Connection>,
    key: [u8; KEY_LEN],
}

impl SecureStore {
    /// Open or create DB at path. Key is derived from `secret` (in production: device-bound).
    pub fn open(path: &Path, secret: &[u8]) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                cpu_percent REAL NOT NULL,
                memory_percent REAL NOT NULL,
                disk_percent REAL NOT NULL,
                process_count REAL NOT NULL,
                high_cpu_processes REAL NOT NULL,
                high_memory_processes REAL NOT NULL,
                network_sent_mb REAL,
                network_recv_mb REAL,
                features TEXT NOT NULL,
                risk_score REAL
            );
            CREATE INDEX IF NOT EXISTS idx_metrics_ts ON metrics(ts);
            CREATE TABLE IF NOT EXISTS predictions (
                id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                risk_score REAL NOT NULL,
                risk_level TEXT NOT NULL,
                payload_enc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_predictions_ts ON predictions(ts);
            CREATE TABLE IF NOT EXISTS optimizations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                kind TEXT NOT NULL,
                before_value REAL NOT NULL,
                after_value REAL NOT NULL,
                success INTEGER NOT NULL,
                details_enc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_optimizations_ts ON optimizations(ts);
            "#,
        )?;
        let key = derive_key(secret);
        Ok(Self {
            conn: Mutex::new(conn),
            key,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append one snapshot to the metric history. Non-finite readings are
    /// dropped from the row (JSON has no NaN); a snapshot with nothing left is
    /// not history. Returns whether a row was written.
    pub fn record_metrics(
        &self,
        features: &FeatureVector,
        risk_score: Option<f64>,
        ts: DateTime<Utc>,
    ) -> Result<bool> {
        let features: FeatureVector = features.iter().filter(|(_, v)| v.is_finite()).collect();
        if features.is_empty() {
            return Ok(false);
        }
        let risk_score = risk_score.filter(|s| s.is_finite());
        let json = serde_json::to_string(&features)?;
        self.conn().execute(
            "INSERT INTO metrics (ts, cpu_percent, memory_percent, disk_percent, process_count,
                high_cpu_processes, high_memory_processes, network_sent_mb, network_recv_mb,
                features, risk_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                ts.timestamp_millis(),
                features.get(keys::CPU_PERCENT),
                features.get(keys::MEMORY_PERCENT),
                features.get(keys::DISK_PERCENT),
                features.get(keys::PROCESS_COUNT),
                features.get(keys::HIGH_CPU_PROCESSES),
                features.get(keys::HIGH_MEMORY_PROCESSES),
                features.try_get(keys::NETWORK_SENT_MB),
                features.try_get(keys::NETWORK_RECV_MB),
                json,
                risk_score,
            ],
        )?;
        Ok(true)
    }

    /// Most recent `limit` metric rows, oldest first. With `labeled_only`,
    /// only rows that carry a risk score.
    pub fn load_history(&self, limit: usize, labeled_only: bool) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn();
        let sql = if labeled_only {
            "SELECT ts, features, risk_score FROM metrics WHERE risk_score IS NOT NULL
             ORDER BY ts DESC, id DESC LIMIT ?1"
        } else {
            "SELECT ts, features, risk_score FROM metrics ORDER BY ts DESC, id DESC LIMIT ?1"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<f64>>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (ts, json, risk_score) = row?;
            match serde_json::from_str(&json) {
                Ok(features) => out.push(HistoryRecord {
                    ts: ts_from_millis(ts),
                    features,
                    risk_score,
                }),
                Err(e) => warn!(ts, error = %e, "skipping undecodable metrics row"),
            }
        }
        out.reverse();
        Ok(out)
    }

    /// Store a prediction (full payload encrypted)
    pub fn insert_prediction(&self, prediction: &RiskPrediction) -> Result<()> {
        let payload = serde_json::to_string(prediction)?;
        let enc = encrypt(&self.key, payload.as_bytes())?;
        self.conn().execute(
            "INSERT OR REPLACE INTO predictions (id, ts, risk_score, risk_level, payload_enc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                prediction.id,
                prediction.timestamp.timestamp_millis(),
                prediction.risk_score,
                prediction.risk_level.as_str(),
                enc
            ],
        )?;
        Ok(())
    }

    /// Read prediction by id (decrypt payload)
    pub fn get_prediction(&self, id: &str) -> Result<Option<RiskPrediction>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT payload_enc FROM predictions WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            let enc: String = row.get(0)?;
            let plain = decrypt(&self.key, &enc)?;
            return Ok(Some(serde_json::from_slice(&plain)?));
        }
        Ok(None)
    }

    /// One row per action in `result`; returns rows written.
    pub fn record_optimization(&self, result: &OptimizationResult) -> Result<usize> {
        let conn = self.conn();
        let ts = result.timestamp.timestamp_millis();
        let mut n = 0;
        for (kind, report) in &result.results {
            let (before, after) = before_after(report);
            let enc = encrypt(&self.key, serde_json::to_string(report)?.as_bytes())?;
            n += conn.execute(
                "INSERT INTO optimizations (ts, kind, before_value, after_value, success, details_enc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ts, kind.as_str(), before, after, report.success(), enc],
            )?;
        }
        Ok(n)
    }

    /// Most recent optimizer actions, newest first.
    pub fn recent_optimizations(&self, limit: usize) -> Result<Vec<OptimizationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ts, kind, before_value, after_value, success, details_enc
             FROM optimizations ORDER BY ts DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (ts, kind, before_value, after_value, success, enc) = row?;
            let Some(kind) = kind_from_str(&kind) else {
                continue;
            };
            let details = serde_json::from_slice(&decrypt(&self.key, &enc)?)?;
            out.push(OptimizationRecord {
                ts: ts_from_millis(ts),
                kind,
                before_value,
                after_value,
                success,
                details,
            });
        }
        Ok(out)
    }

    /// Retention: delete rows older than `before` from every table
    pub fn prune_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let ts = before.timestamp_millis();
        let conn = self.conn();
        let mut n = conn.execute("DELETE FROM metrics WHERE ts < ?1", params![ts])?;
        n += conn.execute("DELETE FROM predictions WHERE ts < ?1", params![ts])?;
        n += conn.execute("DELETE FROM optimizations WHERE ts < ?1", params![ts])?;
        Ok(n as u64)
    }
}

impl HistorySource for SecureStore {
    fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.load_history(limit, false)
    }

    fn labeled_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.load_history(limit, true)
    }
}

impl PredictionSink for SecureStore {
    fn record_prediction(&self, prediction: &RiskPrediction) -> Result<()> {
        self.insert_prediction(prediction)
    }
}
