//! SQLite + JSONL 审计持久化
//!
//! 会话、流水线各阶段记录、治理快照与预算台账。事件 / 台账 / 快照表只追加；
//! 快照表带逐会话单调 seq，「最新状态」按 seq 取，不依赖行号或时间戳排序。
//! 单连接加互斥锁：预算判定读到的必然是其之前已提交的全部台账条目。
//! 任何持久化错误对当次请求都是致命的——审计不完整的治理决策不可信。

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use thiserror::Error;

use crate::schemas::{
    BudgetSnapshot, EventRecord, SolverResult, StressState, Usage, VerifierResult,
};

/// 持久化错误（对当次请求致命）
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("audit log io error: {0}")]
    Audit(#[from] std::io::Error),

    #[error("json encode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// 会话行
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub session_id: String,
    pub student_alias: String,
    pub topic: Option<String>,
    pub grade_level: Option<String>,
    pub goal: Option<String>,
    pub active_setpoints: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 设定点快照（追加写入）
#[derive(Debug, Clone)]
pub struct SetpointSnapshot {
    pub setpoints: BTreeMap<String, f64>,
    pub observed_targets: BTreeMap<String, f64>,
    pub drift: BTreeMap<String, f64>,
    pub trace_id: String,
}

/// 辅导轮次记录（隐藏评分以标量列落盘，绝不进入响应 DTO）
#[derive(Debug, Clone)]
pub struct TutorTurnRecord<'a> {
    pub trace_id: &'a str,
    pub session_id: &'a str,
    pub model: &'a str,
    pub tutor_message: &'a str,
    pub confidence: f64,
    pub requires_attempt: bool,
    pub flags: &'a [String],
    pub hidden_score: f64,
    pub leakage_penalty: f64,
    pub usage: &'a Usage,
    pub latency_ms: u64,
}

/// 持久化层：单写者 SQLite + 追加式 JSONL 审计
pub struct Storage {
    conn: Mutex<Connection>,
    audit: Mutex<std::fs::File>,
}

const DDL: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    student_alias TEXT NOT NULL,
    topic TEXT,
    grade_level TEXT,
    goal TEXT,
    active_setpoints_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS solver_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    model TEXT NOT NULL,
    status TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    usage_json TEXT NOT NULL,
    response_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS verifier_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    checked_claims INTEGER NOT NULL,
    passed_claims INTEGER NOT NULL,
    failed_claims INTEGER NOT NULL,
    disagreement_rate REAL NOT NULL,
    response_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tutor_turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    model TEXT NOT NULL,
    tutor_message TEXT NOT NULL,
    confidence REAL NOT NULL,
    requires_attempt INTEGER NOT NULL,
    flags_json TEXT NOT NULL,
    hidden_score REAL NOT NULL,
    leakage_penalty REAL NOT NULL,
    usage_json TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS setpoint_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    snapshot_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (session_id, seq)
);
CREATE TABLE IF NOT EXISTS stress_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    stress_ai REAL NOT NULL,
    stress_viktor REAL NOT NULL,
    factors_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (session_id, seq)
);
CREATE TABLE IF NOT EXISTS budget_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id TEXT NOT NULL,
    session_id TEXT,
    category TEXT NOT NULL,
    model TEXT,
    amount_usd REAL NOT NULL,
    metadata_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

impl Storage {
    /// 打开（或创建）数据库与审计文件，初始化表结构
    pub fn new(db_path: &Path, audit_jsonl_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = audit_jsonl_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(DDL)?;
        let audit = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_jsonl_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            audit: Mutex::new(audit),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn append_audit(
        &self,
        trace_id: &str,
        session_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let line = json!({
            "ts": now_iso(),
            "trace_id": trace_id,
            "session_id": session_id,
            "event_type": event_type,
            "payload": payload,
        });
        let mut file = self.audit.lock().map_err(|_| StorageError::LockPoisoned)?;
        writeln!(file, "{}", serde_json::to_string(&line)?)?;
        Ok(())
    }

    pub fn create_session(
        &self,
        student_alias: &str,
        topic: Option<&str>,
        grade_level: Option<&str>,
        goal: Option<&str>,
        active_setpoints: &BTreeMap<String, f64>,
    ) -> Result<SessionRow, StorageError> {
        let session_id = short_id();
        let now = Utc::now();
        self.lock()?.execute(
            "INSERT INTO sessions (
                session_id, student_alias, topic, grade_level, goal,
                active_setpoints_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                student_alias,
                topic,
                grade_level,
                goal,
                serde_json::to_string(active_setpoints)?,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(SessionRow {
            session_id,
            student_alias: student_alias.to_string(),
            topic: topic.map(String::from),
            grade_level: grade_level.map(String::from),
            goal: goal.map(String::from),
            active_setpoints: active_setpoints.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT session_id, student_alias, topic, grade_level, goal,
                        active_setpoints_json, created_at, updated_at
                 FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((session_id, student_alias, topic, grade_level, goal, setpoints_json, created, updated)) = row
        else {
            return Ok(None);
        };
        Ok(Some(SessionRow {
            session_id,
            student_alias,
            topic,
            grade_level,
            goal,
            active_setpoints: serde_json::from_str(&setpoints_json)?,
            created_at: parse_ts(&created),
            updated_at: parse_ts(&updated),
        }))
    }

    pub fn update_session_setpoints(
        &self,
        session_id: &str,
        setpoints: &BTreeMap<String, f64>,
    ) -> Result<(), StorageError> {
        self.lock()?.execute(
            "UPDATE sessions SET active_setpoints_json = ?1, updated_at = ?2
             WHERE session_id = ?3",
            params![serde_json::to_string(setpoints)?, now_iso(), session_id],
        )?;
        Ok(())
    }

    /// 写事件行并追加审计 JSONL
    pub fn save_event(
        &self,
        trace_id: &str,
        session_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO events (trace_id, session_id, event_type, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                trace_id,
                session_id,
                event_type,
                serde_json::to_string(payload)?,
                now_iso(),
            ],
        )?;
        self.append_audit(trace_id, session_id, event_type, payload)
    }

    pub fn save_solver_run(
        &self,
        trace_id: &str,
        session_id: &str,
        solver: &SolverResult,
    ) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO solver_runs (
                trace_id, session_id, model, status, latency_ms,
                usage_json, response_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trace_id,
                session_id,
                solver.model,
                solver.status,
                solver.latency_ms as i64,
                serde_json::to_string(&solver.usage)?,
                serde_json::to_string(solver)?,
                now_iso(),
            ],
        )?;
        Ok(())
    }

    pub fn save_verifier_run(
        &self,
        trace_id: &str,
        session_id: &str,
        verifier: &VerifierResult,
    ) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO verifier_runs (
                trace_id, session_id, checked_claims, passed_claims,
                failed_claims, disagreement_rate, response_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trace_id,
                session_id,
                verifier.checked_claims,
                verifier.passed_claims,
                verifier.failed_claims,
                verifier.disagreement_rate,
                serde_json::to_string(verifier)?,
                now_iso(),
            ],
        )?;
        Ok(())
    }

    pub fn save_tutor_turn(&self, record: &TutorTurnRecord<'_>) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO tutor_turns (
                trace_id, session_id, model, tutor_message, confidence,
                requires_attempt, flags_json, hidden_score, leakage_penalty,
                usage_json, latency_ms, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.trace_id,
                record.session_id,
                record.model,
                record.tutor_message,
                record.confidence,
                record.requires_attempt as i64,
                serde_json::to_string(&json!({ "flags": record.flags }))?,
                record.hidden_score,
                record.leakage_penalty,
                serde_json::to_string(record.usage)?,
                record.latency_ms as i64,
                now_iso(),
            ],
        )?;
        Ok(())
    }

    /// 追加设定点快照；seq 在同一事务内取该会话当前最大值 +1
    pub fn save_setpoint_snapshot(
        &self,
        session_id: &str,
        snapshot: &SetpointSnapshot,
    ) -> Result<(), StorageError> {
        let snapshot_json = serde_json::to_string(&json!({
            "setpoints": &snapshot.setpoints,
            "observed_targets": &snapshot.observed_targets,
            "drift_map": &snapshot.drift,
            "trace_id": &snapshot.trace_id,
        }))?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM setpoint_snapshots WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO setpoint_snapshots (session_id, seq, snapshot_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, seq, snapshot_json, now_iso()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn save_stress_snapshot(
        &self,
        session_id: &str,
        stress_ai: f64,
        stress_viktor: f64,
        factors: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM stress_snapshots WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO stress_snapshots (
                session_id, seq, stress_ai, stress_viktor, factors_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                seq,
                stress_ai,
                stress_viktor,
                serde_json::to_string(factors)?,
                now_iso(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// 最新设定点：最高 seq 的快照 > 会话存量 > 策略默认（fallback）
    pub fn get_latest_setpoints(
        &self,
        session_id: &str,
        fallback: &BTreeMap<String, f64>,
    ) -> Result<BTreeMap<String, f64>, StorageError> {
        let snapshot_json: Option<String> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT snapshot_json FROM setpoint_snapshots
                 WHERE session_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?
        };
        if let Some(raw) = snapshot_json {
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            if let Some(setpoints) = value.get("setpoints") {
                if let Ok(map) =
                    serde_json::from_value::<BTreeMap<String, f64>>(setpoints.clone())
                {
                    return Ok(map);
                }
            }
        }
        if let Some(session) = self.get_session(session_id)? {
            if !session.active_setpoints.is_empty() {
                return Ok(session.active_setpoints);
            }
        }
        Ok(fallback.clone())
    }

    pub fn get_latest_stress(&self, session_id: &str) -> Result<StressState, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT stress_ai, stress_viktor FROM stress_snapshots
                 WHERE session_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![session_id],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
            )
            .optional()?;
        Ok(row
            .map(|(stress_ai, stress_viktor)| StressState {
                stress_ai,
                stress_viktor,
            })
            .unwrap_or_default())
    }

    /// 最近事件，新在前
    pub fn get_recent_events(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event_type, payload_json, created_at FROM events
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (event_type, payload_json, created_at) = row?;
            out.push(EventRecord {
                event_type,
                created_at,
                payload: serde_json::from_str(&payload_json)?,
            });
        }
        Ok(out)
    }

    pub fn add_budget_entry(
        &self,
        trace_id: &str,
        session_id: Option<&str>,
        category: &str,
        amount_usd: f64,
        model: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO budget_ledger (
                trace_id, session_id, category, model, amount_usd, metadata_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                trace_id,
                session_id,
                category,
                model,
                amount_usd,
                serde_json::to_string(metadata)?,
                now_iso(),
            ],
        )?;
        Ok(())
    }

    /// 当月累计花费（按自然月起点）
    pub fn monthly_spent(&self) -> Result<f64, StorageError> {
        let now = Utc::now();
        // created_at 统一为 +00:00 的 RFC3339，前缀比较即时间比较
        let month_start = format!("{:04}-{:02}-01T00:00:00+00:00", now.year(), now.month());
        let conn = self.lock()?;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_usd), 0.0) FROM budget_ledger WHERE created_at >= ?1",
            params![month_start],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn budget_snapshot(
        &self,
        monthly_cap_usd: f64,
        per_session_soft_cap_usd: f64,
        session_id: &str,
    ) -> Result<BudgetSnapshot, StorageError> {
        let monthly_spent_usd = self.monthly_spent()?;
        let conn = self.lock()?;
        let session_spent_usd: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_usd), 0.0) FROM budget_ledger WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(BudgetSnapshot {
            monthly_cap_usd,
            monthly_spent_usd,
            monthly_remaining_usd: (monthly_cap_usd - monthly_spent_usd).max(0.0),
            per_session_soft_cap_usd,
            session_spent_usd,
        })
    }

    /// 数据保留：剥离超期事件负载中的原始题面 / 图片字段
    pub fn run_retention(&self, retention_days: u32) -> Result<RetentionReport, StorageError> {
        let cutoff = (Utc::now() - Duration::days(i64::from(retention_days.max(1)))).to_rfc3339();
        let mut sanitized = 0usize;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "SELECT id, payload_json FROM events WHERE created_at < ?1",
            )?;
            let rows: Vec<(i64, String)> = stmt
                .query_map(params![cutoff], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<_, _>>()?;
            for (id, payload_json) in rows {
                let mut payload: serde_json::Value = serde_json::from_str(&payload_json)?;
                let mut changed = false;
                if let Some(map) = payload.as_object_mut() {
                    for raw_key in ["image_base64", "ocr_text", "latex_text", "problem_text"] {
                        if map.remove(raw_key).is_some() {
                            changed = true;
                        }
                    }
                }
                if changed {
                    tx.execute(
                        "UPDATE events SET payload_json = ?1 WHERE id = ?2",
                        params![serde_json::to_string(&payload)?, id],
                    )?;
                    sanitized += 1;
                }
            }
        }
        tx.commit()?;
        Ok(RetentionReport {
            cutoff,
            sanitized_rows: sanitized,
        })
    }
}

/// 保留任务执行报告
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetentionReport {
    pub cutoff: String,
    pub sanitized_rows: usize,
}

/// 12 位十六进制短 id（会话 / trace 共用格式）
pub fn short_id() -> String {
    let full = uuid::Uuid::new_v4().simple().to_string();
    full[..12].to_string()
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&dir.path().join("friday.sqlite3"), &dir.path().join("audit.jsonl"))
            .unwrap();
        (dir, storage)
    }

    fn map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_session_roundtrip() {
        let (_dir, storage) = scratch_storage();
        let created = storage
            .create_session("Viktor", Some("physics"), Some("8"), None, &map(&[("competency", 0.5)]))
            .unwrap();
        let fetched = storage.get_session(&created.session_id).unwrap().unwrap();
        assert_eq!(fetched.student_alias, "Viktor");
        assert_eq!(fetched.active_setpoints["competency"], 0.5);
        assert!(storage.get_session("nope").unwrap().is_none());
    }

    #[test]
    fn test_latest_setpoints_fallback_chain() {
        let (_dir, storage) = scratch_storage();
        let fallback = map(&[("competency", 0.5)]);
        // 无会话、无快照：策略默认
        assert_eq!(
            storage.get_latest_setpoints("ghost", &fallback).unwrap(),
            fallback
        );

        let session = storage
            .create_session("Viktor", None, None, None, &map(&[("competency", 0.6)]))
            .unwrap();
        // 有会话、无快照：会话存量
        assert_eq!(
            storage.get_latest_setpoints(&session.session_id, &fallback).unwrap()["competency"],
            0.6
        );

        storage
            .save_setpoint_snapshot(
                &session.session_id,
                &SetpointSnapshot {
                    setpoints: map(&[("competency", 0.7)]),
                    observed_targets: map(&[("competency", 1.0)]),
                    drift: map(&[("competency", 0.1)]),
                    trace_id: "t1".to_string(),
                },
            )
            .unwrap();
        // 有快照：最高 seq 的快照
        assert_eq!(
            storage.get_latest_setpoints(&session.session_id, &fallback).unwrap()["competency"],
            0.7
        );
    }

    #[test]
    fn test_snapshot_seq_is_monotonic_per_session() {
        let (_dir, storage) = scratch_storage();
        let session = storage
            .create_session("Viktor", None, None, None, &BTreeMap::new())
            .unwrap();
        for value in [0.1, 0.2, 0.3] {
            storage
                .save_setpoint_snapshot(
                    &session.session_id,
                    &SetpointSnapshot {
                        setpoints: map(&[("competency", value)]),
                        observed_targets: BTreeMap::new(),
                        drift: BTreeMap::new(),
                        trace_id: "t".to_string(),
                    },
                )
                .unwrap();
        }
        let latest = storage
            .get_latest_setpoints(&session.session_id, &BTreeMap::new())
            .unwrap();
        assert_eq!(latest["competency"], 0.3);
    }

    #[test]
    fn test_budget_snapshot_sums_committed_entries() {
        let (_dir, storage) = scratch_storage();
        let session = storage
            .create_session("Viktor", None, None, None, &BTreeMap::new())
            .unwrap();
        storage
            .add_budget_entry("t1", Some(&session.session_id), "solver", 2.5, Some("o3"), &json!({}))
            .unwrap();
        storage
            .add_budget_entry("t2", Some(&session.session_id), "tutor", 1.5, None, &json!({}))
            .unwrap();
        storage
            .add_budget_entry("t3", None, "benchmark", 4.0, None, &json!({}))
            .unwrap();

        let snapshot = storage
            .budget_snapshot(150.0, 8.0, &session.session_id)
            .unwrap();
        assert!((snapshot.session_spent_usd - 4.0).abs() < 1e-9);
        assert!((snapshot.monthly_spent_usd - 8.0).abs() < 1e-9);
        assert!((snapshot.monthly_remaining_usd - 142.0).abs() < 1e-9);
    }

    #[test]
    fn test_events_recent_order_and_audit_line() {
        let (dir, storage) = scratch_storage();
        storage
            .save_event("t1", "s1", "first", &json!({"n": 1}))
            .unwrap();
        storage
            .save_event("t2", "s1", "second", &json!({"n": 2}))
            .unwrap();
        let events = storage.get_recent_events("s1", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "second");

        let audit = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(audit.lines().count(), 2);
        assert!(audit.contains("\"trace_id\":\"t1\""));
    }

    #[test]
    fn test_retention_strips_raw_payload_fields() {
        let (_dir, storage) = scratch_storage();
        storage
            .save_event(
                "t1",
                "s1",
                "ingest_received",
                &json!({"problem_text": "secret", "trigger_type": "PAUSE"}),
            )
            .unwrap();
        // 回拨事件时间，使其落入保留窗口之外
        {
            let conn = storage.conn.lock().unwrap();
            conn.execute(
                "UPDATE events SET created_at = ?1",
                params![(Utc::now() - Duration::days(90)).to_rfc3339()],
            )
            .unwrap();
        }
        let report = storage.run_retention(30).unwrap();
        assert_eq!(report.sanitized_rows, 1);
        let events = storage.get_recent_events("s1", 10).unwrap();
        assert!(events[0].payload.get("problem_text").is_none());
        assert_eq!(events[0].payload["trigger_type"], "PAUSE");
    }
}
