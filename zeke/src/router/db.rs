//! Routing database: models, per-project preferences, stats, and traces.
//!
//! Embedded SQLite in WAL mode. Migrations apply in numeric order at open,
//! each inside its own transaction; any failure aborts startup. All writes
//! funnel through a single writer thread fed by a bounded channel; readers
//! open their own connections and run on the blocking pool.
//!
//! Stats rows are append-only, with a unique index on `request_id` so a
//! retried write cannot produce a second row for the same request.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, oneshot};

use crate::catalog::ModelRecord;
use crate::error::{ZekeError, ZekeResult};

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "0001_models",
        r#"
        CREATE TABLE IF NOT EXISTS models (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            name TEXT NOT NULL,
            display_name TEXT,
            family TEXT,
            parameter_size TEXT,
            quantization TEXT,
            context_length INTEGER NOT NULL CHECK (context_length >= 1),
            capabilities_json TEXT NOT NULL DEFAULT '[]',
            cost_per_1k_tokens_in REAL NOT NULL DEFAULT 0,
            cost_per_1k_tokens_out REAL NOT NULL DEFAULT 0,
            latency_avg_ms REAL,
            success_rate REAL NOT NULL DEFAULT 1.0,
            available INTEGER NOT NULL DEFAULT 1,
            last_checked INTEGER NOT NULL DEFAULT 0,
            metadata_json TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_models_provider ON models(provider);
        CREATE INDEX IF NOT EXISTS idx_models_available ON models(available, provider);
        CREATE INDEX IF NOT EXISTS idx_models_family ON models(family);
        "#,
    ),
    (
        2,
        "0002_routing_core",
        r#"
        CREATE TABLE IF NOT EXISTS routing_prefs (
            project TEXT PRIMARY KEY,
            prefer_local INTEGER NOT NULL DEFAULT 1,
            max_cloud_cost_cents INTEGER NOT NULL DEFAULT 500,
            last_alias TEXT,
            last_model TEXT,
            escalation_threshold TEXT NOT NULL DEFAULT 'medium',
            updated_at INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS routing_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            project TEXT NOT NULL,
            alias TEXT,
            model TEXT NOT NULL,
            provider TEXT NOT NULL,
            intent TEXT NOT NULL,
            size_hint TEXT NOT NULL,
            latency_ms INTEGER NOT NULL DEFAULT 0,
            total_duration_ms INTEGER NOT NULL DEFAULT 0,
            tokens_in INTEGER NOT NULL DEFAULT 0 CHECK (tokens_in >= 0),
            tokens_out INTEGER NOT NULL DEFAULT 0 CHECK (tokens_out >= 0),
            cost_cents REAL NOT NULL DEFAULT 0,
            success INTEGER NOT NULL DEFAULT 0,
            error_code TEXT,
            escalated INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS routing_trace (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            project TEXT,
            trace_json TEXT NOT NULL,
            decision_reason TEXT,
            candidates_json TEXT,
            created_at INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_stats_project_created
            ON routing_stats(project, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_stats_model ON routing_stats(model);
        CREATE INDEX IF NOT EXISTS idx_stats_provider ON routing_stats(provider);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_stats_request ON routing_stats(request_id);
        CREATE INDEX IF NOT EXISTS idx_trace_request ON routing_trace(request_id);
        "#,
    ),
];

/// Per-project routing preferences.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RoutingPrefs {
    pub project: String,
    pub prefer_local: bool,
    pub max_cloud_cost_cents: i64,
    pub last_alias: Option<String>,
    pub last_model: Option<String>,
    pub escalation_threshold: String,
    pub updated_at: i64,
}

impl RoutingPrefs {
    pub fn defaults(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            prefer_local: true,
            max_cloud_cost_cents: 500,
            last_alias: None,
            last_model: None,
            escalation_threshold: "medium".into(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One recorded routing decision (a `routing_stats` row).
#[derive(Clone, Debug, serde::Serialize)]
pub struct RoutingDecision {
    pub request_id: String,
    pub project: String,
    pub alias: Option<String>,
    pub model: String,
    pub provider: String,
    pub intent: String,
    pub size_hint: String,
    pub latency_first_token_ms: u64,
    pub total_duration_ms: u64,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost_cents: f64,
    pub success: bool,
    pub error_code: Option<String>,
    pub escalated: bool,
}

/// Observability trace captured from the aggregating proxy, verbatim.
#[derive(Clone, Debug, serde::Serialize)]
pub struct RoutingTrace {
    pub request_id: String,
    pub project: Option<String>,
    pub trace_json: String,
    pub decision_reason: Option<String>,
    pub candidates_json: Option<String>,
}

enum WriteOp {
    Stats(RoutingDecision),
    Trace(RoutingTrace),
    UpsertModel(Box<ModelRecord>),
    UpsertPrefs(RoutingPrefs),
    Flush(oneshot::Sender<()>),
}

/// Handle to the routing database. Cheap to clone.
#[derive(Clone)]
pub struct RoutingDb {
    path: PathBuf,
    writer: mpsc::Sender<WriteOp>,
}

impl RoutingDb {
    /// Opens the database, applies migrations, and starts the writer thread.
    pub fn open(path: impl AsRef<Path>) -> ZekeResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_connection(&path)?;
        apply_migrations(&conn)?;
        drop(conn);

        let (tx, rx) = mpsc::channel::<WriteOp>(256);
        let writer_path = path.clone();
        std::thread::Builder::new()
            .name("zeke-db-writer".into())
            .spawn(move || writer_loop(writer_path, rx))
            .map_err(|e| ZekeError::Database(format!("spawn writer: {e}")))?;

        Ok(Self { path, writer: tx })
    }

    /// Current schema version (`PRAGMA user_version`).
    pub async fn schema_version(&self) -> ZekeResult<i64> {
        self.read(|conn| {
            conn.query_row("PRAGMA user_version", [], |row| row.get(0))
                .map_err(db_err)
        })
        .await
    }

    /// Enqueues a stats row. Written after the request completed; a repeat
    /// for the same request id is ignored by the unique index.
    pub async fn record_decision(&self, decision: RoutingDecision) -> ZekeResult<()> {
        self.writer
            .send(WriteOp::Stats(decision))
            .await
            .map_err(|_| ZekeError::Database("writer stopped".into()))
    }

    pub async fn record_trace(&self, trace: RoutingTrace) -> ZekeResult<()> {
        self.writer
            .send(WriteOp::Trace(trace))
            .await
            .map_err(|_| ZekeError::Database("writer stopped".into()))
    }

    pub async fn upsert_model(&self, record: ModelRecord) -> ZekeResult<()> {
        self.writer
            .send(WriteOp::UpsertModel(Box::new(record)))
            .await
            .map_err(|_| ZekeError::Database("writer stopped".into()))
    }

    pub async fn upsert_prefs(&self, prefs: RoutingPrefs) -> ZekeResult<()> {
        self.writer
            .send(WriteOp::UpsertPrefs(prefs))
            .await
            .map_err(|_| ZekeError::Database("writer stopped".into()))
    }

    /// Barrier: resolves once every previously enqueued write has committed.
    pub async fn flush(&self) -> ZekeResult<()> {
        let (tx, rx) = oneshot::channel();
        self.writer
            .send(WriteOp::Flush(tx))
            .await
            .map_err(|_| ZekeError::Database("writer stopped".into()))?;
        rx.await
            .map_err(|_| ZekeError::Database("writer stopped".into()))
    }

    pub async fn get_prefs(&self, project: &str) -> ZekeResult<Option<RoutingPrefs>> {
        let project = project.to_string();
        self.read(move |conn| {
            conn.query_row(
                "SELECT project, prefer_local, max_cloud_cost_cents, last_alias, last_model,
                        escalation_threshold, updated_at
                 FROM routing_prefs WHERE project = ?1",
                params![project],
                |row| {
                    Ok(RoutingPrefs {
                        project: row.get(0)?,
                        prefer_local: row.get(1)?,
                        max_cloud_cost_cents: row.get(2)?,
                        last_alias: row.get(3)?,
                        last_model: row.get(4)?,
                        escalation_threshold: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    /// Month-to-date cloud spend for a project, in cents.
    pub async fn month_cost_cents(&self, project: &str) -> ZekeResult<f64> {
        let project = project.to_string();
        let month_start = month_start_timestamp(chrono::Utc::now());
        self.read(move |conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(cost_cents), 0) FROM routing_stats
                 WHERE project = ?1 AND created_at >= ?2",
                params![project, month_start],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
        .await
    }

    /// Success rate for a model over its most recent `n` stats rows.
    /// 1.0 when there is no history yet.
    pub async fn success_rate(&self, model: &str, n: u32) -> ZekeResult<f64> {
        let model = model.to_string();
        self.read(move |conn| {
            let rate: Option<f64> = conn
                .query_row(
                    "SELECT AVG(success) FROM (
                         SELECT success FROM routing_stats
                         WHERE model = ?1 ORDER BY id DESC LIMIT ?2
                     )",
                    params![model, n],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(rate.unwrap_or(1.0))
        })
        .await
    }

    /// Recent stats rows for one project, newest first.
    pub async fn recent_stats(
        &self,
        project: &str,
        limit: u32,
    ) -> ZekeResult<Vec<serde_json::Value>> {
        let project = project.to_string();
        self.read(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT request_id, model, provider, intent, size_hint, latency_ms,
                            total_duration_ms, tokens_in, tokens_out, cost_cents, success,
                            error_code, escalated, created_at
                     FROM routing_stats WHERE project = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![project, limit], |row| {
                    Ok(serde_json::json!({
                        "request_id": row.get::<_, String>(0)?,
                        "model": row.get::<_, String>(1)?,
                        "provider": row.get::<_, String>(2)?,
                        "intent": row.get::<_, String>(3)?,
                        "size_hint": row.get::<_, String>(4)?,
                        "latency_ms": row.get::<_, i64>(5)?,
                        "total_duration_ms": row.get::<_, i64>(6)?,
                        "tokens_in": row.get::<_, i64>(7)?,
                        "tokens_out": row.get::<_, i64>(8)?,
                        "cost_cents": row.get::<_, f64>(9)?,
                        "success": row.get::<_, bool>(10)?,
                        "error_code": row.get::<_, Option<String>>(11)?,
                        "escalated": row.get::<_, bool>(12)?,
                        "created_at": row.get::<_, i64>(13)?,
                    }))
                })
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    /// Number of stats rows for one request id (tests assert exactly one).
    pub async fn stats_count(&self, request_id: &str) -> ZekeResult<i64> {
        let request_id = request_id.to_string();
        self.read(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM routing_stats WHERE request_id = ?1",
                params![request_id],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
        .await
    }

    /// Loads all persisted model records (catalog warm start).
    pub async fn load_models(&self) -> ZekeResult<Vec<ModelRecord>> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, provider, name, display_name, family, parameter_size,
                            quantization, context_length, capabilities_json,
                            cost_per_1k_tokens_in, cost_per_1k_tokens_out, latency_avg_ms,
                            success_rate, available, last_checked, metadata_json
                     FROM models ORDER BY id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let caps_json: String = row.get(8)?;
                    let metadata_json: Option<String> = row.get(15)?;
                    Ok(ModelRecord {
                        id: row.get(0)?,
                        provider: row.get(1)?,
                        name: row.get(2)?,
                        display_name: row.get(3)?,
                        family: row.get(4)?,
                        parameter_size: row.get(5)?,
                        quantization: row.get(6)?,
                        context_length: row.get::<_, i64>(7)? as u32,
                        capabilities: serde_json::from_str(&caps_json).unwrap_or_default(),
                        cost_in_per_1k: row.get(9)?,
                        cost_out_per_1k: row.get(10)?,
                        latency_avg_ms: row.get(11)?,
                        success_rate: row.get(12)?,
                        available: row.get(13)?,
                        last_checked: row.get(14)?,
                        metadata: metadata_json
                            .and_then(|s| serde_json::from_str(&s).ok())
                            .unwrap_or(serde_json::Value::Null),
                    })
                })
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn read<T, F>(&self, f: F) -> ZekeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> ZekeResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| ZekeError::Database(format!("read task: {e}")))?
    }
}

fn db_err(e: rusqlite::Error) -> ZekeError {
    ZekeError::Database(e.to_string())
}

fn open_connection(path: &Path) -> ZekeResult<Connection> {
    let conn = Connection::open(path).map_err(db_err)?;
    conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
    conn.pragma_update(None, "busy_timeout", 5000).map_err(db_err)?;
    Ok(conn)
}

/// Applies pending migrations in numeric order, one transaction each.
/// Any failure is returned so startup aborts rather than running with a
/// partial schema.
fn apply_migrations(conn: &Connection) -> ZekeResult<()> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(db_err)?;
    for (version, name, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        tracing::debug!("applying migration {name}");
        conn.execute_batch(&format!(
            "BEGIN; {sql}; PRAGMA user_version = {version}; COMMIT;"
        ))
        .map_err(|e| ZekeError::Database(format!("migration {name}: {e}")))?;
    }
    Ok(())
}

fn month_start_timestamp(now: chrono::DateTime<chrono::Utc>) -> i64 {
    use chrono::{Datelike, TimeZone};
    chrono::Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .map(|t| t.timestamp())
        .unwrap_or(0)
}

fn writer_loop(path: PathBuf, mut rx: mpsc::Receiver<WriteOp>) {
    let conn = match open_connection(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("db writer failed to open {}: {e}", path.display());
            return;
        }
    };
    while let Some(op) = rx.blocking_recv() {
        let result = match op {
            WriteOp::Stats(d) => insert_stats(&conn, &d),
            WriteOp::Trace(t) => insert_trace(&conn, &t),
            WriteOp::UpsertModel(m) => upsert_model_row(&conn, &m),
            WriteOp::UpsertPrefs(p) => upsert_prefs_row(&conn, &p),
            WriteOp::Flush(ack) => {
                let _ = ack.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!("db write failed: {e}");
        }
    }
}

fn insert_stats(conn: &Connection, d: &RoutingDecision) -> ZekeResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO routing_stats
         (request_id, project, alias, model, provider, intent, size_hint, latency_ms,
          total_duration_ms, tokens_in, tokens_out, cost_cents, success, error_code,
          escalated, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            d.request_id,
            d.project,
            d.alias,
            d.model,
            d.provider,
            d.intent,
            d.size_hint,
            d.latency_first_token_ms as i64,
            d.total_duration_ms as i64,
            d.tokens_in,
            d.tokens_out,
            d.cost_cents,
            d.success,
            d.error_code,
            d.escalated,
            chrono::Utc::now().timestamp(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn insert_trace(conn: &Connection, t: &RoutingTrace) -> ZekeResult<()> {
    conn.execute(
        "INSERT INTO routing_trace
         (request_id, project, trace_json, decision_reason, candidates_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            t.request_id,
            t.project,
            t.trace_json,
            t.decision_reason,
            t.candidates_json,
            chrono::Utc::now().timestamp(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn upsert_model_row(conn: &Connection, m: &ModelRecord) -> ZekeResult<()> {
    let caps = serde_json::to_string(&m.capabilities)
        .map_err(|e| ZekeError::Database(format!("capabilities encode: {e}")))?;
    let metadata = if m.metadata.is_null() {
        None
    } else {
        Some(m.metadata.to_string())
    };
    conn.execute(
        "INSERT OR REPLACE INTO models
         (id, provider, name, display_name, family, parameter_size, quantization,
          context_length, capabilities_json, cost_per_1k_tokens_in, cost_per_1k_tokens_out,
          latency_avg_ms, success_rate, available, last_checked, metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            m.id,
            m.provider,
            m.name,
            m.display_name,
            m.family,
            m.parameter_size,
            m.quantization,
            m.context_length as i64,
            caps,
            m.cost_in_per_1k,
            m.cost_out_per_1k,
            m.latency_avg_ms,
            m.success_rate,
            m.available,
            m.last_checked,
            metadata,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn upsert_prefs_row(conn: &Connection, p: &RoutingPrefs) -> ZekeResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO routing_prefs
         (project, prefer_local, max_cloud_cost_cents, last_alias, last_model,
          escalation_threshold, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            p.project,
            p.prefer_local,
            p.max_cloud_cost_cents,
            p.last_alias,
            p.last_model,
            p.escalation_threshold,
            chrono::Utc::now().timestamp(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}
