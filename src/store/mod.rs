//! SQLite-backed store: the single source of truth for features, config,
//! architecture blobs, and the pipeline session log.
//!
//! Single-writer discipline: every mutating operation runs on one
//! `Connection` guarded by the `DbHandle` mutex; readers take snapshots.
//! Migrations are forward-only and additive, safe to re-run on every open.

pub mod features;
pub mod models;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use models::{parse_bool, ArchKind, ExecutionMode, PipelineSession, Settings};

/// Directory under the project root holding all persisted state.
pub const STATE_DIR: &str = ".framework";
/// The store's database file name.
pub const DB_FILE: &str = "framework.db";

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the store under `<root>/.framework/framework.db`,
    /// run migrations, and seed default config keys. Idempotent.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(STATE_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory {}", dir.display()))?;
        let path = dir.join(DB_FILE);
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Path of the database file for a given project root.
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(DB_FILE)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .context("Failed to set pragmas")?;
        self.run_migrations().context("Failed to run migrations")?;
        self.seed_default_config()
            .context("Failed to seed default config")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS features (
                    id TEXT PRIMARY KEY,
                    category TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    notes TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'pending',
                    depends_on TEXT NOT NULL DEFAULT '[]',
                    requirements TEXT NOT NULL DEFAULT '[]',
                    architecture_compliance TEXT NOT NULL DEFAULT '[]',
                    verification_steps TEXT NOT NULL DEFAULT '[]',
                    assigned_to TEXT NOT NULL DEFAULT '',
                    reviewed_by TEXT NOT NULL DEFAULT '',
                    tested_by TEXT NOT NULL DEFAULT '',
                    passes INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
                );

                CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS architecture (
                    kind TEXT PRIMARY KEY CHECK (kind IN ('principles', 'patterns', 'standards')),
                    payload TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pipeline_sessions (
                    session_number INTEGER PRIMARY KEY,
                    agent_role TEXT NOT NULL,
                    feature_id TEXT NOT NULL,
                    outcome TEXT NOT NULL,
                    notes TEXT NOT NULL DEFAULT '',
                    timestamp TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
                );

                CREATE INDEX IF NOT EXISTS idx_features_status ON features(status);
                CREATE INDEX IF NOT EXISTS idx_sessions_feature ON pipeline_sessions(feature_id);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migrations. Only "duplicate column" errors are ignored;
        // anything else is propagated.
        for ddl in [
            "ALTER TABLE features ADD COLUMN openspec_change_id TEXT NOT NULL DEFAULT ''",
            "ALTER TABLE features ADD COLUMN openspec_task_group INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE features ADD COLUMN openspec_reference TEXT NOT NULL DEFAULT ''",
        ] {
            match self.conn.execute(ddl, []) {
                Ok(_) => {}
                Err(e) if e.to_string().contains("duplicate column") => {}
                Err(e) => return Err(anyhow::anyhow!("Migration failed ({}): {}", ddl, e)),
            }
        }

        self.conn
            .execute_batch(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_features_openspec
                 ON features(openspec_change_id, openspec_task_group)
                 WHERE openspec_change_id != '';",
            )
            .context("Failed to create openspec upsert index")?;

        // updated_at is maintained by trigger so every mutation path gets it.
        self.conn
            .execute_batch(
                "CREATE TRIGGER IF NOT EXISTS features_touch_updated
                 AFTER UPDATE ON features
                 FOR EACH ROW
                 BEGIN
                     UPDATE features SET updated_at = datetime('now', 'localtime')
                     WHERE id = NEW.id;
                 END;",
            )
            .context("Failed to create updated_at trigger")?;

        Ok(())
    }

    fn seed_default_config(&self) -> Result<()> {
        let defaults = Settings::default();
        let seeds: [(&str, String); 10] = [
            ("execution_mode", defaults.execution_mode.as_str().to_string()),
            ("model", defaults.model.clone()),
            ("max_retries", defaults.max_retries.to_string()),
            ("max_agent_turns", defaults.max_agent_turns.to_string()),
            (
                "features_per_lead_session",
                defaults.features_per_lead_session.to_string(),
            ),
            ("auto_merge", defaults.auto_merge.to_string()),
            ("safe_mode", defaults.safe_mode.to_string()),
            (
                "openspec_auto_archive",
                defaults.openspec_auto_archive.to_string(),
            ),
            (
                "openspec_auto_import",
                defaults.openspec_auto_import.to_string(),
            ),
            ("agent_command", defaults.agent_command.clone()),
        ];
        for (key, value) in seeds {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )
                .with_context(|| format!("Failed to seed config key {}", key))?;
        }
        Ok(())
    }

    // ── Config ────────────────────────────────────────────────────────

    pub fn config_get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM config WHERE key = ?1")
            .context("Failed to prepare config_get")?;
        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .context("Failed to query config")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read config row")?)),
            None => Ok(None),
        }
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| format!("Failed to set config key {}", key))?;
        Ok(())
    }

    pub fn config_all(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM config ORDER BY key")
            .context("Failed to prepare config_all")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to query config")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read config row")?);
        }
        Ok(out)
    }

    /// Typed settings snapshot. Unparseable values fall back to defaults.
    pub fn settings(&self) -> Result<Settings> {
        let mut s = Settings::default();
        for (key, value) in self.config_all()? {
            match key.as_str() {
                "execution_mode" => {
                    if let Ok(mode) = ExecutionMode::from_str(&value) {
                        s.execution_mode = mode;
                    }
                }
                "model" => s.model = value,
                "max_retries" => {
                    if let Ok(n) = value.parse() {
                        s.max_retries = n;
                    }
                }
                "max_agent_turns" => {
                    if let Ok(n) = value.parse() {
                        s.max_agent_turns = n;
                    }
                }
                "features_per_lead_session" => {
                    if let Ok(n) = value.parse() {
                        s.features_per_lead_session = n;
                    }
                }
                "auto_merge" => {
                    if let Some(b) = parse_bool(&value) {
                        s.auto_merge = b;
                    }
                }
                "safe_mode" => {
                    if let Some(b) = parse_bool(&value) {
                        s.safe_mode = b;
                    }
                }
                "openspec_auto_archive" => {
                    if let Some(b) = parse_bool(&value) {
                        s.openspec_auto_archive = b;
                    }
                }
                "openspec_auto_import" => {
                    if let Some(b) = parse_bool(&value) {
                        s.openspec_auto_import = b;
                    }
                }
                "agent_command" => s.agent_command = value,
                _ => {}
            }
        }
        Ok(s)
    }

    // ── Architecture blobs ────────────────────────────────────────────

    pub fn arch_set(&self, kind: ArchKind, payload: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO architecture (kind, payload) VALUES (?1, ?2)
                 ON CONFLICT(kind) DO UPDATE SET payload = excluded.payload",
                params![kind.as_str(), payload],
            )
            .with_context(|| format!("Failed to store architecture blob {}", kind.as_str()))?;
        Ok(())
    }

    pub fn arch_get(&self, kind: ArchKind) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM architecture WHERE kind = ?1")
            .context("Failed to prepare arch_get")?;
        let mut rows = stmt
            .query_map(params![kind.as_str()], |row| row.get::<_, String>(0))
            .context("Failed to query architecture")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read architecture row")?)),
            None => Ok(None),
        }
    }

    pub fn arch_all(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, payload FROM architecture ORDER BY kind")
            .context("Failed to prepare arch_all")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to query architecture")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read architecture row")?);
        }
        Ok(out)
    }

    // ── Pipeline session log ──────────────────────────────────────────

    pub fn append_session(
        &self,
        agent_role: &str,
        feature_id: &str,
        outcome: &str,
        notes: &str,
    ) -> Result<i64> {
        let next: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(session_number), 0) + 1 FROM pipeline_sessions",
                [],
                |row| row.get(0),
            )
            .context("Failed to allocate session number")?;
        self.conn
            .execute(
                "INSERT INTO pipeline_sessions (session_number, agent_role, feature_id, outcome, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![next, agent_role, feature_id, outcome, notes],
            )
            .context("Failed to append pipeline session")?;
        Ok(next)
    }

    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<PipelineSession>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_number, agent_role, feature_id, outcome, notes, timestamp
                 FROM pipeline_sessions ORDER BY session_number DESC LIMIT ?1",
            )
            .context("Failed to prepare recent_sessions")?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(PipelineSession {
                    session_number: row.get(0)?,
                    agent_role: row.get(1)?,
                    feature_id: row.get(2)?,
                    outcome: row.get(3)?,
                    notes: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })
            .context("Failed to query sessions")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read session row")?);
        }
        Ok(out)
    }
}

/// Async-safe handle to the store.
///
/// Wraps `Db` behind `Arc<Mutex>` and runs access on tokio's blocking pool
/// via `spawn_blocking`, so synchronous SQLite I/O never ties up async
/// worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with store access on a blocking thread. Data passed
    /// into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }

    /// Non-blocking snapshot attempt. Returns `None` when a writer holds
    /// the lock; callers (the dashboard ticker) skip the tick and retry.
    pub fn try_lock_sync(&self) -> Option<std::sync::MutexGuard<'_, Db>> {
        self.inner.try_lock().ok()
    }

    /// Acquire the store mutex synchronously. Only for startup paths and
    /// tests, never hot async handlers.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, Db>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))
    }
}
