//! SQLite database with Diesel ORM
//!
//! Stores tickets, the audit ledger, pauses, progress requests and
//! notifications. Every workflow mutation runs through [`Database::write`],
//! which holds an immediate (write-locked) transaction for the whole
//! check-then-write sequence.

use crate::config::Config;
use crate::dashboard::DashboardCache;
use crate::error::{Error, Result};
use crate::notify::{NotificationKind, Priority};
use crate::progress::ProgressStatus;
use crate::schema::*;
use crate::status::{ActionKind, TicketStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Walk up directory tree to find .ticketflow folder (like git finds .git)
/// Can be overridden with TICKETFLOW_DB_PATH env var
fn get_db_path(config: &Config) -> PathBuf {
    // Check env var first - always takes priority
    if let Ok(path) = std::env::var("TICKETFLOW_DB_PATH") {
        return PathBuf::from(path);
    }

    if let Some(path) = &config.database.path {
        return path.clone();
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let store_dir = dir.join(".ticketflow");
            if store_dir.is_dir() {
                return store_dir.join("ticketflow.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    // No .ticketflow found - default to current directory
    PathBuf::from(".ticketflow/ticketflow.db")
}

/// Current timestamp in the stored format
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// RFC 3339, UTC, microseconds. Lexical order equals chronological order.
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Current schema version for ticketflow
pub const CURRENT_SCHEMA: StoreSchema = StoreSchema {
    major: 1,
    minor: 2,
    patch: 0,
    name: "ticket-workflow",
    features: &[
        "tickets",
        "audit_actions",
        "comments",
        "pauses",
        "progress_requests",
        "progress_updates",
        "notifications",
        "notification_reads",
        "notification_actions",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct StoreSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl StoreSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for StoreSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

/// Queryable schema version
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = schema_versions)]
pub struct StoredSchema {
    pub id: i32,
    pub version: String,
    pub name: String,
    pub features: String,
    pub introduced_at: String,
}

// ============================================================================
// Ticket Aggregate
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket<'a> {
    pub external_code: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub status: TicketStatus,
    pub confirmation_status: Option<&'a str>,
    pub is_blocking: bool,
    pub resolution_date: Option<&'a str>,
    pub is_deleted: bool,
    pub is_active: bool,
    pub owner_id: &'a str,
    pub last_modified_by: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Queryable ticket
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = tickets)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct Ticket {
    pub id: i32,
    pub external_code: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub confirmation_status: Option<String>,
    pub is_blocking: bool,
    pub resolution_date: Option<String>,
    pub is_deleted: bool,
    pub is_active: bool,
    pub owner_id: String,
    pub last_modified_by: String,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// Audit Ledger Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = audit_actions)]
pub struct NewAuditAction<'a> {
    pub ticket_id: i32,
    pub kind: ActionKind,
    pub from_status: Option<TicketStatus>,
    pub to_status: Option<TicketStatus>,
    pub notes: Option<&'a str>,
    pub performed_by: &'a str,
    pub created_at: &'a str,
}

/// Immutable ledger row
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = audit_actions)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct AuditAction {
    pub id: i32,
    pub ticket_id: i32,
    pub kind: ActionKind,
    pub from_status: Option<TicketStatus>,
    pub to_status: Option<TicketStatus>,
    pub notes: Option<String>,
    pub performed_by: String,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment<'a> {
    pub ticket_id: i32,
    pub body: &'a str,
    pub author_id: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = comments)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct Comment {
    pub id: i32,
    pub ticket_id: i32,
    pub body: String,
    pub author_id: String,
    pub created_at: String,
}

// ============================================================================
// Pause Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = pauses)]
pub struct NewPause<'a> {
    pub ticket_id: i32,
    pub paused_at: &'a str,
    pub reason: &'a str,
    pub paused_by: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = pauses)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct PauseRecord {
    pub id: i32,
    pub ticket_id: i32,
    pub paused_at: String,
    pub resumed_at: Option<String>,
    pub reason: String,
    pub resume_notes: Option<String>,
    pub paused_by: String,
    pub resumed_by: Option<String>,
}

// ============================================================================
// Progress Request Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = progress_requests)]
pub struct NewProgressRequest<'a> {
    pub ticket_id: i32,
    pub requested_by: &'a str,
    pub target_id: &'a str,
    pub message: &'a str,
    pub requested_at: &'a str,
    pub due_date: Option<&'a str>,
    pub current_percentage: i32,
    pub responded: bool,
    pub status: ProgressStatus,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = progress_requests)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct ProgressRequest {
    pub id: i32,
    pub ticket_id: i32,
    pub requested_by: String,
    pub target_id: String,
    pub message: String,
    pub requested_at: String,
    pub due_date: Option<String>,
    pub current_progress: Option<String>,
    pub current_percentage: i32,
    pub current_eta: Option<String>,
    pub responded: bool,
    pub responded_at: Option<String>,
    pub responded_by: Option<String>,
    pub status: ProgressStatus,
    pub cancelled_at: Option<String>,
    pub cancelled_by: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = progress_updates)]
pub struct NewProgressUpdate<'a> {
    pub request_id: i32,
    pub updated_by: &'a str,
    pub progress: &'a str,
    pub percentage: i32,
    pub estimated_completion: Option<&'a str>,
    pub created_at: &'a str,
}

/// Append-only history row of a progress request
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = progress_updates)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct ProgressUpdate {
    pub id: i32,
    pub request_id: i32,
    pub updated_by: String,
    pub progress: String,
    pub percentage: i32,
    pub estimated_completion: Option<String>,
    pub created_at: String,
}

// ============================================================================
// Notification Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotificationRow<'a> {
    pub kind: NotificationKind,
    pub priority: Priority,
    pub ticket_id: Option<i32>,
    pub progress_request_id: Option<i32>,
    pub title: &'a str,
    pub message: &'a str,
    pub created_by: &'a str,
    pub target_user_id: Option<&'a str>,
    pub target_role: Option<&'a str>,
    pub is_global: bool,
    pub requires_action: bool,
    pub is_resolved: bool,
    pub created_at: &'a str,
    pub expires_at: Option<&'a str>,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = notifications)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct Notification {
    pub id: i32,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub ticket_id: Option<i32>,
    pub progress_request_id: Option<i32>,
    pub title: String,
    pub message: String,
    pub created_by: String,
    pub target_user_id: Option<String>,
    pub target_role: Option<String>,
    pub is_global: bool,
    pub requires_action: bool,
    pub is_resolved: bool,
    pub resolved_at: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
}

#[derive(Insertable, Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = notification_reads)]
pub struct NotificationRead {
    pub notification_id: i32,
    pub user_id: String,
    pub read_at: String,
    pub channel: String,
}

#[derive(Insertable)]
#[diesel(table_name = notification_actions)]
pub struct NewNotificationAction<'a> {
    pub notification_id: i32,
    pub user_id: &'a str,
    pub action_type: &'a str,
    pub notes: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = notification_actions)]
pub struct NotificationAction {
    pub id: i32,
    pub notification_id: i32,
    pub user_id: String,
    pub action_type: String,
    pub notes: Option<String>,
    pub created_at: String,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas applied when the pool hands a connection out
#[derive(Debug)]
struct ConnectionPragmas {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Database connection wrapper with connection pool.
///
/// Cheap to share between request workers behind an `Arc`; it holds no
/// per-request state.
pub struct Database {
    pool: DbPool,
    pub(crate) cache: DashboardCache,
    pub(crate) config: Config,
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> PathBuf {
        get_db_path(&Config::load())
    }

    /// Create a new database at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open database at default path (respects TICKETFLOW_DB_PATH env var)
    pub fn open() -> Result<Self> {
        Self::open_with_config(Config::load())
    }

    /// Open the database the given config points at
    pub fn open_with_config(config: Config) -> Result<Self> {
        let path = get_db_path(&config);
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::Connection(e.to_string()))?;
            }
        }
        Self::open_at_with(&path, config)
    }

    /// Open database at specified path with default settings
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_at_with(path, Config::default())
    }

    pub fn open_at_with<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(config.database.pool_size.max(1))
            .connection_customizer(Box::new(ConnectionPragmas {
                busy_timeout_ms: config.database.busy_timeout_ms,
            }))
            .build(manager)
            .map_err(|e| Error::Connection(e.to_string()))?;

        let db = Self {
            pool,
            cache: DashboardCache::default(),
            config,
        };
        db.init_schema()?;
        tracing::debug!(path = %path_str, schema = %CURRENT_SCHEMA, "database opened");
        Ok(db)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| Error::Connection(e.to_string()))
    }

    /// Run `f` inside one immediate transaction.
    ///
    /// The write lock is taken before `f` reads anything, so the checks it
    /// performs still hold when it writes. Any error rolls everything back.
    /// Cached dashboard projections are invalidated after commit.
    pub(crate) fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let mut pooled = self.get_conn()?;
        let conn: &mut SqliteConnection = &mut pooled;
        let out = conn.immediate_transaction(f)?;
        self.cache.invalidate();
        Ok(out)
    }

    /// Run `f` inside a deferred (read) transaction for a consistent snapshot
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let mut pooled = self.get_conn()?;
        let conn: &mut SqliteConnection = &mut pooled;
        conn.transaction(f)
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        conn.batch_execute("PRAGMA journal_mode = WAL;")?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                external_code TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'OPEN',
                confirmation_status TEXT,
                is_blocking BOOLEAN NOT NULL DEFAULT 0,
                resolution_date TEXT,
                is_deleted BOOLEAN NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                owner_id TEXT NOT NULL,
                last_modified_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS audit_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                ticket_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                from_status TEXT,
                to_status TEXT,
                notes TEXT,
                performed_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (ticket_id) REFERENCES tickets(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                ticket_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                author_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (ticket_id) REFERENCES tickets(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS pauses (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                ticket_id INTEGER NOT NULL,
                paused_at TEXT NOT NULL,
                resumed_at TEXT,
                reason TEXT NOT NULL,
                resume_notes TEXT,
                paused_by TEXT NOT NULL,
                resumed_by TEXT,
                FOREIGN KEY (ticket_id) REFERENCES tickets(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS progress_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                ticket_id INTEGER NOT NULL,
                requested_by TEXT NOT NULL,
                target_id TEXT NOT NULL,
                message TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                due_date TEXT,
                current_progress TEXT,
                current_percentage INTEGER NOT NULL DEFAULT 0
                    CHECK (current_percentage BETWEEN 0 AND 100),
                current_eta TEXT,
                responded BOOLEAN NOT NULL DEFAULT 0,
                responded_at TEXT,
                responded_by TEXT,
                status TEXT NOT NULL DEFAULT 'Pending',
                cancelled_at TEXT,
                cancelled_by TEXT,
                FOREIGN KEY (ticket_id) REFERENCES tickets(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS progress_updates (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                request_id INTEGER NOT NULL,
                updated_by TEXT NOT NULL,
                progress TEXT NOT NULL,
                percentage INTEGER NOT NULL CHECK (percentage BETWEEN 0 AND 100),
                estimated_completion TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (request_id) REFERENCES progress_requests(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                kind TEXT NOT NULL,
                priority TEXT NOT NULL,
                ticket_id INTEGER,
                progress_request_id INTEGER,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                created_by TEXT NOT NULL,
                target_user_id TEXT,
                target_role TEXT,
                is_global BOOLEAN NOT NULL DEFAULT 0,
                requires_action BOOLEAN NOT NULL DEFAULT 0,
                is_resolved BOOLEAN NOT NULL DEFAULT 0,
                resolved_at TEXT,
                resolved_by TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                CHECK ((target_user_id IS NOT NULL) + (target_role IS NOT NULL) + (is_global != 0) = 1),
                FOREIGN KEY (ticket_id) REFERENCES tickets(id),
                FOREIGN KEY (progress_request_id) REFERENCES progress_requests(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS notification_reads (
                notification_id INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                read_at TEXT NOT NULL,
                channel TEXT NOT NULL,
                PRIMARY KEY (notification_id, user_id),
                FOREIGN KEY (notification_id) REFERENCES notifications(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS notification_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                notification_id INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                notes TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (notification_id) REFERENCES notifications(id)
            )
        "#).execute(&mut conn)?;

        // Create indexes
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_actions_ticket ON audit_actions(ticket_id, created_at)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_comments_ticket ON comments(ticket_id, created_at)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_pauses_ticket ON pauses(ticket_id)").execute(&mut conn)?;
        // Second line of defence for the one-active-pause rule
        diesel::sql_query("CREATE UNIQUE INDEX IF NOT EXISTS idx_pauses_one_active ON pauses(ticket_id) WHERE resumed_at IS NULL").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_requests_ticket ON progress_requests(ticket_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_requests_target ON progress_requests(target_id, status)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_updates_request ON progress_updates(request_id, created_at)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(target_user_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_notifications_role ON notifications(target_role)").execute(&mut conn)?;

        // Register current schema
        self.register_schema(&mut conn, &CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, conn: &mut SqliteConnection, schema: &StoreSchema) -> Result<()> {
        let now = now_ts();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(conn)?;

        Ok(())
    }

    /// Schema versions this file has been opened with, oldest first
    pub fn schema_history(&self) -> Result<Vec<StoredSchema>> {
        let mut conn = self.get_conn()?;
        let rows = schema_versions::table
            .order(schema_versions::id.asc())
            .load::<StoredSchema>(&mut conn)?;
        Ok(rows)
    }
}

/// Rowid of the last insert on this connection
pub(crate) fn last_insert_id(conn: &mut SqliteConnection) -> Result<i32> {
    let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
        .first(conn)?;
    Ok(id)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::actor::{Actor, Role};
    use tempfile::TempDir;

    /// Fresh database in a temp dir; keep the guard alive for the test
    pub fn temp_db() -> (TempDir, Database) {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::open_at(dir.path().join("test.db")).expect("open db");
        (dir, db)
    }

    pub fn editor(id: &str) -> Actor {
        Actor::new(id, Role::Editor)
    }

    pub fn admin(id: &str) -> Actor {
        Actor::new(id, Role::Admin)
    }

    pub fn viewer(id: &str) -> Actor {
        Actor::new(id, Role::Viewer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::temp_db;

    #[test]
    fn test_schema_registered_once() {
        let (dir, db) = temp_db();
        drop(db);
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        let history = db.schema_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, CURRENT_SCHEMA.version_string());
        assert!(CURRENT_SCHEMA.has_feature("pauses"));
    }

    #[test]
    fn test_racing_writers_see_one_winner() {
        use crate::error::Error;
        use crate::tickets::NewTicketInput;
        use std::sync::{Arc, Barrier};
        use std::thread;
        use testing::editor;

        let (_dir, db) = temp_db();
        let db = Arc::new(db);
        let ticket = db.create_ticket(NewTicketInput::titled("Chiller"), &editor("u0")).unwrap();
        let request = db
            .create_progress_request(ticket.id, "tech", "status?", None, &editor("boss"))
            .unwrap();

        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let actor = editor(&format!("u{}", i));
                    barrier.wait();
                    let paused = db.create_pause(ticket.id, "parts on order", &actor);
                    let responded = db.respond(request.id, "done", &actor);
                    (paused.map(|_| ()), responded.map(|_| ()))
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for results in [
            outcomes.iter().map(|(p, _)| p).collect::<Vec<_>>(),
            outcomes.iter().map(|(_, r)| r).collect::<Vec<_>>(),
        ] {
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, Error::Conflict(_))));
        }

        assert_eq!(db.list_pauses(ticket.id).unwrap().len(), 1);
        assert_eq!(db.progress_history(request.id).unwrap().len(), 1);
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let earlier = parse_ts("2026-01-02T03:04:05.000001Z").unwrap();
        let later = earlier + chrono::Duration::microseconds(10);
        assert!(format_ts(earlier) < format_ts(later));
        assert_eq!(parse_ts(&format_ts(later)), Some(later));
    }
}
