//! SQLite implementation of `ModerationRepository`.
//!
//! Rows are stored with explicit relational columns rather than JSON
//! blobs, for type safety and queryability. The preloadable uniqueness
//! invariant is a partial UNIQUE index, so the "one preloadable row per
//! (author identity, target)" rule holds even under concurrent inserts;
//! the builder recovers the resulting constraint violation by retrying as
//! an amend.
//!
//! # Schema Versioning
//!
//! The database uses SQLite's `user_version` pragma to track schema
//! versions. When the schema changes, increment `SCHEMA_VERSION` and add a
//! migration function in `run_migrations`.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{ModerationRepository, PendingAmend};
use crate::audit::{AuditAction, AuditEntry};
use crate::change::{
    AuthorIdentity, ChangeFlags, ChangeId, ChangeKind, ModerationState, PageRef, PendingChange,
    Provenance, RevisionId, StashKey, UserRef,
};
use crate::error::RepositoryError;

/// Current schema version. Increment when making schema changes.
///
/// When adding a new version:
/// 1. Increment this constant
/// 2. Add a migration function `migrate_v{N}_to_v{N+1}`
/// 3. Call it from `run_migrations`
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed moderation store.
///
/// Uses a `Mutex<Connection>` because `rusqlite::Connection` is not
/// `Sync`. Every operation is a single short statement; no lock is held
/// across an await point.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the database at the given path.
    pub fn new(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;
        Self::from_connection(conn, false)
    }

    /// In-memory database for tests.
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RepositoryError::storage("open in-memory database", e.to_string()))?;
        Self::from_connection(conn, true)
    }

    fn from_connection(conn: Connection, in_memory: bool) -> Result<Self, RepositoryError> {
        // WAL for durability and concurrency. In-memory databases report
        // "memory" as their journal mode, which is expected.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!("expected WAL, database reports '{}'", journal_mode),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| RepositoryError::storage("read schema version", e.to_string()))?;

        if current_version > SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "check schema version",
                format!(
                    "database schema version {} is newer than supported version {}",
                    current_version, SCHEMA_VERSION
                ),
            ));
        }

        if current_version < SCHEMA_VERSION {
            Self::run_migrations(&conn, current_version)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i32) -> Result<(), RepositoryError> {
        if from_version < 1 {
            Self::migrate_v0_to_v1(conn)?;
        }

        // Future migrations go here:
        // if from_version < 2 {
        //     Self::migrate_v1_to_v2(conn)?;
        // }

        Ok(())
    }

    /// Migration v0 -> v1: initial schema.
    fn migrate_v0_to_v1(conn: &Connection) -> Result<(), RepositoryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pending_change (
                id INTEGER PRIMARY KEY AUTOINCREMENT,

                kind TEXT NOT NULL CHECK(kind IN ('edit', 'move', 'upload')),
                author_id INTEGER,
                author_name TEXT NOT NULL,
                author_key TEXT NOT NULL,

                namespace INTEGER NOT NULL,
                title TEXT NOT NULL,
                -- Move destination (move rows only)
                dest_namespace INTEGER,
                dest_title TEXT,
                -- Staged-file reference (upload rows only)
                stash_key TEXT,

                base_revision INTEGER,
                content TEXT NOT NULL,
                old_len INTEGER NOT NULL,
                new_len INTEGER NOT NULL,
                summary TEXT NOT NULL,

                minor INTEGER NOT NULL DEFAULT 0,
                bot INTEGER NOT NULL DEFAULT 0,
                new_page INTEGER NOT NULL DEFAULT 0,

                origin_ip TEXT NOT NULL DEFAULT '',
                forwarded_for TEXT,
                user_agent TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',

                rejected INTEGER NOT NULL DEFAULT 0,
                rejected_by_id INTEGER,
                rejected_by_name TEXT,
                rejected_automatically INTEGER NOT NULL DEFAULT 0,
                rejected_in_batch INTEGER NOT NULL DEFAULT 0,
                rejected_at TEXT,
                conflict INTEGER NOT NULL DEFAULT 0,
                merged_into INTEGER,

                preloadable INTEGER NOT NULL DEFAULT 0,
                received_at TEXT NOT NULL
            );

            -- At most one preloadable row per (author identity, target).
            CREATE UNIQUE INDEX IF NOT EXISTS idx_preloadable
            ON pending_change(author_key, namespace, title)
            WHERE preloadable = 1;

            -- Folder-style listing of an author's pending work.
            CREATE INDEX IF NOT EXISTS idx_author_pending
            ON pending_change(author_name)
            WHERE rejected = 0 AND conflict = 0 AND merged_into IS NULL;

            CREATE INDEX IF NOT EXISTS idx_rejection_state
            ON pending_change(rejected, rejected_at);

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                by_id INTEGER,
                by_name TEXT NOT NULL,
                namespace INTEGER,
                title TEXT,
                subject_id INTEGER,
                subject_name TEXT,
                change_id INTEGER,
                revision INTEGER,
                affected_count INTEGER,
                at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS author_block (
                author_name TEXT PRIMARY KEY,
                by_id INTEGER,
                by_name TEXT NOT NULL,
                blocked_at TEXT NOT NULL
            ) WITHOUT ROWID;
            "#,
        )
        .map_err(|e| RepositoryError::storage("create initial schema (v0 -> v1)", e.to_string()))
    }
}

/// Map a rusqlite error, turning unique-constraint failures into the typed
/// variant the builder recovers from.
fn map_sqlite_error(operation: &str, err: rusqlite::Error, key: &str) -> RepositoryError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            return RepositoryError::unique_violation(key);
        }
    }
    RepositoryError::storage(operation, err.to_string())
}

fn storage(operation: &'static str) -> impl Fn(rusqlite::Error) -> RepositoryError {
    move |e| RepositoryError::storage(operation, e.to_string())
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_time(operation: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            RepositoryError::storage(operation, format!("bad timestamp '{}': {}", raw, e))
        })
}

fn encode_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn decode_tags(operation: &str, raw: &str) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|e| RepositoryError::storage(operation, format!("bad tags '{}': {}", raw, e)))
}

fn row_to_change(row: &Row<'_>) -> rusqlite::Result<RawChange> {
    Ok(RawChange {
        id: row.get("id")?,
        kind: row.get("kind")?,
        author_id: row.get("author_id")?,
        author_name: row.get("author_name")?,
        author_key: row.get("author_key")?,
        namespace: row.get("namespace")?,
        title: row.get("title")?,
        dest_namespace: row.get("dest_namespace")?,
        dest_title: row.get("dest_title")?,
        stash_key: row.get("stash_key")?,
        base_revision: row.get("base_revision")?,
        content: row.get("content")?,
        old_len: row.get("old_len")?,
        new_len: row.get("new_len")?,
        summary: row.get("summary")?,
        minor: row.get("minor")?,
        bot: row.get("bot")?,
        new_page: row.get("new_page")?,
        origin_ip: row.get("origin_ip")?,
        forwarded_for: row.get("forwarded_for")?,
        user_agent: row.get("user_agent")?,
        tags: row.get("tags")?,
        rejected: row.get("rejected")?,
        rejected_by_id: row.get("rejected_by_id")?,
        rejected_by_name: row.get("rejected_by_name")?,
        rejected_automatically: row.get("rejected_automatically")?,
        rejected_in_batch: row.get("rejected_in_batch")?,
        rejected_at: row.get("rejected_at")?,
        conflict: row.get("conflict")?,
        merged_into: row.get("merged_into")?,
        preloadable: row.get("preloadable")?,
        received_at: row.get("received_at")?,
    })
}

/// Column-level image of a row, decoded into domain types in a second step
/// so rusqlite closures stay fallible only in rusqlite's own error type.
struct RawChange {
    id: i64,
    kind: String,
    author_id: Option<u64>,
    author_name: String,
    author_key: String,
    namespace: i32,
    title: String,
    dest_namespace: Option<i32>,
    dest_title: Option<String>,
    stash_key: Option<String>,
    base_revision: Option<i64>,
    content: String,
    old_len: u64,
    new_len: u64,
    summary: String,
    minor: bool,
    bot: bool,
    new_page: bool,
    origin_ip: String,
    forwarded_for: Option<String>,
    user_agent: String,
    tags: String,
    rejected: bool,
    rejected_by_id: Option<u64>,
    rejected_by_name: Option<String>,
    rejected_automatically: bool,
    rejected_in_batch: bool,
    rejected_at: Option<String>,
    conflict: bool,
    merged_into: Option<i64>,
    preloadable: bool,
    received_at: String,
}

impl RawChange {
    fn decode(self, operation: &str) -> Result<PendingChange, RepositoryError> {
        let kind = match self.kind.as_str() {
            "edit" => ChangeKind::Edit,
            "move" => {
                let (Some(namespace), Some(title)) = (self.dest_namespace, self.dest_title) else {
                    return Err(RepositoryError::storage(
                        operation,
                        format!("move row {} has no destination", self.id),
                    ));
                };
                ChangeKind::Move {
                    destination: PageRef { namespace, title },
                }
            }
            "upload" => {
                let Some(stash_key) = self.stash_key else {
                    return Err(RepositoryError::storage(
                        operation,
                        format!("upload row {} has no stash key", self.id),
                    ));
                };
                ChangeKind::Upload {
                    stash_key: StashKey(stash_key),
                }
            }
            other => {
                return Err(RepositoryError::storage(
                    operation,
                    format!("row {} has unknown kind '{}'", self.id, other),
                ));
            }
        };

        let identity = AuthorIdentity::from_key(&self.author_key).ok_or_else(|| {
            RepositoryError::storage(
                operation,
                format!("row {} has malformed author key '{}'", self.id, self.author_key),
            )
        })?;

        let rejected_by = self.rejected_by_name.map(|name| UserRef {
            id: self.rejected_by_id,
            name,
        });
        let rejected_at = self
            .rejected_at
            .map(|raw| parse_time(operation, &raw))
            .transpose()?;

        Ok(PendingChange {
            id: ChangeId(self.id),
            kind,
            author: UserRef {
                id: self.author_id,
                name: self.author_name,
            },
            identity,
            target: PageRef {
                namespace: self.namespace,
                title: self.title,
            },
            base_revision: self.base_revision.map(RevisionId),
            content: self.content,
            old_len: self.old_len,
            new_len: self.new_len,
            summary: self.summary,
            flags: ChangeFlags {
                minor: self.minor,
                bot: self.bot,
                new_page: self.new_page,
            },
            provenance: Provenance {
                origin_ip: self.origin_ip,
                forwarded_for: self.forwarded_for,
                user_agent: self.user_agent,
                tags: decode_tags(operation, &self.tags)?,
            },
            state: ModerationState {
                rejected: self.rejected,
                rejected_by,
                rejected_automatically: self.rejected_automatically,
                rejected_in_batch: self.rejected_in_batch,
                rejected_at,
                conflict: self.conflict,
                merged_into: self.merged_into.map(RevisionId),
            },
            preloadable: self.preloadable,
            received_at: parse_time(operation, &self.received_at)?,
        })
    }
}

const SELECT_CHANGE: &str = "SELECT id, kind, author_id, author_name, author_key, namespace, \
     title, dest_namespace, dest_title, stash_key, base_revision, content, old_len, new_len, \
     summary, minor, bot, new_page, origin_ip, forwarded_for, user_agent, tags, rejected, \
     rejected_by_id, rejected_by_name, rejected_automatically, rejected_in_batch, rejected_at, \
     conflict, merged_into, preloadable, received_at FROM pending_change";

#[async_trait]
impl ModerationRepository for SqliteRepository {
    async fn insert(&self, change: &PendingChange) -> Result<ChangeId, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let (dest_namespace, dest_title, stash_key) = match &change.kind {
            ChangeKind::Edit => (None, None, None),
            ChangeKind::Move { destination } => (
                Some(destination.namespace),
                Some(destination.title.as_str()),
                None,
            ),
            ChangeKind::Upload { stash_key } => (None, None, Some(stash_key.0.as_str())),
        };

        conn.execute(
            r#"
            INSERT INTO pending_change (
                kind, author_id, author_name, author_key,
                namespace, title, dest_namespace, dest_title, stash_key,
                base_revision, content, old_len, new_len, summary,
                minor, bot, new_page,
                origin_ip, forwarded_for, user_agent, tags,
                rejected, rejected_by_id, rejected_by_name,
                rejected_automatically, rejected_in_batch, rejected_at,
                conflict, merged_into, preloadable, received_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                ?27, ?28, ?29, ?30, ?31
            )
            "#,
            params![
                change.kind.name(),
                change.author.id,
                change.author.name,
                change.author_key(),
                change.target.namespace,
                change.target.title,
                dest_namespace,
                dest_title,
                stash_key,
                change.base_revision.map(|r| r.0),
                change.content,
                change.old_len,
                change.new_len,
                change.summary,
                change.flags.minor,
                change.flags.bot,
                change.flags.new_page,
                change.provenance.origin_ip,
                change.provenance.forwarded_for,
                change.provenance.user_agent,
                encode_tags(&change.provenance.tags),
                change.state.rejected,
                change.state.rejected_by.as_ref().and_then(|u| u.id),
                change.state.rejected_by.as_ref().map(|u| u.name.as_str()),
                change.state.rejected_automatically,
                change.state.rejected_in_batch,
                change.state.rejected_at.map(format_time),
                change.state.conflict,
                change.state.merged_into.map(|r| r.0),
                change.preloadable,
                format_time(change.received_at),
            ],
        )
        .map_err(|e| {
            map_sqlite_error(
                "insert change",
                e,
                &format!("{} on {}", change.author_key(), change.target),
            )
        })?;

        Ok(ChangeId(conn.last_insert_rowid()))
    }

    async fn amend(&self, id: ChangeId, amend: &PendingAmend) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let updated = conn
            .execute(
                "UPDATE pending_change
                 SET content = ?1, new_len = ?2, summary = ?3, received_at = ?4
                 WHERE id = ?5 AND preloadable = 1 AND merged_into IS NULL",
                params![
                    amend.content,
                    amend.new_len,
                    amend.summary,
                    format_time(amend.received_at),
                    id.0
                ],
            )
            .map_err(storage("amend change"))?;
        Ok(updated > 0)
    }

    async fn get(&self, id: ChangeId) -> Result<Option<PendingChange>, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let raw = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_CHANGE),
                params![id.0],
                row_to_change,
            )
            .optional()
            .map_err(storage("get change"))?;
        raw.map(|raw| raw.decode("get change")).transpose()
    }

    async fn delete(&self, id: ChangeId) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let deleted = conn
            .execute("DELETE FROM pending_change WHERE id = ?1", params![id.0])
            .map_err(storage("delete change"))?;
        Ok(deleted > 0)
    }

    async fn find_preloadable(
        &self,
        author_key: &str,
        target: &PageRef,
    ) -> Result<Option<PendingChange>, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let raw = conn
            .query_row(
                &format!(
                    "{} WHERE author_key = ?1 AND namespace = ?2 AND title = ?3 \
                     AND preloadable = 1",
                    SELECT_CHANGE
                ),
                params![author_key, target.namespace, target.title],
                row_to_change,
            )
            .optional()
            .map_err(storage("find preloadable change"))?;
        raw.map(|raw| raw.decode("find preloadable change"))
            .transpose()
    }

    async fn list_pending_by_author(
        &self,
        author_name: &str,
    ) -> Result<Vec<PendingChange>, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE author_name = ?1 AND rejected = 0 AND conflict = 0 \
                 AND merged_into IS NULL ORDER BY id",
                SELECT_CHANGE
            ))
            .map_err(storage("list pending by author"))?;
        let rows = stmt
            .query_map(params![author_name], row_to_change)
            .map_err(storage("list pending by author"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage("list pending by author"))?;
        rows.into_iter()
            .map(|raw| raw.decode("list pending by author"))
            .collect()
    }

    async fn list_all(&self) -> Result<Vec<PendingChange>, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY id", SELECT_CHANGE))
            .map_err(storage("list changes"))?;
        let rows = stmt
            .query_map([], row_to_change)
            .map_err(storage("list changes"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage("list changes"))?;
        rows.into_iter()
            .map(|raw| raw.decode("list changes"))
            .collect()
    }

    async fn mark_rejected(
        &self,
        id: ChangeId,
        by: &UserRef,
        automatic: bool,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let (by_id, by_name) = if automatic {
            (None, None)
        } else {
            (by.id, Some(by.name.as_str()))
        };
        let updated = conn
            .execute(
                "UPDATE pending_change
                 SET rejected = 1, rejected_by_id = ?1, rejected_by_name = ?2,
                     rejected_automatically = ?3, rejected_at = ?4,
                     preloadable = CASE WHEN ?3 THEN preloadable ELSE 0 END
                 WHERE id = ?5 AND rejected = 0 AND merged_into IS NULL",
                params![by_id, by_name, automatic, format_time(at), id.0],
            )
            .map_err(storage("mark rejected"))?;
        Ok(updated > 0)
    }

    async fn reject_all_by_author(
        &self,
        author_name: &str,
        by: &UserRef,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let updated = conn
            .execute(
                "UPDATE pending_change
                 SET rejected = 1, rejected_by_id = ?1, rejected_by_name = ?2,
                     rejected_in_batch = 1, rejected_at = ?3, preloadable = 0
                 WHERE author_name = ?4 AND rejected = 0 AND conflict = 0
                   AND merged_into IS NULL",
                params![by.id, by.name, format_time(at), author_name],
            )
            .map_err(storage("reject all by author"))?;
        Ok(updated as u64)
    }

    async fn mark_conflict(&self, id: ChangeId) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let updated = conn
            .execute(
                "UPDATE pending_change SET conflict = 1
                 WHERE id = ?1 AND merged_into IS NULL",
                params![id.0],
            )
            .map_err(storage("mark conflict"))?;
        Ok(updated > 0)
    }

    async fn mark_merged(
        &self,
        id: ChangeId,
        revision: RevisionId,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let updated = conn
            .execute(
                "UPDATE pending_change SET merged_into = ?1, preloadable = 0
                 WHERE id = ?2 AND merged_into IS NULL",
                params![revision.0, id.0],
            )
            .map_err(storage("mark merged"))?;
        Ok(updated > 0)
    }

    async fn is_blocked(&self, author_name: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM author_block WHERE author_name = ?1",
                params![author_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage("check block"))?;
        Ok(found.is_some())
    }

    async fn set_block(
        &self,
        author_name: &str,
        by: &UserRef,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO author_block (author_name, by_id, by_name, blocked_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![author_name, by.id, by.name, format_time(at)],
            )
            .map_err(storage("set block"))?;
        Ok(inserted > 0)
    }

    async fn clear_block(&self, author_name: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let deleted = conn
            .execute(
                "DELETE FROM author_block WHERE author_name = ?1",
                params![author_name],
            )
            .map_err(storage("clear block"))?;
        Ok(deleted > 0)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO audit_log (
                action, by_id, by_name, namespace, title,
                subject_id, subject_name, change_id, revision, affected_count, at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                entry.action.name(),
                entry.performed_by.id,
                entry.performed_by.name,
                entry.target.as_ref().map(|t| t.namespace),
                entry.target.as_ref().map(|t| t.title.as_str()),
                entry.subject.as_ref().and_then(|u| u.id),
                entry.subject.as_ref().map(|u| u.name.as_str()),
                entry.change.map(|c| c.0),
                entry.revision.map(|r| r.0),
                entry.count,
                format_time(entry.at),
            ],
        )
        .map_err(storage("append audit entry"))?;
        Ok(())
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>, RepositoryError> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT action, by_id, by_name, namespace, title, subject_id, subject_name, \
                 change_id, revision, affected_count, at FROM audit_log ORDER BY id",
            )
            .map_err(storage("list audit entries"))?;

        struct RawAudit {
            action: String,
            by_id: Option<u64>,
            by_name: String,
            namespace: Option<i32>,
            title: Option<String>,
            subject_id: Option<u64>,
            subject_name: Option<String>,
            change_id: Option<i64>,
            revision: Option<i64>,
            affected_count: Option<u64>,
            at: String,
        }

        let rows = stmt
            .query_map([], |row| {
                Ok(RawAudit {
                    action: row.get(0)?,
                    by_id: row.get(1)?,
                    by_name: row.get(2)?,
                    namespace: row.get(3)?,
                    title: row.get(4)?,
                    subject_id: row.get(5)?,
                    subject_name: row.get(6)?,
                    change_id: row.get(7)?,
                    revision: row.get(8)?,
                    affected_count: row.get(9)?,
                    at: row.get(10)?,
                })
            })
            .map_err(storage("list audit entries"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage("list audit entries"))?;

        rows.into_iter()
            .map(|raw| {
                let action = AuditAction::from_name(&raw.action).ok_or_else(|| {
                    RepositoryError::storage(
                        "list audit entries",
                        format!("unknown audit action '{}'", raw.action),
                    )
                })?;
                let target = match (raw.namespace, raw.title) {
                    (Some(namespace), Some(title)) => Some(PageRef { namespace, title }),
                    _ => None,
                };
                Ok(AuditEntry {
                    action,
                    performed_by: UserRef {
                        id: raw.by_id,
                        name: raw.by_name,
                    },
                    target,
                    subject: raw.subject_name.map(|name| UserRef {
                        id: raw.subject_id,
                        name,
                    }),
                    change: raw.change_id.map(ChangeId),
                    revision: raw.revision.map(RevisionId),
                    count: raw.affected_count,
                    at: parse_time("list audit entries", &raw.at)?,
                })
            })
            .collect()
    }
}
