//! DDL statements and migrations for the SQLite schema.
//!
//! Timestamps are stored as TEXT in ISO 8601 format (SQLite has no native
//! datetime type). Booleans are INTEGER 0/1. The `extra` column carries the
//! JSON object of fields this version does not model, so foreign mirror data
//! survives a round trip through the store.

/// Current schema version. Bumped whenever DDL or migrations change.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Core DDL statements executed during `init_schema`.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Issues table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id                  TEXT PRIMARY KEY,
        content_hash        TEXT NOT NULL DEFAULT '',
        title               TEXT NOT NULL,
        description         TEXT NOT NULL DEFAULT '',
        design              TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        notes               TEXT NOT NULL DEFAULT '',
        status              TEXT NOT NULL DEFAULT 'open',
        priority            INTEGER NOT NULL DEFAULT 2,
        issue_type          TEXT NOT NULL DEFAULT 'task',
        assignee            TEXT NOT NULL DEFAULT '',
        estimated_minutes   INTEGER,
        created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by          TEXT NOT NULL DEFAULT '',
        updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        closed_at           TEXT,
        close_reason        TEXT NOT NULL DEFAULT '',
        ephemeral           INTEGER NOT NULL DEFAULT 0,
        compaction_level    INTEGER NOT NULL DEFAULT 0,
        spec_id             TEXT NOT NULL DEFAULT '',
        spec_changed_at     TEXT,
        extra               TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    // -- Indexes on issues ---------------------------------------------------
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee)",
    "CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_spec_id ON issues(spec_id)",
    // -- Dependencies table --------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type          TEXT NOT NULL DEFAULT 'blocks',
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by    TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (issue_id, depends_on_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_type ON dependencies(depends_on_id, type)",
    // -- Labels table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label    TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    // -- Comments table ------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL,
        author     TEXT NOT NULL,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id)",
    // -- Events table (append-only audit trail) ------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id    TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        actor       TEXT NOT NULL,
        old_value   TEXT,
        new_value   TEXT,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    // -- Config table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Metadata table (sync bookkeeping) ------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

/// Default configuration values inserted on first init.
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[
    ("flush_debounce_secs", "5"),
    ("flush_failure_threshold", "3"),
    ("id_mode", "hash"),
];

/// Metadata keys the sync layer maintains.
pub mod metadata_keys {
    pub const TEXT_HASH: &str = "text_hash";
    pub const EXPORT_HASHES: &str = "export_hashes";
    pub const LAST_EXPORT_AT: &str = "last_export_at";
    pub const LAST_BRAID_VERSION: &str = "last_braid_version";
    pub const LAST_ACTIVITY_AT: &str = "last_activity_at";
    pub const ID_SEQUENCE: &str = "id_seq";
}

/// Schema migrations applied after initial DDL.
///
/// Each migration is a `(name, sql)` pair, tracked in the `metadata` table
/// under `migration:<name>` so it runs at most once.
pub const MIGRATIONS: &[(&str, &str)] = &[
    // Future migrations go here, e.g.:
    // ("001_add_foo_column", "ALTER TABLE issues ADD COLUMN foo TEXT DEFAULT ''"),
];
