//! DDL statements and migrations for the Dolt (MySQL-dialect) schema.
//!
//! Shares column layout and naming with `sqlite/schema.rs` wherever Dolt's
//! SQL dialect permits it verbatim. The departures are mechanical: `TEXT`
//! columns that are indexed need a `VARCHAR` length instead (InnoDB can't
//! index a bare `TEXT`/`BLOB`), `AUTOINCREMENT` becomes `AUTO_INCREMENT`,
//! `INSERT OR IGNORE`/`INSERT OR REPLACE` become `INSERT IGNORE`/`REPLACE
//! INTO`, and the SQLite `strftime(...)` column defaults are dropped since
//! every write path supplies its own timestamp explicitly. `key` is a
//! reserved word in MySQL, so the config/metadata tables backtick it.

/// Current schema version. Bumped whenever DDL or migrations change.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Core DDL statements executed during `init_schema`.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Issues table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id                  VARCHAR(64) PRIMARY KEY,
        content_hash        VARCHAR(128) DEFAULT '',
        title               TEXT NOT NULL,
        description         TEXT NOT NULL,
        design              TEXT NOT NULL,
        acceptance_criteria TEXT NOT NULL,
        notes               TEXT NOT NULL,
        status              VARCHAR(32) NOT NULL DEFAULT 'open',
        priority            INT NOT NULL DEFAULT 2,
        issue_type          VARCHAR(32) NOT NULL DEFAULT 'task',
        assignee            VARCHAR(255) DEFAULT '',
        estimated_minutes   INT,
        created_at          VARCHAR(32) NOT NULL,
        created_by          VARCHAR(255) DEFAULT '',
        owner               VARCHAR(255) DEFAULT '',
        updated_at          VARCHAR(32) NOT NULL,
        closed_at           VARCHAR(32),
        closed_by_session   VARCHAR(255) DEFAULT '',
        deleted_at          VARCHAR(32),
        external_ref        VARCHAR(255),
        spec_id             VARCHAR(255),
        ephemeral           TINYINT(1) DEFAULT 0,
        pinned              TINYINT(1) DEFAULT 0,
        is_template         TINYINT(1) DEFAULT 0,
        crystallizes        TINYINT(1) DEFAULT 0,
        source_system       VARCHAR(64) DEFAULT '',
        metadata            TEXT DEFAULT ('{}'),
        source_repo         VARCHAR(255) DEFAULT '',
        close_reason        TEXT,
        -- Gate fields
        await_type          VARCHAR(64) DEFAULT '',
        await_id            VARCHAR(255) DEFAULT '',
        timeout_ns          BIGINT DEFAULT 0,
        waiters             TEXT DEFAULT ('[]'),
        -- Agent fields
        hook_bead           VARCHAR(255) DEFAULT '',
        role_bead           VARCHAR(255) DEFAULT '',
        agent_state         VARCHAR(64) DEFAULT '',
        last_activity       VARCHAR(32),
        -- Time-based scheduling
        due_at              VARCHAR(32),
        defer_until         VARCHAR(32)
    )
    "#,
    // -- Indexes on issues ---------------------------------------------------
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee)",
    "CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_spec_id ON issues(spec_id)",
    "CREATE INDEX IF NOT EXISTS idx_issues_external_ref ON issues(external_ref)",
    // -- Dependencies table --------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      VARCHAR(64) NOT NULL,
        depends_on_id VARCHAR(64) NOT NULL,
        type          VARCHAR(32) NOT NULL DEFAULT 'blocks',
        created_at    VARCHAR(32) NOT NULL,
        created_by    VARCHAR(255) NOT NULL,
        metadata      TEXT DEFAULT ('{}'),
        thread_id     VARCHAR(255) DEFAULT '',
        PRIMARY KEY (issue_id, depends_on_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_type ON dependencies(depends_on_id, type)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_thread ON dependencies(thread_id)",
    // -- Labels table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id VARCHAR(64) NOT NULL,
        label    VARCHAR(255) NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    // -- Comments table ------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id         BIGINT PRIMARY KEY AUTO_INCREMENT,
        issue_id   VARCHAR(64) NOT NULL,
        author     VARCHAR(255) NOT NULL,
        text       TEXT NOT NULL,
        created_at VARCHAR(32) NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_created_at ON comments(created_at)",
    // -- Events table (audit trail) ------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          BIGINT PRIMARY KEY AUTO_INCREMENT,
        issue_id    VARCHAR(64) NOT NULL,
        event_type  VARCHAR(64) NOT NULL,
        actor       VARCHAR(255) NOT NULL,
        old_value   TEXT,
        new_value   TEXT,
        comment     TEXT,
        created_at  VARCHAR(32) NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    // -- Config table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        `key` VARCHAR(255) PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Metadata table ------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        `key` VARCHAR(255) PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Dirty-issue tracking (for incremental JSONL export) -----------------
    r#"
    CREATE TABLE IF NOT EXISTS dirty_issues (
        id         VARCHAR(64) PRIMARY KEY,
        dirtied_at VARCHAR(32) NOT NULL
    )
    "#,
    // -- Export content hashes (to skip unchanged issues on export) ----------
    r#"
    CREATE TABLE IF NOT EXISTS export_hashes (
        id           VARCHAR(64) PRIMARY KEY,
        content_hash VARCHAR(128) NOT NULL
    )
    "#,
    // -- Per-prefix counters for sequential child ID allocation --------------
    r#"
    CREATE TABLE IF NOT EXISTS child_counters (
        parent_id VARCHAR(64) PRIMARY KEY,
        next_seq  INT NOT NULL DEFAULT 1
    )
    "#,
    // -- Ready/blocked views --------------------------------------------------
    r#"
    CREATE OR REPLACE VIEW blocked_issues AS
    SELECT DISTINCT i.id
    FROM issues i
    INNER JOIN dependencies d ON d.issue_id = i.id
    INNER JOIN issues blocker ON blocker.id = d.depends_on_id
    WHERE i.status = 'open'
      AND d.type IN ('blocks', 'parent-child')
      AND blocker.status IN ('open', 'in_progress', 'blocked', 'deferred', 'hooked')
    "#,
    r#"
    CREATE OR REPLACE VIEW ready_issues AS
    SELECT i.id
    FROM issues i
    WHERE i.status = 'open'
      AND i.id NOT IN (SELECT id FROM blocked_issues)
    "#,
];

/// Default configuration values inserted on first init.
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[("issue_prefix", "bd"), ("hierarchy.max_depth", "5")];

/// Schema migrations applied after initial DDL.
///
/// Each migration is a `(name, sql)` pair. Migrations are tracked in the
/// `metadata` table under the key `migration:<name>` so they run at most once.
pub const MIGRATIONS: &[(&str, &str)] = &[
    // Future migrations go here, e.g.:
    // ("001_add_foo_column", "ALTER TABLE issues ADD COLUMN foo TEXT"),
];
