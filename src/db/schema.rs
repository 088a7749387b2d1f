// Database schema — table creation and migrations.
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run, and each migration is a function that
// executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent — safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS regions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            primary_outlet_id TEXT NOT NULL,
            telegram_channel TEXT,
            neighbors TEXT NOT NULL DEFAULT '[]',      -- JSON array of region codes
            local_hashtags TEXT NOT NULL DEFAULT '[]', -- JSON array
            config TEXT NOT NULL DEFAULT '{}',         -- JSON RegionConfig
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS communities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region_id INTEGER NOT NULL REFERENCES regions(id),
            external_id INTEGER NOT NULL,
            screen_name TEXT,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_checked TEXT,
            post_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(external_id, region_id)
        );

        CREATE TABLE IF NOT EXISTS credentials (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            secret TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_used TEXT,
            last_validated TEXT,
            status TEXT NOT NULL DEFAULT 'unknown',
            error_message TEXT,
            permissions TEXT NOT NULL DEFAULT '[]',    -- JSON array
            user_info TEXT,                            -- JSON, nullable
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            community_id INTEGER NOT NULL REFERENCES communities(id),
            region_id INTEGER NOT NULL REFERENCES regions(id),
            external_owner_id INTEGER NOT NULL,
            external_post_id INTEGER NOT NULL,
            published_at INTEGER NOT NULL,             -- unix seconds
            text TEXT NOT NULL DEFAULT '',
            attachments TEXT NOT NULL DEFAULT '[]',     -- JSON array of media ids
            views INTEGER NOT NULL DEFAULT 0,
            likes INTEGER NOT NULL DEFAULT 0,
            reposts INTEGER NOT NULL DEFAULT 0,
            comments INTEGER NOT NULL DEFAULT 0,
            ai_category TEXT,
            ai_score REAL NOT NULL DEFAULT 50.0,
            sentiment_label TEXT,
            status TEXT NOT NULL DEFAULT 'new',
            rejection_reason TEXT,
            fingerprint_lip TEXT NOT NULL UNIQUE,
            fingerprint_text_full TEXT NOT NULL,
            fingerprint_text_core TEXT NOT NULL,
            fingerprint_media TEXT NOT NULL DEFAULT '[]',
            fingerprint_version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_text_full ON posts(fingerprint_text_full);
        CREATE INDEX IF NOT EXISTS idx_posts_text_core ON posts(fingerprint_text_core);
        CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status);
        CREATE INDEX IF NOT EXISTS idx_posts_region_status ON posts(region_id, status);
        CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts(published_at);

        CREATE TABLE IF NOT EXISTS engagement_samples (
            region_id INTEGER NOT NULL REFERENCES regions(id),
            hour INTEGER NOT NULL,
            weekday INTEGER NOT NULL,
            sample_count INTEGER NOT NULL DEFAULT 0,
            avg_engagement REAL NOT NULL DEFAULT 0.0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (region_id, hour, weekday)
        );

        CREATE TABLE IF NOT EXISTS carousel_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region_code TEXT NOT NULL,
            credential_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            queued_at TEXT NOT NULL DEFAULT (datetime('now')),
            started_at TEXT,
            completed_at TEXT,
            posts_retrieved INTEGER NOT NULL DEFAULT 0,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_region ON carousel_tasks(region_code);

        CREATE TABLE IF NOT EXISTS digests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region_id INTEGER NOT NULL REFERENCES regions(id),
            category TEXT NOT NULL,
            post_ids TEXT NOT NULL DEFAULT '[]',        -- JSON array of post ids, in order
            scheduled_at TEXT NOT NULL,
            template_snapshot TEXT NOT NULL DEFAULT '{}',
            cancelled INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Scheduler state: last-scan timestamps and currently-running claims.
        CREATE TABLE IF NOT EXISTS scan_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Operator-maintained blacklists.
        CREATE TABLE IF NOT EXISTS blacklist_ids (
            external_id INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS blacklist_words (
            word TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS region_keywords (
            region_id INTEGER NOT NULL REFERENCES regions(id),
            keyword TEXT NOT NULL,
            PRIMARY KEY (region_id, keyword)
        );
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
#[allow(dead_code)]
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_table_count() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        let count = table_count(&conn).unwrap();
        assert_eq!(count, 11i64);
    }

    #[test]
    fn test_fingerprint_lip_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO regions (code, name, primary_outlet_id) VALUES ('spb', 'SPb', 'outlet-1')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO communities (region_id, external_id, name, category) VALUES (1, -100, 'Group', 'news')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO posts (community_id, region_id, external_owner_id, external_post_id, published_at, fingerprint_lip, fingerprint_text_full, fingerprint_text_core)
             VALUES (1, 1, -100, 1, 0, '-100_1', 'a', 'a')",
            [],
        )
        .unwrap();
        let err = conn.execute(
            "INSERT INTO posts (community_id, region_id, external_owner_id, external_post_id, published_at, fingerprint_lip, fingerprint_text_full, fingerprint_text_core)
             VALUES (1, 1, -100, 1, 0, '-100_1', 'b', 'b')",
            [],
        );
        assert!(err.is_err());
    }
}
