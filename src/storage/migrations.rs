//! Database migrations for Phloem
//!
//! Migrations are additive-only: later versions add columns with defaults
//! through ALTER TABLE statements that succeed-or-ignore. Nothing ever drops
//! or renames a column; readers tolerate NULLs in every added column.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 4;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version < 3 {
        migrate_v3(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v4(conn)?;
    }

    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Memories: vectors and tag lists stored as JSON text
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            context TEXT,
            embedding TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memories_created_at
            ON memories(created_at DESC);

        -- Tag association table (join side of tag-filtered queries)
        CREATE TABLE IF NOT EXISTS tags (
            memory_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (memory_id, tag),
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);

        -- Citations: anchors to file/line ranges
        CREATE TABLE IF NOT EXISTS citations (
            id TEXT PRIMARY KEY,
            memory_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            commit_hash TEXT,
            snapshot TEXT,
            confidence REAL NOT NULL DEFAULT 1.0,
            verified_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (memory_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_citations_memory ON citations(memory_id);
        CREATE INDEX IF NOT EXISTS idx_citations_path ON citations(file_path);

        -- Edges: directed typed relations; at most one edge per (source, target, type)
        CREATE TABLE IF NOT EXISTS edges (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            target_id TEXT,
            edge_type TEXT NOT NULL,
            payload TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(source_id, target_id, edge_type),
            FOREIGN KEY (source_id) REFERENCES memories(id) ON DELETE CASCADE,
            FOREIGN KEY (target_id) REFERENCES memories(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_edges_source_type ON edges(source_id, edge_type);
        CREATE INDEX IF NOT EXISTS idx_edges_target_type ON edges(target_id, edge_type);

        -- Scopes: recorded, never interpreted
        CREATE TABLE IF NOT EXISTS scopes (
            name TEXT PRIMARY KEY,
            scope_type TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Vector index bookkeeping
        CREATE TABLE IF NOT EXISTS vec_map (
            rowid INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS vec_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

/// v2: utility score and scope partitioning
fn migrate_v2(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "memories", "utility_score REAL NOT NULL DEFAULT 1.0")?;
    add_column_if_missing(conn, "memories", "scope TEXT")?;
    conn.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    Ok(())
}

/// v3: content hash for deduplication
fn migrate_v3(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "memories", "content_hash TEXT")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memories_content_hash ON memories(content_hash)",
        [],
    )?;
    conn.execute("INSERT INTO schema_version (version) VALUES (3)", [])?;
    Ok(())
}

/// v4: source attribution for imported memories
fn migrate_v4(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "memories", "source TEXT")?;
    conn.execute("INSERT INTO schema_version (version) VALUES (4)", [])?;
    Ok(())
}

/// ALTER TABLE ... ADD COLUMN that tolerates the column already existing
fn add_column_if_missing(conn: &Connection, table: &str, column_def: &str) -> Result<()> {
    let sql = format!("ALTER TABLE {} ADD COLUMN {}", table, column_def);
    match conn.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("duplicate column name") => Ok(()),
        Err(e) => Err(e.into()),
    }
}
