/**
 * Graph Store Schema
 *
 * One `nodes` table for entities (C2) and one `edges` table for
 * relationships (C3), plus the durable message log (C4) and job queue (C6)
 * tables, since all of them live behind the same per-tenant SQLite file.
 * Idempotent: `CREATE TABLE IF NOT EXISTS` so initialize() can run on
 * every connection open.
 */
use rusqlite::Connection;

pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            metadata TEXT NOT NULL,
            structured TEXT NOT NULL,
            name_embedding TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_nodes_tenant_kind ON nodes (tenant_id, kind);

        CREATE TABLE IF NOT EXISTS edges (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(source_id, target_id, kind)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_tenant_source ON edges (tenant_id, source_id);
        CREATE INDEX IF NOT EXISTS idx_edges_tenant_target ON edges (tenant_id, target_id);

        CREATE TABLE IF NOT EXISTS messages (
            agent_id TEXT NOT NULL,
            message_num INTEGER NOT NULL,
            tenant_id TEXT NOT NULL,
            role TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (agent_id, message_num)
        );

        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_tenant_status ON jobs (tenant_id, status);
        ",
    )
}
