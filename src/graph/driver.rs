/**
 * Graph Driver (C1)
 *
 * DESIGN DECISION: One SQLite file per tenant under a shared base directory,
 * each behind its own `Arc<std::sync::Mutex<Connection>>`.
 * WHY: The production graph store is an external collaborator (out of
 * scope per spec); this stands in for it while preserving the concurrency
 * contract the spec actually cares about: writes against a single tenant
 * are serialized, reads are concurrent, and no query can cross tenants
 * because tenants simply don't share a file.
 *
 * REASONING CHAIN:
 * 1. rusqlite::Connection is Send but not Sync, so concurrent access needs
 *    either one mutex per connection or one connection per caller.
 * 2. A per-tenant `Mutex<Connection>` gives exactly the serialized-writes-
 *    per-tenant contract without serializing tenant B behind tenant A.
 * 3. Reads open a short-lived connection of their own (SQLite's WAL mode
 *    allows concurrent readers alongside a writer) so read() never blocks
 *    on write().
 * 4. blocking rusqlite calls run on tokio's blocking pool via spawn_blocking
 *    so the async runtime is never stalled by a disk-bound query.
 *
 * PATTERN: Pattern-001 (tenant-scoped connection handle), grounded on
 * shared_knowledge/database.rs's Arc<Mutex<Connection>> handle and
 * vector_store/sqlite.rs's WAL-mode setup.
 */
use crate::error::{Error, Result};
use crate::tenant::TenantId;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio::task;

/// Per-tenant-serialized, tenant-isolated graph connection handle.
pub struct GraphDriver {
    base_dir: PathBuf,
    handles: RwLock<HashMap<TenantId, Arc<StdMutex<Connection>>>>,
}

impl GraphDriver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            handles: RwLock::new(HashMap::new()),
        }
    }

    fn db_path(&self, tenant: &TenantId) -> PathBuf {
        self.base_dir.join(format!("{}.sibyl.sqlite", tenant.as_str()))
    }

    /// Get or lazily open this tenant's write connection, running schema
    /// initialization exactly once per tenant per process.
    async fn write_handle(&self, tenant: &TenantId) -> Result<Arc<StdMutex<Connection>>> {
        if let Some(handle) = self.handles.read().await.get(tenant) {
            return Ok(handle.clone());
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(tenant) {
            return Ok(handle.clone());
        }

        let path = self.db_path(tenant);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Transient(format!("failed to create graph directory: {e}")))?;
        }

        let conn = task::spawn_blocking({
            let path = path.clone();
            move || -> Result<Connection> {
                let conn = Connection::open(&path)
                    .map_err(|e| Error::Transient(format!("failed to open graph store: {e}")))?;
                conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                    .map_err(|e| Error::Transient(format!("failed to enable WAL: {e}")))?;
                crate::graph::schema::initialize(&conn)?;
                Ok(conn)
            }
        })
        .await
        .map_err(|e| Error::Fatal(format!("graph driver task panicked: {e}")))??;

        let handle = Arc::new(StdMutex::new(conn));
        handles.insert(tenant.clone(), handle.clone());
        Ok(handle)
    }

    /// Serialized write against this tenant's graph. `f` runs on the
    /// blocking thread pool while holding this tenant's connection mutex.
    pub async fn write<T, F>(&self, tenant: &TenantId, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let handle = self.write_handle(tenant).await?;
        task::spawn_blocking(move || {
            let conn = handle.lock().map_err(|_| {
                Error::Fatal("graph write connection mutex poisoned".to_string())
            })?;
            f(&conn).map_err(Error::from)
        })
        .await
        .map_err(|e| Error::Fatal(format!("graph write task panicked: {e}")))?
    }

    /// Multi-statement write against this tenant's graph, committed or
    /// rolled back as one unit. Used where C2/C3 need an entity write and
    /// its structured-property write to land atomically.
    pub async fn transaction<T, F>(&self, tenant: &TenantId, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        let handle = self.write_handle(tenant).await?;
        task::spawn_blocking(move || {
            let mut conn = handle.lock().map_err(|_| {
                Error::Fatal("graph write connection mutex poisoned".to_string())
            })?;
            let tx = conn.transaction().map_err(Error::from)?;
            let result = f(&tx).map_err(Error::from)?;
            tx.commit().map_err(Error::from)?;
            Ok(result)
        })
        .await
        .map_err(|e| Error::Fatal(format!("graph transaction task panicked: {e}")))?
    }

    /// Concurrent read against this tenant's graph on a fresh connection.
    pub async fn read<T, F>(&self, tenant: &TenantId, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        // Ensure the tenant's store (and schema) exists before reading.
        self.write_handle(tenant).await?;
        let path = self.db_path(tenant);
        task::spawn_blocking(move || -> Result<T> {
            let conn = Connection::open(&path)
                .map_err(|e| Error::Transient(format!("failed to open graph store: {e}")))?;
            f(&conn).map_err(Error::from)
        })
        .await
        .map_err(|e| Error::Fatal(format!("graph read task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let dir = tempdir().unwrap();
        let driver = GraphDriver::new(dir.path());
        let tenant = TenantId::new("acme");

        let result: Result<()> = driver
            .transaction(&tenant, |tx| {
                tx.execute(
                    "INSERT INTO nodes (id, tenant_id, kind, name, metadata, structured, created_at, updated_at) \
                     VALUES ('e1', 'acme', 'note', 'n', '{}', '{}', '2026-01-01', '2026-01-01')",
                    [],
                )?;
                // Force a rollback: duplicate primary key.
                tx.execute(
                    "INSERT INTO nodes (id, tenant_id, kind, name, metadata, structured, created_at, updated_at) \
                     VALUES ('e1', 'acme', 'note', 'n', '{}', '{}', '2026-01-01', '2026-01-01')",
                    [],
                )?;
                Ok(())
            })
            .await;
        assert!(result.is_err());

        let count: i64 = driver
            .read(&tenant, |conn| conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_tenant_isolation_separate_files() {
        let dir = tempdir().unwrap();
        let driver = GraphDriver::new(dir.path());
        let t1 = TenantId::new("t1");
        let t2 = TenantId::new("t2");

        driver
            .write(&t1, |conn| {
                conn.execute(
                    "INSERT INTO nodes (id, tenant_id, kind, name, metadata, structured, created_at, updated_at) \
                     VALUES ('e1', 't1', 'note', 'n', '{}', '{}', '2026-01-01', '2026-01-01')",
                    [],
                )
            })
            .await
            .unwrap();

        let seen_in_t2: i64 = driver
            .read(&t2, |conn| {
                conn.query_row("SELECT COUNT(*) FROM nodes WHERE id = 'e1'", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(seen_in_t2, 0);

        let seen_in_t1: i64 = driver
            .read(&t1, |conn| {
                conn.query_row("SELECT COUNT(*) FROM nodes WHERE id = 'e1'", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(seen_in_t1, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writes_serialize_without_deadlock() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(GraphDriver::new(dir.path()));
        let tenant = TenantId::new("acme");

        let mut handles = Vec::new();
        for i in 0..10 {
            let driver = driver.clone();
            let tenant = tenant.clone();
            handles.push(tokio::spawn(async move {
                driver
                    .write(&tenant, move |conn| {
                        conn.execute(
                            "INSERT INTO nodes (id, tenant_id, kind, name, metadata, structured, created_at, updated_at) \
                             VALUES (?1, 'acme', 'note', 'n', '{}', '{}', '2026-01-01', '2026-01-01')",
                            rusqlite::params![format!("e{i}")],
                        )
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let count: i64 = driver
            .read(&tenant, |conn| conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 10);
    }
}
