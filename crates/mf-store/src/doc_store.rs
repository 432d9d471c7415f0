use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_rusqlite::Connection;

use mf_core::DomainError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Db(db) => db_fault(&db.to_string()),
            StoreError::Serde(e) => DomainError::internal(format!("document decode failed: {e}")),
        }
    }
}

/// Map a database failure message onto the taxonomy. Missing-index
/// style failures surface as failed preconditions so clients can tell
/// an operator problem apart from a server bug.
fn db_fault(message: &str) -> DomainError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("no such index") || lowered.contains("no such table") {
        DomainError::precondition("MISSING_INDEX", message.to_string())
    } else {
        DomainError::internal(message.to_string())
    }
}

fn sql_err(err: rusqlite::Error) -> DomainError {
    db_fault(&err.to_string())
}

fn ts(dt: DateTime<Utc>) -> String {
    // Fixed-precision RFC 3339 so lexicographic ordering matches time.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// DocKeys
// ---------------------------------------------------------------------------

/// Indexed key columns stored alongside a document.
#[derive(Debug, Clone, Default)]
pub struct DocKeys {
    /// Owning principal (member uid, borrower uid, agent uid).
    pub owner: Option<String>,
    /// Secondary grouping key (station id, agent client id).
    pub scope: Option<String>,
    /// Exact-match lookup key (arrival-token lookup, event kind).
    pub lookup: Option<String>,
}

impl DocKeys {
    pub fn owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_lookup(mut self, lookup: impl Into<String>) -> Self {
        self.lookup = Some(lookup.into());
        self
    }
}

// ---------------------------------------------------------------------------
// DocStore
// ---------------------------------------------------------------------------

/// SQLite-backed document store.
///
/// One table holds every collection; documents are JSON text bodies
/// with denormalized key columns for the indexed query shapes.
pub struct DocStore {
    conn: Connection,
}

impl DocStore {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// Purely in-memory database (used by tests).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS documents (
                        collection  TEXT NOT NULL,
                        id          TEXT NOT NULL,
                        data        TEXT NOT NULL,
                        owner_key   TEXT,
                        scope_key   TEXT,
                        lookup_key  TEXT,
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL,
                        PRIMARY KEY (collection, id)
                    );

                    CREATE INDEX IF NOT EXISTS idx_documents_owner
                        ON documents(collection, owner_key, created_at DESC);
                    CREATE INDEX IF NOT EXISTS idx_documents_scope
                        ON documents(collection, scope_key);
                    CREATE INDEX IF NOT EXISTS idx_documents_lookup
                        ON documents(collection, lookup_key);
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Run `f` inside a single SQLite transaction.
    ///
    /// A domain error from `f` rolls the transaction back and is
    /// returned unchanged; database failures map onto the taxonomy via
    /// [`StoreError`]. Closures must be re-entrant: on contention the
    /// caller may retry with identical effects.
    pub async fn with_tx<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&mut TxContext<'_>) -> Result<T, DomainError> + Send + 'static,
        T: Send + 'static,
    {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut ctx = TxContext { tx: &tx };
                match f(&mut ctx) {
                    Ok(value) => {
                        tx.commit()?;
                        Ok(Ok(value))
                    }
                    // Dropping the transaction rolls it back.
                    Err(domain) => Ok(Err(domain)),
                }
            })
            .await;
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(domain)) => Err(domain),
            Err(db) => Err(StoreError::Db(db).into()),
        }
    }

    // -- Convenience single-shot operations ---------------------------------

    pub async fn get_doc<T>(
        &self,
        collection: &'static str,
        id: impl Into<String>,
    ) -> Result<Option<T>, DomainError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let id = id.into();
        self.with_tx(move |tx| tx.get(collection, &id)).await
    }

    pub async fn put_doc<T>(
        &self,
        collection: &'static str,
        id: impl Into<String>,
        keys: DocKeys,
        value: T,
    ) -> Result<(), DomainError>
    where
        T: Serialize + Send + 'static,
    {
        let id = id.into();
        self.with_tx(move |tx| tx.put(collection, &id, &keys, &value))
            .await
    }

    pub async fn list_by_owner<T>(
        &self,
        collection: &'static str,
        owner_key: impl Into<String>,
        limit: Option<u32>,
    ) -> Result<Vec<T>, DomainError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let owner = owner_key.into();
        self.with_tx(move |tx| tx.list_by_owner(collection, &owner, limit))
            .await
    }

    pub async fn list_by_scope<T>(
        &self,
        collection: impl Into<String>,
        scope_key: impl Into<String>,
    ) -> Result<Vec<T>, DomainError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let collection = collection.into();
        let scope = scope_key.into();
        self.with_tx(move |tx| tx.list_by_scope(&collection, &scope))
            .await
    }
}

// ---------------------------------------------------------------------------
// TxContext
// ---------------------------------------------------------------------------

/// Handle given to [`DocStore::with_tx`] closures; every read and write
/// goes through the same underlying transaction.
pub struct TxContext<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl TxContext<'_> {
    pub fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, DomainError> {
        let mut stmt = self
            .tx
            .prepare("SELECT data FROM documents WHERE collection = ?1 AND id = ?2")
            .map_err(sql_err)?;
        let mut rows = stmt
            .query(rusqlite::params![collection, id])
            .map_err(sql_err)?;
        match rows.next().map_err(sql_err)? {
            Some(row) => {
                let data: String = row.get(0).map_err(sql_err)?;
                let value = serde_json::from_str(&data)
                    .map_err(|e| DomainError::internal(format!("document decode failed: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Upsert a document, preserving `created_at` on update.
    pub fn put<T: Serialize>(
        &mut self,
        collection: &str,
        id: &str,
        keys: &DocKeys,
        value: &T,
    ) -> Result<(), DomainError> {
        let data = serde_json::to_string(value)
            .map_err(|e| DomainError::internal(format!("document encode failed: {e}")))?;
        let now = ts(Utc::now());
        self.tx
            .execute(
                "INSERT INTO documents
                    (collection, id, data, owner_key, scope_key, lookup_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    data = excluded.data,
                    owner_key = excluded.owner_key,
                    scope_key = excluded.scope_key,
                    lookup_key = excluded.lookup_key,
                    updated_at = excluded.updated_at",
                rusqlite::params![collection, id, data, keys.owner, keys.scope, keys.lookup, now],
            )
            .map_err(sql_err)?;
        Ok(())
    }

    /// Create-only write. Returns `false` when the slot already exists
    /// (which callers treat as success for idempotent writers).
    pub fn create<T: Serialize>(
        &mut self,
        collection: &str,
        id: &str,
        keys: &DocKeys,
        value: &T,
    ) -> Result<bool, DomainError> {
        let data = serde_json::to_string(value)
            .map_err(|e| DomainError::internal(format!("document encode failed: {e}")))?;
        let now = ts(Utc::now());
        let inserted = self
            .tx
            .execute(
                "INSERT OR IGNORE INTO documents
                    (collection, id, data, owner_key, scope_key, lookup_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![collection, id, data, keys.owner, keys.scope, keys.lookup, now],
            )
            .map_err(sql_err)?;
        Ok(inserted > 0)
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> Result<bool, DomainError> {
        let removed = self
            .tx
            .execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id],
            )
            .map_err(sql_err)?;
        Ok(removed > 0)
    }

    pub fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, DomainError> {
        self.query_docs(
            "SELECT data FROM documents WHERE collection = ?1 ORDER BY created_at DESC",
            rusqlite::params![collection],
        )
    }

    /// Documents for one owner, most recent first.
    pub fn list_by_owner<T: DeserializeOwned>(
        &self,
        collection: &str,
        owner_key: &str,
        limit: Option<u32>,
    ) -> Result<Vec<T>, DomainError> {
        let limit = i64::from(limit.unwrap_or(u32::MAX).min(1_000_000));
        self.query_docs(
            "SELECT data FROM documents
             WHERE collection = ?1 AND owner_key = ?2
             ORDER BY created_at DESC LIMIT ?3",
            rusqlite::params![collection, owner_key, limit],
        )
    }

    pub fn list_by_scope<T: DeserializeOwned>(
        &self,
        collection: &str,
        scope_key: &str,
    ) -> Result<Vec<T>, DomainError> {
        self.query_docs(
            "SELECT data FROM documents
             WHERE collection = ?1 AND scope_key = ?2
             ORDER BY created_at ASC",
            rusqlite::params![collection, scope_key],
        )
    }

    /// Exact-match lookup by the indexed lookup key. Returns the first
    /// match with its document id.
    pub fn get_by_lookup<T: DeserializeOwned>(
        &self,
        collection: &str,
        lookup_key: &str,
    ) -> Result<Option<(String, T)>, DomainError> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT id, data FROM documents
                 WHERE collection = ?1 AND lookup_key = ?2
                 ORDER BY updated_at DESC LIMIT 1",
            )
            .map_err(sql_err)?;
        let mut rows = stmt
            .query(rusqlite::params![collection, lookup_key])
            .map_err(sql_err)?;
        match rows.next().map_err(sql_err)? {
            Some(row) => {
                let id: String = row.get(0).map_err(sql_err)?;
                let data: String = row.get(1).map_err(sql_err)?;
                let value = serde_json::from_str(&data)
                    .map_err(|e| DomainError::internal(format!("document decode failed: {e}")))?;
                Ok(Some((id, value)))
            }
            None => Ok(None),
        }
    }

    /// Count documents in a scope created after `since`.
    pub fn count_by_scope_since(
        &self,
        collection: &str,
        scope_key: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, DomainError> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT COUNT(*) FROM documents
                 WHERE collection = ?1 AND scope_key = ?2 AND created_at > ?3",
            )
            .map_err(sql_err)?;
        stmt.query_row(rusqlite::params![collection, scope_key, ts(since)], |row| {
            row.get::<_, u32>(0)
        })
        .map_err(sql_err)
    }

    /// Count documents in a scope with a given lookup key created after
    /// `since` (used for rolling deny windows).
    pub fn count_by_scope_lookup_since(
        &self,
        collection: &str,
        scope_key: &str,
        lookup_key: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, DomainError> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT COUNT(*) FROM documents
                 WHERE collection = ?1 AND scope_key = ?2 AND lookup_key = ?3
                   AND created_at > ?4",
            )
            .map_err(sql_err)?;
        stmt.query_row(
            rusqlite::params![collection, scope_key, lookup_key, ts(since)],
            |row| row.get::<_, u32>(0),
        )
        .map_err(sql_err)
    }

    fn query_docs<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<T>, DomainError> {
        let mut stmt = self.tx.prepare(sql).map_err(sql_err)?;
        let mut rows = stmt.query(params).map_err(sql_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sql_err)? {
            let data: String = row.get(0).map_err(sql_err)?;
            let value = serde_json::from_str(&data)
                .map_err(|e| DomainError::internal(format!("document decode failed: {e}")))?;
            out.push(value);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
