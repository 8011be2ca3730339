//! Durable registry on SQLite, so generations survive a worker restart.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use loanshell_net::{Response, ResponseType};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use url::Url;

use super::{GenerationHandle, Registry};
use crate::error::{WorkerError, WorkerResult};
use crate::key::RequestKey;

/// Database schema version, stored in `PRAGMA user_version`
const SCHEMA_VERSION: i32 = 1;

/// Registry persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    /// Open or create the registry database at `path`.
    pub fn open_path(path: &Path) -> WorkerResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            WorkerError::registry(format!("Failed to open {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Opened registry database");
        Self::init(conn)
    }

    /// Registry in a private in-memory database.
    pub fn open_in_memory() -> WorkerResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> WorkerResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            create_schema_v1(&conn)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> WorkerResult<T>
    where
        F: FnOnce(&Connection) -> WorkerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| WorkerError::registry("registry connection lock poisoned"))?;
            f(&conn)
        })
        .await
        .map_err(|e| WorkerError::registry(format!("registry task failed: {}", e)))?
    }
}

fn create_schema_v1(conn: &Connection) -> WorkerResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS generations (
            name TEXT PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS entries (
            generation   TEXT NOT NULL REFERENCES generations(name) ON DELETE CASCADE,
            method       TEXT NOT NULL,
            url          TEXT NOT NULL,
            response_url TEXT NOT NULL,
            status       INTEGER NOT NULL,
            kind         TEXT NOT NULL,
            headers      TEXT NOT NULL,
            body         BLOB NOT NULL,
            PRIMARY KEY (generation, method, url)
        );

        PRAGMA user_version = 1;
        ",
    )?;
    Ok(())
}

struct StoredRow {
    response_url: String,
    status: u16,
    kind: String,
    headers: String,
    body: Vec<u8>,
}

impl StoredRow {
    fn into_response(self) -> WorkerResult<Response> {
        let url = Url::parse(&self.response_url)
            .map_err(|e| WorkerError::registry(format!("corrupt response url: {}", e)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| WorkerError::registry(format!("corrupt status: {}", e)))?;
        let kind = ResponseType::parse(&self.kind)
            .ok_or_else(|| WorkerError::registry(format!("corrupt response type: {}", self.kind)))?;
        let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)
            .map_err(|e| WorkerError::registry(format!("corrupt headers: {}", e)))?;
        Ok(Response::from_parts(
            url,
            status,
            kind,
            &headers,
            Bytes::from(self.body),
        ))
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn open(&self, name: &str) -> WorkerResult<GenerationHandle> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO generations (name) VALUES (?1)",
                params![name],
            )?;
            Ok(GenerationHandle::new(&name))
        })
        .await
    }

    async fn contains(&self, name: &str) -> WorkerResult<bool> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM generations WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn get(
        &self,
        handle: &GenerationHandle,
        key: &RequestKey,
    ) -> WorkerResult<Option<Response>> {
        let generation = handle.name().to_string();
        let key = key.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT response_url, status, kind, headers, body FROM entries
                     WHERE generation = ?1 AND method = ?2 AND url = ?3",
                    params![generation, key.method(), key.url()],
                    |row| {
                        Ok(StoredRow {
                            response_url: row.get(0)?,
                            status: row.get(1)?,
                            kind: row.get(2)?,
                            headers: row.get(3)?,
                            body: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            row.map(StoredRow::into_response).transpose()
        })
        .await
    }

    async fn put(
        &self,
        handle: &GenerationHandle,
        key: RequestKey,
        response: Response,
    ) -> WorkerResult<()> {
        let headers = serde_json::to_string(&response.header_pairs())
            .map_err(|e| WorkerError::registry(e.to_string()))?;

        let generation = handle.name().to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO generations (name) VALUES (?1)",
                params![generation],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO entries
                 (generation, method, url, response_url, status, kind, headers, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    generation,
                    key.method(),
                    key.url(),
                    response.url().as_str(),
                    response.status().as_u16(),
                    response.kind().as_str(),
                    headers,
                    response.body().as_ref(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn keys(&self, handle: &GenerationHandle) -> WorkerResult<Vec<RequestKey>> {
        let generation = handle.name().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT method, url FROM entries WHERE generation = ?1 ORDER BY method, url",
            )?;
            let keys = stmt
                .query_map(params![generation], |row| {
                    Ok(RequestKey::from_stored(row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn delete_generation(&self, name: &str) -> WorkerResult<bool> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_generation_names(&self) -> WorkerResult<BTreeSet<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM generations")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(names)
        })
        .await
    }
}
