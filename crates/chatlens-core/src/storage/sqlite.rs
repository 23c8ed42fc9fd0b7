//! SQLite-backed cursor provider.

use super::cursor::{CursorHandle, CursorProvider, CursorRequest, MessageRow, RowBatch};
use super::schema::{CREATE_SCHEMA, MESSAGE_COLUMNS, SCHEMA_VERSION};
use crate::error::{Error, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use zeroize::Zeroizing;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: String,
    /// Whether to use in-memory database (for testing).
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: super::DEFAULT_DB_NAME.to_string(),
            in_memory: false,
        }
    }
}

/// A message to insert into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Server-assigned id.
    pub server_id: i64,
    /// Sender identifier.
    pub sender: Option<String>,
    /// Message type code.
    pub local_type: i64,
    /// Creation time, unix seconds.
    pub create_time: i64,
    /// Text content.
    pub content: Option<String>,
}

impl StoredMessage {
    /// Plain text message.
    pub fn text(conversation_id: &str, create_time: i64, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            server_id: 0,
            sender: None,
            local_type: 1,
            create_time,
            content: Some(content.to_string()),
        }
    }
}

/// Server-side state of one open cursor.
#[derive(Debug)]
struct CursorState {
    request: CursorRequest,
    position: usize,
}

/// Cursor provider over a local message table.
///
/// Cursors are positions held by the provider; each batch is one bounded
/// query, so no statement stays open between batches. Batch queries run on
/// the blocking pool.
pub struct SqliteCursorProvider {
    conn: Arc<Mutex<Option<Connection>>>,
    cursors: Mutex<HashMap<u64, CursorState>>,
    next_id: AtomicU64,
}

impl SqliteCursorProvider {
    /// Open or create a (SQLCipher-encrypted) message store.
    ///
    /// An empty `encryption_key` opens the database unkeyed.
    pub fn open(config: &DatabaseConfig, encryption_key: &[u8]) -> Result<Self> {
        let conn = connect(config)?;
        unlock(&conn, encryption_key)?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = DELETE;
            PRAGMA secure_delete = ON;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| Error::Storage(format!("failed to set security pragmas: {}", e)))?;

        conn.execute_batch(&CREATE_SCHEMA.replace('?', &SCHEMA_VERSION.to_string()))
            .map_err(|e| Error::Storage(format!("failed to create schema: {}", e)))?;

        debug!(
            in_memory = config.in_memory,
            keyed = !encryption_key.is_empty(),
            "message store opened"
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            cursors: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Open an unkeyed in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(
            &DatabaseConfig {
                path: String::new(),
                in_memory: true,
            },
            &[],
        )
    }

    /// Drop the connection. Later cursor opens fail with `CursorOpen`.
    pub fn disconnect(&self) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("lock poisoned".into()))?;
        conn.take();
        Ok(())
    }

    /// Insert a message, returning its local id.
    pub fn insert_message(&self, message: &StoredMessage) -> Result<i64> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("lock poisoned".into()))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::Storage("not connected".into()))?;

        conn.execute(
            r#"
            INSERT INTO messages
            (conversation_id, server_id, sender, local_type, create_time, message_content)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                message.conversation_id,
                message.server_id,
                message.sender,
                message.local_type,
                message.create_time,
                message.content,
            ],
        )
        .map_err(|e| Error::Storage(format!("failed to store message: {}", e)))?;

        Ok(conn.last_insert_rowid())
    }

    /// Number of cursors currently open.
    pub fn open_cursor_count(&self) -> usize {
        self.cursors.lock().map(|c| c.len()).unwrap_or(0)
    }
}

/// Read up to `batch_size` rows starting at `position`.
fn query_batch(
    conn: &Mutex<Option<Connection>>,
    request: &CursorRequest,
    position: usize,
) -> Result<RowBatch> {
    let guard = conn
        .lock()
        .map_err(|_| Error::Cursor("lock poisoned".into()))?;
    let conn = guard
        .as_ref()
        .ok_or_else(|| Error::Cursor("not connected".into()))?;

    let order = if request.ascending { "ASC" } else { "DESC" };
    let sql = format!(
        r#"
        SELECT {}
        FROM messages
        WHERE conversation_id = ?1
          AND (?2 = 0 OR create_time >= ?2)
          AND (?3 = 0 OR create_time <= ?3)
        ORDER BY create_time {order}, local_id {order}
        LIMIT ?4 OFFSET ?5
        "#,
        MESSAGE_COLUMNS.join(", "),
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| Error::Cursor(e.to_string()))?;

    // One extra row tells us whether the cursor is exhausted.
    let window = (request.batch_size + 1) as i64;
    let mapped = stmt
        .query_map(
            params![
                request.conversation_id,
                request.start_time,
                request.end_time,
                window,
                position as i64,
            ],
            |row| {
                let mut out = MessageRow::new();
                for (idx, column) in MESSAGE_COLUMNS.iter().enumerate() {
                    out.insert(column, column_value(row.get_ref(idx)?));
                }
                Ok(out)
            },
        )
        .map_err(|e| Error::Cursor(e.to_string()))?;

    let mut rows = mapped
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Cursor(e.to_string()))?;

    let has_more = rows.len() > request.batch_size;
    rows.truncate(request.batch_size);
    Ok(RowBatch { rows, has_more })
}

fn connect(config: &DatabaseConfig) -> Result<Connection> {
    if config.in_memory {
        return Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("cannot open in-memory store: {}", e)));
    }

    let path = Path::new(&config.path);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("cannot create {}: {}", dir.display(), e)))?;
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
        .map_err(|e| Error::Storage(format!("cannot open {}: {}", path.display(), e)))
}

/// Apply the SQLCipher key, then prove it by reading the schema.
fn unlock(conn: &Connection, key: &[u8]) -> Result<()> {
    if !key.is_empty() {
        let pragma = Zeroizing::new(format!("PRAGMA key = \"x'{}'\";", hex::encode(key)));
        conn.execute_batch(&pragma)
            .map_err(|e| Error::Storage(format!("failed to set encryption key: {}", e)))?;
    }

    // A wrong key only shows up on first read.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .map(|_| ())
        .map_err(|e| Error::Storage(format!("store locked or key invalid: {}", e)))
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(hex::encode(b)),
    }
}

#[async_trait]
impl CursorProvider for SqliteCursorProvider {
    async fn open_cursor(&self, request: &CursorRequest) -> Result<CursorHandle> {
        if request.batch_size == 0 {
            return Err(Error::CursorOpen("batch size must be positive".into()));
        }
        {
            let conn = self
                .conn
                .lock()
                .map_err(|_| Error::CursorOpen("lock poisoned".into()))?;
            if conn.is_none() {
                return Err(Error::CursorOpen("not connected".into()));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.cursors
            .lock()
            .map_err(|_| Error::CursorOpen("lock poisoned".into()))?
            .insert(
                id,
                CursorState {
                    request: request.clone(),
                    position: 0,
                },
            );
        debug!(cursor = id, ascending = request.ascending, "sqlite cursor opened");
        Ok(CursorHandle(id))
    }

    async fn fetch_batch(&self, cursor: CursorHandle) -> Result<RowBatch> {
        let (request, position) = {
            let cursors = self
                .cursors
                .lock()
                .map_err(|_| Error::Cursor("lock poisoned".into()))?;
            let state = cursors
                .get(&cursor.0)
                .ok_or_else(|| Error::Cursor(format!("unknown cursor {}", cursor.0)))?;
            (state.request.clone(), state.position)
        };

        let conn = Arc::clone(&self.conn);
        let batch = tokio::task::spawn_blocking(move || query_batch(&conn, &request, position))
            .await
            .map_err(|e| Error::Cursor(format!("batch query task failed: {}", e)))??;

        if let Some(state) = self
            .cursors
            .lock()
            .map_err(|_| Error::Cursor("lock poisoned".into()))?
            .get_mut(&cursor.0)
        {
            state.position += batch.rows.len();
        }
        Ok(batch)
    }

    async fn close_cursor(&self, cursor: CursorHandle) -> Result<()> {
        self.cursors
            .lock()
            .map_err(|_| Error::Cursor("lock poisoned".into()))?
            .remove(&cursor.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(count: i64) -> SqliteCursorProvider {
        let store = SqliteCursorProvider::open_in_memory().expect("open");
        for i in 0..count {
            store
                .insert_message(&StoredMessage::text("room", 1_000 + i, &format!("msg {}", i)))
                .expect("insert");
        }
        store
    }

    fn request(batch_size: usize, ascending: bool) -> CursorRequest {
        CursorRequest {
            conversation_id: "room".into(),
            batch_size,
            ascending,
            start_time: 0,
            end_time: 0,
        }
    }

    #[tokio::test]
    async fn test_batches_in_order() {
        let store = seeded(5);
        let cursor = store.open_cursor(&request(2, true)).await.expect("open");

        let first = store.fetch_batch(cursor).await.expect("batch");
        assert_eq!(first.rows.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.rows[0].create_time(), Some(1_000));

        let second = store.fetch_batch(cursor).await.expect("batch");
        assert_eq!(second.rows[0].create_time(), Some(1_002));

        let third = store.fetch_batch(cursor).await.expect("batch");
        assert_eq!(third.rows.len(), 1);
        assert!(!third.has_more);

        store.close_cursor(cursor).await.expect("close");
        assert_eq!(store.open_cursor_count(), 0);
    }

    #[tokio::test]
    async fn test_descending_and_time_bounds() {
        let store = seeded(10);
        let mut req = request(10, false);
        req.start_time = 1_003;
        req.end_time = 1_006;

        let cursor = store.open_cursor(&req).await.expect("open");
        let batch = store.fetch_batch(cursor).await.expect("batch");
        let times: Vec<_> = batch.rows.iter().filter_map(MessageRow::create_time).collect();
        assert_eq!(times, vec![1_006, 1_005, 1_004, 1_003]);
        assert!(!batch.has_more);
    }

    #[tokio::test]
    async fn test_disconnected_open_fails() {
        let store = seeded(1);
        store.disconnect().expect("disconnect");
        let err = store.open_cursor(&request(5, true)).await.expect_err("closed");
        assert!(matches!(err, Error::CursorOpen(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_cursors_on_blocking_pool() {
        let store = Arc::new(seeded(40));
        let mut tasks = Vec::new();
        for ascending in [true, false] {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let cursor = store.open_cursor(&request(7, ascending)).await.expect("open");
                let mut seen = 0;
                loop {
                    let batch = store.fetch_batch(cursor).await.expect("batch");
                    seen += batch.rows.len();
                    if !batch.has_more {
                        break;
                    }
                }
                store.close_cursor(cursor).await.expect("close");
                seen
            }));
        }
        for task in tasks {
            assert_eq!(task.await.expect("join"), 40);
        }
        assert_eq!(store.open_cursor_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_after_disconnect_fails() {
        let store = seeded(3);
        let cursor = store.open_cursor(&request(2, true)).await.expect("open");
        store.disconnect().expect("disconnect");
        let err = store.fetch_batch(cursor).await.expect_err("disconnected");
        assert!(matches!(err, Error::Cursor(_)));
    }

    #[tokio::test]
    async fn test_unknown_cursor() {
        let store = seeded(1);
        let err = store.fetch_batch(CursorHandle(999)).await.expect_err("unknown");
        assert!(matches!(err, Error::Cursor(_)));
    }
}
