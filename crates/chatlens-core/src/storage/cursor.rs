//! Native cursor seam and the rows it yields.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// One raw row from the store: column name → value.
///
/// Only the fields the engine inspects get typed accessors; mapping rows
/// into display messages is the caller's job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRow(Map<String, Value>);

impl MessageRow {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, builder style.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    /// Set a column.
    pub fn insert(&mut self, column: &str, value: impl Into<Value>) {
        self.0.insert(column.to_string(), value.into());
    }

    /// Raw column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// First non-empty string among `columns`.
    pub fn first_str(&self, columns: &[&str]) -> Option<&str> {
        columns
            .iter()
            .filter_map(|c| self.0.get(*c).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
    }

    /// First integer among `columns`; numeric strings are accepted.
    pub fn first_i64(&self, columns: &[&str]) -> Option<i64> {
        columns.iter().find_map(|c| match self.0.get(*c)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// Creation time, unix seconds.
    pub fn create_time(&self) -> Option<i64> {
        self.first_i64(&["create_time", "createTime"])
    }

    /// Store-local row id.
    pub fn local_id(&self) -> Option<i64> {
        self.first_i64(&["local_id", "localId"])
    }

    /// Server-assigned message id.
    pub fn server_id(&self) -> Option<i64> {
        self.first_i64(&["server_id", "serverId"])
    }

    /// Sender identifier.
    pub fn sender(&self) -> Option<&str> {
        self.first_str(&["sender", "sender_username", "senderUsername"])
    }

    /// Raw text content, when the row carries any.
    pub fn text(&self) -> Option<&str> {
        self.first_str(&["message_content", "str_content", "content"])
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take the underlying map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for MessageRow {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Parameters for opening a native cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRequest {
    /// Conversation to read.
    pub conversation_id: String,
    /// Rows per batch.
    pub batch_size: usize,
    /// Oldest first when true.
    pub ascending: bool,
    /// Inclusive lower bound (unix seconds); 0 = unbounded.
    pub start_time: i64,
    /// Inclusive upper bound (unix seconds); 0 = unbounded.
    pub end_time: i64,
}

/// Opaque handle to an open native cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(pub u64);

/// One batch from a native cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    /// Rows in cursor order.
    pub rows: Vec<MessageRow>,
    /// Whether the cursor holds further rows.
    pub has_more: bool,
}

/// The encrypted store's batch cursor.
///
/// Batches from one cursor are requested sequentially; separate cursors
/// may be open at the same time.
#[async_trait]
pub trait CursorProvider: Send + Sync + 'static {
    /// Open a cursor. Failures surface as `Error::CursorOpen`.
    async fn open_cursor(&self, request: &CursorRequest) -> Result<CursorHandle>;

    /// Pull the next batch.
    async fn fetch_batch(&self, cursor: CursorHandle) -> Result<RowBatch>;

    /// Release the cursor.
    async fn close_cursor(&self, cursor: CursorHandle) -> Result<()>;
}

/// Closes its cursor when done.
///
/// Normal and error paths call [`CursorGuard::close`]. If the owning
/// future is dropped first, the close is spawned onto the current runtime.
pub(crate) struct CursorGuard<P: CursorProvider + ?Sized> {
    provider: Arc<P>,
    handle: Option<CursorHandle>,
}

impl<P: CursorProvider + ?Sized> CursorGuard<P> {
    pub(crate) fn new(provider: Arc<P>, handle: CursorHandle) -> Self {
        Self {
            provider,
            handle: Some(handle),
        }
    }

    pub(crate) async fn fetch(&self) -> Result<RowBatch> {
        match self.handle {
            Some(handle) => self.provider.fetch_batch(handle).await,
            None => Ok(RowBatch::default()),
        }
    }

    pub(crate) async fn close(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                debug!(cursor = handle.0, "closing cursor");
                self.provider.close_cursor(handle).await
            }
            None => Ok(()),
        }
    }
}

impl<P: CursorProvider + ?Sized> Drop for CursorGuard<P> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let provider = Arc::clone(&self.provider);
                runtime.spawn(async move {
                    if let Err(e) = provider.close_cursor(handle).await {
                        warn!(cursor = handle.0, error = %e, "deferred cursor close failed");
                    }
                });
                debug!(cursor = handle.0, "cursor abandoned, close scheduled");
            }
            Err(_) => warn!(cursor = handle.0, "cursor abandoned outside a runtime"),
        }
    }
}
