//! Offset/limit pagination over native batch cursors.

use super::cursor::{CursorGuard, CursorProvider, CursorRequest, MessageRow};
use crate::config::{EngineConfig, KEYWORD_SCAN_CEILING, MAX_BATCH_SIZE};
use crate::error::{Error, Result};
use crate::logging::sanitize_for_log;
use std::sync::Arc;
use tracing::{debug, warn};

/// Query for one page of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// Conversation to read.
    pub conversation_id: String,
    /// Rows to skip.
    pub offset: usize,
    /// Maximum rows to return.
    pub limit: usize,
    /// Inclusive lower bound (unix seconds); 0 = unbounded.
    pub start_time: i64,
    /// Inclusive upper bound (unix seconds); 0 = unbounded.
    pub end_time: i64,
    /// Oldest first when true.
    pub ascending: bool,
}

impl PageQuery {
    /// First 50 rows of a conversation, newest first, unbounded in time.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            offset: 0,
            limit: 50,
            start_time: 0,
            end_time: 0,
            ascending: false,
        }
    }

    /// Set offset and limit.
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Set the time window.
    pub fn between(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    /// Set the ordering.
    pub fn ascending(mut self, ascending: bool) -> Self {
        self.ascending = ascending;
        self
    }
}

/// One page of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    /// Rows in query order, at most `limit`.
    pub rows: Vec<MessageRow>,
    /// Whether rows exist beyond this page.
    pub has_more: bool,
}

impl MessagePage {
    /// Page with no rows and nothing beyond it.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Resolves the text a keyword search matches against.
pub trait ContentResolver: Send + Sync {
    /// Display content of a row, if it has any.
    fn display_content(&self, row: &MessageRow) -> Option<String>;
}

impl<F> ContentResolver for F
where
    F: Fn(&MessageRow) -> Option<String> + Send + Sync,
{
    fn display_content(&self, row: &MessageRow) -> Option<String> {
        self(row)
    }
}

/// Uses the first non-empty text column a row carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContentResolver;

impl DefaultContentResolver {
    /// Columns consulted, in order.
    pub const COLUMNS: &'static [&'static str] = &[
        "parsed_content",
        "parsedContent",
        "message_content",
        "str_content",
        "content",
    ];
}

impl ContentResolver for DefaultContentResolver {
    fn display_content(&self, row: &MessageRow) -> Option<String> {
        row.first_str(Self::COLUMNS).map(str::to_string)
    }
}

/// Pagination limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerConfig {
    /// Upper bound on the native batch size.
    pub max_batch_size: usize,
    /// Rows pulled for a keyword search before filtering.
    pub keyword_scan_ceiling: usize,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            keyword_scan_ceiling: KEYWORD_SCAN_CEILING,
        }
    }
}

impl From<&EngineConfig> for PagerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            keyword_scan_ceiling: config.keyword_scan_ceiling,
        }
    }
}

/// Serves pages of a conversation from a [`CursorProvider`].
pub struct MessagePager<P: CursorProvider + ?Sized, R = DefaultContentResolver> {
    provider: Arc<P>,
    resolver: R,
    config: PagerConfig,
}

impl<P: CursorProvider + ?Sized> MessagePager<P, DefaultContentResolver> {
    /// Pager with default limits and content resolution.
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            resolver: DefaultContentResolver,
            config: PagerConfig::default(),
        }
    }
}

impl<P: CursorProvider + ?Sized, R: ContentResolver> MessagePager<P, R> {
    /// Replace the pagination limits.
    pub fn with_config(mut self, config: PagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the keyword content resolver.
    pub fn with_resolver<R2: ContentResolver>(self, resolver: R2) -> MessagePager<P, R2> {
        MessagePager {
            provider: self.provider,
            resolver,
            config: self.config,
        }
    }

    /// Fetch one page.
    ///
    /// Opens a cursor with batch size `min(limit, max_batch_size)`, skips
    /// `offset` rows, collects up to `limit` rows and closes the cursor on
    /// every exit path.
    pub async fn fetch_page(&self, query: &PageQuery) -> Result<MessagePage> {
        if query.limit == 0 {
            return Ok(MessagePage::empty());
        }

        let request = CursorRequest {
            conversation_id: query.conversation_id.clone(),
            batch_size: query.limit.min(self.config.max_batch_size).max(1),
            ascending: query.ascending,
            start_time: query.start_time,
            end_time: query.end_time,
        };

        let handle = self.provider.open_cursor(&request).await.map_err(|e| match e {
            Error::CursorOpen(_) => e,
            other => Error::CursorOpen(other.to_string()),
        })?;
        let guard = CursorGuard::new(Arc::clone(&self.provider), handle);
        debug!(cursor = handle.0, batch_size = request.batch_size, "opened cursor");

        let collected = collect_rows(&guard, query.offset, query.limit).await;
        if let Err(e) = guard.close().await {
            warn!(cursor = handle.0, error = %e, "cursor close failed");
        }
        let (mut rows, cursor_has_more) = collected?;

        let has_more = cursor_has_more || rows.len() > query.limit;
        rows.truncate(query.limit);

        debug!(
            offset = query.offset,
            limit = query.limit,
            returned = rows.len(),
            has_more,
            "fetched page"
        );
        Ok(MessagePage { rows, has_more })
    }

    /// Keyword search within the query's window.
    ///
    /// Pulls up to `keyword_scan_ceiling` rows from the start of the window,
    /// keeps rows whose display content contains `keyword`
    /// (case-insensitive), then applies the caller's offset and limit.
    pub async fn search(&self, query: &PageQuery, keyword: &str) -> Result<MessagePage> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return self.fetch_page(query).await;
        }
        if query.limit == 0 {
            return Ok(MessagePage::empty());
        }

        let scan = PageQuery {
            offset: 0,
            limit: self.config.keyword_scan_ceiling,
            ..query.clone()
        };
        let candidates = self.fetch_page(&scan).await?;
        let scanned = candidates.rows.len();

        let matched: Vec<MessageRow> = candidates
            .rows
            .into_iter()
            .filter(|row| {
                self.resolver
                    .display_content(row)
                    .is_some_and(|content| content.to_lowercase().contains(&needle))
            })
            .collect();

        let has_more = matched.len() > query.offset.saturating_add(query.limit);
        let rows: Vec<MessageRow> = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        debug!(
            keyword = %sanitize_for_log(keyword),
            scanned,
            returned = rows.len(),
            has_more,
            "keyword search"
        );
        Ok(MessagePage { rows, has_more })
    }

    /// Whether any row is newer than `most_recent_time`.
    pub async fn has_newer_than(&self, conversation_id: &str, most_recent_time: i64) -> Result<bool> {
        let newer = PageQuery::new(conversation_id)
            .page(0, 1)
            .between(most_recent_time.saturating_add(1), 0)
            .ascending(true);
        Ok(!self.fetch_page(&newer).await?.rows.is_empty())
    }
}

/// Skip `offset` rows and gather at least `limit` more, or until the
/// cursor runs dry. Returns the rows and the cursor's last `has_more`.
async fn collect_rows<P: CursorProvider + ?Sized>(
    guard: &CursorGuard<P>,
    offset: usize,
    limit: usize,
) -> Result<(Vec<MessageRow>, bool)> {
    let mut skipped = 0usize;
    let mut rows = Vec::new();

    loop {
        let batch = guard.fetch().await?;
        if batch.rows.is_empty() {
            return Ok((rows, false));
        }
        let has_more = batch.has_more;

        let remaining = offset - skipped;
        if remaining >= batch.rows.len() {
            skipped += batch.rows.len();
        } else {
            skipped = offset;
            rows.extend(batch.rows.into_iter().skip(remaining));
        }

        if rows.len() >= limit || !has_more {
            return Ok((rows, has_more));
        }
    }
}
