//! Access to the encrypted message store.
//!
//! The store itself is an external collaborator reached through the
//! [`CursorProvider`] trait: a native cursor hands out rows in fixed-size
//! batches. [`MessagePager`] turns that into offset/limit pages over a
//! time window, with an in-memory keyword pass for search.
//!
//! [`SqliteCursorProvider`] is a provider over a local SQLite (optionally
//! SQLCipher) message table, used by the CLI and the tests.

mod cursor;
mod pager;
mod schema;
mod sqlite;

pub use cursor::{CursorHandle, CursorProvider, CursorRequest, MessageRow, RowBatch};
pub use pager::{
    ContentResolver, DefaultContentResolver, MessagePage, MessagePager, PageQuery, PagerConfig,
};
pub use sqlite::{DatabaseConfig, SqliteCursorProvider, StoredMessage};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "messages.db";
