//! Message store schema.

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the database schema.
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    local_id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    server_id INTEGER NOT NULL DEFAULT 0,
    sender TEXT,
    local_type INTEGER NOT NULL DEFAULT 1,
    create_time INTEGER NOT NULL,
    message_content TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_time
    ON messages(conversation_id, create_time);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

INSERT OR REPLACE INTO settings (key, value) VALUES ('schema_version', ?);
"#;

/// Columns selected for every row, in `MessageRow` key order.
pub const MESSAGE_COLUMNS: &[&str] = &[
    "local_id",
    "conversation_id",
    "server_id",
    "sender",
    "local_type",
    "create_time",
    "message_content",
];
