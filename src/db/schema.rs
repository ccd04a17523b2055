/// Schema for the cache stores, their entries and the pending action queue.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per versioned cache store (e.g. "twitter-bot-v1.2.0")
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    -- JSON array of [header, value] pairs from the request, for headers named by Vary
    vary TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    response_url TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, request_key),
    FOREIGN KEY (store_name) REFERENCES cache_stores(name) ON DELETE CASCADE
);

-- Offline actions waiting for the next sync, replayed in seq order
CREATE TABLE IF NOT EXISTS pending_actions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    payload TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    last_error TEXT,
    created_at TEXT NOT NULL
);
"#;
