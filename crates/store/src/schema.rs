pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS news_items (
    id TEXT PRIMARY KEY,
    url TEXT UNIQUE NOT NULL,
    source TEXT NOT NULL,
    source_id TEXT,
    title TEXT NOT NULL,
    published_at DATETIME NOT NULL,
    language TEXT,
    summary TEXT,
    raw_json TEXT NOT NULL,
    created_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS tickers (
    symbol TEXT PRIMARY KEY,
    market TEXT NOT NULL,
    name TEXT
);

CREATE TABLE IF NOT EXISTS tags (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS news_ticker_assoc (
    news_item_id TEXT NOT NULL,
    ticker_symbol TEXT NOT NULL,
    confidence REAL NOT NULL,
    PRIMARY KEY (news_item_id, ticker_symbol)
);

CREATE TABLE IF NOT EXISTS news_tag_assoc (
    news_item_id TEXT NOT NULL,
    tag_name TEXT NOT NULL,
    PRIMARY KEY (news_item_id, tag_name)
);

CREATE TABLE IF NOT EXISTS ingestion_cursors (
    source TEXT PRIMARY KEY,
    updated_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS ingestion_runs (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    started_at DATETIME NOT NULL,
    finished_at DATETIME,
    stats_json TEXT
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    is_admin INTEGER NOT NULL,
    must_change_password INTEGER NOT NULL,
    created_at DATETIME NOT NULL
);
"#;
