//! WAL-mode schema, kept as a single `SCHEMA_SQL` constant applied on open.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS analysis_history (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    query_id        TEXT NOT NULL,
    ticker          TEXT NOT NULL,
    name            TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    current_price   REAL NOT NULL,
    change_pct      REAL NOT NULL,
    report_type     TEXT NOT NULL,
    engine_version  TEXT NOT NULL,
    sentiment_score REAL NOT NULL,
    analysis_summary TEXT NOT NULL,
    operation_advice TEXT NOT NULL,
    trend_prediction TEXT NOT NULL,
    risk_alerts     TEXT NOT NULL,
    ideal_buy       REAL,
    secondary_buy   REAL,
    stop_loss       REAL,
    take_profit     REAL,
    raw_result      TEXT NOT NULL,
    context_snapshot TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analysis_history_ticker_created_at
    ON analysis_history (ticker, created_at DESC);

CREATE TABLE IF NOT EXISTS news_intel (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id   INTEGER NOT NULL REFERENCES analysis_history(id) ON DELETE CASCADE,
    title       TEXT NOT NULL,
    snippet     TEXT NOT NULL,
    url         TEXT NOT NULL,
    published_at TEXT NOT NULL,
    source      TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    relevance   REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_news_intel_record_id ON news_intel (record_id);

CREATE TABLE IF NOT EXISTS conversation_messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id      TEXT NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    tool_calls      TEXT,
    reasoning_blob  TEXT,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_messages_session_id
    ON conversation_messages (session_id, id);

CREATE TABLE IF NOT EXISTS auth_config (
    key     TEXT PRIMARY KEY,
    value   TEXT NOT NULL
);

-- Reserved for a future backtest engine; this crate never executes trades
-- or writes rows here, but keeps the table so the schema matches what
-- operators expect to find.
CREATE TABLE IF NOT EXISTS backtest_results (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker          TEXT NOT NULL,
    engine_version  TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    result_json     TEXT NOT NULL
);
"#;
