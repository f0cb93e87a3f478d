//! Embedded-SQLite schema (§4.8). Applied idempotently with `CREATE TABLE IF
//! NOT EXISTS`; there is no external migration runner since the schema is
//! small and stable enough to ship in the binary.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    address             TEXT PRIMARY KEY,
    balance             TEXT NOT NULL DEFAULT '0',
    display_name        TEXT,
    legal_name          TEXT,
    web                 TEXT,
    email               TEXT,
    twitter             TEXT,
    is_verified         INTEGER NOT NULL DEFAULT 0,
    parent_address      TEXT REFERENCES accounts(address),
    sub_display         TEXT,
    risk_score          INTEGER,
    tags                TEXT NOT NULL DEFAULT '[]',
    notes               TEXT,
    first_seen_block    INTEGER NOT NULL,
    last_seen_block     INTEGER NOT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_parent_address ON accounts(parent_address);
CREATE INDEX IF NOT EXISTS idx_accounts_risk_score ON accounts(risk_score);

CREATE TABLE IF NOT EXISTS transfers (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    block_number        INTEGER NOT NULL,
    block_timestamp     TEXT NOT NULL,
    from_address        TEXT NOT NULL REFERENCES accounts(address),
    to_address          TEXT NOT NULL REFERENCES accounts(address),
    amount              TEXT NOT NULL,
    transaction_hash    TEXT,
    event_index         INTEGER NOT NULL,
    UNIQUE(transaction_hash, event_index)
);

CREATE INDEX IF NOT EXISTS idx_transfers_from_block ON transfers(from_address, block_number);
CREATE INDEX IF NOT EXISTS idx_transfers_to_block ON transfers(to_address, block_number);
CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers(block_number);

CREATE TABLE IF NOT EXISTS transfer_stats (
    from_address            TEXT NOT NULL,
    to_address              TEXT NOT NULL,
    total_amount            TEXT NOT NULL DEFAULT '0',
    transfer_count          INTEGER NOT NULL DEFAULT 0,
    first_transfer_block    INTEGER NOT NULL,
    last_transfer_block     INTEGER NOT NULL,
    PRIMARY KEY (from_address, to_address)
);

CREATE INDEX IF NOT EXISTS idx_transfer_stats_from ON transfer_stats(from_address);
CREATE INDEX IF NOT EXISTS idx_transfer_stats_to ON transfer_stats(to_address);

CREATE TABLE IF NOT EXISTS account_stats (
    address                         TEXT PRIMARY KEY REFERENCES accounts(address),
    total_sent                      TEXT NOT NULL DEFAULT '0',
    total_received                  TEXT NOT NULL DEFAULT '0',
    send_count                      INTEGER NOT NULL DEFAULT 0,
    receive_count                   INTEGER NOT NULL DEFAULT 0,
    unique_senders                  INTEGER NOT NULL DEFAULT 0,
    unique_receivers                INTEGER NOT NULL DEFAULT 0,
    first_activity_block            INTEGER,
    last_activity_block             INTEGER,
    suspicious_pattern_count        INTEGER NOT NULL DEFAULT 0,
    high_risk_interaction_count     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sync_state (
    id                      INTEGER PRIMARY KEY CHECK (id = 1),
    last_processed_block    INTEGER NOT NULL DEFAULT 0,
    last_sync_timestamp     TEXT,
    is_syncing              INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO sync_state (id, last_processed_block, is_syncing) VALUES (1, 0, 0);

CREATE TABLE IF NOT EXISTS investigations (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    addresses       TEXT NOT NULL,
    notes           TEXT,
    created_at      TEXT NOT NULL
);
"#;
