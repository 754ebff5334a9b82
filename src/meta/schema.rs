//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Datasets: named, owned collections of data items
CREATE TABLE IF NOT EXISTS datasets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(owner_id, name)
);

-- Data: ingested content, addressed by content hash
CREATE TABLE IF NOT EXISTS data (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    extension TEXT,
    mime_type TEXT,
    content_hash TEXT,
    data_size INTEGER,
    raw_data_location TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    node_set_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Dataset <-> data link (many-to-many)
CREATE TABLE IF NOT EXISTS dataset_data (
    dataset_id TEXT NOT NULL REFERENCES datasets(id),
    data_id TEXT NOT NULL REFERENCES data(id),
    created_at TEXT NOT NULL,
    PRIMARY KEY (dataset_id, data_id)
);

-- Audit trail of structural graph edges; rows are only ever soft deleted
CREATE TABLE IF NOT EXISTS graph_relationship_ledger (
    id TEXT PRIMARY KEY,
    source_node_id TEXT NOT NULL,
    destination_node_id TEXT NOT NULL,
    creator_function TEXT NOT NULL,
    node_label TEXT,
    created_at TEXT NOT NULL,
    deleted_at TEXT,
    user_id TEXT
);

-- Sync runs against the cloud replica
CREATE TABLE IF NOT EXISTS sync_operations (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    progress_percentage INTEGER NOT NULL DEFAULT 0,
    dataset_ids_json TEXT NOT NULL,
    dataset_names_json TEXT NOT NULL,
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    total_records_to_sync INTEGER,
    total_records_to_upload INTEGER,
    records_processed INTEGER NOT NULL DEFAULT 0,
    records_uploaded INTEGER NOT NULL DEFAULT 0,
    records_downloaded INTEGER NOT NULL DEFAULT 0,
    bytes_uploaded INTEGER NOT NULL DEFAULT 0,
    bytes_downloaded INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_data_hash ON data(content_hash);
CREATE INDEX IF NOT EXISTS idx_dataset_data_data ON dataset_data(data_id);
CREATE INDEX IF NOT EXISTS idx_ledger_source ON graph_relationship_ledger(source_node_id);
CREATE INDEX IF NOT EXISTS idx_ledger_destination ON graph_relationship_ledger(destination_node_id);
CREATE INDEX IF NOT EXISTS idx_sync_operations_user ON sync_operations(user_id);
CREATE INDEX IF NOT EXISTS idx_sync_operations_created ON sync_operations(created_at);
"#;
