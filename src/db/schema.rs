/// Schema for the local record store and the response cache.
pub const SCHEMA: &str = r#"
-- Key-addressed record store (stores serialized JSON per entity family)
CREATE TABLE IF NOT EXISTS records (
    family TEXT NOT NULL,
    id TEXT NOT NULL,
    position INTEGER NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (family, id)
);

CREATE INDEX IF NOT EXISTS idx_records_position ON records(family, position);

-- Response cache generations, in creation order
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    seq INTEGER NOT NULL
);

-- Cached responses keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS cached_responses (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key),
    FOREIGN KEY (generation) REFERENCES cache_generations(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cached_responses_key ON cached_responses(request_key);
"#;
