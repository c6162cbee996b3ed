//! Catalogue schema shared by both backends
//!
//! Three tables: `packages` records every observation of a package on a
//! market (no uniqueness, it is an append-only sighting log), `versions`
//! records each `(identifier, version, market)` once, and `apks` maps a
//! binary's sha256 to its canonical on-disk path.

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS packages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier  TEXT NOT NULL,
    market      TEXT NOT NULL,
    url         TEXT,
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_packages_identifier
    ON packages (identifier, market);

CREATE TABLE IF NOT EXISTS versions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier  TEXT NOT NULL,
    version     TEXT NOT NULL,
    market      TEXT NOT NULL,
    sha256      TEXT,
    recorded_at TEXT NOT NULL,
    UNIQUE (identifier, version, market)
);

CREATE TABLE IF NOT EXISTS apks (
    sha256     TEXT PRIMARY KEY,
    path       TEXT NOT NULL,
    size       INTEGER NOT NULL,
    md5        TEXT,
    stored_at  TEXT NOT NULL
);
";

/// Postgres rendition of the same schema
pub const SCHEMA_SQL_PG: &str = "
CREATE TABLE IF NOT EXISTS packages (
    id          BIGSERIAL PRIMARY KEY,
    identifier  TEXT NOT NULL,
    market      TEXT NOT NULL,
    url         TEXT,
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_packages_identifier
    ON packages (identifier, market);

CREATE TABLE IF NOT EXISTS versions (
    id          BIGSERIAL PRIMARY KEY,
    identifier  TEXT NOT NULL,
    version     TEXT NOT NULL,
    market      TEXT NOT NULL,
    sha256      TEXT,
    recorded_at TEXT NOT NULL,
    UNIQUE (identifier, version, market)
);

CREATE TABLE IF NOT EXISTS apks (
    sha256     TEXT PRIMARY KEY,
    path       TEXT NOT NULL,
    size       BIGINT NOT NULL,
    md5        TEXT,
    stored_at  TEXT NOT NULL
);
";
