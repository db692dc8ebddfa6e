//! SQL schema for the Herald SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// `email_key` columns hold the lower-cased address, computed in Rust so that
/// ordering and comparisons agree with the deduplicator for non-ASCII input.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id    TEXT PRIMARY KEY,
    username   TEXT NOT NULL UNIQUE,
    email      TEXT NOT NULL,
    email_key  TEXT NOT NULL
);

-- Exactly one of user_id / email is set; content_type and object_id travel
-- together.
CREATE TABLE IF NOT EXISTS watches (
    watch_id      TEXT PRIMARY KEY,
    event_type    TEXT NOT NULL,
    content_type  TEXT,
    object_id     INTEGER,
    user_id       TEXT REFERENCES users(user_id) ON DELETE CASCADE,
    email         TEXT,
    email_key     TEXT,
    secret        TEXT NOT NULL,
    is_active     INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    CHECK ((user_id IS NULL) != (email IS NULL)),
    CHECK ((content_type IS NULL) = (object_id IS NULL))
);

CREATE TABLE IF NOT EXISTS watch_filters (
    watch_id  TEXT NOT NULL REFERENCES watches(watch_id) ON DELETE CASCADE,
    name      TEXT NOT NULL,
    value     INTEGER NOT NULL CHECK (value BETWEEN 0 AND 4294967295),
    UNIQUE (watch_id, name)
);

CREATE INDEX IF NOT EXISTS watches_event_idx   ON watches(event_type, is_active);
CREATE INDEX IF NOT EXISTS watches_content_idx ON watches(content_type, object_id);
CREATE INDEX IF NOT EXISTS watches_email_idx   ON watches(email_key);
CREATE INDEX IF NOT EXISTS watches_user_idx    ON watches(user_id);
CREATE INDEX IF NOT EXISTS users_email_idx     ON users(email_key);
CREATE INDEX IF NOT EXISTS filters_lookup_idx  ON watch_filters(name, value);

PRAGMA user_version = 1;
";
