//! SQL schema for the Ward SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS roles (
    role_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT
);

CREATE TABLE IF NOT EXISTS user_roles (
    username TEXT    NOT NULL,
    role_id  INTEGER NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
    UNIQUE (username, role_id)
);

-- At most one row per (role, target, permission); grants rely on this.
CREATE TABLE IF NOT EXISTS permissions (
    permission_id INTEGER PRIMARY KEY AUTOINCREMENT,
    role_id       INTEGER NOT NULL REFERENCES roles(role_id) ON DELETE CASCADE,
    target_type   TEXT    NOT NULL,
    target_id     INTEGER NOT NULL,
    permission    TEXT    NOT NULL,   -- 'read' | 'modify' | 'delete' | 'admin'
    UNIQUE (role_id, target_type, target_id, permission)
);

-- Every record type shares this table; type-specific fields live in `data`.
CREATE TABLE IF NOT EXISTS objects (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    target_type TEXT    NOT NULL,
    owner       TEXT    NOT NULL,
    created     TEXT    NOT NULL,   -- RFC 3339 UTC, fixed width
    modified    TEXT    NOT NULL,
    when_date   TEXT    NOT NULL,
    parent_type TEXT,
    parent_id   INTEGER,
    data        TEXT    NOT NULL DEFAULT '{}',
    deleted     INTEGER NOT NULL DEFAULT 0,
    deleted_by  TEXT,
    deleted_at  TEXT
);

CREATE TABLE IF NOT EXISTS links (
    link_id INTEGER PRIMARY KEY AUTOINCREMENT,
    v0_type TEXT    NOT NULL,
    v0_id   INTEGER NOT NULL,
    v1_type TEXT    NOT NULL,
    v1_id   INTEGER NOT NULL,
    weight  INTEGER NOT NULL DEFAULT 1,
    context TEXT,
    created TEXT    NOT NULL,
    UNIQUE (v0_type, v0_id, v1_type, v1_id)
);

-- Denormalised; rebuildable from the objects it indexes.
CREATE TABLE IF NOT EXISTS appearances (
    appearance_id INTEGER PRIMARY KEY AUTOINCREMENT,
    when_date     TEXT    NOT NULL,
    target_type   TEXT    NOT NULL,   -- container
    target_id     INTEGER NOT NULL,
    value_type    TEXT    NOT NULL,
    value_id      INTEGER NOT NULL,
    value_str     TEXT
);

CREATE TABLE IF NOT EXISTS audits (
    audit_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    when_date      TEXT    NOT NULL,
    username       TEXT    NOT NULL,
    what           TEXT    NOT NULL,
    thing_type     TEXT    NOT NULL,
    thing_id       INTEGER NOT NULL,
    src_ip         TEXT,
    user_agent     TEXT,
    audit_data_ver INTEGER NOT NULL,
    audit_data     TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS permissions_target_idx ON permissions(target_type, target_id);
CREATE INDEX IF NOT EXISTS objects_type_idx       ON objects(target_type, deleted);
CREATE INDEX IF NOT EXISTS objects_parent_idx     ON objects(parent_type, parent_id);
CREATE INDEX IF NOT EXISTS links_v1_idx           ON links(v1_type, v1_id);
CREATE INDEX IF NOT EXISTS appearances_value_idx  ON appearances(value_type, value_id, when_date);
CREATE INDEX IF NOT EXISTS appearances_target_idx ON appearances(target_type, target_id);
CREATE INDEX IF NOT EXISTS audits_thing_idx       ON audits(thing_type, thing_id);

PRAGMA user_version = 1;
";
