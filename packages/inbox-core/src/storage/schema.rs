//! # Database Schema
//!
//! SQL schema for the SQLite-backed key-value store.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────────────────┐                 │
//! │  │ schema_version  │    │        kv_entries           │                 │
//! │  ├─────────────────┤    ├─────────────────────────────┤                 │
//! │  │ version         │    │ key         "CONSENT_0x.."  │                 │
//! │  └─────────────────┘    │ kind        string|number|  │                 │
//! │                         │             bool            │                 │
//! │                         │ value       text form       │                 │
//! │                         │ updated_at  unix seconds    │                 │
//! │                         └─────────────────────────────┘                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Flat key-value entries
-- Keys are encoded StorageKey strings: DOMAIN_<id1>[_<id2>]
CREATE TABLE IF NOT EXISTS kv_entries (
    key TEXT PRIMARY KEY,
    -- Type tag so a stored false/0/"" is never mistaken for absent
    kind TEXT NOT NULL CHECK (kind IN ('string', 'number', 'bool')),
    -- Text form of the value
    value TEXT NOT NULL,
    -- Last write timestamp
    updated_at INTEGER NOT NULL
);
"#;
