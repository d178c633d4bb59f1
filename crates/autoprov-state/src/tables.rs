//! redb table definitions for the count store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized types).
//! Keys start with `{app}|{zone}|` so one (app, zone) is a prefix scan.

use redb::TableDefinition;

/// Per-node cumulative counts keyed by `{app}|{zone}|{node}`.
pub const COUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("counts");

/// Created app instances keyed by `{app}|{zone}`.
pub const APP_INSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("app_insts");
