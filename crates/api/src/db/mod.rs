//! Shared database schema, migrations, and query builders.
//!
//! Builders return `(sql, values)` pairs; the server runs them through
//! rusqlite.

pub mod api_keys;
pub mod identities;
pub mod migrations;
pub mod openid;
pub mod tables;
pub mod users;

// Re-export tables for convenience
pub use tables::*;

/// A built statement: SQL text plus bound values.
pub type Built = (String, sea_query::Values);
