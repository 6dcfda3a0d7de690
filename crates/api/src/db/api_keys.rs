//! API key query builders.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::{ApiKeys, Users};

/// Lookup user by API key hash (returns id, email).
pub fn get_user_by_key_hash(key_hash: &str) -> Built {
    Query::select()
        .column((Users::Table, Users::Id))
        .column((Users::Table, Users::Email))
        .from(ApiKeys::Table)
        .inner_join(
            Users::Table,
            Expr::col((Users::Table, Users::Id)).equals((ApiKeys::Table, ApiKeys::UserId)),
        )
        .and_where(Expr::col((ApiKeys::Table, ApiKeys::KeyHash)).eq(key_hash))
        .build(SqliteQueryBuilder)
}

/// Insert an API key row.
pub fn insert(user_id: i64, key_hash: &str, key_prefix: &str) -> Built {
    Query::insert()
        .into_table(ApiKeys::Table)
        .columns([ApiKeys::UserId, ApiKeys::KeyHash, ApiKeys::KeyPrefix])
        .values_panic([user_id.into(), key_hash.into(), key_prefix.into()])
        .build(SqliteQueryBuilder)
}
