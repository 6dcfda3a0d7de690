//! Legacy OpenID identity query builders.
//!
//! Only the OAuth2 migration step reads this table.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::{OpenidIdentities, Users};

/// Find the user owning a legacy OpenID identity (returns id, email).
pub fn find_user(identity: &str) -> Built {
    Query::select()
        .column((Users::Table, Users::Id))
        .column((Users::Table, Users::Email))
        .from(OpenidIdentities::Table)
        .inner_join(
            Users::Table,
            Expr::col((Users::Table, Users::Id))
                .equals((OpenidIdentities::Table, OpenidIdentities::UserId)),
        )
        .and_where(Expr::col((OpenidIdentities::Table, OpenidIdentities::Identity)).eq(identity))
        .build(SqliteQueryBuilder)
}

/// Insert a legacy identity. Used by imports and tests; nothing in the
/// OAuth2 flows creates new OpenID rows.
pub fn insert(user_id: i64, identity: &str) -> Built {
    Query::insert()
        .into_table(OpenidIdentities::Table)
        .columns([OpenidIdentities::UserId, OpenidIdentities::Identity])
        .values_panic([user_id.into(), identity.into()])
        .build(SqliteQueryBuilder)
}
