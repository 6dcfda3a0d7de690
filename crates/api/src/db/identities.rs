//! OAuth identity query builders.

use sea_query::{Asterisk, Expr, Func, Order, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::{OauthIdentities, Users};

/// Find the user owning an OAuth identity (returns id, email).
pub fn find_user(provider: &str, uid: &str) -> Built {
    Query::select()
        .column((Users::Table, Users::Id))
        .column((Users::Table, Users::Email))
        .from(OauthIdentities::Table)
        .inner_join(
            Users::Table,
            Expr::col((Users::Table, Users::Id))
                .equals((OauthIdentities::Table, OauthIdentities::UserId)),
        )
        .and_where(Expr::col((OauthIdentities::Table, OauthIdentities::Provider)).eq(provider))
        .and_where(Expr::col((OauthIdentities::Table, OauthIdentities::Uid)).eq(uid))
        .build(SqliteQueryBuilder)
}

/// Check whether a `(provider, uid)` pair is linked to any user.
pub fn exists(provider: &str, uid: &str) -> Built {
    Query::select()
        .expr(Expr::expr(Func::count(Expr::col(Asterisk))).gt(0))
        .from(OauthIdentities::Table)
        .and_where(Expr::col(OauthIdentities::Provider).eq(provider))
        .and_where(Expr::col(OauthIdentities::Uid).eq(uid))
        .build(SqliteQueryBuilder)
}

/// Link an identity to a user.
pub fn insert(user_id: i64, provider: &str, uid: &str) -> Built {
    Query::insert()
        .into_table(OauthIdentities::Table)
        .columns([
            OauthIdentities::UserId,
            OauthIdentities::Provider,
            OauthIdentities::Uid,
        ])
        .values_panic([user_id.into(), provider.into(), uid.into()])
        .build(SqliteQueryBuilder)
}

/// Unlink an identity. `(provider, uid)` is unique, so at most one row matches.
pub fn delete(user_id: i64, provider: &str, uid: &str) -> Built {
    Query::delete()
        .from_table(OauthIdentities::Table)
        .and_where(Expr::col(OauthIdentities::UserId).eq(user_id))
        .and_where(Expr::col(OauthIdentities::Provider).eq(provider))
        .and_where(Expr::col(OauthIdentities::Uid).eq(uid))
        .build(SqliteQueryBuilder)
}

/// All identities of a user, oldest first (returns user_id, provider, uid, created_at).
pub fn find_by_user(user_id: i64) -> Built {
    Query::select()
        .columns([
            OauthIdentities::UserId,
            OauthIdentities::Provider,
            OauthIdentities::Uid,
            OauthIdentities::CreatedAt,
        ])
        .from(OauthIdentities::Table)
        .and_where(Expr::col(OauthIdentities::UserId).eq(user_id))
        .order_by(OauthIdentities::CreatedAt, Order::Asc)
        .order_by(OauthIdentities::Id, Order::Asc)
        .build(SqliteQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_user_joins_users() {
        let (sql, values) = find_user("google", "abc123");
        assert!(sql.contains(r#"INNER JOIN "users""#));
        assert!(sql.contains(r#""oauth_identities"."provider" = ?"#));
        assert_eq!(values.0.len(), 2);
    }

    #[test]
    fn delete_is_scoped_to_user() {
        let (sql, values) = delete(3, "google", "abc123");
        assert!(sql.starts_with(r#"DELETE FROM "oauth_identities""#));
        assert!(sql.contains(r#""user_id" = ?"#));
        assert_eq!(values.0.len(), 3);
    }
}
