//! User query builders.

use sea_query::{Asterisk, Expr, Func, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::Users;

/// Find user by id (returns id, email).
pub fn get_by_id(user_id: i64) -> Built {
    Query::select()
        .columns([Users::Id, Users::Email])
        .from(Users::Table)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

/// Check email existence.
pub fn email_exists(email: &str) -> Built {
    Query::select()
        .expr(Expr::expr(Func::count(Expr::col(Asterisk))).gt(0))
        .from(Users::Table)
        .and_where(Expr::col(Users::Email).eq(email))
        .build(SqliteQueryBuilder)
}

/// Insert a user. The new id comes from `last_insert_rowid`.
pub fn insert(email: Option<&str>) -> Built {
    Query::insert()
        .into_table(Users::Table)
        .columns([Users::Email])
        .values_panic([email.map(|s| s.to_string()).into()])
        .build(SqliteQueryBuilder)
}
