//! Compile-time–checked column identifiers for all tables.

use sea_query::Iden;

#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    Email,
    CreatedAt,
}

#[derive(Iden)]
pub enum OauthIdentities {
    Table,
    Id,
    UserId,
    Provider,
    Uid,
    CreatedAt,
}

/// Legacy OpenID 2.0 identities, kept only as a migration source.
#[derive(Iden)]
pub enum OpenidIdentities {
    Table,
    Id,
    UserId,
    Identity,
    CreatedAt,
}

#[derive(Iden)]
pub enum ApiKeys {
    Table,
    Id,
    UserId,
    KeyHash,
    KeyPrefix,
    CreatedAt,
}
