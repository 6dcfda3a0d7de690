//! One-off migration from legacy OpenID 2.0 identities.
//!
//! Providers that retired OpenID 2.0 can report the old identity as the
//! `openid_id` claim of their `id_token`. A user who only ever signed in with
//! OpenID gets an OAuth2 identity linked on their first OAuth2 login.
//!
//! TODO: delete this module and `openid_identities` once every legacy row has
//! a matching `oauth_identities` row.

use rusqlite::{Connection, OptionalExtension};

use accountlink_api::db::{identities, openid};
use accountlink_api::{AuthError, User};

use crate::storage::{is_unique_violation, sq_execute, sq_query_row};

/// Link `(provider, uid)` to the owner of `openid_id`, if there is one.
///
/// Must run inside the caller's transaction, after the caller has confirmed
/// that `(provider, uid)` is not linked yet.
pub(super) fn migrate_openid(
    tx: &Connection,
    provider: &str,
    uid: &str,
    openid_id: &str,
) -> Result<Option<User>, AuthError> {
    let owner = sq_query_row(tx, openid::find_user(openid_id), |row| {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            identity: None,
        })
    })
    .optional()
    .map_err(AuthError::from_db("openid lookup"))?;

    let Some(user) = owner else {
        return Ok(None);
    };

    sq_execute(tx, identities::insert(user.id, provider, uid)).map_err(|e| {
        if is_unique_violation(&e) {
            AuthError::IdentityExists {
                provider: provider.to_string(),
                uid: uid.to_string(),
            }
        } else {
            AuthError::Storage(format!("openid migration insert: {e}"))
        }
    })?;

    tracing::info!(
        user_id = user.id,
        provider,
        "migrated legacy OpenID identity to OAuth2"
    );
    Ok(Some(user))
}
