//! Account flows: OAuth2 login, signup, and identity linking.
//!
//! The provider round-trip ([`authenticate`]) is async and touches no
//! database. Everything after it is synchronous and runs on one connection,
//! so the mutex guard never crosses an `.await`.

mod legacy;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

use accountlink_api::db::{api_keys, identities, users};
use accountlink_api::service::{self, SignupPolicy};
use accountlink_api::{AuthError, ExternalIdentity, Identity, User, identity_tag};

use crate::policy::{LoginAttempt, LoginPolicy, PolicyVerdict};
use crate::provider::OAuthProvider;
use crate::storage::{is_unique_violation, sq_execute, sq_query_map, sq_query_row};

// ── Provider round-trip ─────────────────────────────────────────────────────

/// Parameters of one inbound request to an OAuth endpoint.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest<'a> {
    /// Authorization code from the provider callback.
    pub code: Option<&'a str>,
    /// `error` parameter from the provider callback.
    pub error: Option<&'a str>,
    /// Where the provider sends the browser back to.
    pub redirect_uri: &'a str,
    /// Outgoing `state` for phase 1.
    pub state: &'a str,
    /// Client address, for the login policy.
    pub client: &'a str,
}

/// Outcome of [`authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Phase 1: send the browser here and stop.
    Redirect(String),
    /// Phase 2: the provider vouched for this identity.
    Resolved(ExternalIdentity),
}

/// Run whichever phase of the OAuth2 round-trip the request is in.
///
/// Without a code the caller gets a redirect to the provider. With a code the
/// login policy is asked first; only an `Allow` leads to the token exchange.
pub async fn authenticate<P, L>(
    provider: &P,
    policy: &L,
    req: &AuthRequest<'_>,
) -> Result<AuthStep, AuthError>
where
    P: OAuthProvider,
    L: LoginPolicy + ?Sized,
{
    if let Some(error) = req.error {
        return Err(if error == "access_denied" {
            AuthError::AuthenticationCancelled("access denied at the provider".into())
        } else {
            AuthError::AuthenticationFailed(format!("provider returned '{error}'"))
        });
    }

    let Some(code) = req.code.filter(|c| !c.is_empty()) else {
        return Ok(AuthStep::Redirect(
            provider.authorization_url(req.redirect_uri, req.state),
        ));
    };

    let attempt = LoginAttempt {
        provider: provider.key(),
        client: req.client,
    };
    if let PolicyVerdict::Deny(reason) = policy.check(&attempt) {
        return Err(AuthError::AuthenticationCancelled(reason));
    }

    let tokens = provider.exchange_code(code, req.redirect_uri).await?;
    let identity = provider.user_details(&tokens).await?;
    if identity.uid.trim().is_empty() {
        return Err(AuthError::AuthenticationFailed(
            "provider did not return a user id".into(),
        ));
    }

    tracing::debug!(provider = provider.key(), "provider resolved identity");
    Ok(AuthStep::Resolved(identity))
}

// ── Login ───────────────────────────────────────────────────────────────────

/// Find the local user for a resolved identity.
///
/// Falls back to the legacy OpenID migration when the provider sent an
/// `openid_id`. Fails with `AccountNotFound` when neither matches.
pub fn login(conn: &mut Connection, identity: &ExternalIdentity) -> Result<User, AuthError> {
    let uid = service::validate_uid(&identity.uid)
        .map_err(|_| AuthError::AuthenticationFailed("provider did not return a user id".into()))?;
    let provider = identity.provider.as_str();

    let tx = begin(conn, "login")?;

    if let Some(user) = find_user_by_identity(&tx, provider, uid)? {
        tracing::info!(user_id = user.id, provider, "login");
        return Ok(user.with_identity(provider, uid));
    }

    let migrated = match identity.openid_id.as_deref() {
        Some(openid_id) => legacy::migrate_openid(&tx, provider, uid, openid_id)?,
        None => None,
    };

    match migrated {
        Some(user) => {
            tx.commit().map_err(AuthError::from_db("commit login"))?;
            Ok(user.with_identity(provider, uid))
        }
        None => Err(AuthError::AccountNotFound {
            identity: identity_tag(provider, uid),
        }),
    }
}

// ── Signup ──────────────────────────────────────────────────────────────────

/// Create a user and its first identity.
///
/// Every check runs before the first write, and both inserts share one
/// transaction, so a rejected signup leaves no rows behind.
pub fn signup(
    conn: &mut Connection,
    identity: &ExternalIdentity,
    policy: &SignupPolicy,
) -> Result<User, AuthError> {
    let email = service::signup_email(identity.email.as_deref(), policy)?;
    let uid = service::validate_uid(&identity.uid)?;
    let provider = identity.provider.as_str();

    let tx = begin(conn, "signup")?;

    if let Some(email) = email.as_deref() {
        let taken: bool = sq_query_row(&tx, users::email_exists(email), |row| row.get(0))
            .map_err(AuthError::from_db("email lookup"))?;
        if taken {
            return Err(AuthError::AccountExists);
        }
    }
    ensure_identity_free(&tx, provider, uid)?;

    let user_id = insert_user(&tx, email.as_deref())?;
    insert_identity(&tx, user_id, provider, uid)?;

    tx.commit().map_err(AuthError::from_db("commit signup"))?;

    tracing::info!(user_id, provider, "signup");
    Ok(User {
        id: user_id,
        email,
        identity: Some(identity_tag(provider, uid)),
    })
}

// ── Identity management ─────────────────────────────────────────────────────

/// Link another identity to an existing user.
pub fn add_identity(
    conn: &mut Connection,
    user_id: i64,
    identity: &ExternalIdentity,
) -> Result<User, AuthError> {
    let uid = service::validate_uid(&identity.uid)?;
    let provider = identity.provider.as_str();

    let tx = begin(conn, "link")?;
    let user = require_user(&tx, user_id)?;
    ensure_identity_free(&tx, provider, uid)?;
    insert_identity(&tx, user.id, provider, uid)?;
    tx.commit().map_err(AuthError::from_db("commit link"))?;

    tracing::info!(user_id, provider, "identity linked");
    Ok(user.with_identity(provider, uid))
}

/// Unlink an identity. Returns whether a row was removed; a missing
/// `(user, provider, uid)` triple is not an error.
pub fn remove_identity(
    conn: &Connection,
    user_id: i64,
    provider: &str,
    uid: &str,
) -> Result<bool, AuthError> {
    require_user(conn, user_id)?;
    let removed = sq_execute(conn, identities::delete(user_id, provider, uid))
        .map_err(AuthError::from_db("identity delete"))?;
    if removed > 0 {
        tracing::info!(user_id, provider, "identity unlinked");
    }
    Ok(removed > 0)
}

/// Identities linked to a user, oldest first.
pub fn list_identities(conn: &Connection, user_id: i64) -> Result<Vec<Identity>, AuthError> {
    require_user(conn, user_id)?;
    sq_query_map(conn, identities::find_by_user(user_id), |row| {
        Ok(Identity {
            user_id: row.get(0)?,
            provider: row.get(1)?,
            uid: row.get(2)?,
            created_at: row.get(3)?,
        })
    })
    .map_err(AuthError::from_db("identity list"))
}

// ── API keys ────────────────────────────────────────────────────────────────

/// Issue a fresh bearer key for a user. Only its hash is stored.
pub fn issue_api_key(conn: &Connection, user_id: i64) -> Result<String, AuthError> {
    let api_key = service::generate_api_key().map_err(AuthError::from_db("api key generation"))?;
    sq_execute(
        conn,
        api_keys::insert(
            user_id,
            &service::hash_api_key(&api_key),
            &service::key_prefix(&api_key),
        ),
    )
    .map_err(AuthError::from_db("api key insert"))?;
    Ok(api_key)
}

/// Resolve a bearer key to its user.
pub fn find_user_by_api_key(conn: &Connection, api_key: &str) -> Result<Option<User>, AuthError> {
    sq_query_row(
        conn,
        api_keys::get_user_by_key_hash(&service::hash_api_key(api_key)),
        read_user,
    )
    .optional()
    .map_err(AuthError::from_db("api key lookup"))
}

// ── Internal ────────────────────────────────────────────────────────────────

fn begin<'c>(conn: &'c mut Connection, context: &str) -> Result<Transaction<'c>, AuthError> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| AuthError::Storage(format!("begin {context}: {e}")))
}

fn read_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        identity: None,
    })
}

fn find_user_by_identity(
    conn: &Connection,
    provider: &str,
    uid: &str,
) -> Result<Option<User>, AuthError> {
    sq_query_row(conn, identities::find_user(provider, uid), read_user)
        .optional()
        .map_err(AuthError::from_db("identity lookup"))
}

fn require_user(conn: &Connection, user_id: i64) -> Result<User, AuthError> {
    sq_query_row(conn, users::get_by_id(user_id), read_user)
        .optional()
        .map_err(AuthError::from_db("user lookup"))?
        .ok_or_else(|| AuthError::InvalidArgument(format!("no user with id {user_id}")))
}

fn ensure_identity_free(conn: &Connection, provider: &str, uid: &str) -> Result<(), AuthError> {
    let taken: bool = sq_query_row(conn, identities::exists(provider, uid), |row| row.get(0))
        .map_err(AuthError::from_db("identity lookup"))?;
    if taken {
        return Err(identity_exists(provider, uid));
    }
    Ok(())
}

fn insert_user(conn: &Connection, email: Option<&str>) -> Result<i64, AuthError> {
    sq_execute(conn, users::insert(email)).map_err(|e| {
        if is_unique_violation(&e) {
            AuthError::AccountExists
        } else {
            AuthError::Storage(format!("user insert: {e}"))
        }
    })?;
    Ok(conn.last_insert_rowid())
}

fn insert_identity(conn: &Connection, user_id: i64, provider: &str, uid: &str) -> Result<(), AuthError> {
    sq_execute(conn, identities::insert(user_id, provider, uid)).map_err(|e| {
        if is_unique_violation(&e) {
            identity_exists(provider, uid)
        } else {
            AuthError::Storage(format!("identity insert: {e}"))
        }
    })?;
    Ok(())
}

fn identity_exists(provider: &str, uid: &str) -> AuthError {
    AuthError::IdentityExists {
        provider: provider.to_string(),
        uid: uid.to_string(),
    }
}
