//! Mock identity layer.
//!
//! Authentication here is a demo affordance, not security: credentials are
//! compared in plaintext against an in-memory table and the resulting token
//! is unsigned base64-encoded JSON, trivially forgeable by design. The sync
//! core consumes only the [`Identity`] shape and the [`is_admin`] capability
//! gate, and the gate is the *caller's* responsibility to check before
//! exposing mutations; the core itself does not enforce it.

use crate::error::{Result, SyncError};
use crate::storage::StorageConnection;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Storage key for the persisted session token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Token lifetime: 24 hours.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Simulated network latency for authentication calls.
pub const DEFAULT_AUTH_LATENCY: Duration = Duration::from_millis(450);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// An authenticated identity, used only for display and the admin gate;
/// never persisted as part of a song.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    pub username: String,
    pub role: Role,
    pub name: String,
}

/// Claims carried inside the unsigned pseudo-token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: u64,
    pub username: String,
    pub role: Role,
    pub name: String,
    /// Issued at, unix seconds.
    pub iat: i64,
    /// Expires at, unix seconds.
    pub exp: i64,
}

/// A successful authentication: the identity plus its minted token.
#[derive(Clone, Debug)]
pub struct Session {
    pub identity: Identity,
    pub token: String,
}

/// Whether this identity may be offered the mutating operations.
pub fn is_admin(identity: &Identity) -> bool {
    identity.role == Role::Admin
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Mint an unsigned pseudo-token for `identity`, expiring in 24 hours.
pub fn mint_token(identity: &Identity) -> Result<String> {
    mint_token_at(identity, unix_now())
}

fn mint_token_at(identity: &Identity, now: i64) -> Result<String> {
    let claims = TokenClaims {
        sub: identity.id,
        username: identity.username.clone(),
        role: identity.role,
        name: identity.name.clone(),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };
    Ok(BASE64.encode(serde_json::to_vec(&claims)?))
}

/// Decode a pseudo-token without checking expiry.
pub fn parse_token(token: &str) -> Result<TokenClaims> {
    let bytes = BASE64
        .decode(token)
        .map_err(|e| SyncError::TokenInvalid(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| SyncError::TokenInvalid(e.to_string()))
}

/// Decode and validate a pseudo-token, returning the carried identity.
pub fn identity_from_token(token: &str) -> Result<Identity> {
    identity_from_token_at(token, unix_now())
}

fn identity_from_token_at(token: &str, now: i64) -> Result<Identity> {
    let claims = parse_token(token)?;
    if claims.exp <= now {
        return Err(SyncError::TokenExpired);
    }
    Ok(Identity {
        id: claims.sub,
        username: claims.username,
        role: claims.role,
        name: claims.name,
    })
}

#[derive(Clone)]
struct MockUser {
    identity: Identity,
    password: String,
}

/// Mock credential table with simulated call latency.
pub struct AuthService {
    users: RwLock<HashMap<String, MockUser>>,
    latency: Duration,
}

impl AuthService {
    /// Seed the two demo users with the default simulated latency.
    pub fn new() -> Self {
        Self::with_latency(DEFAULT_AUTH_LATENCY)
    }

    pub fn with_latency(latency: Duration) -> Self {
        let service = Self {
            users: RwLock::new(HashMap::new()),
            latency,
        };
        service.seed_demo_users();
        service
    }

    fn seed_demo_users(&self) {
        let mut users = self.users.write();
        for (id, username, password, role, name) in [
            (1, "admin@test.com", "admin123", Role::Admin, "Admin User"),
            (2, "user@test.com", "user123", Role::User, "Regular User"),
        ] {
            users.insert(
                username.to_string(),
                MockUser {
                    identity: Identity {
                        id,
                        username: username.to_string(),
                        role,
                        name: name.to_string(),
                    },
                    password: password.to_string(),
                },
            );
        }
    }

    /// Check credentials and mint a session.
    ///
    /// The one place in the crate where a user-visible error is expected:
    /// bad credentials surface as [`SyncError::InvalidCredentials`].
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Session> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let users = self.users.read();
        let user = users
            .get(username)
            .filter(|u| u.password == password)
            .ok_or(SyncError::InvalidCredentials)?;

        Ok(Session {
            token: mint_token(&user.identity)?,
            identity: user.identity.clone(),
        })
    }

    /// Add a user. Rejects an already-registered username.
    pub fn register(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        role: Role,
        name: impl Into<String>,
    ) -> Result<Identity> {
        let username = username.into();
        let mut users = self.users.write();
        if users.contains_key(&username) {
            return Err(SyncError::UserExists(username));
        }

        let id = users.values().map(|u| u.identity.id).max().unwrap_or(0) + 1;
        let identity = Identity {
            id,
            username: username.clone(),
            role,
            name: name.into(),
        };
        users.insert(
            username,
            MockUser {
                identity: identity.clone(),
                password: password.into(),
            },
        );
        Ok(identity)
    }
}

impl Default for AuthService {
    fn default() -> Self {
        Self::new()
    }
}

/// Persist a session token on the shared storage.
pub fn store_token(conn: &StorageConnection, token: &str) -> Result<()> {
    conn.set_item(AUTH_TOKEN_KEY, token)
}

/// Load the persisted session identity, if a valid unexpired token exists.
pub fn load_session(conn: &StorageConnection) -> Option<Identity> {
    let token = conn.get_item(AUTH_TOKEN_KEY).ok().flatten()?;
    match identity_from_token(&token) {
        Ok(identity) => Some(identity),
        Err(e) => {
            warn!(error = %e, "stored session token rejected");
            None
        }
    }
}

/// Remove the persisted session token.
pub fn clear_token(conn: &StorageConnection) -> Result<()> {
    conn.remove_item(AUTH_TOKEN_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthService {
        AuthService::with_latency(Duration::ZERO)
    }

    #[test]
    fn test_authenticate_demo_admin() {
        let session = auth().authenticate("admin@test.com", "admin123").unwrap();
        assert_eq!(session.identity.role, Role::Admin);
        assert!(is_admin(&session.identity));

        let carried = identity_from_token(&session.token).unwrap();
        assert_eq!(carried, session.identity);
    }

    #[test]
    fn test_bad_credentials_are_surfaced() {
        let auth = auth();
        assert!(matches!(
            auth.authenticate("admin@test.com", "wrong"),
            Err(SyncError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.authenticate("nobody@test.com", "admin123"),
            Err(SyncError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_regular_user_is_not_admin() {
        let session = auth().authenticate("user@test.com", "user123").unwrap();
        assert!(!is_admin(&session.identity));
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let auth = auth();
        auth.register("new@test.com", "pw", Role::User, "New User")
            .unwrap();
        assert!(matches!(
            auth.register("new@test.com", "pw2", Role::User, "Imposter"),
            Err(SyncError::UserExists(_))
        ));
    }

    #[test]
    fn test_token_claims_shape() {
        let identity = Identity {
            id: 7,
            username: "admin@test.com".into(),
            role: Role::Admin,
            name: "Admin User".into(),
        };
        let token = mint_token_at(&identity, 1_000_000).unwrap();
        let claims = parse_token(&token).unwrap();

        assert_eq!(claims.sub, 7);
        assert_eq!(claims.iat, 1_000_000);
        assert_eq!(claims.exp, 1_000_000 + TOKEN_TTL_SECS);
    }

    #[test]
    fn test_expired_token_rejected() {
        let identity = Identity {
            id: 1,
            username: "admin@test.com".into(),
            role: Role::Admin,
            name: "Admin User".into(),
        };
        let token = mint_token_at(&identity, 1_000_000).unwrap();

        assert!(identity_from_token_at(&token, 1_000_000 + 1).is_ok());
        assert!(matches!(
            identity_from_token_at(&token, 1_000_000 + TOKEN_TTL_SECS),
            Err(SyncError::TokenExpired)
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            parse_token("not!base64!"),
            Err(SyncError::TokenInvalid(_))
        ));
        // Valid base64, invalid claims.
        let garbage = BASE64.encode(b"[1,2,3]");
        assert!(matches!(
            parse_token(&garbage),
            Err(SyncError::TokenInvalid(_))
        ));
    }
}
