//! Authentication Module
//!
//! Handles registration, login, token refresh, and bearer-token
//! verification. User records live in SQLite; sessions are stateless
//! signed JWTs carrying a profile snapshot, so there is no server-side
//! session table and no revocation list.

pub mod middleware;

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::{Error, Result};
use crate::models::{Claims, User};

/// Access token lifetime issued at login.
pub const ACCESS_TTL_LOGIN_SECS: i64 = 15 * 60;
/// Access token lifetime issued on refresh.
pub const ACCESS_TTL_REFRESH_SECS: i64 = 60 * 60;
/// Refresh token lifetime (also the cookie Max-Age).
pub const REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
/// Token lifetime issued at registration.
pub const REGISTER_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Profile returned by GET /auth/me, with the computed avatar initial
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub initial: String,
}

/// Auth manager handles credentials and token lifecycle
pub struct AuthManager {
    pool: SqlitePool,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    pub async fn new(pool: SqlitePool, jwt_secret: &str) -> Result<Self> {
        let manager = Self {
            pool,
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        };

        manager.init_db().await?;
        info!("[Auth] Initialized");

        Ok(manager)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                avatar_url TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a new user and issue a 7-day token.
    pub async fn register(
        &self,
        email: String,
        password: String,
        display_name: Option<String>,
        avatar_url: Option<String>,
    ) -> Result<(String, User)> {
        if email.is_empty() || password.is_empty() {
            return Err(Error::InvalidInput(
                "Email and password are required".to_string(),
            ));
        }

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;

        if existing.is_some() {
            return Err(Error::Conflict("Email already in use".to_string()));
        }

        let password_hash = hash(&password, DEFAULT_COST)
            .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash,
            display_name,
            avatar_url,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (id, email, password_hash, display_name, avatar_url, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(&user.avatar_url)
        .bind(user.created_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;

        info!("[Auth] User registered: {}", user.email);

        let token = self.issue_token(&user, REGISTER_TTL_SECS)?;
        Ok((token, user))
    }

    /// Login and issue a short-lived access token plus a refresh token.
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, String, User)> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or(Error::InvalidCredential)?;

        let valid = verify(password, &user.password_hash)
            .map_err(|e| Error::Internal(format!("Password verification failed: {}", e)))?;
        if !valid {
            return Err(Error::InvalidCredential);
        }

        let access = self.issue_token(&user, ACCESS_TTL_LOGIN_SECS)?;
        let refresh = self.issue_token(&user, REFRESH_TTL_SECS)?;

        info!("[Auth] User logged in: {}", user.email);

        Ok((access, refresh, user))
    }

    /// Exchange a refresh token for a fresh access/refresh pair.
    ///
    /// An expired or malformed token is `Forbidden`; a token referencing a
    /// user that no longer exists is `Unauthorized`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(String, String, User)> {
        let claims = self.verify_token(refresh_token)?;

        let user = self
            .get_user(&claims.user_id)
            .await?
            .ok_or_else(|| Error::Unauthorized("User not found".to_string()))?;

        let access = self.issue_token(&user, ACCESS_TTL_REFRESH_SECS)?;
        let refresh = self.issue_token(&user, REFRESH_TTL_SECS)?;

        Ok((access, refresh, user))
    }

    /// Sign a claim set snapshotting the user's profile at issuance.
    pub fn issue_token(&self, user: &User, ttl_secs: i64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: user.id.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            iat: now,
            exp: now + ttl_secs,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify a token's signature and expiry and return its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| {
                use jsonwebtoken::errors::ErrorKind;
                match err.kind() {
                    ErrorKind::ExpiredSignature => {
                        Error::Forbidden("Token expired".to_string())
                    }
                    ErrorKind::InvalidToken
                    | ErrorKind::InvalidSignature
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_) => Error::Forbidden("Invalid token".to_string()),
                    _ => Error::Internal(format!("Token verification failed: {}", err)),
                }
            })
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let row: Option<(String, String, String, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                "SELECT id, email, password_hash, display_name, avatar_url, created_at \
                 FROM users WHERE id = ?",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_user).transpose()
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<(String, String, String, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                "SELECT id, email, password_hash, display_name, avatar_url, created_at \
                 FROM users WHERE email = ?",
            )
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_user).transpose()
    }

    /// Profile for GET /auth/me with the single-character avatar initial.
    pub async fn current_user(&self, user_id: &str) -> Result<CurrentUser> {
        let user = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;

        let initial = user
            .display_name
            .as_ref()
            .and_then(|name| name.chars().next())
            .map(|c| c.to_uppercase().to_string())
            .unwrap_or_else(|| "U".to_string());

        Ok(CurrentUser {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            created_at: user.created_at,
            initial,
        })
    }
}

pub(crate) fn row_to_user(
    (id, email, password_hash, display_name, avatar_url, created_at): (
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        String,
    ),
) -> Result<User> {
    Ok(User {
        id,
        email,
        password_hash,
        display_name,
        avatar_url,
        created_at: db::parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (AuthManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = db::connect(&dir.path().join("users.sqlite")).await.unwrap();
        let auth = AuthManager::new(pool, "test-secret").await.unwrap();
        (auth, dir)
    }

    #[tokio::test]
    async fn test_register_then_duplicate_is_conflict() {
        let (auth, _dir) = setup().await;

        let (token, user) = auth
            .register(
                "alice@example.com".into(),
                "hunter22".into(),
                Some("Alice".into()),
                None,
            )
            .await
            .unwrap();
        assert!(!token.is_empty());
        assert_eq!(user.email, "alice@example.com");

        let err = auth
            .register("alice@example.com".into(), "other".into(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_register_requires_email_and_password() {
        let (auth, _dir) = setup().await;

        let err = auth
            .register("".into(), "pw".into(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_login_uniform_invalid_credential() {
        let (auth, _dir) = setup().await;
        auth.register("bob@example.com".into(), "secret99".into(), None, None)
            .await
            .unwrap();

        let unknown = auth.login("nobody@example.com", "secret99").await.unwrap_err();
        let wrong_pw = auth.login("bob@example.com", "not-it").await.unwrap_err();

        // Same variant, same message: no leak of which half failed.
        assert!(matches!(unknown, Error::InvalidCredential));
        assert!(matches!(wrong_pw, Error::InvalidCredential));
        assert_eq!(unknown.to_string(), wrong_pw.to_string());
    }

    #[tokio::test]
    async fn test_token_round_trip() {
        let (auth, _dir) = setup().await;
        auth.register(
            "carol@example.com".into(),
            "pw123456".into(),
            Some("Carol".into()),
            None,
        )
        .await
        .unwrap();

        let (access, _refresh, user) = auth.login("carol@example.com", "pw123456").await.unwrap();
        let claims = auth.verify_token(&access).unwrap();

        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.email, "carol@example.com");
        assert_eq!(claims.display_name.as_deref(), Some("Carol"));
    }

    #[tokio::test]
    async fn test_expired_token_is_forbidden() {
        let (auth, _dir) = setup().await;
        let (_, user) = auth
            .register("dave@example.com".into(), "pw123456".into(), None, None)
            .await
            .unwrap();

        // jsonwebtoken's default validation has 60s leeway.
        let stale = auth.issue_token(&user, -120).unwrap();
        let err = auth.verify_token(&stale).unwrap_err();
        assert!(matches!(err, Error::Forbidden(msg) if msg.contains("expired")));
    }

    #[tokio::test]
    async fn test_garbage_token_is_forbidden() {
        let (auth, _dir) = setup().await;
        let err = auth.verify_token("not.a.jwt").unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let (auth, _dir) = setup().await;
        auth.register("erin@example.com".into(), "pw123456".into(), None, None)
            .await
            .unwrap();

        let (_, refresh, user) = auth.login("erin@example.com", "pw123456").await.unwrap();
        let (new_access, new_refresh, refreshed) = auth.refresh(&refresh).await.unwrap();

        assert_eq!(refreshed.id, user.id);
        assert_eq!(auth.verify_token(&new_access).unwrap().user_id, user.id);
        assert_eq!(auth.verify_token(&new_refresh).unwrap().user_id, user.id);
    }

    #[tokio::test]
    async fn test_current_user_initial() {
        let (auth, _dir) = setup().await;
        let (_, named) = auth
            .register(
                "frank@example.com".into(),
                "pw123456".into(),
                Some("frank".into()),
                None,
            )
            .await
            .unwrap();
        let (_, unnamed) = auth
            .register("grace@example.com".into(), "pw123456".into(), None, None)
            .await
            .unwrap();

        assert_eq!(auth.current_user(&named.id).await.unwrap().initial, "F");
        assert_eq!(auth.current_user(&unnamed.id).await.unwrap().initial, "U");
    }
}
