//! Auth service: password login and short-lived HS256 bearer tokens.
//!
//! The verifier is a plain capability, `(bearer string) -> user | error`,
//! handed to the façade at composition time.

use std::time::Duration;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::types::parse_user_id;

/// JWT claims. `userId` accepts both UUIDs and legacy integer ids.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub username: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub exp: usize,
    #[serde(default)]
    pub admin: bool,
}

/// The authenticated caller injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub admin: bool,
}

#[derive(Debug, Error, Clone)]
pub enum AuthError {
    // These two messages are API surface; clients match on them.
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("admin scope required")]
    AdminRequired,

    #[error("storage error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Store(e.to_string())
    }
}

pub struct AuthService {
    pool: PgPool,
    jwt_secret: String,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(pool: PgPool, jwt_secret: String, token_ttl: Duration) -> Self {
        Self {
            pool,
            jwt_secret,
            token_ttl,
        }
    }

    /// Verify a password and issue a bearer token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, is_admin FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

        let stored: String = row.get("password_hash");
        let parsed = PasswordHash::new(&stored).map_err(|_| AuthError::InvalidCredentials)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let user_id: Uuid = row.get("id");
        let is_admin: bool = row.get("is_admin");
        self.issue_token(user_id, username, is_admin)
    }

    /// Register a user (operational convenience; the password flow itself
    /// is not part of the trading core).
    pub async fn register(&self, username: &str, password: &str) -> Result<Uuid, AuthError> {
        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Store(format!("hashing failed: {e}")))?
            .to_string();

        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, username, password_hash) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(username)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub fn issue_token(
        &self,
        user_id: Uuid,
        username: &str,
        admin: bool,
    ) -> Result<String, AuthError> {
        let exp = (Utc::now() + chrono::Duration::seconds(self.token_ttl.as_secs() as i64))
            .timestamp() as usize;
        let claims = Claims {
            username: username.to_string(),
            user_id: user_id.to_string(),
            exp,
            admin,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|_| AuthError::InvalidToken)
    }

    /// Verify a bearer token and resolve the caller.
    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let decoding_key = DecodingKey::from_secret(self.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        let data =
            decode::<Claims>(token, &decoding_key, &validation).map_err(|_| AuthError::InvalidToken)?;
        let user_id = parse_user_id(&data.claims.user_id).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthUser {
            user_id,
            username: data.claims.username,
            admin: data.claims.admin,
        })
    }

    /// Extract and verify the token from an `Authorization` header value.
    pub fn verify_bearer(&self, header: Option<&str>) -> Result<AuthUser, AuthError> {
        let header = header.ok_or(AuthError::MissingHeader)?;
        let token = header.strip_prefix("Bearer ").ok_or(AuthError::InvalidToken)?;
        self.verify(token)
    }
}
