//! Account authentication for the client portal.
//!
//! Passwords are argon2 hashes, API credentials are HS256 JWTs bound to a
//! row in `user_sessions`. Deactivating that row revokes every token issued
//! for it.

pub mod jwt;
pub mod password;
pub mod validation;

use chrono::{Duration, SecondsFormat, Utc};
use portal_config::AuthConfig;
use portal_database::{
    CreateSessionRequest, CreateUserRequest, DatabaseError, SessionRepository, User,
    UserRepository, UserRole,
};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use jwt::{Claims, JwtManager, TokenType};
pub use validation::ValidationError;

/// Length of passwords generated for accounts created without one.
pub const GENERATED_PASSWORD_LENGTH: usize = 12;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user already exists")]
    UserExists,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("session is no longer active")]
    InvalidSession,
    #[error("invalid or expired reset token")]
    InvalidResetToken,
    #[error("invalid verification token")]
    InvalidVerificationToken,
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("token creation failed: {0}")]
    TokenCreation(String),
    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] argon2::password_hash::Error),
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Where a login came from; stored with the session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing)]
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: UserRole,
}

/// A freshly created account.
#[derive(Debug, Clone)]
pub struct CreatedAccount {
    pub user: User,
    /// Set when the password was generated rather than chosen.
    pub generated_password: Option<String>,
    pub verification_token: String,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub account: CreatedAccount,
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub tokens: AuthTokens,
}

/// The caller behind a valid access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub session_id: String,
}

/// A reset token to hand to the account owner; only its digest is stored.
#[derive(Debug, Clone)]
pub struct PasswordResetTicket {
    pub user: User,
    pub token: String,
    pub expires_at: String,
}

#[derive(Clone)]
pub struct Authenticator {
    users: UserRepository,
    sessions: SessionRepository,
    jwt: JwtManager,
    session_ttl: Duration,
    reset_ttl: Duration,
}

impl Authenticator {
    pub fn new(pool: SqlitePool, config: &AuthConfig) -> Self {
        let jwt = JwtManager::new(
            &config.jwt_secret,
            config.issuer.clone(),
            config.audience.clone(),
        )
        .with_durations(
            std::time::Duration::from_secs(config.access_token_ttl_seconds),
            std::time::Duration::from_secs(config.refresh_token_ttl_seconds),
        );

        Self {
            users: UserRepository::new(pool.clone()),
            sessions: SessionRepository::new(pool),
            jwt,
            session_ttl: seconds(config.session_ttl_seconds),
            reset_ttl: seconds(config.reset_token_ttl_seconds),
        }
    }

    pub fn users(&self) -> &UserRepository {
        &self.users
    }

    /// Validate and store a new account without logging it in.
    pub async fn create_account(&self, account: NewAccount) -> Result<CreatedAccount, AuthError> {
        let email = account.email.trim().to_lowercase();
        validation::validate_email(&email)?;
        validation::validate_name("First name", &account.first_name)?;
        validation::validate_name("Last name", &account.last_name)?;
        if let Some(phone) = account.phone.as_deref().filter(|p| !p.trim().is_empty()) {
            validation::validate_phone(phone)?;
        }

        let (password, generated_password) = match account.password {
            Some(password) => {
                validation::validate_password(&password)?;
                (password, None)
            }
            None => {
                let generated = password::generate_random_password(GENERATED_PASSWORD_LENGTH);
                (generated.clone(), Some(generated))
            }
        };

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        let verification_token = password::generate_token();
        let user = self
            .users
            .create(&CreateUserRequest {
                email,
                password_hash: password::hash_password(&password)?,
                first_name: account.first_name.trim().to_string(),
                last_name: account.last_name.trim().to_string(),
                company: account.company,
                phone: account.phone,
                role: account.role,
                is_verified: account.role == UserRole::Admin,
                verification_token: Some(verification_token.clone()),
                timezone: None,
            })
            .await
            .map_err(|err| match err {
                DatabaseError::Duplicate(_) => AuthError::UserExists,
                other => AuthError::Database(other),
            })?;

        info!(user_id = %user.id, role = %user.role, "account created");

        Ok(CreatedAccount {
            user,
            generated_password,
            verification_token,
        })
    }

    /// Self-registration: always a client account, logged in immediately.
    pub async fn register(
        &self,
        mut account: NewAccount,
        client: &ClientInfo,
    ) -> Result<Registration, AuthError> {
        account.role = UserRole::Client;
        let account = self.create_account(account).await?;
        let tokens = self.start_session(&account.user, client).await?;
        Ok(Registration { account, tokens })
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            debug!("login for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify_password(password, &user.password_hash) {
            debug!(user_id = %user.id, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let tokens = self.start_session(&user, client).await?;
        self.users.touch_last_login(&user.id).await?;
        info!(user_id = %user.id, session_id = %tokens.session_id, "user logged in");

        Ok(LoginOutcome { user, tokens })
    }

    /// Resolve an access token to its user, checking the backing session.
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.jwt.validate_token(token, TokenType::Access)?;
        let user = self.active_session_user(&claims).await?;
        Ok(AuthenticatedUser {
            user,
            session_id: claims.session_id,
        })
    }

    /// Exchange a refresh token for a new access token on the same session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let claims = self.jwt.validate_token(refresh_token, TokenType::Refresh)?;
        let user = self.active_session_user(&claims).await?;

        let access_token = self.jwt.generate_token(
            &user.id,
            &claims.session_id,
            user.role.as_str(),
            TokenType::Access,
        )?;

        Ok(AuthTokens {
            access_token,
            refresh_token: refresh_token.to_string(),
            token_type: "Bearer",
            expires_in: self.jwt.access_duration().as_secs(),
            session_id: claims.session_id,
        })
    }

    pub async fn logout(&self, session_id: &str) -> Result<(), AuthError> {
        if self.sessions.deactivate(session_id).await? {
            info!(session_id, "session closed");
        }
        Ok(())
    }

    /// Replace the password after checking the current one; every other
    /// session of the user is closed.
    pub async fn change_password(
        &self,
        user_id: &str,
        current_session: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validation::validate_password(new_password)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !password::verify_password(current_password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        self.users
            .update_password(user_id, &password::hash_password(new_password)?)
            .await?;
        let closed = self
            .sessions
            .deactivate_all_for_user(user_id, Some(current_session))
            .await?;
        info!(user_id, closed_sessions = closed, "password changed");
        Ok(())
    }

    /// Returns a ticket only when an active account exists; callers must
    /// answer identically either way.
    pub async fn request_password_reset(
        &self,
        email: &str,
    ) -> Result<Option<PasswordResetTicket>, AuthError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(None);
        };
        if !user.is_active {
            warn!(user_id = %user.id, "password reset requested for disabled account");
            return Ok(None);
        }

        let token = password::generate_token();
        let expires_at = timestamp_after(self.reset_ttl);
        self.users
            .set_reset_token(&user.id, &password::token_digest(&token), &expires_at)
            .await?;
        info!(user_id = %user.id, "password reset token issued");

        Ok(Some(PasswordResetTicket {
            user,
            token,
            expires_at,
        }))
    }

    /// Consume a reset token once. All sessions of the account are closed.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        validation::validate_password(new_password)?;
        let new_hash = password::hash_password(new_password)?;

        let user_id = self
            .users
            .consume_reset_token(
                &password::token_digest(token),
                &timestamp_after(Duration::zero()),
                &new_hash,
            )
            .await?
            .ok_or(AuthError::InvalidResetToken)?;

        info!(user_id = %user_id, "password reset completed");
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> Result<User, AuthError> {
        let user = self
            .users
            .verify_email(token)
            .await?
            .ok_or(AuthError::InvalidVerificationToken)?;
        info!(user_id = %user.id, "email verified");
        Ok(user)
    }

    async fn start_session(&self, user: &User, client: &ClientInfo) -> Result<AuthTokens, AuthError> {
        let session = self
            .sessions
            .create(&CreateSessionRequest {
                user_id: user.id.clone(),
                session_token: password::generate_token(),
                expires_at: timestamp_after(self.session_ttl),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            })
            .await?;

        let role = user.role.as_str();
        Ok(AuthTokens {
            access_token: self
                .jwt
                .generate_token(&user.id, &session.id, role, TokenType::Access)?,
            refresh_token: self
                .jwt
                .generate_token(&user.id, &session.id, role, TokenType::Refresh)?,
            token_type: "Bearer",
            expires_in: self.jwt.access_duration().as_secs(),
            session_id: session.id,
        })
    }

    async fn active_session_user(&self, claims: &Claims) -> Result<User, AuthError> {
        let session = self
            .sessions
            .find_by_id(&claims.session_id)
            .await?
            .ok_or(AuthError::InvalidSession)?;

        if !session.is_active
            || session.user_id != claims.sub
            || session.expires_at <= timestamp_after(Duration::zero())
        {
            return Err(AuthError::InvalidSession);
        }

        let user = self
            .users
            .find_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::InvalidSession)?;
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }
        Ok(user)
    }
}

/// Configured lifetimes are capped at a century.
fn seconds(value: u64) -> Duration {
    const MAX_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;
    Duration::seconds(value.min(MAX_SECONDS) as i64)
}

fn timestamp_after(offset: Duration) -> String {
    (Utc::now() + offset).to_rfc3339_opts(SecondsFormat::Secs, true)
}
