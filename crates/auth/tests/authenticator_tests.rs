use portal_auth::{
    password::token_digest, AuthError, Authenticator, ClientInfo, NewAccount,
};
use portal_config::{AuthConfig, DatabaseConfig};
use portal_database::{initialize_database, UserRole};
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

struct TestContext {
    pool: SqlitePool,
    authenticator: Authenticator,
    _temp_dir: TempDir,
}

impl TestContext {
    async fn new() -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("auth.sqlite");
        let pool = initialize_database(&DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            max_connections: 5,
        })
        .await?;

        let config = AuthConfig {
            jwt_secret: "integration-test-secret-with-enough-entropy".into(),
            ..AuthConfig::default()
        };
        let authenticator = Authenticator::new(pool.clone(), &config);

        Ok(Self {
            pool,
            authenticator,
            _temp_dir: temp_dir,
        })
    }

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }
}

fn account(email: &str, password: Option<&str>) -> NewAccount {
    NewAccount {
        email: email.into(),
        password: password.map(Into::into),
        first_name: "Alice".into(),
        last_name: "Smith".into(),
        company: None,
        phone: None,
        role: UserRole::Client,
    }
}

fn client() -> ClientInfo {
    ClientInfo {
        ip_address: Some("203.0.113.7".into()),
        user_agent: Some("integration-test".into()),
    }
}

#[tokio::test]
async fn register_persists_user_profile_and_session() -> TestResult {
    let ctx = TestContext::new().await?;

    let registration = ctx
        .authenticator()
        .register(account("Alice@Example.com", Some("s3cret-pass")), &client())
        .await?;
    let user = &registration.account.user;

    assert_eq!(user.email, "alice@example.com");
    assert_eq!(user.role, UserRole::Client);
    assert!(!user.is_verified);
    assert!(registration.account.generated_password.is_none());

    let row = sqlx::query("SELECT password_hash FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_one(ctx.pool())
        .await?;
    let hash: String = row.get("password_hash");
    assert!(hash.starts_with("$argon2"), "password must be an argon2 hash");

    let profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_profiles WHERE user_id = ?")
        .bind(&user.id)
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(profiles, 1);

    let session = sqlx::query("SELECT ip_address, is_active FROM user_sessions WHERE id = ?")
        .bind(&registration.tokens.session_id)
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(session.get::<String, _>("ip_address"), "203.0.113.7");
    assert!(session.get::<bool, _>("is_active"));

    let authenticated = ctx
        .authenticator()
        .authenticate(&registration.tokens.access_token)
        .await?;
    assert_eq!(authenticated.user.id, user.id);

    Ok(())
}

#[tokio::test]
async fn register_rejects_duplicate_email() -> TestResult {
    let ctx = TestContext::new().await?;

    ctx.authenticator()
        .register(account("bob@example.com", Some("password-1")), &client())
        .await?;
    let err = ctx
        .authenticator()
        .register(account("BOB@example.com", Some("password-2")), &client())
        .await
        .expect_err("duplicate email should fail");

    assert!(matches!(err, AuthError::UserExists));
    Ok(())
}

#[tokio::test]
async fn register_validates_input_and_generates_missing_password() -> TestResult {
    let ctx = TestContext::new().await?;

    let err = ctx
        .authenticator()
        .register(account("not-an-email", Some("password-1")), &client())
        .await
        .expect_err("invalid email");
    assert!(matches!(err, AuthError::Validation(_)));

    let err = ctx
        .authenticator()
        .register(account("carol@example.com", Some("short")), &client())
        .await
        .expect_err("short password");
    assert!(matches!(err, AuthError::Validation(_)));

    let registration = ctx
        .authenticator()
        .register(account("carol@example.com", None), &client())
        .await?;
    let generated = registration
        .account
        .generated_password
        .expect("password should be generated");
    assert_eq!(generated.len(), 12);

    ctx.authenticator()
        .login("carol@example.com", &generated, &client())
        .await?;
    Ok(())
}

#[tokio::test]
async fn login_rejects_bad_credentials_and_disabled_accounts() -> TestResult {
    let ctx = TestContext::new().await?;
    let registration = ctx
        .authenticator()
        .register(account("dave@example.com", Some("correct-horse")), &client())
        .await?;

    let err = ctx
        .authenticator()
        .login("dave@example.com", "wrong-horse", &client())
        .await
        .expect_err("wrong password");
    assert!(matches!(err, AuthError::InvalidCredentials));

    let err = ctx
        .authenticator()
        .login("nobody@example.com", "correct-horse", &client())
        .await
        .expect_err("unknown email");
    assert!(matches!(err, AuthError::InvalidCredentials));

    let outcome = ctx
        .authenticator()
        .login("dave@example.com", "correct-horse", &client())
        .await?;
    assert_ne!(outcome.tokens.session_id, registration.tokens.session_id);

    sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
        .bind(&outcome.user.id)
        .execute(ctx.pool())
        .await?;

    let err = ctx
        .authenticator()
        .login("dave@example.com", "correct-horse", &client())
        .await
        .expect_err("disabled account");
    assert!(matches!(err, AuthError::AccountDisabled));

    let err = ctx
        .authenticator()
        .authenticate(&outcome.tokens.access_token)
        .await
        .expect_err("disabled account token");
    assert!(matches!(err, AuthError::AccountDisabled));
    Ok(())
}

#[tokio::test]
async fn logout_revokes_tokens_of_the_session() -> TestResult {
    let ctx = TestContext::new().await?;
    let registration = ctx
        .authenticator()
        .register(account("erin@example.com", Some("password-1")), &client())
        .await?;
    let tokens = registration.tokens;

    let refreshed = ctx.authenticator().refresh(&tokens.refresh_token).await?;
    assert_eq!(refreshed.session_id, tokens.session_id);
    ctx.authenticator().authenticate(&refreshed.access_token).await?;

    let err = ctx
        .authenticator()
        .refresh(&tokens.access_token)
        .await
        .expect_err("access token cannot refresh");
    assert!(matches!(err, AuthError::InvalidToken(_)));

    ctx.authenticator().logout(&tokens.session_id).await?;

    for token in [&tokens.access_token, &refreshed.access_token] {
        let err = ctx
            .authenticator()
            .authenticate(token)
            .await
            .expect_err("revoked session");
        assert!(matches!(err, AuthError::InvalidSession));
    }
    assert!(ctx.authenticator().refresh(&tokens.refresh_token).await.is_err());
    Ok(())
}

#[tokio::test]
async fn reset_token_is_single_use() -> TestResult {
    let ctx = TestContext::new().await?;
    let registration = ctx
        .authenticator()
        .register(account("fay@example.com", Some("old-password")), &client())
        .await?;

    assert!(ctx
        .authenticator()
        .request_password_reset("unknown@example.com")
        .await?
        .is_none());

    let ticket = ctx
        .authenticator()
        .request_password_reset("fay@example.com")
        .await?
        .expect("ticket for existing account");

    let stored: Option<String> =
        sqlx::query_scalar("SELECT reset_token_hash FROM users WHERE id = ?")
            .bind(&registration.account.user.id)
            .fetch_one(ctx.pool())
            .await?;
    assert_eq!(stored, Some(token_digest(&ticket.token)));

    ctx.authenticator()
        .reset_password(&ticket.token, "new-password")
        .await?;

    let err = ctx
        .authenticator()
        .reset_password(&ticket.token, "another-password")
        .await
        .expect_err("token already used");
    assert!(matches!(err, AuthError::InvalidResetToken));

    let err = ctx
        .authenticator()
        .authenticate(&registration.tokens.access_token)
        .await
        .expect_err("sessions closed by reset");
    assert!(matches!(err, AuthError::InvalidSession));

    ctx.authenticator()
        .login("fay@example.com", "new-password", &client())
        .await?;
    Ok(())
}

#[tokio::test]
async fn expired_reset_token_is_rejected() -> TestResult {
    let ctx = TestContext::new().await?;
    ctx.authenticator()
        .register(account("gus@example.com", Some("old-password")), &client())
        .await?;

    let ticket = ctx
        .authenticator()
        .request_password_reset("gus@example.com")
        .await?
        .expect("ticket");
    sqlx::query("UPDATE users SET reset_token_expires_at = '2000-01-01T00:00:00Z'")
        .execute(ctx.pool())
        .await?;

    let err = ctx
        .authenticator()
        .reset_password(&ticket.token, "new-password")
        .await
        .expect_err("expired token");
    assert!(matches!(err, AuthError::InvalidResetToken));
    Ok(())
}

#[tokio::test]
async fn change_password_keeps_only_the_current_session() -> TestResult {
    let ctx = TestContext::new().await?;
    let first = ctx
        .authenticator()
        .register(account("hal@example.com", Some("old-password")), &client())
        .await?;
    let second = ctx
        .authenticator()
        .login("hal@example.com", "old-password", &client())
        .await?;
    let user_id = first.account.user.id.clone();

    let err = ctx
        .authenticator()
        .change_password(&user_id, &second.tokens.session_id, "not-it", "new-password")
        .await
        .expect_err("wrong current password");
    assert!(matches!(err, AuthError::InvalidCredentials));

    ctx.authenticator()
        .change_password(&user_id, &second.tokens.session_id, "old-password", "new-password")
        .await?;

    ctx.authenticator().authenticate(&second.tokens.access_token).await?;
    assert!(ctx
        .authenticator()
        .authenticate(&first.tokens.access_token)
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn verify_email_consumes_the_token() -> TestResult {
    let ctx = TestContext::new().await?;
    let registration = ctx
        .authenticator()
        .register(account("ivy@example.com", Some("password-1")), &client())
        .await?;

    let user = ctx
        .authenticator()
        .verify_email(&registration.account.verification_token)
        .await?;
    assert!(user.is_verified);

    let err = ctx
        .authenticator()
        .verify_email(&registration.account.verification_token)
        .await
        .expect_err("token cleared");
    assert!(matches!(err, AuthError::InvalidVerificationToken));
    Ok(())
}
