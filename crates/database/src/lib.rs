//! Client portal database crate
//!
//! Connection management, migrations, row types and the repositories used
//! by the service layer. Everything is backed by SQLite through sqlx.

use sqlx::SqlitePool;
use portal_config::DatabaseConfig;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::{prepare_database, DatabaseConnection};
pub use migrations::run_migrations;

pub use repos::{
    ActivityRepository, ContractRepository, IdentityDocuments, IdentityRepository,
    InvoiceRepository, MessageRepository, NotificationRepository, PaymentRepository,
    ProjectRepository, SessionRepository, UserRepository,
};

pub use entities::*;

pub use types::{DatabaseError, DatabaseResult, Page, Pagination};

pub use sqlx::Pool;

/// Open the pool and bring the schema up to date.
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

    Ok(pool)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    pub async fn test_pool() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let config = DatabaseConfig {
            url: format!("sqlite:{}", db_path.display()),
            max_connections: 1,
        };

        let pool = initialize_database(&config).await.unwrap();
        (pool, temp_dir)
    }

    async fn create_user(repo: &UserRepository, email: &str, role: UserRole) -> User {
        repo.create(&CreateUserRequest {
            email: email.to_string(),
            password_hash: "$argon2id$test".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            company: None,
            phone: None,
            role,
            is_verified: role == UserRole::Admin,
            verification_token: None,
            timezone: None,
        })
        .await
        .unwrap()
    }

    pub async fn create_client(repo: &UserRepository, email: &str) -> User {
        create_user(repo, email, UserRole::Client).await
    }

    pub async fn create_admin(repo: &UserRepository, email: &str) -> User {
        create_user(repo, email, UserRole::Admin).await
    }

    pub async fn create_project(repo: &ProjectRepository, client_id: &str) -> Project {
        repo.create(&CreateProjectRequest {
            client_id: client_id.to_string(),
            project_type_id: "pt-web-development".to_string(),
            name: "Online shop".to_string(),
            description: "A storefront for handmade goods".to_string(),
            features: Some("cart, checkout".to_string()),
            timeline: Some("3 months".to_string()),
            budget_range: Some("1000-5000".to_string()),
        })
        .await
        .unwrap()
    }
}
