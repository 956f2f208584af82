//! The authenticated caller a service operation runs for.

use portal_auth::ClientInfo;
use portal_database::UserRole;
use serde::Serialize;

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: String,
    pub role: UserRole,
    pub session_id: String,
    #[serde(skip)]
    pub client: RequestOrigin,
}

/// Where the request came from, recorded with signatures and audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl From<&RequestOrigin> for ClientInfo {
    fn from(origin: &RequestOrigin) -> Self {
        ClientInfo {
            ip_address: origin.ip_address.clone(),
            user_agent: origin.user_agent.clone(),
        }
    }
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: UserRole, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            session_id: session_id.into(),
            client: RequestOrigin::default(),
        }
    }

    pub fn with_origin(mut self, origin: RequestOrigin) -> Self {
        self.client = origin;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn require_admin(&self) -> ServiceResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::forbidden("Admin access required"))
        }
    }

    /// Admins may act on anything; everyone else only on what they own.
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.is_admin() || self.user_id == owner_id
    }

    pub fn require_access(&self, owner_id: &str) -> ServiceResult<()> {
        if self.can_access(owner_id) {
            Ok(())
        } else {
            Err(ServiceError::forbidden("Access denied"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_rules() {
        let client = Actor::new("u1", UserRole::Client, "s1");
        let admin = Actor::new("a1", UserRole::Admin, "s2");

        assert!(client.can_access("u1"));
        assert!(!client.can_access("u2"));
        assert!(admin.can_access("u2"));
        assert!(client.require_admin().is_err());
        assert!(admin.require_admin().is_ok());
    }
}
