//! Shared application state for the gateway

use portal_config::AppConfig;
use portal_database::Pagination;
use portal_services::Services;
use std::sync::Arc;

/// Shared application state containing all services
#[derive(Clone)]
pub struct GatewayState {
    pub services: Services,
    pub config: Arc<AppConfig>,
}

impl GatewayState {
    pub fn new(services: Services, config: Arc<AppConfig>) -> Self {
        Self { services, config }
    }

    /// Page parameters from a query string, with the configured page size as default.
    pub fn pagination(&self, page: Option<u32>, per_page: Option<u32>) -> Pagination {
        Pagination::new(page, per_page, self.config.business.default_page_size)
    }

    /// Largest request body accepted; identity verification sends three files at once.
    pub fn body_limit(&self) -> usize {
        self.config
            .storage
            .max_upload_bytes
            .saturating_mul(3)
            .saturating_add(64 * 1024)
    }
}
