//! Domain services for the client portal.
//!
//! Each service wraps the repositories it needs and enforces the role and
//! ownership rules for an [`Actor`]. Notifications and activity entries are
//! side effects: a failure to write them is logged and never fails the
//! operation that produced them.

pub mod activity;
pub mod actor;
pub mod admin;
pub mod contracts;
pub mod error;
pub mod files;
pub mod mail;
pub mod messaging;
pub mod notifications;
pub mod numbering;
pub mod payment_gateway;
pub mod payments;
pub mod projects;
pub mod storage;
pub mod users;
pub mod workflow;

use portal_auth::Authenticator;
use portal_config::AppConfig;
use sqlx::SqlitePool;
use std::sync::Arc;

pub use activity::{ActivityEntry, ActivityService};
pub use actor::{Actor, RequestOrigin};
pub use admin::AdminService;
pub use contracts::ContractService;
pub use error::{ServiceError, ServiceResult};
pub use files::{FileService, Upload, UploadPolicy};
pub use mail::MailNotifier;
pub use messaging::MessagingService;
pub use notifications::NotificationService;
pub use payment_gateway::{DisabledGateway, PaymentGateway, StripeGateway};
pub use payments::PaymentService;
pub use projects::ProjectService;
pub use storage::{FileStorage, LocalStorage, ObjectStorage, StorageError};
pub use users::UserService;

/// Every service, wired once at startup and cloned into request handlers.
#[derive(Clone)]
pub struct Services {
    pub auth: Authenticator,
    pub mail: MailNotifier,
    pub activity: ActivityService,
    pub notifications: NotificationService,
    pub files: FileService,
    pub users: UserService,
    pub projects: ProjectService,
    pub contracts: ContractService,
    pub payments: PaymentService,
    pub messaging: MessagingService,
    pub admin: AdminService,
}

impl Services {
    pub fn new(
        pool: SqlitePool,
        config: &AppConfig,
        storage: Arc<dyn FileStorage>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let auth = Authenticator::new(pool.clone(), &config.auth);
        let mail = MailNotifier::new(&config.mail, &config.http.frontend_url);
        let activity = ActivityService::new(pool.clone());
        let notifications = NotificationService::new(pool.clone());
        let files = FileService::new(
            pool.clone(),
            storage,
            UploadPolicy::from_config(&config.storage),
        );

        let users = UserService::new(
            pool.clone(),
            files.clone(),
            notifications.clone(),
            activity.clone(),
        );
        let projects = ProjectService::new(
            pool.clone(),
            auth.clone(),
            notifications.clone(),
            activity.clone(),
            mail.clone(),
        );
        let contracts = ContractService::new(
            pool.clone(),
            projects.clone(),
            files.clone(),
            notifications.clone(),
            activity.clone(),
            config.business.default_currency.clone(),
            config.business.contract_expiry_days,
        );
        let payments = PaymentService::new(
            pool.clone(),
            gateway,
            notifications.clone(),
            activity.clone(),
            &config.payments,
            config.business.default_currency.clone(),
        );
        let messaging = MessagingService::new(pool.clone(), notifications.clone());
        let admin = AdminService::new(
            pool,
            contracts.clone(),
            payments.clone(),
            notifications.clone(),
            activity.clone(),
        );

        Self {
            auth,
            mail,
            activity,
            notifications,
            files,
            users,
            projects,
            contracts,
            payments,
            messaging,
            admin,
        }
    }
}
