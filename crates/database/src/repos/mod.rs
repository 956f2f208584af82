//! Database repository implementations

pub mod activity_repository;
pub mod contract_repository;
pub mod identity_repository;
pub mod invoice_repository;
pub mod message_repository;
pub mod notification_repository;
pub mod payment_repository;
pub mod project_repository;
pub mod session_repository;
pub mod user_repository;

pub use activity_repository::ActivityRepository;
pub use contract_repository::ContractRepository;
pub use identity_repository::{IdentityDocuments, IdentityRepository};
pub use invoice_repository::InvoiceRepository;
pub use message_repository::MessageRepository;
pub use notification_repository::NotificationRepository;
pub use payment_repository::PaymentRepository;
pub use project_repository::ProjectRepository;
pub use session_repository::SessionRepository;
pub use user_repository::UserRepository;
