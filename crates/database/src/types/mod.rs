//! Shared types and result types for the database layer

pub mod errors;
pub mod pagination;

pub use errors::DatabaseError;
pub use pagination::{Page, Pagination};

pub type DatabaseResult<T> = Result<T, DatabaseError>;
