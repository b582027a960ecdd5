pub mod vendor;
pub mod trip;
pub mod order;
pub mod report;
pub mod agent;
pub mod policy;
pub mod repository;

pub use agent::Agent;
pub use order::{DelayOutcome, Order, ADDING_DELAY_MINUTES};
pub use policy::DelayPolicy;
pub use report::{DelayReport, VendorDelayCount};
pub use repository::{DelayRepository, VendorDelayStream};
pub use trip::{Trip, TripStatus};
pub use vendor::Vendor;

use uuid::Uuid;

/// Failures raised by the delay workflow and surfaced unchanged to callers.
#[derive(Debug, thiserror::Error)]
pub enum DelayError {
    #[error("Delivery time not reached yet")]
    DeliveryTimeNotReached,
    #[error("Order {0} already has an unprocessed delay report")]
    AlreadyHaveOpenReport(Uuid),
    #[error("Agent {0} already has a report to process")]
    AlreadyAssigned(Uuid),
    #[error("No delay report is waiting for an agent")]
    NoReportAvailable,
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Storage contention: {0}")]
    Contention(String),
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl DelayError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DelayError::NotFound { entity, id: id.to_string() }
    }

    /// Lock timeouts, deadlocks and serialization failures may succeed on a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DelayError::Contention(_))
    }
}

pub type DelayResult<T> = Result<T, DelayError>;

/// Failures reported by a `DelayRepository` implementation.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Uniqueness violated: order {order_id} already has an open delay report")]
    OpenReportExists { order_id: Uuid },
    #[error("Lock contention: {0}")]
    Contention(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl From<RepoError> for DelayError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound { entity, id } => DelayError::NotFound { entity, id },
            RepoError::OpenReportExists { order_id } => DelayError::AlreadyHaveOpenReport(order_id),
            RepoError::Contention(msg) => DelayError::Contention(msg),
            RepoError::Database(msg) => DelayError::Storage(msg),
        }
    }
}
