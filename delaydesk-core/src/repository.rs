use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::{Agent, DelayError, DelayOutcome, DelayReport, Order, RepoError, Trip, VendorDelayCount};

/// Lazily evaluated per-vendor delay counts, most delayed vendor first.
pub type VendorDelayStream<'a> = BoxStream<'a, Result<VendorDelayCount, RepoError>>;

/// Storage seam for the delay workflow.
///
/// `record_delay` and `claim_oldest_open_report` each run as one atomic
/// unit: either every row change they make is committed or none is.
#[async_trait]
pub trait DelayRepository: Send + Sync {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, RepoError>;

    /// Fails with `RepoError::NotFound` when no trip is linked to the order.
    async fn trip_by_order(&self, order_id: Uuid) -> Result<Trip, RepoError>;

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>, RepoError>;

    async fn agent_by_user(&self, user_id: Uuid) -> Result<Option<Agent>, RepoError>;

    /// True when an unprocessed report exists for the order.
    async fn is_open(&self, order_id: Uuid) -> Result<bool, RepoError>;

    /// Insert a report, refusing with `RepoError::OpenReportExists` when the
    /// order already has an open one.
    async fn create_report(
        &self,
        order_id: Uuid,
        is_processed: bool,
        now: DateTime<Utc>,
    ) -> Result<DelayReport, RepoError>;

    /// Run the delay decision for an order and persist its effects.
    async fn record_delay(
        &self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Order, DelayOutcome), DelayError>;

    /// Claim the oldest open, unclaimed report for the agent.
    async fn claim_oldest_open_report(&self, agent_id: Uuid) -> Result<DelayReport, DelayError>;

    /// Delay counts per vendor over reports created at or after `since`.
    /// Every call recomputes from storage.
    fn vendor_delay_counts(&self, since: DateTime<Utc>) -> VendorDelayStream<'_>;
}
