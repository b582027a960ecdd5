use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A delay event recorded against an order.
///
/// A report is *open* while `is_processed` is false. Each order has at most
/// one open report at any time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelayReport {
    pub id: Uuid,
    pub order_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub is_processed: bool,
    pub created_at: DateTime<Utc>,
}

impl DelayReport {
    pub fn new(order_id: Uuid, is_processed: bool, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            agent_id: None,
            is_processed,
            created_at,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.is_processed
    }

    /// Open and not yet claimed by any agent.
    pub fn is_claimable(&self) -> bool {
        self.is_open() && self.agent_id.is_none()
    }
}

/// One row of the per-vendor delay report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VendorDelayCount {
    pub vendor_name: String,
    pub delay_count: i64,
}
