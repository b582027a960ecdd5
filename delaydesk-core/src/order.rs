use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trip::{Trip, TripStatus};
use crate::DelayError;

/// Minutes added to an order's estimate each time a delay is granted.
pub const ADDING_DELAY_MINUTES: i32 = 15;

/// A delivery order and its promised timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Promised delivery duration in minutes.
    pub delivery_time: i32,
    /// Absolute deadline; moves together with `delivery_time`.
    pub delivery_time_at: DateTime<Utc>,
}

/// What a delay announcement turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayOutcome {
    /// No trip is linked to the order yet, nothing to escalate.
    NoTrip,
    /// The trip is still moving; the estimate was extended and the
    /// report waits for an agent.
    Escalated {
        delivery_time: i32,
        delivery_time_at: DateTime<Utc>,
    },
    /// The trip is past the delay statuses, the report is closed at once.
    Resolved { status: TripStatus },
}

impl DelayOutcome {
    pub fn is_delayed(&self) -> bool {
        matches!(self, DelayOutcome::Escalated { .. })
    }

    /// Only escalated delays need human triage.
    pub fn report_is_processed(&self) -> bool {
        !self.is_delayed()
    }
}

impl Order {
    pub fn new(vendor_id: Uuid, delivery_time: i32, delivery_time_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor_id,
            created_at: Utc::now(),
            delivery_time,
            delivery_time_at,
        }
    }

    /// A delay cannot be announced before the promised time has passed.
    pub fn ensure_delivery_time_passed(&self, now: DateTime<Utc>) -> Result<(), DelayError> {
        if self.delivery_time_at >= now {
            return Err(DelayError::DeliveryTimeNotReached);
        }
        Ok(())
    }

    /// Decide the delay outcome against the order's trip, extending the
    /// estimate in place when the trip is still in motion.
    pub fn apply_delay(&mut self, trip: Option<&Trip>, now: DateTime<Utc>) -> DelayOutcome {
        match trip {
            None => DelayOutcome::NoTrip,
            Some(trip) if trip.status.is_delay_status() => {
                self.extend_delivery(now);
                DelayOutcome::Escalated {
                    delivery_time: self.delivery_time,
                    delivery_time_at: self.delivery_time_at,
                }
            }
            Some(trip) => DelayOutcome::Resolved { status: trip.status },
        }
    }

    fn extend_delivery(&mut self, now: DateTime<Utc>) {
        self.delivery_time += ADDING_DELAY_MINUTES;
        self.delivery_time_at = now + Duration::minutes(ADDING_DELAY_MINUTES as i64);
    }
}
