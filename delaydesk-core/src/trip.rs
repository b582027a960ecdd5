use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Physical movement state of an order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Assigned,
    AtVendor,
    Picked,
    Delivered,
}

impl TripStatus {
    /// Statuses in which the courier is still on the way and a delay is real.
    pub const DELAY_STATUSES: [TripStatus; 3] =
        [TripStatus::Assigned, TripStatus::AtVendor, TripStatus::Picked];

    pub fn is_delay_status(self) -> bool {
        Self::DELAY_STATUSES.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TripStatus::Assigned => "assigned",
            TripStatus::AtVendor => "at_vendor",
            TripStatus::Picked => "picked",
            TripStatus::Delivered => "delivered",
        }
    }
}

impl Default for TripStatus {
    fn default() -> Self {
        TripStatus::Assigned
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(TripStatus::Assigned),
            "at_vendor" => Ok(TripStatus::AtVendor),
            "picked" => Ok(TripStatus::Picked),
            "delivered" => Ok(TripStatus::Delivered),
            other => Err(format!("unknown trip status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trip {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: TripStatus,
}

impl Trip {
    pub fn new(order_id: Uuid, status: TripStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivered_is_not_a_delay_status() {
        assert!(TripStatus::Assigned.is_delay_status());
        assert!(TripStatus::AtVendor.is_delay_status());
        assert!(TripStatus::Picked.is_delay_status());
        assert!(!TripStatus::Delivered.is_delay_status());
    }

    #[test]
    fn test_status_text_matches_storage_values() {
        for status in [
            TripStatus::Assigned,
            TripStatus::AtVendor,
            TripStatus::Picked,
            TripStatus::Delivered,
        ] {
            assert_eq!(status.as_str().parse::<TripStatus>().unwrap(), status);
        }
        assert!("lost".parse::<TripStatus>().is_err());
        assert_eq!(TripStatus::default(), TripStatus::Assigned);
    }
}
