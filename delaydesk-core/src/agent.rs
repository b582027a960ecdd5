use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DelayError;

/// A support agent who triages escalated delays
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Set while the agent holds a claimed report.
    pub is_report_assigned: bool,
}

impl Agent {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            is_report_assigned: false,
        }
    }

    pub fn ensure_can_claim(&self) -> Result<(), DelayError> {
        if self.is_report_assigned {
            return Err(DelayError::AlreadyAssigned(self.id));
        }
        Ok(())
    }
}
