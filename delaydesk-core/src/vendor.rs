use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference data: the restaurant or shop an order is placed with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
}

impl Vendor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}
