//! Inbound trigger messages

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to start a task on behalf of its owner
///
/// Wire format: `{"task_id": "<uuid>", "user_id": "<id>"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub task_id: Uuid,
    pub user_id: String,
}

impl TriggerMessage {
    pub fn new(task_id: Uuid, user_id: impl Into<String>) -> Self {
        Self {
            task_id,
            user_id: user_id.into(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
