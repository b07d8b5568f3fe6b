use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Running,
    Finished,
}

/// One run of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub definition_name: String,
    pub company: String,
    pub title: String,
    pub department: String,
    pub start_user: String,
    /// Inputs for edge conditions.
    pub variables: HashMap<String, Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: InstanceState,
}

impl Instance {
    pub fn is_finished(&self) -> bool {
        self.state == InstanceState::Finished
    }

    /// RUNNING -> FINISHED. Returns false if the instance was already finished.
    pub fn finish(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = InstanceState::Finished;
        self.end_time = Some(at);
        true
    }
}

/// Stored form of the execution snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub definition_id: Uuid,
    /// JSON encoding of the active node list.
    pub snapshot: String,
    /// Bumped by the store on every update.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}
