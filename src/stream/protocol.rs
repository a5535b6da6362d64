//! JSON envelopes for the per-execution event channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Step;

/// Inbound event kind. Unknown kinds are tolerated for forward compatibility
/// and dropped by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StepUpdate,
    StepComplete,
    NodeComplete,
    NodeFailed,
    ExecutionComplete,
    #[serde(other)]
    Unknown,
}

/// Inbound envelope: `{type, execution_id?, data?, timestamp?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub data: Option<EventData>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub step: Option<Step>,
    #[serde(default)]
    pub result: Option<NodeResult>,
}

/// Final result payload attached to node_complete/node_failed events.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Outbound envelope: `{type: "modify_step", data: {step_id, new_output}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ModifyStepMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: ModifyStepData<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct ModifyStepData<'a> {
    step_id: &'a str,
    new_output: &'a str,
}

impl<'a> ModifyStepMessage<'a> {
    pub fn new(step_id: &'a str, new_output: &'a str) -> Self {
        Self {
            kind: "modify_step",
            data: ModifyStepData {
                step_id,
                new_output,
            },
        }
    }
}
