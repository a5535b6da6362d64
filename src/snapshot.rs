//! Snapshot rehydration: persisted execution record → per-node step logs.

use std::collections::HashMap;

use crate::model::{Execution, Step};

/// Failure to rehydrate from a persisted execution record.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A terminal execution must carry its full step history.
    #[error("execution {execution_id} is {status} but has no snapshot")]
    MalformedSnapshot {
        execution_id: String,
        status: &'static str,
    },
}

/// Convert a persisted execution record into per-node step logs, preserving
/// the persisted step order.
///
/// Pure transform, idempotent; safe to call again on load retry. A running
/// or replaying execution without a snapshot simply yields an empty mapping
/// (its steps arrive over the stream instead).
pub fn load(execution: &Execution) -> Result<HashMap<String, Vec<Step>>, SnapshotError> {
    let Some(snapshot) = &execution.snapshot else {
        if execution.status.is_terminal() {
            return Err(SnapshotError::MalformedSnapshot {
                execution_id: execution.id.clone(),
                status: execution.status.as_str(),
            });
        }
        return Ok(HashMap::new());
    };

    let mut nodes = HashMap::with_capacity(snapshot.nodes.len());
    for node in &snapshot.nodes {
        nodes.insert(node.node_id.clone(), node.steps.clone());
    }
    Ok(nodes)
}
