//! Ordered per-node step log.
//!
//! Pure data structure, no I/O. During a live session the connection task is
//! the only writer and appends in transport-delivery order; snapshot loads
//! replace the whole table at once.

use std::collections::HashMap;

use crate::model::Step;

/// Token and latency totals for one node's steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeAggregate {
    pub total_tokens: i64,
    pub total_latency_ms: i64,
}

/// Append-only per-node step log.
#[derive(Debug, Default)]
pub struct StepStore {
    nodes: HashMap<String, Vec<Step>>,
}

impl StepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to a node's log, preserving arrival order.
    ///
    /// No deduplication; the transport is trusted not to double-deliver.
    pub fn append(&mut self, node_id: &str, step: Step) {
        self.nodes.entry(node_id.to_string()).or_default().push(step);
    }

    /// Discard all prior content and install a full new mapping.
    pub fn replace_all(&mut self, nodes: HashMap<String, Vec<Step>>) {
        self.nodes = nodes;
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Ordered steps for a node; empty for unknown nodes.
    pub fn get(&self, node_id: &str) -> &[Step] {
        self.nodes.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All node ids with at least one step.
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum token and latency counts for a node, treating absent fields as 0.
    pub fn aggregate(&self, node_id: &str) -> NodeAggregate {
        self.get(node_id)
            .iter()
            .fold(NodeAggregate::default(), |mut acc, step| {
                acc.total_tokens += step.tokens.unwrap_or(0);
                acc.total_latency_ms += step.latency_ms.unwrap_or(0);
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepType;

    fn step(id: &str, tokens: Option<i64>, latency: Option<i64>) -> Step {
        Step {
            step_id: id.to_string(),
            step_type: StepType::Think,
            input: None,
            output: None,
            prompt: None,
            tokens,
            latency_ms: latency,
            timestamp: None,
            tool: None,
            arguments: None,
            result: None,
        }
    }

    #[test]
    fn append_preserves_arrival_order() {
        let mut store = StepStore::new();
        for i in 0..5 {
            store.append("n1", step(&format!("s{i}"), None, None));
        }
        let ids: Vec<_> = store.get("n1").iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, ["s0", "s1", "s2", "s3", "s4"]);
    }

    #[test]
    fn append_keeps_duplicates() {
        let mut store = StepStore::new();
        store.append("n1", step("s1", None, None));
        store.append("n1", step("s1", None, None));
        assert_eq!(store.get("n1").len(), 2);
    }

    #[test]
    fn get_unknown_node_is_empty() {
        let store = StepStore::new();
        assert!(store.get("nope").is_empty());
        assert_eq!(store.aggregate("nope"), NodeAggregate::default());
    }

    #[test]
    fn replace_all_discards_stale_logs() {
        let mut store = StepStore::new();
        store.append("old", step("s1", None, None));

        let mut fresh = HashMap::new();
        fresh.insert("new".to_string(), vec![step("s2", None, None)]);
        store.replace_all(fresh);

        assert!(store.get("old").is_empty());
        assert_eq!(store.get("new").len(), 1);
        assert_eq!(store.node_ids(), vec!["new".to_string()]);
    }

    #[test]
    fn aggregate_treats_absent_as_zero() {
        let mut store = StepStore::new();
        store.append("n1", step("s1", Some(12), None));
        store.append("n1", step("s2", None, Some(40)));
        store.append("n1", step("s3", Some(8), Some(10)));

        let agg = store.aggregate("n1");
        assert_eq!(agg.total_tokens, 20);
        assert_eq!(agg.total_latency_ms, 50);
    }
}
