//! Pending step-output edits for replay.
//!
//! The overlay never touches the step store; it is merged into views at read
//! time and flushed only through replay submission.

use crate::api::ModifiedStep;
use crate::model::Step;

/// Insertion-ordered map of step id → replacement output.
#[derive(Debug, Default, Clone)]
pub struct ReplayOverlay {
    entries: Vec<ModifiedStep>,
}

impl ReplayOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert an edit. A repeated step id keeps its original position.
    ///
    /// The step id is not validated against loaded steps; an edit may target
    /// a step the snapshot has not delivered yet. Validation, if any, is the
    /// replay endpoint's business.
    pub fn set(&mut self, step_id: &str, new_output: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.step_id == step_id) {
            entry.new_output = new_output.to_string();
        } else {
            self.entries.push(ModifiedStep {
                step_id: step_id.to_string(),
                new_output: new_output.to_string(),
            });
        }
    }

    pub fn get(&self, step_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.step_id == step_id)
            .map(|e| e.new_output.as_str())
    }

    /// Replacement output for a step, if one is pending.
    pub fn merged_output<'a>(&'a self, step: &'a Step) -> Option<&'a str> {
        self.get(&step.step_id).or(step.output.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Edits in insertion order, as the replay endpoint expects them.
    pub fn modifications(&self) -> Vec<ModifiedStep> {
        self.entries.clone()
    }
}
