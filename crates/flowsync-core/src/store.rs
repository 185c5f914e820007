use crate::error::MergeError;
use crate::error::StoreError;
use crate::merge::merge;
use crate::merge::MergeOptions;
use crate::node::Node;
use crate::patch::Patch;
use crate::state::ExecutionState;

/// Caller-held canonical state. Patches from the run controller are merged
/// here; every accepted patch that changes anything bumps `revision`.
#[derive(Debug, Clone)]
pub struct StateStore {
    current: Node,
    options: MergeOptions,
    revision: u64,
}

impl StateStore {
    pub fn new(options: MergeOptions) -> Result<Self, StoreError> {
        Self::with_state(&ExecutionState::default(), options)
    }

    pub fn with_state(state: &ExecutionState, options: MergeOptions) -> Result<Self, StoreError> {
        let current = Node::from(serde_json::to_value(state)?);
        Ok(Self {
            current,
            options,
            revision: 0,
        })
    }

    /// Returns whether the state changed.
    pub fn apply(&mut self, patch: &Patch) -> Result<bool, MergeError> {
        let next = merge(Some(&self.current), Some(patch), &self.options)?;
        if next.same(&self.current) {
            return Ok(false);
        }
        self.current = next;
        self.revision += 1;
        Ok(true)
    }

    pub fn current(&self) -> &Node {
        &self.current
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    pub fn snapshot(&self) -> Result<ExecutionState, StoreError> {
        Ok(serde_json::from_value(self.current.to_value())?)
    }
}
