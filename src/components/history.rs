use std::collections::VecDeque;

use super::families::TransformInfo;

// ============================================================================
// TRANSFORM HISTORY - per-session undo/redo of TransformInfo states
// ============================================================================

/// One recorded state plus the action that left it.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryStep {
    pub info: TransformInfo,
    pub description: String,
}

/// Undo/redo stacks for a single transform session. Lives and dies with the
/// session; the document history only ever sees the committed result.
#[derive(Clone, Debug)]
pub struct TransformHistory {
    undo_stack: VecDeque<HistoryStep>,
    redo_stack: VecDeque<HistoryStep>,
    max_history_size: usize,
}

impl Default for TransformHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl TransformHistory {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
        }
    }

    /// Record `previous`, the state before an action described by
    /// `description`. Clears the redo stack.
    pub fn push(&mut self, previous: TransformInfo, description: String) {
        self.redo_stack.clear();
        self.undo_stack.push_back(HistoryStep { info: previous, description });
        while self.undo_stack.len() > self.max_history_size {
            self.undo_stack.pop_front();
        }
    }

    /// Step back. `current` is swapped with the recorded state.
    pub fn undo(&mut self, current: &mut TransformInfo) -> Option<String> {
        let step = self.undo_stack.pop_back()?;
        let description = step.description.clone();
        let newer = std::mem::replace(current, step.info);
        self.redo_stack.push_back(HistoryStep { info: newer, description: step.description });
        Some(description)
    }

    pub fn redo(&mut self, current: &mut TransformInfo) -> Option<String> {
        let step = self.redo_stack.pop_back()?;
        let description = step.description.clone();
        let older = std::mem::replace(current, step.info);
        self.undo_stack.push_back(HistoryStep { info: older, description: step.description });
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }
}
