// src/audio/undo_history.rs
// Bounded stack of whole layer-list snapshots

use std::collections::VecDeque;

use super::layer::Layer;
use super::metronome::LoopLength;

/// The full layer list as it was before an add or remove.
#[derive(Debug, Clone, Default)]
pub struct LayerSnapshot {
    pub layers: Vec<Layer>,
    pub loop_length: Option<LoopLength>,
}

/// Bounded undo stack; the oldest snapshot is dropped when full.
#[derive(Debug, Clone)]
pub struct UndoHistory {
    snapshots: VecDeque<LayerSnapshot>,
    max_levels: usize,
}

impl UndoHistory {
    pub const DEFAULT_MAX_LEVELS: usize = 10;

    pub fn new() -> Self {
        Self::new_with_levels(Self::DEFAULT_MAX_LEVELS)
    }

    pub fn new_with_levels(max_levels: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(max_levels),
            max_levels: max_levels.max(1),
        }
    }

    pub fn push(&mut self, snapshot: LayerSnapshot) {
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.max_levels {
            self.snapshots.pop_front();
        }
    }

    /// Most recent snapshot, or `None` when there is nothing to undo.
    pub fn pop(&mut self) -> Option<LayerSnapshot> {
        self.snapshots.pop_back()
    }

    pub fn can_undo(&self) -> bool {
        !self.snapshots.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.snapshots.len()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

impl Default for UndoHistory {
    fn default() -> Self {
        Self::new()
    }
}
