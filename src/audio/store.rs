use super::buffer::AudioBuffer;
use super::layer::{Layer, LayerId};
use super::metronome::LoopLength;
use super::undo_history::{LayerSnapshot, UndoHistory};
use crate::error::{LooperError, Result};

/// Ordered layers of the session, the loop length they share, and the
/// undo history of the list.
///
/// The loop length is fixed by the first commit and released whenever the
/// list becomes empty.
#[derive(Debug, Default)]
pub struct LayerStore {
    layers: Vec<Layer>,
    loop_length: Option<LoopLength>,
    undo: UndoHistory,
    next_id: LayerId,
}

/// What an undo left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    /// Nothing to undo
    Nothing,
    /// Restored a snapshot that still has layers
    Restored,
    /// Restored the empty snapshot
    Emptied,
}

impl LayerStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn loop_length(&self) -> Option<LoopLength> {
        self.loop_length
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    /// Snapshots available to undo.
    pub fn undo_levels(&self) -> usize {
        self.undo.undo_levels()
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id == id)
            .ok_or(LooperError::LayerNotFound(id))
    }

    fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            layers: self.layers.clone(),
            loop_length: self.loop_length,
        }
    }

    /// Append a take that already has the session loop length.
    pub fn commit(&mut self, buffer: AudioBuffer, length: LoopLength) -> LayerId {
        debug_assert_eq!(buffer.frames(), length.frames);
        debug_assert!(self.loop_length.is_none_or(|fixed| fixed == length));

        self.undo.push(self.snapshot());
        let id = self.next_id;
        self.next_id += 1;
        self.layers.push(Layer::new(id, self.layers.len(), buffer));
        self.loop_length = Some(length);
        id
    }

    pub fn delete(&mut self, id: LayerId) -> Result<()> {
        let index = self
            .layers
            .iter()
            .position(|layer| layer.id == id)
            .ok_or(LooperError::LayerNotFound(id))?;
        self.undo.push(self.snapshot());
        self.layers.remove(index);
        if self.layers.is_empty() {
            self.loop_length = None;
        }
        Ok(())
    }

    pub fn undo(&mut self) -> UndoOutcome {
        match self.undo.pop() {
            None => UndoOutcome::Nothing,
            Some(snapshot) => {
                self.layers = snapshot.layers;
                self.loop_length = snapshot.loop_length;
                if self.layers.is_empty() {
                    self.loop_length = None;
                    UndoOutcome::Emptied
                } else {
                    UndoOutcome::Restored
                }
            }
        }
    }

    /// Drop every layer and the history. Ids keep increasing.
    pub fn clear(&mut self) {
        self.layers.clear();
        self.loop_length = None;
        self.undo.clear();
    }
}
