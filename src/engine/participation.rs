use std::collections::BTreeSet;

use crate::types::ParticipantId;

/// Participants currently holding their control. Duplicate begins and stray ends
/// are absorbed, so the count can never go below zero.
#[derive(Clone, Debug, Default)]
pub struct ParticipationTracker {
    held: BTreeSet<ParticipantId>,
}

impl ParticipationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, id: ParticipantId) -> bool {
        self.held.insert(id)
    }

    pub fn end(&mut self, id: ParticipantId) -> bool {
        self.held.remove(&id)
    }

    pub fn active_count(&self) -> usize {
        self.held.len()
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.held.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}
