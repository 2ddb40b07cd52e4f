//! Rolling two-sided transcript built from streamed deltas.

use crate::bridge::Role;

/// One utterance in the conversation. Text keeps growing until the turn
/// that produced it completes; after that it never changes.
#[derive(Clone, Debug, PartialEq)]
pub struct Utterance {
    pub role: Role,
    pub text: String,
    pub is_final: bool,
}

/// Accumulates per-role deltas into utterances.
///
/// Each role has at most one open utterance at a time; deltas append to it
/// in arrival order. Turn completion closes the open utterance of BOTH
/// roles, since the backend signals it once per exchange.
#[derive(Default)]
pub struct TranscriptAggregator {
    utterances: Vec<Utterance>,
    open: [Option<usize>; 2],
}

fn slot(role: Role) -> usize {
    match role {
        Role::Traveler => 0,
        Role::Seller => 1,
    }
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transcription delta to the role's open utterance, starting
    /// a new one if none is open.
    pub fn append_delta(&mut self, role: Role, delta: &str) {
        match self.open[slot(role)] {
            Some(idx) => self.utterances[idx].text.push_str(delta),
            None => {
                self.open[slot(role)] = Some(self.utterances.len());
                self.utterances.push(Utterance {
                    role,
                    text: delta.to_string(),
                    is_final: false,
                });
            }
        }
    }

    /// Seal the open utterances of both roles. Later deltas start fresh
    /// utterances instead of touching sealed ones.
    pub fn complete_turn(&mut self) {
        for open in self.open.iter_mut() {
            if let Some(idx) = open.take() {
                self.utterances[idx].is_final = true;
            }
        }
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn clear(&mut self) {
        self.utterances.clear();
        self.open = [None, None];
    }
}
