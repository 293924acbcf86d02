use crate::error::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One question and the answer given to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

/// Append-only history of a single chat session.
///
/// Nothing is evicted; callers that want a bounded prompt use [`recent`](Self::recent).
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.turns.push(ConversationTurn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    /// The whole history, oldest first
    pub fn snapshot(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Write the history as JSON
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, serde_json::to_vec_pretty(&self.turns)?)?;
        info!("Exported {} turns to {}", self.turns.len(), path.display());
        Ok(())
    }

    /// Read a history written by [`export`](Self::export)
    pub fn import<P: AsRef<Path>>(path: P) -> Result<Self> {
        let turns = serde_json::from_slice(&fs::read(path)?)?;
        Ok(ConversationMemory { turns })
    }
}
