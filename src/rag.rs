use crate::chunking::Chunk;
use crate::context::assemble_context;
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::memory::ConversationMemory;
use log::{debug, info, warn};
use std::sync::Arc;

/// Whether and how much conversation history goes into each prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// Only the last `n` turns are sent to the model; `None` sends everything
    pub window: Option<usize>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            enabled: true,
            window: None,
        }
    }
}

/// Per-session settings of the answer engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Chunks retrieved per question
    pub top_k: usize,
    pub memory: MemoryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            top_k: 4,
            memory: MemoryConfig::default(),
        }
    }
}

/// Where a query currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Retrieving,
    Generating,
    Failed,
}

/// An answer and the chunks it was grounded in, most relevant first
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerResult {
    pub answer: String,
    pub source_chunks: Vec<Chunk>,
}

/// RAG (Retrieval-Augmented Generation) engine for one chat session.
///
/// The index is shared with other sessions; the conversation memory belongs
/// to this engine alone and is only written after a successful answer.
pub struct AnswerEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    config: EngineConfig,
    memory: ConversationMemory,
    state: EngineState,
}

impl AnswerEngine {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        config: EngineConfig,
    ) -> Self {
        AnswerEngine {
            index,
            embedder,
            llm,
            config,
            memory: ConversationMemory::new(),
            state: EngineState::Idle,
        }
    }

    /// Start from a previously exported history instead of an empty one
    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Forget the conversation so far
    pub fn reset_session(&mut self) {
        info!("Resetting session ({} turns dropped)", self.memory.len());
        self.memory.clear();
    }

    /// Answer a question from the indexed corpus and the conversation so far.
    ///
    /// On any failure the error is returned and the memory is left untouched.
    pub async fn answer(&mut self, question: &str) -> Result<AnswerResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::EmptyQuestion);
        }

        // Dropping the future mid-query also puts the engine back to Idle
        let mut state = StateGuard {
            state: &mut self.state,
        };
        let outcome = retrieve_and_generate(
            &self.index,
            self.embedder.as_ref(),
            self.llm.as_ref(),
            &self.config,
            &self.memory,
            &mut state,
            question,
        )
        .await;

        match outcome {
            Ok(result) => {
                if self.config.memory.enabled {
                    self.memory.record(question, result.answer.clone());
                }
                state.transition(EngineState::Idle);
                Ok(result)
            }
            Err(e) => {
                warn!("Query failed during {:?}: {}", state.state, e);
                state.transition(EngineState::Failed);
                state.transition(EngineState::Idle);
                Err(e)
            }
        }
    }
}

/// Engine state for the duration of one query
struct StateGuard<'a> {
    state: &'a mut EngineState,
}

impl StateGuard<'_> {
    fn transition(&mut self, next: EngineState) {
        debug!("{:?} -> {:?}", self.state, next);
        *self.state = next;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if *self.state != EngineState::Idle {
            debug!("Query abandoned during {:?}", self.state);
            *self.state = EngineState::Idle;
        }
    }
}

async fn retrieve_and_generate(
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    llm: &dyn LanguageModel,
    config: &EngineConfig,
    memory: &ConversationMemory,
    state: &mut StateGuard<'_>,
    question: &str,
) -> Result<AnswerResult> {
    // Get embedding for the question
    let query = embedder.embed(question).await.map_err(Error::Embedding)?;

    state.transition(EngineState::Retrieving);
    let chunks = index.retrieve(&query.values, config.top_k)?;
    if chunks.is_empty() {
        info!("No relevant information found in the index");
    }

    let history = match (config.memory.enabled, config.memory.window) {
        (false, _) => &[][..],
        (true, Some(n)) => memory.recent(n),
        (true, None) => memory.snapshot(),
    };
    let context = assemble_context(&chunks, history);

    state.transition(EngineState::Generating);
    let answer = llm
        .generate(question, &context)
        .await
        .map_err(Error::Llm)?;

    Ok(AnswerResult {
        answer,
        source_chunks: chunks,
    })
}
