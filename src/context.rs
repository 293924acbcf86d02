use crate::chunking::Chunk;
use crate::memory::ConversationTurn;

const STUFF_PROMPT: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Concatenate retrieved chunks, most relevant first
pub fn stuff_chunks(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<&str>>()
        .join("\n\n")
}

/// Render prior turns as a transcript
pub fn render_history(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("Human: {}\nAI: {}", turn.question, turn.answer))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Context handed to the language model: retrieved chunks plus, when there is
/// any, the conversation so far
pub fn assemble_context(chunks: &[Chunk], history: &[ConversationTurn]) -> String {
    let documents = stuff_chunks(chunks);
    if history.is_empty() {
        return documents;
    }
    format!(
        "{}\n\nConversation so far:\n{}",
        documents,
        render_history(history)
    )
}

/// Full prompt for a completion-style model
pub fn render_prompt(question: &str, context: &str) -> String {
    format!(
        "{}\n\n{}\n\nQuestion: {}\nHelpful Answer:",
        STUFF_PROMPT, context, question
    )
}

/// Print retrieved chunks the way the CLI shows sources
pub fn format_sources(chunks: &[Chunk]) -> String {
    let separator = format!("\n{}\n", "-".repeat(100));
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "Document {} ({} #{}):\n\n{}",
                i + 1,
                chunk.source,
                chunk.ordinal,
                chunk.content
            )
        })
        .collect::<Vec<String>>()
        .join(&separator)
}
