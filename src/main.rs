use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use log::{error, info};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use corpus_rag::config::{IndexPolicy, RagConfig};
use corpus_rag::context::format_sources;
use corpus_rag::embeddings::EmbeddingProvider;
use corpus_rag::llm::LanguageModel;
use corpus_rag::ollama::{OllamaClient, OllamaEmbedder, OllamaLlm};
use corpus_rag::pipeline::ensure_index;
use corpus_rag::rag::AnswerEngine;

/// Ask questions about a folder of PDFs, text and JSON files using Ollama models
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Corpus directory (overrides RAG_CORPUS_DIR)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Index directory (overrides RAG_INDEX_DIR)
    #[arg(long)]
    index: Option<PathBuf>,

    /// Ask these questions and exit instead of starting the interactive loop
    #[arg(short, long)]
    question: Vec<String>,

    /// Chunks retrieved per question
    #[arg(long)]
    top_k: Option<usize>,

    /// Do not feed earlier turns back to the model
    #[arg(long)]
    no_memory: bool,

    /// Print the retrieved chunks after each answer
    #[arg(long)]
    sources: bool,

    /// Rebuild the index even if a snapshot exists
    #[arg(long)]
    rebuild: bool,

    /// Write the conversation history to this file on exit
    #[arg(long)]
    export_history: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut config = RagConfig::from_env().context("Invalid configuration")?;
    if let Some(corpus) = args.corpus {
        config.corpus_dir = corpus;
    }
    if let Some(index) = args.index {
        config.index_dir = index;
    }
    if let Some(top_k) = args.top_k {
        config.top_k = top_k;
    }
    if args.no_memory {
        config.memory.enabled = false;
    }
    if args.rebuild {
        config.index_policy = IndexPolicy::AlwaysRebuild;
    }
    config.validate().context("Invalid configuration")?;

    let client = OllamaClient::new(&config.ollama()).context("Failed to create Ollama client")?;
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(OllamaEmbedder::new(client.clone(), config.embedding_model.clone()));
    let llm: Arc<dyn LanguageModel> = Arc::new(OllamaLlm::new(
        client,
        config.llm_model.clone(),
        config.generation.clone(),
    ));

    let index = ensure_index(&config, embedder.as_ref())
        .await
        .context("Failed to prepare the vector index")?;

    let mut engine = AnswerEngine::new(Arc::new(index), embedder, llm, config.engine());

    if args.question.is_empty() {
        run_query_loop(&mut engine, args.sources).await?;
    } else {
        for question in &args.question {
            ask(&mut engine, question, args.sources).await;
        }
    }

    if let Some(path) = args.export_history {
        engine
            .memory()
            .export(&path)
            .with_context(|| format!("Failed to export history to {}", path.display()))?;
    }

    Ok(())
}

async fn ask(engine: &mut AnswerEngine, question: &str, show_sources: bool) {
    println!("Question: {}", question);
    match engine.answer(question).await {
        Ok(result) => {
            println!("\nAnswer: {}", result.answer);
            if show_sources {
                if result.source_chunks.is_empty() {
                    println!("\nNo source documents found.");
                } else {
                    println!("\nSource Documents:\n{}", format_sources(&result.source_chunks));
                }
            }
        }
        Err(e) => error!("QA execution failed: {}", e),
    }
}

async fn run_query_loop(engine: &mut AnswerEngine, show_sources: bool) -> Result<()> {
    println!("Ready to answer questions. Type 'reset' to start over, 'exit' to quit.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        print!("\nYour question: ");
        stdout.flush()?;

        buffer.clear();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }

        let question = buffer.trim();
        match question.to_lowercase().as_str() {
            "" => continue,
            "exit" => {
                info!("Goodbye!");
                break;
            }
            "reset" => {
                engine.reset_session();
                println!("Conversation cleared.");
            }
            _ => ask(engine, question, show_sources).await,
        }
    }

    Ok(())
}
