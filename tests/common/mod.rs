//! Deterministic stand-ins for the embedding and language model services.

#![allow(dead_code)]

use async_trait::async_trait;
use corpus_rag::config::RagConfig;
use corpus_rag::embeddings::{Embedding, EmbeddingProvider};
use corpus_rag::error::ProviderError;
use corpus_rag::llm::LanguageModel;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const DIMS: usize = 64;

/// Bag-of-words embedding: every lowercase word is hashed into a bucket
pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
        v[bucket % DIMS] += 1.0;
    }
    v
}

/// Embedder that counts calls and can be told to fail on matching text
pub struct HashEmbedder {
    model: String,
    fail_when_contains: Option<String>,
    /// Sleep a text-dependent time per batch so batches finish out of order
    stagger: bool,
    pub calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        HashEmbedder {
            model: "fake-embed".to_string(),
            fail_when_contains: None,
            stagger: false,
            calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
        }
    }

    pub fn with_model(model: &str) -> Self {
        HashEmbedder {
            model: model.to_string(),
            ..HashEmbedder::new()
        }
    }

    pub fn failing_on(needle: &str) -> Self {
        HashEmbedder {
            fail_when_contains: Some(needle.to_string()),
            ..HashEmbedder::new()
        }
    }

    pub fn staggered() -> Self {
        HashEmbedder {
            stagger: true,
            ..HashEmbedder::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = &self.fail_when_contains {
            if text.contains(needle.as_str()) {
                return Err(ProviderError::Status {
                    status: 503,
                    body: "model unavailable".to_string(),
                });
            }
        }
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        Ok(Embedding::new(bag_of_words(text)))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, ProviderError> {
        if self.stagger {
            // Earlier batches finish later
            let first = texts.first().map(|t| t.len()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis((first % 7) as u64 * 5)).await;
        }
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Language model that echoes what it was given and remembers every call
pub struct RecordingLlm {
    fail: bool,
    pub contexts: Mutex<Vec<String>>,
}

impl RecordingLlm {
    pub fn new() -> Self {
        RecordingLlm {
            fail: false,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        RecordingLlm {
            fail: true,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingLlm {
    fn model_name(&self) -> &str {
        "fake-llm"
    }

    async fn generate(&self, prompt: &str, context: &str) -> Result<String, ProviderError> {
        self.contexts.lock().unwrap().push(context.to_string());
        if self.fail {
            return Err(ProviderError::InvalidResponse("timed out".to_string()));
        }
        Ok(format!("answer to: {}", prompt))
    }
}

/// Settings pointing at a corpus and index inside `root`
pub fn test_config(root: &Path) -> RagConfig {
    RagConfig {
        corpus_dir: root.join("data"),
        index_dir: root.join("index"),
        embedding_model: "fake-embed".to_string(),
        llm_model: "fake-llm".to_string(),
        embed_batch_size: 2,
        embed_concurrency: 3,
        ..RagConfig::default()
    }
}

/// Write a PDF with one page per entry of `pages`
pub fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(path).unwrap();
}
