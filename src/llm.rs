use crate::error::ProviderError;
use async_trait::async_trait;
use serde::Serialize;

/// Optional sampling parameters forwarded to the model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

impl GenerationOptions {
    pub fn is_empty(&self) -> bool {
        self == &GenerationOptions::default()
    }
}

/// Capability that answers a prompt given retrieved context
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate a response to `prompt` (the user question) grounded in `context`
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_skip_unset_fields() {
        let options = GenerationOptions {
            temperature: Some(0.2),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&options).unwrap(),
            serde_json::json!({"temperature": 0.2f32})
        );
        assert!(!options.is_empty());
        assert!(GenerationOptions::default().is_empty());
    }
}
