//! Grounded answer generation.
//!
//! [`AnswerGenerator`] fills a fixed prompt template with the retrieved
//! context and the question and hands it to a [`ChatModel`]. The model's
//! reply is returned as-is, including the literal `I don't know` sentinel
//! the template asks for when the context does not support an answer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::GenerationConfig;

/// Reply the model is instructed to give when the context is insufficient.
pub const UNKNOWN_ANSWER: &str = "I don't know";

/// A text-generation backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a single-turn prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible endpoints (Groq by default).
pub struct OpenAiCompatibleChat {
    endpoint: String,
    model: String,
    temperature: f32,
    /// Environment variable holding the API key, read on every call.
    api_key_env: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key_env: config.api_key_env.clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = std::env::var(&self.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", self.api_key_env))?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("chat completion error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

/// Render the grounding prompt.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a customer sales representative. Answer strictly in the tone of a customer \
         sales representative.\n\
         Answer the question using only the context below. If the question cannot be answered \
         from the context, or the context is not relevant to the question, reply \"{unknown}\".\n\
         \n\
         Context: {context}\n\
         \n\
         Question: {question}\n",
        unknown = UNKNOWN_ANSWER,
    )
}

pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub async fn generate(&self, context: &str, question: &str) -> Result<String> {
        self.model.complete(&build_prompt(context, question)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    #[async_trait]
    impl ChatModel for Recorder {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn prompt_contains_persona_context_question_and_sentinel() {
        let prompt = build_prompt("Refunds take 14 days.", "How long do refunds take?");
        assert!(prompt.contains("customer sales representative"));
        assert!(prompt.contains("Context: Refunds take 14 days."));
        assert!(prompt.contains("Question: How long do refunds take?"));
        assert!(prompt.contains("\"I don't know\""));
        let ctx = prompt.find("Context:").unwrap();
        let q = prompt.find("Question:").unwrap();
        assert!(ctx < q);
    }

    #[test]
    fn context_is_embedded_verbatim() {
        let context = "line one\n\n---\n\n{braces} and \"quotes\"";
        assert!(build_prompt(context, "q").contains(context));
    }

    #[tokio::test]
    async fn reply_is_returned_unmodified() {
        let model = Arc::new(Recorder {
            prompts: Mutex::new(Vec::new()),
            reply: "  I don't know  ".to_string(),
        });
        let generator = AnswerGenerator::new(model.clone() as Arc<dyn ChatModel>);
        let answer = generator.generate("ctx", "question").await.unwrap();
        assert_eq!(answer, "  I don't know  ");
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn parses_first_choice() {
        let body = json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Within 14 days."}}]
        });
        assert_eq!(parse_chat_response(&body).unwrap(), "Within 14 days.");
        assert!(parse_chat_response(&json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn missing_api_key_fails_the_call() {
        let config = GenerationConfig {
            api_key_env: "TRAG_TEST_UNSET_KEY_VAR".to_string(),
            ..GenerationConfig::default()
        };
        let chat = OpenAiCompatibleChat::new(&config).unwrap();
        let err = chat.complete("hello").await.unwrap_err();
        assert!(err.to_string().contains("TRAG_TEST_UNSET_KEY_VAR"));
    }
}
