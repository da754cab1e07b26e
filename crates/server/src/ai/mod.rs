//! Text-Assist Gateway
//!
//! Stateless wrappers around an external generative-text capability:
//! quick-reply suggestions, grammar correction, and conversation
//! summaries. The capability sits behind the `TextGenerator` trait so the
//! fallback behavior is testable without a network. Every call is a single
//! round trip, and a failed or non-conforming response degrades to a safe
//! default instead of an error.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use genai::chat::{ChatMessage, ChatRequest};
use genai::Client as GenAiClient;

use crate::store::MessageStore;

/// Prompt-in, text-out. Implementations may fail or return content that
/// does not match the requested format; callers must tolerate both.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Live generator backed by the genai client.
pub struct GenAiGenerator {
    client: GenAiClient,
    model: String,
}

impl GenAiGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        info!("[Assist] Using model: {}", model);
        Self {
            client: GenAiClient::default(),
            model,
        }
    }
}

#[async_trait]
impl TextGenerator for GenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)]);

        let response = self
            .client
            .exec_chat(&self.model, request, None)
            .await
            .map_err(|e| anyhow::anyhow!("GenAI error: {}", e))?;

        Ok(response.first_text().unwrap_or_default().to_string())
    }
}

/// Generator used when AI features are switched off; every assist call
/// falls back to its safe default.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(anyhow::anyhow!("text generation disabled"))
    }
}

/// Conversation summary with overall sentiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub sentiment: String,
}

impl Summary {
    fn fallback() -> Self {
        Self {
            summary: "Unable to summarize.".to_string(),
            sentiment: "Unknown".to_string(),
        }
    }
}

pub struct TextAssist {
    generator: Arc<dyn TextGenerator>,
    store: Arc<MessageStore>,
}

impl TextAssist {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<MessageStore>) -> Self {
        Self { generator, store }
    }

    /// Suggest up to three short replies from the 10 most recent messages.
    /// Anything other than a JSON array of strings yields an empty list.
    pub async fn quick_replies(&self, conversation_id: &str) -> Vec<String> {
        let recent = match self.store.recent(conversation_id, 10).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("[Assist] Could not load history for quick replies: {}", e);
                return Vec::new();
            }
        };

        let transcript = format_transcript(recent.iter().rev());
        let prompt = format!(
            "You are a helpful assistant. Based on the chat below, suggest 3 short, \
             friendly reply options:\n\n{}\n\nReply in JSON array format: \
             [\"Okay!\", \"Sure, tell me more.\", \"Sounds interesting.\"]",
            transcript
        );

        let text = match self.generator.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("[Assist] Quick replies failed: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Tighten up a draft. On failure the input text comes back unchanged.
    pub async fn correct_grammar(&self, text: &str) -> String {
        let prompt = format!(
            "Correct the grammar and make this more professional, but keep it short:\n\n\"{}\"",
            text
        );

        match self.generator.generate(&prompt).await {
            Ok(corrected) if !corrected.trim().is_empty() => corrected.trim().to_string(),
            Ok(_) => text.to_string(),
            Err(e) => {
                warn!("[Assist] Grammar correction failed: {}", e);
                text.to_string()
            }
        }
    }

    /// Summarize the 30 oldest messages of a conversation with a sentiment
    /// verdict. An unparseable response yields the fallback pair.
    pub async fn summarize(&self, conversation_id: &str) -> Summary {
        let messages = match self.store.oldest(conversation_id, 30).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("[Assist] Could not load history for summary: {}", e);
                return Summary::fallback();
            }
        };

        let transcript = format_transcript(messages.iter());
        let prompt = format!(
            "You are a helpful assistant analyzing a conversation. Based on the \
             following chat, provide:\n\
             1. A short 3-4 sentence summary.\n\
             2. The overall sentiment: Positive, Negative, or Neutral.\n\n\
             Chat:\n{}\n\n\
             Respond in this format:\n\n\
             {{\n  \"summary\": \"...\",\n  \"sentiment\": \"Positive\"\n}}",
            transcript
        );

        let text = match self.generator.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("[Assist] Summary failed: {}", e);
                return Summary::fallback();
            }
        };

        serde_json::from_str::<Summary>(text.trim()).unwrap_or_else(|_| Summary::fallback())
    }
}

fn format_transcript<'a>(messages: impl Iterator<Item = &'a crate::models::Message>) -> String {
    messages
        .map(|m| {
            let name = m.sender.display_name.as_deref().unwrap_or(&m.sender.id);
            format!("{}: {}", name, m.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthManager;
    use crate::db;
    use crate::directory::ConversationDirectory;
    use tempfile::TempDir;

    /// Canned generator: either a fixed response or a failure.
    struct FakeGenerator {
        response: Option<String>,
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.response
                .clone()
                .ok_or_else(|| anyhow::anyhow!("downstream unavailable"))
        }
    }

    async fn setup(response: Option<&str>) -> (TextAssist, String, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = db::connect(&dir.path().join("chat.sqlite")).await.unwrap();
        let auth = AuthManager::new(pool.clone(), "test-secret").await.unwrap();
        let directory = ConversationDirectory::new(pool.clone()).await.unwrap();
        let store = Arc::new(MessageStore::new(pool).await.unwrap());

        let (_, user) = auth
            .register(
                "a@example.com".into(),
                "pw123456".into(),
                Some("Alice".into()),
                None,
            )
            .await
            .unwrap();
        let group = directory
            .create_group("Team", &[user.id.clone()])
            .await
            .unwrap();
        store.append(&user.id, &group.id, "hello there").await.unwrap();

        let generator = Arc::new(FakeGenerator {
            response: response.map(str::to_string),
        });
        (TextAssist::new(generator, store), group.id, dir)
    }

    #[tokio::test]
    async fn test_quick_replies_parses_json_array() {
        let (assist, conversation_id, _dir) =
            setup(Some(r#"["Okay!", "Sure, tell me more."]"#)).await;

        let replies = assist.quick_replies(&conversation_id).await;
        assert_eq!(replies, vec!["Okay!", "Sure, tell me more."]);
    }

    #[tokio::test]
    async fn test_quick_replies_garbage_yields_empty_list() {
        let (assist, conversation_id, _dir) = setup(Some("sure, here you go: 1) hi 2) bye")).await;
        assert!(assist.quick_replies(&conversation_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_quick_replies_downstream_failure_yields_empty_list() {
        let (assist, conversation_id, _dir) = setup(None).await;
        assert!(assist.quick_replies(&conversation_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_summary_garbage_yields_fallback() {
        let (assist, conversation_id, _dir) = setup(Some("not json at all")).await;

        let summary = assist.summarize(&conversation_id).await;
        assert_eq!(summary.summary, "Unable to summarize.");
        assert_eq!(summary.sentiment, "Unknown");
    }

    #[tokio::test]
    async fn test_summary_parses_well_formed_response() {
        let (assist, conversation_id, _dir) = setup(Some(
            r#"{"summary": "A short greeting.", "sentiment": "Positive"}"#,
        ))
        .await;

        let summary = assist.summarize(&conversation_id).await;
        assert_eq!(summary.summary, "A short greeting.");
        assert_eq!(summary.sentiment, "Positive");
    }

    #[tokio::test]
    async fn test_grammar_failure_returns_input_unchanged() {
        let (assist, _conversation_id, _dir) = setup(None).await;
        assert_eq!(assist.correct_grammar("me want go").await, "me want go");
    }

    #[tokio::test]
    async fn test_grammar_uses_generated_text() {
        let (assist, _conversation_id, _dir) = setup(Some("I would like to go.")).await;
        assert_eq!(assist.correct_grammar("me want go").await, "I would like to go.");
    }
}
