//! Ollama backend: the chat model writes the project overview, the embedding
//! model vectorizes code elements and patches.

use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message, Role};

const DEFAULT_PORT: u16 = 11434;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    chat_model: String,
    embedding_model: String,
}

impl OllamaProvider {
    /// `base_url` may omit the port, in which case Ollama's default is used.
    #[must_use]
    pub fn new(base_url: &str, chat_model: String, embedding_model: String) -> Self {
        let (host, port) = split_port(base_url);
        Self {
            client: Ollama::new(host, port),
            chat_model,
            embedding_model,
        }
    }

    #[must_use]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }
}

impl LlmProvider for OllamaProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let history = messages.iter().map(to_chat_message).collect();
        let response = self
            .client
            .send_chat_messages(ChatMessageRequest::new(self.chat_model.clone(), history))
            .await
            .map_err(|e| request_failed("chat", &e))?;
        Ok(response.message.content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request =
            GenerateEmbeddingsRequest::new(self.embedding_model.clone(), EmbeddingsInput::from(text));
        let mut response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| request_failed("embedding", &e))?;

        if response.embeddings.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "ollama" });
        }
        Ok(response.embeddings.swap_remove(0))
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

fn request_failed(what: &str, err: &impl std::fmt::Display) -> LlmError {
    LlmError::Other(format!("Ollama {what} request failed: {err}"))
}

fn to_chat_message(msg: &Message) -> ChatMessage {
    let text = msg.content.clone();
    match msg.role {
        Role::System => ChatMessage::system(text),
        Role::User => ChatMessage::user(text),
        Role::Assistant => ChatMessage::assistant(text),
    }
}

/// `http://host:8080/` → (`http://host`, 8080).
fn split_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    url.rsplit_once(':')
        .and_then(|(host, port)| Some((host.to_string(), port.parse().ok()?)))
        .unwrap_or_else(|| (url.to_string(), DEFAULT_PORT))
}
