//! Runtime-selected provider. Config picks the backend per role (embedding,
//! overview chat), and the engine is generic over one provider type.

#[cfg(feature = "candle")]
use crate::candle_provider::CandleProvider;
use crate::error::LlmError;
#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::ollama::OllamaProvider;
use crate::provider::{LlmProvider, Message};

/// Expands to a match binding the inner provider of every compiled-in variant.
macro_rules! each_backend {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Ollama($p) => $expr,
            #[cfg(feature = "candle")]
            AnyProvider::Candle($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyProvider {
    Ollama(OllamaProvider),
    #[cfg(feature = "candle")]
    Candle(CandleProvider),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl LlmProvider for AnyProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        each_backend!(self, |p| p.chat(messages).await)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        each_backend!(self, |p| p.embed(text).await)
    }

    fn name(&self) -> &'static str {
        each_backend!(self, |p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_backend_name() {
        let provider = AnyProvider::Ollama(OllamaProvider::new("http://localhost", "m".into(), "e".into()));
        assert_eq!(provider.name(), "ollama");
    }

    #[cfg(feature = "mock")]
    #[tokio::test]
    async fn mock_backend_embeds_and_chats() {
        let provider = AnyProvider::Mock(MockProvider::default());
        assert_eq!(provider.embed("fn parse").await.unwrap().len(), 64);
        assert_eq!(provider.chat(&[Message::user("hi")]).await.unwrap(), "mock response");
        assert_eq!(provider.name(), "mock");
    }
}
