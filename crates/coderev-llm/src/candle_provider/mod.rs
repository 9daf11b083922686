//! Local embedding model running in-process on Candle.
//!
//! The model is downloaded and loaded on the first `embed` call, exactly once
//! even under concurrent callers, and then shared by every clone of the
//! provider until process exit.

pub mod embed;

use std::sync::Arc;

pub use candle_core::Device;
use tokio::sync::OnceCell;

use self::embed::EmbedModel;
use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

#[derive(Clone)]
pub struct CandleProvider {
    repo_id: String,
    device: Device,
    model: Arc<OnceCell<Arc<EmbedModel>>>,
}

impl std::fmt::Debug for CandleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleProvider")
            .field("repo_id", &self.repo_id)
            .field("device", &format!("{:?}", self.device))
            .field("loaded", &self.model.initialized())
            .finish()
    }
}

impl CandleProvider {
    #[must_use]
    pub fn new(repo_id: impl Into<String>, device: Device) -> Self {
        Self {
            repo_id: repo_id.into(),
            device,
            model: Arc::new(OnceCell::new()),
        }
    }

    #[must_use]
    pub fn device_name(&self) -> &'static str {
        match &self.device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> Result<Arc<EmbedModel>, LlmError> {
        self.model
            .get_or_try_init(|| async {
                let repo_id = self.repo_id.clone();
                let device = self.device.clone();
                tracing::info!(model = %repo_id, "loading embedding model, this may take a few minutes");
                tokio::task::spawn_blocking(move || EmbedModel::load(&repo_id, &device))
                    .await
                    .map_err(|e| LlmError::ModelLoad(format!("model load task failed: {e}")))?
                    .map(Arc::new)
            })
            .await
            .cloned()
    }
}

impl LlmProvider for CandleProvider {
    async fn chat(&self, _messages: &[Message]) -> Result<String, LlmError> {
        Err(LlmError::ChatUnsupported { provider: "candle" })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let model = self.model().await?;
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || model.embed_sync(&text))
            .await
            .map_err(|e| LlmError::Inference(format!("embedding task failed: {e}")))?
    }

    fn name(&self) -> &'static str {
        "candle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_provider_is_not_loaded() {
        let provider = CandleProvider::new("sentence-transformers/all-MiniLM-L6-v2", Device::Cpu);
        assert!(!provider.is_loaded());
        assert_eq!(provider.device_name(), "cpu");
        assert_eq!(provider.name(), "candle");
    }

    #[tokio::test]
    async fn chat_is_unsupported() {
        let provider = CandleProvider::new("any/model", Device::Cpu);
        let err = provider.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::ChatUnsupported { .. }));
    }

    #[test]
    fn clones_share_model_cell() {
        let provider = CandleProvider::new("any/model", Device::Cpu);
        let clone = provider.clone();
        assert!(Arc::ptr_eq(&provider.model, &clone.model));
    }
}
