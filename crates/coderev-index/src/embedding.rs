//! Chunk-and-average embedding on top of an [`LlmProvider`].

use coderev_llm::LlmProvider;

use crate::error::{IndexError, Result};

pub const DEFAULT_CHUNK_WORDS: usize = 1000;

/// Embeds text of any length. Inputs longer than `chunk_words` words are split
/// into word chunks that are embedded separately and mean-pooled.
#[derive(Debug, Clone)]
pub struct EmbeddingProvider<P> {
    provider: P,
    chunk_words: usize,
}

impl<P: LlmProvider> EmbeddingProvider<P> {
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            chunk_words: DEFAULT_CHUNK_WORDS,
        }
    }

    #[must_use]
    pub fn with_chunk_words(mut self, chunk_words: usize) -> Self {
        self.chunk_words = chunk_words.max(1);
        self
    }

    #[must_use]
    pub fn chunk_words(&self) -> usize {
        self.chunk_words
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// # Errors
    ///
    /// Returns an error if the provider fails for any chunk or chunk vectors
    /// disagree in dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let words = text.split_whitespace().count();
        if words <= self.chunk_words {
            return Ok(self.provider.embed(text).await?);
        }

        let chunks = chunk_text(text, self.chunk_words);
        tracing::debug!(words, chunks = chunks.len(), "embedding long text in chunks");

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            vectors.push(self.provider.embed(chunk).await?);
        }
        mean_pool(&vectors)
    }
}

/// Split on whitespace into chunks of at most `chunk_words` words, each joined
/// with single spaces.
#[must_use]
pub fn chunk_text(text: &str, chunk_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(chunk_words.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Element-wise mean of equally sized vectors.
///
/// # Errors
///
/// Returns an error if `vectors` is empty or the dimensions differ.
#[allow(clippy::cast_precision_loss)]
pub fn mean_pool(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = vectors.first() else {
        return Err(IndexError::Other("no vectors to pool".into()));
    };
    let dim = first.len();
    let mut sum = vec![0.0_f32; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(IndexError::Other(format!(
                "embedding dimension mismatch: {} vs {dim}",
                v.len()
            )));
        }
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    Ok(sum.into_iter().map(|x| x / n).collect())
}

#[cfg(test)]
mod tests {
    use coderev_llm::mock::MockProvider;
    use proptest::prelude::*;

    use super::*;

    fn words(n: usize, tag: &str) -> String {
        (0..n).map(|i| format!("{tag}{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn chunk_text_splits_on_word_count() {
        let chunks = chunk_text("a b  c\nd e", 2);
        assert_eq!(chunks, ["a b", "c d", "e"]);
        assert!(chunk_text("   ", 3).is_empty());
    }

    #[test]
    fn mean_pool_averages() {
        let pooled = mean_pool(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(pooled, [2.0, 4.0]);
        assert!(mean_pool(&[]).is_err());
        assert!(mean_pool(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[tokio::test]
    async fn short_text_embedded_directly() {
        let mock = MockProvider::default();
        let provider = EmbeddingProvider::new(mock.clone()).with_chunk_words(10);
        let v = provider.embed("def run(): pass").await.unwrap();
        assert_eq!(v, mock.hashed_embedding("def run(): pass"));
        assert_eq!(mock.embed_calls(), 1);
    }

    #[tokio::test]
    async fn double_length_equals_mean_of_halves() {
        let mock = MockProvider::default();
        let provider = EmbeddingProvider::new(mock.clone()).with_chunk_words(50);
        let first = words(50, "a");
        let second = words(50, "b");
        let doc = format!("{first}\n{second}");

        let pooled = provider.embed(&doc).await.unwrap();
        assert_eq!(mock.embed_calls(), 2);

        let expected = mean_pool(&[mock.hashed_embedding(&first), mock.hashed_embedding(&second)])
            .unwrap();
        assert_eq!(pooled, expected);
    }

    #[tokio::test]
    async fn default_chunk_size_applies() {
        let mock = MockProvider::default();
        let provider = EmbeddingProvider::new(mock.clone());
        assert_eq!(provider.chunk_words(), DEFAULT_CHUNK_WORDS);
        provider.embed(&words(DEFAULT_CHUNK_WORDS + 1, "w")).await.unwrap();
        assert_eq!(mock.embed_calls(), 2);
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let provider = EmbeddingProvider::new(MockProvider::failing());
        let err = provider.embed("text").await.unwrap_err();
        assert!(matches!(err, IndexError::Llm(_)));
    }

    proptest! {
        #[test]
        fn chunks_preserve_words(n in 0usize..300, size in 1usize..64) {
            let text = words(n, "t");
            let chunks = chunk_text(&text, size);
            prop_assert_eq!(chunks.len(), n.div_ceil(size));
            let rejoined = chunks.join(" ");
            prop_assert_eq!(rejoined, text);
        }
    }
}
