//! Chat and embedding provider abstraction.
//!
//! The index engine only needs two things from a model: turn text into a
//! fixed-length vector, and answer a short prompt (the project overview).
//! Both are expressed through [`LlmProvider`].

pub mod any;
#[cfg(feature = "candle")]
pub mod candle_provider;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use error::LlmError;
pub use provider::LlmProvider;
