//! LLM-backed workers for the Maestro routing engine.
//!
//! [`LlmWorkerFactory`] implements [`maestro_core::WorkerFactory`]: each
//! descriptor becomes an [`LlmWorker`] whose system prompt is the
//! descriptor's role and instructions, answered by the backend selected in
//! [`ModelConfig`].
//!
//! # Main types
//!
//! - [`ModelConfig`] / [`LlmProvider`]: Provider selection and model parameters.
//! - [`LlmBackend`]: Trait implemented by each provider backend.
//! - [`LlmWorkerFactory`]: Builds live workers from descriptors.

/// Provider backends (Claude, OpenAI-compatible, offline echo).
pub mod backends;
/// Model and provider configuration.
pub mod config;
/// Live worker and factory.
pub mod worker;

pub use backends::LlmBackend;
pub use config::{LlmProvider, ModelConfig};
pub use worker::{LlmWorker, LlmWorkerFactory};
