//! LLM Gateway for the foreman runtime.
//!
//! One streaming abstraction over four wire dialects (Anthropic Messages,
//! OpenAI-compatible chat completions, Google Gemini SSE, Ollama NDJSON),
//! plus retry with hour-scale backoff windows, token estimation, and
//! credential resolution.

pub mod anthropic;
pub mod credentials;
pub mod estimate;
pub mod gateway;
pub mod google;
pub mod ndjson;
pub mod ollama;
pub mod openai_compat;
pub mod registry;
pub mod retry;
pub mod sse;
pub mod traits;
pub mod util;

pub use credentials::{EnvCredentialResolver, KeychainCredentialResolver};
pub use gateway::{LlmGateway, StepOutcome};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use traits::{ChatRequest, LlmProvider};
