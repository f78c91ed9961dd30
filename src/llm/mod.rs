//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock），以及带 Schema 校验的结构化推理

pub mod mock;
pub mod openai;
pub mod structured;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use structured::{extract_json, Inference, StructuredReasoner};
pub use traits::LlmClient;
