//! 结构化推理：infer(prompt, expected_schema) -> 结构化对象
//!
//! expected_schema 由 schemars 从目标类型生成并作为 system 消息注入；回复中的 JSON 被提取并反序列化。
//! 超时 -> ReasoningError::Timeout，不符合 Schema -> ReasoningError::SchemaViolation。本层不做重试。

use std::sync::Arc;
use std::time::Duration;

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

use crate::core::ReasoningError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// SchemaViolation 中附带的原文预览长度
const PREVIEW_CHARS: usize = 200;

/// 一次结构化推理的结果与消耗的 token
#[derive(Debug, Clone)]
pub struct Inference<T> {
    pub value: T,
    pub tokens: u64,
}

/// 从 LLM 文本中提取 JSON 对象（```json ... ``` 或首个 `{` 到末个 `}`）
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 持有 LLM 与超时；同一实例可被多个组件共享
#[derive(Clone)]
pub struct StructuredReasoner {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl StructuredReasoner {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// 追加 Schema 说明后调用 LLM，并把回复解析为 T
    pub async fn infer<T>(&self, mut messages: Vec<Message>) -> Result<Inference<T>, ReasoningError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_string_pretty(&schema_for!(T))
            .map_err(|e| ReasoningError::SchemaViolation(e.to_string()))?;
        messages.push(Message::system(format!(
            "Reply with exactly one JSON object that validates against this JSON Schema. \
             No prose, no Markdown.\n{schema}"
        )));

        let before = self.llm.token_usage().2;
        let raw = tokio::time::timeout(self.timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| ReasoningError::Timeout(self.timeout))?
            .map_err(ReasoningError::Unavailable)?;
        let tokens = self.llm.token_usage().2.saturating_sub(before);

        let json = extract_json(&raw).ok_or_else(|| {
            ReasoningError::SchemaViolation(format!("no JSON object in reply: {}", preview(&raw)))
        })?;
        let value = serde_json::from_str::<T>(json).map_err(|e| {
            ReasoningError::SchemaViolation(format!("{}: {}", e, preview(json)))
        })?;

        tracing::debug!(tokens, "structured inference succeeded");
        Ok(Inference { value, tokens })
    }
}
