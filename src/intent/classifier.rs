//! 输入分类器
//!
//! 只看开发者消息 + 最近 N 条消息（控制请求成本），再附上本次输入、态势摘要与平台快照。
//! 深入思考交给合成步骤，这里追求快。

use crate::core::ReasoningError;
use crate::intent::{ClassificationResult, InputEvent};
use crate::llm::StructuredReasoner;
use crate::memory::{ConversationMemory, Message};
use crate::platform::PlatformSnapshot;

/// 分类结果 + 应写入记忆的输入消息
#[derive(Debug, Clone)]
pub struct Classified {
    pub result: ClassificationResult,
    /// 带时间与来源头的输入消息
    pub prompt: Message,
    pub tokens: u64,
}

pub struct IntentClassifier {
    reasoner: StructuredReasoner,
    window: usize,
}

impl IntentClassifier {
    pub fn new(reasoner: StructuredReasoner, window: usize) -> Self {
        Self { reasoner, window }
    }

    /// 组装输入消息：时间/来源头 + 输入 + 态势 + 平台状态
    pub fn input_message(
        input: &InputEvent,
        context: &str,
        snapshot: Option<&PlatformSnapshot>,
    ) -> Message {
        let header = format!(
            "Time(UTC): {} | Input source: {}:\n",
            input.timestamp.timestamp(),
            input.source
        );
        let vehicle = snapshot
            .filter(|s| !s.is_empty())
            .map(|s| s.to_prompt_json())
            .unwrap_or_else(|| "N/A".to_string());
        let context = if context.trim().is_empty() { "N/A" } else { context };
        Message::user(format!(
            "{header}New input:\n{}\nSituation context: {context}\nVehicle info: {vehicle}",
            input.content.trim()
        ))
    }

    pub async fn classify(
        &self,
        input: &InputEvent,
        memory: &ConversationMemory,
        context: &str,
        snapshot: Option<&PlatformSnapshot>,
    ) -> Result<Classified, ReasoningError> {
        let prompt = Self::input_message(input, context, snapshot);
        let mut messages = memory.window(self.window);
        messages.push(prompt.clone());
        tracing::debug!(messages = messages.len(), source = %input.source, "classifying input");

        let inference = self.reasoner.infer::<ClassificationResult>(messages).await?;
        Ok(Classified {
            result: inference.value.normalized(),
            prompt,
            tokens: inference.tokens,
        })
    }
}
