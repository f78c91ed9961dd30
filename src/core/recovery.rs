//! 错误恢复引擎
//!
//! 把各推理步骤的 ReasoningError 映射为本地兜底动作，保证主循环既不崩溃也不丢弃输入。

use crate::core::ReasoningError;

/// 出错的推理步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classification,
    Synthesis,
    Summary,
}

/// 兜底动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 按 simple_response 处理，回复给定的确认语
    Acknowledge(String),
    /// 整批 task 作为 rejected 报告
    RejectTasks(String),
    /// 保留上一次的摘要
    KeepPrevious,
}

pub const FALLBACK_ACKNOWLEDGEMENT: &str = "Copy, stand by.";

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, stage: Stage, err: &ReasoningError) -> RecoveryAction {
        tracing::warn!(stage = ?stage, error = %err, "recovering from reasoning failure");
        match stage {
            Stage::Classification => RecoveryAction::Acknowledge(FALLBACK_ACKNOWLEDGEMENT.to_string()),
            Stage::Synthesis => RecoveryAction::RejectTasks(format!("Synthesis failed: {err}")),
            Stage::Summary => RecoveryAction::KeepPrevious,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classification_falls_back_to_acknowledgement() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(
            Stage::Classification,
            &ReasoningError::SchemaViolation("missing field `decision`".into()),
        );
        assert_eq!(action, RecoveryAction::Acknowledge(FALLBACK_ACKNOWLEDGEMENT.to_string()));
    }

    #[test]
    fn test_synthesis_timeout_rejects_tasks() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(Stage::Synthesis, &ReasoningError::Timeout(Duration::from_secs(30)));
        match action {
            RecoveryAction::RejectTasks(reason) => assert!(reason.contains("timed out")),
            other => panic!("Expected RejectTasks, got {other:?}"),
        }
    }

    #[test]
    fn test_summary_keeps_previous() {
        let engine = RecoveryEngine::new();
        let err = ReasoningError::Unavailable("connection refused".into());
        assert_eq!(engine.handle(Stage::Summary, &err), RecoveryAction::KeepPrevious);
    }
}
