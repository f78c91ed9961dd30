//! 意图分类：输入事件、分类结果与分类器

pub mod classifier;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use classifier::{Classified, IntentClassifier};

/// 输入来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    User,
    /// 后台脚本或系统产生的消息
    Script,
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputSource::User => "USER",
            InputSource::Script => "SCRIPT",
        })
    }
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// 一次用户/脚本输入；处理后即丢弃，只有派生消息进入记忆
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputEvent {
    pub content: String,
    pub source: InputSource,
    pub timestamp: DateTime<Utc>,
    pub sequence_id: u64,
}

impl InputEvent {
    pub fn new(content: impl Into<String>, source: InputSource) -> Self {
        Self {
            content: content.into(),
            source,
            timestamp: Utc::now(),
            sequence_id: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content, InputSource::User)
    }

    pub fn script(content: impl Into<String>) -> Self {
        Self::new(content, InputSource::Script)
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// 处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// 不需要任何回复或动作（日志类系统消息、暂不可执行的条件任务等）
    #[serde(alias = "no response")]
    NoResponse,
    /// 简单回复：问候、常识问题、快照中已有的状态
    SimpleResponse,
    /// 需要操作或平台数据；同时包含简单与操作元素时也归为此类
    OperationalResponse,
}

/// 分类结果，同时作为推理回复的 Schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationResult {
    pub decision: Decision,
    /// 操作类输入拆出的原子任务，用最简短的自然语言描述（如 "Do <action> on <topic>"）
    #[serde(default)]
    pub tasks: Vec<String>,
    /// simple_response 的回答；operational_response 的简短确认加 "Stand by"
    #[serde(default)]
    pub response_content: Option<String>,
    /// 决策原因，供后续步骤参考
    #[serde(default)]
    pub reason: Option<String>,
}

impl ClassificationResult {
    pub fn no_response(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::NoResponse,
            tasks: Vec::new(),
            response_content: None,
            reason: Some(reason.into()),
        }
    }

    pub fn simple(response: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            decision: Decision::SimpleResponse,
            tasks: Vec::new(),
            response_content: Some(response.into()),
            reason,
        }
    }

    /// no_response 没有任务也没有回复；只有 operational_response 携带任务
    pub fn normalized(mut self) -> Self {
        match self.decision {
            Decision::NoResponse => {
                self.tasks.clear();
                self.response_content = None;
            }
            Decision::SimpleResponse => self.tasks.clear(),
            Decision::OperationalResponse => {
                self.tasks = self
                    .tasks
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_aliases() {
        let r: ClassificationResult =
            serde_json::from_str(r#"{"decision":"no response","tasks":["x"],"response_content":"hi"}"#).unwrap();
        let r = r.normalized();
        assert_eq!(r.decision, Decision::NoResponse);
        assert!(r.tasks.is_empty());
        assert!(r.response_content.is_none());
    }

    #[test]
    fn test_operational_tasks_trimmed() {
        let r = ClassificationResult {
            decision: Decision::OperationalResponse,
            tasks: vec!["  Arm vehicle ".into(), " ".into()],
            response_content: None,
            reason: None,
        }
        .normalized();
        assert_eq!(r.tasks, vec!["Arm vehicle".to_string()]);
    }

    #[test]
    fn test_sequence_ids_increase() {
        let a = InputEvent::user("a");
        let b = InputEvent::script("b");
        assert!(b.sequence_id > a.sequence_id);
        assert!(InputEvent::user("  ").is_blank());
    }
}
