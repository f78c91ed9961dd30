//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按顺序弹出预置回复；脚本耗尽后返回 fallback（未设置时回显最后一条 User 消息，必然不符合 Schema）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, TokenUsage};
use crate::memory::{Message, Role};

/// Mock 客户端：脚本化回复 + 记录收到的请求
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    requests: Mutex<Vec<Vec<Message>>>,
    usage: TokenUsage,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定回复
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// 脚本耗尽后重复返回该回复
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// 追加一条回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply.into());
        }
    }

    /// 已收到的请求数
    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 第 i 次请求的消息
    pub fn request(&self, i: usize) -> Option<Vec<Message>> {
        self.requests.lock().ok().and_then(|r| r.get(i).cloned())
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let reply = match scripted.or_else(|| self.fallback.clone()) {
            Some(reply) => reply,
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                format!("Echo from Mock: {}", last_user)
            }
        };

        // 粗略估算：4 字符约 1 token
        let prompt: usize = messages.iter().map(|m| m.content.len()).sum();
        self.usage.add((prompt / 4) as u64, (reply.len() / 4) as u64);
        Ok(reply)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_fallback() {
        let mock = MockLlmClient::scripted(["one", "two"]).with_fallback("again");
        let msgs = [Message::user("hi")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "one");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "two");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "again");
        assert_eq!(mock.request_count(), 3);
        assert!(mock.token_usage().2 > 0);
    }

    #[tokio::test]
    async fn test_echo_without_script() {
        let mock = MockLlmClient::new();
        let reply = mock.complete(&[Message::user("arm")]).await.unwrap();
        assert_eq!(reply, "Echo from Mock: arm");
    }
}
