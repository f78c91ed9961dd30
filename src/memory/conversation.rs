//! 短期记忆：对话历史
//!
//! 固定的开发者消息 + 有界环形缓冲。分类器只取最近 N 条（成本/时效折中），
//! 按需深度摘要使用缓冲中保留的全部消息。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 对话记忆：开发者消息常驻，其余消息超出 capacity 时丢弃最旧的
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    developer: Message,
    messages: VecDeque<Message>,
    capacity: usize,
}

impl ConversationMemory {
    pub fn new(developer: Message, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            developer,
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, msg: Message) {
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(msg);
    }

    pub fn developer(&self) -> &Message {
        &self.developer
    }

    /// 开发者消息 + 最近 n 条
    pub fn window(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        std::iter::once(self.developer.clone())
            .chain(self.messages.iter().skip(skip).cloned())
            .collect()
    }

    /// 最近 n 条（不含开发者消息），供 summarizer 打包
    pub fn tail(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// 缓冲中保留的全部历史（含开发者消息）
    pub fn all(&self) -> Vec<Message> {
        self.window(self.messages.len())
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(capacity: usize) -> ConversationMemory {
        ConversationMemory::new(Message::system("dev"), capacity)
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let mut mem = memory(3);
        for i in 0..5 {
            mem.push(Message::user(format!("m{i}")));
        }
        assert_eq!(mem.len(), 3);
        let all = mem.all();
        assert_eq!(all[0].content, "dev");
        assert_eq!(all[1].content, "m2");
        assert_eq!(all[3].content, "m4");
    }

    #[test]
    fn test_window_keeps_developer_message_first() {
        let mut mem = memory(10);
        for i in 0..8 {
            mem.push(Message::user(format!("m{i}")));
        }
        let window = mem.window(5);
        assert_eq!(window.len(), 6);
        assert_eq!(window[0].role, Role::System);
        assert_eq!(window[1].content, "m3");

        // 窗口大于历史长度时返回全部
        assert_eq!(memory(10).window(5).len(), 1);
    }

    #[test]
    fn test_tail() {
        let mut mem = memory(10);
        mem.push(Message::user("a"));
        mem.push(Message::assistant("b"));
        mem.push(Message::user("c"));
        let tail = mem.tail(2);
        assert_eq!(tail, vec![Message::assistant("b"), Message::user("c")]);
    }
}
