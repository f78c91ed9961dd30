//! 记忆层：短期对话窗口（环形缓冲）；长期记忆由 summarizer 的滚动摘要承担

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
