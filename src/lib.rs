//! Wingman - Rust 飞行副驾驶
//!
//! 把操作员的自然语言输入变成受控的飞行指令，并管理指令的整个生命周期。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **observability**: tracing 订阅器初始化
//! - **core**: 错误与恢复、关闭信号、节拍调度、Copilot 编排
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）与结构化推理
//! - **memory**: 对话消息与有界对话记忆
//! - **platform**: 执行平台抽象、状态快照与模拟平台
//! - **command**: 条件、指令目录、Command 模型与指令合成
//! - **intent**: 输入事件与意图分类
//! - **lifecycle**: 条件评估、conditional 队列、continuous 注册表、派发
//! - **summarizer**: 后台上下文摘要服务

pub mod command;
pub mod config;
pub mod core;
pub mod intent;
pub mod lifecycle;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod platform;
pub mod summarizer;

pub use crate::core::{Copilot, CopilotBuilder, TurnOutcome};
