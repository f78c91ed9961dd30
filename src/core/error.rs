//! 错误类型
//!
//! 三个边界各自一个枚举：推理引擎（ReasoningError）、指令不变量/目录匹配（CommandError）、
//! 执行平台（DispatchError）。三者都在本地恢复，不会让主循环崩溃。

use std::time::Duration;

use thiserror::Error;

/// 推理引擎调用失败（分类 / 合成 / 评估 / 摘要）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningError {
    /// 回复不符合期望的 JSON Schema
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Reasoning timed out after {0:?}")]
    Timeout(Duration),

    /// 后端不可用（网络、鉴权等），调用方按超时同样处理
    #[error("Reasoning backend unavailable: {0}")]
    Unavailable(String),
}

/// 指令构造失败：无法匹配目录或违反数据不变量。表现为 rejected 指令，而不是异常
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing command name for a {0} command")]
    MissingCommand(String),

    #[error("Unknown parameter '{param}' for {cmd}")]
    UnknownParameter { cmd: String, param: String },

    #[error("Missing parameter '{param}' for {cmd}")]
    MissingParameter { cmd: String, param: String },

    #[error("Invalid value for '{param}': {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("Parameter keys and values differ in length ({keys} keys, {values} values)")]
    MismatchedParameters { keys: usize, values: usize },

    #[error("Conditional command has no exec condition")]
    MissingExecCondition,

    #[error("Continuous command has no stop condition")]
    MissingStopCondition,

    #[error("Condition '{description}' references unobservable value '{parameter}'")]
    UnobservableCondition { description: String, parameter: String },

    /// 条件出现在不接受它的类别上（如 immediate 带 exec_condition）
    #[error("{0} command cannot carry a {1}")]
    UnexpectedCondition(&'static str, &'static str),
}

/// 执行平台拒绝或无法完成操作
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),
}
