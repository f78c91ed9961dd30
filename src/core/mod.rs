//! 核心编排层：错误与恢复、关闭信号、节拍调度、Copilot 构建与主流水线

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod scheduler;
pub mod shutdown;

pub use builder::{create_llm_for_step, CopilotBuilder};
pub use error::{CommandError, DispatchError, ReasoningError};
pub use orchestrator::{Copilot, TurnOutcome};
pub use recovery::{RecoveryAction, RecoveryEngine, Stage, FALLBACK_ACKNOWLEDGEMENT};
pub use scheduler::TickScheduler;
pub use shutdown::{ShutdownManager, ShutdownReason};
