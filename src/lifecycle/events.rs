//! 生命周期事件：每次状态转移产生一条，可序列化，供调用方展示与 summarizer 记录

use serde::Serialize;

use crate::command::{CommandId, CommandView};

/// 派发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrigin {
    Immediate,
    /// 条件满足后提升的 conditional
    Promoted,
    /// continuous 激活时的首次派发
    Activation,
    /// continuous 的周期派发
    Tick,
}

impl DispatchOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchOrigin::Immediate => "immediate",
            DispatchOrigin::Promoted => "promoted",
            DispatchOrigin::Activation => "activation",
            DispatchOrigin::Tick => "tick",
        }
    }
}

/// continuous 指令停止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StopCondition,
    /// 停止条件已无法监控
    ConditionRemoved,
    /// 被新的 continuous 取代
    Superseded,
    /// 被同资源的 immediate 打断
    Interrupted,
    DispatchFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Rejected {
        command: CommandView,
        reason: String,
    },
    Queued {
        command: CommandView,
    },
    Dispatched {
        command: CommandView,
        origin: DispatchOrigin,
    },
    DispatchFailed {
        command: CommandView,
        origin: DispatchOrigin,
        error: String,
    },
    Activated {
        command: CommandView,
    },
    Stopped {
        command: CommandView,
        reason: StopReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Deferred {
        command: CommandView,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Removed {
        command: CommandView,
        reason: String,
    },
    Duplicate {
        command: CommandView,
        existing: CommandId,
    },
}

impl LifecycleEvent {
    pub fn command(&self) -> &CommandView {
        match self {
            LifecycleEvent::Rejected { command, .. }
            | LifecycleEvent::Queued { command }
            | LifecycleEvent::Dispatched { command, .. }
            | LifecycleEvent::DispatchFailed { command, .. }
            | LifecycleEvent::Activated { command }
            | LifecycleEvent::Stopped { command, .. }
            | LifecycleEvent::Deferred { command, .. }
            | LifecycleEvent::Removed { command, .. }
            | LifecycleEvent::Duplicate { command, .. } => command,
        }
    }

    /// continuous 的周期派发，不值得进入摘要
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Dispatched {
                origin: DispatchOrigin::Tick,
                ..
            }
        )
    }

    /// 面向操作员的消息；只有拒绝、失败、停止、移除需要主动告知
    pub fn user_message(&self) -> Option<String> {
        let name = |c: &CommandView| {
            c.cmd_name
                .map(|n| n.to_string())
                .unwrap_or_else(|| c.task.clone())
        };
        match self {
            LifecycleEvent::Rejected { command, reason } => {
                Some(format!("Rejected '{}': {}", command.task, reason))
            }
            LifecycleEvent::DispatchFailed { command, error, .. } => {
                Some(format!("{} failed: {}", name(command), error))
            }
            LifecycleEvent::Stopped { command, reason, detail } => {
                let why = match reason {
                    StopReason::StopCondition => "stop condition met",
                    StopReason::ConditionRemoved => "stop condition no longer observable",
                    StopReason::Superseded => "superseded by a newer command",
                    StopReason::Interrupted => "interrupted by an immediate command",
                    StopReason::DispatchFailed => "dispatch failed",
                };
                Some(match detail {
                    Some(d) => format!("Stopped {} ({}): {}", name(command), why, d),
                    None => format!("Stopped {} ({})", name(command), why),
                })
            }
            LifecycleEvent::Removed { command, reason } => {
                Some(format!("Dropped pending {}: {}", name(command), reason))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, Command};

    #[test]
    fn test_event_serialization_tag() {
        let cmd = Command::immediate("arm", Action::ArmDisarm { arm: true });
        let event = LifecycleEvent::Dispatched {
            command: cmd.view(),
            origin: DispatchOrigin::Immediate,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "dispatched");
        assert_eq!(json["origin"], "immediate");
        assert_eq!(json["command"]["cmd_name"], "arm_disarm");
        assert_eq!(json["command"]["parameters"]["arm"], true);
        assert!(event.user_message().is_none());
    }

    #[test]
    fn test_user_messages() {
        let rejected = Command::rejected("fly to the moon", "Unknown command: fly_to_moon");
        let event = LifecycleEvent::Rejected {
            command: rejected.view(),
            reason: "Unknown command: fly_to_moon".into(),
        };
        assert!(event.user_message().unwrap().contains("fly to the moon"));

        let cmd = Command::immediate("orbit", Action::ArmDisarm { arm: false });
        let stopped = LifecycleEvent::Stopped {
            command: cmd.view(),
            reason: StopReason::Interrupted,
            detail: None,
        };
        assert!(stopped.user_message().unwrap().contains("interrupted"));
    }
}
