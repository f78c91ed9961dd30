//! 派发器
//!
//! 把 Command 的 Action 交给执行平台，施加超时，并为每次派发输出一条结构化审计日志（JSON）。
//! 失败不重试，调用方据此把指令转入终态。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::command::Command;
use crate::core::DispatchError;
use crate::lifecycle::DispatchOrigin;
use crate::platform::Platform;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Succeeded,
    Failed(DispatchError),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Succeeded)
    }
}

pub struct Dispatcher {
    platform: Arc<dyn Platform>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(platform: Arc<dyn Platform>, timeout: Duration) -> Self {
        Self { platform, timeout }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub async fn dispatch(&self, command: &Command, origin: DispatchOrigin) -> DispatchOutcome {
        let Some(action) = command.action() else {
            return DispatchOutcome::Failed(DispatchError::InvalidState(format!(
                "{} has no action to dispatch",
                command.id()
            )));
        };

        let start = Instant::now();
        let result = timeout(self.timeout, self.platform.execute(action)).await;
        let outcome = match result {
            Ok(Ok(())) => DispatchOutcome::Succeeded,
            Ok(Err(e)) => DispatchOutcome::Failed(e),
            Err(_) => DispatchOutcome::Failed(DispatchError::Timeout(self.timeout)),
        };

        let audit = serde_json::json!({
            "event": "dispatch_audit",
            "id": command.id(),
            "cmd_name": action.name(),
            "parameters": action.parameters(),
            "origin": origin.as_str(),
            "ok": outcome.is_success(),
            "outcome": match &outcome {
                DispatchOutcome::Succeeded => "ok".to_string(),
                DispatchOutcome::Failed(e) => e.to_string(),
            },
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "dispatch");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, CommandName};
    use crate::platform::SimulatedPlatform;
    use async_trait::async_trait;

    struct StuckPlatform;

    #[async_trait]
    impl Platform for StuckPlatform {
        async fn snapshot(&self) -> crate::platform::PlatformSnapshot {
            crate::platform::PlatformSnapshot::new()
        }

        async fn execute(&self, _action: &Action) -> Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_success_and_failure() {
        let platform = Arc::new(SimulatedPlatform::new());
        let dispatcher = Dispatcher::new(platform.clone(), Duration::from_secs(1));

        let arm = Command::immediate("arm", Action::ArmDisarm { arm: true });
        assert!(dispatcher.dispatch(&arm, DispatchOrigin::Immediate).await.is_success());
        assert_eq!(platform.dispatch_count(CommandName::ArmDisarm), 1);

        platform.fail_next(
            CommandName::GoToLocation,
            DispatchError::CommunicationError("link lost".into()),
        );
        let goto = Command::immediate(
            "go",
            Action::GoToLocation { ddlat: 1.0, ddlon: 1.0, alt: None },
        );
        let outcome = dispatcher.dispatch(&goto, DispatchOrigin::Promoted).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Failed(DispatchError::CommunicationError("link lost".into()))
        );
    }

    #[tokio::test]
    async fn test_dispatch_timeout() {
        let dispatcher = Dispatcher::new(Arc::new(StuckPlatform), Duration::from_millis(20));
        let arm = Command::immediate("arm", Action::ArmDisarm { arm: true });
        let outcome = dispatcher.dispatch(&arm, DispatchOrigin::Immediate).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Failed(DispatchError::Timeout(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn test_rejected_command_not_dispatched() {
        let platform = Arc::new(SimulatedPlatform::new());
        let dispatcher = Dispatcher::new(platform.clone(), Duration::from_secs(1));
        let rejected = Command::rejected("fly to the moon", "unknown");
        assert!(!dispatcher.dispatch(&rejected, DispatchOrigin::Immediate).await.is_success());
        assert!(platform.dispatch_log().is_empty());
    }
}
