//! 指令生命周期：按类别接纳指令、周期评估 conditional、按节拍驱动 continuous、派发
//!
//! 所有方法都需要 &mut self，一次 tick 或一次接纳必须完整执行完，不会交错。
//! Command 在 conditional 队列、continuous 注册表和派发之间按值移动。

pub mod conditional;
pub mod continuous;
pub mod dispatcher;
pub mod evaluator;
pub mod events;

use std::collections::HashSet;
use std::time::Instant;

use crate::command::{Command, CommandId, CommandType, CommandView, ConditionKind};
use crate::memory::Message;
use crate::platform::PlatformSnapshot;

pub use conditional::ConditionalQueue;
pub use continuous::ContinuousRegistry;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use evaluator::{ConditionEvaluator, EvalState, EvaluatedCommand, EvaluationReply, RawEvaluation};
pub use events::{DispatchOrigin, LifecycleEvent, StopReason};

/// 评估与派发时的态势输入
#[derive(Debug, Clone, Copy)]
pub struct Situation<'a> {
    pub developer: &'a Message,
    pub snapshot: &'a PlatformSnapshot,
    pub context: &'a str,
}

pub struct CommandLifecycle {
    queue: ConditionalQueue,
    registry: ContinuousRegistry,
    evaluator: ConditionEvaluator,
    dispatcher: Dispatcher,
}

impl CommandLifecycle {
    pub fn new(
        queue: ConditionalQueue,
        registry: ContinuousRegistry,
        evaluator: ConditionEvaluator,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            queue,
            registry,
            evaluator,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn pending(&self) -> Vec<CommandView> {
        self.queue.iter().map(Command::view).collect()
    }

    pub fn active(&self) -> Vec<CommandView> {
        self.registry.iter().map(Command::view).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// 新输入到来，deferred 的 conditional 恢复评估
    pub fn wake_deferred(&mut self) {
        self.queue.wake_deferred();
    }

    /// 接纳一批合成结果：先 immediate，再 continuous，最后 conditional；rejected 只报告
    pub async fn admit(&mut self, commands: Vec<Command>, now: Instant) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        let mut immediates = Vec::new();
        let mut continuous = Vec::new();
        let mut conditionals = Vec::new();

        for command in commands {
            match command.cmd_type() {
                CommandType::Rejected => {
                    let reason = command.reasoning().unwrap_or("rejected").to_string();
                    tracing::info!(command = %command, reason = %reason, "command rejected");
                    events.push(LifecycleEvent::Rejected {
                        command: command.view(),
                        reason,
                    });
                }
                CommandType::Immediate => immediates.push(command),
                CommandType::Continuous if command.exec_condition().is_empty() => continuous.push(command),
                CommandType::Continuous | CommandType::Conditional => conditionals.push(command),
            }
        }

        for command in immediates {
            self.dispatch_once(command, DispatchOrigin::Immediate, &mut events).await;
        }
        for command in continuous {
            if let Some(existing) = self.registry.find_identical(&command) {
                tracing::info!(command = %command, existing = %existing, "identical continuous command already active");
                events.push(LifecycleEvent::Duplicate {
                    command: command.view(),
                    existing,
                });
                continue;
            }
            self.activate(command, now, &mut events).await;
        }
        for command in conditionals {
            if let Some(existing) = self.queue.find_duplicate(&command) {
                tracing::info!(command = %command, existing = %existing, "identical conditional command already pending");
                events.push(LifecycleEvent::Duplicate {
                    command: command.view(),
                    existing,
                });
                continue;
            }
            tracing::info!(command = %command, "conditional command queued");
            events.push(LifecycleEvent::Queued {
                command: command.view(),
            });
            self.queue.push(command);
        }
        events
    }

    /// 一次完整的评估/派发：conditional 队列，然后到达节拍的 continuous 指令
    pub async fn tick(&mut self, situation: Situation<'_>, now: Instant) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        let activated = self.tick_conditionals(situation, now, &mut events).await;
        self.tick_continuous(situation, now, &activated, &mut events).await;
        events
    }

    async fn tick_conditionals(
        &mut self,
        situation: Situation<'_>,
        now: Instant,
        events: &mut Vec<LifecycleEvent>,
    ) -> HashSet<CommandId> {
        self.queue.begin_tick();
        let mut activated = HashSet::new();
        let mut results = {
            let due = self.queue.due();
            if due.is_empty() {
                return activated;
            }
            self.evaluator
                .evaluate(
                    situation.developer,
                    &due,
                    ConditionKind::Exec,
                    situation.snapshot,
                    situation.context,
                )
                .await
        };
        // ready 的指令按插入顺序派发，与评估回复顺序无关
        results.sort_by_key(|r| r.command_id);

        for result in results {
            match result.eval_state {
                EvalState::NotReady => {}
                EvalState::Deferred => {
                    self.queue.defer(result.command_id);
                    if let Some(command) = self.queue.iter().find(|c| c.id() == result.command_id) {
                        tracing::info!(command = %command, reason = ?result.reason, "conditional command deferred");
                        events.push(LifecycleEvent::Deferred {
                            command: command.view(),
                            reason: result.reason,
                        });
                    }
                }
                EvalState::Removed => {
                    if let Some(command) = self.queue.take(result.command_id) {
                        let reason = result.reason.unwrap_or_else(|| "removed by evaluator".to_string());
                        tracing::info!(command = %command, reason = %reason, "conditional command removed");
                        events.push(LifecycleEvent::Removed {
                            command: command.view(),
                            reason,
                        });
                    }
                }
                EvalState::Ready => {
                    let Some(command) = self.queue.take(result.command_id) else {
                        continue;
                    };
                    if command.cmd_type() == CommandType::Continuous {
                        let id = command.id();
                        if self.activate(command, now, events).await {
                            activated.insert(id);
                        }
                    } else {
                        self.dispatch_once(command, DispatchOrigin::Promoted, events).await;
                    }
                }
            }
        }
        activated
    }

    async fn tick_continuous(
        &mut self,
        situation: Situation<'_>,
        now: Instant,
        skip: &HashSet<CommandId>,
        events: &mut Vec<LifecycleEvent>,
    ) {
        let results = {
            let due: Vec<&Command> = self
                .registry
                .due(now)
                .into_iter()
                .filter(|c| !skip.contains(&c.id()))
                .collect();
            if due.is_empty() {
                return;
            }
            self.evaluator
                .evaluate(
                    situation.developer,
                    &due,
                    ConditionKind::Stop,
                    situation.snapshot,
                    situation.context,
                )
                .await
        };

        for result in results {
            let reason = match result.eval_state {
                EvalState::Ready => Some(StopReason::StopCondition),
                EvalState::Removed => Some(StopReason::ConditionRemoved),
                EvalState::NotReady | EvalState::Deferred => None,
            };
            if let Some(reason) = reason {
                if let Some(command) = self.registry.take(result.command_id) {
                    tracing::info!(command = %command, reason = ?reason, "continuous command stopped");
                    events.push(LifecycleEvent::Stopped {
                        command: command.view(),
                        reason,
                        detail: result.reason,
                    });
                }
                continue;
            }

            let outcome = match self.registry.iter().find(|c| c.id() == result.command_id) {
                Some(command) => self.dispatcher.dispatch(command, DispatchOrigin::Tick).await,
                None => continue,
            };
            match outcome {
                DispatchOutcome::Succeeded => {
                    self.registry.mark_dispatched(result.command_id, now);
                    if let Some(command) = self.registry.iter().find(|c| c.id() == result.command_id) {
                        events.push(LifecycleEvent::Dispatched {
                            command: command.view(),
                            origin: DispatchOrigin::Tick,
                        });
                    }
                }
                DispatchOutcome::Failed(e) => {
                    if let Some(command) = self.registry.take(result.command_id) {
                        tracing::warn!(command = %command, error = %e, "continuous tick failed, stopping command");
                        events.push(LifecycleEvent::DispatchFailed {
                            command: command.view(),
                            origin: DispatchOrigin::Tick,
                            error: e.to_string(),
                        });
                        events.push(LifecycleEvent::Stopped {
                            command: command.view(),
                            reason: StopReason::DispatchFailed,
                            detail: Some(e.to_string()),
                        });
                    }
                }
            }
        }
    }

    /// 打断同资源的 continuous 指令后派发一次；无论成败指令都进入终态
    async fn dispatch_once(
        &mut self,
        command: Command,
        origin: DispatchOrigin,
        events: &mut Vec<LifecycleEvent>,
    ) {
        for interrupted in self.registry.take_conflicting(&command) {
            tracing::info!(command = %interrupted, by = %command, "continuous command interrupted");
            events.push(LifecycleEvent::Stopped {
                command: interrupted.view(),
                reason: StopReason::Interrupted,
                detail: Some(format!("interrupted by {}", command.task())),
            });
        }
        match self.dispatcher.dispatch(&command, origin).await {
            DispatchOutcome::Succeeded => events.push(LifecycleEvent::Dispatched {
                command: command.view(),
                origin,
            }),
            DispatchOutcome::Failed(e) => {
                tracing::warn!(command = %command, error = %e, "dispatch failed");
                events.push(LifecycleEvent::DispatchFailed {
                    command: command.view(),
                    origin,
                    error: e.to_string(),
                });
            }
        }
    }

    /// 取代冲突的 continuous 指令，立即派发首个 tick，成功后进入注册表
    async fn activate(&mut self, command: Command, now: Instant, events: &mut Vec<LifecycleEvent>) -> bool {
        for superseded in self.registry.take_conflicting(&command) {
            tracing::info!(command = %superseded, by = %command, "continuous command superseded");
            events.push(LifecycleEvent::Stopped {
                command: superseded.view(),
                reason: StopReason::Superseded,
                detail: Some(format!("superseded by {}", command.id())),
            });
        }
        match self.dispatcher.dispatch(&command, DispatchOrigin::Activation).await {
            DispatchOutcome::Succeeded => {
                tracing::info!(command = %command, "continuous command activated");
                events.push(LifecycleEvent::Activated {
                    command: command.view(),
                });
                events.push(LifecycleEvent::Dispatched {
                    command: command.view(),
                    origin: DispatchOrigin::Activation,
                });
                self.registry.activate(command, now);
                true
            }
            DispatchOutcome::Failed(e) => {
                tracing::warn!(command = %command, error = %e, "continuous command failed on first dispatch");
                events.push(LifecycleEvent::DispatchFailed {
                    command: command.view(),
                    origin: DispatchOrigin::Activation,
                    error: e.to_string(),
                });
                events.push(LifecycleEvent::Stopped {
                    command: command.view(),
                    reason: StopReason::DispatchFailed,
                    detail: Some(e.to_string()),
                });
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, CommandName, Comparison, Condition, FlightMode, OrbitDirection, Scalar};
    use crate::core::DispatchError;
    use crate::platform::{Platform, SimulatedPlatform};
    use std::sync::Arc;
    use std::time::Duration;

    fn lifecycle(platform: Arc<SimulatedPlatform>) -> CommandLifecycle {
        CommandLifecycle::new(
            ConditionalQueue::new(3),
            ContinuousRegistry::new(Duration::from_secs(1)),
            ConditionEvaluator::deterministic_only(),
            Dispatcher::new(platform, Duration::from_secs(1)),
        )
    }

    fn orbit(stop_alt: f64) -> Command {
        Command::new(
            "orbit until low",
            CommandType::Continuous,
            Action::AdjustOrbit {
                radius: 50.0,
                direction: OrbitDirection::Clockwise,
            },
            vec![],
            vec![Condition::new(format!("alt < {stop_alt}"), 30.0, stop_alt).monitoring("alt", Comparison::Lt)],
            None,
        )
        .unwrap()
    }

    fn rtl_when_above(alt: f64) -> Command {
        Command::new(
            "land above altitude",
            CommandType::Conditional,
            Action::SetMode { mode: FlightMode::Rtl },
            vec![Condition::new(format!("alt > {alt}"), 0.0, alt).monitoring("alt", Comparison::Gt)],
            vec![],
            None,
        )
        .unwrap()
    }

    fn situation<'a>(dev: &'a Message, snap: &'a PlatformSnapshot) -> Situation<'a> {
        Situation {
            developer: dev,
            snapshot: snap,
            context: "",
        }
    }

    #[tokio::test]
    async fn test_immediate_interrupts_continuous() {
        let platform = Arc::new(SimulatedPlatform::new());
        let mut lc = lifecycle(platform.clone());
        let t0 = Instant::now();
        lc.admit(vec![orbit(5.0)], t0).await;
        assert_eq!(lc.active_count(), 1);

        let land = Command::immediate("land now", Action::SetMode { mode: FlightMode::Rtl });
        let events = lc.admit(vec![land], t0).await;
        assert!(matches!(
            events[0],
            LifecycleEvent::Stopped {
                reason: StopReason::Interrupted,
                ..
            }
        ));
        assert!(matches!(events[1], LifecycleEvent::Dispatched { .. }));
        assert_eq!(lc.active_count(), 0);
        assert_eq!(
            platform.dispatch_log().last(),
            Some(&Action::SetMode { mode: FlightMode::Rtl })
        );
    }

    #[tokio::test]
    async fn test_continuous_ticks_on_cadence_until_stop() {
        let platform = Arc::new(SimulatedPlatform::new());
        platform.set_altitude_reading(30.0);
        let mut lc = lifecycle(platform.clone());
        let dev = Message::system("dev");
        let t0 = Instant::now();
        lc.admit(vec![orbit(5.0)], t0).await;
        assert_eq!(platform.dispatch_count(CommandName::AdjustOrbit), 1);

        let snap = platform.snapshot().await;
        lc.tick(situation(&dev, &snap), t0 + Duration::from_millis(400)).await;
        assert_eq!(platform.dispatch_count(CommandName::AdjustOrbit), 1);
        lc.tick(situation(&dev, &snap), t0 + Duration::from_secs(1)).await;
        assert_eq!(platform.dispatch_count(CommandName::AdjustOrbit), 2);

        platform.set_altitude_reading(2.0);
        let snap = platform.snapshot().await;
        let events = lc.tick(situation(&dev, &snap), t0 + Duration::from_secs(2)).await;
        assert!(matches!(
            events[0],
            LifecycleEvent::Stopped {
                reason: StopReason::StopCondition,
                ..
            }
        ));
        assert_eq!(lc.active_count(), 0);
        assert_eq!(platform.dispatch_count(CommandName::AdjustOrbit), 2);
    }

    #[tokio::test]
    async fn test_jittered_ticks_dispatch_every_period() {
        let platform = Arc::new(SimulatedPlatform::new());
        platform.set_altitude_reading(30.0);
        let mut lc = lifecycle(platform.clone());
        let dev = Message::system("dev");
        let t0 = Instant::now();
        lc.admit(vec![orbit(5.0)], t0).await;

        let snap = platform.snapshot().await;
        for ms in [1003, 2001, 3003, 4001, 5003, 6001] {
            lc.tick(situation(&dev, &snap), t0 + Duration::from_millis(ms)).await;
        }
        // 激活时一次，之后每个周期一次
        assert_eq!(platform.dispatch_count(CommandName::AdjustOrbit), 7);
        assert_eq!(lc.active_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped() {
        let platform = Arc::new(SimulatedPlatform::new());
        let mut lc = lifecycle(platform);
        let t0 = Instant::now();
        lc.admit(vec![orbit(5.0), rtl_when_above(50.0)], t0).await;
        let events = lc.admit(vec![orbit(5.0), rtl_when_above(50.0)], t0).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, LifecycleEvent::Duplicate { .. })));
        assert_eq!(lc.active_count(), 1);
        assert_eq!(lc.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_ready_conditionals_dispatch_in_insertion_order() {
        let platform = Arc::new(SimulatedPlatform::new());
        let mut lc = lifecycle(platform.clone());
        let dev = Message::system("dev");
        let first = rtl_when_above(10.0);
        let second = Command::new(
            "slow down",
            CommandType::Conditional,
            Action::SetAltitude { altitude: 20.0 },
            vec![Condition::new("alt > 5", 0.0, 5.0).monitoring("alt", Comparison::Gt)],
            vec![],
            None,
        )
        .unwrap();
        let t0 = Instant::now();
        lc.admit(vec![first, second], t0).await;

        let snap = PlatformSnapshot::from_pairs([("alt", Scalar::Float(3.0))]);
        assert!(lc.tick(situation(&dev, &snap), t0).await.is_empty());
        assert_eq!(lc.pending_count(), 2);

        let snap = PlatformSnapshot::from_pairs([("alt", Scalar::Float(60.0))]);
        let events = lc.tick(situation(&dev, &snap), t0).await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            platform.dispatch_log(),
            vec![
                Action::SetMode { mode: FlightMode::Rtl },
                Action::SetAltitude { altitude: 20.0 }
            ]
        );
        assert_eq!(lc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unobservable_conditional_removed() {
        let platform = Arc::new(SimulatedPlatform::new());
        let mut lc = lifecycle(platform);
        let dev = Message::system("dev");
        let t0 = Instant::now();
        lc.admit(vec![rtl_when_above(50.0)], t0).await;
        let blind = PlatformSnapshot::from_pairs([("mode", Scalar::from("GUIDED"))]);
        let events = lc.tick(situation(&dev, &blind), t0).await;
        assert!(matches!(events[0], LifecycleEvent::Removed { .. }));
        assert_eq!(lc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_tick_stops_continuous() {
        let platform = Arc::new(SimulatedPlatform::new());
        platform.set_altitude_reading(30.0);
        let mut lc = lifecycle(platform.clone());
        let dev = Message::system("dev");
        let t0 = Instant::now();
        lc.admit(vec![orbit(5.0)], t0).await;
        platform.fail_next(
            CommandName::AdjustOrbit,
            DispatchError::NotImplemented("adjust_orbit".into()),
        );
        let snap = platform.snapshot().await;
        let events = lc.tick(situation(&dev, &snap), t0 + Duration::from_secs(1)).await;
        assert!(matches!(events[0], LifecycleEvent::DispatchFailed { .. }));
        assert!(matches!(
            events[1],
            LifecycleEvent::Stopped {
                reason: StopReason::DispatchFailed,
                ..
            }
        ));
        assert_eq!(lc.active_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_reported_not_admitted() {
        let platform = Arc::new(SimulatedPlatform::new());
        let mut lc = lifecycle(platform.clone());
        let events = lc
            .admit(vec![Command::rejected("fly to the moon", "Unknown command")], Instant::now())
            .await;
        assert!(matches!(events[0], LifecycleEvent::Rejected { .. }));
        assert_eq!(lc.pending_count() + lc.active_count(), 0);
        assert!(platform.dispatch_log().is_empty());
    }
}
