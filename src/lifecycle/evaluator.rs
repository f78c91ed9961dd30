//! 条件评估器
//!
//! 带 parameter + operator 的条件直接对照快照确定性求值；含自由描述条件的指令每个 tick 合并成一次推理请求。
//! conditional 的 exec_condition 与 continuous 的 stop_condition 走同一套逻辑。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandId, Condition, ConditionCheck, ConditionKind};
use crate::llm::StructuredReasoner;
use crate::memory::Message;
use crate::platform::PlatformSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvalState {
    Ready,
    /// 有意推迟到某个将来的触发点再检查
    Deferred,
    NotReady,
    /// 不可观测、过期或被取代，永久丢弃
    Removed,
}

/// 单条指令在一个 tick 中的评估结果
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedCommand {
    pub command_id: CommandId,
    pub eval_state: EvalState,
    pub condition: Option<Condition>,
    pub reason: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluatedCommand {
    fn new(command_id: CommandId, eval_state: EvalState) -> Self {
        Self {
            command_id,
            eval_state,
            condition: None,
            reason: None,
            evaluated_at: Utc::now(),
        }
    }

    fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn on(mut self, condition: &Condition) -> Self {
        self.condition = Some(condition.clone());
        self
    }
}

/// 推理引擎对单条指令的判断（线上格式）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawEvaluation {
    /// 被评估指令的 id
    pub id: u64,
    #[serde(alias = "eval_state")]
    pub eval: EvalState,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EvaluationReply {
    #[serde(default)]
    pub evaluated_commands: Vec<RawEvaluation>,
}

/// 确定性阶段的结论
enum Verdict {
    Settled(EvaluatedCommand),
    /// 所有确定性条件都成立，剩余自由描述条件待推理
    NeedsReasoning,
}

fn deterministic(command: &Command, kind: ConditionKind, snapshot: &PlatformSnapshot) -> Verdict {
    let id = command.id();
    let mut free_form = false;
    let mut first_unmet: Option<&Condition> = None;

    for condition in command.conditions(kind) {
        match condition.check(snapshot) {
            ConditionCheck::Holds => {}
            ConditionCheck::NotYet => {
                first_unmet.get_or_insert(condition);
            }
            ConditionCheck::FreeForm => free_form = true,
            ConditionCheck::Unobservable => {
                let parameter = condition.parameter.as_deref().unwrap_or_default();
                return Verdict::Settled(
                    EvaluatedCommand::new(id, EvalState::Removed)
                        .on(condition)
                        .because(format!("'{parameter}' is no longer observable")),
                );
            }
            ConditionCheck::Incomparable => {
                return Verdict::Settled(
                    EvaluatedCommand::new(id, EvalState::Removed)
                        .on(condition)
                        .because(format!(
                            "cannot compare current value with target {}",
                            condition.target_value
                        )),
                );
            }
        }
    }

    if let Some(condition) = first_unmet {
        return Verdict::Settled(
            EvaluatedCommand::new(id, EvalState::NotReady)
                .on(condition)
                .because(format!("waiting for {}", condition.description)),
        );
    }
    if free_form {
        Verdict::NeedsReasoning
    } else {
        Verdict::Settled(EvaluatedCommand::new(id, EvalState::Ready))
    }
}

/// 混合评估器；没有推理引擎时自由描述条件保持 not_ready
pub struct ConditionEvaluator {
    reasoner: Option<StructuredReasoner>,
}

impl ConditionEvaluator {
    pub fn new(reasoner: Option<StructuredReasoner>) -> Self {
        Self { reasoner }
    }

    pub fn deterministic_only() -> Self {
        Self { reasoner: None }
    }

    fn build_prompt(
        commands: &[&Command],
        kind: ConditionKind,
        snapshot: &PlatformSnapshot,
        context: &str,
    ) -> String {
        let meaning = match kind {
            ConditionKind::Exec => {
                "Each command waits for its conditions. \"ready\" means every condition is met and the \
                 command must execute now."
            }
            ConditionKind::Stop => {
                "Each command runs continuously until its stop conditions are met. \"ready\" means the \
                 stop conditions are met and the command must stop now."
            }
        };
        let listed = commands
            .iter()
            .map(|c| serde_json::to_string(&c.pending_view(kind)).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Evaluate commands against the current vehicle state and situational context.\n{meaning}\n\
             For each command answer \"ready\", \"deferred\" (intentionally wait for a later trigger), \
             \"not_ready\" (conditions not met yet) or \"removed\" (no longer relevant or valid), \
             with a brief reason. Reference commands by id.\n\n\
             Commands to evaluate:\n{listed}\n\nSituational context:\n{}\n\nCurrent vehicle state:\n{}",
            if context.trim().is_empty() { "N/A" } else { context },
            snapshot.to_prompt_json(),
        )
    }

    /// 每条输入指令恰好返回一条结果，顺序与输入一致
    pub async fn evaluate(
        &self,
        developer: &Message,
        commands: &[&Command],
        kind: ConditionKind,
        snapshot: &PlatformSnapshot,
        context: &str,
    ) -> Vec<EvaluatedCommand> {
        let mut settled: Vec<Option<EvaluatedCommand>> = Vec::with_capacity(commands.len());
        let mut open: Vec<&Command> = Vec::new();
        for command in commands {
            match deterministic(command, kind, snapshot) {
                Verdict::Settled(result) => settled.push(Some(result)),
                Verdict::NeedsReasoning => {
                    settled.push(None);
                    open.push(*command);
                }
            }
        }

        let mut reasoned = if open.is_empty() {
            HashMap::new()
        } else {
            self.reason_about(developer, &open, kind, snapshot, context).await
        };

        commands
            .iter()
            .zip(settled)
            .map(|(command, result)| {
                result.unwrap_or_else(|| {
                    reasoned.remove(&command.id()).unwrap_or_else(|| {
                        EvaluatedCommand::new(command.id(), EvalState::NotReady)
                            .because("not evaluated this tick")
                    })
                })
            })
            .collect()
    }

    async fn reason_about(
        &self,
        developer: &Message,
        open: &[&Command],
        kind: ConditionKind,
        snapshot: &PlatformSnapshot,
        context: &str,
    ) -> HashMap<CommandId, EvaluatedCommand> {
        let Some(reasoner) = &self.reasoner else {
            tracing::debug!(commands = open.len(), "no reasoning engine for free-form conditions");
            return HashMap::new();
        };
        let messages = vec![
            developer.clone(),
            Message::user(Self::build_prompt(open, kind, snapshot, context)),
        ];
        let reply = match reasoner.infer::<EvaluationReply>(messages).await {
            Ok(inference) => inference.value,
            Err(e) => {
                tracing::warn!(error = %e, commands = open.len(), "condition evaluation failed, keeping commands pending");
                return HashMap::new();
            }
        };

        let mut results = HashMap::new();
        for raw in reply.evaluated_commands {
            let Some(command) = open.iter().find(|c| c.id().value() == raw.id) else {
                tracing::debug!(id = raw.id, "evaluation for unknown command ignored");
                continue;
            };
            results.entry(command.id()).or_insert_with(|| EvaluatedCommand {
                command_id: command.id(),
                eval_state: raw.eval,
                condition: raw.condition,
                reason: raw.reason,
                evaluated_at: Utc::now(),
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, CommandType, Comparison, FlightMode, OrbitDirection, Scalar};
    use crate::llm::MockLlmClient;
    use std::sync::Arc;
    use std::time::Duration;

    fn snapshot(alt: f64) -> PlatformSnapshot {
        PlatformSnapshot::from_pairs([("alt", Scalar::Float(alt)), ("mode", Scalar::from("GUIDED"))])
    }

    fn when_alt_above(target: f64) -> Command {
        Command::new(
            "land when above target",
            CommandType::Conditional,
            Action::SetMode { mode: FlightMode::Rtl },
            vec![Condition::new(format!("alt > {target}"), 10.0, target).monitoring("alt", Comparison::Gt)],
            vec![],
            None,
        )
        .unwrap()
    }

    fn orbit_until_stop() -> Command {
        Command::new(
            "orbit until told to stop",
            CommandType::Continuous,
            Action::AdjustOrbit {
                radius: 50.0,
                direction: OrbitDirection::Clockwise,
            },
            vec![],
            vec![Condition::new("operator says stop", "orbiting", "stop")],
            None,
        )
        .unwrap()
    }

    fn dev() -> Message {
        Message::system("developer")
    }

    #[tokio::test]
    async fn test_deterministic_states() {
        let evaluator = ConditionEvaluator::deterministic_only();
        let cmd = when_alt_above(50.0);

        let out = evaluator.evaluate(&dev(), &[&cmd], ConditionKind::Exec, &snapshot(20.0), "").await;
        assert_eq!(out[0].eval_state, EvalState::NotReady);

        let out = evaluator.evaluate(&dev(), &[&cmd], ConditionKind::Exec, &snapshot(60.0), "").await;
        assert_eq!(out[0].eval_state, EvalState::Ready);

        let blind = PlatformSnapshot::from_pairs([("mode", Scalar::from("GUIDED"))]);
        let out = evaluator.evaluate(&dev(), &[&cmd], ConditionKind::Exec, &blind, "").await;
        assert_eq!(out[0].eval_state, EvalState::Removed);
    }

    #[tokio::test]
    async fn test_evaluation_is_idempotent() {
        let evaluator = ConditionEvaluator::deterministic_only();
        let a = when_alt_above(50.0);
        let b = when_alt_above(5.0);
        let snap = snapshot(20.0);
        let first = evaluator.evaluate(&dev(), &[&a, &b], ConditionKind::Exec, &snap, "").await;
        let second = evaluator.evaluate(&dev(), &[&a, &b], ConditionKind::Exec, &snap, "").await;
        let states = |v: &[EvaluatedCommand]| v.iter().map(|e| e.eval_state).collect::<Vec<_>>();
        assert_eq!(states(&first), states(&second));
        assert_eq!(states(&first), vec![EvalState::NotReady, EvalState::Ready]);
    }

    #[tokio::test]
    async fn test_free_form_goes_to_reasoning() {
        let orbit = orbit_until_stop();
        let reply = format!(
            r#"{{"evaluated_commands":[{{"id":{},"eval":"ready","reason":"operator said stop"}}]}}"#,
            orbit.id().value()
        );
        let mock = Arc::new(MockLlmClient::scripted([reply]));
        let evaluator = ConditionEvaluator::new(Some(StructuredReasoner::new(mock.clone(), Duration::from_secs(1))));
        let out = evaluator
            .evaluate(&dev(), &[&orbit], ConditionKind::Stop, &snapshot(30.0), "operator: stop")
            .await;
        assert_eq!(out[0].eval_state, EvalState::Ready);
        assert_eq!(mock.request_count(), 1);
        assert!(mock.request(0).unwrap()[1].content.contains("operator says stop"));
    }

    #[tokio::test]
    async fn test_reasoning_failure_keeps_pending() {
        let orbit = orbit_until_stop();
        let mock = Arc::new(MockLlmClient::scripted(["garbage"]));
        let evaluator = ConditionEvaluator::new(Some(StructuredReasoner::new(mock, Duration::from_secs(1))));
        let out = evaluator
            .evaluate(&dev(), &[&orbit], ConditionKind::Stop, &snapshot(30.0), "")
            .await;
        assert_eq!(out[0].eval_state, EvalState::NotReady);

        let out = ConditionEvaluator::deterministic_only()
            .evaluate(&dev(), &[&orbit], ConditionKind::Stop, &snapshot(30.0), "")
            .await;
        assert_eq!(out[0].eval_state, EvalState::NotReady);
    }

    #[tokio::test]
    async fn test_omitted_commands_stay_not_ready() {
        let a = orbit_until_stop();
        let b = orbit_until_stop();
        let reply = format!(
            r#"{{"evaluated_commands":[{{"id":{},"eval":"removed","reason":"stale"}}]}}"#,
            b.id().value()
        );
        let mock = Arc::new(MockLlmClient::scripted([reply]));
        let evaluator = ConditionEvaluator::new(Some(StructuredReasoner::new(mock, Duration::from_secs(1))));
        let out = evaluator
            .evaluate(&dev(), &[&a, &b], ConditionKind::Stop, &snapshot(30.0), "")
            .await;
        assert_eq!(out[0].command_id, a.id());
        assert_eq!(out[0].eval_state, EvalState::NotReady);
        assert_eq!(out[1].eval_state, EvalState::Removed);
    }
}
