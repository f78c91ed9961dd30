//! Command：单条带时间类别的结构化指令
//!
//! 不变量在构造时强制：
//! - rejected ⇒ 没有 Action、没有任何条件
//! - conditional ⇒ exec_condition 非空
//! - continuous ⇒ stop_condition 非空
//!
//! Command 不实现 Clone，只能按值在容器之间移动，保证同一时刻只存在于一个队列中。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::command::{Action, CommandName, Condition, Parameters, Resource};
use crate::core::CommandError;

/// 进程内单调递增的指令 ID，同时代表插入顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CommandId(u64);

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

impl CommandId {
    fn next() -> Self {
        Self(NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 时间类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Immediate,
    Conditional,
    #[serde(alias = "continous")]
    Continuous,
    Rejected,
}

impl CommandType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::Immediate => "immediate",
            CommandType::Conditional => "conditional",
            CommandType::Continuous => "continuous",
            CommandType::Rejected => "rejected",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Command {
    id: CommandId,
    task: String,
    cmd_type: CommandType,
    action: Option<Action>,
    exec_condition: Vec<Condition>,
    stop_condition: Vec<Condition>,
    reasoning: Option<String>,
    created_at: DateTime<Utc>,
}

impl Command {
    /// 构造非 rejected 指令；违反类别不变量时返回 CommandError，调用方据此改为 rejected
    pub fn new(
        task: impl Into<String>,
        cmd_type: CommandType,
        action: Action,
        exec_condition: Vec<Condition>,
        stop_condition: Vec<Condition>,
        reasoning: Option<String>,
    ) -> Result<Self, CommandError> {
        match cmd_type {
            CommandType::Rejected => {
                return Err(CommandError::UnexpectedCondition("rejected", "command action"));
            }
            CommandType::Immediate if !exec_condition.is_empty() => {
                return Err(CommandError::UnexpectedCondition("immediate", "exec condition"));
            }
            CommandType::Conditional if exec_condition.is_empty() => {
                return Err(CommandError::MissingExecCondition);
            }
            CommandType::Continuous if stop_condition.is_empty() => {
                return Err(CommandError::MissingStopCondition);
            }
            _ => {}
        }
        if cmd_type != CommandType::Continuous && !stop_condition.is_empty() {
            return Err(CommandError::UnexpectedCondition(cmd_type.as_str(), "stop condition"));
        }
        Ok(Self {
            id: CommandId::next(),
            task: task.into(),
            cmd_type,
            action: Some(action),
            exec_condition,
            stop_condition,
            reasoning,
            created_at: Utc::now(),
        })
    }

    pub fn immediate(task: impl Into<String>, action: Action) -> Self {
        Self {
            id: CommandId::next(),
            task: task.into(),
            cmd_type: CommandType::Immediate,
            action: Some(action),
            exec_condition: Vec::new(),
            stop_condition: Vec::new(),
            reasoning: None,
            created_at: Utc::now(),
        }
    }

    /// rejected 指令：只保留 task 与原因
    pub fn rejected(task: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            id: CommandId::next(),
            task: task.into(),
            cmd_type: CommandType::Rejected,
            action: None,
            exec_condition: Vec::new(),
            stop_condition: Vec::new(),
            reasoning: Some(reasoning.into()),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn cmd_type(&self) -> CommandType {
        self.cmd_type
    }

    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }

    pub fn cmd_name(&self) -> Option<CommandName> {
        self.action.as_ref().map(Action::name)
    }

    pub fn parameters(&self) -> Parameters {
        self.action.as_ref().map(Action::parameters).unwrap_or_default()
    }

    pub fn exec_condition(&self) -> &[Condition] {
        &self.exec_condition
    }

    pub fn stop_condition(&self) -> &[Condition] {
        &self.stop_condition
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_rejected(&self) -> bool {
        self.cmd_type == CommandType::Rejected
    }

    pub fn resources(&self) -> &'static [Resource] {
        self.cmd_name().map(CommandName::resources).unwrap_or(&[])
    }

    /// 两条指令目标资源相交
    pub fn conflicts_with(&self, other: &Command) -> bool {
        match (self.cmd_name(), other.cmd_name()) {
            (Some(a), Some(b)) => a.conflicts_with(b),
            _ => false,
        }
    }

    /// cmd_name 与参数都相同
    pub fn same_action(&self, other: &Command) -> bool {
        self.action.is_some() && self.action == other.action
    }

    /// 同类别、同动作、同条件：同一个请求的重复
    pub fn same_request(&self, other: &Command) -> bool {
        fn same_conditions(a: &[Condition], b: &[Condition]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_trigger(y))
        }
        self.cmd_type == other.cmd_type
            && self.same_action(other)
            && same_conditions(&self.exec_condition, &other.exec_condition)
            && same_conditions(&self.stop_condition, &other.stop_condition)
    }

    /// 供事件与 prompt 使用的只读视图
    pub fn view(&self) -> CommandView {
        CommandView {
            id: self.id,
            task: self.task.clone(),
            cmd_name: self.cmd_name(),
            cmd_type: self.cmd_type,
            parameters: self.parameters(),
            reasoning: self.reasoning.clone(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cmd_name() {
            Some(name) => write!(f, "{} {} {} ({})", self.id, name, self.parameters(), self.cmd_type),
            None => write!(f, "{} rejected: {}", self.id, self.task),
        }
    }
}

/// Command 的可克隆、可序列化视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandView {
    pub id: CommandId,
    pub task: String,
    pub cmd_name: Option<CommandName>,
    pub cmd_type: CommandType,
    pub parameters: Parameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// 条件所在的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Exec,
    Stop,
}

/// 提交给评估步骤的条件视图
#[derive(Debug, Clone, Serialize)]
pub struct PendingView<'a> {
    pub id: u64,
    pub task: &'a str,
    pub cmd: Option<CommandName>,
    pub parameters: Parameters,
    pub conditions: &'a [Condition],
}

impl Command {
    pub fn conditions(&self, kind: ConditionKind) -> &[Condition] {
        match kind {
            ConditionKind::Exec => &self.exec_condition,
            ConditionKind::Stop => &self.stop_condition,
        }
    }

    pub fn pending_view(&self, kind: ConditionKind) -> PendingView<'_> {
        PendingView {
            id: self.id.value(),
            task: &self.task,
            cmd: self.cmd_name(),
            parameters: self.parameters(),
            conditions: self.conditions(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Comparison, OrbitDirection};

    fn orbit() -> Action {
        Action::AdjustOrbit {
            radius: 50.0,
            direction: OrbitDirection::Clockwise,
        }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let a = Command::immediate("arm", Action::ArmDisarm { arm: true });
        let b = Command::immediate("arm", Action::ArmDisarm { arm: true });
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_rejected_is_empty() {
        let c = Command::rejected("fly to the moon", "not in catalog");
        assert_eq!(c.cmd_type(), CommandType::Rejected);
        assert!(c.cmd_name().is_none());
        assert!(c.parameters().is_empty());
        assert!(c.exec_condition().is_empty() && c.stop_condition().is_empty());
    }

    #[test]
    fn test_category_invariants() {
        let cond = Condition::new("alt > 50", 10.0, 50.0).monitoring("alt", Comparison::Gt);

        let err = Command::new("x", CommandType::Conditional, orbit(), vec![], vec![], None).unwrap_err();
        assert_eq!(err, CommandError::MissingExecCondition);

        let err = Command::new("x", CommandType::Continuous, orbit(), vec![], vec![], None).unwrap_err();
        assert_eq!(err, CommandError::MissingStopCondition);

        let err = Command::new("x", CommandType::Immediate, orbit(), vec![], vec![cond.clone()], None);
        assert!(err.is_err());

        let ok = Command::new("x", CommandType::Continuous, orbit(), vec![], vec![cond], None).unwrap();
        assert_eq!(ok.cmd_name(), Some(CommandName::AdjustOrbit));
    }

    #[test]
    fn test_legacy_continuous_spelling() {
        let t: CommandType = serde_json::from_str("\"continous\"").unwrap();
        assert_eq!(t, CommandType::Continuous);
    }

    #[test]
    fn test_conflict_and_same_action() {
        let a = Command::immediate("orbit", orbit());
        let b = Command::immediate("orbit", orbit());
        let rtl = Command::immediate(
            "land",
            Action::SetMode {
                mode: crate::command::FlightMode::Rtl,
            },
        );
        assert!(a.same_action(&b));
        assert!(a.conflicts_with(&rtl));
        assert!(!a.same_action(&rtl));
    }
}
