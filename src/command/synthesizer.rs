//! 指令合成：task 列表 + 指令目录 + 平台快照 -> 有序 Command 列表
//!
//! LLM 只负责选择指令与类别，参数与条件在这里按目录校验；任何无法落到目录上的 task 变成 rejected。

use schemars::JsonSchema;
use serde::Deserialize;

use crate::command::{
    catalog_guidance, Action, Command, CommandId, CommandName, CommandType, CommandView, Condition,
    Parameters, Scalar,
};
use crate::core::{CommandError, ReasoningError};
use crate::llm::StructuredReasoner;
use crate::memory::Message;
use crate::platform::PlatformSnapshot;

const SYNTHESIS_RULES: &str = "\
Select a command from the predefined set that is best suited to accomplish each task. \
Do not invent new commands or modify existing ones. If a task cannot clearly be accomplished \
by any command, reject it instead of stretching a command to fit.

Command types:
- \"immediate\": execute once, now
- \"conditional\": execute once when exec_condition holds (time, vehicle state, or other observable criteria)
- \"continuous\": execute now and keep executing at a fixed rate until stop_condition holds
- \"rejected\": impossible, overly vague, duplicate, or erroneous; leave every other field empty

If a task means \"start and keep doing X\", use a single continuous command, never an immediate plus a continuous one.

Conditions:
- description: the monitored parameter, the control value and the target value, e.g. \"alt > 50\"
- control_value: the current value of the monitored parameter
- target_value: the value control_value must reach
- parameter: the vehicle state key being monitored (e.g. alt, speed, mode, armed); omit only for
  conditions about the conversation, such as \"until the operator says stop\"
- operator: gt | ge | lt | le | eq | ne
A condition may only reference values present in the vehicle state or the conversation. \
If it cannot be monitored, reject the command.

cmd_keys and cmd_values are parallel lists holding the command parameters.";

/// 单条合成结果（线上格式）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RawCommand {
    /// 要完成的任务（自然语言）
    #[serde(default)]
    pub task: String,
    /// 目录中的指令名；rejected 时为 null
    #[serde(default)]
    pub cmd: Option<String>,
    pub cmd_type: CommandType,
    #[serde(default)]
    pub cmd_keys: Vec<String>,
    #[serde(default)]
    pub cmd_values: Vec<Option<Scalar>>,
    /// conditional / continuous 的执行条件
    #[serde(default)]
    pub exec_condition: Option<Vec<Condition>>,
    /// continuous 的停止条件
    #[serde(default)]
    pub stop_condition: Option<Vec<Condition>>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SynthesisReply {
    #[serde(default)]
    pub cmds: Vec<RawCommand>,
    /// 给操作员的简短回复
    #[serde(default)]
    pub response: Option<String>,
}

/// 批内去重时被合并掉的指令，以及保留下来的那条
#[derive(Debug, Clone)]
pub struct Collapsed {
    pub command: CommandView,
    pub kept: CommandId,
}

/// 一批 task 的合成结果
#[derive(Debug, Default)]
pub struct Synthesis {
    pub commands: Vec<Command>,
    pub collapsed: Vec<Collapsed>,
    pub response: Option<String>,
    pub tokens: u64,
}

pub struct CommandSynthesizer {
    reasoner: StructuredReasoner,
}

impl CommandSynthesizer {
    pub fn new(reasoner: StructuredReasoner) -> Self {
        Self { reasoner }
    }

    fn build_prompt(tasks: &[String], snapshot: &PlatformSnapshot, context: &str) -> String {
        let task_list = tasks
            .iter()
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Handle the tasks generated by the input classifier.\n\n{SYNTHESIS_RULES}\n\n\
             Available commands:\n{}\nTasks:\n{}\n\nVehicle state:\n{}\n\nSituational context:\n{}\n\n\
             Return at most one command per task, in task order.",
            catalog_guidance(),
            task_list,
            snapshot.to_prompt_json(),
            if context.trim().is_empty() { "N/A" } else { context },
        )
    }

    /// 每个 task 至多产生一条 Command；推理失败由调用方决定兜底
    pub async fn synthesize(
        &self,
        developer: &Message,
        tasks: &[String],
        snapshot: &PlatformSnapshot,
        context: &str,
    ) -> Result<Synthesis, ReasoningError> {
        if tasks.is_empty() {
            return Ok(Synthesis::default());
        }
        let messages = vec![
            developer.clone(),
            Message::user(Self::build_prompt(tasks, snapshot, context)),
        ];
        tracing::debug!(tasks = tasks.len(), "synthesizing commands");

        let inference = self.reasoner.infer::<SynthesisReply>(messages).await?;
        let (commands, collapsed) = normalize(inference.value.cmds, tasks, snapshot);
        Ok(Synthesis {
            commands,
            collapsed,
            response: inference.value.response,
            tokens: inference.tokens,
        })
    }
}

/// 整批 task 以同一原因 rejected
pub fn reject_all(tasks: &[String], reason: &str) -> Vec<Command> {
    tasks
        .iter()
        .map(|t| Command::rejected(t.clone(), reason))
        .collect()
}

/// 截断到 task 数、逐条校验、批内去重
pub fn normalize(
    raw: Vec<RawCommand>,
    tasks: &[String],
    snapshot: &PlatformSnapshot,
) -> (Vec<Command>, Vec<Collapsed>) {
    if raw.len() > tasks.len() {
        tracing::warn!(got = raw.len(), tasks = tasks.len(), "synthesizer returned extra commands, truncating");
    }
    let built = raw
        .into_iter()
        .take(tasks.len())
        .enumerate()
        .map(|(i, r)| build_command(r, tasks.get(i).map(String::as_str), snapshot));
    dedup(built)
}

/// 将一条线上指令转换为 Command；任何错误都落为 rejected
pub fn build_command(raw: RawCommand, fallback_task: Option<&str>, snapshot: &PlatformSnapshot) -> Command {
    let task = if raw.task.trim().is_empty() {
        fallback_task.unwrap_or_default().to_string()
    } else {
        raw.task.trim().to_string()
    };
    if raw.cmd_type == CommandType::Rejected {
        let reason = raw.reasoning.unwrap_or_else(|| "Rejected by synthesizer".to_string());
        return Command::rejected(task, reason);
    }
    match try_build(&task, raw, snapshot) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(task = %task, error = %e, "command rejected at synthesis");
            Command::rejected(task, e.to_string())
        }
    }
}

fn try_build(task: &str, raw: RawCommand, snapshot: &PlatformSnapshot) -> Result<Command, CommandError> {
    let name = raw
        .cmd
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| CommandError::MissingCommand(raw.cmd_type.to_string()))?;
    let name = CommandName::parse(name).ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
    let params = Parameters::from_keys_values(&raw.cmd_keys, &raw.cmd_values)?;
    let action = Action::from_parameters(name, &params)?;

    let mut exec = raw.exec_condition.unwrap_or_default();
    let mut stop = raw.stop_condition.unwrap_or_default();
    let mut cmd_type = raw.cmd_type;
    if cmd_type == CommandType::Immediate && !exec.is_empty() {
        tracing::debug!(task, "immediate command with exec condition upgraded to conditional");
        cmd_type = CommandType::Conditional;
    }
    if cmd_type != CommandType::Continuous && !stop.is_empty() {
        tracing::debug!(task, "stop condition dropped from non-continuous command");
        stop.clear();
    }
    for condition in exec.iter_mut().chain(stop.iter_mut()) {
        let Some(parameter) = condition.parameter.as_deref() else {
            continue;
        };
        // 可观测条件的 control_value 以快照读数为准，不信任模型抄写的值
        match snapshot.get(parameter) {
            Some(current) => condition.control_value = current.clone(),
            None => {
                return Err(CommandError::UnobservableCondition {
                    description: condition.description.clone(),
                    parameter: parameter.to_string(),
                })
            }
        }
    }
    Command::new(task, cmd_type, action, exec, stop, raw.reasoning)
}

/// 同一请求只保留第一条；同动作的 immediate 与立即开始的 continuous 相撞时保留 continuous。
/// 不同类别或不同条件的同动作指令是不同请求，都保留。
fn dedup(commands: impl Iterator<Item = Command>) -> (Vec<Command>, Vec<Collapsed>) {
    let mut kept: Vec<Command> = Vec::new();
    let mut collapsed = Vec::new();
    for command in commands {
        if command.is_rejected() {
            kept.push(command);
            continue;
        }
        if let Some(k) = kept
            .iter()
            .find(|k| k.same_request(&command) || supersedes(k, &command))
        {
            tracing::debug!(command = %command, kept = %k.id(), "duplicate command collapsed");
            collapsed.push(Collapsed {
                command: command.view(),
                kept: k.id(),
            });
            continue;
        }
        match kept.iter().position(|k| supersedes(&command, k)) {
            Some(i) => {
                tracing::debug!(command = %command, "continuous command replaces duplicate immediate");
                let replaced = std::mem::replace(&mut kept[i], command);
                collapsed.push(Collapsed {
                    command: replaced.view(),
                    kept: kept[i].id(),
                });
            }
            None => kept.push(command),
        }
    }
    (kept, collapsed)
}

/// continuous 是否覆盖同动作的 immediate（"开始并持续做 X"）
fn supersedes(continuous: &Command, immediate: &Command) -> bool {
    continuous.cmd_type() == CommandType::Continuous
        && continuous.exec_condition().is_empty()
        && immediate.cmd_type() == CommandType::Immediate
        && continuous.same_action(immediate)
}
