//! Copilot 编排器：一次输入的完整流水线与周期 tick
//!
//! 输入 -> 分类 -> 合成 -> 接纳（immediate 派发 / continuous 激活 / conditional 入队）。
//! 对话记忆与指令生命周期放在同一把异步锁后面，一次输入和一次 tick 不会交错执行。
//! 推理失败在这里按 RecoveryEngine 的策略本地兜底，主循环永远拿到一个 TurnOutcome。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::command::{reject_all, CommandSynthesizer, CommandView};
use crate::core::recovery::{RecoveryAction, Stage};
use crate::core::{RecoveryEngine, ReasoningError};
use crate::intent::{ClassificationResult, Decision, InputEvent, IntentClassifier};
use crate::lifecycle::{CommandLifecycle, LifecycleEvent, Situation};
use crate::memory::{ConversationMemory, Message};
use crate::platform::Platform;
use crate::summarizer::{ContextSummarizer, SummaryState};

/// 锁内的可变状态
pub(crate) struct CopilotState {
    pub(crate) memory: ConversationMemory,
    pub(crate) lifecycle: CommandLifecycle,
}

/// 一次输入的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub sequence_id: u64,
    pub classification: ClassificationResult,
    /// 分类失败后使用了兜底回复
    pub recovered: bool,
    /// 合成步骤给操作员的回复
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_response: Option<String>,
    pub commands: Vec<CommandView>,
    pub events: Vec<LifecycleEvent>,
}

impl TurnOutcome {
    fn skipped(input: &InputEvent, reason: &str) -> Self {
        Self {
            sequence_id: input.sequence_id,
            classification: ClassificationResult::no_response(reason),
            recovered: false,
            synthesis_response: None,
            commands: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn decision(&self) -> Decision {
        self.classification.decision
    }

    /// 给操作员看的全部文字：分类回复、合成回复、拒绝/失败/停止通知
    pub fn messages(&self) -> Vec<String> {
        self.classification
            .response_content
            .iter()
            .chain(self.synthesis_response.iter())
            .cloned()
            .chain(self.events.iter().filter_map(LifecycleEvent::user_message))
            .collect()
    }
}

pub struct Copilot {
    pub(crate) state: Mutex<CopilotState>,
    pub(crate) classifier: IntentClassifier,
    pub(crate) synthesizer: CommandSynthesizer,
    pub(crate) summarizer: ContextSummarizer,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) events: Option<mpsc::UnboundedSender<LifecycleEvent>>,
}

impl Copilot {
    /// 处理一次输入，返回分类、合成出的指令与生命周期事件
    pub async fn handle_input(&self, input: InputEvent) -> TurnOutcome {
        if input.is_blank() {
            tracing::debug!(sequence_id = input.sequence_id, "blank input ignored");
            return TurnOutcome::skipped(&input, "Empty input");
        }

        let mut guard = self.state.lock().await;
        let CopilotState { memory, lifecycle } = &mut *guard;

        let snapshot = self.platform.snapshot().await;
        let summary = self.summarizer.state();
        let context = summary.evolving_summary.as_str();

        let classified = self.classifier.classify(&input, memory, context, Some(&snapshot)).await;
        let (classification, recovered) = match classified {
            Ok(classified) => {
                memory.push(classified.prompt);
                (classified.result, false)
            }
            Err(e) => {
                memory.push(IntentClassifier::input_message(&input, context, Some(&snapshot)));
                let result = match self.recovery.handle(Stage::Classification, &e) {
                    RecoveryAction::Acknowledge(ack) => ClassificationResult::simple(ack, Some(e.to_string())),
                    _ => ClassificationResult::no_response(e.to_string()),
                };
                (result, true)
            }
        };
        memory.push(Message::assistant(classifier_record(&classification)));
        self.summarizer.enqueue(memory.tail(2));
        tracing::info!(
            sequence_id = input.sequence_id,
            source = %input.source,
            decision = ?classification.decision,
            tasks = classification.tasks.len(),
            "input classified"
        );

        let mut synthesis_response = None;
        let mut collapsed = Vec::new();
        let commands = if classification.decision == Decision::OperationalResponse
            && !classification.tasks.is_empty()
        {
            let tasks = &classification.tasks;
            let synthesized = self
                .synthesizer
                .synthesize(memory.developer(), tasks, &snapshot, context)
                .await;
            match synthesized {
                Ok(synthesis) => {
                    if let Some(response) = synthesis.response.as_deref().filter(|r| !r.trim().is_empty()) {
                        memory.push(Message::assistant(response));
                    }
                    synthesis_response = synthesis.response;
                    collapsed = synthesis.collapsed;
                    synthesis.commands
                }
                Err(e) => match self.recovery.handle(Stage::Synthesis, &e) {
                    RecoveryAction::RejectTasks(reason) => reject_all(tasks, &reason),
                    _ => reject_all(tasks, &e.to_string()),
                },
            }
        } else {
            Vec::new()
        };

        let views: Vec<CommandView> = commands.iter().map(|c| c.view()).collect();
        lifecycle.wake_deferred();
        let mut events: Vec<LifecycleEvent> = collapsed
            .into_iter()
            .map(|c| LifecycleEvent::Duplicate {
                command: c.command,
                existing: c.kept,
            })
            .collect();
        events.extend(lifecycle.admit(commands, Instant::now()).await);
        self.record_events(memory, &events);
        drop(guard);

        self.forward(&events);
        TurnOutcome {
            sequence_id: input.sequence_id,
            classification,
            recovered,
            synthesis_response,
            commands: views,
            events,
        }
    }

    /// 运行一次评估/派发
    pub async fn tick(&self) -> Vec<LifecycleEvent> {
        self.tick_at(Instant::now()).await
    }

    /// 以给定时刻运行一次 tick（节拍判断使用该时刻）
    pub async fn tick_at(&self, now: Instant) -> Vec<LifecycleEvent> {
        let mut guard = self.state.lock().await;
        let CopilotState { memory, lifecycle } = &mut *guard;
        if lifecycle.pending_count() == 0 && lifecycle.active_count() == 0 {
            return Vec::new();
        }

        let snapshot = self.platform.snapshot().await;
        let summary = self.summarizer.state();
        let situation = Situation {
            developer: memory.developer(),
            snapshot: &snapshot,
            context: &summary.evolving_summary,
        };
        let events = lifecycle.tick(situation, now).await;

        self.record_events(memory, &events);
        drop(guard);

        self.forward(&events);
        events
    }

    /// 对保留的历史做一次深度摘要
    pub async fn summarize_history(&self) -> Result<String, ReasoningError> {
        let messages = self.state.lock().await.memory.all();
        match self.summarizer.summarize_messages(&messages).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                if self.recovery.handle(Stage::Summary, &e) == RecoveryAction::KeepPrevious {
                    tracing::debug!("previous overall summary kept");
                }
                Err(e)
            }
        }
    }

    pub fn summary_state(&self) -> Arc<SummaryState> {
        self.summarizer.state()
    }

    pub fn summarizer(&self) -> &ContextSummarizer {
        &self.summarizer
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// 等待执行的 conditional 指令
    pub async fn pending(&self) -> Vec<CommandView> {
        self.state.lock().await.lifecycle.pending()
    }

    /// 正在运行的 continuous 指令
    pub async fn active(&self) -> Vec<CommandView> {
        self.state.lock().await.lifecycle.active()
    }

    pub async fn history(&self) -> Vec<Message> {
        self.state.lock().await.memory.all()
    }

    /// 停止摘要 worker
    pub async fn shutdown(&self) {
        self.summarizer.shutdown().await;
        tracing::info!("copilot shut down");
    }

    /// 非例行事件写入记忆并投递给 summarizer
    fn record_events(&self, memory: &mut ConversationMemory, events: &[LifecycleEvent]) {
        let notable: Vec<Message> = events
            .iter()
            .filter(|e| !e.is_routine())
            .filter_map(|e| serde_json::to_string(e).ok())
            .map(|json| Message::system(format!("{} | Command event:\n{json}", Utc::now().timestamp())))
            .collect();
        if notable.is_empty() {
            return;
        }
        for message in &notable {
            memory.push(message.clone());
        }
        self.summarizer.enqueue(notable);
    }

    fn forward(&self, events: &[LifecycleEvent]) {
        let Some(tx) = &self.events else {
            return;
        };
        for event in events {
            if tx.send(event.clone()).is_err() {
                tracing::debug!("event channel closed");
                return;
            }
        }
    }
}

/// 写入记忆的分类回复：时间头 + JSON
fn classifier_record(result: &ClassificationResult) -> String {
    let json = serde_json::to_string_pretty(result).unwrap_or_else(|_| format!("{result:?}"));
    format!("{} | Input classification:\n{json}", Utc::now().timestamp())
}
