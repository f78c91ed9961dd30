//! 上下文摘要服务
//!
//! 进程内唯一的后台 worker + 事件队列 + 通过 watch 发布的 SummaryState。
//! enqueue 不阻塞，读者只拿到最近一次完整发布的快照。summarize_messages 在调用方上下文中同步执行。

pub mod state;
mod worker;

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SummarizerSection;
use crate::core::ReasoningError;
use crate::llm::StructuredReasoner;
use crate::memory::Message;

pub use state::{clamp_sentences, SummaryReply, SummaryState, SummaryUsage, INITIAL_SUMMARY};
pub use worker::SUMMARIZER_DEVELOPER;

use worker::SummaryWorker;

pub struct ContextSummarizer {
    tx: mpsc::UnboundedSender<Vec<Message>>,
    state: Arc<watch::Sender<Arc<SummaryState>>>,
    reasoner: StructuredReasoner,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ContextSummarizer {
    /// 启动后台 worker；需要在 tokio runtime 中调用
    pub fn start(reasoner: StructuredReasoner, config: &SummarizerSection) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(Arc::new(SummaryState::default()));
        let state = Arc::new(state_tx);
        let cancel = CancellationToken::new();

        let worker = SummaryWorker {
            reasoner: reasoner.clone(),
            rx,
            state: Arc::clone(&state),
            poll_delay: config.poll_delay(),
            max_sentences: config.max_sentences,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run());
        tracing::info!(poll_delay_ms = config.poll_delay_ms, "context summarizer started");

        Self {
            tx,
            state,
            reasoner,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// 投递一批事件，立即返回
    pub fn enqueue(&self, batch: Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        if self.tx.send(batch).is_err() {
            tracing::warn!("summarizer stopped, event batch dropped");
        }
    }

    /// 最近一次发布的完整状态
    pub fn state(&self) -> Arc<SummaryState> {
        Arc::clone(&self.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SummaryState>> {
        self.state.subscribe()
    }

    /// 对完整历史做一次深度摘要，结果写入 overall_summary
    pub async fn summarize_messages(&self, messages: &[Message]) -> Result<String, ReasoningError> {
        let transcript = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = vec![
            Message::system(SUMMARIZER_DEVELOPER),
            Message::user(format!(
                "Summarize this flight operations session. Limit to seven sentences unless more are essential \
                 for clarity. Check whether the assistant understood and answered the operator, and whether the \
                 vehicle and command state changed as expected.\n\n{transcript}"
            )),
        ];
        let inference = self.reasoner.infer::<SummaryReply>(request).await?;
        let summary = inference.value.summary.trim().to_string();
        self.state.send_modify(|state| {
            Arc::make_mut(state).overall_summary = Some(summary.clone());
        });
        tracing::info!(messages = messages.len(), "overall summary updated");
        Ok(summary)
    }

    /// 停止 worker 并等待其退出
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "summarizer worker ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for ContextSummarizer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
