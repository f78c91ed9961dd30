//! 后台摘要 worker：从事件队列取批次，增量压缩为新的 evolving_summary 与 current_status
//!
//! 队列为空时按固定间隔轮询；每次把队列里所有批次一次取完，只做一次推理。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::llm::StructuredReasoner;
use crate::memory::Message;
use crate::summarizer::{clamp_sentences, SummaryReply, SummaryState};

pub const SUMMARIZER_DEVELOPER: &str = "You are a concise AI assistant integrated into a flight operations system. \
The system includes a human operator and an AI assistant, plus scripts running in the background that can execute \
tasks and provide status updates. Your role is to summarize the recent chat history and system messages into a \
concise paragraph, providing useful context more efficiently than the full chat history. Focus on key points, \
actions taken, and any important updates.";

pub(crate) struct SummaryWorker {
    pub reasoner: StructuredReasoner,
    pub rx: mpsc::UnboundedReceiver<Vec<Message>>,
    pub state: Arc<watch::Sender<Arc<SummaryState>>>,
    pub poll_delay: Duration,
    pub max_sentences: usize,
    pub cancel: CancellationToken,
}

impl SummaryWorker {
    pub async fn run(mut self) {
        tracing::debug!("summarizer worker started");
        loop {
            let (batches, closed) = self.drain();
            if !batches.is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.update(batches) => {}
                }
            }
            if closed {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_delay) => {}
            }
        }
        tracing::debug!("summarizer worker stopped");
    }

    /// 取出当前所有非空批次；第二个值表示发送端已全部关闭
    fn drain(&mut self) -> (Vec<Vec<Message>>, bool) {
        let mut batches = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(batch) if batch.is_empty() => {}
                Ok(batch) => batches.push(batch),
                Err(mpsc::error::TryRecvError::Empty) => return (batches, false),
                Err(mpsc::error::TryRecvError::Disconnected) => return (batches, true),
            }
        }
    }

    async fn update(&self, batches: Vec<Vec<Message>>) {
        let previous = self.state.borrow().evolving_summary.clone();
        let events: Vec<Message> = batches.into_iter().flatten().collect();
        let events_json = serde_json::to_string(&events).unwrap_or_default();
        let prompt = format!(
            "This is a summary of the recent events in the flight operations system:\n\n{previous}\n\n\
             Here are new events that occurred:\n\n{events_json}\n\n\
             If these events are important, update the summary to include them, but the summary must be \
             {} or fewer sentences long. It should evolve with each new input without growing indefinitely: \
             older events become less relevant and newer events matter more for the operator and the assistant.",
            self.max_sentences
        );
        let messages = vec![Message::system(SUMMARIZER_DEVELOPER), Message::user(prompt)];

        match self.reasoner.infer::<SummaryReply>(messages).await {
            Ok(inference) => {
                let summary = clamp_sentences(&inference.value.summary, self.max_sentences.max(1));
                let status = inference
                    .value
                    .status
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                self.state.send_modify(|state| {
                    let next = Arc::make_mut(state);
                    next.evolving_summary = summary;
                    next.current_status = status;
                    next.usage.record(inference.tokens);
                });
                tracing::info!(events = events.len(), tokens = inference.tokens, "evolving summary updated");
            }
            Err(e) => {
                tracing::warn!(error = %e, events = events.len(), "summary update failed, keeping previous summary");
            }
        }
    }
}
