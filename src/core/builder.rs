//! Copilot 构建器：统一的初始化逻辑
//!
//! 按步骤选择推理后端（分类 / 合成 / 评估 / 摘要可以各用一个模型），
//! 组装指令生命周期，启动摘要服务。驱动程序与测试共用同一条构建路径。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::config::{AppConfig, LlmStep};
use crate::core::orchestrator::CopilotState;
use crate::core::{Copilot, RecoveryEngine};
use crate::command::CommandSynthesizer;
use crate::intent::IntentClassifier;
use crate::lifecycle::{
    CommandLifecycle, ConditionEvaluator, ConditionalQueue, ContinuousRegistry, Dispatcher,
    LifecycleEvent,
};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, StructuredReasoner};
use crate::memory::{ConversationMemory, Message};
use crate::platform::Platform;
use crate::summarizer::ContextSummarizer;

const DEFAULT_DEVELOPER_PROMPT: &str = "You are a flight operations assistant for an ArduPilot drone. \
You are ultraconcise and provide only the necessary information. You assist with flight operations, \
parsing user and script inputs, generating scheduled and conditional tasks, and issuing flight \
commands when necessary. If requested information is not available, do not invent it.";

/// 根据配置与环境变量为某一步骤选择推理后端（OpenAI 兼容 / Mock）
pub fn create_llm_for_step(cfg: &AppConfig, step: LlmStep) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    match (provider.as_str(), api_key) {
        ("mock", _) => Arc::new(MockLlmClient::new()),
        (_, Some(key)) => {
            let model = cfg.llm.model_for(step);
            tracing::info!(step = ?step, model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), model, Some(&key)))
        }
        (_, None) => {
            tracing::warn!(step = ?step, "No API key set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

pub struct CopilotBuilder {
    config: AppConfig,
    platform: Arc<dyn Platform>,
    developer_prompt: String,
    default_llm: Option<Arc<dyn LlmClient>>,
    step_llms: HashMap<LlmStep, Arc<dyn LlmClient>>,
    evaluate_free_form: bool,
    events: Option<mpsc::UnboundedSender<LifecycleEvent>>,
}

impl CopilotBuilder {
    pub fn new(config: AppConfig, platform: Arc<dyn Platform>) -> Self {
        Self {
            config,
            platform,
            developer_prompt: DEFAULT_DEVELOPER_PROMPT.to_string(),
            default_llm: None,
            step_llms: HashMap::new(),
            evaluate_free_form: true,
            events: None,
        }
    }

    /// 设置开发者消息
    pub fn with_developer_prompt(mut self, prompt: &str) -> Self {
        self.developer_prompt = prompt.trim().to_string();
        self
    }

    /// 从 config/prompts/developer.md 加载开发者消息，找不到时保留默认
    pub fn with_developer_prompt_from_file(mut self, path: Option<PathBuf>) -> Self {
        let candidates = path
            .into_iter()
            .chain(
                ["config/prompts/developer.md", "../config/prompts/developer.md"]
                    .into_iter()
                    .map(PathBuf::from),
            );
        if let Some(prompt) = candidates
            .filter_map(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
        {
            self.developer_prompt = prompt;
        }
        self
    }

    /// 所有步骤共用的推理后端
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.default_llm = Some(llm);
        self
    }

    /// 为单个步骤指定推理后端，优先于 with_llm
    pub fn with_step_llm(mut self, step: LlmStep, llm: Arc<dyn LlmClient>) -> Self {
        self.step_llms.insert(step, llm);
        self
    }

    /// 关闭自由文本条件的推理评估，只保留确定性比较
    pub fn deterministic_evaluation(mut self) -> Self {
        self.evaluate_free_form = false;
        self
    }

    /// 生命周期事件额外转发到该通道
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn developer_prompt(&self) -> &str {
        &self.developer_prompt
    }

    fn reasoner(&self, step: LlmStep) -> StructuredReasoner {
        let llm = self
            .step_llms
            .get(&step)
            .or(self.default_llm.as_ref())
            .cloned()
            .unwrap_or_else(|| create_llm_for_step(&self.config, step));
        StructuredReasoner::new(llm, self.config.llm.request_timeout())
    }

    /// 构建 Copilot 并启动摘要 worker；需要在 tokio runtime 中调用
    pub fn build(self) -> Copilot {
        let cfg = &self.config;

        let evaluator = if self.evaluate_free_form {
            ConditionEvaluator::new(Some(self.reasoner(LlmStep::Evaluator)))
        } else {
            ConditionEvaluator::deterministic_only()
        };
        let lifecycle = CommandLifecycle::new(
            ConditionalQueue::new(cfg.lifecycle.deferred_recheck_ticks.into()),
            ContinuousRegistry::new(cfg.lifecycle.cadence()),
            evaluator,
            Dispatcher::new(Arc::clone(&self.platform), cfg.lifecycle.dispatch_timeout()),
        );
        let memory = ConversationMemory::new(
            Message::system(self.developer_prompt.clone()),
            cfg.app.max_history,
        );

        let classifier = IntentClassifier::new(self.reasoner(LlmStep::Classifier), cfg.app.message_window);
        let synthesizer = CommandSynthesizer::new(self.reasoner(LlmStep::Synthesizer));
        let summarizer = ContextSummarizer::start(self.reasoner(LlmStep::Summarizer), &cfg.summarizer);

        tracing::info!(
            name = cfg.app.name.as_deref().unwrap_or("wingman"),
            cadence_ms = cfg.lifecycle.cadence_ms,
            "copilot built"
        );

        Copilot {
            state: Mutex::new(CopilotState { memory, lifecycle }),
            classifier,
            synthesizer,
            summarizer,
            platform: self.platform,
            recovery: RecoveryEngine::new(),
            events: self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;
    use std::io::Write;

    #[test]
    fn test_developer_prompt_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  You fly carefully.  ").unwrap();
        let builder = CopilotBuilder::new(AppConfig::default(), Arc::new(SimulatedPlatform::new()))
            .with_developer_prompt_from_file(Some(file.path().to_path_buf()));
        assert_eq!(builder.developer_prompt(), "You fly carefully.");
    }

    #[test]
    fn test_missing_prompt_file_keeps_default() {
        let builder = CopilotBuilder::new(AppConfig::default(), Arc::new(SimulatedPlatform::new()))
            .with_developer_prompt_from_file(Some(PathBuf::from("/nonexistent/developer.md")));
        assert!(builder.developer_prompt().contains("flight operations assistant"));
    }

    #[tokio::test]
    async fn test_build_starts_summarizer() {
        let copilot = CopilotBuilder::new(AppConfig::default(), Arc::new(SimulatedPlatform::new()))
            .with_llm(Arc::new(MockLlmClient::new()))
            .build();
        assert!(copilot.summarizer().is_running());
        copilot.shutdown().await;
        assert!(!copilot.summarizer().is_running());
    }
}
