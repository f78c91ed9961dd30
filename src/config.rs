//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WINGMAN__*` 覆盖（双下划线表示嵌套，如 `WINGMAN__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub lifecycle: LifecycleSection,
    pub summarizer: SummarizerSection,
}

/// [app] 段：应用名、分类窗口大小、历史上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 分类时除开发者消息外携带的最近消息条数
    pub message_window: usize,
    /// 对话历史环形缓冲上限（条）
    pub max_history: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            message_window: 5,
            max_history: 200,
        }
    }
}

/// [llm] 段：后端选择、各步骤模型与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub classifier_model: Option<String>,
    pub synthesizer_model: Option<String>,
    pub evaluator_model: Option<String>,
    pub summarizer_model: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4.1-mini".to_string(),
            base_url: None,
            classifier_model: None,
            synthesizer_model: None,
            evaluator_model: None,
            summarizer_model: Some("gpt-4.1-nano".to_string()),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    /// 某一步骤实际使用的模型：步骤覆盖 > 全局 model
    pub fn model_for(&self, step: LlmStep) -> &str {
        let specific = match step {
            LlmStep::Classifier => self.classifier_model.as_deref(),
            LlmStep::Synthesizer => self.synthesizer_model.as_deref(),
            LlmStep::Evaluator => self.evaluator_model.as_deref(),
            LlmStep::Summarizer => self.summarizer_model.as_deref(),
        };
        specific.unwrap_or(&self.model)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request.max(1))
    }
}

/// 需要调用推理引擎的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmStep {
    Classifier,
    Synthesizer,
    Evaluator,
    Summarizer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次推理请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 30 }
    }
}

/// [lifecycle] 段：持续指令节拍、派发超时、deferred 重新检查间隔
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleSection {
    pub cadence_ms: u64,
    pub dispatch_timeout_secs: u64,
    /// deferred 条件指令在多少个 tick 后重新参与评估
    pub deferred_recheck_ticks: u32,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            cadence_ms: 1000,
            dispatch_timeout_secs: 10,
            deferred_recheck_ticks: 10,
        }
    }
}

impl LifecycleSection {
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms.max(1))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs.max(1))
    }
}

/// [summarizer] 段：空队列轮询间隔、摘要句数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerSection {
    pub poll_delay_ms: u64,
    pub max_sentences: usize,
}

impl Default for SummarizerSection {
    fn default() -> Self {
        Self {
            poll_delay_ms: 2000,
            max_sentences: 5,
        }
    }
}

impl SummarizerSection {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms.max(1))
    }
}

/// 从 config 目录加载配置，环境变量 WINGMAN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WINGMAN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WINGMAN")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.message_window, 5);
        assert_eq!(cfg.lifecycle.cadence(), Duration::from_secs(1));
        assert_eq!(cfg.summarizer.max_sentences, 5);
        assert_eq!(cfg.llm.model_for(LlmStep::Classifier), "gpt-4.1-mini");
        assert_eq!(cfg.llm.model_for(LlmStep::Summarizer), "gpt-4.1-nano");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[lifecycle]\ncadence_ms = 250\n\n[llm]\nevaluator_model = \"eval-model\"\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.lifecycle.cadence(), Duration::from_millis(250));
        assert_eq!(cfg.lifecycle.dispatch_timeout_secs, 10);
        assert_eq!(cfg.llm.model_for(LlmStep::Evaluator), "eval-model");
    }
}
