//! 摘要状态：evolving_summary、overall_summary、current_status 与 token 用量
//!
//! 整体通过 watch 通道以 Arc 快照发布，读者总是看到同一次更新产生的完整状态。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const INITIAL_SUMMARY: &str = "No events to summarize yet.";

/// 摘要调用的 token 统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryUsage {
    pub count: u64,
    pub total: u64,
    pub average: f64,
    pub last: u64,
}

impl SummaryUsage {
    pub fn record(&mut self, tokens: u64) {
        self.count += 1;
        self.total += tokens;
        self.last = tokens;
        self.average = self.total as f64 / self.count as f64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryState {
    /// 增量更新的短摘要，不超过 max_sentences 句
    pub evolving_summary: String,
    /// 按需深度摘要
    pub overall_summary: Option<String>,
    /// 几个词描述当前状态，如 "holding position"
    pub current_status: Option<String>,
    pub usage: SummaryUsage,
}

impl Default for SummaryState {
    fn default() -> Self {
        Self {
            evolving_summary: INITIAL_SUMMARY.to_string(),
            overall_summary: None,
            current_status: None,
            usage: SummaryUsage::default(),
        }
    }
}

/// 摘要推理的回复
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SummaryReply {
    /// 简洁摘要：关键事件与已执行的动作；注意助手是否正确理解并回应了操作员
    pub summary: String,
    /// 载具当前状态，尽量少的词，如 "holding position"、"in flight"、"on ground"、"landing"
    #[serde(default)]
    pub status: Option<String>,
}

/// 截取前 max 句（以 . ! ? 结尾，后接空白或结尾）
pub fn clamp_sentences(text: &str, max: usize) -> String {
    let text = text.trim();
    let mut count = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                count += 1;
                if count == max {
                    return text[..i + c.len_utf8()].to_string();
                }
            }
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_sentences() {
        let text = "One. Two! Three? Four. Five. Six.";
        assert_eq!(clamp_sentences(text, 5), "One. Two! Three? Four. Five.");
        assert_eq!(clamp_sentences("Alt 12.5 m. Holding.", 1), "Alt 12.5 m.");
        assert_eq!(clamp_sentences("no terminator", 2), "no terminator");
    }

    #[test]
    fn test_usage_average() {
        let mut usage = SummaryUsage::default();
        usage.record(100);
        usage.record(50);
        assert_eq!(usage.count, 2);
        assert_eq!(usage.total, 150);
        assert_eq!(usage.last, 50);
        assert!((usage.average - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_initial_state() {
        let state = SummaryState::default();
        assert_eq!(state.evolving_summary, INITIAL_SUMMARY);
        assert!(state.current_status.is_none());
    }
}
