//! 平台状态快照：当前可观测标量的扁平映射
//!
//! 快照中不存在的字段一律视为不可观测。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::command::Scalar;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformSnapshot {
    values: BTreeMap<String, Scalar>,
    #[serde(skip)]
    captured_at: DateTime<Utc>,
}

impl Default for PlatformSnapshot {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }
}

impl PlatformSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Scalar)>,
    {
        let mut snapshot = Self::new();
        for (k, v) in pairs {
            snapshot.values.insert(k.into(), v);
        }
        snapshot
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Scalar>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.values.get(key)
    }

    pub fn observes(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 注入 prompt 的紧凑 JSON；空快照输出 "unavailable"
    pub fn to_prompt_json(&self) -> String {
        if self.values.is_empty() {
            return "unavailable".to_string();
        }
        serde_json::to_string(&self.values).unwrap_or_else(|_| "unavailable".to_string())
    }
}
