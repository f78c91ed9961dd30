//! 标量与条件
//!
//! Condition 是「一个被监控的值 vs 一个目标值」的谓词。带 parameter + operator 的条件可以直接对照平台快照
//! 确定性求值；只有描述的条件（如「直到我说停」）交给推理引擎判断。

use std::cmp::Ordering;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::platform::PlatformSnapshot;

/// 标量值：bool / 整数 / 浮点 / 字符串
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// 数值视图（整数提升为浮点）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 同域比较：数值之间按大小，字符串忽略大小写只比较相等，bool 只比较相等
    fn partial_cmp_with(&self, other: &Scalar) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        let equal = match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Text(a), Scalar::Text(b)) => a.eq_ignore_ascii_case(b),
            _ => return None,
        };
        Some(if equal { Ordering::Equal } else { Ordering::Less })
    }

    fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Le,
    #[serde(alias = "==", alias = "=")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
}

impl Comparison {
    fn is_ordering(self) -> bool {
        matches!(self, Comparison::Gt | Comparison::Ge | Comparison::Lt | Comparison::Le)
    }

    /// lhs op rhs；不可比较时返回 None
    pub fn apply(self, lhs: &Scalar, rhs: &Scalar) -> Option<bool> {
        if self.is_ordering() && !(lhs.is_numeric() && rhs.is_numeric()) {
            return None;
        }
        let ord = lhs.partial_cmp_with(rhs)?;
        Some(match self {
            Comparison::Gt => ord == Ordering::Greater,
            Comparison::Ge => ord != Ordering::Less,
            Comparison::Lt => ord == Ordering::Less,
            Comparison::Le => ord != Ordering::Greater,
            Comparison::Eq => ord == Ordering::Equal,
            Comparison::Ne => ord != Ordering::Equal,
        })
    }
}

/// 单个条件对照快照的求值结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionCheck {
    Holds,
    NotYet,
    /// 快照中不存在被监控的值
    Unobservable,
    /// 当前值与目标值不在同一域
    Incomparable,
    /// 只有描述，需要推理引擎判断
    FreeForm,
}

/// 可监控的条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    /// 简短描述：被监控的参数、当前值、目标值，如 "alt > 50"
    pub description: String,
    /// 创建条件时被监控参数的当前值
    pub control_value: Scalar,
    /// control_value 需要达到的值
    pub target_value: Scalar,
    /// 被监控的快照字段名（如 alt、mode、armed）；对话类条件留空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Comparison>,
}

impl Condition {
    pub fn new(
        description: impl Into<String>,
        control_value: impl Into<Scalar>,
        target_value: impl Into<Scalar>,
    ) -> Self {
        Self {
            description: description.into(),
            control_value: control_value.into(),
            target_value: target_value.into(),
            parameter: None,
            operator: None,
        }
    }

    /// 绑定快照字段与运算符，使条件可确定性求值
    pub fn monitoring(mut self, parameter: impl Into<String>, operator: Comparison) -> Self {
        self.parameter = Some(parameter.into());
        self.operator = Some(operator);
        self
    }

    pub fn is_deterministic(&self) -> bool {
        self.parameter.is_some() && self.operator.is_some()
    }

    /// 触发条件相同；control_value 只是创建时的读数，不参与比较
    pub fn same_trigger(&self, other: &Condition) -> bool {
        if self.is_deterministic() || other.is_deterministic() {
            return self.parameter == other.parameter
                && self.operator == other.operator
                && self.target_value == other.target_value;
        }
        self.description.trim().eq_ignore_ascii_case(other.description.trim())
    }

    /// 对照快照求值
    pub fn check(&self, snapshot: &PlatformSnapshot) -> ConditionCheck {
        let Some(parameter) = self.parameter.as_deref() else {
            return ConditionCheck::FreeForm;
        };
        let Some(current) = snapshot.get(parameter) else {
            return ConditionCheck::Unobservable;
        };
        let Some(op) = self.operator else {
            return ConditionCheck::FreeForm;
        };
        match op.apply(current, &self.target_value) {
            Some(true) => ConditionCheck::Holds,
            Some(false) => ConditionCheck::NotYet,
            None => ConditionCheck::Incomparable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PlatformSnapshot {
        PlatformSnapshot::from_pairs([
            ("alt", Scalar::Float(42.0)),
            ("mode", Scalar::from("GUIDED")),
            ("armed", Scalar::Bool(true)),
        ])
    }

    #[test]
    fn test_scalar_untagged_deserialize() {
        let values: Vec<Scalar> = serde_json::from_str(r#"[true, 50, 50.5, "RTL"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Scalar::Bool(true),
                Scalar::Int(50),
                Scalar::Float(50.5),
                Scalar::from("RTL")
            ]
        );
    }

    #[test]
    fn test_comparison_numeric_promotes_int() {
        assert_eq!(Comparison::Gt.apply(&Scalar::Float(50.1), &Scalar::Int(50)), Some(true));
        assert_eq!(Comparison::Le.apply(&Scalar::Int(50), &Scalar::Float(50.0)), Some(true));
        assert_eq!(Comparison::Gt.apply(&Scalar::from("a"), &Scalar::Int(1)), None);
        assert_eq!(Comparison::Eq.apply(&Scalar::from("rtl"), &Scalar::from("RTL")), Some(true));
        assert_eq!(Comparison::Ne.apply(&Scalar::Bool(true), &Scalar::Bool(false)), Some(true));
        assert_eq!(Comparison::Eq.apply(&Scalar::Bool(true), &Scalar::from("true")), None);
    }

    #[test]
    fn test_condition_check() {
        let snap = snapshot();
        let alt = Condition::new("alt > 50", 42.0, 50i64).monitoring("alt", Comparison::Gt);
        assert_eq!(alt.check(&snap), ConditionCheck::NotYet);

        let armed = Condition::new("armed", true, true).monitoring("armed", Comparison::Eq);
        assert_eq!(armed.check(&snap), ConditionCheck::Holds);

        let fuel = Condition::new("fuel < 20", 80i64, 20i64).monitoring("fuel", Comparison::Lt);
        assert_eq!(fuel.check(&snap), ConditionCheck::Unobservable);

        let stop = Condition::new("operator says stop", "orbiting", "stop");
        assert_eq!(stop.check(&snap), ConditionCheck::FreeForm);
    }

    #[test]
    fn test_operator_aliases() {
        let c: Condition = serde_json::from_str(
            r#"{"description":"alt>50","control_value":10,"target_value":50,"parameter":"alt","operator":">"}"#,
        )
        .unwrap();
        assert_eq!(c.operator, Some(Comparison::Gt));
        assert!(c.is_deterministic());
    }
}
