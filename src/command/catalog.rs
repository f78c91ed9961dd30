//! 指令目录：封闭的指令集合、每条指令的参数 Schema 与目标资源
//!
//! 参数在合成阶段就被校验并转换为强类型 Action，派发时不再做类型检查。

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::command::Scalar;
use crate::core::CommandError;

/// 平台可执行的指令名（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    ArmDisarm,
    SetMode,
    SetSpeed,
    SetAltitude,
    AdjustOrbit,
    GoToLocation,
}

impl CommandName {
    pub const ALL: [CommandName; 6] = [
        CommandName::ArmDisarm,
        CommandName::SetMode,
        CommandName::SetSpeed,
        CommandName::SetAltitude,
        CommandName::AdjustOrbit,
        CommandName::GoToLocation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::ArmDisarm => "arm_disarm",
            CommandName::SetMode => "set_mode",
            CommandName::SetSpeed => "set_speed",
            CommandName::SetAltitude => "set_altitude",
            CommandName::AdjustOrbit => "adjust_orbit",
            CommandName::GoToLocation => "go_to_location",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// 该指令占用的可控资源；两个指令的资源集合相交即视为冲突
    pub fn resources(self) -> &'static [Resource] {
        match self {
            CommandName::ArmDisarm => &[Resource::Arming, Resource::Navigation],
            CommandName::SetMode => &[Resource::Navigation],
            CommandName::SetSpeed => &[Resource::Speed],
            CommandName::SetAltitude => &[Resource::Altitude],
            CommandName::AdjustOrbit => &[Resource::Navigation],
            CommandName::GoToLocation => &[Resource::Navigation, Resource::Altitude],
        }
    }

    pub fn conflicts_with(self, other: CommandName) -> bool {
        self.resources().iter().any(|r| other.resources().contains(r))
    }

    pub fn spec(self) -> &'static CommandSpec {
        match self {
            CommandName::ArmDisarm => &ARM_DISARM,
            CommandName::SetMode => &SET_MODE,
            CommandName::SetSpeed => &SET_SPEED,
            CommandName::SetAltitude => &SET_ALTITUDE,
            CommandName::AdjustOrbit => &ADJUST_ORBIT,
            CommandName::GoToLocation => &GO_TO_LOCATION,
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可控资源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Arming,
    Navigation,
    Speed,
    Altitude,
}

/// 飞行模式（RTL = Return to Launch，即降落）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightMode {
    Loiter,
    Guided,
    Auto,
    Rtl,
    Takeoff,
}

impl FlightMode {
    pub const NAMES: [&'static str; 5] = ["LOITER", "GUIDED", "AUTO", "RTL", "TAKEOFF"];

    pub fn as_str(self) -> &'static str {
        match self {
            FlightMode::Loiter => "LOITER",
            FlightMode::Guided => "GUIDED",
            FlightMode::Auto => "AUTO",
            FlightMode::Rtl => "RTL",
            FlightMode::Takeoff => "TAKEOFF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOITER" => Some(FlightMode::Loiter),
            "GUIDED" => Some(FlightMode::Guided),
            "AUTO" => Some(FlightMode::Auto),
            "RTL" => Some(FlightMode::Rtl),
            "TAKEOFF" => Some(FlightMode::Takeoff),
            _ => None,
        }
    }
}

/// 盘旋方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrbitDirection {
    Clockwise,
    Counterclockwise,
}

impl OrbitDirection {
    pub const NAMES: [&'static str; 2] = ["clockwise", "counterclockwise"];

    pub fn as_str(self) -> &'static str {
        match self {
            OrbitDirection::Clockwise => "clockwise",
            OrbitDirection::Counterclockwise => "counterclockwise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clockwise" | "cw" => Some(OrbitDirection::Clockwise),
            "counterclockwise" | "counter-clockwise" | "anticlockwise" | "ccw" => {
                Some(OrbitDirection::Counterclockwise)
            }
            _ => None,
        }
    }
}

/// 参数类型
#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    Bool,
    Float,
    Choice(&'static [&'static str]),
}

/// 单个参数的 Schema
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

/// 单条指令的文档与参数 Schema（用于生成 prompt 与校验）
#[derive(Debug)]
pub struct CommandSpec {
    pub name: CommandName,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub example: &'static str,
}

impl CommandSpec {
    fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

static ARM_DISARM: CommandSpec = CommandSpec {
    name: CommandName::ArmDisarm,
    description: "Arm or disarm the vehicle",
    params: &[ParamSpec {
        name: "arm",
        kind: ParamKind::Bool,
        required: true,
        description: "true to arm, false to disarm",
    }],
    example: r#"{"cmd": "arm_disarm", "cmd_keys": ["arm"], "cmd_values": [true]}"#,
};

static SET_MODE: CommandSpec = CommandSpec {
    name: CommandName::SetMode,
    description: "Change the flight mode. RTL = Return to Launch, aka land",
    params: &[ParamSpec {
        name: "mode",
        kind: ParamKind::Choice(&FlightMode::NAMES),
        required: true,
        description: "flight mode",
    }],
    example: r#"{"cmd": "set_mode", "cmd_keys": ["mode"], "cmd_values": ["LOITER"]}"#,
};

static SET_SPEED: CommandSpec = CommandSpec {
    name: CommandName::SetSpeed,
    description: "Adjust the flight speed",
    params: &[ParamSpec {
        name: "speed",
        kind: ParamKind::Float,
        required: true,
        description: "ground speed in m/s, > 0",
    }],
    example: r#"{"cmd": "set_speed", "cmd_keys": ["speed"], "cmd_values": [15.0]}"#,
};

static SET_ALTITUDE: CommandSpec = CommandSpec {
    name: CommandName::SetAltitude,
    description: "Set the flight altitude",
    params: &[ParamSpec {
        name: "altitude",
        kind: ParamKind::Float,
        required: true,
        description: "altitude in meters",
    }],
    example: r#"{"cmd": "set_altitude", "cmd_keys": ["altitude"], "cmd_values": [100.0]}"#,
};

static ADJUST_ORBIT: CommandSpec = CommandSpec {
    name: CommandName::AdjustOrbit,
    description: "Adjust the orbit radius and direction",
    params: &[
        ParamSpec {
            name: "radius",
            kind: ParamKind::Float,
            required: true,
            description: "orbit radius in meters, > 0",
        },
        ParamSpec {
            name: "direction",
            kind: ParamKind::Choice(&OrbitDirection::NAMES),
            required: true,
            description: "orbit direction",
        },
    ],
    example: r#"{"cmd": "adjust_orbit", "cmd_keys": ["radius", "direction"], "cmd_values": [50.0, "clockwise"]}"#,
};

static GO_TO_LOCATION: CommandSpec = CommandSpec {
    name: CommandName::GoToLocation,
    description: "Navigate to a GPS location; keeps the current altitude when alt is omitted",
    params: &[
        ParamSpec {
            name: "ddlat",
            kind: ParamKind::Float,
            required: true,
            description: "latitude, decimal degrees",
        },
        ParamSpec {
            name: "ddlon",
            kind: ParamKind::Float,
            required: true,
            description: "longitude, decimal degrees",
        },
        ParamSpec {
            name: "alt",
            kind: ParamKind::Float,
            required: false,
            description: "altitude in meters (optional)",
        },
    ],
    example: r#"{"cmd": "go_to_location", "cmd_keys": ["ddlat", "ddlon", "alt"], "cmd_values": [37.7749, -122.4194, 100.0]}"#,
};

/// 生成供合成步骤使用的目录说明
pub fn catalog_guidance() -> String {
    let mut s = String::new();
    for name in CommandName::ALL {
        let spec = name.spec();
        s.push_str(&format!("- \"{}\": {}\n", spec.name, spec.description));
        for p in spec.params {
            let kind = match p.kind {
                ParamKind::Bool => "bool".to_string(),
                ParamKind::Float => "float".to_string(),
                ParamKind::Choice(options) => format!("one of {}", options.join(" | ")),
            };
            let optional = if p.required { "" } else { ", optional" };
            s.push_str(&format!("    {}: {}{} - {}\n", p.name, kind, optional, p.description));
        }
        s.push_str(&format!("    example: {}\n", spec.example));
    }
    s
}

/// 有序参数表（名称 -> 标量），序列化为 JSON 对象且保持插入顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters(Vec<(String, Scalar)>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 将 cmd_keys / cmd_values 两个列表拼成参数表；值为 null 的键视为未提供
    pub fn from_keys_values(
        keys: &[String],
        values: &[Option<Scalar>],
    ) -> Result<Self, CommandError> {
        if keys.len() != values.len() {
            return Err(CommandError::MismatchedParameters {
                keys: keys.len(),
                values: values.len(),
            });
        }
        let mut params = Parameters::new();
        for (key, value) in keys.iter().zip(values) {
            let key = key.trim();
            if params.get(key).is_some() {
                return Err(CommandError::InvalidParameter {
                    param: key.to_string(),
                    reason: "given more than once".to_string(),
                });
            }
            if let Some(value) = value {
                params.insert(key, value.clone());
            }
        }
        Ok(params)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Scalar>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Parameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        f.write_str("}")
    }
}

/// 强类型动作：合成阶段校验通过后的指令内容
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ArmDisarm { arm: bool },
    SetMode { mode: FlightMode },
    SetSpeed { speed: f64 },
    SetAltitude { altitude: f64 },
    AdjustOrbit { radius: f64, direction: OrbitDirection },
    GoToLocation { ddlat: f64, ddlon: f64, alt: Option<f64> },
}

impl Action {
    pub fn name(&self) -> CommandName {
        match self {
            Action::ArmDisarm { .. } => CommandName::ArmDisarm,
            Action::SetMode { .. } => CommandName::SetMode,
            Action::SetSpeed { .. } => CommandName::SetSpeed,
            Action::SetAltitude { .. } => CommandName::SetAltitude,
            Action::AdjustOrbit { .. } => CommandName::AdjustOrbit,
            Action::GoToLocation { .. } => CommandName::GoToLocation,
        }
    }

    /// 规范化后的参数表（按目录中的参数顺序）
    pub fn parameters(&self) -> Parameters {
        let mut p = Parameters::new();
        match *self {
            Action::ArmDisarm { arm } => p.insert("arm", arm),
            Action::SetMode { mode } => p.insert("mode", mode.as_str()),
            Action::SetSpeed { speed } => p.insert("speed", speed),
            Action::SetAltitude { altitude } => p.insert("altitude", altitude),
            Action::AdjustOrbit { radius, direction } => {
                p.insert("radius", radius);
                p.insert("direction", direction.as_str());
            }
            Action::GoToLocation { ddlat, ddlon, alt } => {
                p.insert("ddlat", ddlat);
                p.insert("ddlon", ddlon);
                if let Some(alt) = alt {
                    p.insert("alt", alt);
                }
            }
        }
        p
    }

    /// 按目录 Schema 校验参数并构造 Action
    pub fn from_parameters(name: CommandName, params: &Parameters) -> Result<Self, CommandError> {
        let spec = name.spec();
        for (key, _) in params.iter() {
            if spec.param(key).is_none() {
                return Err(CommandError::UnknownParameter {
                    cmd: name.to_string(),
                    param: key.to_string(),
                });
            }
        }
        for p in spec.params.iter().filter(|p| p.required) {
            if params.get(p.name).is_none() {
                return Err(CommandError::MissingParameter {
                    cmd: name.to_string(),
                    param: p.name.to_string(),
                });
            }
        }

        let action = match name {
            CommandName::ArmDisarm => Action::ArmDisarm {
                arm: bool_param(params, "arm")?,
            },
            CommandName::SetMode => {
                let raw = text_param(params, "mode")?;
                let mode = FlightMode::parse(raw).ok_or_else(|| invalid("mode", format!("unknown mode '{raw}'")))?;
                Action::SetMode { mode }
            }
            CommandName::SetSpeed => {
                let speed = float_param(params, "speed")?;
                if speed <= 0.0 {
                    return Err(invalid("speed", "must be greater than 0"));
                }
                Action::SetSpeed { speed }
            }
            CommandName::SetAltitude => Action::SetAltitude {
                altitude: float_param(params, "altitude")?,
            },
            CommandName::AdjustOrbit => {
                let radius = float_param(params, "radius")?;
                if radius <= 0.0 {
                    return Err(invalid("radius", "must be greater than 0"));
                }
                let raw = text_param(params, "direction")?;
                let direction = OrbitDirection::parse(raw)
                    .ok_or_else(|| invalid("direction", format!("unknown direction '{raw}'")))?;
                Action::AdjustOrbit { radius, direction }
            }
            CommandName::GoToLocation => {
                let ddlat = float_param(params, "ddlat")?;
                let ddlon = float_param(params, "ddlon")?;
                if !(-90.0..=90.0).contains(&ddlat) {
                    return Err(invalid("ddlat", "latitude out of range"));
                }
                if !(-180.0..=180.0).contains(&ddlon) {
                    return Err(invalid("ddlon", "longitude out of range"));
                }
                let alt = match params.get("alt") {
                    Some(_) => Some(float_param(params, "alt")?),
                    None => None,
                };
                Action::GoToLocation { ddlat, ddlon, alt }
            }
        };
        Ok(action)
    }
}

fn invalid(param: &str, reason: impl Into<String>) -> CommandError {
    CommandError::InvalidParameter {
        param: param.to_string(),
        reason: reason.into(),
    }
}

fn float_param(params: &Parameters, key: &str) -> Result<f64, CommandError> {
    let value = params
        .get(key)
        .and_then(Scalar::as_f64)
        .ok_or_else(|| invalid(key, "expected a number"))?;
    if !value.is_finite() {
        return Err(invalid(key, "must be finite"));
    }
    Ok(value)
}

fn bool_param(params: &Parameters, key: &str) -> Result<bool, CommandError> {
    params
        .get(key)
        .and_then(Scalar::as_bool)
        .ok_or_else(|| invalid(key, "expected true or false"))
}

fn text_param<'a>(params: &'a Parameters, key: &str) -> Result<&'a str, CommandError> {
    params
        .get(key)
        .and_then(Scalar::as_str)
        .ok_or_else(|| invalid(key, "expected a string"))
}
