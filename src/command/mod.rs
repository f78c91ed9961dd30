//! 指令层：标量与条件、指令目录、Command 模型、指令合成

pub mod catalog;
pub mod condition;
pub mod model;
pub mod synthesizer;

pub use catalog::{
    catalog_guidance, Action, CommandName, CommandSpec, FlightMode, OrbitDirection, ParamKind,
    ParamSpec, Parameters, Resource,
};
pub use condition::{Comparison, Condition, ConditionCheck, Scalar};
pub use model::{Command, CommandId, CommandType, CommandView, ConditionKind, PendingView};
pub use synthesizer::{reject_all, Collapsed, CommandSynthesizer, RawCommand, Synthesis, SynthesisReply};
