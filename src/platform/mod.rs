//! 执行平台（actuation collaborator）抽象
//!
//! Platform 是外部协作者的边界：读取状态快照、执行一个已校验的 Action。真实飞控链路不在本 crate 内，
//! SimulatedPlatform 供测试与演示使用。

pub mod simulated;
pub mod snapshot;

use async_trait::async_trait;

use crate::command::Action;
use crate::core::DispatchError;

pub use simulated::SimulatedPlatform;
pub use snapshot::PlatformSnapshot;

/// 执行平台
#[async_trait]
pub trait Platform: Send + Sync {
    /// 当前可观测状态；字段缺失即不可观测
    async fn snapshot(&self) -> PlatformSnapshot;

    /// 执行一个动作；平台拒绝时返回 DispatchError
    async fn execute(&self, action: &Action) -> Result<(), DispatchError>;
}
