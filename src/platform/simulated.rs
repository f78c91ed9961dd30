//! 内存中的模拟平台：测试与演示用
//!
//! 动作立即生效（没有物理过程），但保留真实飞控最常见的拒绝场景：空中解锁状态下 disarm、未解锁时调速、
//! 不支持的飞行模式。可以对某个指令注入一次性失败，并记录所有成功执行的动作。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::command::{Action, CommandName, FlightMode, OrbitDirection, Scalar};
use crate::core::DispatchError;
use crate::platform::{Platform, PlatformSnapshot};

/// 高于该高度（米）拒绝 disarm
const MAX_DISARM_ALTITUDE: f64 = 0.5;

#[derive(Debug, Clone)]
struct VehicleState {
    mode: FlightMode,
    armed: bool,
    speed: f64,
    heading: f64,
    roll: f64,
    pitch: f64,
    yaw: f64,
    lat: f64,
    lon: f64,
    alt: f64,
    orbit: Option<(f64, OrbitDirection)>,
    status: String,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            mode: FlightMode::Guided,
            armed: false,
            speed: 0.0,
            heading: 0.0,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            lat: 37.7749,
            lon: -122.4194,
            alt: 0.0,
            orbit: None,
            status: "On the ground, disarmed".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulatedPlatform {
    state: Mutex<VehicleState>,
    unsupported_modes: Vec<FlightMode>,
    injected: Mutex<HashMap<CommandName, DispatchError>>,
    log: Mutex<Vec<Action>>,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记某飞行模式不受支持
    pub fn with_unsupported_mode(mut self, mode: FlightMode) -> Self {
        self.unsupported_modes.push(mode);
        self
    }

    /// 下一次执行该指令时返回给定错误（一次性）
    pub fn fail_next(&self, name: CommandName, err: DispatchError) {
        if let Ok(mut injected) = self.injected.lock() {
            injected.insert(name, err);
        }
    }

    /// 模拟外部因素导致的高度变化（爬升、下降）
    pub fn set_altitude_reading(&self, alt: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.alt = alt;
        }
    }

    pub fn set_armed_reading(&self, armed: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.armed = armed;
        }
    }

    /// 已成功执行的动作（按执行顺序）
    pub fn dispatch_log(&self) -> Vec<Action> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn dispatch_count(&self, name: CommandName) -> usize {
        self.log
            .lock()
            .map(|l| l.iter().filter(|a| a.name() == name).count())
            .unwrap_or(0)
    }

    pub fn orbit(&self) -> Option<(f64, OrbitDirection)> {
        self.state.lock().ok().and_then(|s| s.orbit)
    }

    fn take_injected(&self, name: CommandName) -> Option<DispatchError> {
        self.injected.lock().ok().and_then(|mut m| m.remove(&name))
    }

    fn apply(&self, state: &mut VehicleState, action: &Action) -> Result<(), DispatchError> {
        match *action {
            Action::ArmDisarm { arm: true } => {
                state.armed = true;
                state.status = "Armed".to_string();
            }
            Action::ArmDisarm { arm: false } => {
                if state.alt > MAX_DISARM_ALTITUDE {
                    return Err(DispatchError::InvalidState(format!(
                        "cannot disarm while airborne (alt {:.1} m)",
                        state.alt
                    )));
                }
                state.armed = false;
                state.speed = 0.0;
                state.status = "Disarmed".to_string();
            }
            Action::SetMode { mode } => {
                if self.unsupported_modes.contains(&mode) {
                    return Err(DispatchError::Unsupported(format!("mode {}", mode.as_str())));
                }
                if mode == FlightMode::Takeoff && !state.armed {
                    return Err(DispatchError::InvalidState("takeoff requires an armed vehicle".to_string()));
                }
                state.mode = mode;
                state.orbit = None;
                state.status = match mode {
                    FlightMode::Rtl => "Returning to launch".to_string(),
                    other => format!("Mode {}", other.as_str()),
                };
            }
            Action::SetSpeed { speed } => {
                if !state.armed {
                    return Err(DispatchError::InvalidState("cannot set speed while disarmed".to_string()));
                }
                state.speed = speed;
            }
            Action::SetAltitude { altitude } => {
                state.alt = altitude;
            }
            Action::AdjustOrbit { radius, direction } => {
                state.orbit = Some((radius, direction));
                state.status = format!("Orbiting {} at {} m", direction.as_str(), radius);
            }
            Action::GoToLocation { ddlat, ddlon, alt } => {
                state.lat = ddlat;
                state.lon = ddlon;
                if let Some(alt) = alt {
                    state.alt = alt;
                }
                state.orbit = None;
                state.status = format!("Heading to {ddlat:.5}, {ddlon:.5}");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for SimulatedPlatform {
    async fn snapshot(&self) -> PlatformSnapshot {
        let Ok(state) = self.state.lock() else {
            return PlatformSnapshot::new();
        };
        PlatformSnapshot::from_pairs([
            ("current_time", Scalar::Text(Utc::now().to_rfc3339())),
            ("mode", Scalar::from(state.mode.as_str())),
            ("armed", Scalar::Bool(state.armed)),
            ("speed", Scalar::Float(state.speed)),
            ("heading", Scalar::Float(state.heading)),
            ("roll", Scalar::Float(state.roll)),
            ("pitch", Scalar::Float(state.pitch)),
            ("yaw", Scalar::Float(state.yaw)),
            ("lat", Scalar::Float(state.lat)),
            ("lon", Scalar::Float(state.lon)),
            ("alt", Scalar::Float(state.alt)),
            ("status", Scalar::Text(state.status.clone())),
        ])
    }

    async fn execute(&self, action: &Action) -> Result<(), DispatchError> {
        if let Some(err) = self.take_injected(action.name()) {
            return Err(err);
        }
        {
            let mut state = self
                .state
                .lock()
                .map_err(|e| DispatchError::CommunicationError(e.to_string()))?;
            self.apply(&mut state, action)?;
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(action.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disarm_rejected_when_airborne() {
        let platform = SimulatedPlatform::new();
        platform.execute(&Action::ArmDisarm { arm: true }).await.unwrap();
        platform.set_altitude_reading(30.0);
        let err = platform.execute(&Action::ArmDisarm { arm: false }).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState(_)));
        assert_eq!(platform.dispatch_log().len(), 1);
    }

    #[tokio::test]
    async fn test_set_speed_requires_armed() {
        let platform = SimulatedPlatform::new();
        let err = platform.execute(&Action::SetSpeed { speed: 5.0 }).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_unsupported_mode_and_injected_failure() {
        let platform = SimulatedPlatform::new().with_unsupported_mode(FlightMode::Auto);
        let err = platform
            .execute(&Action::SetMode { mode: FlightMode::Auto })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unsupported(_)));

        platform.fail_next(
            CommandName::SetAltitude,
            DispatchError::NotImplemented("set_altitude".into()),
        );
        let action = Action::SetAltitude { altitude: 80.0 };
        assert!(platform.execute(&action).await.is_err());
        assert!(platform.execute(&action).await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_reflects_actions() {
        let platform = SimulatedPlatform::new();
        platform.execute(&Action::ArmDisarm { arm: true }).await.unwrap();
        platform
            .execute(&Action::GoToLocation { ddlat: 1.0, ddlon: 2.0, alt: Some(60.0) })
            .await
            .unwrap();
        let snap = platform.snapshot().await;
        assert_eq!(snap.get("armed"), Some(&Scalar::Bool(true)));
        assert_eq!(snap.get("alt"), Some(&Scalar::Float(60.0)));
        assert_eq!(snap.get("lat"), Some(&Scalar::Float(1.0)));
        assert!(snap.observes("current_time"));
        assert!(!snap.observes("fuel"));
    }
}
