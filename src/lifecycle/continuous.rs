//! Continuous 注册表：active -> stopped
//!
//! 每条 active 指令按固定节拍派发，节拍属于注册表而不是推理步骤。冲突资源上只允许一条 active 指令。

use std::time::{Duration, Instant};

use crate::command::{Command, CommandId};

#[derive(Debug)]
struct ActiveEntry {
    command: Command,
    /// 上一次派发所在的节拍格点
    slot: Instant,
}

#[derive(Debug)]
pub struct ContinuousRegistry {
    active: Vec<ActiveEntry>,
    cadence: Duration,
}

impl ContinuousRegistry {
    pub fn new(cadence: Duration) -> Self {
        Self {
            active: Vec::new(),
            cadence,
        }
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// 已有相同动作的 active 指令
    pub fn find_identical(&self, command: &Command) -> Option<CommandId> {
        self.active
            .iter()
            .find(|e| e.command.same_action(command))
            .map(|e| e.command.id())
    }

    /// 取出所有与 command 资源冲突的 active 指令
    pub fn take_conflicting(&mut self, command: &Command) -> Vec<Command> {
        let (conflicting, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|e| e.command.conflicts_with(command));
        self.active = kept;
        conflicting.into_iter().map(|e| e.command).collect()
    }

    /// 激活；调用方负责先处理冲突并完成首次派发
    pub fn activate(&mut self, command: Command, dispatched_at: Instant) {
        self.active.push(ActiveEntry {
            command,
            slot: dispatched_at,
        });
    }

    /// 到达节拍的指令（激活顺序）
    pub fn due(&self, now: Instant) -> Vec<&Command> {
        self.active
            .iter()
            .filter(|e| now.saturating_duration_since(e.slot) >= self.cadence)
            .map(|e| &e.command)
            .collect()
    }

    /// 记录派发；格点按 cadence 前进而不是取 at，tick 的抖动不会累积成漏拍
    pub fn mark_dispatched(&mut self, id: CommandId, at: Instant) {
        let cadence = self.cadence;
        let Some(entry) = self.active.iter_mut().find(|e| e.command.id() == id) else {
            return;
        };
        let mut next = entry.slot + cadence;
        if next > at || cadence.is_zero() {
            // 未到节拍的派发：从 at 重新起算
            entry.slot = at;
            return;
        }
        // 错过多个节拍时只补到最近的格点，不补发
        while next + cadence <= at {
            next += cadence;
        }
        entry.slot = next;
    }

    pub fn take(&mut self, id: CommandId) -> Option<Command> {
        let index = self.active.iter().position(|e| e.command.id() == id)?;
        Some(self.active.remove(index).command)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.active.iter().map(|e| &e.command)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, FlightMode, OrbitDirection};

    fn orbit() -> Command {
        Command::immediate(
            "orbit",
            Action::AdjustOrbit {
                radius: 50.0,
                direction: OrbitDirection::Clockwise,
            },
        )
    }

    #[test]
    fn test_cadence() {
        let mut r = ContinuousRegistry::new(Duration::from_secs(1));
        let t0 = Instant::now();
        let cmd = orbit();
        let id = cmd.id();
        r.activate(cmd, t0);
        assert!(r.due(t0 + Duration::from_millis(500)).is_empty());
        assert_eq!(r.due(t0 + Duration::from_secs(1)).len(), 1);
        r.mark_dispatched(id, t0 + Duration::from_secs(1));
        assert!(r.due(t0 + Duration::from_millis(1500)).is_empty());
    }

    #[test]
    fn test_jittered_ticks_keep_cadence() {
        let mut r = ContinuousRegistry::new(Duration::from_secs(1));
        let t0 = Instant::now();
        let cmd = orbit();
        let id = cmd.id();
        r.activate(cmd, t0);

        // tick 在 1 Hz 附近来回抖动几毫秒
        let mut dispatched = 0;
        for ms in [1003, 2001, 3003, 4001, 5003, 6001] {
            let now = t0 + Duration::from_millis(ms);
            if !r.due(now).is_empty() {
                r.mark_dispatched(id, now);
                dispatched += 1;
            }
        }
        assert_eq!(dispatched, 6);
    }

    #[test]
    fn test_missed_ticks_not_replayed() {
        let mut r = ContinuousRegistry::new(Duration::from_secs(1));
        let t0 = Instant::now();
        let cmd = orbit();
        let id = cmd.id();
        r.activate(cmd, t0);

        r.mark_dispatched(id, t0 + Duration::from_millis(3500));
        assert!(r.due(t0 + Duration::from_millis(3900)).is_empty());
        assert_eq!(r.due(t0 + Duration::from_secs(4)).len(), 1);
    }

    #[test]
    fn test_take_conflicting() {
        let mut r = ContinuousRegistry::new(Duration::from_secs(1));
        r.activate(orbit(), Instant::now());
        r.activate(Command::immediate("speed", Action::SetSpeed { speed: 5.0 }), Instant::now());
        let land = Command::immediate("land", Action::SetMode { mode: FlightMode::Rtl });
        let stopped = r.take_conflicting(&land);
        assert_eq!(stopped.len(), 1);
        assert!(matches!(stopped[0].action(), Some(Action::AdjustOrbit { .. })));
        assert_eq!(r.len(), 1);
        assert!(r.find_identical(&orbit()).is_none());
    }
}
