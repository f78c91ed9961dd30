//! Conditional 队列：pending -> ready -> dispatched，或 pending -> removed
//!
//! 保持插入顺序；deferred 的指令在下一次输入到来或经过 recheck_ticks 个 tick 之前不再评估。

use crate::command::{Command, CommandId};

#[derive(Debug)]
struct PendingEntry {
    command: Command,
    /// 被推迟时的 tick 序号
    deferred_at: Option<u64>,
}

#[derive(Debug)]
pub struct ConditionalQueue {
    pending: Vec<PendingEntry>,
    ticks: u64,
    recheck_ticks: u64,
}

impl ConditionalQueue {
    pub fn new(recheck_ticks: u64) -> Self {
        Self {
            pending: Vec::new(),
            ticks: 0,
            recheck_ticks: recheck_ticks.max(1),
        }
    }

    /// 已有相同请求（类别、动作、条件）的 pending 指令
    pub fn find_duplicate(&self, command: &Command) -> Option<CommandId> {
        self.pending
            .iter()
            .find(|e| e.command.same_request(command))
            .map(|e| e.command.id())
    }

    pub fn push(&mut self, command: Command) {
        self.pending.push(PendingEntry {
            command,
            deferred_at: None,
        });
    }

    /// 开始新的 tick：推迟时间已到的指令恢复评估
    pub fn begin_tick(&mut self) {
        self.ticks += 1;
        let (ticks, recheck) = (self.ticks, self.recheck_ticks);
        for entry in &mut self.pending {
            if entry.deferred_at.is_some_and(|at| ticks.saturating_sub(at) >= recheck) {
                entry.deferred_at = None;
            }
        }
    }

    /// 本 tick 需要评估的指令（插入顺序）
    pub fn due(&self) -> Vec<&Command> {
        self.pending
            .iter()
            .filter(|e| e.deferred_at.is_none())
            .map(|e| &e.command)
            .collect()
    }

    pub fn defer(&mut self, id: CommandId) {
        let ticks = self.ticks;
        if let Some(entry) = self.pending.iter_mut().find(|e| e.command.id() == id) {
            entry.deferred_at = Some(ticks);
        }
    }

    pub fn is_deferred(&self, id: CommandId) -> bool {
        self.pending
            .iter()
            .any(|e| e.command.id() == id && e.deferred_at.is_some())
    }

    /// 新输入到来时唤醒所有 deferred 指令
    pub fn wake_deferred(&mut self) {
        for entry in &mut self.pending {
            entry.deferred_at = None;
        }
    }

    /// 取出指令（所有权转移给调用方）
    pub fn take(&mut self, id: CommandId) -> Option<Command> {
        let index = self.pending.iter().position(|e| e.command.id() == id)?;
        Some(self.pending.remove(index).command)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.pending.iter().map(|e| &e.command)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, CommandType, Comparison, Condition, FlightMode};

    fn conditional(mode: FlightMode) -> Command {
        Command::new(
            "switch mode later",
            CommandType::Conditional,
            Action::SetMode { mode },
            vec![Condition::new("alt > 50", 0.0, 50.0).monitoring("alt", Comparison::Gt)],
            vec![],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_take_preserves_order() {
        let mut q = ConditionalQueue::new(3);
        let a = conditional(FlightMode::Rtl);
        let b = conditional(FlightMode::Loiter);
        let (ida, idb) = (a.id(), b.id());
        q.push(a);
        q.push(b);
        assert_eq!(q.due().iter().map(|c| c.id()).collect::<Vec<_>>(), vec![ida, idb]);
        assert!(q.take(ida).is_some());
        assert!(q.take(ida).is_none());
        assert_eq!(q.len(), 1);
        assert_eq!(q.iter().next().map(Command::id), Some(idb));
    }

    #[test]
    fn test_duplicate_requires_same_trigger() {
        let mut q = ConditionalQueue::new(3);
        let first = conditional(FlightMode::Rtl);
        let id = first.id();
        q.push(first);
        assert_eq!(q.find_duplicate(&conditional(FlightMode::Rtl)), Some(id));

        let higher = Command::new(
            "switch mode later",
            CommandType::Conditional,
            Action::SetMode { mode: FlightMode::Rtl },
            vec![Condition::new("alt > 80", 12.0, 80.0).monitoring("alt", Comparison::Gt)],
            vec![],
            None,
        )
        .unwrap();
        assert!(q.find_duplicate(&higher).is_none());
    }

    #[test]
    fn test_deferred_skipped_until_recheck() {
        let mut q = ConditionalQueue::new(2);
        let a = conditional(FlightMode::Rtl);
        let id = a.id();
        q.push(a);
        q.begin_tick();
        q.defer(id);
        assert!(q.due().is_empty());
        q.begin_tick();
        assert!(q.due().is_empty());
        q.begin_tick();
        assert_eq!(q.due().len(), 1);

        q.defer(id);
        assert!(q.is_deferred(id));
        q.wake_deferred();
        assert_eq!(q.due().len(), 1);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut q = ConditionalQueue::new(2);
        let a = conditional(FlightMode::Rtl);
        let id = a.id();
        q.push(a);
        assert_eq!(q.find_duplicate(&conditional(FlightMode::Rtl)), Some(id));
        assert_eq!(q.find_duplicate(&conditional(FlightMode::Loiter)), None);
    }
}
