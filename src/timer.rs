//! 单次可重置计时器
//!
//! 时间由调用方显式传入，引擎因此不依赖任何运行时；
//! 驱动方（tokio 任务或测试）负责在截止时间到达时调用 `fire`。

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleShotTimer {
    deadline: Option<Instant>,
}

impl SingleShotTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 空闲时才启动；返回是否启动
    pub fn arm(&mut self, now: Instant, delay: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + delay);
        true
    }

    /// 无论当前状态如何都以新的延迟重新启动
    pub fn rearm(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 到期时返回 `true` 并复位，每次启动只触发一次
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
