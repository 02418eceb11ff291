// src/object/event.rs

use alloc::sync::Arc;
use core::any::Any;

use super::signal::Signals;
use super::state_tracker::StateTracker;
use super::{KernelObject, ObjectType, alloc_koid};
use crate::task::Scheduler;

/// Event 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventError {
    /// 信号位不在允许范围内
    InvalidArgs,
}

/// Event 对象
///
/// 最小的可等待对象: 用户只能操作 SIGNALED 和用户信号位。
/// 带 CookieJar，可做端口关联等旁路记账。
pub struct Event {
    koid: u64,
    tracker: StateTracker,
}

impl Event {
    const ALLOWED: Signals = Signals::SIGNALED.union(Signals::USER_ALL);

    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            koid: alloc_koid(),
            tracker: StateTracker::with_cookie_jar(Signals::empty()),
        })
    }

    /// 创建时接上重调度挂钩
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new(Self {
            koid: alloc_koid(),
            tracker: StateTracker::with_cookie_jar(Signals::empty()).with_scheduler(scheduler),
        })
    }

    /// 设置/清除信号
    pub fn signal(&self, clear: Signals, set: Signals) -> Result<(), EventError> {
        if !Self::ALLOWED.contains(clear | set) {
            return Err(EventError::InvalidArgs);
        }
        self.tracker.update_state(clear, set);
        Ok(())
    }
}

impl KernelObject for Event {
    fn object_type(&self) -> ObjectType {
        ObjectType::Event
    }

    fn koid(&self) -> u64 {
        self.koid
    }

    fn state_tracker(&self) -> &StateTracker {
        &self.tracker
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
