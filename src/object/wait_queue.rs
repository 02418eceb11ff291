use alloc::sync::Arc;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use super::cookie::CookieJar;
use super::handle::Handle;
use super::observer::{ObserverFlags, StateObserver};
use super::signal::Signals;

/// 等待结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 等到了感兴趣的信号（值是命中的子集）
    Satisfied(Signals),
    /// 等待被取消（句柄关闭等）
    Cancelled,
}

/// 等待者槽位
///
/// WaitObserver 在 on_removed 里发布结局，等待线程据此退出。
pub struct Waiter {
    done: AtomicBool,
    outcome: Mutex<Option<WaitOutcome>>,
}

impl Waiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            done: AtomicBool::new(false),
            outcome: Mutex::new(None),
        })
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// 自旋等待直到观察者发布结局
    pub fn wait(&self) -> WaitOutcome {
        while !self.done.load(Ordering::Acquire) {
            spin_loop();
        }
        let outcome = *self.outcome.lock();
        outcome.expect("Waiter: done set without outcome")
    }

    fn complete(&self, outcome: WaitOutcome) {
        *self.outcome.lock() = Some(outcome);
        self.done.store(true, Ordering::Release);
    }
}

/// 阻塞等待观察者
///
/// 一次性: 信号满足或被取消后即要求移除。锁内的钩子只把结局暂存到
/// `pending`，真正的发布（唤醒等待线程）留给锁外的 on_removed。
pub struct WaitObserver {
    handle: Handle,
    watched: Signals,
    pending: Mutex<Option<WaitOutcome>>,
    waiter: Arc<Waiter>,
}

impl WaitObserver {
    pub fn new(handle: Handle, watched: Signals, waiter: Arc<Waiter>) -> Arc<Self> {
        Arc::new(Self {
            handle,
            watched,
            pending: Mutex::new(None),
            waiter,
        })
    }

    fn satisfy(&self, signals: Signals) -> ObserverFlags {
        let hit = signals & self.watched;
        if hit.is_empty() {
            return ObserverFlags::empty();
        }
        *self.pending.lock() = Some(WaitOutcome::Satisfied(hit));
        ObserverFlags::NEED_REMOVAL | ObserverFlags::WOKE_THREADS
    }
}

impl StateObserver for WaitObserver {
    fn on_initialize(&self, initial: Signals, _jar: Option<&CookieJar>) -> ObserverFlags {
        self.satisfy(initial)
    }

    fn on_state_change(&self, new_signals: Signals) -> ObserverFlags {
        self.satisfy(new_signals)
    }

    fn on_cancel(&self, handle: Handle) -> ObserverFlags {
        if handle != self.handle {
            return ObserverFlags::empty();
        }
        *self.pending.lock() = Some(WaitOutcome::Cancelled);
        ObserverFlags::HANDLED | ObserverFlags::NEED_REMOVAL
    }

    fn on_removed(&self) {
        let outcome = self.pending.lock().take().unwrap_or(WaitOutcome::Cancelled);
        self.waiter.complete(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::state_tracker::StateTracker;
    use std::thread;

    #[test]
    fn already_satisfied_wait_returns_immediately() {
        let tracker = StateTracker::new(Signals::READABLE);
        let waiter = Waiter::new();
        let observer = WaitObserver::new(
            Handle::from_raw(1),
            Signals::READABLE | Signals::PEER_CLOSED,
            waiter.clone(),
        );

        tracker.add_observer(observer);
        assert_eq!(tracker.observer_count(), 0);
        assert_eq!(waiter.wait(), WaitOutcome::Satisfied(Signals::READABLE));
    }

    #[test]
    fn blocked_wait_is_satisfied_by_update() {
        let tracker = Arc::new(StateTracker::new(Signals::empty()));
        let waiter = Waiter::new();
        let observer = WaitObserver::new(Handle::from_raw(1), Signals::SIGNALED, waiter.clone());
        tracker.add_observer(observer);
        assert!(!waiter.is_done());

        let producer = {
            let tracker = tracker.clone();
            thread::spawn(move || tracker.update_state(Signals::empty(), Signals::SIGNALED))
        };

        assert_eq!(waiter.wait(), WaitOutcome::Satisfied(Signals::SIGNALED));
        producer.join().unwrap();
        assert_eq!(tracker.observer_count(), 0);
    }

    #[test]
    fn cancelled_wait_reports_cancellation() {
        let tracker = StateTracker::new(Signals::empty());
        let waiter = Waiter::new();
        let observer = WaitObserver::new(Handle::from_raw(7), Signals::SIGNALED, waiter.clone());
        tracker.add_observer(observer);

        assert!(tracker.cancel(Handle::from_raw(7)));
        assert_eq!(waiter.wait(), WaitOutcome::Cancelled);
        assert_eq!(tracker.observer_count(), 0);
    }

    #[test]
    fn unrelated_signal_does_not_wake() {
        let tracker = StateTracker::new(Signals::empty());
        let waiter = Waiter::new();
        let observer = WaitObserver::new(Handle::from_raw(1), Signals::SIGNALED, waiter.clone());
        tracker.add_observer(observer);

        tracker.update_state(Signals::empty(), Signals::WRITABLE);
        assert!(!waiter.is_done());
        assert_eq!(tracker.observer_count(), 1);

        tracker.cancel(Handle::from_raw(1));
        assert_eq!(waiter.wait(), WaitOutcome::Cancelled);
    }
}
