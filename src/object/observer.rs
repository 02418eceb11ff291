// src/object/observer.rs

use bitflags::bitflags;
use spin::Mutex;

use super::cookie::CookieJar;
use super::handle::Handle;
use super::signal::Signals;

bitflags! {
    /// 观察者钩子的返回标志
    ///
    /// NEED_REMOVAL 由 StateTracker 内部消费，不会越过子系统边界
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObserverFlags: u32 {
        /// 本次取消已被该观察者认领
        const HANDLED      = 1 << 0;
        /// 观察者要求从列表中移除
        const NEED_REMOVAL = 1 << 1;
        /// 有被阻塞的线程可以被唤醒
        const WOKE_THREADS = 1 << 2;
    }
}

/// 状态观察者
///
/// 一个观察者同一时刻最多注册在一个 StateTracker 上，每次注册是一次性的:
/// 被移除后不会回到已注册状态。
///
/// 钩子约定（硬性契约）:
/// - `on_initialize` / `on_state_change` / `on_cancel` / `on_cancel_by_key`
///   在 StateTracker 的锁内调用，必须快速返回、不得阻塞，也不得回调
///   同一个 StateTracker 的注册/移除/取消接口（自旋锁不可重入，会死锁，
///   还会破坏进行中的列表遍历）
/// - `on_removed` 总是在锁外调用，每次注册恰好一次，是唯一允许做
///   唤醒线程、释放资源这类重副作用的钩子
pub trait StateObserver: Send + Sync {
    /// 注册时调用一次，可检查当前信号并要求立即移除
    fn on_initialize(&self, initial: Signals, jar: Option<&CookieJar>) -> ObserverFlags;

    /// 信号发生实际变化时调用，参数是本次变更后的最终值
    fn on_state_change(&self, new_signals: Signals) -> ObserverFlags {
        let _ = new_signals;
        ObserverFlags::empty()
    }

    /// 按句柄取消扫描，认出自己的句柄时返回 HANDLED
    fn on_cancel(&self, handle: Handle) -> ObserverFlags {
        let _ = handle;
        ObserverFlags::empty()
    }

    /// 按句柄 + port/key 取消扫描，ctx 用 port 的 koid 区分实例
    fn on_cancel_by_key(&self, handle: Handle, ctx: u64, key: u64) -> ObserverFlags {
        let _ = (handle, ctx, key);
        ObserverFlags::empty()
    }

    /// 从列表摘除后调用（锁外）
    fn on_removed(&self) {}
}

/// Cookie 观察者
///
/// 注册时按自己的作用域读取对象的 CookieJar 并缓存 cookie 值，
/// 作用域不匹配或对象没有 jar 时直接要求移除。
pub struct CookieObserver {
    handle: Handle,
    scope: u64,
    cookie: Mutex<Option<u64>>,
}

impl CookieObserver {
    pub fn new(handle: Handle, scope: u64) -> Self {
        Self {
            handle,
            scope,
            cookie: Mutex::new(None),
        }
    }

    /// 注册时缓存到的 cookie 值
    pub fn cookie(&self) -> Option<u64> {
        *self.cookie.lock()
    }
}

impl StateObserver for CookieObserver {
    fn on_initialize(&self, _initial: Signals, jar: Option<&CookieJar>) -> ObserverFlags {
        match jar {
            Some(jar) if jar.scope() == self.scope => {
                *self.cookie.lock() = Some(jar.cookie());
                ObserverFlags::empty()
            }
            _ => ObserverFlags::NEED_REMOVAL,
        }
    }

    fn on_cancel(&self, handle: Handle) -> ObserverFlags {
        if handle == self.handle {
            ObserverFlags::HANDLED | ObserverFlags::NEED_REMOVAL
        } else {
            ObserverFlags::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::state_tracker::StateTracker;
    use alloc::sync::Arc;

    #[test]
    fn cookie_observer_captures_matching_scope() {
        let tracker = StateTracker::with_cookie_jar(Signals::empty());
        tracker.set_cookie(42, 0xbeef).unwrap();

        let observer = Arc::new(CookieObserver::new(Handle::from_raw(1), 42));
        tracker.add_observer(observer.clone());
        assert_eq!(observer.cookie(), Some(0xbeef));
        assert_eq!(tracker.observer_count(), 1);

        assert!(tracker.cancel(Handle::from_raw(1)));
        assert_eq!(tracker.observer_count(), 0);
    }

    #[test]
    fn cookie_observer_with_wrong_scope_is_rejected() {
        let tracker = StateTracker::with_cookie_jar(Signals::empty());
        tracker.set_cookie(42, 0xbeef).unwrap();

        let observer = Arc::new(CookieObserver::new(Handle::from_raw(1), 43));
        tracker.add_observer(observer.clone());
        assert_eq!(observer.cookie(), None);
        assert_eq!(tracker.observer_count(), 0);
    }

    #[test]
    fn cookie_observer_without_jar_is_rejected() {
        let tracker = StateTracker::new(Signals::empty());
        let observer = Arc::new(CookieObserver::new(Handle::from_raw(1), 42));
        tracker.add_observer(observer.clone());
        assert_eq!(observer.cookie(), None);
        assert_eq!(tracker.observer_count(), 0);
    }
}
