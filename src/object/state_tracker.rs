// src/object/state_tracker.rs

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::cookie::{CookieError, CookieJar};
use super::handle::Handle;
use super::observer::{ObserverFlags, StateObserver};
use super::signal::Signals;
use crate::task::Scheduler;

/// 锁内状态
struct TrackerInner {
    signals: Signals,
    observers: Vec<Arc<dyn StateObserver>>,
    cookie_jar: Option<CookieJar>,
}

/// 状态跟踪器
///
/// 每个内核对象持有一个，是该对象信号位和观察者列表的唯一归属，
/// 全部变更串行化在同一把锁后面。
///
/// 锁纪律: 信号和列表只在锁内读写；观察者的 on_removed 回调总是在
/// 出锁之后按发现顺序执行，所以钩子里可以安全地做唤醒等副作用，
/// 而不会和进行中的扫描相互踩踏。
pub struct StateTracker {
    inner: Mutex<TrackerInner>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl StateTracker {
    pub fn new(initial: Signals) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                signals: initial,
                observers: Vec::new(),
                cookie_jar: None,
            }),
            scheduler: None,
        }
    }

    /// 带 CookieJar 的跟踪器（Event 等支持 cookie 的对象用）
    pub fn with_cookie_jar(initial: Signals) -> Self {
        let mut tracker = Self::new(initial);
        tracker.inner.get_mut().cookie_jar = Some(CookieJar::new());
        tracker
    }

    /// 注入重调度挂钩
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// 当前信号快照
    pub fn signals(&self) -> Signals {
        self.inner.lock().signals
    }

    /// 当前注册的观察者数量
    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// 注册观察者
    ///
    /// 锁内调用 on_initialize，没要求移除就插到列表头部；要求移除的话
    /// 出锁后立即回调 on_removed。两种结局恰好发生一个。
    /// 重复注册同一个观察者是编程错误。
    pub fn add_observer(&self, observer: Arc<dyn StateObserver>) {
        let flags = {
            let mut inner = self.inner.lock();
            assert!(
                !inner.observers.iter().any(|o| Arc::ptr_eq(o, &observer)),
                "StateTracker: observer registered twice"
            );
            let flags = observer.on_initialize(inner.signals, inner.cookie_jar.as_ref());
            if !flags.contains(ObserverFlags::NEED_REMOVAL) {
                inner.observers.insert(0, observer.clone());
            }
            flags
        };

        if flags.contains(ObserverFlags::NEED_REMOVAL) {
            observer.on_removed();
        }
        if flags.contains(ObserverFlags::WOKE_THREADS) {
            self.reschedule();
        }
    }

    /// 静默摘除观察者，不触发任何回调
    ///
    /// 观察者必须当前在列表里，否则是编程错误。
    pub fn remove_observer(&self, observer: &Arc<dyn StateObserver>) {
        let mut inner = self.inner.lock();
        let pos = inner
            .observers
            .iter()
            .position(|o| Arc::ptr_eq(o, observer))
            .expect("StateTracker: remove_observer on unlinked observer");
        inner.observers.remove(pos);
    }

    /// 按句柄取消
    ///
    /// 扫过所有观察者，返回是否有观察者认领了这次取消。
    /// 取消不算调度紧急事件，即使有 WOKE_THREADS 也不发重调度提示。
    pub fn cancel(&self, handle: Handle) -> bool {
        let flags = self.sweep(&mut |observer| observer.on_cancel(handle));
        flags.contains(ObserverFlags::HANDLED)
    }

    /// 按句柄 + port/key 取消（port 绑定的异步等待用）
    pub fn cancel_by_key(&self, handle: Handle, ctx: u64, key: u64) -> bool {
        let flags = self.sweep(&mut |observer| observer.on_cancel_by_key(handle, ctx, key));
        flags.contains(ObserverFlags::HANDLED)
    }

    /// 更新信号: `new = (signals & !clear) | set`
    ///
    /// 结果不变时是真正的 no-op，一个观察者都不碰；有变化时只做
    /// 一趟通知，观察者看到的是合并后的最终值。
    pub fn update_state(&self, clear: Signals, set: Signals) {
        let mut side: Vec<Arc<dyn StateObserver>> = Vec::new();
        let flags = {
            let mut inner = self.inner.lock();
            let new = (inner.signals & !clear) | set;
            if new == inner.signals {
                return;
            }
            inner.signals = new;
            Self::notify_locked(&mut inner, &mut side, &mut |observer| {
                observer.on_state_change(new)
            })
        };

        for observer in side {
            observer.on_removed();
        }
        if flags.contains(ObserverFlags::WOKE_THREADS) {
            self.reschedule();
        }
    }

    /// 由句柄计数驱动的 LAST_HANDLE 信号更新
    ///
    /// `count` 为 None 时静默返回（沿用原始语义，不视为契约违例）。
    pub fn update_last_handle_signal(&self, count: Option<u32>) {
        let Some(count) = count else {
            return;
        };
        if count == 1 {
            self.update_state(Signals::empty(), Signals::LAST_HANDLE);
        } else {
            self.update_state(Signals::LAST_HANDLE, Signals::empty());
        }
    }

    pub fn set_cookie(&self, scope: u64, cookie: u64) -> Result<(), CookieError> {
        let mut inner = self.inner.lock();
        match inner.cookie_jar.as_mut() {
            Some(jar) => jar.set(scope, cookie),
            None => Err(CookieError::NotSupported),
        }
    }

    pub fn get_cookie(&self, scope: u64) -> Result<u64, CookieError> {
        let inner = self.inner.lock();
        match inner.cookie_jar.as_ref() {
            Some(jar) => jar.get(scope),
            None => Err(CookieError::NotSupported),
        }
    }

    pub fn invalidate_cookie(&self) -> Result<(), CookieError> {
        let mut inner = self.inner.lock();
        match inner.cookie_jar.as_mut() {
            Some(jar) => {
                jar.invalidate();
                Ok(())
            }
            None => Err(CookieError::NotSupported),
        }
    }

    /// 公共扫描原语
    ///
    /// 锁内对列表做一趟正向遍历，OR 累积各观察者的返回标志，标了
    /// NEED_REMOVAL 的当场摘到侧链表；出锁后按发现顺序回调 on_removed。
    /// NEED_REMOVAL 在返回前被清掉，不会泄漏给上层。
    fn sweep(&self, f: &mut dyn FnMut(&Arc<dyn StateObserver>) -> ObserverFlags) -> ObserverFlags {
        let mut side: Vec<Arc<dyn StateObserver>> = Vec::new();
        let flags = {
            let mut inner = self.inner.lock();
            Self::notify_locked(&mut inner, &mut side, f)
        };

        for observer in side {
            observer.on_removed();
        }
        flags & !ObserverFlags::NEED_REMOVAL
    }

    /// 扫描的锁内部分，调用方负责出锁后清空 side
    fn notify_locked(
        inner: &mut TrackerInner,
        side: &mut Vec<Arc<dyn StateObserver>>,
        f: &mut dyn FnMut(&Arc<dyn StateObserver>) -> ObserverFlags,
    ) -> ObserverFlags {
        let mut flags = ObserverFlags::empty();
        let mut i = 0;
        while i < inner.observers.len() {
            let result = f(&inner.observers[i]);
            flags |= result;
            if result.contains(ObserverFlags::NEED_REMOVAL) {
                side.push(inner.observers.remove(i));
            } else {
                i += 1;
            }
        }
        flags
    }

    fn reschedule(&self) {
        if let Some(scheduler) = self.scheduler.as_ref() {
            scheduler.reschedule();
        }
    }
}

impl Drop for StateTracker {
    fn drop(&mut self) {
        // 对象销毁时观察者必须已清空，残留意味着有人持悬垂链接
        let inner = self.inner.get_mut();
        assert!(
            inner.observers.is_empty(),
            "StateTracker dropped with {} live observers",
            inner.observers.len()
        );
    }
}
