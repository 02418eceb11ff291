use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use super::handle::Handle;
use super::observer::{ObserverFlags, StateObserver};
use super::signal::Signals;
use super::state_tracker::StateTracker;
use super::wait_queue::{WaitObserver, WaitOutcome, Waiter};
use super::{KernelObject, ObjectType, alloc_koid};
use crate::task::Scheduler;

/// 事件包
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPacket {
    /// 用户 key
    pub key: u64,
    /// 触发的信号
    pub signals: Signals,
    /// 包类型
    pub packet_type: PacketType,
    /// 用户数据
    pub data: [u64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Signal,
    User,
}

impl PortPacket {
    pub const fn zeroed() -> Self {
        Self {
            key: 0,
            signals: Signals::empty(),
            packet_type: PacketType::User,
            data: [0; 4],
        }
    }

    pub fn signal(key: u64, signals: Signals) -> Self {
        Self {
            key,
            signals,
            packet_type: PacketType::Signal,
            data: [0; 4],
        }
    }

    pub fn user(key: u64, data: [u64; 4]) -> Self {
        Self {
            key,
            signals: Signals::empty(),
            packet_type: PacketType::User,
            data,
        }
    }
}

/// 绑定选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOptions {
    Once,
    Persistent,
}

/// Port 错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    AlreadyBound,
    NotFound,
    Empty,
    InvalidArgs,
    Cancelled,
}

/// 绑定记录
struct Binding {
    key: u64,
    object: Arc<dyn KernelObject>,
    observer: Arc<PortObserver>,
}

/// 包队列和绑定列表
///
/// 锁层级: 队列锁在外，port 自己的 tracker 锁在内；绝不能拿着队列锁
/// 去碰目标对象的 tracker。
struct PortQueue {
    packets: VecDeque<PortPacket>,
    bindings: Vec<Binding>,
}

/// Port 对象
///
/// 异步等待的汇聚点: 目标对象的信号跃迁由 PortObserver 转成事件包
/// 投递到这里，READABLE 信号由 port 自己的 StateTracker 维护。
pub struct Port {
    koid: u64,
    queue: Mutex<PortQueue>,
    tracker: StateTracker,
    next_key: AtomicU64,
    self_weak: Mutex<Option<Weak<Port>>>,
}

impl Port {
    pub fn new() -> Arc<Self> {
        Self::build(StateTracker::new(Signals::empty()))
    }

    /// 创建时接上重调度挂钩
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Self::build(StateTracker::new(Signals::empty()).with_scheduler(scheduler))
    }

    fn build(tracker: StateTracker) -> Arc<Self> {
        let port = Arc::new(Self {
            koid: alloc_koid(),
            queue: Mutex::new(PortQueue {
                packets: VecDeque::new(),
                bindings: Vec::new(),
            }),
            tracker,
            next_key: AtomicU64::new(1),
            self_weak: Mutex::new(None),
        });

        *port.self_weak.lock() = Some(Arc::downgrade(&port));
        port
    }

    /// 分配 key
    pub fn alloc_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// 绑定目标对象: 其 trigger 信号的跃迁会投递 Signal 包
    ///
    /// `handle` 是发起绑定的句柄，句柄关闭时据此取消。
    pub fn bind(
        &self,
        key: u64,
        handle: Handle,
        object: Arc<dyn KernelObject>,
        trigger: Signals,
        options: BindOptions,
    ) -> Result<(), PortError> {
        // 投递路径持有目标 tracker 锁再拿队列锁，目标是 port（包括自己）
        // 时两个方向的投递会在这两把锁上成环
        if object.object_type() == ObjectType::Port {
            return Err(PortError::InvalidArgs);
        }
        {
            let queue = self.queue.lock();
            if queue.bindings.iter().any(|b| b.key == key) {
                return Err(PortError::AlreadyBound);
            }
        }

        let port_weak = self.self_weak.lock().clone().unwrap();
        let observer = Arc::new(PortObserver {
            key,
            handle,
            trigger,
            once: options == BindOptions::Once,
            port: port_weak,
            port_koid: self.koid,
            last: Mutex::new(Signals::empty()),
        });

        // on_initialize 可能当场触发并投递
        object.state_tracker().add_observer(observer.clone());

        let mut queue = self.queue.lock();
        // 两段临界区之间可能有并发 bind 抢注了同一个 key，拿到锁后重查;
        // 冲突时摘掉刚注册的观察者再报错
        if queue.bindings.iter().any(|b| b.key == key) {
            drop(queue);
            object.state_tracker().cancel_by_key(handle, self.koid, key);
            return Err(PortError::AlreadyBound);
        }
        queue.bindings.push(Binding {
            key,
            object,
            observer,
        });
        debug!("port {}: bound key {}", self.koid, key);
        Ok(())
    }

    /// 解绑，并取消目标对象上的观察者
    pub fn unbind(&self, key: u64) -> Result<(), PortError> {
        let binding = {
            let mut queue = self.queue.lock();
            let pos = queue
                .bindings
                .iter()
                .position(|b| b.key == key)
                .ok_or(PortError::NotFound)?;
            queue.bindings.remove(pos)
        };

        // 队列锁已放掉，才能去拿目标对象的 tracker 锁
        binding
            .object
            .state_tracker()
            .cancel_by_key(binding.observer.handle, self.koid, key);
        debug!("port {}: unbound key {}", self.koid, key);
        Ok(())
    }

    /// 手动投递用户包
    pub fn queue(&self, packet: PortPacket) {
        self.push_packet(packet);
    }

    /// 非阻塞取包
    pub fn try_dequeue(&self) -> Result<PortPacket, PortError> {
        let mut queue = self.queue.lock();
        let packet = queue.packets.pop_front().ok_or(PortError::Empty)?;

        // 已触发过的 once 绑定在这里清账
        if packet.packet_type == PacketType::Signal {
            if let Some(pos) = queue
                .bindings
                .iter()
                .position(|b| b.key == packet.key && b.observer.once)
            {
                queue.bindings.remove(pos);
            }
        }

        if queue.packets.is_empty() {
            self.tracker.update_state(Signals::READABLE, Signals::empty());
        }
        Ok(packet)
    }

    /// 阻塞等待事件包
    ///
    /// `handle` 是等待方的句柄，关闭它可以打断等待。
    pub fn wait(&self, handle: Handle) -> Result<PortPacket, PortError> {
        loop {
            match self.try_dequeue() {
                Ok(packet) => return Ok(packet),
                Err(PortError::Empty) => {}
                Err(e) => return Err(e),
            }

            let waiter = Waiter::new();
            self.tracker
                .add_observer(WaitObserver::new(handle, Signals::READABLE, waiter.clone()));
            match waiter.wait() {
                WaitOutcome::Satisfied(_) => {}
                WaitOutcome::Cancelled => return Err(PortError::Cancelled),
            }
        }
    }

    /// 待处理包数量
    pub fn pending_count(&self) -> usize {
        self.queue.lock().packets.len()
    }

    /// 当前绑定数量
    pub fn binding_count(&self) -> usize {
        self.queue.lock().bindings.len()
    }

    fn push_packet(&self, packet: PortPacket) {
        // READABLE 的置位必须和入队在同一个队列锁临界区里，
        // 否则会和 try_dequeue 的清位互相覆盖
        let mut queue = self.queue.lock();
        queue.packets.push_back(packet);
        self.tracker.update_state(Signals::empty(), Signals::READABLE);
        drop(queue);
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        // 残留的绑定还挂在目标对象的观察者列表里，必须先摘干净
        let bindings = core::mem::take(&mut self.queue.get_mut().bindings);
        for binding in bindings {
            binding
                .object
                .state_tracker()
                .cancel_by_key(binding.observer.handle, self.koid, binding.key);
        }
    }
}

impl KernelObject for Port {
    fn object_type(&self) -> ObjectType {
        ObjectType::Port
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

/// Port 观察者
///
/// 注册在目标对象的 StateTracker 上，trigger 信号从无到有的跃迁
/// 转成 Signal 包投递给 port。按 (handle, port koid, key) 取消。
pub struct PortObserver {
    key: u64,
    handle: Handle,
    trigger: Signals,
    once: bool,
    port: Weak<Port>,
    port_koid: u64,
    /// 上一次看到的信号，用来做边沿判定
    last: Mutex<Signals>,
}

impl PortObserver {
    fn maybe_queue(&self, signals: Signals) -> ObserverFlags {
        let prev = {
            let mut last = self.last.lock();
            let prev = *last;
            *last = signals;
            prev
        };

        let hit = signals & self.trigger;
        if hit.is_empty() || !(prev & self.trigger).is_empty() {
            return ObserverFlags::empty();
        }

        if let Some(port) = self.port.upgrade() {
            port.push_packet(PortPacket::signal(self.key, hit));
        }
        if self.once {
            ObserverFlags::NEED_REMOVAL
        } else {
            ObserverFlags::empty()
        }
    }
}

impl StateObserver for PortObserver {
    fn on_initialize(
        &self,
        initial: Signals,
        _jar: Option<&super::cookie::CookieJar>,
    ) -> ObserverFlags {
        self.maybe_queue(initial)
    }

    fn on_state_change(&self, new_signals: Signals) -> ObserverFlags {
        self.maybe_queue(new_signals)
    }

    fn on_cancel(&self, handle: Handle) -> ObserverFlags {
        if handle == self.handle {
            ObserverFlags::HANDLED | ObserverFlags::NEED_REMOVAL
        } else {
            ObserverFlags::empty()
        }
    }

    fn on_cancel_by_key(&self, handle: Handle, ctx: u64, key: u64) -> ObserverFlags {
        if handle == self.handle && ctx == self.port_koid && key == self.key {
            ObserverFlags::HANDLED | ObserverFlags::NEED_REMOVAL
        } else {
            ObserverFlags::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::event::Event;
    use std::thread;

    #[test]
    fn once_binding_delivers_one_packet_then_detaches() {
        let port = Port::new();
        let event = Event::new();
        let key = port.alloc_key();

        port.bind(
            key,
            Handle::from_raw(1),
            event.clone(),
            Signals::SIGNALED,
            BindOptions::Once,
        )
        .unwrap();

        event.signal(Signals::empty(), Signals::SIGNALED).unwrap();
        assert_eq!(event.state_tracker().observer_count(), 0);
        assert!(port.signals().contains(Signals::READABLE));

        let packet = port.try_dequeue().unwrap();
        assert_eq!(packet.key, key);
        assert_eq!(packet.packet_type, PacketType::Signal);
        assert_eq!(packet.signals, Signals::SIGNALED);

        // 包取走后 READABLE 清位，once 绑定也清账了
        assert!(!port.signals().contains(Signals::READABLE));
        assert_eq!(port.binding_count(), 0);

        // 再触发不会有新包
        event.signal(Signals::SIGNALED, Signals::empty()).unwrap();
        event.signal(Signals::empty(), Signals::SIGNALED).unwrap();
        assert_eq!(port.pending_count(), 0);
    }

    #[test]
    fn persistent_binding_delivers_on_each_rising_edge() {
        let port = Port::new();
        let event = Event::new();

        port.bind(
            7,
            Handle::from_raw(1),
            event.clone(),
            Signals::USER_0,
            BindOptions::Persistent,
        )
        .unwrap();

        event.signal(Signals::empty(), Signals::USER_0).unwrap();
        // 电平保持期间的无关跃迁不重复投递
        event.signal(Signals::empty(), Signals::USER_1).unwrap();
        event.signal(Signals::USER_0, Signals::empty()).unwrap();
        event.signal(Signals::empty(), Signals::USER_0).unwrap();

        assert_eq!(port.pending_count(), 2);
        assert_eq!(port.try_dequeue().unwrap().signals, Signals::USER_0);
        assert_eq!(port.try_dequeue().unwrap().signals, Signals::USER_0);
        assert_eq!(port.binding_count(), 1);

        port.unbind(7).unwrap();
        assert_eq!(event.state_tracker().observer_count(), 0);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let port = Port::new();
        let event = Event::new();

        port.bind(
            1,
            Handle::from_raw(1),
            event.clone(),
            Signals::SIGNALED,
            BindOptions::Persistent,
        )
        .unwrap();
        assert_eq!(
            port.bind(
                1,
                Handle::from_raw(2),
                event.clone(),
                Signals::SIGNALED,
                BindOptions::Once,
            ),
            Err(PortError::AlreadyBound)
        );

        port.unbind(1).unwrap();
        assert_eq!(port.unbind(1), Err(PortError::NotFound));
    }

    #[test]
    fn already_satisfied_binding_queues_immediately() {
        let port = Port::new();
        let event = Event::new();
        event.signal(Signals::empty(), Signals::SIGNALED).unwrap();

        port.bind(
            3,
            Handle::from_raw(1),
            event.clone(),
            Signals::SIGNALED,
            BindOptions::Once,
        )
        .unwrap();

        assert_eq!(event.state_tracker().observer_count(), 0);
        let packet = port.try_dequeue().unwrap();
        assert_eq!(packet.key, 3);
        assert_eq!(packet.signals, Signals::SIGNALED);
    }

    #[test]
    fn self_binding_is_rejected() {
        let port = Port::new();
        assert_eq!(
            port.bind(
                1,
                Handle::from_raw(1),
                port.clone(),
                Signals::READABLE,
                BindOptions::Once,
            ),
            Err(PortError::InvalidArgs)
        );
    }

    #[test]
    fn port_to_port_binding_is_rejected() {
        // 互相绑定会让两边的 tracker/队列锁形成环
        let a = Port::new();
        let b = Port::new();
        assert_eq!(
            a.bind(
                1,
                Handle::from_raw(1),
                b.clone(),
                Signals::READABLE,
                BindOptions::Persistent,
            ),
            Err(PortError::InvalidArgs)
        );
        assert_eq!(
            b.bind(
                1,
                Handle::from_raw(2),
                a.clone(),
                Signals::READABLE,
                BindOptions::Persistent,
            ),
            Err(PortError::InvalidArgs)
        );
        assert_eq!(a.binding_count(), 0);
        assert_eq!(b.binding_count(), 0);
    }

    #[test]
    fn concurrent_binds_with_same_key_admit_only_one() {
        use std::sync::Barrier;

        for round in 0..200 {
            let port = Port::new();
            let event = Event::new();
            let barrier = Arc::new(Barrier::new(2));

            let workers: Vec<_> = (0..2u32)
                .map(|i| {
                    let port = port.clone();
                    let event = event.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        port.bind(
                            7,
                            Handle::from_raw(i + 1),
                            event,
                            Signals::SIGNALED,
                            BindOptions::Persistent,
                        )
                    })
                })
                .collect();

            let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
            let wins = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(wins, 1, "round {}: {:?}", round, results);
            assert_eq!(port.binding_count(), 1);
            // 输家的观察者必须回滚，目标上只剩赢家那一个
            assert_eq!(event.state_tracker().observer_count(), 1);
        }
    }

    #[test]
    fn user_packets_wake_a_blocked_waiter() {
        let port = Port::new();

        let consumer = {
            let port = port.clone();
            thread::spawn(move || port.wait(Handle::from_raw(1)))
        };

        port.queue(PortPacket::user(9, [1, 2, 3, 4]));
        let packet = consumer.join().unwrap().unwrap();
        assert_eq!(packet.key, 9);
        assert_eq!(packet.packet_type, PacketType::User);
        assert_eq!(packet.data, [1, 2, 3, 4]);
    }

    #[test]
    fn closing_the_wait_handle_interrupts_wait() {
        let port = Port::new();

        let consumer = {
            let port = port.clone();
            thread::spawn(move || port.wait(Handle::from_raw(5)))
        };

        // 等到观察者挂上再取消
        while port.state_tracker().observer_count() == 0 {
            thread::yield_now();
        }
        port.state_tracker().cancel(Handle::from_raw(5));
        assert_eq!(consumer.join().unwrap(), Err(PortError::Cancelled));
    }

    #[test]
    fn dropping_the_port_detaches_all_bindings() {
        let event = Event::new();
        {
            let port = Port::new();
            port.bind(
                1,
                Handle::from_raw(1),
                event.clone(),
                Signals::SIGNALED,
                BindOptions::Persistent,
            )
            .unwrap();
            assert_eq!(event.state_tracker().observer_count(), 1);
        }
        assert_eq!(event.state_tracker().observer_count(), 0);
    }

    #[test]
    fn cancel_on_target_detaches_port_observer() {
        let port = Port::new();
        let event = Event::new();
        let handle = Handle::from_raw(11);

        port.bind(2, handle, event.clone(), Signals::SIGNALED, BindOptions::Persistent)
            .unwrap();

        // 句柄关闭路径: 按句柄取消
        assert!(event.state_tracker().cancel(handle));
        assert_eq!(event.state_tracker().observer_count(), 0);

        event.signal(Signals::empty(), Signals::SIGNALED).unwrap();
        assert_eq!(port.pending_count(), 0);
    }
}
