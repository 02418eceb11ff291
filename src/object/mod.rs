pub mod cookie;
pub mod event;
pub mod handle;
pub mod observer;
pub mod port;
pub mod signal;
pub mod state_tracker;
pub mod wait_queue;

pub use cookie::{CookieError, CookieJar};
pub use event::{Event, EventError};
pub use handle::{Handle, HandleEntry, HandleTable, Rights};
pub use observer::{ObserverFlags, StateObserver};
pub use port::{BindOptions, PacketType, Port, PortError, PortPacket};
pub use signal::Signals;
pub use state_tracker::StateTracker;
pub use wait_queue::{WaitObserver, WaitOutcome, Waiter};

use core::any::Any;
use core::sync::atomic::{AtomicU64, Ordering};

/// 对象类型
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    None = 0,
    Event = 1,
    Port = 2,
}

/// 所有内核对象的 trait
pub trait KernelObject: Any + Send + Sync + 'static {
    fn object_type(&self) -> ObjectType;
    fn koid(&self) -> u64;
    fn state_tracker(&self) -> &StateTracker;
    fn as_any(&self) -> &dyn Any;

    /// 当前信号快照
    fn signals(&self) -> Signals {
        self.state_tracker().signals()
    }
}

static NEXT_KOID: AtomicU64 = AtomicU64::new(1);

/// 分配全局唯一 koid
pub fn alloc_koid() -> u64 {
    NEXT_KOID.fetch_add(1, Ordering::Relaxed)
}
