//! 调度器挂钩
//!
//! StateTracker 自己不认识调度器，唤醒提示通过这个 trait 显式注入，
//! 由创建内核对象的一方决定接到哪个调度器上。

/// 重调度提示的接收方
pub trait Scheduler: Send + Sync {
    /// 提示有被阻塞的线程可能已经可以运行
    ///
    /// 只是提示，不要求立即切换
    fn reschedule(&self);
}
