// src/object/signal.rs

use bitflags::bitflags;

bitflags! {
    /// 内核对象信号
    ///
    /// 只在所属 StateTracker 的锁内修改
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Signals: u32 {
        /// 可读
        const READABLE      = 1 << 0;
        /// 可写
        const WRITABLE      = 1 << 1;
        /// 对端关闭
        const PEER_CLOSED   = 1 << 2;
        /// 已终止
        const TERMINATED    = 1 << 3;
        /// 已触发（用于 Event）
        const SIGNALED      = 1 << 4;
        /// 仅剩最后一个句柄
        const LAST_HANDLE   = 1 << 5;

        // 用户信号
        const USER_0        = 1 << 24;
        const USER_1        = 1 << 25;
        const USER_2        = 1 << 26;
        const USER_3        = 1 << 27;

        const USER_ALL = Self::USER_0.bits()
            | Self::USER_1.bits()
            | Self::USER_2.bits()
            | Self::USER_3.bits();
    }
}
