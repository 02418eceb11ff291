// src/object/cookie.rs

/// 尚未建立作用域
pub const SCOPE_UNSET: u64 = 0;
/// 内核保留作用域，cookie 作废后永久归属于它
pub const SCOPE_KERNEL: u64 = u64::MAX;

/// Cookie 操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieError {
    /// 对象没有 CookieJar
    NotSupported,
    /// 作用域不匹配
    AccessDenied,
}

/// 单槽 cookie
///
/// 第一次 set 建立作用域，之后作用域不匹配的访问一律拒绝。
/// 只能在所属 StateTracker 的锁内访问。
#[derive(Debug)]
pub struct CookieJar {
    scope: u64,
    cookie: u64,
}

impl CookieJar {
    pub const fn new() -> Self {
        Self {
            scope: SCOPE_UNSET,
            cookie: 0,
        }
    }

    /// 当前作用域
    pub fn scope(&self) -> u64 {
        self.scope
    }

    /// 当前 cookie 值（不做作用域检查，调用方自己检查）
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// 写入 cookie，第一次写入时建立作用域
    pub(super) fn set(&mut self, scope: u64, cookie: u64) -> Result<(), CookieError> {
        if self.scope == SCOPE_KERNEL {
            return Err(CookieError::AccessDenied);
        }
        if self.scope == SCOPE_UNSET {
            self.scope = scope;
        }
        if self.scope != scope {
            return Err(CookieError::AccessDenied);
        }
        self.cookie = cookie;
        Ok(())
    }

    /// 读取 cookie
    pub(super) fn get(&self, scope: u64) -> Result<u64, CookieError> {
        if self.scope == SCOPE_KERNEL || self.scope != scope {
            return Err(CookieError::AccessDenied);
        }
        Ok(self.cookie)
    }

    /// 作废 cookie，总是成功
    pub(super) fn invalidate(&mut self) {
        self.scope = SCOPE_KERNEL;
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}
