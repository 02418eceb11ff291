use super::KernelObject;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use bitflags::bitflags;

/// 用户空间句柄
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

impl Handle {
    pub const INVALID: Handle = Handle(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u32 {
        const READ      = 1 << 0;
        const WRITE     = 1 << 1;
        const DUPLICATE = 1 << 2;
        const WAIT      = 1 << 3;
        const SIGNAL    = 1 << 4;

        const BASIC = Self::READ.bits() | Self::WRITE.bits() | Self::WAIT.bits();
        const ALL = u32::MAX;
    }
}

/// 句柄表项
#[derive(Clone)]
pub struct HandleEntry {
    pub object: Arc<dyn KernelObject>,
    pub rights: Rights,
}

/// 进程句柄表
///
/// 句柄计数的变化通过 update_last_handle_signal 反馈给对象，
/// 关闭句柄时对该对象发一次按句柄的取消扫描。
pub struct HandleTable {
    handles: BTreeMap<Handle, HandleEntry>,
    next_id: u32,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: BTreeMap::new(),
            next_id: 1, // 0 是无效句柄
        }
    }

    /// 插入对象，返回句柄
    pub fn insert(&mut self, object: Arc<dyn KernelObject>, rights: Rights) -> Handle {
        let handle = Handle(self.next_id);
        self.next_id += 1;
        self.handles.insert(
            handle,
            HandleEntry {
                object: object.clone(),
                rights,
            },
        );
        let count = self.count_for(&object);
        object.state_tracker().update_last_handle_signal(Some(count));
        handle
    }

    /// 获取对象（检查权限）
    pub fn get(&self, handle: Handle, required: Rights) -> Option<Arc<dyn KernelObject>> {
        let entry = self.handles.get(&handle)?;
        if entry.rights.contains(required) {
            Some(entry.object.clone())
        } else {
            None
        }
    }

    /// 获取权限
    pub fn get_rights(&self, handle: Handle) -> Option<Rights> {
        self.handles.get(&handle).map(|e| e.rights)
    }

    /// 关闭句柄
    ///
    /// 先取消该句柄上的在途等待，再把新的句柄计数反馈给对象。
    pub fn remove(&mut self, handle: Handle) -> Option<HandleEntry> {
        let entry = self.handles.remove(&handle)?;

        entry.object.state_tracker().cancel(handle);

        let count = self.count_for(&entry.object);
        entry
            .object
            .state_tracker()
            .update_last_handle_signal(Some(count));

        debug!("handle {} closed, {} left for object", handle.raw(), count);
        Some(entry)
    }

    /// 复制句柄（可削减权限）
    pub fn duplicate(&mut self, handle: Handle, new_rights: Rights) -> Option<Handle> {
        let entry = self.handles.get(&handle)?;
        if !entry.rights.contains(Rights::DUPLICATE) {
            return None;
        }
        let actual_rights = entry.rights & new_rights;
        let object = entry.object.clone();
        let new_handle = Handle(self.next_id);
        self.next_id += 1;
        self.handles.insert(
            new_handle,
            HandleEntry {
                object: object.clone(),
                rights: actual_rights,
            },
        );
        let count = self.count_for(&object);
        object.state_tracker().update_last_handle_signal(Some(count));
        Some(new_handle)
    }

    /// 句柄数量
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 某对象在本表中的句柄计数
    fn count_for(&self, object: &Arc<dyn KernelObject>) -> u32 {
        self.handles
            .values()
            .filter(|e| Arc::ptr_eq(&e.object, object))
            .count() as u32
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
