use crate::metadata::{ExtendedItem, LockLevel};
use crate::path::cmp_parent_first;
use crate::workspace::WorkspaceInfo;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("item '{0}' is locked by another user; selection is immutable")]
    LockedByOther(String),
}

pub type LockResult<T> = Result<T, LockError>;

/// 锁对话框条目的状态机
///
/// 由服务端快照推导初始状态，`LockedByOther` 是终态，选择位不可再变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockItemState {
    /// 当前无锁，可以加锁
    Lockable { selected: bool },
    /// 已被当前工作区所有者锁定，可以解锁
    Unlockable { selected: bool },
    /// 被其他用户锁定，不可操作
    LockedByOther,
}

/// 一个待加锁/解锁条目：服务端快照 + 选择状态
#[derive(Debug, Clone)]
pub struct LockItemModel {
    item: ExtendedItem,
    state: LockItemState,
}

impl LockItemModel {
    /// 从 ExtendedItem 快照构造，初始状态由锁归属推导
    pub fn new(item: ExtendedItem, workspace: &WorkspaceInfo) -> Self {
        let state = match (&item.lock, &item.lock_owner) {
            (LockLevel::None, _) => LockItemState::Lockable { selected: false },
            (_, Some(owner)) if workspace.is_owned_by(owner) => {
                LockItemState::Unlockable { selected: false }
            }
            _ => LockItemState::LockedByOther,
        };
        Self { item, state }
    }

    pub fn item(&self) -> &ExtendedItem {
        &self.item
    }

    pub fn state(&self) -> LockItemState {
        self.state
    }

    /// 选择状态：`LockedByOther` 返回 None
    pub fn selection_status(&self) -> Option<bool> {
        match self.state {
            LockItemState::Lockable { selected } | LockItemState::Unlockable { selected } => {
                Some(selected)
            }
            LockItemState::LockedByOther => None,
        }
    }

    /// 修改选择位；对 `LockedByOther` 条目调用是非法操作
    pub fn set_selected(&mut self, selected: bool) -> LockResult<()> {
        match &mut self.state {
            LockItemState::Lockable { selected: s } | LockItemState::Unlockable { selected: s } => {
                *s = selected;
                Ok(())
            }
            LockItemState::LockedByOther => {
                Err(LockError::LockedByOther(self.item.server_path.to_string()))
            }
        }
    }

    /// 持锁人去掉域前缀后的显示名
    pub fn lock_owner_without_domain(&self) -> Option<&str> {
        let owner = self.item.lock_owner.as_deref()?;
        Some(owner.rsplit('\\').next().unwrap_or(owner))
    }

    /// 按服务器路径做父目录优先排序
    ///
    /// 调用方负责方向策略：加锁自顶向下按序提交，解锁反向遍历。
    pub fn sort_parent_first(items: &mut [LockItemModel]) {
        items.sort_by(|a, b| cmp_parent_first(&a.item.server_path, &b.item.server_path));
    }
}
