use crate::path::{LocalPath, ServerPath};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 服务端条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    File,
    Folder,
}

/// 锁级别
///
/// `Unchanged` 仅用于 checkout 等不改动锁状态的请求。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockLevel {
    None,
    Checkin,
    CheckOut,
    Unchanged,
}

impl LockLevel {
    /// wire 取值（SOAP 枚举文本）
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Checkin => "Checkin",
            Self::CheckOut => "CheckOut",
            Self::Unchanged => "Unchanged",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "None" => Some(Self::None),
            "Checkin" => Some(Self::Checkin),
            "CheckOut" => Some(Self::CheckOut),
            "Unchanged" => Some(Self::Unchanged),
            _ => None,
        }
    }
}

/// 服务端上报的条目快照
///
/// 只读，来自一次 QueryItems 查询。`local_version` 为 None 表示该条目
/// 未纳入版本控制（正常结果，不是错误）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedItem {
    /// 服务器路径
    pub server_path: ServerPath,
    /// 映射到的本地路径（服务端视角，可能缺失）
    pub local_path: Option<LocalPath>,
    /// 条目 ID
    pub item_id: u32,
    /// 服务端最新版本号
    pub latest_version: Option<u32>,
    /// 本地已同步版本号（`lver`），None 表示未纳入版本控制
    pub local_version: Option<u32>,
    pub item_type: ItemType,
    /// 当前锁级别
    pub lock: LockLevel,
    /// 持锁人（限定名，如 `CORP\bob`）
    pub lock_owner: Option<String>,
    /// 内容下载地址
    pub download_url: Option<String>,
    /// 非零表示条目已被删除
    pub deletion_id: u32,
}

impl ExtendedItem {
    /// 条目是否已纳入版本控制
    pub fn is_versioned(&self) -> bool {
        self.local_version.is_some()
    }

    pub fn is_locked(&self) -> bool {
        !matches!(self.lock, LockLevel::None)
    }
}

/// 一次提交
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: u32,
    /// 变更归属者
    pub owner: String,
    /// 实际提交者（代提交时与 owner 不同）
    pub committer: String,
    pub date: DateTime<Utc>,
    pub comment: String,
}

/// QueryBranches 结果中的一项分支关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRelative {
    pub server_path: ServerPath,
    pub version: u32,
    /// 分支来源路径，根节点为 None
    pub branched_from: Option<ServerPath>,
    /// 是否为查询所请求的条目本身
    pub requested: bool,
}
