use crate::path::{LocalPath, PathError, PathResult, ServerPath};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 映射状态：Active 为正常映射，Cloaked 表示该服务器子树被排除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkingFolderStatus {
    Active,
    Cloaked,
}

/// 一条工作目录映射（本地目录 ↔ 服务器目录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingFolder {
    pub status: WorkingFolderStatus,
    pub server_path: ServerPath,
    /// Cloaked 映射不携带本地路径
    pub local_path: Option<LocalPath>,
}

impl WorkingFolder {
    pub fn active(local_path: LocalPath, server_path: ServerPath) -> Self {
        Self {
            status: WorkingFolderStatus::Active,
            server_path,
            local_path: Some(local_path),
        }
    }

    pub fn cloaked(server_path: ServerPath) -> Self {
        Self {
            status: WorkingFolderStatus::Cloaked,
            server_path,
            local_path: None,
        }
    }

    pub fn is_cloaked(&self) -> bool {
        self.status == WorkingFolderStatus::Cloaked
    }
}

/// 工作区信息：名称、所有者与有序的工作目录映射
///
/// 映射解析始终取最深（最长前缀）匹配；查询操作不会改变映射，
/// 只有 `set_working_folders` 这一重配置入口会产生变更。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub owner_name: String,
    pub computer: String,
    pub comment: String,
    /// 所属服务器地址
    pub server_uri: String,
    working_folders: Vec<WorkingFolder>,
    /// 最近一次从服务端加载/重配置的时间
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceInfo {
    pub fn new(
        name: impl Into<String>,
        owner_name: impl Into<String>,
        computer: impl Into<String>,
        server_uri: impl Into<String>,
        working_folders: Vec<WorkingFolder>,
    ) -> PathResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PathError::InvalidPath(
                "workspace name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            owner_name: owner_name.into(),
            computer: computer.into(),
            comment: String::new(),
            server_uri: server_uri.into(),
            working_folders,
            updated_at: Utc::now(),
        })
    }

    pub fn working_folders(&self) -> &[WorkingFolder] {
        &self.working_folders
    }

    /// 重配置入口：整体替换映射集
    pub fn set_working_folders(&mut self, working_folders: Vec<WorkingFolder>) {
        tracing::debug!(
            workspace = %self.name,
            folders = working_folders.len(),
            "working folders reconfigured"
        );
        self.working_folders = working_folders;
        self.updated_at = Utc::now();
    }

    /// 当前凭据用户是否为工作区所有者（大小写不敏感的限定名比较）
    pub fn is_owned_by(&self, qualified_username: &str) -> bool {
        self.owner_name.eq_ignore_ascii_case(qualified_username)
    }

    /// 本地路径 → 服务器路径，最深映射优先；未映射返回 None
    pub fn map_to_server_path(&self, local_path: &LocalPath) -> Option<ServerPath> {
        let mut best: Option<(&WorkingFolder, usize)> = None;
        for folder in &self.working_folders {
            let Some(folder_local) = &folder.local_path else {
                continue;
            };
            if !folder_local.is_ancestor_or_self(local_path) {
                continue;
            }
            let depth = folder_local.depth();
            if best.is_none_or(|(_, best_depth)| depth > best_depth) {
                best = Some((folder, depth));
            }
        }
        let (folder, _) = best?;
        let relative = local_path.relative_to(folder.local_path.as_ref()?)?;
        let candidate = folder.server_path.join(relative);
        if self.is_cloaked(&candidate) {
            return None;
        }
        Some(candidate)
    }

    /// 服务器路径 → 本地路径，最深映射优先；未映射或被 cloak 返回 None
    pub fn map_to_local_path(&self, server_path: &ServerPath) -> Option<LocalPath> {
        if self.is_cloaked(server_path) {
            return None;
        }
        let mut best: Option<&WorkingFolder> = None;
        for folder in &self.working_folders {
            if folder.is_cloaked() || !folder.server_path.is_ancestor_or_self(server_path) {
                continue;
            }
            if best.is_none_or(|b| folder.server_path.depth() > b.server_path.depth()) {
                best = Some(folder);
            }
        }
        let folder = best?;
        let relative = server_path.relative_to(&folder.server_path)?;
        Some(folder.local_path.as_ref()?.join(relative))
    }

    /// 服务器路径是否落在某条 cloak 映射之下
    ///
    /// cloak 仅在比覆盖它的 active 映射更深时才生效。
    fn is_cloaked(&self, server_path: &ServerPath) -> bool {
        let deepest_active = self
            .working_folders
            .iter()
            .filter(|f| !f.is_cloaked() && f.server_path.is_ancestor_or_self(server_path))
            .map(|f| f.server_path.depth())
            .max();
        let deepest_cloak = self
            .working_folders
            .iter()
            .filter(|f| f.is_cloaked() && f.server_path.is_ancestor_or_self(server_path))
            .map(|f| f.server_path.depth())
            .max();
        match (deepest_active, deepest_cloak) {
            (Some(active), Some(cloak)) => cloak > active,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}
