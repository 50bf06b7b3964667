use std::fs;
use std::path::PathBuf;

use std::hash::Hasher;
use tempfile::TempDir;
use thiserror::Error;
use twox_hash::XxHash64;

/// 修订内容缓存相关错误
#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ContentStoreResult<T> = Result<T, ContentStoreError>;

/// 历史修订内容的本地缓存。
///
/// - 缓存键为 (服务器 URI, 条目 ID, 修订号)，文件名
///   `<xxh64(serverUri) hex>_<itemId>.<revision>`；
/// - 没有独立索引，文件存在即视为命中；
/// - 根目录是进程级临时目录，随 store 析构尽力清除，不保证持久；
/// - 对同一 key 的并发 `create` 未定义，由调用方串行化。
#[derive(Debug)]
pub struct ContentStore {
    root: TempDir,
}

/// 指向一个缓存槽位的句柄
///
/// `find` 只对已存在的文件发句柄；`create` 发出的句柄需要 `save` 落盘。
#[derive(Debug, Clone)]
pub struct ContentStoreEntry {
    path: PathBuf,
}

impl ContentStore {
    pub fn new() -> ContentStoreResult<Self> {
        let root = TempDir::with_prefix("tfv-content-")?;
        tracing::debug!(root = %root.path().display(), "content store created");
        Ok(Self { root })
    }

    /// 由缓存键导出文件名：稳定、非加密哈希
    fn entry_path(&self, server_uri: &str, item_id: u32, revision: u32) -> PathBuf {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(server_uri.as_bytes());
        let uri_hash = hasher.finish();
        self.root
            .path()
            .join(format!("{uri_hash:016x}_{item_id}.{revision}"))
    }

    /// 查找已缓存的修订内容，不存在返回 None，绝不触发下载
    pub fn find(
        &self,
        server_uri: &str,
        item_id: u32,
        revision: u32,
    ) -> Option<ContentStoreEntry> {
        let path = self.entry_path(server_uri, item_id, revision);
        if path.exists() {
            Some(ContentStoreEntry { path })
        } else {
            None
        }
    }

    /// 为指定键创建新的缓存槽位
    pub fn create(&self, server_uri: &str, item_id: u32, revision: u32) -> ContentStoreEntry {
        ContentStoreEntry {
            path: self.entry_path(server_uri, item_id, revision),
        }
    }
}

impl ContentStoreEntry {
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn save(&self, bytes: &[u8]) -> ContentStoreResult<()> {
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    pub fn load(&self) -> ContentStoreResult<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "http://tfs.corp.example:8080/tfs";

    #[test]
    fn find_before_write_is_absent() {
        let store = ContentStore::new().unwrap();
        assert!(store.find(URI, 42, 7).is_none());
    }

    #[test]
    fn create_save_find_load_roundtrip() {
        let store = ContentStore::new().unwrap();
        let bytes = b"historic file content\x00\x01binary ok";
        store.create(URI, 42, 7).save(bytes).unwrap();

        let found = store.find(URI, 42, 7).expect("entry should exist");
        assert_eq!(found.load().unwrap(), bytes);
    }

    #[test]
    fn keys_do_not_collide_across_dimensions() {
        let store = ContentStore::new().unwrap();
        store.create(URI, 42, 7).save(b"a").unwrap();
        assert!(store.find(URI, 42, 8).is_none());
        assert!(store.find(URI, 43, 7).is_none());
        assert!(store.find("http://other.example", 42, 7).is_none());
    }

    #[test]
    fn file_name_carries_key_parts() {
        let store = ContentStore::new().unwrap();
        let entry = store.create(URI, 42, 7);
        let name = entry.path().file_name().unwrap().to_string_lossy();
        assert!(name.ends_with("_42.7"));
    }

    #[test]
    fn cleanup_on_drop_is_best_effort() {
        let path;
        {
            let store = ContentStore::new().unwrap();
            let entry = store.create(URI, 1, 1);
            entry.save(b"ephemeral").unwrap();
            path = entry.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
