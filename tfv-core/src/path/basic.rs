use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Syntax error: {0}")]
    SyntaxError(String),

    #[error("Invalid path format: {0}")]
    InvalidPath(String),
}

pub type PathResult<T> = Result<T, PathError>;

// 路径段中的非法字符集合（TFVC 服务端保留字符）
const ILLEGAL_CHARS: &str = r#""|<>*?:"#;

/// 验证单个路径段：不允许为空、不允许保留字符、不允许以空白结尾
fn validate_segment(s: &str) -> PathResult<()> {
    if s.is_empty() {
        return Err(PathError::SyntaxError(
            "Empty path segment not allowed".to_string(),
        ));
    }
    if let Some(illegal_char) = s.chars().find(|c| ILLEGAL_CHARS.contains(*c)) {
        return Err(PathError::InvalidPath(format!(
            "Path segment '{}' contains illegal character '{}'",
            s, illegal_char
        )));
    }
    if s.chars().next_back().is_some_and(|c| c.is_whitespace()) {
        return Err(PathError::InvalidPath(format!(
            "Path segment '{}' cannot end with whitespace",
            s
        )));
    }
    Ok(())
}

/// 服务器仓库路径，以 `$/` 为根
///
/// 内部存储为路径段序列，根路径 `$/` 对应空序列。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerPath {
    segments: Vec<String>,
}

impl ServerPath {
    pub const ROOT_PREFIX: &'static str = "$/";

    /// 仓库根路径 `$/`
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// 解析 `$/team/project/file.txt` 形式的服务器路径
    pub fn parse(input: &str) -> PathResult<Self> {
        let rest = input.strip_prefix(Self::ROOT_PREFIX).ok_or_else(|| {
            PathError::SyntaxError(format!(
                "Server path '{}' must start with '{}'",
                input,
                Self::ROOT_PREFIX
            ))
        })?;
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for segment in rest.split('/') {
            validate_segment(segment)?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 路径深度，根路径为 0
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// 严格祖先判断（不含自身）
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    pub fn is_ancestor_or_self(&self, other: &Self) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// 若 `ancestor` 覆盖本路径，返回剩余的相对路径段
    pub fn relative_to(&self, ancestor: &Self) -> Option<&[String]> {
        if ancestor.is_ancestor_or_self(self) {
            Some(&self.segments[ancestor.segments.len()..])
        } else {
            None
        }
    }

    /// 在当前路径下追加相对路径段
    pub fn join(&self, relative: &[String]) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(relative.iter().cloned());
        Self { segments }
    }
}

impl fmt::Display for ServerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "$/");
        }
        write!(f, "$/{}", self.segments.join("/"))
    }
}

/// 本地绝对路径
///
/// 统一按 `/` 段存储，接受 `\` 作为输入分隔符，显示时使用 `/`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPath {
    segments: Vec<String>,
}

impl LocalPath {
    /// 解析绝对本地路径（`/home/user/src` 或 `C:\src` 风格）
    pub fn parse(input: &str) -> PathResult<Self> {
        let normalized = input.replace('\\', "/");
        let rest = if let Some(rest) = normalized.strip_prefix('/') {
            rest
        } else if normalized
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && normalized[1..].starts_with(":/")
        {
            // 盘符开头的 Windows 路径，盘符作为第一个路径段保留
            &normalized
        } else {
            return Err(PathError::SyntaxError(format!(
                "Local path '{}' must be absolute",
                input
            )));
        };
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Err(PathError::InvalidPath(
                "Local path must not be a bare filesystem root".to_string(),
            ));
        }
        let mut segments = Vec::new();
        for segment in rest.split('/') {
            if segment.is_empty() {
                return Err(PathError::SyntaxError(format!(
                    "Local path '{}' contains an empty segment",
                    input
                )));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    pub fn is_ancestor_or_self(&self, other: &Self) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    pub fn relative_to(&self, ancestor: &Self) -> Option<&[String]> {
        if ancestor.is_ancestor_or_self(self) {
            Some(&self.segments[ancestor.segments.len()..])
        } else {
            None
        }
    }

    pub fn join(&self, relative: &[String]) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(relative.iter().cloned());
        Self { segments }
    }
}

impl fmt::Display for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 盘符段自带 `:`，不重复加前导 `/`
        if self
            .segments
            .first()
            .is_some_and(|s| s.len() == 2 && s.ends_with(':'))
        {
            write!(f, "{}", self.segments.join("/"))
        } else {
            write!(f, "/{}", self.segments.join("/"))
        }
    }
}

/// 父目录优先的全序：祖先永远排在后代之前，兄弟之间按段名排序
///
/// 批量加锁/解锁按该顺序提交，保证文件夹先于其子项出现。
pub fn cmp_parent_first(a: &ServerPath, b: &ServerPath) -> Ordering {
    a.segments.cmp(&b.segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_server_path() {
        let path = ServerPath::parse("$/proj/sub/file.txt").unwrap();
        assert_eq!(path.segments(), ["proj", "sub", "file.txt"]);
        assert_eq!(path.to_string(), "$/proj/sub/file.txt");
        assert_eq!(path.depth(), 3);
        assert_eq!(path.file_name(), Some("file.txt"));
        assert_eq!(path.parent().unwrap().to_string(), "$/proj/sub");
    }

    #[test]
    fn parse_server_root() {
        let root = ServerPath::parse("$/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "$/");
        assert!(root.parent().is_none());
    }

    #[test]
    fn reject_malformed_server_paths() {
        assert!(ServerPath::parse("proj/file.txt").is_err());
        assert!(ServerPath::parse("$/proj//file.txt").is_err());
        assert!(ServerPath::parse("$/proj/fi*le.txt").is_err());
        assert!(ServerPath::parse("$/proj/file.txt ").is_err());
    }

    #[test]
    fn server_path_ancestry() {
        let a = ServerPath::parse("$/a").unwrap();
        let ab = ServerPath::parse("$/a/b").unwrap();
        let ax = ServerPath::parse("$/ax").unwrap();
        assert!(a.is_ancestor_of(&ab));
        assert!(!a.is_ancestor_of(&ax));
        assert!(!ab.is_ancestor_of(&a));
        assert!(a.is_ancestor_or_self(&a));
        assert_eq!(ab.relative_to(&a).unwrap(), ["b"]);
        assert!(ax.relative_to(&a).is_none());
    }

    #[test]
    fn parse_local_path() {
        let path = LocalPath::parse("/home/user/src/main.rs").unwrap();
        assert_eq!(path.to_string(), "/home/user/src/main.rs");
        let win = LocalPath::parse(r"C:\work\proj").unwrap();
        assert_eq!(win.to_string(), "C:/work/proj");
        assert!(LocalPath::parse("relative/path").is_err());
        assert!(LocalPath::parse("/").is_err());
    }

    #[test]
    fn parent_first_ordering() {
        let mut paths = vec![
            ServerPath::parse("$/a/b/c").unwrap(),
            ServerPath::parse("$/a").unwrap(),
            ServerPath::parse("$/a/b").unwrap(),
        ];
        paths.sort_by(cmp_parent_first);
        assert_eq!(paths[0].to_string(), "$/a");
        assert_eq!(paths[1].to_string(), "$/a/b");
        assert_eq!(paths[2].to_string(), "$/a/b/c");
    }
}
