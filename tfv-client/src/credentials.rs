use serde::{Deserialize, Serialize};

/// 登录身份三元组：用户名、域、密码
///
/// 仅驻留内存，持久化交给外部的凭据仓库协作者。等价性按全部字段
/// 比较（包含密码），登录时创建，会话结束即丢弃。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_name: String,
    pub domain: String,
    /// None 表示尚未提供密码
    pub password: Option<String>,
    /// 是否请求操作系统原生认证（绕过显式用户名/密码）
    pub use_native: bool,
}

impl Credentials {
    pub fn new(
        user_name: impl Into<String>,
        domain: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            domain: domain.into(),
            password,
            use_native: false,
        }
    }

    /// 从 `DOMAIN\user` 或裸用户名解析
    pub fn parse_qualified(qualified: &str, password: Option<String>) -> Self {
        match qualified.split_once('\\') {
            Some((domain, user)) => Self::new(user, domain, password),
            None => Self::new(qualified, "", password),
        }
    }

    pub fn native() -> Self {
        Self {
            user_name: String::new(),
            domain: String::new(),
            password: None,
            use_native: true,
        }
    }

    /// 限定用户名：`DOMAIN\user`，无域时为裸用户名
    pub fn qualified_username(&self) -> String {
        if self.domain.is_empty() {
            self.user_name.clone()
        } else {
            format!("{}\\{}", self.domain, self.user_name)
        }
    }

    /// 登出时清除密码
    pub fn reset_password(&mut self) {
        self.password = None;
    }
}
