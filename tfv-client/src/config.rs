use serde::{Deserialize, Serialize};
use url::Url;

/// 连接配置
///
/// 超时到期由 HTTP 客户端触发，按传输失败上抛；本层不做重试。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub server_uri: Url,

    /// 请求超时（秒），0 表示不限
    pub timeout_secs: u64,

    /// 接受自签名证书（测试服务器用）
    pub accept_invalid_certs: bool,

    /// NTLM 握手里上报的工作站名，缺省取主机名
    pub workstation: Option<String>,
}

impl ConnectionConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn new(server_uri: Url) -> Self {
        Self {
            server_uri,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            accept_invalid_certs: false,
            workstation: None,
        }
    }

    pub fn workstation(&self) -> String {
        self.workstation.clone().unwrap_or_else(default_workstation)
    }
}

fn default_workstation() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "WORKSTATION".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::new("http://tfs:8080/tfs".parse().unwrap());
        assert_eq!(config.timeout_secs, ConnectionConfig::DEFAULT_TIMEOUT_SECS);
        assert!(!config.accept_invalid_certs);
        assert!(!config.workstation().is_empty());
    }

    #[test]
    fn serde_roundtrip() {
        let config = ConnectionConfig::new("https://tfs.example.com/tfs".parse().unwrap());
        let json = serde_json::to_string(&config).unwrap();
        let back: ConnectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.server_uri, config.server_uri);
        assert_eq!(back.timeout_secs, config.timeout_secs);
    }
}
