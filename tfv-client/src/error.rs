use crate::auth::AuthError;
use crate::content_store::ContentStoreError;
use crate::soap::{SoapError, SoapFault};
use thiserror::Error;

/// TFS fault subcode 的已知取值
///
/// 服务端把具体异常类型放在 SOAP fault 的 subcode 里。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultSubcode {
    ItemNotFound,
    WorkspaceNotFound,
    InvalidPath,
    IdentityNotFound,
    IllegalIdentity,
    Other(String),
}

impl FaultSubcode {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "ItemNotFoundException" => Self::ItemNotFound,
            "WorkspaceNotFoundException" => Self::WorkspaceNotFound,
            "InvalidPathException" => Self::InvalidPath,
            "IdentityNotFoundException" => Self::IdentityNotFound,
            "IllegalIdentityException" => Self::IllegalIdentity,
            other => Self::Other(other.to_string()),
        }
    }
}

/// 客户端错误分类
///
/// - 正常的“不存在”（未纳入版本控制、无映射）以 `Option`/哨兵表示，不走这里；
/// - 传输失败与认证失败分开，调用方据此决定重试还是重新询问凭据；
/// - 核心不做重试，超时由 HTTP 客户端配置并以 `Transport` 上抛。
#[derive(Debug, Error)]
pub enum TfsError {
    #[error("transport failure during {operation} against {server_uri}: {source}")]
    Transport {
        server_uri: String,
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("authentication rejected by {server_uri}")]
    Unauthorized { server_uri: String },

    #[error("native OS authentication unavailable for {server_uri}")]
    NativeAuthUnavailable { server_uri: String },

    #[error("server fault during {operation}: {fault_string}")]
    Fault {
        operation: &'static str,
        subcode: FaultSubcode,
        fault_string: String,
    },

    #[error("{operation} failed with HTTP {status} from {server_uri}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        server_uri: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Soap(#[from] SoapError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    ContentStore(#[from] ContentStoreError),

    #[error(transparent)]
    Path(#[from] tfv_core::path::PathError),

    #[error(transparent)]
    Version(#[from] tfv_core::version::VersionSpecError),
}

pub type TfsResult<T> = Result<T, TfsError>;

impl TfsError {
    /// 由 SOAP fault 构造类型化错误
    pub fn from_fault(operation: &'static str, fault: SoapFault) -> Self {
        let subcode = fault
            .subcode
            .as_deref()
            .map(FaultSubcode::from_wire)
            .unwrap_or_else(|| FaultSubcode::Other(fault.code.clone()));
        Self::Fault {
            operation,
            subcode,
            fault_string: fault.fault_string,
        }
    }

    /// 认证失败与其他错误区分，UI 据此重新弹出登录
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::NativeAuthUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcode_mapping() {
        assert_eq!(
            FaultSubcode::from_wire("ItemNotFoundException"),
            FaultSubcode::ItemNotFound
        );
        assert_eq!(
            FaultSubcode::from_wire("SomethingElse"),
            FaultSubcode::Other("SomethingElse".to_string())
        );
    }

    #[test]
    fn fault_conversion() {
        let fault = SoapFault {
            code: "Sender".to_string(),
            subcode: Some("WorkspaceNotFoundException".to_string()),
            fault_string: "workspace ws1 not found".to_string(),
        };
        let err = TfsError::from_fault("QueryItems", fault);
        match err {
            TfsError::Fault {
                subcode, operation, ..
            } => {
                assert_eq!(subcode, FaultSubcode::WorkspaceNotFound);
                assert_eq!(operation, "QueryItems");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn auth_failures_are_distinguishable() {
        let unauthorized = TfsError::Unauthorized {
            server_uri: "http://tfs".to_string(),
        };
        assert!(unauthorized.is_auth_failure());
        let fault = TfsError::InvalidInput("x".to_string());
        assert!(!fault.is_auth_failure());
    }
}
