//! 两阶段 NTLM 协商与原生认证回退。
//!
//! phase 1 在无先验状态下产出 Type-1；phase 2 消费服务端的 Type-2
//! 挑战并产出 Type-3。请求原生 OS 认证时绕过显式用户名/密码，委托给
//! `NativeAuthProvider` 协作者；不可用或 I/O 失败时降级而非失败，
//! 以可区分的 `AuthOutcome::NativeUnavailable` 返回。

pub mod ntlm;

use crate::credentials::Credentials;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ntlm::{NtlmError, Type1Message, Type2Message, Type3Message};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("malformed authenticate challenge header: {0}")]
    MalformedChallenge(String),

    #[error(transparent)]
    Ntlm(#[from] NtlmError),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// HTTP 认证方案名
pub const NTLM_SCHEME: &str = "NTLM";

/// 一次协商阶段的产出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// 可直接附到请求上的 `Authorization` 头
    Header(String),
    /// 原生认证不可用（I/O 失败或平台不支持）；调用方应改用显式凭据重试
    NativeUnavailable,
}

/// 操作系统原生认证序列的协作者接口
///
/// `step(None)` 产出首报文，`step(Some(challenge))` 消费服务端挑战。
/// 实现方返回 I/O 错误时整个原生路径按不可用处理，不会中断认证流程。
pub trait NativeAuthProvider {
    fn step(&mut self, challenge: Option<&[u8]>) -> std::io::Result<Vec<u8>>;
}

/// 恒定不可用的占位实现（非 Windows 平台默认）
pub struct NoNativeAuth;

impl NativeAuthProvider for NoNativeAuth {
    fn step(&mut self, _challenge: Option<&[u8]>) -> std::io::Result<Vec<u8>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "native OS authentication sequence not available",
        ))
    }
}

/// NTLM 认证器：持有凭据与可选的原生认证序列
pub struct NtlmAuthenticator {
    credentials: Credentials,
    workstation: String,
    native: Option<Box<dyn NativeAuthProvider + Send>>,
}

impl NtlmAuthenticator {
    pub fn new(credentials: Credentials, workstation: impl Into<String>) -> Self {
        Self {
            credentials,
            workstation: workstation.into(),
            native: None,
        }
    }

    /// 挂接原生认证序列实现
    pub fn with_native_provider(
        mut self,
        provider: Box<dyn NativeAuthProvider + Send>,
    ) -> Self {
        self.native = Some(provider);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// phase 1：产出 Type-1 协商头
    pub fn initiate(&mut self) -> AuthResult<AuthOutcome> {
        if self.credentials.use_native {
            return Ok(self.native_step(None));
        }
        let message = Type1Message::new(self.credentials.domain.clone(), self.workstation.clone());
        Ok(AuthOutcome::Header(encode_header(&message.encode())))
    }

    /// phase 2：消费 `WWW-Authenticate: NTLM <base64>` 挑战，产出 Type-3 应答头
    pub fn respond(&mut self, challenge_header: &str) -> AuthResult<AuthOutcome> {
        let token = parse_challenge_header(challenge_header)?;
        if self.credentials.use_native {
            return Ok(self.native_step(Some(&token)));
        }
        let challenge = Type2Message::parse(&token)?;
        let message = Type3Message::build(
            &self.credentials.user_name,
            &self.credentials.domain,
            self.credentials.password.as_deref(),
            &self.workstation,
            &challenge,
        )?;
        Ok(AuthOutcome::Header(encode_header(&message.encode())))
    }

    /// 原生路径：I/O 失败降级为 `NativeUnavailable`，绝不让认证路径崩溃
    fn native_step(&mut self, challenge: Option<&[u8]>) -> AuthOutcome {
        let Some(provider) = self.native.as_mut() else {
            return AuthOutcome::NativeUnavailable;
        };
        match provider.step(challenge) {
            Ok(token) => AuthOutcome::Header(encode_header(&token)),
            Err(e) => {
                tracing::warn!(error = %e, "native auth sequence failed, degrading");
                AuthOutcome::NativeUnavailable
            }
        }
    }
}

fn encode_header(token: &[u8]) -> String {
    format!("{} {}", NTLM_SCHEME, BASE64.encode(token))
}

/// 从 `WWW-Authenticate` 头中取出 base64 挑战
fn parse_challenge_header(header: &str) -> AuthResult<Vec<u8>> {
    let rest = header
        .trim()
        .strip_prefix(NTLM_SCHEME)
        .ok_or_else(|| AuthError::MalformedChallenge(header.to_string()))?
        .trim();
    if rest.is_empty() {
        return Err(AuthError::MalformedChallenge(header.to_string()));
    }
    BASE64
        .decode(rest)
        .map_err(|e| AuthError::MalformedChallenge(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explicit_credentials() -> Credentials {
        Credentials::new("alice", "CORP", Some("secret".into()))
    }

    #[test]
    fn initiate_produces_type1_header() {
        let mut auth = NtlmAuthenticator::new(explicit_credentials(), "devbox");
        let AuthOutcome::Header(header) = auth.initiate().unwrap() else {
            panic!("expected header");
        };
        let token = parse_challenge_header(&header).unwrap();
        assert_eq!(&token[..8], b"NTLMSSP\0");
        assert_eq!(token[8], 1);
    }

    #[test]
    fn respond_produces_type3_header() {
        // 最小合法 Type-2（无 target name / info）
        let mut type2 = Vec::new();
        type2.extend_from_slice(b"NTLMSSP\0");
        type2.extend_from_slice(&2u32.to_le_bytes());
        type2.extend_from_slice(&[0u8; 8]); // target name field
        type2.extend_from_slice(&1u32.to_le_bytes()); // unicode flag
        type2.extend_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]);
        let header = format!("NTLM {}", BASE64.encode(&type2));

        let mut auth = NtlmAuthenticator::new(explicit_credentials(), "devbox");
        let AuthOutcome::Header(response) = auth.respond(&header).unwrap() else {
            panic!("expected header");
        };
        let token = parse_challenge_header(&response).unwrap();
        assert_eq!(token[8], 3);
    }

    #[test]
    fn respond_without_password_fails_fast() {
        let mut auth =
            NtlmAuthenticator::new(Credentials::new("alice", "CORP", None), "devbox");
        let mut type2 = Vec::new();
        type2.extend_from_slice(b"NTLMSSP\0");
        type2.extend_from_slice(&2u32.to_le_bytes());
        type2.extend_from_slice(&[0u8; 20]);
        type2.extend_from_slice(&[0u8; 4]);
        let header = format!("NTLM {}", BASE64.encode(&type2));
        assert!(matches!(
            auth.respond(&header),
            Err(AuthError::Ntlm(NtlmError::MissingPassword))
        ));
    }

    #[test]
    fn native_io_failure_degrades_to_unavailable() {
        struct Broken;
        impl NativeAuthProvider for Broken {
            fn step(&mut self, _: Option<&[u8]>) -> std::io::Result<Vec<u8>> {
                Err(std::io::Error::other("sspi sequence exploded"))
            }
        }
        let mut auth = NtlmAuthenticator::new(Credentials::native(), "devbox")
            .with_native_provider(Box::new(Broken));
        assert_eq!(auth.initiate().unwrap(), AuthOutcome::NativeUnavailable);
    }

    #[test]
    fn native_without_provider_is_unavailable() {
        let mut auth = NtlmAuthenticator::new(Credentials::native(), "devbox");
        assert_eq!(auth.initiate().unwrap(), AuthOutcome::NativeUnavailable);
    }

    #[test]
    fn native_provider_token_is_wrapped() {
        struct Fixed;
        impl NativeAuthProvider for Fixed {
            fn step(&mut self, _: Option<&[u8]>) -> std::io::Result<Vec<u8>> {
                Ok(b"platform-token".to_vec())
            }
        }
        let mut auth = NtlmAuthenticator::new(Credentials::native(), "devbox")
            .with_native_provider(Box::new(Fixed));
        let AuthOutcome::Header(header) = auth.initiate().unwrap() else {
            panic!("expected header");
        };
        assert!(header.starts_with("NTLM "));
    }

    #[test]
    fn malformed_challenge_is_rejected() {
        let mut auth = NtlmAuthenticator::new(explicit_credentials(), "devbox");
        assert!(matches!(
            auth.respond("Negotiate abc"),
            Err(AuthError::MalformedChallenge(_))
        ));
        assert!(matches!(
            auth.respond("NTLM"),
            Err(AuthError::MalformedChallenge(_))
        ));
        assert!(matches!(
            auth.respond("NTLM !!!not-base64!!!"),
            Err(AuthError::MalformedChallenge(_))
        ));
    }
}
