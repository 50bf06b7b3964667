//! NTLM Type-1/2/3 message construction (NTLMv2 responses).
//!
//! 消息布局遵循 MS-NLMP：本实现自行构造全部报文，不依赖任何平台
//! 内部原语。挑战应答使用 NTLMv2（HMAC-MD5 over MD4 NT hash）。

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NtlmError {
    #[error("NTLM message is truncated: {0} bytes")]
    Truncated(usize),

    #[error("bad NTLMSSP signature")]
    BadSignature,

    #[error("unexpected NTLM message type: expected {expected}, got {actual}")]
    WrongMessageType { expected: u32, actual: u32 },

    #[error("credentials carry no password; cannot compute NTLMv2 response")]
    MissingPassword,
}

pub type NtlmResult<T> = Result<T, NtlmError>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

// Negotiate flags（仅列出本实现用到的位）
const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const OEM_DOMAIN_SUPPLIED: u32 = 0x0000_1000;
const OEM_WORKSTATION_SUPPLIED: u32 = 0x0000_2000;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac =
        Hmac::<Md5>::new_from_slice(key).expect("HMAC-MD5 accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// NT hash：MD4(UTF-16LE(password))
fn nt_hash(password: &str) -> [u8; 16] {
    let mut md4 = Md4::new();
    md4.update(utf16le(password));
    md4.finalize().into()
}

/// NTLMv2 hash：HMAC-MD5(NT hash, UTF-16LE(upper(user) + domain))
fn ntlmv2_hash(user: &str, domain: &str, password: &str) -> [u8; 16] {
    let identity = utf16le(&format!("{}{}", user.to_uppercase(), domain));
    hmac_md5(&nt_hash(password), &identity)
}

/// `temp` blob：版本头 + 时间戳 + 客户端挑战 + target info
fn ntlmv2_blob(timestamp: u64, client_challenge: &[u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(28 + target_info.len() + 4);
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]); // Resp/HiResp type
    blob.extend_from_slice(&[0x00; 4]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0x00; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0x00; 4]);
    blob
}

/// NTLMv2 应答：NTProofStr || blob
fn ntlmv2_response(
    ntlmv2_hash: &[u8; 16],
    server_challenge: &[u8; 8],
    blob: &[u8],
) -> Vec<u8> {
    let mut keyed = Vec::with_capacity(8 + blob.len());
    keyed.extend_from_slice(server_challenge);
    keyed.extend_from_slice(blob);
    let proof = hmac_md5(ntlmv2_hash, &keyed);
    let mut response = Vec::with_capacity(16 + blob.len());
    response.extend_from_slice(&proof);
    response.extend_from_slice(blob);
    response
}

/// LMv2 应答：HMAC-MD5(hash, server challenge || client challenge) || client challenge
fn lmv2_response(
    ntlmv2_hash: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> [u8; 24] {
    let mut keyed = [0u8; 16];
    keyed[..8].copy_from_slice(server_challenge);
    keyed[8..].copy_from_slice(client_challenge);
    let proof = hmac_md5(ntlmv2_hash, &keyed);
    let mut response = [0u8; 24];
    response[..16].copy_from_slice(&proof);
    response[16..].copy_from_slice(client_challenge);
    response
}

/// unix 秒 → Windows FILETIME（1601 纪元，100ns 单位）
fn filetime_from_unix(unix_secs: i64) -> u64 {
    ((unix_secs + 11_644_473_600) as u64) * 10_000_000
}

/// security buffer 描述符：len / maxlen / offset
fn push_field(buf: &mut Vec<u8>, len: usize, offset: usize) {
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&(offset as u32).to_le_bytes());
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Type-1（Negotiate）：无先验状态，携带可选的 OEM 域与工作站名
#[derive(Debug, Clone)]
pub struct Type1Message {
    pub domain: String,
    pub workstation: String,
}

impl Type1Message {
    pub fn new(domain: impl Into<String>, workstation: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            workstation: workstation.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let domain = self.domain.to_uppercase();
        let workstation = self.workstation.to_uppercase();
        let mut flags = NEGOTIATE_UNICODE
            | NEGOTIATE_OEM
            | REQUEST_TARGET
            | NEGOTIATE_NTLM
            | NEGOTIATE_ALWAYS_SIGN
            | NEGOTIATE_EXTENDED_SESSIONSECURITY;
        if !domain.is_empty() {
            flags |= OEM_DOMAIN_SUPPLIED;
        }
        if !workstation.is_empty() {
            flags |= OEM_WORKSTATION_SUPPLIED;
        }

        let header_len = 32;
        let domain_offset = header_len;
        let workstation_offset = domain_offset + domain.len();

        let mut buf = Vec::with_capacity(workstation_offset + workstation.len());
        buf.extend_from_slice(SIGNATURE);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        push_field(&mut buf, domain.len(), domain_offset);
        push_field(&mut buf, workstation.len(), workstation_offset);
        buf.extend_from_slice(domain.as_bytes());
        buf.extend_from_slice(workstation.as_bytes());
        buf
    }
}

/// Type-2（Challenge）：服务端挑战 + target info
#[derive(Debug, Clone)]
pub struct Type2Message {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_name: Option<String>,
    pub target_info: Vec<u8>,
}

impl Type2Message {
    pub fn parse(data: &[u8]) -> NtlmResult<Self> {
        if data.len() < 32 {
            return Err(NtlmError::Truncated(data.len()));
        }
        if &data[..8] != SIGNATURE {
            return Err(NtlmError::BadSignature);
        }
        let message_type = read_u32(data, 8);
        if message_type != 2 {
            return Err(NtlmError::WrongMessageType {
                expected: 2,
                actual: message_type,
            });
        }
        let flags = read_u32(data, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&data[24..32]);

        let target_name = {
            let len = read_u16(data, 12) as usize;
            let offset = read_u32(data, 16) as usize;
            if len > 0 && offset + len <= data.len() {
                let raw = &data[offset..offset + len];
                if flags & NEGOTIATE_UNICODE != 0 {
                    let units: Vec<u16> = raw
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]]))
                        .collect();
                    Some(String::from_utf16_lossy(&units))
                } else {
                    Some(String::from_utf8_lossy(raw).into_owned())
                }
            } else {
                None
            }
        };

        // target info 字段仅在较长的消息中存在
        let target_info = if data.len() >= 48 {
            let len = read_u16(data, 40) as usize;
            let offset = read_u32(data, 44) as usize;
            if len > 0 && offset + len <= data.len() {
                data[offset..offset + len].to_vec()
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_name,
            target_info,
        })
    }
}

/// Type-3（Authenticate）：NTLMv2 + LMv2 应答
#[derive(Debug, Clone)]
pub struct Type3Message {
    domain: String,
    user: String,
    workstation: String,
    lm_response: Vec<u8>,
    nt_response: Vec<u8>,
    flags: u32,
}

impl Type3Message {
    /// 由凭据与服务端挑战构造；时间与客户端挑战取自当前环境
    pub fn build(
        user: &str,
        domain: &str,
        password: Option<&str>,
        workstation: &str,
        challenge: &Type2Message,
    ) -> NtlmResult<Self> {
        let password = password.ok_or(NtlmError::MissingPassword)?;
        let mut client_challenge = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut client_challenge);
        let timestamp = filetime_from_unix(chrono::Utc::now().timestamp());
        Ok(Self::build_with(
            user,
            domain,
            password,
            workstation,
            challenge,
            timestamp,
            client_challenge,
        ))
    }

    /// 确定性构造入口，供测试注入时间与客户端挑战
    fn build_with(
        user: &str,
        domain: &str,
        password: &str,
        workstation: &str,
        challenge: &Type2Message,
        timestamp: u64,
        client_challenge: [u8; 8],
    ) -> Self {
        let hash = ntlmv2_hash(user, domain, password);
        let blob = ntlmv2_blob(timestamp, &client_challenge, &challenge.target_info);
        let nt_response = ntlmv2_response(&hash, &challenge.server_challenge, &blob);
        let lm_response =
            lmv2_response(&hash, &challenge.server_challenge, &client_challenge).to_vec();
        Self {
            domain: domain.to_string(),
            user: user.to_string(),
            workstation: workstation.to_string(),
            lm_response,
            nt_response,
            flags: NEGOTIATE_UNICODE | NEGOTIATE_NTLM | NEGOTIATE_ALWAYS_SIGN,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let domain = utf16le(&self.domain);
        let user = utf16le(&self.user);
        let workstation = utf16le(&self.workstation);

        let header_len = 64;
        let domain_offset = header_len;
        let user_offset = domain_offset + domain.len();
        let workstation_offset = user_offset + user.len();
        let lm_offset = workstation_offset + workstation.len();
        let nt_offset = lm_offset + self.lm_response.len();
        let session_key_offset = nt_offset + self.nt_response.len();

        let mut buf = Vec::with_capacity(session_key_offset);
        buf.extend_from_slice(SIGNATURE);
        buf.extend_from_slice(&3u32.to_le_bytes());
        push_field(&mut buf, self.lm_response.len(), lm_offset);
        push_field(&mut buf, self.nt_response.len(), nt_offset);
        push_field(&mut buf, domain.len(), domain_offset);
        push_field(&mut buf, user.len(), user_offset);
        push_field(&mut buf, workstation.len(), workstation_offset);
        push_field(&mut buf, 0, session_key_offset); // 不协商 session key
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&domain);
        buf.extend_from_slice(&user);
        buf.extend_from_slice(&workstation);
        buf.extend_from_slice(&self.lm_response);
        buf.extend_from_slice(&self.nt_response);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // MS-NLMP 4.2 官方测试向量：User/Domain/Password
    const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
    const CLIENT_CHALLENGE: [u8; 8] = [0xaa; 8];

    fn target_info() -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(&[0x02, 0x00, 0x0c, 0x00]); // NbDomainName "Domain"
        info.extend_from_slice(&utf16le("Domain"));
        info.extend_from_slice(&[0x01, 0x00, 0x0c, 0x00]); // NbComputerName "Server"
        info.extend_from_slice(&utf16le("Server"));
        info.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // EOL
        info
    }

    #[test]
    fn nt_hash_vector() {
        assert_eq!(
            nt_hash("Password"),
            [
                0xa4, 0xf4, 0x9c, 0x40, 0x65, 0x10, 0xbd, 0xca, 0xb6, 0x82, 0x4e, 0xe7, 0xc3,
                0x0f, 0xd8, 0x52
            ]
        );
    }

    #[test]
    fn ntlmv2_hash_vector() {
        assert_eq!(
            ntlmv2_hash("User", "Domain", "Password"),
            [
                0x0c, 0x86, 0x8a, 0x40, 0x3b, 0xfd, 0x7a, 0x93, 0xa3, 0x00, 0x1e, 0xf2, 0x2e,
                0xf0, 0x2e, 0x3f
            ]
        );
    }

    #[test]
    fn nt_proof_vector() {
        let hash = ntlmv2_hash("User", "Domain", "Password");
        let blob = ntlmv2_blob(0, &CLIENT_CHALLENGE, &target_info());
        let response = ntlmv2_response(&hash, &SERVER_CHALLENGE, &blob);
        assert_eq!(
            &response[..16],
            [
                0x68, 0xcd, 0x0a, 0xb8, 0x51, 0xe5, 0x1c, 0x96, 0xaa, 0xbc, 0x92, 0x7b, 0xeb,
                0xef, 0x6a, 0x1c
            ]
        );
    }

    #[test]
    fn lmv2_vector() {
        let hash = ntlmv2_hash("User", "Domain", "Password");
        let response = lmv2_response(&hash, &SERVER_CHALLENGE, &CLIENT_CHALLENGE);
        assert_eq!(
            &response[..16],
            [
                0x86, 0xc3, 0x50, 0x97, 0xac, 0x9c, 0xec, 0x10, 0x25, 0x54, 0x76, 0x4a, 0x57,
                0xcc, 0xcc, 0x19
            ]
        );
        assert_eq!(&response[16..], CLIENT_CHALLENGE);
    }

    #[test]
    fn type1_encodes_signature_and_type() {
        let encoded = Type1Message::new("CORP", "DEVBOX").encode();
        assert_eq!(&encoded[..8], b"NTLMSSP\0");
        assert_eq!(read_u32(&encoded, 8), 1);
        // payload 按 offset 可寻址
        let domain_len = read_u16(&encoded, 16) as usize;
        let domain_offset = read_u32(&encoded, 20) as usize;
        assert_eq!(&encoded[domain_offset..domain_offset + domain_len], b"CORP");
    }

    #[test]
    fn type2_parse_roundtrip() {
        // 手工构造一个带 target info 的 Type-2
        let info = target_info();
        let name = utf16le("DOMAIN");
        let mut msg = Vec::new();
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&2u32.to_le_bytes());
        push_field(&mut msg, name.len(), 56);
        msg.extend_from_slice(&NEGOTIATE_UNICODE.to_le_bytes());
        msg.extend_from_slice(&SERVER_CHALLENGE);
        msg.extend_from_slice(&[0u8; 8]); // reserved
        push_field(&mut msg, info.len(), 56 + name.len());
        msg.extend_from_slice(&[0u8; 8]); // version
        msg.extend_from_slice(&name);
        msg.extend_from_slice(&info);

        let parsed = Type2Message::parse(&msg).unwrap();
        assert_eq!(parsed.server_challenge, SERVER_CHALLENGE);
        assert_eq!(parsed.target_name.as_deref(), Some("DOMAIN"));
        assert_eq!(parsed.target_info, info);
    }

    #[test]
    fn type2_rejects_garbage() {
        assert!(matches!(
            Type2Message::parse(b"short"),
            Err(NtlmError::Truncated(5))
        ));
        let mut msg = vec![0u8; 40];
        msg[..8].copy_from_slice(b"NOTNTLM\0");
        assert!(matches!(
            Type2Message::parse(&msg),
            Err(NtlmError::BadSignature)
        ));
        let mut msg = vec![0u8; 40];
        msg[..8].copy_from_slice(SIGNATURE);
        msg[8] = 3;
        assert!(matches!(
            Type2Message::parse(&msg),
            Err(NtlmError::WrongMessageType { .. })
        ));
    }

    #[test]
    fn type3_encodes_all_payloads() {
        let challenge = Type2Message {
            flags: NEGOTIATE_UNICODE,
            server_challenge: SERVER_CHALLENGE,
            target_name: None,
            target_info: target_info(),
        };
        let msg = Type3Message::build_with(
            "User",
            "Domain",
            "Password",
            "Workstation",
            &challenge,
            0,
            CLIENT_CHALLENGE,
        );
        let encoded = msg.encode();
        assert_eq!(&encoded[..8], b"NTLMSSP\0");
        assert_eq!(read_u32(&encoded, 8), 3);
        // NT response 描述符指向 NTProofStr
        let nt_offset = read_u32(&encoded, 24) as usize;
        assert_eq!(encoded[nt_offset], 0x68);
        // user payload 为 UTF-16LE
        let user_offset = read_u32(&encoded, 40) as usize;
        let user_len = read_u16(&encoded, 36) as usize;
        assert_eq!(&encoded[user_offset..user_offset + user_len], utf16le("User"));
    }
}
