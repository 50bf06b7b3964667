//! SOAP 1.1 envelope 构造与应答解析。
//!
//! 请求侧用 quick-xml 事件流写出 envelope；应答侧将 Fault 解析为
//! 带 subcode 的类型化错误，供上层映射到错误分类。

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;
use thiserror::Error;

/// SOAP 1.1 命名空间
pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
/// TFS 版本控制服务命名空间
pub const TFS_VC_NS: &str =
    "http://schemas.microsoft.com/TeamFoundation/2005/06/VersionControl/ClientServices/03";

#[derive(Error, Debug)]
pub enum SoapError {
    #[error("failed to write SOAP envelope: {0}")]
    Write(#[from] quick_xml::Error),

    #[error("failed to write SOAP envelope: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed SOAP response: {0}")]
    Malformed(String),
}

pub type SoapResult<T> = Result<T, SoapError>;

/// 服务端 SOAP Fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    pub code: String,
    /// TFS 在 subcode 里携带具体异常类型（如 `ItemNotFoundException`）
    pub subcode: Option<String>,
    pub fault_string: String,
}

/// 构造完整 envelope：`body` 回调负责写出操作元素
pub fn build_envelope<F>(operation: &str, body: F) -> SoapResult<String>
where
    F: FnOnce(&mut Writer<Cursor<Vec<u8>>>) -> SoapResult<()>,
{
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut envelope = BytesStart::new("soap:Envelope");
    envelope.push_attribute(("xmlns:soap", SOAP_ENV_NS));
    envelope.push_attribute(("xmlns:xsi", XSI_NS));
    envelope.push_attribute(("xmlns:xsd", XSD_NS));
    writer.write_event(Event::Start(envelope))?;
    writer.write_event(Event::Start(BytesStart::new("soap:Body")))?;

    let mut op = BytesStart::new(operation);
    op.push_attribute(("xmlns", TFS_VC_NS));
    writer.write_event(Event::Start(op))?;
    body(&mut writer)?;
    writer.write_event(Event::End(BytesEnd::new(operation)))?;

    writer.write_event(Event::End(BytesEnd::new("soap:Body")))?;
    writer.write_event(Event::End(BytesEnd::new("soap:Envelope")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| SoapError::Malformed(e.to_string()))
}

/// 写一个纯文本子元素
pub fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> SoapResult<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// 应答中若包含 Fault 元素则解析之；正常应答返回 None
pub fn parse_fault(xml: &str) -> SoapResult<Option<SoapFault>> {
    let mut reader = Reader::from_str(xml);
    let mut in_fault = false;
    let mut current: Option<String> = None;
    let mut code = String::new();
    let mut subcode = None;
    let mut fault_string = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let qname = e.name();
                let name = local_name(qname.as_ref());
                if name == "Fault" {
                    in_fault = true;
                } else if in_fault {
                    current = Some(name.to_string());
                }
            }
            Ok(Event::Text(t)) if in_fault => {
                let text = t
                    .unescape()
                    .map_err(|e| SoapError::Malformed(e.to_string()))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match current.as_deref() {
                    // SOAP 1.1 faultcode / 1.2 Value 均归入 code，后出现的是 subcode
                    Some("faultcode") | Some("Value") => {
                        if code.is_empty() {
                            code = strip_ns_prefix(text).to_string();
                        } else if subcode.is_none() {
                            subcode = Some(strip_ns_prefix(text).to_string());
                        }
                    }
                    Some("faultstring") | Some("Text") | Some("Reason") => {
                        fault_string = text.to_string();
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()) == "Fault" {
                    return Ok(Some(SoapFault {
                        code,
                        subcode,
                        fault_string,
                    }));
                }
                current = None;
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(SoapError::Malformed(e.to_string())),
            _ => {}
        }
    }
}

/// 收集应答中指定名字的全部元素的属性集
pub fn collect_element_attributes(
    xml: &str,
    element: &str,
) -> SoapResult<Vec<Vec<(String, String)>>> {
    let mut reader = Reader::from_str(xml);
    let mut result = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if local_name(e.name().as_ref()) == element {
                    let mut attrs = Vec::new();
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = attr
                            .unescape_value()
                            .map_err(|e| SoapError::Malformed(e.to_string()))?
                            .into_owned();
                        attrs.push((key, value));
                    }
                    result.push(attrs);
                }
            }
            Ok(Event::Eof) => return Ok(result),
            Err(e) => return Err(SoapError::Malformed(e.to_string())),
            _ => {}
        }
    }
}

/// 取应答中第一个指定元素的文本内容
pub fn first_element_text(xml: &str, element: &str) -> SoapResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if local_name(e.name().as_ref()) == element => inside = true,
            Ok(Event::Text(t)) if inside => {
                let chunk = t
                    .unescape()
                    .map_err(|e| SoapError::Malformed(e.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::End(e)) if local_name(e.name().as_ref()) == element => {
                return Ok(Some(text));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(SoapError::Malformed(e.to_string())),
            _ => {}
        }
    }
}

fn local_name(raw: &[u8]) -> &str {
    let name = std::str::from_utf8(raw).unwrap_or("");
    name.rsplit(':').next().unwrap_or(name)
}

fn strip_ns_prefix(value: &str) -> &str {
    value.rsplit(':').next().unwrap_or(value)
}
