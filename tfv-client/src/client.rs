//! 版本控制服务客户端。
//!
//! 所有调用都是同步阻塞的：单次请求、无内部线程、无自动重试。
//! 首个 401 触发 NTLM 握手，握手期间靠连接复用保持同一条 TCP 连接
//! （`pool_max_idle_per_host(1)`），这是 NTLM 按连接认证的硬要求。

use std::io::Cursor;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use url::Url;

use tfv_core::metadata::{BranchRelative, Changeset, ExtendedItem, ItemType, LockLevel};
use tfv_core::path::{LocalPath, ServerPath};
use tfv_core::version::VersionSpec;
use tfv_core::workspace::WorkspaceInfo;

use crate::auth::{AuthOutcome, NTLM_SCHEME, NativeAuthProvider, NtlmAuthenticator};
use crate::config::ConnectionConfig;
use crate::content_store::ContentStore;
use crate::credentials::Credentials;
use crate::error::{TfsError, TfsResult};
use crate::soap::{self, SoapError, TFS_VC_NS, build_envelope, write_text_element};

const REPOSITORY_ENDPOINT: &str = "VersionControl/v1.0/repository.asmx";
const DOWNLOAD_ENDPOINT: &str = "VersionControl/v1.0/item.asmx";

/// checkout 单条失败项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutFailure {
    /// 失败条目的服务器路径，服务端未报路径时为 None
    pub server_path: Option<ServerPath>,
    pub message: String,
}

/// checkout 结果：部分成功是常态，逐条上报
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutResult {
    pub succeeded: Vec<ServerPath>,
    pub failures: Vec<CheckoutFailure>,
}

impl CheckoutResult {
    pub fn is_fully_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct VersionControlClient {
    http: HttpClient,
    config: ConnectionConfig,
    authenticator: NtlmAuthenticator,
}

impl VersionControlClient {
    pub fn new(config: ConnectionConfig, credentials: Credentials) -> TfsResult<Self> {
        let mut builder = HttpClient::builder().pool_max_idle_per_host(1);
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build().map_err(|e| TfsError::Transport {
            server_uri: config.server_uri.to_string(),
            operation: "connect",
            source: e,
        })?;
        let authenticator = NtlmAuthenticator::new(credentials, config.workstation());
        Ok(Self {
            http,
            config,
            authenticator,
        })
    }

    /// 挂接操作系统原生认证序列（Windows SSPI 之类）
    pub fn with_native_provider(mut self, provider: Box<dyn NativeAuthProvider + Send>) -> Self {
        self.authenticator = self.authenticator.with_native_provider(provider);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        self.authenticator.credentials()
    }

    /// 查询单个条目。未纳入版本控制的路径返回 None，不是错误
    pub fn query_item(
        &mut self,
        server_path: &ServerPath,
        version: &VersionSpec,
    ) -> TfsResult<Option<ExtendedItem>> {
        let mut results = self.query_items(std::slice::from_ref(server_path), version)?;
        Ok(results.pop().flatten())
    }

    /// 批量查询，结果与请求一一对应，查不到的位置是 None
    pub fn query_items(
        &mut self,
        server_paths: &[ServerPath],
        version: &VersionSpec,
    ) -> TfsResult<Vec<Option<ExtendedItem>>> {
        if server_paths.is_empty() {
            return Ok(Vec::new());
        }
        let envelope = build_envelope("QueryItems", |w| {
            w.write_event(Event::Start(BytesStart::new("items")))?;
            for path in server_paths {
                let mut spec = BytesStart::new("ItemSpec");
                spec.push_attribute(("item", path.to_string().as_str()));
                spec.push_attribute(("recurse", "None"));
                w.write_event(Event::Empty(spec))?;
            }
            w.write_event(Event::End(BytesEnd::new("items")))?;
            write_version_element(w, "version", version)?;
            write_text_element(w, "deletedState", "NonDeleted")?;
            write_text_element(w, "itemType", "Any")?;
            Ok(())
        })?;
        let body = self.post_soap("QueryItems", envelope)?;
        let items = parse_extended_items(&body)?;
        // 服务端不保证顺序，按路径归位
        Ok(server_paths
            .iter()
            .map(|path| {
                items
                    .iter()
                    .find(|item| paths_equal(&item.server_path, path))
                    .cloned()
            })
            .collect())
    }

    pub fn query_branches(
        &mut self,
        server_path: &ServerPath,
        version: &VersionSpec,
    ) -> TfsResult<Vec<BranchRelative>> {
        let envelope = build_envelope("QueryBranches", |w| {
            w.write_event(Event::Start(BytesStart::new("items")))?;
            let mut spec = BytesStart::new("ItemSpec");
            spec.push_attribute(("item", server_path.to_string().as_str()));
            spec.push_attribute(("recurse", "None"));
            w.write_event(Event::Empty(spec))?;
            w.write_event(Event::End(BytesEnd::new("items")))?;
            write_version_element(w, "version", version)?;
            Ok(())
        })?;
        let body = self.post_soap("QueryBranches", envelope)?;
        parse_branch_relatives(&body)
    }

    /// 签出编辑：挂起 Edit 变更，不改动锁状态
    pub fn checkout(
        &mut self,
        workspace: &WorkspaceInfo,
        server_paths: &[ServerPath],
    ) -> TfsResult<CheckoutResult> {
        self.pend_changes(workspace, server_paths, "Edit", LockLevel::Unchanged)
    }

    /// 按指定级别加锁；`LockLevel::None` 即解锁
    pub fn lock_items(
        &mut self,
        workspace: &WorkspaceInfo,
        server_paths: &[ServerPath],
        lock: LockLevel,
    ) -> TfsResult<CheckoutResult> {
        self.pend_changes(workspace, server_paths, "Lock", lock)
    }

    pub fn unlock_items(
        &mut self,
        workspace: &WorkspaceInfo,
        server_paths: &[ServerPath],
    ) -> TfsResult<CheckoutResult> {
        self.lock_items(workspace, server_paths, LockLevel::None)
    }

    fn pend_changes(
        &mut self,
        workspace: &WorkspaceInfo,
        server_paths: &[ServerPath],
        request_type: &str,
        lock: LockLevel,
    ) -> TfsResult<CheckoutResult> {
        if server_paths.is_empty() {
            return Ok(CheckoutResult {
                succeeded: Vec::new(),
                failures: Vec::new(),
            });
        }
        let envelope = build_envelope("PendChanges", |w| {
            write_text_element(w, "workspaceName", &workspace.name)?;
            write_text_element(w, "ownerName", &workspace.owner_name)?;
            w.write_event(Event::Start(BytesStart::new("changes")))?;
            for path in server_paths {
                let mut request = BytesStart::new("ChangeRequest");
                request.push_attribute(("req", request_type));
                request.push_attribute(("lock", lock.as_wire()));
                w.write_event(Event::Start(request))?;
                let mut item = BytesStart::new("item");
                item.push_attribute(("item", path.to_string().as_str()));
                item.push_attribute(("recurse", "None"));
                w.write_event(Event::Empty(item))?;
                w.write_event(Event::End(BytesEnd::new("ChangeRequest")))?;
            }
            w.write_event(Event::End(BytesEnd::new("changes")))?;
            Ok(())
        })?;
        let body = self.post_soap("PendChanges", envelope)?;
        parse_checkout_result(&body)
    }

    /// 查询提交历史，最新在前
    pub fn get_history(
        &mut self,
        server_path: &ServerPath,
        version: &VersionSpec,
        limit: u32,
    ) -> TfsResult<Vec<Changeset>> {
        let envelope = build_envelope("QueryHistory", |w| {
            let mut spec = BytesStart::new("itemSpec");
            spec.push_attribute(("item", server_path.to_string().as_str()));
            spec.push_attribute(("recurse", "None"));
            w.write_event(Event::Empty(spec))?;
            write_version_element(w, "versionItem", version)?;
            write_text_element(w, "maxCount", &limit.to_string())?;
            write_text_element(w, "includeFiles", "false")?;
            Ok(())
        })?;
        let body = self.post_soap("QueryHistory", envelope)?;
        parse_changesets(&body)
    }

    /// 按条目的 `durl` 拉取内容字节
    pub fn download_item(&mut self, download_url: &str) -> TfsResult<Vec<u8>> {
        let mut url = self.endpoint_url(DOWNLOAD_ENDPOINT)?;
        url.set_query(Some(download_url));
        let http = self.http.clone();
        let response = self.send_authenticated("Download", || http.get(url.clone()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TfsError::UnexpectedStatus {
                operation: "Download",
                status: status.as_u16(),
                server_uri: self.server_uri_string(),
            });
        }
        let bytes = response.bytes().map_err(|e| self.transport("Download", e))?;
        Ok(bytes.to_vec())
    }

    /// 取指定修订的文件内容，经由内容仓缓存。
    ///
    /// 未纳入版本控制返回 None；命中缓存不触发下载。
    pub fn get_content(
        &mut self,
        store: &ContentStore,
        server_path: &ServerPath,
        version: &VersionSpec,
    ) -> TfsResult<Option<Vec<u8>>> {
        let Some(item) = self.query_item(server_path, version)? else {
            return Ok(None);
        };
        if item.item_type == ItemType::Folder {
            return Err(TfsError::InvalidInput(format!(
                "{server_path} is a folder, content download applies to files"
            )));
        }
        let revision = item.latest_version.unwrap_or(0);
        let server_uri = self.server_uri_string();
        if let Some(entry) = store.find(&server_uri, item.item_id, revision) {
            tracing::debug!(item_id = item.item_id, revision, "content cache hit");
            return Ok(Some(entry.load()?));
        }
        let download_url = item.download_url.as_deref().ok_or_else(|| {
            TfsError::Soap(SoapError::Malformed(format!(
                "item {server_path} carries no download url"
            )))
        })?;
        let bytes = self.download_item(download_url)?;
        let entry = store.create(&server_uri, item.item_id, revision);
        entry.save(&bytes)?;
        Ok(Some(bytes))
    }

    /// POST 一个 SOAP envelope，带 NTLM 握手与 Fault 解析
    fn post_soap(&mut self, operation: &'static str, envelope: String) -> TfsResult<String> {
        let url = self.endpoint_url(REPOSITORY_ENDPOINT)?;
        let action = format!("\"{TFS_VC_NS}/{operation}\"");
        let http = self.http.clone();
        let response = self.send_authenticated(operation, || {
            http.post(url.clone())
                .header(CONTENT_TYPE, "text/xml; charset=utf-8")
                .header("SOAPAction", action.clone())
                .body(envelope.clone())
        })?;
        let status = response.status();
        let text = response.text().map_err(|e| self.transport(operation, e))?;
        if let Some(fault) = soap::parse_fault(&text)? {
            return Err(TfsError::from_fault(operation, fault));
        }
        if !status.is_success() {
            return Err(TfsError::UnexpectedStatus {
                operation,
                status: status.as_u16(),
                server_uri: self.server_uri_string(),
            });
        }
        Ok(text)
    }

    /// 发送请求；遇 401 走三步 NTLM 握手后重放
    fn send_authenticated<F>(&mut self, operation: &'static str, make: F) -> TfsResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = make().send().map_err(|e| self.transport(operation, e))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if !offers_ntlm(&response) {
            return Err(self.unauthorized());
        }
        tracing::debug!(operation, "starting NTLM handshake");

        let header = match self.authenticator.initiate()? {
            AuthOutcome::Header(header) => header,
            AuthOutcome::NativeUnavailable => {
                return Err(TfsError::NativeAuthUnavailable {
                    server_uri: self.server_uri_string(),
                });
            }
        };
        let response = make()
            .header(AUTHORIZATION, header)
            .send()
            .map_err(|e| self.transport(operation, e))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(challenge) = ntlm_challenge(&response) else {
            return Err(self.unauthorized());
        };

        let header = match self.authenticator.respond(&challenge)? {
            AuthOutcome::Header(header) => header,
            AuthOutcome::NativeUnavailable => {
                return Err(TfsError::NativeAuthUnavailable {
                    server_uri: self.server_uri_string(),
                });
            }
        };
        let response = make()
            .header(AUTHORIZATION, header)
            .send()
            .map_err(|e| self.transport(operation, e))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(self.unauthorized());
        }
        Ok(response)
    }

    fn endpoint_url(&self, endpoint: &str) -> TfsResult<Url> {
        let mut base = self.config.server_uri.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        base.join(endpoint)
            .map_err(|e| TfsError::InvalidInput(e.to_string()))
    }

    fn server_uri_string(&self) -> String {
        self.config.server_uri.to_string()
    }

    fn transport(&self, operation: &'static str, source: reqwest::Error) -> TfsError {
        TfsError::Transport {
            server_uri: self.server_uri_string(),
            operation,
            source,
        }
    }

    fn unauthorized(&self) -> TfsError {
        TfsError::Unauthorized {
            server_uri: self.server_uri_string(),
        }
    }
}

fn write_version_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    version: &VersionSpec,
) -> crate::soap::SoapResult<()> {
    let mut element = BytesStart::new(name);
    for (key, value) in version.to_wire_attributes() {
        element.push_attribute((key, value.as_str()));
    }
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

fn offers_ntlm(response: &Response) -> bool {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.trim_start().starts_with(NTLM_SCHEME))
}

/// 从 401 应答里取带 token 的 NTLM 挑战头
fn ntlm_challenge(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| value.starts_with(NTLM_SCHEME) && value.len() > NTLM_SCHEME.len())
        .map(str::to_string)
}

/// 服务器路径大小写不敏感
fn paths_equal(a: &ServerPath, b: &ServerPath) -> bool {
    a.segments().len() == b.segments().len()
        && a.segments()
            .iter()
            .zip(b.segments())
            .all(|(x, y)| x.eq_ignore_ascii_case(y))
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.as_str() == key)
        .map(|(_, v)| v.as_str())
}

fn attr_u32(attrs: &[(String, String)], key: &str) -> TfsResult<Option<u32>> {
    attr(attrs, key)
        .map(|value| {
            value
                .parse::<u32>()
                .map_err(|_| TfsError::Soap(SoapError::Malformed(format!("bad {key}: {value}"))))
        })
        .transpose()
}

fn malformed(e: impl std::fmt::Display) -> TfsError {
    TfsError::Soap(SoapError::Malformed(e.to_string()))
}

fn parse_extended_items(xml: &str) -> TfsResult<Vec<ExtendedItem>> {
    let mut items = Vec::new();
    for attrs in soap::collect_element_attributes(xml, "ExtendedItem")? {
        let server_path = attr(&attrs, "item")
            .ok_or_else(|| malformed("ExtendedItem without item attribute"))
            .and_then(|raw| ServerPath::parse(raw).map_err(malformed))?;
        let local_path = attr(&attrs, "local")
            .map(LocalPath::parse)
            .transpose()
            .map_err(malformed)?;
        let item_id = attr_u32(&attrs, "itemid")?
            .ok_or_else(|| malformed("ExtendedItem without itemid attribute"))?;
        let item_type = match attr(&attrs, "type") {
            Some("Folder") => ItemType::Folder,
            // 服务端对文件常省略 type
            Some("File") | None => ItemType::File,
            Some(other) => return Err(malformed(format!("unknown item type {other}"))),
        };
        let lock = attr(&attrs, "lock")
            .and_then(LockLevel::from_wire)
            .unwrap_or(LockLevel::None);
        items.push(ExtendedItem {
            server_path,
            local_path,
            item_id,
            latest_version: attr_u32(&attrs, "latest")?,
            // lver 缺失或为 0 都表示未纳入版本控制
            local_version: attr_u32(&attrs, "lver")?.filter(|v| *v != 0),
            item_type,
            lock,
            lock_owner: attr(&attrs, "lockowner").map(str::to_string),
            download_url: attr(&attrs, "durl").map(str::to_string),
            deletion_id: attr_u32(&attrs, "did")?.unwrap_or(0),
        });
    }
    Ok(items)
}

fn parse_branch_relatives(xml: &str) -> TfsResult<Vec<BranchRelative>> {
    let mut branches = Vec::new();
    for attrs in soap::collect_element_attributes(xml, "BranchRelative")? {
        let server_path = attr(&attrs, "item")
            .ok_or_else(|| malformed("BranchRelative without item attribute"))
            .and_then(|raw| ServerPath::parse(raw).map_err(malformed))?;
        let branched_from = attr(&attrs, "branchedFrom")
            .map(ServerPath::parse)
            .transpose()
            .map_err(malformed)?;
        branches.push(BranchRelative {
            server_path,
            version: attr_u32(&attrs, "version")?.unwrap_or(0),
            branched_from,
            requested: attr(&attrs, "reqstd") == Some("true"),
        });
    }
    Ok(branches)
}

/// Changeset 的注释在子元素里，属性集不够用，逐事件扫描
fn parse_changesets(xml: &str) -> TfsResult<Vec<Changeset>> {
    fn changeset_from_start(e: &BytesStart) -> TfsResult<Changeset> {
        let mut id = None;
        let mut owner = String::new();
        let mut committer = String::new();
        let mut date = None;
        for a in e.attributes() {
            let a = a.map_err(malformed)?;
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a.unescape_value().map_err(malformed)?.into_owned();
            match key.as_str() {
                "cset" => {
                    id = Some(value.parse::<u32>().map_err(malformed)?);
                }
                "owner" => owner = value,
                "cmtr" => committer = value,
                "date" => {
                    date = Some(
                        DateTime::parse_from_rfc3339(&value)
                            .map_err(malformed)?
                            .with_timezone(&Utc),
                    );
                }
                _ => {}
            }
        }
        Ok(Changeset {
            id: id.ok_or_else(|| malformed("Changeset without cset attribute"))?,
            owner,
            committer,
            date: date.ok_or_else(|| malformed("Changeset without date attribute"))?,
            comment: String::new(),
        })
    }

    let mut reader = Reader::from_str(xml);
    let mut changesets = Vec::new();
    let mut pending: Option<Changeset> = None;
    let mut in_comment = false;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) if local_name(e.name().as_ref()) == "Changeset" => {
                pending = Some(changeset_from_start(&e)?);
            }
            Event::Empty(e) if local_name(e.name().as_ref()) == "Changeset" => {
                changesets.push(changeset_from_start(&e)?);
            }
            Event::Start(e) if pending.is_some() && local_name(e.name().as_ref()) == "Comment" => {
                in_comment = true;
            }
            Event::Text(t) if in_comment => {
                let chunk = t.unescape().map_err(malformed)?;
                if let Some(cs) = pending.as_mut() {
                    cs.comment.push_str(&chunk);
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == "Comment" => {
                in_comment = false;
            }
            Event::End(e) if local_name(e.name().as_ref()) == "Changeset" => {
                if let Some(cs) = pending.take() {
                    changesets.push(cs);
                }
            }
            Event::Eof => return Ok(changesets),
            _ => {}
        }
    }
}

fn parse_checkout_result(xml: &str) -> TfsResult<CheckoutResult> {
    let mut reader = Reader::from_str(xml);
    let mut succeeded = Vec::new();
    let mut failures = Vec::new();
    let mut pending_failure: Option<CheckoutFailure> = None;
    let mut in_message = false;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) | Event::Empty(e)
                if local_name(e.name().as_ref()) == "GetOperation" =>
            {
                for a in e.attributes() {
                    let a = a.map_err(malformed)?;
                    if a.key.as_ref() == b"item" {
                        let raw = a.unescape_value().map_err(malformed)?;
                        succeeded.push(ServerPath::parse(&raw).map_err(malformed)?);
                    }
                }
            }
            Event::Start(e) if local_name(e.name().as_ref()) == "Failure" => {
                let mut failure = CheckoutFailure {
                    server_path: None,
                    message: String::new(),
                };
                for a in e.attributes() {
                    let a = a.map_err(malformed)?;
                    let value = a.unescape_value().map_err(malformed)?;
                    match a.key.as_ref() {
                        b"item" => {
                            failure.server_path = ServerPath::parse(&value).ok();
                        }
                        b"message" => failure.message = value.into_owned(),
                        _ => {}
                    }
                }
                pending_failure = Some(failure);
            }
            Event::Start(e)
                if pending_failure.is_some() && local_name(e.name().as_ref()) == "Message" =>
            {
                in_message = true;
            }
            Event::Text(t) if in_message => {
                let chunk = t.unescape().map_err(malformed)?;
                if let Some(failure) = pending_failure.as_mut() {
                    failure.message.push_str(&chunk);
                }
            }
            Event::End(e) if local_name(e.name().as_ref()) == "Message" => {
                in_message = false;
            }
            Event::End(e) if local_name(e.name().as_ref()) == "Failure" => {
                if let Some(failure) = pending_failure.take() {
                    failures.push(failure);
                }
            }
            Event::Eof => {
                return Ok(CheckoutResult {
                    succeeded,
                    failures,
                });
            }
            _ => {}
        }
    }
}

fn local_name(raw: &[u8]) -> &str {
    let name = std::str::from_utf8(raw).unwrap_or("");
    name.rsplit(':').next().unwrap_or(name)
}
