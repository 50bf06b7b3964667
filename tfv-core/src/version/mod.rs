use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VersionSpecError {
    #[error("unknown version spec discriminator: {0}")]
    UnknownDiscriminator(String),

    #[error("missing wire attribute '{0}' for {1}")]
    MissingAttribute(&'static str, &'static str),

    #[error("invalid value for attribute '{attribute}': {message}")]
    InvalidValue {
        attribute: &'static str,
        message: String,
    },
}

pub type VersionSpecResult<T> = Result<T, VersionSpecError>;

/// `xsi:type` 判别属性名，SOAP 请求里所有 VersionSpec 都带它
pub const XSI_TYPE_ATTR: &str = "xsi:type";

/// TFVC 历史上的一个时间点
///
/// 序列化为 SOAP 属性集，由 `xsi:type` 区分变体。各变体互斥，
/// Date 变体始终携带带时区偏移的完整时间戳，与宿主 locale 无关。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionSpec {
    /// 最新版本
    Latest,
    /// 指定 changeset 编号
    Changeset(u32),
    /// 标签（可选限定 scope）
    Label {
        label: String,
        scope: Option<String>,
    },
    /// 指定时刻
    Date(DateTime<FixedOffset>),
    /// 某个工作区当前同步到的版本
    Workspace { name: String, owner: String },
}

impl VersionSpec {
    /// Changeset 编号从 1 开始，0 不是合法输入
    pub fn changeset(number: u32) -> VersionSpecResult<Self> {
        if number == 0 {
            return Err(VersionSpecError::InvalidValue {
                attribute: "cs",
                message: "changeset number must be positive".to_string(),
            });
        }
        Ok(Self::Changeset(number))
    }

    pub fn label(label: impl Into<String>, scope: Option<String>) -> VersionSpecResult<Self> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(VersionSpecError::InvalidValue {
                attribute: "label",
                message: "label name must not be empty".to_string(),
            });
        }
        Ok(Self::Label { label, scope })
    }

    pub fn workspace(name: impl Into<String>, owner: impl Into<String>) -> VersionSpecResult<Self> {
        let name = name.into();
        let owner = owner.into();
        if name.is_empty() || owner.is_empty() {
            return Err(VersionSpecError::InvalidValue {
                attribute: "name",
                message: "workspace version spec requires both name and owner".to_string(),
            });
        }
        Ok(Self::Workspace { name, owner })
    }

    /// 本变体对应的 `xsi:type` 判别值
    pub fn xsi_type(&self) -> &'static str {
        match self {
            Self::Latest => "LatestVersionSpec",
            Self::Changeset(_) => "ChangesetVersionSpec",
            Self::Label { .. } => "LabelVersionSpec",
            Self::Date(_) => "DateVersionSpec",
            Self::Workspace { .. } => "WorkspaceVersionSpec",
        }
    }

    /// 产出查询所需的全部 SOAP 属性（含 `xsi:type`）
    pub fn to_wire_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![(XSI_TYPE_ATTR, self.xsi_type().to_string())];
        match self {
            Self::Latest => {}
            Self::Changeset(number) => attrs.push(("cs", number.to_string())),
            Self::Label { label, scope } => {
                attrs.push(("label", label.clone()));
                if let Some(scope) = scope {
                    attrs.push(("scope", scope.clone()));
                }
            }
            Self::Date(date) => attrs.push(("date", format_wire_date(date))),
            Self::Workspace { name, owner } => {
                attrs.push(("name", name.clone()));
                attrs.push(("owner", owner.clone()));
            }
        }
        attrs
    }

    /// 从 SOAP 属性集还原 VersionSpec（与 `to_wire_attributes` 互逆）
    pub fn from_wire_attributes<'a, I>(attrs: I) -> VersionSpecResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut xsi_type = None;
        let mut cs = None;
        let mut label = None;
        let mut scope = None;
        let mut date = None;
        let mut name = None;
        let mut owner = None;
        for (key, value) in attrs {
            match key {
                XSI_TYPE_ATTR => xsi_type = Some(value.to_string()),
                "cs" => cs = Some(value.to_string()),
                "label" => label = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                "date" => date = Some(value.to_string()),
                "name" => name = Some(value.to_string()),
                "owner" => owner = Some(value.to_string()),
                _ => {}
            }
        }

        let discriminator = xsi_type.ok_or(VersionSpecError::MissingAttribute(
            XSI_TYPE_ATTR,
            "version spec",
        ))?;
        // 判别值可能带 namespace 前缀（如 `tfs:LatestVersionSpec`）
        let discriminator = discriminator
            .rsplit(':')
            .next()
            .unwrap_or(discriminator.as_str());
        match discriminator {
            "LatestVersionSpec" => Ok(Self::Latest),
            "ChangesetVersionSpec" => {
                let raw = cs.ok_or(VersionSpecError::MissingAttribute(
                    "cs",
                    "ChangesetVersionSpec",
                ))?;
                let number = raw
                    .parse::<u32>()
                    .map_err(|e| VersionSpecError::InvalidValue {
                        attribute: "cs",
                        message: e.to_string(),
                    })?;
                Self::changeset(number)
            }
            "LabelVersionSpec" => {
                let label = label.ok_or(VersionSpecError::MissingAttribute(
                    "label",
                    "LabelVersionSpec",
                ))?;
                Self::label(label, scope)
            }
            "DateVersionSpec" => {
                let raw = date.ok_or(VersionSpecError::MissingAttribute(
                    "date",
                    "DateVersionSpec",
                ))?;
                let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                    VersionSpecError::InvalidValue {
                        attribute: "date",
                        message: e.to_string(),
                    }
                })?;
                Ok(Self::Date(parsed))
            }
            "WorkspaceVersionSpec" => {
                let name = name.ok_or(VersionSpecError::MissingAttribute(
                    "name",
                    "WorkspaceVersionSpec",
                ))?;
                let owner = owner.ok_or(VersionSpecError::MissingAttribute(
                    "owner",
                    "WorkspaceVersionSpec",
                ))?;
                Self::workspace(name, owner)
            }
            other => Err(VersionSpecError::UnknownDiscriminator(other.to_string())),
        }
    }
}

/// 将日期格式化为服务端接受的 wire 字符串
///
/// 时区偏移必须是冒号分隔形式（`+04:00`），裸 `+0400` 会被服务端拒绝。
pub fn format_wire_date(date: &DateTime<FixedOffset>) -> String {
    let raw = date.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string();
    insert_offset_colon(raw)
}

/// 在 `±HHMM` 形式的末尾偏移中插入冒号，得到 `±HH:MM`
fn insert_offset_colon(mut formatted: String) -> String {
    let len = formatted.len();
    if len < 5 {
        return formatted;
    }
    let tail = &formatted[len - 5..];
    let sign_ok = tail.starts_with('+') || tail.starts_with('-');
    let digits_ok = tail[1..].chars().all(|c| c.is_ascii_digit());
    if sign_ok && digits_ok {
        formatted.insert(len - 2, ':');
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn roundtrip(spec: &VersionSpec) -> VersionSpec {
        let attrs = spec.to_wire_attributes();
        let borrowed: Vec<(&str, &str)> =
            attrs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        VersionSpec::from_wire_attributes(borrowed).unwrap()
    }

    #[test]
    fn latest_roundtrip() {
        let spec = VersionSpec::Latest;
        assert_eq!(spec.to_wire_attributes().len(), 1);
        assert_eq!(roundtrip(&spec), spec);
    }

    #[test]
    fn changeset_roundtrip() {
        let spec = VersionSpec::changeset(3588021).unwrap();
        assert_eq!(roundtrip(&spec), spec);
        assert!(VersionSpec::changeset(0).is_err());
    }

    #[test]
    fn label_roundtrip() {
        let spec = VersionSpec::label("RC1", Some("$/proj".to_string())).unwrap();
        assert_eq!(roundtrip(&spec), spec);
        let unscoped = VersionSpec::label("RC1", None).unwrap();
        assert_eq!(roundtrip(&unscoped), unscoped);
        assert!(VersionSpec::label("  ", None).is_err());
    }

    #[test]
    fn workspace_roundtrip() {
        let spec = VersionSpec::workspace("ws1", "CORP\\alice").unwrap();
        assert_eq!(roundtrip(&spec), spec);
    }

    #[test]
    fn date_roundtrip() {
        let offset = FixedOffset::east_opt(4 * 3600).unwrap();
        let date = offset.with_ymd_and_hms(2008, 7, 15, 12, 30, 45).unwrap();
        let spec = VersionSpec::Date(date);
        assert_eq!(roundtrip(&spec), spec);
    }

    #[test]
    fn date_offset_gets_colon() {
        let offset = FixedOffset::east_opt(4 * 3600).unwrap();
        let date = offset.with_ymd_and_hms(2008, 7, 15, 12, 30, 45).unwrap();
        let wire = format_wire_date(&date);
        assert!(wire.ends_with("+04:00"), "got {wire}");
        // 冒号位置：倒数第三个字符
        assert_eq!(&wire[wire.len() - 3..wire.len() - 2], ":");

        let negative = FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap();
        let date = negative.with_ymd_and_hms(2008, 7, 15, 12, 30, 45).unwrap();
        let wire = format_wire_date(&date);
        assert!(wire.ends_with("-05:30"), "got {wire}");
    }

    #[test]
    fn discriminator_namespace_prefix_is_tolerated() {
        let spec = VersionSpec::from_wire_attributes([
            (XSI_TYPE_ATTR, "tfs:LatestVersionSpec"),
        ])
        .unwrap();
        assert_eq!(spec, VersionSpec::Latest);
    }

    #[test]
    fn unknown_discriminator_is_rejected() {
        let err =
            VersionSpec::from_wire_attributes([(XSI_TYPE_ATTR, "FancyVersionSpec")]).unwrap_err();
        assert!(matches!(err, VersionSpecError::UnknownDiscriminator(_)));
    }
}
