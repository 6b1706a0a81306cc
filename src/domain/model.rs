use crate::utils::error::{Result, ScoutError};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 最多可追蹤的職稱數量
pub const MAX_TARGET_TITLES: usize = 10;

/// 來源標籤（例如 "BuiltIn"、"Y Combinator"）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(String);

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一筆職缺。欄位順序即 CSV 欄位順序。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    pub company: String,
    pub link: String,
    #[serde(
        rename = "posted_time",
        serialize_with = "serialize_posted",
        deserialize_with = "deserialize_posted"
    )]
    pub posted_at: DateTime<Utc>,
    pub source: Source,
    pub location: Option<String>,
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_remote: bool,
}

/// `(source, link)` 是一筆真實職缺的身分鍵
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    pub source: Source,
    pub link: String,
}

impl Listing {
    pub fn key(&self) -> ListingKey {
        ListingKey {
            source: self.source.clone(),
            link: self.link.clone(),
        }
    }
}

fn serialize_posted<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn deserialize_posted<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid posted_time '{}'", raw)))
}

// 舊批次檔可能寫成 True/False
fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid is_remote '{}'", other))),
    }
}

/// 解析 ISO-8601 時間；沒有時區的舊資料視為 UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// 使用者指定的職稱集合：1 到 10 筆，去除空白後不可為空，不分大小寫去重
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    titles: Vec<String>,
}

impl TargetSet {
    pub fn new<I, S>(titles: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cleaned: Vec<String> = Vec::new();
        for title in titles {
            let trimmed = title.as_ref().trim();
            if trimmed.is_empty() {
                return Err(ScoutError::validation("Job titles cannot be empty"));
            }
            let lowered = trimmed.to_lowercase();
            if !cleaned.iter().any(|t| t.to_lowercase() == lowered) {
                cleaned.push(trimmed.to_string());
            }
        }

        if cleaned.is_empty() {
            return Err(ScoutError::validation("Please enter at least one job title"));
        }
        if cleaned.len() > MAX_TARGET_TITLES {
            return Err(ScoutError::validation(format!(
                "Maximum {} job titles allowed, got {}",
                MAX_TARGET_TITLES,
                cleaned.len()
            )));
        }

        Ok(Self { titles: cleaned })
    }

    /// 從逗號分隔字串建立（CLI 用）
    pub fn parse_list(raw: &str) -> Result<Self> {
        Self::new(raw.split(',').filter(|s| !s.trim().is_empty()))
    }

    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.titles.iter().map(String::as_str)
    }
}

impl fmt::Display for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.titles.join(", "))
    }
}
