use crate::adapters::time::parse_posted;
use crate::config::toml_config::FeedSourceConfig;
use crate::core::fetcher::Fetcher;
use crate::domain::model::{Listing, Source};
use crate::domain::ports::SourceAdapter;
use crate::utils::error::{Result, ScoutError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use url::Url;

/// 通用 JSON 職缺來源：以職稱填入網址範本，依欄位對應轉成 `Listing`
pub struct FeedAdapter {
    config: FeedSourceConfig,
    fetcher: Fetcher,
}

impl FeedAdapter {
    pub fn new(config: FeedSourceConfig, fetcher: Fetcher) -> Self {
        Self { config, fetcher }
    }

    pub fn search_url(&self, title: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(title.trim().as_bytes()).collect();
        self.config.url.replace("{title}", &encoded)
    }

    /// 解析一頁 JSON；單筆格式錯誤只略過該筆
    pub fn parse_page(&self, body: &str, now: DateTime<Utc>) -> Result<Vec<Listing>> {
        let root: Value = serde_json::from_str(body)?;
        let items = match &self.config.items_field {
            Some(field) => lookup(&root, field),
            None => Some(&root),
        }
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ScoutError::adapter(&self.config.name, "response does not contain a listing array")
        })?;

        let mut listings = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match self.parse_item(item, now) {
                Ok(listing) => listings.push(listing),
                Err(reason) => {
                    tracing::warn!("Error parsing {} job #{}: {}", self.config.name, index, reason);
                }
            }
        }
        Ok(listings)
    }

    fn parse_item(&self, item: &Value, now: DateTime<Utc>) -> std::result::Result<Listing, String> {
        let fields = &self.config.fields;

        let title = text_field(item, &fields.title).ok_or("missing title")?;
        let company = text_field(item, &fields.company).ok_or("missing company")?;
        let raw_link = text_field(item, &fields.link).ok_or("missing link")?;
        let link = self.absolute_link(&raw_link)?;

        let posted_at = match lookup(item, &fields.posted) {
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .unwrap_or(now),
            Some(Value::String(s)) => parse_posted(s, now),
            _ => now,
        };

        let location = text_field(item, &fields.location);
        let is_remote = self.config.remote.unwrap_or_else(|| {
            lookup(item, &fields.remote)
                .and_then(Value::as_bool)
                .unwrap_or(false)
                || location
                    .as_deref()
                    .is_some_and(|l| l.to_lowercase().contains("remote"))
        });

        Ok(Listing {
            title,
            company,
            link,
            posted_at,
            source: Source::new(self.config.name.clone()),
            location,
            is_remote,
        })
    }

    fn absolute_link(&self, raw: &str) -> std::result::Result<String, String> {
        if let Ok(url) = Url::parse(raw) {
            return Ok(url.to_string());
        }
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| format!("relative link '{}' without base_url", raw))?;
        Url::parse(base)
            .and_then(|b| b.join(raw))
            .map(|u| u.to_string())
            .map_err(|e| format!("invalid link '{}': {}", raw, e))
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn source(&self) -> Source {
        Source::new(self.config.name.clone())
    }

    async fn search(&self, title: &str) -> Result<Vec<Listing>> {
        let url = self.search_url(title);
        let body = match self.fetcher.fetch(&url).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        self.parse_page(&body, Utc::now())
    }
}

/// 以 `a.b.c` 路徑取值
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

fn text_field(value: &Value, path: &str) -> Option<String> {
    match lookup(value, path)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
