use crate::domain::model::{Listing, ListingKey, Source, TargetSet};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// 一個職缺來源。每個具體網站實作 `search`，解析細節留在各自的實作中。
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// 搜尋單一職稱。單筆解析失敗應在實作內略過，不影響其他筆。
    async fn search(&self, title: &str) -> Result<Vec<Listing>>;

    /// 依序搜尋所有職稱；單一職稱失敗只記錄警告並繼續
    async fn fetch_targets(&self, targets: &TargetSet) -> Result<Vec<Listing>> {
        let mut listings = Vec::new();
        for title in targets.iter() {
            match self.search(title).await {
                Ok(found) => {
                    tracing::debug!("{}: {} listings for '{}'", self.source(), found.len(), title);
                    listings.extend(found);
                }
                Err(e) => {
                    tracing::warn!("⚠️ {}: search for '{}' failed: {}", self.source(), title, e);
                }
            }
        }
        Ok(listings)
    }
}

/// 已通過篩選職缺的持久化介面
pub trait ListingStore: Send + Sync {
    /// 寫入一個不可變批次；空批次不寫入並回傳 `None`
    fn persist(
        &self,
        listings: &[Listing],
    ) -> impl std::future::Future<Output = Result<Option<PathBuf>>> + Send;

    /// 合併保留期間內的所有批次
    fn load_recent(&self) -> impl std::future::Future<Output = Result<Vec<Listing>>> + Send;

    /// 保留期間內已持久化的身分鍵，各自對應所在批次的收集時間
    fn seen_keys(
        &self,
    ) -> impl std::future::Future<Output = Result<HashMap<ListingKey, DateTime<Utc>>>> + Send;

    /// 刪除超過保留期間的批次，回傳刪除數量
    fn prune(&self, retention: Duration) -> impl std::future::Future<Output = Result<usize>> + Send;
}
