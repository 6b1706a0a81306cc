use crate::domain::model::{Listing, ListingKey};
use crate::domain::ports::ListingStore;
use crate::utils::error::Result;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const BATCH_PREFIX: &str = "jobs_";
const BATCH_SUFFIX: &str = ".csv";
const TEMP_SUFFIX: &str = ".tmp";
const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// 一個批次檔與檔名中的收集時間
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub path: PathBuf,
    pub collected_at: DateTime<Utc>,
}

/// 每次成功的輪詢寫入一個 CSV 批次檔，從不改寫既有批次。
///
/// 檔名 `jobs_YYYYMMDD_HHMMSS_mmm.csv`（UTC）可依字典序排序。
#[derive(Debug, Clone)]
pub struct CsvBatchStore {
    dir: PathBuf,
    retention: Duration,
}

impl CsvBatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// 以指定收集時間寫入批次（寫入暫存檔後 rename，確保完整寫入或完全不寫）
    pub fn write_batch(&self, listings: &[Listing], collected_at: DateTime<Utc>) -> Result<Option<PathBuf>> {
        if listings.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)?;
        let final_path = self.next_batch_path(collected_at);
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("batch.csv")
            .to_string();
        let temp_path = self.dir.join(format!(".{}{}", file_name, TEMP_SUFFIX));

        if let Err(e) = write_csv(&temp_path, listings) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        fs::rename(&temp_path, &final_path)?;

        tracing::debug!("Wrote {} listings to {}", listings.len(), final_path.display());
        Ok(Some(final_path))
    }

    fn next_batch_path(&self, collected_at: DateTime<Utc>) -> PathBuf {
        let stem = format!(
            "{}{}_{:03}",
            BATCH_PREFIX,
            collected_at.format("%Y%m%d_%H%M%S"),
            collected_at.timestamp_subsec_millis()
        );
        let mut path = self.dir.join(format!("{}{}", stem, BATCH_SUFFIX));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}{}", stem, n, BATCH_SUFFIX));
            n += 1;
        }
        path
    }

    /// 依收集時間遞增列出所有批次檔
    pub fn list_batches(&self) -> Result<Vec<BatchFile>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut batches = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(BATCH_SUFFIX) || name.starts_with('.') {
                continue;
            }
            let collected_at = match parse_batch_timestamp(name).or_else(|| modified_at(&path)) {
                Some(ts) => ts,
                None => {
                    tracing::warn!("⚠️ Cannot determine collection time of {}, skipping", path.display());
                    continue;
                }
            };
            batches.push(BatchFile { path, collected_at });
        }
        batches.sort_by(|a, b| a.collected_at.cmp(&b.collected_at).then_with(|| a.path.cmp(&b.path)));
        Ok(batches)
    }

    /// 讀取單一批次；格式錯誤的資料列略過並記錄
    pub fn read_batch(path: &Path) -> Result<Vec<Listing>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut listings = Vec::new();
        let mut skipped = 0usize;

        for (index, record) in reader.deserialize::<Listing>().enumerate() {
            match record {
                Ok(listing) => listings.push(listing),
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    skipped += 1;
                    tracing::debug!("{} row {}: {}", path.display(), index + 1, e);
                }
            }
        }

        if skipped > 0 {
            tracing::warn!("⚠️ Skipped {} malformed rows in {}", skipped, path.display());
        }
        Ok(listings)
    }

    fn within_window(&self, now: DateTime<Utc>) -> Result<Vec<BatchFile>> {
        let cutoff = cutoff(now, self.retention);
        Ok(self
            .list_batches()?
            .into_iter()
            .filter(|b| b.collected_at >= cutoff)
            .collect())
    }

    /// 合併保留期間內的批次：同一身分鍵以最新批次為準，依張貼時間由新到舊排序
    pub fn load_recent_at(&self, now: DateTime<Utc>) -> Result<Vec<Listing>> {
        let mut seen: HashSet<ListingKey> = HashSet::new();
        let mut merged = Vec::new();

        for batch in self.within_window(now)?.iter().rev() {
            let listings = match Self::read_batch(&batch.path) {
                Ok(listings) => listings,
                Err(e) => {
                    tracing::warn!("⚠️ Unreadable batch {}: {}", batch.path.display(), e);
                    continue;
                }
            };
            for listing in listings {
                if seen.insert(listing.key()) {
                    merged.push(listing);
                }
            }
        }

        merged.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        Ok(merged)
    }

    /// 保留期間內的身分鍵與其最新批次的收集時間
    pub fn seen_keys_at(&self, now: DateTime<Utc>) -> Result<HashMap<ListingKey, DateTime<Utc>>> {
        let mut keys = HashMap::new();
        for batch in self.within_window(now)?.iter().rev() {
            match Self::read_batch(&batch.path) {
                Ok(listings) => {
                    for listing in listings {
                        keys.entry(listing.key()).or_insert(batch.collected_at);
                    }
                }
                Err(e) => tracing::warn!("⚠️ Unreadable batch {}: {}", batch.path.display(), e),
            }
        }
        Ok(keys)
    }

    /// 最新一個批次的內容
    pub fn load_latest(&self) -> Result<Vec<Listing>> {
        match self.list_batches()?.pop() {
            Some(batch) => Self::read_batch(&batch.path),
            None => Ok(Vec::new()),
        }
    }

    pub fn prune_at(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = cutoff(now, retention);
        let mut removed = 0;

        for batch in self.list_batches()? {
            if batch.collected_at < cutoff {
                match fs::remove_file(&batch.path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("Error deleting {}: {}", batch.path.display(), e),
                }
            }
        }

        self.remove_stale_temp_files();
        if removed > 0 {
            tracing::info!("🧹 Pruned {} batches older than {:?}", removed, retention);
        }
        Ok(removed)
    }

    fn remove_stale_temp_files(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX));
            let is_stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .is_some_and(|age| age > STALE_TEMP_AGE);
            if is_temp && is_stale {
                let _ = fs::remove_file(&path);
            }
        }
    }
}

impl ListingStore for CsvBatchStore {
    async fn persist(&self, listings: &[Listing]) -> Result<Option<PathBuf>> {
        self.write_batch(listings, Utc::now())
    }

    async fn load_recent(&self) -> Result<Vec<Listing>> {
        self.load_recent_at(Utc::now())
    }

    async fn seen_keys(&self) -> Result<HashMap<ListingKey, DateTime<Utc>>> {
        self.seen_keys_at(Utc::now())
    }

    async fn prune(&self, retention: Duration) -> Result<usize> {
        self.prune_at(retention, Utc::now())
    }
}

fn write_csv(path: &Path, listings: &[Listing]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for listing in listings {
        writer.serialize(listing)?;
    }
    writer.flush()?;
    Ok(())
}

fn cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|r| now.checked_sub_signed(r))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `jobs_20240301_101530[_123][_n].csv` → 2024-03-01T10:15:30Z
pub fn parse_batch_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let stem = file_name.strip_prefix(BATCH_PREFIX)?.strip_suffix(BATCH_SUFFIX)?;
    let stamp = stem.get(..15)?;
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok()?;
    let millis = stem
        .get(16..19)
        .and_then(|m| m.parse::<i64>().ok())
        .unwrap_or(0);
    Some(Utc.from_utc_datetime(&naive) + chrono::Duration::milliseconds(millis))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}
