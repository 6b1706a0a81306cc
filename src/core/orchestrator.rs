use crate::core::matcher::{LocationPolicy, Matcher, DEFAULT_THRESHOLD};
use crate::domain::model::{Listing, ListingKey, TargetSet};
use crate::domain::ports::{ListingStore, SourceAdapter};
use crate::storage::{LivenessMarker, TitleFile};
use crate::storage::batches::DEFAULT_RETENTION;
use crate::utils::error::Result;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// 兩個來源之間的固定冷卻時間（不論前一個成功或失敗）
    pub adapter_cooldown: Duration,
    pub cycle_interval: Duration,
    /// 迴圈本身發生未預期錯誤後的等待時間
    pub error_cooldown: Duration,
    /// `stop` 等待進行中工作結束的上限
    pub stop_timeout: Duration,
    pub threshold: u8,
    pub retention: Duration,
    pub max_listing_age: Option<Duration>,
    pub active_hours: Option<ActiveHours>,
    pub location: LocationPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            adapter_cooldown: Duration::from_secs(5),
            cycle_interval: Duration::from_secs(3600),
            error_cooldown: Duration::from_secs(300),
            stop_timeout: Duration::from_secs(5),
            threshold: DEFAULT_THRESHOLD,
            retention: DEFAULT_RETENTION,
            max_listing_age: None,
            active_hours: None,
            location: LocationPolicy::default(),
        }
    }
}

/// 本地時間的運作時段 `[start, end)`，可跨午夜（例如 7 點到凌晨 1 點）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveHours {
    pub start: u32,
    pub end: u32,
}

impl ActiveHours {
    pub fn contains(&self, hour: u32) -> bool {
        match self.start.cmp(&self.end) {
            std::cmp::Ordering::Equal => true,
            std::cmp::Ordering::Less => self.start <= hour && hour < self.end,
            std::cmp::Ordering::Greater => hour >= self.start || hour < self.end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub skipped: bool,
    pub collected: usize,
    pub title_matched: usize,
    pub location_matched: usize,
    pub new_listings: usize,
    pub persisted: usize,
    pub failed_sources: Vec<String>,
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub targets: Vec<String>,
    pub cycles_completed: u64,
    pub last_cycle: Option<CycleReport>,
}

/// 保留期間內已持久化的身分鍵，跨輪次抑制重複寫入
#[derive(Debug, Default)]
pub struct SeenSet {
    entries: HashMap<ListingKey, DateTime<Utc>>,
}

impl SeenSet {
    /// 以既有批次的收集時間建立，讓鍵與批次檔同時過期
    pub fn seeded(entries: HashMap<ListingKey, DateTime<Utc>>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ListingKey) -> bool {
        self.entries.contains_key(key)
    }

    /// 過濾掉已見過的職缺與同一批次內的重複項；不修改集合本身
    pub fn unseen(&self, listings: Vec<Listing>) -> Vec<Listing> {
        let mut batch_keys = HashSet::new();
        listings
            .into_iter()
            .filter(|l| {
                let key = l.key();
                !self.entries.contains_key(&key) && batch_keys.insert(key)
            })
            .collect()
    }

    pub fn record(&mut self, listings: &[Listing], at: DateTime<Utc>) {
        for listing in listings {
            self.entries.entry(listing.key()).or_insert(at);
        }
    }

    pub fn prune(&mut self, retention: Duration, now: DateTime<Utc>) {
        if let Ok(retention) = chrono::Duration::from_std(retention) {
            let cutoff = now - retention;
            self.entries.retain(|_, seen_at| *seen_at >= cutoff);
        }
    }
}

#[derive(Debug)]
struct RunState {
    status: RunStatus,
    targets: Option<TargetSet>,
    cycles_completed: u64,
    last_cycle: Option<CycleReport>,
}

struct LoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared<S> {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    store: S,
    settings: OrchestratorSettings,
    state: Mutex<RunState>,
}

impl<S> Shared<S> {
    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum CycleOutcome {
    Completed(CycleReport),
    Cancelled,
}

/// 輪詢排程器：`idle → running → stopping → idle`
pub struct Orchestrator<S: ListingStore + 'static> {
    shared: Arc<Shared<S>>,
    lifecycle: tokio::sync::Mutex<Option<LoopHandle>>,
    marker: Option<LivenessMarker>,
    title_file: Option<TitleFile>,
}

impl<S: ListingStore + 'static> Orchestrator<S> {
    /// 來源依註冊順序在每一輪中依序執行
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, store: S, settings: OrchestratorSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                adapters,
                store,
                settings,
                state: Mutex::new(RunState {
                    status: RunStatus::Idle,
                    targets: None,
                    cycles_completed: 0,
                    last_cycle: None,
                }),
            }),
            lifecycle: tokio::sync::Mutex::new(None),
            marker: None,
            title_file: None,
        }
    }

    pub fn with_liveness_marker(mut self, marker: LivenessMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn with_title_file(mut self, title_file: TitleFile) -> Self {
        self.title_file = Some(title_file);
        self
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.shared.settings
    }

    pub fn status(&self) -> StatusReport {
        let state = self.shared.state();
        StatusReport {
            status: state.status,
            targets: state
                .targets
                .as_ref()
                .map(|t| t.titles().to_vec())
                .unwrap_or_default(),
            cycles_completed: state.cycles_completed,
            last_cycle: state.last_cycle.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().status == RunStatus::Running
    }

    /// 開始背景輪詢。已在執行中時不做任何事並回傳 `false`。
    pub async fn start(&self, targets: TargetSet) -> Result<bool> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            tracing::info!("Scraping is already running, ignoring start");
            return Ok(false);
        }

        if let Some(title_file) = &self.title_file {
            title_file.save(&targets)?;
        }
        if let Some(marker) = &self.marker {
            marker.write()?;
        }

        let seen = match self.shared.store.seen_keys().await {
            Ok(keys) => SeenSet::seeded(keys),
            Err(e) => {
                tracing::warn!("⚠️ Could not load previously saved listings: {}", e);
                SeenSet::default()
            }
        };

        {
            let mut state = self.shared.state();
            state.status = RunStatus::Running;
            state.targets = Some(targets.clone());
        }

        let matcher = Matcher::new(&targets, self.shared.settings.threshold);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.shared.clone(),
            Arc::new(targets.clone()),
            matcher,
            seen,
            cancel.clone(),
        ));
        *lifecycle = Some(LoopHandle { cancel, handle });

        tracing::info!("🚀 Started scraping for titles: {}", targets);
        Ok(true)
    }

    /// 用上次儲存的職稱恢復輪詢；沒有儲存的職稱時回傳 `false`
    pub async fn resume(&self) -> Result<bool> {
        let Some(title_file) = &self.title_file else {
            return Ok(false);
        };
        match title_file.load()? {
            Some(targets) => self.start(targets).await,
            None => Ok(false),
        }
    }

    /// 停止輪詢並等待進行中的工作結束（最多 `stop_timeout`）。未執行時回傳 `false`。
    pub async fn stop(&self) -> Result<bool> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(LoopHandle { cancel, mut handle }) = lifecycle.take() else {
            return Ok(false);
        };

        self.shared.state().status = RunStatus::Stopping;
        tracing::info!("Stopping job scraping process");
        cancel.cancel();

        match tokio::time::timeout(self.shared.settings.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Scraping loop ended abnormally: {}", e),
            Err(_) => {
                tracing::warn!(
                    "Scraping loop did not stop within {:?}, aborting",
                    self.shared.settings.stop_timeout
                );
                handle.abort();
            }
        }

        {
            let mut state = self.shared.state();
            state.status = RunStatus::Idle;
            state.targets = None;
        }

        if let Some(marker) = &self.marker {
            marker.remove()?;
        }
        tracing::info!("⏹️ Scraping stopped");
        Ok(true)
    }

    /// 在呼叫端的 task 中執行單一輪，不啟動背景迴圈
    pub async fn run_once(&self, targets: &TargetSet) -> Result<CycleReport> {
        let matcher = Matcher::new(targets, self.shared.settings.threshold);
        let mut seen = SeenSet::seeded(self.shared.store.seen_keys().await?);
        let cancel = CancellationToken::new();
        let targets = Arc::new(targets.clone());

        match run_cycle(&self.shared, &targets, &matcher, &mut seen, &cancel).await? {
            CycleOutcome::Completed(report) => {
                record_cycle(&self.shared, &report);
                Ok(report)
            }
            CycleOutcome::Cancelled => Ok(CycleReport::default()),
        }
    }
}

impl<S: ListingStore + 'static> Drop for Orchestrator<S> {
    fn drop(&mut self) {
        if let Some(loop_handle) = self.lifecycle.get_mut().take() {
            loop_handle.cancel.cancel();
        }
    }
}

/// 等待指定時間；期間收到停止訊號則回傳 `false`
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn record_cycle<S>(shared: &Shared<S>, report: &CycleReport) {
    let mut state = shared.state();
    state.cycles_completed += 1;
    state.last_cycle = Some(report.clone());
}

async fn run_loop<S: ListingStore + 'static>(
    shared: Arc<Shared<S>>,
    targets: Arc<TargetSet>,
    matcher: Matcher,
    mut seen: SeenSet,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        match run_cycle(&shared, &targets, &matcher, &mut seen, &cancel).await {
            Ok(CycleOutcome::Completed(report)) => record_cycle(&shared, &report),
            Ok(CycleOutcome::Cancelled) => break,
            Err(e) => {
                tracing::error!("❌ Error in scraping loop: {}", e);
                if !sleep_or_cancel(shared.settings.error_cooldown, &cancel).await {
                    break;
                }
                continue;
            }
        }

        if !sleep_or_cancel(shared.settings.cycle_interval, &cancel).await {
            break;
        }
    }
    tracing::debug!("Scraping loop exited");
}

async fn run_cycle<S: ListingStore + 'static>(
    shared: &Arc<Shared<S>>,
    targets: &Arc<TargetSet>,
    matcher: &Matcher,
    seen: &mut SeenSet,
    cancel: &CancellationToken,
) -> Result<CycleOutcome> {
    let settings = &shared.settings;
    let started_at = Utc::now();
    let mut report = CycleReport {
        started_at: Some(started_at),
        ..CycleReport::default()
    };

    if let Some(hours) = settings.active_hours {
        let hour = chrono::Local::now().hour();
        if !hours.contains(hour) {
            tracing::info!("🌙 Outside active hours ({}:00–{}:00), skipping cycle", hours.start, hours.end);
            report.skipped = true;
            return Ok(CycleOutcome::Completed(report));
        }
    }

    let mut collected: Vec<Listing> = Vec::new();
    for (index, adapter) in shared.adapters.iter().enumerate() {
        if index > 0 && !sleep_or_cancel(settings.adapter_cooldown, cancel).await {
            return Ok(CycleOutcome::Cancelled);
        }

        let source = adapter.source();
        let task_adapter = adapter.clone();
        let task_targets = targets.clone();
        let mut task = tokio::spawn(async move { task_adapter.fetch_targets(&task_targets).await });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                task.abort();
                return Ok(CycleOutcome::Cancelled);
            }
            outcome = &mut task => outcome,
        };

        match outcome {
            Ok(Ok(listings)) => {
                tracing::info!("✅ {}: collected {} listings", source, listings.len());
                collected.extend(listings);
            }
            Ok(Err(e)) => {
                tracing::error!("❌ Error in {}: {}", source, e);
                report.failed_sources.push(source.to_string());
            }
            Err(e) => {
                tracing::error!("❌ {} crashed: {}", source, e);
                report.failed_sources.push(source.to_string());
            }
        }
    }
    report.collected = collected.len();

    let matched = matcher.filter(collected);
    report.title_matched = matched.len();

    let mut located = settings.location.filter(matched);
    report.location_matched = located.len();

    if let Some(max_age) = settings.max_listing_age.and_then(|a| chrono::Duration::from_std(a).ok()) {
        let oldest = started_at - max_age;
        located.retain(|l| l.posted_at >= oldest);
    }

    let fresh = seen.unseen(located);
    report.new_listings = fresh.len();

    report.artifact = shared.store.persist(&fresh).await?;
    if report.artifact.is_some() {
        report.persisted = fresh.len();
        // 以本輪開始時間記錄，不晚於批次檔名中的時間
        seen.record(&fresh, started_at);
        tracing::info!("💾 Saved {} new jobs", fresh.len());
    } else {
        tracing::info!("No new jobs this cycle");
    }

    seen.prune(settings.retention, Utc::now());
    if let Err(e) = shared.store.prune(settings.retention).await {
        tracing::warn!("⚠️ Failed to prune old batches: {}", e);
    }

    Ok(CycleOutcome::Completed(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Source;

    fn listing(link: &str) -> Listing {
        Listing {
            title: "Engineer".to_string(),
            company: "Acme".to_string(),
            link: link.to_string(),
            posted_at: Utc::now(),
            source: Source::new("Test"),
            location: None,
            is_remote: true,
        }
    }

    #[test]
    fn test_active_hours_wraps_midnight() {
        let hours = ActiveHours { start: 7, end: 1 };
        assert!(hours.contains(7));
        assert!(hours.contains(23));
        assert!(hours.contains(0));
        assert!(!hours.contains(1));
        assert!(!hours.contains(6));
    }

    #[test]
    fn test_active_hours_same_day_and_full_day() {
        let office = ActiveHours { start: 9, end: 17 };
        assert!(office.contains(9));
        assert!(!office.contains(17));
        assert!(ActiveHours { start: 0, end: 0 }.contains(12));
    }

    #[test]
    fn test_seen_set_filters_known_and_batch_duplicates() {
        let mut seen = SeenSet::default();
        seen.record(&[listing("https://a")], Utc::now());

        let fresh = seen.unseen(vec![listing("https://a"), listing("https://b"), listing("https://b")]);

        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].link, "https://b");
        // unseen 不修改集合
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_seen_set_prunes_old_entries() {
        let now = Utc::now();
        let mut seen = SeenSet::default();
        seen.record(&[listing("https://old")], now - chrono::Duration::hours(30));
        seen.record(&[listing("https://new")], now);

        seen.prune(Duration::from_secs(24 * 3600), now);

        assert_eq!(seen.len(), 1);
        assert!(seen.contains(&listing("https://new").key()));
    }

    #[test]
    fn test_seeded_keys_expire_with_their_batch() {
        let now = Utc::now();
        let mut entries = HashMap::new();
        entries.insert(listing("https://old").key(), now - chrono::Duration::hours(23));
        entries.insert(listing("https://fresh").key(), now - chrono::Duration::hours(1));
        let mut seen = SeenSet::seeded(entries);

        seen.prune(Duration::from_secs(24 * 3600), now + chrono::Duration::hours(2));

        assert!(!seen.contains(&listing("https://old").key()));
        assert!(seen.contains(&listing("https://fresh").key()));
        // 批次過期後重新出現的職缺會再次寫入
        assert_eq!(seen.unseen(vec![listing("https://old")]).len(), 1);
    }
}
