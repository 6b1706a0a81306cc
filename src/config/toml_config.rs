use crate::core::fetcher::{FetchSettings, DEFAULT_USER_AGENT};
use crate::core::matcher::{LocationPolicy, DEFAULT_LOCATION_INDICATORS, DEFAULT_THRESHOLD};
use crate::core::orchestrator::{ActiveHours, OrchestratorSettings};
use crate::utils::error::{Result, ScoutError};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    pub fetcher: FetcherConfig,
    pub schedule: ScheduleConfig,
    pub matcher: MatcherConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub sources: Vec<FeedSourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub min_interval_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 2,
            max_attempts: 3,
            retry_delay_secs: 5,
            timeout_seconds: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cycle_interval_secs: u64,
    pub adapter_cooldown_secs: u64,
    pub error_cooldown_secs: u64,
    pub stop_timeout_secs: u64,
    /// 只保留張貼時間在此秒數內的職缺
    pub max_listing_age_secs: Option<u64>,
    /// `[start, end]` 本地小時，例如 `[7, 1]`
    pub active_hours: Option<[u32; 2]>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 3600,
            adapter_cooldown_secs: 5,
            error_cooldown_secs: 300,
            stop_timeout_secs: 5,
            max_listing_age_secs: None,
            active_hours: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub threshold: u8,
    pub location_indicators: Vec<String>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            location_indicators: DEFAULT_LOCATION_INDICATORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub retention_hours: u64,
    pub titles_file: Option<String>,
    pub pid_file: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            retention_hours: 24,
            titles_file: None,
            pid_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 設定後每日寫入一個日誌檔
    pub directory: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: Some("logs".to_string()),
            json: false,
        }
    }
}

/// JSON 職缺來源的欄位對應，支援以 `.` 表示巢狀欄位
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub title: String,
    pub company: String,
    pub link: String,
    pub posted: String,
    pub location: String,
    pub remote: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            title: "title".to_string(),
            company: "company".to_string(),
            link: "url".to_string(),
            posted: "posted".to_string(),
            location: "location".to_string(),
            remote: "remote".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    pub name: String,
    /// 含 `{title}` 佔位符的搜尋網址
    pub url: String,
    /// JSON 根物件中職缺陣列的欄位；未設定時根即為陣列
    pub items_field: Option<String>,
    /// 相對連結的基底網址
    pub base_url: Option<String>,
    /// 強制標記為遠端（例如只搜尋遠端職缺的頁面）
    pub remote: Option<bool>,
    #[serde(default)]
    pub fields: FieldMapping,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScoutConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);
        let config: Self = toml::from_str(&processed)?;
        Ok(config)
    }

    /// 替換環境變數 (例如 ${JOBS_API_KEY})
    fn substitute_env_vars(content: &str) -> String {
        use regex::Regex;
        use std::sync::OnceLock;

        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    pub fn jobs_dir(&self) -> PathBuf {
        Path::new(&self.storage.data_dir).join("jobs")
    }

    pub fn titles_path(&self) -> PathBuf {
        match &self.storage.titles_file {
            Some(path) => PathBuf::from(path),
            None => Path::new(&self.storage.data_dir).join("job_titles.txt"),
        }
    }

    pub fn pid_path(&self) -> PathBuf {
        match &self.storage.pid_file {
            Some(path) => PathBuf::from(path),
            None => Path::new(&self.storage.data_dir).join("job_scout.pid"),
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.storage.retention_hours.saturating_mul(3600))
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            min_interval: Duration::from_secs(self.fetcher.min_interval_secs),
            max_attempts: self.fetcher.max_attempts,
            retry_delay: Duration::from_secs(self.fetcher.retry_delay_secs),
            request_timeout: Duration::from_secs(self.fetcher.timeout_seconds),
            user_agent: self.fetcher.user_agent.clone(),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let schedule = &self.schedule;
        OrchestratorSettings {
            adapter_cooldown: Duration::from_secs(schedule.adapter_cooldown_secs),
            cycle_interval: Duration::from_secs(schedule.cycle_interval_secs),
            error_cooldown: Duration::from_secs(schedule.error_cooldown_secs),
            stop_timeout: Duration::from_secs(schedule.stop_timeout_secs),
            threshold: self.matcher.threshold,
            retention: self.retention(),
            max_listing_age: schedule.max_listing_age_secs.map(Duration::from_secs),
            active_hours: schedule
                .active_hours
                .map(|[start, end]| ActiveHours { start, end }),
            location: LocationPolicy::new(self.matcher.location_indicators.clone()),
        }
    }
}

impl Validate for ScoutConfig {
    fn validate(&self) -> Result<()> {
        validate_positive_number("fetcher.max_attempts", self.fetcher.max_attempts as u64, 1)?;
        validate_positive_number("fetcher.timeout_seconds", self.fetcher.timeout_seconds, 1)?;
        validate_positive_number("schedule.cycle_interval_secs", self.schedule.cycle_interval_secs, 1)?;
        validate_range("matcher.threshold", self.matcher.threshold, 0, 100)?;
        validate_path("storage.data_dir", &self.storage.data_dir)?;
        validate_positive_number("storage.retention_hours", self.storage.retention_hours, 1)?;

        if let Some([start, end]) = self.schedule.active_hours {
            validate_range("schedule.active_hours", start, 0, 23)?;
            validate_range("schedule.active_hours", end, 0, 23)?;
        }
        if let Some(dir) = &self.logging.directory {
            validate_path("logging.directory", dir)?;
        }

        for (index, source) in self.sources.iter().enumerate() {
            validate_non_empty_string(&format!("sources[{}].name", index), &source.name)?;
            validate_url(&format!("sources[{}].url", index), &source.url)?;
            if !source.url.contains("{title}") {
                return Err(ScoutError::InvalidConfigValueError {
                    field: format!("sources[{}].url", index),
                    value: source.url.clone(),
                    reason: "URL must contain a {title} placeholder".to_string(),
                });
            }
            if let Some(base) = &source.base_url {
                validate_url(&format!("sources[{}].base_url", index), base)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ScoutConfig::from_toml_str("").unwrap();
        assert_eq!(config.matcher.threshold, 80);
        assert_eq!(config.fetcher.max_attempts, 3);
        assert_eq!(config.schedule.cycle_interval_secs, 3600);
        assert_eq!(config.jobs_dir(), PathBuf::from("data/jobs"));
        assert!(config.sources.is_empty());
        assert!(config.validate().is_ok());

        let settings = config.orchestrator_settings();
        assert_eq!(settings.adapter_cooldown, Duration::from_secs(5));
        assert_eq!(settings.error_cooldown, Duration::from_secs(300));
        assert_eq!(settings.retention, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_full_config_parses() {
        let content = r#"
[fetcher]
min_interval_secs = 1
retry_delay_secs = 10

[schedule]
cycle_interval_secs = 1800
active_hours = [7, 1]
max_listing_age_secs = 3600

[matcher]
threshold = 85

[storage]
data_dir = "/tmp/job-scout"

[logging]
json = true

[[sources]]
name = "Example Jobs"
url = "https://jobs.example.com/api/search?q={title}"
items_field = "results"
remote = true

[sources.fields]
link = "apply_url"
company = "company.name"
"#;
        let config = ScoutConfig::from_toml_str(content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetcher.min_interval_secs, 1);
        assert_eq!(config.fetcher.max_attempts, 3);
        assert_eq!(config.schedule.active_hours, Some([7, 1]));
        assert_eq!(config.sources.len(), 1);

        let source = &config.sources[0];
        assert!(source.enabled);
        assert_eq!(source.fields.link, "apply_url");
        assert_eq!(source.fields.title, "title");

        let settings = config.orchestrator_settings();
        assert_eq!(settings.threshold, 85);
        assert_eq!(settings.active_hours, Some(ActiveHours { start: 7, end: 1 }));
        assert_eq!(settings.max_listing_age, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("JOB_SCOUT_TEST_DATA_DIR", "/var/lib/job-scout");
        let config = ScoutConfig::from_toml_str(
            r#"
[storage]
data_dir = "${JOB_SCOUT_TEST_DATA_DIR}"
"#,
        )
        .unwrap();
        assert_eq!(config.storage.data_dir, "/var/lib/job-scout");
    }

    #[test]
    fn test_source_without_placeholder_is_rejected() {
        let content = r#"
[[sources]]
name = "Broken"
url = "https://jobs.example.com/all"
"#;
        let config = ScoutConfig::from_toml_str(content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ScoutError::InvalidConfigValueError { .. }));
    }

    #[test]
    fn test_huge_retention_saturates() {
        let config = ScoutConfig::from_toml_str(&format!("[storage]\nretention_hours = {}\n", i64::MAX)).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_invalid_active_hours_rejected() {
        let config = ScoutConfig::from_toml_str("[schedule]\nactive_hours = [7, 25]\n").unwrap();
        assert!(config.validate().is_err());
    }
}
