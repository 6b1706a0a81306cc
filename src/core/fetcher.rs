use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// 同一個 Fetcher 兩次請求之間的最小間隔
    pub min_interval: Duration,
    /// 每次 fetch 的嘗試上限（包含 429 重試）
    pub max_attempts: u32,
    /// 連線錯誤、5xx 與沒有 Retry-After 的 429 之後的等待時間
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{url} is not available (HTTP {status})")]
    NotFound { url: String, status: u16 },

    #[error("unexpected HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("gave up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// 傳輸層回應：只保留重試邏輯需要的欄位
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl RawResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }
}

/// 連線層錯誤（DNS、逾時、連線中斷）
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<RawResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: &FetchSettings) -> crate::utils::error::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> std::result::Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = if status == 200 {
            response
                .text()
                .await
                .map_err(|e| TransportError(e.to_string()))?
        } else {
            String::new()
        };

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Retry-After 可以是秒數或 HTTP 日期
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let wait = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

/// 每個 Fetcher 一個：保證兩次請求之間至少間隔 `min_interval`
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if let Some(at) = *next_slot {
            tokio::time::sleep_until(at).await;
        }
        *next_slot = Some(Instant::now() + self.min_interval);
    }
}

pub struct Fetcher {
    transport: Arc<dyn Transport>,
    settings: FetchSettings,
    limiter: RateLimiter,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, settings: FetchSettings) -> Self {
        let limiter = RateLimiter::new(settings.min_interval);
        Self {
            transport,
            settings,
            limiter,
        }
    }

    pub fn with_reqwest(settings: FetchSettings) -> crate::utils::error::Result<Self> {
        let transport = ReqwestTransport::new(&settings)?;
        Ok(Self::new(Arc::new(transport), settings))
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// 取得一個 URL 的內容。
    ///
    /// - 200：回傳內容
    /// - 429：等待 Retry-After（預設 `retry_delay`）後重試，仍計入嘗試次數
    /// - 403 / 404：立即回傳 `NotFound`，不重試
    /// - 5xx 與連線錯誤：等待 `retry_delay` 後重試，直到用完嘗試次數
    /// - 其他狀態碼：立即失敗
    pub async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
        self.limiter.acquire().await;

        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let wait = match self.transport.get(url).await {
                Ok(response) => match response.status {
                    200 => return Ok(response.body),
                    429 => {
                        let wait = response.retry_after.unwrap_or(self.settings.retry_delay);
                        tracing::warn!("⏳ Rate limited by {}. Waiting {:?}...", url, wait);
                        last_error = "rate limited (HTTP 429)".to_string();
                        wait
                    }
                    status @ (403 | 404) => {
                        tracing::warn!("🚫 {} returned {}. Skipping...", url, status);
                        return Err(FetchError::NotFound {
                            url: url.to_string(),
                            status,
                        });
                    }
                    status if (500..600).contains(&status) => {
                        tracing::warn!(
                            "Server error {} from {} on attempt {}/{}",
                            status,
                            url,
                            attempt,
                            max_attempts
                        );
                        last_error = format!("HTTP {}", status);
                        self.settings.retry_delay
                    }
                    status => {
                        tracing::warn!("Unexpected status {} for {}", status, url);
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status,
                        });
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "Connection error on attempt {}/{} for {}: {}",
                        attempt,
                        max_attempts,
                        url,
                        e
                    );
                    last_error = e.to_string();
                    self.settings.retry_delay
                }
            };

            if attempt < max_attempts {
                tokio::time::sleep(wait).await;
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTransport {
        responses: std::sync::Mutex<VecDeque<std::result::Result<RawResponse, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<std::result::Result<RawResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, _url: &str) -> std::result::Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError("script exhausted".to_string())))
        }
    }

    fn settings() -> FetchSettings {
        FetchSettings {
            min_interval: Duration::from_secs(1),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            ..FetchSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_server_error_then_success() {
        let mut limited = RawResponse::status(429);
        limited.retry_after = Some(Duration::from_secs(2));
        let transport = ScriptedTransport::new(vec![
            Ok(limited),
            Ok(RawResponse::status(500)),
            Ok(RawResponse::ok("<html>jobs</html>")),
        ]);
        let fetcher = Fetcher::new(transport.clone(), settings());

        let started = Instant::now();
        let body = fetcher.fetch("https://jobs.test/search").await.unwrap();

        assert_eq!(body, "<html>jobs</html>");
        assert_eq!(transport.calls(), 3);
        // Retry-After (2s) + 一次重試間隔 (5s)
        assert!(started.elapsed() >= Duration::from_secs(7));
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse::status(404))]);
        let fetcher = Fetcher::new(transport.clone(), settings());

        let err = fetcher.fetch("https://jobs.test/missing").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_is_not_found() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse::status(403))]);
        let fetcher = Fetcher::new(transport.clone(), settings());

        let err = fetcher.fetch("https://jobs.test/blocked").await.unwrap_err();

        assert_eq!(
            err,
            FetchError::NotFound {
                url: "https://jobs.test/blocked".to_string(),
                status: 403
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_status_fails_immediately() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse::status(400))]);
        let fetcher = Fetcher::new(transport.clone(), settings());

        let err = fetcher.fetch("https://jobs.test/bad").await.unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 400, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_errors_exhaust_budget() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError("connection refused".to_string())),
            Err(TransportError("connection refused".to_string())),
            Err(TransportError("connection reset".to_string())),
        ]);
        let fetcher = Fetcher::new(transport.clone(), settings());

        let started = Instant::now();
        let err = fetcher.fetch("https://jobs.test/down").await.unwrap_err();

        assert_eq!(transport.calls(), 3);
        // 最後一次失敗後不再等待
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        match err {
            FetchError::Exhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "connection reset");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_without_hint_uses_retry_delay() {
        let transport = ScriptedTransport::new(vec![
            Ok(RawResponse::status(429)),
            Ok(RawResponse::ok("ok")),
        ]);
        let fetcher = Fetcher::new(transport, settings());

        let started = Instant::now();
        fetcher.fetch("https://jobs.test/busy").await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_calls_are_spaced() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse::ok("a")), Ok(RawResponse::ok("b"))]);
        let fetcher = Fetcher::new(transport, settings());

        let started = Instant::now();
        fetcher.fetch("https://jobs.test/1").await.unwrap();
        fetcher.fetch("https://jobs.test/2").await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 120 "), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
    }
}
