use crate::domain::model::parse_timestamp;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;

fn relative_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:posted\s+)?(an?|\d+)\+?\s*(m|mins?|minutes?|h|hrs?|hours?|d|days?|w|wks?|weeks?|mo|mos|months?)\b",
        )
        .expect("relative time pattern is valid")
    })
}

/// 解析 "2 hours ago"、"3d"、"30+ days ago"、"yesterday" 這類相對時間
pub fn parse_relative(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim().to_lowercase();

    match text.as_str() {
        "just now" | "now" | "today" | "just posted" | "posted today" | "new" => return Some(now),
        "yesterday" | "posted yesterday" => return Some(now - Duration::days(1)),
        _ => {}
    }

    let caps = relative_pattern().captures(&text)?;
    let amount: i64 = match &caps[1] {
        "a" | "an" => 1,
        n => n.parse().ok()?,
    };

    // 數字來自外部頁面，超出範圍時視為無法解析
    let unit = &caps[2];
    let delta = if unit == "m" || unit.starts_with("min") {
        Duration::try_minutes(amount)
    } else if unit.starts_with('h') {
        Duration::try_hours(amount)
    } else if unit.starts_with('d') {
        Duration::try_days(amount)
    } else if unit.starts_with('w') {
        Duration::try_weeks(amount)
    } else {
        amount.checked_mul(30).and_then(Duration::try_days)
    }?;

    now.checked_sub_signed(delta)
}

/// 張貼時間：先試 ISO-8601，再試相對時間，都失敗時以收集時間代替
pub fn parse_posted(text: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    parse_timestamp(text)
        .or_else(|| parse_relative(text, now))
        .unwrap_or(now)
}
