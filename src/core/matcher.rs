use crate::domain::model::{Listing, TargetSet};

pub const DEFAULT_THRESHOLD: u8 = 80;

/// 美國或遠端職缺的位置關鍵字
pub const DEFAULT_LOCATION_INDICATORS: [&str; 4] = ["remote", "united states", "usa", "us"];

/// 以 InDel 距離正規化的相似度（0–100）：`2 * LCS / (len(a) + len(b))`
pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

fn ratio_chars(a: &[char], b: &[char]) -> u8 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let lcs = lcs_len(a, b);
    ((200.0 * lcs as f64) / total as f64).round() as u8
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 較短字串與較長字串中每個等長視窗比較，取最高分
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    if short.is_empty() {
        return 0;
    }

    let mut best = 0;
    for window in long.windows(short.len()) {
        best = best.max(ratio_chars(short, window));
        if best == 100 {
            break;
        }
    }
    best
}

/// 職稱比對器。建立後目標職稱不可變；換職稱要建立新的 Matcher。
#[derive(Debug, Clone)]
pub struct Matcher {
    targets: Vec<String>,
    threshold: u8,
}

impl Matcher {
    pub fn new(targets: &TargetSet, threshold: u8) -> Self {
        Self {
            targets: targets.iter().map(|t| t.trim().to_lowercase()).collect(),
            threshold,
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// 對任一目標職稱成立即接受：互為子字串、整體相似度或部分相似度達門檻
    pub fn matches_title(&self, title: &str) -> bool {
        let title = title.trim().to_lowercase();
        if title.is_empty() {
            return false;
        }

        self.targets.iter().any(|target| {
            target.contains(&title)
                || title.contains(target.as_str())
                || ratio(target, &title) >= self.threshold
                || partial_ratio(target, &title) >= self.threshold
        })
    }

    pub fn accepts(&self, listing: &Listing) -> bool {
        self.matches_title(&listing.title)
    }

    /// 所有目標職稱中的最高分；子字串命中為 100。僅供診斷，不作為篩選條件。
    pub fn match_quality(&self, title: &str) -> u8 {
        let title = title.trim().to_lowercase();
        if title.is_empty() {
            return 0;
        }

        let mut best = 0;
        for target in &self.targets {
            if target.contains(&title) || title.contains(target.as_str()) {
                return 100;
            }
            best = best.max(ratio(target, &title));
            best = best.max(partial_ratio(target, &title));
        }
        best
    }

    pub fn filter(&self, listings: Vec<Listing>) -> Vec<Listing> {
        listings.into_iter().filter(|l| self.accepts(l)).collect()
    }
}

/// 位置政策：遠端職缺，或位置文字包含美國相關關鍵字
#[derive(Debug, Clone)]
pub struct LocationPolicy {
    indicators: Vec<String>,
}

impl Default for LocationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LOCATION_INDICATORS.iter().map(|s| s.to_string()).collect())
    }
}

impl LocationPolicy {
    pub fn new(indicators: Vec<String>) -> Self {
        Self {
            indicators: indicators.into_iter().map(|i| i.to_lowercase()).collect(),
        }
    }

    pub fn is_valid_location(&self, location: Option<&str>) -> bool {
        match location {
            Some(location) if !location.trim().is_empty() => {
                let location = location.to_lowercase();
                self.indicators.iter().any(|i| location.contains(i.as_str()))
            }
            _ => false,
        }
    }

    pub fn accepts(&self, listing: &Listing) -> bool {
        listing.is_remote || self.is_valid_location(listing.location.as_deref())
    }

    pub fn filter(&self, listings: Vec<Listing>) -> Vec<Listing> {
        listings.into_iter().filter(|l| self.accepts(l)).collect()
    }
}
