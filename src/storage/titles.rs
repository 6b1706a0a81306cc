use crate::domain::model::TargetSet;
use crate::utils::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

const HEADER: &str = "title";

/// 職稱清單檔：單欄 CSV，標頭為 `title`
#[derive(Debug, Clone)]
pub struct TitleFile {
    path: PathBuf,
}

impl TitleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, targets: &TargetSet) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record([HEADER])?;
        for title in targets.iter() {
            writer.write_record([title])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// 檔案不存在或沒有任何職稱時回傳 `None`
    pub fn load(&self) -> Result<Option<TargetSet>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        let mut titles = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let Some(value) = record.get(0).map(str::trim) else {
                continue;
            };
            if value.is_empty() || (index == 0 && value.eq_ignore_ascii_case(HEADER)) {
                continue;
            }
            titles.push(value.to_string());
        }

        if titles.is_empty() {
            return Ok(None);
        }
        TargetSet::new(titles).map(Some)
    }
}
