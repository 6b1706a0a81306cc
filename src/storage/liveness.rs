use crate::utils::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// 執行中標記檔：啟動時寫入 PID，停止時移除，供外部工具判斷背景輪詢是否進行中
#[derive(Debug, Clone)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, std::process::id().to_string())?;
        Ok(())
    }

    /// 不存在時視為成功
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    pub fn is_present(&self) -> bool {
        self.path.exists()
    }
}
