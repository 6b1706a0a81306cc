use crate::config::toml_config::LoggingConfig;
use crate::utils::error::{Result, ScoutError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日誌輸出的生命週期控制：程式啟動時建立一次，結束時呼叫 `shutdown`
#[derive(Debug)]
pub struct LogHandle {
    file: Option<Arc<File>>,
    path: Option<PathBuf>,
}

impl LogHandle {
    pub fn log_file(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 將檔案 sink 寫入磁碟
    pub fn shutdown(self) {
        if let Some(file) = self.file {
            let mut writer: &File = &file;
            let _ = writer.flush();
            let _ = file.sync_all();
        }
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    let directive = if verbose {
        "job_scout=debug,info"
    } else {
        "job_scout=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

/// 每日一個日誌檔：`job_scout_YYYYMMDD.log`
pub fn daily_log_path(dir: &Path) -> PathBuf {
    dir.join(format!(
        "job_scout_{}.log",
        chrono::Local::now().format("%Y%m%d")
    ))
}

fn open_log_file(dir: &Path) -> Result<(Arc<File>, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = daily_log_path(dir);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((Arc::new(file), path))
}

pub fn init_logger(config: &LoggingConfig, verbose: bool) -> Result<LogHandle> {
    let console = if config.json {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .json()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .boxed()
    };

    let (file, path) = match &config.directory {
        Some(dir) => {
            let (file, path) = open_log_file(Path::new(dir))?;
            (Some(file), Some(path))
        }
        None => (None, None),
    };

    let file_layer = file.clone().map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| ScoutError::ConfigError {
            message: format!("Logger already initialised: {}", e),
        })?;

    Ok(LogHandle { file, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_daily_log_path_format() {
        let path = daily_log_path(Path::new("logs"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("job_scout_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "job_scout_20260101.log".len());
    }

    #[test]
    fn test_open_log_file_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("nested/logs");
        let (_file, path) = open_log_file(&dir).unwrap();
        assert!(path.exists());
    }
}
