use crate::core::fetcher::FetchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}': '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Adapter '{source_name}' failed: {message}")]
    AdapterError {
        source_name: String,
        message: String,
    },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

impl ScoutError {
    pub fn adapter(source_name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::AdapterError {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    /// 是否為設定相關錯誤（CLI 以此決定退出碼）
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigError { .. }
                | Self::InvalidConfigValueError { .. }
                | Self::MissingConfigError { .. }
                | Self::TomlError(_)
        )
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::InvalidConfigValueError { field, reason, .. } => {
                format!("Setting '{}' is invalid: {}", field, reason)
            }
            Self::MissingConfigError { field } => format!("Setting '{}' is required", field),
            Self::ValidationError { message } => message.clone(),
            Self::IoError(e) => format!("File system problem: {}", e),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::TomlError(_) => "Check the configuration file and command-line arguments",
            Self::ValidationError { .. } => "Provide 1 to 10 non-empty job titles",
            Self::IoError(_) | Self::CsvError(_) => {
                "Check that the data directory exists and is writable"
            }
            Self::HttpError(_) | Self::Fetch(_) => "Check network connectivity and the source URL",
            _ => "Re-run with --verbose for more detail",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
