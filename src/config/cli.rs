use crate::config::toml_config::ScoutConfig;
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "job-scout")]
#[command(about = "Polls job sources for newly posted listings matching your job titles")]
pub struct CliConfig {
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override storage.data_dir")]
    pub data_dir: Option<String>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Poll every configured source until interrupted (Ctrl-C)
    Run {
        /// Comma-separated job titles; defaults to the saved titles
        #[arg(long, value_delimiter = ',')]
        titles: Vec<String>,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Show whether a run is active and what has been collected
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print listings collected within the retention window
    List {
        #[arg(long)]
        limit: Option<usize>,

        /// Only the most recent batch
        #[arg(long)]
        latest: bool,

        #[arg(long)]
        json: bool,
    },
    /// Show or replace the saved job titles
    Titles {
        #[arg(long, value_delimiter = ',')]
        set: Vec<String>,
    },
    /// Delete batches older than the retention window
    Prune,
}

impl CliConfig {
    /// 載入 TOML 設定（若有），套用命令列覆寫後驗證
    pub fn load_config(&self) -> Result<ScoutConfig> {
        let mut config = match &self.config {
            Some(path) => ScoutConfig::from_file(path)?,
            None => ScoutConfig::default(),
        };

        if let Some(data_dir) = &self.data_dir {
            config.storage.data_dir = data_dir.clone();
        }

        config.validate()?;
        Ok(config)
    }
}
