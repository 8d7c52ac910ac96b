use std::path::PathBuf;
use std::time::Duration;

use crate::download::DownloadConfig;
use crate::retry::RetryConfig;

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bucket: String,
    pub prefix: String,
    pub strip_prefix: Option<String>,
    /// Empty only in list-only mode.
    pub directory: PathBuf,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub report_json: Option<PathBuf>,

    pub retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    pub report_every: u64,
    pub shutdown_grace_secs: u64,
    pub workers: usize,
    pub max_attempts: u32,

    pub retry_jitter: bool,
    pub no_progress_bar: bool,
    pub list_only: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        let bucket = cli.bucket.trim().to_string();
        if bucket.is_empty() {
            anyhow::bail!("--bucket must not be empty");
        }
        if cli.workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }
        if cli.max_attempts == 0 {
            anyhow::bail!("--max-attempts must be at least 1");
        }
        if cli.report_every == 0 {
            anyhow::bail!("--report-every must be at least 1");
        }
        if cli.max_retry_delay < cli.retry_delay {
            anyhow::bail!(
                "--max-retry-delay ({}) is smaller than --retry-delay ({})",
                cli.max_retry_delay,
                cli.retry_delay
            );
        }

        let directory = match cli.directory.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => expand_tilde(d),
            _ if cli.list_only => PathBuf::new(),
            _ => anyhow::bail!("--directory is required unless --list-only is given"),
        };

        Ok(Self {
            bucket,
            prefix: cli.prefix,
            strip_prefix: cli.strip_prefix.filter(|p| !p.is_empty()),
            directory,
            region: cli.region,
            endpoint_url: cli.endpoint_url.filter(|u| !u.is_empty()),
            report_json: cli.report_json.map(|p| expand_tilde(&p)),
            retry_delay_secs: cli.retry_delay,
            max_retry_delay_secs: cli.max_retry_delay,
            report_every: cli.report_every,
            shutdown_grace_secs: cli.shutdown_grace,
            workers: cli.workers,
            max_attempts: cli.max_attempts,
            retry_jitter: cli.retry_jitter,
            no_progress_bar: cli.no_progress_bar,
            list_only: cli.list_only,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_secs: self.retry_delay_secs,
            max_delay_secs: self.max_retry_delay_secs,
            jitter: self.retry_jitter,
        }
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            directory: self.directory.clone(),
            strip_prefix: self.strip_prefix.clone(),
            workers: self.workers,
            retry: self.retry_config(),
            report_every: self.report_every,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            no_progress_bar: self.no_progress_bar,
        }
    }
}
