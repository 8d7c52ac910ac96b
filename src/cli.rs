use clap::Parser;
use crate::types::*;

#[derive(Parser, Debug)]
#[command(
    name = "s3-mirror",
    version,
    about = "Mirror a prefix of a public S3 bucket into a local directory"
)]
pub struct Cli {
    /// Bucket to mirror
    #[arg(short = 'b', long, env = "MIRROR_BUCKET")]
    pub bucket: String,

    /// Only mirror keys starting with this prefix
    #[arg(long, env = "MIRROR_PREFIX", default_value = "")]
    pub prefix: String,

    /// Remove this leading part of each key when building local paths
    #[arg(long, env = "MIRROR_STRIP_PREFIX")]
    pub strip_prefix: Option<String>,

    /// Local directory for downloads
    #[arg(short = 'd', long, env = "MIRROR_DIRECTORY")]
    pub directory: Option<String>,

    /// Number of keys processed concurrently
    #[arg(short = 'w', long, env = "MIRROR_WORKERS", default_value_t = 8)]
    pub workers: usize,

    /// Attempts per key before it is counted as failed
    #[arg(long, env = "MIRROR_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    /// Base delay in seconds between attempts (doubled after each failure)
    #[arg(long, env = "MIRROR_RETRY_DELAY", default_value_t = 1)]
    pub retry_delay: u64,

    /// Upper bound in seconds for the delay between attempts
    #[arg(long, default_value_t = 60)]
    pub max_retry_delay: u64,

    /// Add random jitter to retry delays
    #[arg(long)]
    pub retry_jitter: bool,

    /// Log a progress line every N processed keys
    #[arg(long, env = "MIRROR_REPORT_EVERY", default_value_t = 100)]
    pub report_every: u64,

    /// Seconds to wait for in-flight downloads after a shutdown signal
    #[arg(long, default_value_t = 30)]
    pub shutdown_grace: u64,

    /// Bucket region (detected automatically when wrong)
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Custom S3-compatible endpoint, addressed path-style
    #[arg(long, env = "MIRROR_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Print matching keys without downloading
    #[arg(long)]
    pub list_only: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub report_json: Option<String>,
}
