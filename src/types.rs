#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset. Dependencies
    /// stay at `warn` so the AWS SDK doesn't drown out per-key lines.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "warn,s3_mirror=trace",
            LogLevel::Debug => "warn,s3_mirror=debug",
            LogLevel::Info => "warn,s3_mirror=info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
