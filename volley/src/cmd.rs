use core::{num::NonZero, time::Duration};
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::cfg::{ClientKind, TlsVersion, DEFAULT_CONNECTIONS};

/// HTTP benchmarking tool.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Cmd {
    /// Target URL.
    ///
    /// May be omitted if the request profile provides one.
    pub url: Option<String>,
    /// Maximum number of concurrent connections.
    ///
    /// This is also the number of parallel workers.
    #[clap(short, long, default_value_t = DEFAULT_CONNECTIONS)]
    pub connections: NonZero<usize>,
    /// Total number of requests to send.
    ///
    /// Takes precedence over the duration.
    #[clap(short = 'n', long)]
    pub requests: Option<u64>,
    /// Benchmark duration, for example "10s", "1m" or "500ms".
    #[clap(short, long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
    /// Per-request timeout.
    #[clap(short, long, default_value = "2s", value_parser = parse_duration)]
    pub timeout: Duration,
    /// Request method.
    #[clap(short, long)]
    pub method: Option<String>,
    /// Request header in "Name: value" form. Can be repeated.
    #[clap(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,
    /// Request body.
    #[clap(short, long, conflicts_with = "body_file")]
    pub body: Option<String>,
    /// Path to the file to stream as the request body.
    ///
    /// The file is reopened for every request.
    #[clap(short = 'f', long, value_name = "PATH")]
    pub body_file: Option<PathBuf>,
    /// HTTP client implementation.
    #[clap(long, value_enum, default_value_t)]
    pub client: ClientKind,
    /// Skip TLS certificate verification.
    #[clap(short = 'k', long)]
    pub insecure: bool,
    /// Minimum TLS version.
    #[clap(long, value_enum)]
    pub tls_min: Option<TlsVersion>,
    /// Path to the YAML request profile.
    #[clap(long, value_name = "PATH")]
    pub request: Option<PathBuf>,
    /// Be verbose in terms of logging.
    #[clap(short, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Parses durations like "250ms", "10s", "2m", "1h" or a bare number of
/// seconds.
pub fn parse_duration(v: &str) -> Result<Duration, String> {
    let v = v.trim();
    let split = v.find(|c: char| !c.is_ascii_digit()).unwrap_or(v.len());
    let (num, unit) = v.split_at(split);

    let num: u64 = num.parse().map_err(|_| format!("invalid duration '{v}'"))?;
    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "" | "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num.saturating_mul(60)),
        "h" => Duration::from_secs(num.saturating_mul(3600)),
        unit => return Err(format!("unknown duration unit '{unit}' in '{v}'")),
    };

    if duration.is_zero() {
        return Err("duration must be positive".into());
    }

    Ok(duration)
}
