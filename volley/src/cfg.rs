use core::{num::NonZero, time::Duration};
use std::{fs, path::Path};

use serde::Deserialize;
use url::Url;

use crate::{
    body::BodySource,
    cmd::Cmd,
    Error,
};

/// Request configuration shared by every executor call.
///
/// Built once and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute target URL, either `http` or `https`.
    pub url: String,
    /// Request method, sent verbatim.
    pub method: String,
    /// Static request headers in the order they should be sent.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: BodySource,
    /// Maximum number of connections to the target.
    pub max_connections: NonZero<usize>,
    /// Per-request timeout, covering the wait for a free connection.
    pub timeout: Duration,
    /// TLS settings for `https` targets. Defaults are used when absent.
    pub tls: Option<TlsConfig>,
    /// Which executor implementation to build.
    pub client: ClientKind,
}

impl Config {
    /// Constructs a `GET` configuration with default limits for the given URL.
    pub fn new<U>(url: U) -> Self
    where
        U: Into<String>,
    {
        Self {
            url: url.into(),
            method: "GET".into(),
            headers: Vec::new(),
            body: BodySource::Empty,
            max_connections: DEFAULT_CONNECTIONS,
            timeout: DEFAULT_TIMEOUT,
            tls: None,
            client: ClientKind::Pooled,
        }
    }
}

pub const DEFAULT_CONNECTIONS: NonZero<usize> = NonZero::new(125).unwrap();
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Executor implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ClientKind {
    /// Bounded connection pool with reusable buffers, HTTP/1.1 only.
    #[default]
    Pooled,
    /// General purpose HTTP client.
    Standard,
}

/// TLS client settings.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Skip server certificate verification.
    pub accept_invalid_certs: bool,
    /// Additional trusted root certificates in PEM format.
    pub root_certificates: Vec<Vec<u8>>,
    /// Minimum accepted protocol version.
    pub min_version: Option<TlsVersion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TlsVersion {
    #[value(name = "1.0")]
    V1_0,
    #[value(name = "1.1")]
    V1_1,
    #[value(name = "1.2")]
    V1_2,
}

impl From<TlsVersion> for native_tls::Protocol {
    fn from(v: TlsVersion) -> Self {
        match v {
            TlsVersion::V1_0 => Self::Tlsv10,
            TlsVersion::V1_1 => Self::Tlsv11,
            TlsVersion::V1_2 => Self::Tlsv12,
        }
    }
}

impl From<TlsVersion> for reqwest::tls::Version {
    fn from(v: TlsVersion) -> Self {
        match v {
            TlsVersion::V1_0 => Self::TLS_1_0,
            TlsVersion::V1_1 => Self::TLS_1_1,
            TlsVersion::V1_2 => Self::TLS_1_2,
        }
    }
}

/// Target URL split into the parts needed on the wire.
#[derive(Debug, Clone)]
pub struct Target {
    url: Url,
    /// Value of the `Host` header: host plus non-default port.
    authority: String,
    /// Path and query.
    request_target: String,
}

impl Target {
    /// Parses and validates the target URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is not an absolute `http` or
    /// `https` URL with a host.
    pub fn parse(url: &str) -> Result<Self, Error> {
        let url = Url::parse(url).map_err(|err| Error::Config(format!("invalid URL '{url}': {err}")))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::Config(format!("unsupported URL scheme '{scheme}'"))),
        }
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            Some(..) | None => return Err(Error::Config(format!("URL '{url}' has no host"))),
        };

        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let request_target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let m = Self { url, authority, request_target };

        Ok(m)
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the host used for the `Host` header.
    #[inline]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    #[inline]
    pub fn request_target(&self) -> &str {
        &self.request_target
    }

    #[inline]
    pub fn is_tls(&self) -> bool {
        self.url.scheme() == "https"
    }
}

/// How much load to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Stop after this many requests in total.
    Requests(u64),
    /// Stop when this much time has passed.
    Duration(Duration),
}

/// Complete benchmark run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub request: Config,
    /// Number of parallel workers sharing the executor.
    pub concurrency: NonZero<usize>,
    pub limit: Limit,
}

impl TryFrom<Cmd> for RunConfig {
    type Error = Error;

    fn try_from(cmd: Cmd) -> Result<Self, Self::Error> {
        let Cmd {
            url,
            connections,
            requests,
            duration,
            timeout,
            method,
            headers,
            body,
            body_file,
            client,
            insecure,
            tls_min,
            request,
            verbose: _,
        } = cmd;

        let profile = match request {
            Some(path) => RequestProfile::from_fs(path)?,
            None => RequestProfile::default(),
        };

        let url = url
            .or(profile.url)
            .ok_or_else(|| Error::Config("target URL is required".into()))?;
        Target::parse(&url)?;

        let mut request = Config::new(url);
        if let Some(method) = method.or(profile.method) {
            request.method = method;
        }

        request.headers = profile
            .headers
            .iter()
            .chain(headers.iter())
            .map(|line| parse_header(line))
            .collect::<Result<_, _>>()?;

        request.body = match (body, body_file) {
            (Some(..), Some(..)) => {
                return Err(Error::Config("body and body file are mutually exclusive".into()));
            }
            (Some(body), None) => BodySource::fixed(body),
            (None, Some(path)) => BodySource::file(path),
            (None, None) => match (profile.body, profile.body_file) {
                (Some(..), Some(..)) => {
                    return Err(Error::Config("profile sets both body and body_file".into()));
                }
                (Some(body), None) => BodySource::fixed(body),
                (None, Some(path)) => BodySource::file(path),
                (None, None) => BodySource::Empty,
            },
        };

        request.max_connections = connections;
        request.timeout = timeout;
        request.client = client;
        if insecure || tls_min.is_some() {
            request.tls = Some(TlsConfig {
                accept_invalid_certs: insecure,
                root_certificates: Vec::new(),
                min_version: tls_min,
            });
        }

        let limit = match (requests, duration) {
            (Some(n), _) => Limit::Requests(n),
            (None, Some(d)) => Limit::Duration(d),
            (None, None) => Limit::Duration(DEFAULT_DURATION),
        };

        let m = Self {
            request,
            concurrency: connections,
            limit,
        };

        Ok(m)
    }
}

pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

/// Parses a header given as `Name: value`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the line has no colon or the name is empty.
pub fn parse_header(line: &str) -> Result<(String, String), Error> {
    match line.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.trim().to_string())),
        Some(..) | None => Err(Error::Config(format!("invalid header '{line}', expected 'Name: value'"))),
    }
}

/// Request description loaded from a YAML file.
///
/// Command line options take precedence; headers from both sources are sent,
/// profile headers first.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestProfile {
    url: Option<String>,
    method: Option<String>,
    /// Headers in `Name: value` form.
    #[serde(default)]
    headers: Vec<String>,
    body: Option<String>,
    body_file: Option<String>,
}

impl RequestProfile {
    /// Loads a request profile from the given path.
    pub fn from_fs<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        log::debug!("loading request profile from '{}' ...", path.display());

        let data = fs::read(path)
            .map_err(|err| Error::Config(format!("failed to read '{}': {err}", path.display())))?;
        let profile = serde_yaml::from_slice(&data)
            .map_err(|err| Error::Config(format!("failed to parse '{}': {err}", path.display())))?;

        Ok(profile)
    }
}
