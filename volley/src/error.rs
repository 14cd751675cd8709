use std::io;

/// Errors produced while building or executing requests.
///
/// Only [`Error::Config`] is produced at construction time. Every other
/// variant is a per-call failure, reported together with the
/// [`STATUS_NO_RESPONSE`](crate::executor::STATUS_NO_RESPONSE) sentinel.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed URL, invalid header or contradictory body configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The body producer failed to supply a stream, or the stream failed
    /// while being sent.
    #[error("failed to produce request body: {0}")]
    Body(#[source] io::Error),
    /// Failed to establish a TCP connection.
    #[error("failed to connect: {0}")]
    Dial(#[source] io::Error),
    #[error("TLS handshake failed: {0}")]
    Tls(#[from] native_tls::Error),
    /// The per-call timeout elapsed.
    #[error("request timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The peer sent something that is not a valid HTTP/1.x response.
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Returns `true` if this error was caused by an elapsed timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http(err) => err.is_timeout(),
            Self::Dial(err) | Self::Io(err) => err.kind() == io::ErrorKind::TimedOut,
            Self::Config(..) | Self::Body(..) | Self::Tls(..) | Self::Protocol(..) => false,
        }
    }
}
