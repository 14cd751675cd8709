//! Connection establishment with traffic accounting.

use core::{
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{ready, Context, Poll},
};
use std::{io, sync::Arc};

use pin_project_lite::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_native_tls::{TlsConnector, TlsStream};
use url::Host;

use crate::{
    cfg::{Target, TlsConfig},
    Error,
};

/// Byte counters shared between all connections of an executor and an
/// external traffic collector.
#[derive(Debug, Clone, Default)]
pub struct Traffic {
    bytes_read: Arc<AtomicU64>,
    bytes_written: Arc<AtomicU64>,
}

impl Traffic {
    /// Constructs counters on top of externally owned accumulators.
    #[inline]
    pub fn new(bytes_read: Arc<AtomicU64>, bytes_written: Arc<AtomicU64>) -> Self {
        Self { bytes_read, bytes_written }
    }

    /// Total number of bytes read from the wire.
    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Total number of bytes written to the wire.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    #[inline]
    fn on_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    #[inline]
    fn on_write(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }
}

pin_project! {
    /// Stream wrapper tallying every byte passing through it.
    ///
    /// Only observes: reads, writes, flushes and shutdowns are forwarded
    /// untouched.
    #[derive(Debug)]
    pub struct CountingStream<S> {
        #[pin]
        inner: S,
        traffic: Traffic,
    }
}

impl<S> CountingStream<S> {
    #[inline]
    pub fn new(inner: S, traffic: Traffic) -> Self {
        Self { inner, traffic }
    }
}

impl<S> AsyncRead for CountingStream<S>
where
    S: AsyncRead,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let filled = buf.filled().len();

        ready!(this.inner.poll_read(cx, buf))?;
        this.traffic.on_read(buf.filled().len() - filled);

        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncWrite for CountingStream<S>
where
    S: AsyncWrite,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();

        let n = ready!(this.inner.poll_write(cx, buf))?;
        this.traffic.on_write(n);

        Poll::Ready(Ok(n))
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// Established connection to the target.
///
/// Counting happens below TLS, so encrypted traffic is accounted with its
/// record overhead.
#[derive(Debug)]
pub enum Conn {
    Plain(CountingStream<TcpStream>),
    Tls(Box<TlsStream<CountingStream<TcpStream>>>),
}

impl AsyncRead for Conn {
    #[inline]
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    #[inline]
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens instrumented connections to a single fixed target.
#[derive(Clone)]
pub struct Dialer {
    host: Host<String>,
    port: u16,
    /// TLS connector, if the target is `https`.
    tls: Option<TlsConnector>,
    traffic: Traffic,
}

impl Dialer {
    /// Constructs a dialer for the given target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the TLS settings cannot be applied.
    pub fn new(target: &Target, tls: Option<&TlsConfig>, traffic: Traffic) -> Result<Self, Error> {
        let url = target.url();
        let host = match url.host() {
            Some(host) => host.to_owned(),
            None => return Err(Error::Config(format!("URL '{url}' has no host"))),
        };
        let port = match url.port_or_known_default() {
            Some(port) => port,
            None => return Err(Error::Config(format!("URL '{url}' has no port"))),
        };

        let tls = if target.is_tls() {
            let connector = tls_connector(tls.cloned().unwrap_or_default())?;
            Some(connector)
        } else {
            None
        };

        let m = Self { host, port, tls, traffic };

        Ok(m)
    }

    #[inline]
    pub fn traffic(&self) -> &Traffic {
        &self.traffic
    }

    /// Establishes a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dial`] if the TCP connection fails and [`Error::Tls`]
    /// if the TLS handshake fails.
    pub async fn dial(&self) -> Result<Conn, Error> {
        let stream = match &self.host {
            Host::Domain(domain) => TcpStream::connect((domain.as_str(), self.port)).await,
            Host::Ipv4(ip) => TcpStream::connect((*ip, self.port)).await,
            Host::Ipv6(ip) => TcpStream::connect((*ip, self.port)).await,
        }
        .map_err(Error::Dial)?;
        stream.set_nodelay(true).map_err(Error::Dial)?;

        let stream = CountingStream::new(stream, self.traffic.clone());
        let conn = match &self.tls {
            Some(connector) => {
                let domain = self.host.to_string();
                let stream = connector.connect(domain.trim_matches(['[', ']']), stream).await?;
                Conn::Tls(Box::new(stream))
            }
            None => Conn::Plain(stream),
        };

        Ok(conn)
    }
}

impl core::fmt::Debug for Dialer {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        fmt.debug_struct("Dialer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Builds a TLS connector from the given settings.
pub fn tls_connector(cfg: TlsConfig) -> Result<TlsConnector, Error> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(cfg.accept_invalid_certs);
    for pem in &cfg.root_certificates {
        builder.add_root_certificate(native_tls::Certificate::from_pem(pem)?);
    }
    if let Some(version) = cfg.min_version {
        builder.min_protocol_version(Some(version.into()));
    }

    Ok(TlsConnector::from(builder.build()?))
}
