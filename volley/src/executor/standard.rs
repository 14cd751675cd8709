use bytes::BytesMut;
use futures_util::stream::{self, Stream};
use reqwest::{redirect::Policy, Body, Certificate, Client, Method, Url};
use tokio::io::AsyncReadExt;

use super::RequestExecutor;
use crate::{
    body::{BodyStream, RequestBody},
    cfg::{Config, Target},
    header, BodySource, Error,
};

/// Size of a single read from a streamed request body.
const CHUNK_SIZE: usize = 16 * 1024;

/// Executor built on a general purpose HTTP client.
///
/// Requests are constructed from scratch for every call; connection reuse is
/// left to the client's keep-alive pool. Header names are sent lowercased,
/// use [`PooledExecutor`](super::PooledExecutor) when the exact case matters.
#[derive(Debug)]
pub struct StandardExecutor {
    client: Client,
    method: Method,
    url: Url,
    body: BodySource,
}

impl StandardExecutor {
    /// Constructs a new [`StandardExecutor`] for the given target.
    ///
    /// Redirects are not followed: the first response is the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on invalid headers or method and
    /// [`Error::Http`] if the client cannot be built.
    pub fn new(cfg: &Config, target: &Target) -> Result<Self, Error> {
        let method = Method::from_bytes(cfg.method.as_bytes())
            .map_err(|err| Error::Config(format!("invalid method '{}': {err}", cfg.method)))?;
        let headers = header::header_map(cfg.headers.iter().map(|(k, v)| (k, v)))?;

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(cfg.timeout)
            .pool_max_idle_per_host(cfg.max_connections.get())
            .redirect(Policy::none());

        if let Some(tls) = &cfg.tls {
            builder = builder
                .use_native_tls()
                .danger_accept_invalid_certs(tls.accept_invalid_certs);
            for pem in &tls.root_certificates {
                builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
            }
            if let Some(version) = tls.min_version {
                builder = builder.min_tls_version(version.into());
            }
        }

        let m = Self {
            client: builder.build()?,
            method,
            url: target.url().clone(),
            body: cfg.body.clone(),
        };

        Ok(m)
    }

    /// Performs a single request, returning the response status code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Body`] if the body producer fails and [`Error::Http`]
    /// on transport failures and timeouts.
    pub async fn execute(&self) -> Result<u16, Error> {
        let mut request = self.client.request(self.method.clone(), self.url.clone());
        match self.body.resolve()? {
            RequestBody::Empty => {}
            RequestBody::Fixed(body) => request = request.body(body),
            RequestBody::Stream(stream) => request = request.body(Body::wrap_stream(chunks(stream))),
        }

        let mut response = request.send().await?;
        let status = response.status().as_u16();
        // Drain the body so the connection goes back to the pool.
        while response.chunk().await?.is_some() {}

        Ok(status)
    }
}

impl RequestExecutor for StandardExecutor {
    #[inline]
    async fn execute(&self) -> Result<u16, Error> {
        Self::execute(self).await
    }
}

/// Adapts a body stream into a stream of byte chunks.
fn chunks(rd: BodyStream) -> impl Stream<Item = std::io::Result<bytes::Bytes>> + Send + 'static {
    stream::try_unfold(rd, |mut rd| async move {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        match rd.read_buf(&mut buf).await? {
            0 => Ok(None),
            _ => Ok(Some((buf.freeze(), rd))),
        }
    })
}
