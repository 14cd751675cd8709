use core::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::sync::{Mutex, PoisonError};

use futures_util::FutureExt;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{Semaphore, SemaphorePermit},
};

use super::{
    codec::{self, Framing, RequestBuf, ResponseBuf},
    RequestExecutor,
};
use crate::{
    body::RequestBody,
    cfg::{Config, Target},
    dial::{Conn, Dialer, Traffic},
    header::RawHeaders,
    pool::Pool,
    BodySource, Error,
};

/// High-throughput HTTP/1.1 executor.
///
/// Keeps up to `max_connections` keep-alive connections to the target and
/// reuses request and response buffers between calls.
#[derive(Debug)]
pub struct PooledExecutor {
    conns: ConnPool,
    requests: Pool<RequestBuf>,
    responses: Pool<ResponseBuf>,
    headers: RawHeaders,
    host: String,
    request_target: String,
    method: String,
    is_head: bool,
    body: BodySource,
    timeout: Duration,
}

impl PooledExecutor {
    /// Constructs a new [`PooledExecutor`] for the given target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on invalid headers or method and
    /// [`Error::Tls`] if TLS settings cannot be applied.
    pub fn new(cfg: &Config, target: &Target, traffic: Traffic) -> Result<Self, Error> {
        http::Method::from_bytes(cfg.method.as_bytes())
            .map_err(|err| Error::Config(format!("invalid method '{}': {err}", cfg.method)))?;

        let dialer = Dialer::new(target, cfg.tls.as_ref(), traffic)?;
        let headers = RawHeaders::materialize(cfg.headers.iter().map(|(k, v)| (k, v)))?;

        let m = Self {
            conns: ConnPool::new(dialer, cfg.max_connections.get()),
            requests: Pool::new(RequestBuf::default),
            responses: Pool::new(ResponseBuf::default),
            headers,
            host: target.authority().to_string(),
            request_target: target.request_target().to_string(),
            method: cfg.method.clone(),
            is_head: cfg.method.eq_ignore_ascii_case("HEAD"),
            body: cfg.body.clone(),
            timeout: cfg.timeout,
        };

        Ok(m)
    }

    /// Performs a single request, returning the response status code.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Timeout`] if no response arrives within the
    /// configured timeout, including the time spent waiting for a free
    /// connection. Other transport and body failures are returned as is.
    pub async fn execute(&self) -> Result<u16, Error> {
        match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(rc) => rc,
            Err(..) => Err(Error::Timeout),
        }
    }

    /// Request buffers reuse pool.
    #[inline]
    pub fn requests(&self) -> &Pool<RequestBuf> {
        &self.requests
    }

    /// Response buffers reuse pool.
    #[inline]
    pub fn responses(&self) -> &Pool<ResponseBuf> {
        &self.responses
    }

    /// Number of currently open connections, both busy and idle.
    #[inline]
    pub fn num_connections(&self) -> usize {
        self.conns.num_open()
    }

    #[inline]
    pub fn traffic(&self) -> &Traffic {
        self.conns.dialer.traffic()
    }

    async fn exchange(&self) -> Result<u16, Error> {
        let mut req = self.requests.acquire();
        let mut resp = self.responses.acquire();
        let RequestBuf { head, chunk } = &mut *req;

        let mut body = self.body.resolve()?;
        let framing = match &body {
            RequestBody::Empty => Framing::None,
            RequestBody::Fixed(body) => Framing::Length(body.len()),
            RequestBody::Stream(..) => Framing::Chunked,
        };
        codec::encode_head(head, &self.method, &self.request_target, &self.host, &self.headers, framing);
        if let RequestBody::Fixed(body) = &body {
            head.extend_from_slice(body);
        }

        let mut conn = self.conns.checkout().await?;
        conn.write_all(&head[..]).await?;
        if let RequestBody::Stream(stream) = &mut body {
            codec::write_chunked(&mut *conn, stream, chunk).await?;
        }
        conn.flush().await?;
        // Close the body stream before waiting for the response.
        drop(body);

        let response = codec::read_response(&mut *conn, &mut resp.buf, self.is_head).await?;
        log::trace!("response {} (reusable: {})", response.status, response.reusable);
        if response.reusable {
            conn.release();
        }

        Ok(response.status)
    }
}

impl RequestExecutor for PooledExecutor {
    #[inline]
    async fn execute(&self) -> Result<u16, Error> {
        Self::execute(self).await
    }
}

/// Bounded pool of keep-alive connections to a single target.
///
/// Every checked out connection holds a semaphore permit, and connections are
/// dialed only when no idle one is left, so the number of open connections
/// never exceeds the number of permits.
#[derive(Debug)]
struct ConnPool {
    dialer: Dialer,
    slots: Semaphore,
    idle: Mutex<Vec<Conn>>,
    num_open: AtomicUsize,
}

impl ConnPool {
    fn new(dialer: Dialer, max_connections: usize) -> Self {
        Self {
            dialer,
            slots: Semaphore::new(max_connections),
            idle: Mutex::new(Vec::with_capacity(max_connections)),
            num_open: AtomicUsize::new(0),
        }
    }

    /// Waits for a free slot and returns an idle or a freshly dialed
    /// connection.
    async fn checkout(&self) -> Result<PooledConn<'_>, Error> {
        let permit = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(..) => return Err(Error::Io(std::io::Error::other("connection pool is closed"))),
        };

        let conn = loop {
            let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
            match idle {
                Some(mut conn) => {
                    if is_alive(&mut conn) {
                        break conn;
                    }
                    self.on_discard();
                }
                None => {
                    let conn = self.dialer.dial().await?;
                    let num_open = self.num_open.fetch_add(1, Ordering::Relaxed) + 1;
                    log::debug!("connection established ({num_open} open)");
                    break conn;
                }
            }
        };

        let m = PooledConn {
            pool: self,
            conn: Some(conn),
            reusable: false,
            _permit: permit,
        };

        Ok(m)
    }

    #[inline]
    fn num_open(&self) -> usize {
        self.num_open.load(Ordering::Relaxed)
    }

    #[inline]
    fn on_discard(&self) {
        let num_open = self.num_open.fetch_sub(1, Ordering::Relaxed) - 1;
        log::debug!("connection discarded ({num_open} open)");
    }
}

/// Checks without waiting that an idle connection was neither closed by the
/// peer nor received unsolicited data.
fn is_alive(conn: &mut Conn) -> bool {
    let mut buf = [0u8; 1];
    conn.read(&mut buf).now_or_never().is_none()
}

/// Checked out connection.
///
/// Returns to the idle list on drop only if [`PooledConn::release`] was
/// called, otherwise it is closed. The slot is freed after that.
#[derive(Debug)]
struct PooledConn<'a> {
    pool: &'a ConnPool,
    /// Always `Some` until dropped.
    conn: Option<Conn>,
    reusable: bool,
    _permit: SemaphorePermit<'a>,
}

impl PooledConn<'_> {
    /// Marks the connection as clean, ready for the next request.
    #[inline]
    fn release(mut self) {
        self.reusable = true;
    }
}

impl Deref for PooledConn<'_> {
    type Target = Conn;

    #[inline]
    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is taken only on drop"),
        }
    }
}

impl DerefMut for PooledConn<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is taken only on drop"),
        }
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.reusable {
            self.pool.idle.lock().unwrap_or_else(PoisonError::into_inner).push(conn);
        } else {
            self.pool.on_discard();
        }
    }
}
