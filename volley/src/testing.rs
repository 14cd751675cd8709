//! In-process HTTP/1.1 server for exercising executors.

use core::{
    net::SocketAddr,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// Request as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    /// Headers with their names exactly as received.
    pub headers: Vec<(String, String)>,
    /// Decoded body.
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Values of the given header, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(k, ..)| k.eq_ignore_ascii_case(name))
            .map(|(.., v)| v.clone())
            .collect()
    }
}

/// Canned response.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    chunked: bool,
    close: bool,
    /// Closes the connection after replying, without announcing it.
    quiet_close: bool,
    delay: Option<Duration>,
}

impl Reply {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            chunked: false,
            close: false,
            quiet_close: false,
            delay: None,
        }
    }

    pub fn with_body<B>(mut self, body: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sends the body with chunked transfer encoding.
    pub fn with_chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    /// Asks the client to close the connection and closes it after replying.
    pub fn with_close(mut self) -> Self {
        self.close = true;
        self
    }

    /// Closes the connection after replying, as an idle keep-alive timeout
    /// would, without sending `Connection: close`.
    pub fn with_quiet_close(mut self) -> Self {
        self.quiet_close = true;
        self
    }

    /// Waits before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn encode(&self, is_head: bool) -> Vec<u8> {
        let reason = http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown");

        let mut out = format!("HTTP/1.1 {} {reason}\r\n", self.status).into_bytes();
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if self.close {
            out.extend_from_slice(b"Connection: close\r\n");
        }

        if self.chunked {
            out.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");
            if !is_head {
                if !self.body.is_empty() {
                    out.extend_from_slice(format!("{:x}\r\n", self.body.len()).as_bytes());
                    out.extend_from_slice(&self.body);
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(b"0\r\n\r\n");
            }
        } else {
            out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
            if !is_head {
                out.extend_from_slice(&self.body);
            }
        }

        out
    }
}

type Handler = dyn Fn(&RecordedRequest) -> Reply + Send + Sync;

struct State {
    handler: Box<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
    accepted: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

/// Keep-alive HTTP/1.1 server answering every request through a handler.
///
/// Stops accepting connections when dropped.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            accepted: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
            max_open: AtomicUsize::new(0),
        });

        let task = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Ok((sock, ..)) = listener.accept().await {
                    state.accepted.fetch_add(1, Ordering::SeqCst);
                    let open = state.open.fetch_add(1, Ordering::SeqCst) + 1;
                    state.max_open.fetch_max(open, Ordering::SeqCst);

                    let state = state.clone();
                    tokio::spawn(async move {
                        serve(sock, &state).await;
                        state.open.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self { addr, state, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// The `host:port` pair clients should send as `Host`.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn num_accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn max_open(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut sock: TcpStream, state: &State) {
    let mut buf = BytesMut::with_capacity(4096);

    while let Some(req) = read_request(&mut sock, &mut buf).await {
        let reply = (state.handler)(&req);
        let is_head = req.method == "HEAD";
        state.requests.lock().unwrap().push(req);

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if sock.write_all(&reply.encode(is_head)).await.is_err() {
            return;
        }
        if reply.close || reply.quiet_close {
            let _ = sock.shutdown().await;
            return;
        }
    }
}

/// Reads more data into the buffer, returning `None` on EOF or error.
async fn fill(sock: &mut TcpStream, buf: &mut BytesMut) -> Option<()> {
    match sock.read_buf(buf).await {
        Ok(0) | Err(..) => None,
        Ok(..) => Some(()),
    }
}

async fn read_request(sock: &mut TcpStream, buf: &mut BytesMut) -> Option<RecordedRequest> {
    let mut req = loop {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut parsed = httparse::Request::new(&mut headers);
        if let httparse::Status::Complete(n) = parsed.parse(&buf[..]).ok()? {
            let req = RecordedRequest {
                method: parsed.method?.to_string(),
                target: parsed.path?.to_string(),
                headers: parsed
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect(),
                body: Vec::new(),
            };
            buf.advance(n);
            break req;
        }
        fill(sock, buf).await?;
    };

    let chunked = req
        .header_values("transfer-encoding")
        .iter()
        .any(|v| v.eq_ignore_ascii_case("chunked"));
    if chunked {
        loop {
            let (offset, size) = loop {
                match httparse::parse_chunk_size(&buf[..]) {
                    Ok(httparse::Status::Complete((offset, size))) => break (offset, size as usize),
                    Ok(httparse::Status::Partial) => fill(sock, buf).await?,
                    Err(..) => return None,
                }
            };
            while buf.len() < offset + size + 2 {
                fill(sock, buf).await?;
            }
            req.body.extend_from_slice(&buf[offset..offset + size]);
            buf.advance(offset + size + 2);
            if size == 0 {
                break;
            }
        }
    } else if let Some(len) = req.header_values("content-length").first() {
        let len: usize = len.parse().ok()?;
        while buf.len() < len {
            fill(sock, buf).await?;
        }
        req.body = buf.split_to(len).to_vec();
    }

    Some(req)
}
