//! Minimal HTTP/1.1 client framing.
//!
//! Requests are encoded into reusable buffers. Responses are parsed just far
//! enough to extract the status code and to consume the body, so that the
//! connection can carry the next request.

use core::fmt::Write as _;

use bytes::{Buf, BufMut, BytesMut};
use httparse::Status;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{header::RawHeaders, pool::Reset, Error};

/// Maximum size of a response head.
const MAX_HEAD_SIZE: usize = 64 * 1024;
/// Maximum number of response headers.
const MAX_HEADERS: usize = 64;
/// Size of a single chunk of a streamed request body.
const CHUNK_SIZE: usize = 16 * 1024;
/// Minimum free space kept in the receive buffer before reading.
const READ_RESERVE: usize = 4096;

/// Reusable request buffers.
#[derive(Debug, Default)]
pub struct RequestBuf {
    /// Request head, followed by a fixed body if any.
    pub head: BytesMut,
    /// Scratch space for streamed body chunks.
    pub chunk: BytesMut,
}

impl Reset for RequestBuf {
    #[inline]
    fn reset(&mut self) {
        self.head.clear();
        self.chunk.clear();
    }
}

/// Reusable response buffer.
#[derive(Debug, Default)]
pub struct ResponseBuf {
    pub buf: BytesMut,
}

impl Reset for ResponseBuf {
    #[inline]
    fn reset(&mut self) {
        self.buf.clear();
    }
}

/// How the request body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body, no framing headers.
    None,
    Length(usize),
    Chunked,
}

/// Encodes the request line and headers.
///
/// `Host` is added only if the static headers do not contain one.
pub fn encode_head(dst: &mut BytesMut, method: &str, target: &str, host: &str, headers: &RawHeaders, framing: Framing) {
    dst.reserve(method.len() + target.len() + headers.as_bytes().len() + host.len() + 64);

    dst.put_slice(method.as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_bytes());
    dst.put_slice(b" HTTP/1.1\r\n");
    if !headers.has_host() {
        dst.put_slice(b"Host: ");
        dst.put_slice(host.as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(headers.as_bytes());

    match framing {
        Framing::None => {}
        Framing::Length(len) => {
            // Writing into `BytesMut` never fails.
            let _ = write!(dst, "Content-Length: {len}\r\n");
        }
        Framing::Chunked => dst.put_slice(b"Transfer-Encoding: chunked\r\n"),
    }
    dst.put_slice(b"\r\n");
}

/// Streams the body using chunked transfer coding.
///
/// The body is read lazily, one chunk at a time.
///
/// # Errors
///
/// Body read failures are reported as [`Error::Body`], write failures as
/// [`Error::Io`].
pub async fn write_chunked<W, R>(wr: &mut W, body: &mut R, buf: &mut BytesMut) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    loop {
        buf.clear();
        buf.reserve(CHUNK_SIZE + 16);
        // Leave room for the chunk size line and fill it in afterwards.
        buf.put_bytes(0, 10);
        let n = (&mut *body).take(CHUNK_SIZE as u64).read_buf(buf).await.map_err(Error::Body)?;

        if n == 0 {
            wr.write_all(b"0\r\n\r\n").await?;
            return Ok(());
        }

        let mut size = String::with_capacity(10);
        let _ = write!(size, "{n:x}\r\n");
        let offset = 10 - size.len();
        buf[offset..10].copy_from_slice(size.as_bytes());
        buf.put_slice(b"\r\n");

        wr.write_all(&buf[offset..]).await?;
    }
}

/// Parsed response outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    /// Whether the connection may carry another request.
    pub reusable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug)]
struct Head {
    len: usize,
    status: u16,
    body: BodyKind,
    keep_alive: bool,
}

/// Reads a complete response, discarding its body.
///
/// Interim `1xx` responses are skipped.
///
/// # Errors
///
/// Returns [`Error::Protocol`] on malformed responses and [`Error::Io`] if the
/// connection fails or closes prematurely.
pub async fn read_response<R>(rd: &mut R, buf: &mut BytesMut, is_head: bool) -> Result<Response, Error>
where
    R: AsyncRead + Unpin,
{
    buf.clear();

    let head = loop {
        if let Some(head) = parse_head(buf, is_head)? {
            buf.advance(head.len);
            if (100..200).contains(&head.status) && head.status != 101 {
                continue;
            }
            break head;
        }
        if buf.len() >= MAX_HEAD_SIZE {
            return Err(Error::Protocol("response head is too large".into()));
        }

        fill(rd, buf).await?;
    };

    // After a protocol switch the connection no longer speaks HTTP.
    let mut reusable = head.keep_alive && head.status != 101;
    match head.body {
        BodyKind::Empty => {}
        BodyKind::Length(len) => skip(rd, buf, len).await?,
        BodyKind::Chunked => skip_chunked(rd, buf).await?,
        BodyKind::UntilClose => {
            reusable = false;
            loop {
                buf.clear();
                buf.reserve(READ_RESERVE);
                if rd.read_buf(buf).await? == 0 {
                    break;
                }
            }
        }
    }

    // Anything left is either garbage or an unsolicited response.
    if !buf.is_empty() {
        reusable = false;
    }

    let m = Response { status: head.status, reusable };

    Ok(m)
}

fn parse_head(buf: &[u8], is_head: bool) -> Result<Option<Head>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    let len = match resp.parse(buf) {
        Ok(Status::Complete(len)) => len,
        Ok(Status::Partial) => return Ok(None),
        Err(err) => return Err(Error::Protocol(err.to_string())),
    };

    let status = resp.code.unwrap_or_default();
    // HTTP/1.0 closes by default.
    let mut keep_alive = resp.version == Some(1);
    let mut content_length = None;
    let mut chunked = false;

    for header in resp.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            let len = core::str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| Error::Protocol("invalid Content-Length".into()))?;
            match content_length {
                Some(prev) if prev != len => {
                    return Err(Error::Protocol("conflicting Content-Length headers".into()));
                }
                Some(..) | None => content_length = Some(len),
            }
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = header
                .value
                .rsplit(|&c| c == b',')
                .next()
                .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(b"chunked"));
        } else if header.name.eq_ignore_ascii_case("connection") {
            for token in header.value.split(|&c| c == b',') {
                let token = token.trim_ascii();
                if token.eq_ignore_ascii_case(b"close") {
                    keep_alive = false;
                } else if token.eq_ignore_ascii_case(b"keep-alive") {
                    keep_alive = true;
                }
            }
        }
    }

    let body = if is_head || (100..200).contains(&status) || status == 204 || status == 304 {
        BodyKind::Empty
    } else if chunked {
        BodyKind::Chunked
    } else if let Some(len) = content_length {
        BodyKind::Length(len)
    } else {
        BodyKind::UntilClose
    };

    let m = Head { len, status, body, keep_alive };

    Ok(Some(m))
}

/// Reads more data, failing on EOF.
#[inline]
async fn fill<R>(rd: &mut R, buf: &mut BytesMut) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    if buf.capacity() - buf.len() < READ_RESERVE {
        buf.reserve(READ_RESERVE);
    }

    match rd.read_buf(buf).await? {
        0 => Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into())),
        _ => Ok(()),
    }
}

/// Discards exactly `len` bytes.
async fn skip<R>(rd: &mut R, buf: &mut BytesMut, mut len: u64) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    loop {
        let n = len.min(buf.len() as u64);
        buf.advance(n as usize);
        len -= n;

        if len == 0 {
            return Ok(());
        }

        fill(rd, buf).await?;
    }
}

async fn skip_chunked<R>(rd: &mut R, buf: &mut BytesMut) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    loop {
        let (n, size) = loop {
            match httparse::parse_chunk_size(buf) {
                Ok(Status::Complete(v)) => break v,
                Ok(Status::Partial) => fill(rd, buf).await?,
                Err(..) => return Err(Error::Protocol("invalid chunk size".into())),
            }
        };
        buf.advance(n);

        if size == 0 {
            return skip_trailers(rd, buf).await;
        }

        skip(rd, buf, size).await?;
        while buf.len() < 2 {
            fill(rd, buf).await?;
        }
        if &buf[..2] != b"\r\n" {
            return Err(Error::Protocol("chunk is not terminated with CRLF".into()));
        }
        buf.advance(2);
    }
}

async fn skip_trailers<R>(rd: &mut R, buf: &mut BytesMut) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    loop {
        match buf.windows(2).position(|w| w == b"\r\n") {
            Some(0) => {
                buf.advance(2);
                return Ok(());
            }
            Some(pos) => buf.advance(pos + 2),
            None => {
                if buf.len() >= MAX_HEAD_SIZE {
                    return Err(Error::Protocol("response trailers are too large".into()));
                }
                fill(rd, buf).await?;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    fn head(headers: &[(&str, &str)], framing: Framing) -> Vec<u8> {
        let headers = RawHeaders::materialize(headers.iter().copied()).unwrap();
        let mut buf = BytesMut::new();
        encode_head(&mut buf, "POST", "/foo?x=1", "example.com", &headers, framing);
        buf.to_vec()
    }

    async fn read(data: &[u8], is_head: bool) -> Result<(Response, usize), Error> {
        let mut rd = data;
        let mut buf = BytesMut::new();
        let resp = read_response(&mut rd, &mut buf, is_head).await?;
        Ok((resp, rd.len()))
    }

    #[test]
    fn test_encode_head_injects_host() {
        assert_eq!(
            &b"POST /foo?x=1 HTTP/1.1\r\nHost: example.com\r\nX-A: 1\r\nContent-Length: 5\r\n\r\n"[..],
            &head(&[("X-A", "1")], Framing::Length(5))[..]
        );
    }

    #[test]
    fn test_encode_head_keeps_configured_host() {
        assert_eq!(
            &b"POST /foo?x=1 HTTP/1.1\r\nhost: other.org\r\nTransfer-Encoding: chunked\r\n\r\n"[..],
            &head(&[("host", "other.org")], Framing::Chunked)[..]
        );
    }

    #[test]
    fn test_encode_head_without_body() {
        assert_eq!(
            &b"POST /foo?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n"[..],
            &head(&[], Framing::None)[..]
        );
    }

    #[tokio::test]
    async fn test_write_chunked() {
        let mut body = Cursor::new(b"hello world".to_vec());
        let mut out = Vec::new();
        let mut buf = BytesMut::new();

        write_chunked(&mut out, &mut body, &mut buf).await.unwrap();

        assert_eq!(&b"b\r\nhello world\r\n0\r\n\r\n"[..], &out[..]);
    }

    #[tokio::test]
    async fn test_write_chunked_splits_large_body() {
        let data = vec![b'x'; CHUNK_SIZE + 3];
        let mut body = Cursor::new(data);
        let mut out = Vec::new();
        let mut buf = BytesMut::new();

        write_chunked(&mut out, &mut body, &mut buf).await.unwrap();

        let mut expected = b"4000\r\n".to_vec();
        expected.extend_from_slice(&[b'x'; CHUNK_SIZE]);
        expected.extend_from_slice(b"\r\n3\r\nxxx\r\n0\r\n\r\n");
        assert_eq!(expected, out);
    }

    #[tokio::test]
    async fn test_write_chunked_empty_body() {
        let mut body: &[u8] = &[];
        let mut out = Vec::new();

        write_chunked(&mut out, &mut body, &mut BytesMut::new()).await.unwrap();

        assert_eq!(&b"0\r\n\r\n"[..], &out[..]);
    }

    #[tokio::test]
    async fn test_content_length_body() {
        let data = b"HTTP/1.1 418 I'm a teapot\r\nContent-Length: 5\r\n\r\nshortHTTP/1.1";
        let (resp, rest) = read(data, false).await.unwrap();

        assert_eq!(418, resp.status);
        // The next response bytes remain buffered, so the connection is unusable.
        assert!(!resp.reusable);
        assert_eq!(0, rest);

        let (resp, ..) = read(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nshort", false).await.unwrap();
        assert_eq!(Response { status: 200, reusable: true }, resp);
    }

    #[tokio::test]
    async fn test_chunked_body_with_trailers() {
        let data = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let (resp, ..) = read(data, false).await.unwrap();

        assert_eq!(Response { status: 200, reusable: true }, resp);
    }

    #[tokio::test]
    async fn test_until_close_body() {
        let data = b"HTTP/1.1 500 Internal Server Error\r\n\r\nsome body";
        let (resp, rest) = read(data, false).await.unwrap();

        assert_eq!(Response { status: 500, reusable: false }, resp);
        assert_eq!(0, rest);
    }

    #[tokio::test]
    async fn test_head_response_has_no_body() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n";
        let (resp, ..) = read(data, true).await.unwrap();

        assert_eq!(Response { status: 200, reusable: true }, resp);
    }

    #[tokio::test]
    async fn test_no_content() {
        let (resp, ..) = read(b"HTTP/1.1 204 No Content\r\n\r\n", false).await.unwrap();

        assert_eq!(Response { status: 204, reusable: true }, resp);
    }

    #[tokio::test]
    async fn test_interim_response_skipped() {
        let data = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n";
        let (resp, ..) = read(data, false).await.unwrap();

        assert_eq!(Response { status: 201, reusable: true }, resp);
    }

    #[tokio::test]
    async fn test_switching_protocols_not_reusable() {
        let data = b"HTTP/1.1 101 Switching Protocols\r\nConnection: upgrade\r\nUpgrade: websocket\r\n\r\n";
        let (resp, ..) = read(data, false).await.unwrap();

        assert_eq!(Response { status: 101, reusable: false }, resp);
    }

    #[tokio::test]
    async fn test_connection_close() {
        let data = b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok";
        let (resp, ..) = read(data, false).await.unwrap();

        assert_eq!(Response { status: 200, reusable: false }, resp);
    }

    #[tokio::test]
    async fn test_http10_keep_alive() {
        let (resp, ..) = read(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n", false).await.unwrap();
        assert!(!resp.reusable);

        let data = b"HTTP/1.0 200 OK\r\nConnection: Keep-Alive\r\nContent-Length: 0\r\n\r\n";
        let (resp, ..) = read(data, false).await.unwrap();
        assert!(resp.reusable);
    }

    #[tokio::test]
    async fn test_malformed_response() {
        assert!(matches!(read(b"SMTP ready\r\n\r\n", false).await, Err(Error::Protocol(..))));
        assert!(matches!(
            read(b"HTTP/1.1 200 OK\r\nContent-Length: nope\r\n\r\n", false).await,
            Err(Error::Protocol(..))
        ));
        assert!(matches!(
            read(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n", false).await,
            Err(Error::Protocol(..))
        ));
    }

    #[tokio::test]
    async fn test_truncated_response() {
        for data in [
            &b""[..],
            &b"HTTP/1.1 200 OK\r\nContent-Le"[..],
            &b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort"[..],
            &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel"[..],
        ] {
            match read(data, false).await {
                Err(Error::Io(err)) => assert_eq!(std::io::ErrorKind::UnexpectedEof, err.kind()),
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }
}
