//! Header materialization.
//!
//! Static headers are validated and encoded once, when an executor is built,
//! so that repeated requests never serialize them again.

use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::Error;

/// Pre-encoded header block in HTTP/1.x wire format.
///
/// Header names are kept exactly as given, without case normalization.
#[derive(Debug, Clone, Default)]
pub struct RawHeaders {
    buf: Bytes,
    has_host: bool,
}

impl RawHeaders {
    /// Encodes the given headers as `Name: value\r\n` lines, preserving order.
    ///
    /// Message framing headers (`Content-Length` and `Transfer-Encoding`) are
    /// skipped: the executor derives them from the body of each request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a name or a value is not valid in HTTP.
    pub fn materialize<I, K, V>(headers: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut buf = BytesMut::new();
        let mut has_host = false;

        for (name, value) in headers {
            let (name, value) = (name.as_ref(), value.as_ref());
            let (key, _) = validate(name, value)?;

            if key == header::CONTENT_LENGTH || key == header::TRANSFER_ENCODING {
                log::debug!("ignoring '{name}' header: body framing is set per request");
                continue;
            }
            if key == header::HOST {
                has_host = true;
            }

            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }

        let m = Self { buf: buf.freeze(), has_host };

        Ok(m)
    }

    /// Returns the encoded header block.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns `true` if a `Host` header was supplied.
    #[inline]
    pub fn has_host(&self) -> bool {
        self.has_host
    }
}

/// Collects the given headers into a [`HeaderMap`].
///
/// Repeated names are appended, not replaced.
///
/// # Errors
///
/// Returns [`Error::Config`] if a name or a value is not valid in HTTP.
pub fn header_map<I, K, V>(headers: I) -> Result<HeaderMap, Error>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut map = HeaderMap::new();

    for (name, value) in headers {
        let (name, value) = (name.as_ref(), value.as_ref());
        let (key, value) = validate(name, value)?;

        map.append(key, value);
    }

    Ok(map)
}

fn validate(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), Error> {
    let key = HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| Error::Config(format!("invalid header name '{name}': {err}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|err| Error::Config(format!("invalid value of header '{name}': {err}")))?;

    Ok((key, value))
}
