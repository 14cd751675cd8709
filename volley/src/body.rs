use core::fmt::{self, Debug, Formatter};
use std::{fs::File, io, path::PathBuf, sync::Arc};

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::Error;

/// Owned, single-use request body stream.
///
/// Dropping the stream closes it.
pub type BodyStream = Box<dyn AsyncRead + Send + Unpin>;

/// Factory producing a fresh [`BodyStream`] on each invocation.
pub type BodyProducer = Arc<dyn Fn() -> io::Result<BodyStream> + Send + Sync>;

/// Where request bodies come from.
#[derive(Clone, Default)]
pub enum BodySource {
    /// No body at all.
    #[default]
    Empty,
    /// The same bytes are sent with every request.
    Fixed(Bytes),
    /// A new stream is requested from the producer for every request.
    Stream(BodyProducer),
}

impl BodySource {
    #[inline]
    pub fn fixed<B>(body: B) -> Self
    where
        B: Into<Bytes>,
    {
        Self::Fixed(body.into())
    }

    pub fn stream<F>(f: F) -> Self
    where
        F: Fn() -> io::Result<BodyStream> + Send + Sync + 'static,
    {
        Self::Stream(Arc::new(f))
    }

    /// Streams the file at the given path, reopening it for every request.
    pub fn file<P>(path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        let path = path.into();

        Self::stream(move || {
            let file = File::open(&path)?;
            let file = tokio::fs::File::from_std(file);
            Ok(Box::new(file) as BodyStream)
        })
    }

    /// Resolves the body for a single request.
    ///
    /// Must be called exactly once per request: producers are never cached
    /// because streams cannot be rewound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Body`] if the producer fails.
    #[inline]
    pub fn resolve(&self) -> Result<RequestBody, Error> {
        let body = match self {
            Self::Empty => RequestBody::Empty,
            Self::Fixed(body) => RequestBody::Fixed(body.clone()),
            Self::Stream(producer) => RequestBody::Stream(producer().map_err(Error::Body)?),
        };

        Ok(body)
    }
}

impl Debug for BodySource {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        match self {
            Self::Empty => fmt.write_str("Empty"),
            Self::Fixed(body) => fmt.debug_tuple("Fixed").field(&body.len()).finish(),
            Self::Stream(..) => fmt.debug_tuple("Stream").finish(),
        }
    }
}

/// Body of a single request, as resolved from a [`BodySource`].
pub enum RequestBody {
    Empty,
    Fixed(Bytes),
    Stream(BodyStream),
}

impl Debug for RequestBody {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        match self {
            Self::Empty => fmt.write_str("Empty"),
            Self::Fixed(body) => fmt.debug_tuple("Fixed").field(&body.len()).finish(),
            Self::Stream(..) => fmt.debug_tuple("Stream").finish(),
        }
    }
}
