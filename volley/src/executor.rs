//! Request executors.
//!
//! An executor fires a single preconfigured request per call and reports the
//! outcome. One instance is shared by many workers and is safe to call
//! concurrently.

mod codec;
mod pooled;
mod standard;

use core::future::Future;

pub use self::{
    codec::{RequestBuf, ResponseBuf},
    pooled::PooledExecutor,
    standard::StandardExecutor,
};
use crate::{
    cfg::{ClientKind, Config, Target},
    dial::Traffic,
    Error,
};

/// Status reported when no HTTP response was obtained.
pub const STATUS_NO_RESPONSE: i32 = -1;

/// Single-request execution contract.
pub trait RequestExecutor: Send + Sync {
    /// Performs a single request, returning the response status code.
    ///
    /// Any status, including 4xx and 5xx, is a successful outcome.
    fn execute(&self) -> impl Future<Output = Result<u16, Error>> + Send;

    /// Performs a single request, returning the `(status, error)` pair
    /// consumed by statistics aggregators.
    ///
    /// The status is [`STATUS_NO_RESPONSE`] whenever the error is present.
    fn do_request(&self) -> impl Future<Output = (i32, Option<Error>)> + Send {
        async move {
            match self.execute().await {
                Ok(status) => (i32::from(status), None),
                Err(err) => (STATUS_NO_RESPONSE, Some(err)),
            }
        }
    }
}

/// Executor variant selected by the configuration.
#[derive(Debug)]
pub enum Executor {
    Pooled(PooledExecutor),
    Standard(StandardExecutor),
}

impl Executor {
    /// Constructs an executor for the given configuration.
    ///
    /// Bytes sent and received by the pooled variant are added to `traffic`.
    ///
    /// # Panics
    ///
    /// Panics if the configured URL is not an absolute `http` or `https` URL.
    /// Validate it with [`Target::parse`] beforehand to get an error instead.
    ///
    /// # Errors
    ///
    /// Returns an error if headers, method or TLS settings are invalid.
    pub fn new(cfg: &Config, traffic: Traffic) -> Result<Self, Error> {
        let target = match Target::parse(&cfg.url) {
            Ok(target) => target,
            Err(err) => panic!("{err}"),
        };

        let executor = match cfg.client {
            ClientKind::Pooled => Self::Pooled(PooledExecutor::new(cfg, &target, traffic)?),
            ClientKind::Standard => Self::Standard(StandardExecutor::new(cfg, &target)?),
        };
        log::debug!("constructed {:?} executor for '{}'", cfg.client, target.url());

        Ok(executor)
    }
}

impl RequestExecutor for Executor {
    #[inline]
    async fn execute(&self) -> Result<u16, Error> {
        match self {
            Self::Pooled(executor) => executor.execute().await,
            Self::Standard(executor) => executor.execute().await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{Reply, TestServer};

    #[test]
    fn test_variant_selection() {
        let mut cfg = Config::new("http://localhost:8080/");

        assert!(matches!(Executor::new(&cfg, Traffic::default()), Ok(Executor::Pooled(..))));

        cfg.client = ClientKind::Standard;
        assert!(matches!(Executor::new(&cfg, Traffic::default()), Ok(Executor::Standard(..))));
    }

    #[test]
    #[should_panic]
    fn test_invalid_url_panics() {
        let _ = Executor::new(&Config::new("ftp://localhost/"), Traffic::default());
    }

    #[test]
    #[should_panic]
    fn test_relative_url_panics() {
        let _ = Executor::new(&Config::new("/index.html"), Traffic::default());
    }

    #[test]
    fn test_invalid_header_is_error() {
        let mut cfg = Config::new("http://localhost/");
        cfg.headers = vec![("Bad Name".into(), "1".into())];

        assert!(matches!(Executor::new(&cfg, Traffic::default()), Err(Error::Config(..))));
    }

    #[tokio::test]
    async fn test_both_variants_report_status() {
        let server = TestServer::start(|_| Reply::new(503)).await;

        for client in [ClientKind::Pooled, ClientKind::Standard] {
            let mut cfg = Config::new(server.url("/"));
            cfg.client = client;
            let executor = Executor::new(&cfg, Traffic::default()).unwrap();

            let (code, err) = executor.do_request().await;

            assert_eq!(503, code, "{client:?}");
            assert!(err.is_none());
        }
    }

    struct Failing;

    impl RequestExecutor for Failing {
        async fn execute(&self) -> Result<u16, Error> {
            Err(Error::Timeout)
        }
    }

    #[tokio::test]
    async fn test_error_projection() {
        let (code, err) = Failing.do_request().await;

        assert_eq!(STATUS_NO_RESPONSE, code);
        assert!(matches!(err, Some(Error::Timeout)));
    }
}
