//! HTTP request executors for load generation.
//!
//! The core is the [`RequestExecutor`] contract: fire one preconfigured
//! request and report its status, or [`STATUS_NO_RESPONSE`] with an error.
//! Two implementations are available through [`Executor`], a pooled HTTP/1.1
//! one tuned for throughput and a standard one built on a conventional client.

pub use self::{
    body::{BodySource, BodyStream},
    cfg::{ClientKind, Config, TlsConfig, TlsVersion},
    dial::Traffic,
    error::Error,
    executor::{Executor, PooledExecutor, RequestExecutor, StandardExecutor, STATUS_NO_RESPONSE},
};

pub mod body;
pub mod cfg;
pub mod cmd;
pub mod dial;
mod error;
pub mod executor;
pub mod header;
mod histogram;
pub mod logging;
pub mod pool;
pub mod runtime;
pub mod stat;
#[cfg(test)]
mod testing;
