use core::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{dial::Traffic, histogram::LatencyHistogram, Error, STATUS_NO_RESPONSE};

/// Aggregated request outcomes, shared by all workers.
#[derive(Debug, Default)]
pub struct Stat {
    num_requests: AtomicU64,
    num_1xx: AtomicU64,
    num_2xx: AtomicU64,
    num_3xx: AtomicU64,
    num_4xx: AtomicU64,
    num_5xx: AtomicU64,
    /// Responses with a status outside of `100..600`.
    num_other: AtomicU64,
    /// Requests that got no response, timeouts included.
    num_errors: AtomicU64,
    num_timeouts: AtomicU64,
    hist: LatencyHistogram,
}

impl Stat {
    /// Records the outcome of a single request.
    pub fn on_result(&self, status: i32, err: Option<&Error>, elapsed: Duration) {
        self.num_requests.fetch_add(1, Ordering::Relaxed);

        if let Some(err) = err {
            self.num_errors.fetch_add(1, Ordering::Relaxed);
            if err.is_timeout() {
                self.num_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            log::debug!("request failed: {err}");
            return;
        }

        let counter = match status {
            STATUS_NO_RESPONSE => {
                log::error!("no response reported without an error");
                &self.num_errors
            }
            100..=199 => &self.num_1xx,
            200..=299 => &self.num_2xx,
            300..=399 => &self.num_3xx,
            400..=499 => &self.num_4xx,
            500..=599 => &self.num_5xx,
            _ => &self.num_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.hist.record(elapsed);
    }

    #[inline]
    pub fn num_requests(&self) -> u64 {
        self.num_requests.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn num_errors(&self) -> u64 {
        self.num_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn num_timeouts(&self) -> u64 {
        self.num_timeouts.load(Ordering::Relaxed)
    }

    /// Takes a consistent-enough snapshot for reporting.
    pub fn summary(&self, elapsed: Duration, traffic: &Traffic) -> Summary {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);

        Summary {
            elapsed,
            num_requests: load(&self.num_requests),
            num_1xx: load(&self.num_1xx),
            num_2xx: load(&self.num_2xx),
            num_3xx: load(&self.num_3xx),
            num_4xx: load(&self.num_4xx),
            num_5xx: load(&self.num_5xx),
            num_other: load(&self.num_other),
            num_errors: load(&self.num_errors),
            num_timeouts: load(&self.num_timeouts),
            p50: self.hist.quantile(0.50),
            p99: self.hist.quantile(0.99),
            bytes_read: traffic.bytes_read(),
            bytes_written: traffic.bytes_written(),
        }
    }
}

/// Point-in-time view of [`Stat`].
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub elapsed: Duration,
    pub num_requests: u64,
    pub num_1xx: u64,
    pub num_2xx: u64,
    pub num_3xx: u64,
    pub num_4xx: u64,
    pub num_5xx: u64,
    pub num_other: u64,
    pub num_errors: u64,
    pub num_timeouts: u64,
    /// Latency quantiles of requests that got a response.
    pub p50: Duration,
    pub p99: Duration,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl Summary {
    /// Requests per second over the whole run.
    pub fn rps(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }

        self.num_requests as f64 / self.elapsed.as_secs_f64()
    }
}

impl Display for Summary {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(
            fmt,
            "{} requests in {:.2?} ({:.1} RPS): 1xx={} 2xx={} 3xx={} 4xx={} 5xx={} other={} errors={} timeouts={}, \
             p50={:.2?} p99={:.2?}, read {} B, written {} B",
            self.num_requests,
            self.elapsed,
            self.rps(),
            self.num_1xx,
            self.num_2xx,
            self.num_3xx,
            self.num_4xx,
            self.num_5xx,
            self.num_other,
            self.num_errors,
            self.num_timeouts,
            self.p50,
            self.p99,
            self.bytes_read,
            self.bytes_written,
        )
    }
}
