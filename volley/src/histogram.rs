use core::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Upper bound of the last regular bucket, in microseconds.
const MAX_US: f64 = 60_000_000.0;

/// Latency histogram with logarithmic buckets.
///
/// Bucket `i` covers `[f^(i-1); f^i)` microseconds, the last one collects
/// everything above a minute.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: Vec<AtomicU64>,
    factor: f64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new(1.5)
    }
}

impl LatencyHistogram {
    /// Constructs an empty histogram with the given bucket growth factor.
    ///
    /// # Panics
    ///
    /// Panics if the factor is not greater than one.
    pub fn new(factor: f64) -> Self {
        assert!(factor > 1.0, "bucket growth factor must be greater than one");

        let len = MAX_US.log(factor).ceil() as usize + 1;
        let buckets = (0..len).map(|_| AtomicU64::new(0)).collect();

        Self { buckets, factor }
    }

    #[inline]
    pub fn record(&self, latency: Duration) {
        let us = latency.as_micros() as f64;
        let idx = if us < 1.0 { 0 } else { us.log(self.factor) as usize + 1 };
        let idx = idx.min(self.buckets.len() - 1);

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Total number of recorded values.
    #[cfg(test)]
    pub fn len(&self) -> u64 {
        self.buckets.iter().map(|v| v.load(Ordering::Relaxed)).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimates the given quantile.
    ///
    /// Finds the first bucket where the cumulative count reaches `q * total`
    /// and interpolates linearly inside it in logarithmic coordinates, so the
    /// result is `f^x` for a fractional bucket index `x`.
    ///
    /// Returns zero for an empty histogram.
    pub fn quantile(&self, q: f64) -> Duration {
        assert!((0.0..=1.0).contains(&q));

        let snapshot: Vec<u64> = self.buckets.iter().map(|v| v.load(Ordering::Relaxed)).collect();
        let total: u64 = snapshot.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let rank = q * total as f64;
        let mut seen = 0;
        for (idx, &count) in snapshot.iter().enumerate() {
            if ((seen + count) as f64) >= rank && count > 0 {
                if idx == 0 {
                    return Duration::ZERO;
                }
                // Bucket `idx` spans exponents `[idx - 1; idx)`.
                let x = (rank - seen as f64) / count as f64 + (idx - 1) as f64;
                return Duration::from_micros(self.factor.powf(x) as u64);
            }
            seen += count;
        }

        Duration::from_micros(MAX_US as u64)
    }
}
