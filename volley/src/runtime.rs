use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::{sync::Arc, time::Instant};

use anyhow::Error;

use crate::{
    cfg::{Limit, RunConfig},
    dial::Traffic,
    stat::{Stat, Summary},
    Executor, RequestExecutor,
};

/// Benchmark run: a set of workers hammering one shared executor until the
/// configured limit is reached.
#[derive(Debug)]
pub struct Runtime {
    cfg: RunConfig,
    is_running: Arc<AtomicBool>,
}

impl Runtime {
    pub fn new(cfg: RunConfig) -> Self {
        let is_running = Arc::new(AtomicBool::new(true));

        Self { cfg, is_running }
    }

    /// Flag that stops all workers when cleared.
    #[inline]
    pub fn is_running(&self) -> Arc<AtomicBool> {
        self.is_running.clone()
    }

    /// Runs workers until the limit is reached and returns the final
    /// statistics, also logging them.
    pub async fn run(self) -> Result<Summary, Error> {
        let traffic = Traffic::default();
        let executor = Executor::new(&self.cfg.request, traffic.clone())?;
        log::info!(
            "running {} workers against '{}' with {:?} limit",
            self.cfg.concurrency,
            self.cfg.request.url,
            self.cfg.limit
        );

        let summary = self.run_with(Arc::new(executor), traffic).await?;
        log::info!("{summary}");

        Ok(summary)
    }

    async fn run_with<E>(self, executor: Arc<E>, traffic: Traffic) -> Result<Summary, Error>
    where
        E: RequestExecutor + 'static,
    {
        let stat = Arc::new(Stat::default());
        let budget = match self.cfg.limit {
            Limit::Requests(n) => Some(Arc::new(AtomicU64::new(n))),
            Limit::Duration(..) => None,
        };

        let timer = match self.cfg.limit {
            Limit::Duration(duration) => {
                let is_running = self.is_running.clone();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    is_running.store(false, Ordering::Relaxed);
                }))
            }
            Limit::Requests(..) => None,
        };

        let now = Instant::now();
        let num_jobs = self.cfg.concurrency.get();
        let mut jobs = Vec::with_capacity(num_jobs);
        for _ in 0..num_jobs {
            let worker = Worker {
                executor: executor.clone(),
                stat: stat.clone(),
                is_running: self.is_running.clone(),
                budget: budget.clone(),
            };

            jobs.push(tokio::spawn(worker.run()));
        }

        for job in jobs {
            job.await?;
        }
        if let Some(timer) = timer {
            timer.abort();
        }
        self.is_running.store(false, Ordering::Relaxed);

        Ok(stat.summary(now.elapsed(), &traffic))
    }
}

/// Per-task worker.
#[derive(Debug)]
struct Worker<E> {
    executor: Arc<E>,
    stat: Arc<Stat>,
    is_running: Arc<AtomicBool>,
    /// Requests left for all workers, if limited by count.
    budget: Option<Arc<AtomicU64>>,
}

impl<E> Worker<E>
where
    E: RequestExecutor,
{
    async fn run(self) {
        while self.is_running.load(Ordering::Relaxed) && self.take() {
            let now = Instant::now();
            let (status, err) = self.executor.do_request().await;
            self.stat.on_result(status, err.as_ref(), now.elapsed());
        }
    }

    /// Claims one request from the budget.
    #[inline]
    fn take(&self) -> bool {
        match &self.budget {
            Some(budget) => budget
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
                .is_ok(),
            None => true,
        }
    }
}
