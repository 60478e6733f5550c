use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::engine::{cross_symbol, executor, optimizer};
use crate::errors::AppError;
use crate::models::bar::Bar;
use crate::models::config::{BacktestConfig, OptimizationConfig};
use crate::models::result::{
    BacktestResults, CrossSymbolSummary, OptimizationResult, OptimizationSummary,
};
use crate::models::symbol::SymbolBars;

/// Runs engine jobs off the async runtime.
///
/// Every cancellable job gets its own flag, registered while the caller waits.
/// When a timeout is set, an expired job raises its flag so the worker threads
/// stop at their next candidate, and the caller gets `OptimizationCancelled`
/// right away. Clones share the registry, so `cancel` reaches jobs started from
/// any clone.
#[derive(Debug, Clone, Default)]
pub struct BacktestService {
    jobs: Arc<DashMap<u64, Arc<AtomicBool>>>,
    next_job: Arc<AtomicU64>,
    timeout: Option<Duration>,
}

/// A registered job's flag. Dropping it raises the flag, so a worker whose
/// caller stopped waiting never runs on unobserved.
struct JobGuard {
    id: u64,
    flag: Arc<AtomicBool>,
    jobs: Arc<DashMap<u64, Arc<AtomicBool>>>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::Relaxed);
        self.jobs.remove(&self.id);
    }
}

impl BacktestService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Ask every running job to stop. Jobs started afterwards are unaffected.
    pub fn cancel(&self) {
        info!("Cancelling {} running job(s)", self.jobs.len());
        for job in self.jobs.iter() {
            job.value().store(true, Ordering::Relaxed);
        }
    }

    /// Cancellable jobs currently awaited by a caller.
    pub fn running_jobs(&self) -> usize {
        self.jobs.len()
    }

    // ── Backtest ──

    /// Single backtest on a blocking thread. Not cancellable.
    pub async fn run_backtest(
        &self,
        symbol: String,
        bars: Vec<Bar>,
        config: BacktestConfig,
    ) -> Result<BacktestResults, AppError> {
        tokio::task::spawn_blocking(move || executor::run_backtest(&symbol, &bars, &config))
            .await
            .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
    }

    // ── Optimization ──

    /// Grid search for one symbol.
    ///
    /// Invalid input comes back as a failed summary carrying the error, so a
    /// caller always receives a record. Cancellation and timeouts stay errors.
    pub async fn optimize(
        &self,
        symbol: String,
        bars: Vec<Bar>,
        config: OptimizationConfig,
    ) -> Result<OptimizationSummary, AppError> {
        info!("Running optimization for {}", symbol);
        let job_symbol = symbol.clone();
        let job_config = config.clone();
        let outcome = self
            .run_cancellable("optimization", move |flag| {
                optimizer::optimize(&job_symbol, &bars, &job_config, &flag)
            })
            .await;

        match outcome {
            Ok(summary) => Ok(summary),
            Err(e @ (AppError::OptimizationCancelled | AppError::Internal(_))) => Err(e),
            Err(e) => {
                warn!("Optimization for {} rejected: {}", symbol, e);
                Ok(OptimizationSummary::failed(&symbol, &config, &e))
            }
        }
    }

    /// Rank an explicit list of pairs.
    pub async fn compare_pairs(
        &self,
        symbol: String,
        bars: Vec<Bar>,
        pairs: Vec<(usize, usize)>,
        config: BacktestConfig,
    ) -> Result<Vec<OptimizationResult>, AppError> {
        self.run_cancellable("pair comparison", move |flag| {
            optimizer::compare_pairs(&symbol, &bars, &pairs, &config, &flag)
        })
        .await
    }

    /// Optimize a whole universe and aggregate the pairs across symbols.
    pub async fn cross_symbol(
        &self,
        universe: Vec<SymbolBars>,
        config: OptimizationConfig,
    ) -> Result<CrossSymbolSummary, AppError> {
        self.run_cancellable("cross-symbol optimization", move |flag| {
            cross_symbol::run_cross_symbol(&universe, &config, &flag)
        })
        .await
    }

    // ── Helpers ──

    async fn run_cancellable<T, F>(&self, label: &'static str, job: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<AtomicBool>) -> Result<T, AppError> + Send + 'static,
    {
        let guard = self.register();
        let flag = guard.flag.clone();
        let handle = tokio::task::spawn_blocking(move || job(flag));

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        "{} timed out after {:.1}s, cancelling",
                        label,
                        limit.as_secs_f64()
                    );
                    guard.flag.store(true, Ordering::Relaxed);
                    return Err(AppError::OptimizationCancelled);
                }
            },
            None => handle.await,
        };

        joined.map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
    }

    fn register(&self) -> JobGuard {
        let id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let flag = Arc::new(AtomicBool::new(false));
        self.jobs.insert(id, flag.clone());
        JobGuard {
            id,
            flag,
            jobs: self.jobs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::PeriodRange;
    use chrono::NaiveDate;

    fn wave_bars(n: usize) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 / 9.0).sin() * 8.0 + (i as f64 / 31.0).cos() * 4.0;
                Bar {
                    date: start + chrono::Days::new(i as u64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    fn small_config() -> OptimizationConfig {
        OptimizationConfig {
            fast_range: PeriodRange::new(3, 6),
            slow_range: PeriodRange::new(10, 14),
            min_distance: 5,
            backtest: BacktestConfig {
                atr_period: 5,
                initial_capital: 10_000.0,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_optimize_runs_off_thread() {
        let service = BacktestService::new();
        let summary = service
            .optimize("wave".into(), wave_bars(200), small_config())
            .await
            .unwrap();
        assert!(summary.error.is_none());
        assert_eq!(
            summary.total_pairs_tested,
            optimizer::generate_pairs(PeriodRange::new(3, 6), PeriodRange::new(10, 14), 5).len()
        );
    }

    #[tokio::test]
    async fn test_empty_grid_becomes_failed_summary() {
        let mut config = small_config();
        config.min_distance = 50;
        let summary = BacktestService::new()
            .optimize("wave".into(), wave_bars(200), config)
            .await
            .unwrap();
        assert_eq!(summary.total_pairs_tested, 0);
        assert!(summary.best_pair.is_none());
        assert_eq!(
            summary.error.map(|e| e.code),
            Some("INVALID_PARAMETER_RANGE".to_string())
        );
    }

    #[tokio::test]
    async fn test_timeout_cancels_sweep() {
        let config = OptimizationConfig {
            fast_range: PeriodRange::new(2, 150),
            slow_range: PeriodRange::new(20, 400),
            min_distance: 1,
            backtest: BacktestConfig {
                atr_period: 14,
                ..Default::default()
            },
        };
        let service = BacktestService::new().with_timeout(Duration::from_millis(1));
        let err = service
            .optimize("wave".into(), wave_bars(3_000), config)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::OptimizationCancelled));
        assert_eq!(service.running_jobs(), 0);
    }

    /// Blocks until its flag is raised or `limit` passes; reports which happened.
    fn wait_for_cancel(flag: &AtomicBool, limit: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < limit {
            if flag.load(Ordering::Relaxed) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[tokio::test]
    async fn test_new_job_does_not_uncancel_timed_out_job() {
        let service = BacktestService::new();
        let (tx, rx) = std::sync::mpsc::channel();

        let timed = service.clone().with_timeout(Duration::from_millis(20));
        let err = timed
            .run_cancellable("slow job", move |flag| {
                let _ = tx.send(wait_for_cancel(&flag, Duration::from_secs(5)));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::OptimizationCancelled));

        let quick = service.run_cancellable("quick job", |flag| Ok(flag.load(Ordering::Relaxed)));
        assert!(!quick.await.unwrap());

        let saw_cancel = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(10)))
            .await
            .unwrap()
            .unwrap();
        assert!(saw_cancel);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_reaches_jobs_from_every_clone() {
        let service = BacktestService::new();
        let spawn_waiter = |svc: BacktestService| {
            tokio::spawn(async move {
                svc.run_cancellable("waiter", |flag| {
                    Ok(wait_for_cancel(&flag, Duration::from_secs(5)))
                })
                .await
            })
        };
        let first = spawn_waiter(service.clone());
        let second = spawn_waiter(service.clone());

        while service.running_jobs() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        service.cancel();

        assert!(first.await.unwrap().unwrap());
        assert!(second.await.unwrap().unwrap());
        assert_eq!(service.running_jobs(), 0);

        // A job started after the cancel runs with a clear flag.
        let later = service
            .run_cancellable("later", |flag| Ok(flag.load(Ordering::Relaxed)))
            .await
            .unwrap();
        assert!(!later);
    }

    #[tokio::test]
    async fn test_compare_rejects_inverted_pair() {
        let err = BacktestService::new()
            .compare_pairs(
                "wave".into(),
                wave_bars(100),
                vec![(5, 20), (20, 5)],
                BacktestConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPair { fast: 20, slow: 5 }));
    }

    #[tokio::test]
    async fn test_backtest_insufficient_data_is_warning() {
        let results = BacktestService::new()
            .run_backtest("wave".into(), wave_bars(30), BacktestConfig::default())
            .await
            .unwrap();
        assert!(results.trades.is_empty());
        assert!(results.performance_metrics.is_none());
        assert_eq!(
            results.warning.map(|w| w.code),
            Some("INSUFFICIENT_DATA".to_string())
        );
    }
}
