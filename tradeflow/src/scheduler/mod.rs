//! Periodic schedulers
//!
//! Each scheduler runs one pass per tick. Passes are awaited inside the ticking
//! loop and missed ticks are skipped, so two passes of the same scheduler never
//! overlap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

pub mod dca;
pub mod limit_order;

pub use dca::DcaScheduler;
pub use limit_order::LimitOrderScheduler;

/// Wall clock in unix seconds
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Clock driven by hand, for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Counters of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub scanned: usize,
    pub fired: usize,
    pub closed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[async_trait]
pub trait SchedulerPass: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One sequential pass over the stored records; never fails
    async fn run_pass(&self) -> PassSummary;
}

/// Run `pass` every `period` until `shutdown` flips to true
pub fn spawn_scheduler(pass: Arc<dyn SchedulerPass>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("{} scheduler started, period {:?}", pass.name(), period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = pass.run_pass().await;
                    info!(
                        "{} pass: scanned {}, fired {}, closed {}, skipped {}, failed {}",
                        pass.name(), summary.scanned, summary.fired, summary.closed, summary.skipped, summary.failed
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("{} scheduler stopped", pass.name());
    })
}
