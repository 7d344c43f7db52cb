use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::epg::EpgEngine;
use super::error::PlutoError;
use super::settings::SettingsStore;
use super::types::Region;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Cheap handle for asking the scheduler to start a cycle now.
#[derive(Clone)]
pub struct SchedulerHandle {
    trigger: Arc<Notify>,
}

impl SchedulerHandle {
    /// A request made while a cycle is running is kept and starts the next
    /// cycle as soon as the current one ends.
    pub fn run_now(&self) {
        self.trigger.notify_one();
    }
}

/// Outcome of one region within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionOutcome {
    Written,
    Empty,
    Failed(PlutoError),
}

pub struct Scheduler {
    engine: Arc<EpgEngine>,
    settings: Arc<SettingsStore>,
    trigger: Arc<Notify>,
    interval: Duration,
}

/// Concrete regions in the order they were selected, then the aggregate.
pub fn cycle_order(selected: &[Region]) -> Vec<Region> {
    let mut order: Vec<Region> = Vec::with_capacity(selected.len());
    for region in selected {
        if *region != Region::All && !order.contains(region) {
            order.push(*region);
        }
    }
    if selected.contains(&Region::All) {
        order.push(Region::All);
    }
    order
}

impl Scheduler {
    pub fn new(engine: Arc<EpgEngine>, settings: Arc<SettingsStore>, interval: Duration) -> Self {
        Self {
            engine,
            settings,
            trigger: Arc::new(Notify::new()),
            interval,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            trigger: self.trigger.clone(),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "guide scheduler started");
        loop {
            self.run_cycle(&shutdown).await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.trigger.notified() => info!("guide refresh requested"),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("guide scheduler stopped");
    }

    /// Processes every active region once. Failures are logged per region
    /// and never stop the remaining regions.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Vec<(Region, RegionOutcome)> {
        let regions = cycle_order(&self.settings.active_regions().await);
        let mut outcomes = Vec::with_capacity(regions.len());

        for region in regions {
            if shutdown.is_cancelled() {
                break;
            }
            let outcome = match self.engine.run_region(region, shutdown).await {
                Ok(Some(_)) => RegionOutcome::Written,
                Ok(None) => RegionOutcome::Empty,
                Err(PlutoError::Cancelled) => break,
                Err(e) => {
                    error!(%region, "guide generation failed: {e}");
                    RegionOutcome::Failed(e)
                }
            };
            outcomes.push((region, outcome));
        }

        info!(regions = outcomes.len(), "guide cycle finished");
        outcomes
    }
}
