use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::batch::{BatchCoordinator, RunSummary};
use crate::config::{SchedulerConfig, is_valid_cron};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_summary: Option<RunSummary>,
    pub last_error: Option<String>,
}

/// Cron-driven full runs for daemon mode.
pub struct PriceScheduler {
    scheduler: JobScheduler,
    coordinator: Arc<BatchCoordinator>,
    config: SchedulerConfig,
    stats: Arc<RwLock<SchedulerStats>>,
    // A cron tick that fires while a run is still going is skipped.
    running: Arc<Mutex<()>>,
    job_id: Option<Uuid>,
}

impl PriceScheduler {
    pub async fn new(coordinator: Arc<BatchCoordinator>, config: SchedulerConfig) -> Result<Self> {
        if !is_valid_cron(&config.cron) {
            bail!("Invalid cron expression: {}", config.cron);
        }

        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            coordinator,
            config,
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            running: Arc::new(Mutex::new(())),
            job_id: None,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        if !self.config.enabled {
            tracing::warn!("Scheduler is disabled in configuration, not starting");
            return Ok(());
        }

        let coordinator = Arc::clone(&self.coordinator);
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);

        let job = Job::new_async(self.config.cron.as_str(), move |_uuid, _l| {
            let coordinator = Arc::clone(&coordinator);
            let stats = Arc::clone(&stats);
            let running = Arc::clone(&running);

            Box::pin(async move {
                Self::execute_run(coordinator, stats, running).await;
            })
        })?;

        self.job_id = Some(self.scheduler.add(job).await?);
        self.scheduler.start().await?;

        tracing::info!("Price scheduler started with schedule: {}", self.config.cron);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(job_id) = self.job_id.take() {
            self.scheduler.remove(&job_id).await?;
        }
        self.scheduler.shutdown().await?;
        tracing::info!("Price scheduler shutdown");
        Ok(())
    }

    /// Runs the scheduled job immediately, outside the cron schedule.
    pub async fn run_now(&self) {
        Self::execute_run(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.stats),
            Arc::clone(&self.running),
        )
        .await;
    }

    pub async fn get_stats(&self) -> SchedulerStats {
        self.stats.read().await.clone()
    }

    async fn execute_run(
        coordinator: Arc<BatchCoordinator>,
        stats: Arc<RwLock<SchedulerStats>>,
        running: Arc<Mutex<()>>,
    ) {
        let Ok(_guard) = running.try_lock() else {
            tracing::warn!("Previous scheduled run still in progress, skipping this one");
            return;
        };

        tracing::info!("Starting scheduled price scraping...");
        let started_at = Utc::now();
        let result = coordinator.run_all().await;

        let mut stats = stats.write().await;
        stats.last_run = Some(started_at);

        match result {
            Ok(summary) => {
                tracing::info!("Scheduled scraping completed: {}", summary);
                stats.completed_runs += 1;
                stats.last_summary = Some(summary);
                stats.last_error = None;
            }
            Err(e) => {
                tracing::error!("Error in scheduled scraping: {}", e);
                stats.failed_runs += 1;
                stats.last_error = Some(e.to_string());
            }
        }
    }
}
