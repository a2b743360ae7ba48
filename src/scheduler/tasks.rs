use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::scheduler::Scheduler;
use crate::sync::{RunReport, SyncError, TestimonialSync};

/// Single-flight wrapper: at most one sync run is in progress at a time.
pub struct SyncRunner {
    job: TestimonialSync,
    running: Mutex<()>,
}

impl SyncRunner {
    pub fn new(job: TestimonialSync) -> Self {
        Self {
            job,
            running: Mutex::new(()),
        }
    }

    /// Run the job unless a previous run is still going.
    /// Returns None when the tick was skipped.
    pub async fn tick(&self) -> Option<Result<RunReport, SyncError>> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Previous testimonial sync still running; skipping this tick");
            return None;
        };
        Some(self.job.run().await)
    }
}

/// Run the sync once now, then register it to repeat every `interval`.
pub async fn start_testimonial_sync(
    scheduler: &Scheduler,
    runner: Arc<SyncRunner>,
    interval: Duration,
) -> anyhow::Result<()> {
    runner.tick().await;

    scheduler
        .add_repeated_job(interval, "testimonial-sync", move || {
            let runner = runner.clone();
            Box::pin(async move {
                runner.tick().await;
            })
        })
        .await?;

    scheduler.start().await
}
