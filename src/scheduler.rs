//! Scheduler (C12)
//! Mission: trigger a daily batch run at a configured wall-clock time,
//! honoring an immediate first run and graceful cancellation.

use chrono::{Local, NaiveTime, TimeZone};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Scheduler {
    /// "HH:MM" local time the daily batch fires at.
    schedule_time: NaiveTime,
    run_immediately: bool,
}

impl Scheduler {
    pub fn new(schedule_time: &str, run_immediately: bool) -> anyhow::Result<Self> {
        let parsed = NaiveTime::parse_from_str(schedule_time, "%H:%M")
            .map_err(|e| anyhow::anyhow!("invalid SCHEDULE_TIME {schedule_time:?}: {e}"))?;
        Ok(Self {
            schedule_time: parsed,
            run_immediately,
        })
    }

    /// Duration until the next occurrence of `schedule_time`, today if it
    /// hasn't passed yet, tomorrow otherwise.
    fn duration_until_next_run(&self) -> Duration {
        let now = Local::now();
        let mut next = Local
            .from_local_datetime(&now.date_naive().and_time(self.schedule_time))
            .single()
            .unwrap_or(now);
        if next <= now {
            next += chrono::Duration::days(1);
        }
        (next - now).to_std().unwrap_or(Duration::from_secs(60))
    }

    /// Run `on_trigger` once immediately if configured, then once per day at
    /// `schedule_time` until `cancel` fires.
    pub async fn run_forever<F, Fut>(&self, cancel: CancellationToken, mut on_trigger: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        if self.run_immediately {
            info!("running batch immediately on startup");
            on_trigger().await;
        }
        loop {
            let wait = self.duration_until_next_run();
            info!(wait_secs = wait.as_secs(), "scheduler sleeping until next trigger");
            tokio::select! {
                _ = sleep(wait) => {
                    on_trigger().await;
                }
                _ = cancel.cancelled() => {
                    warn!("scheduler cancelled, exiting run loop");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_schedule_time() {
        assert!(Scheduler::new("25:99", false).is_err());
    }

    #[test]
    fn accepts_well_formed_schedule_time() {
        let scheduler = Scheduler::new("09:00", false).unwrap();
        assert_eq!(scheduler.schedule_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn duration_until_next_run_is_never_negative() {
        let scheduler = Scheduler::new("09:00", false).unwrap();
        let wait = scheduler.duration_until_next_run();
        assert!(wait.as_secs() > 0);
        assert!(wait.as_secs() <= 24 * 3600);
    }
}
