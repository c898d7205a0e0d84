//! Periodic maintenance
//!
//! Each tick expires due credits, re-checks the tier table and repairs any
//! running totals that drifted from the ledger. The work is blocking SQLite
//! access, so it runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::LoyaltyResult;
use crate::service::{ExpirySummary, LoyaltyService};

/// What one sweep pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expiry: ExpirySummary,
    /// Members whose totals were rebuilt from the log
    pub repaired: Vec<String>,
}

pub struct SweepJob {
    service: Arc<LoyaltyService>,
    interval: Duration,
}

impl SweepJob {
    pub fn new(service: Arc<LoyaltyService>) -> Self {
        let interval = service.settings().sweep_interval();
        Self { service, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One synchronous pass
    pub fn run_once(service: &LoyaltyService) -> LoyaltyResult<SweepReport> {
        let expiry = service.expire_due()?;
        if let Err(e) = service.verify_tiers() {
            error!(error = %e, "Tier table failed its integrity check");
            return Err(e);
        }
        let repaired = service.reconcile_all()?;
        Ok(SweepReport { expiry, repaired })
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    /// The first pass runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Sweep job started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let service = self.service.clone();
            match tokio::task::spawn_blocking(move || Self::run_once(&service)).await {
                Ok(Ok(report)) => {
                    if report.expiry.expired > 0 || !report.repaired.is_empty() {
                        info!(
                            expired = report.expiry.expired,
                            repaired = report.repaired.len(),
                            "Sweep pass finished"
                        );
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Sweep pass failed, retrying next tick"),
                Err(e) => error!(error = %e, "Sweep task panicked"),
            }
        }

        info!("Sweep job stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{DAY_MS, ManualClock};
    use crate::config::LoyaltyConfig;
    use crate::db::LoyaltyDb;
    use crate::service::AwardRequest;

    fn service(clock: &ManualClock) -> Arc<LoyaltyService> {
        let mut config = LoyaltyConfig::default();
        config.engine.welcome_bonus = 0;
        config.engine.points_validity_days = Some(10);
        Arc::new(
            LoyaltyService::new(
                &config,
                LoyaltyDb::open_in_memory().unwrap(),
                Arc::new(clock.clone()),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_run_once_expires_due_credits() {
        let clock = ManualClock::new(DAY_MS);
        let svc = service(&clock);
        let m = svc.enroll("user-1", None).unwrap().member;
        svc.award_points(AwardRequest::new(&m.id, 80, "purchase", "o-1"))
            .unwrap();

        assert_eq!(SweepJob::run_once(&svc).unwrap(), SweepReport::default());

        clock.advance(11 * DAY_MS);
        let report = SweepJob::run_once(&svc).unwrap();
        assert_eq!(report.expiry.expired, 1);
        assert!(report.repaired.is_empty());
        assert_eq!(svc.get_balance(&m.id).unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let clock = ManualClock::new(DAY_MS);
        let job = SweepJob::new(service(&clock)).with_interval(Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(job.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweep job did not stop")
            .unwrap();
    }
}
