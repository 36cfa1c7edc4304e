//! Background scheduler
//!
//! Every tick: sweep scheduled carrier activations into staleness, then
//! rebuild every stale customer card. Stops when the shutdown channel flips.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tarifa_engine::{RateEngine, RebuildReport};

use crate::config::SchedulerSettings;

/// What one tick did
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub ran_at: Option<DateTime<Utc>>,
    pub activated: usize,
    pub rebuild: RebuildReport,
}

/// Last tick, shared with the health endpoint
#[derive(Default)]
pub struct SchedulerStatus {
    last_tick: RwLock<Option<TickReport>>,
}

impl SchedulerStatus {
    pub fn last_tick(&self) -> Option<TickReport> {
        self.last_tick.read().clone()
    }

    fn record(&self, report: TickReport) {
        *self.last_tick.write() = Some(report);
    }
}

/// Run one sweep-and-rebuild pass
pub async fn tick(engine: &RateEngine, now: DateTime<Utc>) -> TickReport {
    let swept = engine.sweep_activations(now).await;
    let rebuild = engine.rebuild_stale_cards().await;

    TickReport {
        ran_at: Some(now),
        activated: swept.marked_stale.len(),
        rebuild,
    }
}

/// Spawn the periodic loop
pub fn spawn(
    engine: RateEngine,
    settings: SchedulerSettings,
    status: Arc<SchedulerStatus>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(settings.interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = settings.interval_secs, "Scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = tick(&engine, Utc::now()).await;
                    if report.activated > 0 || report.rebuild.attempted() > 0 {
                        info!(
                            activated = report.activated,
                            derived = report.rebuild.derived.len(),
                            failed = report.rebuild.failed.len(),
                            "Scheduler tick"
                        );
                    } else {
                        debug!("Scheduler tick, nothing to do");
                    }
                    status.record(report);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tarifa_common::{CardStatus, Direction, NewRateCard, ProfitRule, RateEntry};
    use tarifa_engine::EngineConfig;

    #[tokio::test]
    async fn test_tick_rebuilds_stale_cards() {
        let engine = RateEngine::in_memory(EngineConfig::default()).unwrap();
        let carrier = engine
            .create_card(NewRateCard::carrier("C", "USD", Direction::Termination))
            .await
            .unwrap();
        engine
            .publish_carrier_revision(carrier.id, vec![RateEntry::new("1", "US", dec!(0.01))], None)
            .await
            .unwrap();
        let customer = engine
            .create_card(NewRateCard::customer("D", "USD", Direction::Termination, carrier.id))
            .await
            .unwrap();
        engine
            .set_profit_rules(customer.id, vec![ProfitRule::percentage("", dec!(0.1))])
            .await
            .unwrap();

        let report = tick(&engine, Utc::now()).await;
        assert_eq!(report.rebuild.derived, vec![customer.id]);
        assert_eq!(
            engine.get_card_status(customer.id).await.unwrap().status,
            CardStatus::Active
        );
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let engine = RateEngine::in_memory(EngineConfig::default()).unwrap();
        let status = Arc::new(SchedulerStatus::default());
        let (tx, rx) = watch::channel(false);

        let handle = spawn(
            engine,
            SchedulerSettings {
                enabled: true,
                interval_secs: 1,
            },
            status.clone(),
            rx,
        );

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(status.last_tick().is_some());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
