//! Bounded derivation pool
//!
//! Runs one job per card on the tokio runtime with at most `max_parallel`
//! jobs in flight. Each card's outcome is recorded on its own; a failing or
//! panicking job never stops the rest.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use tarifa_common::{CardId, Result};

/// Outcome of one rebuild pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub derived: Vec<CardId>,
    pub failed: Vec<(CardId, String)>,
    /// Jobs that panicked; their card stays stale for the next pass
    pub aborted: usize,
}

impl RebuildReport {
    pub fn attempted(&self) -> usize {
        self.derived.len() + self.failed.len() + self.aborted
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.aborted == 0
    }
}

/// Run `job` for every card, at most `max_parallel` at a time
pub async fn run_bounded<F, Fut, T>(card_ids: Vec<CardId>, max_parallel: usize, job: F) -> RebuildReport
where
    F: Fn(CardId) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let permits = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut tasks = JoinSet::new();

    for card_id in card_ids {
        let permits = permits.clone();
        let fut = job(card_id);
        tasks.spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await;
            (card_id, fut.await)
        });
    }

    let mut report = RebuildReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((card_id, Ok(_))) => report.derived.push(card_id),
            Ok((card_id, Err(err))) => {
                warn!(card = %card_id, error = %err, "Rebuild failed for card");
                report.failed.push((card_id, err.to_string()));
            }
            Err(err) => {
                error!(error = %err, "Rebuild task aborted");
                report.aborted += 1;
            }
        }
    }

    // Completion order is nondeterministic
    report.derived.sort();
    report.failed.sort();

    info!(
        derived = report.derived.len(),
        failed = report.failed.len(),
        aborted = report.aborted,
        "Rebuild pass finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tarifa_common::{PreconditionError, TarifaError};

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let ids: Vec<CardId> = (0..6).map(|_| CardId::new()).collect();
        let bad = ids[2];

        let report = run_bounded(ids.clone(), 2, |id| async move {
            if id == bad {
                Err(TarifaError::from(PreconditionError::CardInactive { card_id: id }))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(report.derived.len(), 5);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, bad);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let ids: Vec<CardId> = (0..10).map(|_| CardId::new()).collect();

        let report = run_bounded(ids, 3, |_| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(report.derived.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_panicking_job_counted() {
        let ids = vec![CardId::new(), CardId::new()];
        let first = ids[0];
        let report = run_bounded(ids, 2, |id| async move {
            if id == first {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        assert_eq!(report.aborted, 1);
        assert_eq!(report.derived.len(), 1);
    }
}
