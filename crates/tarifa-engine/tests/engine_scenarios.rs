//! End-to-end engine scenarios
//!
//! - Reference derivation and rate lookup
//! - Staleness propagation and reactivation
//! - Fail-closed profit assurance
//! - Scheduled activation
//! - Rollback and revision immutability
//! - Concurrent and batch derivation

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use tarifa_common::{
    CardStatus, Direction, EntryStatus, NewRateCard, PreconditionError, ProfitAssurance,
    ProfitRule, RateCard, RateEntry, RevisionSource, TarifaError,
};
use tarifa_engine::{EngineConfig, RateEngine};

async fn engine_with_carrier() -> (RateEngine, RateCard) {
    let engine = RateEngine::in_memory(EngineConfig::default()).unwrap();
    let carrier = engine
        .create_card(NewRateCard::carrier("CARRIER-A", "USD", Direction::Termination))
        .await
        .unwrap();
    (engine, carrier)
}

async fn customer(engine: &RateEngine, code: &str, parent: &RateCard) -> RateCard {
    engine
        .create_card(NewRateCard::customer(code, "USD", Direction::Termination, parent.id))
        .await
        .unwrap()
}

fn reference_entries() -> Vec<RateEntry> {
    vec![
        RateEntry::new("1", "North America", dec!(0.0120)),
        RateEntry::new("44", "United Kingdom", dec!(0.0250)),
    ]
}

fn reference_rules() -> Vec<ProfitRule> {
    vec![
        ProfitRule::percentage("", dec!(0.10)),
        ProfitRule::fixed("44", dec!(0.0050)),
    ]
}

// ============ DERIVATION ============

#[tokio::test]
async fn test_reference_derivation() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();

    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();

    let revision = engine.derive_customer_card(cust.id).await.unwrap();
    assert_eq!(revision.number, 1);

    let table = engine.get_revision(cust.id, 1).await.unwrap();
    assert_eq!(table.entry("1").unwrap().rate, dec!(0.0132));
    assert_eq!(table.entry("44").unwrap().rate, dec!(0.0300));

    let status = engine.get_card_status(cust.id).await.unwrap();
    assert_eq!(status.status, CardStatus::Active);
    assert_eq!(status.revision_count, 1);

    match table.source() {
        RevisionSource::Derived(p) => {
            assert_eq!(p.parent_card_id, carrier.id);
            assert_eq!(p.parent_revision, 1);
            assert_eq!(p.rule_set_version, 1);
        }
        other => panic!("unexpected source: {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_lookup_uses_longest_prefix() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(
            carrier.id,
            vec![
                RateEntry::new("44", "United Kingdom", dec!(0.0250)),
                RateEntry::new("447", "UK Mobile", dec!(0.0600)),
            ],
            None,
        )
        .await
        .unwrap();

    let hit = engine.rate_lookup(carrier.id, "+447911123456").await.unwrap().unwrap();
    assert_eq!(hit.entry.prefix, "447");
    assert_eq!(hit.revision.number, 1);

    let hit = engine.rate_lookup(carrier.id, "442071234567").await.unwrap().unwrap();
    assert_eq!(hit.entry.prefix, "44");

    assert!(engine.rate_lookup(carrier.id, "33123456789").await.unwrap().is_none());
}

#[tokio::test]
async fn test_carrier_tech_prefix_is_stripped() {
    let engine = RateEngine::in_memory(EngineConfig::default()).unwrap();
    let carrier = engine
        .create_card(
            NewRateCard::carrier("CARRIER-TP", "USD", Direction::Termination).with_tech_prefix("0099"),
        )
        .await
        .unwrap();
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();

    let hit = engine.rate_lookup(carrier.id, "0099442071234567").await.unwrap().unwrap();
    assert_eq!(hit.entry.prefix, "44");
}

#[tokio::test]
async fn test_missing_parent_revision_keeps_card_stale() {
    let (engine, carrier) = engine_with_carrier().await;
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();

    let err = engine.derive_customer_card(cust.id).await.unwrap_err();
    assert!(matches!(err, TarifaError::Dependency(_)));
    assert!(err.is_retryable());
    assert_eq!(engine.get_card_status(cust.id).await.unwrap().status, CardStatus::Stale);
    assert_eq!(engine.list_revisions(cust.id).await.unwrap().len(), 0);
}

// ============ STALENESS ============

#[tokio::test]
async fn test_publish_marks_active_dependents_stale_only() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();

    let d1 = customer(&engine, "D1", &carrier).await;
    let d2 = customer(&engine, "D2", &carrier).await;
    for card in [&d1, &d2] {
        engine.set_profit_rules(card.id, reference_rules()).await.unwrap();
        engine.derive_customer_card(card.id).await.unwrap();
    }
    engine.set_card_active(d2.id, false).await.unwrap();

    engine
        .publish_carrier_revision(carrier.id, vec![RateEntry::new("1", "North America", dec!(0.0110))], None)
        .await
        .unwrap();

    assert_eq!(engine.get_card_status(d1.id).await.unwrap().status, CardStatus::Stale);
    assert_eq!(engine.get_card_status(d2.id).await.unwrap().status, CardStatus::Inactive);
}

#[tokio::test]
async fn test_derive_inactive_card_fails_without_change() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();
    engine.set_card_active(cust.id, false).await.unwrap();

    let err = engine.derive_customer_card(cust.id).await.unwrap_err();
    assert!(matches!(
        err,
        TarifaError::Precondition(PreconditionError::CardInactive { .. })
    ));

    let status = engine.get_card_status(cust.id).await.unwrap();
    assert_eq!(status.status, CardStatus::Inactive);
    assert_eq!(status.revision_count, 0);

    assert!(matches!(
        engine.rate_lookup(cust.id, "1212").await,
        Err(TarifaError::Precondition(_))
    ));
}

#[tokio::test]
async fn test_reactivated_out_of_date_card_goes_stale() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();

    engine.set_card_active(cust.id, false).await.unwrap();
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();

    let card = engine.set_card_active(cust.id, true).await.unwrap();
    assert_eq!(card.status, CardStatus::Stale);
}

#[tokio::test]
async fn test_reactivated_current_card_is_active() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();

    engine.set_card_active(cust.id, false).await.unwrap();
    let card = engine.set_card_active(cust.id, true).await.unwrap();
    assert_eq!(card.status, CardStatus::Active);
}

// ============ PROFIT ASSURANCE ============

#[tokio::test]
async fn test_negative_margin_is_blocked_not_rated() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, vec![RateEntry::new("1", "North America", dec!(0.0120))], None)
        .await
        .unwrap();

    let cust = engine
        .create_card(
            NewRateCard::customer("CUST-1", "USD", Direction::Termination, carrier.id)
                .with_profit_assurance(ProfitAssurance::enabled()),
        )
        .await
        .unwrap();
    engine
        .set_profit_rules(cust.id, vec![ProfitRule::fixed("", dec!(-0.0005))])
        .await
        .unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();

    let table = engine.get_revision(cust.id, 1).await.unwrap();
    assert_eq!(table.entry("1").unwrap().status, EntryStatus::Blocked);
    assert_eq!(table.meta().blocked_count, 1);
    assert!(engine.rate_lookup(cust.id, "12125551234").await.unwrap().is_none());
    assert_eq!(engine.metrics().entries_blocked.get(), 1);
}

#[tokio::test]
async fn test_exempt_prefix_passes_through_at_a_loss() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();

    let cust = engine
        .create_card(
            NewRateCard::customer("CUST-1", "USD", Direction::Termination, carrier.id)
                .with_profit_assurance(ProfitAssurance::enabled().with_exemption("1")),
        )
        .await
        .unwrap();
    engine
        .set_profit_rules(cust.id, vec![ProfitRule::fixed("", dec!(-0.0005))])
        .await
        .unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();

    let table = engine.get_revision(cust.id, 1).await.unwrap();
    let us = table.entry("1").unwrap();
    assert_eq!(us.status, EntryStatus::Active);
    assert_eq!(us.rate, dec!(0.0115));
    assert_eq!(table.entry("44").unwrap().status, EntryStatus::Blocked);
}

// ============ SCHEDULING ============

#[tokio::test]
async fn test_future_revision_activates_on_sweep() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();

    let go_live = Utc::now() + Duration::hours(1);
    engine
        .publish_carrier_revision(
            carrier.id,
            vec![RateEntry::new("1", "North America", dec!(0.0100))],
            Some(go_live),
        )
        .await
        .unwrap();

    // Not in force yet: lookups and dependents unaffected
    assert_eq!(engine.get_card_status(cust.id).await.unwrap().status, CardStatus::Active);
    let hit = engine.rate_lookup(carrier.id, "1212").await.unwrap().unwrap();
    assert_eq!(hit.entry.rate, dec!(0.0120));

    assert!(engine.sweep_activations(Utc::now()).await.marked_stale.is_empty());

    let report = engine.sweep_activations(go_live + Duration::minutes(1)).await;
    assert_eq!(report.marked_stale, vec![cust.id]);
    assert_eq!(engine.get_card_status(cust.id).await.unwrap().status, CardStatus::Stale);
}

// ============ REVISIONS ============

#[tokio::test]
async fn test_rollback_appends_copy_and_fans_out() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();

    engine
        .publish_carrier_revision(carrier.id, vec![RateEntry::new("1", "North America", dec!(0.0500))], None)
        .await
        .unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();

    let restored = engine.rollback(carrier.id, 1).await.unwrap();
    assert_eq!(restored.number, 3);

    let history = engine.list_revisions(carrier.id).await.unwrap();
    let numbers: Vec<u32> = history.iter().map(|m| m.number).collect();
    assert_eq!(numbers, vec![3, 2, 1]);
    assert_eq!(history[0].digest, history[2].digest);
    assert_eq!(
        history[0].source,
        RevisionSource::Restored {
            restored_from: 1,
            provenance: None,
            baseline: None,
        }
    );

    assert_eq!(engine.get_card_status(cust.id).await.unwrap().status, CardStatus::Stale);
    let hit = engine.rate_lookup(carrier.id, "1212").await.unwrap().unwrap();
    assert_eq!(hit.entry.rate, dec!(0.0120));
}

#[tokio::test]
async fn test_customer_rollback_survives_sweep_and_rebuild() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, vec![RateEntry::new("1", "North America", dec!(0.0100))], None)
        .await
        .unwrap();
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();

    engine
        .publish_carrier_revision(carrier.id, vec![RateEntry::new("1", "North America", dec!(0.0200))], None)
        .await
        .unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();
    let hit = engine.rate_lookup(cust.id, "1212").await.unwrap().unwrap();
    assert_eq!(hit.entry.rate, dec!(0.0220));

    let restored = engine.rollback(cust.id, 1).await.unwrap();
    assert_eq!(restored.number, 3);
    assert_eq!(engine.get_card_status(cust.id).await.unwrap().status, CardStatus::Active);

    let swept = engine.sweep_activations(Utc::now()).await;
    assert!(swept.marked_stale.is_empty());
    let rebuilt = engine.rebuild_stale_cards().await;
    assert_eq!(rebuilt.attempted(), 0);

    let hit = engine.rate_lookup(cust.id, "1212").await.unwrap().unwrap();
    assert_eq!(hit.revision.number, 3);
    assert_eq!(hit.entry.rate, dec!(0.0110));

    // A later parent publish still invalidates the restored rates
    engine
        .publish_carrier_revision(carrier.id, vec![RateEntry::new("1", "North America", dec!(0.0300))], None)
        .await
        .unwrap();
    assert_eq!(engine.get_card_status(cust.id).await.unwrap().status, CardStatus::Stale);
    engine.rebuild_stale_cards().await;
    let hit = engine.rate_lookup(cust.id, "1212").await.unwrap().unwrap();
    assert_eq!(hit.entry.rate, dec!(0.0330));
}

#[tokio::test]
async fn test_customer_rollback_records_current_inputs() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();
    engine
        .set_profit_rules(cust.id, vec![ProfitRule::percentage("", dec!(0.15))])
        .await
        .unwrap();
    engine.derive_customer_card(cust.id).await.unwrap();

    engine.rollback(cust.id, 1).await.unwrap();
    let restored = engine.get_revision(cust.id, 3).await.unwrap();
    match restored.source() {
        RevisionSource::Restored {
            restored_from,
            provenance,
            baseline,
        } => {
            assert_eq!(*restored_from, 1);
            assert_eq!(provenance.unwrap().rule_set_version, 1);
            assert_eq!(baseline.unwrap().rule_set_version, 2);
            assert_eq!(baseline.unwrap().parent_revision, 1);
        }
        other => panic!("unexpected source {:?}", other),
    }
    assert!(engine.sweep_activations(Utc::now()).await.marked_stale.is_empty());

    engine
        .set_profit_rules(cust.id, vec![ProfitRule::percentage("", dec!(0.20))])
        .await
        .unwrap();
    assert_eq!(engine.get_card_status(cust.id).await.unwrap().status, CardStatus::Stale);
}

#[tokio::test]
async fn test_rollback_to_unknown_revision() {
    let (engine, carrier) = engine_with_carrier().await;
    let err = engine.rollback(carrier.id, 4).await.unwrap_err();
    assert!(matches!(
        err,
        TarifaError::Precondition(PreconditionError::UnknownRevision { number: 4, .. })
    ));
}

#[tokio::test]
async fn test_revisions_unchanged_by_later_operations() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();
    let before = engine.list_revisions(carrier.id).await.unwrap();
    let first = engine.get_revision(carrier.id, 1).await.unwrap();

    engine
        .publish_carrier_revision(carrier.id, vec![RateEntry::new("1", "North America", dec!(0.0200))], None)
        .await
        .unwrap();
    engine.rollback(carrier.id, 1).await.unwrap();

    let after = engine.list_revisions(carrier.id).await.unwrap();
    assert_eq!(after.last(), before.first());
    assert_eq!(engine.get_revision(carrier.id, 1).await.unwrap().entries(), first.entries());
}

// ============ CONCURRENCY ============

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_derivations_get_distinct_revisions() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();
    let cust = customer(&engine, "CUST-1", &carrier).await;
    engine.set_profit_rules(cust.id, reference_rules()).await.unwrap();

    let engine = Arc::new(engine);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.derive_customer_card(cust.id).await })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().number);
    }
    numbers.sort();
    assert_eq!(numbers, (1..=8).collect::<Vec<u32>>());
    assert_eq!(engine.get_card_status(cust.id).await.unwrap().revision_count, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rebuild_isolates_failures() {
    let (engine, carrier) = engine_with_carrier().await;
    engine
        .publish_carrier_revision(carrier.id, reference_entries(), None)
        .await
        .unwrap();

    let mut good = Vec::new();
    for i in 0..5 {
        let card = customer(&engine, &format!("CUST-{i}"), &carrier).await;
        engine.set_profit_rules(card.id, reference_rules()).await.unwrap();
        good.push(card.id);
    }
    // Stale but without rules
    let broken = customer(&engine, "CUST-BROKEN", &carrier).await;

    let report = engine.rebuild_stale_cards().await;
    good.sort();
    assert_eq!(report.derived, good);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, broken.id);

    for id in &good {
        assert_eq!(engine.get_card_status(*id).await.unwrap().status, CardStatus::Active);
    }
    assert_eq!(engine.get_card_status(broken.id).await.unwrap().status, CardStatus::Stale);
    assert_eq!(engine.metrics().stale_cards.get(), 1);

    // Nothing left to do except the broken card
    let again = engine.rebuild_stale_cards().await;
    assert!(again.derived.is_empty());
    assert_eq!(again.failed.len(), 1);
}
