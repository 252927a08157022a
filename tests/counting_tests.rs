mod common;

use rust_decimal::Decimal;
use wms_engine::{
    models::{
        counting::{CountSessionFilter, CountStatus, ReconciliationPolicy},
        movement::{DocumentType, MovementType},
        operations::{
            ApplyCountRequest, CountEntry, CountScope, CreateCountSessionRequest, EnterCountsRequest,
            IssueLine, IssueRequest,
        },
    },
    services::SyncRequest,
};

use common::{Harness, actor, connection_error, dec};

fn create(locations: Vec<i64>) -> CreateCountSessionRequest {
    CreateCountSessionRequest {
        warehouse: "WH1".into(),
        scope: CountScope { locations, ..CountScope::default() },
        idempotency_key: None,
    }
}

fn counts(session_id: i64, entries: &[(i64, &str)]) -> EnterCountsRequest {
    EnterCountsRequest {
        session_id,
        counts: entries
            .iter()
            .map(|(detail_id, qty)| CountEntry { detail_id: *detail_id, counted_qty: dec(qty) })
            .collect(),
        idempotency_key: None,
    }
}

fn apply(session_id: i64, create_erp_adjustments: bool, key: &str) -> ApplyCountRequest {
    ApplyCountRequest {
        session_id,
        create_erp_adjustments,
        comment: Some("Q3".into()),
        idempotency_key: Some(key.into()),
    }
}

/// Opens a session over `locations` and returns (session id, detail ids).
async fn open_session(h: &Harness, locations: Vec<i64>) -> (i64, Vec<i64>) {
    let created = h.counting.create_session(create(locations), &actor()).await.unwrap();
    let details = h.counting.session_details(created.session_id).await.unwrap();
    (created.session_id, details.details.iter().map(|d| d.id).collect())
}

#[tokio::test]
async fn shortage_produces_negative_adjustment_and_closes_session() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;

    let (session_id, details) = open_session(&h, vec![10]).await;
    assert_eq!(details.len(), 1);

    h.counting.enter_counts(counts(session_id, &[(details[0], "45")]), &actor()).await.unwrap();
    let result = h.counting.apply_adjustments(apply(session_id, false, "apply-0001"), &actor()).await.unwrap();

    assert_eq!(result.adjustments_applied, 1);
    assert_eq!(result.adjustments[0].movement_type, MovementType::AdjustNeg);
    assert_eq!(result.adjustments[0].diff, Decimal::from(-5));
    assert_eq!(h.qty("WH1", 10, "A", None).await, Decimal::from(45));

    let logged = h.stock.movements_by_idempotency_key("apply-0001").await.unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].quantity, Decimal::from(5));
    assert_eq!(logged[0].location_id_from, Some(10));
    assert_eq!(logged[0].reference, format!("COUNT-{session_id}-Q3"));

    let after = h.counting.session_details(session_id).await.unwrap();
    assert_eq!(after.session.status, CountStatus::Closed);
    assert!(after.session.closed_at.is_some());
    assert!(after.details[0].adjusted);
    assert_eq!(after.details[0].expected_qty, Decimal::from(50));
}

#[tokio::test]
async fn closed_session_cannot_be_applied_twice() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;
    let (session_id, details) = open_session(&h, vec![10]).await;
    h.counting.enter_counts(counts(session_id, &[(details[0], "45")]), &actor()).await.unwrap();
    h.counting.apply_adjustments(apply(session_id, false, "apply-0002"), &actor()).await.unwrap();

    let err = h
        .counting
        .apply_adjustments(apply(session_id, false, "apply-0003"), &actor())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "INVALID_SESSION");
    assert_eq!(h.qty("WH1", 10, "A", None).await, Decimal::from(45));
    assert!(h.stock.movements_by_idempotency_key("apply-0003").await.unwrap().is_empty());

    let err = h.counting.enter_counts(counts(session_id, &[(details[0], "40")]), &actor()).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_SESSION");
}

#[tokio::test]
async fn differences_within_tolerance_are_ignored() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;
    let (session_id, details) = open_session(&h, vec![10]).await;

    h.counting.enter_counts(counts(session_id, &[(details[0], "50.001")]), &actor()).await.unwrap();
    let result = h.counting.apply_adjustments(apply(session_id, true, "apply-0004"), &actor()).await.unwrap();

    assert_eq!(result.adjustments_applied, 0);
    assert!(result.erp_documents.is_empty());
    assert!(h.erp.calls().is_empty());
    assert_eq!(h.qty("WH1", 10, "A", None).await, Decimal::from(50));

    let after = h.counting.session_details(session_id).await.unwrap();
    assert!(!after.details[0].adjusted);
    assert_eq!(after.session.status, CountStatus::Closed);
}

#[tokio::test]
async fn uncounted_details_are_left_alone() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;
    h.seed(10, "B", None, 8).await;
    let (session_id, details) = open_session(&h, vec![10]).await;
    assert_eq!(details.len(), 2);

    h.counting.enter_counts(counts(session_id, &[(details[0], "49")]), &actor()).await.unwrap();
    let result = h.counting.apply_adjustments(apply(session_id, false, "apply-0005"), &actor()).await.unwrap();

    assert_eq!(result.adjustments_applied, 1);
    assert_eq!(h.qty("WH1", 10, "B", None).await, Decimal::from(8));
}

#[tokio::test]
async fn re_entering_a_count_overwrites_it() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;
    let (session_id, details) = open_session(&h, vec![10]).await;

    h.counting.enter_counts(counts(session_id, &[(details[0], "40")]), &actor()).await.unwrap();
    let entered = h.counting.enter_counts(counts(session_id, &[(details[0], "48")]), &actor()).await.unwrap();
    assert_eq!(entered.counts_entered, 1);

    let after = h.counting.session_details(session_id).await.unwrap();
    assert_eq!(after.details[0].counted_qty, Some(Decimal::from(48)));
}

#[tokio::test]
async fn foreign_detail_id_rejects_the_whole_batch() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;
    h.seed(20, "A", None, 5).await;
    let (first, first_details) = open_session(&h, vec![10]).await;
    let (_, other_details) = open_session(&h, vec![20]).await;

    let err = h
        .counting
        .enter_counts(counts(first, &[(first_details[0], "1"), (other_details[0], "2")]), &actor())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "VALIDATION_ERROR");
    let after = h.counting.session_details(first).await.unwrap();
    assert_eq!(after.details[0].counted_qty, None);
}

#[tokio::test]
async fn erp_adjustments_are_batched_by_sign() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;
    h.seed(10, "B", Some("L7"), 10).await;
    h.seed(11, "C", None, 4).await;
    let (session_id, details) = open_session(&h, vec![10, 11]).await;
    assert_eq!(details.len(), 3);

    h.counting
        .enter_counts(counts(session_id, &[(details[0], "52"), (details[1], "9"), (details[2], "1")]), &actor())
        .await
        .unwrap();
    let result = h.counting.apply_adjustments(apply(session_id, true, "apply-0006"), &actor()).await.unwrap();

    let calls = h.erp.calls();
    assert_eq!(calls.len(), 2);
    match &calls[0] {
        (SyncRequest::GoodReceipt(payload), key) => {
            assert_eq!(key, "apply-0006-POS");
            assert_eq!(payload.reference, format!("COUNT-ADJ-{session_id}"));
            assert_eq!(payload.lines.len(), 1);
            assert_eq!(payload.lines[0].qty, Decimal::from(2));
        }
        other => panic!("unexpected sync call {other:?}"),
    }
    match &calls[1] {
        (SyncRequest::GoodIssue(payload), key) => {
            assert_eq!(key, "apply-0006-NEG");
            assert_eq!(payload.lines.len(), 2);
            assert_eq!(payload.lines[0].lot.as_deref(), Some("L7"));
        }
        other => panic!("unexpected sync call {other:?}"),
    }

    assert_eq!(result.erp_documents.len(), 2);
    let logged = h.stock.movements_by_idempotency_key("apply-0006").await.unwrap();
    for movement in &logged {
        let expected = match movement.movement_type {
            MovementType::AdjustPos => DocumentType::GoodReceipt,
            _ => DocumentType::GoodIssue,
        };
        assert_eq!(movement.erp_doc_type, Some(expected));
    }
}

#[tokio::test]
async fn erp_failure_keeps_session_open_and_ledger_untouched() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;
    let (session_id, details) = open_session(&h, vec![10]).await;
    h.counting.enter_counts(counts(session_id, &[(details[0], "45")]), &actor()).await.unwrap();

    h.erp.fail_next(connection_error());
    let err = h.counting.apply_adjustments(apply(session_id, true, "apply-0007"), &actor()).await.unwrap_err();

    assert_eq!(err.code(), "SYNC_FAILED");
    assert_eq!(h.qty("WH1", 10, "A", None).await, Decimal::from(50));
    let session = h.counting.get_session(session_id).await.unwrap();
    assert!(session.is_open());

    // Retrying with the same key applies once the bridge is back.
    let result = h.counting.apply_adjustments(apply(session_id, true, "apply-0007"), &actor()).await.unwrap();
    assert_eq!(result.adjustments_applied, 1);
    assert_eq!(h.qty("WH1", 10, "A", None).await, Decimal::from(45));
}

#[tokio::test]
async fn replayed_apply_returns_stored_result() {
    let h = Harness::new();
    h.seed(10, "A", None, 50).await;
    let (session_id, details) = open_session(&h, vec![10]).await;
    h.counting.enter_counts(counts(session_id, &[(details[0], "47")]), &actor()).await.unwrap();

    let first = h.counting.apply_adjustments(apply(session_id, false, "apply-0008"), &actor()).await.unwrap();
    let again = h.counting.apply_adjustments(apply(session_id, false, "apply-0008"), &actor()).await.unwrap();

    assert_eq!(first, again);
    assert_eq!(h.qty("WH1", 10, "A", None).await, Decimal::from(47));
}

// =============================================================================
// Reconciliation policy
// =============================================================================

async fn count_after_concurrent_issue(h: &Harness) -> Decimal {
    h.seed(10, "A", None, 50).await;
    let (session_id, details) = open_session(h, vec![10]).await;

    // Stock leaves between the snapshot and the apply.
    let issue = IssueRequest {
        warehouse: "WH1".into(),
        reason: "SALE".into(),
        lines: vec![IssueLine { item: "A".into(), lot: None, qty: Decimal::from(10), from_location: 10 }],
        sync_erp: false,
        erp_reference: None,
        idempotency_key: None,
    };
    h.movements.issue(issue, &actor()).await.unwrap();

    h.counting.enter_counts(counts(session_id, &[(details[0], "45")]), &actor()).await.unwrap();
    h.counting.apply_adjustments(apply(session_id, false, "apply-0009"), &actor()).await.unwrap();
    h.qty("WH1", 10, "A", None).await
}

#[tokio::test]
async fn ground_truth_overwrites_with_the_count() {
    let h = Harness::with_policy(ReconciliationPolicy::GroundTruth);
    assert_eq!(count_after_concurrent_issue(&h).await, Decimal::from(45));
}

#[tokio::test]
async fn delta_policy_applies_the_difference_to_current_stock() {
    let h = Harness::with_policy(ReconciliationPolicy::DeltaAgainstLedger);
    assert_eq!(count_after_concurrent_issue(&h).await, Decimal::from(35));
}

// =============================================================================
// Session lifecycle & queries
// =============================================================================

#[tokio::test]
async fn create_requires_a_location_and_snapshots_positive_rows_only() {
    let h = Harness::new();
    let err = h.counting.create_session(create(vec![]), &actor()).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    h.seed(10, "A", None, 3).await;
    h.seed(10, "B", None, 2).await;
    let issue = IssueRequest {
        warehouse: "WH1".into(),
        reason: "SCRAP".into(),
        lines: vec![IssueLine { item: "B".into(), lot: None, qty: Decimal::from(2), from_location: 10 }],
        sync_erp: false,
        erp_reference: None,
        idempotency_key: None,
    };
    h.movements.issue(issue, &actor()).await.unwrap();

    let created = h.counting.create_session(create(vec![10, 99]), &actor()).await.unwrap();
    assert_eq!(created.details_captured, 1);

    let entries = h.audit.entries();
    assert_eq!(entries.last().map(|e| e.action.as_str()), Some("create_count_session"));
}

#[tokio::test]
async fn sessions_are_listed_newest_first() {
    let h = Harness::new();
    h.seed(10, "A", None, 3).await;
    let (first, details) = open_session(&h, vec![10]).await;
    let (second, _) = open_session(&h, vec![10]).await;

    h.counting.enter_counts(counts(first, &[(details[0], "3")]), &actor()).await.unwrap();
    h.counting.apply_adjustments(apply(first, false, "apply-0010"), &actor()).await.unwrap();

    let all = h.counting.list_sessions(&CountSessionFilter::default()).await.unwrap();
    assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![second, first]);

    let open = h
        .counting
        .list_sessions(&CountSessionFilter { status: Some(CountStatus::Open), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(open.iter().map(|s| s.id).collect::<Vec<_>>(), vec![second]);

    let elsewhere = h
        .counting
        .list_sessions(&CountSessionFilter { warehouse: Some("WH9".into()), ..Default::default() })
        .await
        .unwrap();
    assert!(elsewhere.is_empty());
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = Harness::new();
    assert_eq!(h.counting.get_session(404).await.unwrap_err().code(), "NOT_FOUND");
    let err = h.counting.apply_adjustments(apply(404, false, "apply-0011"), &actor()).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_SESSION");
}
