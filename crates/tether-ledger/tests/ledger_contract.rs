//! Behavioral tests for the in-memory RPC call ledger

use assert_matches::assert_matches;
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Clock, DeviceId, LedgerConfig, ManualClock, RpcId, TenantId, Timestamp};
use tether_ledger::{
    LedgerError, MemoryRpcCallLedger, NewRpcCall, PageLink, RpcCallLedger, RpcStatus,
    SortDirection, SortOrder, SortProperty,
};

fn setup(start_ms: u64) -> (Arc<ManualClock>, MemoryRpcCallLedger) {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(start_ms)));
    let ledger = MemoryRpcCallLedger::new(clock.clone(), &LedgerConfig::default());
    (clock, ledger)
}

fn new_call(tenant: TenantId, device: DeviceId, clock: &ManualClock) -> NewRpcCall {
    NewRpcCall::new(
        tenant,
        device,
        clock.now().saturating_add(Duration::from_secs(3_600)),
        json!({"method": "setGpio", "params": {"pin": 4}}),
    )
}

#[tokio::test]
async fn status_moves_forward_and_never_back() {
    let (clock, ledger) = setup(0);
    let row = ledger
        .insert(new_call(TenantId::new(), DeviceId::new(), &clock))
        .await
        .unwrap();

    ledger
        .update_status(row.id, RpcStatus::Sent, None)
        .await
        .unwrap();
    let done = ledger
        .update_status(row.id, RpcStatus::Successful, None)
        .await
        .unwrap();
    assert_eq!(done.status, RpcStatus::Successful);

    let err = ledger
        .update_status(row.id, RpcStatus::Queued, None)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        LedgerError::InvalidTransition {
            from: RpcStatus::Successful,
            to: RpcStatus::Queued,
            ..
        }
    );
    let stored = ledger.find_by_id(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RpcStatus::Successful);
}

#[tokio::test]
async fn expiration_deletes_rows_created_before_cutoff() {
    let (clock, ledger) = setup(0);
    let tenant = TenantId::new();
    let device = DeviceId::new();

    let mut ids = Vec::new();
    for at in [0_u64, 5, 10] {
        clock.set(Timestamp::from_millis(at));
        ids.push(ledger.insert(new_call(tenant, device, &clock)).await.unwrap().id);
    }
    // Status does not protect a row from expiration.
    ledger
        .update_status(ids[0], RpcStatus::Successful, None)
        .await
        .unwrap();

    let removed = ledger
        .expire_older_than(tenant, Timestamp::from_millis(7))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    assert!(ledger.find_by_id(ids[0]).await.unwrap().is_none());
    assert!(ledger.find_by_id(ids[1]).await.unwrap().is_none());
    let survivor = ledger.find_by_id(ids[2]).await.unwrap().unwrap();
    assert_eq!(survivor.created_time, Timestamp::from_millis(10));

    let page = ledger
        .find_by_device(tenant, device, None, &PageLink::new(10, 0))
        .await
        .unwrap();
    assert_eq!(page.total_elements, 1);
}

#[tokio::test]
async fn expiration_is_scoped_to_one_tenant() {
    let (clock, ledger) = setup(0);
    let first = TenantId::new();
    let second = TenantId::new();
    ledger
        .insert(new_call(first, DeviceId::new(), &clock))
        .await
        .unwrap();
    ledger
        .insert(new_call(second, DeviceId::new(), &clock))
        .await
        .unwrap();

    let removed = ledger
        .expire_older_than(first, Timestamp::from_millis(100))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(ledger.tenants().await.unwrap(), vec![second]);
}

#[tokio::test]
async fn update_after_expiration_reports_not_found() {
    let (clock, ledger) = setup(0);
    let tenant = TenantId::new();
    let row = ledger
        .insert(new_call(tenant, DeviceId::new(), &clock))
        .await
        .unwrap();
    ledger
        .expire_older_than(tenant, Timestamp::from_millis(1))
        .await
        .unwrap();

    let err = ledger
        .update_status(row.id, RpcStatus::Sent, None)
        .await
        .unwrap_err();
    assert_eq!(err, LedgerError::NotFound(row.id));

    let missing = RpcId::new();
    assert_matches!(
        ledger.update_status(missing, RpcStatus::Sent, None).await,
        Err(LedgerError::NotFound(id)) if id == missing
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_updates_land_before_the_delete_or_miss() {
    let (clock, ledger) = setup(0);
    let ledger = Arc::new(ledger);
    let tenant = TenantId::new();
    let mut ids = Vec::new();
    for _ in 0..200 {
        let row = ledger
            .insert(new_call(tenant, DeviceId::new(), &clock))
            .await
            .unwrap();
        ids.push(row.id);
    }
    clock.advance(Duration::from_millis(10));

    let deleted = Arc::new(AtomicBool::new(false));
    let updates: Vec<_> = ids
        .iter()
        .map(|&id| {
            let ledger = ledger.clone();
            let deleted = deleted.clone();
            tokio::spawn(async move {
                let started_after_delete = deleted.load(Ordering::SeqCst);
                let result = ledger.update_status(id, RpcStatus::Sent, None).await;
                (started_after_delete, result)
            })
        })
        .collect();
    let delete = {
        let ledger = ledger.clone();
        let deleted = deleted.clone();
        tokio::spawn(async move {
            let removed = ledger
                .expire_older_than(tenant, Timestamp::from_millis(5))
                .await
                .unwrap();
            deleted.store(true, Ordering::SeqCst);
            removed
        })
    };

    for update in updates {
        let (started_after_delete, result) = update.await.unwrap();
        match result {
            Ok(row) => {
                assert!(!started_after_delete);
                assert_eq!(row.status, RpcStatus::Sent);
            }
            Err(err) => assert_matches!(err, LedgerError::NotFound(_)),
        }
    }
    assert_eq!(delete.await.unwrap(), 200);
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn admission_time_is_kept_as_creation_time() {
    let (clock, ledger) = setup(1_000);
    let admitted = clock.now();
    clock.advance(Duration::from_millis(3));
    let call = NewRpcCall::new(
        TenantId::new(),
        DeviceId::new(),
        admitted.saturating_add(Duration::from_millis(1)),
        json!({"method": "reboot"}),
    )
    .with_created_time(admitted);

    let row = ledger.insert(call).await.unwrap();
    assert_eq!(row.created_time, admitted);
    assert_eq!(row.expiration_time, Timestamp::from_millis(1_001));
}

#[tokio::test]
async fn insert_rejects_incomplete_calls() {
    let (clock, ledger) = setup(1_000);
    let complete = new_call(TenantId::new(), DeviceId::new(), &clock);

    let no_tenant = NewRpcCall {
        tenant_id: None,
        ..complete.clone()
    };
    let no_device = NewRpcCall {
        device_id: None,
        ..complete.clone()
    };
    let no_expiration = NewRpcCall {
        expiration_time: None,
        ..complete.clone()
    };
    let already_expired = NewRpcCall {
        expiration_time: Some(Timestamp::from_millis(1_000)),
        ..complete.clone()
    };

    for call in [no_tenant, no_device, no_expiration, already_expired] {
        assert_matches!(ledger.insert(call).await, Err(LedgerError::Validation(_)));
    }
    assert!(ledger.is_empty());
    assert!(ledger.insert(complete).await.is_ok());
}

#[tokio::test]
async fn device_queries_filter_and_paginate() {
    let (clock, ledger) = setup(0);
    let tenant = TenantId::new();
    let device = DeviceId::new();
    let other_device = DeviceId::new();

    let mut ids = Vec::new();
    for at in 0..5_u64 {
        clock.set(Timestamp::from_millis(at * 10));
        ids.push(ledger.insert(new_call(tenant, device, &clock)).await.unwrap().id);
    }
    ledger
        .insert(new_call(tenant, other_device, &clock))
        .await
        .unwrap();
    ledger
        .update_status(ids[1], RpcStatus::Sent, None)
        .await
        .unwrap();
    ledger
        .update_status(ids[3], RpcStatus::Sent, None)
        .await
        .unwrap();

    // Newest first by default.
    let first = ledger
        .find_by_device(tenant, device, None, &PageLink::new(2, 0))
        .await
        .unwrap();
    assert_eq!(first.total_elements, 5);
    assert_eq!(first.total_pages, 3);
    assert!(first.has_next);
    assert_eq!(
        first.data.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![ids[4], ids[3]]
    );

    let last = ledger
        .find_by_device(tenant, device, None, &PageLink::new(2, 2))
        .await
        .unwrap();
    assert_eq!(last.data.len(), 1);
    assert!(!last.has_next);
    assert_eq!(last.data[0].id, ids[0]);

    let ascending = PageLink::new(10, 0).with_sort(SortOrder::new(
        SortProperty::CreatedTime,
        SortDirection::Asc,
    ));
    let sent = ledger
        .find_by_device(tenant, device, Some(RpcStatus::Sent), &ascending)
        .await
        .unwrap();
    assert_eq!(
        sent.data.iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![ids[1], ids[3]]
    );

    let all = ledger
        .find_by_tenant(tenant, &PageLink::new(10, 0))
        .await
        .unwrap();
    assert_eq!(all.total_elements, 6);
}

#[tokio::test]
async fn oversized_pages_are_rejected() {
    let (_clock, ledger) = setup(0);
    let link = PageLink::new(LedgerConfig::default().max_page_size + 1, 0);
    assert_matches!(
        ledger.find_by_tenant(TenantId::new(), &link).await,
        Err(LedgerError::Validation(_))
    );
}

fn any_status() -> impl Strategy<Value = RpcStatus> {
    prop::sample::select(RpcStatus::ALL.to_vec())
}

proptest! {
    /// Whatever sequence of updates is attempted, a row never leaves a
    /// terminal status and only ever moves along allowed edges.
    #[test]
    fn status_updates_follow_the_graph(steps in prop::collection::vec(any_status(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (clock, ledger) = setup(0);
            let row = ledger
                .insert(new_call(TenantId::new(), DeviceId::new(), &clock))
                .await
                .unwrap();
            let mut current = RpcStatus::Queued;
            for next in steps {
                let result = ledger.update_status(row.id, next, None).await;
                if current.can_transition_to(next) {
                    prop_assert_eq!(result.map(|r| r.status), Ok(next));
                    current = next;
                } else {
                    prop_assert!(result.is_err());
                }
                let stored = ledger.find_by_id(row.id).await.unwrap().unwrap();
                prop_assert_eq!(stored.status, current);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
