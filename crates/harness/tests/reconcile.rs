use ringsync_core::{FieldValue, Mutation, Table, field_value::row};
use ringsync_engine::{Filter, PassOutcome, RemoteError, SkipReason};
use ringsync_harness::{MemoryRemote, RemoteCall, TestDevice, catch_row, init_test_logging};
use ringsync_storage::LocalStore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn catch_upserts(remote: &MemoryRemote) -> Vec<Vec<ringsync_core::Row>> {
    remote
        .writes()
        .into_iter()
        .filter_map(|call| match call {
            RemoteCall::Upsert { table: Table::Catches, rows, .. } => Some(rows),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Draining
// ============================================================================

#[test]
fn offline_upsert_is_sent_when_connectivity_returns() -> TestResult {
    init_test_logging();
    let mut device = TestDevice::new(MemoryRemote::new())?;
    device.sign_in_offline("u1")?;

    let payload = row([("id", "c1"), ("vogelnaam", "Koolmees")]);
    device.ctx.enqueue_mutation(Mutation::Upsert {
        table: Table::Catches,
        row: payload.clone(),
    })?;
    assert_eq!(device.ctx.pending_count()?, 1);
    assert!(device.remote().writes().is_empty());

    let outcome = device.ctx.set_online(true)?;
    let report = outcome.as_ref().and_then(PassOutcome::report).ok_or("pass did not run")?;
    assert_eq!(report.applied, 1);

    let upserts = catch_upserts(device.remote());
    assert_eq!(upserts.len(), 1);
    let mut expected = payload;
    expected.insert("user_id".into(), "u1".into());
    assert_eq!(upserts[0], vec![expected]);

    assert_eq!(device.ctx.pending_count()?, 0);
    let status = device.ctx.sync_status();
    assert_eq!(status.pending_count, 0);
    assert!(status.last_synced.is_some());
    assert!(status.last_error.is_none());
    Ok(())
}

#[test]
fn clean_pass_empties_queue() -> TestResult {
    let mut device = TestDevice::new(MemoryRemote::new())?;
    device.sign_in_offline("u1")?;

    for i in 0..7 {
        device.upsert_catch(&format!("c{i}"), "Roodborst")?;
    }
    device.ctx.enqueue_mutation(Mutation::Delete {
        table: Table::Catches,
        id: "c3".into(),
    })?;
    device.ctx.enqueue_mutation(Mutation::ProfileUpdate {
        fields: row([("ringer_name", "J. Jansen")]),
    })?;
    assert_eq!(device.ctx.pending_count()?, 9);

    device.ctx.set_online(true)?;
    assert_eq!(device.ctx.pending_count()?, 0);
    assert_eq!(device.remote().rows(Table::Catches).len(), 6);
    Ok(())
}

#[test]
fn same_table_items_dispatch_in_enqueue_order() -> TestResult {
    let mut device = TestDevice::new(MemoryRemote::new())?;
    device.sign_in_offline("u1")?;
    device.upsert_catch("a", "Merel")?;
    device.upsert_catch("b", "Zanglijster")?;
    device.ctx.enqueue_mutation(Mutation::SoftDelete {
        table: Table::Catches,
        id: "a".into(),
        deleted_at: 5,
    })?;

    device.ctx.set_online(true)?;

    let writes = device.remote().writes();
    let order: Vec<&str> = writes
        .iter()
        .map(|call| match call {
            RemoteCall::Upsert { rows, .. } => rows[0]
                .get("id")
                .and_then(FieldValue::as_text)
                .unwrap_or("?"),
            RemoteCall::Update { .. } => "soft-delete",
            _ => "other",
        })
        .collect();
    assert_eq!(order, vec!["a", "b", "soft-delete"]);

    let deleted = device
        .remote()
        .find(Table::Catches, &Filter::new().eq("id", "a"));
    assert_eq!(deleted[0].get("deleted_at"), Some(&FieldValue::Timestamp(5)));
    Ok(())
}

#[test]
fn batch_upserts_are_chunked() -> TestResult {
    let config = ringsync_core::SyncConfig {
        batch_size: 2,
        ..Default::default()
    };
    let mut device = TestDevice::with_config(MemoryRemote::new(), config)?;
    device.sign_in_offline("u1")?;
    let rows = (0..5).map(|i| catch_row(&format!("c{i}"), "Vink", 1)).collect();
    device.ctx.enqueue_mutation(Mutation::BatchUpsert {
        table: Table::Catches,
        rows,
    })?;

    device.ctx.set_online(true)?;

    let sizes: Vec<usize> = catch_upserts(device.remote()).iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(device.remote().rows(Table::Catches).len(), 5);
    Ok(())
}

#[test]
fn writes_are_scoped_to_the_signed_in_owner() -> TestResult {
    let remote = MemoryRemote::new();
    remote.seed(
        Table::Catches,
        [
            row([("id", "shared"), ("user_id", "u1")]),
            row([("id", "shared"), ("user_id", "u2")]),
        ],
    );
    let mut device = TestDevice::new(remote)?;
    device.sign_in_offline("u1")?;
    device.ctx.enqueue_mutation(Mutation::Delete {
        table: Table::Catches,
        id: "shared".into(),
    })?;
    device.ctx.enqueue_mutation(Mutation::SpeciesOverrideUpsert {
        species_name: "Koolmees".into(),
        fields: row([("ring_size", "2.8")]),
    })?;

    device.ctx.set_online(true)?;

    let left = device.remote().rows(Table::Catches);
    assert_eq!(left, vec![row([("id", "shared"), ("user_id", "u2")])]);
    let overrides = device.remote().rows(Table::SpeciesOverrides);
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].get("user_id"), Some(&"u1".into()));
    assert_eq!(overrides[0].get("species_name"), Some(&"Koolmees".into()));
    Ok(())
}

#[test]
fn mark_uploaded_updates_listed_catches() -> TestResult {
    let mut device = TestDevice::new(MemoryRemote::new())?;
    device.sign_in_offline("u1")?;
    device.upsert_catch("c1", "Merel")?;
    device.upsert_catch("c2", "Merel")?;
    device.upsert_catch("c3", "Merel")?;
    device.ctx.enqueue_mutation(Mutation::MarkUploaded {
        ids: vec!["c1".into(), "c3".into()],
    })?;

    device.ctx.set_online(true)?;

    let uploaded = device
        .remote()
        .find(Table::Catches, &Filter::new().eq("uploaded", true));
    assert_eq!(uploaded.len(), 2);
    let local = device.ctx.storage();
    assert_eq!(local.get_cached(Table::Catches, "c1")?.map(|c| c.uploaded), Some(true));
    assert_eq!(local.get_cached(Table::Catches, "c2")?.map(|c| c.uploaded), Some(false));
    Ok(())
}

#[test]
fn delete_targets_the_owners_row_only() -> TestResult {
    let remote = MemoryRemote::new();
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_online("u1")?;
    device.upsert_catch("c1", "Merel")?;
    remote.clear_calls();

    device.ctx.enqueue_mutation(Mutation::Delete {
        table: Table::Catches,
        id: "c1".into(),
    })?;

    assert!(remote.rows(Table::Catches).is_empty());
    let writes = remote.writes();
    let [RemoteCall::Delete { table, filter }] = writes.as_slice() else {
        return Err(format!("unexpected writes: {writes:?}").into());
    };
    assert_eq!(*table, Table::Catches);
    assert_eq!(*filter, Filter::new().eq("id", "c1").eq("user_id", "u1"));
    Ok(())
}

#[test]
fn restore_clears_the_remote_tombstone() -> TestResult {
    let remote = MemoryRemote::new();
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_online("u1")?;
    device.upsert_catch("c1", "Merel")?;
    device.ctx.enqueue_mutation(Mutation::SoftDelete {
        table: Table::Catches,
        id: "c1".into(),
        deleted_at: 5,
    })?;
    let deleted = remote.rows(Table::Catches);
    assert_eq!(deleted[0].get("deleted_at"), Some(&FieldValue::Timestamp(5)));
    remote.clear_calls();

    device.ctx.enqueue_mutation(Mutation::Restore {
        table: Table::Catches,
        id: "c1".into(),
    })?;

    assert_eq!(device.ctx.pending_count()?, 0);
    let restored = remote.rows(Table::Catches);
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].get("deleted_at"), Some(&FieldValue::Null));
    assert_eq!(restored[0].get("species"), Some(&"Merel".into()));

    let writes = remote.writes();
    let [RemoteCall::Update { table, filter, changes }] = writes.as_slice() else {
        return Err(format!("unexpected writes: {writes:?}").into());
    };
    assert_eq!(*table, Table::Catches);
    assert_eq!(*filter, Filter::new().eq("id", "c1").eq("user_id", "u1"));
    assert_eq!(changes.get("deleted_at"), Some(&FieldValue::Null));
    assert_eq!(changes.len(), 1);

    let local = device.ctx.storage().get_cached(Table::Catches, "c1")?.ok_or("not cached")?;
    assert!(!local.is_deleted());
    Ok(())
}

#[test]
fn species_override_delete_leaves_other_users_alone() -> TestResult {
    let remote = MemoryRemote::new();
    remote.seed(
        Table::SpeciesOverrides,
        [
            row([("species_name", "Koolmees"), ("user_id", "u1"), ("ring_size", "2.8")]),
            row([("species_name", "Koolmees"), ("user_id", "u2"), ("ring_size", "3.0")]),
            row([("species_name", "Merel"), ("user_id", "u1"), ("ring_size", "3.5")]),
        ],
    );
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_online("u1")?;
    remote.clear_calls();

    device.ctx.enqueue_mutation(Mutation::SpeciesOverrideDelete {
        species_name: "Koolmees".into(),
    })?;

    assert_eq!(device.ctx.pending_count()?, 0);
    let left = remote.rows(Table::SpeciesOverrides);
    assert_eq!(
        left,
        vec![
            row([("species_name", "Koolmees"), ("user_id", "u2"), ("ring_size", "3.0")]),
            row([("species_name", "Merel"), ("user_id", "u1"), ("ring_size", "3.5")]),
        ]
    );

    let writes = remote.writes();
    let [RemoteCall::Delete { table, filter }] = writes.as_slice() else {
        return Err(format!("unexpected writes: {writes:?}").into());
    };
    assert_eq!(*table, Table::SpeciesOverrides);
    assert_eq!(*filter, Filter::new().eq("species_name", "Koolmees").eq("user_id", "u1"));
    Ok(())
}

// ============================================================================
// Failures and retries
// ============================================================================

#[test]
fn failing_item_does_not_block_later_items() -> TestResult {
    let remote = MemoryRemote::new();
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_offline("u1")?;
    device.ctx.enqueue_mutation(Mutation::Upsert {
        table: Table::Projects,
        row: row([("id", "p1"), ("name", "Vinkenbaan")]),
    })?;
    device.upsert_catch("c1", "Koolmees")?;

    remote.fail_table(Table::Projects, RemoteError::Server {
        status: 503,
        message: "unavailable".into(),
    });
    let outcome = device.ctx.set_online(true)?;
    let report = outcome.as_ref().and_then(PassOutcome::report).ok_or("no pass")?;
    assert_eq!((report.applied, report.failed, report.pending), (1, 1, 1));
    assert_eq!(remote.rows(Table::Catches).len(), 1);

    let status = device.ctx.sync_status();
    assert!(status.last_error.as_deref().is_some_and(|e| e.contains("partial sync")));
    assert!(status.last_synced.is_none());

    let queued = device.ctx.storage().list_queue()?;
    assert_eq!(queued[0].attempts, 1);
    assert!(queued[0].last_error.as_deref().is_some_and(|e| e.contains("503")));
    Ok(())
}

#[test]
fn item_is_parked_after_max_attempts() -> TestResult {
    let remote = MemoryRemote::new();
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_offline("u1")?;
    device.upsert_catch("c1", "Koolmees")?;
    remote.fail_table(Table::Catches, RemoteError::Network("timeout".into()));
    device.ctx.set_online(true)?;

    let mut last_attempts = 1;
    for _ in 0..4 {
        device.ctx.force_sync()?;
        let attempts = device.ctx.storage().list_queue()?[0].attempts;
        assert!(attempts >= last_attempts);
        last_attempts = attempts;
    }
    assert_eq!(last_attempts, 5);

    remote.clear_calls();
    let outcome = device.ctx.force_sync()?;
    let report = outcome.report().ok_or("no pass")?;
    assert_eq!((report.applied, report.failed, report.stuck), (0, 0, 1));
    assert!(catch_upserts(&remote).is_empty());
    assert_eq!(device.ctx.pending_count()?, 1);
    assert_eq!(device.ctx.storage().list_queue()?[0].attempts, 5);
    assert_eq!(device.ctx.stuck_items()?.len(), 1);
    Ok(())
}

#[test]
fn stuck_items_can_be_retried_or_discarded() -> TestResult {
    let remote = MemoryRemote::new();
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_offline("u1")?;
    device.upsert_catch("c1", "Koolmees")?;
    device.upsert_catch("c2", "Pimpelmees")?;
    remote.fail_table(Table::Catches, RemoteError::Rejected("row level security".into()));
    device.ctx.set_online(true)?;
    for _ in 0..4 {
        device.ctx.force_sync()?;
    }
    let stuck = device.ctx.stuck_items()?;
    assert_eq!(stuck.len(), 2);

    device.ctx.discard_queue_item(stuck[1].id)?;
    assert_eq!(device.ctx.pending_count()?, 1);
    assert!(device.ctx.discard_queue_item(stuck[1].id).is_err());

    remote.heal_table(Table::Catches);
    assert_eq!(device.ctx.retry_stuck_items()?, 1);
    device.ctx.force_sync()?;
    assert_eq!(device.ctx.pending_count()?, 0);
    assert_eq!(remote.rows(Table::Catches).len(), 1);
    Ok(())
}

#[test]
fn retried_upsert_after_lost_response_converges() -> TestResult {
    let remote = MemoryRemote::new();
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_offline("u1")?;
    device.upsert_catch("c1", "Koolmees")?;

    remote.lose_next_response(RemoteError::Network("connection reset".into()));
    device.ctx.set_online(true)?;
    assert_eq!(device.ctx.pending_count()?, 1);
    let after_first = remote.rows(Table::Catches);
    assert_eq!(after_first.len(), 1);

    device.ctx.force_sync()?;
    assert_eq!(device.ctx.pending_count()?, 0);
    assert_eq!(remote.rows(Table::Catches), after_first);
    assert_eq!(catch_upserts(&remote).len(), 2);
    Ok(())
}

// ============================================================================
// Guards
// ============================================================================

#[test]
fn pass_is_skipped_without_user_connectivity_or_work() -> TestResult {
    let mut device = TestDevice::new(MemoryRemote::new())?;
    assert_eq!(device.ctx.force_sync()?, PassOutcome::Skipped(SkipReason::NotAuthenticated));

    device.sign_in_offline("u1")?;
    device.upsert_catch("c1", "Koolmees")?;
    assert_eq!(device.ctx.force_sync()?, PassOutcome::Skipped(SkipReason::Offline));

    device.ctx.set_online(true)?;
    assert_eq!(device.ctx.force_sync()?, PassOutcome::Skipped(SkipReason::QueueEmpty));
    Ok(())
}

#[test]
fn only_one_pass_at_a_time() -> TestResult {
    let remote = MemoryRemote::new();
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_online("u1")?;
    assert!(device.ctx.state_mut().try_begin_pass());

    device.upsert_catch("c1", "Koolmees")?;
    assert_eq!(device.ctx.force_sync()?, PassOutcome::Skipped(SkipReason::AlreadySyncing));
    assert!(catch_upserts(&remote).is_empty());
    assert_eq!(device.ctx.sync_status().pending_count, 1);

    device.ctx.state_mut().end_pass();
    assert!(device.ctx.force_sync()?.report().is_some());
    assert_eq!(device.ctx.pending_count()?, 0);
    Ok(())
}

#[test]
fn enqueue_while_online_syncs_immediately() -> TestResult {
    let remote = MemoryRemote::new();
    let mut device = TestDevice::new(remote.clone())?;
    device.sign_in_online("u1")?;
    device.upsert_catch("c1", "Koolmees")?;
    assert_eq!(device.ctx.pending_count()?, 0);
    assert_eq!(remote.rows(Table::Catches).len(), 1);
    Ok(())
}
