//! End-to-end sync runs against filesystem repositories.

mod common;

use alyx_catalog::repos::WatermarkRepo;
use alyx_storage::StorageProbe;
use alyx_sync::{DestinationSelector, ScopeSelector, SyncError, SyncOrchestrator};
use common::TestEnv;
use std::collections::HashSet;
use time::{Duration, OffsetDateTime};

fn aws() -> DestinationSelector {
    DestinationSelector::Names(vec!["aws".to_string()])
}

#[tokio::test]
async fn copies_missing_dataset_to_cloud_and_records_canonical_path() {
    let env = TestEnv::new().await;
    let now = OffsetDateTime::now_utc();
    let session = env.session(1, now).await;
    let dataset = env
        .dataset(&session, "_ibl_trials.choice.npy", now - Duration::hours(1))
        .await;
    let path = env.write("flatiron", &session, &dataset, b"choices").await;
    env.record(&dataset, "flatiron", &path, true).await;

    let report = SyncOrchestrator::new(&env.ctx)
        .run(&ScopeSelector::Hours(24), &aws(), false)
        .await
        .unwrap();

    assert_eq!(report.sessions_succeeded, 1);
    assert!(report.failures.is_empty());
    assert_eq!(report.outcome.added, 1);
    assert_eq!(report.outcome.errors, 0);

    assert_eq!(env.store("aws").size(&path).await.unwrap(), 7);
    let records = env.records(dataset.id, "aws").await;
    assert_eq!(records.len(), 1);
    assert!(records[0].exists);
    assert_eq!(records[0].relative_path, path);

    let watermarks = env.ctx.catalog.list_watermarks("sync:aws").await.unwrap();
    assert_eq!(watermarks.len(), 1);
    assert!(report.watermark.is_some());
}

#[tokio::test]
async fn failed_session_is_isolated_from_the_batch() {
    let env = TestEnv::new().await;
    let now = OffsetDateTime::now_utc();

    let mut sessions = Vec::new();
    for number in 1..=5u16 {
        let modified = now - Duration::minutes(60 - i64::from(number));
        let session = env.session(number, modified).await;
        let dataset = env
            .dataset(&session, "_ibl_wheel.position.npy", modified)
            .await;
        let path = env
            .write("flatiron", &session, &dataset, format!("wheel {number}").as_bytes())
            .await;
        env.record(&dataset, "flatiron", &path, true).await;
        env.record(&dataset, "aws", &path, false).await;
        sessions.push((session, dataset));
    }
    env.transfer.fail_on(sessions[2].0.relative_dir());

    let report = SyncOrchestrator::new(&env.ctx)
        .run(&ScopeSelector::Hours(24), &aws(), false)
        .await
        .unwrap();

    assert_eq!(report.sessions_succeeded, 4);
    assert_eq!(report.sessions_failed(), 1);
    assert_eq!(report.failures[0].session_id, sessions[2].0.id);
    assert_eq!(report.failures[0].status, 23);

    for (index, (_, dataset)) in sessions.iter().enumerate() {
        let records = env.records(dataset.id, "aws").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].exists, index != 2, "session {}", index + 1);
    }
    // Per-session failures do not hold back the watermark, but the failed
    // session's datasets move past it so the next run retries them.
    let window = report.watermark.unwrap();
    assert!(env.reload(sessions[2].1.id).await.modified_at >= window.started_at);
    assert!(env.reload(sessions[0].1.id).await.modified_at < window.started_at);
}

#[tokio::test]
async fn failed_session_leaves_no_new_records() {
    let env = TestEnv::new().await;
    let now = OffsetDateTime::now_utc();

    let mut sessions = Vec::new();
    for number in 1..=5u16 {
        let modified = now - Duration::minutes(60 - i64::from(number));
        let session = env.session(number, modified).await;
        let dataset = env
            .dataset(&session, "_ibl_wheel.position.npy", modified)
            .await;
        let path = env
            .write("flatiron", &session, &dataset, format!("wheel {number}").as_bytes())
            .await;
        env.record(&dataset, "flatiron", &path, true).await;
        sessions.push((session, dataset));
    }
    env.transfer.fail_on(sessions[2].0.relative_dir());

    let report = SyncOrchestrator::new(&env.ctx)
        .run(&ScopeSelector::Hours(24), &aws(), false)
        .await
        .unwrap();

    assert_eq!(report.sessions_succeeded, 4);
    assert_eq!(report.failures[0].session_id, sessions[2].0.id);
    assert_eq!(report.outcome.added, 4);

    for (index, (_, dataset)) in sessions.iter().enumerate() {
        let records = env.records(dataset.id, "aws").await;
        if index == 2 {
            assert!(records.is_empty(), "failed session gained {records:?}");
        } else {
            assert_eq!(records.len(), 1, "session {}", index + 1);
            assert!(records[0].exists);
        }
    }
}

#[tokio::test]
async fn sessions_run_oldest_first_with_one_transfer_each() {
    let env = TestEnv::new().await;
    let now = OffsetDateTime::now_utc();

    let newer = env.session(2, now).await;
    let older = env.session(1, now).await;
    for (session, age) in [(&newer, 5), (&older, 30)] {
        for name in ["_ibl_trials.choice.npy", "_ibl_trials.feedbackType.npy"] {
            let dataset = env
                .dataset(session, name, now - Duration::minutes(age))
                .await;
            let path = env.write("flatiron", session, &dataset, name.as_bytes()).await;
            env.record(&dataset, "flatiron", &path, true).await;
        }
    }

    let destinations = DestinationSelector::Names(vec!["aws".to_string(), "tape".to_string()]);
    let report = SyncOrchestrator::new(&env.ctx)
        .run(&ScopeSelector::Hours(1), &destinations, false)
        .await
        .unwrap();
    assert_eq!(report.sessions_succeeded, 2);

    let calls = env.transfer.calls();
    assert_eq!(calls.len(), 4);
    let distinct: HashSet<_> = calls.iter().map(|c| (c.dir.clone(), c.dest.clone())).collect();
    assert_eq!(distinct.len(), calls.len());
    assert_eq!(calls[0].dir, older.relative_dir());
    assert_eq!(calls[3].dir, newer.relative_dir());
    assert!(calls.iter().all(|c| c.source == "flatiron"));
}

#[tokio::test]
async fn competing_sources_defer_to_the_highest_priority() {
    let env = TestEnv::new().await;
    let now = OffsetDateTime::now_utc();
    let session = env.session(1, now).await;

    let on_mirror = env.dataset(&session, "_ibl_trials.choice.npy", now).await;
    let path = env.write("flatiron", &session, &on_mirror, b"a").await;
    env.record(&on_mirror, "flatiron", &path, true).await;

    let on_tape = env.dataset(&session, "_ibl_trials.intervals.npy", now).await;
    let path = env.write("tape", &session, &on_tape, b"b").await;
    env.record(&on_tape, "tape", &path, true).await;

    let report = SyncOrchestrator::new(&env.ctx)
        .run(&ScopeSelector::Hours(1), &aws(), false)
        .await
        .unwrap();

    let calls = env.transfer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].source, "flatiron");
    assert_eq!(report.deferred, 1);
    assert!(env.records(on_mirror.id, "aws").await[0].exists);
    // Records for a deferred copy wait for the transfer that makes them true.
    assert!(env.records(on_tape.id, "aws").await.is_empty());
    let window = report.watermark.unwrap();
    assert!(env.reload(on_tape.id).await.modified_at >= window.started_at);
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    let env = TestEnv::new().await;
    let now = OffsetDateTime::now_utc();
    let session = env.session(1, now).await;
    let dataset = env.dataset(&session, "_ibl_trials.choice.npy", now).await;
    let path = env.write("flatiron", &session, &dataset, b"choices").await;

    let report = SyncOrchestrator::new(&env.ctx)
        .run(&ScopeSelector::Hours(24), &aws(), true)
        .await
        .unwrap();

    assert_eq!(report.outcome.added, 1);
    assert!(report.watermark.is_none());
    assert!(!env.store("aws").exists(&path).await.unwrap());
    assert!(env.records(dataset.id, "aws").await.is_empty());
    assert!(env.records(dataset.id, "flatiron").await.is_empty());
    assert!(env.ctx.catalog.list_watermarks("sync:aws").await.unwrap().is_empty());
    assert!(env.transfer.calls().iter().all(|c| c.dry_run));
}

#[tokio::test]
async fn consecutive_runs_append_non_overlapping_watermarks() {
    let env = TestEnv::new().await;
    let orchestrator = SyncOrchestrator::new(&env.ctx);

    orchestrator
        .run(&ScopeSelector::SinceWatermark, &aws(), false)
        .await
        .unwrap();
    orchestrator
        .run(&ScopeSelector::SinceWatermark, &aws(), false)
        .await
        .unwrap();

    let watermarks = env.ctx.catalog.list_watermarks("sync:aws").await.unwrap();
    assert_eq!(watermarks.len(), 2);
    for wm in &watermarks {
        assert!(wm.finished_at >= wm.started_at);
    }
    assert!(watermarks[1].started_at >= watermarks[0].finished_at);
}

#[tokio::test]
async fn unknown_destination_aborts_without_watermark() {
    let env = TestEnv::new().await;
    let selector = DestinationSelector::Names(vec!["nowhere".to_string()]);

    let result = SyncOrchestrator::new(&env.ctx)
        .run(&ScopeSelector::Hours(24), &selector, false)
        .await;

    assert!(matches!(result, Err(SyncError::Config(_))));
    assert!(env.ctx.catalog.list_watermarks("sync:nowhere").await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_records_are_flagged_and_left_alone() {
    let env = TestEnv::new().await;
    let now = OffsetDateTime::now_utc();
    let session = env.session(1, now).await;
    let dataset = env.dataset(&session, "_ibl_trials.choice.npy", now).await;
    let path = env.write("flatiron", &session, &dataset, b"choices").await;
    env.record(&dataset, "flatiron", &path, true).await;
    env.record(&dataset, "aws", &path, false).await;
    env.record(&dataset, "aws", "legacy/choice.npy", false).await;

    let report = SyncOrchestrator::new(&env.ctx)
        .run(&ScopeSelector::Hours(24), &aws(), false)
        .await
        .unwrap();

    assert_eq!(report.conflicts, 1);
    assert!(env.transfer.calls().is_empty());
    let records = env.records(dataset.id, "aws").await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.exists));
}
