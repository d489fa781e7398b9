mod common;

use alyx_storage::transfer::PARTIAL_TRANSFER_STATUS;
use alyx_storage::{
    BulkTransfer, NativeTransfer, ObjectStore, StorageError, TransferEndpoint, TransferRequest,
};
use bytes::Bytes;
use common::fixtures::SESSION_DIR;
use common::{FailingPutStore, TwoRepos, seeded_bytes};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn session_request(repos: &TwoRepos, dry_run: bool) -> TransferRequest {
    TransferRequest {
        source: TransferEndpoint::new("flatiron", repos.source_root(), SESSION_DIR),
        dest: TransferEndpoint::new("aws", repos.dest_root(), SESSION_DIR),
        delete_extraneous: true,
        dry_run,
        quiet: false,
    }
}

async fn seed_session(store: &Arc<dyn ObjectStore>) {
    for (i, name) in ["alf/spikes.times.npy", "alf/spikes.clusters.npy", "_ibl_trials.table.pqt"]
        .iter()
        .enumerate()
    {
        store
            .put(&format!("{SESSION_DIR}/{name}"), seeded_bytes(i as u64, 100 + i))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_native_transfer_mirrors_session_directory() {
    let repos = TwoRepos::new().await;
    seed_session(&repos.source).await;
    // Extraneous file on the destination, and a file from another session.
    repos
        .dest
        .put(&format!("{SESSION_DIR}/stale.npy"), Bytes::from("old"))
        .await
        .unwrap();
    repos
        .dest
        .put("cortexlab/Subjects/KS023/2019-12-10/002/keep.npy", Bytes::from("x"))
        .await
        .unwrap();

    let transfer = NativeTransfer::new(repos.stores());
    let output = transfer
        .transfer(&session_request(&repos, false))
        .await
        .unwrap();

    assert!(output.success(), "log: {}", output.log);
    assert_eq!(
        repos.dest.list(SESSION_DIR).await.unwrap(),
        repos.source.list(SESSION_DIR).await.unwrap()
    );
    assert!(
        repos
            .dest
            .exists("cortexlab/Subjects/KS023/2019-12-10/002/keep.npy")
            .await
            .unwrap()
    );
    assert!(output.log.contains("deleting stale.npy"));
}

#[tokio::test]
async fn test_native_transfer_dry_run_mutates_nothing() {
    let repos = TwoRepos::new().await;
    seed_session(&repos.source).await;
    repos
        .dest
        .put(&format!("{SESSION_DIR}/stale.npy"), Bytes::from("old"))
        .await
        .unwrap();

    let transfer = NativeTransfer::new(repos.stores());
    let output = transfer
        .transfer(&session_request(&repos, true))
        .await
        .unwrap();

    assert!(output.success());
    assert!(output.log.contains("alf/spikes.times.npy"));
    assert_eq!(
        repos.dest.list(SESSION_DIR).await.unwrap(),
        vec![format!("{SESSION_DIR}/stale.npy")]
    );
}

#[tokio::test]
async fn test_native_transfer_is_idempotent() {
    let repos = TwoRepos::new().await;
    seed_session(&repos.source).await;
    let transfer = NativeTransfer::new(repos.stores());

    transfer
        .transfer(&session_request(&repos, false))
        .await
        .unwrap();
    let second = transfer
        .transfer(&session_request(&repos, false))
        .await
        .unwrap();

    assert!(second.success());
    assert!(second.log.is_empty(), "unexpected work: {}", second.log);
}

#[tokio::test]
async fn test_native_transfer_refuses_empty_source() {
    let repos = TwoRepos::new().await;
    repos
        .dest
        .put(&format!("{SESSION_DIR}/only-copy.npy"), Bytes::from("data"))
        .await
        .unwrap();

    let transfer = NativeTransfer::new(repos.stores());
    let output = transfer
        .transfer(&session_request(&repos, false))
        .await
        .unwrap();

    assert_eq!(output.exit_status, PARTIAL_TRANSFER_STATUS);
    assert!(
        repos
            .dest
            .exists(&format!("{SESSION_DIR}/only-copy.npy"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_native_transfer_reports_partial_failure() {
    let repos = TwoRepos::new().await;
    seed_session(&repos.source).await;
    let failing = FailingPutStore::new(repos.dest.clone(), "clusters");
    let stores: HashMap<String, Arc<dyn ObjectStore>> = HashMap::from([
        ("flatiron".to_string(), repos.source.clone()),
        ("aws".to_string(), failing.clone() as Arc<dyn ObjectStore>),
    ]);

    let output = NativeTransfer::new(stores)
        .transfer(&session_request(&repos, false))
        .await
        .unwrap();

    assert_eq!(output.exit_status, PARTIAL_TRANSFER_STATUS);
    assert!(output.log.contains("error: alf/spikes.clusters.npy"));
    assert_eq!(failing.puts.load(Ordering::SeqCst), 3);
    assert_eq!(repos.dest.list(SESSION_DIR).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_native_transfer_unknown_repository_is_config_error() {
    let repos = TwoRepos::new().await;
    let mut request = session_request(&repos, false);
    request.dest.repository = "tape".to_string();

    let result = NativeTransfer::new(repos.stores()).transfer(&request).await;
    assert!(matches!(result, Err(StorageError::Config(_))));
}
