mod common;

use common::{distinct_bytes, pack_plain, MemoryRemoteStore};
use genepack::error::GeneError;
use genepack::progress::NoProgress;
use genepack::store::GeneStore;
use genepack::transfer::{
    AvailabilityPoller, GenePusher, PollerConfig, PushOptions, ReconcilerConfig, RemoteStore,
    TransferReconciler,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(5);
const TIMEOUT: Duration = Duration::from_secs(10);

struct Fixture {
    _tmp: TempDir,
    store: GeneStore,
    packed: genepack::PackedGene,
    remote: Arc<MemoryRemoteStore>,
}

async fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("store");
    let packed = pack_plain(&root, &distinct_bytes(600), 200);
    let remote = Arc::new(MemoryRemoteStore::new());
    remote
        .declare_manifest(&packed.id, &packed.manifest)
        .await
        .unwrap();
    Fixture {
        store: GeneStore::open(&root).unwrap(),
        _tmp: tmp,
        packed,
        remote,
    }
}

fn single_attempt(fx: &Fixture) -> TransferReconciler {
    TransferReconciler::new(
        fx.remote.clone(),
        fx.store.clone(),
        ReconcilerConfig {
            chunk_attempts: 1,
            ..ReconcilerConfig::default()
        },
    )
}

fn poller() -> AvailabilityPoller {
    AvailabilityPoller::new(PollerConfig {
        interval: INTERVAL,
        timeout: TIMEOUT,
    })
}

#[tokio::test(start_paused = true)]
async fn test_returns_immediately_when_available() {
    let fx = fixture().await;
    fx.remote.confirm(&fx.packed.id, &fx.packed.manifest.parts);

    let summary = poller()
        .wait(
            &single_attempt(&fx),
            &fx.packed.id,
            &fx.packed.manifest,
            Arc::new(NoProgress),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.rounds, 0);
    assert_eq!(fx.remote.availability_checks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_extends_while_progress_is_made() {
    let fx = fixture().await;
    let parts = fx.packed.manifest.parts.clone();
    // Each part gets through one round later than the previous one.
    fx.remote.fail_uploads(parts[0], 1, 403);
    fx.remote.fail_uploads(parts[1], 3, 403);
    fx.remote.fail_uploads(parts[2], 5, 403);

    let summary = poller()
        .wait(
            &single_attempt(&fx),
            &fx.packed.id,
            &fx.packed.manifest,
            Arc::new(NoProgress),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.rounds, 6);
    assert_eq!(summary.extensions, 3);
    assert!(summary.waited >= Duration::from_secs(30));
    assert!(summary.waited > TIMEOUT);
    assert!(summary.last_round.unwrap().is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_times_out_without_progress() {
    let fx = fixture().await;
    fx.remote.fail_uploads(fx.packed.manifest.parts[1], u32::MAX, 403);

    let err = poller()
        .wait(
            &single_attempt(&fx),
            &fx.packed.id,
            &fx.packed.manifest,
            Arc::new(NoProgress),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    // The round at 5s delivered two parts, so the window restarts there and
    // runs out one timeout later.
    match err {
        GeneError::Timeout { waited } => {
            let last_progress = INTERVAL;
            assert!(waited >= last_progress + TIMEOUT);
            assert!(waited <= last_progress + TIMEOUT + INTERVAL);
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert!(GeneError::Timeout {
        waited: Duration::ZERO
    }
    .is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_assembly_after_upload() {
    let fx = fixture().await;
    fx.remote.confirm(&fx.packed.id, &fx.packed.manifest.parts);
    fx.remote.delay_availability(2);

    let summary = poller()
        .wait(
            &single_attempt(&fx),
            &fx.packed.id,
            &fx.packed.manifest,
            Arc::new(NoProgress),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.rounds, 2);
    assert_eq!(summary.extensions, 0);
    assert_eq!(fx.remote.availability_checks(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_wait() {
    let fx = fixture().await;
    fx.remote.fail_uploads(fx.packed.manifest.parts[0], u32::MAX, 403);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let err = poller()
        .wait(
            &single_attempt(&fx),
            &fx.packed.id,
            &fx.packed.manifest,
            Arc::new(NoProgress),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GeneError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_push_waits_until_available() {
    let fx = fixture().await;
    fx.remote.fail_uploads(fx.packed.manifest.parts[2], 1, 403);

    let summary = GenePusher::new(
        fx.store.clone(),
        fx.remote.clone(),
        PushOptions {
            reconciler: ReconcilerConfig {
                chunk_attempts: 1,
                ..ReconcilerConfig::default()
            },
            poller: PollerConfig {
                interval: INTERVAL,
                timeout: TIMEOUT,
            },
            no_wait: false,
        },
    )
    .push(&fx.packed.id, Arc::new(NoProgress), &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(summary.first_round.failed.len(), 1);
    let poll = summary.poll.unwrap();
    assert_eq!(poll.rounds, 1);
    assert_eq!(
        fx.remote.confirmed(&fx.packed.id).len(),
        fx.packed.manifest.parts.len()
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_slides_instead_of_accumulating() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("store");
    let packed = pack_plain(&root, &distinct_bytes(800), 200);
    assert_eq!(packed.manifest.parts.len(), 4);
    let remote = Arc::new(MemoryRemoteStore::new());
    remote
        .declare_manifest(&packed.id, &packed.manifest)
        .await
        .unwrap();
    let parts = packed.manifest.parts.clone();
    // Rounds at 5s, 10s and 15s each deliver one part; the last never lands.
    remote.fail_uploads(parts[1], 1, 403);
    remote.fail_uploads(parts[2], 2, 403);
    remote.fail_uploads(parts[3], u32::MAX, 403);

    let timeout = Duration::from_secs(60);
    let reconciler = TransferReconciler::new(
        remote.clone(),
        GeneStore::open(&root).unwrap(),
        ReconcilerConfig {
            chunk_attempts: 1,
            ..ReconcilerConfig::default()
        },
    );
    let err = AvailabilityPoller::new(PollerConfig {
        interval: INTERVAL,
        timeout,
    })
    .wait(
        &reconciler,
        &packed.id,
        &packed.manifest,
        Arc::new(NoProgress),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    let last_progress = Duration::from_secs(15);
    match err {
        GeneError::Timeout { waited } => {
            assert!(waited >= last_progress + timeout, "waited {waited:?}");
            assert!(
                waited <= last_progress + timeout + INTERVAL,
                "idle for {:?} after the last delivered part",
                waited - last_progress
            );
        }
        other => panic!("expected Timeout, got {:?}", other),
    }
    assert_eq!(remote.confirmed(&packed.id).len(), 3);
}
