//! Coordinator behaviour against a scripted scheduler.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;

use common::{claim, harness, harness_with, worker, FakeGateway, HEARTBEAT_TIMEOUT};
use farmlink_core::coordinator::{CoordinatorError, JobKind, ProvisioningJob};
use farmlink_core::error::CoreError;
use farmlink_core::gateway::GatewayError;
use farmlink_core::registry::RegisterOutcome;
use farmlink_core::worker_pool::CoordinatorAddress;

fn batch_job(id: &str) -> ProvisioningJob {
    ProvisioningJob {
        job_id: id.to_string(),
        kind: JobKind::Batch,
        requested_workers: 1,
        coordinator: CoordinatorAddress {
            host: "10.0.0.5".into(),
            port: 8188,
        },
        submitted_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_records_job_and_passes_request_through() {
    let h = harness();
    h.gateway.push_submit(Ok("abc123".to_string()));

    let job = h
        .coordinator
        .claim(farmlink_core::coordinator::ClaimRequest {
            count: 3,
            coordinator: "ws://10.0.0.5:8190".into(),
            priority: Some(80),
            pool: Some("gpu".into()),
            group: None,
        })
        .await
        .unwrap();

    assert_eq!(job.job_id, "abc123");
    assert_eq!(job.kind, JobKind::DistributedWorkers);
    let submitted = h.gateway.submitted();
    assert_eq!(submitted[0].count, 3);
    assert_eq!(submitted[0].priority, 80);
    assert_eq!(submitted[0].coordinator.port, 8190);
    assert_eq!(submitted[0].pool.as_deref(), Some("gpu"));

    let status = h.coordinator.status().await;
    assert_eq!(status.active_jobs, 1);
}

#[tokio::test]
async fn claim_defaults_priority() {
    let h = harness();
    h.coordinator.claim(claim(1)).await.unwrap();
    assert_eq!(h.gateway.submitted()[0].priority, 50);
}

#[tokio::test]
async fn id_extraction_failure_records_no_job() {
    let h = harness();
    h.gateway.push_submit(Err(GatewayError::IdExtraction {
        stdout: "Result=Success".into(),
        stderr: String::new(),
    }));

    let err = h.coordinator.claim(claim(2)).await.unwrap_err();

    assert_matches!(err, CoordinatorError::Gateway(GatewayError::IdExtraction { .. }));
    assert!(h.coordinator.active_jobs().await.is_empty());
}

#[tokio::test]
async fn submission_failure_is_returned_verbatim() {
    let h = harness();
    h.gateway.push_submit(Err(GatewayError::SubmissionFailed {
        exit_code: 1,
        stdout: String::new(),
        stderr: "Error: pool 'x' does not exist".into(),
    }));

    let err = h.coordinator.claim(claim(2)).await.unwrap_err();

    assert_matches!(
        err,
        CoordinatorError::Gateway(GatewayError::SubmissionFailed { ref stderr, .. })
            if stderr.contains("pool 'x'")
    );
    assert!(h.coordinator.active_jobs().await.is_empty());
}

#[tokio::test]
async fn unavailable_scheduler_fails_claim() {
    let h = harness_with(FakeGateway::unavailable());
    let err = h.coordinator.claim(claim(1)).await.unwrap_err();
    assert_matches!(err, CoordinatorError::Gateway(GatewayError::Unavailable(_)));
}

#[tokio::test]
async fn invalid_claims_never_reach_the_scheduler() {
    let h = harness();

    assert_matches!(
        h.coordinator.claim(claim(0)).await,
        Err(CoordinatorError::Core(CoreError::Validation(_)))
    );
    let mut bad_priority = claim(1);
    bad_priority.priority = Some(500);
    assert!(h.coordinator.claim(bad_priority).await.is_err());
    let mut bad_addr = claim(1);
    bad_addr.coordinator = "host:notaport".into();
    assert!(h.coordinator.claim(bad_addr).await.is_err());

    assert!(h.gateway.submitted().is_empty());
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_all_only_touches_provisioning_jobs() {
    let h = harness();
    let a = h.coordinator.claim(claim(1)).await.unwrap();
    let b = h.coordinator.claim(claim(1)).await.unwrap();
    h.coordinator.adopt_job(batch_job("batch-1")).await;

    let outcome = h.coordinator.release(None).await;

    assert_eq!(outcome.released.len(), 2);
    assert_eq!(outcome.requested, 2);
    let mut cancelled = h.gateway.cancelled();
    cancelled.sort();
    let mut expected = vec![a.job_id, b.job_id];
    expected.sort();
    assert_eq!(cancelled, expected);

    let remaining = h.coordinator.active_jobs().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job_id, "batch-1");
}

#[tokio::test]
async fn empty_list_means_release_all() {
    let h = harness();
    h.coordinator.claim(claim(1)).await.unwrap();

    let outcome = h.coordinator.release(Some(vec![])).await;

    assert_eq!(outcome.released.len(), 1);
}

#[tokio::test]
async fn release_unknown_id_releases_nothing() {
    let h = harness();
    h.coordinator.claim(claim(1)).await.unwrap();

    let outcome = h
        .coordinator
        .release(Some(vec!["ffffffffffffffffffffffff".into()]))
        .await;

    assert!(outcome.released.is_empty());
    assert_eq!(outcome.unknown, ["ffffffffffffffffffffffff"]);
    assert!(h.gateway.cancelled().is_empty());
    assert_eq!(h.coordinator.active_jobs().await.len(), 1);
}

#[tokio::test]
async fn adopted_job_is_releasable_by_id() {
    let h = harness();
    h.coordinator.adopt_job(batch_job("batch-1")).await;

    let outcome = h.coordinator.release(Some(vec!["batch-1".into()])).await;

    assert_eq!(outcome.released, ["batch-1"]);
}

#[tokio::test]
async fn partial_release_keeps_failed_jobs() {
    let h = harness();
    let ok = h.coordinator.claim(claim(1)).await.unwrap();
    let stuck = h.coordinator.claim(claim(1)).await.unwrap();
    h.gateway.fail_cancel_for(&stuck.job_id);

    let outcome = h.coordinator.release(None).await;

    assert_eq!(outcome.released, [ok.job_id]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, stuck.job_id);
    let remaining = h.coordinator.active_jobs().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job_id, stuck.job_id);
}

#[tokio::test]
async fn release_drops_workers_of_released_job() {
    let h = harness();
    let job = h.coordinator.claim(claim(2)).await.unwrap();
    h.coordinator
        .register_worker(worker("w1", 8289, Some(&job.job_id)))
        .await
        .unwrap();
    h.coordinator
        .register_worker(worker("w2", 8290, Some(&job.job_id)))
        .await
        .unwrap();
    h.coordinator
        .register_worker(worker("local", 8189, None))
        .await
        .unwrap();

    let outcome = h.coordinator.release(Some(vec![job.job_id.clone()])).await;

    assert_eq!(outcome.removed_workers, 2);
    let live = h.coordinator.registry().list_active().await;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, "local");
    assert_eq!(h.snapshot.workers().await.len(), 1);
}

// ---------------------------------------------------------------------------
// Worker callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_validates_input() {
    let h = harness();
    assert!(h.coordinator.register_worker(worker("", 8289, None)).await.is_err());
    assert!(h.coordinator.register_worker(worker("w1", 0, None)).await.is_err());
    assert_eq!(
        h.coordinator.register_worker(worker("w1", 8289, None)).await.unwrap(),
        RegisterOutcome::Created
    );
}

#[tokio::test]
async fn blank_job_id_is_treated_as_none() {
    let h = harness();
    h.coordinator
        .register_worker(worker("w1", 8289, Some("  ")))
        .await
        .unwrap();
    let record = h.coordinator.registry().get("w1").await.unwrap();
    assert_eq!(record.job_id, None);
}

#[tokio::test]
async fn unregister_unknown_worker_is_not_found() {
    let h = harness();
    assert_matches!(
        h.coordinator.unregister_worker("ghost").await,
        Err(CoreError::NotFound { .. })
    );
}

// ---------------------------------------------------------------------------
// Status / end-to-end scenario
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn claim_register_and_lose_a_worker() {
    let h = harness();
    h.gateway.push_submit(Ok("abc123".to_string()));
    h.coordinator.claim(claim(3)).await.unwrap();

    let status = h.coordinator.status().await;
    assert_eq!(status.active_jobs, 1);

    for (i, id) in ["w1", "w2", "w3"].iter().enumerate() {
        h.coordinator
            .register_worker(worker(id, 8289 + i as u16, Some("abc123")))
            .await
            .unwrap();
    }
    assert_eq!(h.coordinator.status().await.claimed_workers, 3);

    // w3 goes silent; the others keep reporting.
    tokio::time::advance(Duration::from_secs(40)).await;
    h.coordinator.heartbeat("w1").await.unwrap();
    h.coordinator.heartbeat("w2").await.unwrap();
    tokio::time::advance(HEARTBEAT_TIMEOUT - Duration::from_secs(20)).await;

    let status = h.coordinator.status().await;
    assert_eq!(status.claimed_workers, 2);
    assert!(status.workers.iter().all(|w| w.id != "w3"));
    assert_matches!(
        h.coordinator.heartbeat("w3").await,
        Err(CoreError::NotFound { .. })
    );
}

#[tokio::test]
async fn status_reports_counts_when_scheduler_is_down() {
    let h = harness_with(FakeGateway::unavailable());
    h.coordinator
        .register_worker(worker("w1", 8289, None))
        .await
        .unwrap();

    let status = h.coordinator.status().await;

    assert!(!status.available);
    assert!(status.error.is_some());
    assert_eq!(status.claimed_workers, 1);
    assert_eq!(status.total_workers, 0);
}

#[tokio::test]
async fn status_reports_farm_counts() {
    let h = harness();
    let status = h.coordinator.status().await;
    assert!(status.available);
    assert_eq!(status.total_workers, 10);
    assert_eq!(status.available_workers, 4);
    assert!(status.error.is_none());
}
