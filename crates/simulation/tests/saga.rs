//! Saga scenarios against the in-memory ledger.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use veritask_attestation::AttestationProducer;
use veritask_ledger::{SettlementAction, SettlementError, SettlementGateway};
use veritask_orchestrator::{JobStatusService, OrchestratorConfig, SagaOutcome};
use veritask_simulation::mocks::{
    worker_key_holder, ExecutionScript, MismatchedKeyHolder, ScriptedExecutor, UnavailableKeyHolder,
};
use veritask_simulation::{fast_config, SagaHarness};
use veritask_types::{EscrowStatus, JobStatus, JobSubmitted};

use JobStatus::{Completed, Failed, InProgress, Refunded, Submitted};

#[tokio::test]
async fn test_scenario_successful_job_is_paid_once() {
    let harness = SagaHarness::builder().build().unwrap();

    let outcome = harness.submit_and_run(1001).await;

    assert_eq!(outcome, SagaOutcome::Completed);
    assert_eq!(
        harness.gateway.status_history(1001).await,
        vec![Submitted, InProgress, Completed]
    );
    assert_eq!(harness.gateway.release_calls(1001).await, 1);
    assert_eq!(harness.gateway.refund_calls(1001).await, 0);
    assert_eq!(harness.gateway.escrow(1001).await, Some(EscrowStatus::Released));

    let attestation = harness.gateway.attestation(1001).await.unwrap();
    assert!(AttestationProducer::verify(&attestation));
    assert_eq!(attestation.result_hash, ScriptedExecutor::default_hash(1001));
}

#[tokio::test]
async fn test_scenario_execution_failure_is_refunded() {
    let harness = SagaHarness::builder().build().unwrap();
    harness
        .executor
        .script(1002, ExecutionScript::Fail("model unavailable".to_string()))
        .await;

    let outcome = harness.submit_and_run(1002).await;

    assert_eq!(outcome, SagaOutcome::Refunded);
    assert_eq!(
        harness.gateway.status_history(1002).await,
        vec![Submitted, InProgress, Failed, Refunded]
    );
    assert_eq!(harness.gateway.refund_calls(1002).await, 1);
    assert_eq!(harness.gateway.release_calls(1002).await, 0);
    assert!(harness.gateway.attestation(1002).await.is_none());
}

#[tokio::test]
async fn test_scenario_unverifiable_attestation_is_discarded() {
    let harness = SagaHarness::builder()
        .keys(Arc::new(MismatchedKeyHolder::new()))
        .build()
        .unwrap();

    let outcome = harness.submit_and_run(1003).await;

    assert_eq!(outcome, SagaOutcome::Refunded);
    assert_eq!(harness.gateway.release_calls(1003).await, 0);
    assert_eq!(harness.gateway.refund_calls(1003).await, 1);
    assert!(harness.gateway.attestation(1003).await.is_none());
    assert_eq!(harness.gateway.escrow(1003).await, Some(EscrowStatus::Refunded));
}

#[tokio::test]
async fn test_unavailable_signing_key_compensates() {
    let harness = SagaHarness::builder()
        .keys(Arc::new(UnavailableKeyHolder))
        .build()
        .unwrap();

    assert_eq!(harness.submit_and_run(7).await, SagaOutcome::Refunded);
    assert!(harness.gateway.attestation(7).await.is_none());
}

#[tokio::test]
async fn test_executor_fault_compensates() {
    let harness = SagaHarness::builder().build().unwrap();
    harness
        .executor
        .script(8, ExecutionScript::Fault("out of memory".to_string()))
        .await;

    assert_eq!(harness.submit_and_run(8).await, SagaOutcome::Refunded);
    assert_eq!(harness.gateway.status(8).await, Some(Refunded));
}

#[tokio::test]
async fn test_sequential_redelivery_runs_one_saga() {
    let harness = SagaHarness::builder().build().unwrap();

    assert_eq!(harness.submit_and_run(42).await, SagaOutcome::Completed);
    let second = harness
        .orchestrator
        .handle_submitted(SagaHarness::submitted(42, Vec::new()))
        .await;

    assert!(matches!(second, SagaOutcome::Discarded { .. }));
    assert_eq!(harness.executor.executions(42).await, 1);
    assert_eq!(harness.gateway.release_calls(42).await, 1);
    assert_eq!(
        harness.gateway.status_history(42).await,
        vec![Submitted, InProgress, Completed]
    );
}

#[tokio::test]
async fn test_concurrent_redelivery_is_discarded_while_claimed() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = SagaHarness::builder()
        .executor(ScriptedExecutor::new().with_gate(Arc::clone(&gate)))
        .build()
        .unwrap();
    harness.gateway.submit_job(42, Vec::new()).await;

    let first = harness
        .orchestrator
        .dispatch(SagaHarness::submitted(42, Vec::new()))
        .await
        .expect("first delivery dispatched");
    while harness.executor.executions(42).await == 0 {
        tokio::task::yield_now().await;
    }

    let second = harness
        .orchestrator
        .dispatch(SagaHarness::submitted(42, Vec::new()))
        .await;
    assert!(second.is_none());
    assert!(harness.orchestrator.claims().is_claimed(42));

    gate.add_permits(1);
    assert_eq!(first.await.unwrap(), SagaOutcome::Completed);

    assert!(!harness.orchestrator.claims().is_claimed(42));
    assert_eq!(harness.executor.executions(42).await, 1);
    assert_eq!(harness.gateway.release_calls(42).await, 1);
    assert_eq!(harness.orchestrator.metrics().outcome_count("discarded"), 1);
    assert_eq!(
        harness
            .orchestrator
            .metrics()
            .redeliveries_discarded_total
            .get(),
        1
    );
}

#[tokio::test]
async fn test_transient_release_failures_are_retried() {
    let harness = SagaHarness::builder().build().unwrap();
    harness
        .gateway
        .fail_transiently(SettlementAction::ReleasePayment, 2)
        .await;

    assert_eq!(harness.submit_and_run(50).await, SagaOutcome::Completed);
    assert_eq!(harness.gateway.release_calls(50).await, 3);
    assert_eq!(harness.gateway.refund_calls(50).await, 0);
    assert_eq!(harness.gateway.escrow(50).await, Some(EscrowStatus::Released));
}

/// Harness whose run loop sweeps every 20ms.
fn sweeping_harness(executor: ScriptedExecutor) -> SagaHarness {
    SagaHarness::builder()
        .config(OrchestratorConfig {
            sweep_interval_ms: 20,
            ..fast_config()
        })
        .executor(executor)
        .build()
        .unwrap()
}

/// Start the run loop on fresh intake and shutdown channels.
fn spawn_run_loop(
    harness: &SagaHarness,
) -> (mpsc::Sender<JobSubmitted>, mpsc::Sender<()>, JoinHandle<()>) {
    let (intake_tx, intake_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let orchestrator = harness.orchestrator.clone();
    let runner = tokio::spawn(async move { orchestrator.run(intake_rx, shutdown_rx).await });
    (intake_tx, shutdown_tx, runner)
}

async fn wait_for_status(harness: &SagaHarness, job_id: u64, expected: JobStatus) {
    let reached = tokio::time::timeout(Duration::from_secs(10), async {
        while harness.gateway.status(job_id).await != Some(expected) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "job {} stuck at {:?}, expected {:?}",
        job_id,
        harness.gateway.status(job_id).await,
        expected
    );
}

async fn stop_run_loop(shutdown_tx: mpsc::Sender<()>, runner: JoinHandle<()>) {
    shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_run_loop_sweep_completes_deferred_submitted_job() {
    let harness = sweeping_harness(ScriptedExecutor::new());
    harness
        .gateway
        .fail_transiently(SettlementAction::UpdateStatus, 1)
        .await;
    harness.gateway.submit_job(78, Vec::new()).await;

    let (intake_tx, shutdown_tx, runner) = spawn_run_loop(&harness);
    intake_tx
        .send(SagaHarness::submitted(78, Vec::new()))
        .await
        .unwrap();

    wait_for_status(&harness, 78, Completed).await;
    stop_run_loop(shutdown_tx, runner).await;

    assert_eq!(harness.gateway.release_calls(78).await, 1);
    assert_eq!(harness.gateway.escrow(78).await, Some(EscrowStatus::Released));
    assert_eq!(harness.executor.executions(78).await, 1);
    assert!(!harness.orchestrator.claims().is_claimed(78));
}

#[tokio::test]
async fn test_run_loop_sweep_refunds_job_deferred_mid_compensation() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = sweeping_harness(ScriptedExecutor::new().with_gate(Arc::clone(&gate)));
    harness
        .executor
        .script(79, ExecutionScript::Fail("model unavailable".to_string()))
        .await;
    harness.gateway.submit_job(79, Vec::new()).await;

    let (intake_tx, shutdown_tx, runner) = spawn_run_loop(&harness);
    intake_tx
        .send(SagaHarness::submitted(79, Vec::new()))
        .await
        .unwrap();
    while harness.executor.executions(79).await == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(harness.gateway.status(79).await, Some(InProgress));

    // The InProgress -> Failed write fails once, leaving escrow locked.
    harness
        .gateway
        .fail_transiently(SettlementAction::UpdateStatus, 1)
        .await;
    gate.add_permits(10);

    wait_for_status(&harness, 79, Refunded).await;
    stop_run_loop(shutdown_tx, runner).await;

    assert_eq!(harness.gateway.escrow(79).await, Some(EscrowStatus::Refunded));
    assert_eq!(harness.gateway.refund_calls(79).await, 1);
    assert_eq!(harness.gateway.release_calls(79).await, 0);
    assert_eq!(harness.executor.executions(79).await, 2);
    assert!(harness.orchestrator.metrics().outcome_count("deferred") >= 1);
}

#[tokio::test]
async fn test_run_loop_sweep_retries_failed_refund_once_cleared() {
    let harness = sweeping_harness(ScriptedExecutor::new());
    harness
        .executor
        .script(62, ExecutionScript::Fail("model unavailable".to_string()))
        .await;
    harness
        .gateway
        .fail_permanently(SettlementAction::RefundPayment, "escrow paused")
        .await;
    harness.gateway.submit_job(62, Vec::new()).await;

    let (intake_tx, shutdown_tx, runner) = spawn_run_loop(&harness);
    intake_tx
        .send(SagaHarness::submitted(62, Vec::new()))
        .await
        .unwrap();
    wait_for_status(&harness, 62, Failed).await;
    while harness.orchestrator.metrics().manual_interventions_total.get() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    harness
        .gateway
        .clear_faults(SettlementAction::RefundPayment)
        .await;

    wait_for_status(&harness, 62, Refunded).await;
    stop_run_loop(shutdown_tx, runner).await;

    assert_eq!(harness.gateway.escrow(62).await, Some(EscrowStatus::Refunded));
    assert_eq!(harness.executor.executions(62).await, 1);
}

#[tokio::test]
async fn test_run_loop_without_sweep_leaves_deferred_job() {
    let harness = SagaHarness::builder().build().unwrap();
    harness
        .gateway
        .fail_transiently(SettlementAction::UpdateStatus, 1)
        .await;
    harness.gateway.submit_job(51, Vec::new()).await;

    let (intake_tx, shutdown_tx, runner) = spawn_run_loop(&harness);
    intake_tx
        .send(SagaHarness::submitted(51, Vec::new()))
        .await
        .unwrap();
    while harness.orchestrator.metrics().outcome_count("deferred") == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_run_loop(shutdown_tx, runner).await;

    assert_eq!(harness.gateway.status(51).await, Some(Submitted));
    assert_eq!(harness.gateway.release_calls(51).await, 0);
}

#[tokio::test]
async fn test_panicking_saga_releases_claim_and_gauge() {
    let harness = SagaHarness::builder().build().unwrap();
    harness
        .executor
        .script(95, ExecutionScript::Panic("backend crashed".to_string()))
        .await;
    harness.gateway.submit_job(95, Vec::new()).await;

    let handle = harness
        .orchestrator
        .dispatch(SagaHarness::submitted(95, Vec::new()))
        .await
        .expect("delivery dispatched");
    let err = handle.await.unwrap_err();

    assert!(err.is_panic());
    assert_eq!(harness.orchestrator.metrics().active_sagas.get(), 0);
    assert!(!harness.orchestrator.claims().is_claimed(95));
    assert_eq!(harness.gateway.status(95).await, Some(InProgress));
}

#[tokio::test]
async fn test_refund_failure_needs_intervention_and_leaves_job_failed() {
    let harness = SagaHarness::builder().build().unwrap();
    harness
        .executor
        .script(60, ExecutionScript::Fail("model unavailable".to_string()))
        .await;
    harness
        .gateway
        .fail_permanently(SettlementAction::RefundPayment, "escrow paused")
        .await;

    let outcome = harness.submit_and_run(60).await;

    assert!(matches!(outcome, SagaOutcome::NeedsIntervention { .. }));
    assert_eq!(harness.gateway.status(60).await, Some(Failed));
    assert_eq!(harness.gateway.refund_calls(60).await, 1);
    assert_eq!(
        harness.orchestrator.metrics().manual_interventions_total.get(),
        1
    );

    harness
        .gateway
        .clear_faults(SettlementAction::RefundPayment)
        .await;
    let report = harness.orchestrator.recover().await.unwrap();
    assert_eq!(report.outcomes.get(&60), Some(&SagaOutcome::Refunded));
    assert_eq!(harness.gateway.refund_calls(60).await, 2);
    assert_eq!(harness.gateway.escrow(60).await, Some(EscrowStatus::Refunded));
}

#[tokio::test]
async fn test_transient_refund_failures_are_retried() {
    let harness = SagaHarness::builder().build().unwrap();
    harness
        .executor
        .script(61, ExecutionScript::Fail("model unavailable".to_string()))
        .await;
    harness
        .gateway
        .fail_transiently(SettlementAction::RefundPayment, 2)
        .await;

    assert_eq!(harness.submit_and_run(61).await, SagaOutcome::Refunded);
    assert_eq!(harness.gateway.refund_calls(61).await, 3);
}

#[tokio::test]
async fn test_rejected_release_compensates_and_hides_attestation() {
    let harness = SagaHarness::builder().build().unwrap();
    harness
        .gateway
        .fail_permanently(SettlementAction::ReleasePayment, "provider not registered")
        .await;

    let outcome = harness.submit_and_run(70).await;

    assert_eq!(outcome, SagaOutcome::Refunded);
    assert_eq!(harness.gateway.release_calls(70).await, 1);
    assert_eq!(harness.gateway.escrow(70).await, Some(EscrowStatus::Refunded));

    let status = JobStatusService::new(harness.gateway.clone())
        .get_job_status(70)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.status, Refunded);
    assert!(status.result_hash.is_none());
    assert!(status.attestation.is_none());
}

#[tokio::test]
async fn test_terminal_jobs_never_transition_again() {
    let harness = SagaHarness::builder().build().unwrap();
    assert_eq!(harness.submit_and_run(80).await, SagaOutcome::Completed);
    harness
        .executor
        .script(81, ExecutionScript::Fail("model unavailable".to_string()))
        .await;
    assert_eq!(harness.submit_and_run(81).await, SagaOutcome::Refunded);

    for job_id in [80, 81] {
        let outcome = harness
            .orchestrator
            .handle_submitted(SagaHarness::submitted(job_id, Vec::new()))
            .await;
        assert!(matches!(outcome, SagaOutcome::Discarded { .. }));

        let err = harness
            .gateway
            .update_job_status(job_id, Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidTransition { .. }));
    }

    assert_eq!(harness.gateway.status_history(80).await.last(), Some(&Completed));
    assert_eq!(harness.gateway.status_history(81).await.last(), Some(&Refunded));
}

#[tokio::test]
async fn test_recovery_sweep_resumes_each_checkpoint() {
    let harness = SagaHarness::builder().build().unwrap();
    let gateway = &harness.gateway;
    gateway.insert_job(10, Submitted, Vec::new(), Some(EscrowStatus::Locked)).await;
    gateway.insert_job(11, InProgress, Vec::new(), Some(EscrowStatus::Locked)).await;
    gateway.insert_job(12, InProgress, Vec::new(), Some(EscrowStatus::Locked)).await;
    gateway.insert_job(13, Failed, Vec::new(), Some(EscrowStatus::Locked)).await;
    gateway.insert_job(14, Completed, Vec::new(), Some(EscrowStatus::Released)).await;

    let producer = AttestationProducer::new(Arc::new(worker_key_holder()));
    let attestation = producer
        .sign(12, &ScriptedExecutor::default_hash(12), 1500)
        .unwrap();
    gateway.insert_attestation(attestation).await;

    let report = harness.orchestrator.recover().await.unwrap();

    assert_eq!(report.examined, 4);
    assert!(report.skipped.is_empty());
    assert_eq!(report.outcomes.get(&10), Some(&SagaOutcome::Completed));
    assert_eq!(report.outcomes.get(&11), Some(&SagaOutcome::Completed));
    assert_eq!(report.outcomes.get(&12), Some(&SagaOutcome::Completed));
    assert_eq!(report.outcomes.get(&13), Some(&SagaOutcome::Refunded));
    assert!(!report.outcomes.contains_key(&14));
    assert_eq!(report.count("completed"), 3);

    assert_eq!(harness.executor.executions(11).await, 1);
    assert_eq!(harness.executor.executions(12).await, 0);
    assert_eq!(gateway.refund_calls(13).await, 1);
    assert_eq!(gateway.release_calls(14).await, 0);
}

#[tokio::test]
async fn test_run_loop_processes_burst_and_drains() {
    let harness = SagaHarness::builder()
        .gateway(
            veritask_simulation::mocks::MockSettlementGateway::new()
                .with_latency(Duration::from_millis(1)),
        )
        .build()
        .unwrap();
    for job_id in 100..110 {
        harness.gateway.submit_job(job_id, Vec::new()).await;
    }

    let (intake_tx, intake_rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let orchestrator = harness.orchestrator.clone();
    let runner = tokio::spawn(async move { orchestrator.run(intake_rx, shutdown_rx).await });

    for job_id in 100..110 {
        intake_tx
            .send(SagaHarness::submitted(job_id, Vec::new()))
            .await
            .unwrap();
    }
    drop(intake_tx);
    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .unwrap()
        .unwrap();

    for job_id in 100..110 {
        assert_eq!(harness.gateway.status(job_id).await, Some(Completed));
        assert_eq!(harness.gateway.release_calls(job_id).await, 1);
    }
    assert_eq!(harness.orchestrator.metrics().outcome_count("completed"), 10);
    assert_eq!(harness.orchestrator.metrics().active_sagas.get(), 0);
}

#[tokio::test]
async fn test_status_surface_reports_completed_attestation() {
    let harness = SagaHarness::builder().build().unwrap();
    assert_eq!(harness.submit_and_run(90).await, SagaOutcome::Completed);
    harness.gateway.submit_job(91, Vec::new()).await;

    let service = JobStatusService::new(harness.gateway.clone());
    let view = service.get_job_status(90).await.unwrap().unwrap();
    assert_eq!(view.status, Completed);
    assert_eq!(view.result_hash, Some(ScriptedExecutor::default_hash(90)));
    let record = view.attestation.clone().unwrap();
    assert_eq!(record.job_id, 90);

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["status"], "Completed");
    assert!(json["attestation"]["workerPubkey"].is_string());

    assert!(service.get_job_status(999).await.unwrap().is_none());

    let submitted = service
        .list_jobs(&veritask_types::JobFilter::with_status(Submitted))
        .await
        .unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].job_id, 91);
}
