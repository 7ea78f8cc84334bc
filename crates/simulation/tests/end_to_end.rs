//! Chain events through the subscriber into running sagas.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use veritask_ledger::{ContractAddresses, LedgerError};
use veritask_orchestrator::SagaOutcome;
use veritask_simulation::mocks::{ExecutionScript, MockLedgerClient};
use veritask_simulation::{SagaHarness, PROCESSOR_ADDRESS};
use veritask_subscriber::{ChainEventSubscriber, ContractRegistry, SubscriberConfig};
use veritask_types::{AccountId, JobStatus};

fn addresses() -> ContractAddresses {
    ContractAddresses {
        job_queue: AccountId::from([0x01; 32]),
        payment_escrow: AccountId::from([0x02; 32]),
        job_processor: AccountId::from(PROCESSOR_ADDRESS),
        mev_protection: None,
    }
}

async fn wait_for_terminal(harness: &SagaHarness, job_id: u64) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(status) = harness.gateway.status(job_id).await {
                if status.is_terminal() {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job reached a terminal status")
}

#[tokio::test]
async fn test_chain_events_drive_sagas_to_settlement() {
    let harness = SagaHarness::builder().build().unwrap();
    harness.gateway.submit_job(1001, Vec::new()).await;
    harness.gateway.submit_job(1002, Vec::new()).await;
    harness
        .executor
        .script(1002, ExecutionScript::Fail("model unavailable".to_string()))
        .await;

    let ledger = Arc::new(MockLedgerClient::new());
    let config = SubscriberConfig {
        event_buffer_size: 8,
        reconnect_interval_ms: 10,
    };
    let (intake_tx, intake_rx) = mpsc::channel(config.event_buffer_size);
    let (subscriber_shutdown_tx, subscriber_shutdown_rx) = mpsc::channel(1);
    let (_orchestrator_shutdown_tx, orchestrator_shutdown_rx) = mpsc::channel(1);

    let mut subscriber = ChainEventSubscriber::new(
        config,
        ContractRegistry::from_addresses(&addresses()),
        ledger.clone(),
        intake_tx,
    )
    .with_shutdown(subscriber_shutdown_rx);
    let subscriber_task = tokio::spawn(async move {
        let result = subscriber.run().await;
        (result, subscriber.stats())
    });

    let orchestrator = harness.orchestrator.clone();
    let orchestrator_task =
        tokio::spawn(async move { orchestrator.run(intake_rx, orchestrator_shutdown_rx).await });

    let processor = AccountId::from(PROCESSOR_ADDRESS);
    ledger.emit_job_submitted(processor.clone(), 1001, b"prompt".to_vec());
    ledger.emit(AccountId::from([0x99; 32]), vec![0, 1, 2]);
    ledger.emit(processor.clone(), vec![0xff]);
    ledger.emit_job_submitted(processor.clone(), 1002, b"prompt".to_vec());
    ledger.emit_job_submitted(processor, 1001, b"prompt".to_vec());

    assert_eq!(wait_for_terminal(&harness, 1001).await, JobStatus::Completed);
    assert_eq!(wait_for_terminal(&harness, 1002).await, JobStatus::Refunded);

    subscriber_shutdown_tx.send(()).await.unwrap();
    let (result, stats) = subscriber_task.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(stats.received, 5);
    assert_eq!(stats.dropped_unknown_contract, 1);
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.forwarded, 3);

    // Subscriber gone, so the intake closes and the orchestrator drains.
    tokio::time::timeout(Duration::from_secs(10), orchestrator_task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(harness.executor.executions(1001).await, 1);
    assert_eq!(harness.gateway.release_calls(1001).await, 1);
    assert_eq!(harness.gateway.refund_calls(1002).await, 1);
    assert_eq!(harness.orchestrator.metrics().outcome_count("discarded"), 1);
}

#[tokio::test]
async fn test_stream_error_resubscribes_without_losing_the_subscriber() {
    let harness = SagaHarness::builder().build().unwrap();
    let ledger = Arc::new(MockLedgerClient::new());
    let (intake_tx, mut intake_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let mut subscriber = ChainEventSubscriber::new(
        SubscriberConfig {
            event_buffer_size: 4,
            reconnect_interval_ms: 1,
        },
        ContractRegistry::from_addresses(&addresses()),
        ledger.clone(),
        intake_tx,
    )
    .with_shutdown(shutdown_rx);

    ledger.emit_job_submitted(AccountId::from(PROCESSOR_ADDRESS), 5, Vec::new());
    ledger.emit_error(LedgerError::Connection("socket closed".to_string()));
    let task = tokio::spawn(async move {
        let result = subscriber.run().await;
        (result, subscriber.stats())
    });

    let event = intake_rx.recv().await.unwrap();
    assert_eq!(event.job_id, 5);
    harness.gateway.submit_job(5, event.encrypted_payload.clone()).await;
    assert_eq!(
        harness.orchestrator.handle_submitted(event).await,
        SagaOutcome::Completed
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(()).await.unwrap();
    let (result, stats) = task.await.unwrap();
    assert!(result.is_ok());
    assert!(stats.subscriptions >= 2);
}

#[tokio::test]
async fn test_submission_finalized_while_disconnected_is_replayed() {
    let harness = SagaHarness::builder().build().unwrap();
    harness.gateway.submit_job(7, Vec::new()).await;
    harness.gateway.submit_job(8, Vec::new()).await;

    let ledger = Arc::new(MockLedgerClient::new());
    let (intake_tx, intake_rx) = mpsc::channel(8);
    let (subscriber_shutdown_tx, subscriber_shutdown_rx) = mpsc::channel(1);
    let (_orchestrator_shutdown_tx, orchestrator_shutdown_rx) = mpsc::channel(1);

    let mut subscriber = ChainEventSubscriber::new(
        SubscriberConfig {
            event_buffer_size: 8,
            reconnect_interval_ms: 50,
        },
        ContractRegistry::from_addresses(&addresses()),
        ledger.clone(),
        intake_tx,
    )
    .with_shutdown(subscriber_shutdown_rx);
    let subscriber_task = tokio::spawn(async move { subscriber.run().await });
    let orchestrator = harness.orchestrator.clone();
    let orchestrator_task =
        tokio::spawn(async move { orchestrator.run(intake_rx, orchestrator_shutdown_rx).await });

    let processor = AccountId::from(PROCESSOR_ADDRESS);
    ledger.emit_job_submitted(processor.clone(), 7, Vec::new());
    assert_eq!(wait_for_terminal(&harness, 7).await, JobStatus::Completed);

    // Job 8 lands while no subscription is open.
    ledger.emit_error(LedgerError::Connection("socket closed".to_string()));
    ledger.emit_job_submitted(processor, 8, Vec::new());

    assert_eq!(wait_for_terminal(&harness, 8).await, JobStatus::Completed);
    assert_eq!(ledger.resume_points(), vec![None, Some(1)]);

    subscriber_shutdown_tx.send(()).await.unwrap();
    assert!(subscriber_task.await.unwrap().is_ok());
    tokio::time::timeout(Duration::from_secs(10), orchestrator_task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(harness.executor.executions(7).await, 1);
    assert_eq!(harness.gateway.release_calls(7).await, 1);
    assert_eq!(harness.gateway.release_calls(8).await, 1);
}
