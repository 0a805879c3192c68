use std::{sync::Arc, time::Duration};

use certforge_batch::{
    stubs::{CertificateStoreStub, PlanLookupStub},
    types::{BatchItemStatus, BatchJob, BatchJobStatus, CreateBatchJobRequest},
    BatchService, BatchServiceConfig, BatchServiceResult,
};
use certforge_chain::{stub::ChainRelayerStub, ChainRelayerError};
use certforge_core::{BatchOptions, Recipient};

const BIZ: &str = "biz-1";

fn start_service(
    relayer: &ChainRelayerStub,
    store: &CertificateStoreStub,
) -> BatchServiceResult<BatchService> {
    let _ = env_logger::builder().is_test(true).try_init();
    BatchService::try_start(
        ":memory:",
        Arc::new(relayer.clone()),
        Arc::new(store.clone()),
        Arc::new(PlanLookupStub::default()),
        BatchServiceConfig::fast(),
    )
}

fn request(recipients: Vec<Recipient>) -> CreateBatchJobRequest {
    CreateBatchJobRequest {
        product_id: "prod-1".to_string(),
        recipients,
        batch_options: Some(BatchOptions {
            delay_between_certs_ms: 0,
            max_concurrent: 2,
            ..Default::default()
        }),
        plan_level: None,
        has_web3: true,
        should_auto_transfer: false,
        transfer_settings: None,
        job_metadata: None,
    }
}

async fn wait_terminal(service: &BatchService, batch_id: u64) -> BatchJob {
    for _ in 0..400 {
        let job = service
            .get_batch_progress(BIZ, batch_id)
            .await
            .expect("actor alive")
            .expect("progress query")
            .expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("batch {} never reached a terminal state", batch_id);
}

#[tokio::test]
pub async fn test_batch_flow_end_to_end() -> BatchServiceResult<()> {
    let relayer = ChainRelayerStub::default();
    let store = CertificateStoreStub::default();
    let service = start_service(&relayer, &store)?;

    // Create a batch over the service channel
    let job = service
        .create_batch_job(
            BIZ,
            request(vec![
                Recipient::email("a@example.com"),
                Recipient::email("b@example.com"),
                Recipient::sms("+14155550100"),
            ]),
        )
        .await
        .expect("actor alive")?;
    assert_eq!(job.items.len(), 3);

    let done = wait_terminal(&service, job.id).await;
    assert_eq!(done.status, BatchJobStatus::Completed);
    assert_eq!(done.succeeded_count(), 3);
    assert_eq!(store.certificate_count(), 3);

    // The finished job no longer counts as active
    let active = service
        .get_active_batch_jobs(BIZ)
        .await
        .expect("actor alive")?;
    assert!(active.is_empty());

    let stats = service
        .get_batch_statistics(BIZ)
        .await
        .expect("actor alive")?;
    assert_eq!(stats.total_jobs, 1);
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.items_succeeded, 3);
    assert!((stats.success_rate - 1.0).abs() < 1e-9);

    service.stop();
    Ok(())
}

#[tokio::test]
pub async fn test_batch_flow_retry_over_service() -> BatchServiceResult<()> {
    let relayer = ChainRelayerStub::default();
    let store = CertificateStoreStub::default();
    let service = start_service(&relayer, &store)?;

    relayer.fail_address(
        "b@example.com",
        ChainRelayerError::Unreachable("rpc down".to_string()),
    );
    let job = service
        .create_batch_job(
            BIZ,
            request(vec![
                Recipient::email("a@example.com"),
                Recipient::email("b@example.com"),
            ]),
        )
        .await
        .expect("actor alive")?;

    let done = wait_terminal(&service, job.id).await;
    assert_eq!(done.status, BatchJobStatus::PartiallyFailed);
    assert_eq!(done.failed_count(), 1);

    // Once the relayer recovers, a retry finishes the job
    relayer.clear_failures();
    let outcome = service
        .retry_failed_items(BIZ, job.id)
        .await
        .expect("actor alive")?;
    assert_eq!(outcome.retried, 1);
    assert_eq!(outcome.successful, 1);
    assert_eq!(outcome.failed, 0);

    let after = wait_terminal(&service, job.id).await;
    assert_eq!(after.status, BatchJobStatus::Completed);

    service.stop();
    Ok(())
}

#[tokio::test]
pub async fn test_batch_flow_cancel_over_service() -> BatchServiceResult<()> {
    let relayer = ChainRelayerStub::with_latency(Duration::from_millis(30));
    let store = CertificateStoreStub::default();
    let service = start_service(&relayer, &store)?;

    let recipients: Vec<Recipient> = (0..10)
        .map(|i| Recipient::email(format!("user{}@example.com", i)))
        .collect();
    let mut req = request(recipients);
    req.batch_options = Some(BatchOptions {
        delay_between_certs_ms: 20,
        max_concurrent: 1,
        ..Default::default()
    });
    let job = service
        .create_batch_job(BIZ, req)
        .await
        .expect("actor alive")?;

    let cancelled = service
        .cancel_batch_job(BIZ, job.id)
        .await
        .expect("actor alive")?;
    assert!(cancelled);

    let done = wait_terminal(&service, job.id).await;
    assert_eq!(done.status, BatchJobStatus::Cancelled);
    assert!(done
        .items
        .iter()
        .all(|i| i.status != BatchItemStatus::InProgress));

    service.stop();
    Ok(())
}
