use std::{path::Path, sync::Arc};

use log::*;
use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};
use tokio_util::sync::CancellationToken;

use certforge_chain::ChainRelayer;
use certforge_core::{CertificateStore, SubscriptionPlanLookup};

use crate::{
    config::BatchServiceConfig,
    error::BatchServiceResult,
    persist::BatchDb,
    processor::BatchProcessor,
    types::{
        BatchJob, BatchStatistics, CreateBatchJobRequest, RetryOutcome,
    },
};

#[derive(Debug)]
pub enum BatchMessage {
    CreateBatchJob {
        /// Called once the job is persisted and dispatch has started
        respond_to: oneshot::Sender<BatchServiceResult<BatchJob>>,
        business_id: String,
        request: CreateBatchJobRequest,
    },
    GetBatchProgress {
        respond_to: oneshot::Sender<BatchServiceResult<Option<BatchJob>>>,
        business_id: String,
        batch_id: u64,
    },
    CancelBatchJob {
        /// Called once cancellation has been requested; the job reaches
        /// its terminal state asynchronously
        respond_to: oneshot::Sender<BatchServiceResult<bool>>,
        business_id: String,
        batch_id: u64,
    },
    RetryFailedItems {
        /// Called once the retry pass has run to completion
        respond_to: oneshot::Sender<BatchServiceResult<RetryOutcome>>,
        business_id: String,
        batch_id: u64,
    },
    GetActiveBatchJobs {
        respond_to: oneshot::Sender<BatchServiceResult<Vec<BatchJob>>>,
        business_id: String,
    },
    GetBatchStatistics {
        respond_to: oneshot::Sender<BatchServiceResult<BatchStatistics>>,
        business_id: String,
    },
}

// -----------------
// BatchActor
// -----------------
struct BatchActor {
    receiver: mpsc::Receiver<BatchMessage>,
    processor: Arc<BatchProcessor>,
}

impl BatchActor {
    pub fn try_new<P>(
        receiver: mpsc::Receiver<BatchMessage>,
        persist_file: P,
        relayer: Arc<dyn ChainRelayer>,
        store: Arc<dyn CertificateStore>,
        plans: Arc<dyn SubscriptionPlanLookup>,
        config: BatchServiceConfig,
    ) -> BatchServiceResult<Self>
    where
        P: AsRef<Path>,
    {
        let processor = Arc::new(BatchProcessor::new(
            BatchDb::new(persist_file)?,
            relayer,
            store,
            plans,
            config,
        ));
        Ok(Self {
            receiver,
            processor,
        })
    }

    async fn handle_msg(&self, msg: BatchMessage) {
        use BatchMessage::*;
        match msg {
            CreateBatchJob {
                respond_to,
                business_id,
                request,
            } => {
                let processor = self.processor.clone();
                tokio::task::spawn(async move {
                    let job = processor
                        .create_batch_certificate_job(&business_id, request)
                        .await;
                    if let Err(e) = respond_to.send(job) {
                        error!("Failed to send response {:?}", e);
                    }
                });
            }
            GetBatchProgress {
                respond_to,
                business_id,
                batch_id,
            } => {
                let progress =
                    self.processor.get_batch_progress(&business_id, batch_id);
                if let Err(e) = respond_to.send(progress) {
                    error!("Failed to send response {:?}", e);
                }
            }
            CancelBatchJob {
                respond_to,
                business_id,
                batch_id,
            } => {
                let cancelled =
                    self.processor.cancel_batch_job(&business_id, batch_id);
                if let Err(e) = respond_to.send(cancelled) {
                    error!("Failed to send response {:?}", e);
                }
            }
            RetryFailedItems {
                respond_to,
                business_id,
                batch_id,
            } => {
                let processor = self.processor.clone();
                tokio::task::spawn(async move {
                    let outcome = processor
                        .retry_failed_batch_items(&business_id, batch_id)
                        .await;
                    if let Err(e) = respond_to.send(outcome) {
                        error!("Failed to send response {:?}", e);
                    }
                });
            }
            GetActiveBatchJobs {
                respond_to,
                business_id,
            } => {
                let jobs = self.processor.get_active_batch_jobs(&business_id);
                if let Err(e) = respond_to.send(jobs) {
                    error!("Failed to send response {:?}", e);
                }
            }
            GetBatchStatistics {
                respond_to,
                business_id,
            } => {
                let stats =
                    self.processor.get_batch_job_statistics(&business_id);
                if let Err(e) = respond_to.send(stats) {
                    error!("Failed to send response {:?}", e);
                }
            }
        }
    }

    pub async fn run(&mut self, cancel_token: CancellationToken) {
        loop {
            select! {
                msg = self.receiver.recv() => {
                    if let Some(msg) = msg {
                        self.handle_msg(msg).await;
                    } else {
                        break;
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    }
}

// -----------------
// BatchService
// -----------------

/// Channel-fronted handle around [`BatchProcessor`]. All methods are
/// fire-and-forget sends returning the `oneshot` receiver for the reply,
/// so callers choose whether to await the outcome.
pub struct BatchService {
    sender: mpsc::Sender<BatchMessage>,
    cancel_token: CancellationToken,
}

impl BatchService {
    pub fn try_start<P>(
        persist_file: P,
        relayer: Arc<dyn ChainRelayer>,
        store: Arc<dyn CertificateStore>,
        plans: Arc<dyn SubscriptionPlanLookup>,
        config: BatchServiceConfig,
    ) -> BatchServiceResult<Self>
    where
        P: AsRef<Path>,
    {
        debug!("Starting batch service with config: {:?}", config);
        let (sender, receiver) = mpsc::channel(1_000);
        let cancel_token = CancellationToken::new();
        {
            let cancel_token = cancel_token.clone();
            let mut actor = BatchActor::try_new(
                receiver,
                persist_file,
                relayer,
                store,
                plans,
                config,
            )?;
            tokio::spawn(async move {
                actor.run(cancel_token).await;
            });
        }
        Ok(Self {
            sender,
            cancel_token,
        })
    }

    pub fn create_batch_job(
        &self,
        business_id: &str,
        request: CreateBatchJobRequest,
    ) -> oneshot::Receiver<BatchServiceResult<BatchJob>> {
        let (tx, rx) = oneshot::channel();
        self.try_send(BatchMessage::CreateBatchJob {
            respond_to: tx,
            business_id: business_id.to_string(),
            request,
        });
        rx
    }

    pub fn get_batch_progress(
        &self,
        business_id: &str,
        batch_id: u64,
    ) -> oneshot::Receiver<BatchServiceResult<Option<BatchJob>>> {
        let (tx, rx) = oneshot::channel();
        self.try_send(BatchMessage::GetBatchProgress {
            respond_to: tx,
            business_id: business_id.to_string(),
            batch_id,
        });
        rx
    }

    pub fn cancel_batch_job(
        &self,
        business_id: &str,
        batch_id: u64,
    ) -> oneshot::Receiver<BatchServiceResult<bool>> {
        let (tx, rx) = oneshot::channel();
        self.try_send(BatchMessage::CancelBatchJob {
            respond_to: tx,
            business_id: business_id.to_string(),
            batch_id,
        });
        rx
    }

    pub fn retry_failed_items(
        &self,
        business_id: &str,
        batch_id: u64,
    ) -> oneshot::Receiver<BatchServiceResult<RetryOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.try_send(BatchMessage::RetryFailedItems {
            respond_to: tx,
            business_id: business_id.to_string(),
            batch_id,
        });
        rx
    }

    pub fn get_active_batch_jobs(
        &self,
        business_id: &str,
    ) -> oneshot::Receiver<BatchServiceResult<Vec<BatchJob>>> {
        let (tx, rx) = oneshot::channel();
        self.try_send(BatchMessage::GetActiveBatchJobs {
            respond_to: tx,
            business_id: business_id.to_string(),
        });
        rx
    }

    pub fn get_batch_statistics(
        &self,
        business_id: &str,
    ) -> oneshot::Receiver<BatchServiceResult<BatchStatistics>> {
        let (tx, rx) = oneshot::channel();
        self.try_send(BatchMessage::GetBatchStatistics {
            respond_to: tx,
            business_id: business_id.to_string(),
        });
        rx
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    fn try_send(&self, msg: BatchMessage) {
        if let Err(e) = self.sender.try_send(msg) {
            match e {
                TrySendError::Full(msg) => error!(
                    "Channel full, failed to send batch message {:?}",
                    msg
                ),
                TrySendError::Closed(msg) => error!(
                    "Channel closed, failed to send batch message {:?}",
                    msg
                ),
            }
        }
    }
}
