use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures_util::{stream::FuturesUnordered, StreamExt};
use log::*;
use tokio::{
    sync::Semaphore,
    task::JoinHandle,
    time::{sleep_until, timeout, Instant},
};
use tokio_util::sync::CancellationToken;

use certforge_chain::ChainRelayer;
use certforge_core::{
    validate_recipient, CertificateStatus, CertificateStore, ContactMethod,
    ErrorKind, NewCertificate, Recipient, SubscriptionPlanLookup,
};
use certforge_policy::{calculate_batch_duration_secs, plan_limits, PlanTier};

use crate::{
    config::BatchServiceConfig,
    error::{BatchServiceError, BatchServiceResult},
    persist::{utils::now_ms, BatchDb, NewBatchItem, NewBatchJob},
    types::{
        BatchItemStatus, BatchJob, BatchJobStatus, BatchStatistics,
        CreateBatchJobRequest, ItemError, RetryOutcome,
    },
};

const POISONED_MUTEX_MSG: &str = "BatchProcessor lock poisoned";
const SEMAPHORE_CLOSED_MSG: &str = "Dispatch semaphore closed!";

/// Immutable per-job context shared by the dispatch tasks of one run.
struct DispatchCtx {
    batch_id: u64,
    business_id: String,
    product_id: String,
    metadata: String,
    continue_on_error: bool,
    should_auto_transfer: bool,
    brand_wallet: Option<String>,
    /// Set by a failing task when `continue_on_error` is off; the
    /// dispatch loop checks it before starting the next item.
    halt: AtomicBool,
}

// -----------------
// BatchProcessor
// -----------------

/// Orchestrates batch certificate jobs: creates the per-recipient item
/// list, dispatches mint calls against the relayer with bounded
/// concurrency and pacing, records every per-item outcome, and drives
/// each job to a terminal state.
pub struct BatchProcessor {
    db: Arc<BatchDb>,
    relayer: Arc<dyn ChainRelayer>,
    store: Arc<dyn CertificateStore>,
    plans: Arc<dyn SubscriptionPlanLookup>,
    config: BatchServiceConfig,
    cancel_tokens: Mutex<HashMap<u64, CancellationToken>>,
}

impl BatchProcessor {
    pub fn new(
        db: BatchDb,
        relayer: Arc<dyn ChainRelayer>,
        store: Arc<dyn CertificateStore>,
        plans: Arc<dyn SubscriptionPlanLookup>,
        config: BatchServiceConfig,
    ) -> Self {
        Self {
            db: Arc::new(db),
            relayer,
            store,
            plans,
            config,
            cancel_tokens: Mutex::default(),
        }
    }

    // -----------------
    // Job creation
    // -----------------

    /// Validates the request against the tenant's plan limits, places
    /// every recipient into the item list (invalid ones directly as
    /// failed, preserving 1:1 index correspondence with the input),
    /// persists the job and starts dispatch. Returns the running job.
    pub async fn create_batch_certificate_job(
        self: &Arc<Self>,
        business_id: &str,
        request: CreateBatchJobRequest,
    ) -> BatchServiceResult<BatchJob> {
        if request.recipients.is_empty() {
            return Err(BatchServiceError::Validation(
                "batch needs at least one recipient".to_string(),
            ));
        }

        let plan_key = match &request.plan_level {
            Some(key) => key.clone(),
            None => self.plans.plan_key(business_id).await?,
        };
        let tier = PlanTier::from_key(&plan_key);
        let limits = plan_limits(tier);
        if request.recipients.len() > limits.max_batch_size as usize {
            return Err(BatchServiceError::LimitExceeded {
                requested: request.recipients.len(),
                max: limits.max_batch_size,
            });
        }

        let owns = self
            .store
            .business_owns_product(business_id, &request.product_id)
            .await?;
        if !owns {
            return Err(BatchServiceError::Validation(format!(
                "business does not own product '{}'",
                request.product_id
            )));
        }

        let brand_wallet = if request.should_auto_transfer {
            let Some(settings) = &request.transfer_settings else {
                return Err(BatchServiceError::Validation(
                    "auto transfer requires transfer settings".to_string(),
                ));
            };
            validate_recipient(&settings.brand_wallet, ContactMethod::Wallet)
                .map_err(|reason| {
                    BatchServiceError::Validation(format!(
                        "brand wallet: {}",
                        reason
                    ))
                })?;
            Some(settings.brand_wallet.clone())
        } else {
            None
        };

        let mut options = request.batch_options.unwrap_or_default();
        options.max_concurrent =
            options.max_concurrent.clamp(1, limits.max_concurrent);

        let items: Vec<NewBatchItem> = request
            .recipients
            .iter()
            .map(|recipient| {
                match validate_recipient(
                    &recipient.address,
                    recipient.contact_method,
                ) {
                    Ok(()) => NewBatchItem {
                        recipient: recipient.clone(),
                        status: BatchItemStatus::Queued,
                        error: None,
                    },
                    Err(reason) => NewBatchItem {
                        recipient: recipient.clone(),
                        status: BatchItemStatus::Failed,
                        error: Some(ItemError {
                            kind: ErrorKind::Validation,
                            message: reason,
                        }),
                    },
                }
            })
            .collect();

        let duration_secs = calculate_batch_duration_secs(
            request.recipients.len() as u32,
            &options,
            request.has_web3,
        );
        let batch_id = self.db.insert_job(&NewBatchJob {
            business_id: business_id.to_string(),
            product_id: request.product_id.clone(),
            options,
            has_web3: request.has_web3,
            should_auto_transfer: request.should_auto_transfer,
            brand_wallet,
            metadata: request.job_metadata.clone(),
            estimated_completion_ms: now_ms()
                + duration_secs.saturating_mul(1_000),
            items,
        })?;
        self.db
            .set_job_status(batch_id, BatchJobStatus::Running, None)?;

        let token = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .insert(batch_id, token.clone());

        let job = self
            .db
            .get_job(batch_id)?
            .ok_or(BatchServiceError::NotFound)?;
        info!(
            "batch {}: created for business '{}' with {} items (plan: {})",
            batch_id,
            business_id,
            job.items.len(),
            tier
        );

        tokio::spawn(Arc::clone(self).run_dispatch(batch_id, token));
        Ok(job)
    }

    // -----------------
    // Queries
    // -----------------

    /// Tenant-scoped job lookup. A foreign tenant's job id yields `None`
    /// rather than leaking its existence.
    pub fn get_batch_progress(
        &self,
        business_id: &str,
        batch_id: u64,
    ) -> BatchServiceResult<Option<BatchJob>> {
        let Some(job) = self.db.get_job(batch_id)? else {
            return Ok(None);
        };
        if job.business_id != business_id {
            return Ok(None);
        }
        Ok(Some(job))
    }

    pub fn get_active_batch_jobs(
        &self,
        business_id: &str,
    ) -> BatchServiceResult<Vec<BatchJob>> {
        let jobs = self.db.jobs_for_business(business_id)?;
        Ok(jobs.into_iter().filter(|j| j.status.is_active()).collect())
    }

    pub fn get_batch_job_statistics(
        &self,
        business_id: &str,
    ) -> BatchServiceResult<BatchStatistics> {
        let jobs = self.db.jobs_for_business(business_id)?;
        let mut stats = BatchStatistics {
            total_jobs: jobs.len(),
            active_jobs: 0,
            completed_jobs: 0,
            partially_failed_jobs: 0,
            cancelled_jobs: 0,
            items_succeeded: 0,
            items_failed: 0,
            success_rate: 1.0,
        };
        for job in &jobs {
            use BatchJobStatus::*;
            match job.status {
                Pending | Running => stats.active_jobs += 1,
                Completed => stats.completed_jobs += 1,
                PartiallyFailed => stats.partially_failed_jobs += 1,
                Cancelled => stats.cancelled_jobs += 1,
            }
            stats.items_succeeded += job.succeeded_count();
            stats.items_failed += job.failed_count();
        }
        // Only items with a terminal outcome enter the rate; a cancelled
        // job's never-dispatched items stay out of the denominator.
        let terminal = stats.items_succeeded + stats.items_failed;
        if terminal > 0 {
            stats.success_rate = stats.items_succeeded as f64 / terminal as f64;
        }
        Ok(stats)
    }

    // -----------------
    // Cancellation
    // -----------------

    /// Requests cooperative cancellation: no new items are started once
    /// the dispatch loop observes it; in-flight relayer calls finish and
    /// their results are still recorded. Idempotent on terminal jobs.
    pub fn cancel_batch_job(
        &self,
        business_id: &str,
        batch_id: u64,
    ) -> BatchServiceResult<bool> {
        let job = self
            .get_batch_progress(business_id, batch_id)?
            .ok_or(BatchServiceError::NotFound)?;
        if job.status.is_terminal() {
            return Ok(true);
        }
        let token = self
            .cancel_tokens
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .get(&batch_id)
            .cloned();
        match token {
            Some(token) => {
                info!("batch {}: cancellation requested", batch_id);
                token.cancel();
            }
            None => {
                // No dispatch loop in this process (e.g. a job left
                // running by a crashed run); finalize directly.
                warn!(
                    "batch {}: no dispatch loop to cancel, finalizing",
                    batch_id
                );
                self.db.set_job_status(
                    batch_id,
                    BatchJobStatus::Cancelled,
                    Some(now_ms()),
                )?;
            }
        }
        Ok(true)
    }

    // -----------------
    // Retry
    // -----------------

    /// Re-queues every failed item of a terminal job, picks up any items
    /// a cancellation left queued, and runs the same dispatch discipline
    /// over them, waiting for the outcome. Items currently succeeded are
    /// never touched. `retried` counts every item the pass dispatches,
    /// resumed ones included.
    pub async fn retry_failed_batch_items(
        self: &Arc<Self>,
        business_id: &str,
        batch_id: u64,
    ) -> BatchServiceResult<RetryOutcome> {
        let job = self
            .get_batch_progress(business_id, batch_id)?
            .ok_or(BatchServiceError::NotFound)?;
        if !job.status.is_terminal() {
            return Err(BatchServiceError::InvalidJobState(job.status));
        }

        self.db.reset_failed_items(batch_id)?;
        let indices = self.db.queued_item_indices(batch_id)?;
        if indices.is_empty() {
            return Ok(RetryOutcome {
                retried: 0,
                successful: 0,
                failed: 0,
            });
        }
        info!("batch {}: retrying {} items", batch_id, indices.len());
        self.db
            .set_job_status(batch_id, BatchJobStatus::Running, None)?;

        let token = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .insert(batch_id, token.clone());
        Arc::clone(self).run_dispatch(batch_id, token).await;

        let job = self
            .db
            .get_job(batch_id)?
            .ok_or(BatchServiceError::NotFound)?;
        let successful = indices
            .iter()
            .filter(|&&idx| {
                job.items[idx as usize].status == BatchItemStatus::Succeeded
            })
            .count();
        Ok(RetryOutcome {
            retried: indices.len(),
            successful,
            failed: indices.len() - successful,
        })
    }

    // -----------------
    // Dispatch engine
    // -----------------

    async fn run_dispatch(
        self: Arc<Self>,
        batch_id: u64,
        token: CancellationToken,
    ) {
        match self.dispatch_queued_items(batch_id, token.clone()).await {
            Ok(deadline_hit) => {
                if deadline_hit {
                    warn!(
                        "batch {}: job dispatch deadline exceeded",
                        batch_id
                    );
                    if let Err(err) = self.db.fail_unfinished_items(
                        batch_id,
                        ErrorKind::Timeout,
                        "job dispatch deadline exceeded",
                    ) {
                        error!(
                            "batch {}: failed to fail unfinished items: {:?}",
                            batch_id, err
                        );
                    }
                }
            }
            Err(err) => {
                // Systemic failure (e.g. job store unavailable). The job
                // must still reach a terminal state with a diagnostic.
                error!("batch {}: dispatch aborted: {:?}", batch_id, err);
                if let Err(err) = self.db.fail_unfinished_items(
                    batch_id,
                    ErrorKind::Unknown,
                    &format!("dispatch aborted: {}", err),
                ) {
                    error!(
                        "batch {}: failed to fail unfinished items: {:?}",
                        batch_id, err
                    );
                }
            }
        }

        if let Err(err) = self
            .db
            .fail_stuck_in_progress(batch_id, "dispatch task aborted")
        {
            error!(
                "batch {}: failed to sweep in-progress items: {:?}",
                batch_id, err
            );
        }
        if let Err(err) = self.finalize_job(batch_id, token.is_cancelled()) {
            error!("batch {}: failed to finalize: {:?}", batch_id, err);
        }
        self.cancel_tokens
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .remove(&batch_id);
    }

    /// Dispatches all queued items with at most `max_concurrent` in
    /// flight and `delay_between_certs` between dispatch *starts*.
    /// Returns whether the job deadline fired.
    async fn dispatch_queued_items(
        &self,
        batch_id: u64,
        token: CancellationToken,
    ) -> BatchServiceResult<bool> {
        let job = self
            .db
            .get_job(batch_id)?
            .ok_or(BatchServiceError::NotFound)?;
        let queued = self.db.queued_item_indices(batch_id)?;
        let options = job.options.clone();
        let delay = Duration::from_millis(options.delay_between_certs_ms);
        let deadline = Instant::now() + self.config.job_deadline;

        // Items already failed by upfront validation count as failures
        // for the halt rule, so nothing is dispatched.
        let failed_at_start = job
            .items
            .iter()
            .any(|i| i.status == BatchItemStatus::Failed);
        let ctx = Arc::new(DispatchCtx {
            batch_id,
            business_id: job.business_id.clone(),
            product_id: job.product_id.clone(),
            metadata: job.metadata.clone().unwrap_or_default(),
            continue_on_error: options.continue_on_error,
            should_auto_transfer: job.should_auto_transfer,
            brand_wallet: job.brand_wallet.clone(),
            halt: AtomicBool::new(
                !options.continue_on_error && failed_at_start,
            ),
        });
        let semaphore =
            Arc::new(Semaphore::new(options.max_concurrent.max(1) as usize));
        let mut in_flight: FuturesUnordered<JoinHandle<()>> =
            FuturesUnordered::new();
        let mut last_dispatch: Option<Instant> = None;
        let mut deadline_hit = false;

        'dispatch: for idx in queued {
            if ctx.halt.load(Ordering::SeqCst) {
                debug!("batch {}: halting after failure", batch_id);
                break;
            }
            if let Some(last) = last_dispatch {
                tokio::select! {
                    _ = token.cancelled() => break 'dispatch,
                    _ = sleep_until(deadline) => {
                        deadline_hit = true;
                        break 'dispatch;
                    }
                    _ = sleep_until(last + delay) => {}
                }
            }
            let permit = tokio::select! {
                _ = token.cancelled() => break 'dispatch,
                _ = sleep_until(deadline) => {
                    deadline_hit = true;
                    break 'dispatch;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect(SEMAPHORE_CLOSED_MSG)
                }
            };
            // The permit wait may have outlived a cancellation
            if token.is_cancelled() {
                drop(permit);
                break;
            }
            if ctx.halt.load(Ordering::SeqCst) {
                drop(permit);
                break;
            }

            last_dispatch = Some(Instant::now());
            let recipient = job.items[idx as usize].recipient.clone();
            let processor = self.clone_refs();
            let ctx = ctx.clone();
            in_flight.push(tokio::spawn(async move {
                processor.dispatch_one(ctx, idx, recipient).await;
                drop(permit);
            }));
        }

        // In-flight items finish on their own; each is bounded by the
        // per-item timeout.
        while let Some(joined) = in_flight.next().await {
            if let Err(err) = joined {
                error!(
                    "batch {}: item task failed to complete: {}",
                    batch_id, err
                );
            }
        }
        if token.is_cancelled() {
            debug!("batch {}: dispatch loop observed cancellation", batch_id);
        }
        Ok(deadline_hit)
    }

    /// Cheap handle for spawned item tasks.
    fn clone_refs(&self) -> ItemDispatcher {
        ItemDispatcher {
            db: self.db.clone(),
            relayer: self.relayer.clone(),
            store: self.store.clone(),
            item_timeout: self.config.item_timeout,
        }
    }

    fn finalize_job(
        &self,
        batch_id: u64,
        cancelled: bool,
    ) -> BatchServiceResult<()> {
        let job = self
            .db
            .get_job(batch_id)?
            .ok_or(BatchServiceError::NotFound)?;
        let any_unfinished =
            job.items.iter().any(|i| !i.status.is_terminal());
        let all_succeeded = job
            .items
            .iter()
            .all(|i| i.status == BatchItemStatus::Succeeded);
        let status = if cancelled && any_unfinished {
            BatchJobStatus::Cancelled
        } else if all_succeeded {
            BatchJobStatus::Completed
        } else {
            BatchJobStatus::PartiallyFailed
        };
        self.db.set_job_status(batch_id, status, Some(now_ms()))?;
        info!(
            "batch {}: finalized as {} ({} succeeded, {} failed, {} items)",
            batch_id,
            status,
            job.succeeded_count(),
            job.failed_count(),
            job.items.len()
        );
        Ok(())
    }
}

// -----------------
// Per-item dispatch
// -----------------

/// The subset of processor state an item task needs; spawned tasks own
/// their clones so the dispatch loop keeps no borrow into them.
struct ItemDispatcher {
    db: Arc<BatchDb>,
    relayer: Arc<dyn ChainRelayer>,
    store: Arc<dyn CertificateStore>,
    item_timeout: Duration,
}

impl ItemDispatcher {
    async fn dispatch_one(
        &self,
        ctx: Arc<DispatchCtx>,
        idx: u32,
        recipient: Recipient,
    ) {
        if let Err(err) = self.db.mark_item_in_progress(ctx.batch_id, idx) {
            error!(
                "batch {}: item {} could not be marked in progress: {:?}",
                ctx.batch_id, idx, err
            );
            return;
        }

        let result =
            match timeout(self.item_timeout, self.mint_one(&ctx, &recipient))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(BatchServiceError::Timeout),
            };

        match result {
            Ok(certificate_id) => {
                debug!(
                    "batch {}: item {} minted certificate {}",
                    ctx.batch_id, idx, certificate_id
                );
                if let Err(err) = self.db.mark_item_succeeded(
                    ctx.batch_id,
                    idx,
                    &certificate_id,
                ) {
                    error!(
                        "batch {}: item {} could not be marked succeeded: {:?}",
                        ctx.batch_id, idx, err
                    );
                }
            }
            Err(err) => {
                let kind = classify_item_error(&err);
                warn!(
                    "batch {}: item {} failed ({}): {}",
                    ctx.batch_id, idx, kind, err
                );
                if let Err(err) = self.db.mark_item_failed(
                    ctx.batch_id,
                    idx,
                    kind,
                    &err.to_string(),
                ) {
                    error!(
                        "batch {}: item {} could not be marked failed: {:?}",
                        ctx.batch_id, idx, err
                    );
                }
                if !ctx.continue_on_error {
                    ctx.halt.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    /// One certificate creation: duplicate check, relayer mint, store
    /// write, optional auto-transfer. Exactly one relayer mint call per
    /// invocation.
    async fn mint_one(
        &self,
        ctx: &DispatchCtx,
        recipient: &Recipient,
    ) -> BatchServiceResult<String> {
        let existing = self
            .store
            .find_by_product_and_recipient(
                &ctx.business_id,
                &ctx.product_id,
                recipient,
            )
            .await?;
        if existing.is_some() {
            return Err(BatchServiceError::Duplicate);
        }

        let receipt = self
            .relayer
            .mint(recipient, &ctx.product_id, &ctx.metadata)
            .await?;
        let cert = self
            .store
            .create(NewCertificate {
                business_id: ctx.business_id.clone(),
                product_id: ctx.product_id.clone(),
                recipient: recipient.clone(),
                token_id: Some(receipt.token_id.clone()),
                status: CertificateStatus::Minted,
            })
            .await?;

        if ctx.should_auto_transfer {
            if let Some(wallet) = &ctx.brand_wallet {
                // A failed transfer does not fail the item: the
                // certificate exists and transfer health surfaces it.
                self.transfer_to_brand(&cert.id, &receipt.token_id, wallet)
                    .await;
            }
        }
        Ok(cert.id)
    }

    async fn transfer_to_brand(
        &self,
        certificate_id: &str,
        token_id: &str,
        wallet: &str,
    ) {
        if let Err(err) =
            self.try_transfer(certificate_id, token_id, wallet).await
        {
            warn!(
                "certificate {}: auto transfer failed: {:?}",
                certificate_id, err
            );
            if let Err(err) =
                self.store.set_transfer_failed(certificate_id).await
            {
                error!(
                    "certificate {}: could not record transfer failure: {:?}",
                    certificate_id, err
                );
            }
            if let Err(err) = self
                .store
                .update_status(
                    certificate_id,
                    CertificateStatus::TransferFailed,
                )
                .await
            {
                error!(
                    "certificate {}: could not update status: {:?}",
                    certificate_id, err
                );
            }
        }
    }

    async fn try_transfer(
        &self,
        certificate_id: &str,
        token_id: &str,
        wallet: &str,
    ) -> BatchServiceResult<()> {
        self.store
            .update_status(
                certificate_id,
                CertificateStatus::PendingTransfer,
            )
            .await?;
        self.store.record_transfer_attempt(certificate_id).await?;
        self.relayer.transfer(token_id, wallet).await?;
        self.store
            .update_status(
                certificate_id,
                CertificateStatus::TransferredToBrand,
            )
            .await?;
        Ok(())
    }
}

fn classify_item_error(err: &BatchServiceError) -> ErrorKind {
    use BatchServiceError::*;
    match err {
        Validation(_) => ErrorKind::Validation,
        Chain(_) => ErrorKind::Chain,
        Timeout => ErrorKind::Timeout,
        Duplicate => ErrorKind::Duplicate,
        LimitExceeded { .. } | NotFound | Store(_) | Persist(_)
        | InvalidJobState(_) => ErrorKind::Unknown,
    }
}
