use std::{path::Path, sync::Mutex};

use certforge_core::{
    BatchOptions, ContactMethod, ErrorKind, Recipient,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    error::{BatchPersistError, BatchPersistResult},
    utils::{i64_into_u64, now_ms, u64_into_i64},
};
use crate::types::{
    BatchItem, BatchItemStatus, BatchJob, BatchJobStatus, ItemError,
};

const POISONED_MUTEX_MSG: &str = "BatchDb lock poisoned";

// -----------------
// Insert payloads
// -----------------

/// Item row at job creation: either queued, or already failed when the
/// recipient did not pass validation.
#[derive(Debug, Clone)]
pub struct NewBatchItem {
    pub recipient: Recipient,
    pub status: BatchItemStatus,
    pub error: Option<ItemError>,
}

#[derive(Debug, Clone)]
pub struct NewBatchJob {
    pub business_id: String,
    pub product_id: String,
    pub options: BatchOptions,
    pub has_web3: bool,
    pub should_auto_transfer: bool,
    pub brand_wallet: Option<String>,
    pub metadata: Option<String>,
    pub estimated_completion_ms: u64,
    pub items: Vec<NewBatchItem>,
}

// -----------------
// BatchDb
// -----------------

/// Sqlite-backed job and item state. Every item transition is an
/// independent update keyed by `(batch_id, item_idx)`, so concurrent
/// dispatch tasks never race on the same row.
pub struct BatchDb {
    conn: Mutex<Connection>,
}

impl BatchDb {
    pub fn new<P>(db_file: P) -> BatchPersistResult<Self>
    where
        P: AsRef<Path>,
    {
        Self::from_conn(Connection::open(db_file)?)
    }

    pub fn in_memory() -> BatchPersistResult<Self> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> BatchPersistResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS batch_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                business_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                status TEXT NOT NULL,
                delay_between_certs_ms INTEGER NOT NULL,
                max_concurrent INTEGER NOT NULL,
                continue_on_error INTEGER NOT NULL,
                batch_transfer INTEGER NOT NULL,
                transfer_batch_size INTEGER NOT NULL,
                gas_optimization INTEGER NOT NULL,
                has_web3 INTEGER NOT NULL,
                should_auto_transfer INTEGER NOT NULL,
                brand_wallet TEXT,
                metadata TEXT,
                created_at_ms INTEGER NOT NULL,
                estimated_completion_ms INTEGER NOT NULL,
                completed_at_ms INTEGER
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_business
             ON batch_jobs(business_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS batch_items (
                batch_id INTEGER NOT NULL,
                item_idx INTEGER NOT NULL,
                recipient TEXT NOT NULL,
                contact_method TEXT NOT NULL,
                status TEXT NOT NULL,
                certificate_id TEXT,
                error_kind TEXT,
                error_message TEXT,
                attempts INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                PRIMARY KEY (batch_id, item_idx)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_items_status
             ON batch_items(batch_id, status)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -----------------
    // Jobs
    // -----------------

    /// Inserts the job and all of its items in one transaction and
    /// returns the allocated job id.
    pub fn insert_job(&self, job: &NewBatchJob) -> BatchPersistResult<u64> {
        let mut conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let tx = conn.transaction()?;
        let now = now_ms();
        tx.execute(
            "INSERT INTO batch_jobs (
                business_id, product_id, status,
                delay_between_certs_ms, max_concurrent, continue_on_error,
                batch_transfer, transfer_batch_size, gas_optimization,
                has_web3, should_auto_transfer, brand_wallet, metadata,
                created_at_ms, estimated_completion_ms, completed_at_ms
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, NULL
            )",
            params![
                job.business_id,
                job.product_id,
                BatchJobStatus::Pending.as_str(),
                u64_into_i64(job.options.delay_between_certs_ms),
                job.options.max_concurrent,
                job.options.continue_on_error,
                job.options.batch_transfer,
                job.options.transfer_batch_size,
                job.options.gas_optimization,
                job.has_web3,
                job.should_auto_transfer,
                job.brand_wallet,
                job.metadata,
                u64_into_i64(now),
                u64_into_i64(job.estimated_completion_ms),
            ],
        )?;
        let batch_id = tx.last_insert_rowid() as u64;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO batch_items (
                    batch_id, item_idx, recipient, contact_method, status,
                    certificate_id, error_kind, error_message, attempts,
                    updated_at_ms
                ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, 0, ?8)",
            )?;
            for (idx, item) in job.items.iter().enumerate() {
                stmt.execute(params![
                    u64_into_i64(batch_id),
                    idx as i64,
                    item.recipient.address,
                    item.recipient.contact_method.as_str(),
                    item.status.as_str(),
                    item.error.as_ref().map(|e| e.kind.as_str()),
                    item.error.as_ref().map(|e| e.message.as_str()),
                    u64_into_i64(now),
                ])?;
            }
        }
        tx.commit()?;
        Ok(batch_id)
    }

    pub fn get_job(
        &self,
        batch_id: u64,
    ) -> BatchPersistResult<Option<BatchJob>> {
        let conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let job = conn
            .query_row(
                "SELECT id, business_id, product_id, status,
                        delay_between_certs_ms, max_concurrent,
                        continue_on_error, batch_transfer,
                        transfer_batch_size, gas_optimization, has_web3,
                        should_auto_transfer, brand_wallet, metadata,
                        created_at_ms, estimated_completion_ms,
                        completed_at_ms
                 FROM batch_jobs WHERE id = ?1",
                params![u64_into_i64(batch_id)],
                extract_job_row,
            )
            .optional()?;
        let Some(job) = job else {
            return Ok(None);
        };
        let mut job = job?;
        job.items = Self::items_for_job(&conn, batch_id)?;
        Ok(Some(job))
    }

    pub fn set_job_status(
        &self,
        batch_id: u64,
        status: BatchJobStatus,
        completed_at_ms: Option<u64>,
    ) -> BatchPersistResult<()> {
        let conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let changed = conn.execute(
            "UPDATE batch_jobs SET status = ?1, completed_at_ms = ?2
             WHERE id = ?3",
            params![
                status.as_str(),
                completed_at_ms.map(u64_into_i64),
                u64_into_i64(batch_id)
            ],
        )?;
        if changed == 0 {
            return Err(BatchPersistError::JobNotFound(batch_id));
        }
        Ok(())
    }

    /// All jobs of a tenant, newest first.
    pub fn jobs_for_business(
        &self,
        business_id: &str,
    ) -> BatchPersistResult<Vec<BatchJob>> {
        let conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let mut stmt = conn.prepare(
            "SELECT id, business_id, product_id, status,
                    delay_between_certs_ms, max_concurrent,
                    continue_on_error, batch_transfer, transfer_batch_size,
                    gas_optimization, has_web3, should_auto_transfer,
                    brand_wallet, metadata, created_at_ms,
                    estimated_completion_ms, completed_at_ms
             FROM batch_jobs WHERE business_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map(params![business_id], extract_job_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut jobs = Vec::with_capacity(rows.len());
        for job in rows {
            let mut job = job?;
            job.items = Self::items_for_job(&conn, job.id)?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    // -----------------
    // Items
    // -----------------

    /// Indices of items still waiting for dispatch, in array order.
    pub fn queued_item_indices(
        &self,
        batch_id: u64,
    ) -> BatchPersistResult<Vec<u32>> {
        let conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let mut stmt = conn.prepare(
            "SELECT item_idx FROM batch_items
             WHERE batch_id = ?1 AND status = ?2
             ORDER BY item_idx ASC",
        )?;
        let indices = stmt
            .query_map(
                params![
                    u64_into_i64(batch_id),
                    BatchItemStatus::Queued.as_str()
                ],
                |row| row.get::<_, i64>(0).map(|v| v as u32),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(indices)
    }

    /// Marks one item dispatched: `queued -> in_progress`, counting the
    /// dispatch as one attempt.
    pub fn mark_item_in_progress(
        &self,
        batch_id: u64,
        item_idx: u32,
    ) -> BatchPersistResult<()> {
        self.update_item(
            batch_id,
            item_idx,
            "UPDATE batch_items
             SET status = 'in_progress', attempts = attempts + 1,
                 error_kind = NULL, error_message = NULL, updated_at_ms = ?3
             WHERE batch_id = ?1 AND item_idx = ?2",
            None,
            None,
        )
    }

    pub fn mark_item_succeeded(
        &self,
        batch_id: u64,
        item_idx: u32,
        certificate_id: &str,
    ) -> BatchPersistResult<()> {
        self.update_item(
            batch_id,
            item_idx,
            "UPDATE batch_items
             SET status = 'succeeded', certificate_id = ?4,
                 error_kind = NULL, error_message = NULL, updated_at_ms = ?3
             WHERE batch_id = ?1 AND item_idx = ?2",
            Some(certificate_id),
            None,
        )
    }

    pub fn mark_item_failed(
        &self,
        batch_id: u64,
        item_idx: u32,
        kind: ErrorKind,
        message: &str,
    ) -> BatchPersistResult<()> {
        self.update_item(
            batch_id,
            item_idx,
            "UPDATE batch_items
             SET status = 'failed', certificate_id = NULL,
                 error_kind = ?4, error_message = ?5, updated_at_ms = ?3
             WHERE batch_id = ?1 AND item_idx = ?2",
            Some(kind.as_str()),
            Some(message),
        )
    }

    fn update_item(
        &self,
        batch_id: u64,
        item_idx: u32,
        query: &str,
        arg4: Option<&str>,
        arg5: Option<&str>,
    ) -> BatchPersistResult<()> {
        let conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let changed = match (arg4, arg5) {
            (None, None) => conn.execute(
                query,
                params![
                    u64_into_i64(batch_id),
                    item_idx,
                    u64_into_i64(now_ms())
                ],
            )?,
            (Some(a), None) => conn.execute(
                query,
                params![
                    u64_into_i64(batch_id),
                    item_idx,
                    u64_into_i64(now_ms()),
                    a
                ],
            )?,
            (Some(a), Some(b)) => conn.execute(
                query,
                params![
                    u64_into_i64(batch_id),
                    item_idx,
                    u64_into_i64(now_ms()),
                    a,
                    b
                ],
            )?,
            (None, Some(_)) => unreachable!("update_item arg shapes"),
        };
        if changed == 0 {
            return Err(BatchPersistError::JobNotFound(batch_id));
        }
        Ok(())
    }

    /// Puts every failed item back into the queue for a retry pass and
    /// returns their indices. Attempts are not touched here; they grow
    /// when the item is dispatched again.
    pub fn reset_failed_items(
        &self,
        batch_id: u64,
    ) -> BatchPersistResult<Vec<u32>> {
        let mut conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let tx = conn.transaction()?;
        let indices = {
            let mut stmt = tx.prepare(
                "SELECT item_idx FROM batch_items
                 WHERE batch_id = ?1 AND status = 'failed'
                 ORDER BY item_idx ASC",
            )?;
            let indices = stmt
                .query_map(params![u64_into_i64(batch_id)], |row| {
                    row.get::<_, i64>(0).map(|v| v as u32)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            indices
        };
        tx.execute(
            "UPDATE batch_items
             SET status = 'queued', certificate_id = NULL,
                 error_kind = NULL, error_message = NULL, updated_at_ms = ?2
             WHERE batch_id = ?1 AND status = 'failed'",
            params![u64_into_i64(batch_id), u64_into_i64(now_ms())],
        )?;
        tx.commit()?;
        Ok(indices)
    }

    /// Fails every item that is not yet terminal. Used when the job-level
    /// dispatch deadline fires so the job can still be finalized.
    pub fn fail_unfinished_items(
        &self,
        batch_id: u64,
        kind: ErrorKind,
        message: &str,
    ) -> BatchPersistResult<usize> {
        let conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let changed = conn.execute(
            "UPDATE batch_items
             SET status = 'failed', error_kind = ?2, error_message = ?3,
                 updated_at_ms = ?4
             WHERE batch_id = ?1 AND status IN ('queued', 'in_progress')",
            params![
                u64_into_i64(batch_id),
                kind.as_str(),
                message,
                u64_into_i64(now_ms())
            ],
        )?;
        Ok(changed)
    }

    /// Fails items stuck in `in_progress` after every dispatch task has
    /// been joined. Only a panicked task can leave such a row behind;
    /// queued items are untouched so a cancelled job keeps them queued.
    pub fn fail_stuck_in_progress(
        &self,
        batch_id: u64,
        message: &str,
    ) -> BatchPersistResult<usize> {
        let conn = self.conn.lock().expect(POISONED_MUTEX_MSG);
        let changed = conn.execute(
            "UPDATE batch_items
             SET status = 'failed', error_kind = ?2, error_message = ?3,
                 updated_at_ms = ?4
             WHERE batch_id = ?1 AND status = 'in_progress'",
            params![
                u64_into_i64(batch_id),
                ErrorKind::Unknown.as_str(),
                message,
                u64_into_i64(now_ms())
            ],
        )?;
        Ok(changed)
    }

    fn items_for_job(
        conn: &Connection,
        batch_id: u64,
    ) -> BatchPersistResult<Vec<BatchItem>> {
        let mut stmt = conn.prepare(
            "SELECT recipient, contact_method, status, certificate_id,
                    error_kind, error_message, attempts
             FROM batch_items WHERE batch_id = ?1
             ORDER BY item_idx ASC",
        )?;
        let items = stmt
            .query_map(params![u64_into_i64(batch_id)], extract_item_row)?
            .collect::<Result<Vec<_>, _>>()?;
        items.into_iter().collect()
    }
}

// -----------------
// Row extraction
// -----------------

type JobRowResult = BatchPersistResult<BatchJob>;

fn extract_job_row(row: &Row) -> rusqlite::Result<JobRowResult> {
    Ok(try_extract_job_row(row))
}

fn try_extract_job_row(row: &Row) -> JobRowResult {
    let status_str: String = row.get(3)?;
    let status = BatchJobStatus::try_from(status_str.as_str())
        .map_err(BatchPersistError::InvalidJobStatus)?;
    Ok(BatchJob {
        id: i64_into_u64(row.get(0)?),
        business_id: row.get(1)?,
        product_id: row.get(2)?,
        status,
        items: Vec::new(),
        options: BatchOptions {
            delay_between_certs_ms: i64_into_u64(row.get(4)?),
            max_concurrent: row.get(5)?,
            continue_on_error: row.get(6)?,
            batch_transfer: row.get(7)?,
            transfer_batch_size: row.get(8)?,
            gas_optimization: row.get(9)?,
        },
        has_web3: row.get(10)?,
        should_auto_transfer: row.get(11)?,
        brand_wallet: row.get(12)?,
        metadata: row.get(13)?,
        created_at_ms: i64_into_u64(row.get(14)?),
        estimated_completion_ms: i64_into_u64(row.get(15)?),
        completed_at_ms: row
            .get::<_, Option<i64>>(16)?
            .map(i64_into_u64),
    })
}

type ItemRowResult = BatchPersistResult<BatchItem>;

fn extract_item_row(row: &Row) -> rusqlite::Result<ItemRowResult> {
    Ok(try_extract_item_row(row))
}

fn try_extract_item_row(row: &Row) -> ItemRowResult {
    let method_str: String = row.get(1)?;
    let contact_method = ContactMethod::try_from(method_str.as_str())
        .map_err(BatchPersistError::InvalidContactMethod)?;
    let status_str: String = row.get(2)?;
    let status = BatchItemStatus::try_from(status_str.as_str())
        .map_err(BatchPersistError::InvalidItemStatus)?;
    let error_kind: Option<String> = row.get(4)?;
    let error_message: Option<String> = row.get(5)?;
    let error = match (error_kind, error_message) {
        (Some(kind), message) => Some(ItemError {
            kind: ErrorKind::try_from(kind.as_str())
                .map_err(BatchPersistError::InvalidErrorKind)?,
            message: message.unwrap_or_default(),
        }),
        (None, _) => None,
    };
    Ok(BatchItem {
        recipient: Recipient {
            address: row.get(0)?,
            contact_method,
        },
        status,
        certificate_id: row.get(3)?,
        error,
        attempts: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use certforge_core::Recipient;

    use super::*;

    fn new_job(items: Vec<NewBatchItem>) -> NewBatchJob {
        NewBatchJob {
            business_id: "biz-1".to_string(),
            product_id: "prod-1".to_string(),
            options: BatchOptions::default(),
            has_web3: true,
            should_auto_transfer: false,
            brand_wallet: None,
            metadata: None,
            estimated_completion_ms: 42,
            items,
        }
    }

    fn queued(address: &str) -> NewBatchItem {
        NewBatchItem {
            recipient: Recipient::email(address),
            status: BatchItemStatus::Queued,
            error: None,
        }
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let db = BatchDb::in_memory().unwrap();
        let id = db
            .insert_job(&new_job(vec![
                queued("a@example.com"),
                queued("b@example.com"),
            ]))
            .unwrap();

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.business_id, "biz-1");
        assert_eq!(job.status, BatchJobStatus::Pending);
        assert_eq!(job.items.len(), 2);
        assert_eq!(job.items[0].recipient.address, "a@example.com");
        assert_eq!(job.items[0].status, BatchItemStatus::Queued);
        assert_eq!(job.items[0].attempts, 0);
        assert!(job.completed_at_ms.is_none());
    }

    #[test]
    fn test_missing_job_is_none() {
        let db = BatchDb::in_memory().unwrap();
        assert!(db.get_job(999).unwrap().is_none());
    }

    #[test]
    fn test_item_transitions_persist() {
        let db = BatchDb::in_memory().unwrap();
        let id = db
            .insert_job(&new_job(vec![
                queued("a@example.com"),
                queued("b@example.com"),
            ]))
            .unwrap();

        db.mark_item_in_progress(id, 0).unwrap();
        db.mark_item_succeeded(id, 0, "cert-1").unwrap();
        db.mark_item_in_progress(id, 1).unwrap();
        db.mark_item_failed(id, 1, ErrorKind::Chain, "reverted").unwrap();

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.items[0].status, BatchItemStatus::Succeeded);
        assert_eq!(job.items[0].certificate_id.as_deref(), Some("cert-1"));
        assert_eq!(job.items[0].attempts, 1);
        assert_eq!(job.items[1].status, BatchItemStatus::Failed);
        let error = job.items[1].error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::Chain);
        assert_eq!(error.message, "reverted");
    }

    #[test]
    fn test_reset_failed_items_requeues_only_failures() {
        let db = BatchDb::in_memory().unwrap();
        let id = db
            .insert_job(&new_job(vec![
                queued("a@example.com"),
                queued("b@example.com"),
                queued("c@example.com"),
            ]))
            .unwrap();
        db.mark_item_in_progress(id, 0).unwrap();
        db.mark_item_succeeded(id, 0, "cert-1").unwrap();
        db.mark_item_in_progress(id, 1).unwrap();
        db.mark_item_failed(id, 1, ErrorKind::Timeout, "timed out")
            .unwrap();

        let reset = db.reset_failed_items(id).unwrap();
        assert_eq!(reset, vec![1]);

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.items[0].status, BatchItemStatus::Succeeded);
        assert_eq!(job.items[1].status, BatchItemStatus::Queued);
        assert!(job.items[1].error.is_none());
        // attempts survive the reset; they grow on redispatch
        assert_eq!(job.items[1].attempts, 1);
        assert_eq!(job.items[2].status, BatchItemStatus::Queued);
    }

    #[test]
    fn test_fail_unfinished_items() {
        let db = BatchDb::in_memory().unwrap();
        let id = db
            .insert_job(&new_job(vec![
                queued("a@example.com"),
                queued("b@example.com"),
            ]))
            .unwrap();
        db.mark_item_in_progress(id, 0).unwrap();
        db.mark_item_succeeded(id, 0, "cert-1").unwrap();

        let failed = db
            .fail_unfinished_items(id, ErrorKind::Timeout, "deadline")
            .unwrap();
        assert_eq!(failed, 1);

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.items[0].status, BatchItemStatus::Succeeded);
        assert_eq!(job.items[1].status, BatchItemStatus::Failed);
    }

    #[test]
    fn test_jobs_for_business_is_scoped() {
        let db = BatchDb::in_memory().unwrap();
        let mut other = new_job(vec![queued("x@example.com")]);
        other.business_id = "biz-2".to_string();
        db.insert_job(&new_job(vec![queued("a@example.com")])).unwrap();
        db.insert_job(&other).unwrap();

        let jobs = db.jobs_for_business("biz-1").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].business_id, "biz-1");
        assert!(db.jobs_for_business("biz-3").unwrap().is_empty());
    }

    #[test]
    fn test_job_status_transitions() {
        let db = BatchDb::in_memory().unwrap();
        let id = db
            .insert_job(&new_job(vec![queued("a@example.com")]))
            .unwrap();
        db.set_job_status(id, BatchJobStatus::Running, None).unwrap();
        assert_eq!(
            db.get_job(id).unwrap().unwrap().status,
            BatchJobStatus::Running
        );
        db.set_job_status(id, BatchJobStatus::Completed, Some(7)).unwrap();
        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, BatchJobStatus::Completed);
        assert_eq!(job.completed_at_ms, Some(7));

        assert!(db
            .set_job_status(999, BatchJobStatus::Completed, None)
            .is_err());
    }

    #[test]
    fn test_queued_indices_follow_array_order() {
        let db = BatchDb::in_memory().unwrap();
        let id = db
            .insert_job(&new_job(vec![
                queued("a@example.com"),
                NewBatchItem {
                    recipient: Recipient::wallet("0xnotvalid"),
                    status: BatchItemStatus::Failed,
                    error: Some(ItemError {
                        kind: ErrorKind::Validation,
                        message: "bad wallet".to_string(),
                    }),
                },
                queued("c@example.com"),
            ]))
            .unwrap();
        assert_eq!(db.queued_item_indices(id).unwrap(), vec![0, 2]);
    }
}
