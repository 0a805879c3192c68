use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use certforge_core::{
    Certificate, CertificateStatus, CertificateStore, CertificateStoreError,
    CertificateStoreResult, NewCertificate, Recipient,
};

const POISONED_MUTEX_MSG: &str = "CertificateStoreStub lock poisoned";

/// In-memory certificate store double. Owns every product by default;
/// call [`CertificateStoreStub::restrict_products`] to test ownership
/// rejection, and [`CertificateStoreStub::set_storage_down`] to simulate
/// a backend outage.
#[derive(Default, Clone)]
pub struct CertificateStoreStub {
    id_counter: Arc<AtomicU64>,
    certs: Arc<Mutex<HashMap<String, Certificate>>>,
    restricted: Arc<AtomicBool>,
    owned_products: Arc<Mutex<HashSet<(String, String)>>>,
    storage_down: Arc<AtomicBool>,
}

impl CertificateStoreStub {
    /// Stop owning every product; only pairs added via
    /// [`CertificateStoreStub::add_product`] pass the ownership check.
    pub fn restrict_products(&self) {
        self.restricted.store(true, Ordering::SeqCst);
    }

    pub fn add_product(&self, business_id: &str, product_id: &str) {
        self.owned_products
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .insert((business_id.to_string(), product_id.to_string()));
    }

    pub fn set_storage_down(&self, down: bool) {
        self.storage_down.store(down, Ordering::SeqCst);
    }

    pub fn certificate(&self, id: &str) -> Option<Certificate> {
        self.certs
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .get(id)
            .cloned()
    }

    pub fn certificate_count(&self) -> usize {
        self.certs.lock().expect(POISONED_MUTEX_MSG).len()
    }

    /// Seeds an existing minted certificate, for duplicate-detection
    /// tests.
    pub fn seed_certificate(
        &self,
        business_id: &str,
        product_id: &str,
        recipient: Recipient,
    ) -> String {
        let id = self.next_id();
        let cert = Certificate {
            id: id.clone(),
            business_id: business_id.to_string(),
            product_id: product_id.to_string(),
            recipient,
            token_id: Some(format!("seed-{}", id)),
            status: CertificateStatus::Minted,
            transfer_attempts: 0,
            transfer_failed: false,
            created_at_ms: stub_now_ms(),
        };
        self.certs
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .insert(id.clone(), cert);
        id
    }

    fn next_id(&self) -> String {
        format!("cert-{}", self.id_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_up(&self) -> CertificateStoreResult<()> {
        if self.storage_down.load(Ordering::SeqCst) {
            Err(CertificateStoreError::Storage(
                "store unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn with_cert<F>(&self, id: &str, f: F) -> CertificateStoreResult<()>
    where
        F: FnOnce(&mut Certificate),
    {
        self.check_up()?;
        let mut certs = self.certs.lock().expect(POISONED_MUTEX_MSG);
        let cert = certs
            .get_mut(id)
            .ok_or_else(|| CertificateStoreError::NotFound(id.to_string()))?;
        f(cert);
        Ok(())
    }
}

fn stub_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl CertificateStore for CertificateStoreStub {
    async fn create(
        &self,
        new: NewCertificate,
    ) -> CertificateStoreResult<Certificate> {
        self.check_up()?;
        let mut certs = self.certs.lock().expect(POISONED_MUTEX_MSG);
        let duplicate = certs.values().any(|c| {
            c.business_id == new.business_id
                && c.product_id == new.product_id
                && c.recipient == new.recipient
        });
        if duplicate {
            return Err(CertificateStoreError::Duplicate {
                product_id: new.product_id,
                recipient: new.recipient.address,
            });
        }
        let cert = Certificate {
            id: self.next_id(),
            business_id: new.business_id,
            product_id: new.product_id,
            recipient: new.recipient,
            token_id: new.token_id,
            status: new.status,
            transfer_attempts: 0,
            transfer_failed: false,
            created_at_ms: stub_now_ms(),
        };
        certs.insert(cert.id.clone(), cert.clone());
        Ok(cert)
    }

    async fn get(&self, id: &str) -> CertificateStoreResult<Certificate> {
        self.check_up()?;
        self.certificate(id)
            .ok_or_else(|| CertificateStoreError::NotFound(id.to_string()))
    }

    async fn find_by_product_and_recipient(
        &self,
        business_id: &str,
        product_id: &str,
        recipient: &Recipient,
    ) -> CertificateStoreResult<Option<Certificate>> {
        self.check_up()?;
        let certs = self.certs.lock().expect(POISONED_MUTEX_MSG);
        Ok(certs
            .values()
            .find(|c| {
                c.business_id == business_id
                    && c.product_id == product_id
                    && &c.recipient == recipient
            })
            .cloned())
    }

    async fn update_status(
        &self,
        id: &str,
        status: CertificateStatus,
    ) -> CertificateStoreResult<()> {
        self.with_cert(id, |c| c.status = status)
    }

    async fn record_transfer_attempt(
        &self,
        id: &str,
    ) -> CertificateStoreResult<()> {
        self.with_cert(id, |c| c.transfer_attempts += 1)
    }

    async fn set_transfer_failed(
        &self,
        id: &str,
    ) -> CertificateStoreResult<()> {
        self.with_cert(id, |c| c.transfer_failed = true)
    }

    async fn business_owns_product(
        &self,
        business_id: &str,
        product_id: &str,
    ) -> CertificateStoreResult<bool> {
        self.check_up()?;
        if !self.restricted.load(Ordering::SeqCst) {
            return Ok(true);
        }
        Ok(self
            .owned_products
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .contains(&(business_id.to_string(), product_id.to_string())))
    }
}
