use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use certforge_core::Recipient;

use crate::{
    ChainRelayer, ChainRelayerError, ChainRelayerResult, MintReceipt,
    TransferReceipt,
};

const POISONED_MUTEX_MSG: &str = "ChainRelayerStub lock poisoned";

/// In-memory relayer double for tests: scripted failures and hangs per
/// recipient address, optional uniform latency, and an in-flight
/// high-water mark so tests can assert the concurrency ceiling.
#[derive(Default, Clone)]
pub struct ChainRelayerStub {
    token_counter: Arc<AtomicU64>,
    latency: Option<Duration>,
    fail_addresses: Arc<Mutex<HashMap<String, ChainRelayerError>>>,
    hang_addresses: Arc<Mutex<HashSet<String>>>,
    minted: Arc<Mutex<Vec<(String, String)>>>,
    transferred: Arc<Mutex<Vec<(String, String)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ChainRelayerStub {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    /// Scripts a chain failure for every mint targeting `address`.
    pub fn fail_address(&self, address: &str, err: ChainRelayerError) {
        self.fail_addresses
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .insert(address.to_string(), err);
    }

    /// Scripts a never-completing mint for `address`, used to exercise
    /// the per-item timeout.
    pub fn hang_address(&self, address: &str) {
        self.hang_addresses
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .insert(address.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_addresses
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .clear();
        self.hang_addresses
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .clear();
    }

    /// Addresses minted so far, in completion order.
    pub fn minted_addresses(&self) -> Vec<String> {
        self.minted
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .iter()
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    pub fn mint_count(&self) -> usize {
        self.minted.lock().expect(POISONED_MUTEX_MSG).len()
    }

    pub fn transfer_count(&self) -> usize {
        self.transferred.lock().expect(POISONED_MUTEX_MSG).len()
    }

    /// The largest number of calls that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Relaxed)
    }

    fn enter(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn simulate_call(&self, address: &str) -> ChainRelayerResult<()> {
        let hang = self
            .hang_addresses
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .contains(address);
        if hang {
            // Long enough that any reasonable test timeout fires first
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self
            .fail_addresses
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .get(address)
            .cloned();
        match scripted {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChainRelayer for ChainRelayerStub {
    async fn mint(
        &self,
        recipient: &Recipient,
        _product_id: &str,
        _metadata: &str,
    ) -> ChainRelayerResult<MintReceipt> {
        self.enter();
        let result = self.simulate_call(&recipient.address).await;
        self.exit();
        result?;

        let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let receipt = MintReceipt {
            token_id: format!("tok-{}", n),
            tx_hash: format!("0x{:064x}", n),
        };
        self.minted
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .push((recipient.address.clone(), receipt.token_id.clone()));
        Ok(receipt)
    }

    async fn transfer(
        &self,
        token_id: &str,
        to_wallet: &str,
    ) -> ChainRelayerResult<TransferReceipt> {
        self.enter();
        let result = self.simulate_call(to_wallet).await;
        self.exit();
        result?;

        let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.transferred
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .push((token_id.to_string(), to_wallet.to_string()));
        Ok(TransferReceipt {
            tx_hash: format!("0x{:064x}", n),
        })
    }
}
