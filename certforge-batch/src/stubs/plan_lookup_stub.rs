use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use certforge_core::{CertificateStoreResult, SubscriptionPlanLookup};

const POISONED_MUTEX_MSG: &str = "PlanLookupStub lock poisoned";

/// Plan lookup double: every tenant is on `foundation` unless assigned.
#[derive(Clone)]
pub struct PlanLookupStub {
    default_plan: String,
    plans: Arc<Mutex<HashMap<String, String>>>,
}

impl Default for PlanLookupStub {
    fn default() -> Self {
        Self {
            default_plan: "foundation".to_string(),
            plans: Arc::default(),
        }
    }
}

impl PlanLookupStub {
    pub fn with_default_plan(plan: &str) -> Self {
        Self {
            default_plan: plan.to_string(),
            plans: Arc::default(),
        }
    }

    pub fn assign(&self, business_id: &str, plan: &str) {
        self.plans
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .insert(business_id.to_string(), plan.to_string());
    }
}

#[async_trait]
impl SubscriptionPlanLookup for PlanLookupStub {
    async fn plan_key(
        &self,
        business_id: &str,
    ) -> CertificateStoreResult<String> {
        Ok(self
            .plans
            .lock()
            .expect(POISONED_MUTEX_MSG)
            .get(business_id)
            .cloned()
            .unwrap_or_else(|| self.default_plan.clone()))
    }
}
