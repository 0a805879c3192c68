mod certificate_store_stub;
mod plan_lookup_stub;

pub use certificate_store_stub::CertificateStoreStub;
pub use plan_lookup_stub::PlanLookupStub;
