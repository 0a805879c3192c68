pub mod certificate;
pub mod error_kind;
pub mod options;
pub mod recipient;
pub mod store;

pub use certificate::{Certificate, CertificateStatus};
pub use error_kind::ErrorKind;
pub use options::BatchOptions;
pub use recipient::{validate_recipient, ContactMethod, Recipient};
pub use store::{
    CertificateStore, CertificateStoreError, CertificateStoreResult,
    NewCertificate, SubscriptionPlanLookup,
};
