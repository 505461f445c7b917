//! Pagecraft add-on expiration engine
//!
//! Withdraws the quota granted by expired add-ons and brings resource
//! counts back within the remaining allowance. Three entry points, each run
//! on its own schedule:
//!
//! - `mark_expired_items`: flip lapsed subscriptions and add-ons to expired
//! - `send_warning_emails`: 7/3/1 day expiry warnings, each sent once
//! - `process_expired_addons`: downgrade excess resources for expired add-ons
//!
//! None of them return errors; each returns a serializable summary.

pub mod allocation;
pub mod cache;
pub mod domains;
pub mod email;
pub mod error;
pub mod expiration;
pub mod fly;
pub mod handlers;
pub mod processor;
pub mod store;
pub mod summary;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod warnings;

use std::sync::Arc;

use sqlx::PgPool;

pub use allocation::{calculate_total_allocation, PlanContext};
pub use cache::{CacheInvalidator, NoopCacheInvalidator};
pub use domains::{DomainDeleter, HostedDomainDeleter};
pub use email::{AddonEmailData, BillingEmailService, EmailConfig, EmailTemplate, Notifier};
pub use error::{BillingError, BillingResult};
pub use expiration::ExpirationMarker;
pub use fly::FlyClient;
pub use handlers::{DowngradePlan, HandlerOutcome, HandlerRegistry, ResourceHandler};
pub use processor::ExpirationProcessor;
pub use store::{BillingStore, InMemoryBillingStore, PgBillingStore};
pub use summary::{MarkSummary, ProcessingSummary, WarningSummary};
pub use warnings::WarningScheduler;

/// The three scheduled entry points wired to shared collaborators
pub struct ExpirationService {
    pub marker: ExpirationMarker,
    pub warnings: WarningScheduler,
    pub processor: ExpirationProcessor,
}

impl ExpirationService {
    /// Wire the engine from its collaborators
    pub fn new(
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn Notifier>,
        domains: Arc<dyn DomainDeleter>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let handlers = HandlerRegistry::standard(store.clone(), domains, cache);
        Self {
            marker: ExpirationMarker::new(store.clone()),
            warnings: WarningScheduler::new(store.clone(), notifier.clone()),
            processor: ExpirationProcessor::new(store, handlers, notifier),
        }
    }

    /// Production wiring: Postgres store, Resend email, Fly.io certificate teardown
    pub fn postgres(
        pool: PgPool,
        email: EmailConfig,
        fly: Option<FlyClient>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let store: Arc<dyn BillingStore> = Arc::new(PgBillingStore::new(pool));
        let domains = Arc::new(HostedDomainDeleter::new(store.clone(), fly, cache.clone()));
        Self::new(store, Arc::new(BillingEmailService::new(email)), domains, cache)
    }

    pub async fn mark_expired_items(&self) -> MarkSummary {
        self.marker.mark_expired_items().await
    }

    pub async fn send_warning_emails(&self) -> WarningSummary {
        self.warnings.send_warning_emails().await
    }

    pub async fn process_expired_addons(&self) -> ProcessingSummary {
        self.processor.process_expired_addons().await
    }
}
