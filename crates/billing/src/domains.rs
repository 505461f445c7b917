//! Domain deletion
//!
//! Removing a domain is more than deleting a row: custom domains also carry
//! a TLS certificate on the hosting platform, and routing caches the
//! hostname. `HostedDomainDeleter` does all three in one call.

use std::sync::Arc;

use async_trait::async_trait;
use pagecraft_shared::types::DomainKind;
use uuid::Uuid;

use crate::cache::{host_key, invalidate_best_effort, CacheInvalidator};
use crate::error::{BillingError, BillingResult};
use crate::fly::FlyClient;
use crate::store::BillingStore;

/// Deletes one domain on behalf of its workspace owner
#[async_trait]
pub trait DomainDeleter: Send + Sync {
    async fn delete(&self, owner_id: Uuid, domain_id: Uuid) -> BillingResult<()>;
}

/// Production deleter: verify ownership, tear down the certificate, drop the row
pub struct HostedDomainDeleter {
    store: Arc<dyn BillingStore>,
    fly: Option<FlyClient>,
    cache: Arc<dyn CacheInvalidator>,
}

impl HostedDomainDeleter {
    pub fn new(
        store: Arc<dyn BillingStore>,
        fly: Option<FlyClient>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self { store, fly, cache }
    }
}

#[async_trait]
impl DomainDeleter for HostedDomainDeleter {
    async fn delete(&self, owner_id: Uuid, domain_id: Uuid) -> BillingResult<()> {
        let domain = self
            .store
            .get_domain(domain_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("domain {}", domain_id)))?;

        let workspace = self
            .store
            .get_workspace(domain.workspace_id)
            .await?
            .ok_or(BillingError::WorkspaceNotFound(domain.workspace_id))?;

        if workspace.owner_id != owner_id {
            return Err(BillingError::InvalidInput(format!(
                "domain {} does not belong to user {}",
                domain_id, owner_id
            )));
        }

        // Certificate teardown failures never block the row deletion
        if domain.kind == DomainKind::CustomDomain {
            if let Some(fly) = &self.fly {
                if let Err(e) = fly.delete_certificate(&domain.hostname).await {
                    tracing::warn!(
                        domain_id = %domain_id,
                        hostname = %domain.hostname,
                        error = %BillingError::DomainTeardown(e),
                        "Certificate teardown failed - non-fatal"
                    );
                }
            }
        }

        if !self.store.delete_domain(domain_id).await? {
            tracing::debug!(domain_id = %domain_id, "Domain row already removed");
        }

        invalidate_best_effort(self.cache.as_ref(), &host_key(&domain.hostname)).await;

        tracing::info!(
            domain_id = %domain_id,
            workspace_id = %domain.workspace_id,
            hostname = %domain.hostname,
            "Deleted domain"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::NoopCacheInvalidator;
    use crate::store::InMemoryBillingStore;
    use pagecraft_shared::types::{Domain, PlanTier, Workspace, WorkspaceStatus};
    use time::OffsetDateTime;

    async fn seeded() -> (Arc<InMemoryBillingStore>, Uuid, Uuid) {
        let store = Arc::new(InMemoryBillingStore::new());
        let owner_id = Uuid::new_v4();
        let workspace_id = Uuid::new_v4();
        store
            .insert_workspace(Workspace {
                id: workspace_id,
                owner_id,
                name: "Main".to_string(),
                plan: PlanTier::Basic,
                is_protected: false,
                status: WorkspaceStatus::Active,
                created_at: OffsetDateTime::now_utc(),
            })
            .await;
        let domain_id = Uuid::new_v4();
        store
            .insert_domain(Domain {
                id: domain_id,
                workspace_id,
                hostname: "shop.example.com".to_string(),
                kind: DomainKind::CustomDomain,
                created_at: OffsetDateTime::now_utc(),
            })
            .await;
        (store, owner_id, domain_id)
    }

    #[tokio::test]
    async fn test_delete_removes_row_without_fly() {
        let (store, owner_id, domain_id) = seeded().await;
        let deleter = HostedDomainDeleter::new(store.clone(), None, Arc::new(NoopCacheInvalidator));

        deleter.delete(owner_id, domain_id).await.unwrap();
        assert!(store.domain(domain_id).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_rejects_other_owner() {
        let (store, _, domain_id) = seeded().await;
        let deleter = HostedDomainDeleter::new(store.clone(), None, Arc::new(NoopCacheInvalidator));

        let result = deleter.delete(Uuid::new_v4(), domain_id).await;
        assert!(matches!(result, Err(BillingError::InvalidInput(_))));
        assert!(store.domain(domain_id).await.is_some());
    }
}
