//! Extra subdomain and custom domain add-ons
//!
//! Excess domains are removed through the `DomainDeleter`, one at a time.
//! A failed deletion does not stop the others and nothing is rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use pagecraft_shared::types::{Addon, AddonType, DomainKind};
use time::OffsetDateTime;

use super::{
    allowance_without, group_from, plural, resolve_workspace, DowngradePlan, DowngradeTarget,
    ResourceHandler,
};
use crate::allocation::PlanContext;
use crate::domains::DomainDeleter;
use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

pub struct DomainHandler {
    store: Arc<dyn BillingStore>,
    deleter: Arc<dyn DomainDeleter>,
}

impl DomainHandler {
    pub fn new(store: Arc<dyn BillingStore>, deleter: Arc<dyn DomainDeleter>) -> Self {
        Self { store, deleter }
    }
}

fn domain_kind(addon_type: AddonType) -> BillingResult<DomainKind> {
    match addon_type {
        AddonType::ExtraSubdomain => Ok(DomainKind::Subdomain),
        AddonType::ExtraCustomDomain => Ok(DomainKind::CustomDomain),
        other => Err(BillingError::UnsupportedAddonType(other.to_string())),
    }
}

#[async_trait]
impl ResourceHandler for DomainHandler {
    fn addon_types(&self) -> &'static [AddonType] {
        &[AddonType::ExtraSubdomain, AddonType::ExtraCustomDomain]
    }

    async fn plan(&self, addon: &Addon, now: OffsetDateTime) -> BillingResult<DowngradePlan> {
        let kind = domain_kind(addon.addon_type)?;
        let workspace = resolve_workspace(self.store.as_ref(), addon).await?;

        let plan_context = PlanContext::protected(workspace.plan, workspace.is_protected);
        let allowed = allowance_without(self.store.as_ref(), addon, plan_context, now).await?;
        let domains = self.store.list_domains(workspace.id, kind).await?;

        let group = group_from(workspace.id, allowed, domains, |d| DowngradeTarget {
            id: d.id,
            label: d.hostname,
            created_at: d.created_at,
        });

        Ok(DowngradePlan {
            addon_id: addon.id,
            addon_type: addon.addon_type,
            owner_id: workspace.owner_id,
            groups: vec![group],
        })
    }

    async fn downgrade(&self, plan: &DowngradePlan, target: &DowngradeTarget) -> BillingResult<()> {
        self.deleter.delete(plan.owner_id, target.id).await?;
        tracing::info!(
            addon_id = %plan.addon_id,
            domain_id = %target.id,
            hostname = %target.label,
            "Removed excess domain"
        );
        Ok(())
    }

    fn describe(&self, affected: u32) -> String {
        format!("Removed {}", plural(affected, "domain", "domains"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use crate::testing::{fixtures, ScriptedDomainDeleter};
    use pagecraft_shared::types::PlanTier;
    use time::Duration;

    #[tokio::test]
    async fn test_failed_deletion_does_not_block_the_rest() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let deleter = Arc::new(ScriptedDomainDeleter::new(store.clone()));
        let owner = fixtures::user(PlanTier::Free);
        let ws = fixtures::workspace(owner.id, PlanTier::Free, now - Duration::days(60));
        store.insert_workspace(ws.clone()).await;

        let d1 = fixtures::domain(ws.id, DomainKind::Subdomain, now - Duration::days(3));
        let d2 = fixtures::domain(ws.id, DomainKind::Subdomain, now - Duration::days(2));
        let d3 = fixtures::domain(ws.id, DomainKind::Subdomain, now - Duration::days(1));
        for d in [&d1, &d2, &d3] {
            store.insert_domain(d.clone()).await;
        }
        deleter.fail_for(d2.id).await;

        let addon = fixtures::expired_addon(AddonType::ExtraSubdomain, owner.id, Some(ws.id), 2, now);
        let handler = DomainHandler::new(store.clone(), deleter.clone());
        let outcome = handler.handle(&addon, now).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.resources_affected, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].id, Some(d2.id));
        assert!(store.domain(d1.id).await.is_some());
        assert!(store.domain(d2.id).await.is_some());
        assert!(store.domain(d3.id).await.is_none());
        assert!(deleter.calls().await.iter().all(|(o, _)| *o == owner.id));
    }

    #[tokio::test]
    async fn test_protected_workspace_keeps_extra_custom_domain() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let deleter = Arc::new(ScriptedDomainDeleter::new(store.clone()));
        let owner = fixtures::user(PlanTier::Basic);
        let mut ws = fixtures::workspace(owner.id, PlanTier::Basic, now - Duration::days(60));
        ws.is_protected = true;
        store.insert_workspace(ws.clone()).await;

        let d1 = fixtures::domain(ws.id, DomainKind::CustomDomain, now - Duration::days(3));
        let d2 = fixtures::domain(ws.id, DomainKind::CustomDomain, now - Duration::days(2));
        store.insert_domain(d1.clone()).await;
        store.insert_domain(d2.clone()).await;

        let addon =
            fixtures::expired_addon(AddonType::ExtraCustomDomain, owner.id, Some(ws.id), 1, now);
        let plan = DomainHandler::new(store, deleter).plan(&addon, now).await.unwrap();

        assert_eq!(plan.groups[0].allowed, 2);
        assert!(plan.is_noop());
    }

    #[tokio::test]
    async fn test_addon_without_workspace_fails() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let deleter = Arc::new(ScriptedDomainDeleter::new(store.clone()));
        let addon =
            fixtures::expired_addon(AddonType::ExtraSubdomain, uuid::Uuid::new_v4(), None, 1, now);

        let result = DomainHandler::new(store, deleter).handle(&addon, now).await;
        assert!(matches!(result, Err(BillingError::InvalidInput(_))));
    }
}
