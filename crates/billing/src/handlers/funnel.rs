//! Extra funnel (website) add-ons
//!
//! Only live funnels count. The newest excess are archived.

use std::sync::Arc;

use async_trait::async_trait;
use pagecraft_shared::types::{Addon, AddonType};
use time::OffsetDateTime;

use super::{
    allowance_without, group_from, plural, resolve_workspace, DowngradePlan, DowngradeTarget,
    ResourceHandler,
};
use crate::allocation::PlanContext;
use crate::error::BillingResult;
use crate::store::BillingStore;

pub struct FunnelHandler {
    store: Arc<dyn BillingStore>,
}

impl FunnelHandler {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResourceHandler for FunnelHandler {
    fn addon_types(&self) -> &'static [AddonType] {
        &[AddonType::ExtraFunnel]
    }

    async fn plan(&self, addon: &Addon, now: OffsetDateTime) -> BillingResult<DowngradePlan> {
        let workspace = resolve_workspace(self.store.as_ref(), addon).await?;
        let allowed =
            allowance_without(self.store.as_ref(), addon, PlanContext::new(workspace.plan), now)
                .await?;
        let funnels = self.store.list_live_funnels(workspace.id).await?;

        let group = group_from(workspace.id, allowed, funnels, |f| DowngradeTarget {
            id: f.id,
            label: f.name,
            created_at: f.created_at,
        });

        Ok(DowngradePlan {
            addon_id: addon.id,
            addon_type: addon.addon_type,
            owner_id: workspace.owner_id,
            groups: vec![group],
        })
    }

    async fn downgrade(&self, plan: &DowngradePlan, target: &DowngradeTarget) -> BillingResult<()> {
        self.store.archive_funnel(target.id).await?;
        tracing::info!(addon_id = %plan.addon_id, funnel_id = %target.id, "Archived funnel");
        Ok(())
    }

    fn describe(&self, affected: u32) -> String {
        format!("Archived {}", plural(affected, "website", "websites"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use crate::testing::fixtures;
    use pagecraft_shared::types::{AddonStatus, FunnelStatus, PlanTier};
    use time::Duration;

    #[tokio::test]
    async fn test_in_force_sibling_addon_raises_allowance() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let owner = fixtures::user(PlanTier::Free);
        let ws = fixtures::workspace(owner.id, PlanTier::Free, now - Duration::days(90));
        store.insert_workspace(ws.clone()).await;

        let funnels: Vec<_> = (0..4)
            .map(|i| fixtures::funnel(ws.id, now - Duration::days(10 - i)))
            .collect();
        for f in &funnels {
            store.insert_funnel(f.clone()).await;
        }

        // Cancelled but not yet ended: still grants quota
        let mut sibling =
            fixtures::addon(AddonType::ExtraFunnel, owner.id, Some(ws.id), 2, now + Duration::days(5));
        sibling.status = AddonStatus::Cancelled;
        store.insert_addon(sibling).await;

        let expired = fixtures::expired_addon(AddonType::ExtraFunnel, owner.id, Some(ws.id), 3, now);
        store.insert_addon(expired.clone()).await;

        let outcome = FunnelHandler::new(store.clone()).handle(&expired, now).await.unwrap();

        // 1 base + 2 from the sibling = 3 kept
        assert_eq!(outcome.resources_affected, 1);
        assert_eq!(outcome.affected_ids, vec![funnels[3].id]);
        for f in &funnels[..3] {
            assert_eq!(store.funnel(f.id).await.unwrap().status, FunnelStatus::Live);
        }
        assert_eq!(store.funnel(funnels[3].id).await.unwrap().status, FunnelStatus::Archived);
    }

    #[tokio::test]
    async fn test_within_allowance_is_a_noop() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let owner = fixtures::user(PlanTier::Pro);
        let ws = fixtures::workspace(owner.id, PlanTier::Pro, now - Duration::days(90));
        store.insert_workspace(ws.clone()).await;
        store.insert_funnel(fixtures::funnel(ws.id, now - Duration::days(1))).await;

        let expired = fixtures::expired_addon(AddonType::ExtraFunnel, owner.id, Some(ws.id), 1, now);
        let outcome = FunnelHandler::new(store).handle(&expired, now).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.resources_affected, 0);
        assert_eq!(outcome.details.as_deref(), Some("Archived 0 websites"));
    }
}
