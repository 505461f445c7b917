//! Extra page add-ons
//!
//! The page quota applies per funnel. Within each funnel only pages with a
//! public link count; the newest excess lose their link and keep their content.

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

pub struct PageHandler {
    store: Arc<dyn BillingStore>,
}

impl PageHandler {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResourceHandler for PageHandler {
    fn addon_types(&self) -> &'static [AddonType] {
        &[AddonType::ExtraPage]
    }

    async fn plan(&self, addon: &Addon, now: OffsetDateTime) -> BillingResult<DowngradePlan> {
        let workspace = resolve_workspace(self.store.as_ref(), addon).await?;
        let allowed =
            allowance_without(self.store.as_ref(), addon, PlanContext::new(workspace.plan), now)
                .await?;

        let mut groups = Vec::new();
        for funnel in self.store.list_funnels(workspace.id).await? {
            let pages = self.store.list_linked_pages(funnel.id).await?;
            groups.push(group_from(funnel.id, allowed, pages, |p| DowngradeTarget {
                id: p.id,
                label: p.name,
                created_at: p.created_at,
            }));
        }

        Ok(DowngradePlan {
            addon_id: addon.id,
            addon_type: addon.addon_type,
            owner_id: workspace.owner_id,
            groups,
        })
    }

    async fn downgrade(&self, plan: &DowngradePlan, target: &DowngradeTarget) -> BillingResult<()> {
        self.store.unlink_page(target.id).await?;
        tracing::debug!(addon_id = %plan.addon_id, page_id = %target.id, "Unlinked page");
        Ok(())
    }

    fn describe(&self, affected: u32) -> String {
        format!("Unpublished {}", plural(affected, "page", "pages"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use crate::testing::fixtures;
    use pagecraft_shared::types::PlanTier;
    use time::Duration;

    #[tokio::test]
    async fn test_each_funnel_is_reconciled_independently() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let owner = fixtures::user(PlanTier::Free);
        let ws = fixtures::workspace(owner.id, PlanTier::Free, now - Duration::days(90));
        store.insert_workspace(ws.clone()).await;

        // Free allows 10 linked pages per funnel
        let over = fixtures::funnel(ws.id, now - Duration::days(20));
        let under = fixtures::funnel(ws.id, now - Duration::days(10));
        store.insert_funnel(over.clone()).await;
        store.insert_funnel(under.clone()).await;

        let mut over_pages = Vec::new();
        for i in 0..12 {
            let page = fixtures::page(over.id, now - Duration::hours(100 - i), true);
            store.insert_page(page.clone()).await;
            over_pages.push(page);
        }
        for i in 0..4 {
            store.insert_page(fixtures::page(under.id, now - Duration::hours(50 - i), true)).await;
        }
        // Unlinked pages never count
        store.insert_page(fixtures::page(under.id, now, false)).await;

        let addon = fixtures::expired_addon(AddonType::ExtraPage, owner.id, Some(ws.id), 5, now);
        let outcome = PageHandler::new(store.clone()).handle(&addon, now).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.resources_affected, 2);
        for page in &over_pages[..10] {
            assert!(store.page(page.id).await.unwrap().linking_id.is_some());
        }
        for page in &over_pages[10..] {
            assert!(store.page(page.id).await.unwrap().linking_id.is_none());
        }
    }
}
