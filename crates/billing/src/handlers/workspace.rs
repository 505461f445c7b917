//! Extra workspace add-ons
//!
//! Workspace add-ons belong to the user, not to a workspace. Excess
//! workspaces are suspended newest-first and their live funnels archived in
//! the same transaction.

use std::sync::Arc;

use async_trait::async_trait;
use pagecraft_shared::types::{Addon, AddonType};
use time::OffsetDateTime;

use super::{allowance_without, group_from, plural, DowngradePlan, DowngradeTarget, ResourceHandler};
use crate::allocation::PlanContext;
use crate::cache::{invalidate_best_effort, workspace_key, CacheInvalidator};
use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

pub struct WorkspaceHandler {
    store: Arc<dyn BillingStore>,
    cache: Arc<dyn CacheInvalidator>,
}

impl WorkspaceHandler {
    pub fn new(store: Arc<dyn BillingStore>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl ResourceHandler for WorkspaceHandler {
    fn addon_types(&self) -> &'static [AddonType] {
        &[AddonType::ExtraWorkspace]
    }

    async fn plan(&self, addon: &Addon, now: OffsetDateTime) -> BillingResult<DowngradePlan> {
        let user = self
            .store
            .get_user(addon.user_id)
            .await?
            .ok_or(BillingError::UserNotFound(addon.user_id))?;

        let allowed =
            allowance_without(self.store.as_ref(), addon, PlanContext::new(user.plan), now).await?;
        let workspaces = self.store.list_unsuspended_workspaces(user.id).await?;

        let group = group_from(user.id, allowed, workspaces, |ws| DowngradeTarget {
            id: ws.id,
            label: ws.name,
            created_at: ws.created_at,
        });

        Ok(DowngradePlan {
            addon_id: addon.id,
            addon_type: addon.addon_type,
            owner_id: user.id,
            groups: vec![group],
        })
    }

    async fn downgrade(&self, plan: &DowngradePlan, target: &DowngradeTarget) -> BillingResult<()> {
        let archived = self.store.suspend_workspace(target.id).await?;

        tracing::info!(
            addon_id = %plan.addon_id,
            workspace_id = %target.id,
            funnels_archived = archived,
            "Suspended workspace"
        );

        invalidate_best_effort(self.cache.as_ref(), &workspace_key(target.id)).await;
        Ok(())
    }

    fn describe(&self, affected: u32) -> String {
        format!("Suspended {}", plural(affected, "workspace", "workspaces"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use crate::testing::{fixtures, RecordingCacheInvalidator};
    use pagecraft_shared::types::{FunnelStatus, PlanTier, WorkspaceStatus};
    use time::Duration;

    #[tokio::test]
    async fn test_suspends_newest_workspaces_and_archives_funnels() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let cache = Arc::new(RecordingCacheInvalidator::failing());
        let user = fixtures::user(PlanTier::Free);
        store.insert_user(user.clone()).await;

        let oldest = fixtures::workspace(user.id, PlanTier::Free, now - Duration::days(30));
        let newer = fixtures::workspace(user.id, PlanTier::Free, now - Duration::days(10));
        let newest = fixtures::workspace(user.id, PlanTier::Free, now - Duration::days(1));
        for ws in [&oldest, &newer, &newest] {
            store.insert_workspace(ws.clone()).await;
        }
        let funnel = fixtures::funnel(newest.id, now - Duration::hours(5));
        store.insert_funnel(funnel.clone()).await;

        let addon = fixtures::expired_addon(AddonType::ExtraWorkspace, user.id, None, 2, now);
        let handler = WorkspaceHandler::new(store.clone(), cache.clone());
        let outcome = handler.handle(&addon, now).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.resources_affected, 2);
        assert_eq!(store.workspace(oldest.id).await.unwrap().status, WorkspaceStatus::Active);
        assert_eq!(store.workspace(newer.id).await.unwrap().status, WorkspaceStatus::Suspended);
        assert_eq!(store.workspace(newest.id).await.unwrap().status, WorkspaceStatus::Suspended);
        assert_eq!(store.funnel(funnel.id).await.unwrap().status, FunnelStatus::Archived);
        // Cache failures are swallowed
        assert_eq!(cache.keys().await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_user_is_a_lookup_error() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = WorkspaceHandler::new(store, Arc::new(RecordingCacheInvalidator::new()));
        let addon = fixtures::expired_addon(AddonType::ExtraWorkspace, uuid::Uuid::new_v4(), None, 1, now);

        let result = handler.handle(&addon, now).await;
        assert!(matches!(result, Err(BillingError::UserNotFound(_))));
    }
}
