//! Extra admin seat add-ons
//!
//! Excess memberships are deleted newest-first. The owner is never a
//! candidate: the store filters them out by role and by the workspace's
//! owner id.

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

pub struct MemberHandler {
    store: Arc<dyn BillingStore>,
}

impl MemberHandler {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResourceHandler for MemberHandler {
    fn addon_types(&self) -> &'static [AddonType] {
        &[AddonType::ExtraAdminSeat]
    }

    async fn plan(&self, addon: &Addon, now: OffsetDateTime) -> BillingResult<DowngradePlan> {
        let workspace = resolve_workspace(self.store.as_ref(), addon).await?;
        let allowed =
            allowance_without(self.store.as_ref(), addon, PlanContext::new(workspace.plan), now)
                .await?;
        let members = self
            .store
            .list_removable_members(workspace.id, workspace.owner_id)
            .await?;

        let group = group_from(workspace.id, allowed, members, |m| DowngradeTarget {
            id: m.id,
            label: m.user_id.to_string(),
            created_at: m.joined_at,
        });

        Ok(DowngradePlan {
            addon_id: addon.id,
            addon_type: addon.addon_type,
            owner_id: workspace.owner_id,
            groups: vec![group],
        })
    }

    async fn downgrade(&self, plan: &DowngradePlan, target: &DowngradeTarget) -> BillingResult<()> {
        if !self.store.delete_member(target.id).await? {
            tracing::debug!(member_id = %target.id, "Membership already removed");
        }
        tracing::info!(
            addon_id = %plan.addon_id,
            member_id = %target.id,
            user_id = %target.label,
            "Removed workspace member"
        );
        Ok(())
    }

    fn describe(&self, affected: u32) -> String {
        format!("Removed {}", plural(affected, "team member", "team members"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use crate::testing::fixtures;
    use pagecraft_shared::types::{MemberRole, PlanTier};
    use time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_owner_row_is_never_selected() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let owner = fixtures::user(PlanTier::Free);
        let ws = fixtures::workspace(owner.id, PlanTier::Free, now - Duration::days(90));
        store.insert_workspace(ws.clone()).await;

        // An owner row that joined last, plus a stray admin-role row for the owner
        let owner_row = fixtures::member(ws.id, owner.id, MemberRole::Owner, now);
        let owner_as_admin = fixtures::member(ws.id, owner.id, MemberRole::Admin, now);
        let admin = fixtures::member(ws.id, Uuid::new_v4(), MemberRole::Admin, now - Duration::days(1));
        for m in [&owner_row, &owner_as_admin, &admin] {
            store.insert_member(m.clone()).await;
        }

        // Free has no admin seats, so every removable member goes
        let addon = fixtures::expired_addon(AddonType::ExtraAdminSeat, owner.id, Some(ws.id), 1, now);
        let outcome = MemberHandler::new(store.clone()).handle(&addon, now).await.unwrap();

        assert_eq!(outcome.affected_ids, vec![admin.id]);
        assert!(store.member(owner_row.id).await.is_some());
        assert!(store.member(owner_as_admin.id).await.is_some());
        assert!(store.member(admin.id).await.is_none());
    }
}
