//! Persistence for the expiration engine
//!
//! `BillingStore` is the only way the engine reads or mutates state.
//! `PgBillingStore` is the production implementation; `InMemoryBillingStore`
//! backs tests and local dry runs.
//!
//! All list methods return rows ordered oldest-first (creation time, then id)
//! so callers can take the newest excess from the end of the list.

mod memory;
mod postgres;

pub use memory::InMemoryBillingStore;
pub use postgres::PgBillingStore;

use async_trait::async_trait;
use pagecraft_shared::types::{
    Addon, AddonScope, AddonType, Domain, DomainKind, Funnel, Page, ReminderState, Subscription,
    User, Workspace, WorkspaceMember,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Selects the add-ons that still grant quota in one scope
#[derive(Debug, Clone, Copy)]
pub struct InForceQuery {
    pub addon_type: AddonType,
    pub user_id: Uuid,
    /// Required for workspace-scoped types, ignored for user-scoped ones
    pub workspace_id: Option<Uuid>,
    /// The add-on being reconciled never counts towards its own replacement allowance
    pub exclude_addon_id: Uuid,
    pub now: OffsetDateTime,
}

impl InForceQuery {
    /// Build the query for every other add-on sharing `addon`'s type and scope
    pub fn siblings_of(addon: &Addon, now: OffsetDateTime) -> Self {
        Self {
            addon_type: addon.addon_type,
            user_id: addon.user_id,
            workspace_id: addon.workspace_id,
            exclude_addon_id: addon.id,
            now,
        }
    }

    /// Whether `candidate` is counted by this query
    pub fn matches(&self, candidate: &Addon) -> bool {
        if candidate.id == self.exclude_addon_id
            || candidate.addon_type != self.addon_type
            || !candidate.is_in_force(self.now)
        {
            return false;
        }
        match self.addon_type.scope() {
            AddonScope::User => candidate.user_id == self.user_id && candidate.workspace_id.is_none(),
            AddonScope::Workspace => {
                self.workspace_id.is_some() && candidate.workspace_id == self.workspace_id
            }
        }
    }
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Expiration marking
    // -------------------------------------------------------------------------

    /// Subscriptions whose end date has passed but are not yet expired
    async fn find_lapsed_subscriptions(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>>;

    /// Move a subscription to expired. Returns false if it already was.
    async fn expire_subscription(&self, subscription_id: Uuid) -> BillingResult<bool>;

    /// Add-ons whose end date has passed but are not yet expired
    async fn find_lapsed_addons(&self, now: OffsetDateTime) -> BillingResult<Vec<Addon>>;

    /// Move an add-on to expired. Returns false if it already was.
    async fn expire_addon(&self, addon_id: Uuid) -> BillingResult<bool>;

    // -------------------------------------------------------------------------
    // Add-ons
    // -------------------------------------------------------------------------

    async fn get_addon(&self, addon_id: Uuid) -> BillingResult<Option<Addon>>;

    /// Non-active add-ons ending in `[from, until)`
    async fn find_addons_ending_between(
        &self,
        from: OffsetDateTime,
        until: OffsetDateTime,
    ) -> BillingResult<Vec<Addon>>;

    /// Expired add-ons whose downgrade has not been applied yet
    async fn find_unprocessed_expired_addons(&self) -> BillingResult<Vec<Addon>>;

    /// Add-ons still granting quota for the query's type and scope
    async fn find_in_force_addons(&self, query: InForceQuery) -> BillingResult<Vec<Addon>>;

    /// Overwrite the reminder flags (read-modify-write; single writer only)
    async fn save_reminder_state(&self, addon_id: Uuid, state: ReminderState) -> BillingResult<()>;

    /// Set `resources_processed`. Returns false if it was already set.
    async fn mark_resources_processed(&self, addon_id: Uuid) -> BillingResult<bool>;

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<User>>;

    async fn get_workspace(&self, workspace_id: Uuid) -> BillingResult<Option<Workspace>>;

    // -------------------------------------------------------------------------
    // Workspaces
    // -------------------------------------------------------------------------

    /// The owner's workspaces that are not suspended
    async fn list_unsuspended_workspaces(&self, owner_id: Uuid) -> BillingResult<Vec<Workspace>>;

    /// Suspend a workspace and archive its live funnels in one transaction.
    /// Either both writes commit or neither does. Returns the number of
    /// funnels archived.
    async fn suspend_workspace(&self, workspace_id: Uuid) -> BillingResult<u64>;

    // -------------------------------------------------------------------------
    // Funnels and pages
    // -------------------------------------------------------------------------

    /// Every funnel in the workspace, live or archived
    async fn list_funnels(&self, workspace_id: Uuid) -> BillingResult<Vec<Funnel>>;

    async fn list_live_funnels(&self, workspace_id: Uuid) -> BillingResult<Vec<Funnel>>;

    async fn archive_funnel(&self, funnel_id: Uuid) -> BillingResult<()>;

    /// Pages in the funnel that currently have a public link
    async fn list_linked_pages(&self, funnel_id: Uuid) -> BillingResult<Vec<Page>>;

    /// Clear the page's public link; content is untouched
    async fn unlink_page(&self, page_id: Uuid) -> BillingResult<()>;

    // -------------------------------------------------------------------------
    // Domains
    // -------------------------------------------------------------------------

    async fn list_domains(&self, workspace_id: Uuid, kind: DomainKind) -> BillingResult<Vec<Domain>>;

    async fn get_domain(&self, domain_id: Uuid) -> BillingResult<Option<Domain>>;

    /// Returns false if the row was already gone
    async fn delete_domain(&self, domain_id: Uuid) -> BillingResult<bool>;

    // -------------------------------------------------------------------------
    // Members
    // -------------------------------------------------------------------------

    /// Active members that can lose their seat. The owner is never returned,
    /// whether identified by role or by the workspace's owner id.
    async fn list_removable_members(
        &self,
        workspace_id: Uuid,
        owner_id: Uuid,
    ) -> BillingResult<Vec<WorkspaceMember>>;

    /// Returns false if the row was already gone
    async fn delete_member(&self, member_id: Uuid) -> BillingResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecraft_shared::types::AddonStatus;
    use time::Duration;

    fn addon(addon_type: AddonType, user_id: Uuid, workspace_id: Option<Uuid>) -> Addon {
        let now = OffsetDateTime::now_utc();
        Addon {
            id: Uuid::new_v4(),
            user_id,
            workspace_id,
            addon_type,
            quantity: 1,
            status: AddonStatus::Active,
            start_date: now - Duration::days(30),
            end_date: Some(now + Duration::days(30)),
            reminder_state: ReminderState::default(),
        }
    }

    #[test]
    fn test_in_force_query_excludes_the_reconciled_addon() {
        let user_id = Uuid::new_v4();
        let ws = Some(Uuid::new_v4());
        let target = addon(AddonType::ExtraFunnel, user_id, ws);
        let sibling = addon(AddonType::ExtraFunnel, user_id, ws);
        let query = InForceQuery::siblings_of(&target, OffsetDateTime::now_utc());

        assert!(!query.matches(&target));
        assert!(query.matches(&sibling));
    }

    #[test]
    fn test_in_force_query_respects_workspace_scope() {
        let user_id = Uuid::new_v4();
        let target = addon(AddonType::ExtraSubdomain, user_id, Some(Uuid::new_v4()));
        let other_workspace = addon(AddonType::ExtraSubdomain, user_id, Some(Uuid::new_v4()));
        let query = InForceQuery::siblings_of(&target, OffsetDateTime::now_utc());

        assert!(!query.matches(&other_workspace));
    }

    #[test]
    fn test_in_force_query_user_scope_ignores_workspace_addons() {
        let user_id = Uuid::new_v4();
        let target = addon(AddonType::ExtraWorkspace, user_id, None);
        let user_level = addon(AddonType::ExtraWorkspace, user_id, None);
        let attached = addon(AddonType::ExtraWorkspace, user_id, Some(Uuid::new_v4()));
        let someone_else = addon(AddonType::ExtraWorkspace, Uuid::new_v4(), None);
        let query = InForceQuery::siblings_of(&target, OffsetDateTime::now_utc());

        assert!(query.matches(&user_level));
        assert!(!query.matches(&attached));
        assert!(!query.matches(&someone_else));
    }

    #[test]
    fn test_in_force_query_skips_lapsed_addons() {
        let user_id = Uuid::new_v4();
        let ws = Some(Uuid::new_v4());
        let target = addon(AddonType::ExtraPage, user_id, ws);
        let mut lapsed = addon(AddonType::ExtraPage, user_id, ws);
        lapsed.end_date = Some(OffsetDateTime::now_utc() - Duration::hours(1));
        let query = InForceQuery::siblings_of(&target, OffsetDateTime::now_utc());

        assert!(!query.matches(&lapsed));
    }
}
