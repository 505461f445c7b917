//! In-memory store for tests and local dry runs

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use pagecraft_shared::types::{
    Addon, AddonStatus, Domain, DomainKind, Funnel, FunnelStatus, MemberStatus, Page,
    ReminderState, Subscription, SubscriptionStatus, User, Workspace, WorkspaceMember,
    WorkspaceStatus,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BillingStore, InForceQuery};
use crate::error::{BillingError, BillingResult};

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    subscriptions: HashMap<Uuid, Subscription>,
    addons: HashMap<Uuid, Addon>,
    workspaces: HashMap<Uuid, Workspace>,
    funnels: HashMap<Uuid, Funnel>,
    pages: HashMap<Uuid, Page>,
    domains: HashMap<Uuid, Domain>,
    members: HashMap<Uuid, WorkspaceMember>,
    /// Writes touching these ids fail with a database error
    failing_writes: HashSet<Uuid>,
    /// Batch queries fail with a database error
    failing_reads: bool,
}

impl MemoryState {
    fn check_writable(&self, id: Uuid) -> BillingResult<()> {
        if self.failing_writes.contains(&id) {
            return Err(BillingError::Database(format!("write rejected for {}", id)));
        }
        Ok(())
    }

    fn check_readable(&self) -> BillingResult<()> {
        if self.failing_reads {
            return Err(BillingError::Database("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Sort oldest-first, breaking ties by id like the SQL queries do
fn oldest_first<T>(mut rows: Vec<T>, key: impl Fn(&T) -> (OffsetDateTime, Uuid)) -> Vec<T> {
    rows.sort_by_key(|row| key(row));
    rows
}

/// `BillingStore` over mutex-guarded maps
#[derive(Default)]
pub struct InMemoryBillingStore {
    state: Mutex<MemoryState>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .await
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub async fn insert_addon(&self, addon: Addon) {
        self.state.lock().await.addons.insert(addon.id, addon);
    }

    pub async fn insert_workspace(&self, workspace: Workspace) {
        self.state
            .lock()
            .await
            .workspaces
            .insert(workspace.id, workspace);
    }

    pub async fn insert_funnel(&self, funnel: Funnel) {
        self.state.lock().await.funnels.insert(funnel.id, funnel);
    }

    pub async fn insert_page(&self, page: Page) {
        self.state.lock().await.pages.insert(page.id, page);
    }

    pub async fn insert_domain(&self, domain: Domain) {
        self.state.lock().await.domains.insert(domain.id, domain);
    }

    pub async fn insert_member(&self, member: WorkspaceMember) {
        self.state.lock().await.members.insert(member.id, member);
    }

    /// Make every later write that touches `id` fail
    pub async fn fail_writes_for(&self, id: Uuid) {
        self.state.lock().await.failing_writes.insert(id);
    }

    /// Make the batch `find_*` queries fail until `clear_failures`
    pub async fn fail_reads(&self) {
        self.state.lock().await.failing_reads = true;
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.failing_reads = false;
        state.failing_writes.clear();
    }

    pub async fn subscription(&self, id: Uuid) -> Option<Subscription> {
        self.state.lock().await.subscriptions.get(&id).cloned()
    }

    pub async fn addon(&self, id: Uuid) -> Option<Addon> {
        self.state.lock().await.addons.get(&id).cloned()
    }

    pub async fn workspace(&self, id: Uuid) -> Option<Workspace> {
        self.state.lock().await.workspaces.get(&id).cloned()
    }

    pub async fn funnel(&self, id: Uuid) -> Option<Funnel> {
        self.state.lock().await.funnels.get(&id).cloned()
    }

    pub async fn page(&self, id: Uuid) -> Option<Page> {
        self.state.lock().await.pages.get(&id).cloned()
    }

    pub async fn domain(&self, id: Uuid) -> Option<Domain> {
        self.state.lock().await.domains.get(&id).cloned()
    }

    pub async fn member(&self, id: Uuid) -> Option<WorkspaceMember> {
        self.state.lock().await.members.get(&id).cloned()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn find_lapsed_subscriptions(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        let state = self.state.lock().await;
        state.check_readable()?;
        let mut lapsed: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.status != SubscriptionStatus::Expired)
            .filter(|s| s.end_date.is_some_and(|end| end < now))
            .cloned()
            .collect();
        lapsed.sort_by_key(|s| (s.end_date, s.id));
        Ok(lapsed)
    }

    async fn expire_subscription(&self, subscription_id: Uuid) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        state.check_writable(subscription_id)?;
        match state.subscriptions.get_mut(&subscription_id) {
            Some(s) if s.status != SubscriptionStatus::Expired => {
                s.status = SubscriptionStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_lapsed_addons(&self, now: OffsetDateTime) -> BillingResult<Vec<Addon>> {
        let state = self.state.lock().await;
        state.check_readable()?;
        let mut lapsed: Vec<Addon> = state
            .addons
            .values()
            .filter(|a| a.status != AddonStatus::Expired)
            .filter(|a| a.end_date.is_some_and(|end| end < now))
            .cloned()
            .collect();
        lapsed.sort_by_key(|a| (a.end_date, a.id));
        Ok(lapsed)
    }

    async fn expire_addon(&self, addon_id: Uuid) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        state.check_writable(addon_id)?;
        match state.addons.get_mut(&addon_id) {
            Some(a) if a.status != AddonStatus::Expired => {
                a.status = AddonStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_addon(&self, addon_id: Uuid) -> BillingResult<Option<Addon>> {
        Ok(self.state.lock().await.addons.get(&addon_id).cloned())
    }

    async fn find_addons_ending_between(
        &self,
        from: OffsetDateTime,
        until: OffsetDateTime,
    ) -> BillingResult<Vec<Addon>> {
        let state = self.state.lock().await;
        state.check_readable()?;
        let mut ending: Vec<Addon> = state
            .addons
            .values()
            .filter(|a| a.status != AddonStatus::Active)
            .filter(|a| a.end_date.is_some_and(|end| end >= from && end < until))
            .cloned()
            .collect();
        ending.sort_by_key(|a| (a.end_date, a.id));
        Ok(ending)
    }

    async fn find_unprocessed_expired_addons(&self) -> BillingResult<Vec<Addon>> {
        let state = self.state.lock().await;
        state.check_readable()?;
        let mut pending: Vec<Addon> = state
            .addons
            .values()
            .filter(|a| a.status == AddonStatus::Expired && !a.reminder_state.resources_processed)
            .cloned()
            .collect();
        pending.sort_by_key(|a| (a.end_date, a.id));
        Ok(pending)
    }

    async fn find_in_force_addons(&self, query: InForceQuery) -> BillingResult<Vec<Addon>> {
        let state = self.state.lock().await;
        let matching: Vec<Addon> = state
            .addons
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        Ok(oldest_first(matching, |a| (a.start_date, a.id)))
    }

    async fn save_reminder_state(&self, addon_id: Uuid, reminder: ReminderState) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        state.check_writable(addon_id)?;
        let addon = state
            .addons
            .get_mut(&addon_id)
            .ok_or_else(|| BillingError::NotFound(format!("Add-on not found: {}", addon_id)))?;
        addon.reminder_state = reminder;
        Ok(())
    }

    async fn mark_resources_processed(&self, addon_id: Uuid) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        state.check_writable(addon_id)?;
        match state.addons.get_mut(&addon_id) {
            Some(a) if !a.reminder_state.resources_processed => {
                a.reminder_state.resources_processed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn get_workspace(&self, workspace_id: Uuid) -> BillingResult<Option<Workspace>> {
        Ok(self.state.lock().await.workspaces.get(&workspace_id).cloned())
    }

    async fn list_unsuspended_workspaces(&self, owner_id: Uuid) -> BillingResult<Vec<Workspace>> {
        let state = self.state.lock().await;
        let workspaces: Vec<Workspace> = state
            .workspaces
            .values()
            .filter(|w| w.owner_id == owner_id && w.status != WorkspaceStatus::Suspended)
            .cloned()
            .collect();
        Ok(oldest_first(workspaces, |w| (w.created_at, w.id)))
    }

    async fn suspend_workspace(&self, workspace_id: Uuid) -> BillingResult<u64> {
        // Single lock acquisition: validate everything, then apply both writes
        let mut state = self.state.lock().await;
        if !state.workspaces.contains_key(&workspace_id) {
            return Err(BillingError::WorkspaceNotFound(workspace_id));
        }
        state.check_writable(workspace_id)?;

        let funnel_ids: Vec<Uuid> = state
            .funnels
            .values()
            .filter(|f| f.workspace_id == workspace_id && f.status != FunnelStatus::Archived)
            .map(|f| f.id)
            .collect();
        for funnel_id in &funnel_ids {
            state.check_writable(*funnel_id)?;
        }

        if let Some(workspace) = state.workspaces.get_mut(&workspace_id) {
            workspace.status = WorkspaceStatus::Suspended;
        }
        for funnel_id in &funnel_ids {
            if let Some(funnel) = state.funnels.get_mut(funnel_id) {
                funnel.status = FunnelStatus::Archived;
            }
        }

        Ok(funnel_ids.len() as u64)
    }

    async fn list_funnels(&self, workspace_id: Uuid) -> BillingResult<Vec<Funnel>> {
        let state = self.state.lock().await;
        let funnels: Vec<Funnel> = state
            .funnels
            .values()
            .filter(|f| f.workspace_id == workspace_id)
            .cloned()
            .collect();
        Ok(oldest_first(funnels, |f| (f.created_at, f.id)))
    }

    async fn list_live_funnels(&self, workspace_id: Uuid) -> BillingResult<Vec<Funnel>> {
        let state = self.state.lock().await;
        let funnels: Vec<Funnel> = state
            .funnels
            .values()
            .filter(|f| f.workspace_id == workspace_id && f.status == FunnelStatus::Live)
            .cloned()
            .collect();
        Ok(oldest_first(funnels, |f| (f.created_at, f.id)))
    }

    async fn archive_funnel(&self, funnel_id: Uuid) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        state.check_writable(funnel_id)?;
        if let Some(funnel) = state.funnels.get_mut(&funnel_id) {
            funnel.status = FunnelStatus::Archived;
        }
        Ok(())
    }

    async fn list_linked_pages(&self, funnel_id: Uuid) -> BillingResult<Vec<Page>> {
        let state = self.state.lock().await;
        let pages: Vec<Page> = state
            .pages
            .values()
            .filter(|p| p.funnel_id == funnel_id && p.linking_id.is_some())
            .cloned()
            .collect();
        Ok(oldest_first(pages, |p| (p.created_at, p.id)))
    }

    async fn unlink_page(&self, page_id: Uuid) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        state.check_writable(page_id)?;
        if let Some(page) = state.pages.get_mut(&page_id) {
            page.linking_id = None;
        }
        Ok(())
    }

    async fn list_domains(&self, workspace_id: Uuid, kind: DomainKind) -> BillingResult<Vec<Domain>> {
        let state = self.state.lock().await;
        let domains: Vec<Domain> = state
            .domains
            .values()
            .filter(|d| d.workspace_id == workspace_id && d.kind == kind)
            .cloned()
            .collect();
        Ok(oldest_first(domains, |d| (d.created_at, d.id)))
    }

    async fn get_domain(&self, domain_id: Uuid) -> BillingResult<Option<Domain>> {
        Ok(self.state.lock().await.domains.get(&domain_id).cloned())
    }

    async fn delete_domain(&self, domain_id: Uuid) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        state.check_writable(domain_id)?;
        Ok(state.domains.remove(&domain_id).is_some())
    }

    async fn list_removable_members(
        &self,
        workspace_id: Uuid,
        owner_id: Uuid,
    ) -> BillingResult<Vec<WorkspaceMember>> {
        let state = self.state.lock().await;
        let members: Vec<WorkspaceMember> = state
            .members
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .filter(|m| m.status == MemberStatus::Active)
            .filter(|m| !m.role.is_owner() && m.user_id != owner_id)
            .cloned()
            .collect();
        Ok(oldest_first(members, |m| (m.joined_at, m.id)))
    }

    async fn delete_member(&self, member_id: Uuid) -> BillingResult<bool> {
        let mut state = self.state.lock().await;
        state.check_writable(member_id)?;
        Ok(state.members.remove(&member_id).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pagecraft_shared::types::PlanTier;
    use time::Duration;

    fn workspace(owner_id: Uuid, created_at: OffsetDateTime) -> Workspace {
        Workspace {
            id: Uuid::new_v4(),
            owner_id,
            name: "Acme".to_string(),
            plan: PlanTier::Free,
            is_protected: false,
            status: WorkspaceStatus::Active,
            created_at,
        }
    }

    fn funnel(workspace_id: Uuid, created_at: OffsetDateTime) -> Funnel {
        Funnel {
            id: Uuid::new_v4(),
            workspace_id,
            name: "Launch".to_string(),
            status: FunnelStatus::Live,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_suspend_workspace_archives_live_funnels() {
        let store = InMemoryBillingStore::new();
        let now = OffsetDateTime::now_utc();
        let ws = workspace(Uuid::new_v4(), now);
        let f1 = funnel(ws.id, now);
        let f2 = funnel(ws.id, now + Duration::minutes(1));
        store.insert_workspace(ws.clone()).await;
        store.insert_funnel(f1.clone()).await;
        store.insert_funnel(f2.clone()).await;

        let archived = store.suspend_workspace(ws.id).await.unwrap();

        assert_eq!(archived, 2);
        assert_eq!(store.workspace(ws.id).await.unwrap().status, WorkspaceStatus::Suspended);
        assert_eq!(store.funnel(f2.id).await.unwrap().status, FunnelStatus::Archived);
    }

    #[tokio::test]
    async fn test_suspend_workspace_is_all_or_nothing() {
        let store = InMemoryBillingStore::new();
        let now = OffsetDateTime::now_utc();
        let ws = workspace(Uuid::new_v4(), now);
        let ok = funnel(ws.id, now);
        let broken = funnel(ws.id, now + Duration::minutes(1));
        store.insert_workspace(ws.clone()).await;
        store.insert_funnel(ok.clone()).await;
        store.insert_funnel(broken.clone()).await;
        store.fail_writes_for(broken.id).await;

        assert!(store.suspend_workspace(ws.id).await.is_err());
        assert_eq!(store.workspace(ws.id).await.unwrap().status, WorkspaceStatus::Active);
        assert_eq!(store.funnel(ok.id).await.unwrap().status, FunnelStatus::Live);
    }

    #[tokio::test]
    async fn test_lists_are_oldest_first() {
        let store = InMemoryBillingStore::new();
        let owner = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let newest = workspace(owner, now);
        let oldest = workspace(owner, now - Duration::days(3));
        store.insert_workspace(newest.clone()).await;
        store.insert_workspace(oldest.clone()).await;

        let listed = store.list_unsuspended_workspaces(owner).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![oldest.id, newest.id]);
    }
}
