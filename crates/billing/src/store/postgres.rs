//! Postgres-backed store

use async_trait::async_trait;
use pagecraft_shared::types::{
    Addon, AddonScope, Domain, DomainKind, Funnel, Page, PlanTier, ReminderState, Subscription,
    User, Workspace, WorkspaceMember, WorkspaceStatus,
};
use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{BillingStore, InForceQuery};
use crate::error::{BillingError, BillingResult};

const ADDON_COLUMNS: &str = "id, user_id, workspace_id, addon_type, quantity, status, start_date, end_date, reminder_state";

/// Store implementation over the application database
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Plan is stored as free text; unknown values fall back to Free
#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    plan: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            plan: PlanTier::parse_or_free(row.plan.as_deref()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    plan: Option<String>,
    is_protected: bool,
    status: WorkspaceStatus,
    created_at: OffsetDateTime,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            plan: PlanTier::parse_or_free(row.plan.as_deref()),
            is_protected: row.is_protected,
            status: row.status,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    // -------------------------------------------------------------------------
    // Expiration marking
    // -------------------------------------------------------------------------

    async fn find_lapsed_subscriptions(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        let subscriptions: Vec<Subscription> = sqlx::query_as(
            r#"
            SELECT id, user_id, plan, status, end_date
            FROM subscriptions
            WHERE end_date IS NOT NULL
              AND end_date < $1
              AND status <> 'expired'
            ORDER BY end_date ASC, id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    async fn expire_subscription(&self, subscription_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = NOW()
            WHERE id = $1 AND status <> 'expired'
            "#,
        )
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_lapsed_addons(&self, now: OffsetDateTime) -> BillingResult<Vec<Addon>> {
        let addons: Vec<Addon> = sqlx::query_as(&format!(
            r#"
            SELECT {ADDON_COLUMNS}
            FROM addons
            WHERE end_date IS NOT NULL
              AND end_date < $1
              AND status <> 'expired'
            ORDER BY end_date ASC, id ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(addons)
    }

    async fn expire_addon(&self, addon_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE addons
            SET status = 'expired', updated_at = NOW()
            WHERE id = $1 AND status <> 'expired'
            "#,
        )
        .bind(addon_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Add-ons
    // -------------------------------------------------------------------------

    async fn get_addon(&self, addon_id: Uuid) -> BillingResult<Option<Addon>> {
        let addon: Option<Addon> =
            sqlx::query_as(&format!("SELECT {ADDON_COLUMNS} FROM addons WHERE id = $1"))
                .bind(addon_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(addon)
    }

    async fn find_addons_ending_between(
        &self,
        from: OffsetDateTime,
        until: OffsetDateTime,
    ) -> BillingResult<Vec<Addon>> {
        let addons: Vec<Addon> = sqlx::query_as(&format!(
            r#"
            SELECT {ADDON_COLUMNS}
            FROM addons
            WHERE status <> 'active'
              AND end_date >= $1
              AND end_date < $2
            ORDER BY end_date ASC, id ASC
            "#
        ))
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(addons)
    }

    async fn find_unprocessed_expired_addons(&self) -> BillingResult<Vec<Addon>> {
        let addons: Vec<Addon> = sqlx::query_as(&format!(
            r#"
            SELECT {ADDON_COLUMNS}
            FROM addons
            WHERE status = 'expired'
              AND COALESCE((reminder_state->>'resources_processed')::boolean, false) = false
            ORDER BY end_date ASC NULLS LAST, id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(addons)
    }

    async fn find_in_force_addons(&self, query: InForceQuery) -> BillingResult<Vec<Addon>> {
        let (scope_clause, scope_id) = match query.addon_type.scope() {
            AddonScope::User => ("user_id = $4 AND workspace_id IS NULL", query.user_id),
            AddonScope::Workspace => match query.workspace_id {
                Some(workspace_id) => ("workspace_id = $4", workspace_id),
                None => return Ok(Vec::new()),
            },
        };

        let addons: Vec<Addon> = sqlx::query_as(&format!(
            r#"
            SELECT {ADDON_COLUMNS}
            FROM addons
            WHERE addon_type = $1
              AND id <> $2
              AND status IN ('active', 'cancelled')
              AND (end_date IS NULL OR end_date > $3)
              AND {scope_clause}
            ORDER BY start_date ASC, id ASC
            "#
        ))
        .bind(query.addon_type)
        .bind(query.exclude_addon_id)
        .bind(query.now)
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(addons)
    }

    async fn save_reminder_state(&self, addon_id: Uuid, state: ReminderState) -> BillingResult<()> {
        let result = sqlx::query(
            "UPDATE addons SET reminder_state = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(addon_id)
        .bind(Json(state))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Add-on not found: {}", addon_id)));
        }

        Ok(())
    }

    async fn mark_resources_processed(&self, addon_id: Uuid) -> BillingResult<bool> {
        // Conditional so an overlapping run cannot flip the token twice
        let result = sqlx::query(
            r#"
            UPDATE addons
            SET reminder_state = jsonb_set(reminder_state, '{resources_processed}', 'true'::jsonb, true),
                updated_at = NOW()
            WHERE id = $1
              AND COALESCE((reminder_state->>'resources_processed')::boolean, false) = false
            "#,
        )
        .bind(addon_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    async fn get_user(&self, user_id: Uuid) -> BillingResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, email, name, plan FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(User::from))
    }

    async fn get_workspace(&self, workspace_id: Uuid) -> BillingResult<Option<Workspace>> {
        let row: Option<WorkspaceRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, name, plan, is_protected, status, created_at
            FROM workspaces
            WHERE id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Workspace::from))
    }

    // -------------------------------------------------------------------------
    // Workspaces
    // -------------------------------------------------------------------------

    async fn list_unsuspended_workspaces(&self, owner_id: Uuid) -> BillingResult<Vec<Workspace>> {
        let rows: Vec<WorkspaceRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, name, plan, is_protected, status, created_at
            FROM workspaces
            WHERE owner_id = $1 AND status <> 'suspended'
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Workspace::from).collect())
    }

    async fn suspend_workspace(&self, workspace_id: Uuid) -> BillingResult<u64> {
        // Rolled back on drop if anything below returns early
        let mut tx = self.pool.begin().await?;

        let suspended = sqlx::query(
            r#"
            UPDATE workspaces
            SET status = 'suspended', suspended_at = COALESCE(suspended_at, NOW())
            WHERE id = $1
            "#,
        )
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;

        if suspended.rows_affected() == 0 {
            return Err(BillingError::WorkspaceNotFound(workspace_id));
        }

        let archived = sqlx::query(
            r#"
            UPDATE funnels
            SET status = 'archived', archived_at = NOW()
            WHERE workspace_id = $1 AND status <> 'archived'
            "#,
        )
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(archived.rows_affected())
    }

    // -------------------------------------------------------------------------
    // Funnels and pages
    // -------------------------------------------------------------------------

    async fn list_funnels(&self, workspace_id: Uuid) -> BillingResult<Vec<Funnel>> {
        let funnels: Vec<Funnel> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, name, status, created_at
            FROM funnels
            WHERE workspace_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(funnels)
    }

    async fn list_live_funnels(&self, workspace_id: Uuid) -> BillingResult<Vec<Funnel>> {
        let funnels: Vec<Funnel> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, name, status, created_at
            FROM funnels
            WHERE workspace_id = $1 AND status = 'live'
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(funnels)
    }

    async fn archive_funnel(&self, funnel_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE funnels
            SET status = 'archived', archived_at = NOW()
            WHERE id = $1 AND status <> 'archived'
            "#,
        )
        .bind(funnel_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_linked_pages(&self, funnel_id: Uuid) -> BillingResult<Vec<Page>> {
        let pages: Vec<Page> = sqlx::query_as(
            r#"
            SELECT id, funnel_id, name, linking_id, created_at
            FROM pages
            WHERE funnel_id = $1 AND linking_id IS NOT NULL
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(funnel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(pages)
    }

    async fn unlink_page(&self, page_id: Uuid) -> BillingResult<()> {
        sqlx::query("UPDATE pages SET linking_id = NULL WHERE id = $1")
            .bind(page_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Domains
    // -------------------------------------------------------------------------

    async fn list_domains(&self, workspace_id: Uuid, kind: DomainKind) -> BillingResult<Vec<Domain>> {
        let domains: Vec<Domain> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, hostname, kind, created_at
            FROM domains
            WHERE workspace_id = $1 AND kind = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(workspace_id)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(domains)
    }

    async fn get_domain(&self, domain_id: Uuid) -> BillingResult<Option<Domain>> {
        let domain: Option<Domain> = sqlx::query_as(
            "SELECT id, workspace_id, hostname, kind, created_at FROM domains WHERE id = $1",
        )
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(domain)
    }

    async fn delete_domain(&self, domain_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query("DELETE FROM domains WHERE id = $1")
            .bind(domain_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Members
    // -------------------------------------------------------------------------

    async fn list_removable_members(
        &self,
        workspace_id: Uuid,
        owner_id: Uuid,
    ) -> BillingResult<Vec<WorkspaceMember>> {
        let members: Vec<WorkspaceMember> = sqlx::query_as(
            r#"
            SELECT id, workspace_id, user_id, role, status, joined_at
            FROM workspace_members
            WHERE workspace_id = $1
              AND status = 'active'
              AND role <> 'owner'
              AND user_id <> $2
            ORDER BY joined_at ASC, id ASC
            "#,
        )
        .bind(workspace_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    async fn delete_member(&self, member_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query("DELETE FROM workspace_members WHERE id = $1")
            .bind(member_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    async fn setup() -> PgBillingStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = pagecraft_shared::create_pool(&url, 2)
            .await
            .expect("Failed to create pool");
        pagecraft_shared::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        PgBillingStore::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_suspend_missing_workspace_rolls_back() {
        let store = setup().await;
        let result = store.suspend_workspace(Uuid::new_v4()).await;
        assert!(matches!(result, Err(BillingError::WorkspaceNotFound(_))));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_mark_unknown_addon_processed_is_noop() {
        let store = setup().await;
        let changed = store
            .mark_resources_processed(Uuid::new_v4())
            .await
            .expect("query should succeed");
        assert!(!changed);
    }
}
