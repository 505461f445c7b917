//! Resource handlers
//!
//! One handler per resource type withdraws the quota an expired add-on was
//! granting. Every handler follows the same shape:
//!
//! 1. Resolve the owning scope (a workspace, or the user for workspace add-ons)
//! 2. Recompute the allowance from the other add-ons still in force
//! 3. Load the current resources oldest-first
//! 4. Downgrade the newest `current - allowed` of them
//!
//! Steps 1-3 are `plan`, which never writes and backs the downgrade preview.
//! Step 4 is `apply`; each target is its own unit of work, so one failure
//! does not stop the rest.

mod domain;
mod funnel;
mod member;
mod page;
mod workspace;

pub use domain::DomainHandler;
pub use funnel::FunnelHandler;
pub use member::MemberHandler;
pub use page::PageHandler;
pub use workspace::WorkspaceHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pagecraft_shared::types::{Addon, AddonType, Workspace};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::allocation::{calculate_total_allocation, excess, PlanContext};
use crate::cache::CacheInvalidator;
use crate::domains::DomainDeleter;
use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, InForceQuery};
use crate::summary::ItemError;

/// A resource selected for downgrade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowngradeTarget {
    pub id: Uuid,
    /// Name, hostname or user id, for logs and emails
    pub label: String,
    pub created_at: OffsetDateTime,
}

/// Excess within one quota scope (a user, a workspace, or one funnel for pages)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowngradeGroup {
    pub scope_id: Uuid,
    pub allowed: u32,
    pub current: usize,
    /// Newest-excess resources, oldest first
    pub targets: Vec<DowngradeTarget>,
}

/// What a handler would do for one add-on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowngradePlan {
    pub addon_id: Uuid,
    pub addon_type: AddonType,
    /// Owner of the affected resources
    pub owner_id: Uuid,
    pub groups: Vec<DowngradeGroup>,
}

impl DowngradePlan {
    pub fn target_count(&self) -> usize {
        self.groups.iter().map(|g| g.targets.len()).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.target_count() == 0
    }
}

/// Result of applying a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub success: bool,
    pub resources_affected: u32,
    pub affected_ids: Vec<Uuid>,
    pub details: Option<String>,
    pub errors: Vec<ItemError>,
}

impl HandlerOutcome {
    /// Combined per-target error message, if any target failed
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| match e.id {
                    Some(id) => format!("{}: {}", id, e.error),
                    None => e.error.clone(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Add-on types this handler reconciles
    fn addon_types(&self) -> &'static [AddonType];

    /// Compute the downgrade without writing anything
    async fn plan(&self, addon: &Addon, now: OffsetDateTime) -> BillingResult<DowngradePlan>;

    /// Downgrade a single target
    async fn downgrade(&self, plan: &DowngradePlan, target: &DowngradeTarget) -> BillingResult<()>;

    /// Summary line for the confirmation email, e.g. "Archived 2 websites"
    fn describe(&self, affected: u32) -> String;

    /// Downgrade every target in the plan, isolating failures per target
    async fn apply(&self, plan: &DowngradePlan) -> HandlerOutcome {
        let mut outcome = HandlerOutcome::default();

        for target in plan.groups.iter().flat_map(|g| g.targets.iter()) {
            match self.downgrade(plan, target).await {
                Ok(()) => {
                    outcome.resources_affected += 1;
                    outcome.affected_ids.push(target.id);
                }
                Err(e) => {
                    tracing::error!(
                        addon_id = %plan.addon_id,
                        addon_type = %plan.addon_type,
                        resource_id = %target.id,
                        error = %e,
                        "Failed to downgrade resource"
                    );
                    outcome.errors.push(ItemError::new(target.id, e));
                }
            }
        }

        outcome.success = outcome.errors.is_empty();
        outcome.details = Some(self.describe(outcome.resources_affected));
        outcome
    }

    /// Plan and apply. Lookup failures are returned as `Err`.
    async fn handle(&self, addon: &Addon, now: OffsetDateTime) -> BillingResult<HandlerOutcome> {
        let plan = self.plan(addon, now).await?;
        if plan.is_noop() {
            tracing::info!(
                addon_id = %addon.id,
                addon_type = %addon.addon_type,
                "Within allowance, nothing to downgrade"
            );
            return Ok(HandlerOutcome {
                success: true,
                details: Some(self.describe(0)),
                ..Default::default()
            });
        }
        Ok(self.apply(&plan).await)
    }
}

/// Static add-on type to handler mapping
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<AddonType, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five standard handlers covering every add-on type
    pub fn standard(
        store: Arc<dyn BillingStore>,
        domains: Arc<dyn DomainDeleter>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WorkspaceHandler::new(store.clone(), cache)));
        registry.register(Arc::new(DomainHandler::new(store.clone(), domains)));
        registry.register(Arc::new(PageHandler::new(store.clone())));
        registry.register(Arc::new(FunnelHandler::new(store.clone())));
        registry.register(Arc::new(MemberHandler::new(store)));
        registry
    }

    /// Register a handler for every type it declares, replacing earlier entries
    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) {
        for addon_type in handler.addon_types() {
            self.handlers.insert(*addon_type, handler.clone());
        }
    }

    pub fn get(&self, addon_type: AddonType) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(&addon_type).cloned()
    }

    pub fn get_or_err(&self, addon_type: AddonType) -> BillingResult<Arc<dyn ResourceHandler>> {
        self.get(addon_type)
            .ok_or_else(|| BillingError::UnsupportedAddonType(addon_type.to_string()))
    }
}

// =============================================================================
// Shared steps
// =============================================================================

/// Workspace a workspace-scoped add-on is attached to
pub(crate) async fn resolve_workspace(store: &dyn BillingStore, addon: &Addon) -> BillingResult<Workspace> {
    let workspace_id = addon.workspace_id.ok_or_else(|| {
        BillingError::InvalidInput(format!("add-on {} has no workspace", addon.id))
    })?;
    store
        .get_workspace(workspace_id)
        .await?
        .ok_or(BillingError::WorkspaceNotFound(workspace_id))
}

/// Allowance once `addon` stops counting
pub(crate) async fn allowance_without(
    store: &dyn BillingStore,
    addon: &Addon,
    plan: PlanContext,
    now: OffsetDateTime,
) -> BillingResult<u32> {
    let others = store
        .find_in_force_addons(InForceQuery::siblings_of(addon, now))
        .await?;
    Ok(calculate_total_allocation(addon.addon_type, plan, &others))
}

/// Keep the oldest `allowed` rows and return the rest.
/// `rows` must already be ordered oldest-first.
pub(crate) fn newest_excess<T>(mut rows: Vec<T>, allowed: u32) -> Vec<T> {
    let over = excess(rows.len(), allowed);
    rows.split_off(rows.len() - over)
}

/// Build a group from an oldest-first resource list
pub(crate) fn group_from<T>(
    scope_id: Uuid,
    allowed: u32,
    rows: Vec<T>,
    to_target: impl Fn(T) -> DowngradeTarget,
) -> DowngradeGroup {
    let current = rows.len();
    DowngradeGroup {
        scope_id,
        allowed,
        current,
        targets: newest_excess(rows, allowed).into_iter().map(to_target).collect(),
    }
}

/// "1 website" / "3 websites"
pub(crate) fn plural(count: u32, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_excess_keeps_oldest() {
        assert_eq!(newest_excess(vec![1, 2, 3], 1), vec![2, 3]);
        assert_eq!(newest_excess(vec![1, 2, 3], 3), Vec::<i32>::new());
        assert_eq!(newest_excess(vec![1, 2, 3], 10), Vec::<i32>::new());
        assert_eq!(newest_excess(vec![1, 2, 3], 0), vec![1, 2, 3]);
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "page", "pages"), "1 page");
        assert_eq!(plural(0, "page", "pages"), "0 pages");
    }

    #[test]
    fn test_outcome_error_message_joins_items() {
        let id = Uuid::nil();
        let outcome = HandlerOutcome {
            errors: vec![ItemError::new(id, "boom"), ItemError::run_level("late")],
            ..Default::default()
        };
        let message = outcome.error_message().unwrap_or_default();
        assert!(message.contains("boom"));
        assert!(message.contains("late"));
        assert!(HandlerOutcome::default().error_message().is_none());
    }
}
