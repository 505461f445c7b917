//! Allocation Module
//!
//! Answers "how many of this resource may this scope have right now?"
//!
//! ## Design Principles
//!
//! 1. **Pure**: no I/O; callers load the plan and the add-ons still in force
//! 2. **Deterministic**: same inputs always produce the same allowance
//! 3. **Per resource type**: one function per quota, plus a dispatcher keyed by add-on type
//!
//! The add-on list passed in is expected to be pre-filtered to those still in
//! force (active or cancelled, not past their end date) and to exclude the
//! add-on currently being reconciled. Add-ons of other types are ignored.

use pagecraft_shared::types::{Addon, AddonType, PlanTier};
use serde::{Deserialize, Serialize};

/// Plan inputs that drive the base quota for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanContext {
    pub tier: PlanTier,
    /// Only affects the custom domain quota
    pub is_protected: bool,
}

impl PlanContext {
    pub fn new(tier: PlanTier) -> Self {
        Self {
            tier,
            is_protected: false,
        }
    }

    pub fn protected(tier: PlanTier, is_protected: bool) -> Self {
        Self { tier, is_protected }
    }
}

/// Sum of quantities across add-ons of one type
fn addon_units(addon_type: AddonType, addons: &[Addon]) -> u32 {
    addons
        .iter()
        .filter(|a| a.addon_type == addon_type)
        .fold(0u32, |acc, a| acc.saturating_add(a.units()))
}

/// Base quota granted by the plan alone
pub fn base_allocation(addon_type: AddonType, plan: PlanContext) -> u32 {
    match addon_type {
        AddonType::ExtraWorkspace => plan.tier.max_workspaces(),
        AddonType::ExtraFunnel => plan.tier.max_funnels(),
        AddonType::ExtraPage => plan.tier.max_pages_per_funnel(),
        AddonType::ExtraSubdomain => plan.tier.max_subdomains(),
        AddonType::ExtraCustomDomain => plan.tier.max_custom_domains(plan.is_protected),
        AddonType::ExtraAdminSeat => plan.tier.max_admin_seats(),
    }
}

/// Total allowance for a resource type: plan base plus matching add-on units
pub fn calculate_total_allocation(
    addon_type: AddonType,
    plan: PlanContext,
    active_addons: &[Addon],
) -> u32 {
    base_allocation(addon_type, plan).saturating_add(addon_units(addon_type, active_addons))
}

/// Workspaces a user may keep unsuspended
pub fn workspace_allocation(tier: PlanTier, active_addons: &[Addon]) -> u32 {
    calculate_total_allocation(AddonType::ExtraWorkspace, PlanContext::new(tier), active_addons)
}

/// Live funnels per workspace
pub fn funnel_allocation(tier: PlanTier, active_addons: &[Addon]) -> u32 {
    calculate_total_allocation(AddonType::ExtraFunnel, PlanContext::new(tier), active_addons)
}

/// Linked pages per funnel
pub fn page_allocation(tier: PlanTier, active_addons: &[Addon]) -> u32 {
    calculate_total_allocation(AddonType::ExtraPage, PlanContext::new(tier), active_addons)
}

/// Subdomains per workspace
pub fn subdomain_allocation(tier: PlanTier, active_addons: &[Addon]) -> u32 {
    calculate_total_allocation(AddonType::ExtraSubdomain, PlanContext::new(tier), active_addons)
}

/// Custom domains per workspace
pub fn custom_domain_allocation(tier: PlanTier, is_protected: bool, active_addons: &[Addon]) -> u32 {
    calculate_total_allocation(
        AddonType::ExtraCustomDomain,
        PlanContext::protected(tier, is_protected),
        active_addons,
    )
}

/// Admin seats per workspace (owner not counted)
pub fn admin_seat_allocation(tier: PlanTier, active_addons: &[Addon]) -> u32 {
    calculate_total_allocation(AddonType::ExtraAdminSeat, PlanContext::new(tier), active_addons)
}

/// How many resources exceed the allowance
pub fn excess(current: usize, allowed: u32) -> usize {
    current.saturating_sub(allowed as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagecraft_shared::types::{AddonStatus, ReminderState};
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn addon(addon_type: AddonType, quantity: i32) -> Addon {
        let now = OffsetDateTime::now_utc();
        Addon {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            workspace_id: Some(Uuid::new_v4()),
            addon_type,
            quantity,
            status: AddonStatus::Active,
            start_date: now - Duration::days(10),
            end_date: Some(now + Duration::days(20)),
            reminder_state: ReminderState::default(),
        }
    }

    #[test]
    fn test_funnel_allocation_adds_addon_quantity() {
        let addons = vec![addon(AddonType::ExtraFunnel, 2)];
        assert_eq!(funnel_allocation(PlanTier::Free, &addons), 3);
    }

    #[test]
    fn test_other_addon_types_are_ignored() {
        let addons = vec![
            addon(AddonType::ExtraSubdomain, 4),
            addon(AddonType::ExtraFunnel, 1),
        ];
        assert_eq!(subdomain_allocation(PlanTier::Free, &addons), 5);
        assert_eq!(funnel_allocation(PlanTier::Free, &addons), 2);
        assert_eq!(page_allocation(PlanTier::Basic, &addons), 35);
    }

    #[test]
    fn test_custom_domain_protection_flag() {
        assert_eq!(custom_domain_allocation(PlanTier::Free, false, &[]), 0);
        assert_eq!(custom_domain_allocation(PlanTier::Free, true, &[]), 1);
        let addons = vec![addon(AddonType::ExtraCustomDomain, 2)];
        assert_eq!(custom_domain_allocation(PlanTier::Basic, true, &addons), 4);
    }

    #[test]
    fn test_dispatch_matches_per_type_functions() {
        let addons = vec![addon(AddonType::ExtraAdminSeat, 3)];
        assert_eq!(
            calculate_total_allocation(AddonType::ExtraAdminSeat, PlanContext::new(PlanTier::Pro), &addons),
            admin_seat_allocation(PlanTier::Pro, &addons)
        );
        assert_eq!(workspace_allocation(PlanTier::Agency, &[]), 10);
    }

    #[test]
    fn test_multiple_addons_stack() {
        let addons = vec![
            addon(AddonType::ExtraWorkspace, 1),
            addon(AddonType::ExtraWorkspace, 2),
        ];
        assert_eq!(workspace_allocation(PlanTier::Free, &addons), 4);
    }

    #[test]
    fn test_excess_never_negative() {
        assert_eq!(excess(3, 1), 2);
        assert_eq!(excess(1, 3), 0);
        assert_eq!(excess(0, 0), 0);
    }
}
