//! Common types used across Pagecraft

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Plans
// =============================================================================

/// Plan tier a user or workspace is subscribed to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Basic,
    Pro,
    Agency,
}

impl PlanTier {
    /// Workspaces a user may own
    /// Free (1) → Basic (1) → Pro (3) → Agency (10)
    pub fn max_workspaces(&self) -> u32 {
        match self {
            Self::Free => 1,
            Self::Basic => 1,
            Self::Pro => 3,
            Self::Agency => 10,
        }
    }

    /// Live funnels per workspace
    pub fn max_funnels(&self) -> u32 {
        match self {
            Self::Free => 1,
            Self::Basic => 3,
            Self::Pro => 10,
            Self::Agency => 25,
        }
    }

    /// Publicly linked pages per funnel
    pub fn max_pages_per_funnel(&self) -> u32 {
        match self {
            Self::Free => 10,
            Self::Basic => 35,
            Self::Pro => 100,
            Self::Agency => 250,
        }
    }

    /// Subdomains per workspace
    pub fn max_subdomains(&self) -> u32 {
        match self {
            Self::Free => 1,
            Self::Basic => 3,
            Self::Pro => 10,
            Self::Agency => 25,
        }
    }

    /// Custom domains per workspace
    /// Protected workspaces keep one extra domain on top of the tier quota
    pub fn max_custom_domains(&self, protected: bool) -> u32 {
        let base = match self {
            Self::Free => 0,
            Self::Basic => 1,
            Self::Pro => 3,
            Self::Agency => 10,
        };
        if protected {
            base + 1
        } else {
            base
        }
    }

    /// Admin seats per workspace, not counting the owner
    pub fn max_admin_seats(&self) -> u32 {
        match self {
            Self::Free => 0,
            Self::Basic => 1,
            Self::Pro => 3,
            Self::Agency => 10,
        }
    }

    /// Parse a stored tier, falling back to Free for missing or unknown values
    pub fn parse_or_free(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_default()
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Basic => write!(f, "basic"),
            Self::Pro => write!(f, "pro"),
            Self::Agency => write!(f, "agency"),
        }
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "pro" => Ok(Self::Pro),
            "agency" => Ok(Self::Agency),
            _ => Err(format!("Invalid plan tier: {}", s)),
        }
    }
}

// =============================================================================
// Add-ons
// =============================================================================

/// Quota add-on types. Each unit of quantity grants one extra resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AddonType {
    ExtraWorkspace,
    ExtraFunnel,
    ExtraPage,
    ExtraSubdomain,
    ExtraCustomDomain,
    ExtraAdminSeat,
}

/// Whether an add-on is attached to a user or to one workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonScope {
    User,
    Workspace,
}

impl AddonType {
    pub fn all() -> [Self; 6] {
        [
            Self::ExtraWorkspace,
            Self::ExtraFunnel,
            Self::ExtraPage,
            Self::ExtraSubdomain,
            Self::ExtraCustomDomain,
            Self::ExtraAdminSeat,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtraWorkspace => "extra_workspace",
            Self::ExtraFunnel => "extra_funnel",
            Self::ExtraPage => "extra_page",
            Self::ExtraSubdomain => "extra_subdomain",
            Self::ExtraCustomDomain => "extra_custom_domain",
            Self::ExtraAdminSeat => "extra_admin_seat",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "extra_workspace" => Some(Self::ExtraWorkspace),
            "extra_funnel" => Some(Self::ExtraFunnel),
            "extra_page" => Some(Self::ExtraPage),
            "extra_subdomain" => Some(Self::ExtraSubdomain),
            "extra_custom_domain" => Some(Self::ExtraCustomDomain),
            "extra_admin_seat" => Some(Self::ExtraAdminSeat),
            _ => None,
        }
    }

    /// Name used in customer-facing emails
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ExtraWorkspace => "Extra Workspace",
            Self::ExtraFunnel => "Extra Website",
            Self::ExtraPage => "Extra Pages",
            Self::ExtraSubdomain => "Extra Subdomain",
            Self::ExtraCustomDomain => "Extra Custom Domain",
            Self::ExtraAdminSeat => "Extra Admin Seat",
        }
    }

    /// Workspace add-ons are purchased per user; everything else is per workspace
    pub fn scope(&self) -> AddonScope {
        match self {
            Self::ExtraWorkspace => AddonScope::User,
            _ => AddonScope::Workspace,
        }
    }
}

impl std::fmt::Display for AddonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Add-on lifecycle. Only ever moves forward to `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AddonStatus {
    Active,
    Cancelled,
    Expired,
}

impl AddonStatus {
    /// Active and cancelled add-ons keep granting quota until their end date
    pub fn grants_quota(&self) -> bool {
        matches!(self, Self::Active | Self::Cancelled)
    }
}

/// Reminder bookkeeping stored alongside each add-on.
///
/// Updates are read-modify-write on the whole record and are not safe under
/// concurrent writers to the same add-on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderState {
    pub day7: bool,
    pub day3: bool,
    pub day1: bool,
    /// Set once the expiration downgrade has been applied
    pub resources_processed: bool,
}

/// Time-boxed quota add-on
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Addon {
    pub id: Uuid,
    pub user_id: Uuid,
    /// None for user-level add-ons
    pub workspace_id: Option<Uuid>,
    pub addon_type: AddonType,
    pub quantity: i32,
    pub status: AddonStatus,
    pub start_date: OffsetDateTime,
    pub end_date: Option<OffsetDateTime>,
    #[sqlx(json)]
    pub reminder_state: ReminderState,
}

impl Addon {
    /// Whether this add-on still grants quota at `now`
    pub fn is_in_force(&self, now: OffsetDateTime) -> bool {
        self.status.grants_quota() && self.end_date.is_none_or(|end| end > now)
    }

    /// Quantity as an unsigned count (negative values are treated as zero)
    pub fn units(&self) -> u32 {
        self.quantity.max(0) as u32
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

/// Plan subscription. Only the expiration marker touches it here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: String,
    pub status: SubscriptionStatus,
    pub end_date: Option<OffsetDateTime>,
}

// =============================================================================
// Accounts and resources
// =============================================================================

/// Account that owns workspaces and purchases add-ons
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub plan: PlanTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workspace {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub plan: PlanTier,
    /// Grandfathered workspaces keep an extra custom domain
    pub is_protected: bool,
    pub status: WorkspaceStatus,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FunnelStatus {
    Live,
    Archived,
}

/// A website built from pages
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Funnel {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub status: FunnelStatus,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DomainKind {
    Subdomain,
    CustomDomain,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub hostname: String,
    pub kind: DomainKind,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Page {
    pub id: Uuid,
    pub funnel_id: Uuid,
    pub name: String,
    /// Public link; None means the page is not reachable
    pub linking_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Role within a workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Editor,
    Viewer,
}

impl MemberRole {
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Pending,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkspaceMember {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub joined_at: OffsetDateTime,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::Duration;

    // =========================================================================
    // PlanTier Tests
    // =========================================================================

    #[test]
    fn test_plan_tier_default() {
        assert_eq!(PlanTier::default(), PlanTier::Free);
    }

    #[test]
    fn test_plan_tier_parse_or_free() {
        assert_eq!(PlanTier::parse_or_free(Some("PRO")), PlanTier::Pro);
        assert_eq!(PlanTier::parse_or_free(Some("platinum")), PlanTier::Free);
        assert_eq!(PlanTier::parse_or_free(None), PlanTier::Free);
    }

    #[test]
    fn test_plan_tier_display_roundtrip() {
        for tier in [PlanTier::Free, PlanTier::Basic, PlanTier::Pro, PlanTier::Agency] {
            assert_eq!(tier.to_string().parse::<PlanTier>(), Ok(tier));
        }
    }

    #[test]
    fn test_protected_workspace_gets_extra_custom_domain() {
        assert_eq!(PlanTier::Free.max_custom_domains(false), 0);
        assert_eq!(PlanTier::Free.max_custom_domains(true), 1);
        assert_eq!(PlanTier::Pro.max_custom_domains(true), 4);
    }

    // =========================================================================
    // AddonType Tests
    // =========================================================================

    #[test]
    fn test_addon_type_str_roundtrip() {
        for addon_type in AddonType::all() {
            assert_eq!(AddonType::from_str(addon_type.as_str()), Some(addon_type));
        }
        assert_eq!(AddonType::from_str("extra_bandwidth"), None);
    }

    #[test]
    fn test_only_workspace_addon_is_user_scoped() {
        assert_eq!(AddonType::ExtraWorkspace.scope(), AddonScope::User);
        assert_eq!(AddonType::ExtraAdminSeat.scope(), AddonScope::Workspace);
        assert_eq!(AddonType::ExtraPage.scope(), AddonScope::Workspace);
    }

    #[test]
    fn test_reminder_state_defaults_missing_fields() {
        let state: ReminderState = serde_json::from_str(r#"{"day7": true}"#).unwrap();
        assert!(state.day7);
        assert!(!state.day3);
        assert!(!state.resources_processed);
    }

    #[test]
    fn test_addon_in_force() {
        let now = OffsetDateTime::now_utc();
        let mut addon = Addon {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            workspace_id: None,
            addon_type: AddonType::ExtraWorkspace,
            quantity: 1,
            status: AddonStatus::Cancelled,
            start_date: now - Duration::days(30),
            end_date: Some(now + Duration::days(1)),
            reminder_state: ReminderState::default(),
        };
        assert!(addon.is_in_force(now));

        addon.end_date = Some(now - Duration::seconds(1));
        assert!(!addon.is_in_force(now));

        addon.end_date = None;
        assert!(addon.is_in_force(now));

        addon.status = AddonStatus::Expired;
        assert!(!addon.is_in_force(now));
    }
}
