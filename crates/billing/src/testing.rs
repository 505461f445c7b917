//! Test doubles for the collaborator seams, plus row builders
//!
//! Built for this crate's unit tests, and for integration tests through the
//! `testing` feature.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::CacheInvalidator;
use crate::domains::DomainDeleter;
use crate::email::{AddonEmailData, EmailTemplate, Notifier};
use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

/// An email captured by `RecordingNotifier`
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub template: EmailTemplate,
    pub data: AddonEmailData,
}

/// Notifier that records every delivered email
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentEmail>>,
    undeliverable: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to this address report `Ok(false)` and are not recorded
    pub async fn reject(&self, to: &str) {
        self.undeliverable.lock().await.insert(to.to_string());
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_with(&self, template: EmailTemplate) -> Vec<SentEmail> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|e| e.template == template)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, template: EmailTemplate, data: &AddonEmailData) -> BillingResult<bool> {
        if self.undeliverable.lock().await.contains(to) {
            return Ok(false);
        }
        self.sent.lock().await.push(SentEmail {
            to: to.to_string(),
            template,
            data: data.clone(),
        });
        Ok(true)
    }
}

/// Domain deleter that removes rows from the store unless told to fail
pub struct ScriptedDomainDeleter {
    store: Arc<dyn BillingStore>,
    failing: Mutex<HashSet<Uuid>>,
    calls: Mutex<Vec<(Uuid, Uuid)>>,
}

impl ScriptedDomainDeleter {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self {
            store,
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn fail_for(&self, domain_id: Uuid) {
        self.failing.lock().await.insert(domain_id);
    }

    /// `(owner_id, domain_id)` for every attempted deletion, in order
    pub async fn calls(&self) -> Vec<(Uuid, Uuid)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl DomainDeleter for ScriptedDomainDeleter {
    async fn delete(&self, owner_id: Uuid, domain_id: Uuid) -> BillingResult<()> {
        self.calls.lock().await.push((owner_id, domain_id));
        if self.failing.lock().await.contains(&domain_id) {
            return Err(BillingError::DomainTeardown(format!(
                "scripted failure for {}",
                domain_id
            )));
        }
        self.store.delete_domain(domain_id).await?;
        Ok(())
    }
}

/// Cache invalidator that records keys, optionally failing every call
#[derive(Default)]
pub struct RecordingCacheInvalidator {
    keys: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingCacheInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.keys.lock().await.clone()
    }
}

#[async_trait]
impl CacheInvalidator for RecordingCacheInvalidator {
    async fn invalidate(&self, key: &str) -> BillingResult<()> {
        self.keys.lock().await.push(key.to_string());
        if self.fail {
            return Err(BillingError::Cache("cache unavailable".to_string()));
        }
        Ok(())
    }
}

/// Row builders with sensible defaults
pub mod fixtures {
    use pagecraft_shared::types::{
        Addon, AddonStatus, AddonType, Domain, DomainKind, Funnel, FunnelStatus, MemberRole,
        MemberStatus, Page, PlanTier, ReminderState, Subscription, SubscriptionStatus, User,
        Workspace, WorkspaceMember, WorkspaceStatus,
    };
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    pub fn user(plan: PlanTier) -> User {
        let id = Uuid::new_v4();
        User {
            id,
            email: format!("{}@example.com", id.simple()),
            name: Some("Test User".to_string()),
            plan,
        }
    }

    pub fn subscription(user_id: Uuid, end_date: Option<OffsetDateTime>) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            user_id,
            plan: "pro".to_string(),
            status: SubscriptionStatus::Active,
            end_date,
        }
    }

    pub fn workspace(owner_id: Uuid, plan: PlanTier, created_at: OffsetDateTime) -> Workspace {
        Workspace {
            id: Uuid::new_v4(),
            owner_id,
            name: format!("Workspace {}", created_at.unix_timestamp()),
            plan,
            is_protected: false,
            status: WorkspaceStatus::Active,
            created_at,
        }
    }

    /// Active add-on that started 30 days before `end_date`
    pub fn addon(
        addon_type: AddonType,
        user_id: Uuid,
        workspace_id: Option<Uuid>,
        quantity: i32,
        end_date: OffsetDateTime,
    ) -> Addon {
        Addon {
            id: Uuid::new_v4(),
            user_id,
            workspace_id,
            addon_type,
            quantity,
            status: AddonStatus::Active,
            start_date: end_date - Duration::days(30),
            end_date: Some(end_date),
            reminder_state: ReminderState::default(),
        }
    }

    /// Expired add-on whose downgrade has not run yet
    pub fn expired_addon(
        addon_type: AddonType,
        user_id: Uuid,
        workspace_id: Option<Uuid>,
        quantity: i32,
        now: OffsetDateTime,
    ) -> Addon {
        Addon {
            status: AddonStatus::Expired,
            ..addon(addon_type, user_id, workspace_id, quantity, now - Duration::days(1))
        }
    }

    pub fn funnel(workspace_id: Uuid, created_at: OffsetDateTime) -> Funnel {
        Funnel {
            id: Uuid::new_v4(),
            workspace_id,
            name: format!("Funnel {}", created_at.unix_timestamp()),
            status: FunnelStatus::Live,
            created_at,
        }
    }

    pub fn page(funnel_id: Uuid, created_at: OffsetDateTime, linked: bool) -> Page {
        let id = Uuid::new_v4();
        Page {
            id,
            funnel_id,
            name: format!("Page {}", created_at.unix_timestamp()),
            linking_id: linked.then(|| id.simple().to_string()),
            created_at,
        }
    }

    pub fn domain(workspace_id: Uuid, kind: DomainKind, created_at: OffsetDateTime) -> Domain {
        let id = Uuid::new_v4();
        Domain {
            id,
            workspace_id,
            hostname: format!("site-{}.example.com", id.simple()),
            kind,
            created_at,
        }
    }

    pub fn member(
        workspace_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        joined_at: OffsetDateTime,
    ) -> WorkspaceMember {
        WorkspaceMember {
            id: Uuid::new_v4(),
            workspace_id,
            user_id,
            role,
            status: MemberStatus::Active,
            joined_at,
        }
    }
}
