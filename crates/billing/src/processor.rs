//! Expiration processing
//!
//! Reconciles add-ons that `ExpirationMarker` has already marked expired.
//! Each add-on is dispatched to the handler for its type, then flagged
//! `resources_processed` whether or not the handler succeeded, so a
//! permanently failing add-on is not retried forever. Handler failures are
//! logged at error level with the add-on id for manual follow-up.
//!
//! Add-ons are processed one at a time. Two overlapping runs are not safe:
//! the processed flag is a single-writer token, not a lease.

use std::sync::Arc;
use std::time::Instant;

use pagecraft_shared::types::Addon;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::email::{AddonEmailData, EmailTemplate, Notifier};
use crate::error::{BillingError, BillingResult};
use crate::handlers::{DowngradePlan, HandlerOutcome, HandlerRegistry};
use crate::store::BillingStore;
use crate::summary::{AddonProcessingResult, ItemError, ProcessingSummary};

pub struct ExpirationProcessor {
    store: Arc<dyn BillingStore>,
    handlers: HandlerRegistry,
    notifier: Arc<dyn Notifier>,
}

impl ExpirationProcessor {
    pub fn new(
        store: Arc<dyn BillingStore>,
        handlers: HandlerRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            handlers,
            notifier,
        }
    }

    pub async fn process_expired_addons(&self) -> ProcessingSummary {
        self.process_expired_addons_at(OffsetDateTime::now_utc()).await
    }

    pub async fn process_expired_addons_at(&self, now: OffsetDateTime) -> ProcessingSummary {
        let started = Instant::now();

        let addons = match self.store.find_unprocessed_expired_addons().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query expired add-ons");
                return ProcessingSummary {
                    success: false,
                    failed: 1,
                    results: vec![AddonProcessingResult::synthetic_failure(&e)],
                    errors: vec![ItemError::run_level(e)],
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                };
            }
        };

        let mut summary = ProcessingSummary {
            total_expired: addons.len() as u32,
            ..Default::default()
        };

        for addon in &addons {
            let result = self.process_one(addon, now).await;
            if result.success {
                summary.processed += 1;
            } else {
                summary.failed += 1;
                summary.errors.push(ItemError::new(
                    addon.id,
                    result.error.clone().unwrap_or_default(),
                ));
            }
            summary.results.push(result);
        }

        summary.success = summary.errors.is_empty();
        summary.execution_time_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            total_expired = summary.total_expired,
            processed = summary.processed,
            failed = summary.failed,
            execution_time_ms = summary.execution_time_ms,
            "Expired add-on processing complete"
        );
        summary
    }

    async fn process_one(&self, addon: &Addon, now: OffsetDateTime) -> AddonProcessingResult {
        let outcome = match self.handlers.get_or_err(addon.addon_type) {
            Ok(handler) => handler.handle(addon, now).await,
            Err(e) => Err(e),
        };

        let mut result = match outcome {
            Ok(outcome) => result_from_outcome(addon, outcome),
            Err(e) => {
                tracing::error!(
                    addon_id = %addon.id,
                    addon_type = %addon.addon_type,
                    error = %e,
                    "Add-on handler failed"
                );
                AddonProcessingResult {
                    addon_id: Some(addon.id),
                    addon_type: Some(addon.addon_type.to_string()),
                    success: false,
                    resources_affected: 0,
                    details: None,
                    error: Some(e.to_string()),
                    notification_sent: false,
                }
            }
        };

        // Set even when the handler failed
        match self.store.mark_resources_processed(addon.id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(addon_id = %addon.id, "Add-on was already marked processed");
            }
            Err(e) => {
                tracing::error!(addon_id = %addon.id, error = %e, "Failed to mark add-on processed");
                result.success = false;
                let message = format!("failed to mark processed: {}", e);
                result.error = Some(match result.error.take() {
                    Some(prev) => format!("{}; {}", prev, message),
                    None => message,
                });
            }
        }

        if result.success {
            result.notification_sent = self.notify_expired(addon, &result).await;
        } else {
            tracing::error!(
                addon_id = %addon.id,
                error = result.error.as_deref().unwrap_or_default(),
                "Add-on downgrade incomplete; it will not be retried"
            );
        }

        result
    }

    /// Best-effort confirmation email
    async fn notify_expired(&self, addon: &Addon, result: &AddonProcessingResult) -> bool {
        let user = match self.store.get_user(addon.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(addon_id = %addon.id, user_id = %addon.user_id, "No user to notify");
                return false;
            }
            Err(e) => {
                tracing::warn!(addon_id = %addon.id, error = %e, "Failed to load user for notification");
                return false;
            }
        };

        let data = AddonEmailData {
            resources_affected: Some(result.resources_affected),
            changes: result.details.clone(),
            ..AddonEmailData::for_addon(addon, &user)
        };

        match self.notifier.send(&user.email, EmailTemplate::AddonExpired, &data).await {
            Ok(sent) => sent,
            Err(e) => {
                tracing::warn!(addon_id = %addon.id, error = %e, "Expiry confirmation failed - non-fatal");
                false
            }
        }
    }

    /// What would be downgraded if `addon_id` stopped counting now.
    /// Writes nothing; works for add-ons in any status.
    pub async fn preview(&self, addon_id: Uuid) -> BillingResult<DowngradePlan> {
        self.preview_at(addon_id, OffsetDateTime::now_utc()).await
    }

    pub async fn preview_at(&self, addon_id: Uuid, now: OffsetDateTime) -> BillingResult<DowngradePlan> {
        let addon = self
            .store
            .get_addon(addon_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Add-on not found: {}", addon_id)))?;
        self.handlers
            .get_or_err(addon.addon_type)?
            .plan(&addon, now)
            .await
    }
}

fn result_from_outcome(addon: &Addon, outcome: HandlerOutcome) -> AddonProcessingResult {
    AddonProcessingResult {
        addon_id: Some(addon.id),
        addon_type: Some(addon.addon_type.to_string()),
        success: outcome.success,
        resources_affected: outcome.resources_affected,
        error: outcome.error_message(),
        details: outcome.details,
        notification_sent: false,
    }
}
