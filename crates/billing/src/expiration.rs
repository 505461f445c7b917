//! Expiration marking
//!
//! Moves subscriptions and add-ons whose end date has passed into the
//! terminal `expired` status. The two passes are independent and each item
//! is its own unit of work. Running the marker twice marks nothing the
//! second time.
//!
//! This must complete before `ExpirationProcessor` runs, since the
//! processor only sees add-ons already marked expired.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::store::BillingStore;
use crate::summary::{BatchResult, ItemError, MarkSummary};

pub struct ExpirationMarker {
    store: Arc<dyn BillingStore>,
}

impl ExpirationMarker {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Mark everything that has lapsed as of now
    pub async fn mark_expired_items(&self) -> MarkSummary {
        self.mark_expired_items_at(OffsetDateTime::now_utc()).await
    }

    pub async fn mark_expired_items_at(&self, now: OffsetDateTime) -> MarkSummary {
        let subscriptions = self.mark_subscriptions(now).await;
        let addons = self.mark_addons(now).await;

        let summary = MarkSummary {
            success: subscriptions.success && addons.success,
            subscriptions,
            addons,
        };

        tracing::info!(
            subscriptions_marked = summary.subscriptions.marked,
            addons_marked = summary.addons.marked,
            errors = summary.subscriptions.errors.len() + summary.addons.errors.len(),
            "Expiration marking complete"
        );
        summary
    }

    async fn mark_subscriptions(&self, now: OffsetDateTime) -> BatchResult {
        let lapsed = match self.store.find_lapsed_subscriptions(now).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query lapsed subscriptions");
                return BatchResult::failed(e);
            }
        };

        let mut result = BatchResult {
            found: lapsed.len() as u32,
            ..Default::default()
        };

        for subscription in lapsed {
            match self.store.expire_subscription(subscription.id).await {
                Ok(true) => {
                    tracing::info!(
                        subscription_id = %subscription.id,
                        user_id = %subscription.user_id,
                        "Subscription expired"
                    );
                    result.marked += 1;
                    result.marked_ids.push(subscription.id);
                }
                Ok(false) => {
                    tracing::debug!(subscription_id = %subscription.id, "Subscription already expired");
                }
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to expire subscription"
                    );
                    result.errors.push(ItemError::new(subscription.id, e));
                }
            }
        }

        result.finish()
    }

    async fn mark_addons(&self, now: OffsetDateTime) -> BatchResult {
        let lapsed = match self.store.find_lapsed_addons(now).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query lapsed add-ons");
                return BatchResult::failed(e);
            }
        };

        let mut result = BatchResult {
            found: lapsed.len() as u32,
            ..Default::default()
        };

        for addon in lapsed {
            match self.store.expire_addon(addon.id).await {
                Ok(true) => {
                    tracing::info!(
                        addon_id = %addon.id,
                        addon_type = %addon.addon_type,
                        user_id = %addon.user_id,
                        "Add-on expired"
                    );
                    result.marked += 1;
                    result.marked_ids.push(addon.id);
                }
                Ok(false) => {
                    tracing::debug!(addon_id = %addon.id, "Add-on already expired");
                }
                Err(e) => {
                    tracing::error!(addon_id = %addon.id, error = %e, "Failed to expire add-on");
                    result.errors.push(ItemError::new(addon.id, e));
                }
            }
        }

        result.finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use crate::testing::fixtures;
    use pagecraft_shared::types::{AddonStatus, AddonType, PlanTier, SubscriptionStatus};
    use time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let user = fixtures::user(PlanTier::Pro);

        let stuck = fixtures::addon(AddonType::ExtraFunnel, user.id, Some(Uuid::new_v4()), 1, now - Duration::days(2));
        let fine = fixtures::addon(AddonType::ExtraFunnel, user.id, Some(Uuid::new_v4()), 1, now - Duration::days(1));
        store.insert_addon(stuck.clone()).await;
        store.insert_addon(fine.clone()).await;
        store.fail_writes_for(stuck.id).await;

        let lapsed_sub = fixtures::subscription(user.id, Some(now - Duration::hours(3)));
        let current_sub = fixtures::subscription(user.id, Some(now + Duration::days(3)));
        store.insert_subscription(lapsed_sub.clone()).await;
        store.insert_subscription(current_sub.clone()).await;

        let summary = ExpirationMarker::new(store.clone()).mark_expired_items_at(now).await;

        assert!(!summary.success);
        assert!(summary.subscriptions.success);
        assert_eq!(summary.subscriptions.marked_ids, vec![lapsed_sub.id]);
        assert_eq!(summary.addons.found, 2);
        assert_eq!(summary.addons.marked_ids, vec![fine.id]);
        assert_eq!(summary.addons.errors[0].id, Some(stuck.id));
        assert_eq!(store.addon(fine.id).await.unwrap().status, AddonStatus::Expired);
        assert_eq!(store.addon(stuck.id).await.unwrap().status, AddonStatus::Active);
        assert_eq!(
            store.subscription(current_sub.id).await.unwrap().status,
            SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_open_ended_addons_never_lapse() {
        let now = OffsetDateTime::now_utc();
        let store = Arc::new(InMemoryBillingStore::new());
        let mut addon = fixtures::addon(AddonType::ExtraPage, Uuid::new_v4(), Some(Uuid::new_v4()), 1, now);
        addon.end_date = None;
        store.insert_addon(addon).await;

        let summary = ExpirationMarker::new(store).mark_expired_items_at(now).await;
        assert!(summary.success);
        assert_eq!(summary.total_marked(), 0);
    }
}
