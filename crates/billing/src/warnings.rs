//! Expiry warning emails
//!
//! Add-ons that will not renew (any status other than `active`) get up to
//! three warnings: 7, 3 and 1 day before they end. Each milestone is sent
//! at most once, tracked by the add-on's reminder flags.
//!
//! ## Day buckets
//!
//! Days remaining are counted between UTC calendar dates, not elapsed hours,
//! so the time of day a run happens at never moves an add-on between
//! buckets. Buckets are checked in priority order and the first unsent one
//! whose range contains the value wins:
//!
//! | bucket | days remaining |
//! |--------|----------------|
//! | day7   | 6..=8          |
//! | day3   | 2..=4          |
//! | day1   | 0..=2          |
//!
//! With exactly 2 days left and neither flag set, day3 is sent.

use std::ops::RangeInclusive;
use std::sync::Arc;

use pagecraft_shared::types::{Addon, ReminderState};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, Time, UtcOffset};

use crate::email::{AddonEmailData, EmailTemplate, Notifier};
use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;
use crate::summary::{ItemError, WarningSummary};

/// How far ahead of expiry add-ons are considered
pub const WARNING_WINDOW_DAYS: i64 = 8;

/// Milestone warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderBucket {
    Day7,
    Day3,
    Day1,
}

impl ReminderBucket {
    /// Evaluation order
    pub const PRIORITY: [Self; 3] = [Self::Day7, Self::Day3, Self::Day1];

    pub fn days(&self) -> RangeInclusive<i64> {
        match self {
            Self::Day7 => 6..=8,
            Self::Day3 => 2..=4,
            Self::Day1 => 0..=2,
        }
    }

    pub fn is_sent(&self, state: &ReminderState) -> bool {
        match self {
            Self::Day7 => state.day7,
            Self::Day3 => state.day3,
            Self::Day1 => state.day1,
        }
    }

    pub fn mark_sent(&self, state: &mut ReminderState) {
        match self {
            Self::Day7 => state.day7 = true,
            Self::Day3 => state.day3 = true,
            Self::Day1 => state.day1 = true,
        }
    }

    pub fn template(&self) -> EmailTemplate {
        match self {
            Self::Day7 => EmailTemplate::AddonExpiresIn7Days,
            Self::Day3 => EmailTemplate::AddonExpiresIn3Days,
            Self::Day1 => EmailTemplate::AddonExpiresIn1Day,
        }
    }
}

fn utc_midnight(at: OffsetDateTime) -> OffsetDateTime {
    at.to_offset(UtcOffset::UTC).replace_time(Time::MIDNIGHT)
}

/// Whole calendar days between today and the end date (UTC)
pub fn days_until_expiration(end_date: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (utc_midnight(end_date) - utc_midnight(now)).whole_days()
}

/// First unsent bucket, in priority order, whose range contains `days`
pub fn select_bucket(days: i64, state: &ReminderState) -> Option<ReminderBucket> {
    ReminderBucket::PRIORITY
        .into_iter()
        .find(|bucket| !bucket.is_sent(state) && bucket.days().contains(&days))
}

pub struct WarningScheduler {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn Notifier>,
}

impl WarningScheduler {
    pub fn new(store: Arc<dyn BillingStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn send_warning_emails(&self) -> WarningSummary {
        self.send_warning_emails_at(OffsetDateTime::now_utc()).await
    }

    pub async fn send_warning_emails_at(&self, now: OffsetDateTime) -> WarningSummary {
        let until = utc_midnight(now) + Duration::days(WARNING_WINDOW_DAYS + 1);

        let addons = match self.store.find_addons_ending_between(now, until).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query add-ons nearing expiry");
                return WarningSummary {
                    success: false,
                    failed: 1,
                    errors: vec![ItemError::run_level(e)],
                    ..Default::default()
                };
            }
        };

        let mut summary = WarningSummary {
            checked: addons.len() as u32,
            ..Default::default()
        };

        for addon in &addons {
            match self.warn_one(addon, now).await {
                Ok(Some(ReminderBucket::Day7)) => summary.day7_sent += 1,
                Ok(Some(ReminderBucket::Day3)) => summary.day3_sent += 1,
                Ok(Some(ReminderBucket::Day1)) => summary.day1_sent += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(addon_id = %addon.id, error = %e, "Failed to send expiry warning");
                    summary.failed += 1;
                    summary.errors.push(ItemError::new(addon.id, e));
                }
            }
        }

        summary.success = summary.errors.is_empty();
        tracing::info!(
            checked = summary.checked,
            day7_sent = summary.day7_sent,
            day3_sent = summary.day3_sent,
            day1_sent = summary.day1_sent,
            failed = summary.failed,
            "Expiry warnings complete"
        );
        summary
    }

    /// Send the due warning for one add-on, if any. Returns the bucket sent.
    async fn warn_one(&self, addon: &Addon, now: OffsetDateTime) -> BillingResult<Option<ReminderBucket>> {
        let Some(end_date) = addon.end_date else {
            return Ok(None);
        };
        let days = days_until_expiration(end_date, now);
        let Some(bucket) = select_bucket(days, &addon.reminder_state) else {
            return Ok(None);
        };

        let user = self
            .store
            .get_user(addon.user_id)
            .await?
            .ok_or(BillingError::UserNotFound(addon.user_id))?;

        let data = AddonEmailData {
            days_remaining: Some(days),
            ..AddonEmailData::for_addon(addon, &user)
        };

        if !self.notifier.send(&user.email, bucket.template(), &data).await? {
            // Flag stays unset so a later run in the same window retries
            return Err(BillingError::Notification(format!(
                "{} warning not delivered to {}",
                bucket.template().id(),
                user.email
            )));
        }

        let mut state = addon.reminder_state;
        bucket.mark_sent(&mut state);
        self.store.save_reminder_state(addon.id, state).await?;

        tracing::info!(
            addon_id = %addon.id,
            user_id = %user.id,
            days_remaining = days,
            template = bucket.template().id(),
            "Sent expiry warning"
        );
        Ok(Some(bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn state(day7: bool, day3: bool, day1: bool) -> ReminderState {
        ReminderState {
            day7,
            day3,
            day1,
            resources_processed: false,
        }
    }

    #[test]
    fn test_days_ignore_time_of_day() {
        let now = datetime!(2026-10-18 23:59 UTC);
        assert_eq!(days_until_expiration(datetime!(2026-10-19 00:01 UTC), now), 1);
        assert_eq!(days_until_expiration(datetime!(2026-10-25 12:00 UTC), now), 7);
        assert_eq!(days_until_expiration(datetime!(2026-10-18 23:59:30 UTC), now), 0);
    }

    #[test]
    fn test_days_normalize_to_utc() {
        let now = datetime!(2026-10-18 22:00 UTC);
        // 2026-10-19 01:00 +05:00 is 2026-10-18 20:00 UTC
        assert_eq!(days_until_expiration(datetime!(2026-10-19 01:00 +5), now), 0);
    }

    #[test]
    fn test_bucket_ranges() {
        let empty = ReminderState::default();
        assert_eq!(select_bucket(8, &empty), Some(ReminderBucket::Day7));
        assert_eq!(select_bucket(6, &empty), Some(ReminderBucket::Day7));
        assert_eq!(select_bucket(5, &empty), None);
        assert_eq!(select_bucket(4, &empty), Some(ReminderBucket::Day3));
        assert_eq!(select_bucket(1, &empty), Some(ReminderBucket::Day1));
        assert_eq!(select_bucket(0, &empty), Some(ReminderBucket::Day1));
        assert_eq!(select_bucket(9, &empty), None);
        assert_eq!(select_bucket(-1, &empty), None);
    }

    #[test]
    fn test_two_days_left_prefers_day3() {
        assert_eq!(select_bucket(2, &ReminderState::default()), Some(ReminderBucket::Day3));
        assert_eq!(select_bucket(2, &state(false, true, false)), Some(ReminderBucket::Day1));
        assert_eq!(select_bucket(2, &state(false, true, true)), None);
    }

    #[test]
    fn test_sent_buckets_are_skipped() {
        assert_eq!(select_bucket(7, &state(true, false, false)), None);
        assert_eq!(select_bucket(3, &state(true, true, false)), None);
    }
}
