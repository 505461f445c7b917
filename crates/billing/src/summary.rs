//! Batch result types returned by the scheduled entry points
//!
//! Every entry point returns one of these instead of an error so the caller
//! (the worker) can always log a structured outcome.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A failure tied to one item of a batch.
/// `id` is None for run-level failures (e.g. the initial query failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub id: Option<Uuid>,
    pub error: String,
}

impl ItemError {
    pub fn new(id: Uuid, error: impl ToString) -> Self {
        Self {
            id: Some(id),
            error: error.to_string(),
        }
    }

    pub fn run_level(error: impl ToString) -> Self {
        Self {
            id: None,
            error: error.to_string(),
        }
    }
}

/// Outcome of one status-flip pass (subscriptions or add-ons)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    /// Records that matched the lapsed query
    pub found: u32,
    /// Records this run actually moved to expired
    pub marked: u32,
    pub marked_ids: Vec<Uuid>,
    pub errors: Vec<ItemError>,
}

impl BatchResult {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            errors: vec![ItemError::run_level(error)],
            ..Default::default()
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.success = self.errors.is_empty();
        self
    }
}

/// Outcome of `mark_expired_items`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkSummary {
    pub success: bool,
    pub subscriptions: BatchResult,
    pub addons: BatchResult,
}

impl MarkSummary {
    pub fn total_marked(&self) -> u32 {
        self.subscriptions.marked + self.addons.marked
    }
}

/// Outcome of `send_warning_emails`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarningSummary {
    pub success: bool,
    /// Add-ons inside the warning window
    pub checked: u32,
    pub day7_sent: u32,
    pub day3_sent: u32,
    pub day1_sent: u32,
    pub failed: u32,
    pub errors: Vec<ItemError>,
}

impl WarningSummary {
    pub fn total_sent(&self) -> u32 {
        self.day7_sent + self.day3_sent + self.day1_sent
    }
}

/// Per add-on outcome of `process_expired_addons`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonProcessingResult {
    pub addon_id: Option<Uuid>,
    pub addon_type: Option<String>,
    pub success: bool,
    pub resources_affected: u32,
    pub details: Option<String>,
    pub error: Option<String>,
    pub notification_sent: bool,
}

impl AddonProcessingResult {
    /// Placeholder result for a failure that happened before any add-on was known
    pub fn synthetic_failure(error: impl ToString) -> Self {
        Self {
            addon_id: None,
            addon_type: None,
            success: false,
            resources_affected: 0,
            details: None,
            error: Some(error.to_string()),
            notification_sent: false,
        }
    }
}

/// Outcome of `process_expired_addons`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub success: bool,
    pub total_expired: u32,
    pub processed: u32,
    pub failed: u32,
    pub results: Vec<AddonProcessingResult>,
    pub errors: Vec<ItemError>,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_result_success_tracks_errors() {
        let ok = BatchResult {
            found: 2,
            marked: 2,
            ..Default::default()
        }
        .finish();
        assert!(ok.success);

        let failed = BatchResult::failed("connection reset");
        assert!(!failed.success);
        assert_eq!(failed.errors.len(), 1);
        assert_eq!(failed.errors[0].id, None);
    }

    #[test]
    fn test_warning_summary_total() {
        let summary = WarningSummary {
            day7_sent: 2,
            day3_sent: 1,
            day1_sent: 4,
            ..Default::default()
        };
        assert_eq!(summary.total_sent(), 7);
    }
}
