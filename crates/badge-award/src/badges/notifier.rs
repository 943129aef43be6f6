use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{BadgeId, LearnerId};

/// Payload handed to outbound hooks (mail, message queues) when a badge is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardNotice {
    pub badge_id: BadgeId,
    pub badge_name: String,
    pub learner_id: LearnerId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token: String,
}

/// Outbound hook told about every newly issued award.
pub trait AwardNotifier: Send + Sync {
    fn notify(&self, notice: &AwardNotice) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Notifier that only writes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl AwardNotifier for TracingNotifier {
    fn notify(&self, notice: &AwardNotice) -> Result<(), NotifyError> {
        info!(
            badge_id = %notice.badge_id,
            learner_id = %notice.learner_id,
            badge = %notice.badge_name,
            token = %notice.token,
            "badge issued"
        );
        Ok(())
    }
}
