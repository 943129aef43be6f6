use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::domain::{BadgeId, LearnerId};

/// Public verification hash printed on an issued badge.
///
/// A random nonce keeps tokens unique even when the same badge is issued to the same learner
/// again after the original award was revoked.
pub fn verification_token(badge: BadgeId, learner: LearnerId, issued_at: DateTime<Utc>) -> String {
    let nonce = Uuid::new_v4();
    let mut hasher = Sha256::new();
    hasher.update(badge.0.to_be_bytes());
    hasher.update(learner.0.to_be_bytes());
    hasher.update(issued_at.timestamp().to_be_bytes());
    hasher.update(nonce.as_bytes());
    format!("{:x}", hasher.finalize())
}
