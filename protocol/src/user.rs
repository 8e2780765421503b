use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    /// Per-user JWT signing secret; minted and rotated by the HTTP
    /// collaborator, stored here only so sessions can be scoped to it.
    pub jwt_secret: String,
    pub linux_uid: Option<u32>,
    pub queue_priority: i64,
}

/// Encrypted credential storage (e.g. a per-user LLM vendor API key),
/// decrypted on demand by the config/secrets loader. The ciphertext and
/// nonce are opaque to every other component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub user_id: Uuid,
    pub provider: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Per-user quota bookkeeping. `tasks_today` resets to 0 the first time
/// `reset_if_needed` observes that `last_reset`'s UTC date precedes today's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuota {
    pub user_id: Uuid,
    pub max_concurrent_tasks: u32,
    pub max_daily_tasks: Option<u32>,
    pub tasks_today: u32,
    pub last_reset: DateTime<Utc>,
}

impl UserQuota {
    pub fn should_reset_daily_count(&self, now: DateTime<Utc>) -> bool {
        self.last_reset.date_naive() < now.date_naive()
    }

    pub fn reset_if_needed(&mut self, now: DateTime<Utc>) {
        if self.should_reset_daily_count(now) {
            self.tasks_today = 0;
            self.last_reset = now;
        }
    }
}
