//! Three-gate admission check run before a queued task is allowed to
//! start: a global concurrency cap, a per-user concurrency cap, and an
//! optional per-user daily cap backed by [`UserQuota`].

use sandboxd_protocol::UserQuota;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::store::{QueueError, QueueStore};

#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    pub global_max_concurrent: usize,
    pub per_user_max_concurrent: usize,
    /// 0 disables the daily-limit check entirely.
    pub per_user_daily_limit: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            global_max_concurrent: 10,
            per_user_max_concurrent: 2,
            per_user_daily_limit: 0,
        }
    }
}

/// The reason a task was refused a start, for a denial message rather
/// than a bare bool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDenial {
    GlobalLimitReached { limit: usize },
    UserConcurrentLimitReached { limit: usize },
    UserDailyLimitReached { limit: u32 },
}

impl std::fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GlobalLimitReached { limit } => write!(f, "global limit reached ({limit} concurrent tasks)"),
            Self::UserConcurrentLimitReached { limit } => write!(f, "user concurrent limit reached ({limit} tasks)"),
            Self::UserDailyLimitReached { limit } => write!(f, "daily limit reached ({limit} tasks/day)"),
        }
    }
}

/// Tracks the in-memory global active-task count (fast-path, never hits
/// the queue store) alongside the per-user counters the store owns.
pub struct QuotaManager {
    config: QuotaConfig,
    global_active: AtomicUsize,
}

impl QuotaManager {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            global_active: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> QuotaConfig {
        self.config
    }

    /// Checks the global and per-user concurrency gates, then — if a
    /// quota record is supplied — the daily gate. A `None` quota record
    /// means the user has no record yet and is always allowed through.
    pub async fn can_start_task(
        &self,
        user_id: Uuid,
        store: &impl QueueStore,
        quota_record: Option<&mut UserQuota>,
    ) -> Result<Result<(), QuotaDenial>, QueueError> {
        if self.global_active.load(Ordering::SeqCst) >= self.config.global_max_concurrent {
            return Ok(Err(QuotaDenial::GlobalLimitReached {
                limit: self.config.global_max_concurrent,
            }));
        }

        let user_active = store.user_active_count(user_id).await?;
        if user_active >= self.config.per_user_max_concurrent {
            return Ok(Err(QuotaDenial::UserConcurrentLimitReached {
                limit: self.config.per_user_max_concurrent,
            }));
        }

        if self.config.per_user_daily_limit > 0 {
            if let Some(quota) = quota_record {
                let now = chrono::Utc::now();
                quota.reset_if_needed(now);
                if quota.tasks_today >= self.config.per_user_daily_limit {
                    return Ok(Err(QuotaDenial::UserDailyLimitReached {
                        limit: self.config.per_user_daily_limit,
                    }));
                }
            }
        }

        Ok(Ok(()))
    }

    /// Increments the in-process daily counter. Called only once the task
    /// actually starts, not merely when it's queued.
    pub fn increment_daily_count(&self, quota: &mut UserQuota) {
        if self.config.per_user_daily_limit == 0 {
            return;
        }
        quota.reset_if_needed(chrono::Utc::now());
        quota.tasks_today += 1;
    }

    pub fn increment_global(&self) {
        self.global_active.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_global(&self) {
        let _ = self
            .global_active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
    }

    pub fn global_active(&self) -> usize {
        self.global_active.load(Ordering::SeqCst)
    }

    pub fn reset_global_count(&self) {
        self.global_active.store(0, Ordering::SeqCst);
    }

    pub fn set_global_count(&self, count: usize) {
        self.global_active.store(count, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryQueueStore;

    #[tokio::test]
    async fn global_limit_blocks_before_touching_the_store() {
        let quotas = QuotaManager::new(QuotaConfig {
            global_max_concurrent: 0,
            ..QuotaConfig::default()
        });
        let store = InMemoryQueueStore::default();
        let denial = quotas.can_start_task(Uuid::new_v4(), &store, None).await.unwrap();
        assert_eq!(denial, Err(QuotaDenial::GlobalLimitReached { limit: 0 }));
    }

    #[tokio::test]
    async fn per_user_limit_uses_store_active_count() {
        let quotas = QuotaManager::new(QuotaConfig {
            global_max_concurrent: 10,
            per_user_max_concurrent: 1,
            per_user_daily_limit: 0,
        });
        let store = InMemoryQueueStore::default();
        let user = Uuid::new_v4();
        store.mark_user_active(user, Uuid::new_v4()).await.unwrap();
        let denial = quotas.can_start_task(user, &store, None).await.unwrap();
        assert_eq!(denial, Err(QuotaDenial::UserConcurrentLimitReached { limit: 1 }));
    }

    #[tokio::test]
    async fn global_increment_decrement_is_symmetric() {
        let quotas = QuotaManager::new(QuotaConfig::default());
        quotas.increment_global();
        quotas.increment_global();
        assert_eq!(quotas.global_active(), 2);
        quotas.decrement_global();
        assert_eq!(quotas.global_active(), 1);
    }

    #[tokio::test]
    async fn decrement_never_underflows() {
        let quotas = QuotaManager::new(QuotaConfig::default());
        quotas.decrement_global();
        assert_eq!(quotas.global_active(), 0);
    }

    #[tokio::test]
    async fn daily_limit_blocks_once_reached() {
        let quotas = QuotaManager::new(QuotaConfig {
            global_max_concurrent: 10,
            per_user_max_concurrent: 10,
            per_user_daily_limit: 1,
        });
        let store = InMemoryQueueStore::default();
        let user_id = Uuid::new_v4();
        let mut record = UserQuota {
            user_id,
            max_concurrent_tasks: 10,
            max_daily_tasks: Some(1),
            tasks_today: 1,
            last_reset: chrono::Utc::now(),
        };
        let denial = quotas.can_start_task(user_id, &store, Some(&mut record)).await.unwrap();
        assert_eq!(denial, Err(QuotaDenial::UserDailyLimitReached { limit: 1 }));
    }
}
