use super::locks::KeyedLocks;
use super::wallet::WalletLedger;
use crate::domain::UserId;
use crate::domain::money::Amount;
use crate::domain::ports::{ClockRef, Notification, NotifierRef, StorageRef};
use crate::domain::streak::{Milestone, StreakConfig};
use crate::domain::wallet::{LedgerContext, WalletTransactionCategory};
use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// What a streak update did.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct StreakUpdate {
    pub user_id: UserId,
    pub current: u32,
    pub longest: u32,
    /// False when today had already been counted.
    pub counted: bool,
    pub milestone: Option<Milestone>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct StreakInfo {
    pub enabled: bool,
    pub current: u32,
    pub longest: u32,
    pub last_paid_date: Option<NaiveDate>,
    /// True while the streak can still be extended today.
    pub alive: bool,
    pub milestones_achieved: Vec<u32>,
    pub next_milestone: Option<Milestone>,
    pub days_to_next: Option<u32>,
}

/// Payment streaks and the admin milestone table.
pub struct StreakService {
    storage: StorageRef,
    wallets: Arc<WalletLedger>,
    notifier: NotifierRef,
    clock: ClockRef,
    user_locks: KeyedLocks,
    config_lock: Mutex<()>,
}

impl StreakService {
    pub fn new(
        storage: StorageRef,
        wallets: Arc<WalletLedger>,
        notifier: NotifierRef,
        clock: ClockRef,
        user_locks: KeyedLocks,
    ) -> Self {
        Self {
            storage,
            wallets,
            notifier,
            clock,
            user_locks,
            config_lock: Mutex::new(()),
        }
    }

    /// Counts today as a successful payment day for `user_id` and pays the
    /// lowest milestone reached but not yet rewarded.
    ///
    /// Returns `None` while no enabled configuration exists.
    #[instrument(skip(self))]
    pub async fn update_payment_streak(&self, user_id: &str) -> Result<Option<StreakUpdate>> {
        let Some(config) = self.storage.get_streak_config().await? else {
            return Ok(None);
        };
        if !config.enabled {
            return Ok(None);
        }

        let _guard = self.user_locks.lock(user_id).await;
        let mut user = self
            .storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(user_id.to_string()))?;
        let today = self.clock.today();
        if !user.streak.record_success(today) {
            return Ok(Some(StreakUpdate {
                user_id: user.id,
                current: user.streak.current,
                longest: user.streak.longest,
                counted: false,
                milestone: None,
            }));
        }

        let milestone = config.next_reward(&user.streak).cloned();
        if let Some(milestone) = &milestone {
            user.streak.milestones_achieved.push(milestone.days);
        }
        // Persisted before the credit; a milestone is paid at most once.
        self.storage.save_user(user.clone()).await?;

        if let Some(milestone) = &milestone {
            self.reward(&user.id, milestone).await?;
        }
        Ok(Some(StreakUpdate {
            user_id: user.id,
            current: user.streak.current,
            longest: user.streak.longest,
            counted: true,
            milestone,
        }))
    }

    async fn reward(&self, user_id: &str, milestone: &Milestone) -> Result<()> {
        if milestone.reward > Decimal::ZERO {
            let context = LedgerContext::new(
                WalletTransactionCategory::StreakReward,
                format!("{}-day payment streak reward", milestone.days),
            );
            self.wallets
                .add_money(user_id, Amount::new(milestone.reward)?, context)
                .await?;
        }
        info!(
            user_id = %user_id,
            days = milestone.days,
            reward = %milestone.reward,
            "Streak milestone reached"
        );
        let notification = Notification::MilestoneReached {
            user_id: user_id.to_string(),
            days: milestone.days,
            reward: milestone.reward,
            badge: milestone.badge.clone(),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(user_id = %user_id, error = %e, "Milestone notification failed");
        }
        Ok(())
    }

    pub async fn streak_info(&self, user_id: &str) -> Result<StreakInfo> {
        let user = self
            .storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(user_id.to_string()))?;
        let config = self.storage.get_streak_config().await?;
        let today = self.clock.today();
        let state = &user.streak;
        let alive = state
            .last_paid_date
            .is_some_and(|last| last == today || Some(last) == today.pred_opt());
        let next_milestone = config
            .as_ref()
            .filter(|c| c.enabled)
            .and_then(|c| c.upcoming(state))
            .cloned();
        let days_to_next = next_milestone.as_ref().map(|m| {
            let base = if alive { state.current } else { 0 };
            m.days.saturating_sub(base)
        });
        Ok(StreakInfo {
            enabled: config.is_some_and(|c| c.enabled),
            current: state.current,
            longest: state.longest,
            last_paid_date: state.last_paid_date,
            alive,
            milestones_achieved: state.milestones_achieved.clone(),
            next_milestone,
            days_to_next,
        })
    }

    pub async fn get_config(&self) -> Result<StreakConfig> {
        self.storage
            .get_streak_config()
            .await?
            .ok_or_else(|| EngineError::NotFound("streak configuration".to_string()))
    }

    pub async fn create_config(
        &self,
        enabled: bool,
        milestones: Vec<Milestone>,
    ) -> Result<StreakConfig> {
        let _guard = self.config_lock.lock().await;
        if self.storage.get_streak_config().await?.is_some() {
            return Err(EngineError::Conflict(
                "streak configuration already exists".to_string(),
            ));
        }
        let config = StreakConfig::new(enabled, milestones, self.clock.now())?;
        self.storage.save_streak_config(config.clone()).await?;
        info!(enabled, milestones = config.milestones.len(), "Streak configuration created");
        Ok(config)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<StreakConfig> {
        self.update_config(|config| {
            config.enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn add_milestone(&self, milestone: Milestone) -> Result<StreakConfig> {
        self.update_config(|config| config.add_milestone(milestone)).await
    }

    pub async fn update_milestone(&self, days: u32, milestone: Milestone) -> Result<StreakConfig> {
        self.update_config(|config| config.update_milestone(days, milestone))
            .await
    }

    pub async fn delete_milestone(&self, days: u32) -> Result<StreakConfig> {
        self.update_config(|config| config.remove_milestone(days).map(|_| ()))
            .await
    }

    pub async fn delete_config(&self) -> Result<()> {
        let _guard = self.config_lock.lock().await;
        if !self.storage.delete_streak_config().await? {
            return Err(EngineError::NotFound("streak configuration".to_string()));
        }
        info!("Streak configuration deleted");
        Ok(())
    }

    async fn update_config<F>(&self, apply: F) -> Result<StreakConfig>
    where
        F: FnOnce(&mut StreakConfig) -> Result<()>,
    {
        let _guard = self.config_lock.lock().await;
        let mut config = self.get_config().await?;
        apply(&mut config)?;
        config.updated_at = self.clock.now();
        self.storage.save_streak_config(config.clone()).await?;
        Ok(config)
    }
}
