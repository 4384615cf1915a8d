use super::UserId;
use crate::error::EngineError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(default)]
pub struct ReminderFlags {
    pub payment_reminder: bool,
    pub low_balance_alert: bool,
    pub success_notification: bool,
    pub failure_notification: bool,
}

impl Default for ReminderFlags {
    fn default() -> Self {
        Self {
            payment_reminder: true,
            low_balance_alert: true,
            success_notification: true,
            failure_notification: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimePreference {
    #[default]
    Morning,
    Afternoon,
    Evening,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct AutopaySettings {
    pub enabled: bool,
    /// Funds autopay never spends.
    pub minimum_balance_lock: Decimal,
    pub low_balance_threshold: Decimal,
    /// Stored for the UI; batch selection does not read it.
    pub time_preference: TimePreference,
    pub reminders: ReminderFlags,
}

impl Default for AutopaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            minimum_balance_lock: Decimal::ZERO,
            low_balance_threshold: Decimal::ZERO,
            time_preference: TimePreference::default(),
            reminders: ReminderFlags::default(),
        }
    }
}

/// Partial update of [`AutopaySettings`]; `None` leaves a field as is.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct AutopaySettingsUpdate {
    pub enabled: Option<bool>,
    pub minimum_balance_lock: Option<Decimal>,
    pub low_balance_threshold: Option<Decimal>,
    pub time_preference: Option<TimePreference>,
    pub reminders: Option<ReminderFlags>,
}

impl AutopaySettings {
    pub fn apply(&mut self, update: AutopaySettingsUpdate) -> Result<(), EngineError> {
        for (field, value) in [
            ("minimumBalanceLock", update.minimum_balance_lock),
            ("lowBalanceThreshold", update.low_balance_threshold),
        ] {
            if let Some(value) = value
                && value < Decimal::ZERO
            {
                return Err(EngineError::ValidationError(format!(
                    "{field} must not be negative"
                )));
            }
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(lock) = update.minimum_balance_lock {
            self.minimum_balance_lock = lock;
        }
        if let Some(threshold) = update.low_balance_threshold {
            self.low_balance_threshold = threshold;
        }
        if let Some(preference) = update.time_preference {
            self.time_preference = preference;
        }
        if let Some(reminders) = update.reminders {
            self.reminders = reminders;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(default)]
pub struct StreakState {
    pub current: u32,
    pub longest: u32,
    pub last_paid_date: Option<NaiveDate>,
    /// Day thresholds already rewarded.
    pub milestones_achieved: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub autopay_settings: AutopaySettings,
    #[serde(default)]
    pub streak: StreakState,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            autopay_settings: AutopaySettings::default(),
            streak: StreakState::default(),
            created_at: now,
        }
    }
}
