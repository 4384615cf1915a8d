use super::user::StreakState;
use crate::error::EngineError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Milestone {
    pub days: u32,
    pub reward: Decimal,
    pub badge: Option<String>,
    pub is_active: bool,
}

impl Milestone {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.days == 0 {
            return Err(EngineError::ValidationError(
                "milestone days must be at least 1".to_string(),
            ));
        }
        if self.reward < Decimal::ZERO {
            return Err(EngineError::ValidationError(
                "milestone reward must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Admin-owned streak configuration. There is exactly one of these, and only
/// after an administrator creates it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct StreakConfig {
    pub enabled: bool,
    /// Sorted ascending by `days`, unique by `days`.
    pub milestones: Vec<Milestone>,
    pub updated_at: DateTime<Utc>,
}

impl StreakConfig {
    pub fn new(
        enabled: bool,
        milestones: Vec<Milestone>,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        let mut config = Self {
            enabled,
            milestones: Vec::new(),
            updated_at: now,
        };
        for milestone in milestones {
            config.add_milestone(milestone)?;
        }
        Ok(config)
    }

    pub fn add_milestone(&mut self, milestone: Milestone) -> Result<(), EngineError> {
        milestone.validate()?;
        if self.milestones.iter().any(|m| m.days == milestone.days) {
            return Err(EngineError::Conflict(format!(
                "milestone for {} days already exists",
                milestone.days
            )));
        }
        self.milestones.push(milestone);
        self.milestones.sort_by_key(|m| m.days);
        Ok(())
    }

    pub fn update_milestone(&mut self, days: u32, milestone: Milestone) -> Result<(), EngineError> {
        milestone.validate()?;
        let index = self
            .milestones
            .iter()
            .position(|m| m.days == days)
            .ok_or_else(|| EngineError::NotFound(format!("milestone for {days} days")))?;
        if milestone.days != days && self.milestones.iter().any(|m| m.days == milestone.days) {
            return Err(EngineError::Conflict(format!(
                "milestone for {} days already exists",
                milestone.days
            )));
        }
        self.milestones[index] = milestone;
        self.milestones.sort_by_key(|m| m.days);
        Ok(())
    }

    pub fn remove_milestone(&mut self, days: u32) -> Result<Milestone, EngineError> {
        let index = self
            .milestones
            .iter()
            .position(|m| m.days == days)
            .ok_or_else(|| EngineError::NotFound(format!("milestone for {days} days")))?;
        Ok(self.milestones.remove(index))
    }

    /// Lowest active milestone reached by `state` that has not been rewarded.
    pub fn next_reward(&self, state: &StreakState) -> Option<&Milestone> {
        self.milestones.iter().find(|m| {
            m.is_active && m.days <= state.current && !state.milestones_achieved.contains(&m.days)
        })
    }

    /// Lowest active milestone still ahead of the current streak.
    pub fn upcoming(&self, state: &StreakState) -> Option<&Milestone> {
        self.milestones.iter().find(|m| {
            m.is_active && m.days > state.current && !state.milestones_achieved.contains(&m.days)
        })
    }
}

impl StreakState {
    /// Counts `today` as a successful day. Returns false when today was
    /// already counted.
    pub fn record_success(&mut self, today: NaiveDate) -> bool {
        if self.last_paid_date == Some(today) {
            return false;
        }
        let yesterday = today.pred_opt();
        self.current = if yesterday.is_some() && self.last_paid_date == yesterday {
            self.current + 1
        } else {
            1
        };
        self.longest = self.longest.max(self.current);
        self.last_paid_date = Some(today);
        true
    }
}
