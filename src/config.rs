use crate::error::{EngineError, Result};
use chrono::{FixedOffset, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

/// Jobs the scheduler knows how to run.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Autopay,
    Reminder,
    LowBalanceForecast,
}

/// One daily trigger. Inactive slots stay listed so operators can see and
/// manually run them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct ScheduleSlot {
    pub slot_id: String,
    pub job: JobKind,
    /// Local time of day in the business timezone.
    pub at: NaiveTime,
    pub active: bool,
}

impl ScheduleSlot {
    pub fn new(slot_id: &str, job: JobKind, hour: u32, minute: u32, active: bool) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            job,
            at: NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN),
            active,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct CommissionConfig {
    /// Used when neither the order nor the product overrides the rate.
    pub default_percentage: Decimal,
    /// Share of each commission that lands in the withdrawable pool.
    pub withdrawable_percentage: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            default_percentage: dec!(25),
            withdrawable_percentage: dec!(90),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct ForecastConfig {
    pub default_days: u32,
    pub max_days: u32,
    pub top_up_horizon_days: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            default_days: 30,
            max_days: 90,
            top_up_horizon_days: 7,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Business timezone as minutes east of UTC (IST by default).
    pub utc_offset_minutes: i32,
    pub commission: CommissionConfig,
    pub slots: Vec<ScheduleSlot>,
    pub forecast: ForecastConfig,
    pub history_page_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 330,
            commission: CommissionConfig::default(),
            slots: default_slots(),
            forecast: ForecastConfig::default(),
            history_page_limit: 100,
        }
    }
}

pub fn default_slots() -> Vec<ScheduleSlot> {
    vec![
        ScheduleSlot::new("payment-reminder", JobKind::Reminder, 8, 0, true),
        ScheduleSlot::new("autopay-morning", JobKind::Autopay, 10, 0, true),
        ScheduleSlot::new("autopay-evening", JobKind::Autopay, 18, 0, false),
        ScheduleSlot::new("low-balance-forecast", JobKind::LowBalanceForecast, 21, 0, true),
    ]
}

impl EngineConfig {
    /// Reads a JSON config file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                let config: EngineConfig = serde_json::from_str(&raw)?;
                info!(path = %path.display(), "Loaded engine configuration");
                config
            }
            None => EngineConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.offset()?;
        for (name, pct) in [
            ("commission.default_percentage", self.commission.default_percentage),
            ("commission.withdrawable_percentage", self.commission.withdrawable_percentage),
        ] {
            if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
                return Err(EngineError::ConfigError(format!(
                    "{name} must be between 0 and 100, got {pct}"
                )));
            }
        }
        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.slot_id.as_str()) {
                return Err(EngineError::ConfigError(format!(
                    "duplicate schedule slot '{}'",
                    slot.slot_id
                )));
            }
        }
        if self.forecast.default_days == 0 || self.forecast.default_days > self.forecast.max_days {
            return Err(EngineError::ConfigError(
                "forecast.default_days must be between 1 and forecast.max_days".to_string(),
            ));
        }
        if self.history_page_limit == 0 {
            return Err(EngineError::ConfigError(
                "history_page_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            EngineError::ConfigError(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.commission.default_percentage, dec!(25));
        assert_eq!(config.forecast.max_days, 90);
        assert_eq!(config.slots.iter().filter(|s| s.active).count(), 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"utc_offset_minutes": 0, "slots": [{{"slot_id": "only", "job": "AUTOPAY", "at": "06:30:00", "active": true}}]}}"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.utc_offset_minutes, 0);
        assert_eq!(config.slots.len(), 1);
        assert_eq!(config.slots[0].at, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
        assert_eq!(config.commission, CommissionConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.commission.withdrawable_percentage = dec!(120);
        assert!(matches!(config.validate(), Err(EngineError::ConfigError(_))));

        let mut config = EngineConfig::default();
        config.slots.push(config.slots[0].clone());
        assert!(matches!(config.validate(), Err(EngineError::ConfigError(_))));

        let config = EngineConfig {
            utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::ConfigError(_))));
    }
}
