use crate::domain::ports::Clock;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use std::sync::Mutex;

/// Wall-clock time; business days are taken in `offset`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

/// A clock that only moves when told to. Used by tests, simulations and
/// manual re-runs for a given date.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Noon local time on `day`, so day arithmetic never crosses midnight.
    pub fn at_date(day: NaiveDate, offset: FixedOffset) -> Self {
        let noon = day
            .and_hms_opt(12, 0, 0)
            .and_then(|t| t.and_local_timezone(offset).single())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Self::new(noon, offset)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance_days(&self, days: u64) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = guard.checked_add_days(Days::new(days)) {
            *guard = next;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.offset).date_naive()
    }
}
