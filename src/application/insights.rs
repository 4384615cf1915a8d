use super::Page;
use super::orders::{OrderManager, OrderProgress};
use super::streaks::{StreakInfo, StreakService};
use super::wallet::WalletLedger;
use crate::config::ForecastConfig;
use crate::domain::UserId;
use crate::domain::order::{InstallmentOrder, ScheduleStatus};
use crate::domain::payment::{PaymentRecord, PaymentSource};
use crate::domain::ports::{ClockRef, StorageRef};
use crate::domain::user::AutopaySettings;
use crate::domain::wallet::WalletBalance;
use crate::error::{EngineError, Result};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Whether autopay would leave `order` alone on `day` because of a skip date
/// or a pause.
pub fn blocked_on(order: &InstallmentOrder, day: NaiveDate) -> bool {
    order.autopay.skip_dates.contains(&day) || order.autopay.pause_until.is_some_and(|p| p >= day)
}

/// Amount autopay is expected to collect on each of `days` days starting at
/// `start`, one installment per order per unblocked day.
///
/// Orders already paid on `start` contribute nothing that day.
pub fn project_dues(orders: &[InstallmentOrder], start: NaiveDate, days: u32) -> Vec<Decimal> {
    let mut dues = vec![Decimal::ZERO; days as usize];
    for order in orders {
        let mut pending = order
            .payment_schedule
            .iter()
            .filter(|item| item.status == ScheduleStatus::Pending)
            .map(|item| item.amount);
        for (offset, due) in dues.iter_mut().enumerate() {
            let Some(day) = start.checked_add_days(Days::new(offset as u64)) else {
                break;
            };
            if blocked_on(order, day) || (offset == 0 && order.paid_on(day)) {
                continue;
            }
            match pending.next() {
                Some(amount) => *due += amount,
                None => break,
            }
        }
    }
    dues
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub due: Decimal,
    pub cumulative_due: Decimal,
    pub projected_balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BalanceForecast {
    pub user_id: UserId,
    /// Available balance minus the minimum balance lock.
    pub usable_balance: Decimal,
    pub days: Vec<ForecastDay>,
    pub total_due: Decimal,
    pub shortfall_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TopUpSuggestion {
    pub user_id: UserId,
    pub horizon_days: u32,
    pub due: Decimal,
    pub usable_balance: Decimal,
    pub suggested_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DashboardOrder {
    pub order_id: Uuid,
    pub product_name: String,
    pub priority: u32,
    pub paused_until: Option<NaiveDate>,
    pub skipped_today: bool,
    pub progress: OrderProgress,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AutopayDashboard {
    pub user_id: UserId,
    pub balance: WalletBalance,
    pub usable_balance: Decimal,
    pub settings: AutopaySettings,
    pub orders: Vec<DashboardOrder>,
    pub due_today: Decimal,
    pub due_tomorrow: Decimal,
    pub streak: StreakInfo,
}

/// Read-only views over balances, schedules and autopay history.
pub struct InsightsService {
    storage: StorageRef,
    orders: Arc<OrderManager>,
    wallets: Arc<WalletLedger>,
    streaks: Arc<StreakService>,
    clock: ClockRef,
    forecast: ForecastConfig,
    history_page_limit: u32,
}

impl InsightsService {
    pub fn new(
        storage: StorageRef,
        orders: Arc<OrderManager>,
        wallets: Arc<WalletLedger>,
        streaks: Arc<StreakService>,
        clock: ClockRef,
        forecast: ForecastConfig,
        history_page_limit: u32,
    ) -> Self {
        Self {
            storage,
            orders,
            wallets,
            streaks,
            clock,
            forecast,
            history_page_limit,
        }
    }

    async fn usable_balance(
        &self,
        user_id: &str,
        settings: &AutopaySettings,
    ) -> Result<(WalletBalance, Decimal)> {
        let balance = self.wallets.get_balance(user_id).await?;
        let usable = (balance.available - settings.minimum_balance_lock).max(Decimal::ZERO);
        Ok((balance, usable))
    }

    /// Day-by-day projection of autopay dues against the usable balance.
    /// `days` defaults to the configured window and is capped at the maximum.
    pub async fn balance_forecast(
        &self,
        user_id: &str,
        days: Option<u32>,
    ) -> Result<BalanceForecast> {
        let days = match days {
            Some(0) => {
                return Err(EngineError::ValidationError(
                    "forecast days must be at least 1".to_string(),
                ));
            }
            Some(days) => days.min(self.forecast.max_days),
            None => self.forecast.default_days,
        };
        let user = self.orders.get_user(user_id).await?;
        let (_, usable_balance) = self.usable_balance(user_id, &user.autopay_settings).await?;
        let queue = self.orders.autopay_queue(user_id).await?;
        let today = self.clock.today();

        let mut cumulative_due = Decimal::ZERO;
        let mut shortfall_date = None;
        let mut forecast_days = Vec::with_capacity(days as usize);
        for (offset, due) in project_dues(&queue, today, days).into_iter().enumerate() {
            let Some(date) = today.checked_add_days(Days::new(offset as u64)) else {
                break;
            };
            cumulative_due += due;
            let projected_balance = usable_balance - cumulative_due;
            if shortfall_date.is_none() && projected_balance < Decimal::ZERO {
                shortfall_date = Some(date);
            }
            forecast_days.push(ForecastDay {
                date,
                due,
                cumulative_due,
                projected_balance,
            });
        }

        Ok(BalanceForecast {
            user_id: user.id,
            usable_balance,
            days: forecast_days,
            total_due: cumulative_due,
            shortfall_date,
        })
    }

    /// Top-up that would carry every autopay order through the horizon.
    pub async fn suggested_top_up(
        &self,
        user_id: &str,
        days: Option<u32>,
    ) -> Result<TopUpSuggestion> {
        let horizon_days = days
            .unwrap_or(self.forecast.top_up_horizon_days)
            .clamp(1, self.forecast.max_days);
        let user = self.orders.get_user(user_id).await?;
        let (_, usable_balance) = self.usable_balance(user_id, &user.autopay_settings).await?;
        let queue = self.orders.autopay_queue(user_id).await?;
        let due: Decimal = project_dues(&queue, self.clock.today(), horizon_days)
            .into_iter()
            .sum();
        Ok(TopUpSuggestion {
            user_id: user.id,
            horizon_days,
            due,
            usable_balance,
            suggested_amount: (due - usable_balance).max(Decimal::ZERO),
        })
    }

    pub async fn autopay_dashboard(&self, user_id: &str) -> Result<AutopayDashboard> {
        let user = self.orders.get_user(user_id).await?;
        let (balance, usable_balance) = self.usable_balance(user_id, &user.autopay_settings).await?;
        let queue = self.orders.autopay_queue(user_id).await?;
        let today = self.clock.today();
        let dues = project_dues(&queue, today, 2);

        let orders = queue
            .iter()
            .map(|order| DashboardOrder {
                order_id: order.id,
                product_name: order.product_name.clone(),
                priority: order.autopay.priority,
                paused_until: order.autopay.pause_until.filter(|p| *p >= today),
                skipped_today: blocked_on(order, today),
                progress: OrderProgress::of(order),
            })
            .collect();

        Ok(AutopayDashboard {
            user_id: user.id.clone(),
            balance,
            usable_balance,
            settings: user.autopay_settings,
            orders,
            due_today: dues.first().copied().unwrap_or_default(),
            due_tomorrow: dues.get(1).copied().unwrap_or_default(),
            streak: self.streaks.streak_info(user_id).await?,
        })
    }

    /// Autopay payment records, failed attempts included, newest first.
    pub async fn autopay_history(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<PaymentRecord>> {
        self.orders.get_user(user_id).await?;
        let mut records: Vec<PaymentRecord> = self
            .storage
            .payments_for_user(user_id)
            .await?
            .into_iter()
            .filter(|p| p.source == PaymentSource::Autopay)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::slice(records, page, limit.min(self.history_page_limit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::tests::new_order;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn active_order(price: Decimal, days: u32, daily: Decimal) -> InstallmentOrder {
        let mut order =
            InstallmentOrder::new(new_order(price, days, Some(daily)), day(1), Utc::now()).unwrap();
        order.activate(Utc::now()).unwrap();
        order
    }

    #[test]
    fn test_project_dues_honours_skips_and_pause() {
        let mut order = active_order(dec!(500), 5, dec!(100));
        order.autopay.skip_dates = vec![day(2)];
        order.autopay.pause_until = Some(day(4));

        let dues = project_dues(&[order], day(1), 7);
        assert_eq!(
            dues,
            vec![dec!(100), dec!(0), dec!(0), dec!(0), dec!(100), dec!(100), dec!(100)]
        );
    }

    #[test]
    fn test_project_dues_stops_when_schedule_runs_out() {
        let mut order = active_order(dec!(250), 5, dec!(50));
        order.record_installment(1, Uuid::new_v4(), day(1), Utc::now()).unwrap();

        let dues = project_dues(&[order], day(1), 6);
        assert_eq!(dues[0], Decimal::ZERO);
        assert_eq!(dues[1..5].iter().copied().sum::<Decimal>(), dec!(200));
        assert_eq!(dues[5], Decimal::ZERO);
    }
}
