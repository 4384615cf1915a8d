use super::insights::project_dues;
use super::orders::OrderManager;
use super::payments::{PaymentEngine, PaymentMode, PaymentOutcome};
use super::streaks::StreakService;
use super::wallet::WalletLedger;
use crate::config::{JobKind, ScheduleSlot};
use crate::domain::UserId;
use crate::domain::order::InstallmentOrder;
use crate::domain::ports::{ClockRef, Notification, NotifierRef, StorageRef};
use crate::domain::user::User;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OrderOutcome {
    pub order_id: Uuid,
    pub priority: u32,
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct UserRunSummary {
    pub user_id: UserId,
    pub orders: Vec<OrderOutcome>,
    pub amount_paid: Decimal,
    pub balance: Decimal,
    pub notified: bool,
    /// Set when the whole user failed before or between orders.
    pub error: Option<String>,
}

impl UserRunSummary {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    fn count(&self, label: &str) -> u32 {
        self.orders
            .iter()
            .filter(|o| o.outcome.label() == label)
            .count() as u32
    }
}

/// Aggregate of one slot execution.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RunSummary {
    pub slot_id: String,
    pub job: JobKind,
    pub business_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub users: u32,
    pub processed: u32,
    pub success: u32,
    pub failed: u32,
    pub skipped: u32,
    pub insufficient_balance: u32,
    pub notifications: u32,
    pub details: Vec<UserRunSummary>,
}

impl RunSummary {
    fn start(slot: &ScheduleSlot, business_date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            slot_id: slot.slot_id.clone(),
            job: slot.job,
            business_date,
            started_at: now,
            finished_at: now,
            users: 0,
            processed: 0,
            success: 0,
            failed: 0,
            skipped: 0,
            insufficient_balance: 0,
            notifications: 0,
            details: Vec::new(),
        }
    }

    fn absorb(&mut self, user: UserRunSummary) {
        self.users += 1;
        self.processed += user.orders.len() as u32;
        self.success += user.count("SUCCESS");
        self.failed += user.count("FAILED");
        self.skipped += user.count("SKIPPED");
        self.insufficient_balance += user.count("INSUFFICIENT_BALANCE");
        if user.error.is_some() {
            self.failed += 1;
        }
        if user.notified {
            self.notifications += 1;
        }
        self.details.push(user);
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SlotStatus {
    pub slot: ScheduleSlot,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<RunSummary>,
}

/// Daily autopay batch plus its reminder and low-balance companions.
///
/// Users are processed one after another; within a user, orders run in
/// priority order and the first insufficient balance ends that user's turn.
pub struct AutopayScheduler {
    storage: StorageRef,
    orders: Arc<OrderManager>,
    payments: Arc<PaymentEngine>,
    wallets: Arc<WalletLedger>,
    streaks: Arc<StreakService>,
    notifier: NotifierRef,
    clock: ClockRef,
    offset: FixedOffset,
    slots: Vec<ScheduleSlot>,
    last_runs: Mutex<HashMap<String, RunSummary>>,
}

impl AutopayScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: StorageRef,
        orders: Arc<OrderManager>,
        payments: Arc<PaymentEngine>,
        wallets: Arc<WalletLedger>,
        streaks: Arc<StreakService>,
        notifier: NotifierRef,
        clock: ClockRef,
        offset: FixedOffset,
        slots: Vec<ScheduleSlot>,
    ) -> Self {
        Self {
            storage,
            orders,
            payments,
            wallets,
            streaks,
            notifier,
            clock,
            offset,
            slots,
            last_runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn slots(&self) -> &[ScheduleSlot] {
        &self.slots
    }

    /// Runs a configured slot right away for the clock's current day.
    /// Inactive slots may still be triggered by hand.
    pub async fn trigger_slot(&self, slot_id: &str) -> Result<RunSummary> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.slot_id == slot_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("schedule slot '{slot_id}'")))?;
        if !slot.active {
            warn!(slot_id = %slot.slot_id, "Triggering inactive slot by hand");
        }
        self.run_slot(&slot).await
    }

    pub async fn slot_status(&self) -> Vec<SlotStatus> {
        let now = self.clock.now();
        let last_runs = self.last_runs.lock().await;
        self.slots
            .iter()
            .map(|slot| SlotStatus {
                slot: slot.clone(),
                next_run: slot.active.then(|| self.next_run(slot, now)).flatten(),
                last_run: last_runs.get(&slot.slot_id).cloned(),
            })
            .collect()
    }

    /// Sleeps until the next active slot, runs it, and repeats until
    /// `shutdown` is cancelled. A failing run is logged and the loop goes on.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(slots = self.slots.len(), "Autopay scheduler started");
        let mut last_fired: Option<DateTime<Utc>> = None;
        loop {
            let now = self.clock.now();
            // A slot fires once per due time, even if the clock has not moved past it.
            let after = last_fired.map_or(now, |fired| fired.max(now));
            let Some((slot, at)) = self
                .slots
                .iter()
                .filter(|s| s.active)
                .filter_map(|s| self.next_run(s, after).map(|at| (s.clone(), at)))
                .min_by_key(|(_, at)| *at)
            else {
                warn!("No active schedule slots, scheduler exiting");
                return;
            };
            let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
            info!(slot_id = %slot.slot_id, next_run = %at, "Waiting for next slot");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Autopay scheduler shutting down");
                    return;
                }
                _ = tokio::time::sleep(wait) => {
                    last_fired = Some(at);
                    if let Err(e) = self.run_slot(&slot).await {
                        error!(slot_id = %slot.slot_id, error = %e, "Scheduled run failed");
                    }
                }
            }
        }
    }

    fn next_run(&self, slot: &ScheduleSlot, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_today = now.with_timezone(&self.offset).date_naive();
        [local_today, local_today.checked_add_days(Days::new(1))?]
            .into_iter()
            .filter_map(|day| {
                day.and_time(slot.at)
                    .and_local_timezone(self.offset)
                    .single()
                    .map(|t| t.with_timezone(&Utc))
            })
            .find(|at| *at > now)
    }

    async fn run_slot(&self, slot: &ScheduleSlot) -> Result<RunSummary> {
        let summary = match slot.job {
            JobKind::Autopay => self.run_autopay(slot).await?,
            JobKind::Reminder => self.run_reminders(slot).await?,
            JobKind::LowBalanceForecast => self.run_low_balance_forecast(slot).await?,
        };
        self.last_runs
            .lock()
            .await
            .insert(slot.slot_id.clone(), summary.clone());
        Ok(summary)
    }

    #[instrument(skip(self, slot), fields(slot_id = %slot.slot_id))]
    async fn run_autopay(&self, slot: &ScheduleSlot) -> Result<RunSummary> {
        let today = self.clock.today();
        let mut summary = RunSummary::start(slot, today, self.clock.now());
        let users = self.storage.autopay_users().await?;
        info!(users = users.len(), date = %today, "Autopay batch started");

        for user in users {
            let user_summary = match self.autopay_user(&user, today).await {
                Ok(user_summary) => user_summary,
                Err(e) => {
                    error!(user_id = %user.id, error = %e, "Autopay failed for user");
                    UserRunSummary {
                        error: Some(e.to_string()),
                        ..UserRunSummary::new(&user.id)
                    }
                }
            };
            summary.absorb(user_summary);
        }

        summary.finished_at = self.clock.now();
        info!(
            users = summary.users,
            processed = summary.processed,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            insufficient_balance = summary.insufficient_balance,
            "Autopay batch finished"
        );
        Ok(summary)
    }

    async fn autopay_user(&self, user: &User, today: NaiveDate) -> Result<UserRunSummary> {
        let mut result = UserRunSummary::new(&user.id);
        let mut shortfall = None;

        for order in self.orders.autopay_queue(&user.id).await? {
            let outcome = self.autopay_order(&order, today).await;
            match &outcome {
                PaymentOutcome::Success { amount, .. } => result.amount_paid += *amount,
                PaymentOutcome::InsufficientBalance { required, available } => {
                    shortfall = Some((*required, *available));
                }
                _ => {}
            }
            let stop = matches!(outcome, PaymentOutcome::InsufficientBalance { .. });
            result.orders.push(OrderOutcome {
                order_id: order.id,
                priority: order.autopay.priority,
                outcome,
            });
            if stop {
                info!(
                    user_id = %user.id,
                    "Insufficient balance, remaining orders left for tomorrow"
                );
                break;
            }
        }
        result.balance = self.wallets.get_balance(&user.id).await?.available;

        let paid = result.count("SUCCESS");
        let failed = result.count("FAILED") + result.count("INSUFFICIENT_BALANCE");
        if paid > 0 {
            if let Err(e) = self.streaks.update_payment_streak(&user.id).await {
                warn!(user_id = %user.id, error = %e, "Streak update failed");
            }
            if user.autopay_settings.reminders.success_notification {
                let notification = Notification::AutopaySuccess {
                    user_id: user.id.clone(),
                    orders_paid: paid,
                    total_amount: result.amount_paid,
                    balance: result.balance,
                };
                result.notified |= self.send(&notification).await;
            }
        }
        if failed > 0 && user.autopay_settings.reminders.failure_notification {
            let (required, _) = shortfall.unwrap_or_default();
            let notification = Notification::AutopayFailure {
                user_id: user.id.clone(),
                failed_orders: failed,
                insufficient_balance: shortfall.is_some(),
                required,
                balance: result.balance,
            };
            result.notified |= self.send(&notification).await;
        }
        Ok(result)
    }

    async fn autopay_order(&self, order: &InstallmentOrder, today: NaiveDate) -> PaymentOutcome {
        if let Some(reason) = order.autopay_block_reason(today) {
            return PaymentOutcome::Skipped { reason };
        }
        if order.paid_on(today) {
            return PaymentOutcome::Skipped {
                reason: "installment already paid today".to_string(),
            };
        }
        let outcome = PaymentOutcome::from(
            self.payments
                .process_installment_payment(order.id, PaymentMode::Autopay)
                .await,
        );
        let reason = match &outcome {
            PaymentOutcome::InsufficientBalance { required, available } => {
                Some(format!("insufficient balance: required {required}, available {available}"))
            }
            PaymentOutcome::Failed { reason } => Some(reason.clone()),
            _ => None,
        };
        if let Some(reason) = reason
            && let Err(e) = self.payments.record_failed_attempt(order, &reason).await
        {
            error!(order_id = %order.id, error = %e, "Could not record failed attempt");
        }
        outcome
    }

    #[instrument(skip(self, slot), fields(slot_id = %slot.slot_id))]
    async fn run_reminders(&self, slot: &ScheduleSlot) -> Result<RunSummary> {
        let today = self.clock.today();
        let mut summary = RunSummary::start(slot, today, self.clock.now());
        for user in self.storage.autopay_users().await? {
            let mut result = UserRunSummary::new(&user.id);
            if user.autopay_settings.reminders.payment_reminder {
                match self.remind(&user, today).await {
                    Ok(notified) => result.notified = notified,
                    Err(e) => {
                        error!(user_id = %user.id, error = %e, "Payment reminder failed");
                        result.error = Some(e.to_string());
                    }
                }
            }
            summary.absorb(result);
        }
        summary.finished_at = self.clock.now();
        info!(
            users = summary.users,
            notifications = summary.notifications,
            "Payment reminders sent"
        );
        Ok(summary)
    }

    async fn remind(&self, user: &User, today: NaiveDate) -> Result<bool> {
        let queue = self.orders.autopay_queue(&user.id).await?;
        let due: Vec<&InstallmentOrder> = queue
            .iter()
            .filter(|o| o.can_process_autopay(today) && !o.paid_on(today))
            .collect();
        let total_due: Decimal = due
            .iter()
            .filter_map(|o| o.next_pending_installment())
            .map(|i| i.amount)
            .sum();
        if total_due.is_zero() {
            return Ok(false);
        }
        let balance = self.wallets.get_balance(&user.id).await?.available;
        let notification = Notification::PaymentReminder {
            user_id: user.id.clone(),
            orders_due: due.len() as u32,
            total_due,
            balance,
        };
        Ok(self.send(&notification).await)
    }

    /// Warns users whose usable balance will not cover tomorrow's autopay or
    /// would drop below their threshold after it.
    #[instrument(skip(self, slot), fields(slot_id = %slot.slot_id))]
    async fn run_low_balance_forecast(&self, slot: &ScheduleSlot) -> Result<RunSummary> {
        let today = self.clock.today();
        let tomorrow = today
            .checked_add_days(Days::new(1))
            .ok_or_else(|| EngineError::ValidationError("calendar overflow".to_string()))?;
        let mut summary = RunSummary::start(slot, today, self.clock.now());
        for user in self.storage.autopay_users().await? {
            let mut result = UserRunSummary::new(&user.id);
            if user.autopay_settings.reminders.low_balance_alert {
                match self.forecast_alert(&user, tomorrow).await {
                    Ok(notified) => result.notified = notified,
                    Err(e) => {
                        error!(user_id = %user.id, error = %e, "Low balance forecast failed");
                        result.error = Some(e.to_string());
                    }
                }
            }
            summary.absorb(result);
        }
        summary.finished_at = self.clock.now();
        info!(
            users = summary.users,
            notifications = summary.notifications,
            "Low balance forecast finished"
        );
        Ok(summary)
    }

    async fn forecast_alert(&self, user: &User, tomorrow: NaiveDate) -> Result<bool> {
        let queue = self.orders.autopay_queue(&user.id).await?;
        let due_tomorrow = project_dues(&queue, tomorrow, 1)
            .first()
            .copied()
            .unwrap_or_default();
        if due_tomorrow.is_zero() {
            return Ok(false);
        }
        let settings = &user.autopay_settings;
        let available = self.wallets.get_balance(&user.id).await?.available;
        let usable_balance = (available - settings.minimum_balance_lock).max(Decimal::ZERO);
        let after = usable_balance - due_tomorrow;
        if after >= Decimal::ZERO && after >= settings.low_balance_threshold {
            return Ok(false);
        }
        let notification = Notification::LowBalance {
            user_id: user.id.clone(),
            due_tomorrow,
            usable_balance,
            threshold: settings.low_balance_threshold,
            shortfall: (due_tomorrow - usable_balance).max(Decimal::ZERO),
        };
        Ok(self.send(&notification).await)
    }

    async fn send(&self, notification: &Notification) -> bool {
        match self.notifier.notify(notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id = %notification.user_id(), error = %e, "Notification failed");
                false
            }
        }
    }
}
