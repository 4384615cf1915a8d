use super::money::{MONEY_SCALE, ceil_money};
use super::{ProductId, UserId};
use crate::error::EngineError;
use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const MIN_TOTAL_DAYS: u32 = 5;
pub const MAX_TOTAL_DAYS: u32 = 3650;
pub const MIN_DAILY_AMOUNT: Decimal = dec!(50);

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Active => "ACTIVE",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Pending,
    Paid,
    Skipped,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Gateway,
    Wallet,
}

/// One day of the installment plan.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentScheduleItem {
    pub installment_number: u32,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub status: ScheduleStatus,
    pub paid_date: Option<NaiveDate>,
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DeliveryAddress {
    pub name: String,
    pub phone: String,
    pub line1: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
}

impl DeliveryAddress {
    pub fn validate(&self) -> Result<(), EngineError> {
        let required = [
            ("name", &self.name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("state", &self.state),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(EngineError::ValidationError(format!(
                    "deliveryAddress.{field} is required"
                )));
            }
        }
        if self.phone.len() != 10 || !self.phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(EngineError::ValidationError(
                "deliveryAddress.phone must be 10 digits".to_string(),
            ));
        }
        if self.pincode.len() != 6 || !self.pincode.chars().all(|c| c.is_ascii_digit()) {
            return Err(EngineError::ValidationError(
                "deliveryAddress.pincode must be 6 digits".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-order autopay switches.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AutopayConfig {
    pub enabled: bool,
    /// Lower runs first.
    pub priority: u32,
    pub skip_dates: Vec<NaiveDate>,
    pub pause_until: Option<NaiveDate>,
}

impl Default for AutopayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 1,
            skip_dates: Vec::new(),
            pause_until: None,
        }
    }
}

/// Referral resolved for the order when it was placed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OrderReferral {
    pub referrer_id: UserId,
    pub commission_percentage: Option<Decimal>,
}

/// Everything `InstallmentOrder::new` needs, already resolved against the
/// catalog and referral collaborators.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub product_name: String,
    pub variant_id: Option<String>,
    pub price: Decimal,
    pub total_days: u32,
    pub daily_amount: Option<Decimal>,
    pub payment_method: PaymentMethod,
    pub delivery_address: DeliveryAddress,
    pub coupon_code: Option<String>,
    pub referral: Option<OrderReferral>,
    pub product_commission_percentage: Option<Decimal>,
    pub autopay: AutopayConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct InstallmentOrder {
    pub id: Uuid,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub product_name: String,
    pub variant_id: Option<String>,
    pub product_price: Decimal,
    pub total_days: u32,
    pub daily_payment_amount: Decimal,
    pub paid_installments: u32,
    pub total_paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub payment_schedule: Vec<PaymentScheduleItem>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub delivery_address: DeliveryAddress,
    pub coupon_code: Option<String>,
    pub autopay: AutopayConfig,
    pub referral: Option<OrderReferral>,
    pub product_commission_percentage: Option<Decimal>,
    pub total_commission_paid: Decimal,
    pub created_at: DateTime<Utc>,
    /// Per-user placement counter; breaks ties between orders created in the
    /// same instant.
    #[serde(default)]
    pub sequence: u64,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl InstallmentOrder {
    /// Validates the request and lays out one schedule item per day starting
    /// on `start_date`. The last item absorbs rounding so the schedule sums to
    /// the price.
    pub fn new(
        request: NewOrder,
        start_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        if request.price <= Decimal::ZERO {
            return Err(EngineError::ValidationError(
                "Product price must be positive".to_string(),
            ));
        }
        if !(MIN_TOTAL_DAYS..=MAX_TOTAL_DAYS).contains(&request.total_days) {
            return Err(EngineError::ValidationError(format!(
                "totalDays must be between {MIN_TOTAL_DAYS} and {MAX_TOTAL_DAYS}"
            )));
        }
        request.delivery_address.validate()?;

        let days = Decimal::from(request.total_days);
        let daily = match request.daily_amount {
            Some(daily) => {
                if daily.scale() > MONEY_SCALE {
                    return Err(EngineError::ValidationError(
                        "dailyAmount must have at most 2 decimal places".to_string(),
                    ));
                }
                if daily * (days - Decimal::ONE) >= request.price || daily * days < request.price {
                    return Err(EngineError::ValidationError(format!(
                        "dailyAmount {daily} over {} days does not match price {}",
                        request.total_days, request.price
                    )));
                }
                daily
            }
            None => ceil_money(request.price / days),
        };
        if daily < MIN_DAILY_AMOUNT {
            return Err(EngineError::ValidationError(format!(
                "dailyAmount must be at least {MIN_DAILY_AMOUNT}, got {daily}"
            )));
        }

        let last_amount = request.price - daily * (days - Decimal::ONE);
        if last_amount <= Decimal::ZERO {
            return Err(EngineError::ValidationError(format!(
                "dailyAmount {daily} over {} days leaves nothing for the last installment",
                request.total_days
            )));
        }
        let mut payment_schedule = Vec::with_capacity(request.total_days as usize);
        for n in 1..=request.total_days {
            let due_date = start_date
                .checked_add_days(Days::new(u64::from(n - 1)))
                .ok_or_else(|| {
                    EngineError::ValidationError("Schedule runs past the calendar".to_string())
                })?;
            payment_schedule.push(PaymentScheduleItem {
                installment_number: n,
                due_date,
                amount: if n == request.total_days { last_amount } else { daily },
                status: ScheduleStatus::Pending,
                paid_date: None,
                payment_id: None,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            product_id: request.product_id,
            product_name: request.product_name,
            variant_id: request.variant_id,
            product_price: request.price,
            total_days: request.total_days,
            daily_payment_amount: daily,
            paid_installments: 0,
            total_paid_amount: Decimal::ZERO,
            remaining_amount: request.price,
            payment_schedule,
            status: OrderStatus::Pending,
            payment_method: request.payment_method,
            delivery_address: request.delivery_address,
            coupon_code: request.coupon_code,
            autopay: request.autopay,
            referral: request.referral,
            product_commission_percentage: request.product_commission_percentage,
            total_commission_paid: Decimal::ZERO,
            created_at: now,
            sequence: 0,
            activated_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        })
    }

    /// Creation order: timestamp, then placement counter.
    pub fn creation_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.sequence)
    }

    pub fn next_pending_installment(&self) -> Option<&PaymentScheduleItem> {
        self.payment_schedule
            .iter()
            .find(|item| item.status == ScheduleStatus::Pending)
    }

    pub fn installment(&self, number: u32) -> Option<&PaymentScheduleItem> {
        self.payment_schedule
            .iter()
            .find(|item| item.installment_number == number)
    }

    pub fn can_accept_payment(&self) -> bool {
        self.status == OrderStatus::Active && self.remaining_amount > Decimal::ZERO
    }

    pub fn can_process_autopay(&self, today: NaiveDate) -> bool {
        self.autopay_block_reason(today).is_none()
    }

    /// Why autopay must not charge this order today, if anything.
    pub fn autopay_block_reason(&self, today: NaiveDate) -> Option<String> {
        if !self.can_accept_payment() {
            return Some(format!("order is {} and cannot accept payment", self.status));
        }
        if !self.autopay.enabled {
            return Some("autopay disabled for order".to_string());
        }
        if self.autopay.skip_dates.contains(&today) {
            return Some(format!("{today} is a skip date"));
        }
        if let Some(pause_until) = self.autopay.pause_until
            && pause_until >= today
        {
            return Some(format!("autopay paused until {pause_until}"));
        }
        None
    }

    /// At most one installment may be marked paid per calendar day.
    pub fn paid_on(&self, day: NaiveDate) -> bool {
        self.payment_schedule
            .iter()
            .any(|item| item.status == ScheduleStatus::Paid && item.paid_date == Some(day))
    }

    /// Marks `installment_number` paid. The caller has already taken the money.
    pub fn record_installment(
        &mut self,
        installment_number: u32,
        payment_id: Uuid,
        paid_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Decimal, EngineError> {
        let order_id = self.id;
        let item = self
            .payment_schedule
            .iter_mut()
            .find(|item| item.installment_number == installment_number)
            .ok_or_else(|| {
                EngineError::ValidationError(format!(
                    "Order {order_id} has no installment {installment_number}"
                ))
            })?;
        if item.status != ScheduleStatus::Pending {
            return Err(EngineError::DuplicatePayment {
                order_id,
                installment: installment_number,
            });
        }
        item.status = ScheduleStatus::Paid;
        item.paid_date = Some(paid_date);
        item.payment_id = Some(payment_id);
        let amount = item.amount;

        self.paid_installments += 1;
        self.total_paid_amount += amount;
        self.recompute_remaining();
        if self.status == OrderStatus::Active && self.remaining_amount.is_zero() {
            self.status = OrderStatus::Completed;
            self.completed_at = Some(now);
        }
        Ok(amount)
    }

    /// PENDING -> ACTIVE. Only reachable through the first payment.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != OrderStatus::Pending {
            return Err(self.invalid_state("only pending orders can be activated"));
        }
        self.status = OrderStatus::Active;
        self.activated_at = Some(now);
        Ok(())
    }

    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(self.invalid_state("terminal orders cannot be cancelled"));
        }
        for item in self
            .payment_schedule
            .iter_mut()
            .filter(|item| item.status == ScheduleStatus::Pending)
        {
            item.status = ScheduleStatus::Skipped;
        }
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancellation_reason = Some(reason.into());
        Ok(())
    }

    pub fn recompute_remaining(&mut self) {
        self.remaining_amount = (self.product_price - self.total_paid_amount).max(Decimal::ZERO);
    }

    /// Rate used for commission: order override, then product override, then the default.
    pub fn commission_rate(&self, default_rate: Decimal) -> Decimal {
        self.referral
            .as_ref()
            .and_then(|r| r.commission_percentage)
            .or(self.product_commission_percentage)
            .unwrap_or(default_rate)
    }

    pub fn ensure_mutable(&self) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(self.invalid_state("order is closed"));
        }
        Ok(())
    }

    pub fn invalid_state(&self, reason: &str) -> EngineError {
        EngineError::InvalidOrderState {
            order_id: self.id,
            status: self.status,
            reason: reason.to_string(),
        }
    }

    pub fn pending_installments(&self) -> usize {
        self.payment_schedule
            .iter()
            .filter(|item| item.status == ScheduleStatus::Pending)
            .count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn address() -> DeliveryAddress {
        DeliveryAddress {
            name: "Asha".to_string(),
            phone: "9876543210".to_string(),
            line1: "12 MG Road".to_string(),
            city: "Pune".to_string(),
            state: "MH".to_string(),
            pincode: "411001".to_string(),
        }
    }

    pub(crate) fn new_order(price: Decimal, total_days: u32, daily: Option<Decimal>) -> NewOrder {
        NewOrder {
            user_id: "u1".to_string(),
            product_id: "p1".to_string(),
            product_name: "Phone".to_string(),
            variant_id: None,
            price,
            total_days,
            daily_amount: daily,
            payment_method: PaymentMethod::Wallet,
            delivery_address: address(),
            coupon_code: None,
            referral: None,
            product_commission_percentage: None,
            autopay: AutopayConfig::default(),
        }
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn active_order() -> InstallmentOrder {
        let request = new_order(dec!(1000), 10, Some(dec!(100)));
        let mut order = InstallmentOrder::new(request, start(), now()).unwrap();
        order.activate(now()).unwrap();
        order
    }

    #[test]
    fn test_schedule_has_one_item_per_consecutive_day() {
        let request = new_order(dec!(1000), 10, Some(dec!(100)));
        let order = InstallmentOrder::new(request, start(), now()).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_schedule.len(), 10);
        for pair in order.payment_schedule.windows(2) {
            assert_eq!(pair[1].due_date, pair[0].due_date.succ_opt().unwrap());
        }
        assert_eq!(order.payment_schedule[0].due_date, start());
        assert_eq!(order.remaining_amount, dec!(1000));
    }

    #[test]
    fn test_daily_amount_derived_from_price() {
        let order = InstallmentOrder::new(new_order(dec!(1000), 6, None), start(), now()).unwrap();
        assert_eq!(order.daily_payment_amount, dec!(166.67));
        let total: Decimal = order.payment_schedule.iter().map(|i| i.amount).sum();
        assert_eq!(total, dec!(1000));
        assert_eq!(order.payment_schedule[5].amount, dec!(166.65));
    }

    #[test]
    fn test_order_validation() {
        let too_short = InstallmentOrder::new(new_order(dec!(1000), 4, None), start(), now());
        assert!(matches!(too_short, Err(EngineError::ValidationError(_))));

        let too_small = InstallmentOrder::new(new_order(dec!(200), 5, None), start(), now());
        assert!(matches!(too_small, Err(EngineError::ValidationError(_))));

        let mismatched =
            InstallmentOrder::new(new_order(dec!(1000), 5, Some(dec!(100))), start(), now());
        assert!(matches!(mismatched, Err(EngineError::ValidationError(_))));

        let mut bad_address = new_order(dec!(1000), 10, None);
        bad_address.delivery_address.pincode = "41100".to_string();
        assert!(matches!(
            InstallmentOrder::new(bad_address, start(), now()),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_long_plans_never_overcharge() {
        let too_long = new_order(dec!(500000.01), 10_000, None);
        assert!(matches!(
            InstallmentOrder::new(too_long, start(), now()),
            Err(EngineError::ValidationError(_))
        ));

        let longest = new_order(dec!(182500.01), MAX_TOTAL_DAYS, None);
        let order = InstallmentOrder::new(longest, start(), now()).unwrap();
        assert_eq!(order.daily_payment_amount, dec!(50.01));
        let (last, rest) = order.payment_schedule.split_last().unwrap();
        let first: Decimal = rest.iter().map(|i| i.amount).sum();
        assert!(first < order.product_price);
        assert!(last.amount > Decimal::ZERO);
        assert_eq!(first + last.amount, order.product_price);
    }

    #[test]
    fn test_record_installment_updates_totals_and_completes() {
        let mut order =
            InstallmentOrder::new(new_order(dec!(250), 5, None), start(), now()).unwrap();
        order.activate(now()).unwrap();

        for n in 1..=5 {
            let day = start().checked_add_days(Days::new(u64::from(n - 1))).unwrap();
            order.record_installment(n, Uuid::new_v4(), day, now()).unwrap();
            let paid: Decimal = order
                .payment_schedule
                .iter()
                .filter(|i| i.status == ScheduleStatus::Paid)
                .map(|i| i.amount)
                .sum();
            assert_eq!(paid, order.total_paid_amount);
            assert_eq!(order.remaining_amount, (dec!(250) - paid).max(Decimal::ZERO));
        }
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.completed_at.is_some());
        assert!(!order.can_accept_payment());
    }

    #[test]
    fn test_record_installment_twice_is_duplicate() {
        let mut order = active_order();
        order.record_installment(1, Uuid::new_v4(), start(), now()).unwrap();
        let again = order.record_installment(1, Uuid::new_v4(), start(), now());
        assert!(matches!(again, Err(EngineError::DuplicatePayment { installment: 1, .. })));
        assert_eq!(order.paid_installments, 1);
        assert!(order.paid_on(start()));
    }

    #[test]
    fn test_autopay_eligibility() {
        let mut order = active_order();
        let today = start().succ_opt().unwrap();
        assert!(order.can_process_autopay(today));

        order.autopay.skip_dates.push(today);
        assert!(!order.can_process_autopay(today));
        order.autopay.skip_dates.clear();

        order.autopay.pause_until = Some(today);
        assert!(!order.can_process_autopay(today));
        assert!(order.can_process_autopay(today.succ_opt().unwrap()));
        order.autopay.pause_until = None;

        order.autopay.enabled = false;
        assert!(!order.can_process_autopay(today));
    }

    #[test]
    fn test_cancel_voids_pending_items() {
        let mut order = active_order();
        order.record_installment(1, Uuid::new_v4(), start(), now()).unwrap();
        order.cancel("changed mind", now()).unwrap();

        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment_schedule[0].status, ScheduleStatus::Paid);
        assert!(order.payment_schedule[1..]
            .iter()
            .all(|i| i.status == ScheduleStatus::Skipped));
        assert!(matches!(
            order.cancel("again", now()),
            Err(EngineError::InvalidOrderState { .. })
        ));
    }

    #[test]
    fn test_commission_rate_resolution() {
        let mut order = active_order();
        assert_eq!(order.commission_rate(dec!(25)), dec!(25));
        order.product_commission_percentage = Some(dec!(15));
        assert_eq!(order.commission_rate(dec!(25)), dec!(15));
        order.referral = Some(OrderReferral {
            referrer_id: "r1".to_string(),
            commission_percentage: Some(dec!(10)),
        });
        assert_eq!(order.commission_rate(dec!(25)), dec!(10));
    }
}
