use super::locks::KeyedLocks;
use crate::domain::order::{
    AutopayConfig, DeliveryAddress, InstallmentOrder, NewOrder, OrderStatus, PaymentMethod,
    PaymentScheduleItem,
};
use crate::domain::ports::{ClockRef, ProductCatalogRef, ReferralResolverRef, StorageRef};
use crate::domain::user::{AutopaySettings, AutopaySettingsUpdate, User};
use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument};
use uuid::Uuid;

/// Order-creation payload as it arrives from the request layer.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CreateOrderRequest {
    pub product_id: String,
    pub total_days: u32,
    #[serde(default)]
    pub daily_amount: Option<Decimal>,
    pub payment_method: PaymentMethod,
    pub delivery_address: DeliveryAddress,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub autopay_priority: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OrderProgress {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub product_name: String,
    pub total_days: u32,
    pub paid_installments: u32,
    pub pending_installments: u32,
    pub total_amount: Decimal,
    pub total_paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub percent_complete: Decimal,
    pub next_due_date: Option<NaiveDate>,
    pub next_due_amount: Option<Decimal>,
    pub total_commission_paid: Decimal,
}

impl OrderProgress {
    pub fn of(order: &InstallmentOrder) -> Self {
        let next = order.next_pending_installment();
        let percent_complete = if order.product_price.is_zero() {
            Decimal::ZERO
        } else {
            (order.total_paid_amount * Decimal::ONE_HUNDRED / order.product_price).round_dp(2)
        };
        Self {
            order_id: order.id,
            status: order.status,
            product_name: order.product_name.clone(),
            total_days: order.total_days,
            paid_installments: order.paid_installments,
            pending_installments: order.pending_installments() as u32,
            total_amount: order.product_price,
            total_paid_amount: order.total_paid_amount,
            remaining_amount: order.remaining_amount,
            percent_complete,
            next_due_date: next.map(|i| i.due_date),
            next_due_amount: next.map(|i| i.amount),
            total_commission_paid: order.total_commission_paid,
        }
    }
}

/// Sorts a user's orders the way autopay walks them: priority, then creation order.
pub fn sort_by_priority(orders: &mut [InstallmentOrder]) {
    orders.sort_by_key(|o| (o.autopay.priority, o.creation_key()));
}

/// Order lifecycle, schedules and per-order autopay switches.
pub struct OrderManager {
    storage: StorageRef,
    catalog: ProductCatalogRef,
    referrals: ReferralResolverRef,
    clock: ClockRef,
    locks: KeyedLocks,
    user_locks: KeyedLocks,
}

impl OrderManager {
    pub fn new(
        storage: StorageRef,
        catalog: ProductCatalogRef,
        referrals: ReferralResolverRef,
        clock: ClockRef,
    ) -> Self {
        Self {
            storage,
            catalog,
            referrals,
            clock,
            locks: KeyedLocks::new(),
            user_locks: KeyedLocks::new(),
        }
    }

    /// Per-user locks guarding every read-modify-write of a `User` record.
    /// Shared with the streak service.
    pub fn user_locks(&self) -> KeyedLocks {
        self.user_locks.clone()
    }

    /// Serializes every read-check-write on `order_id` until the guard drops.
    pub async fn lock(&self, order_id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.lock(&order_id.to_string()).await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        self.storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(user_id.to_string()))
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<InstallmentOrder> {
        self.storage
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))
    }

    /// Builds a PENDING order with a day-by-day schedule starting today.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn create_order(
        &self,
        user_id: &str,
        request: CreateOrderRequest,
    ) -> Result<InstallmentOrder> {
        let _guard = self.user_locks.lock(user_id).await;
        self.get_user(user_id).await?;
        let product = self
            .catalog
            .get_product(&request.product_id)
            .await?
            .ok_or_else(|| {
                EngineError::ValidationError(format!(
                    "Product {} does not exist",
                    request.product_id
                ))
            })?;
        let price = match &request.variant_id {
            Some(variant_id) => {
                product
                    .variants
                    .iter()
                    .find(|v| &v.id == variant_id)
                    .ok_or_else(|| {
                        EngineError::ValidationError(format!(
                            "Variant {variant_id} does not exist for product {}",
                            product.id
                        ))
                    })?
                    .price
            }
            None => product.price,
        };
        // Self-referral never earns commission.
        let referral = self
            .referrals
            .resolve(user_id)
            .await?
            .filter(|r| r.referrer_id != user_id);
        if let Some(pct) = referral.as_ref().and_then(|r| r.commission_percentage)
            && (pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED)
        {
            return Err(EngineError::ValidationError(format!(
                "Commission percentage {pct} is out of range"
            )));
        }
        let priority = request.autopay_priority.unwrap_or(1);
        if priority == 0 {
            return Err(EngineError::ValidationError(
                "autopay priority must be at least 1".to_string(),
            ));
        }

        let mut order = InstallmentOrder::new(
            NewOrder {
                user_id: user_id.to_string(),
                product_id: product.id,
                product_name: product.name,
                variant_id: request.variant_id,
                price,
                total_days: request.total_days,
                daily_amount: request.daily_amount,
                payment_method: request.payment_method,
                delivery_address: request.delivery_address,
                coupon_code: request.coupon_code,
                referral,
                product_commission_percentage: product.commission_percentage,
                autopay: AutopayConfig {
                    priority,
                    ..AutopayConfig::default()
                },
            },
            self.clock.today(),
            self.clock.now(),
        )?;
        order.sequence = self
            .storage
            .orders_for_user(user_id)
            .await?
            .iter()
            .map(|o| o.sequence)
            .max()
            .map_or(1, |last| last + 1);
        self.storage.save_order(order.clone()).await?;
        info!(
            order_id = %order.id,
            user_id = %user_id,
            price = %order.product_price,
            daily = %order.daily_payment_amount,
            days = order.total_days,
            "Installment order created"
        );
        Ok(order)
    }

    /// ACTIVE|PENDING -> CANCELLED. Remaining schedule items are voided.
    #[instrument(skip(self, reason))]
    pub async fn cancel_order(&self, order_id: Uuid, reason: &str) -> Result<InstallmentOrder> {
        let _guard = self.lock(order_id).await;
        let mut order = self.get_order(order_id).await?;
        order.cancel(reason, self.clock.now())?;
        self.storage.save_order(order.clone()).await?;
        info!(order_id = %order_id, reason = %reason, "Order cancelled");
        Ok(order)
    }

    async fn update_autopay<F>(&self, order_id: Uuid, apply: F) -> Result<InstallmentOrder>
    where
        F: FnOnce(&mut AutopayConfig, NaiveDate) -> Result<()>,
    {
        let _guard = self.lock(order_id).await;
        let mut order = self.get_order(order_id).await?;
        order.ensure_mutable()?;
        apply(&mut order.autopay, self.clock.today())?;
        self.storage.save_order(order.clone()).await?;
        info!(order_id = %order_id, autopay = ?order.autopay, "Autopay settings changed");
        Ok(order)
    }

    pub async fn set_priority(&self, order_id: Uuid, priority: u32) -> Result<InstallmentOrder> {
        if priority == 0 {
            return Err(EngineError::ValidationError(
                "autopay priority must be at least 1".to_string(),
            ));
        }
        self.update_autopay(order_id, |autopay, _| {
            autopay.priority = priority;
            Ok(())
        })
        .await
    }

    pub async fn set_autopay_enabled(
        &self,
        order_id: Uuid,
        enabled: bool,
    ) -> Result<InstallmentOrder> {
        self.update_autopay(order_id, |autopay, _| {
            autopay.enabled = enabled;
            Ok(())
        })
        .await
    }

    /// No autopay charge on any day up to and including `until`.
    pub async fn pause_until(&self, order_id: Uuid, until: NaiveDate) -> Result<InstallmentOrder> {
        self.update_autopay(order_id, |autopay, today| {
            if until < today {
                return Err(EngineError::ValidationError(format!(
                    "pauseUntil {until} is in the past"
                )));
            }
            autopay.pause_until = Some(until);
            Ok(())
        })
        .await
    }

    pub async fn resume(&self, order_id: Uuid) -> Result<InstallmentOrder> {
        self.update_autopay(order_id, |autopay, _| {
            autopay.pause_until = None;
            Ok(())
        })
        .await
    }

    pub async fn add_skip_dates(
        &self,
        order_id: Uuid,
        dates: &[NaiveDate],
    ) -> Result<InstallmentOrder> {
        if dates.is_empty() {
            return Err(EngineError::ValidationError("dates must not be empty".to_string()));
        }
        self.update_autopay(order_id, |autopay, today| {
            if let Some(past) = dates.iter().find(|d| **d < today) {
                return Err(EngineError::ValidationError(format!(
                    "skip date {past} is in the past"
                )));
            }
            for date in dates {
                if !autopay.skip_dates.contains(date) {
                    autopay.skip_dates.push(*date);
                }
            }
            autopay.skip_dates.sort();
            Ok(())
        })
        .await
    }

    pub async fn remove_skip_dates(
        &self,
        order_id: Uuid,
        dates: &[NaiveDate],
    ) -> Result<InstallmentOrder> {
        self.update_autopay(order_id, |autopay, _| {
            autopay.skip_dates.retain(|d| !dates.contains(d));
            Ok(())
        })
        .await
    }

    /// Applies a partial update to the user's autopay settings.
    pub async fn update_autopay_settings(
        &self,
        user_id: &str,
        update: AutopaySettingsUpdate,
    ) -> Result<AutopaySettings> {
        let _guard = self.user_locks.lock(user_id).await;
        let mut user = self.get_user(user_id).await?;
        user.autopay_settings.apply(update)?;
        let settings = user.autopay_settings.clone();
        self.storage.save_user(user).await?;
        info!(user_id = %user_id, enabled = settings.enabled, "Autopay settings updated");
        Ok(settings)
    }

    pub async fn order_progress(&self, order_id: Uuid) -> Result<OrderProgress> {
        Ok(OrderProgress::of(&self.get_order(order_id).await?))
    }

    pub async fn payment_schedule(&self, order_id: Uuid) -> Result<Vec<PaymentScheduleItem>> {
        Ok(self.get_order(order_id).await?.payment_schedule)
    }

    /// Every order of the user, whatever its status, in autopay order.
    pub async fn orders_for_user(&self, user_id: &str) -> Result<Vec<InstallmentOrder>> {
        self.get_user(user_id).await?;
        let mut orders = self.storage.orders_for_user(user_id).await?;
        sort_by_priority(&mut orders);
        Ok(orders)
    }

    /// Active orders with autopay on, in the order autopay attempts them.
    pub async fn autopay_queue(&self, user_id: &str) -> Result<Vec<InstallmentOrder>> {
        let mut orders: Vec<InstallmentOrder> = self
            .storage
            .orders_for_user(user_id)
            .await?
            .into_iter()
            .filter(|o| o.status == OrderStatus::Active && o.autopay.enabled)
            .collect();
        sort_by_priority(&mut orders);
        Ok(orders)
    }
}
