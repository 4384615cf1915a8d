use super::orders::{CreateOrderRequest, OrderManager};
use super::wallet::WalletLedger;
use crate::domain::money::{Amount, round_money};
use crate::domain::order::{InstallmentOrder, OrderStatus, PaymentMethod};
use crate::domain::payment::{PaymentRecord, PaymentSource, PaymentStatus};
use crate::domain::ports::{ClockRef, CommissionCommit, InstallmentCommit, StorageRef};
use crate::domain::wallet::{LedgerContext, WalletTransactionCategory};
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// How the first installment was paid.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FirstPaymentProof {
    /// Take the installment from the buyer's wallet now.
    Wallet,
    /// The gateway already collected the money; the reference is opaque.
    Gateway { reference: String },
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMode {
    /// User-initiated payment of the next installment.
    Manual,
    /// Unattended batch collection; honours skip dates, pauses and the
    /// user's minimum balance lock.
    Autopay,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct InstallmentReceipt {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub installment_number: u32,
    pub amount: Decimal,
    /// Wallet balance after the charge; `None` for gateway payments.
    pub new_balance: Option<Decimal>,
    pub order_status: OrderStatus,
    pub commission: Option<Decimal>,
}

/// Result of one attempted installment as the batch reports it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Success {
        amount: Decimal,
        new_balance: Decimal,
        payment_id: Uuid,
        order_completed: bool,
    },
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl PaymentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentOutcome::Success { .. } => "SUCCESS",
            PaymentOutcome::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            PaymentOutcome::Skipped { .. } => "SKIPPED",
            PaymentOutcome::Failed { .. } => "FAILED",
        }
    }
}

impl From<Result<InstallmentReceipt>> for PaymentOutcome {
    fn from(result: Result<InstallmentReceipt>) -> Self {
        match result {
            Ok(receipt) => PaymentOutcome::Success {
                amount: receipt.amount,
                new_balance: receipt.new_balance.unwrap_or_default(),
                payment_id: receipt.payment_id,
                order_completed: receipt.order_status == OrderStatus::Completed,
            },
            Err(EngineError::InsufficientBalance { required, available }) => {
                PaymentOutcome::InsufficientBalance { required, available }
            }
            Err(e @ EngineError::AutopayUnavailable { .. })
            | Err(e @ EngineError::DuplicatePayment { .. }) => PaymentOutcome::Skipped {
                reason: e.to_string(),
            },
            Err(e) => PaymentOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
pub struct ReconcileSummary {
    pub examined: u32,
    pub credited: u32,
    pub failed: u32,
}

/// Orchestrates installment charges and the referral commission that
/// follows each one.
pub struct PaymentEngine {
    storage: StorageRef,
    orders: Arc<OrderManager>,
    wallets: Arc<WalletLedger>,
    clock: ClockRef,
    default_commission_rate: Decimal,
}

impl PaymentEngine {
    pub fn new(
        storage: StorageRef,
        orders: Arc<OrderManager>,
        wallets: Arc<WalletLedger>,
        clock: ClockRef,
        default_commission_rate: Decimal,
    ) -> Self {
        Self {
            storage,
            orders,
            wallets,
            clock,
            default_commission_rate,
        }
    }

    /// Creates the order and, for wallet orders, takes the first installment
    /// straight away. Gateway orders stay PENDING until confirmed.
    pub async fn place_order(
        &self,
        user_id: &str,
        request: CreateOrderRequest,
    ) -> Result<InstallmentOrder> {
        let order = self.orders.create_order(user_id, request).await?;
        if order.payment_method == PaymentMethod::Wallet {
            self.confirm_first_payment(order.id, FirstPaymentProof::Wallet)
                .await?;
            return self.orders.get_order(order.id).await;
        }
        Ok(order)
    }

    /// Pays installment 1 and moves the order PENDING -> ACTIVE. Nothing is
    /// written unless the whole step succeeds.
    #[instrument(skip(self, proof))]
    pub async fn confirm_first_payment(
        &self,
        order_id: Uuid,
        proof: FirstPaymentProof,
    ) -> Result<InstallmentReceipt> {
        let _order_guard = self.orders.lock(order_id).await;
        let mut order = self.orders.get_order(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(order.invalid_state("first payment already confirmed"));
        }
        let first = order
            .installment(1)
            .cloned()
            .ok_or_else(|| order.invalid_state("order has no schedule"))?;
        let now = self.clock.now();
        let today = self.clock.today();

        let (method, reference) = match proof {
            FirstPaymentProof::Wallet => (PaymentMethod::Wallet, None),
            FirstPaymentProof::Gateway { reference } => {
                if reference.trim().is_empty() {
                    return Err(EngineError::ValidationError(
                        "gateway reference is required".to_string(),
                    ));
                }
                (PaymentMethod::Gateway, Some(reference))
            }
        };
        let mut payment = PaymentRecord::completed(
            order.id,
            order.user_id.clone(),
            first.installment_number,
            first.amount,
            method,
            PaymentSource::FirstPayment,
            reference,
            now,
        );
        if self.commission_for(&order, first.amount).is_zero() {
            payment.waive_commission();
        }

        let wallet_guard = match method {
            PaymentMethod::Wallet => Some(self.wallets.lock(&order.user_id).await),
            PaymentMethod::Gateway => None,
        };
        let wallet = match method {
            PaymentMethod::Wallet => {
                let mut wallet = self.wallets.load(&order.user_id).await?;
                wallet.debit(
                    Amount::new(first.amount)?,
                    Decimal::ZERO,
                    &installment_context(&order, first.installment_number, payment.id),
                    now,
                )?;
                Some(wallet)
            }
            PaymentMethod::Gateway => None,
        };
        order.activate(now)?;
        order.record_installment(first.installment_number, payment.id, today, now)?;
        let new_balance = wallet.as_ref().map(|w| w.balance.value());

        self.storage
            .commit_installment(InstallmentCommit {
                wallet,
                order: order.clone(),
                payment: payment.clone(),
            })
            .await?;
        drop(wallet_guard);
        info!(
            order_id = %order.id,
            user_id = %order.user_id,
            amount = %first.amount,
            method = ?method,
            "First payment confirmed, order active"
        );

        let commission = self.credit_commission_best_effort(&order, &payment).await;
        Ok(InstallmentReceipt {
            payment_id: payment.id,
            order_id: order.id,
            installment_number: first.installment_number,
            amount: first.amount,
            new_balance,
            order_status: order.status,
            commission,
        })
    }

    /// Charges the next pending installment from the buyer's wallet.
    ///
    /// The eligibility and duplicate checks run under the order lock, against
    /// a fresh read, and the deduction, schedule update and payment record
    /// are committed together.
    #[instrument(skip(self))]
    pub async fn process_installment_payment(
        &self,
        order_id: Uuid,
        mode: PaymentMode,
    ) -> Result<InstallmentReceipt> {
        let _order_guard = self.orders.lock(order_id).await;
        let mut order = self.orders.get_order(order_id).await?;
        let today = self.clock.today();
        let now = self.clock.now();

        if !order.can_accept_payment() {
            return Err(order.invalid_state("order cannot accept payments"));
        }
        if mode == PaymentMode::Autopay
            && let Some(reason) = order.autopay_block_reason(today)
        {
            return Err(EngineError::AutopayUnavailable { order_id, reason });
        }
        if let Some(paid_today) = order
            .payment_schedule
            .iter()
            .find(|item| item.paid_date == Some(today))
        {
            return Err(EngineError::DuplicatePayment {
                order_id,
                installment: paid_today.installment_number,
            });
        }
        let item = order
            .next_pending_installment()
            .cloned()
            .ok_or_else(|| order.invalid_state("no pending installment"))?;

        let reserve = match mode {
            PaymentMode::Autopay => {
                self.orders
                    .get_user(&order.user_id)
                    .await?
                    .autopay_settings
                    .minimum_balance_lock
            }
            PaymentMode::Manual => Decimal::ZERO,
        };
        let source = match mode {
            PaymentMode::Autopay => PaymentSource::Autopay,
            PaymentMode::Manual => PaymentSource::Manual,
        };
        let mut payment = PaymentRecord::completed(
            order.id,
            order.user_id.clone(),
            item.installment_number,
            item.amount,
            PaymentMethod::Wallet,
            source,
            None,
            now,
        );
        if self.commission_for(&order, item.amount).is_zero() {
            payment.waive_commission();
        }

        let wallet_guard = self.wallets.lock(&order.user_id).await;
        let mut wallet = self.wallets.load(&order.user_id).await?;
        wallet.debit(
            Amount::new(item.amount)?,
            reserve,
            &installment_context(&order, item.installment_number, payment.id),
            now,
        )?;
        order.record_installment(item.installment_number, payment.id, today, now)?;
        let new_balance = wallet.balance.value();

        self.storage
            .commit_installment(InstallmentCommit {
                wallet: Some(wallet),
                order: order.clone(),
                payment: payment.clone(),
            })
            .await?;
        drop(wallet_guard);
        info!(
            order_id = %order.id,
            user_id = %order.user_id,
            installment = item.installment_number,
            amount = %item.amount,
            remaining = %order.remaining_amount,
            mode = ?mode,
            "Installment paid"
        );
        if order.status == OrderStatus::Completed {
            info!(order_id = %order.id, "Order completed");
        }

        let commission = self.credit_commission_best_effort(&order, &payment).await;
        Ok(InstallmentReceipt {
            payment_id: payment.id,
            order_id: order.id,
            installment_number: item.installment_number,
            amount: item.amount,
            new_balance: Some(new_balance),
            order_status: order.status,
            commission,
        })
    }

    /// Credits the referrer for one payment. Returns the commission amount,
    /// or `None` when there is nothing to pay (no referrer, zero rate, or
    /// already credited).
    pub async fn calculate_and_credit_commission(
        &self,
        order_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Option<Decimal>> {
        let _order_guard = self.orders.lock(order_id).await;
        let order = self.orders.get_order(order_id).await?;
        let payment = self
            .storage
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("payment {payment_id}")))?;
        if payment.order_id != order.id {
            return Err(EngineError::CommissionCalculation(format!(
                "payment {payment_id} does not belong to order {order_id}"
            )));
        }
        self.credit_commission(&order, &payment).await
    }

    /// Re-attempts commission for completed payments on referred orders that
    /// never got one.
    pub async fn reconcile_commissions(&self) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        for payment in self.storage.payments_awaiting_commission().await? {
            let Some(order) = self.storage.get_order(payment.order_id).await? else {
                warn!(payment_id = %payment.id, "Payment references a missing order");
                continue;
            };
            if order.referral.is_none() {
                continue;
            }
            summary.examined += 1;
            match self.calculate_and_credit_commission(order.id, payment.id).await {
                Ok(Some(_)) => summary.credited += 1,
                Ok(None) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        payment_id = %payment.id,
                        error = %e,
                        "Commission reconciliation failed"
                    );
                }
            }
        }
        info!(
            examined = summary.examined,
            credited = summary.credited,
            failed = summary.failed,
            "Commission reconciliation finished"
        );
        Ok(summary)
    }

    /// Logs a failed autopay attempt. Wallet and schedule are untouched.
    pub async fn record_failed_attempt(
        &self,
        order: &InstallmentOrder,
        reason: &str,
    ) -> Result<()> {
        let Some(item) = order.next_pending_installment() else {
            return Ok(());
        };
        let record = PaymentRecord::failed(
            order.id,
            order.user_id.clone(),
            item.installment_number,
            item.amount,
            reason,
            self.clock.now(),
        );
        self.storage.save_payment(record).await
    }

    /// Commission failures never undo the payment; they are logged and left
    /// for `reconcile_commissions`.
    async fn credit_commission_best_effort(
        &self,
        order: &InstallmentOrder,
        payment: &PaymentRecord,
    ) -> Option<Decimal> {
        match self.credit_commission(order, payment).await {
            Ok(amount) => amount,
            Err(e) => {
                error!(
                    order_id = %order.id,
                    payment_id = %payment.id,
                    error = %e,
                    "Commission crediting failed; payment stands"
                );
                None
            }
        }
    }

    /// Commission owed on `amount`; zero when the order has no referrer.
    fn commission_for(&self, order: &InstallmentOrder, amount: Decimal) -> Decimal {
        if order.referral.is_none() {
            return Decimal::ZERO;
        }
        let rate = order.commission_rate(self.default_commission_rate);
        round_money(amount * rate / Decimal::ONE_HUNDRED)
    }

    /// Caller holds the order lock.
    async fn credit_commission(
        &self,
        order: &InstallmentOrder,
        payment: &PaymentRecord,
    ) -> Result<Option<Decimal>> {
        let Some(referral) = order.referral.as_ref() else {
            return Ok(None);
        };
        if payment.status != PaymentStatus::Completed || payment.commission_calculated {
            return Ok(None);
        }
        let rate = order.commission_rate(self.default_commission_rate);
        if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
            return Err(EngineError::CommissionCalculation(format!(
                "commission rate {rate} is out of range"
            )));
        }
        let commission = self.commission_for(order, payment.amount);
        if commission <= Decimal::ZERO {
            return Ok(None);
        }
        let total = Amount::new(commission)
            .map_err(|e| EngineError::CommissionCalculation(e.to_string()))?;

        let mut order = order.clone();
        let mut payment = payment.clone();
        let _wallet_guard = self.wallets.lock(&referral.referrer_id).await;
        let mut referrer_wallet = self.wallets.load(&referral.referrer_id).await?;
        let context = LedgerContext::new(
            WalletTransactionCategory::ReferralCommission,
            format!(
                "Commission at {rate}% on installment {} of {}",
                payment.installment_number, order.product_name
            ),
        )
        .with_reference(payment.id);
        let split = referrer_wallet.credit_commission(
            total,
            self.wallets.withdrawable_percentage(),
            &context,
            self.clock.now(),
        );
        payment.attach_commission(commission, referral.referrer_id.clone())?;
        order.total_commission_paid += commission;
        let order_id = order.id;

        self.storage
            .commit_commission(CommissionCommit {
                referrer_wallet,
                order,
                payment,
            })
            .await?;
        info!(
            referrer_id = %referral.referrer_id,
            order_id = %order_id,
            commission = %commission,
            available = %split.available,
            locked = %split.locked,
            "Referral commission credited"
        );
        Ok(Some(commission))
    }
}

fn installment_context(
    order: &InstallmentOrder,
    installment: u32,
    payment_id: Uuid,
) -> LedgerContext {
    LedgerContext::new(
        WalletTransactionCategory::InstallmentPayment,
        format!(
            "Installment {installment}/{} for {}",
            order.total_days, order.product_name
        ),
    )
    .with_reference(payment_id)
}
