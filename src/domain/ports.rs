use super::order::{InstallmentOrder, OrderReferral};
use super::payment::PaymentRecord;
use super::streak::StreakConfig;
use super::user::User;
use super::wallet::Wallet;
use super::{ProductId, UserId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>>;
    async fn save_wallet(&self, wallet: Wallet) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, order_id: Uuid) -> Result<Option<InstallmentOrder>>;
    async fn save_order(&self, order: InstallmentOrder) -> Result<()>;
    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<InstallmentOrder>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<PaymentRecord>>;
    async fn save_payment(&self, payment: PaymentRecord) -> Result<()>;
    async fn payments_for_user(&self, user_id: &str) -> Result<Vec<PaymentRecord>>;
    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentRecord>>;
    /// Completed payments whose commission has not been calculated yet.
    async fn payments_awaiting_commission(&self) -> Result<Vec<PaymentRecord>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;
    async fn save_user(&self, user: User) -> Result<()>;
    async fn autopay_users(&self) -> Result<Vec<User>>;
}

/// Holds the single admin streak configuration, if one was created.
#[async_trait]
pub trait StreakConfigStore: Send + Sync {
    async fn get_streak_config(&self) -> Result<Option<StreakConfig>>;
    async fn save_streak_config(&self, config: StreakConfig) -> Result<()>;
    async fn delete_streak_config(&self) -> Result<bool>;
}

/// Wallet deduction, schedule mutation and payment record of one installment.
/// `wallet` is `None` when the money arrived through the gateway.
#[derive(Debug, Clone)]
pub struct InstallmentCommit {
    pub wallet: Option<Wallet>,
    pub order: InstallmentOrder,
    pub payment: PaymentRecord,
}

/// Referrer credit plus the commission stamps on the order and payment.
#[derive(Debug, Clone)]
pub struct CommissionCommit {
    pub referrer_wallet: Wallet,
    pub order: InstallmentOrder,
    pub payment: PaymentRecord,
}

/// Multi-entity writes that must land together or not at all.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn commit_installment(&self, commit: InstallmentCommit) -> Result<()>;
    async fn commit_commission(&self, commit: CommissionCommit) -> Result<()>;
}

/// Every store the engine needs, behind one handle.
pub trait Storage:
    WalletStore + OrderStore + PaymentStore + UserStore + StreakConfigStore + LedgerStore
{
}

impl<T> Storage for T where
    T: WalletStore + OrderStore + PaymentStore + UserStore + StreakConfigStore + LedgerStore
{
}

pub type StorageRef = Arc<dyn Storage>;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ProductVariant {
    pub id: String,
    pub price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
    /// Product-level commission override.
    #[serde(default)]
    pub commission_percentage: Option<Decimal>,
}

/// Catalog management lives elsewhere; the engine only reads prices.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>>;
}

/// Resolves who referred a buyer and at what rate.
#[async_trait]
pub trait ReferralResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<Option<OrderReferral>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    /// Current business day in the configured timezone.
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    AutopaySuccess {
        user_id: UserId,
        orders_paid: u32,
        total_amount: Decimal,
        balance: Decimal,
    },
    AutopayFailure {
        user_id: UserId,
        failed_orders: u32,
        insufficient_balance: bool,
        required: Decimal,
        balance: Decimal,
    },
    PaymentReminder {
        user_id: UserId,
        orders_due: u32,
        total_due: Decimal,
        balance: Decimal,
    },
    LowBalance {
        user_id: UserId,
        due_tomorrow: Decimal,
        usable_balance: Decimal,
        threshold: Decimal,
        shortfall: Decimal,
    },
    MilestoneReached {
        user_id: UserId,
        days: u32,
        reward: Decimal,
        badge: Option<String>,
    },
}

impl Notification {
    pub fn user_id(&self) -> &str {
        match self {
            Notification::AutopaySuccess { user_id, .. }
            | Notification::AutopayFailure { user_id, .. }
            | Notification::PaymentReminder { user_id, .. }
            | Notification::LowBalance { user_id, .. }
            | Notification::MilestoneReached { user_id, .. } => user_id,
        }
    }
}

/// Delivery mechanics are out of scope; implementations only receive the trigger.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

pub type ProductCatalogRef = Arc<dyn ProductCatalog>;
pub type ReferralResolverRef = Arc<dyn ReferralResolver>;
pub type ClockRef = Arc<dyn Clock>;
pub type NotifierRef = Arc<dyn Notifier>;
