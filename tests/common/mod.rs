#![allow(dead_code)]

use async_trait::async_trait;
use autopay_engine::application::orders::CreateOrderRequest;
use autopay_engine::application::services::EngineServices;
use autopay_engine::config::EngineConfig;
use autopay_engine::domain::money::Amount;
use autopay_engine::domain::order::{
    DeliveryAddress, InstallmentOrder, OrderReferral, PaymentMethod,
};
use autopay_engine::domain::payment::PaymentRecord;
use autopay_engine::domain::ports::{
    Clock, CommissionCommit, InstallmentCommit, LedgerStore, OrderStore, PaymentStore, Product,
    StorageRef, StreakConfigStore, UserStore, WalletStore,
};
use autopay_engine::domain::streak::StreakConfig;
use autopay_engine::domain::user::{AutopaySettingsUpdate, User};
use autopay_engine::domain::wallet::{LedgerContext, Wallet, WalletTransactionCategory};
use autopay_engine::error::{EngineError, Result};
use autopay_engine::infrastructure::clock::FixedClock;
use autopay_engine::infrastructure::in_memory::{InMemoryStore, RecordingNotifier, StaticCatalog};
use chrono::{FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
}

pub fn address() -> DeliveryAddress {
    DeliveryAddress {
        name: "Meera".to_string(),
        phone: "9123456780".to_string(),
        line1: "4 Lake View".to_string(),
        city: "Chennai".to_string(),
        state: "TN".to_string(),
        pincode: "600001".to_string(),
    }
}

pub fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_product(Product {
            id: "phone".to_string(),
            name: "Phone".to_string(),
            price: dec!(1000),
            variants: vec![],
            commission_percentage: None,
        })
        .with_product(Product {
            id: "watch".to_string(),
            name: "Watch".to_string(),
            price: dec!(500),
            variants: vec![],
            commission_percentage: Some(dec!(10)),
        })
        .with_referral(
            "referred",
            OrderReferral {
                referrer_id: "referrer".to_string(),
                commission_percentage: None,
            },
        )
}

/// In-memory engine on a hand-driven clock.
pub struct TestEngine {
    pub services: EngineServices,
    pub clock: Arc<FixedClock>,
    pub notifier: RecordingNotifier,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(InMemoryStore::new()))
    }

    pub fn with_storage(storage: StorageRef) -> Self {
        let clock = Arc::new(FixedClock::at_date(
            start_date(),
            FixedOffset::east_opt(330 * 60).unwrap(),
        ));
        let notifier = RecordingNotifier::new();
        let catalog = Arc::new(catalog());
        let services = EngineServices::new(
            &EngineConfig::default(),
            storage,
            catalog.clone(),
            catalog,
            Arc::new(notifier.clone()),
            clock.clone(),
        )
        .unwrap();
        Self {
            services,
            clock,
            notifier,
        }
    }

    /// Registers a user with autopay switched on.
    pub async fn autopay_user(&self, id: &str) {
        self.services
            .storage
            .save_user(User::new(id, id, self.clock.now()))
            .await
            .unwrap();
        self.services
            .orders
            .update_autopay_settings(
                id,
                AutopaySettingsUpdate {
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    pub async fn top_up(&self, user: &str, amount: Decimal) {
        self.services
            .wallets
            .add_money(
                user,
                Amount::new(amount).unwrap(),
                LedgerContext::new(WalletTransactionCategory::TopUp, "test top-up"),
            )
            .await
            .unwrap();
    }

    pub async fn available(&self, user: &str) -> Decimal {
        self.services.wallets.get_balance(user).await.unwrap().available
    }

    /// Places a WALLET order (first installment taken immediately).
    pub async fn order(
        &self,
        user: &str,
        product: &str,
        days: u32,
        priority: u32,
    ) -> InstallmentOrder {
        self.services
            .payments
            .place_order(
                user,
                CreateOrderRequest {
                    product_id: product.to_string(),
                    total_days: days,
                    daily_amount: None,
                    payment_method: PaymentMethod::Wallet,
                    delivery_address: address(),
                    coupon_code: None,
                    variant_id: None,
                    autopay_priority: Some(priority),
                },
            )
            .await
            .unwrap()
    }

    pub async fn reload(&self, order: &InstallmentOrder) -> InstallmentOrder {
        self.services.orders.get_order(order.id).await.unwrap()
    }
}

/// In-memory storage with switchable faults: failing commission commits,
/// one user whose orders cannot be read, and slow user reads.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    pub fail_commission: AtomicBool,
    pub slow_user_reads: AtomicBool,
    broken_user: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order lookups for `user_id` fail from now on.
    pub fn break_user(&self, user_id: &str) {
        *self.broken_user.lock().unwrap() = Some(user_id.to_string());
    }
}

#[async_trait]
impl WalletStore for FlakyStore {
    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        self.inner.get_wallet(user_id).await
    }
    async fn save_wallet(&self, wallet: Wallet) -> Result<()> {
        self.inner.save_wallet(wallet).await
    }
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn get_order(&self, order_id: Uuid) -> Result<Option<InstallmentOrder>> {
        self.inner.get_order(order_id).await
    }
    async fn save_order(&self, order: InstallmentOrder) -> Result<()> {
        self.inner.save_order(order).await
    }
    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<InstallmentOrder>> {
        if self.broken_user.lock().unwrap().as_deref() == Some(user_id) {
            return Err(EngineError::StorageError(format!("orders of {user_id} unreadable")));
        }
        self.inner.orders_for_user(user_id).await
    }
}

#[async_trait]
impl PaymentStore for FlakyStore {
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<PaymentRecord>> {
        self.inner.get_payment(payment_id).await
    }
    async fn save_payment(&self, payment: PaymentRecord) -> Result<()> {
        self.inner.save_payment(payment).await
    }
    async fn payments_for_user(&self, user_id: &str) -> Result<Vec<PaymentRecord>> {
        self.inner.payments_for_user(user_id).await
    }
    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentRecord>> {
        self.inner.payments_for_order(order_id).await
    }
    async fn payments_awaiting_commission(&self) -> Result<Vec<PaymentRecord>> {
        self.inner.payments_awaiting_commission().await
    }
}

#[async_trait]
impl UserStore for FlakyStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = self.inner.get_user(user_id).await?;
        if self.slow_user_reads.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(user)
    }
    async fn save_user(&self, user: User) -> Result<()> {
        self.inner.save_user(user).await
    }
    async fn autopay_users(&self) -> Result<Vec<User>> {
        self.inner.autopay_users().await
    }
}

#[async_trait]
impl StreakConfigStore for FlakyStore {
    async fn get_streak_config(&self) -> Result<Option<StreakConfig>> {
        self.inner.get_streak_config().await
    }
    async fn save_streak_config(&self, config: StreakConfig) -> Result<()> {
        self.inner.save_streak_config(config).await
    }
    async fn delete_streak_config(&self) -> Result<bool> {
        self.inner.delete_streak_config().await
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn commit_installment(&self, commit: InstallmentCommit) -> Result<()> {
        self.inner.commit_installment(commit).await
    }
    async fn commit_commission(&self, commit: CommissionCommit) -> Result<()> {
        if self.fail_commission.load(Ordering::SeqCst) {
            return Err(EngineError::StorageError("referrer ledger unavailable".to_string()));
        }
        self.inner.commit_commission(commit).await
    }
}

/// Writes a two-user scenario: one user who can afford every installment,
/// one who runs dry after a few days.
pub fn write_scenario(path: &Path, days: u32) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    let address = r#"{"name": "Meera", "phone": "9123456780", "line1": "4 Lake View", "city": "Chennai", "state": "TN", "pincode": "600001"}"#;
    write!(
        file,
        r#"{{
  "start_date": "2026-07-01",
  "days": {days},
  "products": [{{"id": "phone", "name": "Phone", "price": "1000"}}],
  "referrals": [{{"user_id": "rich", "referrer_id": "friend"}}],
  "streak": {{"enabled": true, "milestones": [{{"days": 3, "reward": "20", "badge": "starter", "is_active": true}}]}},
  "users": [
    {{"id": "rich", "name": "Rich", "top_up": "2000", "autopay": {{"enabled": true}}}},
    {{"id": "poor", "name": "Poor", "top_up": "300", "autopay": {{"enabled": true}}}},
    {{"id": "friend", "name": "Friend"}}
  ],
  "orders": [
    {{"user_id": "rich", "request": {{"product_id": "phone", "total_days": 10, "payment_method": "WALLET", "delivery_address": {address}}}}},
    {{"user_id": "poor", "request": {{"product_id": "phone", "total_days": 10, "payment_method": "WALLET", "delivery_address": {address}}}}}
  ]
}}"#
    )?;
    file.flush()?;
    Ok(())
}
