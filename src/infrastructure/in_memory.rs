use crate::domain::UserId;
use crate::domain::order::{InstallmentOrder, OrderReferral};
use crate::domain::payment::PaymentRecord;
use crate::domain::ports::{
    CommissionCommit, InstallmentCommit, LedgerStore, Notification, Notifier, OrderStore,
    PaymentStore, Product, ProductCatalog, ReferralResolver, StreakConfigStore, UserStore,
    WalletStore,
};
use crate::domain::streak::StreakConfig;
use crate::domain::user::User;
use crate::domain::wallet::Wallet;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct State {
    wallets: HashMap<UserId, Wallet>,
    orders: HashMap<Uuid, InstallmentOrder>,
    payments: HashMap<Uuid, PaymentRecord>,
    users: HashMap<UserId, User>,
    streak_config: Option<StreakConfig>,
}

/// A thread-safe in-memory store for every engine entity.
///
/// All maps sit behind one `RwLock`, so multi-entity commits are applied under
/// a single write guard and are never observed half-done.
/// Ideal for testing, simulations or single-run batches.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryStore {
    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        let state = self.state.read().await;
        Ok(state.wallets.get(user_id).cloned())
    }

    async fn save_wallet(&self, wallet: Wallet) -> Result<()> {
        let mut state = self.state.write().await;
        state.wallets.insert(wallet.user_id.clone(), wallet);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn get_order(&self, order_id: Uuid) -> Result<Option<InstallmentOrder>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn save_order(&self, order: InstallmentOrder) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.insert(order.id, order);
        Ok(())
    }

    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<InstallmentOrder>> {
        let state = self.state.read().await;
        let mut orders: Vec<InstallmentOrder> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(InstallmentOrder::creation_key);
        Ok(orders)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<PaymentRecord>> {
        let state = self.state.read().await;
        Ok(state.payments.get(&payment_id).cloned())
    }

    async fn save_payment(&self, payment: PaymentRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn payments_for_user(&self, user_id: &str) -> Result<Vec<PaymentRecord>> {
        let state = self.state.read().await;
        let mut payments: Vec<PaymentRecord> = state
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentRecord>> {
        let state = self.state.read().await;
        let mut payments: Vec<PaymentRecord> = state
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.installment_number);
        Ok(payments)
    }

    async fn payments_awaiting_commission(&self) -> Result<Vec<PaymentRecord>> {
        let state = self.state.read().await;
        let mut payments: Vec<PaymentRecord> = state
            .payments
            .values()
            .filter(|p| p.awaits_commission())
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(user_id).cloned())
    }

    async fn save_user(&self, user: User) -> Result<()> {
        let mut state = self.state.write().await;
        state.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn autopay_users(&self) -> Result<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.autopay_settings.enabled)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }
}

#[async_trait]
impl StreakConfigStore for InMemoryStore {
    async fn get_streak_config(&self) -> Result<Option<StreakConfig>> {
        let state = self.state.read().await;
        Ok(state.streak_config.clone())
    }

    async fn save_streak_config(&self, config: StreakConfig) -> Result<()> {
        let mut state = self.state.write().await;
        state.streak_config = Some(config);
        Ok(())
    }

    async fn delete_streak_config(&self) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.streak_config.take().is_some())
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn commit_installment(&self, commit: InstallmentCommit) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(wallet) = commit.wallet {
            state.wallets.insert(wallet.user_id.clone(), wallet);
        }
        state.orders.insert(commit.order.id, commit.order);
        state.payments.insert(commit.payment.id, commit.payment);
        Ok(())
    }

    async fn commit_commission(&self, commit: CommissionCommit) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .wallets
            .insert(commit.referrer_wallet.user_id.clone(), commit.referrer_wallet);
        state.orders.insert(commit.order.id, commit.order);
        state.payments.insert(commit.payment.id, commit.payment);
        Ok(())
    }
}

/// Fixed products and referral links, standing in for the catalog and
/// referral services.
#[derive(Default, Clone)]
pub struct StaticCatalog {
    products: HashMap<String, Product>,
    referrals: HashMap<UserId, OrderReferral>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product: Product) -> Self {
        self.products.insert(product.id.clone(), product);
        self
    }

    pub fn with_referral(mut self, user_id: impl Into<UserId>, referral: OrderReferral) -> Self {
        self.referrals.insert(user_id.into(), referral);
        self
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>> {
        Ok(self.products.get(product_id).cloned())
    }
}

#[async_trait]
impl ReferralResolver for StaticCatalog {
    async fn resolve(&self, user_id: &str) -> Result<Option<OrderReferral>> {
        Ok(self.referrals.get(user_id).cloned())
    }
}

/// Keeps every notification it is handed; used by tests and simulations.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    unreachable: Arc<Mutex<HashSet<UserId>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    /// Every later notification for `user_id` fails instead of being kept.
    pub async fn fail_for(&self, user_id: impl Into<UserId>) {
        self.unreachable.lock().await.insert(user_id.into());
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let user_id = notification.user_id();
        if self.unreachable.lock().await.contains(user_id) {
            return Err(EngineError::NotificationError(format!(
                "no delivery channel for user {user_id}"
            )));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}
