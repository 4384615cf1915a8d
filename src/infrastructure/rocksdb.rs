use crate::domain::order::InstallmentOrder;
use crate::domain::payment::PaymentRecord;
use crate::domain::ports::{
    CommissionCommit, InstallmentCommit, LedgerStore, OrderStore, PaymentStore, StreakConfigStore,
    UserStore, WalletStore,
};
use crate::domain::streak::StreakConfig;
use crate::domain::user::User;
use crate::domain::wallet::Wallet;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub const CF_WALLETS: &str = "wallets";
pub const CF_ORDERS: &str = "orders";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_USERS: &str = "users";
/// Singleton documents such as the streak configuration.
pub const CF_SETTINGS: &str = "settings";

const STREAK_CONFIG_KEY: &[u8] = b"streak_config";

/// A persistent store implementation using RocksDB.
///
/// One column family per entity, JSON values. Multi-entity commits go through
/// a single `WriteBatch`, so they land together or not at all.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path` with every column family present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_WALLETS, CF_ORDERS, CF_PAYMENTS, CF_USERS, CF_SETTINGS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::StorageError(format!("column family '{name}' not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(family)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(family)?, key, bytes)?;
        Ok(())
    }

    fn batch_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        family: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(family)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Full scan of a column family, keeping the values `keep` accepts.
    fn scan<T, F>(&self, family: &str, keep: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(family)?, IteratorMode::Start) {
            let (_key, bytes) = item?;
            let value: T = serde_json::from_slice(&bytes)?;
            if keep(&value) {
                values.push(value);
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl WalletStore for RocksDBStore {
    async fn get_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        self.get_json(CF_WALLETS, user_id.as_bytes())
    }

    async fn save_wallet(&self, wallet: Wallet) -> Result<()> {
        self.put_json(CF_WALLETS, wallet.user_id.as_bytes(), &wallet)
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn get_order(&self, order_id: Uuid) -> Result<Option<InstallmentOrder>> {
        self.get_json(CF_ORDERS, order_id.as_bytes())
    }

    async fn save_order(&self, order: InstallmentOrder) -> Result<()> {
        self.put_json(CF_ORDERS, order.id.as_bytes(), &order)
    }

    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<InstallmentOrder>> {
        let mut orders = self.scan(CF_ORDERS, |o: &InstallmentOrder| o.user_id == user_id)?;
        orders.sort_by_key(InstallmentOrder::creation_key);
        Ok(orders)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<PaymentRecord>> {
        self.get_json(CF_PAYMENTS, payment_id.as_bytes())
    }

    async fn save_payment(&self, payment: PaymentRecord) -> Result<()> {
        self.put_json(CF_PAYMENTS, payment.id.as_bytes(), &payment)
    }

    async fn payments_for_user(&self, user_id: &str) -> Result<Vec<PaymentRecord>> {
        let mut payments = self.scan(CF_PAYMENTS, |p: &PaymentRecord| p.user_id == user_id)?;
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentRecord>> {
        let mut payments = self.scan(CF_PAYMENTS, |p: &PaymentRecord| p.order_id == order_id)?;
        payments.sort_by_key(|p| p.installment_number);
        Ok(payments)
    }

    async fn payments_awaiting_commission(&self) -> Result<Vec<PaymentRecord>> {
        let mut payments = self.scan(CF_PAYMENTS, PaymentRecord::awaits_commission)?;
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}

#[async_trait]
impl UserStore for RocksDBStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.get_json(CF_USERS, user_id.as_bytes())
    }

    async fn save_user(&self, user: User) -> Result<()> {
        self.put_json(CF_USERS, user.id.as_bytes(), &user)
    }

    async fn autopay_users(&self) -> Result<Vec<User>> {
        // Keys are user ids, so the scan is already ordered by id.
        self.scan(CF_USERS, |u: &User| u.autopay_settings.enabled)
    }
}

#[async_trait]
impl StreakConfigStore for RocksDBStore {
    async fn get_streak_config(&self) -> Result<Option<StreakConfig>> {
        self.get_json(CF_SETTINGS, STREAK_CONFIG_KEY)
    }

    async fn save_streak_config(&self, config: StreakConfig) -> Result<()> {
        self.put_json(CF_SETTINGS, STREAK_CONFIG_KEY, &config)
    }

    async fn delete_streak_config(&self) -> Result<bool> {
        let cf = self.cf(CF_SETTINGS)?;
        let existed = self.db.get_pinned_cf(cf, STREAK_CONFIG_KEY)?.is_some();
        if existed {
            self.db.delete_cf(cf, STREAK_CONFIG_KEY)?;
        }
        Ok(existed)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn commit_installment(&self, commit: InstallmentCommit) -> Result<()> {
        let mut batch = WriteBatch::default();
        if let Some(wallet) = &commit.wallet {
            self.batch_json(&mut batch, CF_WALLETS, wallet.user_id.as_bytes(), wallet)?;
        }
        self.batch_json(&mut batch, CF_ORDERS, commit.order.id.as_bytes(), &commit.order)?;
        self.batch_json(&mut batch, CF_PAYMENTS, commit.payment.id.as_bytes(), &commit.payment)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn commit_commission(&self, commit: CommissionCommit) -> Result<()> {
        let mut batch = WriteBatch::default();
        let wallet = &commit.referrer_wallet;
        self.batch_json(&mut batch, CF_WALLETS, wallet.user_id.as_bytes(), wallet)?;
        self.batch_json(&mut batch, CF_ORDERS, commit.order.id.as_bytes(), &commit.order)?;
        self.batch_json(&mut batch, CF_PAYMENTS, commit.payment.id.as_bytes(), &commit.payment)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::domain::order::tests::new_order;
    use crate::domain::payment::PaymentSource;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn order() -> InstallmentOrder {
        InstallmentOrder::new(
            new_order(dec!(1000), 10, None),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        for name in [CF_WALLETS, CF_ORDERS, CF_PAYMENTS, CF_USERS, CF_SETTINGS] {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_wallet_roundtrip_survives_reopen() {
        let dir = tempdir().unwrap();
        let mut wallet = Wallet::new("u1");
        wallet.balance = Balance::new(dec!(250.50));
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.save_wallet(wallet.clone()).await.unwrap();
        }
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.get_wallet("u1").await.unwrap(), Some(wallet));
        assert!(store.get_wallet("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_commit_installment() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let order = order();
        let payment = PaymentRecord::completed(
            order.id,
            "u1".to_string(),
            1,
            dec!(100),
            order.payment_method,
            PaymentSource::FirstPayment,
            None,
            Utc::now(),
        );
        store
            .commit_installment(InstallmentCommit {
                wallet: Some(Wallet::new("u1")),
                order: order.clone(),
                payment: payment.clone(),
            })
            .await
            .unwrap();

        assert_eq!(store.get_order(order.id).await.unwrap(), Some(order.clone()));
        assert_eq!(store.orders_for_user("u1").await.unwrap().len(), 1);
        assert_eq!(store.payments_for_order(order.id).await.unwrap(), vec![payment]);
        assert!(store.get_wallet("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rocksdb_streak_config() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert!(!store.delete_streak_config().await.unwrap());
        store
            .save_streak_config(StreakConfig::new(true, vec![], Utc::now()).unwrap())
            .await
            .unwrap();
        assert!(store.get_streak_config().await.unwrap().is_some());
        assert!(store.delete_streak_config().await.unwrap());
        assert!(store.get_streak_config().await.unwrap().is_none());
    }
}
