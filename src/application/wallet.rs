use super::Page;
use super::locks::KeyedLocks;
use crate::domain::money::{Amount, CommissionSplit};
use crate::domain::ports::{ClockRef, StorageRef};
use crate::domain::wallet::{LedgerContext, Wallet, WalletBalance, WalletTransaction};
use crate::error::Result;
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

/// Per-user balances and their append-only history.
///
/// Every mutation takes the wallet's lock, re-reads the wallet from storage
/// and writes it back before releasing, so checks always see the latest
/// balance.
pub struct WalletLedger {
    storage: StorageRef,
    clock: ClockRef,
    locks: KeyedLocks,
    withdrawable_percentage: Decimal,
}

impl WalletLedger {
    pub fn new(storage: StorageRef, clock: ClockRef, withdrawable_percentage: Decimal) -> Self {
        Self {
            storage,
            clock,
            locks: KeyedLocks::new(),
            withdrawable_percentage,
        }
    }

    pub fn withdrawable_percentage(&self) -> Decimal {
        self.withdrawable_percentage
    }

    /// Serializes wallet mutations for `user_id` until the guard drops.
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(user_id).await
    }

    /// Current wallet, or an empty one if the user never had money.
    pub async fn load(&self, user_id: &str) -> Result<Wallet> {
        Ok(self
            .storage
            .get_wallet(user_id)
            .await?
            .unwrap_or_else(|| Wallet::new(user_id)))
    }

    pub async fn get_balance(&self, user_id: &str) -> Result<WalletBalance> {
        Ok(self.load(user_id).await?.snapshot())
    }

    /// Takes `amount` from the withdrawable pool or fails without touching
    /// the wallet.
    #[instrument(skip(self, amount, context), fields(amount = %amount))]
    pub async fn deduct(
        &self,
        user_id: &str,
        amount: Amount,
        context: LedgerContext,
    ) -> Result<WalletBalance> {
        let _guard = self.lock(user_id).await;
        let mut wallet = self.load(user_id).await?;
        if let Err(e) = wallet.debit(amount, Decimal::ZERO, &context, self.clock.now()) {
            warn!(user_id = %user_id, error = %e, "Wallet deduction rejected");
            return Err(e);
        }
        let snapshot = wallet.snapshot();
        self.storage.save_wallet(wallet).await?;
        Ok(snapshot)
    }

    /// Unconditional credit of a commission, split between both pools.
    #[instrument(skip(self, total, context), fields(total = %total))]
    pub async fn credit_commission(
        &self,
        referrer_id: &str,
        total: Amount,
        context: LedgerContext,
    ) -> Result<CommissionSplit> {
        let _guard = self.lock(referrer_id).await;
        let mut wallet = self.load(referrer_id).await?;
        let split = wallet.credit_commission(
            total,
            self.withdrawable_percentage,
            &context,
            self.clock.now(),
        );
        self.storage.save_wallet(wallet).await?;
        info!(
            referrer_id = %referrer_id,
            available = %split.available,
            locked = %split.locked,
            "Commission credited"
        );
        Ok(split)
    }

    /// Unconditional credit to the withdrawable pool (top-ups, admin, bonuses).
    #[instrument(skip(self, amount, context), fields(amount = %amount))]
    pub async fn add_money(
        &self,
        user_id: &str,
        amount: Amount,
        context: LedgerContext,
    ) -> Result<WalletBalance> {
        let _guard = self.lock(user_id).await;
        let mut wallet = self.load(user_id).await?;
        wallet.credit(amount, &context, self.clock.now());
        let snapshot = wallet.snapshot();
        self.storage.save_wallet(wallet).await?;
        info!(user_id = %user_id, category = ?context.category, "Wallet credited");
        Ok(snapshot)
    }

    /// Ledger entries newest first.
    pub async fn history(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<WalletTransaction>> {
        let wallet = self.load(user_id).await?;
        let entries: Vec<WalletTransaction> = wallet.transactions.into_iter().rev().collect();
        Ok(Page::slice(entries, page, limit))
    }
}
