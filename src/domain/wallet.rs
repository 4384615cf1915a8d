use super::UserId;
use super::money::{Amount, Balance, CommissionSplit};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletTransactionType {
    Credit,
    Debit,
}

/// Which pool of the wallet a ledger entry touched.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletPool {
    Available,
    Locked,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletTransactionCategory {
    TopUp,
    InstallmentPayment,
    ReferralCommission,
    StreakReward,
    AdminAdjustment,
    Bonus,
}

/// One append-only ledger line.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub r#type: WalletTransactionType,
    pub pool: WalletPool,
    pub category: WalletTransactionCategory,
    pub amount: Decimal,
    pub description: String,
    /// Order or payment this entry belongs to, when there is one.
    pub reference: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// What a ledger mutation is for; copied onto every entry it writes.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerContext {
    pub category: WalletTransactionCategory,
    pub description: String,
    pub reference: Option<Uuid>,
}

impl LedgerContext {
    pub fn new(category: WalletTransactionCategory, description: impl Into<String>) -> Self {
        Self {
            category,
            description: description.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: Uuid) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Withdrawable and locked funds as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub available: Decimal,
    pub locked: Decimal,
}

/// A user's wallet.
///
/// `balance` is the withdrawable pool, `hold_balance` the locked/investment
/// pool. Every mutation appends to `transactions` in the same step.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Balance,
    pub hold_balance: Balance,
    pub transactions: Vec<WalletTransaction>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Wallet {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: Balance::ZERO,
            hold_balance: Balance::ZERO,
            transactions: Vec::new(),
            updated_at: None,
        }
    }

    pub fn snapshot(&self) -> WalletBalance {
        WalletBalance {
            available: self.balance.value(),
            locked: self.hold_balance.value(),
        }
    }

    /// Credits the withdrawable pool.
    pub fn credit(&mut self, amount: Amount, context: &LedgerContext, now: DateTime<Utc>) {
        self.balance += amount.into();
        self.append(
            WalletTransactionType::Credit,
            WalletPool::Available,
            amount.value(),
            context,
            now,
        );
    }

    /// Debits the withdrawable pool, keeping `reserve` untouched.
    ///
    /// Leaves the wallet unchanged when the funds above the reserve do not
    /// cover `amount`.
    pub fn debit(
        &mut self,
        amount: Amount,
        reserve: Decimal,
        context: &LedgerContext,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let spendable = Balance::new((self.balance.value() - reserve).max(Decimal::ZERO));
        if !spendable.covers(amount) {
            return Err(EngineError::InsufficientBalance {
                required: amount.value(),
                available: spendable.value(),
            });
        }
        self.balance -= amount.into();
        self.append(
            WalletTransactionType::Debit,
            WalletPool::Available,
            amount.value(),
            context,
            now,
        );
        Ok(())
    }

    /// Splits a commission between both pools, one ledger entry per pool.
    pub fn credit_commission(
        &mut self,
        total: Amount,
        withdrawable_percentage: Decimal,
        context: &LedgerContext,
        now: DateTime<Utc>,
    ) -> CommissionSplit {
        let split = CommissionSplit::of(total.value(), withdrawable_percentage);
        self.balance += Balance::new(split.available);
        self.hold_balance += Balance::new(split.locked);
        self.append(
            WalletTransactionType::Credit,
            WalletPool::Available,
            split.available,
            context,
            now,
        );
        self.append(WalletTransactionType::Credit, WalletPool::Locked, split.locked, context, now);
        split
    }

    fn append(
        &mut self,
        r#type: WalletTransactionType,
        pool: WalletPool,
        amount: Decimal,
        context: &LedgerContext,
        now: DateTime<Utc>,
    ) {
        self.transactions.push(WalletTransaction {
            id: Uuid::new_v4(),
            r#type,
            pool,
            category: context.category,
            amount,
            description: context.description.clone(),
            reference: context.reference,
            created_at: now,
        });
        self.updated_at = Some(now);
    }
}
