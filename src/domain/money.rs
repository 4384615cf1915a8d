use crate::error::EngineError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Currency amounts are kept at paise precision.
pub const MONEY_SCALE: u32 = 2;

/// A wallet balance. May only go negative through direct arithmetic; every
/// ledger operation checks before subtracting.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// A strictly positive amount moved by a ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, EngineError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::ValidationError(format!(
                "Amount must be positive, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn covers(&self, amount: Amount) -> bool {
        self.0 >= amount.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// Rounds half away from zero to paise.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds up to the next paisa.
pub fn ceil_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::AwayFromZero)
}

/// A commission split between the withdrawable and the locked pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub available: Decimal,
    pub locked: Decimal,
}

impl CommissionSplit {
    /// Locked share is truncated to paise; the withdrawable share takes the
    /// remainder so both always sum to `total`.
    pub fn of(total: Decimal, withdrawable_percentage: Decimal) -> Self {
        let locked_percentage = Decimal::ONE_HUNDRED - withdrawable_percentage;
        let locked = (total * locked_percentage / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero);
        Self {
            available: total - locked,
            locked,
        }
    }

    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_arithmetic() {
        let b1 = Balance::new(dec!(10.0));
        let b2 = Balance::new(dec!(5.0));
        assert_eq!(b1 + b2, Balance::new(dec!(15.0)));
        assert_eq!(b1 - b2, Balance::new(dec!(5.0)));
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(EngineError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_amount_deserialization_rejects_non_positive() {
        let ok: Amount = serde_json::from_str("\"12.5\"").unwrap();
        assert_eq!(ok.value(), dec!(12.5));
        assert!(serde_json::from_str::<Amount>("\"0\"").is_err());
    }

    #[test]
    fn test_commission_split_ninety_ten() {
        let split = CommissionSplit::of(dec!(25), dec!(90));
        assert_eq!(split.available, dec!(22.5));
        assert_eq!(split.locked, dec!(2.5));
    }

    #[test]
    fn test_commission_split_truncates_locked_share() {
        // 10% of 0.37 is 0.037 -> locked 0.03, available keeps the rest.
        let split = CommissionSplit::of(dec!(0.37), dec!(90));
        assert_eq!(split.locked, dec!(0.03));
        assert_eq!(split.available, dec!(0.34));
    }

    #[test]
    fn test_commission_split_always_sums_to_total() {
        let mut rng = rand::thread_rng();
        for _ in 0..1_000 {
            let paise: i64 = rng.gen_range(1..10_000_000);
            let total = Decimal::new(paise, 2);
            let split = CommissionSplit::of(total, dec!(90));
            assert_eq!(split.total(), total);
            assert!(split.locked >= Decimal::ZERO);
            assert!(split.available >= split.locked);
        }
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_money(dec!(12.345)), dec!(12.35));
        assert_eq!(round_money(dec!(12.344)), dec!(12.34));
        assert_eq!(ceil_money(dec!(333.3333)), dec!(333.34));
        assert_eq!(ceil_money(dec!(100)), dec!(100));
    }
}
