use super::UserId;
use super::order::PaymentMethod;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Completed,
    Failed,
}

/// Which path produced the charge.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentSource {
    FirstPayment,
    Manual,
    Autopay,
}

/// Immutable log of one installment charge. Only the commission fields are
/// ever written after creation, and only once.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: UserId,
    pub installment_number: u32,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub source: PaymentSource,
    pub status: PaymentStatus,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub commission_calculated: bool,
    pub commission_amount: Decimal,
    pub commission_credited_to_referrer: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn completed(
        order_id: Uuid,
        user_id: UserId,
        installment_number: u32,
        amount: Decimal,
        method: PaymentMethod,
        source: PaymentSource,
        gateway_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            user_id,
            installment_number,
            amount,
            method,
            source,
            status: PaymentStatus::Completed,
            gateway_reference,
            failure_reason: None,
            commission_calculated: false,
            commission_amount: Decimal::ZERO,
            commission_credited_to_referrer: None,
            created_at: now,
        }
    }

    pub fn failed(
        order_id: Uuid,
        user_id: UserId,
        installment_number: u32,
        amount: Decimal,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: PaymentStatus::Failed,
            failure_reason: Some(reason.into()),
            ..Self::completed(
                order_id,
                user_id,
                installment_number,
                amount,
                PaymentMethod::Wallet,
                PaymentSource::Autopay,
                None,
                now,
            )
        }
    }

    /// Stamps the commission result. Refuses a second stamp so a retried
    /// credit can never be applied twice.
    pub fn attach_commission(
        &mut self,
        amount: Decimal,
        referrer: UserId,
    ) -> Result<(), EngineError> {
        if self.commission_calculated {
            return Err(EngineError::CommissionCalculation(format!(
                "commission for payment {} was already credited",
                self.id
            )));
        }
        self.commission_calculated = true;
        self.commission_amount = amount;
        self.commission_credited_to_referrer = Some(referrer);
        Ok(())
    }

    /// Marks a payment that owes no commission as settled.
    pub fn waive_commission(&mut self) {
        self.commission_calculated = true;
        self.commission_amount = Decimal::ZERO;
        self.commission_credited_to_referrer = None;
    }

    pub fn awaits_commission(&self) -> bool {
        self.status == PaymentStatus::Completed && !self.commission_calculated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> PaymentRecord {
        PaymentRecord::completed(
            Uuid::new_v4(),
            "u1".to_string(),
            2,
            dec!(100),
            PaymentMethod::Wallet,
            PaymentSource::Autopay,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_commission_attached_once() {
        let mut payment = record();
        assert!(payment.awaits_commission());
        payment.attach_commission(dec!(25), "r1".to_string()).unwrap();
        assert!(!payment.awaits_commission());

        let again = payment.attach_commission(dec!(25), "r1".to_string());
        assert!(matches!(again, Err(EngineError::CommissionCalculation(_))));
        assert_eq!(payment.commission_amount, dec!(25));
    }

    #[test]
    fn test_waived_commission_is_settled() {
        let mut payment = record();
        payment.waive_commission();
        assert!(!payment.awaits_commission());
        assert!(payment.commission_amount.is_zero());
        assert!(payment.attach_commission(dec!(25), "r1".to_string()).is_err());
    }

    #[test]
    fn test_failed_record_never_awaits_commission() {
        let payment = PaymentRecord::failed(
            Uuid::new_v4(),
            "u1".to_string(),
            2,
            dec!(100),
            "low balance",
            Utc::now(),
        );
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert!(!payment.awaits_commission());
    }

    #[test]
    fn test_payment_record_json_shape() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["source"], "AUTOPAY");
        assert_eq!(json["method"], "WALLET");
    }
}
