use crate::domain::order::OrderStatus;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("User {0} not found")]
    UserNotFound(String),
    #[error("Order {0} not found")]
    OrderNotFound(Uuid),
    #[error("Order {order_id} is {status}: {reason}")]
    InvalidOrderState {
        order_id: Uuid,
        status: OrderStatus,
        reason: String,
    },
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },
    #[error("Installment {installment} of order {order_id} is already paid")]
    DuplicatePayment { order_id: Uuid, installment: u32 },
    #[error("Autopay unavailable for order {order_id}: {reason}")]
    AutopayUnavailable { order_id: Uuid, reason: String },
    #[error("Commission calculation error: {0}")]
    CommissionCalculation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Notification error: {0}")]
    NotificationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

impl EngineError {
    /// Stable machine-readable reason code for callers.
    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineError::ValidationError(_) => "VALIDATION_ERROR",
            EngineError::UserNotFound(_) => "USER_NOT_FOUND",
            EngineError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            EngineError::InvalidOrderState { .. } => "INVALID_ORDER_STATE",
            EngineError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            EngineError::DuplicatePayment { .. } => "DUPLICATE_PAYMENT",
            EngineError::AutopayUnavailable { .. } => "AUTOPAY_UNAVAILABLE",
            EngineError::CommissionCalculation(_) => "COMMISSION_CALCULATION_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::ConfigError(_) => "CONFIG_ERROR",
            EngineError::StorageError(_) => "STORAGE_ERROR",
            EngineError::NotificationError(_) => "NOTIFICATION_ERROR",
            EngineError::CsvError(_) => "CSV_ERROR",
            EngineError::JsonError(_) => "JSON_ERROR",
            EngineError::IoError(_) => "IO_ERROR",
            #[cfg(feature = "storage-rocksdb")]
            EngineError::RocksDbError(_) => "STORAGE_ERROR",
        }
    }

    /// HTTP-style status for the request layer. Infrastructure failures are 5xx.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::ValidationError(_) => 400,
            EngineError::UserNotFound(_)
            | EngineError::OrderNotFound(_)
            | EngineError::NotFound(_) => 404,
            EngineError::InvalidOrderState { .. }
            | EngineError::DuplicatePayment { .. }
            | EngineError::AutopayUnavailable { .. }
            | EngineError::Conflict(_) => 409,
            EngineError::InsufficientBalance { .. } => 422,
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_errors_are_client_errors() {
        let err = EngineError::InsufficientBalance {
            required: dec!(100),
            available: dec!(50),
        };
        assert_eq!(err.reason_code(), "INSUFFICIENT_BALANCE");
        assert_eq!(err.status_code(), 422);
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Insufficient balance: required 100, available 50"
        );

        let err = EngineError::OrderNotFound(Uuid::nil());
        assert_eq!(err.status_code(), 404);
    }

    #[test]
    fn test_infrastructure_errors_are_server_errors() {
        let err = EngineError::StorageError("disk full".to_string());
        assert_eq!(err.status_code(), 500);
        assert!(!err.is_client_error());

        let err: EngineError = std::io::Error::other("boom").into();
        assert_eq!(err.reason_code(), "IO_ERROR");
        assert_eq!(err.status_code(), 500);
    }
}
