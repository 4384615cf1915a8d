use crate::application::payments::PaymentOutcome;
use crate::application::scheduler::RunSummary;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use std::io::Write;

/// Writes one CSV row per attempted order of a batch run. The header is
/// written once, ahead of the first summary.
pub struct RunReportWriter<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

impl<W: Write> RunReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
            header_written: false,
        }
    }

    pub fn write_summary(&mut self, summary: &RunSummary) -> Result<()> {
        if !self.header_written {
            self.writer.write_record([
                "date", "slot", "user", "order", "priority", "result", "amount", "balance",
                "reason",
            ])?;
            self.header_written = true;
        }
        let date = summary.business_date.to_string();
        for user in &summary.details {
            let balance = user.balance.to_string();
            if let Some(error) = &user.error {
                self.writer.write_record([
                    date.as_str(),
                    summary.slot_id.as_str(),
                    user.user_id.as_str(),
                    "",
                    "",
                    "ERROR",
                    "",
                    "",
                    error.as_str(),
                ])?;
                continue;
            }
            for order in &user.orders {
                let (amount, reason) = match &order.outcome {
                    PaymentOutcome::Success { amount, .. } => (*amount, String::new()),
                    PaymentOutcome::InsufficientBalance { required, .. } => {
                        (*required, "insufficient balance".to_string())
                    }
                    PaymentOutcome::Skipped { reason } | PaymentOutcome::Failed { reason } => {
                        (Decimal::ZERO, reason.clone())
                    }
                };
                self.writer.write_record([
                    date.clone(),
                    summary.slot_id.clone(),
                    user.user_id.clone(),
                    order.order_id.to_string(),
                    order.priority.to_string(),
                    order.outcome.label().to_string(),
                    amount.to_string(),
                    balance.clone(),
                    reason,
                ])?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| EngineError::IoError(e.into_error()))
    }
}
