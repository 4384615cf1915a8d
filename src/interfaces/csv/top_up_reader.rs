use crate::domain::UserId;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One wallet top-up row: `user, amount[, note]`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct TopUpRow {
    pub user: UserId,
    pub amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

/// Reads top-ups from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so the optional `note` column may be left off.
pub struct TopUpReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TopUpReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a bad row yields an error and the stream
    /// carries on.
    pub fn rows(self) -> impl Iterator<Item = Result<TopUpRow>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EngineError::from))
    }
}
