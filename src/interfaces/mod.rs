//! Edges of the engine: CSV import/export and JSON scenario files.

pub mod csv;
pub mod scenario;
