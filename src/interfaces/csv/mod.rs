//! CSV adapters: wallet top-ups in, batch run reports out.

pub mod run_report_writer;
pub mod top_up_reader;
