//! Spreadsheet ingestion: fetch one workbook from object storage, clean it,
//! and load it into a relational table. A daily workflow declaration drives
//! the ingestion binary as a shell step.

pub use duckdb::arrow;

pub mod clean;
pub mod config;
pub mod fetch;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod schedule;
pub mod sheet;
