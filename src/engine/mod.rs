//! Core engine: the scan → classify → value → report pipeline.

pub mod report;
pub mod scanner;
pub mod valuation;

pub use scanner::{ScanReport, Scanner};
