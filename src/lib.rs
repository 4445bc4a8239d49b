//! BANWATCH: Steam ban and CS2 inventory reporter for Discord channels.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod storage;
pub mod steam;
pub mod engine;
pub mod discord;
pub mod dashboard;
