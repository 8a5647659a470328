//! Unit tests for individual components

mod budget_test;
mod cache_test;
mod config_test;
mod error_test;
mod ledger_test;
mod queue_test;
