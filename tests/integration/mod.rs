//! Integration tests for the strongbox data-access runtime

pub mod test_utils;

mod config_integration;
mod operation_queue;
mod transactions;
