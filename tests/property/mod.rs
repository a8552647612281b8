//! Property-based tests for queue ordering

mod ordering;
