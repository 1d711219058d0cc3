//! Integration tests module
//!
//! End-to-end tests for the obscura engine, including:
//! - Multi-source search with filtering, dedup and partial failure
//! - Related-content crawls over cyclic graphs
//! - Brute-force probing and channel autopsy
//! - Quota, breaker and adapter behavior against mock servers

pub mod adapters_test;
pub mod autopsy_test;
pub mod crawl_test;
pub mod probe_test;
pub mod properties_test;
pub mod quota_test;
pub mod search_test;
