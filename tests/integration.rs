//! Integration tests entry point
//!
//! This file serves as the entry point for all integration tests.
//! It includes the integration_tests module which contains:
//! - Search, crawl, probe and autopsy runs through the engine facade
//! - Shared quota accounting under concurrency
//! - HTTP adapter tests against mock servers
//! - Property tests for ID arithmetic, scoring and filters

mod common;
mod integration_tests;
