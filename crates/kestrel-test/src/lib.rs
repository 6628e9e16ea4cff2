//! KESTREL Test Harness - Fakes and scenarios for the sync core
//!
//! This crate provides:
//! - A scripted subscription transport that records every call
//! - Fake server-side paged history with failure injection
//! - A seeded chaos feed that duplicates and reorders raw events
//! - End-to-end scenarios across window, intake, health and runtime

pub mod chaos;
pub mod history;
pub mod integration;
pub mod transport;

pub use chaos::*;
pub use history::*;
pub use integration::*;
pub use transport::*;
