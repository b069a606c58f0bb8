//! Shared test utilities for scriptorium integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring the pipeline over an in-memory database, a temp
//!   uploads directory and an in-memory temp bucket
//! - Scripted fakes for the OCR provider, the cleaner and the generator
//! - Builders for PDF fixtures

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::{TestHarness, OWNER};
