//! Core types shared across the expansion engine.

pub mod error;

pub use error::ExpandError;
