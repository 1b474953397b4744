//! Common utilities for bsonform
//!
//! This crate provides the error types shared by the schema and MongoDB crates.

pub mod error;

pub use error::{ErrorType, OdmError, Result, ValidationError};
