//! Error types for the CTI graph repository.
//!
//! This module provides a unified error type for all backend operations.

mod backend_error;

pub use backend_error::BackendError;
