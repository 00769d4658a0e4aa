//! Commit validator.

mod validator;

pub use validator::{check_structure, CommitValidator, COMMIT_CONTEXT};
