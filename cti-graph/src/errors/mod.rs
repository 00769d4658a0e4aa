//! Error types for the graph store components.

use thiserror::Error;

use cti_graph_repository::BackendError;
use cti_graph_shared::{ModelError, StixId};

/// Failures of a molecule expansion.
///
/// "Nothing matched" and "the pattern does not exist" are distinct variants so
/// callers never mistake a failed expansion for an empty result.
#[derive(Error, Debug, Clone)]
pub enum ExpandError {
    /// No molecule of that name is registered.
    #[error("Unknown molecule: {0}")]
    UnknownMolecule(String),

    /// The seeds do not participate in the molecule at all.
    #[error("No hits for seed in molecule {molecule}")]
    NoSeedMatch { molecule: String },

    /// The walk stopped growing while some core rules were still unmatched.
    #[error("Partial match for molecule {molecule} after {rounds} rounds; unmatched rules: {unsatisfied:?}")]
    PartialMatch {
        molecule: String,
        rounds: u32,
        unsatisfied: Vec<String>,
    },

    /// The caller's view could not be materialized.
    #[error("Visibility error: {0}")]
    Visibility(#[from] MarkingError),

    /// Backend fault.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl ExpandError {
    /// Create a no-seed-match error.
    pub fn no_seed_match(molecule: impl Into<String>) -> Self {
        Self::NoSeedMatch {
            molecule: molecule.into(),
        }
    }

    /// Returns true for failures that mean "this seed has no such molecule"
    /// rather than an infrastructure problem.
    pub fn is_no_match(&self) -> bool {
        matches!(self, Self::NoSeedMatch { .. } | Self::PartialMatch { .. })
    }
}

/// Reason a batch was refused as a commit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitRejection {
    /// The batch has no grouping.
    #[error("Commit has no grouping")]
    NoGrouping,

    /// The batch has more than one grouping.
    #[error("Commit has {0} groupings")]
    MultipleGroupings(usize),

    /// Batch members the grouping does not declare.
    #[error("Grouping does not declare {0:?}")]
    MissingMembers(Vec<StixId>),

    /// Ids the grouping declares that are not in the batch.
    #[error("Grouping declares ids not in the commit: {0:?}")]
    UnexpectedMembers(Vec<StixId>),

    /// The grouping has no author.
    #[error("Commit grouping has no created_by_ref")]
    MissingAuthor,

    /// The author is neither in the batch nor in the store.
    #[error("Commit author {0} does not resolve to an identity")]
    UnresolvedAuthor(StixId),

    /// A member failed model validation.
    #[error("Invalid entity in commit: {0}")]
    InvalidEntity(#[from] ModelError),
}

/// Errors from commit validation and storage.
#[derive(Error, Debug, Clone)]
pub enum CommitError {
    /// The batch is not a valid commit; nothing was written.
    #[error("Commit rejected: {0}")]
    Rejected(#[from] CommitRejection),

    /// Backend fault.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors from the marking and visibility engine.
#[derive(Error, Debug, Clone)]
pub enum MarkingError {
    /// The caller id is not an identity.
    #[error("Caller {0} is not an identity")]
    InvalidCaller(String),

    /// Distribution markings must be based on TLP AMBER or RED.
    #[error("Marking {0} cannot be the base of a distribution marking")]
    InvalidTlpBase(String),

    /// The marking is not a distribution marking.
    #[error("Marking {0} has no distribution list")]
    NotDistribution(String),

    /// The open-markings grouping has not been stored.
    #[error("Open markings grouping not found")]
    MissingOpenMarkings,

    /// Backend fault.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors from feed processing.
#[derive(Error, Debug, Clone)]
pub enum IngestError {
    /// No processor is registered under that name.
    #[error("Unknown processor: {0}")]
    UnknownProcessor(String),

    /// A feed item could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl IngestError {
    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}
