use std::fmt;

use thiserror::Error;

use crate::relations::Relation;
use crate::rules::Rule;

/// A CHC solving engine.
///
/// Relations are registered before any rule mentions them; queries are asked
/// once every rule of the function has been added.
pub trait Oracle {
    fn register_relation(&mut self, relation: &Relation) -> Result<(), OracleError>;

    fn add_rule(&mut self, rule: &Rule, label: Option<&str>) -> Result<(), OracleError>;

    /// Asks whether `relation` is derivable from the rules added so far.
    fn add_query(&mut self, relation: &Relation) -> Verdict;
}

/// Answer to a reachability query.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Verdict {
    /// The queried block is reachable; the assertion can fail
    Reachable { witness: Option<String> },
    /// The queried block is never reached
    Unreachable,
    /// The oracle could not decide
    Error(OracleError),
}

impl Verdict {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Verdict::Reachable { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Reachable { .. } => f.write_str("reachable"),
            Verdict::Unreachable => f.write_str("unreachable"),
            Verdict::Error(err) => write!(f, "error: {err}"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum OracleError {
    #[error("relation @{label} is already declared")]
    DuplicateRelation { label: String },
    #[error("relation @{label} is not declared")]
    UnknownRelation { label: String },
    #[error("failed to start solver `{executable}`: {message}")]
    Spawn { executable: String, message: String },
    #[error("solver i/o failed: {message}")]
    Io { message: String },
    #[error("solver gave up after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("solver returned unknown: {reason}")]
    Unknown { reason: String },
    #[error("solver failed: {message}")]
    Failed { message: String },
    #[error("unexpected solver output: {output}")]
    UnexpectedOutput { output: String },
}
