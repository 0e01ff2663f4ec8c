//! Compiles a `cfg-ir` control-flow graph into constrained Horn clauses.
//!
//! Every block gets one relation over the variables live at its entry. Each
//! edge becomes an implication from the source relation, the block's
//! instruction semantics and the branch guard to the successor relation.
//! Blocks that call an assertion-failure intrinsic are queried; a reachable
//! query means the assertion can fail.

use cfg_ir::Function;
use thiserror::Error;

mod encode;
#[cfg(test)]
mod mock;
mod oracle;
mod relations;
mod rules;
mod smtlib;
mod solver;
mod term;
mod translate;
mod universe;

pub use encode::{UnsupportedConstruct, UnsupportedReason};
pub use oracle::{Oracle, OracleError, Verdict};
pub use relations::{Relation, RelationRegistry};
pub use rules::Rule;
pub use smtlib::ChcScript;
pub use solver::{
    parse_solver_output, solve_chc_script, SolverConfig, SolverResult, SolverRun, Z3Oracle,
    Z3_TIMEOUT_SECONDS,
};
pub use term::{ArithOp, CmpOp, Sort, Term, Variable};
pub use translate::{QueryOutcome, SkippedRule, Translation, Translator};
pub use universe::VariableUniverse;

/// Options for CFG-to-CHC translation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EncodeOptions {
    /// Forward `entry`, `from->to` and `from->to:true|false` names with every rule.
    pub label_rules: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { label_rules: true }
    }
}

/// Errors that abort the translation of a whole function.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("function ${function} has no blocks")]
    EmptyFunction { function: String },
    #[error("duplicate block label @{label}")]
    DuplicateLabel { label: String },
    #[error("value %{name} is defined more than once")]
    DuplicateDefinition { name: String },
    #[error("relation for block @{label} is already registered")]
    DuplicateRelation { label: String },
    #[error("oracle rejected relation @{label}: {source}")]
    Oracle {
        label: String,
        #[source]
        source: OracleError,
    },
}

/// Errors that drop a single rule; translation carries on without it.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum RuleError {
    #[error("no relation registered for block @{label}")]
    MissingRelation { label: String },
    #[error("value %{name} is not defined in this function")]
    UnknownValue { name: String },
    #[error("relation @{relation} takes {expected} arguments, got {found}")]
    ArityMismatch {
        relation: String,
        expected: usize,
        found: usize,
    },
    #[error("argument {index} of relation @{relation} must be {expected}, got {found}")]
    SortMismatch {
        relation: String,
        index: usize,
        expected: Sort,
        found: Sort,
    },
    #[error("quantifier binds no variables")]
    EmptyQuantifier,
    #[error("variable %{name} is bound more than once")]
    DuplicateBinder { name: String },
    #[error("oracle rejected rule: {0}")]
    Rejected(#[source] OracleError),
}

/// Coarse classification of a [`RuleError`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum FailureKind {
    LookupFailure,
    QuantifierConstruction,
    Oracle,
}

impl RuleError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RuleError::MissingRelation { .. }
            | RuleError::UnknownValue { .. }
            | RuleError::ArityMismatch { .. }
            | RuleError::SortMismatch { .. } => FailureKind::LookupFailure,
            RuleError::EmptyQuantifier | RuleError::DuplicateBinder { .. } => {
                FailureKind::QuantifierConstruction
            }
            RuleError::Rejected(_) => FailureKind::Oracle,
        }
    }
}

/// Translate one function and render it as a z3 `HORN` script, queries included.
///
/// No solver is run.
pub fn function_to_smt(
    function: &Function,
    options: &EncodeOptions,
) -> Result<String, TranslateError> {
    let mut oracle = Z3Oracle::new(SolverConfig::default());
    let translation = Translator::new(&mut oracle, options.clone()).translate(function)?;
    let queries = translation.query_relations();
    Ok(oracle.script().render(&queries))
}
