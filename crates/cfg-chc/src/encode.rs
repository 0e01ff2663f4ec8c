use cfg_ir::{BinOp, Block, CastOp, Instr, IntPredicate, Intrinsic, Statement, Type, Value};
use thiserror::Error;
use tracing::{debug, trace};

use crate::term::{ArithOp, CmpOp, Sort, Term};
use crate::universe::VariableUniverse;
use crate::RuleError;

/// Why a statement contributed no constraint.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum UnsupportedReason {
    #[error("binary operation `{0}` is not modeled")]
    BinaryOp(BinOp),
    #[error("comparison predicate `{0}` is not modeled")]
    Predicate(IntPredicate),
    #[error("cast `{kind}` from {from} to {to} is not modeled")]
    Cast { kind: CastOp, from: Type, to: Type },
    #[error("%{name} has unmodeled type {ty}")]
    ValueType { name: String, ty: Type },
    #[error("operand {operand} is {found}, expected {expected}")]
    OperandSort {
        operand: String,
        expected: Sort,
        found: Sort,
    },
    #[error("phi has no incoming value for predecessor @{from}")]
    MissingIncoming { from: String },
}

/// A statement the encoder skipped, with the block it sits in.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnsupportedConstruct {
    pub block: String,
    pub statement: String,
    pub reason: UnsupportedReason,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum Encoding {
    Assertion(Term),
    /// The block calls an assertion-failure intrinsic
    AssertFail,
    /// Deliberately left unconstrained
    Ignored(&'static str),
    Unsupported(UnsupportedReason),
}

/// Logical view of an IR value.
#[derive(Debug)]
pub(crate) enum EvalError {
    /// Named value that the function never defines
    Unknown(String),
    Unsupported(UnsupportedReason),
}

impl From<UnsupportedReason> for EvalError {
    fn from(reason: UnsupportedReason) -> Self {
        EvalError::Unsupported(reason)
    }
}

/// Natural sort of an operand, if it is modeled at all.
fn sort_of(value: &Value, universe: &VariableUniverse) -> Result<Sort, EvalError> {
    match value {
        Value::Const(_) => Ok(Sort::BoundedInt32),
        Value::Bool(_) => Ok(Sort::Bool),
        Value::Temporary(name) => lookup_sort(name, universe),
    }
}

pub(crate) fn lookup_sort(name: &str, universe: &VariableUniverse) -> Result<Sort, EvalError> {
    if let Some(variable) = universe.lookup(name) {
        return Ok(variable.sort());
    }
    match universe.skipped_type(name) {
        Some(ty) => Err(UnsupportedReason::ValueType {
            name: name.to_string(),
            ty: *ty,
        }
        .into()),
        None => Err(EvalError::Unknown(name.to_string())),
    }
}

/// Evaluates `value` as a term of sort `expected`.
///
/// Integer constants are truncated to 32 bits and, where a boolean is
/// expected, read as `value != 0`.
pub(crate) fn eval(
    value: &Value,
    expected: Sort,
    universe: &VariableUniverse,
) -> Result<Term, EvalError> {
    match (value, expected) {
        (Value::Const(v), Sort::BoundedInt32) => Ok(Term::Int(*v as i32)),
        (Value::Const(v), Sort::Bool) => Ok(Term::Bool(*v != 0)),
        (Value::Bool(b), Sort::Bool) => Ok(Term::Bool(*b)),
        (Value::Bool(_), Sort::BoundedInt32) => Err(UnsupportedReason::OperandSort {
            operand: value.to_string(),
            expected,
            found: Sort::Bool,
        }
        .into()),
        (Value::Temporary(name), _) => {
            let found = lookup_sort(name, universe)?;
            if found != expected {
                return Err(UnsupportedReason::OperandSort {
                    operand: value.to_string(),
                    expected,
                    found,
                }
                .into());
            }
            // lookup_sort succeeded, so the variable exists
            match universe.lookup(name) {
                Some(variable) => Ok(Term::var(variable)),
                None => Err(EvalError::Unknown(name.clone())),
            }
        }
    }
}

/// Variable defined by `stmt`, checked against the sort the instruction produces.
fn result_term(
    stmt: &Statement,
    sort: Sort,
    universe: &VariableUniverse,
) -> Result<Option<Term>, EvalError> {
    let Some(name) = stmt.defined_value() else {
        return Ok(None);
    };
    let found = lookup_sort(name, universe)?;
    if found != sort {
        return Err(UnsupportedReason::OperandSort {
            operand: format!("%{name}"),
            expected: sort,
            found,
        }
        .into());
    }
    Ok(universe.lookup(name).map(Term::var))
}

fn arith_op(kind: BinOp) -> Option<ArithOp> {
    match kind {
        BinOp::Add => Some(ArithOp::Add),
        BinOp::Sub => Some(ArithOp::Sub),
        BinOp::Mul => Some(ArithOp::Mul),
        BinOp::Sdiv => Some(ArithOp::Sdiv),
        BinOp::Udiv => Some(ArithOp::Udiv),
        _ => None,
    }
}

fn cmp_op(pred: IntPredicate) -> Option<CmpOp> {
    match pred {
        IntPredicate::Eq => Some(CmpOp::Eq),
        IntPredicate::Ne => Some(CmpOp::Ne),
        IntPredicate::Sge => Some(CmpOp::Sge),
        IntPredicate::Sgt => Some(CmpOp::Sgt),
        IntPredicate::Slt => Some(CmpOp::Slt),
        IntPredicate::Sle => Some(CmpOp::Sle),
        IntPredicate::Ugt | IntPredicate::Uge | IntPredicate::Ult | IntPredicate::Ule => None,
    }
}

/// Encodes one statement.
///
/// `Err` is only returned for operands naming values the function never
/// defines; everything else the encoder cannot model is `Unsupported`.
pub(crate) fn encode_statement(
    stmt: &Statement,
    universe: &VariableUniverse,
) -> Result<Encoding, RuleError> {
    match encode_instr(stmt, universe) {
        Ok(encoding) => Ok(encoding),
        Err(EvalError::Unsupported(reason)) => Ok(Encoding::Unsupported(reason)),
        Err(EvalError::Unknown(name)) => Err(RuleError::UnknownValue { name }),
    }
}

fn encode_instr(stmt: &Statement, universe: &VariableUniverse) -> Result<Encoding, EvalError> {
    match &stmt.instr {
        Instr::Binary { kind, lhs, rhs } => {
            let Some(op) = arith_op(*kind) else {
                return Ok(Encoding::Unsupported(UnsupportedReason::BinaryOp(*kind)));
            };
            let Some(result) = result_term(stmt, Sort::BoundedInt32, universe)? else {
                return Ok(Encoding::Ignored("unused result"));
            };
            let lhs = eval(lhs, Sort::BoundedInt32, universe)?;
            let rhs = eval(rhs, Sort::BoundedInt32, universe)?;
            Ok(Encoding::Assertion(Term::eq(result, Term::arith(op, lhs, rhs))))
        }
        Instr::Icmp { pred, lhs, rhs } => {
            let Some(op) = cmp_op(*pred) else {
                return Ok(Encoding::Unsupported(UnsupportedReason::Predicate(*pred)));
            };
            let Some(result) = result_term(stmt, Sort::Bool, universe)? else {
                return Ok(Encoding::Ignored("unused result"));
            };
            // equality compares booleans too; orderings are integer-only
            let operand_sort = match lhs {
                Value::Temporary(_) if !op.is_ordering() => sort_of(lhs, universe)?,
                _ => Sort::BoundedInt32,
            };
            let lhs = eval(lhs, operand_sort, universe)?;
            let rhs = eval(rhs, operand_sort, universe)?;
            Ok(Encoding::Assertion(Term::eq(result, Term::cmp(op, lhs, rhs))))
        }
        Instr::Cast { kind, from, value } => {
            let unsupported = || {
                Encoding::Unsupported(UnsupportedReason::Cast {
                    kind: *kind,
                    from: *from,
                    to: stmt.ty,
                })
            };
            match (Sort::from_type(from), Sort::from_type(&stmt.ty)) {
                (Some(Sort::Bool), Some(Sort::BoundedInt32)) => {
                    let Some(result) = result_term(stmt, Sort::BoundedInt32, universe)? else {
                        return Ok(Encoding::Ignored("unused result"));
                    };
                    let operand = eval(value, Sort::Bool, universe)?;
                    Ok(Encoding::Assertion(Term::eq(
                        result,
                        Term::ite(operand, Term::Int(1), Term::Int(0)),
                    )))
                }
                (Some(Sort::BoundedInt32), Some(Sort::Bool)) => {
                    let Some(result) = result_term(stmt, Sort::Bool, universe)? else {
                        return Ok(Encoding::Ignored("unused result"));
                    };
                    let operand = eval(value, Sort::BoundedInt32, universe)?;
                    Ok(Encoding::Assertion(Term::eq(
                        result,
                        Term::ite(
                            Term::cmp(CmpOp::Sgt, operand, Term::Int(0)),
                            Term::Bool(true),
                            Term::Bool(false),
                        ),
                    )))
                }
                _ => Ok(unsupported()),
            }
        }
        Instr::Call { .. } => match stmt.instr.intrinsic() {
            Some(Intrinsic::Assume(arg)) => {
                let term = match sort_of(arg, universe)? {
                    Sort::Bool => eval(arg, Sort::Bool, universe)?,
                    Sort::BoundedInt32 => Term::cmp(
                        CmpOp::Sgt,
                        eval(arg, Sort::BoundedInt32, universe)?,
                        Term::Int(0),
                    ),
                };
                Ok(Encoding::Assertion(term))
            }
            Some(Intrinsic::AssertFail) => Ok(Encoding::AssertFail),
            None => Ok(Encoding::Ignored("call")),
        },
        Instr::Phi { .. } => Ok(Encoding::Ignored("phi")),
        Instr::Alloca { .. } | Instr::Load { .. } | Instr::Store { .. } => {
            Ok(Encoding::Ignored("memory"))
        }
    }
}

/// The constraints contributed by one block.
#[derive(Debug, Default)]
pub(crate) struct BlockEncoding {
    pub assertions: Vec<Term>,
    /// The block calls an assertion-failure intrinsic
    pub fails: bool,
    pub unsupported: Vec<UnsupportedConstruct>,
    /// First operand that names an undefined value; the block's rules are unusable
    pub lookup_error: Option<RuleError>,
}

#[tracing::instrument(level = "trace", skip_all, fields(block = %block.label))]
pub(crate) fn encode_block(block: &Block, universe: &VariableUniverse) -> BlockEncoding {
    let mut out = BlockEncoding::default();

    for stmt in &block.statements {
        match encode_statement(stmt, universe) {
            Ok(Encoding::Assertion(term)) => out.assertions.push(term),
            Ok(Encoding::AssertFail) => out.fails = true,
            Ok(Encoding::Ignored(what)) => {
                trace!(statement = %stmt, what, "left unconstrained");
            }
            Ok(Encoding::Unsupported(reason)) => {
                debug!(statement = %stmt, reason = %reason, "unsupported construct");
                out.unsupported.push(UnsupportedConstruct {
                    block: block.label.clone(),
                    statement: stmt.to_string(),
                    reason,
                });
            }
            Err(err) => {
                if out.lookup_error.is_none() {
                    out.lookup_error = Some(err);
                }
            }
        }
    }

    out
}
