use std::fmt;

use cfg_ir::Type;

/// Sort of a logical variable.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Sort {
    /// 32-bit two's complement integer
    BoundedInt32,
    Bool,
}

impl Sort {
    /// Maps an IR type to its sort; only `i32` and `i1` are modeled.
    pub fn from_type(ty: &Type) -> Option<Sort> {
        match ty.int_width() {
            Some(32) => Some(Sort::BoundedInt32),
            Some(1) => Some(Sort::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::BoundedInt32 => f.write_str("(_ BitVec 32)"),
            Sort::Bool => f.write_str("Bool"),
        }
    }
}

/// A logical variable standing for one SSA value.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Variable {
    name: String,
    sort: Sort,
}

impl Variable {
    pub fn new(name: impl Into<String>, sort: Sort) -> Self {
        Self {
            name: name.into(),
            sort,
        }
    }

    /// Name of the SSA value, without the `%` sigil
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sort(&self) -> Sort {
        self.sort
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&variable_symbol(&self.name))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Sdiv,
    Udiv,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Sge,
    Sgt,
    Slt,
    Sle,
}

impl CmpOp {
    /// Equality works over any sort, orderings need integers.
    pub fn is_ordering(self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

/// Quantifier-free term over bit-vectors, booleans and relation applications.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Term {
    Var(Variable),
    Int(i32),
    Bool(bool),
    Arith(ArithOp, Box<Term>, Box<Term>),
    Cmp(CmpOp, Box<Term>, Box<Term>),
    Not(Box<Term>),
    And(Vec<Term>),
    Ite(Box<Term>, Box<Term>, Box<Term>),
    /// Application of the relation registered for the named block
    App(String, Vec<Term>),
}

impl Term {
    pub fn var(variable: &Variable) -> Term {
        Term::Var(variable.clone())
    }

    pub fn arith(op: ArithOp, lhs: Term, rhs: Term) -> Term {
        Term::Arith(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn cmp(op: CmpOp, lhs: Term, rhs: Term) -> Term {
        Term::Cmp(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn eq(lhs: Term, rhs: Term) -> Term {
        Term::cmp(CmpOp::Eq, lhs, rhs)
    }

    pub fn not(term: Term) -> Term {
        Term::Not(Box::new(term))
    }

    pub fn ite(cond: Term, then: Term, otherwise: Term) -> Term {
        Term::Ite(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn sort(&self) -> Sort {
        match self {
            Term::Var(variable) => variable.sort(),
            Term::Int(_) | Term::Arith(..) => Sort::BoundedInt32,
            Term::Ite(_, then, _) => then.sort(),
            Term::Bool(_) | Term::Cmp(..) | Term::Not(_) | Term::And(_) | Term::App(..) => {
                Sort::Bool
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(variable) => write!(f, "{variable}"),
            Term::Int(value) => write!(f, "{}", bv32_const(*value)),
            Term::Bool(value) => write!(f, "{value}"),
            Term::Arith(op, lhs, rhs) => {
                let name = match op {
                    ArithOp::Add => "bvadd",
                    ArithOp::Sub => "bvsub",
                    ArithOp::Mul => "bvmul",
                    ArithOp::Sdiv => "bvsdiv",
                    ArithOp::Udiv => "bvudiv",
                };
                write!(f, "({name} {lhs} {rhs})")
            }
            Term::Cmp(op, lhs, rhs) => {
                let name = match op {
                    CmpOp::Eq => "=",
                    CmpOp::Ne => "distinct",
                    CmpOp::Sge => "bvsge",
                    CmpOp::Sgt => "bvsgt",
                    CmpOp::Slt => "bvslt",
                    CmpOp::Sle => "bvsle",
                };
                write!(f, "({name} {lhs} {rhs})")
            }
            Term::Not(term) => write!(f, "(not {term})"),
            Term::And(terms) => f.write_str(&and_terms(terms)),
            Term::Ite(cond, then, otherwise) => write!(f, "(ite {cond} {then} {otherwise})"),
            Term::App(label, args) => {
                if args.is_empty() {
                    f.write_str(&relation_symbol(label))
                } else {
                    write!(f, "({} {})", relation_symbol(label), join_terms(args))
                }
            }
        }
    }
}

pub(crate) fn and_terms(terms: &[Term]) -> String {
    match terms {
        [] => "true".to_string(),
        [single] => single.to_string(),
        _ => format!("(and {})", join_terms(terms)),
    }
}

fn join_terms(terms: &[Term]) -> String {
    terms
        .iter()
        .map(|term| term.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bv32_const(value: i32) -> String {
    format!("(_ bv{} 32)", value as u32)
}

/// SMT-LIB symbol for the value `%name`.
pub fn variable_symbol(name: &str) -> String {
    quoted_symbol('%', name)
}

/// SMT-LIB symbol for the relation of block `@label`.
pub fn relation_symbol(label: &str) -> String {
    quoted_symbol('@', label)
}

// Sigils keep values and relations in separate namespaces. `|` and `\` cannot
// appear inside a quoted symbol, so they are escaped with `~`, which is
// escaped itself to keep distinct names distinct.
fn quoted_symbol(sigil: char, name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 3);
    out.push('|');
    out.push(sigil);
    for ch in name.chars() {
        match ch {
            '~' => out.push_str("~~"),
            '|' => out.push_str("~p"),
            '\\' => out.push_str("~b"),
            _ => out.push(ch),
        }
    }
    out.push('|');
    out
}
