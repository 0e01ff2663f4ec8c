//! A small SSA control-flow-graph representation.
//!
//! Functions are lists of labelled blocks. Every block is a straight-line
//! list of [`Statement`]s closed by exactly one [`Terminator`]. Values are
//! named temporaries or typed constants; merge points use [`Instr::Phi`].
//!
//! The data model is serde-friendly so that CFGs produced by an external
//! front-end can be loaded from JSON, and it prints in an LLVM-like textual
//! form for logs and error messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};


/// Callees recognised as `assume(cond)`.
pub const ASSUME_INTRINSICS: &[&str] = &["assume", "__VERIFIER_assume"];

/// Callees recognised as a failed assertion.
pub const ASSERT_FAIL_INTRINSICS: &[&str] = &["__assert_fail", "assert_fail", "reach_error"];

/// Type of a value.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Type {
    /// Fixed-width integer, `i1` doubles as the boolean type
    Int(u32),
    /// Opaque pointer
    Ptr,
    /// No value
    Void,
}

impl Type {
    pub const I1: Type = Type::Int(1);
    pub const I32: Type = Type::Int(32);

    /// Returns true for types that can hold a first-class value
    pub fn is_first_class(&self) -> bool {
        !matches!(self, Self::Void)
    }

    /// Returns the bit width of integer types
    pub fn int_width(&self) -> Option<u32> {
        match self {
            Self::Int(bits) => Some(*bits),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int(bits) => write!(f, "i{bits}"),
            Self::Ptr => write!(f, "ptr"),
            Self::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unknown type `{0}` (expected i<N>, ptr or void)")]
pub struct TypeParseError(pub String);

impl FromStr for Type {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ptr" => Ok(Self::Ptr),
            "void" => Ok(Self::Void),
            _ => s
                .strip_prefix('i')
                .and_then(|bits| bits.parse::<u32>().ok())
                .filter(|bits| *bits > 0)
                .map(Self::Int)
                .ok_or_else(|| TypeParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Type {
    type Error = TypeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Type> for String {
    fn from(ty: Type) -> Self {
        ty.to_string()
    }
}

/// Operand of an instruction
///
/// In JSON a temporary is a string, an integer constant a number and a
/// boolean constant `true`/`false`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer constant
    Const(i64),
    /// `i1` constant
    Bool(bool),
    /// `%`-temporary, either a parameter or an instruction result
    Temporary(String),
}

impl Value {
    pub fn temp(name: impl Into<String>) -> Self {
        Self::Temporary(name.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Const(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Temporary(name) => write!(f, "%{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Signed division
    Sdiv,
    /// Unsigned division
    Udiv,
    Srem,
    Urem,
    And,
    Or,
    Xor,
    Shl,
    /// Logical shift right
    Lshr,
    /// Arithmetic shift right
    Ashr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Sdiv => "sdiv",
            Self::Udiv => "udiv",
            Self::Srem => "srem",
            Self::Urem => "urem",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::Lshr => "lshr",
            Self::Ashr => "ashr",
        })
    }
}

/// Integer comparison predicate
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntPredicate {
    Eq,
    Ne,
    /// Unsigned greater than
    Ugt,
    /// Unsigned greater than or equal
    Uge,
    /// Unsigned less than
    Ult,
    /// Unsigned less than or equal
    Ule,
    /// Signed greater than
    Sgt,
    /// Signed greater than or equal
    Sge,
    /// Signed less than
    Slt,
    /// Signed less than or equal
    Sle,
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ugt => "ugt",
            Self::Uge => "uge",
            Self::Ult => "ult",
            Self::Ule => "ule",
            Self::Sgt => "sgt",
            Self::Sge => "sge",
            Self::Slt => "slt",
            Self::Sle => "sle",
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastOp {
    Zext,
    Sext,
    Trunc,
    Bitcast,
    Ptrtoint,
    Inttoptr,
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Zext => "zext",
            Self::Sext => "sext",
            Self::Trunc => "trunc",
            Self::Bitcast => "bitcast",
            Self::Ptrtoint => "ptrtoint",
            Self::Inttoptr => "inttoptr",
        })
    }
}

/// One incoming edge of a phi: the value selected when control arrives from `block`
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PhiIncoming {
    pub block: String,
    pub value: Value,
}

/// Non-terminator instruction
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instr {
    /// Two-operand integer arithmetic or logic
    Binary { kind: BinOp, lhs: Value, rhs: Value },
    /// Integer comparison producing an `i1`
    Icmp {
        pred: IntPredicate,
        lhs: Value,
        rhs: Value,
    },
    /// Conversion from `from` to the statement's type
    Cast {
        kind: CastOp,
        from: Type,
        value: Value,
    },
    /// Selects a value based on the predecessor control arrived from
    Phi { incoming: Vec<PhiIncoming> },
    /// Direct call
    Call {
        callee: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Stack allocation of one `ty`
    Alloca { ty: Type },
    /// Loads the statement's type from `ptr`
    Load { ptr: Value },
    /// Stores `value` to `ptr`
    Store { value: Value, ptr: Value },
}

/// A call the checker gives special meaning to
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Intrinsic<'a> {
    /// `assume(cond)`: execution only continues when `cond` holds
    Assume(&'a Value),
    /// Assertion failure: reaching this call is the error state
    AssertFail,
}

impl Instr {
    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    /// Returns the phi operand selected when control arrives from `predecessor`
    pub fn phi_incoming(&self, predecessor: &str) -> Option<&Value> {
        let Self::Phi { incoming } = self else {
            return None;
        };
        incoming
            .iter()
            .find(|edge| edge.block == predecessor)
            .map(|edge| &edge.value)
    }

    /// Recognises calls to `assume` and assertion-failure intrinsics
    pub fn intrinsic(&self) -> Option<Intrinsic<'_>> {
        let Self::Call { callee, args } = self else {
            return None;
        };
        if ASSERT_FAIL_INTRINSICS.contains(&callee.as_str()) {
            return Some(Intrinsic::AssertFail);
        }
        if ASSUME_INTRINSICS.contains(&callee.as_str()) {
            return args.first().map(Intrinsic::Assume);
        }
        None
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Binary { kind, lhs, rhs } => write!(f, "{kind} {lhs}, {rhs}"),
            Self::Icmp { pred, lhs, rhs } => write!(f, "icmp {pred} {lhs}, {rhs}"),
            Self::Cast { kind, from, value } => write!(f, "{kind} {from} {value}"),
            Self::Phi { incoming } => write!(
                f,
                "phi {}",
                incoming
                    .iter()
                    .map(|edge| format!("[ {}, @{} ]", edge.value, edge.block))
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
            Self::Call { callee, args } => write!(
                f,
                "call ${callee}({})",
                args.iter()
                    .map(|arg| arg.to_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
            Self::Alloca { ty } => write!(f, "alloca {ty}"),
            Self::Load { ptr } => write!(f, "load {ptr}"),
            Self::Store { value, ptr } => write!(f, "store {value}, {ptr}"),
        }
    }
}

fn void_type() -> Type {
    Type::Void
}

/// An instruction, optionally defining the temporary `dest` of type `ty`
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(default = "void_type")]
    pub ty: Type,
    pub instr: Instr,
}

impl Statement {
    pub fn assign(dest: impl Into<String>, ty: Type, instr: Instr) -> Self {
        Self {
            dest: Some(dest.into()),
            ty,
            instr,
        }
    }

    pub fn volatile(instr: Instr) -> Self {
        Self {
            dest: None,
            ty: Type::Void,
            instr,
        }
    }

    /// Returns the temporary this statement defines, if it produces a value
    pub fn defined_value(&self) -> Option<&str> {
        if self.ty.is_first_class() {
            self.dest.as_deref()
        } else {
            None
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.dest {
            Some(dest) => write!(f, "%{dest} = {} {}", self.ty, self.instr),
            None => write!(f, "{}", self.instr),
        }
    }
}

/// Block terminator
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Terminator {
    /// Unconditionally jumps to a label
    Jmp { target: String },
    /// Jumps to `if_true` when the `i1` condition holds, to `if_false` otherwise
    Br {
        cond: Value,
        if_true: String,
        if_false: String,
    },
    /// Return from the function, optionally with a value
    Ret {
        #[serde(default)]
        value: Option<Value>,
    },
    /// Control never reaches the end of the block
    #[default]
    Unreachable,
}

impl Terminator {
    /// Returns successor labels in branch order (true target first)
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Self::Jmp { target } => vec![target.as_str()],
            Self::Br {
                if_true, if_false, ..
            } => vec![if_true.as_str(), if_false.as_str()],
            Self::Ret { .. } | Self::Unreachable => vec![],
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Jmp { target } => write!(f, "jmp @{target}"),
            Self::Br {
                cond,
                if_true,
                if_false,
            } => write!(f, "br {cond}, @{if_true}, @{if_false}"),
            Self::Ret { value: Some(value) } => write!(f, "ret {value}"),
            Self::Ret { value: None } => write!(f, "ret"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
pub struct Block {
    /// Label before the block
    pub label: String,

    /// Straight-line statements of the block
    #[serde(default)]
    pub statements: Vec<Statement>,

    /// Closing control transfer
    pub terminator: Terminator,
}

impl Block {
    /// Adds a new instruction that defines no value
    pub fn add_instr(&mut self, instr: Instr) {
        self.statements.push(Statement::volatile(instr));
    }

    /// Adds a new instruction assigned to a temporary
    pub fn assign_instr(&mut self, dest: impl Into<String>, ty: Type, instr: Instr) {
        self.statements.push(Statement::assign(dest, ty, instr));
    }

    /// Sets the block's terminator
    pub fn terminate(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    /// Returns the phi statements of the block
    pub fn phis(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter().filter(|stmt| stmt.instr.is_phi())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "@{}", self.label)?;
        for stmt in &self.statements {
            writeln!(f, "\t{stmt}")?;
        }
        write!(f, "\t{}", self.terminator)
    }
}

/// Function parameter
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
pub struct Function {
    /// Function name
    pub name: String,

    /// Function parameters
    #[serde(default)]
    pub params: Vec<Param>,

    /// Labelled blocks, the first one is the entry
    pub blocks: Vec<Block>,
}

impl Function {
    /// Instantiates an empty function and returns it
    pub fn new(name: impl Into<String>, params: Vec<Param>) -> Self {
        Function {
            name: name.into(),
            params,
            blocks: Vec::new(),
        }
    }

    /// Adds a new empty block with a specified label and returns a reference to it
    pub fn add_block(&mut self, label: impl Into<String>) -> &mut Block {
        self.blocks.push(Block {
            label: label.into(),
            ..Block::default()
        });
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    /// Returns the entry block
    pub fn entry(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Looks up a block by label
    pub fn block(&self, label: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.label == label)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "function ${name}({params}) {{",
            name = self.name,
            params = self
                .params
                .iter()
                .map(|param| format!("{} %{}", param.ty, param.name))
                .collect::<Vec<String>>()
                .join(", "),
        )?;

        for blk in self.blocks.iter() {
            writeln!(f, "{blk}")?;
        }

        write!(f, "}}")
    }
}

/// A set of independently analysed functions.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    /// Looks up a function by name
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|func| func.name == name)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for func in self.functions.iter() {
            writeln!(f, "{func}")?;
        }
        Ok(())
    }
}
