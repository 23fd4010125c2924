pub mod builder;
pub mod cfa;
pub mod dot;
pub(crate) mod error;
pub mod expr;
pub mod file;
pub(crate) mod instruction;

pub use builder::CfaBuilder;
pub use cfa::{Cfa, CfaNode, EdgeId, EdgeView, NodeId};
pub use dot::{DotGraph, render_dot};
pub use error::CfaError;
pub use expr::{BinOp, Expr, UnaryOp, VarName};
pub use file::ProgramFile;
pub use instruction::{Instruction, InstructionKind};

/// Name of the distinguished variable carrying function return values in
/// the normalized program form.
pub const RETURN_VARIABLE: &str = "__ret";
