use danmaku_types::ValueError;
use thiserror::Error;

use crate::anm::expr::ExprError;

/// Errors produced by the assemblers and disassemblers.
#[derive(Debug, Error)]
pub enum AsmError {
    /// Underlying I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Value decoding or encoding failed.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// A required signature was missing from the byte image.
    #[error("{0} signature missing")]
    InvalidMagic(&'static str),
    /// The requested version has no opcode table or layout.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),
    /// The opcode is not in the version's table.
    #[error("opcode {opcode} was not found in the format table for version {version}")]
    UnknownOpcode {
        /// Offending opcode.
        opcode: u16,
        /// Version whose tables were consulted.
        version: u32,
    },
    /// An instruction got the wrong number of arguments.
    #[error("{sub}: ins_{opcode} expects {expected} arguments, got {got}")]
    ArityMismatch {
        /// Sub-program being assembled.
        sub: String,
        /// Offending opcode.
        opcode: u16,
        /// Arguments the format string names.
        expected: usize,
        /// Arguments present in the source.
        got: usize,
    },
    /// An argument's type does not match the opcode's format string.
    #[error("{sub}: argument {index} of ins_{opcode} should be '{expected}'")]
    TypeMismatch {
        /// Sub-program being assembled.
        sub: String,
        /// Offending opcode.
        opcode: u16,
        /// Zero-based argument position.
        index: usize,
        /// Format tag the argument must satisfy.
        expected: char,
    },
    /// A jump or time argument names a label that was never bound.
    #[error("{sub}: label not found: {label}")]
    UnresolvedLabel {
        /// Sub-program being assembled.
        sub: String,
        /// The missing label.
        label: String,
    },
    /// A sprite or script argument names an unknown symbol.
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),
    /// The byte image is structurally inconsistent.
    #[error("corrupt image: {0}")]
    Corrupt(String),
    /// Textual source failed to parse.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based source line.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// An expression statement failed to lower.
    #[error(transparent)]
    Expr(#[from] ExprError),
    /// Several errors were collected before the sub-program was abandoned.
    #[error("{} errors, first: {}", .0.len(), .0[0])]
    Many(Vec<AsmError>),
}
