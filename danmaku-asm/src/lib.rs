//! Assembler and disassembler for the two bytecode languages embedded in
//! the game archives: the stage-event script (ECL) and the sprite-animation
//! script (ANM).
//!
//! Both languages share one in-memory form: sub-programs hold a list of
//! [`ir::Node`]s, where real instructions are interleaved with time
//! markers, rank markers and labels that only exist in text. Disassembly
//! turns packed instruction streams into that form, inserting a label in
//! front of every jump target; assembly is a two-pass compile that first
//! binds labels to byte offsets and then serialises with relative jump
//! offsets resolved.
//!
//! ANM additionally carries an expression compiler: arithmetic statements
//! in textual source lower onto stack registers, picking the two-address
//! short opcode form whenever the destination is already one of the
//! operands.

#![warn(missing_docs)]
#![deny(unused_must_use)]

pub mod anm;
pub mod ecl;
pub mod ir;
pub mod mnemonics;
pub mod tables;

mod error;
mod text;

pub use error::AsmError;
pub use mnemonics::MnemonicMap;

pub use danmaku_types::{Value, Version};
