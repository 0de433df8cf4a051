//! The arithmetic expression compiler of the sprite-animation assembler.
//!
//! Expression statements lower onto stack registers. Each version maps
//! `(operator, result type)` to a pair of opcodes: the normal three-address
//! form and, for binary operators, a short two-address form whose
//! destination doubles as an operand. Lowering recurses over the tree,
//! folds constant subtrees, reuses expression temporaries as destinations
//! and picks the short form whenever the destination already holds one of
//! the operands.

use danmaku_types::Value;
use thiserror::Error;

use crate::anm::reg::{Lock, Purpose, RegFile, RegHandle};
use crate::ir::{Instr, Node, Param};

/// Why an expression statement failed to lower. Any of these aborts the
/// statement; the assembler reports it and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExprError {
    /// Operand types disagree, or disagree with the destination.
    #[error("type mismatch")]
    BadTypes,
    /// The left-hand side of an assignment is not a register.
    #[error("invalid assignment - no register on the left-hand side")]
    BadLValue,
    /// The version has no opcode for this operator and type.
    #[error("no instruction found for given types")]
    NoInstruction,
    /// Expression statements are only meaningful inside a script.
    #[error("can't compile instructions outside of a script")]
    NoScript,
    /// Every suitable register is locked.
    #[error("no temporary registers available")]
    RegisterFull,
    /// A constant subtree divides or takes a modulus by zero.
    #[error("division or modulo by 0")]
    DivideByZero,
}

/// Operator symbols of the expression sublanguage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSym {
    /// `=`
    Assign,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `rand(x)`
    Rand,
    /// `sin(x)`
    Sin,
    /// `cos(x)`
    Cos,
    /// `tan(x)`
    Tan,
    /// `acos(x)`
    Acos,
    /// `atan(x)`
    Atan,
}

/// Operator shape; short forms only exist for the binary shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Plain store.
    Assign,
    /// One operand.
    Unary,
    /// Two operands, either may share the destination.
    BinaryCommut,
    /// Two operands, only the first may share the destination.
    BinaryNoncommut,
}

/// Normal and short opcodes for one result type; `-1` marks a missing
/// form.
#[derive(Debug, Clone, Copy)]
pub struct OpIds {
    /// Three-address form.
    pub normal: i32,
    /// Two-address form.
    pub short: i32,
}

/// One operator's entry in a version table.
#[derive(Debug, Clone, Copy)]
pub struct Operation {
    /// Operator symbol.
    pub sym: OpSym,
    /// Operator shape.
    pub kind: OpKind,
    /// Opcodes over integers.
    pub int_ids: OpIds,
    /// Opcodes over floats.
    pub float_ids: OpIds,
}

impl Operation {
    fn ids(&self, tag: char) -> OpIds {
        if tag == 'f' {
            self.float_ids
        } else {
            self.int_ids
        }
    }
}

const fn op(sym: OpSym, kind: OpKind, ids: [i32; 4]) -> Operation {
    Operation {
        sym,
        kind,
        int_ids: OpIds { normal: ids[0], short: ids[1] },
        float_ids: OpIds { normal: ids[2], short: ids[3] },
    }
}

const OPS_V2_V3: [Operation; 12] = [
    op(OpSym::Assign, OpKind::Assign, [37, -1, 38, -1]),
    op(OpSym::Add, OpKind::BinaryCommut, [49, 39, 50, 40]),
    op(OpSym::Sub, OpKind::BinaryNoncommut, [51, 41, 52, 42]),
    op(OpSym::Mul, OpKind::BinaryCommut, [53, 43, 54, 44]),
    op(OpSym::Div, OpKind::BinaryNoncommut, [55, 45, 56, 46]),
    op(OpSym::Mod, OpKind::BinaryNoncommut, [57, 47, 58, 48]),
    op(OpSym::Rand, OpKind::Unary, [59, -1, 60, -1]),
    op(OpSym::Sin, OpKind::Unary, [-1, -1, 61, -1]),
    op(OpSym::Cos, OpKind::Unary, [-1, -1, 62, -1]),
    op(OpSym::Tan, OpKind::Unary, [-1, -1, 63, -1]),
    op(OpSym::Acos, OpKind::Unary, [-1, -1, 64, -1]),
    op(OpSym::Atan, OpKind::Unary, [-1, -1, 65, -1]),
];

const OPS_V4_V7: [Operation; 12] = [
    op(OpSym::Assign, OpKind::Assign, [6, -1, 7, -1]),
    op(OpSym::Add, OpKind::BinaryCommut, [18, 8, 19, 9]),
    op(OpSym::Sub, OpKind::BinaryNoncommut, [20, 10, 21, 11]),
    op(OpSym::Mul, OpKind::BinaryCommut, [22, 12, 23, 13]),
    op(OpSym::Div, OpKind::BinaryNoncommut, [24, 14, 25, 15]),
    op(OpSym::Mod, OpKind::BinaryNoncommut, [26, 16, 27, 17]),
    op(OpSym::Rand, OpKind::Unary, [40, -1, 41, -1]),
    op(OpSym::Sin, OpKind::Unary, [-1, -1, 42, -1]),
    op(OpSym::Cos, OpKind::Unary, [-1, -1, 43, -1]),
    op(OpSym::Tan, OpKind::Unary, [-1, -1, 44, -1]),
    op(OpSym::Acos, OpKind::Unary, [-1, -1, 45, -1]),
    op(OpSym::Atan, OpKind::Unary, [-1, -1, 46, -1]),
];

const OPS_V8: [Operation; 12] = [
    op(OpSym::Assign, OpKind::Assign, [100, -1, 101, -1]),
    op(OpSym::Add, OpKind::BinaryCommut, [112, 102, 113, 103]),
    op(OpSym::Sub, OpKind::BinaryNoncommut, [114, 104, 115, 105]),
    op(OpSym::Mul, OpKind::BinaryCommut, [116, 106, 117, 107]),
    op(OpSym::Div, OpKind::BinaryNoncommut, [118, 108, 119, 109]),
    op(OpSym::Mod, OpKind::BinaryNoncommut, [120, 110, 121, 111]),
    op(OpSym::Rand, OpKind::Unary, [122, -1, 123, -1]),
    op(OpSym::Sin, OpKind::Unary, [-1, -1, 124, -1]),
    op(OpSym::Cos, OpKind::Unary, [-1, -1, 125, -1]),
    op(OpSym::Tan, OpKind::Unary, [-1, -1, 127, -1]),
    op(OpSym::Acos, OpKind::Unary, [-1, -1, 128, -1]),
    op(OpSym::Atan, OpKind::Unary, [-1, -1, 129, -1]),
];

fn op_table(version: u32) -> Option<&'static [Operation]> {
    Some(match version {
        2 | 3 => &OPS_V2_V3,
        4 | 7 => &OPS_V4_V7,
        8 => &OPS_V8,
        _ => return None,
    })
}

/// Look an operator up in a version's table. The oldest format has no
/// variables and therefore no operators.
pub fn op_get(sym: OpSym, version: u32) -> Option<&'static Operation> {
    op_table(version)?.iter().find(|o| o.sym == sym)
}

/// Reverse lookup for the pretty-printer: which operator, result type and
/// form an opcode encodes.
pub(crate) fn op_by_opcode(version: u32, opcode: u16) -> Option<(&'static Operation, char, bool)> {
    let opcode = i32::from(opcode);
    for op in op_table(version)? {
        for (ids, tag) in [(op.int_ids, 'S'), (op.float_ids, 'f')] {
            if ids.normal == opcode {
                return Some((op, tag, false));
            }
            if ids.short == opcode {
                return Some((op, tag, true));
            }
        }
    }
    None
}

/// A lowered value: a parameter plus the register it lives in, if any.
#[derive(Debug, Clone)]
pub struct Operand {
    /// The value as an instruction parameter.
    pub param: Param,
    /// Register holding it, when it is a register reference.
    pub reg: Option<RegHandle>,
}

/// An expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A leaf value.
    Val(Operand),
    /// An operator over subtrees.
    Op {
        /// The operator.
        op: &'static Operation,
        /// One child for unary operators, two for binary ones.
        children: Vec<Expr>,
    },
    /// `target = rhs`.
    Assign {
        /// Destination register.
        target: Operand,
        /// Value tree.
        rhs: Box<Expr>,
    },
}

fn uses_reg(expr: &Expr, handle: RegHandle) -> bool {
    match expr {
        Expr::Val(v) => v.reg == Some(handle),
        Expr::Op { children, .. } => children.iter().any(|c| uses_reg(c, handle)),
        Expr::Assign { target, rhs } => target.reg == Some(handle) || uses_reg(rhs, handle),
    }
}

/// Evaluate a constant subtree. `Ok(None)` means "not foldable here",
/// which is not an error; the operator may still have an instruction.
fn fold(sym: OpSym, tag: char, vals: &[Operand]) -> Result<Option<Value>, ExprError> {
    if vals.iter().any(|v| v.param.stack) {
        return Ok(None);
    }

    if tag == 'f' {
        let a = match vals[0].param.value.as_f32() {
            Some(v) => v,
            None => return Ok(None),
        };
        let b = vals.get(1).and_then(|v| v.param.value.as_f32());
        let result = match (sym, b) {
            (OpSym::Add, Some(b)) => a + b,
            (OpSym::Sub, Some(b)) => a - b,
            (OpSym::Mul, Some(b)) => a * b,
            (OpSym::Div, Some(b)) => {
                if b == 0.0 {
                    return Err(ExprError::DivideByZero);
                }
                a / b
            }
            (OpSym::Mod, Some(b)) => {
                if b == 0.0 {
                    return Err(ExprError::DivideByZero);
                }
                a % b
            }
            (OpSym::Sin, None) => a.sin(),
            (OpSym::Cos, None) => a.cos(),
            (OpSym::Tan, None) => a.tan(),
            (OpSym::Acos, None) => a.acos(),
            (OpSym::Atan, None) => a.atan(),
            _ => return Ok(None),
        };
        return Ok(Some(Value::F32(result)));
    }

    let a = match vals[0].param.value.as_int() {
        Some(v) => v,
        None => return Ok(None),
    };
    let b = vals.get(1).and_then(|v| v.param.value.as_int());
    let result = match (sym, b) {
        (OpSym::Add, Some(b)) => a.wrapping_add(b),
        (OpSym::Sub, Some(b)) => a.wrapping_sub(b),
        (OpSym::Mul, Some(b)) => a.wrapping_mul(b),
        (OpSym::Div, Some(b)) => {
            if b == 0 {
                return Err(ExprError::DivideByZero);
            }
            a.wrapping_div(b)
        }
        (OpSym::Mod, Some(b)) => {
            if b == 0 {
                return Err(ExprError::DivideByZero);
            }
            a.wrapping_rem(b)
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::I32(result)))
}

/// Statement-level lowering context: the register file, the instruction
/// sink and the time the emitted instructions carry.
pub struct Lowerer<'a> {
    /// Register table of the current compilation.
    pub regs: &'a mut RegFile,
    /// Script-format version.
    pub version: u32,
    /// Time stamped onto emitted instructions.
    pub time: i32,
    /// Sink for emitted instructions.
    pub nodes: &'a mut Vec<Node>,
    /// Whether a script is open; nothing can be emitted otherwise.
    pub in_script: bool,
}

impl Lowerer<'_> {
    fn emit(&mut self, opcode: u16, params: Vec<Param>) {
        self.nodes.push(Node::Instr(Instr {
            opcode,
            time: self.time,
            rank: 0xff,
            params,
            offset: 0,
        }));
    }

    fn reg_operand(&self, handle: RegHandle) -> Operand {
        Operand { param: self.regs.to_param(handle), reg: Some(handle) }
    }

    fn release_if_temp(&mut self, operand: &Operand, keep: Option<RegHandle>) {
        if let Some(handle) = operand.reg {
            if Some(handle) != keep && self.regs.get(handle).lock == Lock::ExprTemp {
                self.regs.release(handle);
            }
        }
    }

    /// Lower a full statement; the result value is discarded.
    pub fn lower_statement(&mut self, expr: Expr) -> Result<(), ExprError> {
        self.lower(expr, None).map(drop)
    }

    /// Lower a tree into `out` (or a destination of the lowering's own
    /// choosing) and return the operand the result lives in.
    pub fn lower(&mut self, expr: Expr, out: Option<RegHandle>) -> Result<Operand, ExprError> {
        match expr {
            Expr::Val(v) => Ok(v),

            Expr::Assign { target, rhs } => {
                let operation =
                    op_get(OpSym::Assign, self.version).ok_or(ExprError::NoInstruction)?;

                let target_reg = match target.reg {
                    Some(handle) => handle,
                    None => {
                        if !target.param.stack {
                            return Err(ExprError::BadLValue);
                        }
                        // A register the table does not know; declare it.
                        let id = match &target.param.value {
                            Value::F32(v) => *v as i32,
                            other => other.as_int().ok_or(ExprError::BadLValue)?,
                        };
                        self.regs.add_user(id, target.param.tag)
                    }
                };

                // Writing straight into the target is only safe when the
                // right-hand side never reads it.
                let rhs_out = if uses_reg(&rhs, target_reg) { None } else { Some(target_reg) };
                let value = self.lower(*rhs, rhs_out)?;

                if value.param.tag != self.regs.get(target_reg).tag {
                    return Err(ExprError::BadTypes);
                }
                if !self.in_script {
                    return Err(ExprError::NoScript);
                }

                // The value may already sit in the target register, in
                // which case a store would be a no-op.
                if value.reg != Some(target_reg) {
                    let ids = operation.ids(self.regs.get(target_reg).tag);
                    if ids.normal < 0 {
                        return Err(ExprError::NoInstruction);
                    }
                    let dest = self.regs.to_param(target_reg);
                    self.emit(ids.normal as u16, vec![dest, value.param.clone()]);
                }
                self.release_if_temp(&value, Some(target_reg));

                Ok(self.reg_operand(target_reg))
            }

            Expr::Op { op, children } => {
                // Children first; only the first lowered child may inherit
                // the caller's destination.
                let mut vals = Vec::with_capacity(children.len());
                let mut child_out = out;
                for child in children {
                    match child {
                        Expr::Val(v) => vals.push(v),
                        other => {
                            vals.push(self.lower(other, child_out)?);
                            child_out = None;
                        }
                    }
                }

                let tag = vals[0].param.tag;
                if vals.iter().any(|v| v.param.tag != tag) {
                    return Err(ExprError::BadTypes);
                }
                if let Some(handle) = out {
                    if self.regs.get(handle).tag != tag {
                        return Err(ExprError::BadTypes);
                    }
                }

                if let Some(value) = fold(op.sym, tag, &vals)? {
                    return Ok(Operand { param: Param::new(tag, value), reg: None });
                }

                if !self.in_script {
                    return Err(ExprError::NoScript);
                }

                // Destination: the caller's, else a child's expression
                // temporary, else a fresh acquisition.
                let dest = match out {
                    Some(handle) => handle,
                    None => {
                        let recycled = vals.iter().find_map(|v| {
                            v.reg.filter(|&h| self.regs.get(h).lock == Lock::ExprTemp)
                        });
                        match recycled {
                            Some(handle) => handle,
                            None => self
                                .regs
                                .acquire(Purpose::Expr, tag)
                                .ok_or(ExprError::RegisterFull)?,
                        }
                    }
                };

                // Short form when the destination is an operand: the first
                // for non-commutative operators, either for commutative
                // ones.
                let ids = op.ids(tag);
                let mut absorbed = None;
                if ids.short >= 0 {
                    let found = vals.iter().position(|v| {
                        v.reg == Some(dest)
                            && matches!(
                                self.regs.get(dest).lock,
                                Lock::ExprTemp | Lock::UserVar
                            )
                    });
                    if let Some(pos) = found {
                        if pos == 0 || op.kind == OpKind::BinaryCommut {
                            absorbed = Some(pos);
                        }
                    }
                }

                let opcode = if absorbed.is_some() { ids.short } else { ids.normal };
                if opcode < 0 {
                    return Err(ExprError::NoInstruction);
                }

                let mut params = vec![self.regs.to_param(dest)];
                params.extend(
                    vals.iter()
                        .enumerate()
                        .filter(|(i, _)| Some(*i) != absorbed)
                        .map(|(_, v)| v.param.clone()),
                );
                self.emit(opcode as u16, params);

                for v in &vals {
                    self.release_if_temp(v, Some(dest));
                }

                Ok(self.reg_operand(dest))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operand_imm_int(v: i32) -> Expr {
        Expr::Val(Operand { param: Param::new('S', Value::I32(v)), reg: None })
    }

    fn operand_reg(regs: &RegFile, id: i32) -> Expr {
        let handle = regs.by_id(id).unwrap();
        Expr::Val(Operand { param: regs.to_param(handle), reg: Some(handle) })
    }

    struct Session {
        regs: RegFile,
        nodes: Vec<Node>,
    }

    impl Session {
        fn new() -> Session {
            let mut regs = RegFile::for_version(8);
            // Source names both variable-pool registers.
            let a = regs.by_id(10008).unwrap();
            let b = regs.by_id(10009).unwrap();
            regs.lock(a, Lock::UserVar);
            regs.lock(b, Lock::UserVar);
            Session { regs, nodes: Vec::new() }
        }

        fn lower(&mut self, expr: Expr) -> Result<(), ExprError> {
            let mut lowerer = Lowerer {
                regs: &mut self.regs,
                version: 8,
                time: 0,
                nodes: &mut self.nodes,
                in_script: true,
            };
            lowerer.lower_statement(expr)
        }

        fn instrs(&self) -> Vec<&Instr> {
            self.nodes
                .iter()
                .filter_map(|n| match n {
                    Node::Instr(i) => Some(i),
                    _ => None,
                })
                .collect()
        }
    }

    fn assign(target: Expr, rhs: Expr) -> Expr {
        let Expr::Val(target) = target else { panic!() };
        Expr::Assign { target, rhs: Box::new(rhs) }
    }

    fn binary(sym: OpSym, a: Expr, b: Expr) -> Expr {
        Expr::Op { op: op_get(sym, 8).unwrap(), children: vec![a, b] }
    }

    #[test]
    fn simple_sum_uses_the_normal_form() {
        let mut s = Session::new();
        // a = b + 1 keeps all three operands distinct.
        let expr = assign(
            operand_reg(&s.regs, 10008),
            binary(OpSym::Add, operand_reg(&s.regs, 10009), operand_imm_int(1)),
        );
        s.lower(expr).unwrap();

        let instrs = s.instrs();
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].opcode, 112); // integer add, three-address
        assert_eq!(instrs[0].params[0].value, Value::I32(10008));
        assert_eq!(instrs[0].params[1].value, Value::I32(10009));
        assert_eq!(instrs[0].params[2].value, Value::I32(1));
    }

    #[test]
    fn self_referencing_assignment_spills_to_a_temporary() {
        let mut s = Session::new();
        // a = a + b reads the destination, so the sum lands in a scratch
        // register first and a store follows.
        let expr = assign(
            operand_reg(&s.regs, 10008),
            binary(OpSym::Add, operand_reg(&s.regs, 10008), operand_reg(&s.regs, 10009)),
        );
        s.lower(expr).unwrap();

        let instrs = s.instrs();
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].opcode, 112);
        assert_eq!(instrs[0].params[0].value, Value::I32(10000)); // scratch
        assert_eq!(instrs[1].opcode, 100); // integer store
        assert_eq!(instrs[1].params[0].value, Value::I32(10008));
        assert_eq!(instrs[1].params[1].value, Value::I32(10000));
    }

    #[test]
    fn chained_sum_selects_the_short_form() {
        let mut s = Session::new();
        // a = b + 1 + b: the inner sum lands in a, which the outer sum
        // then absorbs as its first operand.
        let inner = binary(OpSym::Add, operand_reg(&s.regs, 10009), operand_imm_int(1));
        let expr = assign(
            operand_reg(&s.regs, 10008),
            binary(OpSym::Add, inner, operand_reg(&s.regs, 10009)),
        );
        s.lower(expr).unwrap();

        let instrs = s.instrs();
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].opcode, 112); // normal: a = b + 1
        assert_eq!(instrs[0].params[0].value, Value::I32(10008));
        assert_eq!(instrs[1].opcode, 102); // short: a += b
        assert_eq!(instrs[1].params.len(), 2);
        assert_eq!(instrs[1].params[0].value, Value::I32(10008));
        assert_eq!(instrs[1].params[1].value, Value::I32(10009));
    }

    #[test]
    fn noncommutative_short_form_needs_the_first_operand() {
        let mut s = Session::new();
        // temp = b - temp cannot absorb the destination on the right.
        let inner = binary(OpSym::Add, operand_reg(&s.regs, 10009), operand_imm_int(2));
        let expr = assign(
            operand_reg(&s.regs, 10008),
            binary(OpSym::Sub, operand_reg(&s.regs, 10009), inner),
        );
        s.lower(expr).unwrap();

        let instrs = s.instrs();
        // inner goes to a scratch register (not the target: subtraction
        // is evaluated right-to-left here only after the left value is
        // immediate), then the subtraction takes the normal form, then
        // the store.
        assert!(instrs.iter().all(|i| i.opcode != 104), "short form must not fire");
    }

    #[test]
    fn constant_subtrees_fold() {
        let mut s = Session::new();
        // a = 2 * 21 folds to an immediate store.
        let expr = assign(
            operand_reg(&s.regs, 10008),
            binary(OpSym::Mul, operand_imm_int(2), operand_imm_int(21)),
        );
        s.lower(expr).unwrap();

        let instrs = s.instrs();
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].opcode, 100);
        assert_eq!(instrs[0].params[1].value, Value::I32(42));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let mut s = Session::new();
        let expr = assign(
            operand_reg(&s.regs, 10008),
            binary(OpSym::Div, operand_imm_int(1), operand_imm_int(0)),
        );
        assert_eq!(s.lower(expr), Err(ExprError::DivideByZero));
    }

    #[test]
    fn trig_over_ints_has_no_instruction() {
        let mut s = Session::new();
        let expr = assign(
            operand_reg(&s.regs, 10008),
            Expr::Op {
                op: op_get(OpSym::Sin, 8).unwrap(),
                children: vec![operand_reg(&s.regs, 10009)],
            },
        );
        assert_eq!(s.lower(expr), Err(ExprError::NoInstruction));
    }

    #[test]
    fn temporaries_are_recycled_across_a_statement() {
        let mut s = Session::new();
        // a = (1 + b) * (2 + b): the left subtree lands in the target, the
        // right one in a scratch register the outer product absorbs and
        // releases; nothing stays locked afterwards.
        let left = binary(OpSym::Add, operand_imm_int(1), operand_reg(&s.regs, 10009));
        let right = binary(OpSym::Add, operand_imm_int(2), operand_reg(&s.regs, 10009));
        let expr = assign(operand_reg(&s.regs, 10008), binary(OpSym::Mul, left, right));
        s.lower(expr).unwrap();

        for id in 10000..=10003 {
            let handle = s.regs.by_id(id).unwrap();
            assert_eq!(s.regs.get(handle).lock, Lock::Unlocked, "reg {id} leaked");
        }
    }
}
