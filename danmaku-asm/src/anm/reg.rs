//! The register file backing the expression compiler.
//!
//! Each script-format version lists its general-purpose registers with a
//! type and a default purpose: some are meant as expression scratch, some
//! as user variables. Acquisition prefers the matching pool and falls
//! back to the other one. User-declared registers live on the same table
//! behind a flag and survive [`RegFile::reset`].

use danmaku_types::Value;

use crate::ir::Param;

/// Why a register is currently unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lock {
    /// Free for acquisition.
    Unlocked,
    /// Held by an in-flight expression lowering.
    ExprTemp,
    /// Holds a user-declared variable.
    UserVar,
    /// Referenced from outside the allocator (named directly in source).
    External,
}

/// What a register is meant for when nothing holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Expression scratch pool.
    Expr,
    /// User-variable pool.
    Var,
    /// Neither pool.
    Other,
}

/// One register table slot.
#[derive(Debug, Clone)]
pub struct Register {
    /// Runtime register id.
    pub id: i32,
    /// `S` or `f`.
    pub tag: char,
    /// Current lock state.
    pub lock: Lock,
    /// Default purpose.
    pub purpose: Purpose,
    user: bool,
}

/// Handle into a [`RegFile`].
pub type RegHandle = usize;

/// The per-compilation register table.
#[derive(Debug, Clone, Default)]
pub struct RegFile {
    regs: Vec<Register>,
}

const fn reg(id: i32, tag: char, purpose: Purpose) -> Register {
    Register { id, tag, lock: Lock::Unlocked, purpose, user: false }
}

/// General-purpose registers of script-format version 8.
const REGS_V8: [Register; 10] = [
    reg(10000, 'S', Purpose::Expr),
    reg(10001, 'S', Purpose::Expr),
    reg(10002, 'S', Purpose::Expr),
    reg(10003, 'S', Purpose::Expr),
    reg(10008, 'S', Purpose::Var),
    reg(10009, 'S', Purpose::Var),
    reg(10004, 'f', Purpose::Expr),
    reg(10005, 'f', Purpose::Expr),
    reg(10006, 'f', Purpose::Expr),
    reg(10007, 'f', Purpose::Expr),
];

impl RegFile {
    /// The register table for a script-format version. Versions without
    /// researched registers get an empty table; user registers can still
    /// be added.
    pub fn for_version(version: u32) -> RegFile {
        let regs = match version {
            8 => REGS_V8.to_vec(),
            _ => Vec::new(),
        };
        RegFile { regs }
    }

    /// Register behind a handle.
    pub fn get(&self, handle: RegHandle) -> &Register {
        &self.regs[handle]
    }

    /// Find the handle of a register id.
    pub fn by_id(&self, id: i32) -> Option<RegHandle> {
        self.regs.iter().position(|r| r.id == id)
    }

    /// Declare a register the table does not know about. It is locked as
    /// a user variable and survives resets.
    pub fn add_user(&mut self, id: i32, tag: char) -> RegHandle {
        if let Some(handle) = self.by_id(id) {
            return handle;
        }
        self.regs.push(Register {
            id,
            tag,
            lock: Lock::UserVar,
            purpose: Purpose::Other,
            user: true,
        });
        self.regs.len() - 1
    }

    /// Unlock every table register. User-declared registers keep their
    /// lock; they persist across sub-programs.
    pub fn reset(&mut self) {
        for r in self.regs.iter_mut() {
            if !r.user {
                r.lock = Lock::Unlocked;
            }
        }
    }

    fn acquire_in(&mut self, purpose: Purpose, tag: char) -> Option<RegHandle> {
        let handle = self
            .regs
            .iter()
            .position(|r| r.purpose == purpose && r.tag == tag && r.lock == Lock::Unlocked)?;
        Some(handle)
    }

    /// Find and lock a suitable register. The matching purpose pool is
    /// searched first, then the opposite pool.
    pub fn acquire(&mut self, purpose: Purpose, tag: char) -> Option<RegHandle> {
        let handle = self.acquire_in(purpose, tag).or_else(|| {
            let fallback = match purpose {
                Purpose::Expr => Purpose::Var,
                Purpose::Var => Purpose::Expr,
                Purpose::Other => return None,
            };
            self.acquire_in(fallback, tag)
        })?;

        self.regs[handle].lock = match purpose {
            Purpose::Expr => Lock::ExprTemp,
            Purpose::Var => Lock::UserVar,
            Purpose::Other => Lock::External,
        };
        Some(handle)
    }

    /// Set a register's lock state. Locking an already differently-locked
    /// register fails; unlocking always succeeds.
    pub fn lock(&mut self, handle: RegHandle, lock: Lock) -> bool {
        let r = &mut self.regs[handle];
        if lock == Lock::Unlocked || r.lock == Lock::Unlocked || r.lock == lock {
            r.lock = lock;
            true
        } else {
            false
        }
    }

    /// Release a register back to the pool.
    pub fn release(&mut self, handle: RegHandle) {
        self.regs[handle].lock = Lock::Unlocked;
    }

    /// A parameter referencing this register, typed like the register.
    pub fn to_param(&self, handle: RegHandle) -> Param {
        let r = self.get(handle);
        match r.tag {
            'f' => Param::stack_ref('f', Value::F32(r.id as f32)),
            _ => Param::stack_ref('S', Value::I32(r.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_prefers_the_matching_pool() {
        let mut regs = RegFile::for_version(8);
        let a = regs.acquire(Purpose::Expr, 'S').unwrap();
        assert_eq!(regs.get(a).id, 10000);
        assert_eq!(regs.get(a).lock, Lock::ExprTemp);

        let b = regs.acquire(Purpose::Var, 'S').unwrap();
        assert_eq!(regs.get(b).id, 10008);
        assert_eq!(regs.get(b).lock, Lock::UserVar);
    }

    #[test]
    fn exhausted_pools_fall_back_then_fail() {
        let mut regs = RegFile::for_version(8);
        // Drain the expression pool, spill into the variable pool.
        for _ in 0..4 {
            regs.acquire(Purpose::Expr, 'S').unwrap();
        }
        let spilled = regs.acquire(Purpose::Expr, 'S').unwrap();
        assert_eq!(regs.get(spilled).purpose, Purpose::Var);
        regs.acquire(Purpose::Expr, 'S').unwrap();
        assert!(regs.acquire(Purpose::Expr, 'S').is_none());
    }

    #[test]
    fn reset_keeps_user_registers() {
        let mut regs = RegFile::for_version(8);
        let temp = regs.acquire(Purpose::Expr, 'f').unwrap();
        let user = regs.add_user(20000, 'S');
        regs.reset();
        assert_eq!(regs.get(temp).lock, Lock::Unlocked);
        assert_eq!(regs.get(user).lock, Lock::UserVar);
    }

    #[test]
    fn float_registers_make_float_params() {
        let regs = RegFile::for_version(8);
        let handle = regs.by_id(10004).unwrap();
        let param = regs.to_param(handle);
        assert_eq!(param.tag, 'f');
        assert!(param.stack);
        assert_eq!(param.value, Value::F32(10004.0));
    }
}
