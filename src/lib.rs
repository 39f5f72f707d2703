//! vexalloc: register assignment for a vectorising tensor-expression JIT.
//!
//! The JIT lowers tensor expressions into a [ir::LinearIr]: a straight-line, fully scheduled
//! sequence of operations over an unbounded supply of abstract registers, split across two
//! hardware register files (general purpose and vector). This crate is the stage that maps
//! every abstract register onto a concrete physical register from a small fixed budget, by
//! linear scan over live intervals, before the emitter turns the sequence into machine code.
//!
//! The pass is a pure in-process transformation: no I/O, no blocking, no shared mutable state.
//! Independent sequences can be assigned concurrently as long as each run owns its IR; the
//! [arch::ArchSpec] is immutable and freely shared.
//!
//! ```
//! use vexalloc::{ArchSpec, AssignRegisters, Inst, LinearIr, OpKind, Operand, RegFile};
//!
//! let mut ir = LinearIr::new();
//! let a = ir.new_vreg(RegFile::Vec);
//! let b = ir.new_vreg(RegFile::Vec);
//! let c = ir.new_vreg(RegFile::Vec);
//! ir.push(Inst::new(OpKind::Load, [], [Operand::new(a)]));
//! ir.push(Inst::new(OpKind::BroadcastLoad, [], [Operand::new(b)]));
//! ir.push(Inst::new(OpKind::Mul, [Operand::new(a), Operand::new(b)], [Operand::new(c)]));
//! ir.push(Inst::new(OpKind::Store, [Operand::new(c)], []));
//!
//! let arch = ArchSpec::x64();
//! let map = AssignRegisters::new(&arch).run(&mut ir).unwrap();
//! assert!(map.get(c).is_some());
//! ```

pub mod arch;
pub mod ir;
mod log;
pub mod regalloc;

pub use arch::{ArchError, ArchSpec};
pub use ir::{Inst, InstIdx, LinearIr, OpKind, Operand, PReg, RegFile, VReg};
pub use regalloc::{AllocError, AssignRegisters, AssignmentMap, LiveInterval};
