//! The linear IR consumed by register assignment.
//!
//! A [LinearIr] is a fully scheduled, control-flow-free sequence of tensor operations. By the
//! time an IR reaches this crate, all scheduling decisions have been made: operations appear in
//! exactly the order they will be emitted, and the only remaining placeholder is the *abstract
//! register* ([VReg]) naming each value.
//!
//!
//! ## Variable numbering
//!
//! Abstract registers are handed out by [LinearIr::new_vreg] and are dense per register file:
//! general purpose vregs are numbered `%g0`, `%g1`, ... and vector vregs `%v0`, `%v1`, ....
//! Operations are referenced by an [InstIdx], which is deliberately an index into an array.
//!
//! Values are single-assignment: each vreg has exactly one defining operation. The register
//! assignment pass rejects IRs that break this.
//!
//!
//! ## Operands
//!
//! An [Operand] names a vreg and carries two optional physical annotations:
//!
//!  * `pin`: an architectural requirement that this operand live in a specific [PReg] (e.g. a
//!    kernel call whose tile accumulator is hard-wired). Set by whoever lowers the IR.
//!  * `preg`: the physical register chosen by a successful assignment run. Cleared by any
//!    structural edit, since inserting or removing an operation invalidates every previously
//!    computed position and interval.

use index_vec::{Idx, IndexVec};
use smallvec::SmallVec;
use std::fmt;
use strum::EnumCount;

/// Which hardware register file does a register live in?
#[derive(Clone, Copy, Debug, EnumCount, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum RegFile {
    /// General purpose (integer/pointer) registers.
    Gp,
    /// Vector (SIMD) registers.
    Vec,
}

impl fmt::Display for RegFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegFile::Gp => write!(f, "gp"),
            RegFile::Vec => write!(f, "vec"),
        }
    }
}

/// An abstract register: a placeholder for one logical value prior to physical placement.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VReg {
    file: RegFile,
    id: u32,
}

impl VReg {
    /// Rebuild a vreg from its parts. Only allocation-internal tables do this; everyone else
    /// gets vregs from [LinearIr::new_vreg].
    pub(crate) fn from_parts(file: RegFile, id: u32) -> Self {
        Self { file, id }
    }

    pub fn file(&self) -> RegFile {
        self.file
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file {
            RegFile::Gp => write!(f, "%g{}", self.id),
            RegFile::Vec => write!(f, "%v{}", self.id),
        }
    }
}

/// A physical register: a concrete hardware slot in a specific register file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PReg {
    file: RegFile,
    code: u8,
}

impl PReg {
    pub fn new(file: RegFile, code: u8) -> Self {
        Self { file, code }
    }

    pub fn file(&self) -> RegFile {
        self.file
    }

    pub fn code(&self) -> u8 {
        self.code
    }
}

impl fmt::Display for PReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file {
            RegFile::Gp => write!(f, "r{}", self.code),
            RegFile::Vec => write!(f, "x{}", self.code),
        }
    }
}

/// One operand site of an operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Operand {
    vreg: VReg,
    /// The architecturally mandated physical register for this operand, if any.
    pin: Option<PReg>,
    /// The physical register chosen by the last successful assignment run, if any.
    preg: Option<PReg>,
}

impl Operand {
    pub fn new(vreg: VReg) -> Self {
        Self {
            vreg,
            pin: None,
            preg: None,
        }
    }

    /// Create an operand that must be placed in `preg`.
    pub fn pinned(vreg: VReg, preg: PReg) -> Self {
        Self {
            vreg,
            pin: Some(preg),
            preg: None,
        }
    }

    pub fn vreg(&self) -> VReg {
        self.vreg
    }

    pub fn pin(&self) -> Option<PReg> {
        self.pin
    }

    /// The physical register assigned to this operand, or `None` if no assignment run has
    /// succeeded since the last structural edit.
    pub fn preg(&self) -> Option<PReg> {
        self.preg
    }

    pub(crate) fn set_preg(&mut self, preg: PReg) {
        debug_assert_eq!(self.vreg.file(), preg.file());
        self.preg = Some(preg);
    }

    pub(crate) fn clear_preg(&mut self) {
        self.preg = None;
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.vreg)?;
        if let Some(pin) = self.pin {
            write!(f, "@{pin}")?;
        }
        if let Some(preg) = self.preg {
            write!(f, "[{preg}]")?;
        }
        Ok(())
    }
}

/// The vocabulary of tensor operations.
///
/// Register assignment treats every kind uniformly: only the operand lists matter. The kinds
/// exist so that IRs render readably and so that the emitter downstream can dispatch.
#[derive(Clone, Copy, Debug, EnumCount, Eq, PartialEq)]
pub enum OpKind {
    /// Load a contiguous run of elements from memory.
    Load,
    /// Store a vector back to memory.
    Store,
    /// Load a scalar and broadcast it across vector lanes.
    BroadcastLoad,
    Add,
    Sub,
    Mul,
    Div,
    /// Fused multiply-add.
    Fma,
    /// Reduce a vector to a scalar-in-vector by summing across lanes.
    HorizonSum,
    Exp,
    /// Marks the head of an emitted loop; defines/reads loop counters in GP registers.
    LoopBegin,
    LoopEnd,
    /// A call into a pre-built microkernel; its operands typically carry pins.
    KernelCall,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Load => "load",
            OpKind::Store => "store",
            OpKind::BroadcastLoad => "broadcast_load",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Fma => "fma",
            OpKind::HorizonSum => "horizon_sum",
            OpKind::Exp => "exp",
            OpKind::LoopBegin => "loop_begin",
            OpKind::LoopEnd => "loop_end",
            OpKind::KernelCall => "kernel_call",
        };
        write!(f, "{s}")
    }
}

/// One operation in the linear sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
    kind: OpKind,
    ins: SmallVec<[Operand; 2]>,
    outs: SmallVec<[Operand; 1]>,
}

impl Inst {
    pub fn new(
        kind: OpKind,
        ins: impl IntoIterator<Item = Operand>,
        outs: impl IntoIterator<Item = Operand>,
    ) -> Self {
        Self {
            kind,
            ins: ins.into_iter().collect(),
            outs: outs.into_iter().collect(),
        }
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// The operands this operation reads, in order.
    pub fn ins(&self) -> &[Operand] {
        &self.ins
    }

    /// The operands this operation writes, in order.
    pub fn outs(&self) -> &[Operand] {
        &self.outs
    }

    /// Iterate over all operand sites, inputs first.
    pub fn iter_operands(&self) -> impl Iterator<Item = &Operand> {
        self.ins.iter().chain(self.outs.iter())
    }

    pub(crate) fn iter_operands_mut(&mut self) -> impl Iterator<Item = &mut Operand> {
        self.ins.iter_mut().chain(self.outs.iter_mut())
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.outs.is_empty() {
            for (i, op) in self.outs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{op}")?;
            }
            write!(f, " = ")?;
        }
        write!(f, "{}", self.kind)?;
        for (i, op) in self.ins.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

index_vec::define_index_type! {
    /// The position of an operation in a [LinearIr].
    pub struct InstIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

/// A fully scheduled, control-flow-free sequence of operations.
#[derive(Clone, Debug, Default)]
pub struct LinearIr {
    insts: IndexVec<InstIdx, Inst>,
    /// How many vregs have been handed out, per register file.
    next_gp: u32,
    next_vec: u32,
}

impl LinearIr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh abstract register in `file`.
    pub fn new_vreg(&mut self, file: RegFile) -> VReg {
        let next = match file {
            RegFile::Gp => &mut self.next_gp,
            RegFile::Vec => &mut self.next_vec,
        };
        let id = *next;
        *next += 1;
        VReg { file, id }
    }

    /// How many vregs have been handed out in `file`?
    pub fn vreg_count(&self, file: RegFile) -> usize {
        match file {
            RegFile::Gp => usize::try_from(self.next_gp).unwrap(),
            RegFile::Vec => usize::try_from(self.next_vec).unwrap(),
        }
    }

    /// Append `inst` to the sequence, returning its position.
    pub fn push(&mut self, inst: Inst) -> InstIdx {
        self.insts.push(inst)
    }

    pub fn insts_len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn inst(&self, iidx: InstIdx) -> &Inst {
        &self.insts[iidx]
    }

    pub(crate) fn inst_mut(&mut self, iidx: InstIdx) -> &mut Inst {
        &mut self.insts[iidx]
    }

    /// Iterate over `(position, operation)` pairs in sequence order.
    pub fn iter_insts(&self) -> impl Iterator<Item = (InstIdx, &Inst)> {
        self.insts.iter_enumerated()
    }

    pub(crate) fn iter_insts_mut(&mut self) -> impl Iterator<Item = (InstIdx, &mut Inst)> {
        self.insts.iter_mut_enumerated()
    }

    /// Insert `inst` at `at`, shifting later operations up. This is a structural edit: any
    /// previously computed assignment is invalidated and its annotations are cleared.
    pub fn insert(&mut self, at: InstIdx, inst: Inst) {
        self.insts.insert(at, inst);
        self.clear_assignments();
    }

    /// Remove and return the operation at `at`. This is a structural edit: any previously
    /// computed assignment is invalidated and its annotations are cleared.
    pub fn remove(&mut self, at: InstIdx) -> Inst {
        let inst = self.insts.remove(at);
        self.clear_assignments();
        inst
    }

    /// Strip the `preg` annotation from every operand.
    pub fn clear_assignments(&mut self) {
        for inst in self.insts.iter_mut() {
            for op in inst.iter_operands_mut() {
                op.clear_preg();
            }
        }
    }

    /// Check structural sanity: every operand's vreg must have come from this IR's factory, and
    /// a pin's register file must match its operand's. Lowering bugs surface here rather than as
    /// confusing allocation failures.
    ///
    /// # Panics
    ///
    /// If the IR is not well formed.
    #[cfg(any(debug_assertions, test))]
    pub fn assert_well_formed(&self) {
        for (iidx, inst) in self.iter_insts() {
            for op in inst.iter_operands() {
                let count = self.vreg_count(op.vreg().file());
                if usize::try_from(op.vreg().id()).unwrap() >= count {
                    panic!(
                        "operand {} at position {} references a vreg this IR never created",
                        op.vreg(),
                        iidx.index()
                    );
                }
                if let Some(pin) = op.pin() {
                    if pin.file() != op.vreg().file() {
                        panic!(
                            "operand {} at position {} is pinned across register files to {}",
                            op.vreg(),
                            iidx.index(),
                            pin
                        );
                    }
                }
            }
        }
    }
}

impl fmt::Display for LinearIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (iidx, inst) in self.iter_insts() {
            writeln!(f, "{}: {inst}", iidx.index())?;
        }
        Ok(())
    }
}
