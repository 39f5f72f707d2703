//! Register assignment for a linear tensor-operation sequence.
//!
//! This module:
//!  - computes live intervals over the sequence ([liveness]);
//!  - lifts architecturally mandated register requirements into checked constraints ([pinned]);
//!  - assigns every abstract register a physical one by linear scan ([lsra]);
//!  - and orchestrates the three via [AssignRegisters], the pass the surrounding pipeline runs.
//!
//! The pass either succeeds totally (every operand annotated, a complete [AssignmentMap]
//! returned) or fails without touching the IR: a failed run leaves the sequence exactly as it
//! was, so the caller can reschedule and retry or dump it for diagnosis.
//!
//! There is deliberately no spilling here. More simultaneously-live values than the target has
//! registers is [AllocError::RegisterPoolExhausted], surfaced to the caller.

pub(crate) mod liveness;
pub(crate) mod lsra;
pub(crate) mod pinned;

pub use liveness::LiveInterval;

use crate::arch::ArchSpec;
use crate::ir::{LinearIr, PReg, RegFile, VReg};
use crate::log::{log_ra, should_log_ra};
use std::fmt;
use thiserror::Error;

/// A failure to assign registers. All three variants are fatal for the run; the caller may alter
/// the input and rerun the pass.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AllocError {
    /// The input sequence violates the single-assignment contract: an upstream lowering bug,
    /// not locally recoverable.
    #[error("malformed IR: {0}")]
    MalformedIr(String),
    /// Two pinned requirements cannot be satisfied simultaneously: the sequence as scheduled
    /// cannot meet the architecture's constraints.
    #[error("register conflict: {0}")]
    RegisterConflict(String),
    /// More values are simultaneously live than the target register file has slots.
    #[error("register pool exhausted: no free {} register for {vreg} at position {at}", .vreg.file())]
    RegisterPoolExhausted { vreg: VReg, at: usize },
}

/// The abstract-register → physical-register mapping produced by a successful run. Total over
/// every vreg appearing in the sequence it was computed for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssignmentMap {
    gp: Vec<Option<PReg>>,
    vec: Vec<Option<PReg>>,
}

impl AssignmentMap {
    pub(crate) fn with_counts(gp: usize, vec: usize) -> Self {
        Self {
            gp: vec![None; gp],
            vec: vec![None; vec],
        }
    }

    pub(crate) fn set(&mut self, vreg: VReg, preg: PReg) {
        debug_assert_eq!(vreg.file(), preg.file());
        let slot = match vreg.file() {
            RegFile::Gp => &mut self.gp[usize::try_from(vreg.id()).unwrap()],
            RegFile::Vec => &mut self.vec[usize::try_from(vreg.id()).unwrap()],
        };
        debug_assert!(slot.is_none());
        *slot = Some(preg);
    }

    /// The physical register assigned to `vreg`, or `None` if `vreg` does not appear in the
    /// sequence this map was computed for.
    pub fn get(&self, vreg: VReg) -> Option<PReg> {
        let t = match vreg.file() {
            RegFile::Gp => &self.gp,
            RegFile::Vec => &self.vec,
        };
        t.get(usize::try_from(vreg.id()).unwrap()).copied().flatten()
    }

    /// Iterate over `(vreg, preg)` pairs, general purpose first, ids ascending.
    pub fn iter(&self) -> impl Iterator<Item = (VReg, PReg)> + '_ {
        let files = [(RegFile::Gp, &self.gp), (RegFile::Vec, &self.vec)];
        files.into_iter().flat_map(|(file, t)| {
            t.iter().enumerate().filter_map(move |(id, preg)| {
                preg.map(|p| (VReg::from_parts(file, u32::try_from(id).unwrap()), p))
            })
        })
    }
}

impl fmt::Display for AssignmentMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (vreg, preg) in self.iter() {
            writeln!(f, "{vreg} -> {preg}")?;
        }
        Ok(())
    }
}

/// The register assignment pass.
///
/// One run assigns every operand of one [LinearIr] a physical register from `arch`'s pools, or
/// fails with an [AllocError]. Runs are independent: all interval and pool state is rebuilt each
/// time, so a rerun after a structural edit always produces a fresh result. The pass carries no
/// state across invocations beyond the borrowed (immutable) [ArchSpec], so separate sequences
/// may run concurrently against the same spec.
pub struct AssignRegisters<'a> {
    arch: &'a ArchSpec,
}

impl<'a> AssignRegisters<'a> {
    pub fn new(arch: &'a ArchSpec) -> Self {
        Self { arch }
    }

    /// Assign registers for `ir`. On success every operand carries a `preg` annotation and the
    /// complete map is returned; on failure `ir` is left unmodified.
    pub fn run(&self, ir: &mut LinearIr) -> Result<AssignmentMap, AllocError> {
        let intervals = liveness::compute(ir)?;
        let cnstrs = pinned::collect(ir, &intervals, self.arch)?;
        let map = lsra::assign(ir, intervals, &cnstrs, self.arch)?;

        if should_log_ra() {
            log_ra(&format!("--- assign-registers\n{ir}--- map\n{map}"));
        }

        // The map is total over the sequence's vregs, so only now is it safe to write back.
        for (_, inst) in ir.iter_insts_mut() {
            for op in inst.iter_operands_mut() {
                // Every operand's vreg has an interval and thus an assignment.
                op.set_preg(map.get(op.vreg()).unwrap());
            }
        }
        Ok(map)
    }
}
