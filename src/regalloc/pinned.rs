//! The manual/pinned assignment pre-pass.
//!
//! Some operations architecturally require an operand to live in one specific physical register
//! (a microkernel's hard-wired accumulator, a calling-convention argument slot). Rather than
//! special-casing these inside the scan, this pre-pass lifts each requirement into a
//! [PinnedConstraint] covering the operand's whole live interval and checks, up front, that the
//! requirements are mutually satisfiable. The scan can then assume any pinned register is free
//! when its claimant's interval starts.
//!
//! Two constraints on the same physical register whose intervals overlap are a fatal
//! [AllocError::RegisterConflict], with one exception: an interval may start at the exact
//! position another ends, the write-after-read handoff that linear scan releases at the
//! boundary.

use super::{AllocError, liveness::LiveInterval};
use crate::arch::ArchSpec;
use crate::ir::{InstIdx, LinearIr, PReg, RegFile, VReg};
use index_vec::Idx;

/// A mandated (vreg, physical register) pairing, valid for the vreg's whole live interval.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PinnedConstraint {
    pub(crate) vreg: VReg,
    pub(crate) preg: PReg,
    pub(crate) start: InstIdx,
    pub(crate) end: InstIdx,
}

/// Collect the pinned constraints of `ir` and reject unsatisfiable combinations before the scan
/// runs. `intervals` must be the output of [super::liveness::compute] for the same IR.
pub(crate) fn collect(
    ir: &LinearIr,
    intervals: &[LiveInterval],
    arch: &ArchSpec,
) -> Result<Vec<PinnedConstraint>, AllocError> {
    // Dense per-file interval lookup.
    let mut ranges = [
        vec![None; ir.vreg_count(RegFile::Gp)],
        vec![None; ir.vreg_count(RegFile::Vec)],
    ];
    for ival in intervals {
        ranges[file_idx(ival.vreg.file())][usize::try_from(ival.vreg.id()).unwrap()] =
            Some((ival.start, ival.end));
    }

    // One pin per vreg; a vreg pinned to two different registers cannot be satisfied.
    let mut pins: [Vec<Option<PReg>>; 2] = [
        vec![None; ir.vreg_count(RegFile::Gp)],
        vec![None; ir.vreg_count(RegFile::Vec)],
    ];
    for (iidx, inst) in ir.iter_insts() {
        for op in inst.iter_operands() {
            let Some(pin) = op.pin() else { continue };
            let vreg = op.vreg();
            if pin.file() != vreg.file() {
                return Err(AllocError::MalformedIr(format!(
                    "{vreg} at position {} is pinned across register files to {pin}",
                    iidx.index()
                )));
            }
            if pin.code() >= arch.count(pin.file()) {
                return Err(AllocError::RegisterConflict(format!(
                    "{vreg} is pinned to {pin}, which the target does not provide"
                )));
            }
            if arch.is_reserved(pin) {
                return Err(AllocError::RegisterConflict(format!(
                    "{vreg} is pinned to {pin}, which is reserved system-wide"
                )));
            }
            let slot = &mut pins[file_idx(vreg.file())][usize::try_from(vreg.id()).unwrap()];
            match slot {
                None => *slot = Some(pin),
                Some(prev) if *prev == pin => (),
                Some(prev) => {
                    return Err(AllocError::RegisterConflict(format!(
                        "{vreg} is pinned to both {prev} and {pin}"
                    )));
                }
            }
        }
    }

    let mut cnstrs = Vec::new();
    for (fi, file) in [(0, RegFile::Gp), (1, RegFile::Vec)] {
        for (id, pin) in pins[fi].iter().enumerate() {
            let Some(preg) = pin else { continue };
            // Liveness succeeded for this IR, so every operand's vreg has an interval.
            let (start, end) = ranges[fi][id].unwrap();
            cnstrs.push(PinnedConstraint {
                vreg: VReg::from_parts(file, u32::try_from(id).unwrap()),
                preg: *preg,
                start,
                end,
            });
        }
    }

    // Constraints on the same physical register must not overlap, boundary handoff excepted.
    let mut by_preg = cnstrs.clone();
    by_preg.sort_by_key(|c| (c.preg, c.start, c.end));
    for w in by_preg.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        if a.preg != b.preg {
            continue;
        }
        let handoff = b.start == a.end && a.start < a.end;
        if b.start <= a.end && !handoff {
            return Err(AllocError::RegisterConflict(format!(
                "{} and {} are both pinned to {} over overlapping intervals [{}, {}] and [{}, {}]",
                a.vreg,
                b.vreg,
                a.preg,
                a.start.index(),
                a.end.index(),
                b.start.index(),
                b.end.index()
            )));
        }
    }

    Ok(cnstrs)
}

fn file_idx(file: RegFile) -> usize {
    match file {
        RegFile::Gp => 0,
        RegFile::Vec => 1,
    }
}
