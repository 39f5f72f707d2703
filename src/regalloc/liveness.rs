//! Live interval computation.
//!
//! One forward sweep over the sequence: an operand read extends its vreg's interval to the
//! reading position; an operand write opens the interval. Values are single-assignment, so "the
//! defining position" is unique, and a second definition (or a read with no preceding
//! definition) is a [AllocError::MalformedIr] from the upstream lowering.
//!
//! A value that is defined but never read gets `end == start`: it still occupies a register for
//! its one-instruction lifetime, which the assigner reserves and immediately frees.

use super::AllocError;
use crate::ir::{InstIdx, LinearIr, RegFile, VReg};
use index_vec::Idx;
use vob::Vob;

/// The half-open-in-spirit, inclusive-in-representation range of positions during which a
/// value must remain resident: `start` is its defining position, `end` the position of its last
/// read (or `start` if it is never read).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LiveInterval {
    pub vreg: VReg,
    pub start: InstIdx,
    pub end: InstIdx,
}

/// Per-file interval tables, dense over vreg ids.
struct FileLiveness {
    defined: Vob,
    start: Vec<InstIdx>,
    end: Vec<InstIdx>,
}

impl FileLiveness {
    fn new(len: usize) -> Self {
        Self {
            defined: Vob::from_elem(false, len),
            start: vec![InstIdx::from_usize(0); len],
            end: vec![InstIdx::from_usize(0); len],
        }
    }
}

/// Compute one [LiveInterval] per distinct vreg appearing in `ir`. Read-only over the IR; the
/// output is ordered by (file, vreg id).
pub(crate) fn compute(ir: &LinearIr) -> Result<Vec<LiveInterval>, AllocError> {
    let mut gp = FileLiveness::new(ir.vreg_count(RegFile::Gp));
    let mut vec = FileLiveness::new(ir.vreg_count(RegFile::Vec));
    for (iidx, inst) in ir.iter_insts() {
        for op in inst.ins() {
            let vreg = op.vreg();
            let t = match vreg.file() {
                RegFile::Gp => &mut gp,
                RegFile::Vec => &mut vec,
            };
            let id = usize::try_from(vreg.id()).unwrap();
            if t.defined.get(id) != Some(true) {
                return Err(AllocError::MalformedIr(format!(
                    "{vreg} read at position {} before any definition",
                    iidx.index()
                )));
            }
            t.end[id] = iidx;
        }
        for op in inst.outs() {
            let vreg = op.vreg();
            let t = match vreg.file() {
                RegFile::Gp => &mut gp,
                RegFile::Vec => &mut vec,
            };
            let id = usize::try_from(vreg.id()).unwrap();
            if t.defined.get(id) == Some(true) {
                return Err(AllocError::MalformedIr(format!(
                    "{vreg} redefined at position {}; values are single-assignment",
                    iidx.index()
                )));
            }
            t.defined.set(id, true);
            t.start[id] = iidx;
            t.end[id] = iidx;
        }
    }
    let mut intervals = Vec::new();
    for (file, t) in [(RegFile::Gp, &gp), (RegFile::Vec, &vec)] {
        for id in t.defined.iter_set_bits(..) {
            intervals.push(LiveInterval {
                vreg: VReg::from_parts(file, u32::try_from(id).unwrap()),
                start: t.start[id],
                end: t.end[id],
            });
        }
    }
    Ok(intervals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Inst, OpKind, Operand};

    fn iidx(i: usize) -> InstIdx {
        InstIdx::from_usize(i)
    }

    #[test]
    fn simple_intervals() {
        let mut ir = LinearIr::new();
        let v0 = ir.new_vreg(RegFile::Vec);
        let v1 = ir.new_vreg(RegFile::Vec);
        let v2 = ir.new_vreg(RegFile::Vec);
        ir.push(Inst::new(OpKind::Load, [], [Operand::new(v0)]));
        ir.push(Inst::new(OpKind::Load, [], [Operand::new(v1)]));
        ir.push(Inst::new(
            OpKind::Mul,
            [Operand::new(v0), Operand::new(v1)],
            [Operand::new(v2)],
        ));
        ir.push(Inst::new(OpKind::Store, [Operand::new(v2)], []));
        let ivals = compute(&ir).unwrap();
        assert_eq!(
            ivals,
            vec![
                LiveInterval {
                    vreg: v0,
                    start: iidx(0),
                    end: iidx(2)
                },
                LiveInterval {
                    vreg: v1,
                    start: iidx(1),
                    end: iidx(2)
                },
                LiveInterval {
                    vreg: v2,
                    start: iidx(2),
                    end: iidx(3)
                },
            ]
        );
    }

    #[test]
    fn dead_value_occupies_one_position() {
        let mut ir = LinearIr::new();
        let v0 = ir.new_vreg(RegFile::Vec);
        ir.push(Inst::new(OpKind::Load, [], [Operand::new(v0)]));
        let ivals = compute(&ir).unwrap();
        assert_eq!(ivals[0].start, iidx(0));
        assert_eq!(ivals[0].end, iidx(0));
    }

    #[test]
    fn value_live_across_whole_sequence() {
        let mut ir = LinearIr::new();
        let acc = ir.new_vreg(RegFile::Vec);
        let v1 = ir.new_vreg(RegFile::Vec);
        let v2 = ir.new_vreg(RegFile::Vec);
        ir.push(Inst::new(OpKind::BroadcastLoad, [], [Operand::new(acc)]));
        ir.push(Inst::new(OpKind::Load, [], [Operand::new(v1)]));
        ir.push(Inst::new(
            OpKind::Add,
            [Operand::new(acc), Operand::new(v1)],
            [Operand::new(v2)],
        ));
        ir.push(Inst::new(OpKind::Store, [Operand::new(acc)], []));
        let ivals = compute(&ir).unwrap();
        assert_eq!(ivals[0].vreg, acc);
        assert_eq!(ivals[0].start, iidx(0));
        assert_eq!(ivals[0].end, iidx(3));
    }

    #[test]
    fn double_definition_is_malformed() {
        let mut ir = LinearIr::new();
        let v0 = ir.new_vreg(RegFile::Vec);
        ir.push(Inst::new(OpKind::Load, [], [Operand::new(v0)]));
        ir.push(Inst::new(OpKind::Load, [], [Operand::new(v0)]));
        assert!(matches!(
            compute(&ir),
            Err(AllocError::MalformedIr(_))
        ));
    }

    #[test]
    fn read_before_definition_is_malformed() {
        let mut ir = LinearIr::new();
        let v0 = ir.new_vreg(RegFile::Vec);
        ir.push(Inst::new(OpKind::Store, [Operand::new(v0)], []));
        assert!(matches!(
            compute(&ir),
            Err(AllocError::MalformedIr(_))
        ));
    }

    #[test]
    fn self_read_at_defining_position_is_malformed() {
        let mut ir = LinearIr::new();
        let v0 = ir.new_vreg(RegFile::Vec);
        ir.push(Inst::new(OpKind::Exp, [Operand::new(v0)], [Operand::new(v0)]));
        assert!(matches!(
            compute(&ir),
            Err(AllocError::MalformedIr(_))
        ));
    }
}
