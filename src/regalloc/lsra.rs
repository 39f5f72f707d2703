//! The linear scan itself.
//!
//! Intervals are processed in increasing start order (ties broken by ascending vreg id, for
//! reproducible codegen). Each interval takes the lowest-coded free register of its file that no
//! pinned reservation blocks; registers return to the pool as their owning intervals expire.
//!
//! Boundary rule: an interval ending at position `p` still holds its register while intervals
//! starting at `p` are assigned, so a value read at `p` is never clobbered by a value defined at
//! `p`. The one exception is a pinned claimant demanding exactly the register of an interval
//! ending at `p`: that entry is released first, permitting write-after-read in-place updates.
//!
//! The scan is O(n log n) in interval count for the sort plus a linear sweep; the pools are
//! fixed-size bitsets, so pool operations are O(1).

use super::{AllocError, AssignmentMap, liveness::LiveInterval, pinned::PinnedConstraint};
use crate::arch::{ArchSpec, MAX_FILE_REGS};
use crate::ir::{InstIdx, LinearIr, PReg, RegFile, VReg};
use index_vec::Idx;
use smallvec::SmallVec;
use static_assertions::const_assert;

// The free-set is a u64 bitset over register codes.
const_assert!(MAX_FILE_REGS as u32 <= u64::BITS);

/// Which registers of one file are currently held?
#[derive(Clone, Copy, Debug)]
struct RegSet(u64);

impl RegSet {
    fn blank() -> Self {
        Self(0)
    }

    fn set(&mut self, code: u8) {
        self.0 |= 1 << code;
    }

    fn unset(&mut self, code: u8) {
        self.0 &= !(1 << code);
    }

    fn is_set(&self, code: u8) -> bool {
        self.0 & (1 << code) != 0
    }
}

/// A register held by a live interval.
#[derive(Debug)]
struct Active {
    end: InstIdx,
    code: u8,
    #[allow(dead_code)]
    vreg: VReg,
}

/// The scan state of one register file: its pool, its active intervals, and the pinned
/// reservations that shrink the pool over sub-ranges of the sequence.
struct FileState {
    file: RegFile,
    count: u8,
    used: RegSet,
    active: SmallVec<[Active; 8]>,
    /// Per register code, the (start, end) ranges a pin reserves.
    reservations: Vec<SmallVec<[(InstIdx, InstIdx); 2]>>,
}

impl FileState {
    fn new(arch: &ArchSpec, file: RegFile, cnstrs: &[PinnedConstraint]) -> Self {
        let count = arch.count(file);
        let mut used = RegSet::blank();
        for code in arch.reserved(file) {
            used.set(*code);
        }
        let mut reservations = vec![SmallVec::new(); usize::from(count)];
        for c in cnstrs.iter().filter(|c| c.preg.file() == file) {
            reservations[usize::from(c.preg.code())].push((c.start, c.end));
        }
        Self {
            file,
            count,
            used,
            active: SmallVec::new(),
            reservations,
        }
    }

    /// Release every active register whose owning interval ended strictly before `start`.
    /// Intervals ending exactly at `start` stay held through the boundary.
    fn expire(&mut self, start: InstIdx) {
        let mut i = 0;
        while i < self.active.len() {
            if self.active[i].end < start {
                let a = self.active.swap_remove(i);
                self.used.unset(a.code);
            } else {
                i += 1;
            }
        }
    }

    /// Boundary release for a pinned claimant: if `code` is held by an interval ending exactly
    /// at `start`, free it now so the claimant can take over in place.
    fn release_boundary(&mut self, code: u8, start: InstIdx) {
        if let Some(i) = self.active.iter().position(|a| a.code == code) {
            debug_assert_eq!(self.active[i].end, start);
            self.active.swap_remove(i);
            self.used.unset(code);
        }
    }

    /// Does a pinned reservation forbid giving `code` to an unpinned interval covering
    /// `[start, end]`? A reservation beginning exactly at `end` does not: its claimant will
    /// force a boundary release there.
    fn reservation_blocks(&self, code: u8, start: InstIdx, end: InstIdx) -> bool {
        self.reservations[usize::from(code)]
            .iter()
            .any(|&(ps, pe)| ps <= end && pe >= start && !(ps == end && start < end))
    }

    /// Assign a register for `ival`, honouring `pin` if present.
    fn take(&mut self, ival: &LiveInterval, pin: Option<u8>) -> Result<u8, AllocError> {
        self.expire(ival.start);
        let code = match pin {
            Some(code) => {
                self.release_boundary(code, ival.start);
                // The pre-pass guarantees the mandated register is free here.
                debug_assert!(!self.used.is_set(code));
                code
            }
            None => (0..self.count)
                .find(|code| {
                    !self.used.is_set(*code)
                        && !self.reservation_blocks(*code, ival.start, ival.end)
                })
                .ok_or(AllocError::RegisterPoolExhausted {
                    vreg: ival.vreg,
                    at: ival.start.index(),
                })?,
        };
        self.used.set(code);
        self.active.push(Active {
            end: ival.end,
            code,
            vreg: ival.vreg,
        });
        Ok(code)
    }
}

/// Run the scan: consume `intervals` and `cnstrs` and produce a total [AssignmentMap], or fail
/// without partial output.
pub(crate) fn assign(
    ir: &LinearIr,
    mut intervals: Vec<LiveInterval>,
    cnstrs: &[PinnedConstraint],
    arch: &ArchSpec,
) -> Result<AssignmentMap, AllocError> {
    intervals.sort_by_key(|i| (i.start, i.vreg.file(), i.vreg.id()));

    let mut gp = FileState::new(arch, RegFile::Gp, cnstrs);
    let mut vec = FileState::new(arch, RegFile::Vec, cnstrs);

    // Dense pin lookup per vreg.
    let mut pin_of = [
        vec![None; ir.vreg_count(RegFile::Gp)],
        vec![None; ir.vreg_count(RegFile::Vec)],
    ];
    for c in cnstrs {
        let fi = match c.vreg.file() {
            RegFile::Gp => 0,
            RegFile::Vec => 1,
        };
        pin_of[fi][usize::try_from(c.vreg.id()).unwrap()] = Some(c.preg.code());
    }

    let mut map =
        AssignmentMap::with_counts(ir.vreg_count(RegFile::Gp), ir.vreg_count(RegFile::Vec));
    for ival in &intervals {
        let (st, fi) = match ival.vreg.file() {
            RegFile::Gp => (&mut gp, 0),
            RegFile::Vec => (&mut vec, 1),
        };
        let pin = pin_of[fi][usize::try_from(ival.vreg.id()).unwrap()];
        let code = st.take(ival, pin)?;
        map.set(ival.vreg, PReg::new(st.file, code));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iidx(i: usize) -> InstIdx {
        InstIdx::from_usize(i)
    }

    fn ival(vreg: VReg, start: usize, end: usize) -> LiveInterval {
        LiveInterval {
            vreg,
            start: iidx(start),
            end: iidx(end),
        }
    }

    /// An IR whose only purpose is to have handed out `n` vector vregs.
    fn ir_with_vec_vregs(n: usize) -> (LinearIr, Vec<VReg>) {
        let mut ir = LinearIr::new();
        let vs = (0..n).map(|_| ir.new_vreg(RegFile::Vec)).collect();
        (ir, vs)
    }

    #[test]
    fn no_false_sharing() {
        // Five overlapping intervals must get five distinct registers.
        let (ir, vs) = ir_with_vec_vregs(5);
        let intervals = vs
            .iter()
            .enumerate()
            .map(|(i, v)| ival(*v, i, 9))
            .collect::<Vec<_>>();
        let arch = ArchSpec::new(8, 8).unwrap();
        let map = assign(&ir, intervals.clone(), &[], &arch).unwrap();
        for a in &intervals {
            for b in &intervals {
                if a.vreg != b.vreg {
                    assert_ne!(map.get(a.vreg), map.get(b.vreg));
                }
            }
        }
    }

    #[test]
    fn lowest_free_code_first() {
        let (ir, vs) = ir_with_vec_vregs(3);
        let intervals = vec![ival(vs[0], 0, 1), ival(vs[1], 0, 5), ival(vs[2], 2, 3)];
        let arch = ArchSpec::new(8, 8).unwrap();
        let map = assign(&ir, intervals, &[], &arch).unwrap();
        assert_eq!(map.get(vs[0]), Some(PReg::new(RegFile::Vec, 0)));
        assert_eq!(map.get(vs[1]), Some(PReg::new(RegFile::Vec, 1)));
        // vs[0] expired before position 2, so x0 is the lowest free code again.
        assert_eq!(map.get(vs[2]), Some(PReg::new(RegFile::Vec, 0)));
    }

    #[test]
    fn boundary_is_held_not_reused() {
        // a ends at 2; b starts at 2. They must not share, since b's write would clobber the
        // value a's reader consumes at position 2.
        let (ir, vs) = ir_with_vec_vregs(2);
        let intervals = vec![ival(vs[0], 0, 2), ival(vs[1], 2, 4)];
        let arch = ArchSpec::new(8, 8).unwrap();
        let map = assign(&ir, intervals, &[], &arch).unwrap();
        assert_ne!(map.get(vs[0]), map.get(vs[1]));
    }

    #[test]
    fn reuse_after_expiry_never_before() {
        let (ir, vs) = ir_with_vec_vregs(3);
        let intervals = vec![ival(vs[0], 0, 1), ival(vs[1], 1, 1), ival(vs[2], 2, 3)];
        let arch = ArchSpec::new(1, 1).unwrap();
        // One register: vs[0] and vs[1] overlap at position 1, so this cannot fit...
        assert_eq!(
            assign(&ir, intervals, &[], &arch),
            Err(AllocError::RegisterPoolExhausted {
                vreg: vs[1],
                at: 1
            })
        );
        // ...but sequential lifetimes fit in one register.
        let intervals = vec![ival(vs[0], 0, 1), ival(vs[1], 2, 3), ival(vs[2], 4, 4)];
        let map = assign(&ir, intervals, &[], &arch).unwrap();
        assert_eq!(map.get(vs[0]), map.get(vs[1]));
        assert_eq!(map.get(vs[1]), map.get(vs[2]));
    }

    #[test]
    fn pinned_interval_takes_its_register() {
        let (ir, vs) = ir_with_vec_vregs(2);
        let intervals = vec![ival(vs[0], 0, 3), ival(vs[1], 1, 2)];
        let cnstrs = [PinnedConstraint {
            vreg: vs[1],
            preg: PReg::new(RegFile::Vec, 0),
            start: iidx(1),
            end: iidx(2),
        }];
        let arch = ArchSpec::new(8, 8).unwrap();
        let map = assign(&ir, intervals, &cnstrs, &arch).unwrap();
        // vs[0] starts first but must steer clear of x0 for the duration of the pin.
        assert_eq!(map.get(vs[1]), Some(PReg::new(RegFile::Vec, 0)));
        assert_ne!(map.get(vs[0]), Some(PReg::new(RegFile::Vec, 0)));
    }

    #[test]
    fn unpinned_may_use_pinned_register_outside_reservation() {
        let (ir, vs) = ir_with_vec_vregs(2);
        // vs[0] dies at 1; the pin on x0 only begins at 3.
        let intervals = vec![ival(vs[0], 0, 1), ival(vs[1], 3, 4)];
        let cnstrs = [PinnedConstraint {
            vreg: vs[1],
            preg: PReg::new(RegFile::Vec, 0),
            start: iidx(3),
            end: iidx(4),
        }];
        let arch = ArchSpec::new(8, 8).unwrap();
        let map = assign(&ir, intervals, &cnstrs, &arch).unwrap();
        assert_eq!(map.get(vs[0]), Some(PReg::new(RegFile::Vec, 0)));
        assert_eq!(map.get(vs[1]), Some(PReg::new(RegFile::Vec, 0)));
    }

    #[test]
    fn pinned_in_place_update_at_boundary() {
        // vs[0] is read for the last time at position 2, exactly where pinned vs[1] is defined
        // into the same register: the in-place update case.
        let (ir, vs) = ir_with_vec_vregs(2);
        let intervals = vec![ival(vs[0], 0, 2), ival(vs[1], 2, 4)];
        let cnstrs = [
            PinnedConstraint {
                vreg: vs[0],
                preg: PReg::new(RegFile::Vec, 0),
                start: iidx(0),
                end: iidx(2),
            },
            PinnedConstraint {
                vreg: vs[1],
                preg: PReg::new(RegFile::Vec, 0),
                start: iidx(2),
                end: iidx(4),
            },
        ];
        let arch = ArchSpec::new(8, 8).unwrap();
        let map = assign(&ir, intervals, &cnstrs, &arch).unwrap();
        assert_eq!(map.get(vs[0]), Some(PReg::new(RegFile::Vec, 0)));
        assert_eq!(map.get(vs[1]), Some(PReg::new(RegFile::Vec, 0)));
    }

    #[test]
    fn reserved_registers_never_assigned() {
        let mut ir = LinearIr::new();
        let gs = (0..14).map(|_| ir.new_vreg(RegFile::Gp)).collect::<Vec<_>>();
        // 14 simultaneously live GP values exactly fill x64's 16 minus {rsp, rbp}.
        let intervals = gs
            .iter()
            .map(|g| ival(*g, 0, 20))
            .collect::<Vec<_>>();
        let arch = ArchSpec::x64();
        let map = assign(&ir, intervals, &[], &arch).unwrap();
        for g in &gs {
            let code = map.get(*g).unwrap().code();
            assert!(code != 4 && code != 5);
        }
        // A fifteenth concurrent value does not fit.
        let g14 = ir.new_vreg(RegFile::Gp);
        let mut intervals = gs.iter().map(|g| ival(*g, 0, 20)).collect::<Vec<_>>();
        intervals.push(ival(g14, 1, 2));
        assert_eq!(
            assign(&ir, intervals, &[], &arch),
            Err(AllocError::RegisterPoolExhausted {
                vreg: g14,
                at: 1
            })
        );
    }

    #[test]
    fn files_are_independent() {
        let mut ir = LinearIr::new();
        let g = ir.new_vreg(RegFile::Gp);
        let v = ir.new_vreg(RegFile::Vec);
        let intervals = vec![ival(g, 0, 3), ival(v, 0, 3)];
        let arch = ArchSpec::new(1, 1).unwrap();
        // One register per file suffices: the files do not compete.
        let map = assign(&ir, intervals, &[], &arch).unwrap();
        assert_eq!(map.get(g), Some(PReg::new(RegFile::Gp, 0)));
        assert_eq!(map.get(v), Some(PReg::new(RegFile::Vec, 0)));
    }
}
