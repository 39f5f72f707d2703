//! Architecture descriptors.
//!
//! An [ArchSpec] tells the allocator how many physical registers each register file provides and
//! which of them are reserved system-wide (stack pointer and friends) and thus never offered to
//! the general pool. Specs are immutable once built; independent assignment runs may share one by
//! reference.

use crate::ir::{PReg, RegFile};
use thiserror::Error;

/// The hard ceiling on registers per file. The allocator's free-set is a `u64` bitset, so codes
/// must fit in 0..64.
pub const MAX_FILE_REGS: u8 = 64;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ArchError {
    #[error("register file {file} has invalid cardinality {count} (must be 1..={MAX_FILE_REGS})")]
    BadCardinality { file: RegFile, count: u8 },
    #[error("reserved register {reg} is outside its register file")]
    BadReserved { reg: PReg },
}

/// The register-file topology of one target architecture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchSpec {
    gp_count: u8,
    vec_count: u8,
    reserved_gp: Vec<u8>,
    reserved_vec: Vec<u8>,
}

impl ArchSpec {
    /// Create a spec with `gp_count` general purpose and `vec_count` vector registers and
    /// nothing reserved.
    pub fn new(gp_count: u8, vec_count: u8) -> Result<Self, ArchError> {
        for (file, count) in [(RegFile::Gp, gp_count), (RegFile::Vec, vec_count)] {
            if count == 0 || count > MAX_FILE_REGS {
                return Err(ArchError::BadCardinality { file, count });
            }
        }
        Ok(Self {
            gp_count,
            vec_count,
            reserved_gp: Vec::new(),
            reserved_vec: Vec::new(),
        })
    }

    /// Mark `regs` as reserved system-wide: they are never offered to the pool and may not be
    /// named by a pin.
    pub fn with_reserved(mut self, regs: &[PReg]) -> Result<Self, ArchError> {
        for reg in regs {
            if reg.code() >= self.count(reg.file()) {
                return Err(ArchError::BadReserved { reg: *reg });
            }
            let rs = match reg.file() {
                RegFile::Gp => &mut self.reserved_gp,
                RegFile::Vec => &mut self.reserved_vec,
            };
            if !rs.contains(&reg.code()) {
                rs.push(reg.code());
            }
        }
        Ok(self)
    }

    /// x64 with SSE/AVX2-style vector files: 16 GP registers (rsp/rbp reserved), 16 vector
    /// registers.
    pub fn x64() -> Self {
        // The unwraps are statically fine: the counts and codes are in range.
        Self::new(16, 16)
            .unwrap()
            .with_reserved(&[PReg::new(RegFile::Gp, 4), PReg::new(RegFile::Gp, 5)])
            .unwrap()
    }

    /// x64 with an AVX-512 vector file: 16 GP registers (rsp/rbp reserved), 32 vector registers.
    pub fn x64_avx512() -> Self {
        Self::new(16, 32)
            .unwrap()
            .with_reserved(&[PReg::new(RegFile::Gp, 4), PReg::new(RegFile::Gp, 5)])
            .unwrap()
    }

    /// How many physical registers does `file` provide (reserved ones included)?
    pub fn count(&self, file: RegFile) -> u8 {
        match file {
            RegFile::Gp => self.gp_count,
            RegFile::Vec => self.vec_count,
        }
    }

    /// The reserved register codes of `file`.
    pub fn reserved(&self, file: RegFile) -> &[u8] {
        match file {
            RegFile::Gp => &self.reserved_gp,
            RegFile::Vec => &self.reserved_vec,
        }
    }

    pub fn is_reserved(&self, reg: PReg) -> bool {
        self.reserved(reg.file()).contains(&reg.code())
    }

    /// How many registers of `file` are actually allocatable?
    pub fn allocatable(&self, file: RegFile) -> usize {
        usize::from(self.count(file)) - self.reserved(file).len()
    }
}
