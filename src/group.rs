//! Control bytes and group-at-a-time matching for `ProbingTable`.
//!
//! Every bucket has one control byte:
//! - `EMPTY`   (`0b1111_1111`): never used since the last rehash.
//! - `DELETED` (`0b1000_0000`): tombstone left by an erase.
//! - full      (`0b0hhh_hhhh`): the top 7 bits of the element's hash (`h2`).
//!
//! A `Group` is `Group::WIDTH` consecutive control bytes matched in one go:
//! 16 bytes through SSE2 where the target has it, otherwise 8 bytes packed
//! into a `u64` and matched with word arithmetic.

pub(crate) const EMPTY: u8 = 0b1111_1111;
pub(crate) const DELETED: u8 = 0b1000_0000;

/// Probe start: the low bits of the hash, masked by the caller.
#[inline]
pub(crate) fn h1(hash: u64) -> usize {
    hash as usize
}

/// Hash fragment stored in a full control byte: the top 7 bits.
#[inline]
pub(crate) fn h2(hash: u64) -> u8 {
    (hash >> 57) as u8
}

#[inline]
pub(crate) fn is_full(ctrl: u8) -> bool {
    ctrl & 0x80 == 0
}

/// Set of matching positions within one group, lowest first.
#[derive(Copy, Clone, Debug)]
pub(crate) struct BitMask(imp::BitMaskWord);

impl BitMask {
    #[inline]
    pub(crate) fn any_bit_set(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub(crate) fn lowest_set_bit(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize / imp::BITMASK_STRIDE)
        }
    }
}

impl Iterator for BitMask {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        let bit = self.lowest_set_bit()?;
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

pub(crate) use imp::Group;

#[cfg(all(
    target_feature = "sse2",
    any(target_arch = "x86", target_arch = "x86_64"),
    not(miri)
))]
mod imp {
    use super::{BitMask, EMPTY};
    #[cfg(target_arch = "x86")]
    use core::arch::x86 as arch;
    #[cfg(target_arch = "x86_64")]
    use core::arch::x86_64 as arch;

    pub(crate) type BitMaskWord = u16;
    pub(crate) const BITMASK_STRIDE: usize = 1;

    #[derive(Copy, Clone)]
    pub(crate) struct Group(arch::__m128i);

    impl Group {
        pub(crate) const WIDTH: usize = core::mem::size_of::<Self>();

        /// Loads the group starting at `pos`. `ctrl` must hold at least
        /// `pos + WIDTH` bytes.
        #[inline]
        pub(crate) fn load(ctrl: &[u8], pos: usize) -> Self {
            let bytes = &ctrl[pos..pos + Self::WIDTH];
            // SAFETY: `bytes` is exactly 16 initialized bytes and the load is
            // unaligned.
            unsafe { Group(arch::_mm_loadu_si128(bytes.as_ptr().cast())) }
        }

        /// Positions whose control byte equals `byte`.
        #[inline]
        pub(crate) fn match_byte(self, byte: u8) -> BitMask {
            // SAFETY: sse2 is enabled for this target.
            unsafe {
                let cmp = arch::_mm_cmpeq_epi8(self.0, arch::_mm_set1_epi8(byte as i8));
                BitMask(arch::_mm_movemask_epi8(cmp) as u16)
            }
        }

        #[inline]
        pub(crate) fn match_empty(self) -> BitMask {
            self.match_byte(EMPTY)
        }

        #[inline]
        pub(crate) fn match_empty_or_deleted(self) -> BitMask {
            // SAFETY: sse2 is enabled for this target.
            unsafe { BitMask(arch::_mm_movemask_epi8(self.0) as u16) }
        }
    }
}

#[cfg(not(all(
    target_feature = "sse2",
    any(target_arch = "x86", target_arch = "x86_64"),
    not(miri)
)))]
mod imp {
    use super::BitMask;

    pub(crate) type BitMaskWord = u64;
    pub(crate) const BITMASK_STRIDE: usize = 8;

    #[inline]
    fn repeat(byte: u8) -> u64 {
        u64::from_ne_bytes([byte; 8])
    }

    #[derive(Copy, Clone)]
    pub(crate) struct Group(u64);

    impl Group {
        pub(crate) const WIDTH: usize = core::mem::size_of::<Self>();

        /// Loads the group starting at `pos`. `ctrl` must hold at least
        /// `pos + WIDTH` bytes.
        #[inline]
        pub(crate) fn load(ctrl: &[u8], pos: usize) -> Self {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&ctrl[pos..pos + Self::WIDTH]);
            Group(u64::from_le_bytes(bytes))
        }

        /// Positions whose control byte equals `byte`.
        ///
        /// May report a false positive in the byte right after a true
        /// match (borrow propagation). Callers re-check the slot, so this
        /// only costs a comparison.
        #[inline]
        pub(crate) fn match_byte(self, byte: u8) -> BitMask {
            let cmp = self.0 ^ repeat(byte);
            BitMask(cmp.wrapping_sub(repeat(0x01)) & !cmp & repeat(0x80))
        }

        #[inline]
        pub(crate) fn match_empty(self) -> BitMask {
            // EMPTY is the only control byte with both bit 7 and bit 6 set.
            BitMask(self.0 & (self.0 << 1) & repeat(0x80))
        }

        #[inline]
        pub(crate) fn match_empty_or_deleted(self) -> BitMask {
            BitMask(self.0 & repeat(0x80))
        }
    }
}

/// Triangular probe sequence over groups.
///
/// Visits every group of a power-of-two table exactly once in
/// `buckets / Group::WIDTH` steps.
#[derive(Debug)]
pub(crate) struct ProbeSeq {
    pub(crate) pos: usize,
    stride: usize,
}

impl ProbeSeq {
    #[inline]
    pub(crate) fn new(hash: u64, bucket_mask: usize) -> Self {
        ProbeSeq {
            pos: h1(hash) & bucket_mask,
            stride: 0,
        }
    }

    #[inline]
    pub(crate) fn move_next(&mut self, bucket_mask: usize) {
        self.stride += Group::WIDTH;
        self.pos += self.stride;
        self.pos &= bucket_mask;
    }
}
