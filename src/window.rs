//! Four-bit window engine.
//!
//! A block's eight sub-blocks split into two quads: sub-blocks 0..3 feed
//! the low-nibble table, 4..7 the high-nibble table. Each table holds the
//! fifteen nonzero XOR combinations of its quad, so any byte of a
//! bit-sliced matrix row resolves to at most one table lookup per nibble
//! plus one add-XOR, instead of eight bit tests.

use crate::xor;
use crate::Error;

/// Minimum recovery rows before table precomputation pays for itself.
/// The triangular decode passes assume this is at least 3.
pub(crate) const WINDOW_THRESHOLD: usize = 4;

/// The eleven non-trivial entries, as (entry, operand, operand). Each
/// entry index is the bitwise OR of its operands; operands are always
/// already materialized when their entry is built.
const COMBINATIONS: [(usize, usize, usize); 11] = [
    (3, 1, 2),
    (6, 2, 4),
    (5, 1, 4),
    (7, 1, 6),
    (9, 1, 8),
    (12, 4, 8),
    (10, 2, 8),
    (11, 3, 8),
    (13, 1, 12),
    (14, 2, 12),
    (15, 3, 12),
];

/// Entries per table: 15 live entries (index 0 is never consulted).
const TABLE_ENTRIES: usize = 15;

/// A pair of four-bit window tables over one block.
///
/// The four base sub-blocks of each quad are copied into the scratch
/// buffer alongside the eleven combinations, so lookups never borrow the
/// caller's block. Entry `i` (1..=15) lives at scratch offset
/// `(i - 1) * subbytes` within its table half.
pub(crate) struct WindowPair {
    scratch: Vec<u8>,
    subbytes: usize,
}

impl WindowPair {
    pub(crate) fn new() -> Self {
        Self {
            scratch: Vec::new(),
            subbytes: 0,
        }
    }

    /// Size the scratch for `subbytes`-sized sub-blocks. Grows but never
    /// shrinks, so a reused workspace settles at its largest block size.
    pub(crate) fn prepare(&mut self, subbytes: usize) -> Result<(), Error> {
        let need = subbytes * TABLE_ENTRIES * 2;
        if self.scratch.len() < need {
            let extra = need - self.scratch.len();
            self.scratch
                .try_reserve_exact(extra)
                .map_err(|_| Error::OutOfMemory)?;
            self.scratch.resize(need, 0);
        }
        self.subbytes = subbytes;
        Ok(())
    }

    /// Load both tables from a block's eight sub-blocks.
    pub(crate) fn load(&mut self, block: &[u8]) {
        let quad = self.subbytes * 4;
        self.load_lo(&block[..quad]);
        self.load_hi(&block[quad..quad * 2]);
    }

    /// Load the low-nibble table from sub-blocks 0..3.
    pub(crate) fn load_lo(&mut self, quad: &[u8]) {
        let sub = self.subbytes;
        fill_table(&mut self.scratch[..TABLE_ENTRIES * sub], quad, sub);
    }

    /// Load the high-nibble table from sub-blocks 4..7.
    pub(crate) fn load_hi(&mut self, quad: &[u8]) {
        let sub = self.subbytes;
        fill_table(&mut self.scratch[TABLE_ENTRIES * sub..TABLE_ENTRIES * sub * 2], quad, sub);
    }

    #[inline]
    pub(crate) fn lo(&self, entry: usize) -> &[u8] {
        debug_assert!((1..=15).contains(&entry));
        let sub = self.subbytes;
        &self.scratch[(entry - 1) * sub..entry * sub]
    }

    #[inline]
    pub(crate) fn hi(&self, entry: usize) -> &[u8] {
        debug_assert!((1..=15).contains(&entry));
        let sub = self.subbytes;
        let base = TABLE_ENTRIES * sub;
        &self.scratch[base + (entry - 1) * sub..base + entry * sub]
    }

    /// XOR the combination selected by `slice` into `dest`: one lookup
    /// per nonzero nibble, fused into a single add-XOR when both are set.
    #[inline]
    pub(crate) fn apply(&self, dest: &mut [u8], slice: u8) {
        let lo = (slice & 15) as usize;
        let hi = (slice >> 4) as usize;
        if lo != 0 && hi != 0 {
            xor::xor_add(dest, self.lo(lo), self.hi(hi));
        } else if lo != 0 {
            xor::xor_mem(dest, self.lo(lo));
        } else if hi != 0 {
            xor::xor_mem(dest, self.hi(hi));
        }
    }
}

/// Copy the quad's four sub-blocks to entries 1, 2, 4, 8 and build the
/// eleven combinations with set-XOR. Combination destinations always sit
/// above their operands, so a single split suffices.
fn fill_table(table: &mut [u8], quad: &[u8], sub: usize) {
    debug_assert_eq!(quad.len(), sub * 4);
    for (i, entry) in [1usize, 2, 4, 8].iter().enumerate() {
        let off = (entry - 1) * sub;
        table[off..off + sub].copy_from_slice(&quad[i * sub..(i + 1) * sub]);
    }
    for &(entry, a, b) in &COMBINATIONS {
        let (head, tail) = table.split_at_mut((entry - 1) * sub);
        xor::xor_set(
            &mut tail[..sub],
            &head[(a - 1) * sub..a * sub],
            &head[(b - 1) * sub..b * sub],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combination_operands_precede_entries() {
        let mut ready = [false; 16];
        for base in [1, 2, 4, 8] {
            ready[base] = true;
        }
        for &(entry, a, b) in &COMBINATIONS {
            assert_eq!(entry, a | b);
            assert!(ready[a] && ready[b], "entry {entry} built before operands");
            ready[entry] = true;
        }
        assert!(ready[1..].iter().all(|&r| r));
    }

    #[test]
    fn entries_are_subblock_combinations() {
        let sub = 24;
        let block: Vec<u8> = (0..sub * 8).map(|i| (i as u8).wrapping_mul(37)).collect();

        let mut window = WindowPair::new();
        window.prepare(sub).unwrap();
        window.load(&block);

        for entry in 1..16usize {
            let mut expected = vec![0u8; sub];
            for bit in 0..4 {
                if entry & (1 << bit) != 0 {
                    for (e, s) in expected.iter_mut().zip(&block[bit * sub..(bit + 1) * sub]) {
                        *e ^= s;
                    }
                }
            }
            assert_eq!(window.lo(entry), &expected[..], "lo entry {entry}");

            let mut expected = vec![0u8; sub];
            for bit in 0..4 {
                if entry & (1 << bit) != 0 {
                    let base = (4 + bit) * sub;
                    for (e, s) in expected.iter_mut().zip(&block[base..base + sub]) {
                        *e ^= s;
                    }
                }
            }
            assert_eq!(window.hi(entry), &expected[..], "hi entry {entry}");
        }
    }

    #[test]
    fn apply_matches_bit_scan() {
        let sub = 16;
        let block: Vec<u8> = (0..sub * 8).map(|i| (i as u8).wrapping_add(3)).collect();

        let mut window = WindowPair::new();
        window.prepare(sub).unwrap();
        window.load(&block);

        for slice in 0..=255u8 {
            let mut dest = vec![0x5au8; sub];
            let mut expected = dest.clone();
            for bit in 0..8 {
                if slice & (1 << bit) != 0 {
                    for (e, s) in expected.iter_mut().zip(&block[bit * sub..(bit + 1) * sub]) {
                        *e ^= s;
                    }
                }
            }
            window.apply(&mut dest, slice);
            assert_eq!(dest, expected, "slice = {slice:#04x}");
        }
    }

    #[test]
    fn scratch_grows_and_is_reusable() {
        let mut window = WindowPair::new();
        window.prepare(8).unwrap();
        let small = window.scratch.len();
        window.prepare(64).unwrap();
        assert!(window.scratch.len() > small);
        // Shrinking request keeps the larger allocation.
        window.prepare(8).unwrap();
        assert_eq!(window.subbytes, 8);
    }
}
