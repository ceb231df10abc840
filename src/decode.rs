//! Decoder: any k of the k + m blocks back into the k originals.
//!
//! Received originals are eliminated from the recovery rows first, which
//! shrinks the system to the erased columns only. The remaining square
//! bitmatrix (eight binary rows per recovery block) is solved in place by
//! Gaussian elimination to upper-triangular form plus back-substitution.
//! Above four recovery rows both sweeps defer their bulk XORs and replay
//! them through the four-bit window engine, one column group of eight
//! pivots at a time.

use crate::matrix::{self, CauchyMatrix};
use crate::window::{WindowPair, WINDOW_THRESHOLD};
use crate::xor;
use crate::{gf, Block, Error, Params, Workspace};

pub(crate) fn decode_blocks(
    params: &Params,
    blocks: &mut [Block],
    workspace: &mut Workspace,
) -> Result<(), Error> {
    let k = params.original_count();
    let m = params.recovery_count();
    let block_bytes = params.block_bytes();

    if blocks.len() != k {
        return Err(Error::InvalidInput);
    }
    let mut seen = [false; 256];
    for block in blocks.iter() {
        if block.data.len() != block_bytes {
            return Err(Error::InvalidInput);
        }
        let row = block.row as usize;
        if row >= k + m {
            return Err(Error::InvalidInput);
        }
        if seen[row] {
            return Err(Error::DuplicateRow);
        }
        seen[row] = true;
    }

    // One input block: it is the original, whatever row it arrived as.
    if k == 1 {
        blocks[0].row = 0;
        return Ok(());
    }
    if m == 1 {
        decode_m1(k, blocks);
        return Ok(());
    }

    // Classify into received originals and recovery rows. With exactly k
    // distinct rows, the erasure count always equals the recovery count.
    let mut original_pos = Vec::with_capacity(k);
    let mut recovery_pos = Vec::with_capacity(k);
    for (i, block) in blocks.iter().enumerate() {
        if (block.row as usize) < k {
            original_pos.push(i);
        } else {
            recovery_pos.push(i);
        }
    }
    let recovery_count = recovery_pos.len();
    if recovery_count == 0 {
        return Ok(());
    }

    let erasures: Vec<u8> = (0..k).filter(|&r| !seen[r]).map(|r| r as u8).collect();
    debug_assert_eq!(erasures.len(), recovery_count);

    if block_bytes % 8 != 0 {
        return Err(Error::InvalidParams);
    }
    let subbytes = block_bytes / 8;

    // Every fallible allocation happens before the first write to caller
    // data, so an error never leaves the blocks half-transformed.
    let windowed = recovery_count > WINDOW_THRESHOLD;
    if windowed {
        workspace.window.prepare(subbytes)?;
    }

    let bit_rows = recovery_count * 8;
    let bitstride = (bit_rows + 63) / 64;
    workspace.bitmatrix.clear();
    workspace
        .bitmatrix
        .try_reserve_exact(bitstride * bit_rows)
        .map_err(|_| Error::OutOfMemory)?;
    workspace.bitmatrix.resize(bitstride * bit_rows, 0);

    let matrix = matrix::cauchy_matrix(k, m, &mut workspace.matrix)?;

    if !original_pos.is_empty() {
        if windowed {
            win_eliminate_original(
                blocks,
                &original_pos,
                &recovery_pos,
                &matrix,
                k,
                subbytes,
                &mut workspace.window,
            );
        } else {
            eliminate_original(blocks, &original_pos, &recovery_pos, &matrix, k, subbytes);
        }
    }

    let bitmatrix = &mut workspace.bitmatrix[..];
    generate_bitmatrix(
        k,
        blocks,
        &recovery_pos,
        &matrix,
        &erasures,
        bitmatrix,
        bitstride,
    );

    if windowed {
        win_gaussian_elimination(
            blocks,
            &recovery_pos,
            bitmatrix,
            bitstride,
            subbytes,
            &mut workspace.window,
        )?;
        win_back_substitution(
            blocks,
            &recovery_pos,
            bitmatrix,
            bitstride,
            subbytes,
            &mut workspace.window,
        );
    } else {
        gaussian_elimination(blocks, &recovery_pos, bitmatrix, bitstride, subbytes)?;
        back_substitution(blocks, &recovery_pos, bitmatrix, bitstride, subbytes);
    }

    Ok(())
}

/// m = 1 fast path: the sole recovery block (if any) is the XOR parity of
/// all originals, so XORing the received originals back out leaves the
/// missing one. Its row is found by set difference.
fn decode_m1(k: usize, blocks: &mut [Block]) {
    let Some(erased) = blocks.iter().position(|b| (b.row as usize) >= k) else {
        return;
    };

    let mut seen = [false; 256];
    for i in 0..blocks.len() {
        if i == erased {
            continue;
        }
        seen[blocks[i].row as usize] = true;
        let (src, dst) = src_dst(blocks, i, erased);
        xor::xor_mem(dst, src);
    }

    if let Some(missing) = (0..k).find(|&r| !seen[r]) {
        blocks[erased].row = missing as u8;
    }
}

/// Split disjoint (read, write) borrows of two blocks' data.
fn src_dst<'s>(blocks: &'s mut [Block<'_>], src: usize, dst: usize) -> (&'s [u8], &'s mut [u8]) {
    debug_assert_ne!(src, dst);
    if src < dst {
        let (head, tail) = blocks.split_at_mut(dst);
        (&head[src].data[..], &mut tail[0].data[..])
    } else {
        let (head, tail) = blocks.split_at_mut(src);
        (&tail[0].data[..], &mut head[dst].data[..])
    }
}

/// Split disjoint mutable borrows of two blocks' data, in argument order.
fn two_mut<'s>(blocks: &'s mut [Block<'_>], a: usize, b: usize) -> (&'s mut [u8], &'s mut [u8]) {
    debug_assert_ne!(a, b);
    if a < b {
        let (head, tail) = blocks.split_at_mut(b);
        (&mut head[a].data[..], &mut tail[0].data[..])
    } else {
        let (head, tail) = blocks.split_at_mut(a);
        (&mut tail[0].data[..], &mut head[b].data[..])
    }
}

/// XOR the data sub-block at bit row `src_bit` into the one at `dst_bit`.
/// Bit row `b` lives in recovery block `b / 8`, sub-block `b % 8`.
fn xor_rows(
    blocks: &mut [Block],
    recovery_pos: &[usize],
    dst_bit: usize,
    src_bit: usize,
    subbytes: usize,
) {
    let dst_block = recovery_pos[dst_bit >> 3];
    let src_block = recovery_pos[src_bit >> 3];
    let dst_off = (dst_bit & 7) * subbytes;
    let src_off = (src_bit & 7) * subbytes;
    if dst_block == src_block {
        xor::xor_within(&mut blocks[dst_block].data[..], dst_off, src_off, subbytes);
    } else {
        let (src, dst) = src_dst(blocks, src_block, dst_block);
        xor::xor_mem(
            &mut dst[dst_off..dst_off + subbytes],
            &src[src_off..src_off + subbytes],
        );
    }
}

/// Swap the data sub-blocks at two bit rows (pivot reordering).
fn swap_rows(
    blocks: &mut [Block],
    recovery_pos: &[usize],
    a_bit: usize,
    b_bit: usize,
    subbytes: usize,
) {
    let a_block = recovery_pos[a_bit >> 3];
    let b_block = recovery_pos[b_bit >> 3];
    let a_off = (a_bit & 7) * subbytes;
    let b_off = (b_bit & 7) * subbytes;
    if a_block == b_block {
        xor::swap_within(&mut blocks[a_block].data[..], a_off, b_off, subbytes);
    } else {
        let (a_slice, b_slice) = two_mut(blocks, a_block, b_block);
        a_slice[a_off..a_off + subbytes].swap_with_slice(&mut b_slice[b_off..b_off + subbytes]);
    }
}

/// XOR submatrix-selected fragments of every received original out of
/// every recovery row, leaving each recovery row a combination of the
/// missing originals only. Bit-scan variant for small recovery counts.
fn eliminate_original(
    blocks: &mut [Block],
    original_pos: &[usize],
    recovery_pos: &[usize],
    matrix: &CauchyMatrix,
    k: usize,
    subbytes: usize,
) {
    for &rp in recovery_pos {
        // Matrix row 0 is the implicit all-ones row.
        let matrix_row = blocks[rp].row as usize - k;
        for &op in original_pos {
            let original_row = blocks[op].row as usize;
            let (src, dst) = src_dst(blocks, op, rp);
            if matrix_row == 0 || matrix.entry(matrix_row - 1, original_row) == 1 {
                // Identity submatrix: one whole-block XOR.
                xor::xor_mem(dst, src);
            } else {
                let mut slice = matrix.entry(matrix_row - 1, original_row);
                for bit_y in 0..8 {
                    let dest = &mut dst[bit_y * subbytes..(bit_y + 1) * subbytes];
                    for bit_x in 0..8 {
                        if slice & (1 << bit_x) != 0 {
                            xor::xor_mem(dest, &src[bit_x * subbytes..(bit_x + 1) * subbytes]);
                        }
                    }
                    if bit_y < 7 {
                        slice = gf::mul2(slice);
                    }
                }
            }
        }
    }
}

/// Windowed elimination: one window-pair build per received original,
/// then each recovery row costs a table lookup per slice byte.
fn win_eliminate_original(
    blocks: &mut [Block],
    original_pos: &[usize],
    recovery_pos: &[usize],
    matrix: &CauchyMatrix,
    k: usize,
    subbytes: usize,
    window: &mut WindowPair,
) {
    for &op in original_pos {
        let original_row = blocks[op].row as usize;
        window.load(&blocks[op].data[..]);
        for &rp in recovery_pos {
            let matrix_row = blocks[rp].row as usize - k;
            if matrix_row == 0 || matrix.entry(matrix_row - 1, original_row) == 1 {
                let (src, dst) = src_dst(blocks, op, rp);
                xor::xor_mem(dst, src);
            } else {
                let mut slice = matrix.entry(matrix_row - 1, original_row);
                let dst = &mut blocks[rp].data[..];
                for bit_y in 0..8 {
                    window.apply(&mut dst[bit_y * subbytes..(bit_y + 1) * subbytes], slice);
                    if bit_y < 7 {
                        slice = gf::mul2(slice);
                    }
                }
            }
        }
    }
}

/// Fill the square bitmatrix over the erased columns, eight binary rows
/// per recovery block, packed into 64-bit words row-major. Also relabels
/// each recovery descriptor to the erasure it will reconstruct; the
/// elimination's sub-block swaps make the contents match.
#[allow(clippy::too_many_arguments)]
fn generate_bitmatrix(
    k: usize,
    blocks: &mut [Block],
    recovery_pos: &[usize],
    matrix: &CauchyMatrix,
    erasures: &[u8],
    bitmatrix: &mut [u64],
    bitstride: usize,
) {
    for (i, &rp) in recovery_pos.iter().enumerate() {
        let recovery_row = blocks[rp].row as usize - k;
        let base = i * 8 * bitstride;

        if recovery_row == 0 {
            // Implicit all-ones row: an identity submatrix in every
            // column group, laid down as a repeating byte pattern.
            let mut pattern = 0x0101_0101_0101_0101u64;
            for r in 0..8 {
                for word in &mut bitmatrix[base + r * bitstride..base + (r + 1) * bitstride] {
                    *word = pattern;
                }
                pattern <<= 1;
            }
        } else {
            // Eight erased columns at a time fill one 64-bit word across
            // the group's eight rows.
            for (word, chunk) in erasures.chunks(8).enumerate() {
                let mut column = [0u64; 8];
                for (j, &e) in chunk.iter().enumerate() {
                    let rows = gf::expand8x8(matrix.entry(recovery_row - 1, e as usize));
                    for r in 0..8 {
                        column[r] |= (rows[r] as u64) << (j * 8);
                    }
                }
                for r in 0..8 {
                    bitmatrix[base + r * bitstride + word] = column[r];
                }
            }
        }

        blocks[rp].row = erasures[i];
    }
}

/// Plain Gaussian elimination to upper-triangular form. Matrix and data
/// XORs happen together, pivot by pivot.
fn gaussian_elimination(
    blocks: &mut [Block],
    recovery_pos: &[usize],
    bm: &mut [u64],
    bitstride: usize,
    subbytes: usize,
) -> Result<(), Error> {
    let bit_rows = recovery_pos.len() * 8;

    for pivot in 0..bit_rows - 1 {
        let pivot_word = pivot >> 6;
        let mask = 1u64 << (pivot & 63);

        let option = (pivot..bit_rows)
            .find(|&row| bm[row * bitstride + pivot_word] & mask != 0)
            .ok_or(Error::Internal)?;

        if option != pivot {
            for w in pivot_word..bitstride {
                bm.swap(pivot * bitstride + w, option * bitstride + w);
            }
            swap_rows(blocks, recovery_pos, pivot, option, subbytes);
        }

        for other in pivot + 1..bit_rows {
            if bm[other * bitstride + pivot_word] & mask != 0 {
                for w in pivot_word..bitstride {
                    bm[other * bitstride + w] ^= bm[pivot * bitstride + w];
                }
                xor_rows(blocks, recovery_pos, other, pivot, subbytes);
            }
        }
    }

    check_last_pivot(bm, bitstride, bit_rows)
}

/// The Cauchy construction guarantees a nonzero final diagonal; a zero
/// here means corrupted inputs slipped past validation.
fn check_last_pivot(bm: &[u64], bitstride: usize, bit_rows: usize) -> Result<(), Error> {
    let last = bit_rows - 1;
    if bm[last * bitstride + (last >> 6)] & (1u64 << (last & 63)) == 0 {
        return Err(Error::Internal);
    }
    Ok(())
}

/// Plain back-substitution from the bottom pivot upward.
fn back_substitution(
    blocks: &mut [Block],
    recovery_pos: &[usize],
    bm: &[u64],
    bitstride: usize,
    subbytes: usize,
) {
    let bit_rows = recovery_pos.len() * 8;
    for pivot in (1..bit_rows).rev() {
        let pivot_word = pivot >> 6;
        let mask = 1u64 << (pivot & 63);
        for other in (0..pivot).rev() {
            if bm[other * bitstride + pivot_word] & mask != 0 {
                xor_rows(blocks, recovery_pos, other, pivot, subbytes);
            }
        }
    }
}

/// Windowed Gaussian elimination, two phases. Phase one finds every pivot
/// and cleans the matrix only: bits at or below each pivot survive in the
/// lower rows as the deferred XOR schedule. Phase two replays that
/// schedule through the window engine, one column group of eight pivots
/// against all lower rows; the last three groups have too few rows left
/// to amortize a table build and finish with the plain kernel.
fn win_gaussian_elimination(
    blocks: &mut [Block],
    recovery_pos: &[usize],
    bm: &mut [u64],
    bitstride: usize,
    subbytes: usize,
    window: &mut WindowPair,
) -> Result<(), Error> {
    let rows = recovery_pos.len();
    let bit_rows = rows * 8;

    // Phase one: pivots and matrix cleanup. Data sub-blocks are swapped
    // into pivot order now so the schedule bits stay meaningful.
    for pivot in 0..bit_rows - 1 {
        let pivot_word = pivot >> 6;
        let mask = 1u64 << (pivot & 63);

        let option = (pivot..bit_rows)
            .find(|&row| bm[row * bitstride + pivot_word] & mask != 0)
            .ok_or(Error::Internal)?;

        if option != pivot {
            for w in 0..bitstride {
                bm.swap(pivot * bitstride + w, option * bitstride + w);
            }
            swap_rows(blocks, recovery_pos, pivot, option, subbytes);
        }

        // Preserve bits at and below the pivot in the pivot word.
        let keep = !(mask | (mask - 1));
        for other in pivot + 1..bit_rows {
            if bm[other * bitstride + pivot_word] & mask != 0 {
                let patch = bm[pivot * bitstride + pivot_word] & keep;
                bm[other * bitstride + pivot_word] ^= patch;
                for w in pivot_word + 1..bitstride {
                    bm[other * bitstride + w] ^= bm[pivot * bitstride + w];
                }
            }
        }
    }
    check_last_pivot(bm, bitstride, bit_rows)?;

    // Phase two: deferred data XORs.
    for x in 0..rows - 3 {
        let group = x * 8;
        let word = x / 8;
        let shift = (x % 8) * 8;
        let hshift = shift + 4;
        let bx = recovery_pos[x];

        // The group's own 8x8 block first: low triangle below the
        // diagonal, on the live data.
        {
            let data = &mut blocks[bx].data[..];
            let w1 = ((bm[(group + 1) * bitstride + word] >> shift) & 15) as usize;
            if w1 & 1 != 0 {
                xor::xor_within(data, subbytes, 0, subbytes);
            }
            let w2 = ((bm[(group + 2) * bitstride + word] >> shift) & 15) as usize;
            if w2 & 1 != 0 {
                xor::xor_within(data, 2 * subbytes, 0, subbytes);
            }
            if w2 & 2 != 0 {
                xor::xor_within(data, 2 * subbytes, subbytes, subbytes);
            }
            let w3 = ((bm[(group + 3) * bitstride + word] >> shift) & 15) as usize;
            if w3 & 1 != 0 {
                xor::xor_within(data, 3 * subbytes, 0, subbytes);
            }
            if w3 & 2 != 0 {
                xor::xor_within(data, 3 * subbytes, subbytes, subbytes);
            }
            if w3 & 4 != 0 {
                xor::xor_within(data, 3 * subbytes, 2 * subbytes, subbytes);
            }
        }
        window.load_lo(&blocks[bx].data[..4 * subbytes]);

        // Lower-left square: sub-blocks 4..7 absorb their scheduled
        // combinations of sub-blocks 0..3 straight from the low table.
        for r in 0..4 {
            let w = ((bm[(group + 4 + r) * bitstride + word] >> shift) & 15) as usize;
            if w != 0 {
                let dst = &mut blocks[bx].data[(4 + r) * subbytes..(5 + r) * subbytes];
                xor::xor_mem(dst, window.lo(w));
            }
        }

        // High triangle.
        {
            let data = &mut blocks[bx].data[..];
            let w5 = ((bm[(group + 5) * bitstride + word] >> hshift) & 15) as usize;
            if w5 & 1 != 0 {
                xor::xor_within(data, 5 * subbytes, 4 * subbytes, subbytes);
            }
            let w6 = ((bm[(group + 6) * bitstride + word] >> hshift) & 15) as usize;
            if w6 & 1 != 0 {
                xor::xor_within(data, 6 * subbytes, 4 * subbytes, subbytes);
            }
            if w6 & 2 != 0 {
                xor::xor_within(data, 6 * subbytes, 5 * subbytes, subbytes);
            }
            let w7 = ((bm[(group + 7) * bitstride + word] >> hshift) & 15) as usize;
            if w7 & 1 != 0 {
                xor::xor_within(data, 7 * subbytes, 4 * subbytes, subbytes);
            }
            if w7 & 2 != 0 {
                xor::xor_within(data, 7 * subbytes, 5 * subbytes, subbytes);
            }
            if w7 & 4 != 0 {
                xor::xor_within(data, 7 * subbytes, 6 * subbytes, subbytes);
            }
        }
        window.load_hi(&blocks[bx].data[4 * subbytes..8 * subbytes]);

        // Apply the group's eight pivots to every lower row.
        for y in x + 1..rows {
            let by = recovery_pos[y];
            let dst = &mut blocks[by].data[..];
            for sub in 0..8 {
                let slice = (bm[(y * 8 + sub) * bitstride + word] >> shift) as u8;
                window.apply(&mut dst[sub * subbytes..(sub + 1) * subbytes], slice);
            }
        }
    }

    // Final three column groups.
    for pivot in (rows - 3) * 8..bit_rows - 1 {
        let pivot_word = pivot >> 6;
        let mask = 1u64 << (pivot & 63);
        for other in pivot + 1..bit_rows {
            if bm[other * bitstride + pivot_word] & mask != 0 {
                xor_rows(blocks, recovery_pos, other, pivot, subbytes);
            }
        }
    }

    Ok(())
}

/// Windowed back-substitution, mirroring the forward sweep from the
/// bottom column group upward; the first three groups finish plain.
fn win_back_substitution(
    blocks: &mut [Block],
    recovery_pos: &[usize],
    bm: &[u64],
    bitstride: usize,
    subbytes: usize,
    window: &mut WindowPair,
) {
    let rows = recovery_pos.len();

    for x in (3..rows).rev() {
        let group = x * 8;
        let word = x / 8;
        let shift = (x % 8) * 8;
        let hshift = shift + 4;
        let bx = recovery_pos[x];

        // Upper triangle of the group's high 4x4, on the live data.
        {
            let data = &mut blocks[bx].data[..];
            let w6 = ((bm[(group + 6) * bitstride + word] >> hshift) & 15) as usize;
            if w6 & 8 != 0 {
                xor::xor_within(data, 6 * subbytes, 7 * subbytes, subbytes);
            }
            let w5 = ((bm[(group + 5) * bitstride + word] >> hshift) & 15) as usize;
            if w5 & 8 != 0 {
                xor::xor_within(data, 5 * subbytes, 7 * subbytes, subbytes);
            }
            if w5 & 4 != 0 {
                xor::xor_within(data, 5 * subbytes, 6 * subbytes, subbytes);
            }
            let w4 = ((bm[(group + 4) * bitstride + word] >> hshift) & 15) as usize;
            if w4 & 8 != 0 {
                xor::xor_within(data, 4 * subbytes, 7 * subbytes, subbytes);
            }
            if w4 & 4 != 0 {
                xor::xor_within(data, 4 * subbytes, 6 * subbytes, subbytes);
            }
            if w4 & 2 != 0 {
                xor::xor_within(data, 4 * subbytes, 5 * subbytes, subbytes);
            }
        }
        window.load_hi(&blocks[bx].data[4 * subbytes..8 * subbytes]);

        // Upper-right square: sub-blocks 3..0 absorb combinations of the
        // high quad.
        for r in (0..4).rev() {
            let w = ((bm[(group + r) * bitstride + word] >> hshift) & 15) as usize;
            if w != 0 {
                let dst = &mut blocks[bx].data[r * subbytes..(r + 1) * subbytes];
                xor::xor_mem(dst, window.hi(w));
            }
        }

        // Upper triangle of the low 4x4.
        {
            let data = &mut blocks[bx].data[..];
            let w2 = ((bm[(group + 2) * bitstride + word] >> shift) & 15) as usize;
            if w2 & 8 != 0 {
                xor::xor_within(data, 2 * subbytes, 3 * subbytes, subbytes);
            }
            let w1 = ((bm[(group + 1) * bitstride + word] >> shift) & 15) as usize;
            if w1 & 8 != 0 {
                xor::xor_within(data, subbytes, 3 * subbytes, subbytes);
            }
            if w1 & 4 != 0 {
                xor::xor_within(data, subbytes, 2 * subbytes, subbytes);
            }
            let w0 = ((bm[group * bitstride + word] >> shift) & 15) as usize;
            if w0 & 8 != 0 {
                xor::xor_within(data, 0, 3 * subbytes, subbytes);
            }
            if w0 & 4 != 0 {
                xor::xor_within(data, 0, 2 * subbytes, subbytes);
            }
            if w0 & 2 != 0 {
                xor::xor_within(data, 0, subbytes, subbytes);
            }
        }
        window.load_lo(&blocks[bx].data[..4 * subbytes]);

        // Apply the group's pivots to every earlier row.
        for y in (0..x).rev() {
            let by = recovery_pos[y];
            let dst = &mut blocks[by].data[..];
            for sub in (0..8).rev() {
                let slice = (bm[(y * 8 + sub) * bitstride + word] >> shift) as u8;
                window.apply(&mut dst[sub * subbytes..(sub + 1) * subbytes], slice);
            }
        }
    }

    // First three column groups.
    for pivot in (1..3 * 8).rev() {
        let pivot_word = pivot >> 6;
        let mask = 1u64 << (pivot & 63);
        for other in (0..pivot).rev() {
            if bm[other * bitstride + pivot_word] & mask != 0 {
                xor_rows(blocks, recovery_pos, other, pivot, subbytes);
            }
        }
    }
}
