//! Encoder: k original blocks in, m recovery blocks out.
//!
//! Recovery row 0 is the XOR of every input (the implicit all-ones matrix
//! row), so the `m = 1` case never touches the matrix at all. The
//! remaining rows apply the Cauchy matrix through the bit-sliced 8x8
//! submatrices: windowed for `m > 4`, a plain bit-scan otherwise.

use crate::matrix;
use crate::window::WindowPair;
use crate::xor;
use crate::{gf, Error, Params, Workspace};

pub(crate) fn encode_blocks(
    params: &Params,
    originals: &[&[u8]],
    recovery_out: &mut [u8],
    workspace: &mut Workspace,
) -> Result<(), Error> {
    let k = params.original_count();
    let m = params.recovery_count();
    let block_bytes = params.block_bytes();

    if originals.len() != k {
        return Err(Error::InvalidInput);
    }
    if originals.iter().any(|block| block.len() != block_bytes) {
        return Err(Error::InvalidInput);
    }
    if recovery_out.len() != m * block_bytes {
        return Err(Error::InvalidInput);
    }

    // One input: every recovery block is a plain copy. Any block size.
    if k == 1 {
        for out in recovery_out.chunks_exact_mut(block_bytes) {
            out.copy_from_slice(originals[0]);
        }
        return Ok(());
    }

    // One recovery block: pure XOR parity, also exempt from the
    // multiple-of-8 rule.
    if m == 1 {
        xor_parity(recovery_out, originals);
        return Ok(());
    }

    if block_bytes % 8 != 0 {
        return Err(Error::InvalidParams);
    }
    let subbytes = block_bytes / 8;

    let matrix = matrix::cauchy_matrix(k, m, &mut workspace.matrix)?;

    let (parity, rest) = recovery_out.split_at_mut(block_bytes);
    xor_parity(parity, originals);
    rest.fill(0);

    if m > 4 {
        workspace.window.prepare(subbytes)?;
        win_encode(k, m, &matrix, originals, rest, subbytes, &mut workspace.window);
    } else {
        bitscan_encode(k, m, &matrix, originals, rest, subbytes);
    }

    Ok(())
}

/// `out = originals[0] ^ originals[1] ^ ...` — the implicit first row.
fn xor_parity(out: &mut [u8], originals: &[&[u8]]) {
    xor::xor_set(out, originals[0], originals[1]);
    for block in &originals[2..] {
        xor::xor_mem(out, block);
    }
}

/// Bit-scan engine for small m: for each set bit of the doubled matrix
/// byte, XOR input sub-block `bit_x` into output sub-block `bit_y`.
fn bitscan_encode(
    k: usize,
    m: usize,
    matrix: &matrix::CauchyMatrix,
    originals: &[&[u8]],
    rest: &mut [u8],
    subbytes: usize,
) {
    let block_bytes = subbytes * 8;
    for y in 1..m {
        let out = &mut rest[(y - 1) * block_bytes..y * block_bytes];
        for (x, src) in originals.iter().enumerate().take(k) {
            let mut slice = matrix.entry(y - 1, x);
            for bit_y in 0..8 {
                let dest = &mut out[bit_y * subbytes..(bit_y + 1) * subbytes];
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

/// Windowed engine: per input column, build the window pair once, then
/// every output row resolves each slice byte with table lookups.
fn win_encode(
    k: usize,
    m: usize,
    matrix: &matrix::CauchyMatrix,
    originals: &[&[u8]],
    rest: &mut [u8],
    subbytes: usize,
    window: &mut WindowPair,
) {
    let block_bytes = subbytes * 8;
    for (x, src) in originals.iter().enumerate().take(k) {
        window.load(src);
        for y in 1..m {
            let out = &mut rest[(y - 1) * block_bytes..y * block_bytes];
            let mut slice = matrix.entry(y - 1, x);
            for bit_y in 0..8 {
                window.apply(&mut out[bit_y * subbytes..(bit_y + 1) * subbytes], slice);
                if bit_y < 7 {
                    slice = gf::mul2(slice);
                }
            }
        }
    }
}
