//! Cauchy matrix provider.
//!
//! The full logical encoding matrix is `m x k`: an implicit all-ones first
//! row (plain XOR parity) plus `m - 1` rows served from here. Row `r`,
//! column `c` is `X[c] / (X[c] ^ Y[r])` with the implicit `X[0] = 1`, where
//! X and Y are disjoint slices of one shared ordered list of field
//! elements. Column-scaling a Cauchy matrix keeps every square submatrix
//! invertible, so any `k` of the `k + m` blocks still reconstruct the
//! originals.
//!
//! For the common small recovery counts (m = 2..=6) the matrix is a baked
//! compile-time table spanning the widest legal `k`; larger `m` builds rows
//! on demand into workspace staging.

use crate::gf;
use crate::Error;

/// Largest recovery count served from the baked tables.
const PRECOMPUTED_MAX_M: usize = 6;

/// Total weight of the 8x8 bit expansion of `e`: the number of XOR
/// operations the submatrix costs in the bit-scan kernels.
const fn expansion_weight(e: u8) -> u32 {
    let mut weight = 0u32;
    let mut slice = e;
    let mut row = 0;
    while row < 8 {
        weight += slice.count_ones();
        if row < 7 {
            slice = gf::mul_const(slice, 2);
        }
        row += 1;
    }
    weight
}

/// The shared ordered element list: GF(256) minus {0, 1} (zero is the
/// implicit parity row's Y, one is the implicit X[0]). Ordered by
/// ascending expansion weight of the element's inverse so that the
/// partition prefers entries whose submatrices are sparse, approximating
/// the offline-optimized selection of the reference tables.
const fn build_element_list() -> [u8; 254] {
    let mut weight = [0u32; 254];
    let mut list = [0u8; 254];
    let mut i = 0;
    while i < 254 {
        list[i] = (i + 2) as u8;
        weight[i] = expansion_weight(gf::inv_const(list[i]));
        i += 1;
    }

    // Insertion sort by (weight, value); stable order keeps the list
    // deterministic across platforms.
    let mut a = 1;
    while a < 254 {
        let e = list[a];
        let w = weight[a];
        let mut b = a;
        while b > 0 && (weight[b - 1] > w || (weight[b - 1] == w && list[b - 1] > e)) {
            list[b] = list[b - 1];
            weight[b] = weight[b - 1];
            b -= 1;
        }
        list[b] = e;
        weight[b] = w;
        a += 1;
    }
    list
}

pub(crate) const CAUCHY_ELEMENTS: [u8; 254] = build_element_list();

/// Bake the `ROWS x WIDTH` matrix for `m = ROWS + 1` at its widest legal
/// `k = WIDTH = 256 - m`. Narrower `k` reads a prefix of each row.
const fn build_matrix<const ROWS: usize, const WIDTH: usize, const LEN: usize>() -> [u8; LEN] {
    let mut out = [0u8; LEN];
    let mut r = 0;
    while r < ROWS {
        let y = CAUCHY_ELEMENTS[r];
        // Implicit X[0] = 1.
        out[r * WIDTH] = gf::inv_const(1 ^ y);
        let mut c = 1;
        while c < WIDTH {
            let x = CAUCHY_ELEMENTS[ROWS + c - 1];
            out[r * WIDTH + c] = gf::div_const(x, x ^ y);
            c += 1;
        }
        r += 1;
    }
    out
}

static CAUCHY_MATRIX_2: [u8; 254] = build_matrix::<1, 254, 254>();
static CAUCHY_MATRIX_3: [u8; 506] = build_matrix::<2, 253, 506>();
static CAUCHY_MATRIX_4: [u8; 756] = build_matrix::<3, 252, 756>();
static CAUCHY_MATRIX_5: [u8; 1004] = build_matrix::<4, 251, 1004>();
static CAUCHY_MATRIX_6: [u8; 1250] = build_matrix::<5, 250, 1250>();

/// A borrowed view of the `(m - 1) x k` non-implicit rows. `stride` may
/// exceed `k` when the rows come from a baked table.
pub(crate) struct CauchyMatrix<'a> {
    rows: &'a [u8],
    stride: usize,
}

impl CauchyMatrix<'_> {
    /// Matrix entry for non-implicit row `row` (0-based, i.e. recovery
    /// row `row + 1`) and original column `col`.
    #[inline(always)]
    pub(crate) fn entry(&self, row: usize, col: usize) -> u8 {
        self.rows[row * self.stride + col]
    }
}

/// Fetch the matrix for `(k, m)`. Precondition: `m >= 2`, `k >= 2`,
/// `k + m <= 256`. Baked tables serve `m <= 6`; otherwise rows are
/// constructed into `staging`, which the caller may reuse across calls.
pub(crate) fn cauchy_matrix<'a>(
    k: usize,
    m: usize,
    staging: &'a mut Vec<u8>,
) -> Result<CauchyMatrix<'a>, Error> {
    debug_assert!(m >= 2 && k >= 2 && k + m <= 256);

    let (rows, stride): (&[u8], usize) = match m {
        2 => (&CAUCHY_MATRIX_2, 254),
        3 => (&CAUCHY_MATRIX_3, 253),
        4 => (&CAUCHY_MATRIX_4, 252),
        5 => (&CAUCHY_MATRIX_5, 251),
        6 => (&CAUCHY_MATRIX_6, 250),
        _ => {
            debug_assert!(m > PRECOMPUTED_MAX_M);
            fill_matrix(k, m, staging)?;
            (staging.as_slice(), k)
        }
    };
    Ok(CauchyMatrix { rows, stride })
}

/// Construct the `(m - 1) x k` rows at call time with stride `k`.
fn fill_matrix(k: usize, m: usize, staging: &mut Vec<u8>) -> Result<(), Error> {
    let len = k * (m - 1);
    staging.clear();
    staging
        .try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory)?;

    for r in 0..m - 1 {
        let y = CAUCHY_ELEMENTS[r];
        staging.push(gf::inv(1 ^ y));
        for c in 1..k {
            let x = CAUCHY_ELEMENTS[(m - 1) + c - 1];
            staging.push(gf::div(x, x ^ y));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gf::Gf256;

    #[test]
    fn element_list_is_a_permutation() {
        let mut seen = [false; 256];
        for &e in CAUCHY_ELEMENTS.iter() {
            assert!(e >= 2, "0 and 1 are reserved for the implicit row/column");
            assert!(!seen[e as usize], "duplicate element {e}");
            seen[e as usize] = true;
        }
        // Sorted by expansion weight of the inverse.
        for pair in CAUCHY_ELEMENTS.windows(2) {
            let (wa, wb) = (
                expansion_weight(gf::inv(pair[0])),
                expansion_weight(gf::inv(pair[1])),
            );
            assert!(wa < wb || (wa == wb && pair[0] < pair[1]));
        }
    }

    #[test]
    fn baked_tables_match_runtime_builder() {
        for m in 2..=PRECOMPUTED_MAX_M {
            let k = 256 - m;
            let mut staging = Vec::new();
            fill_matrix(k, m, &mut staging).unwrap();
            let runtime = CauchyMatrix { rows: &staging, stride: k };

            let mut unused = Vec::new();
            let baked = cauchy_matrix(k, m, &mut unused).unwrap();
            for r in 0..m - 1 {
                for c in 0..k {
                    assert_eq!(
                        baked.entry(r, c),
                        runtime.entry(r, c),
                        "m = {m}, row = {r}, col = {c}"
                    );
                }
            }
        }
    }

    #[test]
    fn entries_are_nonzero() {
        let mut staging = Vec::new();
        for (k, m) in [(250, 6), (100, 12), (32, 32), (2, 254)] {
            let matrix = cauchy_matrix(k, m, &mut staging).unwrap();
            for r in 0..m - 1 {
                for c in 0..k {
                    assert_ne!(matrix.entry(r, c), 0, "k={k} m={m} r={r} c={c}");
                }
            }
            staging.clear();
        }
    }

    // Build the full m x k encoding matrix (implicit parity row included)
    // as field elements.
    fn full_matrix(k: usize, m: usize) -> Vec<Vec<Gf256>> {
        let mut staging = Vec::new();
        let matrix = cauchy_matrix(k, m, &mut staging).unwrap();
        let mut rows = vec![vec![Gf256(1); k]];
        for r in 0..m - 1 {
            rows.push((0..k).map(|c| Gf256(matrix.entry(r, c))).collect());
        }
        rows
    }

    fn is_invertible(mut m: Vec<Vec<Gf256>>) -> bool {
        let n = m.len();
        for col in 0..n {
            let Some(pivot) = (col..n).find(|&r| m[r][col].0 != 0) else {
                return false;
            };
            m.swap(col, pivot);
            let inv = Gf256(1) / m[col][col];
            for r in 0..n {
                if r != col && m[r][col].0 != 0 {
                    let factor = m[r][col] * inv;
                    for c in col..n {
                        let v = m[col][c];
                        m[r][c] += factor * v;
                    }
                }
            }
        }
        true
    }

    #[test]
    fn square_submatrices_are_invertible() {
        use rand::prelude::*;
        let mut rng = StdRng::seed_from_u64(0x2561);

        for (k, m) in [(4, 2), (8, 6), (16, 16), (50, 12), (128, 32)] {
            let encoding = full_matrix(k, m);
            for _ in 0..40 {
                // Pick e erased originals and e recovery rows; the decoder
                // inverts exactly this submatrix.
                let e = rng.gen_range(1..=m.min(k));
                let mut cols: Vec<usize> = (0..k).collect();
                cols.shuffle(&mut rng);
                let mut recs: Vec<usize> = (0..m).collect();
                recs.shuffle(&mut rng);

                let sub: Vec<Vec<Gf256>> = recs[..e]
                    .iter()
                    .map(|&r| cols[..e].iter().map(|&c| encoding[r][c]).collect())
                    .collect();
                assert!(
                    is_invertible(sub),
                    "singular submatrix: k={k} m={m} rows={:?} cols={:?}",
                    &recs[..e],
                    &cols[..e]
                );
            }
        }
    }
}
