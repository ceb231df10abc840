//! CRS256 - Cauchy Reed-Solomon Erasure Coding
//!
//! A systematic MDS erasure code over GF(256): `k` original data blocks
//! are encoded into `m` recovery blocks, and any `k` of the `k + m`
//! combined blocks reconstruct the originals, for `k + m <= 256`.
//!
//! The codec expands each Cauchy matrix byte into an 8x8 binary
//! submatrix sliced by row, so all bulk work is XOR of block eighths.
//! A four-bit window table kicks in above four recovery rows and is what
//! keeps encode cost flat as `m` grows; the decoder runs a windowed
//! Gaussian elimination over the same layout. The sweet spot is
//! packet-sized blocks and small `m`, where setup time dominates.
//!
//! Block sizes must be a multiple of eight bytes, except on the `k = 1`
//! and `m = 1` degenerate paths which accept any size.
//!
//! # Example
//!
//! ```rust
//! use crs256::{encode, decode, Block, Params};
//!
//! let params = Params::new(3, 2, 16).unwrap(); // 3 original, 2 recovery
//!
//! let originals: Vec<Vec<u8>> = vec![vec![1u8; 16], vec![2u8; 16], vec![3u8; 16]];
//! let refs: Vec<&[u8]> = originals.iter().map(|b| b.as_slice()).collect();
//!
//! let mut recovery = vec![0u8; 2 * 16];
//! encode(&params, &refs, &mut recovery).unwrap();
//!
//! // Lose original row 1; present recovery row 3 in its place.
//! let mut b0 = originals[0].clone();
//! let mut r0 = recovery[..16].to_vec();
//! let mut b2 = originals[2].clone();
//! let mut blocks = vec![
//!     Block::new(0, &mut b0),
//!     Block::new(3, &mut r0),
//!     Block::new(2, &mut b2),
//! ];
//! decode(&params, &mut blocks).unwrap();
//!
//! assert_eq!(blocks[1].row, 1);
//! assert_eq!(blocks[1].data, &originals[1][..]);
//! ```

mod decode;
mod encode;
mod gf;
mod matrix;
mod window;
mod xor;


pub use gf::Gf256;

/// ABI version tag checked by [`init`].
pub const VERSION: u32 = 1;

/// Verify binary compatibility with the API.
///
/// The GF(256) tables are baked into the binary at compile time, so there
/// is no runtime construction step: this call reduces to the version
/// gate. It is idempotent and safe to call from any thread.
pub fn init(expected_version: u32) -> Result<(), Error> {
    if expected_version != VERSION {
        return Err(Error::VersionMismatch);
    }
    Ok(())
}

/// Release process-wide state.
///
/// The arithmetic tables are truly static, so there is nothing to
/// release; retained for lifecycle parity with [`init`].
pub fn deinit() {}

/// Error type for CRS256 operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// [`init`] was called with a mismatched version tag
    VersionMismatch,
    /// Invalid parameter values: zero counts, `k + m > 256`, or a block
    /// size that is not a multiple of 8 on a path that requires it
    InvalidParams,
    /// Slice lengths or block rows inconsistent with the parameters
    InvalidInput,
    /// The same row appeared twice in the decoder input
    DuplicateRow,
    /// Internal scratch allocation failed
    OutOfMemory,
    /// Singular bitmatrix; unreachable when the inputs pass validation,
    /// treated as a fatal bug signal
    Internal,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::VersionMismatch => write!(f, "library version mismatch"),
            Error::InvalidParams => write!(f, "invalid codec parameters"),
            Error::InvalidInput => write!(f, "invalid input"),
            Error::DuplicateRow => write!(f, "duplicate block row"),
            Error::OutOfMemory => write!(f, "scratch allocation failed"),
            Error::Internal => write!(f, "internal error: singular bitmatrix"),
        }
    }
}

impl std::error::Error for Error {}

/// Encoder/decoder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Number of original data blocks
    original_count: usize,
    /// Number of recovery blocks
    recovery_count: usize,
    /// Size of each block in bytes
    block_bytes: usize,
}

impl Params {
    /// Create new codec parameters.
    ///
    /// # Arguments
    /// * `original_count` - Number of original data blocks (>= 1)
    /// * `recovery_count` - Number of recovery blocks (>= 1)
    /// * `block_bytes` - Size of each block in bytes (> 0)
    ///
    /// # Errors
    /// Returns `Error::InvalidParams` if a count or the block size is
    /// zero, or if `original_count + recovery_count > 256`.
    pub fn new(
        original_count: usize,
        recovery_count: usize,
        block_bytes: usize,
    ) -> Result<Self, Error> {
        if original_count == 0 || recovery_count == 0 || block_bytes == 0 {
            return Err(Error::InvalidParams);
        }
        if original_count + recovery_count > 256 {
            return Err(Error::InvalidParams);
        }
        Ok(Self {
            original_count,
            recovery_count,
            block_bytes,
        })
    }

    #[inline]
    pub fn original_count(&self) -> usize {
        self.original_count
    }

    #[inline]
    pub fn recovery_count(&self) -> usize {
        self.recovery_count
    }

    #[inline]
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// Row index carried by recovery block `recovery_index` on the wire.
    #[inline]
    pub fn recovery_row(&self, recovery_index: usize) -> u8 {
        debug_assert!(recovery_index < self.recovery_count);
        (self.original_count + recovery_index) as u8
    }
}

/// A block descriptor handed to the decoder: a data buffer plus the row
/// it arrived as. Rows `0..k` are originals, `k..k + m` recovery.
///
/// The decoder mutates recovery buffers in place and rewrites `row` so
/// that on success every descriptor carries the original row whose
/// content its buffer now holds.
#[derive(Debug)]
pub struct Block<'a> {
    /// Block data
    pub data: &'a mut [u8],
    /// Block row index
    pub row: u8,
}

impl<'a> Block<'a> {
    #[inline]
    pub fn new(row: u8, data: &'a mut [u8]) -> Self {
        Self { data, row }
    }

    /// Check if this block arrived as an original
    #[inline]
    pub fn is_original(&self, params: &Params) -> bool {
        (self.row as usize) < params.original_count
    }
}

/// Reusable scratch for the codec: window tables, the decoder's
/// bitmatrix, and Cauchy matrix staging.
///
/// [`encode`] and [`decode`] allocate one per call; latency-sensitive
/// callers keep a `Workspace` alive and use [`encode_with`] /
/// [`decode_with`] so the hot path never touches the allocator. Buffers
/// grow on demand (through fallible reservation) and never shrink.
/// Access is exclusive: a workspace serves one call at a time.
pub struct Workspace {
    pub(crate) window: window::WindowPair,
    pub(crate) bitmatrix: Vec<u64>,
    pub(crate) matrix: Vec<u8>,
}

impl Workspace {
    /// An empty workspace; buffers are sized lazily by the first calls.
    pub fn new() -> Self {
        Self {
            window: window::WindowPair::new(),
            bitmatrix: Vec::new(),
            matrix: Vec::new(),
        }
    }

    /// A workspace with window scratch pre-sized for blocks up to
    /// `max_block_bytes`.
    pub fn with_block_bytes(max_block_bytes: usize) -> Result<Self, Error> {
        let mut workspace = Self::new();
        workspace.window.prepare((max_block_bytes + 7) / 8)?;
        Ok(workspace)
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode `k` original blocks into `m` recovery blocks.
///
/// `originals` supplies the `k` input blocks in row order, each
/// `block_bytes` long. `recovery_out` is one contiguous buffer of
/// `m * block_bytes` bytes and receives recovery rows `0..m` in order.
/// Output is deterministic and byte-identical across platforms.
///
/// # Errors
/// `Error::InvalidInput` for length mismatches; `Error::InvalidParams`
/// when `block_bytes` is not a multiple of 8 outside the degenerate
/// paths; `Error::OutOfMemory` if scratch allocation fails.
pub fn encode(params: &Params, originals: &[&[u8]], recovery_out: &mut [u8]) -> Result<(), Error> {
    let mut workspace = Workspace::new();
    encode::encode_blocks(params, originals, recovery_out, &mut workspace)
}

/// [`encode`] with caller-owned scratch.
pub fn encode_with(
    params: &Params,
    originals: &[&[u8]],
    recovery_out: &mut [u8],
    workspace: &mut Workspace,
) -> Result<(), Error> {
    encode::encode_blocks(params, originals, recovery_out, workspace)
}

/// Decode the original blocks from any `k` of the `k + m` blocks.
///
/// `blocks` supplies exactly `k` descriptors in any order. On success,
/// recovery buffers have been transformed in place into the erased
/// originals and every descriptor's `row` names the original row its
/// buffer holds; a caller that slots recovery blocks into the erased
/// positions gets `blocks[i].row == i` for all `i`.
///
/// # Errors
/// `Error::InvalidInput` / `Error::DuplicateRow` for malformed inputs;
/// `Error::InvalidParams` for a block size that is not a multiple of 8
/// when reconstruction is required; `Error::OutOfMemory` if scratch
/// allocation fails.
pub fn decode(params: &Params, blocks: &mut [Block]) -> Result<(), Error> {
    let mut workspace = Workspace::new();
    decode::decode_blocks(params, blocks, &mut workspace)
}

/// [`decode`] with caller-owned scratch.
pub fn decode_with(
    params: &Params,
    blocks: &mut [Block],
    workspace: &mut Workspace,
) -> Result<(), Error> {
    decode::decode_blocks(params, blocks, workspace)
}
