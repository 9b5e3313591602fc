use half::f16;

/// Elements covered by one k-quant super-block.
pub const QK_K: usize = 256;

/// Bytes of packed (scale, min) pairs in Q4_K / Q5_K super-blocks.
pub const K_SCALE_SIZE: usize = 12;

/// The 16 signed code points of the IQ4 non-linear codebook.
pub static KVALUES_IQ4NL: [i8; 16] = [
    -127, -104, -83, -65, -49, -35, -22, -10, 1, 13, 25, 38, 53, 69, 89, 113,
];

/// Quantization formats handled by this crate.
///
/// Discriminants are the GGML tensor-type IDs from the GGUF spec, so a raw
/// tag coming from a tensor header can be dispatched directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum QuantType {
    Q2K = 10,
    Q3K = 11,
    Q4K = 12,
    Q5K = 13,
    Q6K = 14,
    Q8K = 15,
    IQ4XS = 23,
}

impl QuantType {
    /// Convert a raw GGML type tag. Returns `None` for any tag this crate
    /// does not handle; callers are expected to fall back.
    pub fn from_raw(v: i32) -> Option<Self> {
        match v {
            10 => Some(Self::Q2K),
            11 => Some(Self::Q3K),
            12 => Some(Self::Q4K),
            13 => Some(Self::Q5K),
            14 => Some(Self::Q6K),
            15 => Some(Self::Q8K),
            23 => Some(Self::IQ4XS),
            _ => None,
        }
    }

    /// Elements per super-block. All supported formats share `QK_K`.
    pub const fn block_size(self) -> usize {
        QK_K
    }

    /// Bytes per super-block.
    pub const fn block_bytes(self) -> usize {
        match self {
            Self::Q2K => std::mem::size_of::<BlockQ2K>(),
            Self::Q3K => std::mem::size_of::<BlockQ3K>(),
            Self::Q4K => std::mem::size_of::<BlockQ4K>(),
            Self::Q5K => std::mem::size_of::<BlockQ5K>(),
            Self::Q6K => std::mem::size_of::<BlockQ6K>(),
            Self::Q8K => std::mem::size_of::<BlockQ8K>(),
            Self::IQ4XS => std::mem::size_of::<BlockIQ4XS>(),
        }
    }

    /// Bytes of one row of `n` elements. `n` must be a multiple of `QK_K`.
    pub const fn row_size(self, n: usize) -> usize {
        (n / QK_K) * self.block_bytes()
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Q2K => "q2_K",
            Self::Q3K => "q3_K",
            Self::Q4K => "q4_K",
            Self::Q5K => "q5_K",
            Self::Q6K => "q6_K",
            Self::Q8K => "q8_K",
            Self::IQ4XS => "iq4_xs",
        }
    }
}

// ==========================================================================
// Super-block structures (matching the on-disk GGUF layout)
// ==========================================================================

/// Q2_K: 2-bit quants with 4-bit sub-block scales and mins.
///
/// `scales[j]` packs the scale of sub-block `j` in the low nibble and its
/// min in the high nibble. 84 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockQ2K {
    pub scales: [u8; QK_K / 16],
    pub qs: [u8; QK_K / 4],
    pub d: f16,
    pub dmin: f16,
}

/// Q3_K: 3-bit quants (2 packed bits + 1 bit in `hmask`) with 16 packed
/// 6-bit scales biased by 32. 110 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockQ3K {
    pub hmask: [u8; QK_K / 8],
    pub qs: [u8; QK_K / 4],
    pub scales: [u8; K_SCALE_SIZE],
    pub d: f16,
}

/// Q4_K: 4-bit quants with 8 packed (6-bit scale, 6-bit min) pairs.
/// 144 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockQ4K {
    pub d: f16,
    pub dmin: f16,
    pub scales: [u8; K_SCALE_SIZE],
    pub qs: [u8; QK_K / 2],
}

/// Q5_K: 5-bit quants (4 packed bits + 1 bit in `qh`), scales as Q4_K.
/// 176 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockQ5K {
    pub d: f16,
    pub dmin: f16,
    pub scales: [u8; K_SCALE_SIZE],
    pub qh: [u8; QK_K / 8],
    pub qs: [u8; QK_K / 2],
}

/// Q6_K: 6-bit quants (4 bits in `ql` + 2 bits in `qh`) with signed 8-bit
/// sub-block scales. 210 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockQ6K {
    pub ql: [u8; QK_K / 2],
    pub qh: [u8; QK_K / 4],
    pub scales: [i8; QK_K / 16],
    pub d: f16,
}

/// IQ4_XS: 4-bit codebook indices into [`KVALUES_IQ4NL`] with 8 packed
/// 6-bit sub-block scales biased by 32. 136 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockIQ4XS {
    pub d: f16,
    pub scales_h: u16,
    pub scales_l: [u8; QK_K / 64],
    pub qs: [u8; QK_K / 2],
}

/// Q8_K: signed 8-bit quants with one f32 scale and 16 precomputed
/// sub-block sums. 292 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockQ8K {
    pub d: f32,
    pub qs: [i8; QK_K],
    pub bsums: [i16; QK_K / 16],
}

const _: () = assert!(std::mem::size_of::<BlockQ2K>() == 84);
const _: () = assert!(std::mem::size_of::<BlockQ3K>() == 110);
const _: () = assert!(std::mem::size_of::<BlockQ4K>() == 144);
const _: () = assert!(std::mem::size_of::<BlockQ5K>() == 176);
const _: () = assert!(std::mem::size_of::<BlockQ6K>() == 210);
const _: () = assert!(std::mem::size_of::<BlockIQ4XS>() == 136);
const _: () = assert!(std::mem::size_of::<BlockQ8K>() == 292);
