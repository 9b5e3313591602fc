//! kquant-kernels: AVX2 + FMA matrix-multiplication micro-kernels for
//! k-quant and IQ4_XS weights against Q8_K activations.
//!
//! The entry point is [`mul_mat`]: it dispatches on the GGML tensor-type
//! tag, slices the weight rows across the caller's worker threads, and
//! peels the activation columns greedily by 8/4/2/1 so the expensive
//! weight unpacking is amortized over as many columns as possible. This is
//! what makes prompt processing 1.5-3x faster than a one-column-at-a-time
//! vector dot.

pub mod cpu_kernels;
pub mod quant;

#[cfg(target_arch = "x86_64")]
pub use cpu_kernels::{mul_mat, mul_mat_threaded};
pub use cpu_kernels::{is_avx2_available, MulMatFn};
pub use quant::{
    BlockIQ4XS, BlockQ2K, BlockQ3K, BlockQ4K, BlockQ5K, BlockQ6K, BlockQ8K, QuantType,
    KVALUES_IQ4NL, QK_K,
};
