//! CPU execution layer: runtime ISA detection, the `mul_mat` dispatch /
//! tiling shim, and a rayon driver mirroring how a tensor engine fans the
//! kernel out over its worker threads.

#[cfg(target_arch = "x86_64")]
pub(crate) mod avx2;
pub mod scalar;

use crate::quant::{QuantType, QK_K};

/// Shape of every micro-kernel: one weight-row slice against a fixed batch
/// of Q8_K columns.
///
/// `n` is the contracted dimension, `s`/`bs` the output base and column
/// stride, `vx`/`bx` the weight-row base and stride, `vy`/`by` the
/// activation-column base and stride, `nrc_x` the number of weight rows.
pub type MulMatFn = unsafe fn(
    n: usize,
    s: *mut f32,
    bs: usize,
    vx: *const u8,
    bx: usize,
    vy: *const u8,
    by: usize,
    nrc_x: usize,
);

/// Whether the vectorized path can run on this machine.
#[inline]
pub fn is_avx2_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Greedy column peeling: run the widest kernel that still fits, advancing
/// the activation base by `step * by` and the output base by `step * bs`
/// after each batch. Column order is preserved.
#[cfg(target_arch = "x86_64")]
unsafe fn mul_mat_nxm(
    n: usize,
    mut s: *mut f32,
    bs: usize,
    vx: *const u8,
    bx: usize,
    mut vy: *const u8,
    by: usize,
    nrc_x: usize,
    mut nrc_y: usize,
    funcs: &[MulMatFn; 4],
) {
    for (idx, step) in [(3usize, 8usize), (2, 4), (1, 2), (0, 1)] {
        if nrc_y < step {
            continue;
        }
        let n_step = nrc_y / step;
        for iy in 0..n_step {
            funcs[idx](
                n,
                s.add(step * iy * bs),
                bs,
                vx,
                bx,
                vy.add(step * iy * by),
                by,
                nrc_x,
            );
        }
        nrc_y -= step * n_step;
        if nrc_y == 0 {
            return;
        }
        vy = vy.add(step * n_step * by);
        s = s.add(step * n_step * bs);
    }
}

/// Multiply a block-quantized weight matrix `A` (`nx` rows of `ne00`
/// elements, format `type_a`) by `ny` Q8_K activation columns `B`, writing
/// `C[ix + iy * stride_c] = (A · Bᵀ)[ix, iy]` for this worker's row slice.
///
/// Worker `ith` of `nth` handles rows `[ith * ceil(nx / nth), ...)`; row
/// slices are disjoint, so concurrent workers never write the same output
/// element. `C` is overwritten, not accumulated, and never read.
///
/// Returns `false` (without touching `C`) if `type_a` is not one of the six
/// supported formats; the caller is expected to fall back.
///
/// # Safety
/// * AVX2 and FMA must be available (see [`is_avx2_available`]).
/// * `a` must hold `nx` rows of `QuantType::row_size(ne00)` bytes, `b` must
///   hold `ny` rows of `QuantType::Q8K.row_size(ne00)` bytes, and `c` must
///   be writable for `nx + (ny - 1) * stride_c` floats.
/// * `a` and `b` must be aligned for their block layouts (2 and 4 bytes);
///   misaligned operands are undefined behavior, not a detected error.
/// * `ne00` must be a multiple of 256 (debug-asserted).
#[cfg(target_arch = "x86_64")]
#[allow(clippy::too_many_arguments)]
pub unsafe fn mul_mat(
    nx: usize,
    ny: usize,
    ne00: usize,
    type_a: i32,
    a: *const u8,
    b: *const u8,
    c: *mut f32,
    stride_c: usize,
    ith: usize,
    nth: usize,
) -> bool {
    use avx2::kernels as k;

    debug_assert!(ne00 % QK_K == 0);

    let ty = match QuantType::from_raw(type_a) {
        Some(ty) => ty,
        None => {
            log::trace!("mul_mat: unhandled tensor type {type_a}");
            return false;
        }
    };

    let funcs: [MulMatFn; 4] = match ty {
        QuantType::Q2K => [
            k::mul_mat_q2_k_q8_k::<1>,
            k::mul_mat_q2_k_q8_k::<2>,
            k::mul_mat_q2_k_q8_k::<4>,
            k::mul_mat_q2_k_q8_k::<8>,
        ],
        QuantType::Q3K => [
            k::mul_mat_q3_k_q8_k::<1>,
            k::mul_mat_q3_k_q8_k::<2>,
            k::mul_mat_q3_k_q8_k::<4>,
            k::mul_mat_q3_k_q8_k::<8>,
        ],
        QuantType::Q4K => [
            k::mul_mat_q4_k_q8_k::<1>,
            k::mul_mat_q4_k_q8_k::<2>,
            k::mul_mat_q4_k_q8_k::<4>,
            k::mul_mat_q4_k_q8_k::<8>,
        ],
        QuantType::Q5K => [
            k::mul_mat_q5_k_q8_k::<1>,
            k::mul_mat_q5_k_q8_k::<2>,
            k::mul_mat_q5_k_q8_k::<4>,
            k::mul_mat_q5_k_q8_k::<8>,
        ],
        QuantType::Q6K => [
            k::mul_mat_q6_k_q8_k::<1>,
            k::mul_mat_q6_k_q8_k::<2>,
            k::mul_mat_q6_k_q8_k::<4>,
            k::mul_mat_q6_k_q8_k::<8>,
        ],
        QuantType::IQ4XS => [
            k::mul_mat_iq4_xs_q8_k::<1>,
            k::mul_mat_iq4_xs_q8_k::<2>,
            k::mul_mat_iq4_xs_q8_k::<4>,
            k::mul_mat_iq4_xs_q8_k::<8>,
        ],
        QuantType::Q8K => {
            log::trace!("mul_mat: q8_K is an activation format, not a weight format");
            return false;
        }
    };

    let row_size_qx = ty.row_size(ne00);
    let row_size_q8 = QuantType::Q8K.row_size(ne00);

    let mut nrc_x = (nx + nth - 1) / nth;
    let first_x = ith * nrc_x;
    if first_x >= nx {
        return true;
    }
    if first_x + nrc_x > nx {
        nrc_x = nx - first_x;
    }

    mul_mat_nxm(
        ne00,
        c.add(first_x),
        stride_c,
        a.add(row_size_qx * first_x),
        row_size_qx,
        b,
        row_size_q8,
        nrc_x,
        ny,
        &funcs,
    );

    true
}

/// Safe slice-front driver that fans [`mul_mat`] out over `nth` rayon
/// workers, one `(ith, nth)` invocation each, the way the surrounding
/// tensor engine drives the kernel during prompt processing.
///
/// # Panics
/// Panics if AVX2+FMA is unavailable, `ne00` is not a multiple of 256, or
/// any buffer is smaller than the geometry implies.
#[cfg(target_arch = "x86_64")]
#[allow(clippy::too_many_arguments)]
pub fn mul_mat_threaded(
    nx: usize,
    ny: usize,
    ne00: usize,
    type_a: i32,
    a: &[u8],
    b: &[u8],
    c: &mut [f32],
    stride_c: usize,
    nth: usize,
) -> bool {
    use rayon::prelude::*;

    assert!(is_avx2_available(), "mul_mat requires AVX2 + FMA");
    assert_eq!(ne00 % QK_K, 0, "ne00 must be a multiple of {QK_K}");
    assert!(nth >= 1 && ny >= 1);

    let ty = match QuantType::from_raw(type_a) {
        Some(ty) if ty != QuantType::Q8K => ty,
        _ => return false,
    };
    assert!(a.len() >= nx * ty.row_size(ne00));
    assert!(b.len() >= ny * QuantType::Q8K.row_size(ne00));
    assert!(c.len() >= nx + (ny - 1) * stride_c);

    log::debug!(
        "mul_mat_threaded: {} {}x{}x{} over {} workers",
        ty.name(),
        nx,
        ny,
        ne00,
        nth
    );

    // Workers write disjoint row slices of every output column, so handing
    // each one the same raw output pointer is race-free.
    let a_ptr = a.as_ptr() as usize;
    let b_ptr = b.as_ptr() as usize;
    let c_ptr = c.as_mut_ptr() as usize;

    (0..nth)
        .into_par_iter()
        .map(|ith| unsafe {
            mul_mat(
                nx,
                ny,
                ne00,
                type_a,
                a_ptr as *const u8,
                b_ptr as *const u8,
                c_ptr as *mut f32,
                stride_c,
                ith,
                nth,
            )
        })
        .reduce(|| true, |lhs, rhs| lhs && rhs)
}
