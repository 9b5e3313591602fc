//! AVX2 + FMA micro-kernels multiplying one block-quantized weight matrix
//! against up to eight Q8_K activation columns at once.
//!
//! Each family is monomorphized over `NRC_Y`, the number of columns held in
//! flight. Unpacking the weight-side quants is the expensive part of every
//! super-block, so the decoded registers are reused across all `NRC_Y`
//! columns before the next group is unpacked.
//!
//! Accumulation contract, shared by all families:
//!   * `maddubs` products are widened to 32 bits through `madd` against the
//!     broadcast sub-block scales, then summed per column.
//!   * block-level `d * d8` scaling happens in f32 via FMA, once per
//!     super-block, in increasing block order.
//!   * the final 256-bit accumulator is reduced through [`hsum_float_8`].

use std::arch::x86_64::*;

use super::{get_scale_shuffle_16, get_scale_shuffle_8, hsum_float_4, hsum_float_8, make_q4_scales, Q8Columns};
use crate::quant::{BlockIQ4XS, BlockQ2K, BlockQ3K, BlockQ4K, BlockQ5K, BlockQ6K, KVALUES_IQ4NL, QK_K};

// ==========================================================================
// q2_K
// ==========================================================================

/// Q2_K × Q8_K row panel.
///
/// Quants are four 2-bit planes per 32-byte half. At `NRC_Y <= 2` the odd
/// planes keep their in-byte weight (masked with 12 instead of shifted) and
/// land in a second integer accumulator that is folded back with a factor
/// of 0.25 at reduction time; at `NRC_Y >= 4` both planes share one
/// accumulator. Identical results, different register pressure.
///
/// # Safety
/// Caller must ensure AVX2 + FMA, `n % 256 == 0`, and the buffer geometry
/// documented on [`crate::cpu_kernels::mul_mat`].
#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn mul_mat_q2_k_q8_k<const NRC_Y: usize>(
    n: usize,
    s: *mut f32,
    bs: usize,
    vx: *const u8,
    bx: usize,
    vy: *const u8,
    by: usize,
    nrc_x: usize,
) {
    debug_assert!(n % QK_K == 0);
    let nb = n / QK_K;

    let m3 = _mm256_set1_epi8(3);
    let mc = _mm256_set1_epi8(12);
    let m4 = _mm_set1_epi8(0xF);

    let q8 = Q8Columns::<NRC_Y>::new(vy, by);

    let mut scales = [_mm256_setzero_si256(); 2];

    for ix in 0..nrc_x {
        let x = vx.add(ix * bx) as *const BlockQ2K;

        let mut accd = [_mm256_setzero_ps(); NRC_Y];
        // High-plane accumulators, live only when NRC_Y <= 2.
        let mut acch = [_mm256_setzero_ps(); NRC_Y];

        for i in 0..nb {
            let xb = &*x.add(i);
            let q2 = xb.qs.as_ptr();

            let d2 = xb.d.to_f32();
            let c2 = -xb.dmin.to_f32();

            {
                let mins_and_scales = _mm_loadu_si128(xb.scales.as_ptr() as *const __m128i);
                let scales8 = _mm_and_si128(mins_and_scales, m4);
                let mins8 = _mm_and_si128(_mm_srli_epi16(mins_and_scales, 4), m4);
                let mins = _mm256_cvtepi8_epi16(mins8);

                for iy in 0..NRC_Y {
                    let prod = _mm256_madd_epi16(mins, q8.bsums(iy, i));
                    accd[iy] = _mm256_fmadd_ps(
                        _mm256_set1_ps(c2 * q8.scale(iy, i)),
                        _mm256_cvtepi32_ps(prod),
                        accd[iy],
                    );
                }

                let all_scales = _mm256_cvtepi8_epi16(scales8);
                let l_scales = _mm256_extracti128_si256(all_scales, 0);
                let h_scales = _mm256_extracti128_si256(all_scales, 1);
                scales[0] = _mm256_set_m128i(l_scales, l_scales);
                scales[1] = _mm256_set_m128i(h_scales, h_scales);
            }

            let mut sumi = [_mm256_setzero_si256(); NRC_Y];
            let mut sumh = [_mm256_setzero_si256(); NRC_Y];

            for j in 0..QK_K / 128 {
                let mut q2bits = _mm256_loadu_si256(q2.add(32 * j) as *const __m256i);

                for l in 0..2 {
                    let scales_0 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(2 * l));
                    let scales_1 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(2 * l + 1));

                    let q2_0 = _mm256_and_si256(q2bits, m3);
                    let q2_1 = if NRC_Y <= 2 {
                        _mm256_and_si256(q2bits, mc)
                    } else {
                        _mm256_and_si256(_mm256_srli_epi16(q2bits, 2), m3)
                    };

                    for iy in 0..NRC_Y {
                        let p0 = _mm256_maddubs_epi16(q2_0, q8.quants(iy, i, 4 * j + 2 * l));
                        let p1 = _mm256_maddubs_epi16(q2_1, q8.quants(iy, i, 4 * j + 2 * l + 1));

                        if NRC_Y <= 2 {
                            sumi[iy] = _mm256_add_epi32(sumi[iy], _mm256_madd_epi16(scales_0, p0));
                            sumh[iy] = _mm256_add_epi32(sumh[iy], _mm256_madd_epi16(scales_1, p1));
                        } else {
                            sumi[iy] = _mm256_add_epi32(
                                sumi[iy],
                                _mm256_add_epi32(
                                    _mm256_madd_epi16(scales_0, p0),
                                    _mm256_madd_epi16(scales_1, p1),
                                ),
                            );
                        }
                    }

                    q2bits = _mm256_srli_epi16(q2bits, 4);
                }
            }

            for iy in 0..NRC_Y {
                let vd = _mm256_set1_ps(d2 * q8.scale(iy, i));
                accd[iy] = _mm256_fmadd_ps(vd, _mm256_cvtepi32_ps(sumi[iy]), accd[iy]);
                if NRC_Y <= 2 {
                    acch[iy] = _mm256_fmadd_ps(vd, _mm256_cvtepi32_ps(sumh[iy]), acch[iy]);
                }
            }
        }

        for iy in 0..NRC_Y {
            if NRC_Y <= 2 {
                *s.add(ix + iy * bs) = hsum_float_8(accd[iy]) + 0.25 * hsum_float_8(acch[iy]);
            } else {
                *s.add(ix + iy * bs) = hsum_float_8(accd[iy]);
            }
        }
    }
}

// ==========================================================================
// q3_K
// ==========================================================================

/// Q3_K × Q8_K row panel.
///
/// 16 signed 6-bit scales come out of the 12-byte bit-stealing layout; the
/// high bit of every quant is OR'd in from `hmask` so the integer path sees
/// unsigned 3-bit values, and the implied `-4` offset is restored per
/// super-block through the bsum correction.
///
/// # Safety
/// See [`mul_mat_q2_k_q8_k`].
#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn mul_mat_q3_k_q8_k<const NRC_Y: usize>(
    n: usize,
    s: *mut f32,
    bs: usize,
    vx: *const u8,
    bx: usize,
    vy: *const u8,
    by: usize,
    nrc_x: usize,
) {
    debug_assert!(n % QK_K == 0);
    let nb = n / QK_K;

    let q8 = Q8Columns::<NRC_Y>::new(vy, by);

    let m3l = _mm256_set1_epi8(0x03);
    let m32 = _mm_set1_epi8(32);
    let hml = _mm256_set1_epi8(0x04);

    let mut scales = [_mm256_setzero_si256(); 2];
    let mut hbits = [_mm256_setzero_si256(); 2];
    let mut vd = [_mm256_setzero_ps(); NRC_Y];

    for ix in 0..nrc_x {
        let x = vx.add(ix * bx) as *const BlockQ3K;

        let mut accd = [_mm256_setzero_ps(); NRC_Y];
        let mut accm = [_mm256_setzero_ps(); NRC_Y];

        for i in 0..nb {
            let xb = &*x.add(i);
            let d3 = xb.d.to_f32();
            let q3 = xb.qs.as_ptr();

            // Set up scales
            {
                let sc = &xb.scales;
                let a0 = u32::from_le_bytes([sc[0], sc[1], sc[2], sc[3]]);
                let a1 = u32::from_le_bytes([sc[4], sc[5], sc[6], sc[7]]);
                let a2 = u32::from_le_bytes([sc[8], sc[9], sc[10], sc[11]]);
                let scales128 = _mm_set_epi32(
                    (((a1 >> 4) & 0x0f0f0f0f) | ((a2 >> 2) & 0x30303030)) as i32,
                    (((a0 >> 4) & 0x0f0f0f0f) | (a2 & 0x30303030)) as i32,
                    ((a1 & 0x0f0f0f0f) | ((a2 << 2) & 0x30303030)) as i32,
                    ((a0 & 0x0f0f0f0f) | ((a2 << 4) & 0x30303030)) as i32,
                );
                let scales128 = _mm_sub_epi8(scales128, m32);
                let all_scales = _mm256_cvtepi8_epi16(scales128);
                for iy in 0..NRC_Y {
                    vd[iy] = _mm256_set1_ps(d3 * q8.scale(iy, i));
                    let prod = _mm256_madd_epi16(all_scales, q8.bsums(iy, i));
                    accm[iy] = _mm256_fmadd_ps(vd[iy], _mm256_cvtepi32_ps(prod), accm[iy]);
                }
                let l_scales = _mm256_extracti128_si256(all_scales, 0);
                let h_scales = _mm256_extracti128_si256(all_scales, 1);
                scales[0] = _mm256_set_m128i(l_scales, l_scales);
                scales[1] = _mm256_set_m128i(h_scales, h_scales);
            }

            // high bit
            hbits[0] = _mm256_loadu_si256(xb.hmask.as_ptr() as *const __m256i);
            hbits[1] = _mm256_srli_epi16(hbits[0], 4);

            let mut sumi = [_mm256_setzero_si256(); NRC_Y];

            for j in 0..QK_K / 128 {
                let scales_0 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(0));
                let scales_1 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(1));
                let scales_2 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(2));
                let scales_3 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(3));

                let q3bits = _mm256_loadu_si256(q3.add(32 * j) as *const __m256i);

                let q3h_0 = _mm256_and_si256(_mm256_slli_epi16(hbits[j], 2), hml);
                let q3h_1 = _mm256_and_si256(_mm256_slli_epi16(hbits[j], 1), hml);
                let q3h_2 = _mm256_and_si256(hbits[j], hml);
                let q3h_3 = _mm256_and_si256(_mm256_srli_epi16(hbits[j], 1), hml);

                let q3_0 = _mm256_or_si256(_mm256_and_si256(q3bits, m3l), q3h_0);
                let q3_1 = _mm256_or_si256(
                    _mm256_and_si256(_mm256_srli_epi16(q3bits, 2), m3l),
                    q3h_1,
                );
                let q3_2 = _mm256_or_si256(
                    _mm256_and_si256(_mm256_srli_epi16(q3bits, 4), m3l),
                    q3h_2,
                );
                let q3_3 = _mm256_or_si256(
                    _mm256_and_si256(_mm256_srli_epi16(q3bits, 6), m3l),
                    q3h_3,
                );

                for iy in 0..NRC_Y {
                    let p16_0 = _mm256_maddubs_epi16(q3_0, q8.quants(iy, i, 4 * j));
                    let p16_1 = _mm256_maddubs_epi16(q3_1, q8.quants(iy, i, 4 * j + 1));
                    let p16_2 = _mm256_maddubs_epi16(q3_2, q8.quants(iy, i, 4 * j + 2));
                    let p16_3 = _mm256_maddubs_epi16(q3_3, q8.quants(iy, i, 4 * j + 3));

                    let p16_0 = _mm256_madd_epi16(scales_0, p16_0);
                    let p16_1 = _mm256_madd_epi16(scales_1, p16_1);
                    let p16_2 = _mm256_madd_epi16(scales_2, p16_2);
                    let p16_3 = _mm256_madd_epi16(scales_3, p16_3);

                    sumi[iy] = _mm256_add_epi32(sumi[iy], _mm256_add_epi32(p16_0, p16_1));
                    sumi[iy] = _mm256_add_epi32(sumi[iy], _mm256_add_epi32(p16_2, p16_3));
                }
            }

            for iy in 0..NRC_Y {
                accd[iy] = _mm256_fmadd_ps(vd[iy], _mm256_cvtepi32_ps(sumi[iy]), accd[iy]);
            }
        }

        for iy in 0..NRC_Y {
            *s.add(ix + iy * bs) = hsum_float_8(accd[iy]) - 4.0 * hsum_float_8(accm[iy]);
        }
    }
}

// ==========================================================================
// q4_K
// ==========================================================================

/// Q4_K × Q8_K row panel.
///
/// At `NRC_Y <= 2` the high nibbles stay in place (mask `0xF0`) and feed a
/// second accumulator recombined with 1/16 at the end; at `NRC_Y >= 4` they
/// are shifted down and share the low accumulator. The min correction runs
/// through a 128-bit lane since Q4_K has eight sub-block mins against
/// sixteen bsums, folded pairwise with `hadd`.
///
/// # Safety
/// See [`mul_mat_q2_k_q8_k`].
#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn mul_mat_q4_k_q8_k<const NRC_Y: usize>(
    n: usize,
    s: *mut f32,
    bs: usize,
    vx: *const u8,
    bx: usize,
    vy: *const u8,
    by: usize,
    nrc_x: usize,
) {
    debug_assert!(n % QK_K == 0);
    let nb = n / QK_K;

    let q8 = Q8Columns::<NRC_Y>::new(vy, by);

    let ml = _mm256_set1_epi8(0x0F);
    let mh = _mm256_set1_epi8(-16);

    for ix in 0..nrc_x {
        let x = vx.add(ix * bx) as *const BlockQ4K;

        let mut accm = [_mm_setzero_ps(); NRC_Y];
        let mut accd = [_mm256_setzero_ps(); NRC_Y];
        let mut acch = [_mm256_setzero_ps(); NRC_Y];

        for i in 0..nb {
            let xb = &*x.add(i);
            let d = xb.d.to_f32();
            let c = -xb.dmin.to_f32();

            let q4 = xb.qs.as_ptr();

            let utmp = make_q4_scales(&xb.scales);
            let mins_and_scales = _mm256_cvtepu8_epi16(_mm_set_epi32(
                utmp[3] as i32,
                utmp[2] as i32,
                utmp[1] as i32,
                utmp[0] as i32,
            ));
            let mins = _mm256_extracti128_si256(mins_and_scales, 1);
            let sc128 = _mm256_extracti128_si256(mins_and_scales, 0);
            let scales = _mm256_set_m128i(sc128, sc128);
            for iy in 0..NRC_Y {
                let q8sums = q8.bsums(iy, i);
                let q8s = _mm_hadd_epi16(
                    _mm256_extracti128_si256(q8sums, 0),
                    _mm256_extracti128_si256(q8sums, 1),
                );
                let prod = _mm_madd_epi16(mins, q8s);
                accm[iy] = _mm_fmadd_ps(
                    _mm_set1_ps(c * q8.scale(iy, i)),
                    _mm_cvtepi32_ps(prod),
                    accm[iy],
                );
            }

            let mut sumi = [_mm256_setzero_si256(); NRC_Y];
            let mut sumh = [_mm256_setzero_si256(); NRC_Y];

            for j in 0..QK_K / 64 {
                let scales_l = _mm256_shuffle_epi8(scales, get_scale_shuffle_8(2 * j));
                let scales_h = _mm256_shuffle_epi8(scales, get_scale_shuffle_8(2 * j + 1));
                let q4bits = _mm256_loadu_si256(q4.add(32 * j) as *const __m256i);
                let q4l = _mm256_and_si256(q4bits, ml);
                let q4h = if NRC_Y <= 2 {
                    _mm256_and_si256(q4bits, mh)
                } else {
                    _mm256_and_si256(_mm256_srli_epi16(q4bits, 4), ml)
                };

                for iy in 0..NRC_Y {
                    let q8l = q8.quants(iy, i, 2 * j);
                    let q8h = q8.quants(iy, i, 2 * j + 1);
                    if NRC_Y <= 2 {
                        sumi[iy] = _mm256_add_epi32(
                            sumi[iy],
                            _mm256_madd_epi16(scales_l, _mm256_maddubs_epi16(q4l, q8l)),
                        );
                        sumh[iy] = _mm256_add_epi32(
                            sumh[iy],
                            _mm256_madd_epi16(scales_h, _mm256_maddubs_epi16(q4h, q8h)),
                        );
                    } else {
                        let pl = _mm256_madd_epi16(scales_l, _mm256_maddubs_epi16(q4l, q8l));
                        let ph = _mm256_madd_epi16(scales_h, _mm256_maddubs_epi16(q4h, q8h));
                        sumi[iy] = _mm256_add_epi32(sumi[iy], _mm256_add_epi32(pl, ph));
                    }
                }
            }

            for iy in 0..NRC_Y {
                let vd = _mm256_set1_ps(d * q8.scale(iy, i));
                accd[iy] = _mm256_fmadd_ps(vd, _mm256_cvtepi32_ps(sumi[iy]), accd[iy]);
                if NRC_Y <= 2 {
                    acch[iy] = _mm256_fmadd_ps(vd, _mm256_cvtepi32_ps(sumh[iy]), acch[iy]);
                }
            }
        }

        for iy in 0..NRC_Y {
            if NRC_Y <= 2 {
                *s.add(ix + iy * bs) = hsum_float_8(accd[iy])
                    + 0.0625 * hsum_float_8(acch[iy])
                    + hsum_float_4(accm[iy]);
            } else {
                let sum = _mm_add_ps(
                    _mm256_castps256_ps128(accd[iy]),
                    _mm256_extractf128_ps(accd[iy], 1),
                );
                *s.add(ix + iy * bs) = hsum_float_4(_mm_add_ps(sum, accm[iy]));
            }
        }
    }
}

// ==========================================================================
// q5_K
// ==========================================================================

/// Q5_K × Q8_K row panel. Scales and min correction as Q4_K; the fifth bit
/// comes from `qh`, one plane per 32-quant group, added (not OR'd) onto the
/// low nibbles. A single integer accumulator suffices for every `NRC_Y`.
///
/// # Safety
/// See [`mul_mat_q2_k_q8_k`].
#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn mul_mat_q5_k_q8_k<const NRC_Y: usize>(
    n: usize,
    s: *mut f32,
    bs: usize,
    vx: *const u8,
    bx: usize,
    vy: *const u8,
    by: usize,
    nrc_x: usize,
) {
    debug_assert!(n % QK_K == 0);
    let nb = n / QK_K;

    let q8 = Q8Columns::<NRC_Y>::new(vy, by);

    let ml = _mm256_set1_epi8(0x0F);
    let mh = _mm256_set1_epi8(0x10);

    for ix in 0..nrc_x {
        let mut accm = [_mm_setzero_ps(); NRC_Y];
        let mut accd = [_mm256_setzero_ps(); NRC_Y];

        let x = vx.add(ix * bx) as *const BlockQ5K;

        for i in 0..nb {
            let xb = &*x.add(i);
            let d = xb.d.to_f32();
            let c = -xb.dmin.to_f32();

            let q5 = xb.qs.as_ptr();

            let utmp = make_q4_scales(&xb.scales);
            let mins_and_scales = _mm256_cvtepu8_epi16(_mm_set_epi32(
                utmp[3] as i32,
                utmp[2] as i32,
                utmp[1] as i32,
                utmp[0] as i32,
            ));
            let mins = _mm256_extracti128_si256(mins_and_scales, 1);
            let sc128 = _mm256_extracti128_si256(mins_and_scales, 0);
            let scales = _mm256_set_m128i(sc128, sc128);
            for iy in 0..NRC_Y {
                let q8sums = q8.bsums(iy, i);
                let q8s = _mm_hadd_epi16(
                    _mm256_extracti128_si256(q8sums, 0),
                    _mm256_extracti128_si256(q8sums, 1),
                );
                let prod = _mm_madd_epi16(mins, q8s);
                accm[iy] = _mm_fmadd_ps(
                    _mm_set1_ps(c * q8.scale(iy, i)),
                    _mm_cvtepi32_ps(prod),
                    accm[iy],
                );
            }

            let mut hbits = [_mm256_setzero_si256(); 2];
            hbits[0] = _mm256_loadu_si256(xb.qh.as_ptr() as *const __m256i);
            hbits[1] = _mm256_srli_epi16(hbits[0], 4);

            let mut sumi = [_mm256_setzero_si256(); NRC_Y];

            for j in 0..QK_K / 128 {
                let scales_1 = _mm256_shuffle_epi8(scales, get_scale_shuffle_8(4 * j));
                let scales_2 = _mm256_shuffle_epi8(scales, get_scale_shuffle_8(4 * j + 1));
                let scales_3 = _mm256_shuffle_epi8(scales, get_scale_shuffle_8(4 * j + 2));
                let scales_4 = _mm256_shuffle_epi8(scales, get_scale_shuffle_8(4 * j + 3));

                let q5h_1 = _mm256_and_si256(_mm256_slli_epi16(hbits[j], 4), mh);
                let q5h_2 = _mm256_and_si256(_mm256_slli_epi16(hbits[j], 3), mh);
                let q5h_3 = _mm256_and_si256(_mm256_slli_epi16(hbits[j], 2), mh);
                let q5h_4 = _mm256_and_si256(_mm256_slli_epi16(hbits[j], 1), mh);

                let q5bits = _mm256_loadu_si256(q5.add(64 * j) as *const __m256i);
                let q5_1 = _mm256_add_epi8(_mm256_and_si256(q5bits, ml), q5h_1);
                let q5_2 = _mm256_add_epi8(
                    _mm256_and_si256(_mm256_srli_epi16(q5bits, 4), ml),
                    q5h_2,
                );

                let q5bits = _mm256_loadu_si256(q5.add(64 * j + 32) as *const __m256i);
                let q5_3 = _mm256_add_epi8(_mm256_and_si256(q5bits, ml), q5h_3);
                let q5_4 = _mm256_add_epi8(
                    _mm256_and_si256(_mm256_srli_epi16(q5bits, 4), ml),
                    q5h_4,
                );

                for iy in 0..NRC_Y {
                    let p1 = _mm256_madd_epi16(
                        scales_1,
                        _mm256_maddubs_epi16(q5_1, q8.quants(iy, i, 4 * j)),
                    );
                    let p2 = _mm256_madd_epi16(
                        scales_2,
                        _mm256_maddubs_epi16(q5_2, q8.quants(iy, i, 4 * j + 1)),
                    );
                    let p3 = _mm256_madd_epi16(
                        scales_3,
                        _mm256_maddubs_epi16(q5_3, q8.quants(iy, i, 4 * j + 2)),
                    );
                    let p4 = _mm256_madd_epi16(
                        scales_4,
                        _mm256_maddubs_epi16(q5_4, q8.quants(iy, i, 4 * j + 3)),
                    );
                    sumi[iy] = _mm256_add_epi32(sumi[iy], _mm256_add_epi32(p1, p3));
                    sumi[iy] = _mm256_add_epi32(sumi[iy], _mm256_add_epi32(p2, p4));
                }
            }

            for iy in 0..NRC_Y {
                let vd = _mm256_set1_ps(d * q8.scale(iy, i));
                accd[iy] = _mm256_fmadd_ps(vd, _mm256_cvtepi32_ps(sumi[iy]), accd[iy]);
            }
        }

        for iy in 0..NRC_Y {
            let sum = _mm_add_ps(
                _mm256_castps256_ps128(accd[iy]),
                _mm256_extractf128_ps(accd[iy], 1),
            );
            *s.add(ix + iy * bs) = hsum_float_4(_mm_add_ps(sum, accm[iy]));
        }
    }
}

// ==========================================================================
// q6_K
// ==========================================================================

/// Q6_K × Q8_K row panel. Scales are raw signed bytes; the two `qh` bits
/// lift each nibble to a 6-bit unsigned quant and the implied `-32` offset
/// is restored per super-block through the bsum correction.
///
/// # Safety
/// See [`mul_mat_q2_k_q8_k`].
#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn mul_mat_q6_k_q8_k<const NRC_Y: usize>(
    n: usize,
    s: *mut f32,
    bs: usize,
    vx: *const u8,
    bx: usize,
    vy: *const u8,
    by: usize,
    nrc_x: usize,
) {
    debug_assert!(n % QK_K == 0);
    let nb = n / QK_K;

    let m4 = _mm256_set1_epi8(0xF);
    let mh = _mm256_set1_epi8(0x30);

    let q8 = Q8Columns::<NRC_Y>::new(vy, by);

    let mut scales = [_mm256_setzero_si256(); 2];
    let mut vd = [_mm256_setzero_ps(); NRC_Y];

    for ix in 0..nrc_x {
        let x = vx.add(ix * bx) as *const BlockQ6K;

        let mut accm = [_mm256_setzero_ps(); NRC_Y];
        let mut accd = [_mm256_setzero_ps(); NRC_Y];

        for i in 0..nb {
            let xb = &*x.add(i);
            let d6 = xb.d.to_f32();

            let ql = xb.ql.as_ptr();
            let qh = xb.qh.as_ptr();

            let scales8 = _mm_loadu_si128(xb.scales.as_ptr() as *const __m128i);
            let scales16 = _mm256_cvtepi8_epi16(scales8);
            let l_scales = _mm256_castsi256_si128(scales16);
            let h_scales = _mm256_extracti128_si256(scales16, 1);
            scales[0] = _mm256_set_m128i(l_scales, l_scales);
            scales[1] = _mm256_set_m128i(h_scales, h_scales);

            for iy in 0..NRC_Y {
                vd[iy] = _mm256_set1_ps(d6 * q8.scale(iy, i));
                let prod = _mm256_madd_epi16(scales16, q8.bsums(iy, i));
                accm[iy] = _mm256_fmadd_ps(vd[iy], _mm256_cvtepi32_ps(prod), accm[iy]);
            }

            let mut sumi = [_mm256_setzero_si256(); NRC_Y];

            for j in 0..QK_K / 128 {
                let scale_0 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(0));
                let scale_1 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(1));
                let scale_2 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(2));
                let scale_3 = _mm256_shuffle_epi8(scales[j], get_scale_shuffle_16(3));

                let q6bits_1 = _mm256_loadu_si256(ql.add(64 * j) as *const __m256i);
                let q6bits_2 = _mm256_loadu_si256(ql.add(64 * j + 32) as *const __m256i);
                let q6bits_h = _mm256_loadu_si256(qh.add(32 * j) as *const __m256i);

                let q6h_0 = _mm256_and_si256(_mm256_slli_epi16(q6bits_h, 4), mh);
                let q6h_1 = _mm256_and_si256(_mm256_slli_epi16(q6bits_h, 2), mh);
                let q6h_2 = _mm256_and_si256(q6bits_h, mh);
                let q6h_3 = _mm256_and_si256(_mm256_srli_epi16(q6bits_h, 2), mh);

                let q6_0 = _mm256_or_si256(_mm256_and_si256(q6bits_1, m4), q6h_0);
                let q6_1 = _mm256_or_si256(_mm256_and_si256(q6bits_2, m4), q6h_1);
                let q6_2 = _mm256_or_si256(
                    _mm256_and_si256(_mm256_srli_epi16(q6bits_1, 4), m4),
                    q6h_2,
                );
                let q6_3 = _mm256_or_si256(
                    _mm256_and_si256(_mm256_srli_epi16(q6bits_2, 4), m4),
                    q6h_3,
                );

                for iy in 0..NRC_Y {
                    let p16_0 = _mm256_maddubs_epi16(q6_0, q8.quants(iy, i, 4 * j));
                    let p16_1 = _mm256_maddubs_epi16(q6_1, q8.quants(iy, i, 4 * j + 1));
                    let p16_2 = _mm256_maddubs_epi16(q6_2, q8.quants(iy, i, 4 * j + 2));
                    let p16_3 = _mm256_maddubs_epi16(q6_3, q8.quants(iy, i, 4 * j + 3));

                    let p16_0 = _mm256_madd_epi16(scale_0, p16_0);
                    let p16_1 = _mm256_madd_epi16(scale_1, p16_1);
                    let p16_2 = _mm256_madd_epi16(scale_2, p16_2);
                    let p16_3 = _mm256_madd_epi16(scale_3, p16_3);

                    sumi[iy] = _mm256_add_epi32(
                        sumi[iy],
                        _mm256_add_epi32(
                            _mm256_add_epi32(p16_0, p16_1),
                            _mm256_add_epi32(p16_2, p16_3),
                        ),
                    );
                }
            }

            for iy in 0..NRC_Y {
                accd[iy] = _mm256_fmadd_ps(vd[iy], _mm256_cvtepi32_ps(sumi[iy]), accd[iy]);
            }
        }

        for iy in 0..NRC_Y {
            *s.add(ix + iy * bs) = hsum_float_8(accd[iy]) - 32.0 * hsum_float_8(accm[iy]);
        }
    }
}

// ==========================================================================
// iq4_xs
// ==========================================================================

static K_SHUFFLE_IQ4: [u8; 16] = [0, 4, 1, 5, 2, 6, 3, 7, 0, 4, 1, 5, 2, 6, 3, 7];

/// Signed i8 × signed i8 dot through `maddubs`, which wants its left
/// operand unsigned: both operands are sign-flipped by the left one's sign,
/// leaving the products unchanged.
#[inline(always)]
unsafe fn mul_signed_maddubs(x: __m256i, y: __m256i) -> __m256i {
    let ux = _mm256_sign_epi8(x, x);
    let sy = _mm256_sign_epi8(y, x);
    _mm256_maddubs_epi16(ux, sy)
}

/// IQ4_XS × Q8_K row panel. Nibbles index the non-linear codebook via
/// PSHUFB, scales are eight 6-bit values split over `scales_l`/`scales_h`,
/// and there is no min correction.
///
/// # Safety
/// See [`mul_mat_q2_k_q8_k`].
#[target_feature(enable = "avx2,fma")]
pub(crate) unsafe fn mul_mat_iq4_xs_q8_k<const NRC_Y: usize>(
    n: usize,
    s: *mut f32,
    bs: usize,
    vx: *const u8,
    bx: usize,
    vy: *const u8,
    by: usize,
    nrc_x: usize,
) {
    debug_assert!(n % QK_K == 0);
    let nb = n / QK_K;

    let values128 = _mm_loadu_si128(KVALUES_IQ4NL.as_ptr() as *const __m128i);
    let values = _mm256_set_m128i(values128, values128);

    let hshift = _mm_set_epi32(12, 8, 4, 0);
    let lshift = _mm_set_epi32(4, 0, 4, 0);
    let hmask = _mm_set1_epi16(0x03);
    let lmask = _mm_set1_epi8(0xF);
    let lshuffle = _mm_loadu_si128(K_SHUFFLE_IQ4.as_ptr() as *const __m128i);
    let m32 = _mm_set1_epi16(-32);
    let m4 = _mm256_set1_epi8(0xF);

    let q8 = Q8Columns::<NRC_Y>::new(vy, by);

    for ix in 0..nrc_x {
        let x = vx.add(ix * bx) as *const BlockIQ4XS;

        let mut accd = [_mm256_setzero_ps(); NRC_Y];

        for i in 0..nb {
            let xb = &*x.add(i);
            let qs = xb.qs.as_ptr();

            let tmp32 = xb.scales_h as u32 | ((xb.scales_h as u32) << 14);
            let sh = _mm_slli_epi16(
                _mm_and_si128(_mm_srlv_epi32(_mm_set1_epi32(tmp32 as i32), hshift), hmask),
                4,
            );
            let sl32 = u32::from_le_bytes(xb.scales_l);
            let sl = _mm_and_si128(
                _mm_srlv_epi32(_mm_set1_epi32(sl32 as i32), lshift),
                lmask,
            );
            let scales128 = _mm_add_epi16(
                _mm_or_si128(sh, _mm_cvtepi8_epi16(_mm_shuffle_epi8(sl, lshuffle))),
                m32,
            );
            let scales = _mm256_set_m128i(scales128, scales128);

            let mut sumi = [_mm256_setzero_si256(); NRC_Y];

            for j in 0..QK_K / 64 {
                let aux_1 = _mm_loadu_si128(qs.add(32 * j) as *const __m128i);
                let q4b_1 = _mm256_shuffle_epi8(
                    values,
                    _mm256_and_si256(m4, _mm256_set_m128i(_mm_srli_epi16(aux_1, 4), aux_1)),
                );
                let aux_2 = _mm_loadu_si128(qs.add(32 * j + 16) as *const __m128i);
                let q4b_2 = _mm256_shuffle_epi8(
                    values,
                    _mm256_and_si256(m4, _mm256_set_m128i(_mm_srli_epi16(aux_2, 4), aux_2)),
                );
                let scales_1 = _mm256_shuffle_epi8(scales, get_scale_shuffle_8(2 * j));
                let scales_2 = _mm256_shuffle_epi8(scales, get_scale_shuffle_8(2 * j + 1));
                for iy in 0..NRC_Y {
                    let p16_1 = mul_signed_maddubs(q4b_1, q8.quants(iy, i, 2 * j));
                    let p16_2 = mul_signed_maddubs(q4b_2, q8.quants(iy, i, 2 * j + 1));
                    let p_1 = _mm256_madd_epi16(p16_1, scales_1);
                    let p_2 = _mm256_madd_epi16(p16_2, scales_2);
                    sumi[iy] = _mm256_add_epi32(_mm256_add_epi32(p_1, p_2), sumi[iy]);
                }
            }

            for iy in 0..NRC_Y {
                let vd = _mm256_set1_ps(xb.d.to_f32() * q8.scale(iy, i));
                accd[iy] = _mm256_fmadd_ps(vd, _mm256_cvtepi32_ps(sumi[iy]), accd[iy]);
            }
        }

        for iy in 0..NRC_Y {
            *s.add(ix + iy * bs) = hsum_float_8(accd[iy]);
        }
    }
}
