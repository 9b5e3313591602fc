//! AVX2 kernel tests: agreement with the scalar reference and equivalence
//! across the four column-batch widths. Skipped at runtime on machines
//! without AVX2 + FMA.

use half::f16;

use super::kernels;
use crate::cpu_kernels::{is_avx2_available, scalar, MulMatFn};
use crate::quant::{
    BlockIQ4XS, BlockQ2K, BlockQ3K, BlockQ4K, BlockQ5K, BlockQ6K, BlockQ8K, QuantType, QK_K,
};

/// Deterministic generator so every run sees the same operands.
struct Lcg(u64);

impl Lcg {
    fn byte(&mut self) -> u8 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 33) as u8
    }

    fn fill(&mut self, out: &mut [u8]) {
        for b in out {
            *b = self.byte();
        }
    }

    /// Power-of-two block deltas keep the scale folds exact, so the
    /// comparisons below measure decode fidelity rather than float noise.
    fn small_f16(&mut self) -> f16 {
        f16::from_f32(f32::exp2(-(8 + (self.byte() % 4) as i32) as f32))
    }
}

fn push_block<T: Copy>(row: &mut Vec<u8>, block: &T) {
    let bytes = unsafe {
        std::slice::from_raw_parts(block as *const T as *const u8, std::mem::size_of::<T>())
    };
    row.extend_from_slice(bytes);
}

/// One weight row of `nb` super-blocks with pseudo-random quants and small
/// positive block scales.
fn make_row(ty: QuantType, nb: usize, rng: &mut Lcg) -> Vec<u8> {
    let mut row = Vec::with_capacity(nb * ty.block_bytes());
    for _ in 0..nb {
        match ty {
            QuantType::Q2K => {
                let mut b = BlockQ2K {
                    scales: [0; 16],
                    qs: [0; 64],
                    d: rng.small_f16(),
                    dmin: rng.small_f16(),
                };
                rng.fill(&mut b.scales);
                rng.fill(&mut b.qs);
                push_block(&mut row, &b);
            }
            QuantType::Q3K => {
                let mut b = BlockQ3K {
                    hmask: [0; 32],
                    qs: [0; 64],
                    scales: [0; 12],
                    d: rng.small_f16(),
                };
                rng.fill(&mut b.hmask);
                rng.fill(&mut b.qs);
                rng.fill(&mut b.scales);
                push_block(&mut row, &b);
            }
            QuantType::Q4K => {
                let mut b = BlockQ4K {
                    d: rng.small_f16(),
                    dmin: rng.small_f16(),
                    scales: [0; 12],
                    qs: [0; 128],
                };
                rng.fill(&mut b.scales);
                rng.fill(&mut b.qs);
                push_block(&mut row, &b);
            }
            QuantType::Q5K => {
                let mut b = BlockQ5K {
                    d: rng.small_f16(),
                    dmin: rng.small_f16(),
                    scales: [0; 12],
                    qh: [0; 32],
                    qs: [0; 128],
                };
                rng.fill(&mut b.scales);
                rng.fill(&mut b.qh);
                rng.fill(&mut b.qs);
                push_block(&mut row, &b);
            }
            QuantType::Q6K => {
                let mut b = BlockQ6K {
                    ql: [0; 128],
                    qh: [0; 64],
                    scales: [0; 16],
                    d: rng.small_f16(),
                };
                rng.fill(&mut b.ql);
                rng.fill(&mut b.qh);
                for sc in b.scales.iter_mut() {
                    *sc = (rng.byte() % 64) as i8 - 32;
                }
                push_block(&mut row, &b);
            }
            QuantType::IQ4XS => {
                let mut b = BlockIQ4XS {
                    d: rng.small_f16(),
                    scales_h: 0,
                    scales_l: [0; 4],
                    qs: [0; 128],
                };
                b.scales_h = ((rng.byte() as u16) << 8) | rng.byte() as u16;
                rng.fill(&mut b.scales_l);
                rng.fill(&mut b.qs);
                push_block(&mut row, &b);
            }
            QuantType::Q8K => unreachable!("q8_K rows are built by make_q8_columns"),
        }
    }
    row
}

fn make_a(ty: QuantType, nx: usize, nb: usize, rng: &mut Lcg) -> Vec<u8> {
    let mut a = Vec::with_capacity(nx * nb * ty.block_bytes());
    for _ in 0..nx {
        a.extend_from_slice(&make_row(ty, nb, rng));
    }
    a
}

/// `ny` activation columns with quants in [-63, 63] so no format's 16-bit
/// maddubs intermediate can saturate, and bsums consistent with the quants.
fn make_q8_columns(ny: usize, nb: usize, rng: &mut Lcg) -> Vec<BlockQ8K> {
    let mut cols = Vec::with_capacity(ny * nb);
    for _ in 0..ny * nb {
        let mut qs = [0i8; QK_K];
        for q in qs.iter_mut() {
            *q = (rng.byte() % 127) as i8 - 63;
        }
        let mut bsums = [0i16; QK_K / 16];
        for (sum, group) in bsums.iter_mut().zip(qs.chunks_exact(16)) {
            *sum = group.iter().map(|&q| q as i16).sum();
        }
        cols.push(BlockQ8K {
            d: f32::exp2(-(6 + (rng.byte() % 4) as i32) as f32),
            qs,
            bsums,
        });
    }
    cols
}

fn q8_bytes(cols: &[BlockQ8K]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            cols.as_ptr() as *const u8,
            cols.len() * std::mem::size_of::<BlockQ8K>(),
        )
    }
}

fn kernel_for(ty: QuantType, nrc_y: usize) -> MulMatFn {
    let idx = match nrc_y {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => panic!("unsupported column batch {nrc_y}"),
    };
    let funcs: [MulMatFn; 4] = match ty {
        QuantType::Q2K => [
            kernels::mul_mat_q2_k_q8_k::<1>,
            kernels::mul_mat_q2_k_q8_k::<2>,
            kernels::mul_mat_q2_k_q8_k::<4>,
            kernels::mul_mat_q2_k_q8_k::<8>,
        ],
        QuantType::Q3K => [
            kernels::mul_mat_q3_k_q8_k::<1>,
            kernels::mul_mat_q3_k_q8_k::<2>,
            kernels::mul_mat_q3_k_q8_k::<4>,
            kernels::mul_mat_q3_k_q8_k::<8>,
        ],
        QuantType::Q4K => [
            kernels::mul_mat_q4_k_q8_k::<1>,
            kernels::mul_mat_q4_k_q8_k::<2>,
            kernels::mul_mat_q4_k_q8_k::<4>,
            kernels::mul_mat_q4_k_q8_k::<8>,
        ],
        QuantType::Q5K => [
            kernels::mul_mat_q5_k_q8_k::<1>,
            kernels::mul_mat_q5_k_q8_k::<2>,
            kernels::mul_mat_q5_k_q8_k::<4>,
            kernels::mul_mat_q5_k_q8_k::<8>,
        ],
        QuantType::Q6K => [
            kernels::mul_mat_q6_k_q8_k::<1>,
            kernels::mul_mat_q6_k_q8_k::<2>,
            kernels::mul_mat_q6_k_q8_k::<4>,
            kernels::mul_mat_q6_k_q8_k::<8>,
        ],
        QuantType::IQ4XS => [
            kernels::mul_mat_iq4_xs_q8_k::<1>,
            kernels::mul_mat_iq4_xs_q8_k::<2>,
            kernels::mul_mat_iq4_xs_q8_k::<4>,
            kernels::mul_mat_iq4_xs_q8_k::<8>,
        ],
        QuantType::Q8K => panic!("q8_K has no weight-side kernel"),
    };
    funcs[idx]
}

const FORMATS: [QuantType; 6] = [
    QuantType::Q2K,
    QuantType::Q3K,
    QuantType::Q4K,
    QuantType::Q5K,
    QuantType::Q6K,
    QuantType::IQ4XS,
];

fn run_kernel(
    ty: QuantType,
    nrc_y: usize,
    a: &[u8],
    b: &[BlockQ8K],
    nx: usize,
    ne00: usize,
) -> Vec<f32> {
    let nb = ne00 / QK_K;
    let mut c = vec![0.0f32; nx * nrc_y];
    unsafe {
        kernel_for(ty, nrc_y)(
            ne00,
            c.as_mut_ptr(),
            nx,
            a.as_ptr(),
            ty.row_size(ne00),
            b.as_ptr() as *const u8,
            nb * std::mem::size_of::<BlockQ8K>(),
            nx,
        );
    }
    c
}

#[test]
fn kernels_agree_with_scalar_reference() {
    if !is_avx2_available() {
        println!("Skipping AVX2 kernel test: AVX2+FMA not detected");
        return;
    }

    let (nx, ny, ne00) = (3, 1, 2 * QK_K);
    let mut rng = Lcg(0x1234_5678);

    for ty in FORMATS {
        let a = make_a(ty, nx, ne00 / QK_K, &mut rng);
        let b = make_q8_columns(ny, ne00 / QK_K, &mut rng);
        let got = run_kernel(ty, ny, &a, &b, nx, ne00);
        let want = scalar::reference_mul_mat(ty, &a, q8_bytes(&b), nx, ny, ne00);

        for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
            // Integer math is exact; the slack covers the different float
            // summation orders of the two paths.
            let tol = 1e-4 * w.abs() + 1e-2;
            assert!(
                (g - w).abs() <= tol,
                "{} C[{i}]: kernel {g} vs reference {w}",
                ty.name()
            );
        }
    }
}

#[test]
fn column_batches_match_single_column() {
    if !is_avx2_available() {
        println!("Skipping AVX2 kernel test: AVX2+FMA not detected");
        return;
    }

    let (nx, ne00) = (5, 2 * QK_K);
    let nb = ne00 / QK_K;
    let mut rng = Lcg(0x9e37_79b9);

    for ty in FORMATS {
        let a = make_a(ty, nx, nb, &mut rng);
        let b = make_q8_columns(8, nb, &mut rng);

        // One column at a time is the baseline.
        let mut want = vec![0.0f32; nx * 8];
        for iy in 0..8 {
            let col = run_kernel(ty, 1, &a, &b[iy * nb..(iy + 1) * nb], nx, ne00);
            want[iy * nx..(iy + 1) * nx].copy_from_slice(&col);
        }

        for batch in [2usize, 4, 8] {
            let mut got = vec![0.0f32; nx * 8];
            for step in 0..8 / batch {
                let c = run_kernel(ty, batch, &a, &b[step * batch * nb..], nx, ne00);
                got[step * batch * nx..(step + 1) * batch * nx].copy_from_slice(&c);
            }

            // Q2_K and Q4_K change accumulator shape across the M=2/M=4
            // boundary; the integer math is identical but the float folds
            // round differently, so allow a few ulps there.
            let exact = !matches!(ty, QuantType::Q2K | QuantType::Q4K);
            for (i, (g, w)) in got.iter().zip(want.iter()).enumerate() {
                if exact {
                    assert_eq!(g, w, "{} batch {batch} C[{i}]", ty.name());
                } else {
                    let tol = 1e-4 * w.abs() + 1e-2;
                    assert!(
                        (g - w).abs() <= tol,
                        "{} batch {batch} C[{i}]: {g} vs {w}",
                        ty.name()
                    );
                }
            }
        }
    }
}

#[test]
fn scale_unpack_matches_reference_extraction() {
    let mut rng = Lcg(0xdead_beef);
    for _ in 0..256 {
        let mut packed = [0u8; 12];
        rng.fill(&mut packed);
        let words = super::make_q4_scales(&packed);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        for j in 0..8 {
            let (sc, m) = scalar_scale_min(j, &packed);
            assert_eq!(bytes[j], sc, "scale {j} of {packed:?}");
            assert_eq!(bytes[j + 8], m, "min {j} of {packed:?}");
        }
    }
}

/// Direct-from-definition 6-bit extraction used as the model for
/// `make_q4_scales`.
fn scalar_scale_min(j: usize, q: &[u8; 12]) -> (u8, u8) {
    if j < 4 {
        (q[j] & 63, q[j + 4] & 63)
    } else {
        (
            (q[j + 4] & 0xF) | ((q[j - 4] >> 6) << 4),
            (q[j + 4] >> 4) | ((q[j] >> 6) << 4),
        )
    }
}
