//! Spectral quantizer: PVQ-coded band shapes, stereo mid/side recombination,
//! noise folding and anti-collapse.
//!
//! Every band's normalized (unit-energy) shape is produced by recursively
//! halving its width, range-decoding an angle `itheta` that splits the
//! band's energy between the two halves, and recursing until a leaf is
//! reached, where the remaining few dimensions are decoded directly via the
//! PVQ codebook. This mirrors the split used by the encoder bit for bit:
//! each half always receives exactly the bit budget it was assigned, so the
//! recursion cannot desynchronize the bitstream even though the angle
//! resolution used here is a simplified uniform quantizer (see DESIGN.md).

use crate::celt::mode::{CACHE_BITS50, CACHE_INDEX50, EBAND5MS, NB_EBANDS, ORDERY_TABLE};
use crate::celt::pvq::decode_pulses;
use crate::math::{bitexact_cos, bitexact_log2tan, fast_exp2, fast_log2};
use crate::range_coder::RangeDecoder;

const BITRES: i32 = 3;
const EPSILON: f32 = 1e-15;

/// Spread decision, decoded once per frame from `SPREAD_ICDF`.
pub(crate) const SPREAD_NONE: i32 = 0;

#[inline(always)]
fn celt_log2_frac(v: u32) -> i32 {
    // BITRES-scaled log2, used only for the budget accounting of a PVQ leaf.
    ((fast_log2(v.max(1) as f32)) * (1 << BITRES) as f32) as i32
}

/// Converts a BITRES-scaled bit budget into the pulse count `k` the PVQ
/// codebook of width `n` can afford, using the precomputed bit-cost cache.
fn bits2pulses(lm: i32, band: usize, bits: i32) -> i32 {
    let row = (lm + 1) as usize * NB_EBANDS + band;
    let idx = CACHE_INDEX50[row] as usize;
    let cache = &CACHE_BITS50[idx..];
    let mut lo = 0i32;
    let mut hi = i32::from(cache[0]);
    let bits = bits - 1;
    for _ in 0..6 {
        let mid = (lo + hi + 1) >> 1;
        if i32::from(cache[mid as usize]) >= bits {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    let lo_cost = if lo == 0 { -1 } else { i32::from(cache[lo as usize]) };
    if bits - lo_cost <= i32::from(cache[hi as usize]) - bits {
        lo
    } else {
        hi
    }
}

/// Applies an N-point orthogonal "spreading" rotation in place, used to
/// decorrelate PVQ lattice artifacts before/after the inverse transform.
fn exp_rotation1(x: &mut [f32], stride: usize, costheta: f32, sintheta: f32) {
    let len = x.len();
    let ms = len / stride;
    for i in 0..stride {
        for j in 0..ms - 1 {
            let a = x[i + j * stride];
            let b = x[i + (j + 1) * stride];
            x[i + j * stride] = costheta * a - sintheta * b;
            x[i + (j + 1) * stride] = sintheta * a + costheta * b;
        }
    }
    for i in 0..stride {
        for j in (0..ms - 1).rev() {
            let a = x[i + j * stride];
            let b = x[i + (j + 1) * stride];
            x[i + j * stride] = costheta * a - sintheta * b;
            x[i + (j + 1) * stride] = sintheta * a + costheta * b;
        }
    }
}

fn exp_rotation(x: &mut [f32], len: usize, dir: i32, stride: usize, k: i32, spread: i32) {
    if 2 * k >= len as i32 || spread == SPREAD_NONE {
        return;
    }
    let factor = match spread {
        1 => 15,
        2 => 10,
        _ => 5,
    };
    let gain = len as f32 / (len as f32 + factor as f32 * k as f32);
    let theta = std::f32::consts::PI * gain * gain / 4.0;
    let (costheta, sintheta) = (theta.cos(), theta.sin());
    let (costheta, sintheta) = if dir < 0 {
        (costheta, -sintheta)
    } else {
        (costheta, sintheta)
    };

    if len as usize >= 8 * stride {
        let stride2 = ((len as f32).sqrt()) as usize;
        let stride2 = stride2.max(1);
        exp_rotation1(&mut x[..len], stride2, costheta, sintheta);
    }
    exp_rotation1(&mut x[..len], stride, costheta, sintheta);
}

/// Decodes an integer PVQ vector of width `n` and unit-normalizes it into
/// `x`; returns the squared norm before normalization (always > 0 as long
/// as `k > 0`).
fn alg_unquant(dec: &mut RangeDecoder, x: &mut [f32], n: i32, k: i32, spread: i32) -> f32 {
    let mut iy = vec![0i32; n as usize];
    if k <= 0 {
        x[..n as usize].fill(0.0);
        return 0.0;
    }
    let ryy = decode_pulses(dec, n, k, &mut iy);
    let gain = 1.0 / (ryy.max(1) as f32).sqrt();
    for i in 0..n as usize {
        x[i] = iy[i] as f32 * gain;
    }
    exp_rotation(x, n as usize, -1, k.max(1) as usize, k, spread);
    ryy as f32
}

fn renormalise_vector(x: &mut [f32], gain: f32) {
    let e: f32 = x.iter().map(|v| v * v).sum::<f32>() + EPSILON;
    let g = gain / e.sqrt();
    for v in x.iter_mut() {
        *v *= g;
    }
}

/// In-place length-2 Hadamard butterfly applied `n/2` times with the given
/// stride, used to (de)interleave short-MDCT sub-blocks before/after PVQ.
fn haar1(x: &mut [f32], n: usize, stride: usize) {
    let inv_sqrt2 = std::f32::consts::FRAC_1_SQRT_2;
    for i in 0..stride {
        for j in 0..n / 2 {
            let idx0 = i + stride * (2 * j);
            let idx1 = i + stride * (2 * j + 1);
            let a = x[idx0];
            let b = x[idx1];
            x[idx0] = (a + b) * inv_sqrt2;
            x[idx1] = (a - b) * inv_sqrt2;
        }
    }
}

fn deinterleave_hadamard(x: &mut [f32], n0: usize, stride: usize) {
    let len = n0 * stride;
    let mut tmp = vec![0.0f32; len];
    for i in 0..stride {
        for j in 0..n0 {
            tmp[j * stride + i] = x[ORDERY_TABLE[stride - 2 + i] as usize * n0 + j];
        }
    }
    x[..len].copy_from_slice(&tmp);
}

fn interleave_hadamard(x: &mut [f32], n0: usize, stride: usize) {
    let len = n0 * stride;
    let mut tmp = vec![0.0f32; len];
    for i in 0..stride {
        for j in 0..n0 {
            tmp[ORDERY_TABLE[stride - 2 + i] as usize * n0 + j] = x[j * stride + i];
        }
    }
    x[..len].copy_from_slice(&tmp);
}

/// One node of the recursive band-splitting tree: decodes an angle that
/// divides `b` (BITRES-scaled) bits between the vector's two halves and
/// recurses until a PVQ leaf remains.
#[allow(clippy::too_many_arguments)]
fn quant_partition(
    dec: &mut RangeDecoder,
    x: &mut [f32],
    n: i32,
    mut b: i32,
    b0: i32,
    lm: i32,
    band: usize,
    spread: i32,
    seed: &mut u32,
) -> u8 {
    if n == 1 {
        // Single coefficient: one sign bit, always collapses into the only sub-block.
        let sign = dec.decode_bits(1) != 0;
        x[0] = if sign { -1.0 } else { 1.0 };
        return 1;
    }

    if b <= 0 {
        fold_noise(x, n as usize, seed);
        return 0;
    }

    if n <= 2 {
        let k = bits2pulses(lm, band, b);
        alg_unquant(dec, x, n, k, spread);
        return u8::from(k > 0);
    }

    let qn_budget = b - (4 << BITRES).min(b);
    let qn = compute_qn(n, qn_budget);

    let itheta = if qn > 1 {
        dec.decode_uint((qn + 1) as u32) as i32
    } else {
        0
    };
    let qalloc = if qn > 1 { celt_log2_frac((qn + 1) as u32) } else { 0 };
    b = (b - qalloc).max(0);

    let itheta_q14 = if qn > 1 { (itheta * 16384) / qn } else { itheta * 16384 };

    let (mbits, sbits) = split_bits(n, b, itheta_q14);

    let half = (n / 2) as usize;
    let (left, right) = x.split_at_mut(half);
    let n2 = n - half as i32;

    let cm_left = if itheta_q14 < 16384 {
        quant_partition(dec, left, half as i32, mbits, b0, lm, band, spread, seed)
    } else {
        left.fill(0.0);
        0
    };
    let cm_right = if itheta_q14 > 0 {
        quant_partition(dec, right, n2, sbits, b0, lm, band, spread, seed)
    } else {
        right.fill(0.0);
        0
    };

    let theta = itheta_q14 as f32 * (std::f32::consts::FRAC_PI_2 / 16384.0);
    let (c, s) = (theta.cos(), theta.sin());
    for v in left.iter_mut() {
        *v *= c;
    }
    for v in right.iter_mut() {
        *v *= s;
    }

    cm_left | cm_right
}

fn split_bits(n: i32, b: i32, itheta_q14: i32) -> (i32, i32) {
    if itheta_q14 == 0 {
        return (b, 0);
    }
    if itheta_q14 == 16384 {
        return (0, b);
    }
    let imid = bitexact_cos(itheta_q14 as i16);
    let iside = bitexact_cos((16384 - itheta_q14) as i16);
    let log2_tan = bitexact_log2tan(i32::from(iside), i32::from(imid));
    let delta = ((n - 1) * log2_tan) >> 8;
    let mbits = ((b - delta) / 2).clamp(0, b);
    (mbits, b - mbits)
}

fn compute_qn(n: i32, b: i32) -> i32 {
    let n2 = (2 * n - 1).max(1);
    let qb = (b / n2).min(8 << BITRES);
    if qb < (1 << BITRES) >> 1 {
        1
    } else {
        let qn = ((2.0f32).powf(qb as f32 / (1 << BITRES) as f32)) as i32;
        ((qn + 1) >> 1 << 1).max(2)
    }
}

fn fold_noise(x: &mut [f32], n: usize, seed: &mut u32) {
    for v in x.iter_mut().take(n) {
        *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *v = if (*seed & 0x8000) != 0 { -1.0 } else { 1.0 };
    }
    renormalise_vector(&mut x[..n], 1.0);
}

/// Quantizes (decodes) a single mono band of width `n`, handling the
/// short-block Hadamard (de)interleave and recursive PVQ split.
#[allow(clippy::too_many_arguments)]
pub(crate) fn quant_band(
    dec: &mut RangeDecoder,
    x: &mut [f32],
    n: i32,
    b: i32,
    b0: i32,
    lm: i32,
    band: usize,
    spread: i32,
    seed: &mut u32,
) -> u8 {
    let time_split = b0 > 1;
    if time_split {
        interleave_hadamard(x, (n / b0) as usize, b0 as usize);
    }
    let cm = quant_partition(dec, x, n, b, b0, lm, band, spread, seed);
    if time_split {
        deinterleave_hadamard(x, (n / b0) as usize, b0 as usize);
        haar1(x, n as usize, 1);
    }
    cm
}

/// Quantizes (decodes) a joint-stereo band: decodes a mid/side split angle,
/// then recurses on each channel independently with its share of bits.
#[allow(clippy::too_many_arguments)]
pub(crate) fn quant_band_stereo(
    dec: &mut RangeDecoder,
    x: &mut [f32],
    y: &mut [f32],
    n: i32,
    b: i32,
    lm: i32,
    band: usize,
    spread: i32,
    seed: &mut u32,
) -> u8 {
    if n == 1 {
        let sign = dec.decode_bits(1) != 0;
        x[0] = 1.0;
        y[0] = if sign { -1.0 } else { 1.0 };
        return 1;
    }

    let qn = compute_qn(n, b);
    let itheta = if qn > 1 {
        dec.decode_uint((qn + 1) as u32) as i32
    } else {
        0
    };
    let qalloc = if qn > 1 { celt_log2_frac((qn + 1) as u32) } else { 0 };
    let budget = (b - qalloc).max(0);
    let itheta_q14 = if qn > 1 { (itheta * 16384) / qn } else { 0 };

    let (mbits, sbits) = split_bits(n, budget, itheta_q14);

    let cm_x = quant_band(dec, x, n, mbits, 1, lm, band, spread, seed);
    let cm_y = quant_band(dec, y, n, sbits, 1, lm, band, spread, seed);

    let theta = itheta_q14 as f32 * (std::f32::consts::FRAC_PI_2 / 16384.0);
    let (c, s) = (theta.cos(), theta.sin());
    for v in x.iter_mut() {
        *v *= c;
    }
    for v in y.iter_mut() {
        *v *= s;
    }

    cm_x | cm_y
}

/// Decodes every coded band's normalized spectrum, writing `collapse_masks`
/// (one byte per band per channel, low `1<<LM` bits meaningful).
#[allow(clippy::too_many_arguments)]
pub(crate) fn quant_all_bands(
    dec: &mut RangeDecoder,
    x: &mut [f32],
    mut y: Option<&mut [f32]>,
    collapse_masks: &mut [u8],
    pulses: &[i32; NB_EBANDS],
    short_blocks: bool,
    spread: i32,
    dual_stereo: bool,
    intensity: i32,
    lm: i32,
    coded_bands: i32,
    seed: &mut u32,
) {
    let c = if y.is_some() { 2 } else { 1 };
    let b0 = if short_blocks { 1 << lm } else { 1 };
    let mut offset = 0usize;

    for j in 0..coded_bands as usize {
        let n = (i32::from(EBAND5MS[j + 1] - EBAND5MS[j])) << lm;
        let band_bits = pulses[j];

        if let Some(y_buf) = y.as_deref_mut() {
            if (j as i32) >= intensity {
                // Intensity stereo: code mid only, copy into side with zero energy.
                let cm = quant_band(
                    dec,
                    &mut x[offset..offset + n as usize],
                    n,
                    band_bits,
                    b0,
                    lm,
                    j,
                    spread,
                    seed,
                );
                y_buf[offset..offset + n as usize].fill(0.0);
                collapse_masks[j * c as usize] = cm;
                collapse_masks[j * c as usize + 1] = cm;
            } else if dual_stereo {
                let half = band_bits / 2;
                let cmx = quant_band(
                    dec,
                    &mut x[offset..offset + n as usize],
                    n,
                    half,
                    b0,
                    lm,
                    j,
                    spread,
                    seed,
                );
                let cmy = quant_band(
                    dec,
                    &mut y_buf[offset..offset + n as usize],
                    n,
                    band_bits - half,
                    b0,
                    lm,
                    j,
                    spread,
                    seed,
                );
                collapse_masks[j * c as usize] = cmx;
                collapse_masks[j * c as usize + 1] = cmy;
            } else {
                let cm = quant_band_stereo(
                    dec,
                    &mut x[offset..offset + n as usize],
                    &mut y_buf[offset..offset + n as usize],
                    n,
                    band_bits,
                    lm,
                    j,
                    spread,
                    seed,
                );
                collapse_masks[j * c as usize] = cm;
                collapse_masks[j * c as usize + 1] = cm;
            }
        } else {
            let cm = quant_band(
                dec,
                &mut x[offset..offset + n as usize],
                n,
                band_bits,
                b0,
                lm,
                j,
                spread,
                seed,
            );
            collapse_masks[j] = cm;
        }

        offset += n as usize;
    }
}

/// Reinjects pseudo-random noise into sub-blocks that PVQ left at exactly
/// zero energy (tracked by `collapse_masks`), then renormalizes the band.
///
/// Transient frames split each band into `1<<LM` sub-blocks; a sub-block
/// that received no pulses at all would otherwise decode as silence, which
/// is audible as a "collapse" against its neighbours. The noise scale here
/// follows the energy actually decoded for the band rather than a fixed
/// floor, so bands that just went quiet don't get the same treatment as
/// bands that have been quiet for a while. Runs in the same float domain as
/// the rest of the quantizer, not the reference's Q14 fixed point (see
/// DESIGN.md).
#[allow(clippy::too_many_arguments)]
pub(crate) fn anti_collapse(
    x: &mut [f32],
    mut y: Option<&mut [f32]>,
    collapse_masks: &[u8],
    lm: i32,
    c: i32,
    start: usize,
    end: usize,
    pulses: &[i32; NB_EBANDS],
    cur_e: &[i16],
    prev1_e: &[i16],
    prev2_e: &[i16],
    seed: &mut u32,
) {
    let blocks = 1usize << lm.max(0);
    let mut offset = (i32::from(EBAND5MS[start]) << lm) as usize;

    for j in start..end {
        let n0 = (i32::from(EBAND5MS[j + 1]) - i32::from(EBAND5MS[j])).max(1);
        let n = (n0 << lm) as usize;
        let depth = ((1 + pulses[j]) / n0) >> lm.max(0);
        let thresh = (fast_exp2(-(depth as f32) / 8.0) * 0.5).min(0.5);

        for ch in 0..c as usize {
            let idx = j + ch * NB_EBANDS;
            let prev_min = prev1_e[idx].min(prev2_e[idx]);
            let ediff = (i32::from(cur_e[idx]) - i32::from(prev_min)).clamp(0, 16383);

            let mut r = if ediff < 16384 {
                (fast_exp2(-(ediff as f32) / 1024.0) * 2.0).min(2.0)
            } else {
                0.0
            };
            if lm == 3 {
                r *= std::f32::consts::FRAC_1_SQRT_2;
            }
            r *= thresh;
            let scale = r / (n as f32).sqrt().max(1.0);
            if scale <= 0.0 {
                continue;
            }

            let buf: &mut [f32] = if ch == 0 {
                &mut x[offset..offset + n]
            } else if let Some(yb) = y.as_deref_mut() {
                &mut yb[offset..offset + n]
            } else {
                continue;
            };

            let mask = collapse_masks[j * c as usize + ch];
            let sub_n = n / blocks.max(1);
            let mut touched = false;
            for k in 0..blocks {
                if (mask >> k) & 1 != 0 {
                    continue;
                }
                touched = true;
                for v in &mut buf[k * sub_n..(k + 1) * sub_n] {
                    *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    *v = if (*seed & 0x8000) != 0 { -scale } else { scale };
                }
            }
            if touched {
                renormalise_vector(buf, 1.0);
            }
        }
        offset += n;
    }
}
